//! Chart aggregate: renderable snapshots, colours and the chart-library ports.

pub mod entities;
pub mod services;
pub mod value_objects;

pub use entities::*;
pub use services::*;
pub use value_objects::*;
