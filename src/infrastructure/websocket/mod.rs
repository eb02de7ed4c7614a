//! Gateway WebSocket: wire DTOs and the gloo-net transport.

pub mod dto;
pub mod gloo_transport;

pub use dto::*;
pub use gloo_transport::*;
