pub mod candlestick_session;
pub mod chart_lifecycle;
pub mod connection;
pub mod historical_loader;
pub mod live_data_cache;
pub mod market_feed;
pub mod market_store;
pub mod subscription_manager;

pub use candlestick_session::*;
pub use chart_lifecycle::*;
pub use connection::*;
pub use historical_loader::*;
pub use live_data_cache::*;
pub use market_feed::*;
pub use market_store::*;
pub use subscription_manager::*;
