pub mod dom;
pub mod http;
pub mod services;
pub mod timers;
pub mod websocket;
