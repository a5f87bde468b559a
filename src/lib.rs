pub mod config;
pub mod proxy;
pub mod shutdown;

pub use config::{Config, UpstreamAddr};
pub use proxy::{
    Direction, Listener, ListenerConfig, ListenerStats, RequestInspection, RequestLine,
    RequestPolicy, SessionState, UrlStats,
};
pub use shutdown::{ShutdownController, ShutdownSignal};
