// routekit - file-system routed web server
// Route files compile in an isolated worker; changes hot-reload connected browsers

pub mod channel;
pub mod config;
pub mod error;
pub mod files;
pub mod registry;
pub mod request;
pub mod script;
pub mod worker;

// Serving
pub mod app;
pub mod hot_reload;
pub mod page_template;
pub mod server;

pub use app::App;
pub use channel::{ChannelMessage, DependencyGraph, UpdateChannel};
pub use config::Config;
pub use error::{Error, Result};
pub use files::{FileEvent, Files, WatcherError};
pub use hot_reload::{Coordinator, Notification, Shutdown};
pub use registry::{CompiledRoute, Registry};
pub use request::RequestContext;
pub use server::{router, AppState};

// Re-export the routing and compiler crates
pub use routekit_parser;
pub use routekit_router;
