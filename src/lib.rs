pub mod config;
pub mod error;
pub mod logging;
pub mod models;
pub mod proxy;
pub mod server;
pub mod tokens;
pub mod translate;
pub mod upstream;

pub use config::GatewayConfig;
pub use error::{ErrorKind, GatewayError, Result};
pub use logging::{LogLevel, SharedLogger};
pub use models::{ModelSelector, ModelTier, ResolvedModel};
pub use server::{build_router, AppState};
pub use upstream::UpstreamClient;
