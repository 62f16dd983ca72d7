pub mod app;
pub mod config;

pub use app::*;
pub use config::{init_tracing, load_config, ENV_PREFIX};
pub use lambda_models::{Config, LocalError};
