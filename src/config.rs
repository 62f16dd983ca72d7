use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use lambda_models::{Config, LocalError};
use std::path::Path;
use tracing_subscriber::EnvFilter;

pub const ENV_PREFIX: &str = "LAMBDA_LOCAL_";

/// Prefixed variables owned by CLI flags; they name no config key.
const CLI_ONLY_VARS: [&str; 1] = ["TEMPLATE"];

/// Defaults, then the TOML file when given, then `LAMBDA_LOCAL_*` variables
/// (`LAMBDA_LOCAL_SERVER__PORT=8080` sets `server.port`).
pub fn load_config(path: Option<&Path>) -> Result<Config, LocalError> {
    let mut figment = Figment::from(Serialized::defaults(Config::default()));
    if let Some(path) = path {
        if !path.exists() {
            return Err(LocalError::ConfigError {
                reason: format!("config file {} not found", path.display()),
            });
        }
        figment = figment.merge(Toml::file(path));
    }
    figment
        .merge(Env::prefixed(ENV_PREFIX).ignore(&CLI_ONLY_VARS).split("__"))
        .extract()
        .map_err(|e| LocalError::ConfigError {
            reason: e.to_string(),
        })
}

/// Installs the global subscriber; `RUST_LOG` overrides the default filter.
pub fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}
