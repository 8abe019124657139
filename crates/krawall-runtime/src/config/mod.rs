//! Configuration for a krawall-runtime host process: TOML file plus
//! `KRAWALL_`-prefixed environment overrides, loaded and validated the
//! way the teacher's own config module layers its sources.

pub mod error;
pub mod loader;
pub mod schema;
pub mod validation;

pub use error::{ConfigError, ConfigResult};
pub use loader::{load_config, load_config_from_file, ConfigLoader};
pub use schema::{BrowserConfig, LogLevel, LoggingConfig, ProxyConfig, RuntimeConfig, TimeoutsConfig};
pub use validation::validate_config;
