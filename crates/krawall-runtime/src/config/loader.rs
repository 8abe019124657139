//! Configuration file loader, built on `figment` (TOML file + env
//! overrides), matching the teacher's layered-`ConfigLoader` idiom.

use super::error::{ConfigError, ConfigResult};
use super::schema::RuntimeConfig;
use super::validation::validate_config;
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const CONFIG_NAMES: &[&str] = &["krawall.toml", ".krawall.toml"];
const ENV_PREFIX: &str = "KRAWALL_";

/// Loads [`RuntimeConfig`] from a TOML file plus `KRAWALL_`-prefixed
/// environment overrides, searching a configurable set of directories.
pub struct ConfigLoader {
    search_paths: Vec<PathBuf>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self { search_paths: Vec::new() }
    }

    /// Adds a search path for configuration files.
    pub fn add_search_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.search_paths.push(path.as_ref().to_path_buf());
        self
    }

    /// Adds the current directory to search paths.
    pub fn with_current_dir(self) -> Self {
        match std::env::current_dir() {
            Ok(cwd) => self.add_search_path(cwd),
            Err(_) => self,
        }
    }

    /// Adds the user config directory (`~/.config/krawall` on Linux) to
    /// search paths.
    pub fn with_user_config_dir(self) -> Self {
        match dirs::config_dir() {
            Some(dir) => self.add_search_path(dir.join("krawall")),
            None => self,
        }
    }

    /// Loads configuration from the first available file, falling back to
    /// defaults (still subject to env overrides) if none is found.
    pub fn load(&self) -> ConfigResult<RuntimeConfig> {
        let figment = match self.find_config_file() {
            Some(path) => {
                info!(path = %path.display(), "loading configuration file");
                Figment::from(Serialized::defaults(RuntimeConfig::default()))
                    .merge(Toml::file(&path))
                    .merge(Env::prefixed(ENV_PREFIX).split("__"))
            }
            None => {
                info!("no configuration file found, using defaults with env overrides");
                Figment::from(Serialized::defaults(RuntimeConfig::default()))
                    .merge(Env::prefixed(ENV_PREFIX).split("__"))
            }
        };
        let config: RuntimeConfig = figment.extract()?;
        validate_config(&config)?;
        Ok(config)
    }

    /// Loads configuration from a specific file.
    pub fn load_from_file<P: AsRef<Path>>(&self, path: P) -> ConfigResult<RuntimeConfig> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.to_path_buf()));
        }
        info!(path = %path.display(), "loading configuration file");
        let config: RuntimeConfig = Figment::from(Serialized::defaults(RuntimeConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;
        validate_config(&config)?;
        Ok(config)
    }

    /// Loads configuration from a TOML string, still subject to env
    /// overrides (used by tests and the demo CLI's inline config).
    pub fn load_from_str(&self, toml: &str) -> ConfigResult<RuntimeConfig> {
        let config: RuntimeConfig = Figment::from(Serialized::defaults(RuntimeConfig::default()))
            .merge(Toml::string(toml))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;
        validate_config(&config)?;
        Ok(config)
    }

    fn find_config_file(&self) -> Option<PathBuf> {
        for search_path in &self.search_paths {
            for name in CONFIG_NAMES {
                let path = search_path.join(name);
                debug!(path = %path.display(), "checking for config file");
                if path.exists() {
                    return Some(path);
                }
            }
        }
        None
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new().with_current_dir().with_user_config_dir()
    }
}

/// Loads configuration using the default search path set.
pub fn load_config() -> ConfigResult<RuntimeConfig> {
    ConfigLoader::default().load()
}

/// Loads configuration from a specific file, bypassing the search path.
pub fn load_config_from_file<P: AsRef<Path>>(path: P) -> ConfigResult<RuntimeConfig> {
    ConfigLoader::new().load_from_file(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_source_yields_defaults() {
        let config = ConfigLoader::new().load_from_str("").unwrap();
        assert_eq!(config.namespace_prefix, "krawall");
        assert_eq!(config.refresh_ahead_percent, 0.75);
    }

    #[test]
    fn toml_overrides_apply_on_top_of_defaults() {
        let toml = r#"
            namespace_prefix = "acme"
            discovery_ttl_secs = 600

            [browser]
            headless = false
        "#;
        let config = ConfigLoader::new().load_from_str(toml).unwrap();
        assert_eq!(config.namespace_prefix, "acme");
        assert_eq!(config.discovery_ttl_secs, 600);
        assert!(!config.browser.headless);
        // Untouched fields keep their defaults.
        assert_eq!(config.timeouts.connect_secs, 10);
    }

    #[test]
    fn env_override_wins_over_file() {
        // SAFETY: test runs single-threaded within this process; no other
        // test reads KRAWALL_NAMESPACE_PREFIX.
        unsafe { std::env::set_var("KRAWALL_NAMESPACE_PREFIX", "from-env") };
        let toml = r#"namespace_prefix = "from-file""#;
        let config = ConfigLoader::new().load_from_str(toml).unwrap();
        assert_eq!(config.namespace_prefix, "from-env");
        unsafe { std::env::remove_var("KRAWALL_NAMESPACE_PREFIX") };
    }

    #[test]
    fn load_from_file_reports_missing_file() {
        let err = ConfigLoader::new().load_from_file("/nonexistent/krawall.toml").unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound(_)));
    }
}
