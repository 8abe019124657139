//! Configuration validation utilities.

use super::error::{ConfigError, ConfigResult};
use super::schema::RuntimeConfig;

/// Validates a fully-merged [`RuntimeConfig`].
pub fn validate_config(config: &RuntimeConfig) -> ConfigResult<()> {
    if config.namespace_prefix.trim().is_empty() {
        return Err(ConfigError::missing_field("namespace_prefix"));
    }
    if config.namespace_prefix.contains(':') {
        return Err(ConfigError::validation(
            "namespace_prefix must not contain ':', it is used as the key separator",
        ));
    }

    if !(0.0..=1.0).contains(&config.refresh_ahead_percent) {
        return Err(ConfigError::validation(format!(
            "refresh_ahead_percent must be between 0.0 and 1.0, got {}",
            config.refresh_ahead_percent
        )));
    }

    if config.discovery_ttl_secs == 0 {
        return Err(ConfigError::validation("discovery_ttl_secs must be greater than 0"));
    }

    if config.timeouts.connect_secs == 0 {
        return Err(ConfigError::validation("timeouts.connect_secs must be greater than 0"));
    }
    if config.timeouts.request_secs == 0 {
        return Err(ConfigError::validation("timeouts.request_secs must be greater than 0"));
    }

    if let Some(ref url) = config.proxy.http_proxy {
        validate_proxy_url(url)?;
    }
    if let Some(ref url) = config.proxy.https_proxy {
        validate_proxy_url(url)?;
    }

    Ok(())
}

fn validate_proxy_url(url: &str) -> ConfigResult<()> {
    if url.is_empty() {
        return Err(ConfigError::missing_field("proxy url"));
    }
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return Err(ConfigError::invalid_url(url, "proxy URL must start with http:// or https://"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(validate_config(&RuntimeConfig::default()).is_ok());
    }

    #[test]
    fn empty_namespace_prefix_is_rejected() {
        let mut config = RuntimeConfig::default();
        config.namespace_prefix = "".into();
        assert!(matches!(validate_config(&config), Err(ConfigError::MissingField { .. })));
    }

    #[test]
    fn namespace_prefix_with_colon_is_rejected() {
        let mut config = RuntimeConfig::default();
        config.namespace_prefix = "a:b".into();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn refresh_ahead_percent_out_of_range_is_rejected() {
        let mut config = RuntimeConfig::default();
        config.refresh_ahead_percent = 1.5;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn zero_discovery_ttl_is_rejected() {
        let mut config = RuntimeConfig::default();
        config.discovery_ttl_secs = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn proxy_url_without_scheme_is_rejected() {
        let mut config = RuntimeConfig::default();
        config.proxy.http_proxy = Some("proxy.example.com:8080".into());
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn proxy_url_with_scheme_is_accepted() {
        let mut config = RuntimeConfig::default();
        config.proxy.https_proxy = Some("https://proxy.example.com:8443".into());
        assert!(validate_config(&config).is_ok());
    }
}
