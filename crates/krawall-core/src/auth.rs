//! Maps a typed auth config to request headers or query parameters
//! (spec.md §4.3).

use crate::model::{AuthConfig, AuthKind};
use base64::Engine;
use std::collections::HashMap;

/// Header set produced for a given auth kind/config. Deterministic:
/// depends only on the inputs, and an absent required field produces no
/// header at all rather than a partially-formed one (testable property 3).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthHeaders {
    pub headers: HashMap<String, String>,
}

impl AuthHeaders {
    fn single(name: &str, value: String) -> Self {
        let mut headers = HashMap::new();
        headers.insert(name.to_string(), value);
        Self { headers }
    }
}

/// Builds the header set for `kind`/`config`. `OAuth2` is delegated: the
/// caller supplies the resulting bearer token via `config["accessToken"]`
/// at connect time, so it is handled identically to `Bearer` here.
pub fn build_auth_headers(kind: AuthKind, config: &AuthConfig) -> AuthHeaders {
    match kind {
        AuthKind::None => AuthHeaders::default(),
        AuthKind::Bearer => match config.get("token") {
            Some(token) if !token.is_empty() => {
                AuthHeaders::single("Authorization", format!("Bearer {token}"))
            }
            _ => AuthHeaders::default(),
        },
        AuthKind::ApiKey => match (config.get("headerName"), config.get("apiKey")) {
            (Some(header_name), Some(api_key))
                if !header_name.is_empty() && !api_key.is_empty() =>
            {
                AuthHeaders::single(header_name, api_key.to_string())
            }
            _ => AuthHeaders::default(),
        },
        AuthKind::BasicAuth => match (config.get("username"), config.get("password")) {
            (Some(user), Some(pass)) => {
                let encoded =
                    base64::engine::general_purpose::STANDARD.encode(format!("{user}:{pass}"));
                AuthHeaders::single("Authorization", format!("Basic {encoded}"))
            }
            _ => AuthHeaders::default(),
        },
        AuthKind::CustomHeader => {
            // Copies the supplied header map verbatim.
            AuthHeaders {
                headers: config.fields.clone(),
            }
        }
        AuthKind::OAuth2 => match config.get("accessToken") {
            Some(token) if !token.is_empty() => {
                AuthHeaders::single("Authorization", format!("Bearer {token}"))
            }
            _ => AuthHeaders::default(),
        },
    }
}

/// Query-parameter fallback used by WebSocket connectors when the server
/// rejects upgrade headers (spec.md §4.3). Only `Bearer` and `ApiKey` have a
/// defined fallback.
pub fn build_auth_query_params(kind: AuthKind, config: &AuthConfig) -> Vec<(String, String)> {
    match kind {
        AuthKind::Bearer => config
            .get("token")
            .filter(|t| !t.is_empty())
            .map(|t| vec![("token".to_string(), t.to_string())])
            .unwrap_or_default(),
        AuthKind::ApiKey => config
            .get("apiKey")
            .filter(|k| !k.is_empty())
            .map(|k| vec![("api_key".to_string(), k.to_string())])
            .unwrap_or_default(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn none_produces_no_headers() {
        let headers = build_auth_headers(AuthKind::None, &AuthConfig::default());
        assert!(headers.headers.is_empty());
    }

    #[test]
    fn bearer_produces_authorization_header() {
        let config = AuthConfig::default().with("token", "abc123");
        let headers = build_auth_headers(AuthKind::Bearer, &config);
        assert_eq!(
            headers.headers.get("Authorization"),
            Some(&"Bearer abc123".to_string())
        );
    }

    #[test]
    fn bearer_missing_token_produces_no_header() {
        let headers = build_auth_headers(AuthKind::Bearer, &AuthConfig::default());
        assert!(headers.headers.is_empty());
    }

    #[test]
    fn api_key_requires_both_fields() {
        let partial = AuthConfig::default().with("headerName", "X-Api-Key");
        assert!(build_auth_headers(AuthKind::ApiKey, &partial).headers.is_empty());

        let complete = partial.with("apiKey", "secret");
        let headers = build_auth_headers(AuthKind::ApiKey, &complete);
        assert_eq!(
            headers.headers.get("X-Api-Key"),
            Some(&"secret".to_string())
        );
    }

    #[test]
    fn basic_auth_encodes_user_and_pass() {
        let config = AuthConfig::default().with("username", "u").with("password", "p");
        let headers = build_auth_headers(AuthKind::BasicAuth, &config);
        let expected = format!(
            "Basic {}",
            base64::engine::general_purpose::STANDARD.encode("u:p")
        );
        assert_eq!(headers.headers.get("Authorization"), Some(&expected));
    }

    #[test]
    fn custom_header_copies_map_verbatim() {
        let config = AuthConfig::default()
            .with("X-One", "1")
            .with("X-Two", "2");
        let headers = build_auth_headers(AuthKind::CustomHeader, &config);
        assert_eq!(headers.headers.get("X-One"), Some(&"1".to_string()));
        assert_eq!(headers.headers.get("X-Two"), Some(&"2".to_string()));
    }

    #[test]
    fn ws_fallback_query_params_for_bearer_and_api_key() {
        let bearer = AuthConfig::default().with("token", "tok");
        assert_eq!(
            build_auth_query_params(AuthKind::Bearer, &bearer),
            vec![("token".to_string(), "tok".to_string())]
        );

        let api_key = AuthConfig::default().with("apiKey", "key");
        assert_eq!(
            build_auth_query_params(AuthKind::ApiKey, &api_key),
            vec![("api_key".to_string(), "key".to_string())]
        );

        assert!(build_auth_query_params(AuthKind::BasicAuth, &AuthConfig::default()).is_empty());
    }
}
