//! HTTP connector (spec.md §4.5, component C5): a pooled `reqwest` client
//! that sends the templated request body to `target.endpoint_url` (or the
//! path named in `protocolConfig.path`) and extracts the response through
//! the target's response template.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use krawall_core::{
    build_auth_headers, build_request, extract_error, extract_response, extract_tokens,
    Connector, HealthCheck, KrawallError, KrawallResult, SendMeta, SendOutcome, Target,
};
use reqwest::{Client, Method};
use tokio::sync::OnceCell;
use tracing::{info, warn};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_REDIRECTS: usize = 5;

/// `protocolConfig` fields the HTTP connector understands, all optional.
#[derive(Debug, Clone, Default, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct HttpProtocolConfig {
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    health_path: Option<String>,
}

/// HTTP connector implementation (spec.md §4.5).
///
/// `connect` just builds and validates the pooled client; there is no
/// persistent session to establish. The `OnceCell` makes repeated calls
/// idempotent without re-validating the target on every caller.
pub struct HttpConnector {
    target: Target,
    protocol_config: HttpProtocolConfig,
    client: Client,
    connected: AtomicBool,
    init: OnceCell<()>,
}

impl HttpConnector {
    pub fn new(target: Target) -> KrawallResult<Self> {
        let protocol_config: HttpProtocolConfig = if target.protocol_config.is_null() {
            HttpProtocolConfig::default()
        } else {
            serde_json::from_value(target.protocol_config.clone())
                .map_err(|e| KrawallError::config(format!("invalid protocolConfig: {e}")))?
        };

        let client = Client::builder()
            .timeout(CONNECT_TIMEOUT)
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .build()
            .map_err(|e| KrawallError::config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            target,
            protocol_config,
            client,
            connected: AtomicBool::new(false),
            init: OnceCell::new(),
        })
    }

    fn request_url(&self) -> KrawallResult<url::Url> {
        let base = url::Url::parse(&self.target.endpoint_url)
            .map_err(|e| KrawallError::config(format!("invalid endpointUrl: {e}")))?;
        match &self.protocol_config.path {
            Some(path) => base
                .join(path)
                .map_err(|e| KrawallError::config(format!("invalid protocolConfig.path: {e}"))),
            None => Ok(base),
        }
    }

    fn method(&self) -> Method {
        self.protocol_config
            .method
            .as_deref()
            .and_then(|m| Method::from_bytes(m.as_bytes()).ok())
            .unwrap_or(Method::POST)
    }

    fn health_url(&self) -> KrawallResult<url::Url> {
        let base = url::Url::parse(&self.target.endpoint_url)
            .map_err(|e| KrawallError::config(format!("invalid endpointUrl: {e}")))?;
        match &self.protocol_config.health_path {
            Some(path) => base.join(path).map_err(|e| {
                KrawallError::config(format!("invalid protocolConfig.healthPath: {e}"))
            }),
            None => Ok(base),
        }
    }
}

#[async_trait]
impl Connector for HttpConnector {
    async fn connect(&self) -> KrawallResult<()> {
        self.init
            .get_or_try_init(|| async {
                self.request_url()?;
                info!(target = %self.target.id, url = %self.target.endpoint_url, "HTTP connector ready");
                Ok(())
            })
            .await?;
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> KrawallResult<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn send(&self, msg: &str, meta: SendMeta) -> KrawallResult<SendOutcome> {
        if !self.is_connected().await {
            return Err(KrawallError::NotConnected);
        }

        let mut template = self.target.request_template.clone();
        template.variables.extend(meta.variables.clone());
        let body = build_request(msg, &template);

        let url = self.request_url()?;
        let auth = build_auth_headers(self.target.auth_kind, &self.target.auth_config);

        let mut req = self.client.request(self.method(), url).json(&body);
        for (name, value) in &auth.headers {
            req = req.header(name, value);
        }

        let started = Instant::now();
        let response = req
            .send()
            .await
            .map_err(|e| KrawallError::transport(e.to_string()))?;
        let status = response.status();
        let raw: serde_json::Value = response
            .json()
            .await
            .map_err(|e| KrawallError::transport(format!("invalid JSON response: {e}")))?;
        let latency_ms = started.elapsed().as_millis() as u64;

        if status.as_u16() >= 400 {
            let body = extract_error(&raw, &self.target.response_template);
            return Err(KrawallError::UpstreamHttp {
                status: status.as_u16(),
                body,
            });
        }

        let content = extract_response(&raw, &self.target.response_template)?;
        let tokens = extract_tokens(&raw, &self.target.response_template);
        let error = extract_error(&raw, &self.target.response_template);

        Ok(SendOutcome {
            content,
            tokens,
            error,
            meta,
            latency_ms,
        })
    }

    fn supports_streaming(&self) -> bool {
        false
    }

    async fn health_check(&self) -> KrawallResult<HealthCheck> {
        if !self.is_connected().await {
            return Err(KrawallError::NotConnected);
        }

        let url = self.health_url()?;
        let started = Instant::now();
        let result = self
            .client
            .get(url)
            .timeout(HEALTH_TIMEOUT)
            .send()
            .await;
        let latency_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(resp) if resp.status().is_success() => Ok(HealthCheck::ok(latency_ms)),
            Ok(resp) => {
                warn!(target = %self.target.id, status = %resp.status(), "HTTP health check failed");
                Ok(HealthCheck::unhealthy(
                    latency_ms,
                    format!("status {}", resp.status()),
                ))
            }
            Err(e) => Ok(HealthCheck::unhealthy(latency_ms, e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use krawall_core::{
        AuthConfig, AuthKind, ConnectorKind, RequestTemplate, ResponseTemplate, ResponseTransform,
        TargetId,
    };
    use std::collections::HashMap;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate as MockResponseTemplate};

    fn target(endpoint_url: String) -> Target {
        Target {
            id: TargetId::from("t1"),
            name: "test target".into(),
            kind: ConnectorKind::Http,
            endpoint_url,
            auth_kind: AuthKind::Bearer,
            auth_config: AuthConfig::default().with("token", "secret-token"),
            request_template: RequestTemplate {
                message_path: "messages.0.content".into(),
                structure: serde_json::json!({"messages": [{"role": "user", "content": ""}]}),
                variables: HashMap::new(),
            },
            response_template: ResponseTemplate {
                response_path: "choices.0.message.content".into(),
                token_usage_path: Some("usage".into()),
                error_path: Some("error.message".into()),
                transform: ResponseTransform::None,
            },
            protocol_config: serde_json::Value::Null,
            active: true,
            last_test_at: None,
            last_test_outcome: None,
        }
    }

    #[tokio::test]
    async fn send_before_connect_fails_not_connected() {
        let connector = HttpConnector::new(target("https://example.invalid".into())).unwrap();
        let err = connector.send("hi", SendMeta::default()).await.unwrap_err();
        assert!(matches!(err, KrawallError::NotConnected));
    }

    #[tokio::test]
    async fn send_extracts_content_and_merges_auth_header() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/"))
            .and(header("Authorization", "Bearer secret-token"))
            .respond_with(MockResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"content": "hello there"}}],
                "usage": {"prompt_tokens": 3, "completion_tokens": 2, "total_tokens": 5}
            })))
            .mount(&server)
            .await;

        let connector = HttpConnector::new(target(server.uri())).unwrap();
        connector.connect().await.unwrap();
        let outcome = connector.send("hi", SendMeta::default()).await.unwrap();

        assert_eq!(outcome.content, "hello there");
        assert_eq!(outcome.tokens.unwrap().total_tokens, Some(5));
    }

    #[tokio::test]
    async fn status_400_plus_raises_upstream_http_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/"))
            .respond_with(MockResponseTemplate::new(429).set_body_json(serde_json::json!({
                "error": {"message": "rate limited"}
            })))
            .mount(&server)
            .await;

        let connector = HttpConnector::new(target(server.uri())).unwrap();
        connector.connect().await.unwrap();
        let err = connector.send("hi", SendMeta::default()).await.unwrap_err();

        match err {
            KrawallError::UpstreamHttp { status, body } => {
                assert_eq!(status, 429);
                assert_eq!(body.as_deref(), Some("rate limited"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
