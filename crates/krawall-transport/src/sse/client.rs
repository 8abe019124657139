//! Server-Sent Events connector (spec.md §4.7, component C7).
//!
//! Sends the templated request body as a POST and consumes the response
//! as an `event-stream`: each `data:` line is parsed as JSON, the response
//! template is applied to it, and the extracted fragments are concatenated
//! in arrival order. A connection that closes before any fragment
//! resolves is a shape error, not an empty success — the caller has no way
//! to distinguish "the bot said nothing" from "the stream never opened".

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use krawall_core::{
    build_auth_headers, build_request, extract_error, extract_response, extract_tokens,
    Connector, HealthCheck, KrawallError, KrawallResult, SendMeta, SendOutcome, Target,
};
use reqwest::Client;
use tokio::sync::OnceCell;
use tracing::warn;

const SSE_STREAM_PATH: &str = "<sse-stream>";

/// SSE connector implementation (spec.md §4.7).
pub struct SseConnector {
    target: Target,
    client: Client,
    connected: AtomicBool,
    init: OnceCell<()>,
}

impl SseConnector {
    pub fn new(target: Target) -> KrawallResult<Self> {
        let client = Client::builder()
            .build()
            .map_err(|e| KrawallError::config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            target,
            client,
            connected: AtomicBool::new(false),
            init: OnceCell::new(),
        })
    }

    fn request_url(&self) -> KrawallResult<url::Url> {
        url::Url::parse(&self.target.endpoint_url)
            .map_err(|e| KrawallError::config(format!("invalid endpointUrl: {e}")))
    }
}

#[async_trait]
impl Connector for SseConnector {
    async fn connect(&self) -> KrawallResult<()> {
        self.init
            .get_or_try_init(|| async {
                self.request_url()?;
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
        let mut req = self.client.post(url).json(&body);
        for (name, value) in &auth.headers {
            req = req.header(name, value);
        }

        let started = Instant::now();
        let response = req
            .send()
            .await
            .map_err(|e| KrawallError::transport(e.to_string()))?;

        let status = response.status();
        if status.as_u16() >= 400 {
            let text = response.text().await.unwrap_or_default();
            return Err(KrawallError::UpstreamHttp {
                status: status.as_u16(),
                body: Some(text),
            });
        }

        let mut stream = response.bytes_stream().eventsource();
        let mut content = String::new();
        let mut tokens = None;
        let mut error = None;

        while let Some(event) = stream.next().await {
            let event = match event {
                Ok(event) => event,
                Err(e) => {
                    warn!(target = %self.target.id, error = %e, "malformed SSE event");
                    continue;
                }
            };
            if event.data.trim() == "[DONE]" {
                break;
            }
            let chunk: serde_json::Value = match serde_json::from_str(&event.data) {
                Ok(v) => v,
                Err(e) => {
                    warn!(target = %self.target.id, error = %e, "non-JSON SSE chunk");
                    continue;
                }
            };

            if let Ok(fragment) = extract_response(&chunk, &self.target.response_template) {
                content.push_str(&fragment);
            }
            if tokens.is_none() {
                tokens = extract_tokens(&chunk, &self.target.response_template);
            }
            if error.is_none() {
                error = extract_error(&chunk, &self.target.response_template);
            }
        }

        if content.is_empty() && error.is_none() {
            return Err(KrawallError::ResponseShape {
                path: SSE_STREAM_PATH.to_string(),
            });
        }

        let latency_ms = started.elapsed().as_millis() as u64;
        Ok(SendOutcome {
            content,
            tokens,
            error,
            meta,
            latency_ms,
        })
    }

    fn supports_streaming(&self) -> bool {
        true
    }

    async fn health_check(&self) -> KrawallResult<HealthCheck> {
        if !self.is_connected().await {
            return Err(KrawallError::NotConnected);
        }
        let started = Instant::now();
        let url = self.request_url()?;
        match self.client.head(url).send().await {
            Ok(resp) if resp.status().is_success() || resp.status().as_u16() == 405 => {
                Ok(HealthCheck::ok(started.elapsed().as_millis() as u64))
            }
            Ok(resp) => Ok(HealthCheck::unhealthy(
                started.elapsed().as_millis() as u64,
                format!("status {}", resp.status()),
            )),
            Err(e) => Ok(HealthCheck::unhealthy(
                started.elapsed().as_millis() as u64,
                e.to_string(),
            )),
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
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate as MockResponseTemplate};

    fn target(endpoint_url: String) -> Target {
        Target {
            id: TargetId::from("sse1"),
            name: "sse target".into(),
            kind: ConnectorKind::Sse,
            endpoint_url,
            auth_kind: AuthKind::None,
            auth_config: AuthConfig::default(),
            request_template: RequestTemplate {
                message_path: "prompt".into(),
                structure: serde_json::json!({"prompt": ""}),
                variables: HashMap::new(),
            },
            response_template: ResponseTemplate {
                response_path: "delta".into(),
                token_usage_path: None,
                error_path: None,
                transform: ResponseTransform::None,
            },
            protocol_config: serde_json::Value::Null,
            active: true,
            last_test_at: None,
            last_test_outcome: None,
        }
    }

    #[tokio::test]
    async fn aggregates_data_chunks_in_order() {
        let server = MockServer::start().await;
        let body = "data: {\"delta\": \"hel\"}\n\ndata: {\"delta\": \"lo\"}\n\ndata: [DONE]\n\n";
        Mock::given(method("POST"))
            .and(path("/"))
            .respond_with(
                MockResponseTemplate::new(200)
                    .set_body_raw(body, "text/event-stream"),
            )
            .mount(&server)
            .await;

        let connector = SseConnector::new(target(server.uri())).unwrap();
        connector.connect().await.unwrap();
        let outcome = connector.send("hi", SendMeta::default()).await.unwrap();
        assert_eq!(outcome.content, "hello");
    }

    #[tokio::test]
    async fn empty_stream_raises_response_shape_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/"))
            .respond_with(MockResponseTemplate::new(200).set_body_raw("", "text/event-stream"))
            .mount(&server)
            .await;

        let connector = SseConnector::new(target(server.uri())).unwrap();
        connector.connect().await.unwrap();
        let err = connector.send("hi", SendMeta::default()).await.unwrap_err();
        match err {
            KrawallError::ResponseShape { path } => assert_eq!(path, SSE_STREAM_PATH),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
