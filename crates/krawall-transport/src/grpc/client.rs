//! Dynamic gRPC connector (spec.md §4.8, component C8).
//!
//! The service/method invoked is resolved at connect time from a compiled
//! `FileDescriptorSet` named in `protocolConfig`, not from a generated
//! client — there is no `.proto` known at compile time because the target
//! under test is configured, not coded, against.

use std::time::Instant;

use async_trait::async_trait;
use krawall_core::{
    build_request, extract_error, extract_response, extract_tokens, Connector, HealthCheck,
    KrawallError, KrawallResult, SendMeta, SendOutcome, Target,
};
use prost_reflect::{DescriptorPool, DynamicMessage, MethodDescriptor};
use tokio::sync::OnceCell;
use tonic::codec::{Codec, DecodeBuf, Decoder, EncodeBuf, Encoder};
use tonic::transport::Channel;
use tonic::Status;

#[derive(Debug, Clone, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct GrpcProtocolConfig {
    descriptor_set_path: String,
    service: String,
    method: String,
}

struct Resolved {
    channel: Channel,
    method_desc: MethodDescriptor,
}

/// gRPC connector implementation (spec.md §4.8).
pub struct GrpcConnector {
    target: Target,
    protocol_config: GrpcProtocolConfig,
    resolved: OnceCell<Resolved>,
}

impl GrpcConnector {
    pub fn new(target: Target) -> KrawallResult<Self> {
        let protocol_config: GrpcProtocolConfig = serde_json::from_value(target.protocol_config.clone())
            .map_err(|e| KrawallError::config(format!("invalid protocolConfig: {e}")))?;
        Ok(Self {
            target,
            protocol_config,
            resolved: OnceCell::new(),
        })
    }

    async fn resolve(&self) -> KrawallResult<&Resolved> {
        self.resolved
            .get_or_try_init(|| async {
                let bytes = tokio::fs::read(&self.protocol_config.descriptor_set_path)
                    .await
                    .map_err(|e| {
                        KrawallError::config(format!("failed to read descriptor set: {e}"))
                    })?;
                let pool = DescriptorPool::decode(bytes.as_slice())
                    .map_err(|e| KrawallError::config(format!("invalid descriptor set: {e}")))?;
                let service_desc = pool
                    .get_service_by_name(&self.protocol_config.service)
                    .ok_or_else(|| {
                        KrawallError::config(format!(
                            "unknown gRPC service '{}'",
                            self.protocol_config.service
                        ))
                    })?;
                let method_desc = service_desc
                    .methods()
                    .find(|m| m.name() == self.protocol_config.method)
                    .ok_or_else(|| {
                        KrawallError::config(format!(
                            "unknown gRPC method '{}'",
                            self.protocol_config.method
                        ))
                    })?;

                let channel = Channel::from_shared(self.target.endpoint_url.clone())
                    .map_err(|e| KrawallError::config(format!("invalid endpointUrl: {e}")))?
                    .connect()
                    .await
                    .map_err(|e| KrawallError::transport(e.to_string()))?;

                Ok(Resolved {
                    channel,
                    method_desc,
                })
            })
            .await
    }
}

#[derive(Clone)]
struct DynamicCodec {
    output_desc: prost_reflect::MessageDescriptor,
}

impl Codec for DynamicCodec {
    type Encode = DynamicMessage;
    type Decode = DynamicMessage;
    type Encoder = DynamicEncoder;
    type Decoder = DynamicDecoder;

    fn encoder(&mut self) -> Self::Encoder {
        DynamicEncoder
    }

    fn decoder(&mut self) -> Self::Decoder {
        DynamicDecoder {
            output_desc: self.output_desc.clone(),
        }
    }
}

struct DynamicEncoder;

impl Encoder for DynamicEncoder {
    type Item = DynamicMessage;
    type Error = Status;

    fn encode(&mut self, item: Self::Item, buf: &mut EncodeBuf<'_>) -> Result<(), Self::Error> {
        item.encode(buf)
            .map_err(|e| Status::internal(format!("failed to encode gRPC request: {e}")))
    }
}

struct DynamicDecoder {
    output_desc: prost_reflect::MessageDescriptor,
}

impl Decoder for DynamicDecoder {
    type Item = DynamicMessage;
    type Error = Status;

    fn decode(&mut self, buf: &mut DecodeBuf<'_>) -> Result<Option<Self::Item>, Self::Error> {
        let mut message = DynamicMessage::new(self.output_desc.clone());
        message
            .merge(buf)
            .map_err(|e| Status::internal(format!("failed to decode gRPC response: {e}")))?;
        Ok(Some(message))
    }
}

#[async_trait]
impl Connector for GrpcConnector {
    async fn connect(&self) -> KrawallResult<()> {
        self.resolve().await?;
        Ok(())
    }

    async fn disconnect(&self) -> KrawallResult<()> {
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.resolved.initialized()
    }

    async fn send(&self, msg: &str, meta: SendMeta) -> KrawallResult<SendOutcome> {
        if !self.is_connected().await {
            return Err(KrawallError::NotConnected);
        }
        let resolved = self.resolve().await?;

        let mut template = self.target.request_template.clone();
        template.variables.extend(meta.variables.clone());
        let body = build_request(msg, &template);

        let input_desc = resolved.method_desc.input();
        let mut deserializer = serde_json::Deserializer::from_str(&body.to_string());
        let request_message = DynamicMessage::deserialize(input_desc, &mut deserializer)
            .map_err(|e| KrawallError::protocol(format!("failed to build gRPC request: {e}")))?;

        let codec = DynamicCodec {
            output_desc: resolved.method_desc.output(),
        };
        let path = tonic::codegen::http::uri::PathAndQuery::try_from(format!(
            "/{}/{}",
            resolved.method_desc.parent_service().full_name(),
            resolved.method_desc.name()
        ))
        .map_err(|e| KrawallError::config(format!("invalid gRPC method path: {e}")))?;

        let mut grpc = tonic::client::Grpc::new(resolved.channel.clone());
        grpc.ready()
            .await
            .map_err(|e| KrawallError::transport(e.to_string()))?;

        let started = Instant::now();
        let response = grpc
            .unary(tonic::Request::new(request_message), path, codec)
            .await
            .map_err(|status| KrawallError::transport(status.to_string()))?;
        let latency_ms = started.elapsed().as_millis() as u64;

        let raw: serde_json::Value = serde_json::to_value(response.into_inner())
            .map_err(|e| KrawallError::protocol(format!("failed to serialize gRPC response: {e}")))?;

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
        let resolved = self.resolve().await?;
        let started = Instant::now();
        let mut grpc = tonic::client::Grpc::new(resolved.channel.clone());
        match grpc.ready().await {
            Ok(()) => Ok(HealthCheck::ok(started.elapsed().as_millis() as u64)),
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

    fn base_target() -> Target {
        Target {
            id: TargetId::from("grpc1"),
            name: "grpc target".into(),
            kind: ConnectorKind::Grpc,
            endpoint_url: "http://127.0.0.1:50051".into(),
            auth_kind: AuthKind::None,
            auth_config: AuthConfig::default(),
            request_template: RequestTemplate {
                message_path: "message".into(),
                structure: serde_json::json!({"message": ""}),
                variables: HashMap::new(),
            },
            response_template: ResponseTemplate {
                response_path: "reply".into(),
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

    #[test]
    fn missing_protocol_config_fields_raise_config_error() {
        let mut target = base_target();
        target.protocol_config = serde_json::json!({"service": "chat.Chat"});
        let err = GrpcConnector::new(target).unwrap_err();
        assert!(matches!(err, KrawallError::Config(_)));
    }

    #[tokio::test]
    async fn not_connected_until_resolve_succeeds() {
        let mut target = base_target();
        target.protocol_config = serde_json::json!({
            "descriptorSetPath": "/nonexistent/descriptor.bin",
            "service": "chat.Chat",
            "method": "Send",
        });
        let connector = GrpcConnector::new(target).unwrap();
        assert!(!connector.is_connected().await);
        assert!(connector.connect().await.is_err());
    }
}
