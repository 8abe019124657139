//! Runs a single templated send against one ad-hoc target, the way an
//! operator smoke-tests a widget's request/response shape without
//! wiring up the full discovery/scheduling stack.
//!
//! ```bash
//! krawall-send --kind http --url https://api.example.com/chat \
//!     --structure '{"model":"x","messages":[{"role":"user","content":""}]}' \
//!     --message-path messages.0.content \
//!     --response-path choices.0.message.content \
//!     "hello there"
//! ```

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use krawall_core::{
    AuthConfig, AuthKind, ConnectorKind, RequestTemplate, ResponseTemplate, ResponseTransform, SendMeta, Target,
    TargetId,
};
use std::collections::HashMap;
use std::time::Duration;
use tracing::info;

#[derive(Copy, Clone, Debug, ValueEnum)]
enum CliConnectorKind {
    Http,
    Ws,
    Sse,
    Grpc,
    BrowserWs,
}

impl From<CliConnectorKind> for ConnectorKind {
    fn from(kind: CliConnectorKind) -> Self {
        match kind {
            CliConnectorKind::Http => ConnectorKind::Http,
            CliConnectorKind::Ws => ConnectorKind::Ws,
            CliConnectorKind::Sse => ConnectorKind::Sse,
            CliConnectorKind::Grpc => ConnectorKind::Grpc,
            CliConnectorKind::BrowserWs => ConnectorKind::BrowserWs,
        }
    }
}

/// Sends one message through a templated connector target and prints
/// the extracted response.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    /// Connector kind to instantiate.
    #[arg(long, value_enum, default_value = "http")]
    kind: CliConnectorKind,

    /// Target endpoint URL (the page URL when `kind` is `browser-ws`).
    #[arg(long)]
    url: String,

    /// Dot/bracket path where the outgoing message is written into
    /// `structure`, e.g. `messages.0.content`.
    #[arg(long, default_value = "message")]
    message_path: String,

    /// Request body skeleton the message is written into.
    #[arg(long, default_value = "{}")]
    structure: String,

    /// Dot/bracket path the reply content is read from.
    #[arg(long, default_value = "reply")]
    response_path: String,

    /// Optional path to extract normalized token usage from.
    #[arg(long)]
    token_usage_path: Option<String>,

    /// Bearer token, sent when `--auth bearer` is given.
    #[arg(long)]
    bearer_token: Option<String>,

    /// The message text to send.
    message: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    krawall_runtime::logging::try_init_once();

    let cli = Cli::parse();

    let structure: serde_json::Value =
        serde_json::from_str(&cli.structure).context("--structure must be valid JSON")?;

    let (auth_kind, auth_config) = match &cli.bearer_token {
        Some(token) => (AuthKind::Bearer, AuthConfig::default().with("token", token.clone())),
        None => (AuthKind::None, AuthConfig::default()),
    };

    let target = Target {
        id: TargetId::from("cli"),
        name: "krawall-send target".into(),
        kind: cli.kind.into(),
        endpoint_url: cli.url,
        auth_kind,
        auth_config,
        request_template: RequestTemplate { message_path: cli.message_path, structure, variables: HashMap::new() },
        response_template: ResponseTemplate {
            response_path: cli.response_path,
            token_usage_path: cli.token_usage_path,
            error_path: None,
            transform: ResponseTransform::None,
        },
        protocol_config: serde_json::Value::Null,
        active: true,
        last_test_at: None,
        last_test_outcome: None,
    };

    let registry = memory_store::in_memory_registry(Duration::from_secs(300), Duration::from_secs(300));
    let connector = registry.create(target).await.context("failed to instantiate connector")?;

    connector.connect().await.context("connect failed")?;
    info!("connected, sending message");

    let outcome = connector.send(&cli.message, SendMeta::default()).await.context("send failed")?;

    println!("{}", outcome.content);
    if let Some(tokens) = outcome.tokens {
        eprintln!("tokens: {tokens:?}");
    }
    if let Some(error) = outcome.error {
        eprintln!("upstream reported an error field: {error}");
    }
    eprintln!("latency: {}ms", outcome.latency_ms);

    connector.disconnect().await.ok();
    Ok(())
}
