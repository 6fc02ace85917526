// ABOUTME: Provider adapters — vendor wire formats normalized behind one trait.
// ABOUTME: A closed set of vendors; a factory creates the right client from config.

pub mod anthropic;
pub mod openai;
pub mod sse;

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::Stream;

use crate::config::LlmConfig;
use crate::credentials::CredentialResolver;
use crate::error::EngineError;
use crate::message::{Attachment, Message, ToolSchema};
use crate::usage::UsageSnapshot;

pub use anthropic::AnthropicClient;
pub use openai::OpenAiClient;

/// Why the vendor stopped producing output for one round trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    EndTurn,
    ToolUse,
    MaxTokens,
}

impl StopReason {
    /// Wire string carried in the closing `message_delta`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EndTurn => "end_turn",
            Self::ToolUse => "tool_use",
            Self::MaxTokens => "max_tokens",
        }
    }
}

/// Vendor stream output, normalized. Tool-call fragments arrive keyed by the
/// vendor's block index; the session controller assembles them into calls.
#[derive(Debug, Clone, PartialEq)]
pub enum AdapterEvent {
    TextDelta(String),
    ThinkingDelta(String),
    /// A tool invocation opened. `id` is `None` for vendors that do not
    /// supply call ids; the controller generates a correlation id then.
    ToolCallStart {
        index: usize,
        id: Option<String>,
        name: String,
    },
    /// A fragment of the call's JSON arguments.
    ToolCallArgs {
        index: usize,
        fragment: String,
    },
    Usage(UsageSnapshot),
    Stop(StopReason),
}

/// Everything a vendor needs for one round trip.
#[derive(Debug, Clone)]
pub struct TurnRequest {
    pub model: String,
    pub system_prompt: String,
    pub max_tokens: u32,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolSchema>,
    pub attachments: Vec<Attachment>,
}

/// A stream of normalized adapter events for one vendor round trip.
pub type AdapterStream = Pin<Box<dyn Stream<Item = Result<AdapterEvent, EngineError>> + Send>>;

/// One vendor behind a uniform interface. Implementations are stateless
/// translators: build the vendor request, parse its stream chunk grammar.
#[async_trait]
pub trait VendorClient: Send + Sync {
    /// Verify a credential is resolvable without performing any network I/O.
    /// Sessions call this before opening their event stream.
    fn check_credentials(&self) -> Result<(), EngineError>;

    /// Open one streaming round trip. Fails fast with `EngineError::Auth`
    /// before any network I/O when no credential is resolvable.
    async fn stream_turn(&self, request: &TurnRequest) -> Result<AdapterStream, EngineError>;

    /// Strip this client's secret from an error message before it reaches
    /// the wire.
    fn redact(&self, message: &str) -> String;
}

/// Create a vendor client based on the provider name in config.
pub fn create_client(
    config: &LlmConfig,
    credentials: Arc<dyn CredentialResolver>,
) -> anyhow::Result<Arc<dyn VendorClient>> {
    match config.provider.as_str() {
        "anthropic" => {
            let mut client = AnthropicClient::new(credentials);
            if let Some(url) = config
                .anthropic
                .base_url
                .as_deref()
                .filter(|s| !s.is_empty())
            {
                client = client.with_base_url(url);
            }
            Ok(Arc::new(client.with_connect_timeout(config.connect_timeout_seconds)))
        }
        "openai" => {
            let mut client = OpenAiClient::new(credentials);
            if let Some(url) = config.openai.base_url.as_deref().filter(|s| !s.is_empty()) {
                client = client.with_base_url(url);
            }
            Ok(Arc::new(client.with_connect_timeout(config.connect_timeout_seconds)))
        }
        other => anyhow::bail!(
            "Unknown LLM provider: '{}'. Expected: anthropic, openai",
            other
        ),
    }
}

/// Replace every occurrence of `secret` in `message` so vendor errors never
/// leak a credential onto the wire.
pub(crate) fn redact_secret(message: &str, secret: Option<&str>) -> String {
    match secret {
        Some(secret) if !secret.is_empty() => message.replace(secret, "[redacted]"),
        _ => message.to_string(),
    }
}
