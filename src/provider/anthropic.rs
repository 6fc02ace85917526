// ABOUTME: Anthropic-shaped provider adapter — Messages API with typed SSE events.
// ABOUTME: Maps internal history to the vendor request and its stream to AdapterEvents.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{Value, json};

use crate::credentials::CredentialResolver;
use crate::error::EngineError;
use crate::message::{ContentBlock, Message, Role};
use crate::provider::sse::{SseFrame, SseFrameBuffer};
use crate::provider::{
    AdapterEvent, AdapterStream, StopReason, TurnRequest, VendorClient, redact_secret,
};
use crate::usage::UsageSnapshot;

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";
const API_KEY_VAR: &str = "ANTHROPIC_API_KEY";

/// Client for the Anthropic Messages API.
pub struct AnthropicClient {
    http: reqwest::Client,
    base_url: String,
    credentials: Arc<dyn CredentialResolver>,
    connect_timeout: Duration,
}

impl AnthropicClient {
    pub fn new(credentials: Arc<dyn CredentialResolver>) -> Self {
        let connect_timeout = Duration::from_secs(30);
        Self {
            http: build_http(connect_timeout),
            base_url: DEFAULT_BASE_URL.to_string(),
            credentials,
            connect_timeout,
        }
    }

    pub fn with_base_url(mut self, url: &str) -> Self {
        self.base_url = url.trim_end_matches('/').to_string();
        self
    }

    pub fn with_connect_timeout(mut self, seconds: u64) -> Self {
        self.connect_timeout = Duration::from_secs(seconds);
        self.http = build_http(self.connect_timeout);
        self
    }

    fn api_key(&self) -> Result<String, EngineError> {
        self.credentials
            .resolve(API_KEY_VAR)
            .ok_or_else(|| EngineError::Auth(format!("no credential found for {}", API_KEY_VAR)))
    }
}

#[async_trait]
impl VendorClient for AnthropicClient {
    fn check_credentials(&self) -> Result<(), EngineError> {
        self.api_key().map(|_| ())
    }

    async fn stream_turn(&self, request: &TurnRequest) -> Result<AdapterStream, EngineError> {
        // Credential check happens before any network I/O.
        let api_key = self.api_key()?;
        let body = build_request(request);

        let response = self
            .http
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &api_key)
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| EngineError::Vendor(redact_secret(&e.to_string(), Some(&api_key))))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            let message = format!("vendor returned {}: {}", status, detail);
            return Err(EngineError::Vendor(redact_secret(&message, Some(&api_key))));
        }

        let mut frames = SseFrameBuffer::new();
        let stream = response
            .bytes_stream()
            .map(move |chunk| -> Vec<Result<AdapterEvent, EngineError>> {
                match chunk {
                    Ok(bytes) => frames
                        .push(&bytes)
                        .iter()
                        .flat_map(|frame| match parse_frame(frame) {
                            Ok(events) => events.into_iter().map(Ok).collect::<Vec<_>>(),
                            Err(e) => vec![Err(e)],
                        })
                        .collect(),
                    Err(e) => vec![Err(EngineError::Vendor(e.to_string()))],
                }
            })
            .flat_map(futures::stream::iter);

        Ok(Box::pin(stream))
    }

    fn redact(&self, message: &str) -> String {
        redact_secret(message, self.api_key().ok().as_deref())
    }
}

/// Only the connect phase is bounded; the stream itself is long-lived and the
/// tool-loop iteration cap is the liveness guarantee.
fn build_http(connect_timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .connect_timeout(connect_timeout)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

/// Build the vendor request body from internal history. Thinking blocks are
/// internal-only and never sent back; tool-role turns collapse into `user`
/// messages carrying `tool_result` content, per the vendor's two-role shape.
pub(crate) fn build_request(request: &TurnRequest) -> Value {
    let last_user = request.messages.iter().rposition(|m| m.role == Role::User);
    let mut messages: Vec<Value> = Vec::new();

    for (at, message) in request.messages.iter().enumerate() {
        let (role, content) = match message.role {
            Role::User => {
                let attachments = if Some(at) == last_user {
                    request.attachments.as_slice()
                } else {
                    &[]
                };
                ("user", user_content(message, attachments))
            }
            Role::Assistant => ("assistant", assistant_content(message)),
            Role::Tool => ("user", tool_result_content(message)),
        };
        if content.is_empty() {
            continue;
        }
        messages.push(json!({ "role": role, "content": content }));
    }

    let mut body = json!({
        "model": request.model,
        "max_tokens": request.max_tokens,
        "system": request.system_prompt,
        "messages": messages,
        "stream": true,
    });

    if !request.tools.is_empty() {
        let tools: Vec<Value> = request
            .tools
            .iter()
            .map(|tool| {
                json!({
                    "name": tool.name,
                    "description": tool.description,
                    "input_schema": tool.input_schema,
                })
            })
            .collect();
        body["tools"] = Value::Array(tools);
    }

    body
}

fn user_content(message: &Message, attachments: &[crate::message::Attachment]) -> Vec<Value> {
    let mut parts: Vec<Value> = message
        .content
        .iter()
        .filter_map(|block| match block {
            ContentBlock::Text { text } => Some(json!({ "type": "text", "text": text })),
            _ => None,
        })
        .collect();

    // Attachments ride on the final user turn as inline base64 parts.
    for attachment in attachments {
        parts.push(json!({
            "type": "image",
            "source": {
                "type": "base64",
                "media_type": attachment.media_type,
                "data": attachment.data,
            },
        }));
    }

    parts
}

fn assistant_content(message: &Message) -> Vec<Value> {
    message
        .content
        .iter()
        .filter_map(|block| match block {
            ContentBlock::Text { text } => Some(json!({ "type": "text", "text": text })),
            ContentBlock::ToolUse { id, name, input } => Some(json!({
                "type": "tool_use",
                "id": id,
                "name": name,
                "input": input,
            })),
            _ => None,
        })
        .collect()
}

fn tool_result_content(message: &Message) -> Vec<Value> {
    message
        .content
        .iter()
        .filter_map(|block| match block {
            ContentBlock::ToolResult {
                tool_use_id,
                content,
                is_error,
            } => Some(json!({
                "type": "tool_result",
                "tool_use_id": tool_use_id,
                "content": content,
                "is_error": is_error,
            })),
            _ => None,
        })
        .collect()
}

/// Parse one typed SSE frame into normalized adapter events. Unparseable
/// frames are dropped silently; only an explicit vendor `error` frame is
/// fatal to the round trip.
pub(crate) fn parse_frame(frame: &SseFrame) -> Result<Vec<AdapterEvent>, EngineError> {
    let event_type = frame.event.as_deref().unwrap_or_default();

    let data: Value = match serde_json::from_str(&frame.data) {
        Ok(value) => value,
        Err(e) => {
            tracing::trace!(event = event_type, error = %e, "dropping unparseable frame");
            return Ok(Vec::new());
        }
    };

    let events = match event_type {
        "message_start" => {
            let input = data["message"]["usage"]["input_tokens"]
                .as_u64()
                .unwrap_or(0);
            if input > 0 {
                vec![AdapterEvent::Usage(UsageSnapshot {
                    input_tokens: input,
                    output_tokens: 0,
                })]
            } else {
                Vec::new()
            }
        }
        "content_block_start" => {
            let index = data["index"].as_u64().unwrap_or(0) as usize;
            let block = &data["content_block"];
            if block["type"] == "tool_use" {
                vec![AdapterEvent::ToolCallStart {
                    index,
                    id: block["id"].as_str().map(str::to_string),
                    name: block["name"].as_str().unwrap_or_default().to_string(),
                }]
            } else {
                Vec::new()
            }
        }
        "content_block_delta" => {
            let index = data["index"].as_u64().unwrap_or(0) as usize;
            let delta = &data["delta"];
            match delta["type"].as_str() {
                Some("text_delta") => delta["text"]
                    .as_str()
                    .map(|text| vec![AdapterEvent::TextDelta(text.to_string())])
                    .unwrap_or_default(),
                Some("thinking_delta") => delta["thinking"]
                    .as_str()
                    .map(|text| vec![AdapterEvent::ThinkingDelta(text.to_string())])
                    .unwrap_or_default(),
                Some("input_json_delta") => delta["partial_json"]
                    .as_str()
                    .map(|fragment| {
                        vec![AdapterEvent::ToolCallArgs {
                            index,
                            fragment: fragment.to_string(),
                        }]
                    })
                    .unwrap_or_default(),
                _ => Vec::new(),
            }
        }
        "message_delta" => {
            let mut events = Vec::new();
            let output = data["usage"]["output_tokens"].as_u64().unwrap_or(0);
            if output > 0 {
                events.push(AdapterEvent::Usage(UsageSnapshot {
                    input_tokens: 0,
                    output_tokens: output,
                }));
            }
            if let Some(reason) = data["delta"]["stop_reason"].as_str() {
                events.push(AdapterEvent::Stop(map_stop_reason(reason)));
            }
            events
        }
        "error" => {
            let message = data["error"]["message"]
                .as_str()
                .unwrap_or("unknown vendor error")
                .to_string();
            return Err(EngineError::Vendor(message));
        }
        // ping, content_block_stop, message_stop carry nothing we need.
        _ => Vec::new(),
    };

    Ok(events)
}

fn map_stop_reason(reason: &str) -> StopReason {
    match reason {
        "tool_use" => StopReason::ToolUse,
        "max_tokens" => StopReason::MaxTokens,
        _ => StopReason::EndTurn,
    }
}
