// ABOUTME: OpenAI-shaped provider adapter — Chat Completions with `data:` framing.
// ABOUTME: Handles [DONE] termination, indexed tool-call fragments, and final usage.

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

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const API_KEY_VAR: &str = "OPENAI_API_KEY";

/// Client for OpenAI-compatible Chat Completions endpoints.
pub struct OpenAiClient {
    http: reqwest::Client,
    base_url: String,
    credentials: Arc<dyn CredentialResolver>,
    connect_timeout: Duration,
}

impl OpenAiClient {
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

fn build_http(connect_timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .connect_timeout(connect_timeout)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

#[async_trait]
impl VendorClient for OpenAiClient {
    fn check_credentials(&self) -> Result<(), EngineError> {
        self.api_key().map(|_| ())
    }

    async fn stream_turn(&self, request: &TurnRequest) -> Result<AdapterStream, EngineError> {
        let api_key = self.api_key()?;
        let body = build_request(request);

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&api_key)
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
                        .flat_map(|frame| parse_frame(frame).into_iter().map(Ok))
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

/// Build the vendor request body. Internal tool-role turns expand to one
/// vendor `tool` message per result, keyed by the originating call id.
pub(crate) fn build_request(request: &TurnRequest) -> Value {
    let last_user = request.messages.iter().rposition(|m| m.role == Role::User);
    let mut messages: Vec<Value> = vec![json!({
        "role": "system",
        "content": request.system_prompt,
    })];

    for (at, message) in request.messages.iter().enumerate() {
        match message.role {
            Role::User => {
                let attachments = if Some(at) == last_user {
                    request.attachments.as_slice()
                } else {
                    &[]
                };
                messages.push(user_message(message, attachments));
            }
            Role::Assistant => messages.push(assistant_message(message)),
            Role::Tool => {
                for block in &message.content {
                    if let ContentBlock::ToolResult {
                        tool_use_id,
                        content,
                        ..
                    } = block
                    {
                        messages.push(json!({
                            "role": "tool",
                            "tool_call_id": tool_use_id,
                            "content": content,
                        }));
                    }
                }
            }
        }
    }

    let mut body = json!({
        "model": request.model,
        "max_tokens": request.max_tokens,
        "messages": messages,
        "stream": true,
        "stream_options": { "include_usage": true },
    });

    if !request.tools.is_empty() {
        let tools: Vec<Value> = request
            .tools
            .iter()
            .map(|tool| {
                json!({
                    "type": "function",
                    "function": {
                        "name": tool.name,
                        "description": tool.description,
                        "parameters": tool.input_schema,
                    },
                })
            })
            .collect();
        body["tools"] = Value::Array(tools);
    }

    body
}

fn user_message(message: &Message, attachments: &[crate::message::Attachment]) -> Value {
    if attachments.is_empty() {
        return json!({ "role": "user", "content": message.text() });
    }

    let mut parts = vec![json!({ "type": "text", "text": message.text() })];
    for attachment in attachments {
        parts.push(json!({
            "type": "image_url",
            "image_url": {
                "url": format!("data:{};base64,{}", attachment.media_type, attachment.data),
            },
        }));
    }
    json!({ "role": "user", "content": parts })
}

fn assistant_message(message: &Message) -> Value {
    let tool_calls: Vec<Value> = message
        .content
        .iter()
        .filter_map(|block| match block {
            ContentBlock::ToolUse { id, name, input } => Some(json!({
                "id": id,
                "type": "function",
                "function": {
                    "name": name,
                    "arguments": input.to_string(),
                },
            })),
            _ => None,
        })
        .collect();

    let mut wire = json!({ "role": "assistant", "content": message.text() });
    if !tool_calls.is_empty() {
        wire["tool_calls"] = Value::Array(tool_calls);
    }
    wire
}

/// Parse one `data:` frame. This vendor sends untyped frames terminated by a
/// literal `[DONE]`; unparseable payloads are dropped silently.
pub(crate) fn parse_frame(frame: &SseFrame) -> Vec<AdapterEvent> {
    if frame.data.trim() == "[DONE]" {
        return Vec::new();
    }

    let data: Value = match serde_json::from_str(&frame.data) {
        Ok(value) => value,
        Err(e) => {
            tracing::trace!(error = %e, "dropping unparseable frame");
            return Vec::new();
        }
    };

    let mut events = Vec::new();

    if let Some(choice) = data["choices"].get(0) {
        let delta = &choice["delta"];

        if let Some(text) = delta["content"].as_str() {
            if !text.is_empty() {
                events.push(AdapterEvent::TextDelta(text.to_string()));
            }
        }

        if let Some(calls) = delta["tool_calls"].as_array() {
            for call in calls {
                let index = call["index"].as_u64().unwrap_or(0) as usize;
                if let Some(name) = call["function"]["name"].as_str() {
                    events.push(AdapterEvent::ToolCallStart {
                        index,
                        id: call["id"].as_str().map(str::to_string),
                        name: name.to_string(),
                    });
                }
                if let Some(fragment) = call["function"]["arguments"].as_str() {
                    if !fragment.is_empty() {
                        events.push(AdapterEvent::ToolCallArgs {
                            index,
                            fragment: fragment.to_string(),
                        });
                    }
                }
            }
        }

        if let Some(reason) = choice["finish_reason"].as_str() {
            events.push(AdapterEvent::Stop(map_finish_reason(reason)));
        }
    }

    // Usage arrives on a final chunk with an empty choices array.
    if let Some(usage) = data.get("usage").filter(|u| !u.is_null()) {
        let input = usage["prompt_tokens"].as_u64().unwrap_or(0);
        let output = usage["completion_tokens"].as_u64().unwrap_or(0);
        if input > 0 || output > 0 {
            events.push(AdapterEvent::Usage(UsageSnapshot {
                input_tokens: input,
                output_tokens: output,
            }));
        }
    }

    events
}

fn map_finish_reason(reason: &str) -> StopReason {
    match reason {
        "tool_calls" => StopReason::ToolUse,
        "length" => StopReason::MaxTokens,
        _ => StopReason::EndTurn,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::StaticCredentials;
    use crate::message::ToolSchema;

    fn turn_request(messages: Vec<Message>) -> TurnRequest {
        TurnRequest {
            model: "gpt-4o".to_string(),
            system_prompt: "be helpful".to_string(),
            max_tokens: 1024,
            messages,
            tools: Vec::new(),
            attachments: Vec::new(),
        }
    }

    fn data_frame(data: &str) -> SseFrame {
        SseFrame {
            event: None,
            data: data.to_string(),
        }
    }

    #[tokio::test]
    async fn missing_credential_fails_before_network_io() {
        let client =
            OpenAiClient::new(Arc::new(StaticCredentials::new())).with_base_url("http://127.0.0.1:1");
        let err = client
            .stream_turn(&turn_request(vec![Message::user("hi")]))
            .await
            .err()
            .expect("should fail without a key");
        assert!(matches!(err, EngineError::Auth(_)));
    }

    #[test]
    fn request_starts_with_system_message() {
        let body = build_request(&turn_request(vec![Message::user("hi")]));
        let wire = body["messages"].as_array().unwrap();
        assert_eq!(wire[0]["role"], "system");
        assert_eq!(wire[0]["content"], "be helpful");
        assert_eq!(wire[1]["role"], "user");
        assert_eq!(body["stream_options"]["include_usage"], true);
    }

    #[test]
    fn tool_results_expand_to_tool_messages() {
        let messages = vec![
            Message::user("run it"),
            Message::assistant(vec![
                ContentBlock::ToolUse {
                    id: "call_a".to_string(),
                    name: "bash".to_string(),
                    input: json!({"command": "ls"}),
                },
                ContentBlock::ToolUse {
                    id: "call_b".to_string(),
                    name: "read_file".to_string(),
                    input: json!({"path": "/x"}),
                },
            ]),
            Message::tool_results(vec![
                ContentBlock::tool_result("call_a", "out-a"),
                ContentBlock::tool_result("call_b", "out-b"),
            ]),
        ];
        let body = build_request(&turn_request(messages));
        let wire = body["messages"].as_array().unwrap();

        // system + user + assistant + two tool messages.
        assert_eq!(wire.len(), 5);
        assert_eq!(wire[2]["tool_calls"][0]["function"]["name"], "bash");
        assert_eq!(wire[3]["role"], "tool");
        assert_eq!(wire[3]["tool_call_id"], "call_a");
        assert_eq!(wire[4]["tool_call_id"], "call_b");
    }

    #[test]
    fn tool_schemas_map_to_function_declarations() {
        let mut request = turn_request(vec![Message::user("hi")]);
        request.tools = vec![ToolSchema {
            name: "read_file".to_string(),
            description: "Read a file".to_string(),
            input_schema: json!({"type": "object"}),
        }];
        let body = build_request(&request);
        assert_eq!(body["tools"][0]["type"], "function");
        assert_eq!(body["tools"][0]["function"]["name"], "read_file");
        assert_eq!(body["tools"][0]["function"]["parameters"]["type"], "object");
    }

    #[test]
    fn content_delta_parses() {
        let events = parse_frame(&data_frame(
            r#"{"choices":[{"delta":{"content":"hello"}}]}"#,
        ));
        assert_eq!(events, vec![AdapterEvent::TextDelta("hello".to_string())]);
    }

    #[test]
    fn tool_call_fragments_parse_with_index() {
        let first = parse_frame(&data_frame(
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_1","function":{"name":"bash","arguments":""}}]}}]}"#,
        ));
        assert_eq!(
            first,
            vec![AdapterEvent::ToolCallStart {
                index: 0,
                id: Some("call_1".to_string()),
                name: "bash".to_string(),
            }]
        );

        let next = parse_frame(&data_frame(
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"{\"com"}}]}}]}"#,
        ));
        assert_eq!(
            next,
            vec![AdapterEvent::ToolCallArgs {
                index: 0,
                fragment: "{\"com".to_string(),
            }]
        );
    }

    #[test]
    fn finish_reason_maps_to_stop() {
        let events = parse_frame(&data_frame(
            r#"{"choices":[{"delta":{},"finish_reason":"tool_calls"}]}"#,
        ));
        assert_eq!(events, vec![AdapterEvent::Stop(StopReason::ToolUse)]);
    }

    #[test]
    fn final_usage_chunk_parses() {
        let events = parse_frame(&data_frame(
            r#"{"choices":[],"usage":{"prompt_tokens":50,"completion_tokens":9}}"#,
        ));
        assert_eq!(
            events,
            vec![AdapterEvent::Usage(UsageSnapshot {
                input_tokens: 50,
                output_tokens: 9,
            })]
        );
    }

    #[test]
    fn done_marker_and_garbage_parse_to_nothing() {
        assert!(parse_frame(&data_frame("[DONE]")).is_empty());
        assert!(parse_frame(&data_frame("nonsense {{")).is_empty());
    }
}
