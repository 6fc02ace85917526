// ABOUTME: Wire-visible stream events — the stable protocol sent to clients.
// ABOUTME: One JSON object per event, framed as a `data:` line plus blank line.

use serde::{Deserialize, Serialize};

/// Opening payload of `message_start`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageStartInfo {
    pub id: String,
    pub role: String,
    pub model: String,
}

/// The single running text block opened at index 0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WireBlock {
    Text { text: String },
}

/// Incremental content payloads inside `content_block_delta`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WireDelta {
    TextDelta { text: String },
}

/// Final-message metadata inside `message_delta`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StopInfo {
    pub stop_reason: String,
}

/// Token totals reported at the end of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WireUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Error payload inside the `error` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireError {
    #[serde(rename = "type")]
    pub error_type: String,
    pub message: String,
}

/// Every event a session may emit, in wire order. Exactly one `MessageStart`
/// opens and exactly one `MessageStop` closes a session that began streaming,
/// no matter how many tool-loop iterations ran in between.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    MessageStart {
        message: MessageStartInfo,
    },
    ContentBlockStart {
        index: usize,
        content_block: WireBlock,
    },
    ContentBlockDelta {
        index: usize,
        delta: WireDelta,
    },
    ContentBlockStop {
        index: usize,
    },
    ToolResult {
        #[serde(rename = "toolCallId")]
        tool_call_id: String,
        #[serde(rename = "toolName")]
        tool_name: String,
        #[serde(rename = "filePath", skip_serializing_if = "Option::is_none")]
        file_path: Option<String>,
        #[serde(rename = "editLineHint", skip_serializing_if = "Option::is_none")]
        edit_line_hint: Option<u64>,
        result: String,
        #[serde(rename = "isError")]
        is_error: bool,
    },
    CompactionInfo {
        original_count: usize,
        compacted_count: usize,
        tokens_removed: u64,
        summary: String,
    },
    MessageDelta {
        delta: StopInfo,
        usage: WireUsage,
    },
    MessageStop,
    Error {
        error: WireError,
    },
}

impl StreamEvent {
    /// Serialize this event as one server-push frame: a `data:` prefixed JSON
    /// line terminated by a blank line.
    pub fn to_wire_frame(&self) -> String {
        // StreamEvent serialization cannot fail: no maps with non-string keys,
        // no non-finite floats.
        let json = serde_json::to_string(self).unwrap_or_default();
        format!("data: {}\n\n", json)
    }
}
