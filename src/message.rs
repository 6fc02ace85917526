// ABOUTME: Internal conversation data model — roles, content blocks, messages.
// ABOUTME: The one representation every vendor wire format is normalized into.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Who produced a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    Tool,
}

/// A tagged unit of message content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    Thinking {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
        is_error: bool,
    },
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn tool_result(tool_use_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self::ToolResult {
            tool_use_id: tool_use_id.into(),
            content: content.into(),
            is_error: false,
        }
    }

    pub fn tool_error(tool_use_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self::ToolResult {
            tool_use_id: tool_use_id.into(),
            content: content.into(),
            is_error: true,
        }
    }
}

/// One conversation turn: a role plus an ordered list of content blocks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: Vec<ContentBlock>,
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: vec![ContentBlock::text(text)],
        }
    }

    pub fn assistant(content: Vec<ContentBlock>) -> Self {
        Self {
            role: Role::Assistant,
            content,
        }
    }

    /// Build the tool-role message that answers an assistant turn's tool calls.
    pub fn tool_results(results: Vec<ContentBlock>) -> Self {
        Self {
            role: Role::Tool,
            content: results,
        }
    }

    /// Concatenated text of all `Text` blocks in this message.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }
}

/// Declaration of a tool the model may call: name, description, JSON schema
/// for its arguments. Internal-only fields never reach a vendor request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// An inline file/binary input attached to the user turn, passed through to
/// the vendor request keyed by declared media type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    pub media_type: String,
    /// Base64-encoded payload.
    pub data: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_block_serde_is_tagged_snake_case() {
        let block = ContentBlock::ToolUse {
            id: "call-1".to_string(),
            name: "read_file".to_string(),
            input: serde_json::json!({"path": "/x"}),
        };
        let json = serde_json::to_value(&block).unwrap();
        assert_eq!(json["type"], "tool_use");
        assert_eq!(json["name"], "read_file");

        let back: ContentBlock = serde_json::from_value(json).unwrap();
        assert_eq!(back, block);
    }

    #[test]
    fn tool_result_blocks_carry_error_flag() {
        let ok = ContentBlock::tool_result("id-1", "fine");
        let err = ContentBlock::tool_error("id-2", "broke");
        match (ok, err) {
            (
                ContentBlock::ToolResult { is_error: a, .. },
                ContentBlock::ToolResult { is_error: b, .. },
            ) => {
                assert!(!a);
                assert!(b);
            }
            _ => panic!("expected ToolResult blocks"),
        }
    }

    #[test]
    fn message_text_joins_only_text_blocks() {
        let msg = Message {
            role: Role::Assistant,
            content: vec![
                ContentBlock::text("Hello, "),
                ContentBlock::ToolUse {
                    id: "c1".to_string(),
                    name: "bash".to_string(),
                    input: serde_json::json!({}),
                },
                ContentBlock::text("world"),
            ],
        };
        assert_eq!(msg.text(), "Hello, world");
    }

    #[test]
    fn message_roundtrips_through_json() {
        let msg = Message::tool_results(vec![ContentBlock::tool_result("c1", "out")]);
        let json = serde_json::to_string(&msg).unwrap();
        let back: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(back, msg);
        assert_eq!(back.role, Role::Tool);
    }
}
