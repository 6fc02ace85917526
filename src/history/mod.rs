// ABOUTME: History loading and compaction — fits stored conversations to a model budget.
// ABOUTME: Recent messages survive verbatim; older ones collapse into one summary placeholder.

use std::sync::Arc;

use crate::config::CompactionConfig;
use crate::message::{ContentBlock, Message, Role};
use crate::store::{Conversation, ConversationStore};

/// Marker prefix on the synthesized summary placeholder, so later loads can
/// recognize it.
pub const SUMMARY_PREFIX: &str =
    "Earlier messages in this conversation were summarized to fit the model's context budget:";

/// Fraction of the context window that triggers automatic compaction.
const COMPACTION_THRESHOLD_RATIO: f64 = 0.9;

/// What compaction did to one conversation. Computed once per session,
/// before the first vendor call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompactionReport {
    pub original_count: usize,
    pub compacted_count: usize,
    pub tokens_removed: u64,
    pub summary: String,
}

/// Result of loading a conversation's history for a session.
pub struct LoadedHistory {
    pub conversation: Conversation,
    pub messages: Vec<Message>,
    pub report: Option<CompactionReport>,
}

/// Heuristic token count: bytes / 4.
pub fn approx_token_count(text: &str) -> usize {
    text.len() / 4
}

/// Sum approximate token counts across all content blocks of all messages.
pub fn approx_messages_tokens(messages: &[Message]) -> usize {
    messages.iter().map(approx_message_tokens).sum()
}

fn approx_message_tokens(message: &Message) -> usize {
    message
        .content
        .iter()
        .map(|block| match block {
            ContentBlock::Text { text } | ContentBlock::Thinking { text } => {
                approx_token_count(text)
            }
            ContentBlock::ToolUse { input, .. } => approx_token_count(&input.to_string()),
            ContentBlock::ToolResult { content, .. } => approx_token_count(content),
        })
        .sum()
}

/// Return the known context window size for a given model identifier.
pub fn context_window_for_model(model: &str) -> u64 {
    if model.contains("claude") {
        200_000
    } else if model.contains("gpt-4o") || model.contains("gpt-5") {
        128_000
    } else if model.contains("gemini") {
        1_000_000
    } else {
        128_000
    }
}

/// Calculate the token limit that triggers automatic compaction.
///
/// Default is 90% of context window, capped by an optional override.
pub fn auto_compact_limit(context_window: u64, override_limit: Option<u64>) -> u64 {
    let default_limit = (context_window as f64 * COMPACTION_THRESHOLD_RATIO) as u64;
    match override_limit {
        Some(cap) => default_limit.min(cap),
        None => default_limit,
    }
}

/// Check whether the current conversation exceeds the compaction threshold.
pub fn needs_compaction(messages: &[Message], model: &str, config: &CompactionConfig) -> bool {
    if !config.enabled {
        return false;
    }
    let context_window = context_window_for_model(model);
    let limit = auto_compact_limit(context_window, config.threshold_token_limit);
    approx_messages_tokens(messages) as u64 > limit
}

/// Load a conversation's messages, compacting them when they exceed the
/// model's budget.
pub async fn load(
    store: &Arc<dyn ConversationStore>,
    conversation_id: &str,
    config: &CompactionConfig,
) -> anyhow::Result<LoadedHistory> {
    let conversation = store
        .load(conversation_id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("conversation '{}' not found", conversation_id))?;

    let messages = conversation.messages.clone();
    if !needs_compaction(&messages, &conversation.model, config) {
        return Ok(LoadedHistory {
            conversation,
            messages,
            report: None,
        });
    }

    let (compacted, report) = compact(&messages, config.retained_budget_tokens);
    Ok(LoadedHistory {
        conversation,
        messages: compacted,
        report: Some(report),
    })
}

/// Compact a message list: keep the most recent messages verbatim within the
/// retained-token budget, replace everything older with one summary
/// placeholder message.
///
/// Pairing invariant: the cut never strands a `tool_result` whose `tool_use`
/// was summarized away. Since a `tool_use` is always answered by the next
/// message, keeping a suffix only risks a leading orphaned tool-result turn,
/// which is folded into the summarized region.
pub fn compact(messages: &[Message], retained_budget_tokens: usize) -> (Vec<Message>, CompactionReport) {
    if messages.is_empty() {
        let report = CompactionReport {
            original_count: 0,
            compacted_count: 0,
            tokens_removed: 0,
            summary: String::new(),
        };
        return (Vec::new(), report);
    }

    let mut cut = messages.len();
    let mut remaining_budget = retained_budget_tokens;

    // Walk backward, keeping whole messages within budget. The final message
    // is always kept; it anchors the turn being answered.
    for (at, message) in messages.iter().enumerate().rev() {
        let tokens = approx_message_tokens(message);
        if tokens <= remaining_budget || at == messages.len() - 1 {
            cut = at;
            remaining_budget = remaining_budget.saturating_sub(tokens);
        } else {
            break;
        }
    }

    // Fold leading orphaned tool results into the summarized region.
    while cut < messages.len() - 1 && has_tool_result(&messages[cut]) {
        cut += 1;
    }

    let removed = &messages[..cut];
    let kept = &messages[cut..];

    let summary = summarize_removed(removed);
    let tokens_removed = approx_messages_tokens(removed) as u64;

    let mut compacted = Vec::with_capacity(kept.len() + 1);
    if !removed.is_empty() {
        compacted.push(Message::user(format!("{}\n\n{}", SUMMARY_PREFIX, summary)));
    }
    compacted.extend(kept.iter().cloned());

    let report = CompactionReport {
        original_count: messages.len(),
        compacted_count: compacted.len(),
        tokens_removed,
        summary,
    };
    (compacted, report)
}

fn has_tool_result(message: &Message) -> bool {
    message
        .content
        .iter()
        .any(|block| matches!(block, ContentBlock::ToolResult { .. }))
}

/// Synthesize a textual summary of the removed messages: turn counts, tools
/// used, and the leading user requests.
fn summarize_removed(removed: &[Message]) -> String {
    if removed.is_empty() {
        return String::new();
    }

    let user_turns = removed.iter().filter(|m| m.role == Role::User).count();
    let assistant_turns = removed.iter().filter(|m| m.role == Role::Assistant).count();

    let mut tool_names: Vec<String> = Vec::new();
    for message in removed {
        for block in &message.content {
            if let ContentBlock::ToolUse { name, .. } = block {
                if !tool_names.iter().any(|n| n == name) {
                    tool_names.push(name.clone());
                }
            }
        }
    }

    let mut lines = vec![format!(
        "{} earlier messages removed ({} user turns, {} assistant turns).",
        removed.len(),
        user_turns,
        assistant_turns
    )];
    if !tool_names.is_empty() {
        lines.push(format!("Tools used: {}.", tool_names.join(", ")));
    }

    let excerpts: Vec<String> = removed
        .iter()
        .filter(|m| m.role == Role::User)
        .map(|m| m.text())
        .filter(|t| !t.is_empty() && !t.starts_with(SUMMARY_PREFIX))
        .take(3)
        .map(|t| {
            let excerpt: String = t.chars().take(120).collect();
            format!("- {}", excerpt)
        })
        .collect();
    if !excerpts.is_empty() {
        lines.push("Earlier requests included:".to_string());
        lines.extend(excerpts);
    }

    lines.join("\n")
}
