// ABOUTME: Streaming session controller — one user turn to one streamed response.
// ABOUTME: Owns the multi-turn tool loop, the event sequence, and final persistence.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use futures::StreamExt;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::config::CompactionConfig;
use crate::error::EngineError;
use crate::events::{MessageStartInfo, StopInfo, StreamEvent, WireBlock, WireDelta, WireError};
use crate::history;
use crate::message::{Attachment, ContentBlock, Message, ToolSchema};
use crate::provider::{AdapterEvent, StopReason, TurnRequest, VendorClient};
use crate::store::ConversationStore;
use crate::tools::ToolBridge;
use crate::usage::UsageTotals;

/// Fixed cap on vendor round trips per session. Reaching it forces a clean
/// finalize with whatever text has accumulated; a liveness guarantee, not an
/// error.
pub const MAX_TOOL_ITERATIONS: usize = 10;

/// Bundled parameters for one streaming session.
pub struct SessionParams {
    pub client: Arc<dyn VendorClient>,
    pub store: Arc<dyn ConversationStore>,
    pub bridge: Arc<ToolBridge>,
    pub conversation_id: String,
    pub user_text: String,
    pub attachments: Vec<Attachment>,
    pub tools: Vec<ToolSchema>,
    /// When present, only these tool names are offered to the model.
    pub allowed_tools: Option<Vec<String>>,
    pub disallowed_tools: Vec<String>,
    pub max_tokens: u32,
    pub compaction: CompactionConfig,
}

/// A tool call being assembled from streaming fragments.
struct PendingToolCall {
    id: Option<String>,
    name: String,
    json_buf: String,
}

/// A fully assembled call, correlation id resolved.
struct ToolCall {
    id: String,
    name: String,
    args: Value,
}

/// Run one streaming session to completion, emitting events on `tx`.
///
/// The session owns all transient state for its lifetime. The caller holds
/// the receiving end of `tx`; dropping it cancels the session promptly and
/// suppresses persistence.
pub async fn run_session(params: SessionParams, tx: mpsc::Sender<StreamEvent>) {
    let session = Session::new(params, tx);
    session.run().await;
}

struct Session {
    params: SessionParams,
    tx: mpsc::Sender<StreamEvent>,
    history: Vec<Message>,
    full_text: String,
    usage: UsageTotals,
    model: String,
    workspace_dir: PathBuf,
    started: bool,
}

impl Session {
    fn new(params: SessionParams, tx: mpsc::Sender<StreamEvent>) -> Self {
        Self {
            params,
            tx,
            history: Vec::new(),
            full_text: String::new(),
            usage: UsageTotals::default(),
            model: String::new(),
            workspace_dir: PathBuf::new(),
            started: false,
        }
    }

    async fn run(mut self) {
        match self.run_inner().await {
            Ok(()) => {}
            Err(EngineError::Cancelled) => {
                // Client went away; nothing left to tell it, nothing persisted.
            }
            Err(e) => {
                let message = self.params.client.redact(&e.to_string());
                let _ = self
                    .tx
                    .send(StreamEvent::Error {
                        error: WireError {
                            error_type: e.wire_type().to_string(),
                            message,
                        },
                    })
                    .await;
                let _ = self.tx.send(StreamEvent::MessageStop).await;
            }
        }
    }

    async fn run_inner(&mut self) -> Result<(), EngineError> {
        // Fail fast on a missing credential: no events beyond the error, no
        // vendor network call, nothing persisted.
        self.params.client.check_credentials()?;

        let loaded = history::load(
            &self.params.store,
            &self.params.conversation_id,
            &self.params.compaction,
        )
        .await
        .map_err(|e| EngineError::Persistence(e.to_string()))?;

        self.model = loaded.conversation.model.clone();
        self.workspace_dir = PathBuf::from(&loaded.conversation.workspace_dir);
        self.history = loaded.messages;
        self.history.push(Message::user(&self.params.user_text));

        self.emit(StreamEvent::MessageStart {
            message: MessageStartInfo {
                id: format!("msg_{}", uuid::Uuid::new_v4().simple()),
                role: "assistant".to_string(),
                model: self.model.clone(),
            },
        })
        .await?;
        self.started = true;

        // One running text block, reused across every tool-loop iteration.
        self.emit(StreamEvent::ContentBlockStart {
            index: 0,
            content_block: WireBlock::Text {
                text: String::new(),
            },
        })
        .await?;

        if let Some(report) = loaded.report {
            self.emit(StreamEvent::CompactionInfo {
                original_count: report.original_count,
                compacted_count: report.compacted_count,
                tokens_removed: report.tokens_removed,
                summary: report.summary,
            })
            .await?;
        }

        let system_prompt = loaded.conversation.system_prompt.clone();
        let offered_tools = self.offered_tools();
        let mut stop_reason = StopReason::EndTurn;

        for _iteration in 0..MAX_TOOL_ITERATIONS {
            let request = TurnRequest {
                model: self.model.clone(),
                system_prompt: system_prompt.clone(),
                max_tokens: self.params.max_tokens,
                messages: self.history.clone(),
                tools: offered_tools.clone(),
                attachments: self.params.attachments.clone(),
            };

            let (calls, reason) = self.stream_one_round(&request).await?;
            stop_reason = reason;

            if calls.is_empty() {
                break;
            }
            self.execute_tool_batch(calls).await?;
        }

        self.finalize(stop_reason).await
    }

    /// Stream one vendor round trip: forward text deltas, buffer tool-call
    /// fragments, accumulate usage. Returns assembled calls in request order
    /// plus the stop reason.
    async fn stream_one_round(
        &mut self,
        request: &TurnRequest,
    ) -> Result<(Vec<ToolCall>, StopReason), EngineError> {
        let mut stream = self.params.client.stream_turn(request).await?;

        let mut pending: HashMap<usize, PendingToolCall> = HashMap::new();
        let mut iteration_text = String::new();
        let mut stop_reason = StopReason::EndTurn;

        while let Some(event) = stream.next().await {
            match event? {
                AdapterEvent::TextDelta(text) => {
                    iteration_text.push_str(&text);
                    self.full_text.push_str(&text);
                    self.emit(StreamEvent::ContentBlockDelta {
                        index: 0,
                        delta: WireDelta::TextDelta { text },
                    })
                    .await?;
                }
                AdapterEvent::ThinkingDelta(_) => {
                    // Internal reasoning is neither streamed nor persisted.
                }
                AdapterEvent::ToolCallStart { index, id, name } => {
                    pending.insert(
                        index,
                        PendingToolCall {
                            id,
                            name,
                            json_buf: String::new(),
                        },
                    );
                }
                AdapterEvent::ToolCallArgs { index, fragment } => {
                    if let Some(call) = pending.get_mut(&index) {
                        call.json_buf.push_str(&fragment);
                    }
                }
                AdapterEvent::Usage(snapshot) => {
                    self.usage.add(snapshot);
                }
                AdapterEvent::Stop(reason) => {
                    stop_reason = reason;
                }
            }
        }

        // Assemble in request order: the vendor's block index is the order
        // the model asked for the calls.
        let mut indexed: Vec<(usize, PendingToolCall)> = pending.into_iter().collect();
        indexed.sort_by_key(|(index, _)| *index);

        let calls = indexed
            .into_iter()
            .map(|(_, call)| {
                let args: Value = serde_json::from_str(&call.json_buf).unwrap_or_else(|e| {
                    tracing::trace!(tool = %call.name, error = %e, "unparseable tool arguments");
                    Value::Object(serde_json::Map::new())
                });
                ToolCall {
                    // Vendors that supply no call id get a locally generated
                    // correlation id.
                    id: call
                        .id
                        .unwrap_or_else(|| format!("call_{}", uuid::Uuid::new_v4().simple())),
                    name: call.name,
                    args,
                }
            })
            .collect::<Vec<_>>();

        // Record this iteration's assistant turn before executing anything,
        // so the augmented history reads as a single linear conversation.
        if !calls.is_empty() {
            let mut blocks = Vec::new();
            if !iteration_text.is_empty() {
                blocks.push(ContentBlock::text(&iteration_text));
            }
            for call in &calls {
                blocks.push(ContentBlock::ToolUse {
                    id: call.id.clone(),
                    name: call.name.clone(),
                    input: call.args.clone(),
                });
            }
            self.history.push(Message::assistant(blocks));
        }

        Ok((calls, stop_reason))
    }

    /// Execute a batch of tool calls sequentially, emitting each result as it
    /// arrives and appending the tool-role message in request order.
    async fn execute_tool_batch(&mut self, calls: Vec<ToolCall>) -> Result<(), EngineError> {
        let mut result_blocks = Vec::with_capacity(calls.len());

        for call in &calls {
            let result = if self.tool_permitted(&call.name) {
                self.params
                    .bridge
                    .execute(&call.name, &call.args, &self.workspace_dir)
                    .await
            } else {
                crate::tools::BridgedResult {
                    content: format!("Tool '{}' is not permitted in this session", call.name),
                    is_error: true,
                    file_path: None,
                    edit_line_hint: None,
                }
            };

            self.emit(StreamEvent::ToolResult {
                tool_call_id: call.id.clone(),
                tool_name: call.name.clone(),
                file_path: result.file_path.clone(),
                edit_line_hint: result.edit_line_hint,
                result: result.content.clone(),
                is_error: result.is_error,
            })
            .await?;

            result_blocks.push(if result.is_error {
                ContentBlock::tool_error(&call.id, &result.content)
            } else {
                ContentBlock::tool_result(&call.id, &result.content)
            });
        }

        self.history.push(Message::tool_results(result_blocks));
        Ok(())
    }

    /// Close out the stream, then persist the assistant turn off the critical
    /// path. A persistence failure is logged and never reaches the client.
    async fn finalize(&mut self, stop_reason: StopReason) -> Result<(), EngineError> {
        self.emit(StreamEvent::ContentBlockStop { index: 0 }).await?;
        self.emit(StreamEvent::MessageDelta {
            delta: StopInfo {
                stop_reason: stop_reason.as_str().to_string(),
            },
            usage: self.usage.to_wire(),
        })
        .await?;
        self.emit(StreamEvent::MessageStop).await?;

        if !self.full_text.is_empty() {
            let store = self.params.store.clone();
            let conversation_id = self.params.conversation_id.clone();
            let message = Message::assistant(vec![ContentBlock::text(&self.full_text)]);
            let tokens = self.usage.total();
            tokio::spawn(async move {
                if let Err(e) = store.append_message(&conversation_id, message, tokens).await {
                    tracing::warn!(conversation_id, error = %e, "failed to persist assistant turn");
                }
            });
        }

        Ok(())
    }

    fn offered_tools(&self) -> Vec<ToolSchema> {
        self.params
            .tools
            .iter()
            .filter(|schema| self.tool_permitted(&schema.name))
            .cloned()
            .collect()
    }

    fn tool_permitted(&self, name: &str) -> bool {
        if self.params.disallowed_tools.iter().any(|n| n == name) {
            return false;
        }
        match &self.params.allowed_tools {
            Some(allowed) => allowed.iter().any(|n| n == name),
            None => true,
        }
    }

    /// Send one event; a closed channel means the client disconnected and the
    /// session is cancelled.
    async fn emit(&self, event: StreamEvent) -> Result<(), EngineError> {
        self.tx
            .send(event)
            .await
            .map_err(|_| EngineError::Cancelled)
    }
}
