// ABOUTME: Shared test doubles — a scripted vendor client and a recording executor.
// ABOUTME: Lets session tests drive the full engine without any network or tools.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use modelrelay::config::CompactionConfig;
use modelrelay::error::EngineError;
use modelrelay::events::StreamEvent;
use modelrelay::message::ToolSchema;
use modelrelay::provider::{AdapterEvent, AdapterStream, TurnRequest, VendorClient};
use modelrelay::session::{SessionParams, run_session};
use modelrelay::store::{Conversation, ConversationStore, MemoryStore};
use modelrelay::tools::{ToolBridge, ToolExecutor, ToolOutcome};

/// One scripted item in a vendor round.
#[derive(Clone)]
pub enum ScriptItem {
    Event(AdapterEvent),
    VendorError(String),
}

pub fn ev(event: AdapterEvent) -> ScriptItem {
    ScriptItem::Event(event)
}

/// A vendor client that replays scripted rounds instead of hitting a network.
/// When the script runs out, the last round repeats, which makes "the model
/// never stops asking for tools" trivial to express.
pub struct ScriptedVendor {
    rounds: Vec<Vec<ScriptItem>>,
    round_trips: AtomicUsize,
    credential_ok: bool,
}

impl ScriptedVendor {
    pub fn new(rounds: Vec<Vec<ScriptItem>>) -> Arc<Self> {
        Arc::new(Self {
            rounds,
            round_trips: AtomicUsize::new(0),
            credential_ok: true,
        })
    }

    pub fn without_credential() -> Arc<Self> {
        Arc::new(Self {
            rounds: Vec::new(),
            round_trips: AtomicUsize::new(0),
            credential_ok: false,
        })
    }

    pub fn round_trips(&self) -> usize {
        self.round_trips.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VendorClient for ScriptedVendor {
    fn check_credentials(&self) -> Result<(), EngineError> {
        if self.credential_ok {
            Ok(())
        } else {
            Err(EngineError::Auth(
                "no credential found for TEST_API_KEY".to_string(),
            ))
        }
    }

    async fn stream_turn(&self, _request: &TurnRequest) -> Result<AdapterStream, EngineError> {
        let trip = self.round_trips.fetch_add(1, Ordering::SeqCst);
        let round = self
            .rounds
            .get(trip)
            .or_else(|| self.rounds.last())
            .cloned()
            .unwrap_or_default();

        let items: Vec<Result<AdapterEvent, EngineError>> = round
            .into_iter()
            .map(|item| match item {
                ScriptItem::Event(event) => Ok(event),
                ScriptItem::VendorError(message) => Err(EngineError::Vendor(message)),
            })
            .collect();
        Ok(Box::pin(futures::stream::iter(items)))
    }

    fn redact(&self, message: &str) -> String {
        message.to_string()
    }
}

/// Records every call and returns a canned outcome.
pub struct RecordingExecutor {
    pub calls: Mutex<Vec<(String, Value)>>,
    outcome: ToolOutcome,
}

impl RecordingExecutor {
    pub fn returning(outcome: ToolOutcome) -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            outcome,
        })
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl ToolExecutor for RecordingExecutor {
    async fn execute(
        &self,
        name: &str,
        args: &Value,
        _workspace_dir: &Path,
    ) -> anyhow::Result<ToolOutcome> {
        self.calls
            .lock()
            .unwrap()
            .push((name.to_string(), args.clone()));
        Ok(self.outcome.clone())
    }
}

/// Seed a store with one empty conversation and return it.
pub async fn seeded_store(conversation_id: &str) -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    let conversation = Conversation::new(
        conversation_id,
        "claude-sonnet-4-20250514",
        "be helpful",
        "/tmp",
    );
    store.save(&conversation).await.unwrap();
    store
}

/// Default session parameters wired to the given doubles.
pub fn session_params(
    client: Arc<dyn VendorClient>,
    store: Arc<MemoryStore>,
    executor: Arc<dyn ToolExecutor>,
    conversation_id: &str,
    user_text: &str,
) -> SessionParams {
    SessionParams {
        client,
        store,
        bridge: Arc::new(ToolBridge::new(executor)),
        conversation_id: conversation_id.to_string(),
        user_text: user_text.to_string(),
        attachments: Vec::new(),
        tools: vec![
            ToolSchema {
                name: "read_file".to_string(),
                description: "Read a file".to_string(),
                input_schema: serde_json::json!({"type": "object"}),
            },
            ToolSchema {
                name: "bash".to_string(),
                description: "Run a command".to_string(),
                input_schema: serde_json::json!({"type": "object"}),
            },
        ],
        allowed_tools: None,
        disallowed_tools: Vec::new(),
        max_tokens: 1024,
        compaction: CompactionConfig::default(),
    }
}

/// Run a session to completion and collect every emitted event.
pub async fn run_and_collect(params: SessionParams) -> Vec<StreamEvent> {
    let (tx, mut rx) = mpsc::channel(64);
    let handle = tokio::spawn(run_session(params, tx));

    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    handle.await.unwrap();
    events
}

/// Wait for the detached persistence task to land `expected` messages.
pub async fn wait_for_persisted(
    store: &Arc<MemoryStore>,
    conversation_id: &str,
    expected: usize,
) -> Conversation {
    for _ in 0..200 {
        let conversation = store.load(conversation_id).await.unwrap().unwrap();
        if conversation.messages.len() >= expected {
            return conversation;
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    panic!("persistence never landed {} messages", expected);
}

/// Event-type tag for terse sequence assertions.
pub fn tag(event: &StreamEvent) -> &'static str {
    match event {
        StreamEvent::MessageStart { .. } => "message_start",
        StreamEvent::ContentBlockStart { .. } => "content_block_start",
        StreamEvent::ContentBlockDelta { .. } => "content_block_delta",
        StreamEvent::ContentBlockStop { .. } => "content_block_stop",
        StreamEvent::ToolResult { .. } => "tool_result",
        StreamEvent::CompactionInfo { .. } => "compaction_info",
        StreamEvent::MessageDelta { .. } => "message_delta",
        StreamEvent::MessageStop => "message_stop",
        StreamEvent::Error { .. } => "error",
    }
}
