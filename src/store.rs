// ABOUTME: Conversation persistence — read/append primitives behind a trait.
// ABOUTME: Ships a file-backed store with atomic writes and an in-memory double.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::message::Message;

/// A stored conversation. Created by the caller; the engine reads it and
/// appends completed assistant turns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub model: String,
    pub system_prompt: String,
    pub workspace_dir: String,
    pub total_tokens: u64,
    pub created_at: String,
    pub updated_at: String,
    pub messages: Vec<Message>,
}

impl Conversation {
    pub fn new(
        id: impl Into<String>,
        model: impl Into<String>,
        system_prompt: impl Into<String>,
        workspace_dir: impl Into<String>,
    ) -> Self {
        let now = Utc::now().to_rfc3339();
        Self {
            id: id.into(),
            model: model.into(),
            system_prompt: system_prompt.into(),
            workspace_dir: workspace_dir.into(),
            total_tokens: 0,
            created_at: now.clone(),
            updated_at: now,
            messages: Vec::new(),
        }
    }
}

/// Persistence collaborator. Implementations must be safe for concurrent use
/// by independent sessions; per-conversation single-writer semantics suffice.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn load(&self, conversation_id: &str) -> anyhow::Result<Option<Conversation>>;

    async fn save(&self, conversation: &Conversation) -> anyhow::Result<()>;

    /// Append a message and add to the running token count in one write.
    async fn append_message(
        &self,
        conversation_id: &str,
        message: Message,
        tokens_used: u64,
    ) -> anyhow::Result<()>;
}

/// File-backed store: one JSON document per conversation, written atomically
/// via tmp + rename.
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Store rooted at the default location, `~/.modelrelay/conversations`.
    pub fn from_default_dir() -> Self {
        Self::new(EngineConfig::conversations_dir())
    }

    fn conversation_path(&self, conversation_id: &str) -> PathBuf {
        self.root.join(format!("{}.json", conversation_id))
    }
}

fn read_conversation(path: &Path) -> anyhow::Result<Option<Conversation>> {
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(path)?;
    let conversation: Conversation = serde_json::from_str(&content)?;
    Ok(Some(conversation))
}

fn write_conversation(path: &Path, conversation: &Conversation) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp_path = path.with_extension("json.tmp");
    let content = serde_json::to_string_pretty(conversation)?;
    std::fs::write(&tmp_path, &content)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

#[async_trait]
impl ConversationStore for FileStore {
    async fn load(&self, conversation_id: &str) -> anyhow::Result<Option<Conversation>> {
        read_conversation(&self.conversation_path(conversation_id))
    }

    async fn save(&self, conversation: &Conversation) -> anyhow::Result<()> {
        write_conversation(&self.conversation_path(&conversation.id), conversation)
    }

    async fn append_message(
        &self,
        conversation_id: &str,
        message: Message,
        tokens_used: u64,
    ) -> anyhow::Result<()> {
        let path = self.conversation_path(conversation_id);
        let mut conversation = read_conversation(&path)?
            .ok_or_else(|| anyhow::anyhow!("conversation '{}' not found", conversation_id))?;
        conversation.messages.push(message);
        conversation.total_tokens += tokens_used;
        conversation.updated_at = Utc::now().to_rfc3339();
        write_conversation(&path, &conversation)
    }
}

/// In-memory store for tests and ephemeral embedding contexts.
#[derive(Default)]
pub struct MemoryStore {
    conversations: Mutex<HashMap<String, Conversation>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConversationStore for MemoryStore {
    async fn load(&self, conversation_id: &str) -> anyhow::Result<Option<Conversation>> {
        let guard = self
            .conversations
            .lock()
            .map_err(|_| anyhow::anyhow!("store poisoned"))?;
        Ok(guard.get(conversation_id).cloned())
    }

    async fn save(&self, conversation: &Conversation) -> anyhow::Result<()> {
        let mut guard = self
            .conversations
            .lock()
            .map_err(|_| anyhow::anyhow!("store poisoned"))?;
        guard.insert(conversation.id.clone(), conversation.clone());
        Ok(())
    }

    async fn append_message(
        &self,
        conversation_id: &str,
        message: Message,
        tokens_used: u64,
    ) -> anyhow::Result<()> {
        let mut guard = self
            .conversations
            .lock()
            .map_err(|_| anyhow::anyhow!("store poisoned"))?;
        let conversation = guard
            .get_mut(conversation_id)
            .ok_or_else(|| anyhow::anyhow!("conversation '{}' not found", conversation_id))?;
        conversation.messages.push(message);
        conversation.total_tokens += tokens_used;
        conversation.updated_at = Utc::now().to_rfc3339();
        Ok(())
    }
}
