// ABOUTME: Tool execution bridge — invokes the external executor and normalizes results.
// ABOUTME: Derives advisory subject-path and edit-line hints from call arguments.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

/// Argument keys checked for a subject file path, highest priority first.
const PATH_KEYS: [&str; 5] = ["file_path", "path", "filePath", "source", "destination"];

/// Argument keys whose value is a search string worth locating in the file.
const SEARCH_KEYS: [&str; 3] = ["old_string", "old_str", "pattern"];

/// Raw result from the external tool executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutcome {
    pub content: String,
    pub is_error: bool,
}

impl ToolOutcome {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
        }
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: true,
        }
    }
}

/// External collaborator that actually runs tools. Must be safe for
/// concurrent use by independent sessions.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(
        &self,
        name: &str,
        args: &Value,
        workspace_dir: &Path,
    ) -> anyhow::Result<ToolOutcome>;
}

/// A normalized tool result plus advisory UI metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgedResult {
    pub content: String,
    pub is_error: bool,
    pub file_path: Option<String>,
    pub edit_line_hint: Option<u64>,
}

/// Wraps a [`ToolExecutor`], converting executor failures into error results
/// and attaching subject-path/edit-line hints. The hints never block or fail
/// the call.
pub struct ToolBridge {
    executor: Arc<dyn ToolExecutor>,
}

impl ToolBridge {
    pub fn new(executor: Arc<dyn ToolExecutor>) -> Self {
        Self { executor }
    }

    pub async fn execute(&self, name: &str, args: &Value, workspace_dir: &Path) -> BridgedResult {
        let file_path = extract_subject_path(args);
        let edit_line_hint = file_path
            .as_deref()
            .and_then(|path| edit_line_hint(path, args, workspace_dir));

        let outcome = match self.executor.execute(name, args, workspace_dir).await {
            Ok(outcome) => outcome,
            Err(e) => ToolOutcome::error(format!("Tool execution error: {}", e)),
        };

        BridgedResult {
            content: outcome.content,
            is_error: outcome.is_error,
            file_path,
            edit_line_hint,
        }
    }
}

/// Best-effort subject file path from common argument key names. Fixed
/// priority order; the first non-empty string value wins, and non-string
/// values fall through to the next candidate.
pub fn extract_subject_path(args: &Value) -> Option<String> {
    for key in PATH_KEYS {
        if let Some(value) = args.get(key).and_then(Value::as_str) {
            if !value.is_empty() {
                return Some(value.to_string());
            }
        }
    }
    None
}

/// Best-effort 1-based line of the first occurrence of a search-string
/// argument within the subject file. Relative paths resolve against the
/// workspace directory.
fn edit_line_hint(subject_path: &str, args: &Value, workspace_dir: &Path) -> Option<u64> {
    let needle = SEARCH_KEYS
        .iter()
        .find_map(|key| args.get(key).and_then(Value::as_str))
        .filter(|s| !s.is_empty())?;

    let path = PathBuf::from(subject_path);
    let path = if path.is_absolute() {
        path
    } else {
        workspace_dir.join(path)
    };
    let content = std::fs::read_to_string(path).ok()?;

    // Only the needle's first line needs to match for multi-line edits.
    let first_needle_line = needle.lines().next().unwrap_or(needle);
    content
        .lines()
        .position(|line| line.contains(first_needle_line))
        .map(|at| at as u64 + 1)
}
