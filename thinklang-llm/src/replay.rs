//! Snapshot replay and recording providers
//!
//! Snapshots are versioned documents of provider calls. The replay
//! provider serves entries in declaration order regardless of request
//! contents and errors when the list is exhausted; the recording provider
//! wraps a live provider and appends one entry per call.

use crate::{Completion, CompletionRequest, Provider, StopReason, TokenUsage};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use thinklang_core::{ThinkError, ThinkResult};

pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotFile {
    pub version: u32,
    pub entries: Vec<SnapshotEntry>,
}

impl SnapshotFile {
    pub fn new() -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            entries: Vec::new(),
        }
    }

    pub fn load(path: &Path) -> ThinkResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| ThinkError::Runtime {
            message: format!("failed to read snapshot '{}': {}", path.display(), e),
        })?;
        serde_json::from_str(&text).map_err(|e| ThinkError::Runtime {
            message: format!("invalid snapshot '{}': {}", path.display(), e),
        })
    }

    pub fn save(&self, path: &Path) -> ThinkResult<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| ThinkError::Runtime {
                    message: format!("failed to create '{}': {}", parent.display(), e),
                })?;
            }
        }
        let text = serde_json::to_string_pretty(self).map_err(|e| ThinkError::Runtime {
            message: format!("failed to serialize snapshot: {}", e),
        })?;
        std::fs::write(path, text).map_err(|e| ThinkError::Runtime {
            message: format!("failed to write snapshot '{}': {}", path.display(), e),
        })
    }
}

impl Default for SnapshotFile {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotEntry {
    pub request: SnapshotRequest,
    pub response: SnapshotResponse,
    pub metadata: SnapshotMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotRequest {
    pub system_prompt: String,
    pub user_message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub json_schema: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotResponse {
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub model: String,
}

// ============================================================================
// REPLAY
// ============================================================================

/// Serves snapshot entries in order; the (n+1)-th call on an n-entry
/// snapshot is an error.
#[derive(Debug)]
pub struct ReplayProvider {
    entries: Vec<SnapshotEntry>,
    cursor: AtomicUsize,
}

impl ReplayProvider {
    pub fn new(snapshot: SnapshotFile) -> Self {
        Self {
            entries: snapshot.entries,
            cursor: AtomicUsize::new(0),
        }
    }

    pub fn load(path: &Path) -> ThinkResult<Self> {
        Ok(Self::new(SnapshotFile::load(path)?))
    }

    pub fn served(&self) -> usize {
        self.cursor.load(Ordering::SeqCst).min(self.entries.len())
    }
}

#[async_trait]
impl Provider for ReplayProvider {
    async fn complete(&self, _request: CompletionRequest) -> ThinkResult<Completion> {
        let index = self.cursor.fetch_add(1, Ordering::SeqCst);
        let entry = self.entries.get(index).ok_or_else(|| ThinkError::Runtime {
            message: format!(
                "replay snapshot exhausted after {} entr{}",
                self.entries.len(),
                if self.entries.len() == 1 { "y" } else { "ies" }
            ),
        })?;

        Ok(Completion {
            data: entry.response.value.clone(),
            usage: TokenUsage {
                input_tokens: entry.metadata.input_tokens,
                output_tokens: entry.metadata.output_tokens,
            },
            model: entry.metadata.model.clone(),
            tool_calls: Vec::new(),
            stop_reason: StopReason::EndTurn,
        })
    }

    fn name(&self) -> &str {
        "replay"
    }

    fn default_model(&self) -> &str {
        "replay"
    }
}

// ============================================================================
// RECORDING
// ============================================================================

/// Wraps a live provider, appending each call's request/response to a
/// snapshot file.
pub struct RecordingProvider {
    inner: Arc<dyn Provider>,
    path: PathBuf,
    recorded: Mutex<SnapshotFile>,
}

impl RecordingProvider {
    pub fn new(inner: Arc<dyn Provider>, path: impl Into<PathBuf>) -> Self {
        Self {
            inner,
            path: path.into(),
            recorded: Mutex::new(SnapshotFile::new()),
        }
    }

    pub fn entry_count(&self) -> usize {
        self.recorded.lock().map(|s| s.entries.len()).unwrap_or(0)
    }
}

#[async_trait]
impl Provider for RecordingProvider {
    async fn complete(&self, request: CompletionRequest) -> ThinkResult<Completion> {
        let completion = self.inner.complete(request.clone()).await?;

        let entry = SnapshotEntry {
            request: SnapshotRequest {
                system_prompt: request.system_prompt,
                user_message: request.user_message,
                json_schema: request.json_schema,
            },
            response: SnapshotResponse {
                value: completion.data.clone(),
            },
            metadata: SnapshotMetadata {
                input_tokens: completion.usage.input_tokens,
                output_tokens: completion.usage.output_tokens,
                model: completion.model.clone(),
            },
        };

        let snapshot = {
            let mut recorded = self.recorded.lock().map_err(|_| ThinkError::Runtime {
                message: "snapshot lock poisoned".to_string(),
            })?;
            recorded.entries.push(entry);
            recorded.clone()
        };
        snapshot.save(&self.path)?;

        Ok(completion)
    }

    fn name(&self) -> &str {
        self.inner.name()
    }

    fn default_model(&self) -> &str {
        self.inner.default_model()
    }
}

impl std::fmt::Debug for RecordingProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordingProvider")
            .field("path", &self.path)
            .field("entries", &self.entry_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn snapshot_with(values: &[Value]) -> SnapshotFile {
        SnapshotFile {
            version: SNAPSHOT_VERSION,
            entries: values
                .iter()
                .map(|v| SnapshotEntry {
                    request: SnapshotRequest {
                        system_prompt: String::new(),
                        user_message: String::new(),
                        json_schema: None,
                    },
                    response: SnapshotResponse { value: v.clone() },
                    metadata: SnapshotMetadata {
                        input_tokens: 1,
                        output_tokens: 1,
                        model: "snap".to_string(),
                    },
                })
                .collect(),
        }
    }

    #[tokio::test]
    async fn replay_serves_entries_in_declaration_order() {
        let provider = ReplayProvider::new(snapshot_with(&[json!("a"), json!("b")]));

        // Request contents are irrelevant to ordering.
        let first = provider
            .complete(CompletionRequest {
                user_message: "zzz".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();
        let second = provider.complete(CompletionRequest::default()).await.unwrap();

        assert_eq!(first.data, json!("a"));
        assert_eq!(second.data, json!("b"));
    }

    #[tokio::test]
    async fn replay_exhaustion_is_an_error() {
        let provider = ReplayProvider::new(snapshot_with(&[json!("only")]));
        provider.complete(CompletionRequest::default()).await.unwrap();
        let err = provider
            .complete(CompletionRequest::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("exhausted"));
    }

    #[test]
    fn snapshot_serde_round_trips() {
        let snapshot = snapshot_with(&[json!({"k": 1})]);
        let text = serde_json::to_string(&snapshot).unwrap();
        let back: SnapshotFile = serde_json::from_str(&text).unwrap();
        assert_eq!(back, snapshot);
        assert_eq!(back.version, 1);
    }
}
