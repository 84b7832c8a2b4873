//! Append-only structured log of reasoning failures.
//!
//! Every failed reasoning attempt is recorded with enough context to debug
//! it after the fact. Appends are serialized behind a mutex so concurrent
//! queries never interleave records. The log always keeps an in-memory
//! tail; a JSON-lines file sink is optional.

use std::io::Write;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::warn;

/// One structured failure record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureRecord {
    /// RFC 3339 timestamp of the failure.
    pub timestamp: String,
    /// Short classification of the error.
    pub error_kind: String,
    /// The error message.
    pub message: String,
    /// Additional detail (e.g. which fallback level was running).
    pub detail: String,
    /// The query being answered, truncated to 200 characters.
    pub query: String,
    /// Length of the evidence text in characters.
    pub context_length: usize,
    /// Length of the prompt in characters.
    pub prompt_length: usize,
}

/// The process-wide failure log.
pub struct FailureLog {
    inner: Mutex<Inner>,
}

struct Inner {
    records: Vec<FailureRecord>,
    file_path: Option<PathBuf>,
}

impl FailureLog {
    /// Create an in-memory-only log.
    pub fn new() -> Self {
        Self { inner: Mutex::new(Inner { records: Vec::new(), file_path: None }) }
    }

    /// Create a log that also appends JSON lines to the given file.
    pub fn with_file(path: impl Into<PathBuf>) -> Self {
        Self { inner: Mutex::new(Inner { records: Vec::new(), file_path: Some(path.into()) }) }
    }

    /// Append one failure record.
    ///
    /// File-sink errors are themselves non-fatal: they are logged and the
    /// in-memory record is kept regardless.
    pub async fn record(
        &self,
        error_kind: &str,
        message: &str,
        detail: &str,
        query: &str,
        context_length: usize,
        prompt_length: usize,
    ) {
        let record = FailureRecord {
            timestamp: chrono::Utc::now().to_rfc3339(),
            error_kind: error_kind.to_string(),
            message: message.to_string(),
            detail: detail.to_string(),
            query: query.chars().take(200).collect(),
            context_length,
            prompt_length,
        };

        let mut inner = self.inner.lock().await;
        if let Some(path) = &inner.file_path {
            if let Err(e) = append_line(path, &record) {
                warn!(error = %e, "could not write failure record to file");
            }
        }
        inner.records.push(record);
    }

    /// Snapshot of all records, oldest first.
    pub async fn records(&self) -> Vec<FailureRecord> {
        self.inner.lock().await.records.clone()
    }

    /// Number of recorded failures.
    pub async fn len(&self) -> usize {
        self.inner.lock().await.records.len()
    }

    /// Whether the log is empty.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for FailureLog {
    fn default() -> Self {
        Self::new()
    }
}

fn append_line(path: &PathBuf, record: &FailureRecord) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = std::fs::OpenOptions::new().create(true).append(true).open(path)?;
    let line = serde_json::to_string(record).unwrap_or_default();
    writeln!(file, "{line}")
}
