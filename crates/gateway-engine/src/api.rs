//! Public API types for the iskoces gateway engine.

use std::convert::Infallible;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Which translator backend the worker subprocesses run.
///
/// The tag is informational: it labels every metric the pool emits, and pool
/// behavior is identical across engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineKind {
    /// LibreTranslate-based worker.
    Libretranslate,
    /// Argos-translate-based worker.
    Argos,
}

impl EngineKind {
    /// Stable label used on metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineKind::Libretranslate => "libretranslate",
            EngineKind::Argos => "argos",
        }
    }
}

impl std::fmt::Display for EngineKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configuration for the worker pool.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Engine tag attached to every metric.
    pub engine: EngineKind,

    /// Number of translator subprocesses to run. Values below 1 are clamped.
    pub max_workers: usize,

    /// Directory holding the per-worker rendezvous sockets. Created at pool
    /// start if absent; failure to create it is fatal.
    pub rendezvous_dir: PathBuf,

    /// Program executed per worker. The worker's socket path is always the
    /// final argument.
    pub worker_command: String,

    /// Optional script (or mode) argument inserted before the socket path.
    pub worker_script: Option<PathBuf>,
}

impl PoolConfig {
    /// Default number of workers.
    pub const DEFAULT_MAX_WORKERS: usize = 4;

    /// Default rendezvous socket directory.
    pub const DEFAULT_RENDEZVOUS_DIR: &'static str = "/tmp/iskoces-workers";
}

/// Default chunk budget for document splitting, in bytes.
pub const DEFAULT_CHUNK_BYTES: usize = 10 * 1024;

/// Errors surfaced by a [`Translator`].
#[derive(Debug, Clone, thiserror::Error)]
pub enum TranslateError {
    /// No worker became available within the hard acquisition timeout.
    #[error("no worker became available within {0:?}")]
    AcquireTimeout(Duration),

    /// The caller's deadline elapsed before the request completed.
    #[error("deadline exceeded before the request completed")]
    DeadlineExceeded,

    /// Connect, write, read or decode failed on the worker connection.
    #[error("worker transport failure: {0}")]
    Transport(String),

    /// The worker answered, but reported a translation failure.
    #[error("worker reported failure: {0}")]
    Worker(String),

    /// The pool is shutting down.
    #[error("translator is shutting down")]
    ShuttingDown,
}

impl TranslateError {
    /// Outcome label used on request metrics.
    pub fn outcome(&self) -> &'static str {
        match self {
            TranslateError::AcquireTimeout(_) => "timeout",
            TranslateError::DeadlineExceeded => "cancelled",
            TranslateError::Transport(_) => "transport",
            TranslateError::Worker(_) => "worker",
            TranslateError::ShuttingDown => "shutdown",
        }
    }
}

/// The translation contract the job processor consumes.
///
/// Implemented by the worker pool and by the HTTP fallback client; tests
/// substitute scripted stubs.
#[async_trait]
pub trait Translator: Send + Sync {
    /// Translate `text` from `source_lang` to `target_lang`, finishing before
    /// `deadline` when one is given. Language codes are passed through as-is;
    /// normalize first if the caller's form is external.
    async fn translate(
        &self,
        text: &str,
        source_lang: &str,
        target_lang: &str,
        deadline: Option<Instant>,
    ) -> Result<String, TranslateError>;
}

/// Lifecycle state of a translation job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Created, not yet picked up by the processor.
    Queued,
    /// The processor is driving it.
    Processing,
    /// Finished successfully; result fields are set.
    Completed,
    /// Finished with an error; the error field is set.
    Failed,
}

impl JobState {
    /// Whether the state is terminal (Completed or Failed).
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

/// Point-in-time view of a translation job, published on every change.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobSnapshot {
    /// Job identifier.
    pub id: Uuid,
    /// Correlation id from the originating request.
    pub request_id: String,
    /// Current state.
    pub status: JobState,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Set when the processor picks the job up.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// Set exactly when the job reaches a terminal state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Progress percentage, 0-100; 100 iff Completed.
    pub progress_percent: u8,
    /// Human-readable progress message.
    pub progress_message: String,
    /// Translated title, once available.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub translated_title: Option<String>,
    /// Translated markdown body, once available.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub translated_markdown: Option<String>,
    /// Always zero for this backend class.
    pub tokens_used: u32,
    /// Wall time the processor spent on the job, in seconds.
    pub inference_seconds: f64,
    /// Failure message; `None` unless Failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Errors surfaced by the [`TranslationHandler`](crate::TranslationHandler).
#[derive(Debug, Clone, thiserror::Error)]
pub enum HandlerError {
    /// A required request field was missing or empty.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// No job with the given id exists.
    #[error("job {0} not found")]
    JobNotFound(Uuid),

    /// The requested method has no defined contract.
    #[error("unsupported method: {0}")]
    Unsupported(&'static str),
}

/// Marker return type for methods that always reject.
pub type Never = Infallible;
