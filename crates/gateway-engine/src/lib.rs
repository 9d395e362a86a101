#![forbid(unsafe_code)]
#![deny(unreachable_pub)]
#![deny(missing_docs)]

//! Worker-pool supervisor and job processor for the iskoces translation
//! gateway: supervised translator subprocesses behind a bounded dispatch
//! channel, an in-memory job registry, and the handler contract the RPC
//! layer consumes.

/// Public API types for the engine crate.
pub mod api;

mod fallback;
mod handler;
mod metrics;
mod pool;
mod processor;
mod registry;
mod wire;
mod worker;

pub use api::{
    DEFAULT_CHUNK_BYTES, EngineKind, HandlerError, JobSnapshot, JobState, PoolConfig,
    TranslateError, Translator,
};
pub use fallback::HttpTranslator;
pub use handler::TranslationHandler;
pub use metrics::GatewayMetrics;
pub use pool::WorkerPool;
pub use processor::JobProcessor;
pub use registry::{Job, JobRegistry};
