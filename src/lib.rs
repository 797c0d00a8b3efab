//! Telegram Recall: chat history indexing and retrieval engine
//!
//! This library turns a user's Telegram chat history into a semantically
//! searchable corpus and answers natural-language questions about it:
//! - Smart chunking that preserves temporal, reply, and authorship context
//! - Batched, concurrent, progress-tracked embedding with dedup and retries
//! - Tenant-isolated vector storage behind a pluggable `Store` trait
//! - RAG answers with `source:` citations and chronological timelines
//!
//! External collaborators (Telegram client, embedding provider, answer LLM,
//! blob storage) are consumed through traits; `integrations` carries the
//! OpenAI-backed implementations.

pub mod chunker;
pub mod composer;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod integrations;
pub mod metrics;
pub mod models;
pub mod pipeline;
pub mod retrieval;
pub mod sanitize;
pub mod service;
pub mod store;
pub mod telegram;

// Re-export common types
pub use composer::{AnswerResponse, AnswerSource};
pub use config::Config;
pub use error::{Error, Result, RetryClass};
pub use models::{
    Chat, ChatKind, Chunk, ChunkMetadata, IndexingJob, JobStatus, RawMessage, Timeline,
    TimelineItem, TimelineSummary,
};
pub use service::RecallService;
pub use store::{SearchFilters, Store};
