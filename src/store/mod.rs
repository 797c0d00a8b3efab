//! Storage abstraction
//!
//! The [`Store`] trait defines every persistence operation the engine
//! needs, enabling pluggable backends. The crate ships [`memory::MemoryStore`]
//! as the reference implementation; database-backed stores implement the
//! same trait.
//!
//! Tenant isolation contract: every read path takes the tenant id and joins
//! through the membership table. No implementation may return a chunk whose
//! message has no membership row for the calling tenant.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::Result;
use crate::models::{Chat, Chunk, IndexingJob, RawMessage, Timeline, TimelineSummary};

/// Hard cap on similarity-search result counts.
pub const MAX_SEARCH_K: usize = 50;

/// Optional restrictions on a similarity search.
#[derive(Debug, Clone, Default)]
pub struct SearchFilters {
    /// Restrict to these chats
    pub chat_ids: Option<Vec<i64>>,
    /// Only chunks with a primary timestamp at or after this instant
    pub since: Option<DateTime<Utc>>,
    /// Only chunks with a primary timestamp at or before this instant
    pub until: Option<DateTime<Utc>>,
}

impl SearchFilters {
    pub fn chats(chat_ids: Vec<i64>) -> Self {
        Self {
            chat_ids: Some(chat_ids),
            ..Default::default()
        }
    }
}

/// A chunk matched by similarity search.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub chunk: Chunk,
    /// Cosine similarity against the query vector
    pub similarity: f32,
}

/// Outcome of a conditional job submission.
#[derive(Debug, Clone)]
pub enum JobSubmission {
    /// No job was active for the tenant; this one was created.
    Created(IndexingJob),
    /// The tenant already has an active job; it is returned instead.
    AlreadyRunning(IndexingJob),
}

/// Aggregate row counts, mostly for diagnostics and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreStats {
    pub messages: usize,
    pub chunks: usize,
    pub embeddings: usize,
}

/// Abstract storage backend.
///
/// Writes either fully commit or leave storage untouched; the transaction
/// boundary is one message together with its chunks and embeddings.
#[async_trait]
pub trait Store: Send + Sync {
    /// Insert a message, idempotent on `(chat_id, msg_id)`.
    ///
    /// Returns the surrogate message id (existing or new).
    async fn upsert_message(&self, msg: &RawMessage) -> Result<i64>;

    /// Surrogate id for `(chat_id, msg_id)`, if the message exists.
    async fn message_id(&self, chat_id: i64, msg_id: i64) -> Result<Option<i64>>;

    /// Grant a tenant visibility of a message. Idempotent.
    async fn add_membership(&self, tenant_id: i64, message_id: i64) -> Result<()>;

    /// Revoke a tenant's visibility of a message. Idempotent.
    async fn remove_membership(&self, tenant_id: i64, message_id: i64) -> Result<()>;

    /// Persist chunks with their vectors, atomically per parent message.
    ///
    /// Every vector's dimension must equal the store's configured
    /// dimension and every chunk must reference an ingested message;
    /// violations are `Internal` errors and nothing is written.
    async fn insert_chunks_with_embeddings(&self, items: &[(Chunk, Vec<f32>)]) -> Result<()>;

    /// Whether `(chat_id, msg_id, chunk_index)` already has an embedding.
    async fn has_embedding(&self, chat_id: i64, msg_id: i64, chunk_index: u32) -> Result<bool>;

    /// Cosine similarity search over the tenant's visible chunks.
    ///
    /// Results come back ordered by similarity descending, ties broken by
    /// primary timestamp descending. `k` is capped at [`MAX_SEARCH_K`].
    async fn similarity_search(
        &self,
        tenant_id: i64,
        vector: &[f32],
        k: usize,
        filters: &SearchFilters,
    ) -> Result<Vec<SearchHit>>;

    /// Upsert a tenant's chat association.
    async fn upsert_chat(&self, tenant_id: i64, chat: &Chat) -> Result<()>;

    /// Chats known for this tenant.
    async fn tenant_chats(&self, tenant_id: i64) -> Result<Vec<Chat>>;

    /// Stamp a chat's `last_indexed_at`.
    async fn mark_chat_indexed(
        &self,
        tenant_id: i64,
        chat_id: i64,
        at: DateTime<Utc>,
    ) -> Result<()>;

    /// Conditional insert enforcing one active job per tenant.
    async fn job_submit(&self, job: IndexingJob) -> Result<JobSubmission>;

    /// Persist updated job state and counters.
    async fn job_update(&self, job: &IndexingJob) -> Result<()>;

    /// Fetch a job; `None` when the id is unknown to this tenant.
    async fn job_get(&self, tenant_id: i64, job_id: Uuid) -> Result<Option<IndexingJob>>;

    async fn timeline_save(&self, timeline: &Timeline) -> Result<()>;

    async fn timeline_list(&self, tenant_id: i64) -> Result<Vec<TimelineSummary>>;

    async fn timeline_get(&self, tenant_id: i64, id: Uuid) -> Result<Option<Timeline>>;

    /// Drop a tenant: memberships, chats, jobs, timelines; messages no
    /// tenant references anymore are garbage-collected with their chunks
    /// and embeddings.
    async fn purge_tenant(&self, tenant_id: i64) -> Result<()>;

    /// Aggregate row counts.
    async fn stats(&self) -> Result<StoreStats>;
}
