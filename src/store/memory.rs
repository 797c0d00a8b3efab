//! In-memory [`Store`] implementation
//!
//! Reference backend: `HashMap`s behind one `std::sync::RwLock`, brute-force
//! cosine similarity. The single write lock is the transaction boundary, so
//! multi-row writes commit or fail as a unit.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::{Chat, Chunk, IndexingJob, RawMessage, Timeline, TimelineSummary};

use super::{JobSubmission, SearchFilters, SearchHit, Store, StoreStats, MAX_SEARCH_K};

struct StoredMessage {
    id: i64,
    message: RawMessage,
}

struct StoredChunk {
    chunk: Chunk,
    embedding: Vec<f32>,
}

#[derive(Default)]
struct Inner {
    next_message_id: i64,
    /// `(chat_id, msg_id)` -> message
    messages: HashMap<(i64, i64), StoredMessage>,
    /// surrogate id -> `(chat_id, msg_id)`
    message_keys: HashMap<i64, (i64, i64)>,
    /// tenant -> surrogate message ids visible to it
    memberships: HashMap<i64, HashSet<i64>>,
    /// `(chat_id, msg_id, chunk_index)` -> chunk + vector
    chunks: BTreeMap<(i64, i64, u32), StoredChunk>,
    /// `(tenant_id, chat_id)` -> chat
    chats: HashMap<(i64, i64), Chat>,
    jobs: HashMap<Uuid, IndexingJob>,
    timelines: HashMap<Uuid, Timeline>,
}

/// In-memory store with a fixed embedding dimension.
pub struct MemoryStore {
    dimension: usize,
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            inner: RwLock::new(Inner::default()),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (&x, &y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

#[async_trait]
impl Store for MemoryStore {
    async fn upsert_message(&self, msg: &RawMessage) -> Result<i64> {
        let mut inner = self.inner.write().unwrap();
        let key = (msg.chat_id, msg.msg_id);
        if let Some(existing) = inner.messages.get(&key) {
            return Ok(existing.id);
        }
        inner.next_message_id += 1;
        let id = inner.next_message_id;
        inner.messages.insert(
            key,
            StoredMessage {
                id,
                message: msg.clone(),
            },
        );
        inner.message_keys.insert(id, key);
        Ok(id)
    }

    async fn message_id(&self, chat_id: i64, msg_id: i64) -> Result<Option<i64>> {
        let inner = self.inner.read().unwrap();
        Ok(inner.messages.get(&(chat_id, msg_id)).map(|m| m.id))
    }

    async fn add_membership(&self, tenant_id: i64, message_id: i64) -> Result<()> {
        let mut inner = self.inner.write().unwrap();
        if !inner.message_keys.contains_key(&message_id) {
            return Err(Error::Internal(format!(
                "membership references unknown message {message_id}"
            )));
        }
        inner
            .memberships
            .entry(tenant_id)
            .or_default()
            .insert(message_id);
        Ok(())
    }

    async fn remove_membership(&self, tenant_id: i64, message_id: i64) -> Result<()> {
        let mut inner = self.inner.write().unwrap();
        if let Some(set) = inner.memberships.get_mut(&tenant_id) {
            set.remove(&message_id);
        }
        Ok(())
    }

    async fn insert_chunks_with_embeddings(&self, items: &[(Chunk, Vec<f32>)]) -> Result<()> {
        let mut inner = self.inner.write().unwrap();

        // Validate the whole batch before touching anything.
        for (chunk, vector) in items {
            if vector.len() != self.dimension {
                return Err(Error::Internal(format!(
                    "embedding dimension {} does not match configured {}",
                    vector.len(),
                    self.dimension
                )));
            }
            if chunk.text.is_empty() {
                return Err(Error::Internal(format!(
                    "chunk {:?} has empty text",
                    chunk.key()
                )));
            }
            if !inner.messages.contains_key(&(chunk.chat_id, chunk.msg_id)) {
                return Err(Error::Internal(format!(
                    "chunk references unknown message ({}, {})",
                    chunk.chat_id, chunk.msg_id
                )));
            }
        }

        for (chunk, vector) in items {
            inner.chunks.insert(
                chunk.key(),
                StoredChunk {
                    chunk: chunk.clone(),
                    embedding: vector.clone(),
                },
            );
        }
        Ok(())
    }

    async fn has_embedding(&self, chat_id: i64, msg_id: i64, chunk_index: u32) -> Result<bool> {
        let inner = self.inner.read().unwrap();
        Ok(inner.chunks.contains_key(&(chat_id, msg_id, chunk_index)))
    }

    async fn similarity_search(
        &self,
        tenant_id: i64,
        vector: &[f32],
        k: usize,
        filters: &SearchFilters,
    ) -> Result<Vec<SearchHit>> {
        if vector.len() != self.dimension {
            return Err(Error::Internal(format!(
                "query vector dimension {} does not match configured {}",
                vector.len(),
                self.dimension
            )));
        }

        let inner = self.inner.read().unwrap();
        let visible = match inner.memberships.get(&tenant_id) {
            Some(set) if !set.is_empty() => set,
            _ => return Ok(Vec::new()),
        };

        let mut hits: Vec<SearchHit> = inner
            .chunks
            .values()
            .filter(|stored| {
                let chunk = &stored.chunk;
                let member = inner
                    .messages
                    .get(&(chunk.chat_id, chunk.msg_id))
                    .map(|m| visible.contains(&m.id))
                    .unwrap_or(false);
                if !member {
                    return false;
                }
                if let Some(chat_ids) = &filters.chat_ids {
                    if !chat_ids.contains(&chunk.chat_id) {
                        return false;
                    }
                }
                if let Some(since) = filters.since {
                    if chunk.metadata.timestamp < since {
                        return false;
                    }
                }
                if let Some(until) = filters.until {
                    if chunk.metadata.timestamp > until {
                        return false;
                    }
                }
                true
            })
            .map(|stored| SearchHit {
                chunk: stored.chunk.clone(),
                similarity: cosine_similarity(vector, &stored.embedding),
            })
            .collect();

        hits.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.chunk.metadata.timestamp.cmp(&a.chunk.metadata.timestamp))
        });
        hits.truncate(k.min(MAX_SEARCH_K));
        Ok(hits)
    }

    async fn upsert_chat(&self, tenant_id: i64, chat: &Chat) -> Result<()> {
        let mut inner = self.inner.write().unwrap();
        let entry = inner
            .chats
            .entry((tenant_id, chat.chat_id))
            .or_insert_with(|| chat.clone());
        entry.title = chat.title.clone();
        entry.kind = chat.kind;
        Ok(())
    }

    async fn tenant_chats(&self, tenant_id: i64) -> Result<Vec<Chat>> {
        let inner = self.inner.read().unwrap();
        let mut chats: Vec<Chat> = inner
            .chats
            .iter()
            .filter(|((tenant, _), _)| *tenant == tenant_id)
            .map(|(_, chat)| chat.clone())
            .collect();
        chats.sort_by_key(|c| c.chat_id);
        Ok(chats)
    }

    async fn mark_chat_indexed(
        &self,
        tenant_id: i64,
        chat_id: i64,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let mut inner = self.inner.write().unwrap();
        if let Some(chat) = inner.chats.get_mut(&(tenant_id, chat_id)) {
            chat.last_indexed_at = Some(at);
        }
        Ok(())
    }

    async fn job_submit(&self, job: IndexingJob) -> Result<JobSubmission> {
        let mut inner = self.inner.write().unwrap();
        let active = inner
            .jobs
            .values()
            .find(|j| j.tenant_id == job.tenant_id && !j.status.is_terminal())
            .cloned();
        if let Some(existing) = active {
            return Ok(JobSubmission::AlreadyRunning(existing));
        }
        inner.jobs.insert(job.id, job.clone());
        Ok(JobSubmission::Created(job))
    }

    async fn job_update(&self, job: &IndexingJob) -> Result<()> {
        let mut inner = self.inner.write().unwrap();
        inner.jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn job_get(&self, tenant_id: i64, job_id: Uuid) -> Result<Option<IndexingJob>> {
        let inner = self.inner.read().unwrap();
        Ok(inner
            .jobs
            .get(&job_id)
            .filter(|j| j.tenant_id == tenant_id)
            .cloned())
    }

    async fn timeline_save(&self, timeline: &Timeline) -> Result<()> {
        let mut inner = self.inner.write().unwrap();
        inner.timelines.insert(timeline.id, timeline.clone());
        Ok(())
    }

    async fn timeline_list(&self, tenant_id: i64) -> Result<Vec<TimelineSummary>> {
        let inner = self.inner.read().unwrap();
        let mut summaries: Vec<TimelineSummary> = inner
            .timelines
            .values()
            .filter(|t| t.tenant_id == tenant_id)
            .map(|t| t.summary())
            .collect();
        summaries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(summaries)
    }

    async fn timeline_get(&self, tenant_id: i64, id: Uuid) -> Result<Option<Timeline>> {
        let inner = self.inner.read().unwrap();
        Ok(inner
            .timelines
            .get(&id)
            .filter(|t| t.tenant_id == tenant_id)
            .cloned())
    }

    async fn purge_tenant(&self, tenant_id: i64) -> Result<()> {
        let mut inner = self.inner.write().unwrap();
        inner.memberships.remove(&tenant_id);
        inner.chats.retain(|(tenant, _), _| *tenant != tenant_id);
        inner.jobs.retain(|_, job| job.tenant_id != tenant_id);
        inner.timelines.retain(|_, t| t.tenant_id != tenant_id);

        // Garbage-collect messages no tenant can see anymore.
        let still_referenced: HashSet<i64> = inner
            .memberships
            .values()
            .flat_map(|set| set.iter().copied())
            .collect();
        let orphaned: Vec<(i64, i64)> = inner
            .messages
            .values()
            .filter(|m| !still_referenced.contains(&m.id))
            .map(|m| (m.message.chat_id, m.message.msg_id))
            .collect();
        for key in orphaned {
            if let Some(stored) = inner.messages.remove(&key) {
                inner.message_keys.remove(&stored.id);
            }
            let (chat_id, msg_id) = key;
            inner
                .chunks
                .retain(|(c, m, _), _| !(*c == chat_id && *m == msg_id));
        }
        Ok(())
    }

    async fn stats(&self) -> Result<StoreStats> {
        let inner = self.inner.read().unwrap();
        Ok(StoreStats {
            messages: inner.messages.len(),
            chunks: inner.chunks.len(),
            embeddings: inner.chunks.len(),
        })
    }
}
