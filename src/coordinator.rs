//! Indexing coordinator
//!
//! Drives one job through fetch, chunk, embed, and persist stages, keeping the
//! job record's counters moving so readers can poll progress. One active
//! job per tenant; jobs across tenants share a process-wide worker pool.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use crate::chunker::SmartChunker;
use crate::error::{Error, Result};
use crate::metrics;
use crate::models::{Chat, IndexingJob, JobStatus, RawMessage};
use crate::pipeline::{CancelFlag, EmbeddingPipeline, PipelineCounters};
use crate::store::{JobSubmission, Store};
use crate::telegram::TelegramFetcher;
use uuid::Uuid;

/// How often pipeline counters are flushed into the job record.
const PROGRESS_FLUSH_INTERVAL: Duration = Duration::from_millis(500);

pub struct IndexingCoordinator {
    store: Arc<dyn Store>,
    fetcher: Arc<dyn TelegramFetcher>,
    chunker: SmartChunker,
    pipeline: EmbeddingPipeline,
    /// Process-wide cap on concurrently running jobs
    workers: Arc<Semaphore>,
    cancels: Mutex<HashMap<Uuid, CancelFlag>>,
}

impl IndexingCoordinator {
    pub fn new(
        store: Arc<dyn Store>,
        fetcher: Arc<dyn TelegramFetcher>,
        chunker: SmartChunker,
        pipeline: EmbeddingPipeline,
        max_concurrent_jobs: usize,
    ) -> Self {
        Self {
            store,
            fetcher,
            chunker,
            pipeline,
            workers: Arc::new(Semaphore::new(max_concurrent_jobs.max(1))),
            cancels: Mutex::new(HashMap::new()),
        }
    }

    /// Submit an indexing job for a tenant.
    ///
    /// If the tenant already has an active job its id is returned instead;
    /// resubmission is informational, never an error.
    pub async fn submit(self: &Arc<Self>, tenant_id: i64, chat_ids: Vec<i64>) -> Result<Uuid> {
        let job = IndexingJob::new(tenant_id, chat_ids);
        match self.store.job_submit(job).await? {
            JobSubmission::AlreadyRunning(existing) => {
                info!(
                    tenant_id,
                    job_id = %existing.id,
                    "indexing already in progress, returning existing job"
                );
                Ok(existing.id)
            }
            JobSubmission::Created(job) => {
                let cancel = CancelFlag::new();
                self.cancels.lock().unwrap().insert(job.id, cancel.clone());
                let job_id = job.id;
                let coordinator = Arc::clone(self);
                tokio::spawn(async move {
                    coordinator.run_job(job, cancel).await;
                });
                Ok(job_id)
            }
        }
    }

    /// Request cooperative cancellation of a running job.
    ///
    /// In-flight provider calls finish and persist; the job then lands in
    /// `failed` with reason "canceled".
    pub async fn cancel(&self, tenant_id: i64, job_id: Uuid) -> Result<()> {
        let job = self
            .store
            .job_get(tenant_id, job_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("job {job_id}")))?;
        if job.status.is_terminal() {
            return Ok(());
        }
        if let Some(flag) = self.cancels.lock().unwrap().get(&job_id) {
            flag.cancel();
        }
        Ok(())
    }

    /// Poll a job until it reaches a terminal state.
    pub async fn wait(&self, tenant_id: i64, job_id: Uuid, timeout: Duration) -> Result<IndexingJob> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let job = self
                .store
                .job_get(tenant_id, job_id)
                .await?
                .ok_or_else(|| Error::NotFound(format!("job {job_id}")))?;
            if job.status.is_terminal() {
                return Ok(job);
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(Error::upstream("indexing", "timed out waiting for job"));
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    async fn run_job(self: Arc<Self>, mut job: IndexingJob, cancel: CancelFlag) {
        let _permit = match Arc::clone(&self.workers).acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => return, // pool closed: process is shutting down
        };

        let job_id = job.id;
        metrics::record_job_started();

        let outcome = self.execute(&mut job, &cancel).await;
        match outcome {
            Ok(false) => {
                job.status = JobStatus::Completed;
                info!(
                    job_id = %job_id,
                    messages = job.messages_processed,
                    chunks = job.chunks_produced,
                    embedded = job.embeddings_completed,
                    failed = job.embeddings_failed,
                    "indexing job completed"
                );
            }
            Ok(true) => {
                job.status = JobStatus::Failed;
                job.last_error = Some("canceled".to_string());
                warn!(job_id = %job_id, "indexing job canceled");
            }
            Err(err) => {
                job.status = JobStatus::Failed;
                job.last_error = Some(err.to_string());
                error!(job_id = %job_id, "indexing job failed: {err}");
            }
        }

        job.touch();
        if let Err(err) = self.store.job_update(&job).await {
            error!(job_id = %job_id, "failed to persist final job state: {err}");
        }
        metrics::record_job_finished(job.status.as_str());
        self.cancels.lock().unwrap().remove(&job_id);
    }

    /// Run the job stages. Returns `Ok(true)` when stopped by cancellation;
    /// partial progress stays persisted either way.
    async fn execute(&self, job: &mut IndexingJob, cancel: &CancelFlag) -> Result<bool> {
        let tenant_id = job.tenant_id;

        // --- fetching ---
        job.status = JobStatus::Fetching;
        self.flush(job).await?;

        let chats = self.resolve_chats(job).await?;
        let mut per_chat: Vec<(Chat, Vec<RawMessage>)> = Vec::new();

        for chat in chats {
            if cancel.is_canceled() {
                return Ok(true);
            }
            let mut messages: Vec<RawMessage> = Vec::new();
            let mut cursor: Option<String> = None;
            loop {
                if cancel.is_canceled() {
                    return Ok(true);
                }
                let page = self
                    .fetcher
                    .fetch_messages(tenant_id, chat.chat_id, cursor)
                    .await?;
                for message in &page.messages {
                    let message_id = self.store.upsert_message(message).await?;
                    self.store.add_membership(tenant_id, message_id).await?;
                    job.messages_processed += 1;
                }
                messages.extend(page.messages);
                self.flush(job).await?;
                match page.next_cursor {
                    Some(next) => cursor = Some(next),
                    None => break,
                }
            }
            self.store.upsert_chat(tenant_id, &chat).await?;
            per_chat.push((chat, messages));
        }

        // All chats paginated: lock in the expected total.
        job.messages_total = Some(job.messages_processed);

        // --- chunking ---
        job.status = JobStatus::Chunking;
        self.flush(job).await?;
        if cancel.is_canceled() {
            return Ok(true);
        }

        let mut all_chunks = Vec::new();
        for (chat, messages) in &per_chat {
            let chunks = self.chunker.chunk_messages(chat, messages);
            job.chunks_produced += chunks.len() as u64;
            all_chunks.extend(chunks);
        }
        self.flush(job).await?;

        // --- embedding ---
        job.status = JobStatus::Embedding;
        self.flush(job).await?;
        if cancel.is_canceled() {
            return Ok(true);
        }

        let counters = PipelineCounters::default();
        let base_completed = job.embeddings_completed;
        let base_failed = job.embeddings_failed;

        let run = self.pipeline.run(tenant_id, all_chunks, cancel, &counters);
        tokio::pin!(run);
        let mut ticker = tokio::time::interval(PROGRESS_FLUSH_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        let report = loop {
            tokio::select! {
                result = &mut run => break result?,
                _ = ticker.tick() => {
                    job.embeddings_completed = base_completed + counters.completed();
                    job.embeddings_failed = base_failed + counters.failed();
                    self.flush(job).await?;
                }
            }
        };

        job.embeddings_completed = base_completed + report.completed;
        job.embeddings_failed = base_failed + report.failed;
        if let Some(last_error) = report.last_error {
            job.last_error = Some(last_error);
        }
        metrics::record_embeddings(report.completed, report.failed);
        self.flush(job).await?;

        if cancel.is_canceled() {
            return Ok(true);
        }

        let now = Utc::now();
        for (chat, _) in &per_chat {
            self.store
                .mark_chat_indexed(tenant_id, chat.chat_id, now)
                .await?;
        }
        Ok(false)
    }

    /// Resolve the job's chat list against the tenant's Telegram chats.
    /// An empty request means "index everything".
    async fn resolve_chats(&self, job: &mut IndexingJob) -> Result<Vec<Chat>> {
        let available = self.fetcher.list_chats(job.tenant_id).await?;
        if job.chat_ids.is_empty() {
            job.chat_ids = available.iter().map(|c| c.chat_id).collect();
            return Ok(available);
        }
        let mut selected = Vec::new();
        for &chat_id in &job.chat_ids {
            let chat = available
                .iter()
                .find(|c| c.chat_id == chat_id)
                .ok_or_else(|| Error::NotFound(format!("chat {chat_id}")))?;
            selected.push(chat.clone());
        }
        Ok(selected)
    }

    async fn flush(&self, job: &mut IndexingJob) -> Result<()> {
        job.touch();
        self.store.job_update(job).await
    }
}
