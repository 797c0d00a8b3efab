//! Embedding pipeline
//!
//! Takes chunker output, deduplicates against storage, and runs bounded
//! concurrent provider batches. Batches persist as they complete, in no
//! particular order; a failed batch never halts its siblings.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::stream::{self, StreamExt};
use rand::Rng;
use tracing::{debug, warn};

use crate::error::{Error, RetryClass, Result};
use crate::integrations::EmbeddingProvider;
use crate::models::Chunk;
use crate::store::Store;

/// Exponential backoff with jitter, expressed as data.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub base_ms: u64,
    pub factor: f64,
    /// Fractional jitter, e.g. 0.2 = ±20%
    pub jitter: f64,
    pub cap_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_ms: 250,
            factor: 2.0,
            jitter: 0.2,
            cap_ms: 30_000,
        }
    }
}

impl RetryPolicy {
    /// Delay before the given retry attempt (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let exp = (attempt - 1) as f64;
        let mut delay = (self.base_ms as f64) * self.factor.powf(exp);
        if delay > self.cap_ms as f64 {
            delay = self.cap_ms as f64;
        }
        if self.jitter > 0.0 {
            let jitter = rand::thread_rng().gen_range(-self.jitter..self.jitter);
            delay *= 1.0 + jitter;
            if delay < 0.0 {
                delay = self.base_ms as f64;
            }
        }
        Duration::from_millis(delay.round() as u64)
    }
}

/// Cooperative cancellation signal shared across pipeline stages.
///
/// Cancellation lets in-flight provider calls finish (their outputs are
/// still persisted) but prevents new batches from starting.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_canceled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Shared monotonic counters, polled by the coordinator while the
/// pipeline runs.
#[derive(Debug, Default)]
pub struct PipelineCounters {
    completed: AtomicU64,
    failed: AtomicU64,
    skipped: AtomicU64,
}

impl PipelineCounters {
    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn skipped(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }
}

/// Final accounting for one pipeline run.
#[derive(Debug, Default, Clone)]
pub struct PipelineReport {
    /// Chunks embedded and persisted in this run
    pub completed: u64,
    /// Chunks whose batch terminally failed
    pub failed: u64,
    /// Chunks that already had an embedding in storage
    pub skipped: u64,
    /// Chunks never attempted because of cancellation
    pub not_attempted: u64,
    pub last_error: Option<String>,
}

#[derive(Debug, Default)]
struct BatchOutcome {
    completed: u64,
    failed: u64,
    not_attempted: u64,
    last_error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub batch_size: usize,
    pub concurrency: usize,
    pub max_retries: u32,
    /// Ceiling on chunks admitted to in-flight batches at once
    pub queue_ceiling: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_size: 64,
            concurrency: 4,
            max_retries: 5,
            queue_ceiling: 1024,
        }
    }
}

pub struct EmbeddingPipeline {
    provider: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn Store>,
    config: PipelineConfig,
    retry: RetryPolicy,
}

impl EmbeddingPipeline {
    pub fn new(
        provider: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn Store>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            provider,
            store,
            config,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Embed and persist chunks for a tenant.
    ///
    /// Chunks that already have an embedding skip the provider entirely and
    /// only gain the tenant membership.
    pub async fn run(
        &self,
        tenant_id: i64,
        chunks: Vec<Chunk>,
        cancel: &CancelFlag,
        counters: &PipelineCounters,
    ) -> Result<PipelineReport> {
        let mut report = PipelineReport::default();

        // Dedup against storage before any provider call.
        let mut pending: Vec<Chunk> = Vec::new();
        for chunk in chunks {
            if self
                .store
                .has_embedding(chunk.chat_id, chunk.msg_id, chunk.chunk_index)
                .await?
            {
                if let Some(message_id) =
                    self.store.message_id(chunk.chat_id, chunk.msg_id).await?
                {
                    self.store.add_membership(tenant_id, message_id).await?;
                }
                counters.skipped.fetch_add(1, Ordering::Relaxed);
                report.skipped += 1;
            } else {
                pending.push(chunk);
            }
        }

        if pending.is_empty() {
            return Ok(report);
        }

        let batches: Vec<Vec<Chunk>> = pending
            .chunks(self.config.batch_size.max(1))
            .map(|b| b.to_vec())
            .collect();

        // Backpressure: concurrency × batch size stays under the ceiling.
        let by_ceiling = (self.config.queue_ceiling / self.config.batch_size.max(1)).max(1);
        let concurrency = self.config.concurrency.max(1).min(by_ceiling);

        debug!(
            batches = batches.len(),
            concurrency, "starting embedding batches"
        );

        let outcomes: Vec<BatchOutcome> = stream::iter(batches)
            .map(|batch| self.embed_batch(tenant_id, batch, cancel, counters))
            .buffer_unordered(concurrency)
            .collect()
            .await;

        for outcome in outcomes {
            report.completed += outcome.completed;
            report.failed += outcome.failed;
            report.not_attempted += outcome.not_attempted;
            if outcome.last_error.is_some() {
                report.last_error = outcome.last_error;
            }
        }
        Ok(report)
    }

    /// Embed one batch with retries; splits and recurses on
    /// `PayloadTooLarge`.
    fn embed_batch<'a>(
        &'a self,
        tenant_id: i64,
        batch: Vec<Chunk>,
        cancel: &'a CancelFlag,
        counters: &'a PipelineCounters,
    ) -> BoxFuture<'a, BatchOutcome> {
        Box::pin(async move {
            let mut outcome = BatchOutcome::default();

            if cancel.is_canceled() {
                outcome.not_attempted = batch.len() as u64;
                return outcome;
            }

            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let mut attempt: u32 = 0;

            loop {
                attempt += 1;
                match self.provider.embed(&texts).await {
                    Ok(vectors) => {
                        self.persist(tenant_id, &batch, vectors, counters, &mut outcome)
                            .await;
                        return outcome;
                    }
                    Err(err) => {
                        if matches!(err, Error::PayloadTooLarge(_)) && batch.len() > 1 {
                            debug!("batch of {} too large, splitting", batch.len());
                            let mid = batch.len() / 2;
                            let (left, right) = batch.split_at(mid);
                            let left = self
                                .embed_batch(tenant_id, left.to_vec(), cancel, counters)
                                .await;
                            let right = self
                                .embed_batch(tenant_id, right.to_vec(), cancel, counters)
                                .await;
                            outcome.completed = left.completed + right.completed;
                            outcome.failed = left.failed + right.failed;
                            outcome.not_attempted = left.not_attempted + right.not_attempted;
                            outcome.last_error = right.last_error.or(left.last_error);
                            return outcome;
                        }

                        if err.retry_class() == RetryClass::Transient
                            && attempt < self.config.max_retries
                        {
                            let delay = self.retry.delay(attempt);
                            debug!(
                                attempt,
                                delay_ms = delay.as_millis() as u64,
                                "transient embedding failure, backing off: {err}"
                            );
                            tokio::time::sleep(delay).await;
                            continue;
                        }

                        warn!("embedding batch of {} failed: {err}", batch.len());
                        outcome.failed = batch.len() as u64;
                        outcome.last_error = Some(err.to_string());
                        counters
                            .failed
                            .fetch_add(batch.len() as u64, Ordering::Relaxed);
                        return outcome;
                    }
                }
            }
        })
    }

    /// Persist a completed batch, one transaction per parent message.
    async fn persist(
        &self,
        tenant_id: i64,
        batch: &[Chunk],
        vectors: Vec<Vec<f32>>,
        counters: &PipelineCounters,
        outcome: &mut BatchOutcome,
    ) {
        let mut items: Vec<(Chunk, Vec<f32>)> =
            batch.iter().cloned().zip(vectors.into_iter()).collect();

        while !items.is_empty() {
            let parent = (items[0].0.chat_id, items[0].0.msg_id);
            let group: Vec<(Chunk, Vec<f32>)> = {
                let (same, rest): (Vec<_>, Vec<_>) = items
                    .into_iter()
                    .partition(|(c, _)| (c.chat_id, c.msg_id) == parent);
                items = rest;
                same
            };

            let count = group.len() as u64;
            let persisted = async {
                self.store.insert_chunks_with_embeddings(&group).await?;
                if let Some(message_id) = self.store.message_id(parent.0, parent.1).await? {
                    self.store.add_membership(tenant_id, message_id).await?;
                }
                Ok::<(), Error>(())
            }
            .await;

            match persisted {
                Ok(()) => {
                    counters.completed.fetch_add(count, Ordering::Relaxed);
                    outcome.completed += count;
                }
                Err(err) => {
                    warn!("failed to persist chunks for {parent:?}: {err}");
                    counters.failed.fetch_add(count, Ordering::Relaxed);
                    outcome.failed += count;
                    outcome.last_error = Some(err.to_string());
                }
            }
        }
    }
}
