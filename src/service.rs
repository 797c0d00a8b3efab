//! Public API surface
//!
//! [`RecallService`] is the services container: every collaborator is an
//! injected `Arc`, nothing lives in module globals. All operations are
//! tenant-scoped; the query paths add rate limiting and a wall-clock
//! deadline on top of sanitization.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::time::timeout;
use uuid::Uuid;

use crate::chunker::{ChunkerConfig, SmartChunker};
use crate::composer::{AnswerComposer, AnswerResponse, ComposerConfig};
use crate::config::Config;
use crate::coordinator::IndexingCoordinator;
use crate::error::{Error, Result};
use crate::integrations::{AnswerModel, EmbeddingProvider};
use crate::metrics;
use crate::models::{Chat, IndexingJob, Timeline, TimelineSummary};
use crate::pipeline::{EmbeddingPipeline, PipelineConfig};
use crate::retrieval::{RetrievalConfig, RetrievalEngine};
use crate::sanitize::QuerySanitizer;
use crate::store::{SearchFilters, Store};
use crate::telegram::TelegramFetcher;

/// Sliding-window per-tenant rate limiter.
struct RateLimiter {
    per_minute: u32,
    windows: Mutex<HashMap<i64, VecDeque<Instant>>>,
}

impl RateLimiter {
    fn new(per_minute: u32) -> Self {
        Self {
            per_minute,
            windows: Mutex::new(HashMap::new()),
        }
    }

    fn check(&self, tenant_id: i64) -> Result<()> {
        let now = Instant::now();
        let mut windows = self.windows.lock().unwrap();
        let window = windows.entry(tenant_id).or_default();
        while let Some(front) = window.front() {
            if now.duration_since(*front) > Duration::from_secs(60) {
                window.pop_front();
            } else {
                break;
            }
        }
        if window.len() >= self.per_minute as usize {
            let oldest = *window.front().expect("window is non-empty here");
            let retry_after = 60u64.saturating_sub(now.duration_since(oldest).as_secs());
            return Err(Error::RateLimited {
                retry_after_secs: retry_after.max(1),
            });
        }
        window.push_back(now);
        Ok(())
    }
}

pub struct RecallService {
    config: Config,
    store: Arc<dyn Store>,
    sanitizer: QuerySanitizer,
    retrieval: RetrievalEngine,
    composer: AnswerComposer,
    coordinator: Arc<IndexingCoordinator>,
    rate: RateLimiter,
}

impl RecallService {
    pub fn new(
        config: Config,
        store: Arc<dyn Store>,
        fetcher: Arc<dyn TelegramFetcher>,
        embedder: Arc<dyn EmbeddingProvider>,
        llm: Arc<dyn AnswerModel>,
    ) -> Result<Self> {
        config.validate()?;
        if embedder.dimension() != config.embedding_dimension {
            return Err(Error::Internal(format!(
                "embedding provider dimension {} does not match configured {}",
                embedder.dimension(),
                config.embedding_dimension
            )));
        }

        let chunker = SmartChunker::new(ChunkerConfig::from(&config));
        let pipeline = EmbeddingPipeline::new(
            embedder.clone(),
            store.clone(),
            PipelineConfig {
                batch_size: config.embedding_batch_size,
                concurrency: config.embedding_concurrency,
                max_retries: config.embedding_max_retries,
                queue_ceiling: config.embedding_queue_ceiling,
            },
        );
        let coordinator = Arc::new(IndexingCoordinator::new(
            store.clone(),
            fetcher,
            chunker,
            pipeline,
            config.max_concurrent_jobs,
        ));
        let retrieval = RetrievalEngine::new(
            embedder,
            store.clone(),
            RetrievalConfig {
                k: config.retrieval_k,
                min_similarity: config.retrieval_min_similarity,
            },
        );
        let composer = AnswerComposer::new(
            llm,
            ComposerConfig {
                max_context_chunks: config.retrieval_k,
                answer_max_tokens: config.answer_max_tokens,
                ..Default::default()
            },
        );

        Ok(Self {
            sanitizer: QuerySanitizer::new(config.query_max_length),
            rate: RateLimiter::new(config.rate_limit_per_minute_per_tenant),
            store,
            retrieval,
            composer,
            coordinator,
            config,
        })
    }

    pub fn coordinator(&self) -> &Arc<IndexingCoordinator> {
        &self.coordinator
    }

    /// Start (or join) an indexing job over the given chats; empty means
    /// all of the tenant's chats.
    pub async fn submit_indexing(&self, tenant_id: i64, chat_ids: Vec<i64>) -> Result<Uuid> {
        self.coordinator.submit(tenant_id, chat_ids).await
    }

    pub async fn cancel_indexing(&self, tenant_id: i64, job_id: Uuid) -> Result<()> {
        self.coordinator.cancel(tenant_id, job_id).await
    }

    pub async fn get_job(&self, tenant_id: i64, job_id: Uuid) -> Result<IndexingJob> {
        self.store
            .job_get(tenant_id, job_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("job {job_id}")))
    }

    pub async fn list_chats(&self, tenant_id: i64) -> Result<Vec<Chat>> {
        self.store.tenant_chats(tenant_id).await
    }

    /// Answer a natural-language question from the tenant's indexed history.
    pub async fn query_answer(
        &self,
        tenant_id: i64,
        text: &str,
        filters: SearchFilters,
    ) -> Result<AnswerResponse> {
        let started = Instant::now();
        let result = self.answer_inner(tenant_id, text, filters).await;
        metrics::record_query("answer", started.elapsed(), result.is_ok());
        result
    }

    async fn answer_inner(
        &self,
        tenant_id: i64,
        text: &str,
        filters: SearchFilters,
    ) -> Result<AnswerResponse> {
        self.rate.check(tenant_id)?;
        let query = self.sanitizer.sanitize(tenant_id, text)?;
        let deadline = Duration::from_secs(self.config.query_timeout_seconds);

        timeout(deadline, async {
            let retrieved = self.retrieval.search(tenant_id, &query, &filters).await?;
            self.composer.answer(&query, &retrieved).await
        })
        .await
        .map_err(|_| Error::upstream("query", "deadline exceeded"))?
    }

    /// Build (and optionally save) a chronological timeline for a query.
    pub async fn query_timeline(
        &self,
        tenant_id: i64,
        text: &str,
        title: Option<String>,
        filters: SearchFilters,
    ) -> Result<Timeline> {
        let started = Instant::now();
        let result = self.timeline_inner(tenant_id, text, title, filters).await;
        metrics::record_query("timeline", started.elapsed(), result.is_ok());
        result
    }

    async fn timeline_inner(
        &self,
        tenant_id: i64,
        text: &str,
        title: Option<String>,
        filters: SearchFilters,
    ) -> Result<Timeline> {
        self.rate.check(tenant_id)?;
        let query = self.sanitizer.sanitize(tenant_id, text)?;
        let deadline = Duration::from_secs(self.config.query_timeout_seconds);

        let retrieved = timeout(deadline, self.retrieval.search(tenant_id, &query, &filters))
            .await
            .map_err(|_| Error::upstream("query", "deadline exceeded"))??;

        let timeline = self
            .composer
            .timeline(tenant_id, &query, title, &retrieved);
        if timeline.title.is_some() {
            self.store.timeline_save(&timeline).await?;
        }
        Ok(timeline)
    }

    pub async fn list_timelines(&self, tenant_id: i64) -> Result<Vec<TimelineSummary>> {
        self.store.timeline_list(tenant_id).await
    }

    pub async fn get_timeline(&self, tenant_id: i64, id: Uuid) -> Result<Timeline> {
        self.store
            .timeline_get(tenant_id, id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("timeline {id}")))
    }
}
