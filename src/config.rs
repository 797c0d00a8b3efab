//! Engine configuration
//!
//! Loads from `config.yml` when present, with environment variable
//! overrides for deployment-sensitive values; falls back to defaults.

use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::error::{Error, Result};

/// Embedding model dimension lookup.
///
/// The configured dimension must agree with the configured model; all
/// persisted vectors are validated against it.
pub fn model_dimension(model: &str) -> Option<usize> {
    match model {
        "text-embedding-3-small" => Some(1536),
        "text-embedding-3-large" => Some(3072),
        "text-embedding-ada-002" => Some(1536),
        _ => None,
    }
}

/// All knobs recognized by the engine.
#[derive(Debug, Clone)]
pub struct Config {
    pub embedding_model: String,
    pub embedding_dimension: usize,
    pub embedding_batch_size: usize,
    pub embedding_concurrency: usize,
    pub embedding_max_retries: u32,
    /// Backpressure ceiling on chunks queued into the pipeline
    pub embedding_queue_ceiling: usize,

    pub chunk_size_chars: usize,
    pub chunk_overlap_chars: usize,
    /// Group text cap; appending past this flushes the group
    pub group_text_limit_chars: usize,
    pub group_time_window_seconds: i64,
    pub busy_chat_time_window_seconds: i64,
    pub busy_chat_author_threshold: usize,
    pub likely_answer_window_seconds: i64,
    pub short_answer_window_seconds: i64,

    pub retrieval_k: usize,
    pub retrieval_min_similarity: f32,

    pub query_max_length: usize,
    pub query_timeout_seconds: u64,
    pub rate_limit_per_minute_per_tenant: u32,

    pub answer_model: String,
    pub answer_max_tokens: u32,

    /// Process-wide cap on concurrently running indexing jobs
    pub max_concurrent_jobs: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            embedding_model: "text-embedding-3-large".to_string(),
            embedding_dimension: 3072,
            embedding_batch_size: 64,
            embedding_concurrency: 4,
            embedding_max_retries: 5,
            embedding_queue_ceiling: 1024,
            chunk_size_chars: 500,
            chunk_overlap_chars: 100,
            group_text_limit_chars: 400,
            group_time_window_seconds: 120,
            busy_chat_time_window_seconds: 30,
            busy_chat_author_threshold: 5,
            likely_answer_window_seconds: 30,
            short_answer_window_seconds: 60,
            retrieval_k: 20,
            retrieval_min_similarity: 0.0,
            query_max_length: 500,
            query_timeout_seconds: 30,
            rate_limit_per_minute_per_tenant: 100,
            answer_model: "gpt-4o-mini".to_string(),
            answer_max_tokens: 500,
            max_concurrent_jobs: 4,
        }
    }
}

/// YAML file shape; every field optional so partial configs work.
#[derive(Debug, Default, Deserialize)]
struct YamlConfig {
    embedding: Option<EmbeddingSection>,
    chunking: Option<ChunkingSection>,
    retrieval: Option<RetrievalSection>,
    query: Option<QuerySection>,
    answer: Option<AnswerSection>,
    jobs: Option<JobsSection>,
}

#[derive(Debug, Default, Deserialize)]
struct EmbeddingSection {
    model: Option<String>,
    dimension: Option<usize>,
    batch_size: Option<usize>,
    concurrency: Option<usize>,
    max_retries: Option<u32>,
    queue_ceiling: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkingSection {
    chunk_size_chars: Option<usize>,
    chunk_overlap_chars: Option<usize>,
    group_text_limit_chars: Option<usize>,
    group_time_window_seconds: Option<i64>,
    busy_chat_time_window_seconds: Option<i64>,
    busy_chat_author_threshold: Option<usize>,
    likely_answer_window_seconds: Option<i64>,
    short_answer_window_seconds: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
struct RetrievalSection {
    k: Option<usize>,
    min_similarity: Option<f32>,
}

#[derive(Debug, Default, Deserialize)]
struct QuerySection {
    max_length: Option<usize>,
    timeout_seconds: Option<u64>,
    rate_limit_per_minute: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct AnswerSection {
    model: Option<String>,
    max_tokens: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct JobsSection {
    max_concurrent: Option<usize>,
}

impl Config {
    /// Load `config.yml` from the working directory, or defaults.
    pub fn load() -> Self {
        Self::load_from_file("config.yml").unwrap_or_default()
    }

    /// Load configuration from a specific YAML file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        // .env first so env overrides see it
        let _ = dotenvy::dotenv();

        let content = fs::read_to_string(path.as_ref())?;
        let yaml: YamlConfig = serde_yaml::from_str(&content)
            .map_err(|e| Error::Internal(format!("failed to parse config file: {e}")))?;

        let mut config = Config::default();

        if let Some(embedding) = yaml.embedding {
            if let Some(model) = embedding.model {
                config.embedding_model = model;
            }
            if let Some(dim) = embedding.dimension {
                config.embedding_dimension = dim;
            } else if let Some(dim) = model_dimension(&config.embedding_model) {
                config.embedding_dimension = dim;
            }
            if let Some(v) = embedding.batch_size {
                config.embedding_batch_size = v;
            }
            if let Some(v) = embedding.concurrency {
                config.embedding_concurrency = v;
            }
            if let Some(v) = embedding.max_retries {
                config.embedding_max_retries = v;
            }
            if let Some(v) = embedding.queue_ceiling {
                config.embedding_queue_ceiling = v;
            }
        }
        if let Some(chunking) = yaml.chunking {
            if let Some(v) = chunking.chunk_size_chars {
                config.chunk_size_chars = v;
            }
            if let Some(v) = chunking.chunk_overlap_chars {
                config.chunk_overlap_chars = v;
            }
            if let Some(v) = chunking.group_text_limit_chars {
                config.group_text_limit_chars = v;
            }
            if let Some(v) = chunking.group_time_window_seconds {
                config.group_time_window_seconds = v;
            }
            if let Some(v) = chunking.busy_chat_time_window_seconds {
                config.busy_chat_time_window_seconds = v;
            }
            if let Some(v) = chunking.busy_chat_author_threshold {
                config.busy_chat_author_threshold = v;
            }
            if let Some(v) = chunking.likely_answer_window_seconds {
                config.likely_answer_window_seconds = v;
            }
            if let Some(v) = chunking.short_answer_window_seconds {
                config.short_answer_window_seconds = v;
            }
        }
        if let Some(retrieval) = yaml.retrieval {
            if let Some(v) = retrieval.k {
                config.retrieval_k = v;
            }
            if let Some(v) = retrieval.min_similarity {
                config.retrieval_min_similarity = v;
            }
        }
        if let Some(query) = yaml.query {
            if let Some(v) = query.max_length {
                config.query_max_length = v;
            }
            if let Some(v) = query.timeout_seconds {
                config.query_timeout_seconds = v;
            }
            if let Some(v) = query.rate_limit_per_minute {
                config.rate_limit_per_minute_per_tenant = v;
            }
        }
        if let Some(answer) = yaml.answer {
            if let Some(v) = answer.model {
                config.answer_model = v;
            }
            if let Some(v) = answer.max_tokens {
                config.answer_max_tokens = v;
            }
        }
        if let Some(jobs) = yaml.jobs {
            if let Some(v) = jobs.max_concurrent {
                config.max_concurrent_jobs = v;
            }
        }

        // Env overrides for the deployment-critical pair
        if let Ok(model) = std::env::var("RECALL_EMBEDDING_MODEL") {
            config.embedding_model = model;
            if let Some(dim) = model_dimension(&config.embedding_model) {
                config.embedding_dimension = dim;
            }
        }
        if let Ok(dim) = std::env::var("RECALL_EMBEDDING_DIMENSION") {
            if let Ok(parsed) = dim.parse::<usize>() {
                config.embedding_dimension = parsed;
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Check internal consistency. Called by `load_from_file`; callers
    /// building a `Config` by hand should call it themselves.
    pub fn validate(&self) -> Result<()> {
        if self.embedding_dimension == 0 {
            return Err(Error::Internal(
                "embedding_dimension must be positive".to_string(),
            ));
        }
        if let Some(expected) = model_dimension(&self.embedding_model) {
            if expected != self.embedding_dimension {
                return Err(Error::Internal(format!(
                    "embedding_dimension {} does not match model {} (expected {})",
                    self.embedding_dimension, self.embedding_model, expected
                )));
            }
        }
        if self.chunk_overlap_chars >= self.chunk_size_chars {
            return Err(Error::Internal(
                "chunk_overlap_chars must be smaller than chunk_size_chars".to_string(),
            ));
        }
        if self.retrieval_k == 0 || self.retrieval_k > crate::store::MAX_SEARCH_K {
            return Err(Error::Internal(format!(
                "retrieval_k must be between 1 and {}",
                crate::store::MAX_SEARCH_K
            )));
        }
        if self.embedding_batch_size == 0 || self.embedding_concurrency == 0 {
            return Err(Error::Internal(
                "embedding batch size and concurrency must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
