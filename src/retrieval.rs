//! Retrieval engine
//!
//! Embeds a sanitized query with the same model used at indexing time and
//! runs the tenant-scoped similarity search, hydrating deep links.

use std::sync::Arc;

use tracing::debug;

use crate::error::Result;
use crate::integrations::EmbeddingProvider;
use crate::models::ChunkMetadata;
use crate::store::{SearchFilters, Store};

#[derive(Debug, Clone)]
pub struct RetrievalConfig {
    /// Maximum results per query
    pub k: usize,
    /// Hits below this similarity are dropped
    pub min_similarity: f32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            k: 20,
            min_similarity: 0.0,
        }
    }
}

/// One retrieved chunk with its citation URL.
#[derive(Debug, Clone)]
pub struct RetrievedChunk {
    pub text: String,
    pub metadata: ChunkMetadata,
    pub similarity: f32,
    pub url: String,
}

pub struct RetrievalEngine {
    provider: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn Store>,
    config: RetrievalConfig,
}

impl RetrievalEngine {
    pub fn new(
        provider: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn Store>,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            provider,
            store,
            config,
        }
    }

    /// Search the tenant's indexed chunks for a sanitized query.
    ///
    /// Results are ordered by similarity descending, ties broken by newest
    /// primary timestamp.
    pub async fn search(
        &self,
        tenant_id: i64,
        query: &str,
        filters: &SearchFilters,
    ) -> Result<Vec<RetrievedChunk>> {
        let vectors = self.provider.embed(&[query.to_string()]).await?;
        let query_vector = vectors
            .into_iter()
            .next()
            .ok_or_else(|| crate::error::Error::upstream("embedding provider", "no query vector"))?;

        let hits = self
            .store
            .similarity_search(tenant_id, &query_vector, self.config.k, filters)
            .await?;

        debug!(
            tenant_id,
            hits = hits.len(),
            "similarity search returned results"
        );

        Ok(hits
            .into_iter()
            .filter(|hit| hit.similarity >= self.config.min_similarity)
            .map(|hit| RetrievedChunk {
                url: hit.chunk.deep_link(),
                text: hit.chunk.text,
                metadata: hit.chunk.metadata,
                similarity: hit.similarity,
            })
            .collect())
    }
}
