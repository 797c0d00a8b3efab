//! External provider interfaces
//!
//! The engine consumes embeddings and completions through these traits;
//! [`openai`] carries the production implementations. Tests plug in
//! deterministic local providers.

pub mod openai;

use async_trait::async_trait;

use crate::error::Result;

/// Text to fixed-dimension vector provider.
///
/// Every returned vector must have exactly `dimension()` elements; the
/// storage layer rejects anything else.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    fn dimension(&self) -> usize;
}

/// Prompt to text completion provider.
#[async_trait]
pub trait AnswerModel: Send + Sync {
    async fn complete(&self, system: &str, user: &str, max_output_tokens: u32) -> Result<String>;
}

/// Blob storage for media payloads (future image path; unused by the text
/// pipeline).
#[async_trait]
pub trait BlobStorage: Send + Sync {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<String>;

    async fn get(&self, key: &str) -> Result<Vec<u8>>;
}

pub use openai::{OpenAiCompleter, OpenAiEmbedder};
