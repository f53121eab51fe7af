//! Capability interfaces for the external collaborators of both pipelines.
//!
//! Pipelines depend only on these traits. Concrete adapters are chosen once at
//! startup and shared behind `Arc`; implementations must be safe to call
//! concurrently and keep no mutable state besides their immutable handles.

use crate::error::{CapabilityError, IndexError};
use crate::models::{IndexRecord, IndexedDocument, MetadataFilter, ScoredRecord};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[async_trait]
pub trait EmbeddingModel: Send + Sync {
    fn model_id(&self) -> &str;

    fn dimensions(&self) -> usize;

    /// Returns exactly one vector per input, in input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, CapabilityError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GenerationOptions {
    /// Sampling randomness.
    pub temperature: f32,
    /// Output length cap.
    pub max_tokens: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImageInput {
    pub media_type: String,
    pub bytes: Vec<u8>,
}

#[async_trait]
pub trait ChatModel: Send + Sync {
    fn model_id(&self) -> &str;

    /// Whether [`ChatModel::generate_with_images`] is supported.
    fn supports_images(&self) -> bool {
        false
    }

    async fn generate(
        &self,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<String, CapabilityError>;

    async fn generate_with_images(
        &self,
        _prompt: &str,
        _images: &[ImageInput],
        _options: &GenerationOptions,
    ) -> Result<String, CapabilityError> {
        Err(CapabilityError::Rejected(format!(
            "model {} does not accept images",
            self.model_id()
        )))
    }
}

/// One classified token. Offsets are character offsets into the input, end exclusive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenPrediction {
    pub start: usize,
    pub end: usize,
    pub category: String,
    pub confidence: f32,
}

#[async_trait]
pub trait TokenClassifier: Send + Sync {
    async fn classify(&self, text: &str) -> Result<Vec<TokenPrediction>, CapabilityError>;
}

#[async_trait]
pub trait IndexStore: Send + Sync {
    /// Idempotent by chunk id: a record with an existing id replaces it.
    async fn upsert(&self, records: &[IndexRecord]) -> Result<(), IndexError>;

    /// Up to `top_k` records ordered by descending relevance.
    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: &MetadataFilter,
    ) -> Result<Vec<ScoredRecord>, IndexError>;

    /// Returns the number of records removed.
    async fn delete_by_document(&self, document_id: &str) -> Result<u64, IndexError>;

    /// Removes the records of `document_id` whose chunk id is not in `keep`.
    async fn delete_by_document_except(
        &self,
        document_id: &str,
        keep: &[String],
    ) -> Result<u64, IndexError>;

    /// Every document with at least one record, ordered by document id.
    async fn list_documents(&self) -> Result<Vec<IndexedDocument>, IndexError>;

    /// Makes prior writes visible to queries, where the backing store supports it.
    async fn refresh(&self) -> Result<(), IndexError> {
        Ok(())
    }
}
