//! Typed configuration for both pipelines.
//!
//! Values are supplied once at startup and checked with [`RagConfig::validate`]
//! before any external call is made.

use crate::error::RagError;
use crate::retry::RetryPolicy;
use std::time::Duration;

#[derive(Debug, Clone, Default)]
pub struct RagConfig {
    pub pii: PiiConfig,
    pub chunking: ChunkingConfig,
    pub embedding: EmbeddingConfig,
    pub generation: GenerationConfig,
    pub retrieval: RetrievalConfig,
    pub index: IndexConfig,
    pub ingestion: IngestionConfig,
    pub query: QueryConfig,
}

#[derive(Debug, Clone)]
pub struct PiiConfig {
    /// Minimum confidence for a merged entity span to reject a message.
    pub threshold: f32,
    /// Largest gap in characters between two tokens that still belong to one entity.
    pub merge_gap_chars: usize,
    /// Categories that count as PII. Empty means every non-`O` label.
    pub categories: Vec<String>,
}

impl Default for PiiConfig {
    fn default() -> Self {
        Self {
            threshold: 0.8,
            merge_gap_chars: 1,
            categories: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingConfig {
    pub max_chunk_chars: usize,
    pub overlap_chars: usize,
    /// How far before the window edge a paragraph or sentence break is searched for.
    pub boundary_tolerance_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chunk_chars: 1_200,
            overlap_chars: 120,
            boundary_tolerance_chars: 200,
        }
    }
}

impl ChunkingConfig {
    pub fn validate(&self) -> Result<(), RagError> {
        if self.max_chunk_chars == 0 {
            return Err(RagError::Configuration(
                "max_chunk_chars must be positive".to_string(),
            ));
        }
        if self.overlap_chars >= self.max_chunk_chars {
            return Err(RagError::Configuration(format!(
                "overlap_chars ({}) must be smaller than max_chunk_chars ({})",
                self.overlap_chars, self.max_chunk_chars
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    pub model_id: String,
    pub dimensions: usize,
    pub batch_size: usize,
    pub max_concurrent_batches: usize,
    pub retry: RetryPolicy,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model_id: "text-embedding-3-small".to_string(),
            dimensions: 1_536,
            batch_size: 16,
            max_concurrent_batches: 2,
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GenerationConfig {
    pub chat_model_id: String,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Upper bound on the characters of retrieved context placed in a prompt.
    pub context_budget_chars: usize,
    pub retry: RetryPolicy,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            chat_model_id: "gpt-4o-mini".to_string(),
            temperature: 0.0,
            max_tokens: 1_024,
            context_budget_chars: 8_000,
            retry: RetryPolicy {
                max_attempts: 2,
                base_delay: Duration::from_millis(250),
                max_delay: Duration::from_secs(2),
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetrievalConfig {
    pub top_k: usize,
    /// Hits scoring below this cosine similarity are not shown to the model.
    pub min_relevance: f32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 5,
            min_relevance: 0.2,
        }
    }
}

#[derive(Debug, Clone)]
pub struct IndexConfig {
    pub index_name: String,
    /// Ask the store to make writes visible before returning.
    pub refresh_on_write: bool,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            index_name: "pdf_chunks".to_string(),
            refresh_on_write: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct IngestionConfig {
    pub concurrency: usize,
    /// Delete a document's previous chunks before writing the new set.
    pub replace_existing: bool,
    pub screen_pages_for_pii: bool,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            replace_existing: true,
            screen_pages_for_pii: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct QueryConfig {
    pub timeout: Duration,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
        }
    }
}

pub fn validate_threshold(threshold: f32) -> Result<(), RagError> {
    if !(0.0..=1.0).contains(&threshold) {
        return Err(RagError::Configuration(format!(
            "pii threshold {threshold} is outside [0, 1]"
        )));
    }
    Ok(())
}

impl RagConfig {
    pub fn validate(&self) -> Result<(), RagError> {
        validate_threshold(self.pii.threshold)?;
        self.chunking.validate()?;

        require(!self.embedding.model_id.trim().is_empty(), "embedding_model_id is empty")?;
        require(self.embedding.dimensions > 0, "embedding dimensions must be positive")?;
        require(self.embedding.batch_size > 0, "embedding batch_size must be positive")?;
        require(
            self.embedding.max_concurrent_batches > 0,
            "embedding max_concurrent_batches must be positive",
        )?;
        self.embedding.retry.validate()?;

        require(!self.generation.chat_model_id.trim().is_empty(), "chat_model_id is empty")?;
        require(
            (0.0..=2.0).contains(&self.generation.temperature),
            "temperature must be within [0, 2]",
        )?;
        require(self.generation.max_tokens > 0, "max_tokens must be positive")?;
        require(
            self.generation.context_budget_chars > 0,
            "context_budget_chars must be positive",
        )?;
        self.generation.retry.validate()?;

        require(self.retrieval.top_k > 0, "top_k must be positive")?;
        require(
            (-1.0..=1.0).contains(&self.retrieval.min_relevance),
            "min_relevance must be within [-1, 1]",
        )?;
        require(!self.index.index_name.trim().is_empty(), "index_name is empty")?;
        require(self.ingestion.concurrency > 0, "ingestion concurrency must be positive")?;
        require(!self.query.timeout.is_zero(), "query timeout must be positive")?;
        Ok(())
    }
}

fn require(condition: bool, message: &str) -> Result<(), RagError> {
    if condition {
        Ok(())
    } else {
        Err(RagError::Configuration(message.to_string()))
    }
}
