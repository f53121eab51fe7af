use crate::config::EmbeddingConfig;
use crate::error::{CapabilityError, EmbeddingError};
use crate::retry::RetryPolicy;
use crate::traits::EmbeddingModel;
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tracing::{debug, warn};

pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = 128;

/// Hashes character trigrams into a fixed number of buckets. Deterministic and
/// local, which makes it useful for offline runs and tests.
#[derive(Debug, Clone)]
pub struct CharacterNgramEmbedder {
    pub dimensions: usize,
    model_id: String,
}

impl Default for CharacterNgramEmbedder {
    fn default() -> Self {
        Self::new(DEFAULT_EMBEDDING_DIMENSIONS)
    }
}

impl CharacterNgramEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            model_id: format!("char-trigram-{dimensions}"),
        }
    }

    pub fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; self.dimensions.max(1)];
        let lowered = text.to_lowercase();
        let chars: Vec<char> = lowered.chars().collect();

        if chars.is_empty() {
            return vector;
        }

        for window in chars.windows(3) {
            let token = window.iter().collect::<String>();
            let mut hash = 1469598103934665603u64;
            for byte in token.bytes() {
                hash ^= byte as u64;
                hash = hash.wrapping_mul(1099511628211);
            }
            let bucket = (hash % vector.len() as u64) as usize;
            vector[bucket] += 1.0;
        }

        let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for value in &mut vector {
                *value /= magnitude;
            }
        }

        vector
    }
}

#[async_trait]
impl EmbeddingModel for CharacterNgramEmbedder {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, CapabilityError> {
        Ok(texts.iter().map(|text| self.embed_one(text)).collect())
    }
}

pub fn cosine_similarity(left: &[f32], right: &[f32]) -> f32 {
    if left.len() != right.len() || left.is_empty() {
        return 0.0;
    }
    let dot = left.iter().zip(right).map(|(a, b)| a * b).sum::<f32>();
    let norm_left = left.iter().map(|a| a * a).sum::<f32>().sqrt();
    let norm_right = right.iter().map(|b| b * b).sum::<f32>().sqrt();
    if norm_left == 0.0 || norm_right == 0.0 {
        0.0
    } else {
        dot / (norm_left * norm_right)
    }
}

/// Batches texts through an [`EmbeddingModel`], retrying transient failures.
///
/// Every input either receives a vector or is reported in
/// [`EmbeddingError::failed_indices`].
#[derive(Clone)]
pub struct EmbeddingClient {
    model: Arc<dyn EmbeddingModel>,
    batch_size: usize,
    max_concurrent_batches: usize,
    retry: RetryPolicy,
}

impl EmbeddingClient {
    pub fn new(model: Arc<dyn EmbeddingModel>, config: &EmbeddingConfig) -> Self {
        Self {
            model,
            batch_size: config.batch_size.max(1),
            max_concurrent_batches: config.max_concurrent_batches.max(1),
            retry: config.retry,
        }
    }

    pub fn model_id(&self) -> &str {
        self.model.model_id()
    }

    pub fn model(&self) -> &Arc<dyn EmbeddingModel> {
        &self.model
    }

    pub async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut slots: Vec<Option<Vec<f32>>> = vec![None; texts.len()];
        let mut last_reason = None;

        let batches: Vec<(usize, Vec<String>)> = texts
            .chunks(self.batch_size)
            .enumerate()
            .map(|(batch_no, batch)| (batch_no * self.batch_size, batch.to_vec()))
            .collect();

        let mut results = stream::iter(batches)
            .map(move |(offset, batch)| async move {
                let result = self.embed_batch(&batch).await;
                (offset, batch.len(), result)
            })
            .buffer_unordered(self.max_concurrent_batches);

        while let Some((offset, size, result)) = results.next().await {
            match result {
                Ok(vectors) => {
                    for (position, vector) in vectors.into_iter().enumerate() {
                        slots[offset + position] = Some(vector);
                    }
                }
                Err(error) => {
                    warn!(
                        model = self.model.model_id(),
                        offset,
                        size,
                        %error,
                        "embedding batch failed"
                    );
                    last_reason = Some(error.to_string());
                }
            }
        }

        let failed_indices: Vec<usize> = slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_none())
            .map(|(index, _)| index)
            .collect();

        if failed_indices.is_empty() {
            debug!(model = self.model.model_id(), count = texts.len(), "embedded texts");
            return Ok(slots.into_iter().flatten().collect());
        }

        Err(EmbeddingError {
            reason: last_reason.unwrap_or_else(|| "embedding failed".to_string()),
            total: texts.len(),
            failed_indices,
            completed: slots
                .into_iter()
                .enumerate()
                .filter_map(|(index, slot)| slot.map(|vector| (index, vector)))
                .collect(),
        })
    }

    async fn embed_batch(&self, batch: &[String]) -> Result<Vec<Vec<f32>>, CapabilityError> {
        let vectors = self
            .retry
            .run("embed", || self.model.embed(batch))
            .await?;

        if vectors.len() != batch.len() {
            return Err(CapabilityError::Rejected(format!(
                "embedding model returned {} vectors for {} inputs",
                vectors.len(),
                batch.len()
            )));
        }

        let expected = self.model.dimensions();
        if let Some(bad) = vectors.iter().find(|vector| vector.len() != expected) {
            return Err(CapabilityError::Rejected(format!(
                "embedding dimension {} != {expected}",
                bad.len()
            )));
        }

        Ok(vectors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedEmbedder;
    use std::time::Duration;

    fn config(batch_size: usize) -> EmbeddingConfig {
        EmbeddingConfig {
            model_id: "scripted".to_string(),
            dimensions: 4,
            batch_size,
            max_concurrent_batches: 2,
            retry: RetryPolicy {
                max_attempts: 3,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(2),
            },
        }
    }

    fn texts(count: usize) -> Vec<String> {
        (0..count).map(|index| format!("text {index}")).collect()
    }

    #[test]
    fn ngram_embedder_is_deterministic() {
        let embedder = CharacterNgramEmbedder::default();
        let first = embedder.embed_one("Hydraulic pressure and flow");
        let second = embedder.embed_one("Hydraulic pressure and flow");
        assert_eq!(first, second);
    }

    #[test]
    fn ngram_embedder_outputs_expected_length() {
        let embedder = CharacterNgramEmbedder::new(32);
        assert_eq!(embedder.embed_one("abc").len(), 32);
    }

    #[test]
    fn cosine_of_identical_vectors_is_one() {
        let embedder = CharacterNgramEmbedder::default();
        let vector = embedder.embed_one("Alice Smith lives in Paris.");
        assert!((cosine_similarity(&vector, &vector) - 1.0).abs() < 1e-5);
        assert_eq!(cosine_similarity(&vector, &[]), 0.0);
    }

    #[tokio::test]
    async fn vectors_keep_input_order_across_batches() {
        let model = Arc::new(ScriptedEmbedder::new(4));
        let client = EmbeddingClient::new(model.clone(), &config(3));

        let inputs = texts(8);
        let vectors = client.embed_texts(&inputs).await.expect("all batches succeed");

        assert_eq!(vectors.len(), 8);
        for (index, vector) in vectors.iter().enumerate() {
            assert_eq!(vector, &ScriptedEmbedder::vector_for(&inputs[index], 4));
        }
        assert_eq!(model.calls(), 3);
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let model = Arc::new(ScriptedEmbedder::new(4).failing_transiently_first(1));
        let client = EmbeddingClient::new(model.clone(), &config(10));

        let vectors = client.embed_texts(&texts(2)).await.expect("retry recovers");
        assert_eq!(vectors.len(), 2);
        assert_eq!(model.calls(), 2);
    }

    #[tokio::test]
    async fn exhausted_batches_report_failed_indices() {
        let model = Arc::new(ScriptedEmbedder::new(4).failing_on("text 4"));
        let client = EmbeddingClient::new(model, &config(2));

        let error = client
            .embed_texts(&texts(6))
            .await
            .expect_err("batch with text 4 fails");

        assert_eq!(error.failed_indices, vec![4, 5]);
        assert_eq!(error.total, 6);
        let completed: Vec<usize> = error.completed.iter().map(|(index, _)| *index).collect();
        let mut completed = completed;
        completed.sort_unstable();
        assert_eq!(completed, vec![0, 1, 2, 3]);
        assert!(!error.is_total());
    }

    #[tokio::test]
    async fn wrong_dimension_counts_as_failure() {
        let model = Arc::new(ScriptedEmbedder::new(4).reporting_dimensions(8));
        let client = EmbeddingClient::new(model, &config(4));

        let error = client.embed_texts(&texts(2)).await.expect_err("dimension mismatch");
        assert!(error.is_total());
    }
}
