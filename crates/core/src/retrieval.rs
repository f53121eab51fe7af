use crate::error::{EmbeddingError, RagError};
use crate::models::{sort_by_relevance, MetadataFilter, RetrievedContext};
use crate::traits::{EmbeddingModel, IndexStore};
use std::sync::Arc;
use tracing::debug;

/// Embeds a question and looks up its nearest chunks in the index.
///
/// The query vector is produced by the same model that embedded the chunks and
/// the store filter is pinned to that model id.
#[derive(Clone)]
pub struct Retriever {
    embedder: Arc<dyn EmbeddingModel>,
    store: Arc<dyn IndexStore>,
}

impl Retriever {
    pub fn new(embedder: Arc<dyn EmbeddingModel>, store: Arc<dyn IndexStore>) -> Self {
        Self { embedder, store }
    }

    pub fn store(&self) -> &Arc<dyn IndexStore> {
        &self.store
    }

    pub async fn retrieve(
        &self,
        question: &str,
        top_k: usize,
        filter: &MetadataFilter,
    ) -> Result<RetrievedContext, RagError> {
        if top_k == 0 {
            return Err(RagError::Configuration("top_k must be positive".to_string()));
        }

        let vector = self.embed_question(question).await?;

        let mut filter = filter.clone();
        filter.embedding_model_id = Some(self.embedder.model_id().to_string());

        let mut hits = self.store.query(&vector, top_k, &filter).await?;
        sort_by_relevance(&mut hits);
        hits.truncate(top_k);

        debug!(
            hits = hits.len(),
            best = hits.first().map(|hit| hit.score),
            "retrieval finished"
        );
        Ok(RetrievedContext { hits })
    }

    // Single attempt: a failure here usually means a misconfigured or absent model.
    async fn embed_question(&self, question: &str) -> Result<Vec<f32>, RagError> {
        let failed = |reason: String| {
            RagError::Embedding(EmbeddingError {
                reason,
                total: 1,
                failed_indices: vec![0],
                completed: Vec::new(),
            })
        };

        let mut vectors = self
            .embedder
            .embed(&[question.to_string()])
            .await
            .map_err(|error| failed(error.to_string()))?;

        let vector = match (vectors.pop(), vectors.is_empty()) {
            (Some(vector), true) => vector,
            _ => return Err(failed("expected exactly one query vector".to_string())),
        };
        if vector.len() != self.embedder.dimensions() {
            return Err(failed(format!(
                "query vector has {} dimensions, model declares {}",
                vector.len(),
                self.embedder.dimensions()
            )));
        }
        Ok(vector)
    }
}
