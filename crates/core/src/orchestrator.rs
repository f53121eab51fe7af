use crate::config::RagConfig;
use crate::error::RagError;
use crate::generation::{AnswerGenerator, NO_RELEVANT_CONTEXT_ANSWER};
use crate::models::{Answer, MetadataFilter, QueryRequest, QueryResponse};
use crate::pii::PiiDetector;
use crate::retrieval::Retriever;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Question asked of the chat model when summarizing whole documents.
pub const SUMMARY_QUESTION: &str = "Summarize each of these documents. \
What is covered on each page, and what are the key points?";

/// Where a query currently is. `Answered`, `Rejected` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryStage {
    Received,
    PiiChecked,
    Retrieved,
    Answered,
    Rejected,
    Failed,
}

/// Screens, retrieves and answers one user turn.
///
/// PII screening always runs first. Retrieval only happens for safe messages
/// and the chat model is only called when some chunk clears the relevance floor.
#[derive(Clone)]
pub struct QueryPipeline {
    detector: PiiDetector,
    retriever: Retriever,
    generator: AnswerGenerator,
    threshold: f32,
    top_k: usize,
    min_relevance: f32,
    timeout: Duration,
}

impl QueryPipeline {
    pub fn new(
        detector: PiiDetector,
        retriever: Retriever,
        generator: AnswerGenerator,
        config: &RagConfig,
    ) -> Self {
        Self {
            detector,
            retriever,
            generator,
            threshold: config.pii.threshold,
            top_k: config.retrieval.top_k,
            min_relevance: config.retrieval.min_relevance,
            timeout: config.query.timeout,
        }
    }

    pub async fn answer(&self, request: &QueryRequest) -> QueryResponse {
        self.answer_with_cancel(request, &CancellationToken::new()).await
    }

    /// Like [`QueryPipeline::answer`], but stops before the next stage once
    /// `cancel` fires. Calls already in flight are left to finish.
    pub async fn answer_with_cancel(
        &self,
        request: &QueryRequest,
        cancel: &CancellationToken,
    ) -> QueryResponse {
        self.respond(request, cancel, self.min_relevance).await
    }

    /// Summarizes the given documents from their most representative chunks.
    /// No relevance floor applies: every retrieved chunk belongs to a document
    /// the caller asked about.
    pub async fn summarize(&self, document_ids: &[String]) -> QueryResponse {
        if document_ids.is_empty() {
            let error = RagError::Configuration("no document ids to summarize".to_string());
            return QueryResponse::failed(format!("{}: {error}", error.kind()));
        }

        let request = QueryRequest {
            top_k: Some(self.top_k.saturating_mul(document_ids.len())),
            filter: MetadataFilter {
                document_ids: document_ids.to_vec(),
                ..MetadataFilter::default()
            },
            ..QueryRequest::new(SUMMARY_QUESTION)
        };
        self.respond(&request, &CancellationToken::new(), f32::MIN).await
    }

    async fn respond(
        &self,
        request: &QueryRequest,
        cancel: &CancellationToken,
        floor: f32,
    ) -> QueryResponse {
        let query_id = Uuid::new_v4();
        let span = info_span!("query", %query_id);

        async move {
            let run = self.run(request, cancel, floor);
            let response = match tokio::time::timeout(self.timeout, run).await {
                Ok(Ok(response)) => response,
                Ok(Err(error)) => {
                    warn!(kind = error.kind(), %error, stage = ?QueryStage::Failed, "query failed");
                    QueryResponse::failed(format!("{}: {error}", error.kind()))
                }
                Err(_) => {
                    let error = RagError::Timeout(self.timeout);
                    warn!(stage = ?QueryStage::Failed, %error, "query timed out");
                    QueryResponse::failed(format!("{}: {error}", error.kind()))
                }
            };
            info!(status = ?response.status, citations = response.citations.len(), "query finished");
            response
        }
        .instrument(span)
        .await
    }

    async fn run(
        &self,
        request: &QueryRequest,
        cancel: &CancellationToken,
        floor: f32,
    ) -> Result<QueryResponse, RagError> {
        debug!(stage = ?QueryStage::Received, history = request.history.len());
        ensure_active(cancel)?;

        let threshold = request.threshold.unwrap_or(self.threshold);
        let screening = match self.detector.screen(&request.message, threshold).await {
            Ok(screening) => screening,
            Err(RagError::DetectorUnavailable(reason)) => {
                warn!(%reason, stage = ?QueryStage::Rejected, "pii detector unavailable, rejecting");
                return Ok(QueryResponse::rejected(Vec::new(), "pii detector unavailable"));
            }
            Err(error) => return Err(error),
        };

        if let Some(message) = screening.rejection_message() {
            info!(
                findings = screening.findings.len(),
                stage = ?QueryStage::Rejected,
                "message rejected for pii"
            );
            return Ok(QueryResponse::rejected(screening.findings, message));
        }
        debug!(stage = ?QueryStage::PiiChecked, threshold);
        ensure_active(cancel)?;

        let top_k = request.top_k.unwrap_or(self.top_k);
        let context = self
            .retriever
            .retrieve(&request.message, top_k, &request.filter)
            .await?;
        let candidates = context.hits.len();
        let relevant = context.above(floor);
        debug!(
            stage = ?QueryStage::Retrieved,
            candidates,
            relevant = relevant.hits.len(),
            best = relevant.best_score()
        );

        if relevant.is_empty() {
            return Ok(QueryResponse::answered(Answer {
                text: NO_RELEVANT_CONTEXT_ANSWER.to_string(),
                citations: Vec::new(),
            }));
        }
        ensure_active(cancel)?;

        let answer = self
            .generator
            .generate(&request.message, &request.history, &relevant)
            .await?;
        debug!(stage = ?QueryStage::Answered, citations = answer.citations.len());
        Ok(QueryResponse::answered(answer))
    }
}

fn ensure_active(cancel: &CancellationToken) -> Result<(), RagError> {
    if cancel.is_cancelled() {
        Err(RagError::Cancelled)
    } else {
        Ok(())
    }
}
