//! Document ingestion: extract, chunk, embed and index one PDF at a time.
//!
//! Each document yields an [`IngestionReport`]. A document never aborts a batch:
//! failures are reported per document and successful chunks are indexed even
//! when some of their siblings could not be embedded.

use crate::chunking::chunk_pages;
use crate::config::{ChunkingConfig, IngestionConfig, RagConfig};
use crate::embeddings::EmbeddingClient;
use crate::error::RagError;
use crate::extractor::{ExtractionMode, PdfExtractor};
use crate::models::{
    Document, EmbeddingVector, IndexRecord, IndexedDocument, IngestionReport, IngestionStatus,
    Page, PageContent,
};
use crate::pii::PiiDetector;
use crate::source::DocumentSource;
use crate::traits::{ChatModel, GenerationOptions, ImageInput, IndexStore};
use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tracing::{debug, info, info_span, warn, Instrument};

const PAGE_DESCRIPTION_PROMPT: &str = "Transcribe all readable text on this document page. \
Then briefly describe any tables, charts, figures or images it contains and what they show.";

pub struct IngestionPipeline {
    extractor: Arc<dyn PdfExtractor>,
    embeddings: EmbeddingClient,
    store: Arc<dyn IndexStore>,
    chunking: ChunkingConfig,
    ingestion: IngestionConfig,
    pii_threshold: f32,
    detector: Option<PiiDetector>,
    vision: Option<Arc<dyn ChatModel>>,
    vision_options: GenerationOptions,
}

impl IngestionPipeline {
    pub fn new(
        extractor: Arc<dyn PdfExtractor>,
        embeddings: EmbeddingClient,
        store: Arc<dyn IndexStore>,
        config: &RagConfig,
    ) -> Self {
        Self {
            extractor,
            embeddings,
            store,
            chunking: config.chunking,
            ingestion: config.ingestion.clone(),
            pii_threshold: config.pii.threshold,
            detector: None,
            vision: None,
            vision_options: GenerationOptions {
                temperature: config.generation.temperature,
                max_tokens: config.generation.max_tokens,
            },
        }
    }

    /// Detector used when page screening is switched on in [`IngestionConfig`].
    pub fn with_pii_detector(mut self, detector: PiiDetector) -> Self {
        self.detector = Some(detector);
        self
    }

    /// Pages are rendered and described by `chat` when it accepts images.
    pub fn with_vision_model(mut self, chat: Arc<dyn ChatModel>) -> Self {
        self.vision = Some(chat);
        self
    }

    pub fn mode(&self) -> ExtractionMode {
        ExtractionMode::for_chat_model(
            self.vision
                .as_ref()
                .is_some_and(|chat| chat.supports_images()),
        )
    }

    pub async fn ingest(&self, document: Document) -> IngestionReport {
        let span = info_span!(
            "ingest",
            document_id = %document.document_id,
            source = %document.source
        );

        async move {
            let document = Arc::new(document);
            match self.run(document.clone()).await {
                Ok(report) => {
                    info!(
                        pages = report.page_count,
                        chunks = report.chunk_count,
                        indexed = report.indexed_count,
                        failed = report.failed_chunks.len(),
                        "document ingested"
                    );
                    report
                }
                Err(error) => {
                    warn!(kind = error.kind(), %error, "document ingestion failed");
                    IngestionReport::failed(
                        &document.document_id,
                        &document.source,
                        format!("{}: {error}", error.kind()),
                    )
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Ingests documents concurrently, bounded by the configured concurrency.
    /// Reports come back in input order.
    pub async fn ingest_all(&self, documents: Vec<Document>) -> Vec<IngestionReport> {
        stream::iter(documents)
            .map(move |document| self.ingest(document))
            .buffered(self.ingestion.concurrency.max(1))
            .collect()
            .await
    }

    /// Fetches each location from `source` and ingests it. A location that
    /// cannot be fetched gets a failed report of its own.
    pub async fn ingest_from(
        &self,
        source: &dyn DocumentSource,
        locations: &[String],
    ) -> Vec<IngestionReport> {
        stream::iter(locations.iter().cloned())
            .map(move |location| async move {
                match source.fetch(&location).await {
                    Ok(document) => self.ingest(document).await,
                    Err(error) => {
                        warn!(location = %location, %error, "document fetch failed");
                        let key = source.key_for(&location);
                        IngestionReport::failed(
                            &Document::id_for(&key),
                            &key,
                            format!("{}: {error}", error.kind()),
                        )
                    }
                }
            })
            .buffered(self.ingestion.concurrency.max(1))
            .collect()
            .await
    }

    pub async fn delete_document(&self, document_id: &str) -> Result<u64, RagError> {
        let deleted = self.store.delete_by_document(document_id).await?;
        info!(document_id, deleted, "document removed from index");
        Ok(deleted)
    }

    pub async fn list_documents(&self) -> Result<Vec<IndexedDocument>, RagError> {
        Ok(self.store.list_documents().await?)
    }

    async fn run(&self, document: Arc<Document>) -> Result<IngestionReport, RagError> {
        let screening = self.page_screening()?;

        let mode = self.mode();
        let extractor = self.extractor.clone();
        let target = document.clone();
        let mut pages = tokio::task::spawn_blocking(move || extractor.extract(&target, mode))
            .await
            .map_err(|error| RagError::Extraction(format!("extraction task failed: {error}")))??;
        let page_count = pages.len() as u32;

        if mode == ExtractionMode::Multimodal {
            pages = self.describe_pages(pages).await;
        }

        let pages_without_text = pages
            .iter()
            .filter(|page| page.text().trim().is_empty())
            .count() as u32;

        let mut pages_with_pii = 0u32;
        if let Some(detector) = screening {
            let mut kept = Vec::with_capacity(pages.len());
            for page in pages {
                let screened = detector.screen(page.text(), self.pii_threshold).await?;
                if screened.is_safe {
                    kept.push(page);
                } else {
                    debug!(
                        page = page.number,
                        findings = screened.findings.len(),
                        "page excluded for pii"
                    );
                    pages_with_pii += 1;
                }
            }
            pages = kept;
        }

        let chunks = chunk_pages(&document.document_id, &pages, &self.chunking)?;
        let texts: Vec<String> = chunks.iter().map(|chunk| chunk.text.clone()).collect();

        let (embedded, failed_chunks) = match self.embeddings.embed_texts(&texts).await {
            Ok(vectors) => (vectors.into_iter().enumerate().collect::<Vec<_>>(), Vec::new()),
            Err(error) if error.is_total() => return Err(error.into()),
            Err(error) => (error.completed, error.failed_indices),
        };

        let ingested_at = Utc::now();
        let model_id = self.embeddings.model_id().to_string();
        let records: Vec<IndexRecord> = embedded
            .into_iter()
            .map(|(index, values)| {
                let chunk = &chunks[index];
                IndexRecord::new(
                    chunk,
                    &document.source,
                    EmbeddingVector {
                        chunk_id: chunk.chunk_id.clone(),
                        model_id: model_id.clone(),
                        values,
                    },
                    ingested_at,
                )
            })
            .collect();

        self.store.upsert(&records).await?;
        if self.ingestion.replace_existing {
            let fresh: Vec<String> = records.iter().map(|record| record.chunk_id.clone()).collect();
            let removed = self
                .store
                .delete_by_document_except(&document.document_id, &fresh)
                .await?;
            debug!(removed, "stale chunks removed");
        }

        let status = if failed_chunks.is_empty() {
            IngestionStatus::Ingested
        } else {
            IngestionStatus::Partial {
                failed_chunk_count: failed_chunks.len(),
            }
        };

        Ok(IngestionReport {
            document_id: document.document_id.clone(),
            source: document.source.clone(),
            status,
            page_count,
            chunk_count: chunks.len(),
            indexed_count: records.len(),
            failed_chunks,
            pages_with_pii,
            pages_without_text,
        })
    }

    fn page_screening(&self) -> Result<Option<&PiiDetector>, RagError> {
        if !self.ingestion.screen_pages_for_pii {
            return Ok(None);
        }
        self.detector.as_ref().map(Some).ok_or_else(|| {
            RagError::Configuration("page pii screening is on but no detector is set".to_string())
        })
    }

    async fn describe_pages(&self, pages: Vec<Page>) -> Vec<Page> {
        let Some(chat) = self.vision.as_ref() else {
            return pages;
        };

        let mut described = Vec::with_capacity(pages.len());
        for page in pages {
            let content = match page.content {
                PageContent::Image { media_type, bytes } => {
                    let image = ImageInput { media_type, bytes };
                    match chat
                        .generate_with_images(
                            PAGE_DESCRIPTION_PROMPT,
                            std::slice::from_ref(&image),
                            &self.vision_options,
                        )
                        .await
                    {
                        Ok(text) => PageContent::Text(Some(text)),
                        Err(error) => {
                            warn!(page = page.number, %error, "page description failed");
                            PageContent::Text(None)
                        }
                    }
                }
                text => text,
            };
            described.push(Page { content, ..page });
        }
        described
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EmbeddingConfig;
    use crate::embeddings::CharacterNgramEmbedder;
    use crate::extractor::{LopdfExtractor, PageRenderer, RenderedPage};
    use crate::retry::RetryPolicy;
    use crate::source::LocalDocumentSource;
    use crate::testing::{
        pdf_with_pages, MemoryIndex, RecordingChat, ScriptedClassifier, ScriptedEmbedder,
    };
    use std::time::Duration;

    struct ByteRenderer;

    impl PageRenderer for ByteRenderer {
        fn render(&self, _pdf: &[u8], page_number: u32) -> Result<RenderedPage, RagError> {
            Ok(RenderedPage {
                media_type: "image/png".to_string(),
                bytes: vec![page_number as u8],
            })
        }
    }

    fn config() -> RagConfig {
        let mut config = RagConfig::default();
        config.chunking = ChunkingConfig {
            max_chunk_chars: 60,
            overlap_chars: 10,
            boundary_tolerance_chars: 20,
        };
        config.embedding = EmbeddingConfig {
            batch_size: 1,
            retry: RetryPolicy {
                max_attempts: 2,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(2),
            },
            ..EmbeddingConfig::default()
        };
        config
    }

    fn pipeline(
        embedder: Arc<dyn crate::traits::EmbeddingModel>,
        store: Arc<MemoryIndex>,
        config: &RagConfig,
    ) -> IngestionPipeline {
        IngestionPipeline::new(
            Arc::new(LopdfExtractor::default()),
            EmbeddingClient::new(embedder, &config.embedding),
            store,
            config,
        )
    }

    fn report_pdf() -> Document {
        Document::from_bytes(
            "reports/q1.pdf",
            pdf_with_pages(&[
                "Alice Smith lives in Paris. She works on the quarterly revenue report every spring.",
                "The second page talks about logistics. Shipments leave the warehouse on Mondays.",
            ]),
        )
    }

    #[tokio::test]
    async fn text_document_is_fully_indexed() {
        let store = Arc::new(MemoryIndex::default());
        let config = config();
        let pipeline = pipeline(Arc::new(CharacterNgramEmbedder::new(32)), store.clone(), &config);

        let report = pipeline.ingest(report_pdf()).await;

        assert_eq!(report.status, IngestionStatus::Ingested);
        assert_eq!(report.page_count, 2);
        assert!(report.chunk_count > 1);
        assert_eq!(report.indexed_count, report.chunk_count);
        assert_eq!(store.len(), report.chunk_count);
        assert!(store
            .records()
            .iter()
            .all(|record| record.embedding_model_id == "char-trigram-32"
                && record.source == "reports/q1.pdf"));
    }

    #[tokio::test]
    async fn reingesting_the_same_document_keeps_the_record_count() {
        for replace_existing in [true, false] {
            let store = Arc::new(MemoryIndex::default());
            let mut config = config();
            config.ingestion.replace_existing = replace_existing;
            let pipeline = pipeline(Arc::new(CharacterNgramEmbedder::new(32)), store.clone(), &config);

            pipeline.ingest(report_pdf()).await;
            let once = store.len();
            pipeline.ingest(report_pdf()).await;

            assert!(once > 0);
            assert_eq!(store.len(), once, "replace_existing = {replace_existing}");
        }
    }

    #[tokio::test]
    async fn changed_chunking_replaces_stale_chunks() {
        let store = Arc::new(MemoryIndex::default());
        let config = config();
        pipeline(Arc::new(CharacterNgramEmbedder::new(32)), store.clone(), &config)
            .ingest(report_pdf())
            .await;

        let mut wider = config.clone();
        wider.chunking.max_chunk_chars = 500;
        let report = pipeline(Arc::new(CharacterNgramEmbedder::new(32)), store.clone(), &wider)
            .ingest(report_pdf())
            .await;

        assert_eq!(store.len(), report.chunk_count);
    }

    #[tokio::test]
    async fn corrupt_bytes_fail_with_extraction_error_and_index_nothing() {
        let store = Arc::new(MemoryIndex::default());
        let config = config();
        let pipeline = pipeline(Arc::new(ScriptedEmbedder::new(8)), store.clone(), &config);

        let report = pipeline
            .ingest(Document::from_bytes("junk.pdf", b"definitely not a pdf".to_vec()))
            .await;

        match &report.status {
            IngestionStatus::Failed { reason } => assert!(reason.starts_with("ExtractionError")),
            other => panic!("expected failure, got {other:?}"),
        }
        assert_eq!(store.len(), 0);
    }

    #[tokio::test]
    async fn chunks_that_fail_embedding_are_reported_and_the_rest_indexed() {
        let store = Arc::new(MemoryIndex::default());
        let config = config();
        let document = report_pdf();

        let pages = LopdfExtractor::default()
            .extract(&document, ExtractionMode::Text)
            .unwrap();
        let chunks = chunk_pages(&document.document_id, &pages, &config.chunking).unwrap();
        let poisoned = chunks[1].text.clone();
        let expected_failures = chunks.iter().filter(|chunk| chunk.text == poisoned).count();

        let embedder = Arc::new(ScriptedEmbedder::new(8).failing_on(&poisoned));
        let report = pipeline(embedder, store.clone(), &config).ingest(document).await;

        assert_eq!(
            report.status,
            IngestionStatus::Partial {
                failed_chunk_count: expected_failures
            }
        );
        assert_eq!(report.failed_chunks, vec![1]);
        assert_eq!(report.indexed_count, chunks.len() - expected_failures);
        assert_eq!(store.len(), chunks.len() - expected_failures);
        assert!(store.records().iter().all(|record| record.text != poisoned));
    }

    #[tokio::test]
    async fn total_embedding_failure_keeps_previous_records() {
        let store = Arc::new(MemoryIndex::default());
        let config = config();
        pipeline(Arc::new(ScriptedEmbedder::new(8)), store.clone(), &config)
            .ingest(report_pdf())
            .await;
        let before = store.len();

        let broken = Arc::new(ScriptedEmbedder::new(8).failing_on(" "));
        let report = pipeline(broken, store.clone(), &config).ingest(report_pdf()).await;

        match &report.status {
            IngestionStatus::Failed { reason } => assert!(reason.starts_with("EmbeddingError")),
            other => panic!("expected failure, got {other:?}"),
        }
        assert_eq!(store.len(), before);
    }

    #[tokio::test]
    async fn upsert_failure_fails_the_document() {
        let config = config();
        let report = pipeline(
            Arc::new(ScriptedEmbedder::new(8)),
            Arc::new(MemoryIndex::failing_writes()),
            &config,
        )
        .ingest(report_pdf())
        .await;

        match &report.status {
            IngestionStatus::Failed { reason } => assert!(reason.starts_with("IndexError")),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn blank_pages_yield_an_empty_but_successful_report() {
        let store = Arc::new(MemoryIndex::default());
        let config = config();
        let report = pipeline(Arc::new(ScriptedEmbedder::new(8)), store.clone(), &config)
            .ingest(Document::from_bytes("blank.pdf", pdf_with_pages(&["", ""])))
            .await;

        assert_eq!(report.status, IngestionStatus::Ingested);
        assert_eq!(report.chunk_count, 0);
        assert_eq!(report.pages_without_text, 2);
        assert_eq!(store.len(), 0);
    }

    #[tokio::test]
    async fn pages_with_pii_are_left_out_when_screening() {
        let store = Arc::new(MemoryIndex::default());
        let mut config = config();
        config.ingestion.screen_pages_for_pii = true;
        let classifier = ScriptedClassifier::tagging(
            "Alice Smith lives in Paris.",
            "Alice Smith",
            "PERSON",
            0.97,
        );
        let detector = PiiDetector::new(Arc::new(classifier), &config.pii);
        let pipeline = pipeline(Arc::new(ScriptedEmbedder::new(8)), store.clone(), &config)
            .with_pii_detector(detector);

        let report = pipeline
            .ingest(Document::from_bytes(
                "people.pdf",
                pdf_with_pages(&["Alice Smith lives in Paris."]),
            ))
            .await;

        assert_eq!(report.status, IngestionStatus::Ingested);
        assert_eq!(report.pages_with_pii, 1);
        assert_eq!(report.chunk_count, 0);
        assert_eq!(store.len(), 0);
    }

    #[tokio::test]
    async fn screening_without_detector_is_a_configuration_failure() {
        let mut config = config();
        config.ingestion.screen_pages_for_pii = true;
        let report = pipeline(
            Arc::new(ScriptedEmbedder::new(8)),
            Arc::new(MemoryIndex::default()),
            &config,
        )
        .ingest(report_pdf())
        .await;

        assert!(matches!(
            &report.status,
            IngestionStatus::Failed { reason } if reason.starts_with("ConfigurationError")
        ));
    }

    #[tokio::test]
    async fn unavailable_detector_fails_the_document_closed() {
        let store = Arc::new(MemoryIndex::default());
        let mut config = config();
        config.ingestion.screen_pages_for_pii = true;
        let detector = PiiDetector::new(Arc::new(ScriptedClassifier::unavailable()), &config.pii);
        let report = pipeline(Arc::new(ScriptedEmbedder::new(8)), store.clone(), &config)
            .with_pii_detector(detector)
            .ingest(report_pdf())
            .await;

        assert!(matches!(
            &report.status,
            IngestionStatus::Failed { reason } if reason.starts_with("DetectorUnavailableError")
        ));
        assert_eq!(store.len(), 0);
    }

    #[tokio::test]
    async fn vision_model_describes_rendered_pages() {
        let store = Arc::new(MemoryIndex::default());
        let config = config();
        let chat = Arc::new(RecordingChat::replying("A chart of revenue").with_images());
        let pipeline = IngestionPipeline::new(
            Arc::new(LopdfExtractor::with_renderer(Arc::new(ByteRenderer))),
            EmbeddingClient::new(Arc::new(ScriptedEmbedder::new(8)), &config.embedding),
            store.clone(),
            &config,
        )
        .with_vision_model(chat.clone());

        assert_eq!(pipeline.mode(), ExtractionMode::Multimodal);
        let report = pipeline.ingest(report_pdf()).await;

        assert_eq!(report.status, IngestionStatus::Ingested);
        assert_eq!(chat.prompts().len(), 2);
        let texts: Vec<String> = store.records().into_iter().map(|record| record.text).collect();
        assert!(texts.iter().any(|text| text.contains("A chart of revenue (image 1)")));
        assert!(texts.iter().any(|text| text.contains("(image 2)")));
    }

    #[tokio::test]
    async fn text_only_chat_keeps_text_mode() {
        let config = config();
        let pipeline = pipeline(
            Arc::new(ScriptedEmbedder::new(8)),
            Arc::new(MemoryIndex::default()),
            &config,
        )
        .with_vision_model(Arc::new(RecordingChat::replying("unused")));
        assert_eq!(pipeline.mode(), ExtractionMode::Text);
    }

    #[tokio::test]
    async fn batch_reports_follow_input_order() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        std::fs::write(dir.path().join("good.pdf"), pdf_with_pages(&["Shipping notes."]))?;
        std::fs::write(dir.path().join("bad.pdf"), b"%PDF-1.4\n%broken")?;

        let store = Arc::new(MemoryIndex::default());
        let config = config();
        let pipeline = pipeline(Arc::new(ScriptedEmbedder::new(8)), store.clone(), &config);
        let source = LocalDocumentSource::new(dir.path());
        let locations = vec![
            "good.pdf".to_string(),
            "bad.pdf".to_string(),
            "missing.pdf".to_string(),
        ];

        let reports = pipeline.ingest_from(&source, &locations).await;

        assert_eq!(reports.len(), 3);
        assert_eq!(reports[0].status, IngestionStatus::Ingested);
        assert!(matches!(
            &reports[1].status,
            IngestionStatus::Failed { reason } if reason.starts_with("ExtractionError")
        ));
        assert!(matches!(
            &reports[2].status,
            IngestionStatus::Failed { reason } if reason.starts_with("SourceError")
        ));
        assert!(store.len() > 0);

        let deleted = pipeline.delete_document(&reports[0].document_id).await?;
        assert_eq!(deleted as usize, reports[0].indexed_count);
        assert_eq!(store.len(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn failed_rewrite_keeps_previous_records() {
        let store = Arc::new(MemoryIndex::default());
        let config = config();
        let pipeline = pipeline(Arc::new(ScriptedEmbedder::new(8)), store.clone(), &config);

        assert_eq!(pipeline.ingest(report_pdf()).await.status, IngestionStatus::Ingested);
        let before = store.records();

        store.set_failing_writes(true);
        let report = pipeline.ingest(report_pdf()).await;

        assert!(matches!(
            &report.status,
            IngestionStatus::Failed { reason } if reason.starts_with("IndexError")
        ));
        assert_eq!(store.records(), before);
    }

    #[tokio::test]
    async fn blank_reingest_clears_previous_records() {
        let store = Arc::new(MemoryIndex::default());
        let config = config();
        let pipeline = pipeline(Arc::new(ScriptedEmbedder::new(8)), store.clone(), &config);
        pipeline.ingest(report_pdf()).await;
        pipeline
            .ingest(Document::from_bytes("other.pdf", pdf_with_pages(&["Unrelated notes."])))
            .await;

        let report = pipeline
            .ingest(Document::from_bytes("reports/q1.pdf", pdf_with_pages(&[""])))
            .await;

        assert_eq!(report.status, IngestionStatus::Ingested);
        assert_eq!(report.indexed_count, 0);
        assert!(store
            .records()
            .iter()
            .all(|record| record.source == "other.pdf"));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn missing_location_reports_the_id_it_gets_once_present(
    ) -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let store = Arc::new(MemoryIndex::default());
        let config = config();
        let pipeline = pipeline(Arc::new(ScriptedEmbedder::new(8)), store.clone(), &config);
        let source = LocalDocumentSource::new(dir.path());
        let locations = vec!["./doc.pdf".to_string()];

        let missing = pipeline.ingest_from(&source, &locations).await;
        std::fs::write(dir.path().join("doc.pdf"), pdf_with_pages(&["Shipping notes."]))?;
        let present = pipeline.ingest_from(&source, &locations).await;

        assert!(matches!(missing[0].status, IngestionStatus::Failed { .. }));
        assert_eq!(present[0].status, IngestionStatus::Ingested);
        assert_eq!(missing[0].document_id, present[0].document_id);
        assert_eq!(missing[0].source, "doc.pdf");
        Ok(())
    }

    #[tokio::test]
    async fn ingestion_runs_on_spawned_tasks() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        std::fs::write(dir.path().join("a.pdf"), pdf_with_pages(&["Shipping notes."]))?;

        let store = Arc::new(MemoryIndex::default());
        let config = config();
        let pipeline = Arc::new(pipeline(
            Arc::new(ScriptedEmbedder::new(8)),
            store.clone(),
            &config,
        ));
        let source: Arc<dyn DocumentSource> = Arc::new(LocalDocumentSource::new(dir.path()));

        let task = tokio::spawn(async move {
            let locations = vec!["a.pdf".to_string()];
            pipeline.ingest_from(source.as_ref(), &locations).await
        });
        let reports = task.await?;

        assert_eq!(reports[0].status, IngestionStatus::Ingested);
        assert!(store.len() > 0);
        Ok(())
    }

    #[tokio::test]
    async fn indexed_documents_are_listed() -> Result<(), RagError> {
        let store = Arc::new(MemoryIndex::default());
        let config = config();
        let pipeline = pipeline(Arc::new(ScriptedEmbedder::new(8)), store.clone(), &config);
        let report = pipeline.ingest(report_pdf()).await;
        pipeline
            .ingest(Document::from_bytes("junk.pdf", b"not a pdf".to_vec()))
            .await;

        let documents = pipeline.list_documents().await?;

        assert_eq!(documents.len(), 1);
        assert_eq!(documents[0].document_id, report.document_id);
        assert_eq!(documents[0].source, "reports/q1.pdf");
        assert_eq!(documents[0].chunk_count as usize, report.indexed_count);
        Ok(())
    }
}
