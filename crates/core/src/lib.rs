pub mod chunking;
pub mod config;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod generation;
pub mod ingest;
pub mod models;
pub mod orchestrator;
pub mod pii;
pub mod providers;
pub mod retrieval;
pub mod retry;
pub mod source;
pub mod stores;
pub mod traits;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use chunking::{chunk_pages, split_windows, PageLayout};
pub use config::{
    ChunkingConfig, EmbeddingConfig, GenerationConfig, IndexConfig, IngestionConfig, PiiConfig,
    QueryConfig, RagConfig, RetrievalConfig,
};
pub use embeddings::{
    cosine_similarity, CharacterNgramEmbedder, EmbeddingClient, DEFAULT_EMBEDDING_DIMENSIONS,
};
pub use error::{CapabilityError, EmbeddingError, IndexError, RagError, Result};
pub use extractor::{
    ExtractionMode, LopdfExtractor, PageRenderer, PdfExtractor, PdftoppmRenderer, RenderedPage,
};
pub use generation::{plan_prompt, AnswerGenerator, PromptPlan, NO_RELEVANT_CONTEXT_ANSWER};
pub use ingest::IngestionPipeline;
pub use models::{
    Answer, Chunk, Citation, ConversationTurn, Document, EmbeddingVector, IndexRecord,
    IndexedDocument, IngestionReport, IngestionStatus, MetadataFilter, Page, PageContent, PageRange, PiiFinding,
    QueryRequest, QueryResponse, QueryStatus, RetrievedContext, Role, ScoredRecord,
};
pub use orchestrator::{QueryPipeline, QueryStage, SUMMARY_QUESTION};
pub use pii::{PiiDetector, PiiScreening};
pub use providers::{HuggingFaceTokenClassifier, OpenAiChat, OpenAiEmbeddings};
pub use retrieval::Retriever;
pub use retry::RetryPolicy;
pub use source::{discover_pdf_files, DocumentSource, HttpDocumentSource, LocalDocumentSource};
pub use stores::OpenSearchStore;
pub use traits::{
    ChatModel, EmbeddingModel, GenerationOptions, ImageInput, IndexStore, TokenClassifier,
    TokenPrediction,
};
