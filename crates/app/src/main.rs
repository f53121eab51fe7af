mod server;

use anyhow::Context;
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use pdf_rag_core::{
    discover_pdf_files, AnswerGenerator, CharacterNgramEmbedder, ChatModel, ChunkingConfig,
    DocumentSource, EmbeddingClient, EmbeddingConfig, EmbeddingModel, GenerationConfig,
    HttpDocumentSource, HuggingFaceTokenClassifier, IndexConfig, IngestionConfig,
    IngestionPipeline, IngestionStatus, LocalDocumentSource, LopdfExtractor, MetadataFilter,
    OpenAiChat, OpenAiEmbeddings, OpenSearchStore, PiiConfig, PiiDetector, QueryConfig,
    QueryPipeline, QueryRequest, RagConfig, RetrievalConfig, Retriever,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "pdf-rag", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[command(flatten)]
    settings: Settings,
}

#[derive(Args, Debug, Clone)]
struct Settings {
    /// OpenSearch base URL
    #[arg(long, env = "OPENSEARCH_URL", default_value = "http://localhost:9200")]
    opensearch_url: String,

    /// Index holding the chunk records
    #[arg(long, env = "INDEX_NAME", default_value = "pdf_chunks")]
    index_name: String,

    /// Wait for index refresh on every write
    #[arg(long, env = "REFRESH_ON_WRITE", default_value_t = false)]
    refresh_on_write: bool,

    /// OpenAI-compatible embeddings base URL. Without it a local character n-gram model is used.
    #[arg(long, env = "EMBEDDING_URL")]
    embedding_url: Option<String>,

    #[arg(long, env = "EMBEDDING_MODEL_ID", default_value = "text-embedding-3-small")]
    embedding_model_id: String,

    #[arg(long, env = "EMBEDDING_DIMENSIONS", default_value = "1536")]
    embedding_dimensions: usize,

    #[arg(long, env = "EMBEDDING_BATCH_SIZE", default_value = "16")]
    embedding_batch_size: usize,

    /// OpenAI-compatible chat base URL
    #[arg(long, env = "CHAT_URL", default_value = "https://api.openai.com/v1")]
    chat_url: String,

    #[arg(long, env = "CHAT_MODEL_ID", default_value = "gpt-4o-mini")]
    chat_model_id: String,

    /// The chat model accepts page images; switches ingestion to multimodal mode
    #[arg(long, env = "CHAT_VISION", default_value_t = false)]
    chat_vision: bool,

    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Token-classification endpoint used for PII screening
    #[arg(long, env = "PII_URL", default_value = "http://localhost:8080")]
    pii_url: String,

    #[arg(long, env = "PII_API_KEY", hide_env_values = true)]
    pii_api_key: Option<String>,

    /// Minimum entity confidence that rejects a message
    #[arg(long, env = "PII_THRESHOLD", default_value = "0.8")]
    pii_threshold: f32,

    /// Screen page text for PII during ingestion and skip pages that contain any
    #[arg(long, env = "SCREEN_PAGES_FOR_PII", default_value_t = false)]
    screen_pages_for_pii: bool,

    #[arg(long, env = "MAX_CHUNK_CHARS", default_value = "1200")]
    max_chunk_chars: usize,

    #[arg(long, env = "OVERLAP_CHARS", default_value = "120")]
    overlap_chars: usize,

    #[arg(long, env = "TOP_K", default_value = "5")]
    top_k: usize,

    #[arg(long, env = "MIN_RELEVANCE", default_value = "0.2")]
    min_relevance: f32,

    #[arg(long, env = "INGEST_CONCURRENCY", default_value = "4")]
    ingest_concurrency: usize,

    /// Timeout in seconds for each model call
    #[arg(long, env = "LLM_TIMEOUT", default_value = "30")]
    llm_timeout_secs: u64,

    /// Upper bound in seconds for a whole query
    #[arg(long, env = "QUERY_TIMEOUT", default_value = "30")]
    query_timeout_secs: u64,
}

#[derive(Subcommand)]
enum Command {
    /// Ingest PDFs from a local path or an HTTP document store.
    Ingest {
        /// PDF file, or folder searched recursively. Must lie under --documents-root.
        #[arg(long, conflicts_with = "location")]
        path: Option<PathBuf>,
        /// Local documents are keyed by their path relative to this folder.
        #[arg(long, env = "DOCUMENTS_ROOT", default_value = ".")]
        documents_root: PathBuf,
        /// Object key below --source-url. Repeatable.
        #[arg(long, requires = "source_url")]
        location: Vec<String>,
        #[arg(long, env = "SOURCE_URL")]
        source_url: Option<String>,
    },
    /// Answer one question and print the JSON response.
    Query {
        #[arg(long)]
        message: String,
        #[arg(long)]
        top_k: Option<usize>,
        #[arg(long)]
        threshold: Option<f32>,
        /// Restrict retrieval to these documents. Repeatable.
        #[arg(long)]
        document_id: Vec<String>,
    },
    /// Summarize whole documents and print the JSON response.
    Summarize {
        /// Document to summarize. Repeatable.
        #[arg(long, required = true)]
        document_id: Vec<String>,
    },
    /// List the documents that have chunks in the index.
    Documents,
    /// Remove every chunk of a document from the index.
    Delete {
        #[arg(long)]
        document_id: String,
    },
    /// Serve the chat and ingestion endpoints over HTTP.
    Serve {
        #[arg(long, env = "BIND", default_value = "0.0.0.0:8000")]
        bind: String,
        /// Documents named in ingestion requests are fetched from here.
        #[arg(long, env = "SOURCE_URL")]
        source_url: Option<String>,
        /// Local root used when no source URL is given.
        #[arg(long, env = "DOCUMENTS_ROOT", default_value = ".")]
        documents_root: PathBuf,
    },
}

impl Settings {
    fn rag_config(&self) -> RagConfig {
        RagConfig {
            pii: PiiConfig {
                threshold: self.pii_threshold,
                ..PiiConfig::default()
            },
            chunking: ChunkingConfig {
                max_chunk_chars: self.max_chunk_chars,
                overlap_chars: self.overlap_chars,
                ..ChunkingConfig::default()
            },
            embedding: EmbeddingConfig {
                model_id: self.embedding_model_id.clone(),
                dimensions: self.embedding_dimensions,
                batch_size: self.embedding_batch_size,
                ..EmbeddingConfig::default()
            },
            generation: GenerationConfig {
                chat_model_id: self.chat_model_id.clone(),
                ..GenerationConfig::default()
            },
            retrieval: RetrievalConfig {
                top_k: self.top_k,
                min_relevance: self.min_relevance,
            },
            index: IndexConfig {
                index_name: self.index_name.clone(),
                refresh_on_write: self.refresh_on_write,
            },
            ingestion: IngestionConfig {
                concurrency: self.ingest_concurrency,
                screen_pages_for_pii: self.screen_pages_for_pii,
                ..IngestionConfig::default()
            },
            query: QueryConfig {
                timeout: Duration::from_secs(self.query_timeout_secs),
            },
        }
    }

    fn llm_timeout(&self) -> Duration {
        Duration::from_secs(self.llm_timeout_secs)
    }
}

/// Adapters and pipelines, built once and shared by every request.
struct Services {
    config: RagConfig,
    store: Arc<OpenSearchStore>,
    embedder: Arc<dyn EmbeddingModel>,
    ingestion: Arc<IngestionPipeline>,
    query: Arc<QueryPipeline>,
}

fn build_services(settings: &Settings) -> anyhow::Result<Services> {
    let config = settings.rag_config();
    config.validate().context("invalid configuration")?;

    let embedder: Arc<dyn EmbeddingModel> = match &settings.embedding_url {
        Some(url) => Arc::new(OpenAiEmbeddings::new(
            url,
            &config.embedding.model_id,
            config.embedding.dimensions,
            settings.api_key.clone(),
            settings.llm_timeout(),
        )?),
        None => {
            warn!("no embedding url configured, using the local n-gram embedder");
            Arc::new(CharacterNgramEmbedder::new(config.embedding.dimensions))
        }
    };

    let chat: Arc<dyn ChatModel> = Arc::new(
        OpenAiChat::new(
            &settings.chat_url,
            &config.generation.chat_model_id,
            settings.api_key.clone(),
            settings.llm_timeout(),
        )?
        .with_vision(settings.chat_vision),
    );

    let classifier = Arc::new(HuggingFaceTokenClassifier::new(
        &settings.pii_url,
        settings.pii_api_key.clone(),
        settings.llm_timeout(),
    )?);
    let detector = PiiDetector::new(classifier, &config.pii);

    let store = Arc::new(OpenSearchStore::new(&settings.opensearch_url, &config.index)?);

    let ingestion = IngestionPipeline::new(
        Arc::new(LopdfExtractor::default()),
        EmbeddingClient::new(embedder.clone(), &config.embedding),
        store.clone(),
        &config,
    )
    .with_pii_detector(detector.clone())
    .with_vision_model(chat.clone());

    let query = QueryPipeline::new(
        detector,
        Retriever::new(embedder.clone(), store.clone()),
        AnswerGenerator::new(chat, config.generation.clone()),
        &config,
    );

    Ok(Services {
        config,
        store,
        embedder,
        ingestion: Arc::new(ingestion),
        query: Arc::new(query),
    })
}

/// Canonical documents root and the root-relative keys of a file or a folder
/// of PDFs below it.
fn local_locations(root: &Path, path: &Path) -> anyhow::Result<(PathBuf, Vec<String>)> {
    let root = std::fs::canonicalize(root)
        .with_context(|| format!("cannot resolve documents root {}", root.display()))?;
    let path = std::fs::canonicalize(path)
        .with_context(|| format!("cannot resolve {}", path.display()))?;

    let files = if path.is_dir() {
        discover_pdf_files(&path)
    } else {
        vec![path.clone()]
    };
    if files.is_empty() {
        anyhow::bail!("no pdf files found in {}", path.display());
    }

    let locations = files
        .iter()
        .map(|file| {
            let relative = file.strip_prefix(&root).with_context(|| {
                format!(
                    "{} is outside the documents root {}",
                    file.display(),
                    root.display()
                )
            })?;
            Ok(relative
                .components()
                .map(|component| component.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/"))
        })
        .collect::<anyhow::Result<Vec<String>>>()?;
    Ok((root, locations))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();
    let services = build_services(&cli.settings)?;

    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        index = %services.config.index.index_name,
        embedding_model = services.embedder.model_id(),
        "pdf-rag boot"
    );

    execute(cli.command, services, &cli.settings).await
}

async fn execute(
    command: Command,
    services: Services,
    settings: &Settings,
) -> anyhow::Result<()> {
    match command {
        Command::Ingest {
            path,
            documents_root,
            location,
            source_url,
        } => {
            services
                .store
                .ensure_index(services.embedder.dimensions())
                .await
                .context("index setup failed")?;

            let (source, locations): (Box<dyn DocumentSource>, Vec<String>) = match path {
                Some(path) => {
                    let (root, locations) = local_locations(&documents_root, &path)?;
                    (Box::new(LocalDocumentSource::new(root)), locations)
                }
                None => {
                    let base = source_url.context("--source-url is required with --location")?;
                    if location.is_empty() {
                        anyhow::bail!("pass --path or at least one --location");
                    }
                    (
                        Box::new(HttpDocumentSource::new(&base, settings.llm_timeout())?),
                        location,
                    )
                }
            };

            info!(documents = locations.len(), "ingesting documents");
            let reports = services
                .ingestion
                .ingest_from(source.as_ref(), &locations)
                .await;

            for report in &reports {
                if let IngestionStatus::Failed { reason } = &report.status {
                    warn!(source = %report.source, %reason, "document not ingested");
                }
            }
            println!("{}", serde_json::to_string_pretty(&reports)?);
        }
        Command::Query {
            message,
            top_k,
            threshold,
            document_id,
        } => {
            let request = QueryRequest {
                top_k,
                threshold,
                filter: MetadataFilter {
                    document_ids: document_id,
                    ..MetadataFilter::default()
                },
                ..QueryRequest::new(message)
            };
            let response = services.query.answer(&request).await;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        Command::Summarize { document_id } => {
            let response = services.query.summarize(&document_id).await;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        Command::Documents => {
            let documents = services
                .ingestion
                .list_documents()
                .await
                .context("listing documents failed")?;
            println!("{}", serde_json::to_string_pretty(&documents)?);
        }
        Command::Delete { document_id } => {
            let deleted = services
                .ingestion
                .delete_document(&document_id)
                .await
                .with_context(|| format!("deleting {document_id} failed"))?;
            println!(
                "{}",
                serde_json::json!({"document_id": document_id, "deleted": deleted})
            );
        }
        Command::Serve {
            bind,
            source_url,
            documents_root,
        } => {
            services
                .store
                .ensure_index(services.embedder.dimensions())
                .await
                .context("index setup failed")?;

            let source: Arc<dyn DocumentSource> = match source_url {
                Some(base) => Arc::new(HttpDocumentSource::new(&base, settings.llm_timeout())?),
                None => {
                    let root = std::fs::canonicalize(&documents_root).with_context(|| {
                        format!("cannot resolve documents root {}", documents_root.display())
                    })?;
                    Arc::new(LocalDocumentSource::new(root))
                }
            };

            server::run_server(
                &bind,
                server::AppState {
                    query: services.query,
                    ingestion: services.ingestion,
                    source,
                },
            )
            .await?;
        }
    }

    Ok(())
}
