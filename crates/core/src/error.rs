use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RagError {
    #[error("extraction error: {0}")]
    Extraction(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    #[error("pii detector unavailable: {0}")]
    DetectorUnavailable(String),

    #[error("generation error: {0}")]
    Generation(String),

    #[error("index error: {0}")]
    Index(#[from] IndexError),

    #[error("document source error: {0}")]
    Source(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("cancelled by caller")]
    Cancelled,
}

impl RagError {
    /// Short machine-friendly name of the failure class, used in status reports.
    pub fn kind(&self) -> &'static str {
        match self {
            RagError::Extraction(_) => "ExtractionError",
            RagError::Configuration(_) => "ConfigurationError",
            RagError::Embedding(_) => "EmbeddingError",
            RagError::DetectorUnavailable(_) => "DetectorUnavailableError",
            RagError::Generation(_) => "GenerationError",
            RagError::Index(_) => "IndexError",
            RagError::Source(_) => "SourceError",
            RagError::Io(_) => "IoError",
            RagError::Timeout(_) => "Timeout",
            RagError::Cancelled => "Cancelled",
        }
    }
}

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("index request failed: {0}")]
    Request(String),

    #[error("index not available yet: {0}")]
    NotReady(String),
}

/// Raised when some or all inputs of an embedding call could not be embedded.
///
/// Successful vectors travel with the error so callers can index what
/// worked and report the rest.
#[derive(Debug, Error)]
#[error("embedding failed for {} of {total} inputs: {reason}", failed_indices.len())]
pub struct EmbeddingError {
    pub reason: String,
    pub total: usize,
    pub failed_indices: Vec<usize>,
    pub completed: Vec<(usize, Vec<f32>)>,
}

impl EmbeddingError {
    pub fn is_total(&self) -> bool {
        self.failed_indices.len() >= self.total
    }
}

/// Failure reported by an external capability (embedding, chat, classifier).
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CapabilityError {
    #[error("transient failure: {0}")]
    Transient(String),

    #[error("request rejected: {0}")]
    Rejected(String),

    #[error("capability unavailable: {0}")]
    Unavailable(String),
}

impl CapabilityError {
    pub fn is_transient(&self) -> bool {
        matches!(self, CapabilityError::Transient(_))
    }

    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        let details = format!("{status}: {}", body.trim());
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            CapabilityError::Transient(details)
        } else {
            CapabilityError::Rejected(details)
        }
    }
}

impl From<reqwest::Error> for CapabilityError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() || error.is_connect() || error.is_request() {
            CapabilityError::Transient(error.to_string())
        } else {
            CapabilityError::Rejected(error.to_string())
        }
    }
}

pub type Result<T, E = RagError> = std::result::Result<T, E>;
