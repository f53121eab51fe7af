use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// A PDF as received from a document source. Immutable once ingested.
#[derive(Debug, Clone)]
pub struct Document {
    pub document_id: String,
    pub source: String,
    pub checksum: String,
    pub bytes: Vec<u8>,
}

impl Document {
    /// Builds a document whose id is derived from its source location, so the
    /// same object key always maps to the same document.
    pub fn from_bytes(source: impl Into<String>, bytes: Vec<u8>) -> Self {
        let source = source.into();
        Self {
            document_id: Self::id_for(&source),
            checksum: sha256_hex(&[&bytes]),
            source,
            bytes,
        }
    }

    pub fn id_for(source: &str) -> String {
        sha256_hex(&[source.as_bytes()])
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PageContent {
    /// `None` when the text layer of this page could not be read.
    Text(Option<String>),
    Image { media_type: String, bytes: Vec<u8> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    pub document_id: String,
    /// 1-based.
    pub number: u32,
    pub content: PageContent,
}

impl Page {
    pub fn text(&self) -> &str {
        match &self.content {
            PageContent::Text(Some(text)) => text,
            _ => "",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct PageRange {
    pub start: u32,
    pub end: u32,
}

impl std::fmt::Display for PageRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.start == self.end {
            write!(f, "Page {}", self.start)
        } else {
            write!(f, "Pages {}-{}", self.start, self.end)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    pub chunk_id: String,
    pub document_id: String,
    pub chunk_index: u32,
    pub text: String,
    /// Character offsets into the concatenated document text, end exclusive.
    pub char_start: usize,
    pub char_end: usize,
    pub pages: PageRange,
    /// Characters shared with the previous chunk.
    pub overlap_chars: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingVector {
    pub chunk_id: String,
    pub model_id: String,
    pub values: Vec<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexRecord {
    pub chunk_id: String,
    pub document_id: String,
    pub source: String,
    pub text: String,
    pub pages: PageRange,
    /// May be empty on records returned from a query; stores do not echo vectors back.
    #[serde(default)]
    pub vector: Vec<f32>,
    pub embedding_model_id: String,
    pub ingested_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl IndexRecord {
    pub fn new(
        chunk: &Chunk,
        source: &str,
        embedding: EmbeddingVector,
        ingested_at: DateTime<Utc>,
    ) -> Self {
        Self {
            chunk_id: chunk.chunk_id.clone(),
            document_id: chunk.document_id.clone(),
            source: source.to_string(),
            text: chunk.text.clone(),
            pages: chunk.pages,
            vector: embedding.values,
            embedding_model_id: embedding.model_id,
            ingested_at,
            metadata: BTreeMap::from([
                ("chunk_index".to_string(), chunk.chunk_index.to_string()),
                ("char_start".to_string(), chunk.char_start.to_string()),
                ("char_end".to_string(), chunk.char_end.to_string()),
            ]),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct MetadataFilter {
    #[serde(default)]
    pub document_ids: Vec<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    #[serde(default)]
    pub embedding_model_id: Option<String>,
}

impl MetadataFilter {
    pub fn matches(&self, record: &IndexRecord) -> bool {
        (self.document_ids.is_empty() || self.document_ids.contains(&record.document_id))
            && self.source.as_ref().map_or(true, |source| source == &record.source)
            && self
                .embedding_model_id
                .as_ref()
                .map_or(true, |model| model == &record.embedding_model_id)
            && self
                .metadata
                .iter()
                .all(|(key, value)| record.metadata.get(key) == Some(value))
    }
}

/// One document as the index sees it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IndexedDocument {
    pub document_id: String,
    pub source: String,
    pub chunk_count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoredRecord {
    pub record: IndexRecord,
    pub score: f32,
}

/// Sorts hits by descending score, then most recent ingestion, then chunk id.
pub fn sort_by_relevance(hits: &mut [ScoredRecord]) {
    hits.sort_by(|left, right| {
        right
            .score
            .total_cmp(&left.score)
            .then_with(|| right.record.ingested_at.cmp(&left.record.ingested_at))
            .then_with(|| left.record.chunk_id.cmp(&right.record.chunk_id))
    });
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RetrievedContext {
    pub hits: Vec<ScoredRecord>,
}

impl RetrievedContext {
    pub fn best_score(&self) -> Option<f32> {
        self.hits.first().map(|hit| hit.score)
    }

    /// Keeps only hits scoring at least `floor`.
    pub fn above(self, floor: f32) -> Self {
        Self {
            hits: self.hits.into_iter().filter(|hit| hit.score >= floor).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PiiFinding {
    pub text: String,
    pub category: String,
    pub confidence: f32,
    /// Character offsets into the screened message, end exclusive.
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
}

/// A single user turn as received by the query endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct QueryRequest {
    pub message: String,
    #[serde(default)]
    pub history: Vec<ConversationTurn>,
    #[serde(default)]
    pub top_k: Option<usize>,
    #[serde(default)]
    pub threshold: Option<f32>,
    #[serde(default)]
    pub filter: MetadataFilter,
}

impl QueryRequest {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Citation {
    pub chunk_id: String,
    pub document_id: String,
    pub source: String,
    pub pages: PageRange,
    pub score: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Answer {
    pub text: String,
    pub citations: Vec<Citation>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueryStatus {
    Answered,
    Rejected,
    Failed,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueryResponse {
    pub status: QueryStatus,
    pub answer: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub citations: Vec<Citation>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub findings: Vec<PiiFinding>,
    pub reason: Option<String>,
}

impl QueryResponse {
    pub fn answered(answer: Answer) -> Self {
        Self {
            status: QueryStatus::Answered,
            answer: Some(answer.text),
            citations: answer.citations,
            findings: Vec::new(),
            reason: None,
        }
    }

    pub fn rejected(findings: Vec<PiiFinding>, reason: impl Into<String>) -> Self {
        Self {
            status: QueryStatus::Rejected,
            answer: None,
            citations: Vec::new(),
            findings,
            reason: Some(reason.into()),
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            status: QueryStatus::Failed,
            answer: None,
            citations: Vec::new(),
            findings: Vec::new(),
            reason: Some(reason.into()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IngestionStatus {
    Ingested,
    Partial { failed_chunk_count: usize },
    Failed { reason: String },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IngestionReport {
    pub document_id: String,
    pub source: String,
    #[serde(flatten)]
    pub status: IngestionStatus,
    pub page_count: u32,
    pub chunk_count: usize,
    pub indexed_count: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failed_chunks: Vec<usize>,
    #[serde(default)]
    pub pages_with_pii: u32,
    #[serde(default)]
    pub pages_without_text: u32,
}

impl IngestionReport {
    pub fn failed(document_id: &str, source: &str, reason: impl Into<String>) -> Self {
        Self {
            document_id: document_id.to_string(),
            source: source.to_string(),
            status: IngestionStatus::Failed {
                reason: reason.into(),
            },
            page_count: 0,
            chunk_count: 0,
            indexed_count: 0,
            failed_chunks: Vec::new(),
            pages_with_pii: 0,
            pages_without_text: 0,
        }
    }
}

pub(crate) fn sha256_hex(parts: &[&[u8]]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(chunk_id: &str, minute: u32) -> IndexRecord {
        IndexRecord {
            chunk_id: chunk_id.to_string(),
            document_id: "doc".to_string(),
            source: "a.pdf".to_string(),
            text: String::new(),
            pages: PageRange { start: 1, end: 1 },
            vector: Vec::new(),
            embedding_model_id: "m".to_string(),
            ingested_at: DateTime::parse_from_rfc3339(&format!("2024-01-01T00:{minute:02}:00Z"))
                .unwrap()
                .with_timezone(&Utc),
            metadata: BTreeMap::new(),
        }
    }

    #[test]
    fn relevance_ties_prefer_recent_then_chunk_id() {
        let mut hits = vec![
            ScoredRecord { record: record("b", 1), score: 0.5 },
            ScoredRecord { record: record("a", 1), score: 0.5 },
            ScoredRecord { record: record("c", 2), score: 0.5 },
            ScoredRecord { record: record("d", 0), score: 0.9 },
        ];
        sort_by_relevance(&mut hits);
        let order: Vec<_> = hits.iter().map(|hit| hit.record.chunk_id.as_str()).collect();
        assert_eq!(order, vec!["d", "c", "a", "b"]);
    }

    #[test]
    fn document_id_follows_source_not_content() {
        let first = Document::from_bytes("bucket/a.pdf", b"one".to_vec());
        let second = Document::from_bytes("bucket/a.pdf", b"two".to_vec());
        assert_eq!(first.document_id, second.document_id);
        assert_ne!(first.checksum, second.checksum);
    }

    #[test]
    fn query_response_omits_empty_fields() {
        let json = serde_json::to_value(QueryResponse::failed("boom")).unwrap();
        assert_eq!(json, serde_json::json!({"status": "FAILED", "reason": "boom"}));
    }

    #[test]
    fn ingestion_status_serializes_flat() {
        let report = IngestionReport {
            status: IngestionStatus::Partial { failed_chunk_count: 2 },
            ..IngestionReport::failed("d", "s", "x")
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["status"], "PARTIAL");
        assert_eq!(json["failed_chunk_count"], 2);
    }
}
