use crate::config::IndexConfig;
use crate::error::IndexError;
use crate::models::{
    sort_by_relevance, IndexRecord, IndexedDocument, MetadataFilter, PageRange, ScoredRecord,
};
use crate::traits::IndexStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};
use url::Url;

const BACKEND: &str = "opensearch";
const LISTING_PAGE_SIZE: usize = 500;

/// k-NN chunk index on OpenSearch, talking to the REST API directly.
pub struct OpenSearchStore {
    client: Arc<Client>,
    endpoint: String,
    index_name: String,
    refresh_on_write: bool,
}

/// Shape of one chunk document as stored in the index.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredChunk {
    chunk_id: String,
    document_id: String,
    source: String,
    text: String,
    page_start: u32,
    page_end: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    vector: Vec<f32>,
    embedding_model_id: String,
    ingested_at: DateTime<Utc>,
    #[serde(default)]
    metadata: BTreeMap<String, String>,
}

impl From<&IndexRecord> for StoredChunk {
    fn from(record: &IndexRecord) -> Self {
        Self {
            chunk_id: record.chunk_id.clone(),
            document_id: record.document_id.clone(),
            source: record.source.clone(),
            text: record.text.clone(),
            page_start: record.pages.start,
            page_end: record.pages.end,
            vector: record.vector.clone(),
            embedding_model_id: record.embedding_model_id.clone(),
            ingested_at: record.ingested_at,
            metadata: record.metadata.clone(),
        }
    }
}

impl From<StoredChunk> for IndexRecord {
    fn from(stored: StoredChunk) -> Self {
        Self {
            chunk_id: stored.chunk_id,
            document_id: stored.document_id,
            source: stored.source,
            text: stored.text,
            pages: PageRange {
                start: stored.page_start,
                end: stored.page_end,
            },
            vector: stored.vector,
            embedding_model_id: stored.embedding_model_id,
            ingested_at: stored.ingested_at,
            metadata: stored.metadata,
        }
    }
}

impl OpenSearchStore {
    pub fn new(endpoint: &str, config: &IndexConfig) -> Result<Self, IndexError> {
        let endpoint = Url::parse(endpoint)?;
        Ok(Self {
            client: Arc::new(Client::new()),
            endpoint: endpoint.as_str().trim_end_matches('/').to_string(),
            index_name: config.index_name.clone(),
            refresh_on_write: config.refresh_on_write,
        })
    }

    pub fn index_name(&self) -> &str {
        &self.index_name
    }

    fn index_url(&self, suffix: &str) -> String {
        format!("{}/{}{}", self.endpoint, self.index_name, suffix)
    }

    /// Creates the chunk index with a `dimensions`-wide vector field if it is missing.
    pub async fn ensure_index(&self, dimensions: usize) -> Result<(), IndexError> {
        let response = self.client.head(self.index_url("")).send().await?;

        if response.status() == StatusCode::OK {
            return Ok(());
        }

        if response.status() != StatusCode::NOT_FOUND {
            return Err(IndexError::BackendResponse {
                backend: BACKEND.to_string(),
                details: response.status().to_string(),
            });
        }

        let response = self
            .client
            .put(self.index_url(""))
            .json(&index_definition(dimensions))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(IndexError::Request(format!(
                "open-search index setup failed with {status}: {body}"
            )));
        }

        info!(index = %self.index_name, dimensions, "created chunk index");
        Ok(())
    }

    fn write_suffix(&self, path: &str) -> String {
        if self.refresh_on_write {
            format!("{path}?refresh=wait_for")
        } else {
            path.to_string()
        }
    }

    async fn delete_matching(&self, query: Value) -> Result<u64, IndexError> {
        let suffix = if self.refresh_on_write {
            "/_delete_by_query?conflicts=proceed&refresh=true"
        } else {
            "/_delete_by_query?conflicts=proceed"
        };
        let response = self
            .client
            .post(self.index_url(suffix))
            .json(&json!({"query": query}))
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(0);
        }
        if !response.status().is_success() {
            return Err(IndexError::BackendResponse {
                backend: BACKEND.to_string(),
                details: response.status().to_string(),
            });
        }

        let body: Value = response.json().await?;
        Ok(body.get("deleted").and_then(Value::as_u64).unwrap_or(0))
    }
}

fn index_definition(dimensions: usize) -> Value {
    json!({
        "settings": {
            "index": {"knn": true},
            "number_of_shards": 1,
            "number_of_replicas": 0
        },
        "mappings": {
            "dynamic_templates": [
                {
                    "metadata_as_keywords": {
                        "path_match": "metadata.*",
                        "match_mapping_type": "string",
                        "mapping": {"type": "keyword"}
                    }
                }
            ],
            "properties": {
                "vector": {
                    "type": "knn_vector",
                    "dimension": dimensions,
                    "method": {
                        "name": "hnsw",
                        "space_type": "cosinesimil",
                        "engine": "lucene"
                    }
                },
                "text": {"type": "text"},
                "chunk_id": {"type": "keyword"},
                "document_id": {"type": "keyword"},
                "source": {"type": "keyword"},
                "embedding_model_id": {"type": "keyword"},
                "page_start": {"type": "integer"},
                "page_end": {"type": "integer"},
                "ingested_at": {"type": "date"}
            }
        }
    })
}

fn bulk_payload(index_name: &str, records: &[IndexRecord]) -> Result<String, IndexError> {
    let mut lines = Vec::with_capacity(records.len() * 2);
    for record in records {
        lines.push(serde_json::to_string(&json!({
            "index": {
                "_index": index_name,
                "_id": record.chunk_id,
            }
        }))?);
        lines.push(serde_json::to_string(&StoredChunk::from(record))?);
    }
    Ok(lines.join("\n") + "\n")
}

/// First item-level failure of a `_bulk` response, if any.
fn bulk_failure(response: &Value) -> Option<String> {
    if !response.get("errors").and_then(Value::as_bool).unwrap_or(false) {
        return None;
    }
    response
        .get("items")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|item| item.get("index"))
        .find_map(|item| {
            item.get("error").map(|error| {
                format!(
                    "{}: {}",
                    item.get("_id").and_then(Value::as_str).unwrap_or("?"),
                    error
                        .get("reason")
                        .and_then(Value::as_str)
                        .unwrap_or("unknown bulk error")
                )
            })
        })
        .or_else(|| Some("bulk request reported errors".to_string()))
}

fn build_filters(filter: &MetadataFilter) -> Vec<Value> {
    let mut predicates = Vec::new();

    if !filter.document_ids.is_empty() {
        predicates.push(json!({"terms": {"document_id": filter.document_ids}}));
    }
    if let Some(source) = &filter.source {
        predicates.push(json!({"term": {"source": source}}));
    }
    if let Some(model) = &filter.embedding_model_id {
        predicates.push(json!({"term": {"embedding_model_id": model}}));
    }
    for (key, value) in &filter.metadata {
        predicates.push(json!({"term": {format!("metadata.{key}"): value}}));
    }

    predicates
}

fn knn_query(vector: &[f32], top_k: usize, filter: &MetadataFilter) -> Value {
    let mut knn = json!({
        "vector": vector,
        "k": top_k,
    });
    let predicates = build_filters(filter);
    if !predicates.is_empty() {
        knn["filter"] = json!({"bool": {"filter": predicates}});
    }

    json!({
        "size": top_k,
        "_source": {"excludes": ["vector"]},
        "query": {"knn": {"vector": knn}}
    })
}

/// Records of `document_id` other than the ones in `keep`.
fn stale_chunk_query(document_id: &str, keep: &[String]) -> Value {
    let mut query = json!({"bool": {"filter": [{"term": {"document_id": document_id}}]}});
    if !keep.is_empty() {
        query["bool"]["must_not"] = json!([{"ids": {"values": keep}}]);
    }
    query
}

fn listing_query(after: Option<&Value>) -> Value {
    let mut composite = json!({
        "size": LISTING_PAGE_SIZE,
        "sources": [
            {"document_id": {"terms": {"field": "document_id"}}},
            {"source": {"terms": {"field": "source"}}}
        ]
    });
    if let Some(after) = after {
        composite["after"] = after.clone();
    }
    json!({"size": 0, "aggs": {"documents": {"composite": composite}}})
}

/// Buckets of one composite page and the key to resume after, if more may follow.
fn parse_listing(response: &Value) -> (Vec<IndexedDocument>, Option<Value>) {
    let buckets = response
        .pointer("/aggregations/documents/buckets")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let documents: Vec<IndexedDocument> = buckets
        .iter()
        .filter_map(|bucket| {
            Some(IndexedDocument {
                document_id: bucket.pointer("/key/document_id")?.as_str()?.to_string(),
                source: bucket
                    .pointer("/key/source")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                chunk_count: bucket.get("doc_count").and_then(Value::as_u64).unwrap_or(0),
            })
        })
        .collect();

    let after = if buckets.is_empty() {
        None
    } else {
        response.pointer("/aggregations/documents/after_key").cloned()
    };
    (documents, after)
}

/// The lucene engine reports cosine space scores as `(1 + cos) / 2`.
fn cosine_from_score(score: f64) -> f32 {
    (2.0 * score - 1.0) as f32
}

fn parse_hits(response: &Value) -> Result<Vec<ScoredRecord>, IndexError> {
    let hits = response
        .pointer("/hits/hits")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let mut result = Vec::with_capacity(hits.len());
    for raw in hits {
        let score = raw.pointer("/_score").and_then(Value::as_f64).unwrap_or(0.0);
        let source = raw.get("_source").cloned().unwrap_or(Value::Null);
        let stored: StoredChunk = serde_json::from_value(source)?;
        result.push(ScoredRecord {
            record: stored.into(),
            score: cosine_from_score(score),
        });
    }

    sort_by_relevance(&mut result);
    Ok(result)
}

#[async_trait]
impl IndexStore for OpenSearchStore {
    async fn upsert(&self, records: &[IndexRecord]) -> Result<(), IndexError> {
        if records.is_empty() {
            return Ok(());
        }

        let payload = bulk_payload(&self.index_name, records)?;
        let response = self
            .client
            .post(format!("{}{}", self.endpoint, self.write_suffix("/_bulk")))
            .header("Content-Type", "application/x-ndjson")
            .body(payload)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(IndexError::BackendResponse {
                backend: BACKEND.to_string(),
                details: response.status().to_string(),
            });
        }

        let body: Value = response.json().await?;
        if let Some(details) = bulk_failure(&body) {
            return Err(IndexError::BackendResponse {
                backend: BACKEND.to_string(),
                details,
            });
        }

        debug!(records = records.len(), index = %self.index_name, "bulk upsert finished");
        Ok(())
    }

    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: &MetadataFilter,
    ) -> Result<Vec<ScoredRecord>, IndexError> {
        let response = self
            .client
            .post(self.index_url("/_search"))
            .json(&knn_query(vector, top_k, filter))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(IndexError::BackendResponse {
                backend: BACKEND.to_string(),
                details: response.status().to_string(),
            });
        }

        let body: Value = response.json().await?;
        let mut hits = parse_hits(&body)?;
        hits.truncate(top_k);
        Ok(hits)
    }

    async fn delete_by_document(&self, document_id: &str) -> Result<u64, IndexError> {
        self.delete_matching(json!({"term": {"document_id": document_id}})).await
    }

    async fn delete_by_document_except(
        &self,
        document_id: &str,
        keep: &[String],
    ) -> Result<u64, IndexError> {
        self.delete_matching(stale_chunk_query(document_id, keep)).await
    }

    async fn list_documents(&self) -> Result<Vec<IndexedDocument>, IndexError> {
        let mut documents = Vec::new();
        let mut after: Option<Value> = None;

        loop {
            let response = self
                .client
                .post(self.index_url("/_search"))
                .json(&listing_query(after.as_ref()))
                .send()
                .await?;

            if response.status() == StatusCode::NOT_FOUND {
                return Ok(Vec::new());
            }
            if !response.status().is_success() {
                return Err(IndexError::BackendResponse {
                    backend: BACKEND.to_string(),
                    details: response.status().to_string(),
                });
            }

            let body: Value = response.json().await?;
            let (page, next) = parse_listing(&body);
            documents.extend(page);
            match next {
                Some(key) => after = Some(key),
                None => break,
            }
        }

        debug!(documents = documents.len(), index = %self.index_name, "listed documents");
        Ok(documents)
    }

    async fn refresh(&self) -> Result<(), IndexError> {
        let response = self.client.post(self.index_url("/_refresh")).send().await?;
        if !response.status().is_success() {
            return Err(IndexError::BackendResponse {
                backend: BACKEND.to_string(),
                details: response.status().to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record(chunk_id: &str) -> IndexRecord {
        IndexRecord {
            chunk_id: chunk_id.to_string(),
            document_id: "doc-1".to_string(),
            source: "reports/q1.pdf".to_string(),
            text: "Revenue grew.".to_string(),
            pages: PageRange { start: 3, end: 4 },
            vector: vec![0.6, 0.8],
            embedding_model_id: "m".to_string(),
            ingested_at: Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap(),
            metadata: BTreeMap::from([("chunk_index".to_string(), "0".to_string())]),
        }
    }

    #[test]
    fn bulk_payload_is_keyed_by_chunk_id() {
        let payload = bulk_payload("pdf_chunks", &[record("c1"), record("c2")]).unwrap();
        let lines: Vec<Value> = payload
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();

        assert_eq!(lines.len(), 4);
        assert!(payload.ends_with('\n'));
        assert_eq!(lines[0]["index"]["_id"], "c1");
        assert_eq!(lines[1]["page_start"], 3);
        assert_eq!(lines[1]["metadata"]["chunk_index"], "0");
        assert_eq!(lines[2]["index"]["_id"], "c2");
    }

    #[test]
    fn knn_query_pins_model_and_metadata() {
        let filter = MetadataFilter {
            document_ids: vec!["doc-1".to_string()],
            source: None,
            metadata: BTreeMap::from([("lang".to_string(), "en".to_string())]),
            embedding_model_id: Some("m".to_string()),
        };
        let body = knn_query(&[0.1, 0.2], 3, &filter);

        assert_eq!(body["size"], 3);
        assert_eq!(body["query"]["knn"]["vector"]["k"], 3);
        let predicates = body["query"]["knn"]["vector"]["filter"]["bool"]["filter"]
            .as_array()
            .unwrap();
        assert_eq!(predicates.len(), 3);
        assert!(predicates.contains(&json!({"term": {"metadata.lang": "en"}})));
        assert!(predicates.contains(&json!({"term": {"embedding_model_id": "m"}})));
    }

    #[test]
    fn unfiltered_query_has_no_filter_clause() {
        let body = knn_query(&[0.1], 5, &MetadataFilter::default());
        assert!(body["query"]["knn"]["vector"].get("filter").is_none());
    }

    #[test]
    fn hits_are_converted_to_cosine_and_ordered() {
        let mut low = serde_json::to_value(StoredChunk::from(&record("b"))).unwrap();
        low.as_object_mut().unwrap().remove("vector");
        let high = serde_json::to_value(StoredChunk::from(&record("a"))).unwrap();
        let response = json!({
            "hits": {"hits": [
                {"_id": "b", "_score": 0.6, "_source": low},
                {"_id": "a", "_score": 0.95, "_source": high}
            ]}
        });

        let hits = parse_hits(&response).unwrap();
        assert_eq!(hits[0].record.chunk_id, "a");
        assert!((hits[0].score - 0.9).abs() < 1e-6);
        assert!((hits[1].score - 0.2).abs() < 1e-6);
        assert_eq!(hits[1].record.pages, PageRange { start: 3, end: 4 });
        assert!(hits[1].record.vector.is_empty());
    }

    #[test]
    fn bulk_item_errors_are_surfaced() {
        let response = json!({
            "errors": true,
            "items": [
                {"index": {"_id": "c1", "status": 201}},
                {"index": {"_id": "c2", "status": 400, "error": {"reason": "dimension mismatch"}}}
            ]
        });
        assert_eq!(bulk_failure(&response).as_deref(), Some("c2: dimension mismatch"));
        assert!(bulk_failure(&json!({"errors": false, "items": []})).is_none());
    }

    #[test]
    fn stale_chunks_exclude_the_fresh_ids() {
        let keep = vec!["c1".to_string(), "c2".to_string()];
        let query = stale_chunk_query("doc-1", &keep);
        assert_eq!(query["bool"]["filter"][0], json!({"term": {"document_id": "doc-1"}}));
        assert_eq!(query["bool"]["must_not"][0], json!({"ids": {"values": ["c1", "c2"]}}));

        let everything = stale_chunk_query("doc-1", &[]);
        assert!(everything["bool"].get("must_not").is_none());
    }

    #[test]
    fn listing_pages_through_composite_buckets() {
        let first = listing_query(None);
        assert_eq!(first["size"], 0);
        assert!(first["aggs"]["documents"]["composite"].get("after").is_none());

        let response = json!({
            "aggregations": {"documents": {
                "after_key": {"document_id": "d2", "source": "b.pdf"},
                "buckets": [
                    {"key": {"document_id": "d1", "source": "a.pdf"}, "doc_count": 4},
                    {"key": {"document_id": "d2", "source": "b.pdf"}, "doc_count": 1}
                ]
            }}
        });
        let (documents, after) = parse_listing(&response);
        assert_eq!(
            documents[0],
            IndexedDocument {
                document_id: "d1".to_string(),
                source: "a.pdf".to_string(),
                chunk_count: 4,
            }
        );
        assert_eq!(documents.len(), 2);
        let after = after.expect("more pages may follow");
        let next = listing_query(Some(&after));
        assert_eq!(next["aggs"]["documents"]["composite"]["after"]["document_id"], "d2");

        let last = json!({
            "aggregations": {"documents": {"after_key": {"document_id": "d2"}, "buckets": []}}
        });
        assert_eq!(parse_listing(&last), (Vec::new(), None));
    }

    #[test]
    fn index_definition_uses_model_dimension() {
        let definition = index_definition(384);
        let vector = &definition["mappings"]["properties"]["vector"];
        assert_eq!(vector["type"], "knn_vector");
        assert_eq!(vector["dimension"], 384);
        assert_eq!(vector["method"]["space_type"], "cosinesimil");
    }

    #[test]
    fn writes_wait_for_refresh_when_configured() {
        let config = IndexConfig {
            refresh_on_write: true,
            ..IndexConfig::default()
        };
        let store = OpenSearchStore::new("http://localhost:9200/", &config).unwrap();
        assert_eq!(store.write_suffix("/_bulk"), "/_bulk?refresh=wait_for");
        assert_eq!(store.index_url("/_search"), "http://localhost:9200/pdf_chunks/_search");
        assert!(matches!(
            OpenSearchStore::new("::", &config),
            Err(IndexError::Url(_))
        ));
    }
}
