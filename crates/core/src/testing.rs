//! In-process fakes for the capability traits. Built for unit tests and, with
//! the `test-support` feature, for the tests of dependent crates.

use crate::embeddings::{cosine_similarity, CharacterNgramEmbedder};
use crate::error::{CapabilityError, IndexError};
use crate::models::{
    sort_by_relevance, IndexRecord, IndexedDocument, MetadataFilter, ScoredRecord,
};
use crate::traits::{
    ChatModel, EmbeddingModel, GenerationOptions, ImageInput, IndexStore, TokenClassifier,
    TokenPrediction,
};
use async_trait::async_trait;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Object, Stream};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

/// Builds a small valid PDF with one text line per page. Empty strings give pages
/// without any text operators.
pub fn pdf_with_pages(texts: &[&str]) -> Vec<u8> {
    let mut doc = lopdf::Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Courier",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! { "F1" => font_id },
    });

    let mut kids = Vec::new();
    for text in texts {
        let operations = if text.is_empty() {
            Vec::new()
        } else {
            vec![
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F1".into(), 12.into()]),
                Operation::new("Td", vec![72.into(), 720.into()]),
                Operation::new("Tj", vec![Object::string_literal(*text)]),
                Operation::new("ET", vec![]),
            ]
        };
        let content = Content { operations };
        let content_id = doc.add_object(Stream::new(
            dictionary! {},
            content.encode().expect("content encodes"),
        ));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "Resources" => resources_id,
        });
        kids.push(page_id.into());
    }

    let count = kids.len() as i64;
    let pages = dictionary! {
        "Type" => "Pages",
        "Kids" => kids,
        "Count" => count,
        "Resources" => resources_id,
        "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
    };
    doc.objects.insert(pages_id, Object::Dictionary(pages));
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut buffer = Vec::new();
    doc.save_to(&mut buffer).expect("pdf saves");
    buffer
}

pub struct ScriptedEmbedder {
    dimensions: usize,
    reported_dimensions: usize,
    transient_failures: AtomicUsize,
    poison: Option<String>,
    calls: AtomicUsize,
}

impl ScriptedEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            reported_dimensions: dimensions,
            transient_failures: AtomicUsize::new(0),
            poison: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn vector_for(text: &str, dimensions: usize) -> Vec<f32> {
        CharacterNgramEmbedder::new(dimensions).embed_one(text)
    }

    pub fn failing_transiently_first(self, count: usize) -> Self {
        self.transient_failures.store(count, Ordering::SeqCst);
        self
    }

    /// Every batch containing `text` fails with a transient error, forever.
    pub fn failing_on(mut self, text: &str) -> Self {
        self.poison = Some(text.to_string());
        self
    }

    pub fn reporting_dimensions(mut self, dimensions: usize) -> Self {
        self.reported_dimensions = dimensions;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingModel for ScriptedEmbedder {
    fn model_id(&self) -> &str {
        "scripted"
    }

    fn dimensions(&self) -> usize {
        self.reported_dimensions
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, CapabilityError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let remaining = self.transient_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.transient_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(CapabilityError::Transient("rate limited".to_string()));
        }
        if let Some(poison) = &self.poison {
            if texts.iter().any(|text| text == poison || text.contains(poison.as_str())) {
                return Err(CapabilityError::Transient("timed out".to_string()));
            }
        }
        Ok(texts
            .iter()
            .map(|text| Self::vector_for(text, self.dimensions))
            .collect())
    }
}

pub struct ScriptedClassifier {
    predictions: Vec<TokenPrediction>,
    needle: Option<String>,
    unavailable: bool,
    calls: AtomicUsize,
}

impl ScriptedClassifier {
    pub fn returning(predictions: Vec<TokenPrediction>) -> Self {
        Self {
            predictions,
            needle: None,
            unavailable: false,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn unavailable() -> Self {
        Self {
            predictions: Vec::new(),
            needle: None,
            unavailable: true,
            calls: AtomicUsize::new(0),
        }
    }

    /// Predictions that tag `needle` inside `text` as `category`, one token per word.
    /// Texts that do not contain `needle` come back clean.
    pub fn tagging(text: &str, needle: &str, category: &str, confidence: f32) -> Self {
        let mut predictions = Vec::new();
        if let Some(byte_start) = text.find(needle) {
            let start = text[..byte_start].chars().count();
            let mut offset = start;
            for (position, word) in needle.split(' ').enumerate() {
                let len = word.chars().count();
                let prefix = if position == 0 { "B-" } else { "I-" };
                predictions.push(TokenPrediction {
                    start: offset,
                    end: offset + len,
                    category: format!("{prefix}{category}"),
                    confidence,
                });
                offset += len + 1;
            }
        }
        Self {
            needle: Some(needle.to_string()),
            ..Self::returning(predictions)
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenClassifier for ScriptedClassifier {
    async fn classify(&self, text: &str) -> Result<Vec<TokenPrediction>, CapabilityError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.unavailable {
            return Err(CapabilityError::Unavailable("model not loaded".to_string()));
        }
        match &self.needle {
            Some(needle) if !text.contains(needle.as_str()) => Ok(Vec::new()),
            _ => Ok(self.predictions.clone()),
        }
    }
}

pub struct RecordingChat {
    reply: String,
    images: bool,
    transient_failures: AtomicUsize,
    always_fail: bool,
    prompts: Mutex<Vec<String>>,
}

impl RecordingChat {
    pub fn replying(reply: &str) -> Self {
        Self {
            reply: reply.to_string(),
            images: false,
            transient_failures: AtomicUsize::new(0),
            always_fail: false,
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn with_images(mut self) -> Self {
        self.images = true;
        self
    }

    pub fn failing_transiently_first(self, count: usize) -> Self {
        self.transient_failures.store(count, Ordering::SeqCst);
        self
    }

    pub fn always_failing(mut self) -> Self {
        self.always_fail = true;
        self
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().expect("prompt log").clone()
    }

    fn respond(&self, prompt: &str) -> Result<String, CapabilityError> {
        self.prompts.lock().expect("prompt log").push(prompt.to_string());
        if self.always_fail {
            return Err(CapabilityError::Transient("model overloaded".to_string()));
        }
        let remaining = self.transient_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.transient_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(CapabilityError::Transient("throttled".to_string()));
        }
        Ok(self.reply.clone())
    }
}

#[async_trait]
impl ChatModel for RecordingChat {
    fn model_id(&self) -> &str {
        "recording"
    }

    fn supports_images(&self) -> bool {
        self.images
    }

    async fn generate(
        &self,
        prompt: &str,
        _options: &GenerationOptions,
    ) -> Result<String, CapabilityError> {
        self.respond(prompt)
    }

    async fn generate_with_images(
        &self,
        prompt: &str,
        images: &[ImageInput],
        _options: &GenerationOptions,
    ) -> Result<String, CapabilityError> {
        if !self.images {
            return Err(CapabilityError::Rejected("no vision".to_string()));
        }
        let page = images.first().and_then(|image| image.bytes.first()).copied();
        self.respond(prompt)
            .map(|reply| format!("{reply} (image {})", page.unwrap_or_default()))
    }
}

/// Brute-force cosine index kept in memory. Test-only stand-in for the external store.
#[derive(Default)]
pub struct MemoryIndex {
    records: Mutex<BTreeMap<String, IndexRecord>>,
    fail_writes: AtomicBool,
    fail_queries: bool,
}

impl MemoryIndex {
    pub fn failing_writes() -> Self {
        let index = Self::default();
        index.set_failing_writes(true);
        index
    }

    /// Upserts fail while set. Deletes keep working.
    pub fn set_failing_writes(&self, failing: bool) {
        self.fail_writes.store(failing, Ordering::SeqCst);
    }

    pub fn failing_queries() -> Self {
        Self {
            fail_queries: true,
            ..Self::default()
        }
    }

    pub fn len(&self) -> usize {
        self.records.lock().expect("index lock").len()
    }

    pub fn records(&self) -> Vec<IndexRecord> {
        self.records.lock().expect("index lock").values().cloned().collect()
    }

    pub fn insert(&self, record: IndexRecord) {
        self.records
            .lock()
            .expect("index lock")
            .insert(record.chunk_id.clone(), record);
    }
}

#[async_trait]
impl IndexStore for MemoryIndex {
    async fn upsert(&self, records: &[IndexRecord]) -> Result<(), IndexError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(IndexError::NotReady("memory index is read-only".to_string()));
        }
        for record in records {
            self.insert(record.clone());
        }
        Ok(())
    }

    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: &MetadataFilter,
    ) -> Result<Vec<ScoredRecord>, IndexError> {
        if self.fail_queries {
            return Err(IndexError::Request("cluster red".to_string()));
        }
        let mut hits: Vec<ScoredRecord> = self
            .records
            .lock()
            .expect("index lock")
            .values()
            .filter(|record| filter.matches(record))
            .map(|record| ScoredRecord {
                score: cosine_similarity(vector, &record.vector),
                record: record.clone(),
            })
            .collect();
        sort_by_relevance(&mut hits);
        hits.truncate(top_k);
        Ok(hits)
    }

    async fn delete_by_document(&self, document_id: &str) -> Result<u64, IndexError> {
        let mut records = self.records.lock().expect("index lock");
        let before = records.len();
        records.retain(|_, record| record.document_id != document_id);
        Ok((before - records.len()) as u64)
    }

    async fn delete_by_document_except(
        &self,
        document_id: &str,
        keep: &[String],
    ) -> Result<u64, IndexError> {
        let mut records = self.records.lock().expect("index lock");
        let before = records.len();
        records.retain(|chunk_id, record| {
            record.document_id != document_id || keep.contains(chunk_id)
        });
        Ok((before - records.len()) as u64)
    }

    async fn list_documents(&self) -> Result<Vec<IndexedDocument>, IndexError> {
        let mut documents: BTreeMap<String, IndexedDocument> = BTreeMap::new();
        for record in self.records.lock().expect("index lock").values() {
            documents
                .entry(record.document_id.clone())
                .or_insert_with(|| IndexedDocument {
                    document_id: record.document_id.clone(),
                    source: record.source.clone(),
                    chunk_count: 0,
                })
                .chunk_count += 1;
        }
        Ok(documents.into_values().collect())
    }
}
