//! OpenAI-compatible `/embeddings` and `/chat/completions` clients.
//!
//! Works against OpenAI itself and the compatible endpoints exposed by Ollama,
//! vLLM, LiteLLM and Bedrock access gateways.

use super::{build_client, parse_base_url, post_json};
use crate::error::{CapabilityError, RagError};
use crate::traits::{ChatModel, EmbeddingModel, GenerationOptions, ImageInput};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

pub struct OpenAiEmbeddings {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    model_id: String,
    dimensions: usize,
}

impl OpenAiEmbeddings {
    pub fn new(
        base_url: &str,
        model_id: impl Into<String>,
        dimensions: usize,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, RagError> {
        Ok(Self {
            client: build_client(timeout)?,
            base_url: parse_base_url(base_url)?,
            api_key,
            model_id: model_id.into(),
            dimensions,
        })
    }
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingItem {
    #[serde(default)]
    index: Option<usize>,
    embedding: Vec<f32>,
}

fn parse_embeddings(payload: Value, expected: usize) -> Result<Vec<Vec<f32>>, CapabilityError> {
    let mut response: EmbeddingResponse = serde_json::from_value(payload)
        .map_err(|error| CapabilityError::Rejected(format!("malformed embedding response: {error}")))?;

    if response.data.len() != expected {
        return Err(CapabilityError::Rejected(format!(
            "embedding response has {} items for {expected} inputs",
            response.data.len()
        )));
    }

    if response.data.iter().all(|item| item.index.is_some()) {
        response.data.sort_by_key(|item| item.index);
    }

    Ok(response.data.into_iter().map(|item| item.embedding).collect())
}

#[async_trait]
impl EmbeddingModel for OpenAiEmbeddings {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, CapabilityError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let body = json!({
            "model": self.model_id,
            "input": texts,
        });
        let payload = post_json(
            &self.client,
            &format!("{}/embeddings", self.base_url),
            self.api_key.as_deref(),
            &body,
        )
        .await?;
        parse_embeddings(payload, texts.len())
    }
}

pub struct OpenAiChat {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    model_id: String,
    vision: bool,
}

impl OpenAiChat {
    pub fn new(
        base_url: &str,
        model_id: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, RagError> {
        Ok(Self {
            client: build_client(timeout)?,
            base_url: parse_base_url(base_url)?,
            api_key,
            model_id: model_id.into(),
            vision: false,
        })
    }

    /// Declares that the model accepts page images.
    pub fn with_vision(mut self, vision: bool) -> Self {
        self.vision = vision;
        self
    }

    async fn complete(&self, content: Value, options: &GenerationOptions) -> Result<String, CapabilityError> {
        let body = json!({
            "model": self.model_id,
            "messages": [{"role": "user", "content": content}],
            "temperature": options.temperature,
            "max_tokens": options.max_tokens,
        });
        let payload = post_json(
            &self.client,
            &format!("{}/chat/completions", self.base_url),
            self.api_key.as_deref(),
            &body,
        )
        .await?;
        parse_completion(&payload)
    }
}

fn parse_completion(payload: &Value) -> Result<String, CapabilityError> {
    payload
        .pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| CapabilityError::Rejected("chat response has no message content".to_string()))
}

fn image_content(prompt: &str, images: &[ImageInput]) -> Value {
    let mut parts = vec![json!({"type": "text", "text": prompt})];
    parts.extend(images.iter().map(|image| {
        json!({
            "type": "image_url",
            "image_url": {
                "url": format!("data:{};base64,{}", image.media_type, STANDARD.encode(&image.bytes))
            }
        })
    }));
    Value::Array(parts)
}

#[async_trait]
impl ChatModel for OpenAiChat {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn supports_images(&self) -> bool {
        self.vision
    }

    async fn generate(&self, prompt: &str, options: &GenerationOptions) -> Result<String, CapabilityError> {
        self.complete(Value::String(prompt.to_string()), options).await
    }

    async fn generate_with_images(
        &self,
        prompt: &str,
        images: &[ImageInput],
        options: &GenerationOptions,
    ) -> Result<String, CapabilityError> {
        if !self.vision {
            return Err(CapabilityError::Rejected(format!(
                "model {} is not configured for images",
                self.model_id
            )));
        }
        self.complete(image_content(prompt, images), options).await
    }
}
