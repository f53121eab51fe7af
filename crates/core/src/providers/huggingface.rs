use super::{build_client, parse_base_url, post_json};
use crate::error::{CapabilityError, RagError};
use crate::traits::{TokenClassifier, TokenPrediction};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

/// Token classification over a Hugging Face inference-style endpoint
/// (`POST {"inputs": text}` returning one object per token).
pub struct HuggingFaceTokenClassifier {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HuggingFaceTokenClassifier {
    pub fn new(endpoint: &str, api_key: Option<String>, timeout: Duration) -> Result<Self, RagError> {
        Ok(Self {
            client: build_client(timeout)?,
            endpoint: parse_base_url(endpoint)?,
            api_key,
        })
    }
}

#[derive(Debug, Deserialize)]
struct RawToken {
    #[serde(default)]
    entity: Option<String>,
    #[serde(default)]
    entity_group: Option<String>,
    score: f32,
    start: Option<usize>,
    end: Option<usize>,
}

fn parse_tokens(payload: Value) -> Result<Vec<TokenPrediction>, CapabilityError> {
    // Some deployments wrap single inputs in a batch array.
    let payload = match payload {
        Value::Array(items) if matches!(items.first(), Some(Value::Array(_))) => {
            items.into_iter().next().unwrap_or(Value::Array(Vec::new()))
        }
        other => other,
    };

    let tokens: Vec<RawToken> = serde_json::from_value(payload)
        .map_err(|error| CapabilityError::Rejected(format!("malformed classifier response: {error}")))?;

    tokens
        .into_iter()
        .map(|token| {
            let category = token.entity_group.or(token.entity).ok_or_else(|| {
                CapabilityError::Rejected("classifier token has no label".to_string())
            })?;
            let (start, end) = token.start.zip(token.end).ok_or_else(|| {
                CapabilityError::Rejected("classifier token has no offsets".to_string())
            })?;
            Ok(TokenPrediction {
                start,
                end,
                category,
                confidence: token.score,
            })
        })
        .collect()
}

#[async_trait]
impl TokenClassifier for HuggingFaceTokenClassifier {
    async fn classify(&self, text: &str) -> Result<Vec<TokenPrediction>, CapabilityError> {
        let body = json!({
            "inputs": text,
            "parameters": {"aggregation_strategy": "none"},
        });
        let payload = post_json(&self.client, &self.endpoint, self.api_key.as_deref(), &body).await?;
        parse_tokens(payload)
    }
}
