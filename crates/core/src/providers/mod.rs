//! HTTP adapters for the capability traits.

pub mod huggingface;
pub mod openai;

pub use huggingface::HuggingFaceTokenClassifier;
pub use openai::{OpenAiChat, OpenAiEmbeddings};

use crate::error::{CapabilityError, RagError};
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use url::Url;

pub(crate) fn build_client(timeout: Duration) -> Result<Client, RagError> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|error| RagError::Configuration(format!("http client setup failed: {error}")))
}

pub(crate) fn parse_base_url(raw: &str) -> Result<String, RagError> {
    let parsed = Url::parse(raw)
        .map_err(|error| RagError::Configuration(format!("invalid endpoint {raw}: {error}")))?;
    Ok(parsed.as_str().trim_end_matches('/').to_string())
}

pub(crate) async fn post_json(
    client: &Client,
    url: &str,
    api_key: Option<&str>,
    body: &Value,
) -> Result<Value, CapabilityError> {
    let mut request = client
        .post(url)
        .header("content-type", "application/json")
        .json(body);

    if let Some(api_key) = api_key {
        request = request.bearer_auth(api_key);
    }

    let response = request.send().await?;
    let status = response.status();
    if !status.is_success() {
        let text = response.text().await.unwrap_or_default();
        return Err(CapabilityError::from_status(status, &text));
    }

    response
        .json::<Value>()
        .await
        .map_err(|error| CapabilityError::Rejected(format!("undecodable response from {url}: {error}")))
}
