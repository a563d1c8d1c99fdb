//! Content generator seam and its HTTP JSON adapter.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::domain::Branding;
use crate::engine::rotator::ContentShape;
use crate::error::GenerationError;

#[derive(Debug, Clone, Serialize)]
pub struct GenerationRequest {
    pub account_id: i64,
    pub persona_key: String,
    pub persona_name: String,
    pub topic: String,
    pub shape: ContentShape,
    pub branding: Branding,
    /// 1-based generation attempt for this unit
    pub attempt: u32,
    /// Quality feedback from the previous attempt
    pub feedback: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedContent {
    pub text: String,
    /// Raw thread segments when the generator produced them itself
    pub segments: Vec<String>,
    /// Segment count the generator claims
    pub total_count: Option<usize>,
    pub hashtags: Vec<String>,
}

impl GeneratedContent {
    /// Text scored by the quality gate
    pub fn body(&self) -> String {
        if self.segments.is_empty() {
            self.text.clone()
        } else {
            self.segments.join(" ")
        }
    }
}

#[async_trait]
pub trait ContentGenerator: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<GeneratedContent, GenerationError>;
}

/// Wire shape of the generator response
#[derive(Debug, Deserialize)]
struct GeneratorResponse {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    segments: Option<Vec<String>>,
    #[serde(default)]
    total: Option<usize>,
    #[serde(default)]
    hashtags: Vec<String>,
}

fn parse_response(raw: &str) -> Result<GeneratedContent, GenerationError> {
    let resp: GeneratorResponse =
        serde_json::from_str(raw).map_err(|e| GenerationError::Malformed(e.to_string()))?;

    let segments: Vec<String> = resp
        .segments
        .unwrap_or_default()
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    let text = resp.text.map(|t| t.trim().to_string()).unwrap_or_default();

    if text.is_empty() && segments.is_empty() {
        return Err(GenerationError::Malformed("response has no text".into()));
    }

    Ok(GeneratedContent {
        text,
        segments,
        total_count: resp.total,
        hashtags: resp
            .hashtags
            .into_iter()
            .map(|h| h.trim().to_string())
            .filter(|h| !h.is_empty())
            .collect(),
    })
}

/// POSTs the request as JSON to a generation endpoint
pub struct HttpGenerator {
    http: Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpGenerator {
    pub fn new(endpoint: &str, api_key: Option<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        Ok(Self {
            http: Client::builder().timeout(timeout).build()?,
            endpoint: endpoint.to_string(),
            api_key,
        })
    }
}

#[async_trait]
impl ContentGenerator for HttpGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<GeneratedContent, GenerationError> {
        let mut req = self.http.post(&self.endpoint).json(request);
        if let Some(key) = &self.api_key {
            req = req.header("Authorization", format!("Bearer {}", key));
        }

        let resp = req.send().await?;
        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(GenerationError::Api(format!("{}: {}", status, body)));
        }

        parse_response(&body)
    }
}
