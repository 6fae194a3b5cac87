//! Analyzer for OpenAI-style moderation endpoints.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use url::Url;

use crate::toxicity::analyzer::{AnalyzerError, ToxicityAnalyzer};
use crate::toxicity::score::ToxicityScore;

pub const OPENAI_ANALYZER_NAME: &str = "openai";
pub const DEFAULT_OPENAI_ENDPOINT: &str = "https://api.openai.com/v1/moderations";

#[derive(Debug, Deserialize)]
struct ModerationResponse {
    #[serde(default)]
    results: Vec<ModerationEntry>,
}

#[derive(Debug, Deserialize)]
struct ModerationEntry {
    #[serde(default)]
    flagged: bool,
    #[serde(default)]
    category_scores: HashMap<String, f64>,
}

pub struct OpenAiModerationAnalyzer {
    client: Client,
    endpoint: Url,
    api_key: String,
}

impl OpenAiModerationAnalyzer {
    pub fn new(client: Client, endpoint: Url, api_key: String) -> Self {
        Self { client, endpoint, api_key }
    }

    fn parse(body: ModerationResponse) -> Result<ToxicityScore, AnalyzerError> {
        let result = body
            .results
            .into_iter()
            .next()
            .ok_or_else(|| AnalyzerError::Malformed("moderation response has no results".to_string()))?;

        tracing::trace!(flagged = result.flagged, "openai moderation result");

        Ok(ToxicityScore::from_categories(
            OPENAI_ANALYZER_NAME,
            result.category_scores,
        ))
    }
}

#[async_trait]
impl ToxicityAnalyzer for OpenAiModerationAnalyzer {
    fn name(&self) -> &str {
        OPENAI_ANALYZER_NAME
    }

    async fn score(&self, text: &str) -> Result<ToxicityScore, AnalyzerError> {
        if self.api_key.is_empty() {
            return Err(AnalyzerError::Unavailable("openai API key missing".to_string()));
        }

        let response = self
            .client
            .post(self.endpoint.clone())
            .bearer_auth(&self.api_key)
            .json(&json!({ "input": text }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AnalyzerError::Status {
                status: status.as_u16(),
                body: body.chars().take(200).collect(),
            });
        }

        let body: ModerationResponse = response
            .json()
            .await
            .map_err(|e| AnalyzerError::Malformed(e.to_string()))?;

        Self::parse(body)
    }
}
