//! Attribute-scoring analyzer speaking the Perspective comment-analysis API.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use url::Url;

use crate::toxicity::analyzer::{AnalyzerError, ToxicityAnalyzer};
use crate::toxicity::score::ToxicityScore;

pub const PERSPECTIVE_ANALYZER_NAME: &str = "perspective";
pub const DEFAULT_PERSPECTIVE_ENDPOINT: &str =
    "https://commentanalyzer.googleapis.com/v1alpha1/comments:analyze";

const REQUESTED_ATTRIBUTES: [&str; 8] = [
    "TOXICITY",
    "SEVERE_TOXICITY",
    "IDENTITY_ATTACK",
    "INSULT",
    "PROFANITY",
    "THREAT",
    "SEXUALLY_EXPLICIT",
    "FLIRTATION",
];

#[derive(Debug, Deserialize)]
struct AnalyzeResponse {
    #[serde(rename = "attributeScores", default)]
    attribute_scores: HashMap<String, AttributeScore>,
}

#[derive(Debug, Deserialize)]
struct AttributeScore {
    #[serde(rename = "summaryScore")]
    summary_score: SummaryScore,
}

#[derive(Debug, Deserialize)]
struct SummaryScore {
    value: f64,
}

pub struct PerspectiveAnalyzer {
    client: Client,
    endpoint: Url,
    api_key: String,
}

impl PerspectiveAnalyzer {
    pub fn new(client: Client, endpoint: Url, api_key: String) -> Self {
        Self { client, endpoint, api_key }
    }

    fn request_body(text: &str) -> serde_json::Value {
        let attributes: serde_json::Map<String, serde_json::Value> = REQUESTED_ATTRIBUTES
            .iter()
            .map(|attr| (attr.to_string(), json!({})))
            .collect();

        json!({
            "comment": { "text": text },
            "languages": ["en"],
            "requestedAttributes": attributes,
        })
    }

    fn parse(body: AnalyzeResponse) -> ToxicityScore {
        ToxicityScore::from_categories(
            PERSPECTIVE_ANALYZER_NAME,
            body.attribute_scores
                .into_iter()
                .map(|(attr, score)| (attr.to_lowercase(), score.summary_score.value)),
        )
    }
}

#[async_trait]
impl ToxicityAnalyzer for PerspectiveAnalyzer {
    fn name(&self) -> &str {
        PERSPECTIVE_ANALYZER_NAME
    }

    async fn score(&self, text: &str) -> Result<ToxicityScore, AnalyzerError> {
        if self.api_key.is_empty() {
            return Err(AnalyzerError::Unavailable("perspective API key missing".to_string()));
        }

        let mut url = self.endpoint.clone();
        url.query_pairs_mut().append_pair("key", &self.api_key);

        let response = self
            .client
            .post(url)
            .json(&Self::request_body(text))
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

        let body: AnalyzeResponse = response
            .json()
            .await
            .map_err(|e| AnalyzerError::Malformed(e.to_string()))?;

        Ok(Self::parse(body))
    }
}
