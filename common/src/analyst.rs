//! Deep analysis of escalated transactions by a remote language model.
//!
//! Callers only see [`DeepAnalyzer`]: a batch of minimal payloads goes in, a
//! map keyed by transaction id comes out. Every failure is logged and turns
//! into an empty map, so a transaction missing from the map simply keeps its
//! rule-based score.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use anyhow::{Context, anyhow};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// The only transaction fields that leave the service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidatePayload {
    pub transaction_id: String,
    pub amount: f64,
    pub customer_id: String,
    pub counterparty: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeepVerdict {
    pub score: i64,
    pub reasoning: String,
}

#[async_trait]
pub trait DeepAnalyzer: Send + Sync {
    async fn analyze(&self, candidates: &[CandidatePayload]) -> HashMap<String, DeepVerdict>;

    fn is_enabled(&self) -> bool {
        true
    }
}

/// Used when no API key is configured.
pub struct OfflineAnalyst;

#[async_trait]
impl DeepAnalyzer for OfflineAnalyst {
    async fn analyze(&self, candidates: &[CandidatePayload]) -> HashMap<String, DeepVerdict> {
        if !candidates.is_empty() {
            log::debug!(
                "Deep analysis disabled, {} candidates keep rule-based scores",
                candidates.len()
            );
        }
        HashMap::new()
    }

    fn is_enabled(&self) -> bool {
        false
    }
}

const SYSTEM_PROMPT: &str = "You are a senior fraud analyst reviewing payment transactions \
that automated rules marked as high risk. For every transaction you receive, assess how likely \
it is to be fraudulent or money laundering, considering the amount, the customer and the \
counterparty. Reply with a single JSON object and nothing else, shaped exactly as \
{\"analyses\": [{\"transaction_id\": string, \"risk_score\": integer 0-100, \"reasoning\": string}]}. \
Include one entry per transaction and keep each reasoning to at most two sentences.";

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

/// Client for an OpenAI-compatible `/chat/completions` endpoint.
pub struct OpenAiAnalyst {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAiAnalyst {
    pub fn new(api_key: &str, base_url: &str, model: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client for deep analysis")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
        })
    }

    async fn request_analysis(
        &self,
        candidates: &[CandidatePayload],
    ) -> anyhow::Result<HashMap<String, DeepVerdict>> {
        let body = json!({
            "model": self.model,
            "temperature": 0.2,
            "response_format": { "type": "json_object" },
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": build_user_prompt(candidates)? },
            ],
        });

        let url = format!("{}/chat/completions", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("Request to {} failed", url))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(anyhow!("Analysis service returned {}: {}", status, text));
        }

        let completion: ChatCompletionResponse = response
            .json()
            .await
            .context("Analysis service returned an unexpected response body")?;
        let content = completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| anyhow!("Analysis service returned no message content"))?;

        let wanted: HashSet<&str> = candidates.iter().map(|c| c.transaction_id.as_str()).collect();
        let mut verdicts = parse_analysis(&content)?;
        verdicts.retain(|id, _| wanted.contains(id.as_str()));
        Ok(verdicts)
    }
}

#[async_trait]
impl DeepAnalyzer for OpenAiAnalyst {
    async fn analyze(&self, candidates: &[CandidatePayload]) -> HashMap<String, DeepVerdict> {
        if candidates.is_empty() {
            return HashMap::new();
        }
        match self.request_analysis(candidates).await {
            Ok(verdicts) => {
                log::info!(
                    "Deep analysis returned {} verdicts for {} candidates",
                    verdicts.len(),
                    candidates.len()
                );
                verdicts
            }
            Err(e) => {
                log::warn!(
                    "Deep analysis failed for {} candidates, keeping rule-based scores: {:#}",
                    candidates.len(),
                    e
                );
                HashMap::new()
            }
        }
    }
}

pub fn build_user_prompt(candidates: &[CandidatePayload]) -> anyhow::Result<String> {
    let transactions =
        serde_json::to_string_pretty(candidates).context("Failed to serialize candidates")?;
    Ok(format!(
        "Analyze these {} transactions:\n{}",
        candidates.len(),
        transactions
    ))
}

fn strip_code_fence(content: &str) -> &str {
    let trimmed = content.trim();
    match trimmed.strip_prefix("```") {
        Some(rest) => {
            let rest = rest.strip_prefix("json").unwrap_or(rest);
            rest.strip_suffix("```").unwrap_or(rest).trim()
        }
        None => trimmed,
    }
}

fn verdict_from_entry(entry: &Value) -> anyhow::Result<(String, DeepVerdict)> {
    let id = match entry.get("transaction_id") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => return Err(anyhow!("Analysis entry has no usable `transaction_id`: {}", entry)),
    };
    let score = entry
        .get("risk_score")
        .and_then(Value::as_f64)
        .ok_or_else(|| anyhow!("Analysis entry {} has no numeric `risk_score`", id))?;
    let reasoning = entry
        .get("reasoning")
        .and_then(Value::as_str)
        .ok_or_else(|| anyhow!("Analysis entry {} has no `reasoning`", id))?;
    Ok((
        id,
        DeepVerdict {
            score: (score.round() as i64).clamp(0, 100),
            reasoning: reasoning.to_string(),
        },
    ))
}

/// Parses the model's message content. The batch is all-or-nothing: a missing
/// `analyses` array or any malformed entry fails the whole reply.
pub fn parse_analysis(content: &str) -> anyhow::Result<HashMap<String, DeepVerdict>> {
    let value: Value = serde_json::from_str(strip_code_fence(content))
        .context("Analysis content is not valid JSON")?;
    let entries = value
        .get("analyses")
        .and_then(Value::as_array)
        .ok_or_else(|| anyhow!("Analysis content has no `analyses` array"))?;

    entries.iter().map(verdict_from_entry).collect()
}
