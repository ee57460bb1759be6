//! External language-model port
//!
//! Thin chat-completion client behind the `DemandEstimator` and
//! `DialoguePort` traits so the pipeline never depends on a live API.
//! Responses are free text; `parse_json_from_text` digs the first JSON
//! object out of whatever the model wrapped it in.

use crate::models::{Config, InventoryRecord, SalesEvent};
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Forecast shape returned by the external estimator.
#[derive(Debug, Clone, Deserialize)]
pub struct EstimatedForecast {
    #[serde(alias = "forecast")]
    pub daily: Vec<f64>,
    pub confidence: f64,
    #[serde(default)]
    pub explanation: String,
}

/// Produces a 7-day demand estimate for one SKU.
pub trait DemandEstimator: Send + Sync {
    fn estimate(
        &self,
        item: &InventoryRecord,
        recent_sales: &[SalesEvent],
        timeout: Duration,
    ) -> Result<EstimatedForecast>;
}

/// Produces short natural-language agent dialogue.
pub trait DialoguePort: Send + Sync {
    fn compose(&self, prompt: &str, max_tokens: u32, timeout: Duration) -> Result<String>;
}

/// Chat-completion client for any OpenAI-compatible endpoint.
pub struct LlmClient {
    http: reqwest::blocking::Client,
    api_url: String,
    api_key: String,
    forecast_model: String,
    dialogue_model: String,
}

impl LlmClient {
    /// None when no API key is configured; callers fall back to
    /// deterministic logic.
    pub fn from_config(config: &Config) -> Option<Self> {
        let api_key = config.llm_api_key.clone()?;
        let api_url = config
            .llm_api_url
            .clone()
            .unwrap_or_else(|| "https://api.groq.com/openai/v1/chat/completions".to_string());
        let http = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .ok()?;
        Some(Self {
            http,
            api_url,
            api_key,
            forecast_model: config.llm_forecast_model.clone(),
            dialogue_model: config.llm_dialogue_model.clone(),
        })
    }

    pub fn chat_completion(
        &self,
        model: &str,
        system: &str,
        user: &str,
        max_tokens: u32,
        timeout: Duration,
    ) -> Result<String> {
        let start = Instant::now();

        let req = ChatCompletionRequest {
            model: model.to_string(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: system.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: user.to_string(),
                },
            ],
            temperature: Some(0.3),
            max_tokens: Some(max_tokens),
        };

        let resp = self
            .http
            .post(&self.api_url)
            .timeout(timeout)
            .header(
                reqwest::header::AUTHORIZATION,
                format!("Bearer {}", self.api_key),
            )
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .json(&req)
            .send()
            .context("llm request")?;

        let status = resp.status();
        let body = resp.text().unwrap_or_default();

        if !status.is_success() {
            let snippet: String = body.chars().take(400).collect();
            return Err(anyhow!("llm {}: {}", status.as_u16(), snippet));
        }

        let parsed: ChatCompletionResponse =
            serde_json::from_str(&body).context("llm json parse")?;
        let content = parsed
            .choices
            .first()
            .and_then(|c| c.message.as_ref())
            .map(|m| m.content.clone())
            .unwrap_or_default();

        debug!(
            model,
            latency_ms = start.elapsed().as_millis() as u64,
            "LLM call completed"
        );

        Ok(content)
    }
}

impl DemandEstimator for LlmClient {
    fn estimate(
        &self,
        item: &InventoryRecord,
        recent_sales: &[SalesEvent],
        timeout: Duration,
    ) -> Result<EstimatedForecast> {
        let sales_snippet: Vec<serde_json::Value> = recent_sales
            .iter()
            .take(30)
            .map(|s| serde_json::json!({"q": s.sold_quantity, "d": s.date.date_naive().to_string()}))
            .collect();

        let mut item_snippet = serde_json::json!({
            "sku": item.sku,
            "name": item.product_name,
            "stock": item.quantity,
            "threshold": item.threshold,
            "price": item.unit_price,
            "lead_days": item.lead_time_days,
        });
        if !item.semantic_facts.is_empty() {
            let facts: Vec<serde_json::Value> = item
                .semantic_facts
                .iter()
                .map(|f| serde_json::json!({"category": f.category, "value": f.value}))
                .collect();
            item_snippet["known_facts"] = serde_json::Value::Array(facts);
        }

        let user = format!(
            "Forecast daily demand for the next 7 days.\n\
             ITEM: {}\nRECENT SALES (newest first): {}\n\n\
             Respond with JSON only: {{\"daily\": [7 numbers], \"confidence\": 0-1, \"explanation\": \"...\"}}",
            item_snippet,
            serde_json::Value::Array(sales_snippet),
        );

        let raw = self.chat_completion(
            &self.forecast_model,
            "You are a demand forecasting analyst for a supply chain system.",
            &user,
            500,
            timeout,
        )?;

        let value =
            parse_json_from_text(&raw).ok_or_else(|| anyhow!("no JSON object in response"))?;
        let mut estimate: EstimatedForecast =
            serde_json::from_value(value).context("forecast shape mismatch")?;

        if estimate.daily.len() != 7 || estimate.daily.iter().any(|d| !d.is_finite() || *d < 0.0) {
            return Err(anyhow!("invalid daily vector"));
        }
        estimate.confidence = estimate.confidence.clamp(0.0, 1.0);
        Ok(estimate)
    }
}

impl DialoguePort for LlmClient {
    fn compose(&self, prompt: &str, max_tokens: u32, timeout: Duration) -> Result<String> {
        let text = self.chat_completion(
            &self.dialogue_model,
            "You speak for one agent in a multi-agent supply chain system. Reply with the message text only.",
            prompt,
            max_tokens,
            timeout,
        )?;
        let trimmed = text.trim().trim_matches('"').to_string();
        if trimmed.is_empty() {
            warn!("LLM returned empty dialogue");
            return Err(anyhow!("empty dialogue"));
        }
        Ok(trimmed)
    }
}

/// Extract the first top-level JSON object from free text (models love
/// to wrap JSON in prose or code fences).
pub fn parse_json_from_text(text: &str) -> Option<serde_json::Value> {
    if let Ok(value) = serde_json::from_str(text.trim()) {
        return Some(value);
    }

    let bytes = text.as_bytes();
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, &b) in bytes.iter().enumerate().skip(start) {
        match b {
            b'"' if !escaped => in_string = !in_string,
            b'{' if !in_string => depth += 1,
            b'}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return serde_json::from_str(&text[start..=i]).ok();
                }
            }
            _ => {}
        }
        escaped = b == b'\\' && !escaped;
    }
    None
}

#[derive(Debug, Clone, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Clone, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatChoice {
    message: Option<ChatMessageOut>,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatMessageOut {
    content: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_json() {
        let value = parse_json_from_text(r#"{"daily": [1,2,3], "confidence": 0.8}"#).unwrap();
        assert_eq!(value["confidence"], 0.8);
    }

    #[test]
    fn parses_json_wrapped_in_prose() {
        let text = "Sure! Here is the forecast:\n```json\n{\"daily\": [5,5,5,5,5,5,5], \"confidence\": 0.7, \"explanation\": \"steady\"}\n```\nLet me know.";
        let value = parse_json_from_text(text).unwrap();
        assert_eq!(value["daily"].as_array().unwrap().len(), 7);
    }

    #[test]
    fn handles_braces_inside_strings() {
        let text = r#"prefix {"explanation": "use {caution}", "confidence": 0.5} suffix"#;
        let value = parse_json_from_text(text).unwrap();
        assert_eq!(value["explanation"], "use {caution}");
    }

    #[test]
    fn no_json_yields_none() {
        assert!(parse_json_from_text("no structured data here").is_none());
    }
}
