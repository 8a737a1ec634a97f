/// Advisory commentary on generated signals using the OpenAI API
///
/// The commentary is appended to the signal narrative only. It never changes
/// direction, confidence or whether an order is placed.

use crate::models::TradingSignal;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const OPENAI_API_URL: &str = "https://api.openai.com/v1/chat/completions";
const MAX_TOKENS: u32 = 300;
const RETRY_DELAY_MS: u64 = 1000;
const MAX_RETRIES: u32 = 3;

#[async_trait]
pub trait Advisor: Send + Sync {
    async fn analyze(&self, signal: &TradingSignal) -> Result<String>;
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<Message>,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: MessageContent,
}

#[derive(Debug, Deserialize)]
struct MessageContent {
    content: String,
}

pub struct OpenAiAdvisor {
    api_key: String,
    model: String,
    url: String,
    client: reqwest::Client,
}

impl OpenAiAdvisor {
    pub fn new(api_key: String, model: String) -> Self {
        Self {
            api_key,
            model,
            url: OPENAI_API_URL.to_string(),
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
        }
    }

    /// Point at a different chat-completions endpoint
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    fn create_prompt(signal: &TradingSignal) -> Result<String> {
        let snapshot = serde_json::to_string_pretty(&signal.structure_snapshot)?;
        Ok(format!(
            "Signal: {} {} on {} at {:.2}\nConfidence: {:.0}% ({})\nStop: {:.2}  Target: {:.2}\n\
             Market context:\n{}\n\nFactor breakdown:\n{}\n\n\
             In at most three sentences, comment on the quality of this setup for a discretionary trader.",
            signal.signal_type.as_str(),
            signal.symbol,
            signal.timeframe,
            signal.entry_price,
            signal.confidence,
            signal.strength.as_str(),
            signal.stop_loss,
            signal.take_profit,
            snapshot,
            signal.narrative
        ))
    }
}

#[async_trait]
impl Advisor for OpenAiAdvisor {
    async fn analyze(&self, signal: &TradingSignal) -> Result<String> {
        let prompt = Self::create_prompt(signal)?;
        let mut last_error = String::new();

        for attempt in 1..=MAX_RETRIES {
            if attempt > 1 {
                let delay_ms = RETRY_DELAY_MS * 2_u64.pow(attempt - 2);
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            }

            let request = ChatRequest {
                model: self.model.clone(),
                max_tokens: MAX_TOKENS,
                temperature: 0.2,
                messages: vec![
                    Message {
                        role: "system".to_string(),
                        content: "You are a senior ICT (Inner Circle Trader) analyst. Be concise and concrete.".to_string(),
                    },
                    Message {
                        role: "user".to_string(),
                        content: prompt.clone(),
                    },
                ],
            };

            let response = match self
                .client
                .post(&self.url)
                .header("Authorization", format!("Bearer {}", &self.api_key))
                .json(&request)
                .send()
                .await
            {
                Ok(r) => r,
                Err(e) => {
                    last_error = format!("Network error: {}", e);
                    continue;
                }
            };

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                last_error = format!("OpenAI API error {}: {}", status, body);

                // Only rate limits and server errors are worth another attempt
                if status.as_u16() == 429 || status.is_server_error() {
                    continue;
                }
                anyhow::bail!(last_error);
            }

            let chat: ChatResponse = response
                .json()
                .await
                .context("Failed to parse OpenAI response")?;

            let text = chat
                .choices
                .into_iter()
                .next()
                .map(|c| c.message.content.trim().to_string())
                .context("OpenAI response had no choices")?;

            return Ok(text);
        }

        anyhow::bail!("Advisor gave up after {} attempts: {}", MAX_RETRIES, last_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ict::MarketStructure;
    use crate::models::Bias;
    use crate::strategy::{FusionInput, SignalFusionEngine};

    fn hold_signal() -> TradingSignal {
        let structure = MarketStructure::ranging();
        SignalFusionEngine::default().fuse(&FusionInput {
            symbol: "XAUUSD",
            timeframe: "M15",
            price: 1940.0,
            session: None,
            session_bias: Bias::Neutral,
            structure: &structure,
            zones: &[],
            sentiment: None,
            atr: None,
        })
    }

    #[test]
    fn test_prompt_contains_signal_context() {
        let prompt = OpenAiAdvisor::create_prompt(&hold_signal()).unwrap();
        assert!(prompt.contains("HOLD XAUUSD on M15"));
        assert!(prompt.contains("zones_used"));
    }

    #[tokio::test]
    async fn test_returns_first_choice() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/v1/chat/completions")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"choices":[{"message":{"content":"  No edge here, stand aside. "}}]}"#)
            .create_async()
            .await;

        let advisor = OpenAiAdvisor::new("test-key".to_string(), "gpt-4o-mini".to_string())
            .with_url(format!("{}/v1/chat/completions", server.url()));

        let text = advisor.analyze(&hold_signal()).await.unwrap();
        assert_eq!(text, "No edge here, stand aside.");
    }

    #[tokio::test]
    async fn test_client_errors_are_not_retried() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/chat/completions")
            .with_status(401)
            .with_body("invalid api key")
            .expect(1)
            .create_async()
            .await;

        let advisor = OpenAiAdvisor::new("bad".to_string(), "gpt-4o-mini".to_string())
            .with_url(format!("{}/v1/chat/completions", server.url()));

        assert!(advisor.analyze(&hold_signal()).await.is_err());
        mock.assert_async().await;
    }
}
