//! C6's LLM capability adapters (`spec.md` §4.6, §6).

use crate::domain::errors::AdvisorError;
use crate::domain::ports::{ChatClient, ChatMessage};
use async_trait::async_trait;
use reqwest_middleware::ClientWithMiddleware;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

/// An OpenAI-compatible chat-completions client. Covers `AI_PROVIDER` values
/// that speak the `/v1/chat/completions` wire format, which in practice is
/// most hosted and self-hosted providers the system targets.
pub struct OpenAiCompatibleChatClient {
    base_url: String,
    api_key: String,
    model: String,
    client: ClientWithMiddleware,
}

impl OpenAiCompatibleChatClient {
    pub fn new(base_url: String, api_key: String, model: String) -> Self {
        Self {
            base_url,
            api_key,
            model,
            client: crate::infrastructure::http_client::HttpClientFactory::create_client(Duration::from_secs(60)),
        }
    }
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage>,
    temperature: f64,
    max_tokens: u32,
}

#[derive(Serialize)]
struct WireMessage {
    role: &'static str,
    content: String,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: String,
}

#[async_trait]
impl ChatClient for OpenAiCompatibleChatClient {
    async fn chat(
        &self,
        messages: &[ChatMessage],
        temperature: f64,
        max_tokens: u32,
    ) -> Result<String, AdvisorError> {
        let wire_messages = messages
            .iter()
            .map(|m| WireMessage {
                role: match m.role {
                    crate::domain::ports::ChatRole::System => "system",
                    crate::domain::ports::ChatRole::User => "user",
                },
                content: m.content.clone(),
            })
            .collect();

        let request = ChatCompletionRequest {
            model: &self.model,
            messages: wire_messages,
            temperature,
            max_tokens,
        };

        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| AdvisorError::LlmCallFailed(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AdvisorError::LlmCallFailed(format!("HTTP {status}: {body}")));
        }

        let parsed: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| AdvisorError::LlmCallFailed(format!("invalid response body: {e}")))?;

        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| AdvisorError::LlmCallFailed("empty choices array".into()))
    }
}

/// Deterministic canned responses, keyed by a `kind` tag embedded in the
/// prompt by the caller. Used when `USE_AI_ANALYSIS=false` or no `AI_API_KEY`
/// is configured — observe-mode-safe, makes no network calls.
pub struct MockChatClient;

#[async_trait]
impl ChatClient for MockChatClient {
    async fn chat(
        &self,
        messages: &[ChatMessage],
        _temperature: f64,
        _max_tokens: u32,
    ) -> Result<String, AdvisorError> {
        let prompt = messages.iter().map(|m| m.content.as_str()).collect::<Vec<_>>().join("\n");
        warn!("MockChatClient invoked; no real AI analysis is being performed");

        if prompt.contains("复盘") || prompt.contains("review") {
            Ok(r#"{"summary": "no real analysis available in mock mode", "insights": []}"#.to_string())
        } else if prompt.contains("优化") || prompt.contains("optimi") {
            Ok(r#"{"strategies": []}"#.to_string())
        } else {
            Ok(r#"{"trend": "sideways", "action": "观望", "confidence": 0, "reason": "mock client: no analysis performed"}"#.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::ChatRole;

    #[tokio::test]
    async fn mock_client_returns_wait_action_by_default() {
        let client = MockChatClient;
        let messages = vec![ChatMessage { role: ChatRole::User, content: "analyze BTCUSDT".into() }];
        let response = client.chat(&messages, 0.3, 2000).await.unwrap();
        assert!(response.contains("观望"));
    }

    #[tokio::test]
    async fn mock_client_recognizes_review_prompts() {
        let client = MockChatClient;
        let messages = vec![ChatMessage { role: ChatRole::User, content: "请进行复盘分析".into() }];
        let response = client.chat(&messages, 0.3, 2000).await.unwrap();
        assert!(response.contains("insights"));
    }
}
