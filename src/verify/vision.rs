//! Vision model client
//!
//! Talks to any OpenAI-compatible chat-completions endpoint, sending the
//! screenshot inline as a `data:` URL next to the text prompt.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::config::VisionConfig;
use crate::error::{AppError, Result};
use crate::metrics::{VISION_REQUEST_DURATION_SECONDS, VISION_REQUESTS_TOTAL};

/// Anything that can look at an image and answer a prompt with text
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VisionClient: Send + Sync {
    async fn describe(&self, image: &[u8], mime_type: &str, prompt: &str) -> Result<String>;
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<ChatMessage>,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: Vec<ContentPart>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

/// OpenAI-compatible vision client
#[derive(Debug, Clone)]
pub struct OpenAiVisionClient {
    client: reqwest::Client,
    api_key: String,
    endpoint: String,
    model: String,
    max_tokens: u32,
}

impl OpenAiVisionClient {
    /// Build a client; `None` when no API key is configured
    pub fn from_config(config: &VisionConfig) -> Result<Option<Self>> {
        let Some(api_key) = config
            .api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
        else {
            return Ok(None);
        };

        let client = reqwest::Client::builder()
            .user_agent(concat!("toxic-philosopher/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(config.timeout_seconds.max(1)))
            .build()?;

        Ok(Some(Self {
            client,
            api_key: api_key.to_string(),
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
        }))
    }

    async fn call(&self, image: &[u8], mime_type: &str, prompt: &str) -> Result<String> {
        let data_url = format!(
            "data:{};base64,{}",
            mime_type,
            base64::engine::general_purpose::STANDARD.encode(image)
        );

        let request = ChatRequest {
            model: &self.model,
            max_tokens: self.max_tokens,
            messages: vec![ChatMessage {
                role: "user",
                content: vec![
                    ContentPart::Text {
                        text: prompt.to_string(),
                    },
                    ContentPart::ImageUrl {
                        image_url: ImageUrl { url: data_url },
                    },
                ],
            }],
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AppError::Vision("vision request timed out".to_string())
                } else {
                    AppError::Vision(format!("vision request failed: {}", e))
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Vision(format!(
                "vision API error {}: {}",
                status, body
            )));
        }

        let chat: ChatResponse = response
            .json()
            .await
            .map_err(|e| AppError::Vision(format!("failed to parse vision response: {}", e)))?;

        chat.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| AppError::Vision("vision model returned no content".to_string()))
    }
}

#[async_trait]
impl VisionClient for OpenAiVisionClient {
    async fn describe(&self, image: &[u8], mime_type: &str, prompt: &str) -> Result<String> {
        let started = Instant::now();
        let result = self.call(image, mime_type, prompt).await;

        VISION_REQUEST_DURATION_SECONDS
            .with_label_values(&[self.model.as_str()])
            .observe(started.elapsed().as_secs_f64());
        let status = if result.is_ok() { "ok" } else { "error" };
        VISION_REQUESTS_TOTAL.with_label_values(&[status]).inc();

        if let Err(error) = &result {
            tracing::error!(%error, model = %self.model, "Vision request failed");
        }
        result
    }
}
