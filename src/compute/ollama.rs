use std::time::Duration;

use async_trait::async_trait;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::compute::Compute;

const MAX_ATTEMPTS: u32 = 3;
const BACKOFF_BASE: Duration = Duration::from_millis(500);
const BACKOFF_JITTER_MS: u64 = 250;
const HTTP_TIMEOUT: Duration = Duration::from_secs(60);

/// Chat backend speaking the Ollama HTTP API.
pub struct OllamaCompute {
    client: Client,
    base_url: String,
    model_tag: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    stream: bool,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: String,
}

impl OllamaCompute {
    /// Map a friendly model key to the exact tag the server knows. An
    /// unrecognized key falls back to the default model.
    pub fn new(model_key: &str, base_url: impl Into<String>) -> OllamaCompute {
        let model_tag = match model_key {
            "llama3" => "llama3:latest",
            "deepseek-llm-7b" => "deepseek-llm:7b",
            other => {
                warn!(model = other, "unknown model key, falling back to llama3");
                "llama3:latest"
            }
        };

        let client = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .unwrap_or_else(|_| Client::new());

        OllamaCompute {
            client,
            base_url: base_url.into(),
            model_tag: model_tag.to_string(),
        }
    }

    fn chat_url(&self) -> String {
        format!("{}/api/chat", self.base_url)
    }

    async fn chat_once(&self, prompt: &str) -> Result<String, reqwest::Error> {
        let request = ChatRequest {
            model: &self.model_tag,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            stream: false,
        };
        let response: ChatResponse = self
            .client
            .post(self.chat_url())
            .json(&request)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(response.message.content)
    }
}

#[async_trait]
impl Compute for OllamaCompute {
    async fn ask(&self, prompt: &str) -> String {
        if prompt.is_empty() {
            return "error: empty prompt".to_string();
        }

        let mut rng = SmallRng::from_entropy();
        let mut last_error = String::new();
        for attempt in 0..MAX_ATTEMPTS {
            match self.chat_once(prompt).await {
                Ok(answer) => {
                    debug!(model = %self.model_tag, attempt, "backend answered");
                    return answer;
                }
                Err(err) => {
                    last_error = err.to_string();
                    warn!(model = %self.model_tag, attempt, error = %last_error, "backend call failed");
                }
            }
            if attempt + 1 < MAX_ATTEMPTS {
                let backoff = BACKOFF_BASE * 2u32.pow(attempt)
                    + Duration::from_millis(rng.gen_range(0..BACKOFF_JITTER_MS));
                sleep(backoff).await;
            }
        }

        format!("error: backend unavailable after {MAX_ATTEMPTS} attempts: {last_error}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_model_key_falls_back() {
        let backend = OllamaCompute::new("no-such-model", "http://ollama:11434");
        assert_eq!(backend.model_tag, "llama3:latest");
    }

    #[tokio::test]
    async fn empty_prompt_is_an_error_string() {
        let backend = OllamaCompute::new("llama3", "http://ollama:11434");
        let answer = backend.ask("").await;
        assert!(answer.starts_with("error:"));
    }
}
