//! Chat-completions client for OpenAI-compatible APIs
//!
//! A small client with no domain logic. One type talks to three kinds of
//! servers that share the chat-completions wire format:
//!
//! - OpenAI (`https://api.openai.com/v1`, bearer auth)
//! - Azure OpenAI (per-deployment URLs, `api-key` header, `api-version` query)
//! - Local OpenAI-compatible servers such as LM Studio
//!
//! Requests that fail with a transient error (network, 429, 5xx) are retried a
//! bounded number of times with exponential backoff.
//!
//! # Example
//!
//! ```rust,ignore
//! use openai_client::{OpenAIClient, ChatRequest, Message};
//!
//! let client = OpenAIClient::azure("https://my-resource.openai.azure.com", key)
//!     .with_max_retries(2);
//!
//! let response = client.chat_completion(
//!     ChatRequest::new("gpt-4o-mini")
//!         .message(Message::system("Classify the text."))
//!         .message(Message::user("..."))
//!         .json_object(),
//! ).await?;
//! ```
//!
//! # Type-Safe Structured Output
//!
//! ```rust,ignore
//! #[derive(Deserialize, JsonSchema)]
//! struct Statement { accounts: Vec<Account> }
//!
//! let statement: Statement = client
//!     .extract::<Statement>("gpt-4o", system_prompt, user_prompt)
//!     .await?;
//! ```

pub mod error;
pub mod schema;
pub mod types;

pub use error::{OpenAIError, Result};
pub use schema::StructuredOutput;
pub use types::*;

use std::time::Duration;

use reqwest::Client;
use tracing::{debug, warn};

/// Default Azure OpenAI API version (structured outputs capable).
pub const DEFAULT_AZURE_API_VERSION: &str = "2024-08-01-preview";

const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(500);

/// How requests are addressed and authenticated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiFlavor {
    /// `{base_url}/chat/completions` with bearer auth.
    OpenAI,
    /// `{endpoint}/openai/deployments/{model}/chat/completions?api-version=...`
    /// with the `api-key` header.
    Azure { api_version: String },
}

/// Chat-completions client.
#[derive(Clone)]
pub struct OpenAIClient {
    http_client: Client,
    api_key: String,
    base_url: String,
    flavor: ApiFlavor,
    max_retries: u32,
    retry_delay: Duration,
}

impl OpenAIClient {
    /// Create a client for `api.openai.com` with the given API key.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            http_client: Client::new(),
            api_key: api_key.into(),
            base_url: "https://api.openai.com/v1".to_string(),
            flavor: ApiFlavor::OpenAI,
            max_retries: 2,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }

    /// Create a client for an Azure OpenAI resource.
    pub fn azure(endpoint: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: endpoint.into().trim_end_matches('/').to_string(),
            flavor: ApiFlavor::Azure {
                api_version: DEFAULT_AZURE_API_VERSION.to_string(),
            },
            ..Self::new(api_key)
        }
    }

    /// Create a client for a local OpenAI-compatible server (no real key needed).
    pub fn local(base_url: impl Into<String>) -> Self {
        Self::new("not-needed").with_base_url(base_url)
    }

    /// Create from environment variable `OPENAI_API_KEY`.
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| OpenAIError::Config("OPENAI_API_KEY not set".into()))?;
        Ok(Self::new(api_key))
    }

    /// Set a custom base URL (proxies, local servers).
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// Override the Azure API version. No effect on non-Azure clients.
    pub fn with_api_version(mut self, version: impl Into<String>) -> Self {
        if let ApiFlavor::Azure { api_version } = &mut self.flavor {
            *api_version = version.into();
        }
        self
    }

    /// Number of retries after the first attempt for transient failures.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Base delay for exponential backoff between retries.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Get the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Get the API flavor.
    pub fn flavor(&self) -> &ApiFlavor {
        &self.flavor
    }

    /// Get the retry budget.
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// URL of the chat-completions endpoint for a model.
    pub fn completions_url(&self, model: &str) -> String {
        match &self.flavor {
            ApiFlavor::OpenAI => format!("{}/chat/completions", self.base_url),
            ApiFlavor::Azure { api_version } => format!(
                "{}/openai/deployments/{}/chat/completions?api-version={}",
                self.base_url, model, api_version
            ),
        }
    }

    /// Type-safe structured output extraction.
    ///
    /// Builds a strict JSON schema from `T`, sends a system + user message
    /// pair and deserializes the reply.
    pub async fn extract<T: StructuredOutput>(
        &self,
        model: &str,
        system_prompt: impl Into<String>,
        user_prompt: impl Into<String>,
    ) -> Result<T> {
        let schema = T::strict_schema();

        debug!(
            type_name = T::type_name(),
            "Generated strict schema for extraction"
        );

        let request = ChatRequest::new(model)
            .message(Message::system(system_prompt))
            .message(Message::user(user_prompt))
            .temperature(0.2)
            .json_schema(T::type_name(), schema);

        let response = self.chat_completion(request).await?;

        serde_json::from_str(&response.content)
            .map_err(|e| OpenAIError::Parse(format!("Failed to deserialize response: {}", e)))
    }

    /// Chat completion with bounded retries.
    pub async fn chat_completion(&self, request: ChatRequest) -> Result<ChatResponse> {
        let start = std::time::Instant::now();
        let mut attempt = 0;

        loop {
            match self.send_once(&request).await {
                Ok(response) => {
                    debug!(
                        model = %request.model,
                        attempts = attempt + 1,
                        duration_ms = start.elapsed().as_millis(),
                        "Chat completion"
                    );
                    return Ok(response);
                }
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    let delay = self.retry_delay * 2u32.saturating_pow(attempt);
                    warn!(
                        model = %request.model,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis(),
                        error = %e,
                        "Chat completion failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn send_once(&self, request: &ChatRequest) -> Result<ChatResponse> {
        let builder = self
            .http_client
            .post(self.completions_url(&request.model))
            .header("Content-Type", "application/json");

        let builder = match &self.flavor {
            ApiFlavor::OpenAI => builder.bearer_auth(&self.api_key),
            ApiFlavor::Azure { .. } => builder.header("api-key", &self.api_key),
        };

        let response = builder
            .json(request)
            .send()
            .await
            .map_err(|e| OpenAIError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            warn!(status = %status, error = %error_text, "Chat completions API error");
            return Err(OpenAIError::Api {
                status: status.as_u16(),
                message: error_text,
            });
        }

        let raw: types::ChatResponseRaw = response
            .json()
            .await
            .map_err(|e| OpenAIError::Parse(e.to_string()))?;

        let message = raw
            .choices
            .into_iter()
            .next()
            .map(|c| c.message)
            .ok_or_else(|| OpenAIError::Parse("No choices in response".into()))?;

        match (message.content, message.refusal) {
            (Some(content), _) => Ok(ChatResponse {
                content,
                usage: raw.usage,
            }),
            (None, Some(refusal)) => Err(OpenAIError::Parse(format!("Model refused: {}", refusal))),
            (None, None) => Err(OpenAIError::Parse("Empty message content".into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openai_urls() {
        let client = OpenAIClient::new("sk-test").with_base_url("https://custom.api.com/");
        assert_eq!(client.base_url(), "https://custom.api.com");
        assert_eq!(
            client.completions_url("gpt-4o"),
            "https://custom.api.com/chat/completions"
        );
    }

    #[test]
    fn test_azure_urls() {
        let client = OpenAIClient::azure("https://nestq.openai.azure.com/", "key")
            .with_api_version("2024-10-21");
        assert_eq!(
            client.completions_url("gpt-4o-mini"),
            "https://nestq.openai.azure.com/openai/deployments/gpt-4o-mini/chat/completions?api-version=2024-10-21"
        );
    }

    #[test]
    fn test_api_version_ignored_for_openai() {
        let client = OpenAIClient::new("sk").with_api_version("2024-10-21");
        assert_eq!(client.flavor(), &ApiFlavor::OpenAI);
    }

    #[test]
    fn test_local_client() {
        let client = OpenAIClient::local("http://127.0.0.1:1234/v1").with_max_retries(4);
        assert_eq!(client.max_retries(), 4);
        assert_eq!(
            client.completions_url("meta-llama-3.1-8b-instruct"),
            "http://127.0.0.1:1234/v1/chat/completions"
        );
    }

    #[tokio::test]
    async fn test_unreachable_server_is_network_error_after_retries() {
        let client = OpenAIClient::local("http://127.0.0.1:9")
            .with_max_retries(1)
            .with_retry_delay(Duration::from_millis(1));

        let err = client
            .chat_completion(ChatRequest::new("any").message(Message::user("hi")))
            .await
            .unwrap_err();
        assert!(matches!(err, OpenAIError::Network(_)), "got {:?}", err);
    }
}
