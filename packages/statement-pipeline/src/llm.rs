//! LLM provider abstraction.
//!
//! The pipeline talks to a chat-completion model in two places: the fallback
//! relevance classifier and the final statement extraction. Both go through
//! [`LlmProvider`], so a hosted model, a local OpenAI-compatible server, or a
//! scripted mock can be swapped in by configuration.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use openai_client::{ChatRequest, Message, OpenAIClient, OpenAIError, StructuredOutput};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, instrument};

use crate::error::LlmError;

/// Temperature used for every pipeline completion.
pub const DEFAULT_TEMPERATURE: f32 = 0.2;

/// Shape the provider should constrain its reply to.
#[derive(Debug, Clone, PartialEq)]
pub enum OutputFormat {
    Text,
    JsonObject,
    JsonSchema { name: String, schema: Value },
}

/// A provider-neutral chat completion request.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub temperature: f32,
    pub format: OutputFormat,
}

impl CompletionRequest {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            messages: Vec::new(),
            temperature: DEFAULT_TEMPERATURE,
            format: OutputFormat::Text,
        }
    }

    pub fn system(mut self, content: impl Into<String>) -> Self {
        self.messages.push(Message::system(content));
        self
    }

    pub fn user(mut self, content: impl Into<String>) -> Self {
        self.messages.push(Message::user(content));
        self
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn json_object(mut self) -> Self {
        self.format = OutputFormat::JsonObject;
        self
    }

    pub fn json_schema(mut self, name: impl Into<String>, schema: Value) -> Self {
        self.format = OutputFormat::JsonSchema {
            name: name.into(),
            schema,
        };
        self
    }

    /// Concatenated user message content.
    pub fn user_content(&self) -> String {
        self.messages
            .iter()
            .filter(|m| m.role == "user")
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Provider name recorded in scan provenance.
    fn name(&self) -> &str;

    /// Run one completion and return the raw message content.
    async fn complete(&self, request: CompletionRequest) -> Result<String, LlmError>;
}

/// Request `T` as strict structured output and deserialize the reply.
pub async fn complete_structured<T: StructuredOutput>(
    llm: &dyn LlmProvider,
    model: &str,
    system_prompt: &str,
    user_prompt: &str,
) -> Result<T, LlmError> {
    let request = CompletionRequest::new(model)
        .system(system_prompt)
        .user(user_prompt)
        .json_schema(T::type_name(), T::strict_schema());

    let content = llm.complete(request).await?;
    parse_json_content(&content)
}

/// Deserialize JSON content, tolerating a surrounding markdown code fence.
pub fn parse_json_content<T: DeserializeOwned>(content: &str) -> Result<T, LlmError> {
    serde_json::from_str(strip_code_fences(content))
        .map_err(|e| LlmError::Parse(format!("{}: {}", e, truncate(content, 200))))
}

/// Remove a leading ```` ```json ```` / ```` ``` ```` fence and its closing fence.
pub fn strip_code_fences(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

fn truncate(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}

// =============================================================================
// OpenAI-compatible providers
// =============================================================================

/// Which OpenAI-compatible backend serves completions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmProviderKind {
    AzureOpenAi,
    OpenAi,
    LocalLmStudio,
}

impl LlmProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AzureOpenAi => "azure-openai",
            Self::OpenAi => "openai",
            Self::LocalLmStudio => "local-lm-studio",
        }
    }
}

impl fmt::Display for LlmProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LlmProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "azure-openai" | "azure" => Ok(Self::AzureOpenAi),
            "openai" => Ok(Self::OpenAi),
            "local-lm-studio" | "lm-studio" | "local" => Ok(Self::LocalLmStudio),
            other => Err(format!(
                "unknown LLM provider '{}' (expected azure-openai, openai or local-lm-studio)",
                other
            )),
        }
    }
}

/// [`LlmProvider`] backed by [`OpenAIClient`].
pub struct OpenAiLlm {
    client: OpenAIClient,
    kind: LlmProviderKind,
}

impl OpenAiLlm {
    pub fn new(client: OpenAIClient, kind: LlmProviderKind) -> Self {
        Self { client, kind }
    }

    pub fn kind(&self) -> LlmProviderKind {
        self.kind
    }

    fn to_chat_request(request: CompletionRequest) -> ChatRequest {
        let mut chat = ChatRequest::new(request.model).temperature(request.temperature);
        for message in request.messages {
            chat = chat.message(message);
        }
        match request.format {
            OutputFormat::Text => chat,
            OutputFormat::JsonObject => chat.json_object(),
            OutputFormat::JsonSchema { name, schema } => chat.json_schema(name, schema),
        }
    }
}

#[async_trait]
impl LlmProvider for OpenAiLlm {
    fn name(&self) -> &str {
        self.kind.as_str()
    }

    #[instrument(skip(self, request), fields(provider = %self.kind, model = %request.model))]
    async fn complete(&self, request: CompletionRequest) -> Result<String, LlmError> {
        let chat = Self::to_chat_request(request);
        let response = self.client.chat_completion(chat).await.map_err(|e| match e {
            OpenAIError::Parse(msg) => LlmError::Parse(msg),
            other => LlmError::Request(other.to_string()),
        })?;

        if let Some(usage) = &response.usage {
            debug!(
                prompt_tokens = usage.prompt_tokens,
                completion_tokens = usage.completion_tokens,
                "Completion usage"
            );
        }
        Ok(response.content)
    }
}
