//! Core trait definitions for text-generation backends.
//!
//! The trait is implemented by the `examforge-providers` crate; the engine
//! only ever sees `Arc<dyn TextGenerator>` handed out by the
//! [`BackendRegistry`](crate::registry::BackendRegistry).

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Text generator trait
// ---------------------------------------------------------------------------

/// Where a backend runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Cloud,
    Local,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Cloud => write!(f, "cloud"),
            BackendKind::Local => write!(f, "local"),
        }
    }
}

/// Observer that receives generated text chunks as they arrive.
pub type ChunkObserver<'a> = dyn for<'c> Fn(&'c str) + Send + Sync + 'a;

/// Trait for backends that turn a prompt into text.
///
/// Errors should carry a [`ProviderError`](crate::error::ProviderError) so
/// callers can tell transient failures from permanent ones.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Human-readable backend name (e.g. "openai").
    fn name(&self) -> &str;

    /// Whether the backend is a hosted service or local inference.
    fn kind(&self) -> BackendKind;

    /// Generate the full response for a request.
    async fn generate(&self, request: &GenerateRequest) -> anyhow::Result<GenerateResponse>;

    /// Generate while reporting partial text to `on_chunk` as it arrives.
    ///
    /// The returned response always holds the complete text. Backends without
    /// native streaming deliver the whole text as a single chunk.
    async fn generate_stream(
        &self,
        request: &GenerateRequest,
        on_chunk: &ChunkObserver<'_>,
    ) -> anyhow::Result<GenerateResponse> {
        let response = self.generate(request).await?;
        on_chunk(&response.content);
        Ok(response)
    }

    /// Statically known models for this backend.
    fn available_models(&self) -> Vec<ModelInfo>;
}

/// Role of a message in a conversation history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One earlier turn of the conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

/// A file sent alongside the prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    /// File name shown to the model.
    pub name: String,
    /// MIME type (e.g. "text/plain", "image/png").
    pub mime_type: String,
    /// Text content, or base64 for binary types.
    pub content: String,
}

impl Attachment {
    pub fn is_text(&self) -> bool {
        self.mime_type.starts_with("text/")
    }
}

/// Request to generate text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateRequest {
    /// Model identifier (e.g. "gpt-4.1-mini", "llama3.1:8b").
    pub model: String,
    /// The main prompt.
    pub prompt: String,
    /// Optional system prompt.
    #[serde(default)]
    pub system_prompt: Option<String>,
    /// Earlier turns, oldest first.
    #[serde(default)]
    pub history: Vec<ChatMessage>,
    /// Files attached to the prompt.
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    /// Maximum tokens to generate.
    pub max_tokens: u32,
    /// Sampling temperature.
    pub temperature: f64,
}

impl GenerateRequest {
    pub fn new(model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            prompt: prompt.into(),
            system_prompt: None,
            history: Vec::new(),
            attachments: Vec::new(),
            max_tokens: 1024,
            temperature: 0.7,
        }
    }

    /// The prompt with text attachments inlined ahead of it.
    pub fn prompt_with_attachments(&self) -> String {
        let mut full_prompt = String::new();
        for file in self.attachments.iter().filter(|a| a.is_text()) {
            full_prompt.push_str(&format!(
                "File `{}`:\n```\n{}\n```\n\n",
                file.name, file.content
            ));
        }
        full_prompt.push_str(&self.prompt);
        full_prompt
    }
}

/// Response from a generation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateResponse {
    /// The raw response content.
    pub content: String,
    /// Model that actually generated the response.
    pub model: String,
    /// Token usage.
    pub token_usage: TokenUsage,
    /// Latency in milliseconds.
    pub latency_ms: u64,
}

/// Token accounting for a single request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Information about an available model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    /// Model identifier.
    pub id: String,
    /// Human-readable model name.
    pub name: String,
    /// Backend name.
    pub backend: String,
    /// Maximum context window size in tokens (0 when unknown).
    pub max_context: u32,
}
