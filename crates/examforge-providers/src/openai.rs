//! OpenAI-compatible chat completions backend (cloud).

use std::time::Instant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use examforge_core::traits::{
    BackendKind, ChunkObserver, GenerateRequest, GenerateResponse, ModelInfo, Role, TextGenerator, TokenUsage,
};

use crate::error::{retry_after_ms, transport_error, LineBuffer, ProviderError};

const DEFAULT_BASE_URL: &str = "https://api.openai.com";
const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// OpenAI-compatible API backend.
pub struct OpenAiBackend {
    api_key: String,
    base_url: String,
    org_id: Option<String>,
    client: reqwest::Client,
}

impl OpenAiBackend {
    pub fn new(api_key: &str, base_url: Option<String>, org_id: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .expect("failed to build HTTP client");

        Self {
            api_key: api_key.to_string(),
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            org_id,
            client,
        }
    }

    fn body(request: &GenerateRequest, stream: bool) -> ChatRequest {
        let mut messages = Vec::with_capacity(request.history.len() + 2);
        if let Some(system) = &request.system_prompt {
            messages.push(ChatMessage {
                role: Role::System.as_str(),
                content: system.clone(),
            });
        }
        for turn in &request.history {
            messages.push(ChatMessage {
                role: turn.role.as_str(),
                content: turn.content.clone(),
            });
        }
        messages.push(ChatMessage {
            role: Role::User.as_str(),
            content: request.prompt_with_attachments(),
        });

        ChatRequest {
            model: request.model.clone(),
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            messages,
            stream,
        }
    }

    async fn send(&self, body: &ChatRequest) -> anyhow::Result<reqwest::Response> {
        let mut req = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("content-type", "application/json");

        if let Some(org) = &self.org_id {
            req = req.header("OpenAI-Organization", org);
        }

        let response = req
            .json(body)
            .send()
            .await
            .map_err(|e| transport_error(e, &self.base_url, DEFAULT_TIMEOUT_SECS))?;

        let status = response.status().as_u16();
        if status < 400 {
            return Ok(response);
        }

        if status == 429 {
            let retry_after = retry_after_ms(&response, 5);
            let body = response.text().await.unwrap_or_default();
            // Exhausted billing quota shares the 429 status with rate limiting.
            if body.contains("insufficient_quota") {
                return Err(ProviderError::QuotaExceeded {
                    backend: "openai".into(),
                    message: body,
                }
                .into());
            }
            return Err(ProviderError::RateLimited {
                retry_after_ms: retry_after,
            }
            .into());
        }
        let body = response.text().await.unwrap_or_default();
        let err = match status {
            401 | 403 => ProviderError::AuthenticationFailed(body),
            404 => ProviderError::ModelNotFound(body),
            502..=504 => ProviderError::BackendUnavailable(format!("HTTP {status}: {body}")),
            _ => ProviderError::ApiError {
                status,
                message: body,
            },
        };
        Err(err.into())
    }
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    max_tokens: u32,
    temperature: f64,
    messages: Vec<ChatMessage>,
    stream: bool,
}

#[derive(Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Usage,
    model: String,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize, Default)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
    #[serde(default)]
    total_tokens: u32,
}

#[derive(Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Deserialize, Default)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

#[async_trait]
impl TextGenerator for OpenAiBackend {
    fn name(&self) -> &str {
        "openai"
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Cloud
    }

    #[instrument(skip(self, request), fields(model = %request.model))]
    async fn generate(&self, request: &GenerateRequest) -> anyhow::Result<GenerateResponse> {
        let start = Instant::now();
        let response = self.send(&Self::body(request, false)).await?;

        let api_response: ChatResponse = response.json().await.map_err(|e| ProviderError::ApiError {
            status: 0,
            message: format!("failed to parse response: {e}"),
        })?;

        let content = api_response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();

        Ok(GenerateResponse {
            content,
            model: api_response.model,
            token_usage: TokenUsage {
                prompt_tokens: api_response.usage.prompt_tokens,
                completion_tokens: api_response.usage.completion_tokens,
                total_tokens: api_response.usage.total_tokens,
            },
            latency_ms: start.elapsed().as_millis() as u64,
        })
    }

    /// Server-sent events; each `data:` line carries a content delta and the
    /// stream ends with `data: [DONE]`.
    #[instrument(skip(self, request, on_chunk), fields(model = %request.model))]
    async fn generate_stream(
        &self,
        request: &GenerateRequest,
        on_chunk: &ChunkObserver<'_>,
    ) -> anyhow::Result<GenerateResponse> {
        let start = Instant::now();
        let mut response = self.send(&Self::body(request, true)).await?;

        let mut buffer = LineBuffer::default();
        let mut content = String::new();
        let mut model = request.model.clone();
        let mut usage = Usage::default();
        let mut done = false;

        'read: loop {
            let next = response
                .chunk()
                .await
                .map_err(|e| transport_error(e, &self.base_url, DEFAULT_TIMEOUT_SECS))?;
            let at_end = next.is_none();
            // The last line may arrive without a trailing newline.
            let lines = match next {
                Some(bytes) => buffer.push(&bytes),
                None => std::mem::take(&mut buffer).finish().into_iter().collect(),
            };
            for line in lines {
                let Some(data) = line.strip_prefix("data:").map(str::trim) else {
                    continue;
                };
                if data == "[DONE]" {
                    done = true;
                    break 'read;
                }
                let chunk: StreamChunk = serde_json::from_str(data).map_err(|e| {
                    ProviderError::StreamInterrupted(format!("malformed stream event: {e}"))
                })?;
                if let Some(m) = chunk.model {
                    model = m;
                }
                if let Some(u) = chunk.usage {
                    usage = u;
                }
                for delta in chunk.choices.into_iter().filter_map(|c| c.delta.content) {
                    on_chunk(&delta);
                    content.push_str(&delta);
                }
            }
            if at_end {
                break;
            }
        }

        if !done {
            return Err(ProviderError::StreamInterrupted(format!(
                "stream ended after {} bytes without [DONE]",
                content.len()
            ))
            .into());
        }

        Ok(GenerateResponse {
            content,
            model,
            token_usage: TokenUsage {
                prompt_tokens: usage.prompt_tokens,
                completion_tokens: usage.completion_tokens,
                total_tokens: usage.total_tokens,
            },
            latency_ms: start.elapsed().as_millis() as u64,
        })
    }

    fn available_models(&self) -> Vec<ModelInfo> {
        [
            ("gpt-4.1", "GPT-4.1"),
            ("gpt-4.1-mini", "GPT-4.1 Mini"),
            ("gpt-4.1-nano", "GPT-4.1 Nano"),
        ]
        .into_iter()
        .map(|(id, name)| ModelInfo {
            id: id.into(),
            name: name.into(),
            backend: "openai".into(),
            max_context: 1_000_000,
        })
        .collect()
    }
}
