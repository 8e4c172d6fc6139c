//! Ollama backend (local inference).

use std::time::Instant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use examforge_core::traits::{
    BackendKind, ChunkObserver, GenerateRequest, GenerateResponse, ModelInfo, Role, TextGenerator, TokenUsage,
};

use crate::error::{transport_error, LineBuffer, ProviderError};

const DEFAULT_BASE_URL: &str = "http://localhost:11434";
const DEFAULT_TIMEOUT_SECS: u64 = 300; // Local models are slower

/// Ollama local backend.
pub struct OllamaBackend {
    base_url: String,
    client: reqwest::Client,
}

impl OllamaBackend {
    pub fn new(base_url: &str) -> Self {
        let base = if base_url.is_empty() {
            DEFAULT_BASE_URL
        } else {
            base_url
        };

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .expect("failed to build HTTP client");

        Self {
            base_url: base.trim_end_matches('/').to_string(),
            client,
        }
    }

    fn unreachable(&self) -> ProviderError {
        ProviderError::BackendUnavailable(format!(
            "Ollama not reachable at {}. Is it running? Start with: ollama serve",
            self.base_url
        ))
    }

    async fn send(&self, request: &GenerateRequest, stream: bool) -> anyhow::Result<reqwest::Response> {
        let mut messages = Vec::with_capacity(request.history.len() + 2);
        if let Some(system) = &request.system_prompt {
            messages.push(OllamaMessage {
                role: Role::System.as_str(),
                content: system.clone(),
                images: Vec::new(),
            });
        }
        for turn in &request.history {
            messages.push(OllamaMessage {
                role: turn.role.as_str(),
                content: turn.content.clone(),
                images: Vec::new(),
            });
        }
        messages.push(OllamaMessage {
            role: Role::User.as_str(),
            content: request.prompt_with_attachments(),
            images: request
                .attachments
                .iter()
                .filter(|a| a.mime_type.starts_with("image/"))
                .map(|a| a.content.clone())
                .collect(),
        });

        let body = OllamaRequest {
            model: request.model.clone(),
            messages,
            stream,
            options: OllamaOptions {
                temperature: request.temperature,
                num_predict: request.max_tokens,
            },
        };

        let response = self
            .client
            .post(format!("{}/api/chat", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() {
                    self.unreachable()
                } else {
                    transport_error(e, &self.base_url, DEFAULT_TIMEOUT_SECS)
                }
            })?;

        let status = response.status().as_u16();
        if status == 404 {
            return Err(ProviderError::ModelNotFound(format!(
                "Model '{}' not found locally. Pull it with: ollama pull {}",
                request.model, request.model
            ))
            .into());
        }
        if status >= 400 {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::ApiError {
                status,
                message: body,
            }
            .into());
        }
        Ok(response)
    }

    /// Fetch the models installed in the Ollama instance.
    pub async fn list_models_async(&self) -> anyhow::Result<Vec<ModelInfo>> {
        let response = self
            .client
            .get(format!("{}/api/tags", self.base_url))
            .send()
            .await
            .map_err(|_| self.unreachable())?;

        let tags: OllamaTagsResponse = response.json().await.map_err(|e| ProviderError::ApiError {
            status: 0,
            message: format!("failed to parse tags response: {e}"),
        })?;

        Ok(tags
            .models
            .into_iter()
            .map(|m| ModelInfo {
                id: m.name.clone(),
                name: m.name,
                backend: "ollama".into(),
                max_context: 0,
            })
            .collect())
    }
}

#[derive(Serialize)]
struct OllamaRequest {
    model: String,
    messages: Vec<OllamaMessage>,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Serialize)]
struct OllamaMessage {
    role: &'static str,
    content: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    images: Vec<String>,
}

#[derive(Serialize)]
struct OllamaOptions {
    temperature: f64,
    num_predict: u32,
}

/// One response object; streaming sends many, the last with `done: true`.
#[derive(Deserialize)]
struct OllamaResponse {
    #[serde(default)]
    message: Option<OllamaResponseMessage>,
    model: String,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    prompt_eval_count: Option<u32>,
    #[serde(default)]
    eval_count: Option<u32>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize)]
struct OllamaResponseMessage {
    content: String,
}

#[derive(Deserialize)]
struct OllamaTagsResponse {
    models: Vec<OllamaModelEntry>,
}

#[derive(Deserialize)]
struct OllamaModelEntry {
    name: String,
}

fn usage(response: &OllamaResponse) -> TokenUsage {
    let prompt_tokens = response.prompt_eval_count.unwrap_or(0);
    let completion_tokens = response.eval_count.unwrap_or(0);
    TokenUsage {
        prompt_tokens,
        completion_tokens,
        total_tokens: prompt_tokens + completion_tokens,
    }
}

#[async_trait]
impl TextGenerator for OllamaBackend {
    fn name(&self) -> &str {
        "ollama"
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    #[instrument(skip(self, request), fields(model = %request.model))]
    async fn generate(&self, request: &GenerateRequest) -> anyhow::Result<GenerateResponse> {
        let start = Instant::now();
        let response = self.send(request, false).await?;

        let api_response: OllamaResponse = response.json().await.map_err(|e| ProviderError::ApiError {
            status: 0,
            message: format!("failed to parse response: {e}"),
        })?;

        Ok(GenerateResponse {
            token_usage: usage(&api_response),
            content: api_response.message.map(|m| m.content).unwrap_or_default(),
            model: api_response.model,
            latency_ms: start.elapsed().as_millis() as u64,
        })
    }

    /// Newline-delimited JSON objects, terminated by one with `done: true`.
    #[instrument(skip(self, request, on_chunk), fields(model = %request.model))]
    async fn generate_stream(
        &self,
        request: &GenerateRequest,
        on_chunk: &ChunkObserver<'_>,
    ) -> anyhow::Result<GenerateResponse> {
        let start = Instant::now();
        let mut response = self.send(request, true).await?;

        let mut buffer = LineBuffer::default();
        let mut content = String::new();
        let mut last: Option<OllamaResponse> = None;

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
                let event: OllamaResponse = serde_json::from_str(&line).map_err(|e| {
                    ProviderError::StreamInterrupted(format!("malformed stream line: {e}"))
                })?;
                if let Some(error) = event.error.as_deref() {
                    return Err(ProviderError::StreamInterrupted(error.to_string()).into());
                }
                if let Some(message) = &event.message {
                    if !message.content.is_empty() {
                        on_chunk(&message.content);
                        content.push_str(&message.content);
                    }
                }
                let done = event.done;
                last = Some(event);
                if done {
                    break 'read;
                }
            }
            if at_end {
                break;
            }
        }

        let Some(last) = last.filter(|e| e.done) else {
            return Err(ProviderError::StreamInterrupted(format!(
                "stream ended after {} bytes without a final message",
                content.len()
            ))
            .into());
        };

        Ok(GenerateResponse {
            token_usage: usage(&last),
            content,
            model: last.model,
            latency_ms: start.elapsed().as_millis() as u64,
        })
    }

    fn available_models(&self) -> Vec<ModelInfo> {
        // Installed models are only known at runtime; see `list_models_async`.
        vec![]
    }
}
