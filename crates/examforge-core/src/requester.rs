//! Question requester: builds the generation prompt and calls the backend
//! routed for the model, retrying transient failures.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::error::{AssessmentError, AssessmentResult};
use crate::model::Difficulty;
use crate::prompt;
use crate::registry::BackendRegistry;
use crate::settings::ExamProfile;
use crate::traits::{Attachment, ChatMessage, ChunkObserver, GenerateRequest, GenerateResponse};

/// Upper bound on any single wait between retries.
const MAX_RETRY_DELAY: Duration = Duration::from_secs(60);

/// Retry and sampling parameters for generation calls.
#[derive(Debug, Clone)]
pub struct RequesterConfig {
    /// Retries after the first attempt, transient failures only.
    pub max_retries: u32,
    /// Delay before the first retry; doubles on each further retry.
    pub retry_delay: Duration,
    pub max_tokens: u32,
    pub temperature: f64,
}

impl Default for RequesterConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay: Duration::from_secs(1),
            max_tokens: 1024,
            temperature: 0.7,
        }
    }
}

/// What to generate a question about.
#[derive(Debug, Clone)]
pub struct QuestionRequest {
    pub exam_id: String,
    pub difficulty: Difficulty,
    pub subject: Option<String>,
    pub topic: Option<String>,
    pub model_id: String,
    /// Earlier conversation turns, oldest first.
    pub history: Vec<ChatMessage>,
    pub attachments: Vec<Attachment>,
}

impl QuestionRequest {
    pub fn new(exam_id: impl Into<String>, difficulty: Difficulty, model_id: impl Into<String>) -> Self {
        Self {
            exam_id: exam_id.into(),
            difficulty,
            subject: None,
            topic: None,
            model_id: model_id.into(),
            history: Vec::new(),
            attachments: Vec::new(),
        }
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }
}

/// Raw generator output plus where it came from.
#[derive(Debug, Clone)]
pub struct GeneratedText {
    pub response: GenerateResponse,
    /// Registry name of the backend that answered.
    pub backend: String,
    /// Attempts made, including the successful one.
    pub attempts: u32,
}

/// Sends prompts to the backend routed for a model.
#[derive(Clone)]
pub struct QuestionRequester {
    registry: BackendRegistry,
    config: RequesterConfig,
}

impl QuestionRequester {
    pub fn new(registry: BackendRegistry, config: RequesterConfig) -> Self {
        Self { registry, config }
    }

    pub fn registry(&self) -> &BackendRegistry {
        &self.registry
    }

    /// Build the generation request for a question.
    pub fn build_request(&self, exam: &ExamProfile, request: &QuestionRequest) -> GenerateRequest {
        let mut generate = GenerateRequest::new(
            request.model_id.clone(),
            prompt::question_prompt(
                exam,
                request.difficulty,
                request.subject.as_deref(),
                request.topic.as_deref(),
            ),
        );
        generate.system_prompt = Some(prompt::QUESTION_SYSTEM_PROMPT.to_string());
        generate.history = request.history.clone();
        generate.attachments = request.attachments.clone();
        generate.max_tokens = self.config.max_tokens;
        generate.temperature = self.config.temperature;
        generate
    }

    /// Generate question text for `request`.
    pub async fn request(&self, exam: &ExamProfile, request: &QuestionRequest) -> AssessmentResult<GeneratedText> {
        let generate = self.build_request(exam, request);
        self.send(&generate, None).await
    }

    /// Like [`request`](Self::request), reporting partial text to `on_chunk`.
    ///
    /// Once any chunk has been delivered a failure is returned as is, so the
    /// observer never sees a restarted stream.
    pub async fn request_streaming(
        &self,
        exam: &ExamProfile,
        request: &QuestionRequest,
        on_chunk: &ChunkObserver<'_>,
    ) -> AssessmentResult<GeneratedText> {
        let generate = self.build_request(exam, request);
        self.send(&generate, Some(on_chunk)).await
    }

    /// Send an arbitrary request with the retry policy.
    pub async fn send(
        &self,
        request: &GenerateRequest,
        on_chunk: Option<&ChunkObserver<'_>>,
    ) -> AssessmentResult<GeneratedText> {
        let backend = self.registry.resolve(&request.model)?;
        let backend_name = self
            .registry
            .backend_name_for(&request.model)
            .unwrap_or_else(|| backend.name())
            .to_string();

        let streamed = AtomicBool::new(false);
        let mut retry_delay = self.config.retry_delay;
        let mut attempt = 0;

        loop {
            attempt += 1;
            let result = match on_chunk {
                Some(observer) => {
                    let forward = |chunk: &str| {
                        streamed.store(true, Ordering::Relaxed);
                        observer(chunk);
                    };
                    backend.generate_stream(request, &forward).await
                }
                None => backend.generate(request).await,
            };

            let err = match result {
                Ok(response) => {
                    tracing::debug!(
                        backend = %backend_name,
                        model = %request.model,
                        attempt,
                        latency_ms = response.latency_ms,
                        "generation succeeded"
                    );
                    return Ok(GeneratedText {
                        response,
                        backend: backend_name,
                        attempts: attempt,
                    });
                }
                Err(e) => AssessmentError::from_generation(e),
            };

            let exhausted = attempt > self.config.max_retries;
            if !err.is_retryable() || exhausted || streamed.load(Ordering::Relaxed) {
                tracing::warn!(backend = %backend_name, attempt, "generation failed: {err}");
                return Err(err);
            }

            if let AssessmentError::Provider(provider) = &err {
                if let Some(ms) = provider.retry_after_ms() {
                    retry_delay = Duration::from_millis(ms).min(MAX_RETRY_DELAY);
                }
            }
            tracing::warn!(
                backend = %backend_name,
                attempt,
                delay_ms = retry_delay.as_millis() as u64,
                "transient generation failure, retrying: {err}"
            );
            tokio::time::sleep(retry_delay).await;
            retry_delay = (retry_delay * 2).min(MAX_RETRY_DELAY);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderError;
    use crate::settings::AssessmentConfig;
    use crate::traits::{BackendKind, ModelInfo, TextGenerator, TokenUsage};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    /// Replays a fixed script of outcomes, one per call.
    struct Scripted {
        script: Mutex<VecDeque<Result<String, ProviderError>>>,
        calls: Mutex<u32>,
    }

    impl Scripted {
        fn new(script: Vec<Result<String, ProviderError>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                calls: Mutex::new(0),
            })
        }

        fn calls(&self) -> u32 {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl TextGenerator for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }
        fn kind(&self) -> BackendKind {
            BackendKind::Local
        }
        async fn generate(&self, request: &GenerateRequest) -> anyhow::Result<GenerateResponse> {
            *self.calls.lock().unwrap() += 1;
            let next = self
                .script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(ProviderError::BackendUnavailable("script empty".into())));
            let content = next?;
            Ok(GenerateResponse {
                content,
                model: request.model.clone(),
                token_usage: TokenUsage::default(),
                latency_ms: 1,
            })
        }
        fn available_models(&self) -> Vec<ModelInfo> {
            vec![]
        }
    }

    fn requester(backend: Arc<Scripted>) -> QuestionRequester {
        let registry = BackendRegistry::new()
            .with_backend("local", backend)
            .with_default("local");
        QuestionRequester::new(
            registry,
            RequesterConfig {
                max_retries: 2,
                retry_delay: Duration::from_millis(10),
                ..Default::default()
            },
        )
    }

    fn exam() -> ExamProfile {
        AssessmentConfig::default().exam("jee-main").unwrap().clone()
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_are_retried() {
        let backend = Scripted::new(vec![
            Err(ProviderError::BackendUnavailable("connection refused".into())),
            Err(ProviderError::RateLimited { retry_after_ms: 50 }),
            Ok("{}".into()),
        ]);
        let generated = requester(backend.clone())
            .request(&exam(), &QuestionRequest::new("jee-main", Difficulty::Medium, "llama3.1:8b"))
            .await
            .unwrap();
        assert_eq!(generated.attempts, 3);
        assert_eq!(generated.backend, "local");
        assert_eq!(backend.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn server_retry_after_is_capped() {
        let backend = Scripted::new(vec![
            Err(ProviderError::RateLimited { retry_after_ms: 86_400_000 }),
            Ok("{}".into()),
        ]);
        let started = tokio::time::Instant::now();
        let generated = requester(backend.clone())
            .request(&exam(), &QuestionRequest::new("jee-main", Difficulty::Medium, "m"))
            .await
            .unwrap();
        assert_eq!(generated.attempts, 2);
        let waited = started.elapsed();
        assert!(waited >= MAX_RETRY_DELAY);
        assert!(waited < MAX_RETRY_DELAY + Duration::from_secs(1), "waited {waited:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn quota_exhaustion_is_not_retried() {
        let backend = Scripted::new(vec![Err(ProviderError::QuotaExceeded {
            backend: "openai".into(),
            message: "insufficient_quota".into(),
        })]);
        let err = requester(backend.clone())
            .request(&exam(), &QuestionRequest::new("jee-main", Difficulty::Easy, "gpt-4.1-mini"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AssessmentError::Provider(ProviderError::QuotaExceeded { .. })
        ));
        assert_eq!(backend.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_stop_at_the_limit() {
        let backend = Scripted::new(vec![]);
        let err = requester(backend.clone())
            .request(&exam(), &QuestionRequest::new("jee-main", Difficulty::Easy, "m"))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(backend.calls(), 3);
    }

    #[tokio::test]
    async fn unrouted_model_without_default_is_unknown() {
        let backend = Scripted::new(vec![]);
        let registry = BackendRegistry::new().with_backend("local", backend.clone());
        let err = QuestionRequester::new(registry, RequesterConfig::default())
            .request(&exam(), &QuestionRequest::new("jee-main", Difficulty::Easy, "m"))
            .await
            .unwrap_err();
        assert!(matches!(err, AssessmentError::UnknownModel(_)));
        assert_eq!(backend.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn streamed_chunks_reach_the_observer() {
        let backend = Scripted::new(vec![Ok("{\"question\":\"Q\"}".into())]);
        let seen = Mutex::new(String::new());
        let observer = |chunk: &str| seen.lock().unwrap().push_str(chunk);
        let generated = requester(backend)
            .request_streaming(
                &exam(),
                &QuestionRequest::new("jee-main", Difficulty::Hard, "m"),
                &observer,
            )
            .await
            .unwrap();
        assert_eq!(*seen.lock().unwrap(), generated.response.content);
    }

    #[test]
    fn build_request_carries_prompt_and_sampling() {
        let backend = Scripted::new(vec![]);
        let request = QuestionRequest::new("jee-main", Difficulty::Hard, "m")
            .with_subject("Physics")
            .with_topic("Optics");
        let generate = requester(backend).build_request(&exam(), &request);
        assert_eq!(generate.model, "m");
        assert!(generate.prompt.contains("Topic: Optics"));
        assert!(generate.system_prompt.is_some());
        assert_eq!(generate.max_tokens, 1024);
    }
}
