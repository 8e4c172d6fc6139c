//! Assessment engine facade.
//!
//! Wires the requester, parser, session manager, progress recorder and
//! predictor around one store and exposes the operations callers use.

use std::sync::Arc;

use uuid::Uuid;

use crate::error::{AssessmentError, AssessmentResult, ParseError};
use crate::model::{AnswerKey, Difficulty, PredictionResult, Question};
use crate::parser::{self, ParseTier, ParsedQuestion};
use crate::predictor::{Advisor, Predictor};
use crate::progress::{ProgressRecorder, ProgressSummary};
use crate::registry::BackendRegistry;
use crate::requester::{GeneratedText, QuestionRequest, QuestionRequester, RequesterConfig};
use crate::session::{AnswerOutcome, Session, SessionManager};
use crate::settings::{AssessmentConfig, ExamProfile};
use crate::store::AssessmentStore;
use crate::traits::ChunkObserver;

/// Subject recorded when neither the caller nor the generator names one.
pub const FALLBACK_SUBJECT: &str = "General";

/// Runtime options for the engine.
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub requester: RequesterConfig,
    /// Model asked for extra study recommendations; rules only when `None`.
    pub advisor_model: Option<String>,
}

/// A generated question after it has been parsed and stored.
#[derive(Debug, Clone)]
pub struct GeneratedQuestion {
    pub question: Question,
    pub tier: ParseTier,
    /// Option slots that hold placeholders.
    pub padded: Vec<AnswerKey>,
    pub backend: String,
    pub model: String,
    pub latency_ms: u64,
}

/// Entry point for every assessment operation.
#[derive(Clone)]
pub struct AssessmentEngine {
    config: Arc<AssessmentConfig>,
    store: Arc<dyn AssessmentStore>,
    requester: QuestionRequester,
    sessions: SessionManager,
    progress: ProgressRecorder,
    predictor: Predictor,
}

impl AssessmentEngine {
    pub fn new(
        store: Arc<dyn AssessmentStore>,
        registry: BackendRegistry,
        assessment: AssessmentConfig,
        config: EngineConfig,
    ) -> Self {
        let assessment = Arc::new(assessment);
        let requester = QuestionRequester::new(registry, config.requester);
        let progress = ProgressRecorder::new(store.clone());

        let mut predictor = Predictor::new(progress.clone(), assessment.clone());
        if let Some(model) = config.advisor_model {
            predictor = predictor.with_advisor(Advisor::new(requester.clone(), model));
        }

        Self {
            config: assessment,
            sessions: SessionManager::new(store.clone()),
            store,
            requester,
            progress,
            predictor,
        }
    }

    pub fn assessment_config(&self) -> &AssessmentConfig {
        &self.config
    }

    pub fn registry(&self) -> &BackendRegistry {
        self.requester.registry()
    }

    fn exam(&self, exam_id: &str) -> AssessmentResult<&ExamProfile> {
        self.config
            .exam(exam_id)
            .ok_or_else(|| AssessmentError::UnknownExam(exam_id.to_string()))
    }

    /// Generate, parse and store one question.
    ///
    /// Nothing is stored unless the generated text parses.
    pub async fn request_question(&self, request: &QuestionRequest) -> AssessmentResult<GeneratedQuestion> {
        let exam = self.exam(&request.exam_id)?;
        let generated = self.requester.request(exam, request).await?;
        self.store_generated(exam, request, generated).await
    }

    /// Like [`request_question`](Self::request_question), reporting partial
    /// text to `on_chunk` while it arrives.
    pub async fn request_question_streaming(
        &self,
        request: &QuestionRequest,
        on_chunk: &ChunkObserver<'_>,
    ) -> AssessmentResult<GeneratedQuestion> {
        let exam = self.exam(&request.exam_id)?;
        let generated = self.requester.request_streaming(exam, request, on_chunk).await?;
        self.store_generated(exam, request, generated).await
    }

    async fn store_generated(
        &self,
        exam: &ExamProfile,
        request: &QuestionRequest,
        generated: GeneratedText,
    ) -> AssessmentResult<GeneratedQuestion> {
        let parsed = parser::parse_response(&generated.response.content).map_err(|e| {
            tracing::warn!(
                exam = %exam.id,
                model = %request.model_id,
                "discarding unparseable generation: {e}"
            );
            e
        })?;
        let tier = parsed.tier;
        let padded = parsed.padded.clone();
        let subject = resolve_subject(exam, request.subject.as_deref(), parsed.subject.as_deref());

        let question = parsed
            .into_question(&exam.id, &subject, request.topic.as_deref(), request.difficulty)
            .map_err(AssessmentError::Parse)?;
        self.store.insert_question(&question).await?;

        tracing::info!(
            question = %question.id,
            exam = %exam.id,
            subject = %question.subject,
            tier = %tier,
            attempts = generated.attempts,
            "question generated"
        );

        Ok(GeneratedQuestion {
            question,
            tier,
            padded,
            backend: generated.backend,
            model: generated.response.model,
            latency_ms: generated.response.latency_ms,
        })
    }

    /// Run the repair pipeline on text without calling a backend.
    pub fn parse_response(&self, raw: &str) -> Result<ParsedQuestion, ParseError> {
        parser::parse_response(raw)
    }

    pub async fn start_session(
        &self,
        user_id: &str,
        exam_id: &str,
        difficulty: Difficulty,
        model_id: &str,
    ) -> AssessmentResult<Session> {
        self.exam(exam_id)?;
        self.sessions.start(user_id, exam_id, difficulty, model_id).await
    }

    pub async fn session(&self, session_id: Uuid) -> AssessmentResult<Session> {
        self.sessions.get(session_id).await
    }

    /// Grade `answer` (a letter A-D or digit 1-4) for a question in a session.
    pub async fn submit_answer(
        &self,
        session_id: Uuid,
        question_id: Uuid,
        answer: &str,
        time_spent_secs: u64,
    ) -> AssessmentResult<AnswerOutcome> {
        let key: AnswerKey = answer.parse().map_err(AssessmentError::InvalidAnswer)?;
        self.sessions
            .record_answer(session_id, question_id, key, time_spent_secs)
            .await
    }

    pub async fn complete_session(&self, session_id: Uuid) -> AssessmentResult<Session> {
        self.sessions.complete(session_id).await
    }

    pub async fn progress_summary(&self, user_id: &str, exam_id: &str) -> AssessmentResult<ProgressSummary> {
        self.progress.summary(user_id, exam_id).await
    }

    pub async fn predict(&self, user_id: &str, exam_id: &str, target_rank: u32) -> AssessmentResult<PredictionResult> {
        self.predictor.predict(user_id, exam_id, target_rank).await
    }
}

/// Requested subject first, then the one the generator reported, then the
/// fallback. Names the exam lists are normalised to their configured case.
fn resolve_subject(exam: &ExamProfile, requested: Option<&str>, generated: Option<&str>) -> String {
    requested
        .or(generated)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| exam.match_subject(s).unwrap_or(s).to_string())
        .unwrap_or_else(|| FALLBACK_SUBJECT.to_string())
}
