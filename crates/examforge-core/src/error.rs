//! Error types.
//!
//! `ProviderError` lives here rather than in `examforge-providers` so the
//! engine can downcast backend failures and classify them for retry
//! decisions without string matching.

use thiserror::Error;
use uuid::Uuid;

/// Errors that can occur when talking to a text-generation backend.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The backend could not be reached at all.
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    /// The account's quota on this backend is exhausted.
    #[error("quota exceeded on {backend}: {message}")]
    QuotaExceeded { backend: String, message: String },

    /// The API returned a 429 rate limit response.
    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    /// Authentication failed (invalid API key).
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// The requested model was not found.
    #[error("model not found: {0}")]
    ModelNotFound(String),

    /// The API returned an error response.
    #[error("API error (HTTP {status}): {message}")]
    ApiError { status: u16, message: String },

    /// The request timed out.
    #[error("request timed out after {0}s")]
    Timeout(u64),

    /// The response stream ended before the backend signalled completion.
    #[error("stream interrupted: {0}")]
    StreamInterrupted(String),
}

impl ProviderError {
    /// Returns `true` if this error is permanent and should not be retried
    /// against the same backend.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            ProviderError::AuthenticationFailed(_)
                | ProviderError::ModelNotFound(_)
                | ProviderError::QuotaExceeded { .. }
        )
    }

    /// Returns `true` for transient failures worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProviderError::BackendUnavailable(_)
                | ProviderError::RateLimited { .. }
                | ProviderError::Timeout(_)
                | ProviderError::StreamInterrupted(_)
        )
    }

    /// Returns the retry-after delay in milliseconds, if applicable.
    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            ProviderError::RateLimited { retry_after_ms } => Some(*retry_after_ms),
            _ => None,
        }
    }
}

/// Failures of the response repair pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// No `{` ... `}` span exists in the text.
    #[error("no JSON object found in generated text")]
    NoJsonFound,

    /// Every tier ran and none produced a complete question.
    #[error("unparseable response: {0}")]
    UnparseableResponse(String),
}

/// Rule violations raised by the session state machine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("session {0} is already completed")]
    Closed(Uuid),

    #[error("question {question_id} was already answered in session {session_id}")]
    DuplicateAnswer { session_id: Uuid, question_id: Uuid },
}

/// Errors surfaced by store implementations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: Uuid },

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    /// A transaction was rolled back because the session refused the change.
    #[error(transparent)]
    Session(#[from] SessionError),
}

/// Public error taxonomy of the assessment engine.
#[derive(Debug, Error)]
pub enum AssessmentError {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("session {0} not found")]
    SessionNotFound(Uuid),

    #[error("session {0} is closed")]
    SessionClosed(Uuid),

    #[error("question {0} not found")]
    QuestionNotFound(Uuid),

    #[error("question {question_id} was already answered in session {session_id}")]
    DuplicateAnswer { session_id: Uuid, question_id: Uuid },

    #[error("invalid answer: {0}")]
    InvalidAnswer(String),

    #[error("insufficient data: {attempts} attempts recorded, at least {required} needed")]
    InsufficientData { attempts: usize, required: usize },

    #[error("no backend registered for model '{0}'")]
    UnknownModel(String),

    #[error("unknown exam '{0}'")]
    UnknownExam(String),

    #[error("storage error: {0}")]
    Storage(StorageError),

    /// A backend failure that did not carry a typed `ProviderError`.
    #[error("generation failed: {0:#}")]
    Generation(anyhow::Error),
}

impl AssessmentError {
    /// Returns `true` when the caller may retry the same operation.
    pub fn is_retryable(&self) -> bool {
        match self {
            AssessmentError::Provider(e) => e.is_retryable(),
            AssessmentError::Generation(_) => true,
            _ => false,
        }
    }

    /// Classify a backend failure returned as `anyhow::Error`.
    pub fn from_generation(err: anyhow::Error) -> Self {
        match err.downcast::<ProviderError>() {
            Ok(provider) => AssessmentError::Provider(provider),
            Err(other) => AssessmentError::Generation(other),
        }
    }
}

impl From<StorageError> for AssessmentError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound {
                entity: "session",
                id,
            } => AssessmentError::SessionNotFound(id),
            StorageError::NotFound {
                entity: "question",
                id,
            } => AssessmentError::QuestionNotFound(id),
            StorageError::Session(SessionError::Closed(id)) => AssessmentError::SessionClosed(id),
            StorageError::Session(SessionError::DuplicateAnswer {
                session_id,
                question_id,
            }) => AssessmentError::DuplicateAnswer {
                session_id,
                question_id,
            },
            other => AssessmentError::Storage(other),
        }
    }
}

pub type AssessmentResult<T> = Result<T, AssessmentError>;
