//! Persistence contract and the in-memory store.
//!
//! The trait is the boundary to whatever database backs the application.
//! Aggregate queries have default implementations in terms of the
//! primitives so a SQL-backed store only needs to override them for speed.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{SessionError, StorageError};
use crate::model::{ProgressRecord, Question};
use crate::session::Session;

/// Subject used for attempts whose question is no longer stored.
pub const UNKNOWN_SUBJECT: &str = "unknown";

/// Count of attempts and how many were correct.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Totals {
    pub attempted: u32,
    pub correct: u32,
}

impl Totals {
    pub fn add(&mut self, is_correct: bool) {
        self.attempted += 1;
        if is_correct {
            self.correct += 1;
        }
    }

    /// Accuracy in percent (0 when nothing was attempted).
    pub fn accuracy(&self) -> f64 {
        if self.attempted == 0 {
            0.0
        } else {
            100.0 * f64::from(self.correct) / f64::from(self.attempted)
        }
    }
}

/// An attempt joined with its question's subject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubjectAttempt {
    pub subject: String,
    pub is_correct: bool,
    pub attempted_at: DateTime<Utc>,
}

/// Repository contract for questions, sessions and progress records.
#[async_trait]
pub trait AssessmentStore: Send + Sync {
    /// Persist a validated question.
    async fn insert_question(&self, question: &Question) -> Result<(), StorageError>;

    /// Fetch a question by id.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if missing.
    async fn get_question(&self, id: Uuid) -> Result<Question, StorageError>;

    /// Subjects of the given questions; unknown ids are omitted.
    async fn question_subjects(&self, ids: &[Uuid]) -> Result<HashMap<Uuid, String>, StorageError>;

    async fn insert_session(&self, session: &Session) -> Result<(), StorageError>;

    /// Fetch a session by id.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if missing.
    async fn get_session(&self, id: Uuid) -> Result<Session, StorageError>;

    /// Close a session, returning its final state.
    async fn complete_session(&self, id: Uuid, at: DateTime<Utc>) -> Result<Session, StorageError>;

    /// Apply an answer to its session and append the record atomically.
    ///
    /// Either both the session update and the record are written, or
    /// neither is. Fails with `StorageError::Session` when the session is
    /// closed or the question was already answered in it.
    async fn commit_answer(&self, record: &ProgressRecord) -> Result<Session, StorageError>;

    /// Append an attempt made outside a session.
    async fn append_progress(&self, record: &ProgressRecord) -> Result<(), StorageError>;

    /// Attempts for a user, optionally limited to one exam, newest first.
    async fn attempts(&self, user_id: &str, exam_id: Option<&str>) -> Result<Vec<ProgressRecord>, StorageError>;

    /// Totals across all attempts of a user on an exam.
    async fn exam_totals(&self, user_id: &str, exam_id: &str) -> Result<Totals, StorageError> {
        let mut totals = Totals::default();
        for record in self.attempts(user_id, Some(exam_id)).await? {
            totals.add(record.is_correct);
        }
        Ok(totals)
    }

    /// Attempts joined with question subjects, newest first.
    async fn subject_attempts(&self, user_id: &str, exam_id: &str) -> Result<Vec<SubjectAttempt>, StorageError> {
        let records = self.attempts(user_id, Some(exam_id)).await?;
        let ids: Vec<Uuid> = records
            .iter()
            .map(|r| r.question_id)
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        let subjects = self.question_subjects(&ids).await?;

        Ok(records
            .into_iter()
            .map(|r| SubjectAttempt {
                subject: subjects
                    .get(&r.question_id)
                    .cloned()
                    .unwrap_or_else(|| UNKNOWN_SUBJECT.to_string()),
                is_correct: r.is_correct,
                attempted_at: r.attempted_at,
            })
            .collect())
    }
}

/// Serializable image of a [`MemoryStore`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub questions: Vec<Question>,
    #[serde(default)]
    pub sessions: Vec<Session>,
    #[serde(default)]
    pub progress: Vec<ProgressRecord>,
}

#[derive(Default)]
struct Inner {
    questions: HashMap<Uuid, Question>,
    sessions: HashMap<Uuid, Session>,
    progress: Vec<ProgressRecord>,
}

/// In-memory store guarded by a single mutex, which is also the
/// transaction boundary for [`AssessmentStore::commit_answer`].
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: Snapshot) -> Self {
        let inner = Inner {
            questions: snapshot.questions.into_iter().map(|q| (q.id, q)).collect(),
            sessions: snapshot.sessions.into_iter().map(|s| (s.id(), s)).collect(),
            progress: snapshot.progress,
        };
        Self {
            inner: Mutex::new(inner),
        }
    }

    pub fn snapshot(&self) -> Result<Snapshot, StorageError> {
        let inner = self.lock()?;
        let mut questions: Vec<Question> = inner.questions.values().cloned().collect();
        questions.sort_by_key(|q| q.created_at);
        let mut sessions: Vec<Session> = inner.sessions.values().cloned().collect();
        sessions.sort_by_key(|s| s.started_at());
        Ok(Snapshot {
            questions,
            sessions,
            progress: inner.progress.clone(),
        })
    }

    /// Load a store from a JSON snapshot; a missing file yields an empty store.
    pub fn load_json(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::new());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read store from {}", path.display()))?;
        let snapshot: Snapshot = serde_json::from_str(&content)
            .map_err(|e| StorageError::Serialization(e.to_string()))
            .with_context(|| format!("failed to parse store JSON: {}", path.display()))?;
        Ok(Self::from_snapshot(snapshot))
    }

    /// Save the store as a JSON snapshot.
    pub fn save_json(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(&self.snapshot()?)
            .map_err(|e| StorageError::Serialization(e.to_string()))
            .context("failed to serialize store")?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, json)
            .with_context(|| format!("failed to write store to {}", path.display()))?;
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, StorageError> {
        self.inner
            .lock()
            .map_err(|_| StorageError::Connection("store mutex poisoned".into()))
    }
}

#[async_trait]
impl AssessmentStore for MemoryStore {
    async fn insert_question(&self, question: &Question) -> Result<(), StorageError> {
        let mut inner = self.lock()?;
        if inner.questions.contains_key(&question.id) {
            return Err(StorageError::Conflict(format!("question {} exists", question.id)));
        }
        inner.questions.insert(question.id, question.clone());
        Ok(())
    }

    async fn get_question(&self, id: Uuid) -> Result<Question, StorageError> {
        self.lock()?
            .questions
            .get(&id)
            .cloned()
            .ok_or(StorageError::NotFound {
                entity: "question",
                id,
            })
    }

    async fn question_subjects(&self, ids: &[Uuid]) -> Result<HashMap<Uuid, String>, StorageError> {
        let inner = self.lock()?;
        Ok(ids
            .iter()
            .filter_map(|id| inner.questions.get(id).map(|q| (*id, q.subject.clone())))
            .collect())
    }

    async fn insert_session(&self, session: &Session) -> Result<(), StorageError> {
        let mut inner = self.lock()?;
        if inner.sessions.contains_key(&session.id()) {
            return Err(StorageError::Conflict(format!("session {} exists", session.id())));
        }
        inner.sessions.insert(session.id(), session.clone());
        Ok(())
    }

    async fn get_session(&self, id: Uuid) -> Result<Session, StorageError> {
        self.lock()?
            .sessions
            .get(&id)
            .cloned()
            .ok_or(StorageError::NotFound {
                entity: "session",
                id,
            })
    }

    async fn complete_session(&self, id: Uuid, at: DateTime<Utc>) -> Result<Session, StorageError> {
        let mut inner = self.lock()?;
        let session = inner.sessions.get_mut(&id).ok_or(StorageError::NotFound {
            entity: "session",
            id,
        })?;
        session.complete(at)?;
        Ok(session.clone())
    }

    async fn commit_answer(&self, record: &ProgressRecord) -> Result<Session, StorageError> {
        let session_id = record.session_id.ok_or_else(|| {
            StorageError::Conflict("commit_answer requires a session id".into())
        })?;

        let mut inner = self.lock()?;
        if !inner.questions.contains_key(&record.question_id) {
            return Err(StorageError::NotFound {
                entity: "question",
                id: record.question_id,
            });
        }
        let duplicate = inner
            .progress
            .iter()
            .any(|r| r.session_id == Some(session_id) && r.question_id == record.question_id);

        let session = inner.sessions.get_mut(&session_id).ok_or(StorageError::NotFound {
            entity: "session",
            id: session_id,
        })?;
        session.ensure_open()?;
        if duplicate {
            return Err(SessionError::DuplicateAnswer {
                session_id,
                question_id: record.question_id,
            }
            .into());
        }

        // All checks passed; both writes happen under the same guard.
        session.record_answer(record.is_correct, record.time_spent_secs)?;
        let updated = session.clone();
        inner.progress.push(record.clone());
        Ok(updated)
    }

    async fn append_progress(&self, record: &ProgressRecord) -> Result<(), StorageError> {
        let mut inner = self.lock()?;
        if !inner.questions.contains_key(&record.question_id) {
            return Err(StorageError::NotFound {
                entity: "question",
                id: record.question_id,
            });
        }
        inner.progress.push(record.clone());
        Ok(())
    }

    async fn attempts(&self, user_id: &str, exam_id: Option<&str>) -> Result<Vec<ProgressRecord>, StorageError> {
        let inner = self.lock()?;
        let mut records: Vec<ProgressRecord> = inner
            .progress
            .iter()
            .filter(|r| r.user_id == user_id && exam_id.map_or(true, |e| r.exam_id == e))
            .cloned()
            .collect();
        records.sort_by(|a, b| b.attempted_at.cmp(&a.attempted_at));
        Ok(records)
    }
}
