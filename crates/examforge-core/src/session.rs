//! Quiz session state machine and the manager that persists it.
//!
//! A session moves `in_progress` → `completed` and never back. While in
//! progress its totals only grow, and the score always equals
//! `round(100 * correct / total)` (0 before the first answer).

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AssessmentError, AssessmentResult, SessionError};
use crate::model::{AnswerKey, Difficulty, ProgressRecord, SessionStatus};
use crate::store::AssessmentStore;

/// Percentage score for `correct` out of `total`, rounded half up.
pub fn compute_score(correct: u32, total: u32) -> u8 {
    if total == 0 {
        return 0;
    }
    (100.0 * f64::from(correct) / f64::from(total)).round() as u8
}

/// One bounded mock-test attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    id: Uuid,
    user_id: String,
    exam_id: String,
    difficulty: Difficulty,
    model_id: String,
    total_questions: u32,
    correct_answers: u32,
    score: u8,
    time_spent_secs: u64,
    status: SessionStatus,
    started_at: DateTime<Utc>,
    #[serde(default)]
    completed_at: Option<DateTime<Utc>>,
}

/// Snapshot of a session's running totals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStats {
    pub total_questions: u32,
    pub correct_answers: u32,
    pub score: u8,
    pub time_spent_secs: u64,
    pub status: SessionStatus,
}

impl Session {
    /// A fresh session with zeroed totals.
    pub fn start(
        user_id: impl Into<String>,
        exam_id: impl Into<String>,
        difficulty: Difficulty,
        model_id: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            exam_id: exam_id.into(),
            difficulty,
            model_id: model_id.into(),
            total_questions: 0,
            correct_answers: 0,
            score: 0,
            time_spent_secs: 0,
            status: SessionStatus::InProgress,
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Count one answer toward the totals.
    pub fn record_answer(&mut self, is_correct: bool, time_spent_secs: u64) -> Result<(), SessionError> {
        self.ensure_open()?;
        self.total_questions += 1;
        if is_correct {
            self.correct_answers += 1;
        }
        self.score = compute_score(self.correct_answers, self.total_questions);
        self.time_spent_secs = self.time_spent_secs.saturating_add(time_spent_secs);
        Ok(())
    }

    /// Move to the terminal state.
    pub fn complete(&mut self, at: DateTime<Utc>) -> Result<(), SessionError> {
        self.ensure_open()?;
        self.status = SessionStatus::Completed;
        self.completed_at = Some(at);
        Ok(())
    }

    pub fn ensure_open(&self) -> Result<(), SessionError> {
        match self.status {
            SessionStatus::InProgress => Ok(()),
            SessionStatus::Completed => Err(SessionError::Closed(self.id)),
        }
    }

    pub fn stats(&self) -> SessionStats {
        SessionStats {
            total_questions: self.total_questions,
            correct_answers: self.correct_answers,
            score: self.score,
            time_spent_secs: self.time_spent_secs,
            status: self.status,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }
    pub fn user_id(&self) -> &str {
        &self.user_id
    }
    pub fn exam_id(&self) -> &str {
        &self.exam_id
    }
    pub fn difficulty(&self) -> Difficulty {
        self.difficulty
    }
    pub fn model_id(&self) -> &str {
        &self.model_id
    }
    pub fn total_questions(&self) -> u32 {
        self.total_questions
    }
    pub fn correct_answers(&self) -> u32 {
        self.correct_answers
    }
    pub fn score(&self) -> u8 {
        self.score
    }
    pub fn time_spent_secs(&self) -> u64 {
        self.time_spent_secs
    }
    pub fn status(&self) -> SessionStatus {
        self.status
    }
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }
    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }
}

/// What the caller learns after submitting an answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerOutcome {
    pub is_correct: bool,
    pub correct_answer: AnswerKey,
    pub explanation: String,
    pub session: SessionStats,
}

/// Starts, scores and closes sessions against a store.
#[derive(Clone)]
pub struct SessionManager {
    store: Arc<dyn AssessmentStore>,
}

impl SessionManager {
    pub fn new(store: Arc<dyn AssessmentStore>) -> Self {
        Self { store }
    }

    pub async fn start(
        &self,
        user_id: &str,
        exam_id: &str,
        difficulty: Difficulty,
        model_id: &str,
    ) -> AssessmentResult<Session> {
        let session = Session::start(user_id, exam_id, difficulty, model_id);
        self.store.insert_session(&session).await?;
        tracing::info!(session = %session.id(), user = user_id, exam = exam_id, "session started");
        Ok(session)
    }

    pub async fn get(&self, session_id: Uuid) -> AssessmentResult<Session> {
        Ok(self.store.get_session(session_id).await?)
    }

    /// Grade an answer, update the session and append the attempt in one
    /// store transaction.
    pub async fn record_answer(
        &self,
        session_id: Uuid,
        question_id: Uuid,
        user_answer: AnswerKey,
        time_spent_secs: u64,
    ) -> AssessmentResult<AnswerOutcome> {
        let session = self.store.get_session(session_id).await?;
        session
            .ensure_open()
            .map_err(|_| AssessmentError::SessionClosed(session_id))?;
        let question = self.store.get_question(question_id).await?;

        let is_correct = question.is_correct(user_answer);
        let record = ProgressRecord {
            id: Uuid::new_v4(),
            user_id: session.user_id().to_string(),
            exam_id: session.exam_id().to_string(),
            question_id,
            session_id: Some(session_id),
            user_answer,
            is_correct,
            time_spent_secs,
            attempted_at: Utc::now(),
        };

        let updated = self.store.commit_answer(&record).await?;
        tracing::debug!(
            session = %session_id,
            question = %question_id,
            is_correct,
            score = updated.score(),
            "answer recorded"
        );

        Ok(AnswerOutcome {
            is_correct,
            correct_answer: question.correct_answer,
            explanation: question.explanation,
            session: updated.stats(),
        })
    }

    pub async fn complete(&self, session_id: Uuid) -> AssessmentResult<Session> {
        let session = self.store.complete_session(session_id, Utc::now()).await?;
        tracing::info!(
            session = %session_id,
            score = session.score(),
            total = session.total_questions(),
            "session completed"
        );
        Ok(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Provenance, Question, QuestionDraft};
    use crate::store::MemoryStore;

    fn question(correct: AnswerKey) -> Question {
        Question::new(QuestionDraft {
            exam_id: "jee-main".into(),
            subject: "Chemistry".into(),
            topic: "Moles".into(),
            text: "Avogadro's number is approximately?".into(),
            options: vec!["6.02e23".into(), "3.14".into(), "9.81".into(), "1.6e-19".into()],
            correct_answer: correct,
            explanation: "By definition.".into(),
            difficulty: Difficulty::Easy,
            provenance: Provenance::Curated,
        })
        .unwrap()
    }

    #[test]
    fn score_is_zero_before_first_answer() {
        let session = Session::start("u1", "jee-main", Difficulty::Medium, "gpt-4.1-mini");
        assert_eq!(session.score(), 0);
        assert_eq!(compute_score(0, 0), 0);
    }

    #[test]
    fn score_tracks_ratio_after_every_answer() {
        let mut session = Session::start("u1", "jee-main", Difficulty::Medium, "m");
        let pattern = [true, false, true, true, false, false, true];
        for (i, correct) in pattern.iter().enumerate() {
            session.record_answer(*correct, 30).unwrap();
            let expected = (100.0 * session.correct_answers() as f64
                / session.total_questions() as f64)
                .round() as u8;
            assert_eq!(session.score(), expected, "after answer {}", i + 1);
            assert!(session.correct_answers() <= session.total_questions());
        }
        assert_eq!(session.time_spent_secs(), 210);
    }

    #[test]
    fn seven_of_ten_scores_seventy() {
        let mut session = Session::start("u1", "neet", Difficulty::Hard, "m");
        for i in 0..10 {
            session.record_answer(i < 7, 10).unwrap();
        }
        assert_eq!(session.score(), 70);
        assert_eq!(session.total_questions(), 10);
        assert_eq!(session.correct_answers(), 7);
    }

    #[test]
    fn rounding_is_half_up() {
        assert_eq!(compute_score(1, 3), 33);
        assert_eq!(compute_score(2, 3), 67);
        assert_eq!(compute_score(1, 8), 13);
    }

    #[test]
    fn completed_session_rejects_changes() {
        let mut session = Session::start("u1", "neet", Difficulty::Easy, "m");
        session.complete(Utc::now()).unwrap();
        assert_eq!(session.status(), SessionStatus::Completed);
        assert!(session.completed_at().is_some());
        assert_eq!(
            session.record_answer(true, 5),
            Err(SessionError::Closed(session.id()))
        );
        assert!(session.complete(Utc::now()).is_err());
    }

    #[tokio::test]
    async fn manager_records_answers_and_progress() {
        let store = Arc::new(MemoryStore::new());
        let q = question(AnswerKey::A);
        store.insert_question(&q).await.unwrap();
        let manager = SessionManager::new(store.clone());

        let session = manager
            .start("u1", "jee-main", Difficulty::Easy, "m")
            .await
            .unwrap();
        let outcome = manager
            .record_answer(session.id(), q.id, AnswerKey::A, 42)
            .await
            .unwrap();

        assert!(outcome.is_correct);
        assert_eq!(outcome.correct_answer, AnswerKey::A);
        assert_eq!(outcome.session.score, 100);
        assert_eq!(outcome.session.time_spent_secs, 42);

        let records = store.attempts("u1", Some("jee-main")).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].session_id, Some(session.id()));
    }

    #[tokio::test]
    async fn manager_rejects_unknown_and_closed_sessions() {
        let store = Arc::new(MemoryStore::new());
        let q = question(AnswerKey::B);
        store.insert_question(&q).await.unwrap();
        let manager = SessionManager::new(store.clone());

        let missing = Uuid::new_v4();
        assert!(matches!(
            manager.record_answer(missing, q.id, AnswerKey::B, 1).await,
            Err(AssessmentError::SessionNotFound(id)) if id == missing
        ));

        let session = manager.start("u1", "neet", Difficulty::Easy, "m").await.unwrap();
        manager.complete(session.id()).await.unwrap();
        assert!(matches!(
            manager.record_answer(session.id(), q.id, AnswerKey::B, 1).await,
            Err(AssessmentError::SessionClosed(_))
        ));
        assert!(matches!(
            manager.complete(session.id()).await,
            Err(AssessmentError::SessionClosed(_))
        ));
        assert!(store.attempts("u1", None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn duplicate_answers_are_rejected_without_double_counting() {
        let store = Arc::new(MemoryStore::new());
        let q = question(AnswerKey::C);
        store.insert_question(&q).await.unwrap();
        let manager = SessionManager::new(store.clone());
        let session = manager.start("u1", "neet", Difficulty::Easy, "m").await.unwrap();

        manager
            .record_answer(session.id(), q.id, AnswerKey::C, 3)
            .await
            .unwrap();
        let second = manager
            .record_answer(session.id(), q.id, AnswerKey::C, 3)
            .await;
        assert!(matches!(second, Err(AssessmentError::DuplicateAnswer { .. })));

        let stored = manager.get(session.id()).await.unwrap();
        assert_eq!(stored.total_questions(), 1);
        assert_eq!(store.attempts("u1", None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unknown_question_leaves_session_untouched() {
        let store = Arc::new(MemoryStore::new());
        let manager = SessionManager::new(store.clone());
        let session = manager.start("u1", "neet", Difficulty::Easy, "m").await.unwrap();

        assert!(matches!(
            manager
                .record_answer(session.id(), Uuid::new_v4(), AnswerKey::A, 1)
                .await,
            Err(AssessmentError::QuestionNotFound(_))
        ));
        assert_eq!(manager.get(session.id()).await.unwrap().total_questions(), 0);
    }
}
