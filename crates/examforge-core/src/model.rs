//! Core data model types for examforge.
//!
//! Questions, quiz sessions, progress records and prediction results. The
//! invariants that matter (exactly four options, a valid answer key, a score
//! consistent with the session totals) are held by the types themselves.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Number of answer options every question carries.
pub const OPTION_COUNT: usize = 4;

/// One of the four answer slots of a multiple-choice question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AnswerKey {
    A,
    B,
    C,
    D,
}

impl AnswerKey {
    /// All keys in option order.
    pub const ALL: [AnswerKey; OPTION_COUNT] = [AnswerKey::A, AnswerKey::B, AnswerKey::C, AnswerKey::D];

    /// Zero-based position of this key in the options list.
    pub fn index(self) -> usize {
        match self {
            AnswerKey::A => 0,
            AnswerKey::B => 1,
            AnswerKey::C => 2,
            AnswerKey::D => 3,
        }
    }

    /// Key for a zero-based option index.
    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub fn as_char(self) -> char {
        match self {
            AnswerKey::A => 'A',
            AnswerKey::B => 'B',
            AnswerKey::C => 'C',
            AnswerKey::D => 'D',
        }
    }
}

impl fmt::Display for AnswerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_char())
    }
}

impl FromStr for AnswerKey {
    type Err = String;

    /// Accepts `A`–`D` (any case) and the digits `1`–`4` (1 → A … 4 → D).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "A" | "1" => Ok(AnswerKey::A),
            "B" | "2" => Ok(AnswerKey::B),
            "C" | "3" => Ok(AnswerKey::C),
            "D" | "4" => Ok(AnswerKey::D),
            other => Err(format!("invalid answer key: {other}")),
        }
    }
}

/// Requested difficulty of a question or session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Difficulty::Easy => write!(f, "easy"),
            Difficulty::Medium => write!(f, "medium"),
            Difficulty::Hard => write!(f, "hard"),
        }
    }
}

impl FromStr for Difficulty {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "easy" => Ok(Difficulty::Easy),
            "medium" | "moderate" => Ok(Difficulty::Medium),
            "hard" | "difficult" => Ok(Difficulty::Hard),
            other => Err(format!("unknown difficulty: {other}")),
        }
    }
}

/// Where a question came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    AiGenerated,
    Curated,
}

/// A validated multiple-choice question.
///
/// Only constructed through [`Question::new`], which enforces the option
/// count, so every `Question` in the system has exactly four options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    pub id: Uuid,
    pub exam_id: String,
    pub subject: String,
    pub topic: String,
    pub text: String,
    options: [String; OPTION_COUNT],
    pub correct_answer: AnswerKey,
    pub explanation: String,
    pub difficulty: Difficulty,
    pub provenance: Provenance,
    pub created_at: DateTime<Utc>,
}

/// Fields needed to build a [`Question`].
#[derive(Debug, Clone)]
pub struct QuestionDraft {
    pub exam_id: String,
    pub subject: String,
    pub topic: String,
    pub text: String,
    pub options: Vec<String>,
    pub correct_answer: AnswerKey,
    pub explanation: String,
    pub difficulty: Difficulty,
    pub provenance: Provenance,
}

impl Question {
    /// Validate a draft into a question with a fresh id.
    ///
    /// Fails when the text is blank or the draft does not carry exactly four
    /// options.
    pub fn new(draft: QuestionDraft) -> Result<Self, String> {
        if draft.text.trim().is_empty() {
            return Err("question text is empty".into());
        }
        let count = draft.options.len();
        let options: [String; OPTION_COUNT] = draft
            .options
            .try_into()
            .map_err(|_| format!("expected {OPTION_COUNT} options, got {count}"))?;

        Ok(Self {
            id: Uuid::new_v4(),
            exam_id: draft.exam_id,
            subject: draft.subject,
            topic: draft.topic,
            text: draft.text,
            options,
            correct_answer: draft.correct_answer,
            explanation: draft.explanation,
            difficulty: draft.difficulty,
            provenance: draft.provenance,
            created_at: Utc::now(),
        })
    }

    pub fn options(&self) -> &[String; OPTION_COUNT] {
        &self.options
    }

    /// Text of the option behind `key`.
    pub fn option(&self, key: AnswerKey) -> &str {
        &self.options[key.index()]
    }

    pub fn is_correct(&self, answer: AnswerKey) -> bool {
        self.correct_answer == answer
    }
}

/// Lifecycle state of a quiz session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    InProgress,
    Completed,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionStatus::InProgress => write!(f, "in_progress"),
            SessionStatus::Completed => write!(f, "completed"),
        }
    }
}

/// A single attempt at a question. Append-only, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressRecord {
    pub id: Uuid,
    pub user_id: String,
    pub exam_id: String,
    pub question_id: Uuid,
    #[serde(default)]
    pub session_id: Option<Uuid>,
    pub user_answer: AnswerKey,
    pub is_correct: bool,
    pub time_spent_secs: u64,
    pub attempted_at: DateTime<Utc>,
}

/// Health band of a subject's accuracy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubjectStatus {
    Excellent,
    Good,
    NeedsImprovement,
}

impl fmt::Display for SubjectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubjectStatus::Excellent => write!(f, "excellent"),
            SubjectStatus::Good => write!(f, "good"),
            SubjectStatus::NeedsImprovement => write!(f, "needs improvement"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubjectAnalysis {
    pub subject: String,
    /// Accuracy in percent, rounded.
    pub score: u32,
    pub status: SubjectStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Medium,
    Low,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Priority::High => write!(f, "high"),
            Priority::Medium => write!(f, "medium"),
            Priority::Low => write!(f, "low"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub title: String,
    pub description: String,
    pub priority: Priority,
}

/// Outcome of a success-probability prediction. Not persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    pub current_probability: u32,
    pub required_probability: u32,
    pub improvement: u32,
    pub subject_analysis: Vec<SubjectAnalysis>,
    pub recommendations: Vec<Recommendation>,
}
