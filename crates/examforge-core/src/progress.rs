//! Progress recorder: aggregate queries over the append-only attempt log.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{DateTime, Local, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AssessmentResult;
use crate::model::ProgressRecord;
use crate::store::{AssessmentStore, SubjectAttempt, Totals};

/// Per-subject slice of a user's attempts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubjectTotals {
    pub subject: String,
    pub totals: Totals,
}

/// Dashboard view of a user's progress on one exam.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressSummary {
    pub totals: Totals,
    /// Accuracy in percent, rounded.
    pub accuracy: u32,
    pub average_time_secs: u64,
    /// Consecutive active days across all exams.
    pub streak_days: u32,
    pub subjects: Vec<SubjectTotals>,
}

/// Group subject-tagged attempts into per-subject totals, sorted by subject.
pub fn subject_totals(attempts: &[SubjectAttempt]) -> Vec<SubjectTotals> {
    let mut by_subject: BTreeMap<&str, Totals> = BTreeMap::new();
    for attempt in attempts {
        by_subject
            .entry(attempt.subject.as_str())
            .or_default()
            .add(attempt.is_correct);
    }
    by_subject
        .into_iter()
        .map(|(subject, totals)| SubjectTotals {
            subject: subject.to_string(),
            totals,
        })
        .collect()
}

/// Local calendar day of a timestamp.
pub fn local_day(at: DateTime<Utc>) -> NaiveDate {
    at.with_timezone(&Local).date_naive()
}

/// Consecutive active days ending today, or yesterday if today has no
/// activity yet. Any other gap stops the count.
pub fn current_streak(active_days: &BTreeSet<NaiveDate>, today: NaiveDate) -> u32 {
    let mut expected = today;
    let mut streak = 0;

    for day in active_days.iter().rev().filter(|d| **d <= today) {
        if *day == expected {
            streak += 1;
        } else if streak == 0 && Some(*day) == today.pred_opt() {
            // No activity today yet; the streak can still run from yesterday.
            streak = 1;
            expected = *day;
        } else {
            break;
        }
        match expected.pred_opt() {
            Some(prev) => expected = prev,
            None => break,
        }
    }

    streak
}

/// Read side of the attempt log.
#[derive(Clone)]
pub struct ProgressRecorder {
    store: Arc<dyn AssessmentStore>,
}

impl ProgressRecorder {
    pub fn new(store: Arc<dyn AssessmentStore>) -> Self {
        Self { store }
    }

    pub async fn exam_totals(&self, user_id: &str, exam_id: &str) -> AssessmentResult<Totals> {
        Ok(self.store.exam_totals(user_id, exam_id).await?)
    }

    pub async fn subject_totals(&self, user_id: &str, exam_id: &str) -> AssessmentResult<Vec<SubjectTotals>> {
        let attempts = self.store.subject_attempts(user_id, exam_id).await?;
        Ok(subject_totals(&attempts))
    }

    /// Subject-tagged attempts, newest first.
    pub async fn subject_attempts(&self, user_id: &str, exam_id: &str) -> AssessmentResult<Vec<SubjectAttempt>> {
        Ok(self.store.subject_attempts(user_id, exam_id).await?)
    }

    /// The `limit` most recent attempts on an exam, newest first.
    pub async fn recent(&self, user_id: &str, exam_id: &str, limit: usize) -> AssessmentResult<Vec<ProgressRecord>> {
        let mut records = self.store.attempts(user_id, Some(exam_id)).await?;
        records.truncate(limit);
        Ok(records)
    }

    /// Distinct local days on which the user attempted anything.
    pub async fn active_days(&self, user_id: &str) -> AssessmentResult<BTreeSet<NaiveDate>> {
        let records = self.store.attempts(user_id, None).await?;
        Ok(records.iter().map(|r| local_day(r.attempted_at)).collect())
    }

    pub async fn streak(&self, user_id: &str) -> AssessmentResult<u32> {
        let days = self.active_days(user_id).await?;
        Ok(current_streak(&days, Local::now().date_naive()))
    }

    pub async fn summary(&self, user_id: &str, exam_id: &str) -> AssessmentResult<ProgressSummary> {
        let (records, subjects, days) = futures::try_join!(
            self.recent(user_id, exam_id, usize::MAX),
            self.subject_totals(user_id, exam_id),
            self.active_days(user_id),
        )?;

        let mut totals = Totals::default();
        let mut time_spent: u64 = 0;
        for record in &records {
            totals.add(record.is_correct);
            time_spent = time_spent.saturating_add(record.time_spent_secs);
        }
        let average_time_secs = if records.is_empty() {
            0
        } else {
            time_spent / records.len() as u64
        };

        Ok(ProgressSummary {
            accuracy: totals.accuracy().round() as u32,
            totals,
            average_time_secs,
            streak_days: current_streak(&days, Local::now().date_naive()),
            subjects,
        })
    }
}
