//! Success-probability prediction and study recommendations.
//!
//! The probability blends three signals from the attempt log:
//!
//! - overall accuracy across all attempts,
//! - consistency, `100 - stddev` of the per-subject accuracies,
//! - accuracy over the most recent attempts,
//!
//! weighted by [`PredictionSettings`]. The result is compared against the
//! exam's rank benchmark to report how much improvement is still needed.

use std::sync::Arc;

use serde::Deserialize;

use crate::error::{AssessmentError, AssessmentResult};
use crate::model::{PredictionResult, Priority, Recommendation, SubjectAnalysis, SubjectStatus};
use crate::progress::{subject_totals, ProgressRecorder};
use crate::prompt;
use crate::requester::QuestionRequester;
use crate::settings::{AssessmentConfig, ExamProfile, PredictionSettings};
use crate::store::{SubjectAttempt, Totals};
use crate::traits::GenerateRequest;

/// Most recommendations taken from an advisor reply.
const MAX_ADVISOR_RECOMMENDATIONS: usize = 5;

/// Classify a subject accuracy into its band.
pub fn subject_status(accuracy: f64, settings: &PredictionSettings) -> SubjectStatus {
    if accuracy >= settings.excellent_threshold {
        SubjectStatus::Excellent
    } else if accuracy >= settings.good_threshold {
        SubjectStatus::Good
    } else {
        SubjectStatus::NeedsImprovement
    }
}

/// `max(0, 100 - sqrt(population variance))` of the given accuracies.
pub fn consistency_score(accuracies: &[f64]) -> f64 {
    if accuracies.is_empty() {
        return 100.0;
    }
    let n = accuracies.len() as f64;
    let mean = accuracies.iter().sum::<f64>() / n;
    let variance = accuracies.iter().map(|a| (a - mean).powi(2)).sum::<f64>() / n;
    (100.0 - variance.sqrt()).max(0.0)
}

struct ScoredSubject {
    subject: String,
    accuracy: f64,
    status: SubjectStatus,
}

/// Compute a prediction from subject-tagged attempts (newest first).
///
/// Fails with [`AssessmentError::InsufficientData`] below the configured
/// minimum attempt count.
pub fn compute_prediction(
    attempts: &[SubjectAttempt],
    required_probability: u32,
    settings: &PredictionSettings,
) -> AssessmentResult<PredictionResult> {
    if attempts.len() < settings.min_attempts {
        return Err(AssessmentError::InsufficientData {
            attempts: attempts.len(),
            required: settings.min_attempts,
        });
    }

    let mut overall = Totals::default();
    for attempt in attempts {
        overall.add(attempt.is_correct);
    }
    let mut recent = Totals::default();
    for attempt in attempts.iter().take(settings.recent_window) {
        recent.add(attempt.is_correct);
    }

    let subjects: Vec<ScoredSubject> = subject_totals(attempts)
        .into_iter()
        .map(|s| {
            let accuracy = s.totals.accuracy();
            ScoredSubject {
                status: subject_status(accuracy, settings),
                subject: s.subject,
                accuracy,
            }
        })
        .collect();
    let accuracies: Vec<f64> = subjects.iter().map(|s| s.accuracy).collect();
    let consistency = consistency_score(&accuracies);

    let blended = settings.overall_weight * overall.accuracy()
        + settings.consistency_weight * consistency
        + settings.recent_weight * recent.accuracy();
    let current_probability = blended.round().clamp(0.0, 100.0) as u32;
    let required_probability = required_probability.min(100);

    tracing::debug!(
        attempts = attempts.len(),
        overall = overall.accuracy(),
        consistency,
        recent = recent.accuracy(),
        current_probability,
        "prediction computed"
    );

    Ok(PredictionResult {
        current_probability,
        required_probability,
        improvement: required_probability.saturating_sub(current_probability),
        recommendations: rule_recommendations(&subjects, settings),
        subject_analysis: subjects
            .into_iter()
            .map(|s| SubjectAnalysis {
                subject: s.subject,
                score: s.accuracy.round() as u32,
                status: s.status,
            })
            .collect(),
    })
}

fn rule_recommendations(subjects: &[ScoredSubject], settings: &PredictionSettings) -> Vec<Recommendation> {
    let mut weakest_first: Vec<&ScoredSubject> = subjects.iter().collect();
    weakest_first.sort_by(|a, b| a.accuracy.total_cmp(&b.accuracy));

    // Strongest subject; ties go to the alphabetically first.
    let strongest = subjects
        .iter()
        .rev()
        .max_by(|a, b| a.accuracy.total_cmp(&b.accuracy));
    let is_strongest = |s: &ScoredSubject| strongest.is_some_and(|top| top.subject == s.subject);

    let mut recommendations = Vec::new();

    for s in weakest_first
        .iter()
        .filter(|s| s.status == SubjectStatus::NeedsImprovement)
    {
        recommendations.push(Recommendation {
            title: format!("Focus on {}", s.subject),
            description: format!(
                "Your accuracy in {} is {:.0}%. Revisit the fundamentals and practise targeted questions daily.",
                s.subject, s.accuracy
            ),
            priority: Priority::High,
        });
    }

    for s in weakest_first
        .iter()
        .filter(|s| s.status == SubjectStatus::Good && !is_strongest(**s))
        .take(settings.max_medium_recommendations)
    {
        recommendations.push(Recommendation {
            title: format!("Strengthen {}", s.subject),
            description: format!(
                "{} is at {:.0}%. Work through harder problems to push it into the excellent band.",
                s.subject, s.accuracy
            ),
            priority: Priority::Medium,
        });
    }

    // A needs-improvement strongest subject already has its focus note.
    if let Some(s) = strongest.filter(|s| s.status != SubjectStatus::NeedsImprovement) {
        recommendations.push(Recommendation {
            title: format!("Maintain {}", s.subject),
            description: format!(
                "{} is your strongest subject at {:.0}%. Keep it sharp with periodic revision.",
                s.subject, s.accuracy
            ),
            priority: Priority::Low,
        });
    }

    if recommendations.is_empty() {
        recommendations.push(Recommendation {
            title: "Keep practising".into(),
            description: "Attempt a mixed set of questions every day to build consistency.".into(),
            priority: Priority::Medium,
        });
    }
    recommendations
}

#[derive(Deserialize)]
struct AdvisorItem {
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    priority: Option<String>,
}

/// Parse an advisor reply: a JSON array of `{title, description, priority}`
/// located between the first `[` and the last `]`.
pub fn parse_recommendations(text: &str) -> Result<Vec<Recommendation>, String> {
    let start = text.find('[').ok_or("no JSON array in reply")?;
    let end = text
        .rfind(']')
        .filter(|end| *end > start)
        .ok_or("unterminated JSON array in reply")?;
    let items: Vec<AdvisorItem> =
        serde_json::from_str(&text[start..=end]).map_err(|e| format!("invalid advisor JSON: {e}"))?;

    let recommendations: Vec<Recommendation> = items
        .into_iter()
        .filter(|item| !item.title.trim().is_empty())
        .take(MAX_ADVISOR_RECOMMENDATIONS)
        .map(|item| Recommendation {
            title: item.title.trim().to_string(),
            description: item.description.trim().to_string(),
            priority: match item.priority.as_deref().map(str::trim) {
                Some(p) if p.eq_ignore_ascii_case("high") => Priority::High,
                Some(p) if p.eq_ignore_ascii_case("low") => Priority::Low,
                _ => Priority::Medium,
            },
        })
        .collect();

    if recommendations.is_empty() {
        return Err("advisor returned no recommendations".into());
    }
    Ok(recommendations)
}

/// Optional generator-backed recommendation source.
#[derive(Clone)]
pub struct Advisor {
    requester: QuestionRequester,
    model: String,
}

impl Advisor {
    pub fn new(requester: QuestionRequester, model: impl Into<String>) -> Self {
        Self {
            requester,
            model: model.into(),
        }
    }

    async fn recommend(&self, exam: &ExamProfile, result: &PredictionResult) -> Result<Vec<Recommendation>, String> {
        let mut request = GenerateRequest::new(
            self.model.clone(),
            prompt::recommendation_prompt(
                exam,
                result.current_probability,
                result.required_probability,
                &result.subject_analysis,
            ),
        );
        request.system_prompt = Some(prompt::ADVISOR_SYSTEM_PROMPT.to_string());

        let generated = self
            .requester
            .send(&request, None)
            .await
            .map_err(|e| e.to_string())?;
        parse_recommendations(&generated.response.content)
    }
}

/// Reads the attempt log and produces predictions.
#[derive(Clone)]
pub struct Predictor {
    progress: ProgressRecorder,
    config: Arc<AssessmentConfig>,
    advisor: Option<Advisor>,
}

impl Predictor {
    pub fn new(progress: ProgressRecorder, config: Arc<AssessmentConfig>) -> Self {
        Self {
            progress,
            config,
            advisor: None,
        }
    }

    pub fn with_advisor(mut self, advisor: Advisor) -> Self {
        self.advisor = Some(advisor);
        self
    }

    /// Predict the user's chance of reaching `target_rank` on an exam.
    pub async fn predict(&self, user_id: &str, exam_id: &str, target_rank: u32) -> AssessmentResult<PredictionResult> {
        let attempts = self.progress.subject_attempts(user_id, exam_id).await?;
        let required = self.config.required_probability(exam_id, target_rank);
        let mut result = compute_prediction(&attempts, required, &self.config.prediction)?;

        if let Some(advisor) = &self.advisor {
            let exam = self.config.exam(exam_id).cloned().unwrap_or_else(|| ExamProfile {
                id: exam_id.to_string(),
                name: exam_id.to_string(),
                subjects: Vec::new(),
                benchmarks: Vec::new(),
            });
            match advisor.recommend(&exam, &result).await {
                Ok(extra) => merge_recommendations(&mut result.recommendations, extra),
                Err(reason) => {
                    tracing::warn!(exam = exam_id, "advisor failed, using rule-based recommendations: {reason}");
                }
            }
        }

        Ok(result)
    }
}

/// Append advisor items whose titles are new, then order by priority.
fn merge_recommendations(base: &mut Vec<Recommendation>, extra: Vec<Recommendation>) {
    for rec in extra {
        if !base.iter().any(|r| r.title.eq_ignore_ascii_case(&rec.title)) {
            base.push(rec);
        }
    }
    base.sort_by_key(|r| r.priority);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::BackendRegistry;
    use crate::requester::RequesterConfig;
    use crate::traits::{BackendKind, GenerateResponse, ModelInfo, TextGenerator, TokenUsage};
    use async_trait::async_trait;
    use chrono::{Duration, Utc};

    fn attempts(layout: &[(&str, usize, usize)]) -> Vec<SubjectAttempt> {
        let now = Utc::now();
        let mut out = Vec::new();
        for (subject, total, correct) in layout {
            for i in 0..*total {
                out.push(SubjectAttempt {
                    subject: subject.to_string(),
                    is_correct: i < *correct,
                    attempted_at: now - Duration::minutes(out.len() as i64),
                });
            }
        }
        out
    }

    #[test]
    fn fewer_than_minimum_is_insufficient() {
        let settings = PredictionSettings::default();
        let err = compute_prediction(&attempts(&[("Physics", 9, 9)]), 80, &settings).unwrap_err();
        assert!(matches!(
            err,
            AssessmentError::InsufficientData { attempts: 9, required: 10 }
        ));
        assert!(compute_prediction(&attempts(&[("Physics", 10, 9)]), 80, &settings).is_ok());
    }

    #[test]
    fn blends_overall_consistency_and_recent() {
        // Physics 80%, Chemistry 40%: overall 60, stddev 20, recent 60.
        let result = compute_prediction(
            &attempts(&[("Physics", 5, 4), ("Chemistry", 5, 2)]),
            85,
            &PredictionSettings::default(),
        )
        .unwrap();
        assert_eq!(result.current_probability, 64);
        assert_eq!(result.required_probability, 85);
        assert_eq!(result.improvement, 21);

        assert_eq!(result.subject_analysis.len(), 2);
        assert_eq!(result.subject_analysis[0].subject, "Chemistry");
        assert_eq!(result.subject_analysis[0].score, 40);
        assert_eq!(result.subject_analysis[0].status, SubjectStatus::NeedsImprovement);
        assert_eq!(result.subject_analysis[1].status, SubjectStatus::Good);

        let recs: Vec<(Priority, &str)> = result
            .recommendations
            .iter()
            .map(|r| (r.priority, r.title.as_str()))
            .collect();
        assert_eq!(
            recs,
            vec![(Priority::High, "Focus on Chemistry"), (Priority::Low, "Maintain Physics")]
        );
    }

    #[test]
    fn recent_window_uses_newest_attempts() {
        // Newest ten correct, older ten wrong.
        let now = Utc::now();
        let log: Vec<SubjectAttempt> = (0..20)
            .map(|i| SubjectAttempt {
                subject: "Biology".into(),
                is_correct: i < 10,
                attempted_at: now - Duration::minutes(i),
            })
            .collect();
        let result = compute_prediction(&log, 75, &PredictionSettings::default()).unwrap();
        // 0.6*50 + 0.2*100 + 0.2*100
        assert_eq!(result.current_probability, 70);
        assert_eq!(result.improvement, 5);
    }

    #[test]
    fn improvement_is_zero_when_ahead() {
        let result =
            compute_prediction(&attempts(&[("Physics", 10, 10)]), 65, &PredictionSettings::default()).unwrap();
        assert_eq!(result.current_probability, 100);
        assert_eq!(result.improvement, 0);
    }

    #[test]
    fn strongest_subject_gets_a_maintenance_note() {
        let result = compute_prediction(
            &attempts(&[("Physics", 10, 10), ("Chemistry", 10, 6)]),
            80,
            &PredictionSettings::default(),
        )
        .unwrap();
        let last = result.recommendations.last().unwrap();
        assert_eq!(last.priority, Priority::Low);
        assert_eq!(last.title, "Maintain Physics");
    }

    #[test]
    fn good_strongest_subject_is_maintained_not_strengthened() {
        let result = compute_prediction(
            &attempts(&[("Physics", 10, 8), ("Chemistry", 20, 15)]),
            80,
            &PredictionSettings::default(),
        )
        .unwrap();
        let recs: Vec<(Priority, &str)> = result
            .recommendations
            .iter()
            .map(|r| (r.priority, r.title.as_str()))
            .collect();
        assert_eq!(
            recs,
            vec![(Priority::Medium, "Strengthen Chemistry"), (Priority::Low, "Maintain Physics")]
        );
    }

    #[test]
    fn weak_strongest_subject_gets_no_maintenance_note() {
        let result =
            compute_prediction(&attempts(&[("Physics", 10, 4)]), 80, &PredictionSettings::default()).unwrap();
        assert_eq!(result.recommendations.len(), 1);
        assert_eq!(result.recommendations[0].priority, Priority::High);
        assert_eq!(result.recommendations[0].title, "Focus on Physics");

        let result =
            compute_prediction(&attempts(&[("Physics", 10, 7)]), 80, &PredictionSettings::default()).unwrap();
        assert_eq!(result.recommendations.len(), 1);
        assert_eq!(result.recommendations[0].priority, Priority::Low);
        assert_eq!(result.recommendations[0].title, "Maintain Physics");
    }

    #[test]
    fn medium_recommendations_are_capped() {
        let result = compute_prediction(
            &attempts(&[("A", 10, 7), ("B", 10, 7), ("C", 10, 8), ("D", 10, 10)]),
            80,
            &PredictionSettings::default(),
        )
        .unwrap();
        let medium = result
            .recommendations
            .iter()
            .filter(|r| r.priority == Priority::Medium)
            .count();
        assert_eq!(medium, 2);
        assert!(result.recommendations.iter().all(|r| r.title != "Strengthen C"));
    }

    #[test]
    fn consistency_floor_is_zero() {
        assert_eq!(consistency_score(&[]), 100.0);
        assert_eq!(consistency_score(&[70.0, 70.0]), 100.0);
        assert!(consistency_score(&[0.0, 100.0]) >= 0.0);
    }

    #[test]
    fn advisor_reply_parsing() {
        let reply = "Here you go:\n[{\"title\":\"Mock tests\",\"description\":\"Weekly\",\"priority\":\"HIGH\"},\
                     {\"title\":\"Revise notes\"}]\nGood luck!";
        let recs = parse_recommendations(reply).unwrap();
        assert_eq!(recs.len(), 2);
        assert_eq!(recs[0].priority, Priority::High);
        assert_eq!(recs[1].priority, Priority::Medium);

        assert!(parse_recommendations("no array").is_err());
        assert!(parse_recommendations("[]").is_err());
        assert!(parse_recommendations("[{\"title\": ").is_err());
    }

    struct Canned(Option<&'static str>);

    #[async_trait]
    impl TextGenerator for Canned {
        fn name(&self) -> &str {
            "canned"
        }
        fn kind(&self) -> BackendKind {
            BackendKind::Cloud
        }
        async fn generate(&self, request: &GenerateRequest) -> anyhow::Result<GenerateResponse> {
            let Some(content) = self.0 else {
                return Err(crate::error::ProviderError::AuthenticationFailed("bad key".into()).into());
            };
            Ok(GenerateResponse {
                content: content.to_string(),
                model: request.model.clone(),
                token_usage: TokenUsage::default(),
                latency_ms: 0,
            })
        }
        fn available_models(&self) -> Vec<ModelInfo> {
            vec![]
        }
    }

    async fn predictor_with(reply: Option<&'static str>) -> Predictor {
        use crate::model::{AnswerKey, Difficulty, ProgressRecord, Provenance, Question, QuestionDraft};
        use crate::store::{AssessmentStore, MemoryStore};
        use uuid::Uuid;

        let store = Arc::new(MemoryStore::new());
        let question = Question::new(QuestionDraft {
            exam_id: "jee-main".into(),
            subject: "Physics".into(),
            topic: "Optics".into(),
            text: "Focal length unit?".into(),
            options: vec!["m".into(), "kg".into(), "s".into(), "A".into()],
            correct_answer: AnswerKey::A,
            explanation: String::new(),
            difficulty: Difficulty::Easy,
            provenance: Provenance::Curated,
        })
        .unwrap();
        store.insert_question(&question).await.unwrap();
        for i in 0..12 {
            store
                .append_progress(&ProgressRecord {
                    id: Uuid::new_v4(),
                    user_id: "u1".into(),
                    exam_id: "jee-main".into(),
                    question_id: question.id,
                    session_id: None,
                    user_answer: AnswerKey::A,
                    is_correct: i % 3 != 0,
                    time_spent_secs: 30,
                    attempted_at: Utc::now() - Duration::minutes(i),
                })
                .await
                .unwrap();
        }

        let registry = BackendRegistry::new()
            .with_backend("cloud", Arc::new(Canned(reply)))
            .with_default("cloud");
        let advisor = Advisor::new(QuestionRequester::new(registry, RequesterConfig::default()), "gpt-4.1-mini");
        Predictor::new(ProgressRecorder::new(store), Arc::new(AssessmentConfig::default())).with_advisor(advisor)
    }

    #[tokio::test]
    async fn advisor_recommendations_are_merged() {
        let predictor =
            predictor_with(Some(r#"[{"title":"Timed mock papers","description":"Two per week","priority":"high"}]"#))
                .await;
        let result = predictor.predict("u1", "jee-main", 5000).await.unwrap();
        assert_eq!(result.required_probability, 85);
        let titles: Vec<&str> = result.recommendations.iter().map(|r| r.title.as_str()).collect();
        assert_eq!(titles, vec!["Focus on Physics", "Timed mock papers"]);
    }

    #[tokio::test]
    async fn advisor_failure_falls_back_to_rules() {
        for reply in [None, Some("I cannot help with that.")] {
            let predictor = predictor_with(reply).await;
            let result = predictor.predict("u1", "jee-main", 5000).await.unwrap();
            assert!(!result.recommendations.is_empty());
            assert!(result.recommendations.iter().all(|r| r.title.contains("Physics")));
        }
    }
}
