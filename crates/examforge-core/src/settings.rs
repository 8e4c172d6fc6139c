//! Assessment configuration: exam catalog, rank benchmarks and prediction
//! parameters.
//!
//! Loaded once from TOML and validated, then shared read-only with the
//! engine. [`AssessmentConfig::default`] carries a built-in catalog so the
//! engine works without a config file.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// One row of a rank benchmark table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Benchmark {
    /// Upper rank bound this row covers.
    pub rank: u32,
    /// Minimum success probability (percent) historically needed.
    pub probability: u32,
}

/// An exam the engine can generate questions and predictions for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExamProfile {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub subjects: Vec<String>,
    /// Rank thresholds in ascending order.
    #[serde(default)]
    pub benchmarks: Vec<Benchmark>,
}

impl ExamProfile {
    /// Probability needed for `target_rank`: the first threshold at or above
    /// the rank, else the highest threshold. `None` without benchmarks.
    pub fn required_probability(&self, target_rank: u32) -> Option<u32> {
        self.benchmarks
            .iter()
            .find(|b| b.rank >= target_rank)
            .or_else(|| self.benchmarks.last())
            .map(|b| b.probability)
    }

    /// Canonical spelling of `subject` if the exam lists it.
    pub fn match_subject(&self, subject: &str) -> Option<&str> {
        let wanted = subject.trim();
        self.subjects
            .iter()
            .find(|s| s.eq_ignore_ascii_case(wanted))
            .map(String::as_str)
    }
}

/// Tunable parameters of the success-probability model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PredictionSettings {
    /// Weight of lifetime accuracy.
    pub overall_weight: f64,
    /// Weight of cross-subject consistency.
    pub consistency_weight: f64,
    /// Weight of recent accuracy.
    pub recent_weight: f64,
    /// Attempts required before predicting.
    pub min_attempts: usize,
    /// Attempts counted as "recent".
    pub recent_window: usize,
    /// Accuracy at or above which a subject is excellent.
    pub excellent_threshold: f64,
    /// Accuracy at or above which a subject is good.
    pub good_threshold: f64,
    /// Most medium-priority recommendations emitted.
    pub max_medium_recommendations: usize,
    /// Required probability for exams without benchmarks.
    pub default_required_probability: u32,
}

impl Default for PredictionSettings {
    fn default() -> Self {
        Self {
            overall_weight: 0.6,
            consistency_weight: 0.2,
            recent_weight: 0.2,
            min_attempts: 10,
            recent_window: 10,
            excellent_threshold: 85.0,
            good_threshold: 70.0,
            max_medium_recommendations: 2,
            default_required_probability: 75,
        }
    }
}

/// A problem found while validating configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigIssue {
    /// Exam id (if the issue is exam-specific).
    pub exam_id: Option<String>,
    pub message: String,
}

/// Everything the assessment engine reads from configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssessmentConfig {
    #[serde(default)]
    pub prediction: PredictionSettings,
    #[serde(default = "default_exams")]
    pub exams: Vec<ExamProfile>,
}

impl Default for AssessmentConfig {
    fn default() -> Self {
        Self {
            prediction: PredictionSettings::default(),
            exams: default_exams(),
        }
    }
}

impl AssessmentConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: AssessmentConfig =
            toml::from_str(content).context("failed to parse assessment config")?;
        config.ensure_valid()?;
        Ok(config)
    }

    pub fn exam(&self, exam_id: &str) -> Option<&ExamProfile> {
        self.exams.iter().find(|e| e.id == exam_id)
    }

    /// Required probability for an exam and rank, with the configured default
    /// for exams that have no benchmark table.
    pub fn required_probability(&self, exam_id: &str, target_rank: u32) -> u32 {
        self.exam(exam_id)
            .and_then(|e| e.required_probability(target_rank))
            .unwrap_or(self.prediction.default_required_probability)
    }

    /// Fail with every issue found, if any.
    pub fn ensure_valid(&self) -> Result<()> {
        let issues = self.validate();
        if issues.is_empty() {
            return Ok(());
        }
        let lines: Vec<String> = issues
            .iter()
            .map(|i| match &i.exam_id {
                Some(id) => format!("[{id}] {}", i.message),
                None => i.message.clone(),
            })
            .collect();
        anyhow::bail!("invalid assessment config:\n  {}", lines.join("\n  "))
    }

    /// Check the config for inconsistencies.
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();
        let p = &self.prediction;
        let global = |message: String| ConfigIssue {
            exam_id: None,
            message,
        };

        let weights = [p.overall_weight, p.consistency_weight, p.recent_weight];
        if weights.iter().any(|w| *w < 0.0) {
            issues.push(global("prediction weights must be non-negative".into()));
        }
        let sum: f64 = weights.iter().sum();
        if (sum - 1.0).abs() > 1e-6 {
            issues.push(global(format!("prediction weights must sum to 1.0, got {sum}")));
        }
        if p.min_attempts == 0 {
            issues.push(global("min_attempts must be at least 1".into()));
        }
        if p.recent_window == 0 {
            issues.push(global("recent_window must be at least 1".into()));
        }
        if !(0.0..=100.0).contains(&p.good_threshold)
            || !(0.0..=100.0).contains(&p.excellent_threshold)
            || p.good_threshold > p.excellent_threshold
        {
            issues.push(global(
                "thresholds must satisfy 0 <= good_threshold <= excellent_threshold <= 100".into(),
            ));
        }
        if p.default_required_probability > 100 {
            issues.push(global("default_required_probability must be at most 100".into()));
        }

        let mut seen = std::collections::HashSet::new();
        for exam in &self.exams {
            let issue = |message: String| ConfigIssue {
                exam_id: Some(exam.id.clone()),
                message,
            };
            if !seen.insert(exam.id.as_str()) {
                issues.push(issue(format!("duplicate exam id: {}", exam.id)));
            }
            if exam.id.trim().is_empty() {
                issues.push(issue("exam id is empty".into()));
            }
            if exam
                .benchmarks
                .windows(2)
                .any(|pair| pair[0].rank >= pair[1].rank)
            {
                issues.push(issue("benchmark ranks must be strictly ascending".into()));
            }
            if exam.benchmarks.iter().any(|b| b.probability > 100) {
                issues.push(issue("benchmark probabilities must be at most 100".into()));
            }
        }

        issues
    }
}

fn bench(rows: &[(u32, u32)]) -> Vec<Benchmark> {
    rows.iter()
        .map(|&(rank, probability)| Benchmark { rank, probability })
        .collect()
}

fn subjects(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

fn default_exams() -> Vec<ExamProfile> {
    vec![
        ExamProfile {
            id: "jee-main".into(),
            name: "JEE Main".into(),
            subjects: subjects(&["Physics", "Chemistry", "Mathematics"]),
            benchmarks: bench(&[(100, 98), (1000, 92), (5000, 85), (10000, 78), (50000, 65)]),
        },
        ExamProfile {
            id: "jee-advanced".into(),
            name: "JEE Advanced".into(),
            subjects: subjects(&["Physics", "Chemistry", "Mathematics"]),
            benchmarks: bench(&[(100, 99), (500, 95), (2000, 88), (10000, 75)]),
        },
        ExamProfile {
            id: "neet".into(),
            name: "NEET UG".into(),
            subjects: subjects(&["Physics", "Chemistry", "Biology"]),
            benchmarks: bench(&[(100, 98), (1000, 93), (10000, 85), (50000, 75), (100000, 65)]),
        },
        ExamProfile {
            id: "upsc-prelims".into(),
            name: "UPSC Civil Services Prelims".into(),
            subjects: subjects(&[
                "History",
                "Geography",
                "Polity",
                "Economy",
                "Environment",
                "Current Affairs",
            ]),
            benchmarks: bench(&[(100, 90), (1000, 80), (5000, 70)]),
        },
        ExamProfile {
            id: "gate-cse".into(),
            name: "GATE Computer Science".into(),
            subjects: subjects(&[
                "Algorithms",
                "Data Structures",
                "Operating Systems",
                "Databases",
                "Computer Networks",
                "Theory of Computation",
            ]),
            benchmarks: bench(&[(100, 95), (1000, 85), (5000, 72)]),
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = AssessmentConfig::default();
        assert!(config.validate().is_empty(), "{:?}", config.validate());
        assert_eq!(config.prediction.min_attempts, 10);
        assert!(config.exam("neet").is_some());
    }

    #[test]
    fn required_probability_lookup() {
        let config = AssessmentConfig::default();
        // Exactly at a threshold.
        assert_eq!(config.required_probability("jee-main", 1000), 92);
        // Between thresholds rounds up to the next one.
        assert_eq!(config.required_probability("jee-main", 1001), 85);
        assert_eq!(config.required_probability("jee-main", 1), 98);
        // Above every threshold uses the highest one.
        assert_eq!(config.required_probability("jee-main", 200_000), 65);
        // Unknown exams use the default.
        assert_eq!(config.required_probability("bar-exam", 10), 75);
    }

    #[test]
    fn parse_toml_with_custom_exam() {
        let toml_str = r#"
[prediction]
overall_weight = 0.5
consistency_weight = 0.25
recent_weight = 0.25
min_attempts = 20

[[exams]]
id = "cat"
name = "CAT"
subjects = ["Quant", "Verbal", "DILR"]
benchmarks = [
    { rank = 100, probability = 97 },
    { rank = 1000, probability = 90 },
]
"#;
        let config = AssessmentConfig::from_toml_str(toml_str).unwrap();
        assert_eq!(config.exams.len(), 1);
        assert_eq!(config.prediction.min_attempts, 20);
        assert_eq!(config.prediction.recent_window, 10);
        let cat = config.exam("cat").unwrap();
        assert_eq!(cat.match_subject("verbal"), Some("Verbal"));
        assert_eq!(cat.required_probability(5000), Some(90));
    }

    #[test]
    fn validation_rejects_bad_weights_and_unsorted_benchmarks() {
        let toml_str = r#"
[prediction]
overall_weight = 0.9
consistency_weight = 0.2
recent_weight = 0.2

[[exams]]
id = "x"
name = "X"
benchmarks = [
    { rank = 1000, probability = 80 },
    { rank = 100, probability = 95 },
]
"#;
        let err = AssessmentConfig::from_toml_str(toml_str).unwrap_err();
        let msg = format!("{err:#}");
        assert!(msg.contains("sum to 1.0"), "{msg}");
        assert!(msg.contains("strictly ascending"), "{msg}");
    }

    #[test]
    fn validation_rejects_duplicate_exams() {
        let mut config = AssessmentConfig::default();
        config.exams.push(config.exams[0].clone());
        assert!(config
            .validate()
            .iter()
            .any(|i| i.message.contains("duplicate exam id")));
    }
}
