//! Prompt templates sent to text-generation backends.

use crate::model::{Difficulty, SubjectAnalysis};
use crate::settings::ExamProfile;

/// System prompt used for question generation.
pub const QUESTION_SYSTEM_PROMPT: &str = "You are an experienced examiner who writes \
multiple-choice questions for competitive exams. Reply with a single JSON object and \
nothing else.";

/// System prompt used for study recommendations.
pub const ADVISOR_SYSTEM_PROMPT: &str = "You are a study coach for competitive exams. \
Reply with a JSON array and nothing else.";

/// Build the instruction for one multiple-choice question.
pub fn question_prompt(
    exam: &ExamProfile,
    difficulty: Difficulty,
    subject: Option<&str>,
    topic: Option<&str>,
) -> String {
    let mut prompt = format!(
        "Write one {difficulty} multiple-choice question for the {} exam.\n",
        exam.name
    );

    match subject {
        Some(subject) => {
            let subject = exam.match_subject(subject).unwrap_or(subject);
            prompt.push_str(&format!("Subject: {subject}\n"));
        }
        None if !exam.subjects.is_empty() => prompt.push_str(&format!(
            "Pick one subject from: {}. Report it in the \"subject\" field.\n",
            exam.subjects.join(", ")
        )),
        None => {}
    }
    if let Some(topic) = topic {
        prompt.push_str(&format!("Topic: {topic}\n"));
    }

    prompt.push_str(
        "\nRespond with a JSON object with exactly these fields:\n\
         - \"question\": the question text\n\
         - \"options\": an array of exactly 4 answer strings\n\
         - \"correctAnswer\": the letter of the correct option (\"A\", \"B\", \"C\" or \"D\")\n\
         - \"topic\": the specific topic tested\n\
         - \"subject\": the subject of the question\n\
         - \"explanation\": why the correct option is right\n\
         \nEscape every backslash in LaTeX as \\\\ (for example \\\\frac). \
         Do not wrap the JSON in markdown.",
    );
    prompt
}

/// Build the instruction asking for study recommendations.
pub fn recommendation_prompt(
    exam: &ExamProfile,
    current_probability: u32,
    required_probability: u32,
    subjects: &[SubjectAnalysis],
) -> String {
    let mut prompt = format!(
        "A student preparing for {} has an estimated success probability of \
         {current_probability}% against a required {required_probability}%.\n\
         Subject accuracy:\n",
        exam.name
    );
    for s in subjects {
        prompt.push_str(&format!("- {}: {}% ({})\n", s.subject, s.score, s.status));
    }
    prompt.push_str(
        "\nSuggest up to 5 concrete study actions as a JSON array of objects with \
         \"title\", \"description\" and \"priority\" (\"high\", \"medium\" or \"low\").",
    );
    prompt
}
