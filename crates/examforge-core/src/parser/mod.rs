//! Generated-response repair pipeline.
//!
//! Turns raw generator output into a validated question draft. Tiers run in
//! a fixed order and the first one that yields a complete question wins:
//!
//! 0. extraction of the `{ ... }` span (code fences stripped)
//! 1. strict JSON parse
//! 2. strict parse after doubling stray backslashes
//! 3. lenient field-by-field extraction, padding missing options
//!
//! The result is either a question with exactly four options and a valid
//! answer key, or a [`ParseError`].

pub mod lenient;

use std::fmt;

use serde::Deserialize;
use serde_json::Value;

use crate::error::ParseError;
use crate::model::{AnswerKey, Difficulty, Provenance, Question, QuestionDraft, OPTION_COUNT};

use self::lenient::LenientOutcome;

/// Which tier produced a parsed question.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseTier {
    Strict,
    BackslashRepair,
    Lenient,
}

impl fmt::Display for ParseTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseTier::Strict => write!(f, "strict"),
            ParseTier::BackslashRepair => write!(f, "backslash-repair"),
            ParseTier::Lenient => write!(f, "lenient"),
        }
    }
}

/// A question recovered from generated text, not yet bound to an exam.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedQuestion {
    pub text: String,
    /// Always exactly [`OPTION_COUNT`] entries.
    pub options: Vec<String>,
    pub correct_answer: AnswerKey,
    pub topic: Option<String>,
    /// Subject the generator chose, if it reported one.
    pub subject: Option<String>,
    pub explanation: String,
    /// Tier that produced this result.
    pub tier: ParseTier,
    /// Option slots filled with placeholders by the lenient tier.
    pub padded: Vec<AnswerKey>,
}

impl ParsedQuestion {
    /// Returns `true` if any option is a placeholder.
    pub fn is_padded(&self) -> bool {
        !self.padded.is_empty()
    }

    /// Bind the parsed content to an exam and produce a stored question.
    pub fn into_question(
        self,
        exam_id: &str,
        subject: &str,
        requested_topic: Option<&str>,
        difficulty: Difficulty,
    ) -> Result<Question, ParseError> {
        let topic = self
            .topic
            .filter(|t| !t.trim().is_empty())
            .or_else(|| requested_topic.map(str::to_string))
            .unwrap_or_else(|| subject.to_string());

        Question::new(QuestionDraft {
            exam_id: exam_id.to_string(),
            subject: subject.to_string(),
            topic,
            text: self.text,
            options: self.options,
            correct_answer: self.correct_answer,
            explanation: self.explanation,
            difficulty,
            provenance: Provenance::AiGenerated,
        })
        .map_err(ParseError::UnparseableResponse)
    }
}

/// Run the full pipeline over raw generator output.
pub fn parse_response(raw: &str) -> Result<ParsedQuestion, ParseError> {
    let span = extract_json_object(raw)?;

    match parse_strict(&span) {
        Ok(parsed) => {
            tracing::debug!(tier = %ParseTier::Strict, "parsed generated question");
            return Ok(parsed.finish(ParseTier::Strict));
        }
        Err(reason) => tracing::debug!("strict parse failed: {reason}"),
    }

    let repaired = repair_backslashes(&span);
    if repaired != span {
        match parse_strict(&repaired) {
            Ok(parsed) => {
                tracing::debug!(tier = %ParseTier::BackslashRepair, "parsed generated question");
                return Ok(parsed.finish(ParseTier::BackslashRepair));
            }
            Err(reason) => tracing::debug!("repaired parse failed: {reason}"),
        }
    }

    match lenient::extract_fields(&span) {
        LenientOutcome::Complete(fields) | LenientOutcome::Partial(fields) => {
            if !fields.padded.is_empty() {
                tracing::warn!(
                    padded = fields.padded.len(),
                    "lenient parse padded missing options with placeholders"
                );
            }
            Ok(ParsedQuestion {
                text: fields.question,
                options: fields.options,
                correct_answer: fields.correct_answer,
                topic: fields.topic,
                subject: fields.subject,
                explanation: fields.explanation.unwrap_or_default(),
                tier: ParseTier::Lenient,
                padded: fields.padded,
            })
        }
        LenientOutcome::Failed(reason) => {
            tracing::warn!("all parse tiers failed: {reason}");
            Err(ParseError::UnparseableResponse(reason))
        }
    }
}

/// Strip code fences and return the outermost `{ ... }` span.
///
/// When the closing brace is missing (truncated output) the span runs to the
/// end of the text so the lenient tier can still try to recover it.
pub fn extract_json_object(raw: &str) -> Result<String, ParseError> {
    let stripped = strip_code_fences(raw);
    let start = stripped.find('{').ok_or(ParseError::NoJsonFound)?;
    let span = match stripped.rfind('}') {
        Some(end) if end > start => &stripped[start..=end],
        _ => &stripped[start..],
    };
    Ok(span.trim().to_string())
}

fn strip_code_fences(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    let mut opening = true;
    while let Some(pos) = rest.find("```") {
        out.push_str(&rest[..pos]);
        rest = &rest[pos + 3..];
        // Only an opening fence carries a language tag (```json).
        if opening {
            let tag_len = rest
                .find(|c: char| !c.is_ascii_alphanumeric())
                .unwrap_or(rest.len());
            if rest[tag_len..].starts_with(['\n', '\r']) || tag_len == rest.len() {
                rest = &rest[tag_len..];
            }
        }
        opening = !opening;
    }
    out.push_str(rest);
    out
}

/// Double every backslash that does not start a valid JSON escape.
///
/// `\b` and `\f` followed by a letter are treated as literal LaTeX commands
/// (`\frac`, `\beta`), and `\u` only counts as an escape when four hex digits
/// follow.
pub fn repair_backslashes(span: &str) -> String {
    let chars: Vec<char> = span.chars().collect();
    let mut out = String::with_capacity(span.len() + 8);
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c != '\\' {
            out.push(c);
            i += 1;
            continue;
        }

        let next = chars.get(i + 1).copied();
        let after = chars.get(i + 2).copied();
        let is_escape = match next {
            Some('\\') | Some('"') | Some('/') | Some('n') | Some('r') | Some('t') => true,
            Some('b') | Some('f') => !after.is_some_and(|a| a.is_ascii_alphabetic()),
            Some('u') => chars
                .get(i + 2..i + 6)
                .is_some_and(|hex| hex.iter().all(|h| h.is_ascii_hexdigit())),
            _ => false,
        };

        if is_escape {
            out.push('\\');
            if let Some(n) = next {
                out.push(n);
            }
            i += 2;
        } else {
            out.push_str("\\\\");
            i += 1;
        }
    }

    out
}

/// Loosely-typed shape of a generated question.
#[derive(Debug, Deserialize)]
struct RawQuestion {
    #[serde(default)]
    question: Option<String>,
    #[serde(default)]
    options: Option<Vec<Value>>,
    #[serde(default, rename = "correctAnswer", alias = "correct_answer", alias = "answer")]
    correct_answer: Option<Value>,
    #[serde(default)]
    topic: Option<String>,
    #[serde(default)]
    subject: Option<String>,
    #[serde(default)]
    explanation: Option<String>,
}

/// Output of a strict tier before it is tagged.
struct StrictFields {
    text: String,
    options: Vec<String>,
    correct_answer: AnswerKey,
    topic: Option<String>,
    subject: Option<String>,
    explanation: String,
}

impl StrictFields {
    fn finish(self, tier: ParseTier) -> ParsedQuestion {
        ParsedQuestion {
            text: self.text,
            options: self.options,
            correct_answer: self.correct_answer,
            topic: self.topic,
            subject: self.subject,
            explanation: self.explanation,
            tier,
            padded: Vec::new(),
        }
    }
}

fn parse_strict(span: &str) -> Result<StrictFields, String> {
    let raw: RawQuestion = serde_json::from_str(span).map_err(|e| e.to_string())?;

    let text = raw
        .question
        .map(|q| q.trim().to_string())
        .filter(|q| !q.is_empty())
        .ok_or("missing question")?;

    let options = raw
        .options
        .ok_or("missing options")?
        .into_iter()
        .map(|v| match v {
            Value::String(s) => Ok(s.trim().to_string()),
            Value::Number(n) => Ok(n.to_string()),
            other => Err(format!("non-text option: {other}")),
        })
        .collect::<Result<Vec<_>, _>>()?;
    if options.len() != OPTION_COUNT {
        return Err(format!(
            "expected {OPTION_COUNT} options, got {}",
            options.len()
        ));
    }

    let correct_answer = match raw.correct_answer.ok_or("missing correctAnswer")? {
        Value::String(s) => s.parse::<AnswerKey>()?,
        Value::Number(n) => n.to_string().parse::<AnswerKey>()?,
        other => return Err(format!("invalid correctAnswer: {other}")),
    };

    let explanation = raw.explanation.unwrap_or_default();

    // A strict decode of `\frac` yields a form feed; such text came from an
    // unescaped LaTeX command, not a real control character.
    let decoded_control = std::iter::once(text.as_str())
        .chain(options.iter().map(String::as_str))
        .chain(std::iter::once(explanation.as_str()))
        .any(|s| s.contains('\u{8}') || s.contains('\u{c}'));
    if decoded_control {
        return Err("decoded text contains control characters".into());
    }

    Ok(StrictFields {
        text,
        options,
        correct_answer,
        topic: raw.topic,
        subject: raw.subject.map(|s| s.trim().to_string()).filter(|s| !s.is_empty()),
        explanation,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = r#"{"question":"Which gas do plants absorb?","options":["Oxygen","Carbon dioxide","Nitrogen","Helium"],"correctAnswer":"B","topic":"Photosynthesis","explanation":"Plants fix CO2."}"#;

    #[test]
    fn valid_json_succeeds_strictly() {
        let parsed = parse_response(VALID).unwrap();
        assert_eq!(parsed.tier, ParseTier::Strict);
        assert_eq!(parsed.options.len(), 4);
        assert_eq!(parsed.correct_answer, AnswerKey::B);
        assert_eq!(parsed.topic.as_deref(), Some("Photosynthesis"));
        assert!(!parsed.is_padded());
    }

    #[test]
    fn code_fences_and_prose_are_stripped() {
        let raw = format!("Sure! Here is your question:\n```json\n{VALID}\n```\nGood luck.");
        let parsed = parse_response(&raw).unwrap();
        assert_eq!(parsed.tier, ParseTier::Strict);
        assert_eq!(parsed.text, "Which gas do plants absorb?");
    }

    #[test]
    fn fence_removal_only_drops_language_tags() {
        assert_eq!(strip_code_fences("```Note: easy"), "Note: easy");
        assert_eq!(
            strip_code_fences("```json\n{\"a\": \"x ``` y\"}\n```\nDone"),
            "\n{\"a\": \"x  y\"}\n\nDone"
        );
    }

    #[test]
    fn fence_inside_string_value_keeps_following_word() {
        let raw = "```json\n{\"question\":\"Wrap code in ``` marks\",\"options\":[\"a\",\"b\",\"c\",\"d\"],\"correctAnswer\":\"A\"}\n```";
        let parsed = parse_response(raw).unwrap();
        assert_eq!(parsed.text, "Wrap code in  marks");
    }

    #[test]
    fn no_braces_is_no_json_found() {
        assert_eq!(
            parse_response("I cannot help with that.").unwrap_err(),
            ParseError::NoJsonFound
        );
    }

    #[test]
    fn unescaped_latex_recovers_at_backslash_tier() {
        let raw = r#"{"question":"What is \frac{1}{2}?","options":["A","B","C","D"],"correctAnswer":"1","explanation":"..."}"#;
        let parsed = parse_response(raw).unwrap();
        assert_eq!(parsed.tier, ParseTier::BackslashRepair);
        assert_eq!(parsed.text, r"What is \frac{1}{2}?");
        assert_eq!(parsed.correct_answer, AnswerKey::A);
    }

    #[test]
    fn single_stray_backslash_is_preserved_literally() {
        let raw = r#"{"question":"Evaluate \sqrt{16}","options":["2","4","8","16"],"correctAnswer":"B","explanation":"root"}"#;
        assert!(serde_json::from_str::<serde_json::Value>(raw).is_err());
        let parsed = parse_response(raw).unwrap();
        assert_eq!(parsed.tier, ParseTier::BackslashRepair);
        assert_eq!(parsed.text, r"Evaluate \sqrt{16}");
    }

    #[test]
    fn repair_keeps_valid_escapes() {
        assert_eq!(repair_backslashes(r#"a\nb"#), r#"a\nb"#);
        assert_eq!(repair_backslashes(r#"say \"hi\""#), r#"say \"hi\""#);
        assert_eq!(repair_backslashes(r"\\alpha"), r"\\alpha");
        assert_eq!(repair_backslashes(r"é"), r"é");
        assert_eq!(repair_backslashes(r"\alpha"), r"\\alpha");
        assert_eq!(repair_backslashes(r"\underline"), r"\\underline");
        assert_eq!(repair_backslashes(r"\beta"), r"\\beta");
        assert_eq!(repair_backslashes("end\\"), "end\\\\");
    }

    #[test]
    fn missing_options_bracket_pads_to_four() {
        let raw = r#"{"question":"Pick one","options":["first","second","correctAnswer":"A","explanation":"x"}"#;
        let parsed = parse_response(raw).unwrap();
        assert_eq!(parsed.tier, ParseTier::Lenient);
        assert_eq!(parsed.options.len(), 4);
        assert_eq!(parsed.options[0], "first");
        assert_eq!(parsed.options[1], "second");
        assert_eq!(parsed.padded, vec![AnswerKey::C, AnswerKey::D]);
        assert_eq!(parsed.correct_answer, AnswerKey::A);
    }

    #[test]
    fn digit_answers_map_to_letters() {
        for (digit, key) in [("1", AnswerKey::A), ("2", AnswerKey::B), ("3", AnswerKey::C), ("4", AnswerKey::D)] {
            let raw = format!(
                r#"{{"question":"Q","options":["w","x","y","z"],"correctAnswer":{digit},"explanation":""}}"#
            );
            let parsed = parse_response(&raw).unwrap();
            assert_eq!(parsed.correct_answer, key, "digit {digit}");
        }
    }

    #[test]
    fn three_options_in_valid_json_fall_through_to_padding() {
        let raw = r#"{"question":"Q","options":["a","b","c"],"correctAnswer":"C"}"#;
        let parsed = parse_response(raw).unwrap();
        assert_eq!(parsed.tier, ParseTier::Lenient);
        assert_eq!(parsed.options.len(), 4);
        assert_eq!(parsed.padded, vec![AnswerKey::D]);
    }

    #[test]
    fn unclosed_empty_options_pad_every_slot() {
        let raw = r#"{"question":"Q","correctAnswer":"B","options":["#;
        let parsed = parse_response(raw).unwrap();
        assert_eq!(parsed.tier, ParseTier::Lenient);
        assert_eq!(parsed.options, vec!["Option A", "Option B", "Option C", "Option D"]);
        assert_eq!(parsed.padded, AnswerKey::ALL.to_vec());
        assert_eq!(parsed.correct_answer, AnswerKey::B);
    }

    #[test]
    fn missing_answer_is_unparseable() {
        let raw = r#"{"question":"Q","options":["a","b","c","d"],"explanation":"none"}"#;
        assert!(matches!(
            parse_response(raw),
            Err(ParseError::UnparseableResponse(_))
        ));
    }

    #[test]
    fn out_of_range_answer_is_unparseable() {
        let raw = r#"{"question":"Q","options":["a","b","c","d"],"correctAnswer":"E"}"#;
        assert!(matches!(
            parse_response(raw),
            Err(ParseError::UnparseableResponse(_))
        ));
    }

    #[test]
    fn truncated_object_still_recovers_fields() {
        let raw = r#"{"question":"Capital of France?","correctAnswer":"C","options":["Berlin","Madrid","Paris","Rome"],"explanation":"Paris is the cap"#;
        let parsed = parse_response(raw).unwrap();
        assert_eq!(parsed.tier, ParseTier::Lenient);
        assert_eq!(parsed.options[2], "Paris");
        assert!(!parsed.is_padded());
    }

    #[test]
    fn into_question_falls_back_to_requested_topic() {
        let raw = r#"{"question":"Q","options":["a","b","c","d"],"correctAnswer":"D"}"#;
        let question = parse_response(raw)
            .unwrap()
            .into_question("neet", "Biology", Some("Genetics"), Difficulty::Hard)
            .unwrap();
        assert_eq!(question.topic, "Genetics");
        assert_eq!(question.subject, "Biology");
        assert_eq!(question.correct_answer, AnswerKey::D);
        assert_eq!(question.provenance, Provenance::AiGenerated);
    }
}
