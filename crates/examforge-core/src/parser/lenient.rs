//! Lenient field tokenizer for malformed question objects.
//!
//! Works on text that is "almost JSON": it looks up each known key on its
//! own and reads the value that follows, so one broken field does not sink
//! the others. An unterminated `options` array ends at the first string that
//! is itself followed by a `:` (the next key).

use crate::model::{AnswerKey, OPTION_COUNT};

/// Fields recovered by the tokenizer.
#[derive(Debug, Clone, PartialEq)]
pub struct LenientFields {
    pub question: String,
    /// Exactly [`OPTION_COUNT`] entries after padding.
    pub options: Vec<String>,
    pub correct_answer: AnswerKey,
    pub topic: Option<String>,
    pub subject: Option<String>,
    pub explanation: Option<String>,
    /// Slots filled with placeholder text.
    pub padded: Vec<AnswerKey>,
}

/// Result of a lenient extraction.
#[derive(Debug, Clone, PartialEq)]
pub enum LenientOutcome {
    /// All required fields were found, with four real options.
    Complete(LenientFields),
    /// Required fields were found but some options are placeholders.
    Partial(LenientFields),
    /// A required field could not be recovered.
    Failed(String),
}

/// Extract question fields from loosely formatted text.
pub fn extract_fields(src: &str) -> LenientOutcome {
    let Some(question) = string_field(src, "question")
        .map(|q| q.trim().to_string())
        .filter(|q| !q.is_empty())
    else {
        return LenientOutcome::Failed("question text not found".into());
    };

    let Some(raw_answer) = scalar_field(src, "correctAnswer")
        .or_else(|| scalar_field(src, "correct_answer"))
        .or_else(|| scalar_field(src, "answer"))
    else {
        return LenientOutcome::Failed("correctAnswer not found".into());
    };
    let Some(correct_answer) = normalize_answer(&raw_answer) else {
        return LenientOutcome::Failed(format!("correctAnswer '{raw_answer}' is not A-D or 1-4"));
    };

    // A missing or empty list is padded like a short one.
    let mut options = string_list_field(src, "options").unwrap_or_default();
    options.truncate(OPTION_COUNT);

    let padded: Vec<AnswerKey> = AnswerKey::ALL[options.len()..].to_vec();
    for key in &padded {
        options.push(format!("Option {key}"));
    }

    let fields = LenientFields {
        question,
        options,
        correct_answer,
        topic: string_field(src, "topic"),
        subject: string_field(src, "subject"),
        explanation: string_field(src, "explanation"),
        padded,
    };

    if fields.padded.is_empty() {
        LenientOutcome::Complete(fields)
    } else {
        LenientOutcome::Partial(fields)
    }
}

/// Map `A`-`D` / `1`-`4`, also accepting forms like `"B) Paris"` or `"C."`.
pub fn normalize_answer(raw: &str) -> Option<AnswerKey> {
    let trimmed = raw.trim();
    if let Ok(key) = trimmed.parse::<AnswerKey>() {
        return Some(key);
    }
    let mut chars = trimmed.chars();
    let first = chars.next()?;
    match chars.next() {
        Some(sep) if !sep.is_alphanumeric() => first.to_string().parse().ok(),
        _ => None,
    }
}

/// Byte offset just past `"key"` followed by optional whitespace and `:`.
fn value_start(src: &str, key: &str) -> Option<usize> {
    let needle = format!("\"{key}\"");
    let mut from = 0;
    while let Some(rel) = src[from..].find(&needle) {
        let after_key = from + rel + needle.len();
        let rest = &src[after_key..];
        let trimmed = rest.trim_start();
        if let Some(value) = trimmed.strip_prefix(':') {
            let offset = after_key + (rest.len() - value.len());
            return Some(offset + (value.len() - value.trim_start().len()));
        }
        from = after_key;
    }
    None
}

/// Read a quoted string starting at `src[0] == '"'`.
///
/// Returns the unescaped content and the number of bytes consumed, or
/// `None` if the string never terminates. Only `\"` and `\\` are unescaped;
/// other escapes are kept as written.
fn read_quoted(src: &str) -> Option<(String, usize)> {
    let mut chars = src.char_indices();
    if chars.next()?.1 != '"' {
        return None;
    }
    let mut out = String::new();
    while let Some((i, c)) = chars.next() {
        match c {
            '"' => return Some((out, i + 1)),
            '\\' => match chars.next() {
                Some((_, '"')) => out.push('"'),
                Some((_, '\\')) => out.push('\\'),
                Some((_, other)) => {
                    out.push('\\');
                    out.push(other);
                }
                None => return None,
            },
            _ => out.push(c),
        }
    }
    None
}

fn string_field(src: &str, key: &str) -> Option<String> {
    let start = value_start(src, key)?;
    read_quoted(&src[start..]).map(|(s, _)| s)
}

/// A quoted string or a bare token such as `2` or `B`.
fn scalar_field(src: &str, key: &str) -> Option<String> {
    let start = value_start(src, key)?;
    let rest = &src[start..];
    if rest.starts_with('"') {
        return read_quoted(rest).map(|(s, _)| s);
    }
    let token: String = rest.chars().take_while(|c| c.is_alphanumeric()).collect();
    (!token.is_empty()).then_some(token)
}

/// Flat list of quoted strings inside the `[` following `key`.
fn string_list_field(src: &str, key: &str) -> Option<Vec<String>> {
    let start = value_start(src, key)?;
    let mut rest = src[start..].strip_prefix('[')?;
    let mut items = Vec::new();

    loop {
        rest = rest.trim_start_matches(|c: char| c.is_whitespace() || c == ',');
        if rest.is_empty() || rest.starts_with(']') || rest.starts_with('}') {
            break;
        }
        if !rest.starts_with('"') {
            // Skip a bare token (number, stray text) up to the next separator.
            let skip = rest
                .find(|c: char| c == ',' || c == ']' || c == '"')
                .unwrap_or(rest.len());
            if skip == 0 {
                break;
            }
            rest = &rest[skip..];
            continue;
        }
        let Some((item, consumed)) = read_quoted(rest) else {
            break;
        };
        rest = &rest[consumed..];
        // A string followed by `:` is the next key of an unclosed array.
        if rest.trim_start().starts_with(':') {
            break;
        }
        items.push(item.trim().to_string());
    }

    Some(items)
}
