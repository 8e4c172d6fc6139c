//! The `examforge parse` command.

use std::io::Read;
use std::path::PathBuf;

use anyhow::{Context, Result};

use examforge_core::model::AnswerKey;
use examforge_core::parser::{parse_response, ParsedQuestion};

use super::print_json;

pub fn execute(file: Option<PathBuf>, json: bool) -> Result<()> {
    let raw = match &file {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?,
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("failed to read stdin")?;
            buf
        }
    };

    let parsed = parse_response(&raw)?;

    if json {
        return print_json(&serde_json::json!({
            "tier": parsed.tier.to_string(),
            "question": parsed.text,
            "options": parsed.options,
            "correctAnswer": parsed.correct_answer,
            "subject": parsed.subject,
            "topic": parsed.topic,
            "explanation": parsed.explanation,
            "padded": parsed.padded,
        }));
    }

    print_parsed(&parsed);
    Ok(())
}

fn print_parsed(parsed: &ParsedQuestion) {
    println!("Tier: {}", parsed.tier);
    if let Some(subject) = &parsed.subject {
        println!("Subject: {subject}");
    }
    if let Some(topic) = &parsed.topic {
        println!("Topic: {topic}");
    }
    println!("\n{}\n", parsed.text);
    for (key, option) in AnswerKey::ALL.iter().zip(&parsed.options) {
        let marker = if parsed.padded.contains(key) {
            " (placeholder)"
        } else {
            ""
        };
        println!("  {key}. {option}{marker}");
    }
    println!("\nCorrect answer: {}", parsed.correct_answer);
    if !parsed.explanation.is_empty() {
        println!("Explanation: {}", parsed.explanation);
    }
    if parsed.is_padded() {
        let slots: Vec<String> = parsed.padded.iter().map(ToString::to_string).collect();
        println!("Padded slots: {}", slots.join(", "));
    }
}
