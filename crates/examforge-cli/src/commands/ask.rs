//! The `examforge ask` command.

use std::io::Write;

use anyhow::Result;

use examforge_core::model::{AnswerKey, Difficulty, Question};
use examforge_core::QuestionRequest;

use super::{print_json, GlobalOpts, Workspace};

pub struct AskArgs {
    pub exam: String,
    pub difficulty: Difficulty,
    pub subject: Option<String>,
    pub topic: Option<String>,
    pub model: Option<String>,
    pub stream: bool,
    pub json: bool,
}

pub async fn execute(opts: &GlobalOpts, args: AskArgs) -> Result<()> {
    let workspace = Workspace::open(opts)?;
    let model = workspace.model_or_default(args.model);

    let mut request = QuestionRequest::new(&args.exam, args.difficulty, model);
    if let Some(subject) = args.subject {
        request = request.with_subject(subject);
    }
    if let Some(topic) = args.topic {
        request = request.with_topic(topic);
    }

    let generated = if args.stream {
        let on_chunk = |chunk: &str| {
            let mut err = std::io::stderr();
            let _ = err.write_all(chunk.as_bytes());
            let _ = err.flush();
        };
        let generated = workspace
            .engine
            .request_question_streaming(&request, &on_chunk)
            .await?;
        eprintln!();
        generated
    } else {
        workspace.engine.request_question(&request).await?
    };

    workspace.save()?;

    if args.json {
        return print_json(&generated.question);
    }

    print_question(&generated.question);
    println!(
        "\nParsed via {} tier ({} / {}, {} ms)",
        generated.tier, generated.backend, generated.model, generated.latency_ms
    );
    if !generated.padded.is_empty() {
        let slots: Vec<String> = generated.padded.iter().map(ToString::to_string).collect();
        println!("Placeholder options: {}", slots.join(", "));
    }
    println!(
        "Answer with: examforge answer --session <SESSION> --question {} --answer <A-D>",
        generated.question.id
    );
    Ok(())
}

fn print_question(question: &Question) {
    println!("Question {}", question.id);
    println!(
        "[{} / {} / {}, {}]",
        question.exam_id, question.subject, question.topic, question.difficulty
    );
    println!("\n{}\n", question.text);
    for key in AnswerKey::ALL {
        println!("  {key}. {}", question.option(key));
    }
}
