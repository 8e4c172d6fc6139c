//! The `examforge start`, `answer` and `finish` commands.

use anyhow::Result;
use chrono::Local;
use uuid::Uuid;

use examforge_core::model::Difficulty;

use super::{print_json, GlobalOpts, Workspace};

pub async fn start(
    opts: &GlobalOpts,
    exam: String,
    difficulty: Difficulty,
    model: Option<String>,
    json: bool,
) -> Result<()> {
    let workspace = Workspace::open(opts)?;
    let model = workspace.model_or_default(model);

    let session = workspace
        .engine
        .start_session(&opts.user, &exam, difficulty, &model)
        .await?;
    workspace.save()?;

    if json {
        return print_json(&session);
    }
    let started = session.started_at().with_timezone(&Local);
    println!("Session {}", session.id());
    println!("Exam: {exam} ({difficulty}, model {model})");
    println!("Started: {}", started.format("%Y-%m-%d %H:%M"));
    Ok(())
}

pub async fn answer(
    opts: &GlobalOpts,
    session_id: Uuid,
    question_id: Uuid,
    answer: String,
    time_spent_secs: u64,
) -> Result<()> {
    let workspace = Workspace::open(opts)?;
    let outcome = workspace
        .engine
        .submit_answer(session_id, question_id, &answer, time_spent_secs)
        .await?;
    workspace.save()?;

    if outcome.is_correct {
        println!("Correct!");
    } else {
        println!("Incorrect. The correct answer is {}.", outcome.correct_answer);
    }
    if !outcome.explanation.is_empty() {
        println!("{}", outcome.explanation);
    }
    println!(
        "Session: {}/{} correct, score {}%",
        outcome.session.correct_answers, outcome.session.total_questions, outcome.session.score
    );
    Ok(())
}

pub async fn finish(opts: &GlobalOpts, session_id: Uuid) -> Result<()> {
    let workspace = Workspace::open(opts)?;
    let session = workspace.engine.complete_session(session_id).await?;
    workspace.save()?;

    println!(
        "Session completed: {}/{} correct, score {}%, {}s spent",
        session.correct_answers(),
        session.total_questions(),
        session.score(),
        session.time_spent_secs()
    );
    Ok(())
}
