//! The `examforge stats` command.

use anyhow::Result;
use comfy_table::{Cell, Table};

use examforge_core::progress::ProgressSummary;

use super::{print_json, GlobalOpts, Workspace};

pub async fn execute(opts: &GlobalOpts, exam: String, json: bool) -> Result<()> {
    let workspace = Workspace::open(opts)?;
    let summary = workspace.engine.progress_summary(&opts.user, &exam).await?;

    if json {
        return print_json(&summary);
    }
    print_summary(&exam, &summary);
    Ok(())
}

fn print_summary(exam: &str, summary: &ProgressSummary) {
    println!("Progress for {exam}");
    println!(
        "Attempted: {}  Correct: {}  Accuracy: {}%",
        summary.totals.attempted, summary.totals.correct, summary.accuracy
    );
    println!("Average time: {}s", summary.average_time_secs);
    println!("Streak: {} day(s)", summary.streak_days);

    if summary.subjects.is_empty() {
        println!("\nNo attempts recorded yet.");
        return;
    }

    let mut table = Table::new();
    table.set_header(vec!["Subject", "Attempted", "Correct", "Accuracy"]);
    for subject in &summary.subjects {
        table.add_row(vec![
            Cell::new(&subject.subject),
            Cell::new(subject.totals.attempted),
            Cell::new(subject.totals.correct),
            Cell::new(format!("{:.0}%", subject.totals.accuracy())),
        ]);
    }
    println!("\n{table}");
}
