//! The `examforge predict` command.

use anyhow::Result;
use comfy_table::{Cell, Table};

use examforge_core::model::PredictionResult;
use examforge_core::AssessmentError;

use super::{print_json, GlobalOpts, Workspace};

pub async fn execute(opts: &GlobalOpts, exam: String, target_rank: u32, json: bool) -> Result<()> {
    let workspace = Workspace::open(opts)?;

    let prediction = match workspace.engine.predict(&opts.user, &exam, target_rank).await {
        Ok(prediction) => prediction,
        Err(AssessmentError::InsufficientData { attempts, required }) => {
            if json {
                return print_json(&serde_json::json!({
                    "insufficient_data": { "attempts": attempts, "required": required }
                }));
            }
            println!(
                "Not enough data yet: {attempts} of {required} attempts recorded. Keep practising!"
            );
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    if json {
        return print_json(&prediction);
    }
    print_prediction(&exam, target_rank, &prediction);
    Ok(())
}

fn print_prediction(exam: &str, target_rank: u32, prediction: &PredictionResult) {
    println!("Prediction for {exam}, target rank {target_rank}");
    println!(
        "Current probability: {}%  Required: {}%  Gap: {}",
        prediction.current_probability, prediction.required_probability, prediction.improvement
    );

    let mut subjects = Table::new();
    subjects.set_header(vec!["Subject", "Score", "Status"]);
    for analysis in &prediction.subject_analysis {
        subjects.add_row(vec![
            Cell::new(&analysis.subject),
            Cell::new(format!("{}%", analysis.score)),
            Cell::new(analysis.status),
        ]);
    }
    println!("\n{subjects}");

    let mut recommendations = Table::new();
    recommendations.set_header(vec!["Priority", "Recommendation", "Details"]);
    for rec in &prediction.recommendations {
        recommendations.add_row(vec![
            Cell::new(rec.priority),
            Cell::new(&rec.title),
            Cell::new(&rec.description),
        ]);
    }
    println!("\n{recommendations}");
}
