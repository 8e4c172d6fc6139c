//! The `examforge init` command.

use anyhow::Result;

pub fn execute() -> Result<()> {
    if std::path::Path::new("examforge.toml").exists() {
        println!("examforge.toml already exists, skipping.");
    } else {
        std::fs::write("examforge.toml", SAMPLE_CONFIG)?;
        println!("Created examforge.toml");
    }

    println!("\nNext steps:");
    println!("  1. Start Ollama (`ollama serve`) or set OPENAI_API_KEY");
    println!("  2. Run: examforge validate-config");
    println!("  3. Run: examforge ask --exam jee-main --subject Physics");

    Ok(())
}

const SAMPLE_CONFIG: &str = r#"# examforge configuration

default_backend = "ollama"
default_model = "llama3.1:8b"
temperature = 0.7
max_tokens = 1024
max_retries = 3
retry_delay_ms = 1000
store_path = "examforge-data.json"
# advisor_model = "gpt-4.1-mini"

[backends.ollama]
type = "ollama"
base_url = "http://localhost:11434"

[backends.openai]
type = "openai"
api_key = "${OPENAI_API_KEY}"

[[models]]
id = "gpt-4.1-mini"
backend = "openai"

[[models]]
id = "gpt-4.1"
backend = "openai"

[assessment.prediction]
overall_weight = 0.6
recent_weight = 0.2
consistency_weight = 0.2
min_attempts = 10
recent_window = 10

# Exams listed here replace the built-in catalog.
# [[assessment.exams]]
# id = "cat"
# name = "CAT"
# subjects = ["Quantitative Aptitude", "Verbal Ability", "Logical Reasoning"]
# benchmarks = [
#     { rank = 100, probability = 97 },
#     { rank = 1000, probability = 88 },
#     { rank = 10000, probability = 70 },
# ]
"#;
