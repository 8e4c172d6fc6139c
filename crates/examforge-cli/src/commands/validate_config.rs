//! The `examforge validate-config` command.

use anyhow::Result;

use super::GlobalOpts;

pub fn execute(opts: &GlobalOpts) -> Result<()> {
    let config = opts.load_config()?;

    println!(
        "Config: {} backend(s), {} model route(s), {} exam(s)",
        config.backends.len(),
        config.models.len(),
        config.assessment.exams.len()
    );

    let issues = config.validate();
    if issues.is_empty() {
        println!("Configuration valid.");
        return Ok(());
    }

    for issue in &issues {
        println!("  WARNING: {issue}");
    }
    anyhow::bail!("{} problem(s) found", issues.len())
}
