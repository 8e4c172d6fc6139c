//! The `examforge list-models` command.

use anyhow::Result;

use examforge_core::traits::ModelInfo;
use examforge_providers::ollama::OllamaBackend;
use examforge_providers::{create_backend, BackendConfig};

use super::GlobalOpts;

pub async fn execute(opts: &GlobalOpts, backend_filter: Option<String>) -> Result<()> {
    let config = opts.load_config()?;

    let mut names: Vec<&String> = config.backends.keys().collect();
    names.sort();

    let mut found_any = false;
    for name in names {
        if backend_filter.as_ref().is_some_and(|filter| filter != name) {
            continue;
        }
        found_any = true;

        let backend_config = &config.backends[name];
        let default = if config.default_backend.as_ref() == Some(name) {
            " (default)"
        } else {
            ""
        };
        println!("Backend: {name}{default}");

        let models = match backend_config {
            BackendConfig::Ollama { base_url } => {
                match OllamaBackend::new(base_url).list_models_async().await {
                    Ok(models) => models,
                    Err(e) => {
                        println!("  (could not list installed models: {e})");
                        Vec::new()
                    }
                }
            }
            other => create_backend(other).available_models(),
        };
        print_models(&models);

        for route in config.models.iter().filter(|r| &r.backend == name) {
            println!("  route: {} -> {name}", route.id);
        }
        println!();
    }

    if !found_any {
        println!("No backends configured. Run `examforge init` to create a config file.");
    }

    Ok(())
}

fn print_models(models: &[ModelInfo]) {
    for model in models {
        if model.max_context > 0 {
            println!(
                "  {} ({}, {}K context)",
                model.id,
                model.name,
                model.max_context / 1000
            );
        } else {
            println!("  {} ({})", model.id, model.name);
        }
    }
}
