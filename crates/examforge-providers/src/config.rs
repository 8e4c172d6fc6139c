//! Configuration file loading and backend registry construction.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use examforge_core::engine::EngineConfig;
use examforge_core::registry::BackendRegistry;
use examforge_core::requester::RequesterConfig;
use examforge_core::settings::AssessmentConfig;
use examforge_core::traits::TextGenerator;

use crate::mock::MockBackend;
use crate::ollama::OllamaBackend;
use crate::openai::OpenAiBackend;

/// Configuration for a single text-generation backend.
///
/// Note: Custom Debug impl masks API keys to prevent accidental exposure in logs.
#[derive(Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BackendConfig {
    OpenAI {
        api_key: String,
        #[serde(default)]
        base_url: Option<String>,
        #[serde(default)]
        org_id: Option<String>,
    },
    Ollama {
        #[serde(default = "default_ollama_url")]
        base_url: String,
    },
    /// Canned replies, for offline demos and tests.
    Mock {
        response: String,
    },
}

impl std::fmt::Debug for BackendConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendConfig::OpenAI {
                api_key: _,
                base_url,
                org_id,
            } => f
                .debug_struct("OpenAI")
                .field("api_key", &"***")
                .field("base_url", base_url)
                .field("org_id", org_id)
                .finish(),
            BackendConfig::Ollama { base_url } => f
                .debug_struct("Ollama")
                .field("base_url", base_url)
                .finish(),
            BackendConfig::Mock { response } => f
                .debug_struct("Mock")
                .field("response_len", &response.len())
                .finish(),
        }
    }
}

fn default_ollama_url() -> String {
    "http://localhost:11434".to_string()
}

/// An explicit model → backend route.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelRoute {
    pub id: String,
    pub backend: String,
}

/// Top-level examforge configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExamforgeConfig {
    /// Backend configurations keyed by name.
    #[serde(default)]
    pub backends: HashMap<String, BackendConfig>,
    /// Model routes; unrouted models go to `default_backend`.
    #[serde(default)]
    pub models: Vec<ModelRoute>,
    #[serde(default)]
    pub default_backend: Option<String>,
    /// Model used when a command does not name one.
    #[serde(default = "default_model")]
    pub default_model: String,
    /// Model asked for extra study recommendations.
    #[serde(default)]
    pub advisor_model: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Max retries on transient backend errors.
    #[serde(default = "default_retries")]
    pub max_retries: u32,
    /// Delay before the first retry in milliseconds.
    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,
    /// JSON file the CLI keeps questions, sessions and attempts in.
    #[serde(default = "default_store_path")]
    pub store_path: PathBuf,
    #[serde(default)]
    pub assessment: AssessmentConfig,
}

fn default_model() -> String {
    "llama3.1:8b".to_string()
}
fn default_temperature() -> f64 {
    0.7
}
fn default_max_tokens() -> u32 {
    1024
}
fn default_retries() -> u32 {
    3
}
fn default_retry_delay() -> u64 {
    1000
}
fn default_store_path() -> PathBuf {
    PathBuf::from("examforge-data.json")
}

impl Default for ExamforgeConfig {
    fn default() -> Self {
        Self {
            backends: HashMap::new(),
            models: Vec::new(),
            default_backend: None,
            default_model: default_model(),
            advisor_model: None,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            max_retries: default_retries(),
            retry_delay_ms: default_retry_delay(),
            store_path: default_store_path(),
            assessment: AssessmentConfig::default(),
        }
    }
}

impl ExamforgeConfig {
    /// Retry and sampling settings for the requester.
    pub fn requester_config(&self) -> RequesterConfig {
        RequesterConfig {
            max_retries: self.max_retries,
            retry_delay: Duration::from_millis(self.retry_delay_ms),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        }
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            requester: self.requester_config(),
            advisor_model: self.advisor_model.clone(),
        }
    }

    /// Every problem found in the configuration, as readable messages.
    pub fn validate(&self) -> Vec<String> {
        let mut issues = Vec::new();

        if let Some(default) = &self.default_backend {
            if !self.backends.contains_key(default) {
                issues.push(format!("default_backend '{default}' is not configured"));
            }
        }
        for route in &self.models {
            if !self.backends.contains_key(&route.backend) {
                issues.push(format!(
                    "model '{}' routes to unknown backend '{}'",
                    route.id, route.backend
                ));
            }
        }
        for (name, backend) in &self.backends {
            if let BackendConfig::OpenAI { api_key, .. } = backend {
                if api_key.trim().is_empty() {
                    issues.push(format!("backend '{name}' has an empty api_key"));
                }
            }
        }
        if self.temperature < 0.0 {
            issues.push("temperature must be non-negative".into());
        }

        for issue in self.assessment.validate() {
            match issue.exam_id {
                Some(id) => issues.push(format!("assessment [{id}]: {}", issue.message)),
                None => issues.push(format!("assessment: {}", issue.message)),
            }
        }
        issues
    }
}

/// Resolve environment variable references like `${VAR_NAME}` in a string.
fn resolve_env_vars(s: &str) -> String {
    let mut result = s.to_string();
    let mut from = 0;
    while let Some(rel) = result[from..].find("${") {
        let start = from + rel;
        let Some(end) = result[start..].find('}') else {
            break;
        };
        let var_name = &result[start + 2..start + end];
        let value = std::env::var(var_name).unwrap_or_default();
        result = format!("{}{}{}", &result[..start], value, &result[start + end + 1..]);
        from = start + value.len();
    }
    result
}

fn resolve_backend_config(config: &BackendConfig) -> BackendConfig {
    match config {
        BackendConfig::OpenAI {
            api_key,
            base_url,
            org_id,
        } => BackendConfig::OpenAI {
            api_key: resolve_env_vars(api_key),
            base_url: base_url.as_deref().map(resolve_env_vars),
            org_id: org_id.as_deref().map(resolve_env_vars),
        },
        BackendConfig::Ollama { base_url } => BackendConfig::Ollama {
            base_url: resolve_env_vars(base_url),
        },
        BackendConfig::Mock { response } => BackendConfig::Mock {
            response: response.clone(),
        },
    }
}

/// Load configuration from well-known paths.
///
/// Search order:
/// 1. `examforge.toml` in the current directory
/// 2. `~/.config/examforge/config.toml`
///
/// `EXAMFORGE_OPENAI_KEY` overrides the key of the `openai` backend.
pub fn load_config() -> Result<ExamforgeConfig> {
    load_config_from(None)
}

/// Load config from an explicit path, or search the default locations.
pub fn load_config_from(path: Option<&Path>) -> Result<ExamforgeConfig> {
    let config_path = match path {
        Some(p) if p.exists() => Some(p.to_path_buf()),
        Some(p) => anyhow::bail!("config file not found: {}", p.display()),
        None => {
            let local = PathBuf::from("examforge.toml");
            if local.exists() {
                Some(local)
            } else {
                dirs_path()
                    .map(|home| home.join("config.toml"))
                    .filter(|global| global.exists())
            }
        }
    };

    let mut config = match &config_path {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config: {}", path.display()))?;
            parse_config(&content).with_context(|| format!("failed to parse config: {}", path.display()))?
        }
        None => ExamforgeConfig::default(),
    };

    if let Ok(key) = std::env::var("EXAMFORGE_OPENAI_KEY") {
        let entry = config
            .backends
            .entry("openai".into())
            .or_insert(BackendConfig::OpenAI {
                api_key: String::new(),
                base_url: None,
                org_id: None,
            });
        if let BackendConfig::OpenAI { api_key, .. } = entry {
            *api_key = key;
        }
    }

    config.backends = config
        .backends
        .iter()
        .map(|(k, v)| (k.clone(), resolve_backend_config(v)))
        .collect();

    tracing::debug!(
        path = ?config_path,
        backends = config.backends.len(),
        exams = config.assessment.exams.len(),
        "configuration loaded"
    );
    Ok(config)
}

/// Parse a config document and validate its assessment section.
pub fn parse_config(content: &str) -> Result<ExamforgeConfig> {
    let config: ExamforgeConfig = toml::from_str(content)?;
    config.assessment.ensure_valid()?;
    Ok(config)
}

fn dirs_path() -> Option<PathBuf> {
    std::env::var("HOME")
        .ok()
        .map(|h| PathBuf::from(h).join(".config").join("examforge"))
}

/// Create a backend instance from its configuration.
pub fn create_backend(config: &BackendConfig) -> Arc<dyn TextGenerator> {
    match config {
        BackendConfig::OpenAI {
            api_key,
            base_url,
            org_id,
        } => Arc::new(OpenAiBackend::new(api_key, base_url.clone(), org_id.clone())),
        BackendConfig::Ollama { base_url } => Arc::new(OllamaBackend::new(base_url)),
        BackendConfig::Mock { response } => Arc::new(MockBackend::with_fixed_response(response)),
    }
}

/// Build the model → backend registry, failing on dangling routes.
pub fn build_registry(config: &ExamforgeConfig) -> Result<BackendRegistry> {
    let mut registry = BackendRegistry::new();
    for (name, backend) in &config.backends {
        registry = registry.with_backend(name.clone(), create_backend(backend));
    }
    for route in &config.models {
        registry = registry.with_route(route.id.clone(), route.backend.clone());
    }
    if let Some(default) = &config.default_backend {
        registry = registry.with_default(default.clone());
    }
    registry
        .validate()
        .map_err(|e| anyhow::anyhow!("invalid backend routing: {e}"))?;
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use examforge_core::traits::BackendKind;

    const SAMPLE: &str = r#"
default_backend = "local"
default_model = "llama3.1:8b"
max_retries = 5

[backends.local]
type = "ollama"
base_url = "http://localhost:11434"

[backends.cloud]
type = "openai"
api_key = "sk-test"

[[models]]
id = "gpt-4.1-mini"
backend = "cloud"

[assessment.prediction]
min_attempts = 15

[[assessment.exams]]
id = "cat"
name = "CAT"
subjects = ["Quant", "Verbal"]
benchmarks = [{ rank = 1000, probability = 90 }]
"#;

    #[test]
    fn resolve_env_vars_basic() {
        std::env::set_var("_EXAMFORGE_TEST_VAR", "hello");
        assert_eq!(resolve_env_vars("${_EXAMFORGE_TEST_VAR}"), "hello");
        assert_eq!(
            resolve_env_vars("prefix_${_EXAMFORGE_TEST_VAR}_suffix"),
            "prefix_hello_suffix"
        );
        assert_eq!(resolve_env_vars("${_EXAMFORGE_UNSET_VAR}"), "");
        std::env::remove_var("_EXAMFORGE_TEST_VAR");
    }

    #[test]
    fn default_config() {
        let config = ExamforgeConfig::default();
        assert_eq!(config.default_model, "llama3.1:8b");
        assert_eq!(config.max_retries, 3);
        assert!(config.validate().is_empty());
        assert!(config.assessment.exam("jee-main").is_some());
    }

    #[test]
    fn parse_backends_routes_and_assessment() {
        let config = parse_config(SAMPLE).unwrap();
        assert_eq!(config.backends.len(), 2);
        assert!(matches!(
            config.backends.get("cloud"),
            Some(BackendConfig::OpenAI { .. })
        ));
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.requester_config().retry_delay, Duration::from_millis(1000));
        assert_eq!(config.assessment.prediction.min_attempts, 15);
        assert_eq!(config.assessment.exams.len(), 1);
        assert!(config.validate().is_empty(), "{:?}", config.validate());
    }

    #[test]
    fn registry_routes_explicitly() {
        let registry = build_registry(&parse_config(SAMPLE).unwrap()).unwrap();
        assert_eq!(registry.resolve("gpt-4.1-mini").unwrap().kind(), BackendKind::Cloud);
        assert_eq!(registry.resolve("mistral:7b").unwrap().kind(), BackendKind::Local);
    }

    #[test]
    fn dangling_route_is_rejected() {
        let mut config = parse_config(SAMPLE).unwrap();
        config.models.push(ModelRoute {
            id: "phi3".into(),
            backend: "gpu-box".into(),
        });
        assert!(config.validate().iter().any(|i| i.contains("gpu-box")));
        let err = build_registry(&config).unwrap_err();
        assert!(err.to_string().contains("gpu-box"));
    }

    #[test]
    fn invalid_assessment_section_fails_to_parse() {
        let bad = r#"
[assessment.prediction]
overall_weight = 0.9
"#;
        assert!(parse_config(bad).is_err());
    }

    #[test]
    fn load_from_file_applies_key_override_and_env_refs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("examforge.toml");
        std::fs::write(
            &path,
            r#"
default_backend = "local"

[backends.local]
type = "ollama"
base_url = "${_EXAMFORGE_TEST_OLLAMA}"
"#,
        )
        .unwrap();

        std::env::set_var("_EXAMFORGE_TEST_OLLAMA", "http://gpu-box:11434");
        std::env::set_var("EXAMFORGE_OPENAI_KEY", "sk-from-env");
        let config = load_config_from(Some(&path)).unwrap();
        std::env::remove_var("_EXAMFORGE_TEST_OLLAMA");
        std::env::remove_var("EXAMFORGE_OPENAI_KEY");

        assert!(matches!(
            config.backends.get("local"),
            Some(BackendConfig::Ollama { base_url }) if base_url == "http://gpu-box:11434"
        ));
        assert!(matches!(
            config.backends.get("openai"),
            Some(BackendConfig::OpenAI { api_key, .. }) if api_key == "sk-from-env"
        ));
    }

    #[test]
    fn missing_explicit_config_is_an_error() {
        let err = load_config_from(Some(Path::new("/nonexistent/examforge.toml"))).unwrap_err();
        assert!(err.to_string().contains("config file not found"));
    }

    #[test]
    fn debug_masks_api_keys() {
        let backend = BackendConfig::OpenAI {
            api_key: "sk-secret".into(),
            base_url: None,
            org_id: None,
        };
        let debug = format!("{backend:?}");
        assert!(!debug.contains("sk-secret"));
        assert!(debug.contains("***"));
    }
}
