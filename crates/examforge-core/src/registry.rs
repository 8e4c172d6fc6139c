//! Explicit model → backend routing.
//!
//! Routes are configured once at startup. A model without a route goes to
//! the default backend; nothing is inferred from the model name.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::{AssessmentError, AssessmentResult};
use crate::traits::TextGenerator;

/// Backends by name plus the model route table.
#[derive(Clone, Default)]
pub struct BackendRegistry {
    backends: HashMap<String, Arc<dyn TextGenerator>>,
    routes: HashMap<String, String>,
    default_backend: Option<String>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a backend under `name`.
    pub fn with_backend(mut self, name: impl Into<String>, backend: Arc<dyn TextGenerator>) -> Self {
        self.backends.insert(name.into(), backend);
        self
    }

    /// Route `model` to the backend registered as `backend`.
    pub fn with_route(mut self, model: impl Into<String>, backend: impl Into<String>) -> Self {
        self.routes.insert(model.into(), backend.into());
        self
    }

    /// Backend used for models without an explicit route.
    pub fn with_default(mut self, backend: impl Into<String>) -> Self {
        self.default_backend = Some(backend.into());
        self
    }

    /// Check that every route and the default point at registered backends.
    pub fn validate(&self) -> Result<(), String> {
        if let Some(default) = &self.default_backend {
            if !self.backends.contains_key(default) {
                return Err(format!("default backend '{default}' is not registered"));
            }
        }
        for (model, backend) in &self.routes {
            if !self.backends.contains_key(backend) {
                return Err(format!(
                    "model '{model}' routes to unknown backend '{backend}'"
                ));
            }
        }
        Ok(())
    }

    /// Name of the backend serving `model`.
    pub fn backend_name_for(&self, model: &str) -> Option<&str> {
        self.routes
            .get(model)
            .or(self.default_backend.as_ref())
            .map(String::as_str)
    }

    /// Resolve the backend for `model`.
    pub fn resolve(&self, model: &str) -> AssessmentResult<Arc<dyn TextGenerator>> {
        self.backend_name_for(model)
            .and_then(|name| self.backends.get(name))
            .cloned()
            .ok_or_else(|| AssessmentError::UnknownModel(model.to_string()))
    }

    /// Registered backends, sorted by name.
    pub fn backends(&self) -> Vec<(&str, &Arc<dyn TextGenerator>)> {
        let mut all: Vec<_> = self
            .backends
            .iter()
            .map(|(name, backend)| (name.as_str(), backend))
            .collect();
        all.sort_by(|a, b| a.0.cmp(b.0));
        all
    }

    /// Explicit routes, sorted by model id.
    pub fn routes(&self) -> Vec<(&str, &str)> {
        let mut all: Vec<_> = self
            .routes
            .iter()
            .map(|(m, b)| (m.as_str(), b.as_str()))
            .collect();
        all.sort();
        all
    }
}

impl fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.backends().into_iter().map(|(name, _)| name).collect();
        f.debug_struct("BackendRegistry")
            .field("backends", &names)
            .field("routes", &self.routes())
            .field("default_backend", &self.default_backend)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::{BackendKind, GenerateRequest, GenerateResponse, ModelInfo};
    use async_trait::async_trait;

    struct Named(&'static str, BackendKind);

    #[async_trait]
    impl TextGenerator for Named {
        fn name(&self) -> &str {
            self.0
        }
        fn kind(&self) -> BackendKind {
            self.1
        }
        async fn generate(&self, _: &GenerateRequest) -> anyhow::Result<GenerateResponse> {
            anyhow::bail!("not used")
        }
        fn available_models(&self) -> Vec<ModelInfo> {
            vec![]
        }
    }

    fn registry() -> BackendRegistry {
        BackendRegistry::new()
            .with_backend("cloud", Arc::new(Named("openai", BackendKind::Cloud)))
            .with_backend("local", Arc::new(Named("ollama", BackendKind::Local)))
            .with_route("llama3.1:8b", "local")
            .with_default("cloud")
    }

    #[test]
    fn routed_model_goes_to_its_backend() {
        let backend = registry().resolve("llama3.1:8b").unwrap();
        assert_eq!(backend.kind(), BackendKind::Local);
    }

    #[test]
    fn unrouted_model_uses_default() {
        // Looks like a local model name, but only explicit routes count.
        let backend = registry().resolve("mistral:7b").unwrap();
        assert_eq!(backend.kind(), BackendKind::Cloud);
    }

    #[test]
    fn no_default_means_unknown_model() {
        let registry = BackendRegistry::new()
            .with_backend("local", Arc::new(Named("ollama", BackendKind::Local)));
        assert!(matches!(
            registry.resolve("gpt-4.1"),
            Err(AssessmentError::UnknownModel(_))
        ));
    }

    #[test]
    fn debug_lists_backend_names_and_routes() {
        let text = format!("{:?}", registry());
        assert_eq!(
            text,
            r#"BackendRegistry { backends: ["cloud", "local"], routes: [("llama3.1:8b", "local")], default_backend: Some("cloud") }"#
        );
    }

    #[test]
    fn validate_catches_dangling_routes() {
        assert!(registry().validate().is_ok());
        let bad = registry().with_route("phi3", "gpu-box");
        assert!(bad.validate().unwrap_err().contains("gpu-box"));
        let bad_default = BackendRegistry::new().with_default("cloud");
        assert!(bad_default.validate().is_err());
    }
}
