//! examforge-providers: text-generation backends.
//!
//! Implements the `TextGenerator` trait for OpenAI-compatible cloud APIs and
//! local Ollama, plus a mock, and builds the model routing registry from the
//! configuration file.

pub mod config;
pub mod error;
pub mod mock;
pub mod ollama;
pub mod openai;

pub use config::{build_registry, create_backend, load_config, load_config_from, BackendConfig, ExamforgeConfig};
pub use error::ProviderError;
