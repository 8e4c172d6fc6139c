//! examforge-core: adaptive assessment engine.
//!
//! Turns unreliable generator output into validated questions, keeps quiz
//! session scores, records attempts and predicts exam success from them.
//! Concrete text-generation backends live in `examforge-providers`.

pub mod engine;
pub mod error;
pub mod model;
pub mod parser;
pub mod predictor;
pub mod progress;
pub mod prompt;
pub mod registry;
pub mod requester;
pub mod session;
pub mod settings;
pub mod store;
pub mod traits;

pub use engine::{AssessmentEngine, EngineConfig, GeneratedQuestion};
pub use error::{AssessmentError, AssessmentResult, ParseError, ProviderError};
pub use registry::BackendRegistry;
pub use requester::{QuestionRequest, RequesterConfig};
pub use settings::AssessmentConfig;
pub use store::{AssessmentStore, MemoryStore};
