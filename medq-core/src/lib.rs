pub mod config;
pub mod db;
pub mod error;
pub mod lifecycle;
pub mod llm;
pub mod models;
pub mod prompt;
pub mod review;
pub mod store;
pub mod suggestion;
pub mod triage;
pub mod workflow;

pub use config::MedqConfig;
pub use error::{MedqError, Result};
pub use llm::{
    ChatClientConfig, ChatCompletionsClient, ChatMessage, LlmBackend, LlmError, Role,
    API_KEY_ENV,
};
pub use prompt::{FixedPrompt, PromptRouter, TopicRouter};
pub use review::{ReviewGate, ReviewInput};
pub use store::{MemoryStore, PgStore, Store};
pub use suggestion::SuggestionGenerator;
pub use triage::{classify, should_escalate, Triage};
pub use workflow::{QueryService, TriageOutcome, DEMO_DOCTOR_ID, DEMO_PATIENT_ID};
