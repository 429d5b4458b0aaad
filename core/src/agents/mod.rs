pub mod cache;
pub mod config;
pub mod json;
pub mod policy;
pub mod providers;
pub mod request;
pub mod retry;

pub use cache::{CachedConfig, Clock, ConfigCache, KeySource, SystemClock};
pub use config::{ConfigStore, ProviderConfig, ProviderKind, SqliteConfigStore};
pub use policy::{ModelCandidateList, ModelPolicy, ModelResolver};
pub use providers::ProviderAdapter;
pub use request::{ChatMessage, CompletionRequest, CompletionResult, Role, TaskKey};
