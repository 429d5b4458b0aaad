//! Core library for the AI gateway: one completion call in, one answer out,
//! with provider failover in between.
//!
//! Module boundaries:
//! - [`agents`] holds request types, provider configs, model policies and the
//!   upstream adapters.
//! - [`audit`] persists one record per attempt to the audit log table.
//! - [`db`] initialises the SQLite database and applies migrations.
//! - [`errors`] keeps the failure taxonomy with human friendly metadata.
//! - [`gateway`] runs the failover walk across providers.
//! - [`settings`] reads process-level overrides from the environment.

pub mod agents;
pub mod audit;
pub mod db;
pub mod errors;
pub mod gateway;
pub mod settings;

pub use errors::GatewayError;
pub use gateway::{AiGateway, ProviderStatus};
pub use settings::GatewaySettings;
