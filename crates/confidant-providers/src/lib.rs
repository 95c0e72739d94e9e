//! Model server access for Confidant.
//!
//! # Architecture
//!
//! - [`traits::ModelGateway`] — probe + completion against the local server
//! - [`http_gateway::LmStudioGateway`] — OpenAI-compatible HTTP implementation
//! - [`request::RequestBuilder`] — history → payload, tuned to the active model
//! - [`manager::ModelManager`] — load/unload models via the `lms` CLI

pub mod http_gateway;
pub mod manager;
pub mod payload;
pub mod request;
pub mod traits;

// Re-export main types for convenience
pub use http_gateway::LmStudioGateway;
pub use manager::{LmsCli, ManagerError, ModelManager};
pub use payload::ChatPayload;
pub use request::RequestBuilder;
pub use traits::{GatewayFailure, ModelGateway, ProbeResult};
