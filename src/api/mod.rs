//! HTTP surface of the interpretation service.
//!
//! Routes live under `/v1/`. The service-to-service credential is checked
//! upstream; nothing here authenticates callers.

pub mod endpoints;
pub mod error;
pub mod middleware;
pub mod router;
pub mod server;
pub mod types;

pub use error::ApiError;
pub use router::api_router;
pub use server::{start_api_server, ApiServer};
pub use types::ApiContext;
