//! HTTP surface
//!
//! Axum router exposing the job endpoints, plus the server lifecycle.

/// API error types
pub mod error;

/// HTTP handlers for the job endpoints
pub mod handlers;

/// Server instance management
pub mod portal;

pub use error::{ApiError, ApiResult};
pub use handlers::{create_router, AppState, PREDICTOR_FIELD};
pub use portal::PortalServer;
