//! HTTP command surface
//!
//! Axum transport that exposes the command dispatcher to a presentation
//! layer. Every route maps to exactly one dispatcher command and failures are
//! returned as `ErrorResponse` JSON.

pub mod handlers;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod server;

pub use handlers::AppState;
pub use middleware::{trace_id_middleware, TraceId, TRACE_ID_HEADER};
pub use server::ApiServer;
