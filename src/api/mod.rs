//! HTTP API Module
//!
//! Provides a REST API for the budget screens, the audit trail and
//! replica health.

mod http;

pub use http::{AppState, ErrorResponse, HttpServer, USER_HEADER};
