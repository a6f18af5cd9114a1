//! Shared building blocks for the observability settings dashboard.
//!
//! Holds everything the HTTP service needs that is not a route handler:
//! configuration, the error taxonomy and response envelope, middleware,
//! request/response models, small parsing utilities, the build-report
//! session and the error-reporting shim.

pub mod config;
pub mod errors;
pub mod extract;
pub mod middleware;
pub mod models;
pub mod report;
pub mod response;
pub mod session;
pub mod telemetry;
pub mod utils;
