//! Shared building blocks for the catalog workspace.
//!
//! Configuration, the error taxonomy, API models and the response envelope
//! used by both the core library and the HTTP service.

pub mod config;
pub mod errors;
pub mod middleware;
pub mod models;
pub mod response;
pub mod utils;
