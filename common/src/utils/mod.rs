//! Utility functions and helpers.

pub mod identifier;

// Re-export commonly used functions
pub use identifier::{qualify_name, quote_identifier, validate_identifier};
