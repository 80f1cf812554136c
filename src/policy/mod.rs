//! Web traversal policy definitions.

pub mod web;

pub use web::{WebPolicy, ConfigError};
