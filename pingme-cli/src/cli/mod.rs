//! CLI command implementations

pub mod handlers;
