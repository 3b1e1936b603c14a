//! Client helpers for sending notifications through a pingme relay.

pub mod report;
pub mod reporter;

pub use report::RunReport;
pub use reporter::{Reporter, ReporterError};
