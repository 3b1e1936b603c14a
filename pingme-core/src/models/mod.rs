//! Data models for pingme

pub mod configuration;
pub mod notification;

pub use configuration::*;
pub use notification::*;
