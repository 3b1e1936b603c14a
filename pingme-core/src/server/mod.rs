pub mod api;
pub mod core;
pub mod discovery;
pub mod providers;

pub use self::core::{BoundRelay, RelayServer};
