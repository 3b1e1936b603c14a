//! Delivery engine: at-least-once forwarding of notifications

pub mod engine;

pub use engine::{
    BatchOutcome, DeliveryEngine, DeliveryOutcome, DeliveryState, DEFAULT_RETRY_INTERVAL,
};
