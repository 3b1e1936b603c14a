//! # pingme core library
//!
//! Relays application notifications into one Telegram chat. The ingestion
//! endpoint hands each batch to the delivery engine, which retries every
//! payload with a fixed interval until Telegram accepts it. A separate
//! responder answers `/start` with the caller's chat id so the operator can
//! configure the destination.

pub mod client;
pub mod delivery;
pub mod models;
pub mod server;
pub mod services;
