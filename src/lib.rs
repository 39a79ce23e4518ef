//! Kiosk gateway library.
//!
//! QR-gated power sequencing, cellular link supervision and GNSS fixes,
//! relayed to an MQTT broker through a durable SQLite queue.  The binary in
//! `main.rs` only parses the command line and starts
//! [`app::service::Gateway`]; everything else is exposed here for the
//! integration tests.

#![deny(unused_must_use)]

pub mod adapters;
pub mod app;
pub mod config;
pub mod drivers;
pub mod error;
pub mod fsm;
pub mod geo;
pub mod logging;
pub mod publisher;
pub mod qr;
pub mod queue;
pub mod shutdown;
pub mod telemetry;
