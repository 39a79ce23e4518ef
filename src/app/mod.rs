//! Application core: the port traits the machines are written against and
//! the service that wires adapters to them.
//!
//! Handlers and the publisher only ever see [`ports`]; concrete hardware,
//! process and network access lives in `crate::adapters` and
//! `crate::drivers`.

pub mod ports;
pub mod service;
