//! Peripheral drivers and thread helpers.

pub mod gpio;
pub mod serial;
pub mod task;
