//! Adapters: concrete implementations of the port traits.
//!
//! | Adapter    | Implements     | Connects to                          |
//! |------------|----------------|--------------------------------------|
//! | `hardware` | PowerRailPort  | power-control / power-sense lines    |
//! | `modem`    | ModemPort      | TCP probes, process table, dial script |
//! | `mqtt`     | Broker         | MQTT broker (rumqttc)                |
//! | `time`     | Clock          | system clock + shutdown signal       |
//!
//! The SQLite queue implements `TelemetrySink` directly in `crate::queue`.

pub mod hardware;
pub mod modem;
pub mod mqtt;
pub mod time;
