//! MQTT broker adapter over `rumqttc`'s blocking client.
//!
//! ```text
//!  Publisher ──try_publish──▶ request queue ──▶ network thread ──▶ broker
//!      ▲                                            │
//!      └──────────── confirm ◀── PubComp ───────────┘
//! ```
//!
//! The session is persistent (clean-session off) so QoS 2 flows survive a
//! reconnect.  The network thread owns reconnection: on any connection error
//! it logs, waits the configured backoff and polls again.  Every `PubComp`
//! it sees is forwarded to [`Broker::confirm`]; the gateway never subscribes,
//! so each one completes a publish of ours.

use std::path::Path;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::JoinHandle;
use std::time::Duration;

use log::{debug, info, warn};
use parking_lot::Mutex;
use rumqttc::{Client, ClientError, Connection, Event, MqttOptions, Packet, QoS, TlsConfiguration, Transport};

use crate::app::ports::Broker;
use crate::config::BrokerConfig;
use crate::error::{BrokerError, Result};
use crate::shutdown::Shutdown;

pub struct MqttBroker {
    client: Client,
    completions: Mutex<Receiver<u16>>,
}

impl MqttBroker {
    /// Build the client and start its network thread.
    pub fn connect(config: &BrokerConfig, shutdown: Shutdown) -> Result<(Self, JoinHandle<()>)> {
        let options = mqtt_options(config)?;
        let (client, connection) = Client::new(options, config.request_capacity);
        let backoff = Duration::from_secs(config.reconnect_backoff_secs);
        let endpoint = format!("{}:{}", config.host, config.port);
        let (completed, completions) = mpsc::channel();

        let network = std::thread::Builder::new()
            .name("broker".into())
            .spawn(move || drive(connection, &endpoint, backoff, &shutdown, &completed))?;
        Ok((
            Self {
                client,
                completions: Mutex::new(completions),
            },
            network,
        ))
    }

    /// Ask the network thread to close the session.
    pub fn disconnect(&self) {
        if let Err(e) = self.client.try_disconnect() {
            debug!(target: "broker", "disconnect not queued: {e}");
        }
    }
}

impl Broker for MqttBroker {
    fn publish(&self, topic: &str, payload: &[u8]) -> core::result::Result<(), BrokerError> {
        self.client
            .try_publish(topic, QoS::ExactlyOnce, false, payload.to_vec())
            .map_err(|e| match e {
                ClientError::TryRequest(_) => BrokerError::Backpressure,
                ClientError::Request(_) => BrokerError::Disconnected,
            })
    }

    fn confirm(&self, timeout: Duration) -> core::result::Result<(), BrokerError> {
        match self.completions.lock().recv_timeout(timeout) {
            Ok(pkid) => {
                debug!(target: "broker", "packet {pkid} confirmed");
                Ok(())
            }
            Err(RecvTimeoutError::Timeout) => Err(BrokerError::Unconfirmed),
            Err(RecvTimeoutError::Disconnected) => Err(BrokerError::Disconnected),
        }
    }
}

pub fn mqtt_options(config: &BrokerConfig) -> Result<MqttOptions> {
    let mut options = MqttOptions::new(config.client_id.clone(), config.host.clone(), config.port);
    options.set_keep_alive(Duration::from_secs(config.keep_alive_secs));
    options.set_clean_session(false);
    options.set_request_channel_capacity(config.request_capacity);
    if let (Some(user), Some(pass)) = (&config.username, &config.password) {
        options.set_credentials(user.clone(), pass.clone());
    }
    if let Some(tls) = &config.tls {
        let ca = read_tls(&tls.ca)?;
        let cert = read_tls(&tls.cert)?;
        let key = read_tls(&tls.key)?;
        options.set_transport(Transport::Tls(TlsConfiguration::Simple {
            ca,
            alpn: None,
            client_auth: Some((cert, key)),
        }));
    }
    Ok(options)
}

fn read_tls(path: &Path) -> core::result::Result<Vec<u8>, BrokerError> {
    std::fs::read(path).map_err(|e| BrokerError::Setup(format!("{}: {e}", path.display())))
}

fn drive(
    mut connection: Connection,
    endpoint: &str,
    backoff: Duration,
    shutdown: &Shutdown,
    completed: &Sender<u16>,
) {
    info!(target: "broker", "connecting to {endpoint}");
    for notification in connection.iter() {
        if shutdown.is_triggered() {
            break;
        }
        match notification {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                info!(target: "broker", "connected to {endpoint} ({:?})", ack.code);
            }
            Ok(Event::Incoming(Packet::PubComp(comp))) => {
                debug!(target: "broker", "delivery complete for packet {}", comp.pkid);
                // The publisher may have stopped listening; nothing to do then.
                let _ = completed.send(comp.pkid);
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                warn!(target: "broker", "broker closed the session");
            }
            Ok(_) => {}
            Err(e) => {
                warn!(target: "broker", "connection error: {e}");
                if !shutdown.wait(backoff) {
                    break;
                }
            }
        }
    }
    debug!(target: "broker", "network thread stopped");
}
