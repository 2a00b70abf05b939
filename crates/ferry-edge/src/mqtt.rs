//! MQTT broker client — rumqttc behind the relay's broker capability.
//!
//! `connect` and `subscribe` drive the event loop themselves until the
//! broker acknowledges; after a successful subscribe the event loop moves
//! to a background task that dispatches publishes and reconnects on error.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rumqttc::{
    AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS, SubscribeReasonCode,
};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use ferry_core::Message;
use ferry_services::{BrokerClient, BrokerError, MessageHandler};

const DEFAULT_PORT: u16 = 1883;
const KEEP_ALIVE: Duration = Duration::from_secs(60);
const RECONNECT_DELAY: Duration = Duration::from_secs(5);
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);
const REQUEST_CAPACITY: usize = 64;

/// Split `tcp://host:port` (scheme and port optional) into host and port.
pub fn parse_broker_addr(addr: &str) -> Result<(String, u16), BrokerError> {
    let rest = ["tcp://", "mqtt://"]
        .iter()
        .find_map(|scheme| addr.strip_prefix(scheme))
        .unwrap_or(addr);
    let rest = rest.trim_end_matches('/');

    let (host, port) = match rest.rsplit_once(':') {
        Some((host, port)) => {
            let port = port
                .parse::<u16>()
                .map_err(|_| BrokerError::Connect(format!("invalid port in {addr}")))?;
            (host, port)
        }
        None => (rest, DEFAULT_PORT),
    };

    if host.is_empty() {
        return Err(BrokerError::Connect(format!("no host in {addr}")));
    }
    Ok((host.to_string(), port))
}

pub struct MqttBroker {
    client: AsyncClient,
    /// Held here until the subscription is live, then moved into `dispatch`.
    eventloop: Mutex<Option<EventLoop>>,
    dispatch: Mutex<Option<JoinHandle<()>>>,
    stopping: Arc<AtomicBool>,
}

impl MqttBroker {
    pub fn new(client_id: &str, host: &str, port: u16) -> Self {
        let mut options = MqttOptions::new(client_id, host, port);
        options.set_keep_alive(KEEP_ALIVE);
        options.set_clean_session(false);

        let (client, eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);
        Self {
            client,
            eventloop: Mutex::new(Some(eventloop)),
            dispatch: Mutex::new(None),
            stopping: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl BrokerClient for MqttBroker {
    async fn connect(&self) -> Result<(), BrokerError> {
        let mut guard = self.eventloop.lock().await;
        let eventloop = guard.as_mut().ok_or(BrokerError::NotConnected)?;

        let handshake = async {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => return Ok(()),
                    Ok(_) => {}
                    Err(e) => return Err(BrokerError::Connect(e.to_string())),
                }
            }
        };
        tokio::time::timeout(HANDSHAKE_TIMEOUT, handshake)
            .await
            .map_err(|_| BrokerError::Connect("timed out waiting for CONNACK".into()))?
    }

    async fn subscribe(&self, topic: &str, handler: MessageHandler) -> Result<(), BrokerError> {
        let mut guard = self.eventloop.lock().await;
        let mut eventloop = guard.take().ok_or(BrokerError::NotConnected)?;

        let failed = |reason: String| BrokerError::Subscribe {
            topic: topic.to_string(),
            reason,
        };

        self.client
            .subscribe(topic, QoS::AtMostOnce)
            .await
            .map_err(|e| failed(e.to_string()))?;

        let ack = async {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::SubAck(ack))) => {
                        if ack
                            .return_codes
                            .iter()
                            .any(|code| matches!(code, SubscribeReasonCode::Failure))
                        {
                            return Err(failed("rejected by broker".into()));
                        }
                        return Ok(());
                    }
                    Ok(Event::Incoming(Packet::Publish(p))) => {
                        handler(Message::from_bytes(p.topic, &p.payload));
                    }
                    Ok(_) => {}
                    Err(e) => return Err(failed(e.to_string())),
                }
            }
        };
        let acked = tokio::time::timeout(HANDSHAKE_TIMEOUT, ack)
            .await
            .map_err(|_| failed("timed out waiting for SUBACK".into()))
            .and_then(|r| r);
        if let Err(e) = acked {
            // Keep the event loop so the caller may try again.
            *guard = Some(eventloop);
            return Err(e);
        }

        let task = tokio::spawn(dispatch_loop(eventloop, handler, self.stopping.clone()));
        *self.dispatch.lock().await = Some(task);
        Ok(())
    }

    async fn disconnect(&self) {
        self.stopping.store(true, Ordering::SeqCst);
        if let Err(e) = self.client.disconnect().await {
            tracing::debug!(error = %e, "disconnect request not sent");
        }

        let Some(mut task) = self.dispatch.lock().await.take() else {
            return;
        };
        if tokio::time::timeout(Duration::from_secs(2), &mut task)
            .await
            .is_err()
        {
            task.abort();
        }
    }
}

async fn dispatch_loop(mut eventloop: EventLoop, handler: MessageHandler, stopping: Arc<AtomicBool>) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::Publish(p))) => {
                handler(Message::from_bytes(p.topic, &p.payload));
            }
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                tracing::info!("reconnected to broker");
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => break,
            Ok(_) => {}
            Err(e) => {
                if stopping.load(Ordering::SeqCst) {
                    break;
                }
                tracing::warn!(error = %e, "broker connection lost, retrying");
                tokio::time::sleep(RECONNECT_DELAY).await;
            }
        }
    }
    tracing::debug!("broker dispatch stopped");
}
