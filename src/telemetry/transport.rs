//! # Telemetry Transport
//!
//! Abstraction over the link that delivers payloads to the cloud, plus an
//! MQTT implementation.
//!
//! [`MqttTransport`] publishes each payload at QoS 1 on
//! `<topic_prefix>/<endpoint>`. A background task drives the `rumqttc` event
//! loop, tracks whether the broker connection is up and hands broker PUBACKs
//! back to the submit call that is waiting for them.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS};
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Content type of batch payloads
pub const CONTENT_TYPE_JSON: &str = "application/json";

/// Delay before the event loop retries after a connection error
const RECONNECT_BACKOFF: Duration = Duration::from_secs(5);

/// Requests buffered between the client handle and the event loop
const REQUEST_CAPACITY: usize = 10;

/// Transport errors
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Not connected")]
    NotConnected,

    #[error("Submit timed out after {0:?}")]
    Timeout(Duration),

    #[error("Publish failed: {0}")]
    Publish(String),
}

/// Delivers payloads to a named endpoint
#[async_trait]
pub trait Transport: Send + Sync {
    /// Whether the link is currently up
    fn is_connected(&self) -> bool;

    /// Deliver one payload
    ///
    /// Returns once the remote side has acknowledged the payload.
    ///
    /// # Arguments
    ///
    /// * `endpoint` - Stream name on the remote side (e.g. "gps")
    /// * `content_type` - MIME type of `payload`
    /// * `payload` - Encoded payload
    /// * `timeout` - Upper bound on the whole call
    async fn submit(
        &self,
        endpoint: &str,
        content_type: &str,
        payload: Bytes,
        timeout: Duration,
    ) -> Result<(), TransportError>;
}

/// MQTT connection settings
#[derive(Debug, Clone)]
pub struct MqttSettings {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub topic_prefix: String,
    pub keep_alive: Duration,
}

type AckSender = oneshot::Sender<Result<(), TransportError>>;

/// Submitters waiting for their PUBACK
///
/// A slot whose sender was already completed or failed stays in place as
/// `None`, so later events still line up with the requests that caused them.
#[derive(Default)]
struct PendingAcks {
    /// Publishes handed to the client but not yet written, in request order
    queued: VecDeque<Option<AckSender>>,
    /// Written publishes by packet id
    in_flight: HashMap<u16, Option<AckSender>>,
}

impl PendingAcks {
    /// A queued publish was written with packet id `pkid`
    fn written(&mut self, pkid: u16) {
        if self.in_flight.contains_key(&pkid) {
            // Retransmission after reconnect
            return;
        }
        match self.queued.pop_front() {
            Some(slot) => {
                self.in_flight.insert(pkid, slot);
            }
            None => debug!("MQTT publish {} has no waiting submitter", pkid),
        }
    }

    /// The broker acknowledged packet id `pkid`
    fn acked(&mut self, pkid: u16) {
        if let Some(Some(tx)) = self.in_flight.remove(&pkid) {
            // Submitter may have timed out already
            let _ = tx.send(Ok(()));
        }
    }

    /// Fail every waiting submitter
    fn fail_all(&mut self, reason: &str) {
        let slots = self.queued.iter_mut().chain(self.in_flight.values_mut());
        for tx in slots.filter_map(Option::take) {
            let _ = tx.send(Err(TransportError::Publish(reason.to_string())));
        }
    }
}

type SharedAcks = Arc<Mutex<PendingAcks>>;

fn lock_acks(acks: &SharedAcks) -> MutexGuard<'_, PendingAcks> {
    acks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// [`Transport`] publishing to an MQTT broker
pub struct MqttTransport {
    client: AsyncClient,
    topic_prefix: String,
    connected: Arc<AtomicBool>,
    acks: SharedAcks,
    /// Keeps `acks.queued` in the same order as the client request queue
    publish_order: tokio::sync::Mutex<()>,
    event_loop: JoinHandle<()>,
}

impl MqttTransport {
    /// Create the client and start its event loop
    ///
    /// Returns immediately; the connection is established in the background and
    /// [`is_connected`](Transport::is_connected) turns true once the broker
    /// acknowledges it.
    pub fn connect(settings: &MqttSettings) -> Self {
        let mut options = MqttOptions::new(&settings.client_id, &settings.host, settings.port);
        options.set_keep_alive(settings.keep_alive);

        let (client, event_loop) = AsyncClient::new(options, REQUEST_CAPACITY);
        let connected = Arc::new(AtomicBool::new(false));
        let acks = SharedAcks::default();
        let event_loop = tokio::spawn(drive_event_loop(event_loop, connected.clone(), acks.clone()));

        info!(
            "MQTT client {} connecting to {}:{}",
            settings.client_id, settings.host, settings.port
        );

        Self {
            client,
            topic_prefix: settings.topic_prefix.trim_end_matches('/').to_string(),
            connected,
            acks,
            publish_order: tokio::sync::Mutex::new(()),
            event_loop,
        }
    }

    fn topic(&self, endpoint: &str) -> String {
        if self.topic_prefix.is_empty() {
            endpoint.to_string()
        } else {
            format!("{}/{}", self.topic_prefix, endpoint)
        }
    }

    /// Hand the publish to the client and register for its PUBACK
    async fn enqueue(
        &self,
        topic: String,
        payload: Bytes,
        deadline: Instant,
        timeout: Duration,
    ) -> Result<oneshot::Receiver<Result<(), TransportError>>, TransportError> {
        let (tx, rx) = oneshot::channel();
        let _order = tokio::time::timeout_at(deadline, self.publish_order.lock())
            .await
            .map_err(|_| TransportError::Timeout(timeout))?;

        lock_acks(&self.acks).queued.push_back(Some(tx));
        let sent = tokio::time::timeout_at(
            deadline,
            self.client.publish_bytes(topic, QoS::AtLeastOnce, false, payload),
        )
        .await;

        match sent {
            Ok(Ok(())) => Ok(rx),
            failed => {
                // Request never reached the queue; withdraw its slot
                lock_acks(&self.acks).queued.pop_back();
                match failed {
                    Ok(Err(e)) => Err(TransportError::Publish(e.to_string())),
                    _ => Err(TransportError::Timeout(timeout)),
                }
            }
        }
    }
}

impl Drop for MqttTransport {
    fn drop(&mut self) {
        self.event_loop.abort();
    }
}

async fn drive_event_loop(mut event_loop: EventLoop, connected: Arc<AtomicBool>, acks: SharedAcks) {
    loop {
        match event_loop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                info!("MQTT connected ({:?})", ack.code);
                connected.store(true, Ordering::Relaxed);
            }
            Ok(Event::Incoming(Packet::PubAck(ack))) => {
                debug!("MQTT publish {} acknowledged", ack.pkid);
                lock_acks(&acks).acked(ack.pkid);
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                warn!("MQTT broker closed the session");
                connected.store(false, Ordering::Relaxed);
                lock_acks(&acks).fail_all("broker closed the session");
            }
            Ok(Event::Incoming(incoming)) => {
                debug!("MQTT incoming: {:?}", incoming);
            }
            Ok(Event::Outgoing(Outgoing::Publish(pkid))) => {
                lock_acks(&acks).written(pkid);
            }
            Ok(Event::Outgoing(_)) => {}
            Err(e) => {
                if connected.swap(false, Ordering::Relaxed) {
                    error!("MQTT connection lost: {}", e);
                } else {
                    debug!("MQTT connect attempt failed: {}", e);
                }
                lock_acks(&acks).fail_all("connection lost");
                tokio::time::sleep(RECONNECT_BACKOFF).await;
            }
        }
    }
}

#[async_trait]
impl Transport for MqttTransport {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    async fn submit(
        &self,
        endpoint: &str,
        content_type: &str,
        payload: Bytes,
        timeout: Duration,
    ) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }

        let deadline = Instant::now() + timeout;
        let topic = self.topic(endpoint);
        debug!("Publishing {} bytes ({}) to {}", payload.len(), content_type, topic);

        let ack = self.enqueue(topic, payload, deadline, timeout).await?;
        match tokio::time::timeout_at(deadline, ack).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(TransportError::Publish("event loop stopped".to_string())),
            Err(_) => Err(TransportError::Timeout(timeout)),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::mocks::RecordingTransport;
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    const CONNACK: [u8; 4] = [0x20, 0x02, 0x00, 0x00];

    /// How the fake broker answers a PUBLISH
    #[derive(Clone, Copy)]
    enum Broker {
        Acks,
        NeverAcks,
        HangsUp,
    }

    /// Read one MQTT control packet: first header byte and body
    async fn read_packet(stream: &mut TcpStream) -> std::io::Result<(u8, Vec<u8>)> {
        let header = stream.read_u8().await?;
        let mut len = 0usize;
        let mut shift = 0;
        loop {
            let byte = stream.read_u8().await?;
            len |= usize::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                break;
            }
            shift += 7;
        }
        let mut body = vec![0; len];
        stream.read_exact(&mut body).await?;
        Ok((header, body))
    }

    /// Packet id of a QoS 1 PUBLISH body
    fn publish_pkid(body: &[u8]) -> [u8; 2] {
        let topic_len = usize::from(u16::from_be_bytes([body[0], body[1]]));
        [body[2 + topic_len], body[3 + topic_len]]
    }

    /// Single-connection broker on an ephemeral port
    async fn fake_broker(behaviour: Broker) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let (header, _) = read_packet(&mut stream).await.unwrap();
            assert_eq!(header >> 4, 1, "expected CONNECT");
            stream.write_all(&CONNACK).await.unwrap();

            while let Ok((header, body)) = read_packet(&mut stream).await {
                if header >> 4 != 3 {
                    continue;
                }
                match behaviour {
                    Broker::Acks => {
                        let [hi, lo] = publish_pkid(&body);
                        stream.write_all(&[0x40, 0x02, hi, lo]).await.unwrap();
                    }
                    Broker::NeverAcks => {}
                    Broker::HangsUp => return,
                }
            }
        });

        port
    }

    async fn connected_transport(port: u16) -> MqttTransport {
        let transport = MqttTransport::connect(&MqttSettings {
            host: "127.0.0.1".to_string(),
            port,
            client_id: "coldchain-test".to_string(),
            topic_prefix: "tracker".to_string(),
            keep_alive: Duration::from_secs(30),
        });

        for _ in 0..500 {
            if transport.is_connected() {
                return transport;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("fake broker never accepted the connection");
    }

    #[tokio::test]
    async fn test_submit_completes_on_puback() {
        let transport = connected_transport(fake_broker(Broker::Acks).await).await;

        for batch in [&b"[1]"[..], &b"[2]"[..]] {
            let result = transport
                .submit("gps", CONTENT_TYPE_JSON, Bytes::copy_from_slice(batch), Duration::from_secs(5))
                .await;
            assert!(result.is_ok(), "{:?}", result);
        }
    }

    #[tokio::test]
    async fn test_submit_without_puback_times_out() {
        let transport = connected_transport(fake_broker(Broker::NeverAcks).await).await;

        let wait = Duration::from_millis(300);
        let result = transport
            .submit("gps", CONTENT_TYPE_JSON, Bytes::from_static(b"[]"), wait)
            .await;
        assert!(matches!(result, Err(TransportError::Timeout(d)) if d == wait), "{:?}", result);
    }

    #[tokio::test]
    async fn test_submit_fails_when_broker_drops_connection() {
        let transport = connected_transport(fake_broker(Broker::HangsUp).await).await;

        let started = std::time::Instant::now();
        let result = transport
            .submit("gps", CONTENT_TYPE_JSON, Bytes::from_static(b"[]"), Duration::from_secs(5))
            .await;
        assert!(matches!(result, Err(TransportError::Publish(_))), "{:?}", result);
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(!transport.is_connected());
    }

    #[test]
    fn test_pending_acks_match_by_packet_id() {
        let mut acks = PendingAcks::default();
        let (tx1, mut rx1) = oneshot::channel();
        let (tx2, mut rx2) = oneshot::channel();
        acks.queued.push_back(Some(tx1));
        acks.queued.push_back(Some(tx2));

        acks.written(7);
        acks.written(8);
        acks.acked(8);
        assert!(matches!(rx2.try_recv(), Ok(Ok(()))));
        assert!(rx1.try_recv().is_err());

        // Retransmitted id keeps its original submitter
        acks.written(7);
        acks.acked(7);
        assert!(matches!(rx1.try_recv(), Ok(Ok(()))));
        assert!(acks.in_flight.is_empty());
    }

    #[test]
    fn test_pending_acks_fail_all_keeps_slots() {
        let mut acks = PendingAcks::default();
        let (tx1, mut rx1) = oneshot::channel();
        let (tx2, mut rx2) = oneshot::channel();
        acks.queued.push_back(Some(tx1));
        acks.written(1);
        acks.queued.push_back(Some(tx2));

        acks.fail_all("connection lost");
        assert!(matches!(rx1.try_recv(), Ok(Err(TransportError::Publish(_)))));
        assert!(matches!(rx2.try_recv(), Ok(Err(TransportError::Publish(_)))));

        // The still-queued request is written later and consumes its own slot
        let (tx3, mut rx3) = oneshot::channel();
        acks.queued.push_back(Some(tx3));
        acks.written(2);
        acks.written(3);
        acks.acked(3);
        assert!(matches!(rx3.try_recv(), Ok(Ok(()))));
    }

    #[tokio::test]
    async fn test_mqtt_starts_disconnected() {
        let transport = MqttTransport::connect(&MqttSettings {
            host: "127.0.0.1".to_string(),
            port: 1,
            client_id: "coldchain-test".to_string(),
            topic_prefix: "tracker/".to_string(),
            keep_alive: Duration::from_secs(30),
        });

        assert!(!transport.is_connected());
        assert_eq!(transport.topic("gps"), "tracker/gps");

        let result = transport
            .submit("gps", CONTENT_TYPE_JSON, Bytes::from_static(b"[]"), Duration::from_secs(2))
            .await;
        assert!(matches!(result, Err(TransportError::NotConnected)));
    }

    #[tokio::test]
    async fn test_recording_transport_scripted_failures() {
        let transport = RecordingTransport::connected();
        transport.script(&[false, true]);

        let wait = Duration::from_secs(2);
        assert!(transport.submit("gps", CONTENT_TYPE_JSON, Bytes::from_static(b"[1]"), wait).await.is_ok());
        assert!(transport.submit("gps", CONTENT_TYPE_JSON, Bytes::from_static(b"[2]"), wait).await.is_err());
        assert!(transport.submit("gps", CONTENT_TYPE_JSON, Bytes::from_static(b"[3]"), wait).await.is_ok());

        assert_eq!(transport.payloads(), vec!["[1]", "[2]", "[3]"]);
        assert_eq!(transport.submissions()[0].endpoint, "gps");
    }
}
