//! Edge to cloud: buffer, flush scheduler and delivery client against the
//! real ingest API.

use crate::*;

use std::sync::Arc;

use ferry_core::config::OverflowPolicy;
use ferry_core::Message;
use ferry_services::{
    BatchSink, BrokerClient, BrokerError, DeliveryClient, DeliveryError, EdgeRelay,
    FlushScheduler, MessageBuffer, MessageHandler,
};
use tokio::sync::broadcast;

/// Broker stand-in; clones share the registered subscription callback.
#[derive(Clone, Default)]
struct LoopbackBroker {
    handler: Arc<std::sync::Mutex<Option<MessageHandler>>>,
}

impl LoopbackBroker {
    fn publish(&self, topic: &str, payload: &str) {
        let handler = self.handler.lock().unwrap().clone().unwrap();
        handler(Message::new(topic, payload));
    }
}

impl BrokerClient for LoopbackBroker {
    async fn connect(&self) -> Result<(), BrokerError> {
        Ok(())
    }

    async fn subscribe(&self, _topic: &str, handler: MessageHandler) -> Result<(), BrokerError> {
        *self.handler.lock().unwrap() = Some(handler);
        Ok(())
    }

    async fn disconnect(&self) {}
}

fn delivery_client(server: &IngestServer) -> DeliveryClient {
    DeliveryClient::new(server.url("/batchmessage"), Duration::from_secs(5)).unwrap()
}

#[tokio::test]
async fn test_delivery_client_posts_batch() {
    let server = IngestServer::spawn().await.unwrap();
    let client = delivery_client(&server);

    let batch: Vec<Message> = (0..3)
        .map(|i| Message::new("plant/line1", format!("reading-{i}")))
        .collect();
    client.send(&batch).await.unwrap();

    server.wait_for_rows(3, Duration::from_secs(5)).await.unwrap();
    assert_eq!(
        stored(&server.pool).unwrap(),
        vec![
            ("plant/line1".to_string(), "reading-0".to_string()),
            ("plant/line1".to_string(), "reading-1".to_string()),
            ("plant/line1".to_string(), "reading-2".to_string()),
        ]
    );

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_unavailable_ingest_is_delivery_failure() {
    let server = IngestServer::spawn_with(1, 1).await.unwrap();
    let client = delivery_client(&server);

    let (release, held) = std::sync::mpsc::channel::<()>();
    server
        .workers
        .submit(move || {
            let _ = held.recv();
        })
        .unwrap();

    let batch: Vec<Message> = (0..25).map(|i| Message::new("t", format!("{i}"))).collect();
    let err = client.send(&batch).await.unwrap_err();
    assert!(
        matches!(err, DeliveryError::Status(code) if code.as_u16() == 503),
        "{err}"
    );

    release.send(()).unwrap();
    server.stop().await.unwrap();
}

/// A batch that failed against a dead endpoint goes out ahead of newer
/// messages once the endpoint comes up.
#[tokio::test]
async fn test_failed_batch_is_resent_on_later_tick() {
    // Reserve a port and keep it closed for the first cycle.
    let reserved = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = reserved.local_addr().unwrap();
    drop(reserved);

    let buffer = MessageBuffer::new(100, OverflowPolicy::DropOldest);
    let client =
        DeliveryClient::new(format!("http://{addr}/batchmessage"), Duration::from_secs(2)).unwrap();
    let (_tx, rx) = broadcast::channel(1);
    let mut scheduler =
        FlushScheduler::new(buffer.clone(), client, Duration::from_secs(3600), rx).with_retry(4);

    buffer.append(Message::new("t", "early"));
    let report = scheduler.flush_once().await;
    assert_eq!(report.messages_parked, 1);
    assert_eq!(scheduler.pending_retries(), 1);

    // One worker keeps chunk order equal to arrival order.
    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    let server = IngestServer::spawn_on(listener, 1, 64).await.unwrap();

    buffer.append(Message::new("t", "late"));
    let report = scheduler.flush_once().await;
    assert_eq!(report.batches_sent, 2);
    assert_eq!(report.messages_sent, 2);
    assert_eq!(scheduler.pending_retries(), 0);

    server.wait_for_rows(2, Duration::from_secs(5)).await.unwrap();
    assert_eq!(
        stored(&server.pool).unwrap(),
        vec![
            ("t".to_string(), "early".to_string()),
            ("t".to_string(), "late".to_string()),
        ]
    );

    server.stop().await.unwrap();
}

/// Full edge path: broker callback -> buffer -> periodic flush -> API -> SQLite.
#[tokio::test]
async fn test_edge_relay_end_to_end() {
    let server = IngestServer::spawn().await.unwrap();

    let broker = LoopbackBroker::default();
    let buffer = MessageBuffer::new(1000, OverflowPolicy::DropOldest);
    let relay = EdgeRelay::new(broker.clone(), buffer.clone());
    relay.start("plant/#").await.unwrap();

    let (tx, rx) = broadcast::channel(1);
    let scheduler = FlushScheduler::new(
        buffer,
        delivery_client(&server),
        Duration::from_millis(100),
        rx,
    )
    .with_retry(4);

    for i in 0..12 {
        broker.publish("plant/line1", &format!("m{i}"));
    }

    let run = tokio::spawn(async move { relay.run(scheduler).await });
    server.wait_for_rows(12, Duration::from_secs(5)).await.unwrap();

    // Sent by a later tick or, at the latest, by the final flush.
    broker.publish("plant/line2", "tail-1");
    broker.publish("plant/line2", "tail-2");
    tx.send(()).unwrap();

    let stats = run.await.unwrap();
    assert_eq!(stats.messages_sent, 14);
    assert_eq!(stats.messages_lost, 0);

    server.wait_for_rows(14, Duration::from_secs(5)).await.unwrap();
    let rows = stored(&server.pool).unwrap();
    assert!(rows.contains(&("plant/line2".to_string(), "tail-2".to_string())));

    server.stop().await.unwrap();
}
