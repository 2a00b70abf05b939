use crate::*;

use reqwest::StatusCode;
use serde_json::{json, Value};

fn batch(n: usize) -> Value {
    Value::Array(
        (0..n)
            .map(|i| json!({ "topic": "sensors/temp", "payload": format!("{i}") }))
            .collect(),
    )
}

#[tokio::test]
async fn test_root_returns_greeting() {
    let server = IngestServer::spawn().await.unwrap();

    let resp = reqwest::get(server.url("/")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.text().await.unwrap(), "Welcome, glad to have you here!");

    server.stop().await.unwrap();
}

/// Single messages are acknowledged but never stored.
#[tokio::test]
async fn test_single_message_is_not_persisted() {
    let server = IngestServer::spawn().await.unwrap();
    let client = reqwest::Client::new();

    let resp = client
        .post(server.url("/message"))
        .json(&json!({ "topic": "sensors/temp", "payload": "21.5" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body, json!({ "status": "Message queued for processing" }));

    let pool = server.pool.clone();
    server.stop().await.unwrap();
    assert_eq!(pool.message_count().unwrap(), 0);
}

#[tokio::test]
async fn test_batch_of_fourteen_lands_in_two_chunks() {
    let server = IngestServer::spawn().await.unwrap();
    let client = reqwest::Client::new();

    let resp = client
        .post(server.url("/batchmessage"))
        .json(&batch(14))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body, json!({ "status": "Messages queued for processing" }));

    server
        .wait_for_rows(14, Duration::from_secs(5))
        .await
        .unwrap();

    let mut payloads: Vec<u32> = stored(&server.pool)
        .unwrap()
        .into_iter()
        .map(|(topic, payload)| {
            assert_eq!(topic, "sensors/temp");
            payload.parse().unwrap()
        })
        .collect();
    payloads.sort_unstable();
    assert_eq!(payloads, (0..14).collect::<Vec<_>>());

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_empty_batch_is_accepted_and_stores_nothing() {
    let server = IngestServer::spawn().await.unwrap();
    let client = reqwest::Client::new();

    let resp = client
        .post(server.url("/batchmessage"))
        .json(&json!([]))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);

    let pool = server.pool.clone();
    server.stop().await.unwrap();
    assert_eq!(pool.message_count().unwrap(), 0);
}

#[tokio::test]
async fn test_malformed_json_is_bad_request() {
    let server = IngestServer::spawn().await.unwrap();
    let client = reqwest::Client::new();

    for (path, body) in [
        ("/batchmessage", "[{\"topic\": \"t\", "),
        ("/batchmessage", "{\"topic\": \"t\", \"payload\": \"p\"}"),
        ("/batchmessage", "[{\"topic\": 7, \"payload\": \"p\"}]"),
        ("/message", "not json"),
        ("/message", "{\"topic\": \"t\"}"),
    ] {
        let resp = client
            .post(server.url(path))
            .header("content-type", "application/json")
            .body(body)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "{path} {body}");
        let err: Value = resp.json().await.unwrap();
        assert!(err["error"].is_string(), "{path} {body}: {err}");
    }

    let pool = server.pool.clone();
    server.stop().await.unwrap();
    assert_eq!(pool.message_count().unwrap(), 0);
}

/// A busy queue refuses the whole batch; nothing from it is stored.
#[tokio::test]
async fn test_full_queue_is_service_unavailable() {
    let server = IngestServer::spawn_with(1, 2).await.unwrap();
    let client = reqwest::Client::new();

    let (release, held) = std::sync::mpsc::channel::<()>();
    server
        .workers
        .submit(move || {
            let _ = held.recv();
        })
        .unwrap();
    server.workers.submit(|| {}).unwrap();

    let resp = client
        .post(server.url("/batchmessage"))
        .json(&batch(30))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    let err: Value = resp.json().await.unwrap();
    assert_eq!(err, json!({ "error": "ingest queue is full" }));

    release.send(()).unwrap();
    let pool = server.pool.clone();
    server.stop().await.unwrap();
    assert_eq!(pool.message_count().unwrap(), 0);
}

/// A batch with more chunks than queue slots is accepted when the pool is
/// idle and stored in full.
#[tokio::test]
async fn test_batch_past_queue_capacity_is_stored() {
    let server = IngestServer::spawn_with(2, 4).await.unwrap();
    let client = reqwest::Client::new();
    let n = BATCH_SIZE * 4 + 1;

    let resp = client
        .post(server.url("/batchmessage"))
        .json(&batch(n))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);

    server
        .wait_for_rows(n as u64, Duration::from_secs(5))
        .await
        .unwrap();
    server.stop().await.unwrap();
}

/// Many concurrent batches all end up stored once the pool drains.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_batches_are_all_stored() {
    let server = IngestServer::spawn_with(4, 1024).await.unwrap();
    let client = reqwest::Client::new();

    let sends: Vec<_> = (0..8)
        .map(|_| {
            let client = client.clone();
            let url = server.url("/batchmessage");
            tokio::spawn(async move { client.post(url).json(&batch(25)).send().await })
        })
        .collect();
    for send in sends {
        let resp = send.await.unwrap().unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
    }

    let pool = server.pool.clone();
    server.stop().await.unwrap();
    assert_eq!(pool.message_count().unwrap(), 200);
}
