//! Failover client behavior against local stub HTTP endpoints.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use strand::llm::{
    ChatMessage, ChatOptions, EndpointConfig, EndpointHealth, FailoverClient, LlmClient, LlmError,
    RetryPolicy,
};

/// Spawns a one-response-per-connection HTTP stub. Every connection gets the
/// next response (the last one repeats); the counter tracks requests served.
async fn spawn_stub(responses: Vec<String>, hits: Arc<AtomicUsize>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut served = 0usize;
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            let response = responses
                .get(served.min(responses.len().saturating_sub(1)))
                .cloned()
                .unwrap_or_default();
            served += 1;
            hits.fetch_add(1, Ordering::SeqCst);
            // Drain the request head; the body is small enough to ignore.
            let mut buf = vec![0u8; 65536];
            let _ = socket.read(&mut buf).await;
            let _ = socket.write_all(response.as_bytes()).await;
            let _ = socket.shutdown().await;
        }
    });
    addr
}

fn http_json(body: &str) -> String {
    format!(
        "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
        body.len()
    )
}

fn http_503() -> String {
    "HTTP/1.1 503 Service Unavailable\r\ncontent-length: 0\r\nconnection: close\r\n\r\n".to_string()
}

fn http_400(body: &str) -> String {
    format!(
        "HTTP/1.1 400 Bad Request\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
        body.len()
    )
}

fn chat_body(content: &str) -> String {
    serde_json::json!({
        "choices": [{
            "message": { "role": "assistant", "content": content },
            "finish_reason": "stop"
        }],
        "usage": { "prompt_tokens": 3, "completion_tokens": 2, "total_tokens": 5 }
    })
    .to_string()
}

fn endpoint(addr: SocketAddr, name: &str) -> EndpointConfig {
    EndpointConfig::new(format!("http://{addr}/v1"), name, Duration::from_secs(5))
}

fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        backoff_base: Duration::from_millis(5),
    }
}

/// **Scenario (failover)**: the first endpoint answers 503, the second
/// succeeds. The call succeeds and the first endpoint is marked degraded.
#[tokio::test]
async fn failover_to_second_endpoint() {
    let bad_hits = Arc::new(AtomicUsize::new(0));
    let good_hits = Arc::new(AtomicUsize::new(0));
    let bad = spawn_stub(vec![http_503()], bad_hits.clone()).await;
    let good = spawn_stub(
        vec![http_json(&chat_body("from the healthy endpoint"))],
        good_hits.clone(),
    )
    .await;

    let client = FailoverClient::new(
        vec![endpoint(bad, "primary"), endpoint(good, "secondary")],
        "llama-3.1-8b",
    )
    .with_retry(fast_retry());

    let reply = client
        .chat_completion(
            &[ChatMessage::user("ping")],
            &ChatOptions::default().with_temperature(0.8),
        )
        .await
        .unwrap();

    assert_eq!(reply.content, "from the healthy endpoint");
    assert_eq!(bad_hits.load(Ordering::SeqCst), 1);
    assert_eq!(good_hits.load(Ordering::SeqCst), 1);
    let health = client.health();
    assert_eq!(health.health("primary"), EndpointHealth::Degraded);
    assert_eq!(health.health("secondary"), EndpointHealth::Healthy);
}

/// **Scenario**: after a failure, the degraded endpoint sorts behind the
/// healthy one for the next call.
#[tokio::test]
async fn degraded_endpoint_deprioritized() {
    let bad_hits = Arc::new(AtomicUsize::new(0));
    let good_hits = Arc::new(AtomicUsize::new(0));
    let bad = spawn_stub(vec![http_503()], bad_hits.clone()).await;
    let good = spawn_stub(vec![http_json(&chat_body("ok"))], good_hits.clone()).await;

    let client = FailoverClient::new(
        vec![endpoint(bad, "primary"), endpoint(good, "secondary")],
        "llama-3.1-8b",
    )
    .with_retry(fast_retry());

    let opts = ChatOptions::default().with_temperature(0.8);
    let _ = client
        .chat_completion(&[ChatMessage::user("one")], &opts)
        .await
        .unwrap();
    let _ = client
        .chat_completion(&[ChatMessage::user("two")], &opts)
        .await
        .unwrap();

    // Second call goes straight to the healthy endpoint.
    assert_eq!(bad_hits.load(Ordering::SeqCst), 1);
    assert_eq!(good_hits.load(Ordering::SeqCst), 2);
}

/// **Scenario (cache)**: two identical sub-0.5-temperature calls hit the
/// upstream once and return byte-identical content.
#[tokio::test]
async fn warm_cache_returns_identical_content() {
    let hits = Arc::new(AtomicUsize::new(0));
    let addr = spawn_stub(
        vec![
            http_json(&chat_body("deterministic answer")),
            http_json(&chat_body("a different answer")),
        ],
        hits.clone(),
    )
    .await;

    let client = FailoverClient::new(vec![endpoint(addr, "only")], "llama-3.1-8b")
        .with_retry(fast_retry());
    let opts = ChatOptions::default().with_temperature(0.2);
    let messages = [ChatMessage::user("what is 2+2")];

    let first = client.chat_completion(&messages, &opts).await.unwrap();
    let second = client.chat_completion(&messages, &opts).await.unwrap();
    assert_eq!(first.content, second.content);
    assert_eq!(hits.load(Ordering::SeqCst), 1, "second call must be cached");

    // High temperature bypasses the cache.
    let hot = ChatOptions::default().with_temperature(0.9);
    let third = client.chat_completion(&messages, &hot).await.unwrap();
    assert_eq!(third.content, "a different answer");
    assert_eq!(hits.load(Ordering::SeqCst), 2);
}

/// **Scenario**: a 4xx fails immediately with BadRequest and no failover.
#[tokio::test]
async fn bad_request_fails_fast() {
    let bad_hits = Arc::new(AtomicUsize::new(0));
    let other_hits = Arc::new(AtomicUsize::new(0));
    let bad = spawn_stub(
        vec![http_400(r#"{"error": {"message": "prompt too long"}}"#)],
        bad_hits.clone(),
    )
    .await;
    let other = spawn_stub(vec![http_json(&chat_body("never used"))], other_hits.clone()).await;

    let client = FailoverClient::new(
        vec![endpoint(bad, "primary"), endpoint(other, "secondary")],
        "llama-3.1-8b",
    )
    .with_retry(fast_retry());

    let err = client
        .chat_completion(
            &[ChatMessage::user("x")],
            &ChatOptions::default().with_temperature(0.8),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, LlmError::BadRequest(_)));
    assert_eq!(other_hits.load(Ordering::SeqCst), 0);
}

/// **Scenario**: retries exhausted across endpoints end in Unavailable.
#[tokio::test]
async fn exhausted_retries_are_unavailable() {
    let hits = Arc::new(AtomicUsize::new(0));
    let addr = spawn_stub(vec![http_503()], hits.clone()).await;
    let client = FailoverClient::new(vec![endpoint(addr, "only")], "llama-3.1-8b")
        .with_retry(fast_retry());

    let err = client
        .chat_completion(
            &[ChatMessage::user("x")],
            &ChatOptions::default().with_temperature(0.8),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, LlmError::Unavailable(_)));
    assert_eq!(hits.load(Ordering::SeqCst), 3);
}
