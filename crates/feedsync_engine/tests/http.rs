//! HTTP transport tests against a canned local server.

use feedsync_engine::{
    FeedResponse, HttpTransport, SyncConfig, SyncEngine, SyncError, SyncTransport,
};
use feedsync_protocol::{MessageStream, StreamMessage};
use feedsync_store::LocalStore;
use serde_json::json;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// Answers one connection per entry of `responses`, in order, and returns
/// the request heads it received.
async fn serve(responses: Vec<String>) -> (String, JoinHandle<Vec<String>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base_url = format!("http://{}/api", listener.local_addr().unwrap());

    let server = tokio::spawn(async move {
        let mut heads = Vec::new();
        for response in responses {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut head = Vec::new();
            let mut buf = [0u8; 1024];
            while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                head.extend_from_slice(&buf[..n]);
            }
            heads.push(String::from_utf8(head).unwrap());
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
        }
        heads
    });

    (base_url, server)
}

fn empty(code: u16, reason: &str) -> String {
    format!("HTTP/1.1 {code} {reason}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")
}

fn chunked(chunks: &[&str]) -> String {
    let mut response = String::from(
        "HTTP/1.1 200 OK\r\n\
         Content-Type: application/x-ndjson\r\n\
         Transfer-Encoding: chunked\r\n\
         Connection: close\r\n\r\n",
    );
    for chunk in chunks {
        response.push_str(&format!("{:x}\r\n{chunk}\r\n", chunk.len()));
    }
    response.push_str("0\r\n\r\n");
    response
}

fn transport(config: &SyncConfig) -> HttpTransport {
    let client = reqwest::Client::builder().no_proxy().build().unwrap();
    HttpTransport::with_client(client, config, "t0")
}

async fn collect(response: FeedResponse) -> Vec<StreamMessage> {
    let chunks = match response {
        FeedResponse::Streaming(chunks) => chunks,
        other => panic!("expected a streaming body, got {other:?}"),
    };
    let mut reader = MessageStream::new(chunks);
    let mut messages = Vec::new();
    while let Some(message) = reader.next_message().await {
        messages.push(message.unwrap());
    }
    messages
}

#[tokio::test]
async fn rejected_cursor_status_is_invalid_cursor() {
    let (base_url, server) = serve(vec![empty(400, "Bad Request")]).await;
    let transport = transport(&SyncConfig::new("acme", base_url));

    let response = transport.open_feed(Some("abc 123")).await.unwrap();
    assert!(matches!(response, FeedResponse::InvalidCursor));

    let heads = server.await.unwrap();
    let head = heads[0].to_ascii_lowercase();
    assert!(head.starts_with("get /api/sync/stream?cursor=abc+123 http/1.1"));
    assert!(head.contains("authorization: bearer t0"));
    assert!(head.contains("accept: application/x-ndjson, application/json"));
}

#[tokio::test]
async fn other_failure_status_is_http_error() {
    let (base_url, server) = serve(vec![empty(503, "Service Unavailable")]).await;
    let transport = transport(&SyncConfig::new("acme", base_url));

    let error = transport.open_feed(None).await.unwrap_err();

    assert!(matches!(error, SyncError::Http { status: 503 }));
    assert!(error.is_retryable());
    assert!(transport.last_error().unwrap().contains("503"));

    let heads = server.await.unwrap();
    assert!(heads[0].starts_with("GET /api/sync/stream HTTP/1.1"));
}

#[tokio::test]
async fn streamed_body_decodes_across_chunk_boundaries() {
    let (base_url, server) = serve(vec![chunked(&[
        "{\"type\":\"upsert\",\"entity\":\"wh_teams\",",
        "\"id\":1,\"record\":{\"name\":\"Pumps\"}}\n{\"type\":\"do",
        "ne\",\"next_cursor\":\"c1\"}\n",
    ])])
    .await;
    let transport = transport(&SyncConfig::new("acme", base_url));

    let messages = collect(transport.open_feed(None).await.unwrap()).await;

    assert_eq!(
        messages,
        vec![
            StreamMessage::upsert("wh_teams", "1", json!({"name": "Pumps"})),
            StreamMessage::done("c1"),
        ]
    );
    assert!(transport.is_connected());
    server.await.unwrap();
}

#[tokio::test]
async fn buffered_mode_reads_whole_body() {
    let (base_url, server) = serve(vec![chunked(&[
        "{\"type\":\"checkpoint\",\"cursor\":\"c1\"}\n",
        "{\"type\":\"done\"}\n",
    ])])
    .await;
    let config = SyncConfig::new("acme", base_url).with_streaming(false);
    let transport = transport(&config);

    let response = transport.open_feed(Some("c0")).await.unwrap();

    let body = match response {
        FeedResponse::Buffered(body) => body,
        other => panic!("expected a buffered body, got {other:?}"),
    };
    assert_eq!(
        &body[..],
        b"{\"type\":\"checkpoint\",\"cursor\":\"c1\"}\n{\"type\":\"done\"}\n"
    );
    server.await.unwrap();
}

#[tokio::test]
async fn bootstrap_reports_non_success_status() {
    let (base_url, server) = serve(vec![
        empty(500, "Internal Server Error"),
        empty(204, "No Content"),
    ])
    .await;
    let transport = transport(&SyncConfig::new("acme", base_url));

    let error = transport.bootstrap().await.unwrap_err();
    assert!(matches!(error, SyncError::Http { status: 500 }));

    transport.bootstrap().await.unwrap();
    assert!(transport.last_error().is_none());

    let heads = server.await.unwrap();
    assert!(heads[0].starts_with("GET /api/bootstrap HTTP/1.1"));
    assert!(heads[1].to_ascii_lowercase().contains("content-type: application/json"));
}

#[tokio::test]
async fn engine_rebuilds_after_server_rejects_cursor() {
    let (base_url, server) = serve(vec![
        empty(200, "OK"),
        empty(400, "Bad Request"),
        chunked(&[
            "{\"type\":\"upsert\",\"entity\":\"wh_teams\",\"id\":9,\"record\":{\"id\":9}}\n",
            "{\"type\":\"done\",\"next_cursor\":\"c9\"}\n",
        ]),
    ])
    .await;
    let config = SyncConfig::new("acme", base_url);
    let store = Arc::new(LocalStore::open_in_memory().unwrap());
    store.upsert("wh_teams", "1", &json!({"id": 1})).unwrap();
    store.set_meta(&config.cursor_key(), "stale").unwrap();
    let engine = SyncEngine::new(config.clone(), store, transport(&config)).unwrap();

    let report = engine.bootstrap_and_sync().await.unwrap();

    assert!(report.success);
    assert!(report.full_reset);
    let ids: Vec<String> = engine
        .store()
        .get_ids("wh_teams")
        .unwrap()
        .into_iter()
        .collect();
    assert_eq!(ids, vec!["9"]);
    assert_eq!(
        engine.store().get_meta(&config.cursor_key()).unwrap().as_deref(),
        Some("c9")
    );

    let heads = server.await.unwrap();
    assert!(heads[1].starts_with("GET /api/sync/stream?cursor=stale HTTP/1.1"));
    assert!(heads[2].starts_with("GET /api/sync/stream HTTP/1.1"));
}
