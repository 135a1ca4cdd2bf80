//! End-to-end streaming tests against a live proxy.
//!
//! The upstream here is a small axum app fed from a channel, so the tests
//! control exactly when each chunk is produced and can see when the proxy
//! lets go of the upstream connection.

mod common;

use std::time::Duration;

use axum::{body::Body, response::Response, routing::post, Router};
use bytes::Bytes;
use futures::StreamExt;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};

use chat_relay::api::spawn_server;
use common::{bearer, state_for, UPSTREAM_PATH};

const WAIT: Duration = Duration::from_secs(5);

/// Spawn an upstream whose response body is whatever is sent on the channel.
async fn channel_upstream() -> (String, mpsc::Receiver<mpsc::Sender<Bytes>>) {
    let (conn_tx, conn_rx) = mpsc::channel::<mpsc::Sender<Bytes>>(4);

    let app = Router::new().route(
        UPSTREAM_PATH,
        post(move || {
            let conn_tx = conn_tx.clone();
            async move {
                let (tx, rx) = mpsc::channel::<Bytes>(16);
                conn_tx.send(tx).await.ok();
                let stream = futures::stream::unfold(rx, |mut rx| async move {
                    rx.recv()
                        .await
                        .map(|chunk| (Ok::<_, std::io::Error>(chunk), rx))
                });
                Response::builder()
                    .header("content-type", "text/event-stream")
                    .body(Body::from_stream(stream))
                    .unwrap()
            }
        }),
    );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });

    (format!("http://{addr}"), conn_rx)
}

async fn post_chat(proxy: &str) -> reqwest::Response {
    reqwest::Client::new()
        .post(format!("http://{proxy}/v1/chat/completions"))
        .header("authorization", bearer())
        .json(&serde_json::json!({"model": "gpt-5.2", "messages": [{"role": "user", "content": "hi"}]}))
        .send()
        .await
        .expect("Failed to send request")
}

#[tokio::test]
async fn test_chunks_forwarded_as_they_arrive() {
    let (upstream, mut connections) = channel_upstream().await;
    let server = spawn_server("127.0.0.1:0", state_for(&upstream)).await.unwrap();

    let response = post_chat(&server.addr.to_string()).await;
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let upstream_tx = tokio::time::timeout(WAIT, connections.recv())
        .await
        .unwrap()
        .unwrap();

    let mut body = response.bytes_stream();
    let mut received = Vec::new();

    // The second chunk is only produced after the first one came through.
    let parts: [&[u8]; 3] = [b"data: {\"n\":1}\n\n", b"data: {\"n\":2}\n\n", b"data: [DONE]\n\n"];
    for part in parts {
        upstream_tx.send(Bytes::from_static(part)).await.unwrap();
        let mut got = Vec::new();
        while got.len() < part.len() {
            let chunk = tokio::time::timeout(WAIT, body.next())
                .await
                .expect("chunk was not relayed promptly")
                .unwrap()
                .unwrap();
            got.extend_from_slice(&chunk);
        }
        assert_eq!(got, part);
        received.extend_from_slice(&got);
    }

    drop(upstream_tx);
    assert!(tokio::time::timeout(WAIT, body.next()).await.unwrap().is_none());
    assert_eq!(
        received,
        b"data: {\"n\":1}\n\ndata: {\"n\":2}\n\ndata: [DONE]\n\n".to_vec()
    );

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_caller_disconnect_releases_upstream() {
    let (upstream, mut connections) = channel_upstream().await;
    let server = spawn_server("127.0.0.1:0", state_for(&upstream)).await.unwrap();

    let response = post_chat(&server.addr.to_string()).await;
    let upstream_tx = tokio::time::timeout(WAIT, connections.recv())
        .await
        .unwrap()
        .unwrap();

    upstream_tx
        .send(Bytes::from_static(b"data: first\n\n"))
        .await
        .unwrap();
    let mut body = response.bytes_stream();
    let first = tokio::time::timeout(WAIT, body.next()).await.unwrap().unwrap().unwrap();
    assert_eq!(&first[..], b"data: first\n\n");

    // Caller hangs up mid-stream; the upstream body must be dropped too.
    // Keep producing so both hops hit the closed sockets.
    drop(body);
    let released = tokio::time::timeout(WAIT, async {
        while upstream_tx
            .send(Bytes::from_static(b"data: more\n\n"))
            .await
            .is_ok()
        {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    assert!(
        released.is_ok(),
        "upstream stream was not released after caller disconnect"
    );

    server.stop().await.unwrap();
}

/// Read one HTTP/1.1 request (head plus `content-length` body).
async fn read_request(socket: &mut TcpStream) {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = socket.read(&mut chunk).await.unwrap();
        if n == 0 {
            return;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            let head = String::from_utf8_lossy(&buf[..end]).to_ascii_lowercase();
            let len = head
                .lines()
                .find_map(|line| line.strip_prefix("content-length:"))
                .and_then(|v| v.trim().parse::<usize>().ok())
                .unwrap_or(0);
            if buf.len() >= end + 4 + len {
                return;
            }
        }
    }
}

/// Upstream that answers 200 with one chunk, then drops the socket without
/// the terminating zero-length chunk once `close` fires.
async fn truncating_upstream(close: oneshot::Receiver<()>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        read_request(&mut socket).await;
        socket
            .write_all(
                b"HTTP/1.1 200 OK\r\n\
                  content-type: text/event-stream\r\n\
                  transfer-encoding: chunked\r\n\r\n\
                  d\r\ndata: first\n\n\r\n",
            )
            .await
            .unwrap();
        socket.flush().await.unwrap();
        close.await.ok();
        drop(socket);
    });

    format!("http://{addr}")
}

#[tokio::test]
async fn test_upstream_drop_mid_stream_ends_caller_stream_with_error() {
    let (close_tx, close_rx) = oneshot::channel();
    let upstream = truncating_upstream(close_rx).await;
    let server = spawn_server("127.0.0.1:0", state_for(&upstream)).await.unwrap();

    let response = post_chat(&server.addr.to_string()).await;
    // Headers were already sent; the status cannot change afterwards.
    assert_eq!(response.status(), reqwest::StatusCode::OK);

    let mut body = response.bytes_stream();
    let mut received = Vec::new();
    while received.len() < b"data: first\n\n".len() {
        let chunk = tokio::time::timeout(WAIT, body.next())
            .await
            .expect("first chunk was not relayed")
            .expect("stream ended before the first chunk")
            .expect("first chunk should arrive intact");
        received.extend_from_slice(&chunk);
    }
    assert_eq!(received, b"data: first\n\n");

    close_tx.send(()).unwrap();

    let mut saw_error = false;
    while let Some(item) = tokio::time::timeout(WAIT, body.next())
        .await
        .expect("stream did not terminate after upstream dropped")
    {
        match item {
            Ok(extra) => panic!("unexpected bytes after upstream drop: {extra:?}"),
            Err(_) => {
                saw_error = true;
                break;
            }
        }
    }
    assert!(saw_error, "caller stream ended cleanly instead of with an error");

    server.stop().await.unwrap();
}
