//! In-process hub and relay servers for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;

use hue_sensor_agent::AgentConfig;

/// Build a config pointing at the given hub and relay.
pub fn agent_config(hub_url: &str, relay_url: &str, ids: (&str, &str, &str)) -> AgentConfig {
    let mut config = AgentConfig {
        hue_url: hub_url.to_string(),
        motion_sensor_id: ids.0.to_string(),
        light_level_sensor_id: ids.1.to_string(),
        temperature_sensor_id: ids.2.to_string(),
        relay_url: relay_url.to_string(),
        ..Default::default()
    };
    config.poll.hub_timeout_ms = 2000;
    config.poll.relay_timeout_ms = 2000;
    config
}

/// Serve `body` on `GET /sensors`.
pub async fn spawn_hub(body: impl Into<String>) -> String {
    spawn_hub_with_status(200, body).await
}

/// Serve `body` on `GET /sensors` with the given status code.
pub async fn spawn_hub_with_status(status: u16, body: impl Into<String>) -> String {
    let status = StatusCode::from_u16(status).unwrap();
    let body = body.into();
    let router = Router::new().route(
        "/sensors",
        get(move || {
            let body = body.clone();
            async move { (status, [("content-type", "application/json")], body) }
        }),
    );

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });

    format!("http://{}", addr)
}

/// An address nothing listens on.
pub async fn unused_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{}", addr)
}

/// A request captured by [`spawn_recording_relay`].
#[derive(Debug, Clone)]
pub struct Recorded {
    pub content_type: Option<String>,
    pub body: serde_json::Value,
}

pub type Recordings = Arc<Mutex<Vec<Recorded>>>;

async fn record(State(recordings): State<Recordings>, headers: HeaderMap, body: Bytes) -> StatusCode {
    let content_type = headers
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let body = serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);

    recordings.lock().await.push(Recorded { content_type, body });
    StatusCode::NO_CONTENT
}

/// Relay endpoint that records every POSTed report.
pub async fn spawn_recording_relay() -> (String, Recordings) {
    let recordings: Recordings = Arc::new(Mutex::new(Vec::new()));
    let router = Router::new()
        .route("/report", post(record))
        .with_state(recordings.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });

    (format!("http://{}/report", addr), recordings)
}

/// What a scripted server does with one connection.
#[derive(Debug, Clone, Copy)]
pub enum Behavior {
    /// Read the request, then close without answering.
    Close,
    /// Read the request and answer with this status code.
    Respond(u16),
    /// Read the request and never answer.
    Hang,
    /// Announce a 100 byte body, send part of it, then close.
    Truncated,
}

/// Raw TCP server handling connection `n` with `script[n]` (the last entry
/// repeats). Returns the relay URL and a connection counter.
pub async fn spawn_scripted_server(script: Vec<Behavior>) -> (String, Arc<AtomicUsize>) {
    let (addr, connections) = spawn_scripted(script).await;
    (format!("http://{}/report", addr), connections)
}

/// Scripted server used as a hub. Returns the hub base URL.
pub async fn spawn_scripted_hub(script: Vec<Behavior>) -> String {
    let (addr, _) = spawn_scripted(script).await;
    format!("http://{}", addr)
}

async fn spawn_scripted(script: Vec<Behavior>) -> (SocketAddr, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();
    let connections = Arc::new(AtomicUsize::new(0));
    let counter = connections.clone();

    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                break;
            };
            let index = counter.fetch_add(1, Ordering::SeqCst);
            let behavior = script
                .get(index)
                .or_else(|| script.last())
                .copied()
                .unwrap_or(Behavior::Close);

            tokio::spawn(async move {
                if read_request(&mut stream).await.is_err() {
                    return;
                }
                match behavior {
                    Behavior::Close => drop(stream),
                    Behavior::Respond(status) => {
                        let response = format!(
                            "HTTP/1.1 {} Status\r\ncontent-length: 0\r\nconnection: close\r\n\r\n",
                            status
                        );
                        let _ = stream.write_all(response.as_bytes()).await;
                        let _ = stream.shutdown().await;
                    }
                    Behavior::Hang => {
                        tokio::time::sleep(Duration::from_secs(60)).await;
                        drop(stream);
                    }
                    Behavior::Truncated => {
                        let response = concat!(
                            "HTTP/1.1 200 OK\r\n",
                            "content-type: application/json\r\n",
                            "content-length: 100\r\n\r\n",
                            r#"{"1": {"State""#,
                        );
                        let _ = stream.write_all(response.as_bytes()).await;
                        let _ = stream.shutdown().await;
                    }
                }
            });
        }
    });

    (addr, connections)
}

/// Read one HTTP/1.1 request, headers and body, so closing the socket
/// afterwards is a clean end of stream for the client.
async fn read_request(stream: &mut TcpStream) -> std::io::Result<()> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];

    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Ok(());
        }
        buf.extend_from_slice(&chunk[..n]);

        if let Some(header_end) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            let headers = String::from_utf8_lossy(&buf[..header_end]).to_ascii_lowercase();
            let content_length = headers
                .lines()
                .find_map(|line| line.strip_prefix("content-length:"))
                .and_then(|value| value.trim().parse::<usize>().ok())
                .unwrap_or(0);

            if buf.len() >= header_end + 4 + content_length {
                return Ok(());
            }
        }
    }
}
