//! Scripted HTTP server for exercising the client against canned responses.
#![allow(dead_code)]

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

pub struct Canned {
    pub content_type: &'static str,
    pub body: String,
}

impl Canned {
    pub fn sse(events: &[&str]) -> Self {
        let body = events
            .iter()
            .map(|data| format!("data: {data}\n\n"))
            .collect();
        Self {
            content_type: "text/event-stream",
            body,
        }
    }

    pub fn json(body: &str) -> Self {
        Self {
            content_type: "application/json",
            body: body.to_string(),
        }
    }
}

pub struct MockServer {
    pub base_url: String,
    pub requests: mpsc::UnboundedReceiver<serde_json::Value>,
}

/// Serve `responses` in order, one per connection, reporting each request body.
pub async fn serve(responses: Vec<Canned>) -> MockServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base_url = format!("http://{}", listener.local_addr().unwrap());
    let (tx, requests) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        for canned in responses {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };
            let body = read_request(&mut socket).await;
            let _ = tx.send(serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null));
            let head = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                canned.content_type,
                canned.body.len()
            );
            let _ = socket.write_all(head.as_bytes()).await;
            let _ = socket.write_all(canned.body.as_bytes()).await;
            let _ = socket.shutdown().await;
        }
    });

    MockServer { base_url, requests }
}

async fn read_request(socket: &mut TcpStream) -> Vec<u8> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let header_end = loop {
        let n = socket.read(&mut chunk).await.unwrap_or(0);
        if n == 0 {
            return Vec::new();
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };
    let head = String::from_utf8_lossy(&buf[..header_end]).to_ascii_lowercase();
    let length = head
        .lines()
        .find_map(|line| line.strip_prefix("content-length:"))
        .and_then(|value| value.trim().parse::<usize>().ok())
        .unwrap_or(0);
    while buf.len() < header_end + length {
        let n = socket.read(&mut chunk).await.unwrap_or(0);
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    buf[header_end..].to_vec()
}
