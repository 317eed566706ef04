use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;

use crate::core::chat_stream::{ChatClient, ClientConfig};

#[derive(Debug, Clone)]
pub struct CapturedRequest {
    pub request_line: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl CapturedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn json_body(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).expect("request body should be JSON")
    }
}

/// Raw bytes written back for one accepted connection.
pub struct MockReply {
    parts: Vec<Vec<u8>>,
    pause: Duration,
    hold_open: bool,
}

impl MockReply {
    pub fn status(status_line: &str, body: &str) -> Self {
        let raw = format!(
            "HTTP/1.1 {status_line}\r\ncontent-type: text/plain\r\nconnection: close\r\ncontent-length: {}\r\n\r\n{body}",
            body.len()
        );
        Self {
            parts: vec![raw.into_bytes()],
            pause: Duration::ZERO,
            hold_open: false,
        }
    }

    pub fn json(body: &str) -> Self {
        let raw = format!(
            "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\nconnection: close\r\ncontent-length: {}\r\n\r\n{body}",
            body.len()
        );
        Self {
            parts: vec![raw.into_bytes()],
            pause: Duration::ZERO,
            hold_open: false,
        }
    }

    /// An event-stream body delimited by connection close, written in the
    /// given pieces with a short pause between them.
    pub fn event_stream(parts: &[&[u8]]) -> Self {
        let mut all = vec![
            b"HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\nconnection: close\r\n\r\n"
                .to_vec(),
        ];
        all.extend(parts.iter().map(|part| part.to_vec()));
        Self {
            parts: all,
            pause: Duration::from_millis(10),
            hold_open: false,
        }
    }

    /// Like [`MockReply::event_stream`] but the connection stays open afterwards.
    pub fn held_event_stream(parts: &[&[u8]]) -> Self {
        Self {
            hold_open: true,
            ..Self::event_stream(parts)
        }
    }
}

pub struct MockServer {
    pub addr: std::net::SocketAddr,
    pub requests: Arc<Mutex<Vec<CapturedRequest>>>,
}

impl MockServer {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub async fn captured(&self) -> Vec<CapturedRequest> {
        self.requests.lock().await.clone()
    }
}

/// Serves one reply per accepted connection, in order.
pub async fn spawn_mock_server(replies: Vec<MockReply>) -> MockServer {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("listener should bind");
    let addr = listener.local_addr().expect("local addr should resolve");
    let requests = Arc::new(Mutex::new(Vec::new()));
    let captured = Arc::clone(&requests);

    tokio::spawn(async move {
        for reply in replies {
            let Ok((mut stream, _)) = listener.accept().await else {
                return;
            };
            let Ok(request) = read_http_request(&mut stream).await else {
                return;
            };
            captured.lock().await.push(request);

            for (index, part) in reply.parts.iter().enumerate() {
                if index > 0 && !reply.pause.is_zero() {
                    tokio::time::sleep(reply.pause).await;
                }
                if stream.write_all(part).await.is_err() {
                    break;
                }
                let _ = stream.flush().await;
            }

            if reply.hold_open {
                tokio::time::sleep(Duration::from_secs(30)).await;
            }
        }
    });

    MockServer { addr, requests }
}

/// An address nothing listens on.
pub async fn closed_port_url(path: &str) -> String {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("listener should bind");
    let addr = listener.local_addr().expect("local addr should resolve");
    drop(listener);
    format!("http://{addr}{path}")
}

pub fn test_client(base_url: &str, api_key: &str) -> ChatClient {
    let http = reqwest::Client::builder()
        .no_proxy()
        .build()
        .expect("http client should build");
    ChatClient::with_http_client(
        http,
        &ClientConfig {
            base_url: base_url.to_string(),
            api_key: api_key.to_string(),
        },
    )
    .expect("endpoint should resolve")
}

async fn read_http_request(stream: &mut TcpStream) -> Result<CapturedRequest, String> {
    let mut buffer = Vec::new();
    let mut chunk = [0_u8; 1024];
    let header_end = loop {
        if let Some(pos) = buffer.windows(4).position(|window| window == b"\r\n\r\n") {
            break pos + 4;
        }
        let read = stream.read(&mut chunk).await.map_err(|err| err.to_string())?;
        if read == 0 {
            return Err("Unexpected EOF while reading HTTP headers".to_string());
        }
        buffer.extend_from_slice(&chunk[..read]);
    };

    let head = String::from_utf8_lossy(&buffer[..header_end]).to_string();
    let mut lines = head.split("\r\n");
    let request_line = lines.next().unwrap_or_default().to_string();
    let mut headers = Vec::new();
    let mut content_length = 0;
    for line in lines {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim().to_string();
        if name.eq_ignore_ascii_case("content-length") {
            content_length = value.parse::<usize>().map_err(|err| err.to_string())?;
        }
        headers.push((name.trim().to_string(), value));
    }

    let mut body = buffer[header_end..].to_vec();
    while body.len() < content_length {
        let read = stream.read(&mut chunk).await.map_err(|err| err.to_string())?;
        if read == 0 {
            return Err("Unexpected EOF while reading HTTP body".to_string());
        }
        body.extend_from_slice(&chunk[..read]);
    }
    body.truncate(content_length);

    Ok(CapturedRequest {
        request_line,
        headers,
        body,
    })
}
