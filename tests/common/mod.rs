#![allow(dead_code)]

use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use serde_json::Value;
use std::net::TcpListener;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use url::Url;
use web_scraper::configuration::Settings;
use web_scraper::connectors::{BrowserConnector, BrowserError, BrowserHandle, PageHandle};

pub const PAGE_TEXT: &str = "Example Domain\nThis domain is for use in illustrative examples.";

/// Browser stand-in: `hang.test` never loads, `fail.test` fails navigation,
/// everything else renders `PAGE_TEXT`.
#[derive(Default)]
pub struct FakeBrowser {
    launches: AtomicUsize,
    closes: Arc<AtomicUsize>,
}

impl FakeBrowser {
    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BrowserConnector for FakeBrowser {
    async fn launch(&self) -> Result<Box<dyn BrowserHandle>, BrowserError> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeHandle {
            closes: self.closes.clone(),
        }))
    }
}

struct FakeHandle {
    closes: Arc<AtomicUsize>,
}

#[async_trait]
impl BrowserHandle for FakeHandle {
    async fn new_page(&mut self) -> Result<Box<dyn PageHandle>, BrowserError> {
        Ok(Box::new(FakePage))
    }

    async fn close(&mut self) -> Result<(), BrowserError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct FakePage;

#[async_trait]
impl PageHandle for FakePage {
    async fn goto(&self, url: &Url) -> Result<(), BrowserError> {
        match url.host_str() {
            Some("hang.test") => futures_util::future::pending().await,
            Some("fail.test") => Err(BrowserError::Navigation(format!(
                "net::ERR_NAME_NOT_RESOLVED at {}",
                url
            ))),
            _ => Ok(()),
        }
    }

    async fn inner_text(&self) -> Result<String, BrowserError> {
        Ok(PAGE_TEXT.to_string())
    }
}

pub struct TestApp {
    pub address: String,
    pub browser: Arc<FakeBrowser>,
}

impl TestApp {
    pub async fn post_message(&self, session_id: &str, message: &Value) -> reqwest::Response {
        reqwest::Client::new()
            .post(&format!("{}/messages?sessionId={}", self.address, session_id))
            .json(message)
            .send()
            .await
            .expect("Failed to execute request.")
    }
}

pub async fn spawn_app() -> TestApp {
    spawn_app_with_configuration(Settings::default()).await
}

pub async fn spawn_app_with_configuration(mut configuration: Settings) -> TestApp {
    let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to bind random port");
    let port = listener.local_addr().unwrap().port();
    configuration.app_port = port;

    let browser = Arc::new(FakeBrowser::default());
    let server = web_scraper::startup::run(listener, configuration, browser.clone())
        .await
        .expect("Failed to bind address.");
    let _ = tokio::spawn(server);

    TestApp {
        address: format!("http://127.0.0.1:{}", port),
        browser,
    }
}

#[derive(Debug)]
pub struct SseEvent {
    pub event: String,
    pub data: String,
}

type ChunkStream = Pin<Box<dyn Stream<Item = reqwest::Result<Vec<u8>>> + Send>>;

/// Minimal SSE reader over a streaming reqwest body
pub struct SseClient {
    pub session_id: String,
    chunks: ChunkStream,
    buffer: Vec<u8>,
}

impl SseClient {
    /// Open `/sse` and consume the endpoint handshake
    pub async fn connect(address: &str) -> SseClient {
        let response = reqwest::Client::new()
            .get(&format!("{}/sse", address))
            .send()
            .await
            .expect("Failed to open SSE stream.");

        assert!(response.status().is_success());
        assert_eq!(
            response.headers()["content-type"].to_str().unwrap(),
            "text/event-stream"
        );

        let mut client = SseClient {
            session_id: String::new(),
            chunks: Box::pin(response.bytes_stream().map(|chunk| chunk.map(|b| b.to_vec()))),
            buffer: Vec::new(),
        };

        let endpoint = client.next_event().await;
        assert_eq!(endpoint.event, "endpoint");
        client.session_id = endpoint
            .data
            .split("sessionId=")
            .nth(1)
            .expect("endpoint without sessionId")
            .to_string();

        client
    }

    /// Next event, skipping keep-alive comments
    pub async fn next_event(&mut self) -> SseEvent {
        loop {
            if let Some(event) = take_event(&mut self.buffer) {
                return event;
            }

            let chunk = tokio::time::timeout(Duration::from_secs(10), self.chunks.next())
                .await
                .expect("Timed out waiting for an SSE event")
                .expect("SSE stream ended")
                .expect("Failed to read SSE chunk");
            self.buffer.extend_from_slice(&chunk);
        }
    }

    /// Next `message` event parsed as JSON
    pub async fn next_message(&mut self) -> Value {
        let event = self.next_event().await;
        assert_eq!(event.event, "message");
        serde_json::from_str(&event.data).expect("message event is not JSON")
    }
}

/// Pop the first complete event off `buffer`, dropping comment frames.
/// Bytes are decoded only once a whole event is present, so characters split across
/// network chunks come out intact.
pub fn take_event(buffer: &mut Vec<u8>) -> Option<SseEvent> {
    while let Some(end) = buffer.windows(2).position(|w| w == b"\n\n") {
        let raw: Vec<u8> = buffer.drain(..end + 2).collect();
        let raw = String::from_utf8(raw).expect("SSE event is not UTF-8");
        if raw.starts_with(':') {
            continue;
        }

        let mut event = SseEvent {
            event: "message".to_string(),
            data: String::new(),
        };
        for line in raw.lines() {
            if let Some(name) = line.strip_prefix("event: ") {
                event.event = name.to_string();
            } else if let Some(data) = line.strip_prefix("data: ") {
                if !event.data.is_empty() {
                    event.data.push('\n');
                }
                event.data.push_str(data);
            }
        }
        return Some(event);
    }
    None
}
