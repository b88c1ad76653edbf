//! Minimal Chrome DevTools Protocol client over a target's debugging WebSocket.

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use super::BrowserError;

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<Value>>>>;
type Listeners = Arc<Mutex<HashMap<String, Vec<mpsc::Sender<Value>>>>>;

pub struct CdpClient {
    outgoing: mpsc::Sender<String>,
    pending: Pending,
    listeners: Listeners,
    next_id: AtomicU64,
    command_timeout: Duration,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl CdpClient {
    pub async fn connect(ws_url: &str, command_timeout: Duration) -> Result<Self, BrowserError> {
        let (stream, _) = connect_async(ws_url).await.map_err(|e| {
            BrowserError::Protocol(format!("failed to connect to {}: {}", ws_url, e))
        })?;
        let (mut sink, mut source) = stream.split();

        let (outgoing, mut queued) = mpsc::channel::<String>(64);
        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let listeners: Listeners = Arc::new(Mutex::new(HashMap::new()));

        let writer = tokio::spawn(async move {
            while let Some(text) = queued.recv().await {
                if let Err(e) = sink.send(Message::Text(text)).await {
                    tracing::warn!("DevTools write failed: {}", e);
                    break;
                }
            }
        });

        let reader = {
            let pending = pending.clone();
            let listeners = listeners.clone();
            tokio::spawn(async move {
                while let Some(message) = source.next().await {
                    match message {
                        Ok(Message::Text(text)) => {
                            let Ok(value) = serde_json::from_str::<Value>(&text) else {
                                continue;
                            };
                            dispatch(value, &pending, &listeners).await;
                        }
                        Ok(Message::Close(_)) => break,
                        Ok(_) => {}
                        Err(e) => {
                            tracing::debug!("DevTools connection closed: {}", e);
                            break;
                        }
                    }
                }
                // wake every waiter: dropping the senders fails their receivers
                pending.lock().await.clear();
                listeners.lock().await.clear();
            })
        };

        Ok(Self {
            outgoing,
            pending,
            listeners,
            next_id: AtomicU64::new(1),
            command_timeout,
            reader,
            writer,
        })
    }

    /// Send a command and wait for its `result`
    pub async fn send_command(&self, method: &str, params: Value) -> Result<Value, BrowserError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        let message = json!({ "id": id, "method": method, "params": params });
        if self.outgoing.send(message.to_string()).await.is_err() {
            self.pending.lock().await.remove(&id);
            return Err(BrowserError::Protocol("connection closed".to_string()));
        }

        match tokio::time::timeout(self.command_timeout, rx).await {
            Ok(Ok(response)) => command_result(method, response),
            Ok(Err(_)) => Err(BrowserError::Protocol(format!(
                "connection closed while waiting for {}",
                method
            ))),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(BrowserError::Protocol(format!(
                    "{} timed out after {} ms",
                    method,
                    self.command_timeout.as_millis()
                )))
            }
        }
    }

    /// Receive the params of every future `method` event
    pub async fn subscribe(&self, method: &str) -> mpsc::Receiver<Value> {
        let (tx, rx) = mpsc::channel(16);
        self.listeners
            .lock()
            .await
            .entry(method.to_string())
            .or_default()
            .push(tx);
        rx
    }

    pub async fn enable(&self, domain: &str) -> Result<(), BrowserError> {
        self.send_command(&format!("{}.enable", domain), json!({}))
            .await
            .map(|_| ())
    }
}

impl Drop for CdpClient {
    fn drop(&mut self) {
        self.reader.abort();
        self.writer.abort();
    }
}

async fn dispatch(value: Value, pending: &Pending, listeners: &Listeners) {
    if let Some(id) = value.get("id").and_then(Value::as_u64) {
        if let Some(waiter) = pending.lock().await.remove(&id) {
            let _ = waiter.send(value);
        }
    } else if let Some(method) = value.get("method").and_then(Value::as_str) {
        if let Some(senders) = listeners.lock().await.get(method) {
            let params = value.get("params").cloned().unwrap_or(Value::Null);
            for sender in senders {
                let _ = sender.try_send(params.clone());
            }
        }
    }
}

fn command_result(method: &str, mut response: Value) -> Result<Value, BrowserError> {
    if let Some(error) = response.get("error") {
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string());
        return Err(BrowserError::Protocol(format!("{}: {}", method, message)));
    }
    Ok(response
        .get_mut("result")
        .map(Value::take)
        .unwrap_or(Value::Null))
}
