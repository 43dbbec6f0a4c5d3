//! Minimal browser debug-protocol client.
//!
//! Commands are request/response over one WebSocket; events are fanned out
//! to subscribers. One client serves one browser session.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot, Mutex};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

use crate::error::{RecorderError, RecorderResult};

/// Per-command response deadline.
const COMMAND_TIMEOUT: Duration = Duration::from_secs(10);

/// Event fan-out buffer; stale subscribers miss frames rather than block.
const EVENT_BUFFER: usize = 256;

#[derive(Debug, Serialize)]
struct CdpRequest<'a> {
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Debug, Deserialize)]
struct CdpResponse {
    id: Option<u64>,
    method: Option<String>,
    #[serde(default)]
    params: Value,
    result: Option<Value>,
    error: Option<CdpErrorBody>,
}

#[derive(Debug, Deserialize)]
struct CdpErrorBody {
    message: String,
}

/// A protocol event (e.g. `Page.screencastFrame`).
#[derive(Debug, Clone)]
pub struct CdpEvent {
    pub method: String,
    pub params: Value,
}

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<Value, String>>>>>;

/// Debug-protocol connection to one browser session.
#[derive(Clone)]
pub struct CdpClient {
    cmd_tx: mpsc::Sender<Message>,
    pending: PendingMap,
    next_id: Arc<AtomicU64>,
    events: broadcast::Sender<CdpEvent>,
}

impl CdpClient {
    /// Connect to the session's debug WebSocket.
    pub async fn connect(ws_url: &str) -> RecorderResult<Self> {
        let (socket, _) = connect_async(ws_url).await?;
        let (mut sink, mut stream) = socket.split();

        let (cmd_tx, mut cmd_rx) = mpsc::channel::<Message>(64);
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let (events, _) = broadcast::channel(EVENT_BUFFER);

        // Writer task: serializes all outgoing traffic.
        tokio::spawn(async move {
            while let Some(msg) = cmd_rx.recv().await {
                if sink.send(msg).await.is_err() {
                    break;
                }
            }
        });

        // Reader task: routes responses to callers, events to subscribers.
        let pending_reader = Arc::clone(&pending);
        let events_reader = events.clone();
        tokio::spawn(async move {
            while let Some(message) = stream.next().await {
                let text = match message {
                    Ok(Message::Text(text)) => text,
                    Ok(Message::Close(_)) | Err(_) => break,
                    Ok(_) => continue,
                };

                let response: CdpResponse = match serde_json::from_str(&text) {
                    Ok(r) => r,
                    Err(e) => {
                        warn!("Unparseable protocol message: {}", e);
                        continue;
                    }
                };

                if let Some(id) = response.id {
                    if let Some(tx) = pending_reader.lock().await.remove(&id) {
                        let result = match response.error {
                            Some(err) => Err(err.message),
                            None => Ok(response.result.unwrap_or(Value::Null)),
                        };
                        let _ = tx.send(result);
                    }
                } else if let Some(method) = response.method {
                    let _ = events_reader.send(CdpEvent {
                        method,
                        params: response.params,
                    });
                }
            }
            // Socket gone; fail any waiters.
            pending_reader.lock().await.clear();
        });

        Ok(Self {
            cmd_tx,
            pending,
            next_id: Arc::new(AtomicU64::new(1)),
            events,
        })
    }

    /// Issue a command and await its result.
    pub async fn call(&self, method: &str, params: Value) -> RecorderResult<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = CdpRequest { id, method, params };
        let payload = serde_json::to_string(&request)?;

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        debug!(method, id, "Protocol command");
        self.cmd_tx
            .send(Message::Text(payload))
            .await
            .map_err(|_| RecorderError::protocol("connection closed"))?;

        let result = tokio::time::timeout(COMMAND_TIMEOUT, rx).await;
        match result {
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(message))) => Err(RecorderError::protocol(format!("{method}: {message}"))),
            Ok(Err(_)) => Err(RecorderError::protocol(format!("{method}: channel dropped"))),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(RecorderError::protocol(format!("{method}: timed out")))
            }
        }
    }

    /// Send a command without awaiting its response (frame acks). The reader
    /// drops the eventual response as an unknown id.
    pub async fn notify(&self, method: &str, params: Value) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = CdpRequest { id, method, params };
        if let Ok(payload) = serde_json::to_string(&request) {
            let _ = self.cmd_tx.send(Message::Text(payload)).await;
        }
    }

    /// Issue a command whose failure is tolerable; logs and returns whether
    /// it succeeded.
    pub async fn call_best_effort(&self, method: &str, params: Value) -> bool {
        match self.call(method, params).await {
            Ok(_) => true,
            Err(e) => {
                warn!(method, error = %e, "Best-effort protocol command failed");
                false
            }
        }
    }

    /// Subscribe to protocol events.
    pub fn subscribe(&self) -> broadcast::Receiver<CdpEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_envelope() {
        let request = CdpRequest {
            id: 7,
            method: "Page.navigate",
            params: serde_json::json!({"url": "https://example.com"}),
        };
        let text = serde_json::to_string(&request).unwrap();
        assert!(text.contains("\"id\":7"));
        assert!(text.contains("\"method\":\"Page.navigate\""));
        assert!(text.contains("example.com"));
    }

    #[test]
    fn test_response_envelope_result() {
        let response: CdpResponse =
            serde_json::from_str(r#"{"id": 3, "result": {"frameId": "f1"}}"#).unwrap();
        assert_eq!(response.id, Some(3));
        assert!(response.error.is_none());
        assert_eq!(response.result.unwrap()["frameId"], "f1");
    }

    #[test]
    fn test_response_envelope_error() {
        let response: CdpResponse =
            serde_json::from_str(r#"{"id": 4, "error": {"code": -32000, "message": "nope"}}"#)
                .unwrap();
        assert_eq!(response.error.unwrap().message, "nope");
    }

    #[test]
    fn test_event_envelope() {
        let response: CdpResponse = serde_json::from_str(
            r#"{"method": "Page.screencastFrame", "params": {"data": "aGk=", "sessionId": 1}}"#,
        )
        .unwrap();
        assert_eq!(response.id, None);
        assert_eq!(response.method.as_deref(), Some("Page.screencastFrame"));
        assert_eq!(response.params["sessionId"], 1);
    }
}
