//! A minimal inspector-protocol client over a raw WebSocket. Node's
//! inspector speaks CDP's `js_protocol` domains but isn't a browser, so the
//! typed commands come from chromiumoxide and the transport is our own.

use crate::{Error, Result};
use chromiumoxide::types::Command;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<Value>>>>>;

#[derive(Debug, Clone)]
pub struct CdpEvent {
    pub method: String,
    pub params: Value,
}

#[derive(Debug, Deserialize)]
struct InspectorTarget {
    #[serde(rename = "webSocketDebuggerUrl")]
    web_socket_debugger_url: String,
}

/// The WebSocket URL of the first debuggable target on `port`
pub async fn fetch_debugger_url(port: u16) -> Result<String> {
    let url = url::Url::parse(&format!("http://127.0.0.1:{}/json/list", port))?;
    let targets: Vec<InspectorTarget> = reqwest::get(url).await?.json().await?;
    targets
        .into_iter()
        .next()
        .map(|t| t.web_socket_debugger_url)
        .ok_or(Error::NoTarget(port))
}

pub struct CdpClient {
    outgoing: mpsc::UnboundedSender<Message>,
    pending: Pending,
    events: broadcast::Sender<CdpEvent>,
    disconnected: watch::Receiver<bool>,
    next_id: AtomicU64,
    tasks: Vec<JoinHandle<()>>,
}

impl CdpClient {
    pub async fn connect(ws_url: &str) -> Result<Self> {
        let (socket, _) = tokio_tungstenite::connect_async(ws_url).await?;
        tracing::debug!("Connected to inspector at {}", ws_url);

        let (mut sink, mut stream) = socket.split();
        let (outgoing, mut outgoing_rx) = mpsc::unbounded_channel::<Message>();
        let (events, _) = broadcast::channel(64);
        let (disconnected_tx, disconnected) = watch::channel(false);
        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));

        let writer = tokio::spawn(async move {
            while let Some(message) = outgoing_rx.recv().await {
                if let Err(e) = sink.send(message).await {
                    tracing::debug!("Inspector send failed: {}", e);
                    break;
                }
            }
        });

        let reader_pending = pending.clone();
        let reader_events = events.clone();
        let reader = tokio::spawn(async move {
            while let Some(message) = stream.next().await {
                match message {
                    Ok(Message::Text(text)) => {
                        dispatch(&text, &reader_pending, &reader_events);
                    }
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        tracing::debug!("Inspector connection error: {}", e);
                        break;
                    }
                }
            }

            // Dropping the senders fails every in-flight call
            reader_pending.lock().clear();
            let _ = disconnected_tx.send(true);
        });

        Ok(Self {
            outgoing,
            pending,
            events,
            disconnected,
            next_id: AtomicU64::new(1),
            tasks: vec![writer, reader],
        })
    }

    /// Send a typed command and wait for its typed reply
    pub async fn call<C>(&self, command: C) -> Result<C::Response>
    where
        C: Command,
        C::Response: DeserializeOwned,
    {
        let method = command.identifier().to_string();
        let params = serde_json::to_value(&command)?;
        let result = self.call_raw(&method, params).await?;
        Ok(serde_json::from_value(result)?)
    }

    pub async fn call_raw(&self, method: &str, params: Value) -> Result<Value> {
        if self.is_disconnected() {
            return Err(Error::Disconnected);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);

        let payload = json!({ "id": id, "method": method, "params": params });
        tracing::trace!("-> {}", payload);
        if self.outgoing.send(Message::Text(payload.to_string())).is_err() {
            self.pending.lock().remove(&id);
            return Err(Error::Disconnected);
        }

        rx.await.map_err(|_| Error::Disconnected)?
    }

    /// Subscribe before triggering whatever emits the event
    pub fn events(&self) -> broadcast::Receiver<CdpEvent> {
        self.events.subscribe()
    }

    /// The next `method` event on `events`, decoded
    pub async fn next_event<T: DeserializeOwned>(
        &self,
        events: &mut broadcast::Receiver<CdpEvent>,
        method: &str,
    ) -> Result<T> {
        let mut disconnected = self.disconnected.clone();
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Ok(event) if event.method == method => {
                        return Ok(serde_json::from_value(event.params)?);
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::debug!("Dropped {} inspector events", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => return Err(Error::Disconnected),
                },
                _ = disconnected.wait_for(|d| *d) => return Err(Error::Disconnected),
            }
        }
    }

    pub fn is_disconnected(&self) -> bool {
        *self.disconnected.borrow()
    }

    /// Resolves once the remote end has gone away
    pub async fn closed(&self) {
        let mut disconnected = self.disconnected.clone();
        let _ = disconnected.wait_for(|d| *d).await;
    }

    pub fn close(&self) {
        let _ = self.outgoing.send(Message::Close(None));
    }
}

impl Drop for CdpClient {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

fn dispatch(text: &str, pending: &Pending, events: &broadcast::Sender<CdpEvent>) {
    let message: Value = match serde_json::from_str(text) {
        Ok(message) => message,
        Err(e) => {
            tracing::debug!("Unparseable inspector message: {}", e);
            return;
        }
    };

    if let Some(id) = message.get("id").and_then(Value::as_u64) {
        let Some(reply) = pending.lock().remove(&id) else {
            return;
        };
        let result = match message.get("error") {
            Some(error) => Err(Error::Protocol(
                error
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown error")
                    .to_string(),
            )),
            None => Ok(message.get("result").cloned().unwrap_or(Value::Null)),
        };
        let _ = reply.send(result);
    } else if let Some(method) = message.get("method").and_then(Value::as_str) {
        let _ = events.send(CdpEvent {
            method: method.to_string(),
            params: message.get("params").cloned().unwrap_or(Value::Null),
        });
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chromiumoxide::cdp::js_protocol::runtime;
    use tokio::net::TcpListener;

    pub(crate) type Handler = Box<dyn Fn(&str, &Value) -> Vec<Value> + Send + Sync>;

    /// One-connection inspector. `handler` maps each request to the frames
    /// sent back: replies need the request id filled in via `reply`.
    pub(crate) async fn fake_inspector(handler: Handler) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut socket = tokio_tungstenite::accept_async(stream).await.unwrap();
            while let Some(Ok(message)) = socket.next().await {
                let text = match message {
                    Message::Text(text) => text,
                    Message::Close(_) => break,
                    _ => continue,
                };
                let request: Value = serde_json::from_str(&text).unwrap();
                let method = request["method"].as_str().unwrap_or_default().to_string();

                for mut frame in handler(&method, &request["params"]) {
                    if frame.get("id").is_some_and(|id| id.is_null()) {
                        frame["id"] = request["id"].clone();
                    }
                    if frame == Value::Null {
                        return;
                    }
                    socket.send(Message::Text(frame.to_string())).await.unwrap();
                }
            }
        });

        format!("ws://{}", addr)
    }

    /// A reply frame whose id is filled in by the fake inspector
    pub(crate) fn reply(result: Value) -> Value {
        json!({ "id": null, "result": result })
    }

    #[tokio::test]
    async fn test_typed_call_and_error() {
        let url = fake_inspector(Box::new(|method, _| match method {
            "Runtime.enable" => vec![reply(json!({}))],
            _ => vec![json!({ "id": null, "error": { "code": -32601, "message": "not found" } })],
        }))
        .await;
        let client = CdpClient::connect(&url).await.unwrap();

        client.call(runtime::EnableParams::default()).await.unwrap();
        let err = client.call_raw("Bogus.method", json!({})).await.unwrap_err();
        assert!(matches!(err, Error::Protocol(m) if m == "not found"));
    }

    #[tokio::test]
    async fn test_events_are_delivered() {
        let url = fake_inspector(Box::new(|_, _| {
            vec![
                json!({ "method": "Runtime.executionContextCreated", "params": {} }),
                json!({ "method": "Debugger.paused", "params": { "reason": "Break on start" } }),
                reply(json!({})),
            ]
        }))
        .await;
        let client = CdpClient::connect(&url).await.unwrap();
        let mut events = client.events();

        client.call_raw("Runtime.runIfWaitingForDebugger", json!({})).await.unwrap();
        let paused: Value = client.next_event(&mut events, "Debugger.paused").await.unwrap();
        assert_eq!(paused["reason"], "Break on start");
    }

    #[tokio::test]
    async fn test_disconnect_fails_pending_call() {
        let url = fake_inspector(Box::new(|_, _| vec![Value::Null])).await;
        let client = CdpClient::connect(&url).await.unwrap();

        let err = client.call_raw("Runtime.evaluate", json!({})).await.unwrap_err();
        assert!(matches!(err, Error::Disconnected));

        client.closed().await;
        assert!(client.is_disconnected());
        assert!(matches!(
            client.call_raw("Runtime.evaluate", json!({})).await,
            Err(Error::Disconnected)
        ));
    }
}
