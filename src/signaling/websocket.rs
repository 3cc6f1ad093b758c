use super::{RelayChannel, RelayConnector, RelayError, RelayLink, SignalMessage};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};
use url::Url;

/// Connects to a JSON-over-WebSocket relay.
#[derive(Debug, Default, Clone)]
pub struct WebSocketConnector;

pub struct WebSocketRelay {
    outbound: mpsc::UnboundedSender<Message>,
    connected: Arc<AtomicBool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

fn normalize_address(address: &str) -> Result<Url, RelayError> {
    let trimmed = address.trim();
    let with_scheme = match trimmed.split_once("://") {
        Some(("http", rest)) => format!("ws://{rest}"),
        Some(("https", rest)) => format!("wss://{rest}"),
        Some(_) => trimmed.to_owned(),
        None => format!("ws://{trimmed}"),
    };
    let url = Url::parse(&with_scheme).map_err(|err| RelayError::InvalidAddress {
        address: address.to_owned(),
        reason: err.to_string(),
    })?;
    match url.scheme() {
        "ws" | "wss" => Ok(url),
        other => Err(RelayError::InvalidAddress {
            address: address.to_owned(),
            reason: format!("unsupported scheme {other}"),
        }),
    }
}

#[async_trait]
impl RelayConnector for WebSocketConnector {
    async fn connect(&self, address: &str) -> Result<RelayLink, RelayError> {
        let url = normalize_address(address)?;
        let (stream, _) = connect_async(url.as_str())
            .await
            .map_err(|err| RelayError::Connect(err.to_string()))?;
        info!(relay = %url, "connected to relay");

        let (mut sink, mut source) = stream.split();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Message>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<SignalMessage>();
        let connected = Arc::new(AtomicBool::new(true));

        let writer_flag = connected.clone();
        let writer = tokio::spawn(async move {
            while let Some(frame) = out_rx.recv().await {
                let closing = matches!(frame, Message::Close(_));
                if let Err(err) = sink.send(frame).await {
                    warn!(error = %err, "relay send failed");
                    break;
                }
                if closing {
                    break;
                }
            }
            let _ = sink.close().await;
            writer_flag.store(false, Ordering::SeqCst);
            debug!("relay writer stopped");
        });

        let reader_flag = connected.clone();
        let reader = tokio::spawn(async move {
            while let Some(frame) = source.next().await {
                match frame {
                    Ok(Message::Text(text)) => match serde_json::from_str::<SignalMessage>(&text) {
                        Ok(message) => {
                            if in_tx.send(message).is_err() {
                                break;
                            }
                        }
                        Err(err) => warn!(error = %err, "dropping undecodable relay frame"),
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(err) => {
                        warn!(error = %err, "relay read failed");
                        break;
                    }
                }
            }
            reader_flag.store(false, Ordering::SeqCst);
            info!("disconnected from relay");
        });

        let relay = WebSocketRelay {
            outbound: out_tx,
            connected,
            tasks: Mutex::new(vec![writer, reader]),
        };
        Ok(RelayLink {
            channel: Arc::new(relay),
            inbound: in_rx,
        })
    }
}

#[async_trait]
impl RelayChannel for WebSocketRelay {
    async fn send(&self, message: SignalMessage) -> Result<(), RelayError> {
        if !self.is_connected() {
            return Err(RelayError::Closed);
        }
        let text = serde_json::to_string(&message)?;
        self.outbound
            .send(Message::Text(text))
            .map_err(|_| RelayError::Closed)
    }

    async fn disconnect(&self) -> Result<(), RelayError> {
        if !self.connected.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        let _ = self.outbound.send(Message::Close(None));
        let tasks = match self.tasks.lock() {
            Ok(mut guard) => std::mem::take(&mut *guard),
            Err(_) => Vec::new(),
        };
        // The writer drains the close frame on its own; the reader would wait
        // for the remote close indefinitely.
        for (index, task) in tasks.into_iter().enumerate() {
            if index == 0 {
                let _ = task.await;
            } else {
                task.abort();
            }
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}
