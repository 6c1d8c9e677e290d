//! Byte-moving side of the presence channel. The session only sees a
//! [`RelayLink`]: a pair of text frame queues, whatever carries them.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};
use tracing::{debug, warn};

use crate::error::ChatError;

/// Something received from the relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Frame(String),
    Closed { reason: Option<String> },
}

/// An open duplex connection to the relay. Dropping `outgoing` closes it;
/// `writer` finishes once every queued frame has been written.
pub struct RelayLink {
    pub outgoing: UnboundedSender<String>,
    pub incoming: UnboundedReceiver<Inbound>,
    pub writer: JoinHandle<()>,
}

/// Opens connections to the relay.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&self) -> Result<RelayLink, ChatError>;
}

/// Websocket transport backed by tokio-tungstenite.
pub struct WsTransport {
    url: String,
}

impl WsTransport {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn connect(&self) -> Result<RelayLink, ChatError> {
        let (ws, _) = connect_async(self.url.as_str()).await?;
        debug!(url = %self.url, "relay websocket connected");
        let (mut sink, mut stream) = ws.split();
        let (out_tx, mut out_rx) = unbounded_channel::<String>();
        let (in_tx, in_rx) = unbounded_channel();

        let writer = tokio::spawn(async move {
            while let Some(text) = out_rx.recv().await {
                if let Err(err) = sink.send(WsMessage::Text(text)).await {
                    warn!(error = %err, "relay write failed");
                    break;
                }
            }
            let _ = sink.close().await;
        });

        tokio::spawn(async move {
            let reason = loop {
                match stream.next().await {
                    Some(Ok(WsMessage::Text(text))) => {
                        if in_tx.send(Inbound::Frame(text)).is_err() {
                            return;
                        }
                    }
                    Some(Ok(WsMessage::Close(frame))) => {
                        break frame.map(|f| f.reason.into_owned());
                    }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => break Some(err.to_string()),
                    None => break None,
                }
            };
            let _ = in_tx.send(Inbound::Closed { reason });
        });

        Ok(RelayLink {
            outgoing: out_tx,
            incoming: in_rx,
            writer,
        })
    }
}

/// Far end of a [`MemoryTransport`] connection, driven by the test or
/// embedding code playing the relay.
pub struct MemoryPeer {
    pub from_client: UnboundedReceiver<String>,
    pub to_client: UnboundedSender<Inbound>,
}

impl MemoryPeer {
    /// Push a frame to the client.
    pub fn push(&self, frame: impl Into<String>) -> bool {
        self.to_client.send(Inbound::Frame(frame.into())).is_ok()
    }

    /// Simulate the relay dropping the connection.
    pub fn drop_connection(&self, reason: &str) {
        let _ = self.to_client.send(Inbound::Closed {
            reason: Some(reason.to_string()),
        });
    }
}

/// In-process transport used when running without a relay and in tests.
pub struct MemoryTransport {
    accepted: UnboundedSender<MemoryPeer>,
    refuse: AtomicBool,
    connects: Mutex<usize>,
}

impl MemoryTransport {
    /// Returns the transport and the queue on which each new connection's
    /// far end is delivered.
    pub fn new() -> (Self, UnboundedReceiver<MemoryPeer>) {
        let (tx, rx) = unbounded_channel();
        (
            Self {
                accepted: tx,
                refuse: AtomicBool::new(false),
                connects: Mutex::new(0),
            },
            rx,
        )
    }

    /// Make subsequent connection attempts fail.
    pub fn set_refuse(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    /// Number of successful connections so far.
    pub fn connects(&self) -> usize {
        *self.connects.lock()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn connect(&self) -> Result<RelayLink, ChatError> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(ChatError::Channel("connection refused".into()));
        }
        let (out_tx, mut out_rx) = unbounded_channel::<String>();
        let (peer_tx, peer_rx) = unbounded_channel();
        let (in_tx, in_rx) = unbounded_channel();
        self.accepted
            .send(MemoryPeer {
                from_client: peer_rx,
                to_client: in_tx,
            })
            .map_err(|_| ChatError::Channel("relay gone".into()))?;
        *self.connects.lock() += 1;
        let writer = tokio::spawn(async move {
            while let Some(text) = out_rx.recv().await {
                if peer_tx.send(text).is_err() {
                    break;
                }
            }
        });
        Ok(RelayLink {
            outgoing: out_tx,
            incoming: in_rx,
            writer,
        })
    }
}
