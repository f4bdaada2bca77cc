use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::errors::GatewayError;

// -----------------------------------------------------------------------------
// ----- Frames ----------------------------------------------------------------

/// What the connection reads from a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Text(String),
    Binary(Bytes),
    /// The remote closed the socket. `code` is `None` when no close frame was received.
    Closed { code: Option<u16> },
    Error(String),
}

/// What the connection writes to a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Text(String),
    /// Graceful close with a close frame.
    Close { code: u16 },
    /// Drop the socket without a close handshake.
    Terminate,
}

// -----------------------------------------------------------------------------
// ----- Transport -------------------------------------------------------------

/// One open socket as seen by a shard connection: a writer queue and a reader
/// queue. The socket itself is driven by tasks owned by the `Connector`.
#[derive(Debug)]
pub struct Transport {
    outbound: mpsc::UnboundedSender<Outbound>,
    inbound: mpsc::UnboundedReceiver<Inbound>,
}

/// The far side of a `Transport`. Socket tasks and in-memory gateways hold this.
#[derive(Debug)]
pub struct TransportPeer {
    pub inbound: mpsc::UnboundedSender<Inbound>,
    pub outbound: mpsc::UnboundedReceiver<Outbound>,
}

// -----------------------------------------------------------------------------
// ----- Transport: Static -----------------------------------------------------

impl Transport {
    pub fn channel() -> (Transport, TransportPeer) {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();

        let transport = Transport {
            outbound: out_tx,
            inbound: in_rx,
        };
        let peer = TransportPeer {
            inbound: in_tx,
            outbound: out_rx,
        };
        (transport, peer)
    }
}

// -----------------------------------------------------------------------------
// ----- Transport: Public -----------------------------------------------------

impl Transport {
    pub fn send(&self, frame: Outbound) -> Result<(), GatewayError> {
        self.outbound
            .send(frame)
            .map_err(|_| GatewayError::Transport("socket writer is gone".into()))
    }

    /// Next inbound frame. A vanished reader counts as a close without a code.
    pub async fn recv(&mut self) -> Inbound {
        self.inbound
            .recv()
            .await
            .unwrap_or(Inbound::Closed { code: None })
    }
}

// -----------------------------------------------------------------------------
// ----- Connector -------------------------------------------------------------

/// Opens transports. The WebSocket implementation lives in `net::websocket`;
/// tests plug in an in-memory gateway.
///
/// A transport that yields `Inbound::Error` is treated as dead: the shard
/// terminates it and reconnects, so nothing read after the error is seen.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self, url: &str) -> Result<Transport, GatewayError>;
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
