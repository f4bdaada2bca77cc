use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tracing::debug;

use super::transport::{Connector, Inbound, Outbound, Transport, TransportPeer};
use crate::errors::GatewayError;

// -----------------------------------------------------------------------------
// ----- WebSocketConnector ----------------------------------------------------

/// Real gateway sockets over tokio-tungstenite (TLS via rustls).
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketConnector;

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, url: &str) -> Result<Transport, GatewayError> {
        let (socket, _) = connect_async(url)
            .await
            .map_err(|e| GatewayError::Transport(format!("connect {url}: {e}")))?;

        let (sink, stream) = socket.split();
        let (transport, peer) = Transport::channel();
        let TransportPeer { inbound, outbound } = peer;

        let reader = tokio::spawn(read_loop(stream, inbound));
        spawn_writer_task(sink, outbound, reader.abort_handle());

        Ok(transport)
    }
}

// -----------------------------------------------------------------------------
// ----- Internal: Helpers -----------------------------------------------------

async fn read_loop<S>(mut stream: S, inbound: mpsc::UnboundedSender<Inbound>)
where
    S: futures::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    while let Some(next) = stream.next().await {
        let frame = match next {
            Ok(Message::Text(text)) => Inbound::Text(text.to_string()),
            Ok(Message::Binary(data)) => Inbound::Binary(data),
            Ok(Message::Close(frame)) => {
                let code = frame.map(|f| u16::from(f.code));
                let _ = inbound.send(Inbound::Closed { code });
                return;
            }
            Ok(_) => continue, // ping / pong / raw frames
            Err(err) => {
                let _ = inbound.send(Inbound::Error(err.to_string()));
                let _ = inbound.send(Inbound::Closed { code: None });
                return;
            }
        };

        if inbound.send(frame).is_err() {
            return;
        }
    }

    let _ = inbound.send(Inbound::Closed { code: None });
}

fn spawn_writer_task<S>(
    mut sink: S,
    mut rx: mpsc::UnboundedReceiver<Outbound>,
    reader: tokio::task::AbortHandle,
) where
    S: futures::Sink<Message, Error = tokio_tungstenite::tungstenite::Error>
        + Unpin
        + Send
        + 'static,
{
    tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let result = match frame {
                Outbound::Text(text) => sink.feed(Message::text(text)).await,
                Outbound::Close { code } => {
                    let close = CloseFrame {
                        code: CloseCode::from(code),
                        reason: "".into(),
                    };
                    let _ = sink.send(Message::Close(Some(close))).await;
                    break;
                }
                Outbound::Terminate => break,
            };

            if let Err(err) = result {
                debug!("gateway socket write failed: {err}");
                break;
            }

            // coalesce bursts into one flush
            while let Ok(more) = rx.try_recv() {
                match more {
                    Outbound::Text(text) => {
                        if sink.feed(Message::text(text)).await.is_err() {
                            break;
                        }
                    }
                    other => {
                        let _ = sink.flush().await;
                        if let Outbound::Close { code } = other {
                            let close = CloseFrame {
                                code: CloseCode::from(code),
                                reason: "".into(),
                            };
                            let _ = sink.send(Message::Close(Some(close))).await;
                        }
                        reader.abort();
                        return;
                    }
                }
            }

            if sink.flush().await.is_err() {
                break;
            }
        }

        reader.abort();
    });
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
