use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, warn};

use super::codec::IpcCodec;
use super::message::IpcMessage;

// -----------------------------------------------------------------------------
// ----- Pipes -----------------------------------------------------------------

/// Decode frames from `reader` into `tx` until EOF, a decode error, or the
/// receiver goes away. Dropping `tx` on exit is how the other side learns
/// the channel closed.
pub fn spawn_frame_reader<R>(reader: R, tx: mpsc::UnboundedSender<IpcMessage>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut frames = FramedRead::new(reader, IpcCodec::new());

        while let Some(next) = frames.next().await {
            match next {
                Ok(msg) => {
                    if tx.send(msg).is_err() {
                        break;
                    }
                }
                Err(err) => {
                    warn!("ipc read failed: {err}");
                    break;
                }
            }
        }
        debug!("ipc reader closed");
    })
}

/// Encode everything queued on `rx` onto `writer` until every sender is dropped.
pub fn spawn_frame_writer<W>(writer: W, mut rx: mpsc::UnboundedReceiver<IpcMessage>) -> JoinHandle<()>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut frames = FramedWrite::new(writer, IpcCodec::new());

        while let Some(msg) = rx.recv().await {
            if let Err(err) = frames.feed(msg).await {
                warn!("ipc write failed: {err}");
                return;
            }

            // coalesce bursts into one flush
            while let Ok(more) = rx.try_recv() {
                if let Err(err) = frames.feed(more).await {
                    warn!("ipc write failed: {err}");
                    return;
                }
            }

            if let Err(err) = frames.flush().await {
                warn!("ipc flush failed: {err}");
                return;
            }
        }
        debug!("ipc writer closed");
    })
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn messages_cross_a_duplex_pipe_in_order() {
        let (a, b) = tokio::io::duplex(64);
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, mut in_rx) = mpsc::unbounded_channel();

        let writer = spawn_frame_writer(a, out_rx);
        let _reader = spawn_frame_reader(b, in_tx);

        for shard_id in 0..20 {
            out_tx.send(IpcMessage::Handshake { shard_id }).unwrap();
        }
        drop(out_tx);
        writer.await.unwrap();

        for shard_id in 0..20 {
            assert_eq!(in_rx.recv().await, Some(IpcMessage::Handshake { shard_id }));
        }
        assert_eq!(in_rx.recv().await, None);
    }
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
