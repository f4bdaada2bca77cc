use bytes::{Bytes, BytesMut};
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder, LengthDelimitedCodec};

use super::message::IpcMessage;

// -----------------------------------------------------------------------------
// ----- Constants -------------------------------------------------------------

/// Upper bound for one frame. Stats for a large group stay far below this.
const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

// -----------------------------------------------------------------------------
// ----- IpcError --------------------------------------------------------------

#[derive(Debug, Error)]
pub enum IpcError {
    #[error("ipc io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed ipc message: {0}")]
    Json(#[from] serde_json::Error),
}

// -----------------------------------------------------------------------------
// ----- IpcCodec --------------------------------------------------------------

/// 4-byte big-endian length prefix followed by one JSON `IpcMessage`.
#[derive(Debug)]
pub struct IpcCodec {
    frames: LengthDelimitedCodec,
}

impl IpcCodec {
    pub fn new() -> Self {
        Self {
            frames: LengthDelimitedCodec::builder()
                .length_field_length(4)
                .max_frame_length(MAX_FRAME_SIZE)
                .new_codec(),
        }
    }
}

impl Default for IpcCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for IpcCodec {
    type Item = IpcMessage;
    type Error = IpcError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<IpcMessage>, IpcError> {
        match self.frames.decode(src)? {
            Some(frame) => Ok(Some(serde_json::from_slice(&frame)?)),
            None => Ok(None),
        }
    }
}

impl Encoder<IpcMessage> for IpcCodec {
    type Error = IpcError;

    fn encode(&mut self, msg: IpcMessage, dst: &mut BytesMut) -> Result<(), IpcError> {
        let body = serde_json::to_vec(&msg)?;
        self.frames.encode(Bytes::from(body), dst)?;
        Ok(())
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_is_length_prefixed_json() {
        let mut codec = IpcCodec::new();
        let mut buf = BytesMut::new();
        codec
            .encode(IpcMessage::Shutdown { code: 1000 }, &mut buf)
            .unwrap();

        let body = br#"{"op":"shutdown","data":{"code":1000}}"#;
        assert_eq!(&buf[..4], &(body.len() as u32).to_be_bytes());
        assert_eq!(&buf[4..], body);
    }

    #[test]
    fn partial_frames_wait_for_more_bytes() {
        let mut codec = IpcCodec::new();
        let mut full = BytesMut::new();
        codec
            .encode(IpcMessage::Handshake { shard_id: 9 }, &mut full)
            .unwrap();

        let mut partial = full.split_to(full.len() - 3);
        assert!(codec.decode(&mut partial).unwrap().is_none());

        partial.extend_from_slice(&full);
        assert_eq!(
            codec.decode(&mut partial).unwrap(),
            Some(IpcMessage::Handshake { shard_id: 9 })
        );
        assert!(partial.is_empty());
    }

    #[test]
    fn garbage_body_is_a_json_error() {
        let mut codec = IpcCodec::new();
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&3u32.to_be_bytes());
        buf.extend_from_slice(b"{x}");

        assert!(matches!(codec.decode(&mut buf), Err(IpcError::Json(_))));
    }
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
