//! Streaming zlib inflater for `compress=zlib-stream` transports.
//!
//! The whole connection is one deflate stream. The gateway ends every logical
//! message with a sync flush, which shows up as the `00 00 FF FF` trailer on
//! the last chunk of that message.

use flate2::{Decompress, FlushDecompress, Status};
use serde::de::DeserializeOwned;

use crate::errors::GatewayError;

// -----------------------------------------------------------------------------
// ----- Constants -------------------------------------------------------------

pub const ZLIB_SUFFIX: [u8; 4] = [0x00, 0x00, 0xFF, 0xFF];

const OUTPUT_CHUNK: usize = 32 * 1024;

// -----------------------------------------------------------------------------
// ----- Inflater --------------------------------------------------------------

pub struct Inflater {
    decompress: Decompress,
    output: Vec<u8>,
    flushed: bool,
}

impl Inflater {
    pub fn new() -> Self {
        Self {
            decompress: Decompress::new(true),
            output: Vec::with_capacity(OUTPUT_CHUNK),
            flushed: false,
        }
    }
}

impl Default for Inflater {
    fn default() -> Self {
        Self::new()
    }
}

// -----------------------------------------------------------------------------
// ----- Inflater: Public ------------------------------------------------------

impl Inflater {
    /// Inflate one inbound chunk into the pending output.
    pub fn push(&mut self, chunk: &[u8]) -> Result<(), GatewayError> {
        let flush = if chunk.ends_with(&ZLIB_SUFFIX) {
            FlushDecompress::Sync
        } else {
            FlushDecompress::None
        };

        self.inflate(chunk, flush)?;
        self.flushed = matches!(flush, FlushDecompress::Sync);
        Ok(())
    }

    /// Try to parse the pending output.
    ///
    /// A parse failure before the flush marker arrived means the message is
    /// still incomplete and yields `Ok(None)`. After the marker it is a real
    /// error and the pending output is discarded.
    pub fn decode<T: DeserializeOwned>(&mut self) -> Result<Option<T>, serde_json::Error> {
        if self.output.is_empty() {
            return Ok(None);
        }

        match serde_json::from_slice(&self.output) {
            Ok(value) => {
                self.clear();
                Ok(Some(value))
            }
            Err(_) if !self.flushed => Ok(None),
            Err(err) => {
                self.clear();
                Err(err)
            }
        }
    }

    #[cfg(test)]
    pub fn pending(&self) -> &[u8] {
        &self.output
    }

    #[cfg(test)]
    pub fn is_flushed(&self) -> bool {
        self.flushed
    }

    pub fn clear(&mut self) {
        self.output.clear();
        self.flushed = false;
    }
}

// -----------------------------------------------------------------------------
// ----- Inflater: Private -----------------------------------------------------

impl Inflater {
    fn inflate(&mut self, input: &[u8], flush: FlushDecompress) -> Result<(), GatewayError> {
        let mut consumed = 0usize;

        loop {
            if self.output.capacity() - self.output.len() < OUTPUT_CHUNK / 4 {
                self.output.reserve(OUTPUT_CHUNK);
            }

            let in_before = self.decompress.total_in();
            let out_before = self.decompress.total_out();

            let status = self
                .decompress
                .decompress_vec(&input[consumed..], &mut self.output, flush)
                .map_err(|e| GatewayError::Decompress(e.to_string()))?;

            consumed += (self.decompress.total_in() - in_before) as usize;
            let produced = self.decompress.total_out() - out_before;
            let output_full = self.output.len() == self.output.capacity();

            match status {
                Status::StreamEnd => return Ok(()),
                Status::BufError if produced == 0 && !output_full => return Ok(()),
                _ => {}
            }

            if consumed >= input.len() && !output_full {
                return Ok(());
            }
        }
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
