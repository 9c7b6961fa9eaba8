//! Delimiter frame encoding/decoding
//!
//! Wire format: [UTF-8 payload][delimiter]
//! The delimiter may be any `char`; frames are split on its UTF-8 byte
//! sequence, which can never occur inside another encoded character.

use std::io;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::warn;

use crate::error::{Error, Result};

/// Encode a payload as one frame, rejecting payloads that contain the delimiter
pub fn encode_frame(payload: &str, delimiter: char) -> Result<Vec<u8>> {
    if payload.contains(delimiter) {
        return Err(Error::FramingViolation { delimiter });
    }

    let mut delim_buf = [0u8; 4];
    let delim = delimiter.encode_utf8(&mut delim_buf).as_bytes();

    let mut frame = Vec::with_capacity(payload.len() + delim.len());
    frame.extend_from_slice(payload.as_bytes());
    frame.extend_from_slice(delim);
    Ok(frame)
}

/// Write an encoded frame to a stream
pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, frame: &[u8]) -> io::Result<()> {
    writer.write_all(frame).await?;

    // Flush to ensure delivery
    writer.flush().await
}

/// Accumulates received bytes and splits them into delimiter-terminated frames
#[derive(Debug)]
pub struct FrameDecoder {
    delimiter: Vec<u8>,
    buffer: Vec<u8>,
    /// First buffer offset where a delimiter could still begin
    search_from: usize,
    max_pending: usize,
}

impl FrameDecoder {
    pub fn new(delimiter: char, max_pending: usize) -> Self {
        let mut delim_buf = [0u8; 4];
        Self {
            delimiter: delimiter.encode_utf8(&mut delim_buf).as_bytes().to_vec(),
            buffer: Vec::new(),
            search_from: 0,
            max_pending,
        }
    }

    /// Append a chunk and return every frame it completes, in order.
    ///
    /// Fails with `InvalidData` when the undelimited tail outgrows the limit.
    pub fn decode(&mut self, chunk: &[u8]) -> io::Result<Vec<String>> {
        self.buffer.extend_from_slice(chunk);

        let mut frames = Vec::new();
        let mut start = 0;
        while let Some(offset) = find(&self.buffer[self.search_from..], &self.delimiter) {
            let end = self.search_from + offset;
            frames.push(decode_text(&self.buffer[start..end]));
            start = end + self.delimiter.len();
            self.search_from = start;
        }

        self.buffer.drain(..start);
        self.search_from -= start;
        // A delimiter split across reads begins at most len - 1 bytes from the end
        let tail_start = (self.buffer.len() + 1).saturating_sub(self.delimiter.len());
        self.search_from = self.search_from.max(tail_start);

        if self.buffer.len() > self.max_pending {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "undelimited data exceeds {} bytes ({} pending)",
                    self.max_pending,
                    self.buffer.len()
                ),
            ));
        }

        Ok(frames)
    }

    /// Bytes received after the last delimiter
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    match needle {
        [byte] => haystack.iter().position(|b| b == byte),
        _ => haystack.windows(needle.len()).position(|w| w == needle),
    }
}

fn decode_text(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_owned(),
        Err(e) => {
            warn!(error = %e, len = bytes.len(), "Frame is not valid UTF-8, decoding lossily");
            String::from_utf8_lossy(bytes).into_owned()
        }
    }
}
