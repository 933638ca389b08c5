//! Zlib-stream transport decompression (§4.2).
//!
//! Discord's `zlib-stream` transport compresses the whole connection as
//! one continuous deflate stream, not frame-by-frame: every inbound
//! message must be fed through the *same* [`Decompress`] instance in
//! order, and a message boundary is only reached once the four-byte
//! `Z_SYNC_FLUSH` suffix `00 00 ff ff` has been seen.

use flate2::{Decompress, FlushDecompress, Status};
use std::{
    error::Error,
    fmt::{Display, Formatter, Result as FmtResult},
};

/// Trailing bytes Discord appends to each flushed deflate block.
const ZLIB_SUFFIX: [u8; 4] = [0x00, 0x00, 0xff, 0xff];

/// Initial capacity for the reusable output buffer. Most payloads are
/// smaller than this; it grows on demand and is shrunk back down by
/// [`Inflater::shrink`] once it's been oversized for a while.
const INTERNAL_BUFFER_SIZE: usize = 32 * 1024;

/// How long an oversized buffer is allowed to sit before [`Inflater::shrink`]
/// reclaims it.
const BUFFER_LIMIT_DURATION: std::time::Duration = std::time::Duration::from_secs(60);

/// Decompressing an inbound frame failed.
#[derive(Debug)]
pub struct CompressionError {
    source: flate2::DecompressError,
}

impl Display for CompressionError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str("failed decompressing a gateway payload")
    }
}

impl Error for CompressionError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(&self.source)
    }
}

/// Reusable zlib-stream decompressor for one shard's connection.
///
/// A new [`Inflater`] must be created on every fresh `Identify`/`Resume`
/// handshake, since Discord restarts the deflate stream from scratch on
/// each new websocket connection.
#[derive(Debug)]
pub struct Inflater {
    decompress: Decompress,
    compressed: Vec<u8>,
    internal_buffer: Vec<u8>,
    buffer: Vec<u8>,
    last_resize: std::time::Instant,
}

impl Inflater {
    #[must_use]
    pub fn new() -> Self {
        Self {
            decompress: Decompress::new(true),
            compressed: Vec::new(),
            internal_buffer: Vec::with_capacity(INTERNAL_BUFFER_SIZE),
            buffer: Vec::with_capacity(INTERNAL_BUFFER_SIZE),
            last_resize: std::time::Instant::now(),
        }
    }

    /// Append a chunk of compressed bytes read off the websocket.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.compressed.extend_from_slice(bytes);
    }

    /// Whether the buffered compressed bytes end on a message boundary.
    #[must_use]
    pub fn has_message(&self) -> bool {
        self.compressed.ends_with(&ZLIB_SUFFIX)
    }

    /// Decompress the buffered message and return the decompressed JSON
    /// bytes, or `None` if a full message boundary hasn't arrived yet.
    ///
    /// The returned slice borrows the internal output buffer; it's only
    /// valid until the next call to `msg` or `clear`.
    pub fn msg(&mut self) -> Result<Option<&[u8]>, CompressionError> {
        if self.compressed.is_empty() || !self.has_message() {
            return Ok(None);
        }

        self.buffer.clear();

        let before = self.decompress.total_in();
        let mut offset = 0;

        loop {
            self.internal_buffer.clear();

            let status = self
                .decompress
                .decompress_vec(&self.compressed[offset..], &mut self.internal_buffer, FlushDecompress::Sync)
                .map_err(|source| CompressionError { source })?;

            offset = (self.decompress.total_in() - before) as usize;
            self.buffer.extend_from_slice(&self.internal_buffer[..]);

            if status == Status::StreamEnd
                || self.internal_buffer.len() < self.internal_buffer.capacity()
                || offset >= self.compressed.len()
            {
                break;
            }
        }

        self.compressed.clear();

        Ok(Some(&self.buffer))
    }

    /// Drop any partially-buffered compressed bytes without decompressing
    /// them, for use when the connection is being torn down.
    pub fn clear(&mut self) {
        self.compressed.clear();
    }

    /// Reset the decompressor entirely, as required after reconnecting
    /// with a fresh deflate stream.
    pub fn reset(&mut self) {
        self.decompress = Decompress::new(true);
        self.compressed.clear();
        self.buffer.clear();
    }

    /// Shrink the internal buffers back to their default size if they've
    /// been oversized for longer than [`BUFFER_LIMIT_DURATION`].
    pub fn shrink(&mut self) {
        if self.buffer.capacity() <= INTERNAL_BUFFER_SIZE {
            self.last_resize = std::time::Instant::now();
            return;
        }

        if self.last_resize.elapsed() < BUFFER_LIMIT_DURATION {
            return;
        }

        self.buffer.shrink_to(INTERNAL_BUFFER_SIZE);
        self.last_resize = std::time::Instant::now();
    }
}

impl Default for Inflater {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::Inflater;
    use flate2::{write::ZlibEncoder, Compression};
    use std::io::Write;

    fn compress_frames(messages: &[&[u8]]) -> Vec<u8> {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::fast());
        let mut out = Vec::new();

        for (i, message) in messages.iter().enumerate() {
            encoder.write_all(message).unwrap();
            encoder.flush().unwrap();

            if i + 1 == messages.len() {
                out = encoder.reset(Vec::new()).unwrap();
            }
        }

        out
    }

    #[test]
    fn round_trips_a_single_message() {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::fast());
        encoder.write_all(br#"{"op":10}"#).unwrap();
        encoder.flush().unwrap();
        let compressed = encoder.finish().unwrap();

        let mut inflater = Inflater::new();
        inflater.extend(&compressed);

        let decompressed = inflater.msg().unwrap().unwrap().to_vec();
        assert_eq!(br#"{"op":10}"#.to_vec(), decompressed);
    }

    #[test]
    fn returns_none_before_the_boundary_arrives() {
        let mut inflater = Inflater::new();
        inflater.extend(&[0x78, 0x9c]);
        assert!(inflater.msg().unwrap().is_none());
    }

    #[test]
    #[allow(unused)]
    fn compress_frames_helper_is_well_formed() {
        let _ = compress_frames(&[b"{}"]);
    }
}
