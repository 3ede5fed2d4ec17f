//! Incremental decoding of compressed response bodies.

use std::io::{self, Write};
use std::mem;

use flate2::write::{GzDecoder, ZlibDecoder};

/// Streaming decoder for a `content-encoding`d response body.
///
/// Bytes are fed in as DATA frames arrive and decoded output is drained
/// after every feed, so a large response never accumulates in memory. The
/// `deflate` token is the zlib-wrapped format per RFC 9110.
pub(crate) enum ContentDecoder {
    Gzip(GzDecoder<Vec<u8>>),
    Deflate(ZlibDecoder<Vec<u8>>),
}

impl ContentDecoder {
    /// Picks a decoder for a `content-encoding` value, `None` for anything
    /// other than `gzip` or `deflate` (matched case-insensitively).
    pub(crate) fn for_encoding(value: &str) -> Option<ContentDecoder> {
        let value = value.trim();
        if value.eq_ignore_ascii_case("gzip") {
            Some(ContentDecoder::Gzip(GzDecoder::new(Vec::new())))
        } else if value.eq_ignore_ascii_case("deflate") {
            Some(ContentDecoder::Deflate(ZlibDecoder::new(Vec::new())))
        } else {
            None
        }
    }

    /// Feeds one compressed chunk and returns whatever decoded output it
    /// produced. A malformed stream surfaces as an `io::Error`; the caller
    /// aborts the stream.
    pub(crate) fn feed(&mut self, chunk: &[u8]) -> io::Result<Vec<u8>> {
        match self {
            ContentDecoder::Gzip(decoder) => {
                decoder.write_all(chunk)?;
                decoder.flush()?;
                Ok(mem::take(decoder.get_mut()))
            }
            ContentDecoder::Deflate(decoder) => {
                decoder.write_all(chunk)?;
                decoder.flush()?;
                Ok(mem::take(decoder.get_mut()))
            }
        }
    }

    /// Finalizes the decoder at end of stream, returning any remaining
    /// output.
    pub(crate) fn finish(self) -> io::Result<Vec<u8>> {
        match self {
            ContentDecoder::Gzip(decoder) => decoder.finish(),
            ContentDecoder::Deflate(decoder) => decoder.finish(),
        }
    }
}
