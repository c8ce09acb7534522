// crates/server/src/jobs/lines.rs
//! Newline-delimited reader with a per-line size cap.
//!
//! `FramedRead` stops after the first codec error, which would end the whole
//! job on one oversized line. This drives `LinesCodec` by hand so an over-long
//! or non-UTF-8 line is skipped and reading continues.

use std::io;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::codec::{Decoder, LinesCodec, LinesCodecError};

/// Largest accepted stdout line.
pub const MAX_LINE_BYTES: usize = 512 * 1024;

const READ_CHUNK: usize = 8 * 1024;

pub struct BoundedLines<R> {
    reader: R,
    codec: LinesCodec,
    buf: BytesMut,
    eof: bool,
    skipped: usize,
}

impl<R: AsyncRead + Unpin> BoundedLines<R> {
    pub fn new(reader: R, max_line: usize) -> Self {
        Self {
            reader,
            codec: LinesCodec::new_with_max_length(max_line),
            buf: BytesMut::with_capacity(READ_CHUNK),
            eof: false,
            skipped: 0,
        }
    }

    /// Lines dropped so far for being too long or not UTF-8.
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    /// Next complete line without its terminator, or `None` at end of input.
    ///
    /// Cancel safe: bytes already read stay buffered if the future is dropped.
    pub async fn next_line(&mut self) -> io::Result<Option<String>> {
        loop {
            let decoded = if self.eof {
                self.codec.decode_eof(&mut self.buf)
            } else {
                self.codec.decode(&mut self.buf)
            };
            match decoded {
                Ok(Some(line)) => return Ok(Some(line)),
                Ok(None) if self.eof => return Ok(None),
                Ok(None) => {}
                Err(LinesCodecError::MaxLineLengthExceeded) => {
                    self.skipped += 1;
                    tracing::warn!(
                        max_bytes = self.codec.max_length(),
                        "stdout line exceeds limit, skipping"
                    );
                    continue;
                }
                Err(LinesCodecError::Io(e)) => {
                    self.skipped += 1;
                    tracing::warn!(error = %e, "undecodable stdout line, skipping");
                    continue;
                }
            }

            self.buf.reserve(READ_CHUNK);
            if self.reader.read_buf(&mut self.buf).await? == 0 {
                self.eof = true;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    async fn collect(input: &[u8], max: usize) -> (Vec<String>, usize) {
        let mut lines = BoundedLines::new(input, max);
        let mut out = Vec::new();
        while let Some(line) = lines.next_line().await.unwrap() {
            out.push(line);
        }
        (out, lines.skipped())
    }

    #[tokio::test]
    async fn test_splits_lines_and_keeps_trailing_partial() {
        let (lines, skipped) = collect(b"one\r\ntwo\n\nthree", 64).await;
        assert_eq!(lines, vec!["one", "two", "", "three"]);
        assert_eq!(skipped, 0);
    }

    #[tokio::test]
    async fn test_skips_over_long_line_and_continues() {
        let long = "x".repeat(100);
        let input = format!("short\n{long}\nafter\n");
        let (lines, skipped) = collect(input.as_bytes(), 16).await;
        assert_eq!(lines, vec!["short", "after"]);
        assert_eq!(skipped, 1);
    }

    #[tokio::test]
    async fn test_over_long_unterminated_tail_is_dropped() {
        let input = format!("ok\n{}", "y".repeat(50));
        let (lines, skipped) = collect(input.as_bytes(), 16).await;
        assert_eq!(lines, vec!["ok"]);
        assert_eq!(skipped, 1);
    }

    #[tokio::test]
    async fn test_invalid_utf8_line_is_skipped() {
        let (lines, skipped) = collect(b"a\n\xff\xfe\nb\n", 64).await;
        assert_eq!(lines, vec!["a", "b"]);
        assert_eq!(skipped, 1);
    }

    #[tokio::test]
    async fn test_empty_input() {
        let (lines, _) = collect(b"", 64).await;
        assert!(lines.is_empty());
    }
}
