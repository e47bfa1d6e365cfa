//! Splits an arbitrarily chunked byte stream into lines.

use bytes::{Bytes, BytesMut};

/// Incremental line splitter.
///
/// Lines end at `\n`; a single `\r` right before it is dropped. Chunk
/// boundaries may fall anywhere, including between the `\r` and the `\n`.
#[derive(Debug, Default)]
pub struct LineDecoder {
    buffer: BytesMut,
    // Bytes of `buffer` already known to contain no `\n`.
    scanned: usize,
}

impl LineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Pop the next complete line, without its terminator.
    pub fn next_line(&mut self) -> Option<Bytes> {
        let offset = self.buffer[self.scanned..].iter().position(|b| *b == b'\n');
        let Some(offset) = offset else {
            self.scanned = self.buffer.len();
            return None;
        };

        let newline = self.scanned + offset;
        self.scanned = 0;
        let mut line = self.buffer.split_to(newline + 1);
        line.truncate(newline);
        strip_cr(&mut line);
        Some(line.freeze())
    }

    /// Take whatever is left once the input has ended.
    pub fn finish(&mut self) -> Option<Bytes> {
        self.scanned = 0;
        if self.buffer.is_empty() {
            return None;
        }
        let mut line = self.buffer.split();
        strip_cr(&mut line);
        Some(line.freeze())
    }

    /// Bytes held back waiting for a line terminator.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}

fn strip_cr(line: &mut BytesMut) {
    if line.last() == Some(&b'\r') {
        line.truncate(line.len() - 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(decoder: &mut LineDecoder) -> Vec<Bytes> {
        std::iter::from_fn(|| decoder.next_line()).collect()
    }

    #[test]
    fn test_splits_lines() {
        let mut decoder = LineDecoder::new();
        decoder.push(b"a\nbc\n\nd");
        assert_eq!(drain(&mut decoder), vec!["a", "bc", ""]);
        assert_eq!(decoder.buffered(), 1);
        assert_eq!(decoder.finish().as_deref(), Some(&b"d"[..]));
        assert!(decoder.finish().is_none());
    }

    #[test]
    fn test_strips_crlf() {
        let mut decoder = LineDecoder::new();
        decoder.push(b"data: x\r\n\r\n");
        assert_eq!(drain(&mut decoder), vec!["data: x", ""]);
    }

    #[test]
    fn test_crlf_split_across_chunks() {
        let mut decoder = LineDecoder::new();
        decoder.push(b"event: a\r");
        assert!(decoder.next_line().is_none());
        decoder.push(b"\nda");
        assert_eq!(decoder.next_line().as_deref(), Some(&b"event: a"[..]));
        assert!(decoder.next_line().is_none());
        decoder.push(b"ta: b\n");
        assert_eq!(decoder.next_line().as_deref(), Some(&b"data: b"[..]));
    }

    #[test]
    fn test_byte_at_a_time() {
        let mut decoder = LineDecoder::new();
        let mut lines = Vec::new();
        for b in b"id: 1\ndata: two\n\n" {
            decoder.push(std::slice::from_ref(b));
            lines.extend(drain(&mut decoder));
        }
        assert_eq!(lines, vec!["id: 1", "data: two", ""]);
    }

    #[test]
    fn test_only_one_cr_stripped() {
        let mut decoder = LineDecoder::new();
        decoder.push(b"x\r\r\n");
        assert_eq!(decoder.next_line().as_deref(), Some(&b"x\r"[..]));
    }
}
