//! Newline framing for byte streams (watch feeds and logs).

use bytes::{Bytes, BytesMut};

/// Buffers partial lines across chunk boundaries.
#[derive(Debug, Default)]
pub struct LineBuffer {
    buf: BytesMut,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return every complete line it finished, without the
    /// trailing `\n` (a preceding `\r` is stripped too).
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Bytes> {
        self.buf.extend_from_slice(chunk);
        let mut out = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let mut line = self.buf.split_to(pos);
            let _ = self.buf.split_to(1); // drop '\n'
            if line.last() == Some(&b'\r') {
                line.truncate(line.len() - 1);
            }
            out.push(line.freeze());
        }
        out
    }

    /// Bytes held for an unfinished line.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// Take the unfinished tail, if any, when the stream ends.
    pub fn finish(&mut self) -> Option<Bytes> {
        if self.buf.is_empty() {
            None
        } else {
            Some(self.buf.split().freeze())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_lines_across_chunks_and_flushes_tail() {
        let mut lb = LineBuffer::new();
        let mut out: Vec<Bytes> = Vec::new();
        out.extend(lb.push(b"hello\nwor"));
        assert_eq!(lb.pending(), 3);
        out.extend(lb.push(b"ld\r\n"));
        out.extend(lb.push(b"tail"));
        out.extend(lb.finish());
        assert_eq!(out, vec![Bytes::from_static(b"hello"), Bytes::from_static(b"world"), Bytes::from_static(b"tail")]);
        assert!(lb.finish().is_none());
    }

    #[test]
    fn empty_lines_are_kept() {
        let mut lb = LineBuffer::new();
        assert_eq!(lb.push(b"\n\nx\n").len(), 3);
    }
}
