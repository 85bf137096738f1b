//! Reassembly of complete lines from arbitrarily split output chunks.

use bytes::{Buf, BytesMut};

/// Buffers raw output and yields complete lines.
///
/// Bytes after the last `\n` are held until the terminator arrives, so a
/// line (or a multi-byte character) split across chunks is emitted once and
/// intact. A held partial line that grows past `max_line_bytes` is emitted
/// as-is.
#[derive(Debug)]
pub struct LineAssembler {
    buf: BytesMut,
    max_line_bytes: usize,
}

impl LineAssembler {
    #[must_use]
    pub fn new(max_line_bytes: usize) -> Self {
        Self {
            buf: BytesMut::new(),
            max_line_bytes: max_line_bytes.max(1),
        }
    }

    /// Append a chunk and return every line it completes, oldest first.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);
        let mut lines = Vec::new();

        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let raw = self.buf.split_to(pos);
            self.buf.advance(1);
            lines.push(decode(&raw));
        }

        while self.buf.len() >= self.max_line_bytes {
            let raw = self.buf.split_to(self.max_line_bytes);
            lines.push(decode(&raw));
        }
        lines
    }

    /// Bytes of the line currently being held.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}

fn decode(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_line_is_held() {
        let mut asm = LineAssembler::new(1024);
        assert_eq!(asm.push(b"first\nsec"), vec!["first"]);
        assert_eq!(asm.pending(), 3);
        assert_eq!(asm.push(b"ond\nthird\n"), vec!["second", "third"]);
        assert_eq!(asm.pending(), 0);
    }

    #[test]
    fn test_crlf_and_empty_lines() {
        let mut asm = LineAssembler::new(1024);
        assert_eq!(asm.push(b"a\r\n\nb\r\n"), vec!["a", "", "b"]);
    }

    #[test]
    fn test_split_utf8_character() {
        let text = "caf\u{e9}\n".as_bytes();
        let mut asm = LineAssembler::new(1024);
        assert!(asm.push(&text[..4]).is_empty());
        assert_eq!(asm.push(&text[4..]), vec!["caf\u{e9}"]);
    }

    #[test]
    fn test_overlong_partial_is_flushed() {
        let mut asm = LineAssembler::new(4);
        assert_eq!(asm.push(b"abcdefghij"), vec!["abcd", "efgh"]);
        assert_eq!(asm.push(b"\n"), vec!["ij"]);
    }
}
