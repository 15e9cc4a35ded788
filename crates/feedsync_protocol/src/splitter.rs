//! Line reassembly over arbitrary byte chunks.

use std::mem;

/// Default upper bound for a single feed line.
pub const DEFAULT_MAX_LINE_BYTES: usize = 8 * 1024 * 1024; // 8 MB

/// Splits a chunked byte stream into newline-terminated lines.
///
/// Splitting works on bytes, not characters. `\n` never occurs inside a
/// multibyte UTF-8 sequence, so a chunk boundary in the middle of a
/// character is reassembled like any other split. UTF-8 is validated per
/// complete line by the parser.
///
/// Lines longer than the configured limit are dropped up to their
/// terminating newline and counted in [`oversized`](Self::oversized).
#[derive(Debug)]
pub struct LineSplitter {
    buffer: Vec<u8>,
    max_line: usize,
    discarding: bool,
    oversized: u64,
}

impl Default for LineSplitter {
    fn default() -> Self {
        Self::with_max_line(DEFAULT_MAX_LINE_BYTES)
    }
}

impl LineSplitter {
    /// Creates a splitter with the default line limit.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a splitter with a custom line limit.
    pub fn with_max_line(max_line: usize) -> Self {
        Self {
            buffer: Vec::new(),
            max_line,
            discarding: false,
            oversized: 0,
        }
    }

    /// Feeds one chunk and returns every line it completed, without the
    /// trailing newline.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Vec<u8>> {
        let mut lines = Vec::new();
        let mut rest = chunk;

        while let Some(pos) = rest.iter().position(|&b| b == b'\n') {
            let (head, tail) = (&rest[..pos], &rest[pos + 1..]);
            rest = tail;

            if self.discarding {
                self.discarding = false;
                continue;
            }
            if self.buffer.len() + head.len() > self.max_line {
                self.buffer.clear();
                self.oversized += 1;
                continue;
            }

            let mut line = mem::take(&mut self.buffer);
            line.extend_from_slice(head);
            lines.push(line);
        }

        if !self.discarding {
            if self.buffer.len() + rest.len() > self.max_line {
                self.buffer.clear();
                self.discarding = true;
                self.oversized += 1;
            } else {
                self.buffer.extend_from_slice(rest);
            }
        }
        lines
    }

    /// Signals end of input and returns the unterminated trailing line, if
    /// it holds anything other than whitespace.
    pub fn finish(&mut self) -> Option<Vec<u8>> {
        self.discarding = false;
        let tail = mem::take(&mut self.buffer);
        if tail.iter().all(u8::is_ascii_whitespace) {
            None
        } else {
            Some(tail)
        }
    }

    /// Bytes buffered for an incomplete line.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Number of lines dropped for exceeding the limit.
    pub fn oversized(&self) -> u64 {
        self.oversized
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn split_all(chunks: &[&[u8]]) -> Vec<Vec<u8>> {
        let mut splitter = LineSplitter::new();
        let mut lines: Vec<Vec<u8>> = chunks.iter().flat_map(|c| splitter.push(c)).collect();
        lines.extend(splitter.finish());
        lines
    }

    #[test]
    fn whole_lines_in_one_chunk() {
        assert_eq!(
            split_all(&[b"a\nbb\nccc\n"]),
            vec![b"a".to_vec(), b"bb".to_vec(), b"ccc".to_vec()]
        );
    }

    #[test]
    fn line_split_across_chunks() {
        assert_eq!(
            split_all(&[b"{\"ty", b"pe\":", b"\"done\"}\n{\"x\"", b":1}"]),
            vec![b"{\"type\":\"done\"}".to_vec(), b"{\"x\":1}".to_vec()]
        );
    }

    #[test]
    fn multibyte_character_split_across_chunks() {
        let text = "{\"name\":\"Zürich ✓\"}\n".as_bytes();
        let cut = text.iter().position(|&b| b == 0xC3).unwrap() + 1;
        let lines = split_all(&[&text[..cut], &text[cut..]]);
        assert_eq!(lines.len(), 1);
        assert_eq!(std::str::from_utf8(&lines[0]).unwrap(), "{\"name\":\"Zürich ✓\"}");
    }

    #[test]
    fn trailing_whitespace_is_not_a_line() {
        assert_eq!(split_all(&[b"a\n", b"  \r\n", b" \t"]), vec![b"a".to_vec(), b"  \r".to_vec()]);
    }

    #[test]
    fn empty_chunks_are_harmless() {
        assert_eq!(split_all(&[b"", b"a", b"", b"\n", b""]), vec![b"a".to_vec()]);
    }

    #[test]
    fn oversized_line_is_dropped() {
        let mut splitter = LineSplitter::with_max_line(4);
        let mut lines = splitter.push(b"ok\ntoo");
        lines.extend(splitter.push(b"-long"));
        lines.extend(splitter.push(b"-still\nfine\n"));

        assert_eq!(lines, vec![b"ok".to_vec(), b"fine".to_vec()]);
        assert_eq!(splitter.oversized(), 1);
        assert_eq!(splitter.buffered(), 0);
    }

    #[test]
    fn oversized_complete_line_in_one_chunk() {
        let mut splitter = LineSplitter::with_max_line(3);
        assert_eq!(splitter.push(b"abcdef\nxy\n"), vec![b"xy".to_vec()]);
        assert_eq!(splitter.oversized(), 1);
    }
}
