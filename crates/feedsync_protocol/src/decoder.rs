//! Line parsing and the push/pull decoder core.

use crate::error::ProtocolError;
use crate::message::StreamMessage;
use crate::splitter::LineSplitter;
use serde_json::Value;
use std::collections::VecDeque;
use tracing::debug;

/// Outcome of parsing one feed line.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedLine {
    /// A well-formed message of a known kind.
    Message(StreamMessage),
    /// An empty or whitespace-only line.
    Blank,
    /// Well-formed JSON naming a kind this decoder does not know.
    Unknown(String),
    /// Anything else.
    Malformed(ProtocolError),
}

/// Parses a single line (without its newline).
///
/// Surrounding whitespace, including a `\r` from CRLF framing, is ignored.
pub fn parse_line(line: &[u8]) -> ParsedLine {
    let trimmed = line.trim_ascii();
    if trimmed.is_empty() {
        return ParsedLine::Blank;
    }

    let value: Value = match serde_json::from_slice(trimmed) {
        Ok(value) => value,
        Err(e) => return ParsedLine::Malformed(ProtocolError::InvalidJson(e.to_string())),
    };

    let kind = match value.get("type").and_then(Value::as_str) {
        Some(kind) => kind.to_owned(),
        None => return ParsedLine::Malformed(ProtocolError::MissingType),
    };
    if !StreamMessage::KINDS.contains(&kind.as_str()) {
        return ParsedLine::Unknown(kind);
    }

    match serde_json::from_value(value) {
        Ok(message) => ParsedLine::Message(message),
        Err(e) => ParsedLine::Malformed(ProtocolError::InvalidMessage {
            kind,
            message: e.to_string(),
        }),
    }
}

/// Counters describing what a decoder has seen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecodeStats {
    /// Bytes fed in.
    pub bytes: u64,
    /// Complete lines, including blank and skipped ones.
    pub lines: u64,
    /// Messages yielded.
    pub messages: u64,
    /// Blank lines.
    pub blank: u64,
    /// Lines that failed to parse or exceeded the line limit.
    pub malformed: u64,
    /// Lines of an unknown kind.
    pub unknown: u64,
}

impl DecodeStats {
    /// Lines that were skipped rather than yielded.
    pub fn skipped(&self) -> u64 {
        self.malformed + self.unknown
    }
}

/// Push-in, pull-out decoder core shared by the sync and async readers.
///
/// Feed chunks with [`feed`](Self::feed), call [`finish`](Self::finish) once
/// the source is exhausted, and drain messages with
/// [`next_message`](Self::next_message).
#[derive(Debug, Default)]
pub struct Decoder {
    splitter: LineSplitter,
    pending: VecDeque<Vec<u8>>,
    stats: DecodeStats,
    finished: bool,
}

impl Decoder {
    /// Creates a decoder with the default line limit.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a decoder around a configured splitter.
    pub fn with_splitter(splitter: LineSplitter) -> Self {
        Self {
            splitter,
            ..Self::default()
        }
    }

    /// Feeds one chunk of input.
    pub fn feed(&mut self, chunk: &[u8]) {
        self.stats.bytes += chunk.len() as u64;
        self.pending.extend(self.splitter.push(chunk));
    }

    /// Marks the end of input, queueing any unterminated trailing line.
    pub fn finish(&mut self) {
        if !self.finished {
            self.finished = true;
            self.pending.extend(self.splitter.finish());
        }
    }

    /// Returns whether [`finish`](Self::finish) has been called.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Returns the next decodable message from the lines seen so far.
    ///
    /// Skips blank, malformed and unknown lines. Returns `None` once the
    /// queued lines are exhausted; more may follow after further input.
    pub fn next_message(&mut self) -> Option<StreamMessage> {
        while let Some(line) = self.pending.pop_front() {
            self.stats.lines += 1;
            match parse_line(&line) {
                ParsedLine::Message(message) => {
                    self.stats.messages += 1;
                    return Some(message);
                }
                ParsedLine::Blank => self.stats.blank += 1,
                ParsedLine::Unknown(kind) => {
                    self.stats.unknown += 1;
                    debug!(kind = %kind, "ignoring unknown feed message");
                }
                ParsedLine::Malformed(e) => {
                    self.stats.malformed += 1;
                    debug!(error = %e, len = line.len(), "skipping malformed feed line");
                }
            }
        }
        None
    }

    /// Returns the counters so far.
    pub fn stats(&self) -> DecodeStats {
        DecodeStats {
            malformed: self.stats.malformed + self.splitter.oversized(),
            ..self.stats
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_classifies_lines() {
        assert_eq!(parse_line(b""), ParsedLine::Blank);
        assert_eq!(parse_line(b"  \r"), ParsedLine::Blank);
        assert_eq!(
            parse_line(b"{\"type\":\"done\",\"next_cursor\":\"abc123\"}\r"),
            ParsedLine::Message(StreamMessage::done("abc123"))
        );
        assert_eq!(
            parse_line(b"{\"type\":\"heartbeat\"}"),
            ParsedLine::Unknown("heartbeat".into())
        );
        assert!(matches!(
            parse_line(b"{not json"),
            ParsedLine::Malformed(ProtocolError::InvalidJson(_))
        ));
        assert!(matches!(
            parse_line(b"[1,2,3]"),
            ParsedLine::Malformed(ProtocolError::MissingType)
        ));
        assert!(matches!(
            parse_line(b"{\"type\":\"upsert\",\"entity\":\"t\"}"),
            ParsedLine::Malformed(ProtocolError::InvalidMessage { .. })
        ));
    }

    #[test]
    fn invalid_utf8_is_malformed() {
        assert!(matches!(
            parse_line(b"{\"type\":\"checkpoint\",\"cursor\":\"\xff\"}"),
            ParsedLine::Malformed(_)
        ));
    }

    #[test]
    fn decoder_skips_garbage_between_messages() {
        let mut decoder = Decoder::new();
        decoder.feed(b"{\"type\":\"upsert\",\"entity\":\"t\",\"id\":1,\"record\":{}}\n");
        decoder.feed(b"garbage\n\n{\"type\":\"future_kind\"}\n");
        decoder.feed(b"{\"type\":\"delete\",\"entity\":\"t\",\"id\":\"1\"}");

        assert_eq!(
            decoder.next_message(),
            Some(StreamMessage::upsert("t", "1", json!({})))
        );
        assert_eq!(decoder.next_message(), None);

        decoder.finish();
        assert_eq!(
            decoder.next_message(),
            Some(StreamMessage::delete("t", "1"))
        );

        let stats = decoder.stats();
        assert_eq!(stats.lines, 5);
        assert_eq!(stats.messages, 2);
        assert_eq!(stats.blank, 1);
        assert_eq!(stats.malformed, 1);
        assert_eq!(stats.unknown, 1);
        assert_eq!(stats.skipped(), 2);
    }

    #[test]
    fn finish_is_idempotent() {
        let mut decoder = Decoder::new();
        decoder.feed(b"{\"type\":\"done\"}");
        decoder.finish();
        decoder.finish();
        assert!(decoder.is_finished());
        assert_eq!(
            decoder.next_message(),
            Some(StreamMessage::Done { next_cursor: None })
        );
        assert_eq!(decoder.next_message(), None);
    }

    #[test]
    fn oversized_lines_count_as_malformed() {
        let mut decoder = Decoder::with_splitter(LineSplitter::with_max_line(16));
        decoder.feed(b"{\"type\":\"checkpoint\",\"cursor\":\"way too long\"}\n{\"type\":\"done\"}\n");
        assert_eq!(
            decoder.next_message(),
            Some(StreamMessage::Done { next_cursor: None })
        );
        assert_eq!(decoder.stats().malformed, 1);
    }
}
