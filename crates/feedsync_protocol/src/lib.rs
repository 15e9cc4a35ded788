//! # feedsync Protocol
//!
//! Message types and the streaming decoder for the change feed.
//!
//! The feed is UTF-8 text with one JSON object per line. Every object carries
//! a `type` naming one of the [`StreamMessage`] kinds:
//!
//! ```text
//! {"type":"snapshot_start","entity":"wh_teams"}
//! {"type":"upsert","entity":"wh_teams","id":7,"record":{"id":7,"name":"Ops"}}
//! {"type":"snapshot_end","entity":"wh_teams"}
//! {"type":"done","next_cursor":"abc123"}
//! ```
//!
//! Decoding is pull-based and independent of the byte source:
//! - [`LineSplitter`] reassembles lines from arbitrary chunks
//! - [`parse_line`] turns one line into a typed message
//! - [`MessageReader`] pulls from any iterator of chunks
//! - [`MessageStream`] pulls from any async stream of chunks
//!
//! Malformed lines and unknown message kinds are skipped and counted in
//! [`DecodeStats`]; they never abort a stream.
//!
//! This is a pure protocol crate with no I/O of its own.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod decoder;
mod error;
mod message;
mod reader;
mod splitter;

pub use decoder::{parse_line, DecodeStats, Decoder, ParsedLine};
pub use error::{ProtocolError, ProtocolResult};
pub use message::StreamMessage;
pub use reader::{MessageReader, MessageStream};
pub use splitter::{LineSplitter, DEFAULT_MAX_LINE_BYTES};
