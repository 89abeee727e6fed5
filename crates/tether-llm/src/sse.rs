//! # SSE framing
//!
//! Two small state machines shared by every provider stream:
//!
//! - [`LineBuffer`] accumulates raw bytes and yields complete lines, however
//!   the transport split them (including inside multi-byte characters)
//! - [`RecordAssembler`] groups lines into [`EventRecord`]s: `data:` lines
//!   accumulate, `event:` names the record, `:` comments are dropped, and a
//!   blank line dispatches
//!
//! Neither touches JSON; decoding is the stream processor's job.

use bytes::BytesMut;

/// Field name of payload lines.
pub const DATA_FIELD: &str = "data";
/// Field name of event-type lines.
pub const EVENT_FIELD: &str = "event";
/// Leading character of comment lines.
pub const COMMENT_PREFIX: char = ':';
/// Payload that ends an `OpenAI`-style stream.
pub const DONE_SENTINEL: &str = "[DONE]";

const INITIAL_CAPACITY: usize = 8192;

/// Byte buffer that yields complete `\n`-terminated lines.
#[derive(Debug)]
pub struct LineBuffer {
    buf: BytesMut,
}

impl Default for LineBuffer {
    fn default() -> Self {
        Self {
            buf: BytesMut::with_capacity(INITIAL_CAPACITY),
        }
    }
}

impl LineBuffer {
    /// Append bytes read from the transport.
    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Next complete line without its `\n` or `\r\n` terminator.
    pub fn next_line(&mut self) -> Option<BytesMut> {
        let newline = self.buf.iter().position(|&b| b == b'\n')?;
        let mut line = self.buf.split_to(newline + 1);
        line.truncate(newline);
        if line.last() == Some(&b'\r') {
            line.truncate(newline - 1);
        }
        Some(line)
    }

    /// Unterminated trailing bytes, consumed at end of stream.
    pub fn take_remainder(&mut self) -> Option<BytesMut> {
        if self.buf.is_empty() {
            return None;
        }
        let mut rest = self.buf.split();
        if rest.last() == Some(&b'\r') {
            rest.truncate(rest.len() - 1);
        }
        Some(rest)
    }

    /// Whether no bytes are pending.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

/// One dispatched event record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventRecord {
    /// Value of the last `event:` line, if any.
    pub event: Option<String>,
    /// `data:` payloads joined with `\n`.
    pub data: String,
}

impl EventRecord {
    /// Whether this record is the end-of-stream sentinel.
    pub fn is_done(&self) -> bool {
        self.data.trim() == DONE_SENTINEL
    }
}

/// Groups lines into event records.
#[derive(Debug, Default)]
pub struct RecordAssembler {
    event: Option<String>,
    data: String,
    has_data: bool,
}

impl RecordAssembler {
    /// Feed one line. Returns a record when a blank line completes one that
    /// carried data.
    pub fn push_line(&mut self, line: &str) -> Option<EventRecord> {
        if line.is_empty() {
            return self.take();
        }
        if line.starts_with(COMMENT_PREFIX) {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            DATA_FIELD => {
                if self.has_data {
                    self.data.push('\n');
                }
                self.data.push_str(value);
                self.has_data = true;
            }
            EVENT_FIELD => self.event = Some(value.to_string()),
            // id, retry and unknown fields carry nothing we use
            _ => {}
        }
        None
    }

    /// Dispatch whatever is pending at end of stream.
    pub fn finish(&mut self) -> Option<EventRecord> {
        self.take()
    }

    fn take(&mut self) -> Option<EventRecord> {
        let event = self.event.take();
        if !self.has_data {
            return None;
        }
        self.has_data = false;
        Some(EventRecord {
            event,
            data: std::mem::take(&mut self.data),
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
