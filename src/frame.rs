//! Event-stream frame parsing.
//!
//! SSE frames are blank-line-delimited blocks of field lines:
//! - `event: <name>` - event name (last occurrence wins)
//! - `data: <payload>` - payload line(s), joined with `\n`
//! - `id: <id>` - resume token, tracked even before dispatch
//! - `retry: <ms>` - server-directed reconnect delay
//! - `: <comment>` - carries no data but proves the stream is alive
//!
//! The parser is resumable: partial lines, partial UTF-8 sequences, and
//! frames split across network reads are carried in its buffer until the
//! rest arrives.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Event name used when a frame has no `event:` line.
pub const DEFAULT_EVENT: &str = "message";

/// One parsed server-push event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Stream position id from the frame's `id:` line, if any.
    pub id: Option<String>,
    /// Event name; `"message"` when the frame had no `event:` line.
    pub event: String,
    /// Payload: all `data:` lines joined with `\n`, in order.
    pub data: String,
    /// Reconnect hint from the frame's `retry:` line, if any.
    pub retry: Option<u64>,
}

impl EventRecord {
    /// Best-effort JSON view of the payload. Not a contract of the wire
    /// format: non-JSON payloads simply return `None`.
    pub fn json(&self) -> Option<Value> {
        serde_json::from_str(&self.data).ok()
    }

    /// Whether the frame carried an explicit `event:` name.
    pub fn is_named(&self) -> bool {
        self.event != DEFAULT_EVENT
    }
}

/// Result of feeding one chunk of bytes to the parser.
#[derive(Debug, Default)]
pub struct FeedOutcome {
    /// Complete records parsed from the chunk, in arrival order.
    pub records: Vec<EventRecord>,
    /// Most recent `retry:` value seen while parsing the chunk, valid even
    /// when the surrounding frame produced no record.
    pub retry: Option<u64>,
    /// True if at least one complete line (field, comment, or blank) was
    /// consumed. The heartbeat watchdog resets on this.
    pub liveness: bool,
}

/// Resumable SSE frame parser.
#[derive(Debug, Default)]
pub struct FrameParser {
    /// Undecoded bytes: at most one incomplete UTF-8 sequence.
    carry: Vec<u8>,
    /// Decoded text not yet consumed as complete lines.
    buffer: String,
    event: Option<String>,
    data_lines: Vec<String>,
    id: Option<String>,
    retry: Option<u64>,
    last_event_id: Option<String>,
}

impl FrameParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// The most recently parsed `id:` value, updated as soon as the line is
    /// parsed so it is available for resume before the record dispatches.
    pub fn last_event_id(&self) -> Option<&str> {
        self.last_event_id.as_deref()
    }

    /// Seed the resume id, e.g. when restoring a subscription.
    pub fn set_last_event_id(&mut self, id: Option<String>) {
        self.last_event_id = id;
    }

    /// Drop any partially accumulated frame and buffered text. The resume
    /// id survives a reset; it belongs to the subscription, not the frame.
    pub fn reset(&mut self) {
        self.carry.clear();
        self.buffer.clear();
        self.event = None;
        self.data_lines.clear();
        self.id = None;
        self.retry = None;
    }

    /// Feed one chunk of raw bytes, returning every complete record it
    /// finished. Anything incomplete stays buffered for the next call.
    pub fn feed(&mut self, chunk: &[u8]) -> FeedOutcome {
        self.decode(chunk);

        let mut outcome = FeedOutcome::default();
        while let Some(newline) = self.buffer.find('\n') {
            let line: String = self.buffer[..newline].trim_end_matches('\r').to_string();
            self.buffer.drain(..=newline);
            outcome.liveness = true;

            if line.is_empty() {
                if let Some(record) = self.end_frame() {
                    outcome.records.push(record);
                }
                continue;
            }
            if let Some(retry) = self.process_line(&line) {
                outcome.retry = Some(retry);
            }
        }
        outcome
    }

    /// Append bytes to the decoded buffer, holding back an incomplete
    /// trailing UTF-8 sequence and replacing truly invalid bytes.
    fn decode(&mut self, chunk: &[u8]) {
        self.carry.extend_from_slice(chunk);
        loop {
            match std::str::from_utf8(&self.carry) {
                Ok(text) => {
                    self.buffer.push_str(text);
                    self.carry.clear();
                    return;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    self.buffer
                        .push_str(&String::from_utf8_lossy(&self.carry[..valid]));
                    match e.error_len() {
                        Some(bad) => {
                            self.buffer.push(char::REPLACEMENT_CHARACTER);
                            self.carry.drain(..valid + bad);
                        }
                        None => {
                            // Incomplete sequence at the end of the chunk.
                            self.carry.drain(..valid);
                            return;
                        }
                    }
                }
            }
        }
    }

    /// Parse one field line. Returns a `retry:` value when the line carried
    /// a valid one.
    fn process_line(&mut self, line: &str) -> Option<u64> {
        // Comment: liveness only.
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.find(':') {
            Some(pos) => {
                let value = &line[pos + 1..];
                // At most one leading space after the colon is stripped.
                (&line[..pos], value.strip_prefix(' ').unwrap_or(value))
            }
            // A line with no colon is a field with an empty value.
            None => (line, ""),
        };

        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data_lines.push(value.to_string()),
            "id" => {
                self.id = Some(value.to_string());
                self.last_event_id = Some(value.to_string());
            }
            "retry" => {
                // Non-numeric values are ignored entirely.
                if let Ok(ms) = value.parse::<u64>() {
                    self.retry = Some(ms);
                    return Some(ms);
                }
            }
            // Unknown fields are ignored per the wire format.
            _ => {}
        }
        None
    }

    /// Blank line: finish the frame. Frames with no `data:` lines produce
    /// no record.
    fn end_frame(&mut self) -> Option<EventRecord> {
        let event = self.event.take();
        let id = self.id.take();
        let retry = self.retry.take();
        if self.data_lines.is_empty() {
            return None;
        }
        let data = self.data_lines.join("\n");
        self.data_lines.clear();
        Some(EventRecord {
            id,
            event: event.unwrap_or_else(|| DEFAULT_EVENT.to_string()),
            data,
            retry,
        })
    }
}
