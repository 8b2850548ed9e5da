//! Event records from the attach stream.
//!
//! The device emits CRLF-terminated lines shaped like
//! `Code=VideoMotion;action=Start;index=0`. [`LineBuffer`] reassembles
//! complete lines from arbitrary chunk boundaries, and
//! [`parse_event_line`] decodes one candidate line into an
//! [`EventRecord`]. Records are then resolved against the owning
//! device's channel registry into the [`DeviceEvent`] handed to
//! subscribers.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::channel::{Channel, ChannelRegistry};
use crate::dump::coerce_scalar;

/// Upper bound on an unterminated line before it is discarded as noise.
const MAX_LINE_BYTES: usize = 16 * 1024;

// ── Line framing ─────────────────────────────────────────────────────

/// Reassembles CRLF-terminated lines from a byte stream read in
/// arbitrary-sized chunks.
#[derive(Debug, Default)]
pub struct LineBuffer {
    buf: Vec<u8>,
    /// Bytes already scanned for a boundary in previous calls.
    scanned: usize,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk; returns every line completed by it, in order,
    /// without the terminator. A zero-length chunk yields nothing — the
    /// transport reports those without the connection being closed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);

        let mut lines = Vec::new();
        loop {
            // the \r\n boundary can straddle chunks, so back up one byte
            // before resuming the scan
            let start = self.scanned.saturating_sub(1);
            let found = self.buf[start..]
                .windows(2)
                .position(|pair| pair == b"\r\n")
                .map(|rel| start + rel);

            match found {
                Some(pos) => {
                    lines.push(String::from_utf8_lossy(&self.buf[..pos]).into_owned());
                    self.buf.drain(..pos + 2);
                    self.scanned = 0;
                }
                None => {
                    self.scanned = self.buf.len();
                    break;
                }
            }
        }

        if self.buf.len() > MAX_LINE_BYTES {
            tracing::warn!(
                bytes = self.buf.len(),
                "discarding oversized unterminated line"
            );
            self.buf.clear();
            self.scanned = 0;
        }

        lines
    }
}

// ── Record parsing ───────────────────────────────────────────────────

/// A single malformed record. Recoverable: the offending record is
/// dropped and the stream continues.
#[derive(Debug, Error)]
#[error("Malformed segment `{segment}` in event record `{line}`")]
pub struct ParseError {
    pub line: String,
    pub segment: String,
}

/// One decoded alarm record, before channel resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct EventRecord {
    pub code: String,
    pub action: Option<String>,
    /// Device-reported channel index, when the record carried one that
    /// parses as an integer.
    pub index: Option<i64>,
    /// Remaining decoded key/value pairs, keys lowercased.
    pub fields: BTreeMap<String, Value>,
}

/// Whether this line is the echoed HTTP status line some firmware emits
/// at the head of the attach body. Seeing it confirms the connection for
/// telemetry; it carries no event data.
pub fn is_status_line(line: &str) -> bool {
    line.starts_with("HTTP/")
}

/// Decode one candidate line from the attach stream.
///
/// Lines not beginning with `Code=` are not events; they come back as
/// `Ok(None)` and the caller discards them. Within a record, pairs split
/// on the first `=` only, keys are lowercased, duplicate keys keep the
/// last value, and every value is scalar-coerced except `code` and
/// `action`, which stay strings. An `index` that does not parse as an
/// integer leaves channel resolution absent without failing the record.
pub fn parse_event_line(line: &str) -> Result<Option<EventRecord>, ParseError> {
    if !line.starts_with("Code=") {
        return Ok(None);
    }

    let mut code = String::new();
    let mut action = None;
    let mut index = None;
    let mut fields = BTreeMap::new();

    for segment in line.split(';') {
        let Some((key, value)) = segment.split_once('=') else {
            return Err(ParseError {
                line: line.to_string(),
                segment: segment.to_string(),
            });
        };
        let key = key.to_ascii_lowercase();
        match key.as_str() {
            "code" => code = value.to_string(),
            "action" => action = Some(value.to_string()),
            "index" => match coerce_scalar(value) {
                Value::Number(n) => {
                    index = n.as_i64();
                    fields.remove("index");
                }
                other => {
                    index = None;
                    fields.insert(key, other);
                }
            },
            _ => {
                fields.insert(key, coerce_scalar(value));
            }
        }
    }

    Ok(Some(EventRecord {
        code,
        action,
        index,
        fields,
    }))
}

impl EventRecord {
    /// Resolve channel identity against the producing device's registry,
    /// yielding the event delivered to subscribers. An unseen index
    /// registers a nameless channel.
    pub fn resolve(self, registry: &ChannelRegistry) -> DeviceEvent {
        let (channel_number, channel) = match self.index {
            Some(index) => {
                let number = registry.index_to_number(index);
                (Some(number), Some(registry.observe(number)))
            }
            None => (None, None),
        };
        DeviceEvent {
            code: self.code,
            action: self.action,
            channel_number,
            channel,
            fields: self.fields,
        }
    }
}

// ── Delivered event ──────────────────────────────────────────────────

/// An immutable alarm event, enriched with channel identity and handed
/// to subscribers. Consumed by callbacks; not retained by the client.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceEvent {
    /// Event code, e.g. `"VideoMotion"`.
    pub code: String,
    /// `"Start"`, `"Stop"`, etc., when the record carried one.
    pub action: Option<String>,
    /// Offset-adjusted channel number, when the record carried a usable
    /// index.
    pub channel_number: Option<i64>,
    /// Snapshot of the resolved channel (nameless if never titled).
    pub channel: Option<Channel>,
    /// Remaining decoded fields from the record.
    pub fields: BTreeMap<String, Value>,
}

impl DeviceEvent {
    /// Last-known display title of the originating channel, if any.
    pub fn channel_name(&self) -> Option<&str> {
        self.channel.as_ref().and_then(Channel::name)
    }
}
