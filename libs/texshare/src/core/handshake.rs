// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Handshake wire format.
//!
//! One ASCII line from producer to consumer:
//!
//! ```text
//! <duplicated memory handle> <width> <height> <event name>\n
//! ```
//!
//! answered by `OK\n`. The semaphore scheme appends a second producer line
//! holding the duplicated semaphore handle.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

use crate::core::{Result, ShareError};

/// Acknowledgement the consumer writes once its import succeeded.
pub const ACK: &str = "OK";

static HANDSHAKE_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?-u)^\s*(\d+)\s+(\d+)\s+(\d+)\s+(\w+)\s*$").expect("static regex must compile")
});

static HANDLE_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?-u)^\s*(\d+)\s*$").expect("static regex must compile"));

/// Name of the frame-ready event. ASCII letters, digits and `_` only, so it
/// survives the handshake grammar unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EventName(String);

impl EventName {
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if name.is_empty() || !name.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_') {
            return Err(ShareError::Configuration(format!(
                "event name {name:?} must be non-empty and contain only [A-Za-z0-9_]"
            )));
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The single message announcing a shared image to the consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeMessage {
    /// Handle value as valid in the consumer's handle table.
    pub memory_handle: u64,
    pub width: u32,
    pub height: u32,
    pub event_name: EventName,
}

impl HandshakeMessage {
    pub fn encode(&self) -> String {
        format!(
            "{} {} {} {}\n",
            self.memory_handle, self.width, self.height, self.event_name
        )
    }

    /// Parses a line against the fixed grammar. Anything else is fatal.
    pub fn parse(line: &str) -> Result<Self> {
        let caps = HANDSHAKE_LINE.captures(line).ok_or_else(|| {
            ShareError::malformed(line, "expected `<handle> <width> <height> <event>`")
        })?;

        let memory_handle = caps[1]
            .parse::<u64>()
            .map_err(|e| ShareError::malformed(line, format!("handle: {e}")))?;
        let width = caps[2]
            .parse::<u32>()
            .map_err(|e| ShareError::malformed(line, format!("width: {e}")))?;
        let height = caps[3]
            .parse::<u32>()
            .map_err(|e| ShareError::malformed(line, format!("height: {e}")))?;
        let event_name = EventName::new(&caps[4])
            .map_err(|e| ShareError::malformed(line, e.to_string()))?;

        Ok(Self {
            memory_handle,
            width,
            height,
            event_name,
        })
    }

    /// Byte-level entry point for channels that do not guarantee UTF-8.
    pub fn parse_bytes(line: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(line).map_err(|e| {
            ShareError::malformed(&String::from_utf8_lossy(line), format!("not ASCII: {e}"))
        })?;
        Self::parse(text)
    }
}

/// Encodes the semaphore follow-up line.
pub fn encode_handle_line(handle: u64) -> String {
    format!("{handle}\n")
}

pub fn parse_handle_line(line: &str) -> Result<u64> {
    let caps = HANDLE_LINE
        .captures(line)
        .ok_or_else(|| ShareError::malformed(line, "expected a single handle value"))?;
    caps[1]
        .parse::<u64>()
        .map_err(|e| ShareError::malformed(line, format!("handle: {e}")))
}

pub fn encode_ack() -> String {
    format!("{ACK}\n")
}

/// Any non-blank reply counts as an acknowledgement.
pub fn is_ack(line: &str) -> bool {
    !line.trim().is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_fields_in_order() {
        let msg = HandshakeMessage {
            memory_handle: 12345,
            width: 512,
            height: 512,
            event_name: EventName::new("Frame42").unwrap(),
        };
        assert_eq!(msg.encode(), "12345 512 512 Frame42\n");
        assert_eq!(HandshakeMessage::parse(&msg.encode()).unwrap(), msg);
    }

    #[test]
    fn tolerates_surrounding_and_repeated_whitespace() {
        let msg = HandshakeMessage::parse("  7\t 640   480 Ev_1 \r\n").unwrap();
        assert_eq!(msg.memory_handle, 7);
        assert_eq!((msg.width, msg.height), (640, 480));
        assert_eq!(msg.event_name.as_str(), "Ev_1");
    }

    #[test]
    fn rejects_near_misses() {
        for line in [
            "",
            "12345 512 512",
            "12345 512 512 Frame42 extra",
            "0x10 512 512 Frame42",
            "-5 512 512 Frame42",
            "12345 512.0 512 Frame42",
            "12345 512 512 Frame-42",
            "12345,512,512,Frame42",
            "12345 512 5a12 Frame42",
        ] {
            let err = HandshakeMessage::parse(line).unwrap_err();
            assert!(
                matches!(err, ShareError::MalformedHandshake { .. }),
                "{line:?} -> {err}"
            );
        }
    }

    #[test]
    fn rejects_non_ascii_digits_and_words() {
        assert!(HandshakeMessage::parse("١٢ 512 512 Frame").is_err());
        assert!(HandshakeMessage::parse("12 512 512 Främe").is_err());
    }

    #[test]
    fn rejects_overflowing_fields() {
        assert!(HandshakeMessage::parse("18446744073709551616 1 1 E").is_err());
        assert!(HandshakeMessage::parse("1 4294967296 1 E").is_err());
    }

    #[test]
    fn rejects_invalid_utf8() {
        let err = HandshakeMessage::parse_bytes(b"12 1 1 \xff\n").unwrap_err();
        assert!(matches!(err, ShareError::MalformedHandshake { .. }));
    }

    #[test]
    fn handle_line_and_ack() {
        assert_eq!(parse_handle_line(&encode_handle_line(99)).unwrap(), 99);
        assert!(parse_handle_line("99 100").is_err());
        assert!(is_ack(&encode_ack()));
        assert!(is_ack("anything"));
        assert!(!is_ack("  \r\n"));
    }

    #[test]
    fn event_names_are_validated() {
        assert!(EventName::new("SharedTextureTestFrameReady").is_ok());
        assert!(EventName::new("").is_err());
        assert!(EventName::new("Global\\Frame").is_err());
        assert!(EventName::new("has space").is_err());
    }
}
