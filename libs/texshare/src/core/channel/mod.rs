// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! One-shot, line-framed handshake channel.
//!
//! The producer creates the channel under a well-known name *before* it
//! launches the consumer, accepts exactly one connection, exchanges the
//! handshake and drops the channel. It is never used for steady-state
//! synchronization.

#[cfg(unix)]
mod unix;
#[cfg(windows)]
mod windows;

#[cfg(unix)]
pub use self::unix::{Channel, ChannelListener};
#[cfg(windows)]
pub use self::windows::{Channel, ChannelListener};

use crate::core::{Result, ShareError};

/// Longest line either side will buffer before declaring a protocol fault.
pub const MAX_LINE_LEN: usize = 4096;

/// Well-known channel name used when none is configured.
pub const DEFAULT_CHANNEL_NAME: &str = "SharedTextureTestPipe";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelRole {
    /// Server end, created before the consumer exists.
    Producer,
    /// Client end, connected by the launched consumer.
    Consumer,
}

/// Blocking, message-per-line handshake transport.
pub trait HandshakeChannel {
    fn role(&self) -> ChannelRole;

    /// Writes one line. A trailing `\n` is added when missing.
    fn send_line(&mut self, line: &str) -> Result<()>;

    /// Reads one line without its terminator. End of stream before a complete
    /// line is [`ShareError::ChannelClosed`].
    fn recv_line(&mut self) -> Result<Vec<u8>>;
}

/// Rejects names that cannot be used as a pipe or socket file name.
pub(crate) fn validate_name(name: &str) -> Result<()> {
    if name.is_empty()
        || name.len() > 100
        || !name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-' || b == b'.')
    {
        return Err(ShareError::Configuration(format!(
            "channel name {name:?} must be 1-100 characters of [A-Za-z0-9_.-]"
        )));
    }
    Ok(())
}

/// Terminates `line` with `\n` if it is not already.
pub(crate) fn framed(line: &str) -> Vec<u8> {
    let mut bytes = line.as_bytes().to_vec();
    if bytes.last() != Some(&b'\n') {
        bytes.push(b'\n');
    }
    bytes
}

/// Strips one trailing `\n` and an optional `\r` before it.
pub(crate) fn strip_terminator(mut line: Vec<u8>) -> Vec<u8> {
    if line.last() == Some(&b'\n') {
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names() {
        assert!(validate_name(DEFAULT_CHANNEL_NAME).is_ok());
        assert!(validate_name("texshare-1.test").is_ok());
        assert!(validate_name("").is_err());
        assert!(validate_name("../escape").is_err());
        assert!(validate_name("with space").is_err());
    }

    #[test]
    fn framing() {
        assert_eq!(framed("OK"), b"OK\n");
        assert_eq!(framed("OK\n"), b"OK\n");
        assert_eq!(strip_terminator(b"OK\r\n".to_vec()), b"OK");
        assert_eq!(strip_terminator(b"OK".to_vec()), b"OK");
    }
}
