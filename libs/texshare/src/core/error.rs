// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ShareError {
    #[error("GPU operation failed: {0}")]
    Gpu(String),

    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Protocol violation: {0}")]
    Protocol(String),

    #[error("Malformed handshake line {line:?}: {reason}")]
    MalformedHandshake { line: String, reason: String },

    #[error("Handle duplication failed: {0}")]
    HandleDuplication(String),

    #[error("Handshake channel closed: {0}")]
    ChannelClosed(String),

    #[error("Keyed mutex acquire timed out (key {key}, timeout {timeout:?})")]
    LockTimeout { key: u64, timeout: Duration },

    #[error("Keyed mutex abandoned by its previous owner (key {key})")]
    LockAbandoned { key: u64 },

    #[error("Frame gate misuse: {0}")]
    GateState(String),

    #[error("Operation not supported: {0}")]
    NotSupported(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Fault taxonomy. Every class is fatal to the process that observes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultClass {
    /// No compatible memory type, queue family or device; bad settings.
    Configuration,
    /// Malformed handshake, failed duplication, unexpected channel closure.
    Protocol,
    /// The counterpart held the lock past the timeout, or died holding it.
    LockTimeout,
    /// Any other driver-level failure.
    Gpu,
    /// Local I/O outside the handshake.
    Io,
}

impl ShareError {
    pub fn fault_class(&self) -> FaultClass {
        match self {
            ShareError::Configuration(_) | ShareError::NotSupported(_) => FaultClass::Configuration,
            ShareError::Protocol(_)
            | ShareError::MalformedHandshake { .. }
            | ShareError::HandleDuplication(_)
            | ShareError::ChannelClosed(_)
            | ShareError::GateState(_) => FaultClass::Protocol,
            ShareError::LockTimeout { .. } | ShareError::LockAbandoned { .. } => {
                FaultClass::LockTimeout
            }
            ShareError::Gpu(_) => FaultClass::Gpu,
            ShareError::Io(_) | ShareError::Other(_) => FaultClass::Io,
        }
    }

    pub(crate) fn malformed(line: &str, reason: impl Into<String>) -> Self {
        ShareError::MalformedHandshake {
            line: line.trim_end().to_string(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ShareError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_faults_are_their_own_class() {
        let err = ShareError::LockTimeout {
            key: 0,
            timeout: Duration::from_millis(5),
        };
        assert_eq!(err.fault_class(), FaultClass::LockTimeout);
        assert_eq!(
            ShareError::LockAbandoned { key: 0 }.fault_class(),
            FaultClass::LockTimeout
        );
    }

    #[test]
    fn handshake_faults_are_protocol_faults() {
        let err = ShareError::malformed("12 a\n", "expected four fields");
        assert_eq!(err.fault_class(), FaultClass::Protocol);
        assert!(err.to_string().contains("\"12 a\""));
        assert_eq!(
            ShareError::ChannelClosed("eof".into()).fault_class(),
            FaultClass::Protocol
        );
    }
}
