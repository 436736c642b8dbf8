// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Quit-signal handling for the producer and consumer loops.
//!
//! The loops poll a [`ShutdownSignal`] once per frame. Ctrl+C (SIGINT, and
//! SIGTERM where `ctrlc` covers it) sets it. The signal does not force-release
//! a held keyed mutex; each loop finishes its current frame first.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

static QUIT_HANDLER_INSTALLED: AtomicBool = AtomicBool::new(false);

/// Cloneable "stop after this frame" flag.
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal {
    requested: Arc<AtomicBool>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.requested.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }
}

/// Routes Ctrl+C to `signal`. Installs at most once per process.
pub fn install_quit_handler(signal: &ShutdownSignal) -> std::io::Result<()> {
    if QUIT_HANDLER_INSTALLED.swap(true, Ordering::SeqCst) {
        tracing::warn!("Quit handler already installed, skipping");
        return Ok(());
    }

    let signal = signal.clone();
    ctrlc::set_handler(move || {
        tracing::info!("Quit signal received, stopping after the current frame");
        signal.request();
    })
    .map_err(std::io::Error::other)?;

    tracing::debug!("Quit handler installed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_the_flag() {
        let signal = ShutdownSignal::new();
        let observer = signal.clone();
        assert!(!observer.is_requested());
        signal.request();
        assert!(observer.is_requested());
    }
}
