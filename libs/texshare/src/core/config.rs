// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Shared-texture settings via `texshare.yaml`.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::core::channel::{DEFAULT_CHANNEL_NAME, validate_name};
use crate::core::handshake::EventName;
use crate::core::{
    HandleKind, PixelFormat, Result, ShareError, SharedImageDescriptor, SyncScheme, Timeout,
};

/// Base name of the frame-ready event when none is configured.
pub const DEFAULT_EVENT_NAME: &str = "SharedTextureTestFrameReady";

/// Settings shared by the producer and consumer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SharedTextureConfig {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    /// Well-known handshake channel name.
    pub channel_name: String,
    /// Frame-ready event name. Sent to the consumer in the handshake.
    pub event_name: String,
    pub sync_scheme: SyncScheme,
    /// Keyed-mutex acquire timeout. Absent means wait forever.
    pub lock_timeout_ms: Option<u64>,
    /// How long the consumer waits on the frame event per iteration.
    pub frame_poll_ms: u64,
    /// Memory handle type exported by the producer.
    pub handle_kind: HandleKind,
    /// How long the consumer retries connecting. Absent means forever.
    pub connect_timeout_ms: Option<u64>,
}

impl Default for SharedTextureConfig {
    fn default() -> Self {
        Self {
            width: 512,
            height: 512,
            format: PixelFormat::Bgra8Unorm,
            channel_name: DEFAULT_CHANNEL_NAME.to_string(),
            event_name: DEFAULT_EVENT_NAME.to_string(),
            sync_scheme: SyncScheme::KeyedMutex,
            lock_timeout_ms: None,
            frame_poll_ms: 100,
            handle_kind: HandleKind::platform_default(),
            connect_timeout_ms: None,
        }
    }
}

impl SharedTextureConfig {
    /// Configuration file name.
    pub const FILE_NAME: &'static str = "texshare.yaml";

    /// Loads `texshare.yaml` from a directory. Missing or unparseable files
    /// are configuration faults.
    pub fn load(dir: &Path) -> Result<Self> {
        Self::from_file(&dir.join(Self::FILE_NAME))
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ShareError::Configuration(format!("Failed to read {}: {}", path.display(), e))
        })?;

        let config: Self = serde_yaml::from_str(&content).map_err(|e| {
            ShareError::Configuration(format!("Failed to parse {}: {}", path.display(), e))
        })?;
        config.validate()?;

        tracing::info!("Loaded shared texture config from {}", path.display());
        Ok(config)
    }

    /// Loads `texshare.yaml` from a directory, falling back to defaults when
    /// the file is missing or invalid.
    pub fn load_or_default(dir: &Path) -> Self {
        let path = dir.join(Self::FILE_NAME);
        if !path.exists() {
            tracing::debug!(
                "No {} found in {}, using defaults",
                Self::FILE_NAME,
                dir.display()
            );
            return Self::default();
        }
        match Self::from_file(&path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("{}, using defaults", e);
                Self::default()
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.descriptor()?;
        self.event_name()?;
        validate_name(&self.channel_name)?;
        if self.frame_poll_ms == 0 {
            return Err(ShareError::Configuration(
                "frame_poll_ms must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn descriptor(&self) -> Result<SharedImageDescriptor> {
        SharedImageDescriptor::new(self.width, self.height, self.format)
    }

    pub fn event_name(&self) -> Result<EventName> {
        EventName::new(self.event_name.clone())
    }

    pub fn lock_timeout(&self) -> Timeout {
        self.lock_timeout_ms
            .map_or(Timeout::Infinite, Timeout::from_millis)
    }

    pub fn frame_poll(&self) -> Timeout {
        Timeout::from_millis(self.frame_poll_ms)
    }

    pub fn connect_timeout(&self) -> Timeout {
        self.connect_timeout_ms
            .map_or(Timeout::Infinite, Timeout::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn defaults_match_the_well_known_names() {
        let config = SharedTextureConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.channel_name, "SharedTextureTestPipe");
        assert_eq!(config.event_name, "SharedTextureTestFrameReady");
        assert_eq!(config.lock_timeout(), Timeout::Infinite);
        assert_eq!(config.frame_poll(), Timeout::Bounded(Duration::from_millis(100)));
    }

    #[test]
    fn loads_partial_yaml() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(SharedTextureConfig::FILE_NAME),
            "width: 1280\nheight: 720\nsync_scheme: semaphore\nlock_timeout_ms: 250\nhandle_kind: opaque_fd\n",
        )
        .unwrap();

        let config = SharedTextureConfig::load(dir.path()).unwrap();
        assert_eq!((config.width, config.height), (1280, 720));
        assert_eq!(config.sync_scheme, SyncScheme::Semaphore);
        assert_eq!(config.handle_kind, HandleKind::OpaqueFd);
        assert_eq!(config.lock_timeout(), Timeout::from_millis(250));
        assert_eq!(config.event_name, DEFAULT_EVENT_NAME);
    }

    #[test]
    fn rejects_invalid_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SharedTextureConfig::FILE_NAME);

        std::fs::write(&path, "width: 0\n").unwrap();
        assert!(matches!(
            SharedTextureConfig::load(dir.path()),
            Err(ShareError::Configuration(_))
        ));

        std::fs::write(&path, "event_name: \"Global\\\\Frame\"\n").unwrap();
        assert!(SharedTextureConfig::load(dir.path()).is_err());

        std::fs::write(&path, "colour: red\n").unwrap();
        assert!(SharedTextureConfig::load(dir.path()).is_err());
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        assert!(SharedTextureConfig::load(dir.path()).is_err());
        assert_eq!(
            SharedTextureConfig::load_or_default(dir.path()),
            SharedTextureConfig::default()
        );
    }
}
