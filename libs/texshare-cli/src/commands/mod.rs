// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

pub mod consume;
pub mod demo;
pub mod produce;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, ValueEnum};
use texshare::{HandleKind, SharedTextureConfig, SyncScheme};

/// Settings both roles read from `texshare.yaml`, overridable per flag.
#[derive(Args, Debug, Clone, Default)]
pub struct ShareArgs {
    /// Directory containing texshare.yaml (default: current directory)
    #[arg(long, value_name = "DIR")]
    pub config: Option<PathBuf>,

    /// Handshake channel name
    #[arg(long)]
    pub channel: Option<String>,

    /// Synchronization scheme
    #[arg(long, value_enum)]
    pub scheme: Option<SchemeArg>,

    /// Memory handle type the producer exports
    #[arg(long, value_enum)]
    pub handle_kind: Option<HandleKindArg>,

    /// Keyed-mutex acquire timeout in milliseconds (default: wait forever)
    #[arg(long, value_name = "MS")]
    pub lock_timeout: Option<u64>,
}

impl ShareArgs {
    /// Loads the config file and applies flag overrides.
    ///
    /// An explicit `--config` directory must contain a valid file; otherwise
    /// the current directory is tried and defaults fill in.
    pub fn resolve(&self) -> Result<SharedTextureConfig> {
        let mut config = match &self.config {
            Some(dir) => SharedTextureConfig::load(dir)
                .with_context(|| format!("loading config from {}", dir.display()))?,
            None => SharedTextureConfig::load_or_default(&std::env::current_dir()?),
        };

        if let Some(channel) = &self.channel {
            config.channel_name = channel.clone();
        }
        if let Some(scheme) = self.scheme {
            config.sync_scheme = scheme.into();
        }
        if let Some(kind) = self.handle_kind {
            config.handle_kind = kind.into();
        }
        if let Some(ms) = self.lock_timeout {
            config.lock_timeout_ms = Some(ms);
        }
        Ok(config)
    }

    /// Like [`resolve`](Self::resolve), but without an explicit
    /// `--handle-kind` a kind the backend cannot export falls back to the
    /// backend's own.
    pub fn resolve_for(&self, backend: Backend) -> Result<SharedTextureConfig> {
        let mut config = self.resolve()?;
        if self.handle_kind.is_none() && config.handle_kind != backend.native_kind() {
            tracing::debug!(
                "{:?} handles are not native to {:?}, using {:?}",
                config.handle_kind,
                backend,
                backend.native_kind()
            );
            config.handle_kind = backend.native_kind();
        }
        Ok(config)
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemeArg {
    /// Keyed mutex plus named frame event
    KeyedMutex,
    /// One-shot exportable semaphore, then the keyed mutex
    Semaphore,
}

impl From<SchemeArg> for SyncScheme {
    fn from(arg: SchemeArg) -> Self {
        match arg {
            SchemeArg::KeyedMutex => SyncScheme::KeyedMutex,
            SchemeArg::Semaphore => SyncScheme::Semaphore,
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleKindArg {
    /// Opaque Win32 memory handle (Vulkan)
    OpaqueWin32,
    /// D3D11 shared NT handle
    D3d11Texture,
    /// Opaque POSIX file descriptor (Vulkan)
    OpaqueFd,
}

impl From<HandleKindArg> for HandleKind {
    fn from(arg: HandleKindArg) -> Self {
        match arg {
            HandleKindArg::OpaqueWin32 => HandleKind::OpaqueWin32,
            HandleKindArg::D3d11Texture => HandleKind::D3D11Texture,
            HandleKindArg::OpaqueFd => HandleKind::OpaqueFd,
        }
    }
}

#[cfg(not(any(windows, feature = "backend-vulkan")))]
compile_error!("texshare-cli needs the backend-vulkan feature on this platform");

/// GPU API used by this process.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    #[cfg(feature = "backend-vulkan")]
    Vulkan,
    #[cfg(windows)]
    D3d11,
}

impl Backend {
    pub fn platform_default() -> Self {
        #[cfg(windows)]
        {
            Backend::D3d11
        }
        #[cfg(all(not(windows), feature = "backend-vulkan"))]
        {
            Backend::Vulkan
        }
    }

    /// Memory handle type this backend exports and imports.
    pub fn native_kind(self) -> HandleKind {
        match self {
            #[cfg(feature = "backend-vulkan")]
            Backend::Vulkan => texshare::vulkan::VulkanInterop::native_kind(),
            #[cfg(windows)]
            Backend::D3d11 => HandleKind::D3D11Texture,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_defaults() {
        let args = ShareArgs {
            config: None,
            channel: Some("OtherPipe".into()),
            scheme: Some(SchemeArg::Semaphore),
            handle_kind: Some(HandleKindArg::OpaqueWin32),
            lock_timeout: Some(250),
        };
        let config = args.resolve().unwrap();
        assert_eq!(config.channel_name, "OtherPipe");
        assert_eq!(config.sync_scheme, SyncScheme::Semaphore);
        assert_eq!(config.handle_kind, HandleKind::OpaqueWin32);
        assert_eq!(config.lock_timeout_ms, Some(250));
    }

    #[test]
    fn explicit_config_dir_must_exist() {
        let args = ShareArgs {
            config: Some(PathBuf::from("/definitely/not/a/texshare/dir")),
            ..ShareArgs::default()
        };
        assert!(args.resolve().is_err());
    }

    #[cfg(feature = "backend-vulkan")]
    #[test]
    fn vulkan_backend_picks_its_own_handle_kind() {
        let config = ShareArgs::default().resolve_for(Backend::Vulkan).unwrap();
        assert_eq!(
            config.handle_kind,
            texshare::vulkan::VulkanInterop::native_kind()
        );
    }

    #[cfg(feature = "backend-vulkan")]
    #[test]
    fn explicit_handle_kind_is_kept() {
        let args = ShareArgs {
            handle_kind: Some(HandleKindArg::D3d11Texture),
            ..ShareArgs::default()
        };
        let config = args.resolve_for(Backend::Vulkan).unwrap();
        assert_eq!(config.handle_kind, HandleKind::D3D11Texture);
    }
}
