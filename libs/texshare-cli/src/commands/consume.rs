// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use anyhow::Result;
use clap::Args;

use super::{Backend, ShareArgs};

#[derive(Args, Debug, Clone)]
pub struct ConsumeArgs {
    #[command(flatten)]
    pub share: ShareArgs,

    /// GPU API to import the texture with
    #[arg(long, value_enum)]
    pub backend: Option<Backend>,

    /// Stop after this many frames (default: run until Ctrl+C)
    #[arg(long)]
    pub frames: Option<u64>,
}

/// Connect, import and read frames until told to stop.
pub fn run(args: ConsumeArgs) -> Result<()> {
    let backend = args.backend.unwrap_or_else(Backend::platform_default);
    let config = args.share.resolve_for(backend)?;
    config.validate()?;

    tracing::info!(
        "Consumer: connecting to '{}' on {:?}, {:?} scheme",
        config.channel_name,
        backend,
        config.sync_scheme
    );

    platform::consume(backend, &config, args.frames)
}

#[cfg(windows)]
mod platform {
    use anyhow::Result;
    use texshare::{
        Channel, Consumer, GpuInterop, SharedTextureConfig, ShutdownSignal, Win32Events,
        install_quit_handler,
    };

    use super::Backend;

    pub fn consume(backend: Backend, config: &SharedTextureConfig, frames: Option<u64>) -> Result<()> {
        match backend {
            #[cfg(feature = "backend-vulkan")]
            Backend::Vulkan => consume_with(texshare::vulkan::VulkanInterop::new()?, config, frames),
            Backend::D3d11 => consume_with(texshare::d3d11::D3D11Interop::new()?, config, frames),
        }
    }

    fn consume_with<G: GpuInterop>(
        gpu: G,
        config: &SharedTextureConfig,
        frames: Option<u64>,
    ) -> Result<()> {
        let channel = Channel::connect(&config.channel_name, config.connect_timeout())?;
        let mut consumer = Consumer::connect(gpu, &Win32Events, channel, config)?;

        let handshake = consumer.handshake();
        println!(
            "Imported {}x{} texture (event '{}')",
            handshake.width, handshake.height, handshake.event_name
        );

        let shutdown = ShutdownSignal::new();
        install_quit_handler(&shutdown)?;

        let stats = consumer.run(&shutdown, frames, |_, _, index| {
            tracing::trace!("Consumer: frame {}", index);
            Ok(())
        })?;
        println!(
            "Read {} frames ({} signalled, {} poll timeouts)",
            stats.frames, stats.signaled, stats.timed_out
        );
        Ok(())
    }
}

#[cfg(not(windows))]
mod platform {
    use anyhow::{Result, bail};
    use texshare::SharedTextureConfig;

    use super::Backend;

    pub fn consume(backend: Backend, _config: &SharedTextureConfig, _frames: Option<u64>) -> Result<()> {
        bail!(
            "{:?}: importing another process's texture needs Win32 handle duplication; \
             run `texshare demo` for the in-process model",
            backend
        )
    }
}
