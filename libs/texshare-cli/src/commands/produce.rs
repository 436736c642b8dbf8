// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use anyhow::Result;
use clap::Args;

use super::{Backend, ShareArgs};

#[derive(Args, Debug, Clone)]
pub struct ProduceArgs {
    #[command(flatten)]
    pub share: ShareArgs,

    /// GPU API to allocate the texture with
    #[arg(long, value_enum)]
    pub backend: Option<Backend>,

    /// Texture width in pixels
    #[arg(long)]
    pub width: Option<u32>,

    /// Texture height in pixels
    #[arg(long)]
    pub height: Option<u32>,

    /// Name of the frame-ready event
    #[arg(long)]
    pub event: Option<String>,

    /// Hand the texture to an already running consumer instead of launching one
    #[arg(long, value_name = "PID", conflicts_with = "consumer_cmd")]
    pub consumer_pid: Option<u32>,

    /// Stop after this many frames (default: run until Ctrl+C)
    #[arg(long)]
    pub frames: Option<u64>,

    /// Pause between frames, outside the lock
    #[arg(long, value_name = "MS", default_value = "16")]
    pub interval: u64,

    /// Consumer command line, launched after the channel exists
    #[arg(last = true, value_name = "CONSUMER_CMD")]
    pub consumer_cmd: Vec<String>,
}

/// Allocate, share with one consumer, then produce frames.
pub fn run(args: ProduceArgs) -> Result<()> {
    let backend = args.backend.unwrap_or_else(Backend::platform_default);
    let mut config = args.share.resolve_for(backend)?;
    if let Some(width) = args.width {
        config.width = width;
    }
    if let Some(height) = args.height {
        config.height = height;
    }
    if let Some(event) = &args.event {
        config.event_name = event.clone();
    }
    config.validate()?;

    tracing::info!(
        "Producer: {}x{} on {:?}, {:?} scheme, {:?} handles",
        config.width,
        config.height,
        backend,
        config.sync_scheme,
        config.handle_kind
    );

    platform::produce(backend, &config, &args)
}

#[cfg(windows)]
mod platform {
    use std::process::{Child, Command};
    use std::time::Duration;

    use anyhow::{Context, Result, bail};
    use texshare::{
        ChannelListener, GpuInterop, Producer, SharedTextureConfig, ShutdownSignal, TargetProcess,
        Win32Events, Win32HandleTransfer, install_quit_handler,
    };

    use super::{Backend, ProduceArgs};

    pub fn produce(backend: Backend, config: &SharedTextureConfig, args: &ProduceArgs) -> Result<()> {
        match backend {
            #[cfg(feature = "backend-vulkan")]
            Backend::Vulkan => produce_with(texshare::vulkan::VulkanInterop::new()?, config, args),
            Backend::D3d11 => produce_with(texshare::d3d11::D3D11Interop::new()?, config, args),
        }
    }

    fn produce_with<G: GpuInterop>(
        gpu: G,
        config: &SharedTextureConfig,
        args: &ProduceArgs,
    ) -> Result<()> {
        let mut producer = Producer::new(gpu, &Win32Events, config)?;

        // The channel must exist before the consumer is launched.
        let listener = ChannelListener::create(&config.channel_name)?;
        let (target, mut child) = launch_consumer(args)?;
        tracing::info!(
            "Producer: waiting for consumer pid {} on '{}'",
            target.pid(),
            listener.name()
        );

        let channel = listener.accept()?;
        producer.share(channel, &Win32HandleTransfer, &target)?;
        println!(
            "Shared {}x{} texture with pid {} (event '{}')",
            config.width,
            config.height,
            target.pid(),
            producer.event_name()
        );

        let shutdown = ShutdownSignal::new();
        install_quit_handler(&shutdown)?;

        let interval = Duration::from_millis(args.interval);
        let mut produced = 0u64;
        while !shutdown.is_requested() && args.frames.is_none_or(|max| produced < max) {
            producer.produce_frame(|_, _, index| {
                tracing::trace!("Producer: frame {}", index);
                Ok(())
            })?;
            produced += 1;
            std::thread::sleep(interval);
        }
        println!("Produced {} frames", produced);

        if let Some(child) = child.as_mut() {
            // Ctrl+C reaches the whole console group; a frame limit does not.
            if !shutdown.is_requested() {
                let _ = child.kill();
            }
            let status = child.wait().context("waiting for consumer")?;
            tracing::info!("Producer: consumer exited with {}", status);
        }
        Ok(())
    }

    /// Launches the consumer command or opens a running consumer by pid.
    fn launch_consumer(args: &ProduceArgs) -> Result<(TargetProcess, Option<Child>)> {
        if let Some(pid) = args.consumer_pid {
            return Ok((TargetProcess::open(pid)?, None));
        }
        let Some((program, rest)) = args.consumer_cmd.split_first() else {
            bail!("no consumer: pass `-- <consumer command>` or --consumer-pid");
        };
        let child = Command::new(program)
            .args(rest)
            .spawn()
            .with_context(|| format!("launching consumer '{program}'"))?;
        let target = TargetProcess::from_child(&child)?;
        Ok((target, Some(child)))
    }
}

#[cfg(not(windows))]
mod platform {
    use anyhow::{Result, bail};
    use texshare::SharedTextureConfig;

    use super::{Backend, ProduceArgs};

    pub fn produce(backend: Backend, _config: &SharedTextureConfig, _args: &ProduceArgs) -> Result<()> {
        bail!(
            "{:?}: handing a texture to another process needs Win32 handle duplication; \
             run `texshare demo` for the in-process model",
            backend
        )
    }
}
