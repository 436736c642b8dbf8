// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Both roles in one process: two simulated handle tables over a real
//! handshake channel.

use std::thread;
use std::time::Instant;

use anyhow::{Context, Result, anyhow, bail};
use clap::Args;
use texshare::loopback::{LoopbackEvents, LoopbackGpu, LoopbackKernel, LoopbackTransfer, SizeModel};
use texshare::{
    Channel, ChannelListener, Consumer, GpuInterop, HandleKind, Producer, SharedTextureConfig, ShutdownSignal,
    install_quit_handler,
};

use super::SchemeArg;

#[derive(Args, Debug, Clone)]
pub struct DemoArgs {
    /// Frames to produce and read
    #[arg(long, default_value = "60")]
    pub frames: u64,

    /// Synchronization scheme
    #[arg(long, value_enum, default_value = "keyed-mutex")]
    pub scheme: SchemeArg,

    /// Texture width in pixels
    #[arg(long, default_value = "512")]
    pub width: u32,

    /// Texture height in pixels
    #[arg(long, default_value = "512")]
    pub height: u32,
}

pub fn run(args: DemoArgs) -> Result<()> {
    let config = SharedTextureConfig {
        width: args.width,
        height: args.height,
        channel_name: format!("TexshareDemo{}", std::process::id()),
        sync_scheme: args.scheme.into(),
        handle_kind: HandleKind::OpaqueWin32,
        lock_timeout_ms: Some(5_000),
        frame_poll_ms: 20,
        connect_timeout_ms: Some(5_000),
        ..SharedTextureConfig::default()
    };
    config.validate()?;

    let shutdown = ShutdownSignal::new();
    install_quit_handler(&shutdown)?;

    let kernel = LoopbackKernel::new();
    let producer_process = kernel.spawn_process();
    let consumer_process = kernel.spawn_process();
    let started = Instant::now();

    // Explicit-memory producer, driver-managed consumer.
    let mut producer = Producer::new(
        LoopbackGpu::new(&producer_process, SizeModel::Explicit),
        &LoopbackEvents::new(&kernel),
        &config,
    )?;
    let listener = ChannelListener::create(&config.channel_name)?;

    let consumer_thread = {
        let kernel = kernel.clone();
        let process = consumer_process.clone();
        let config = config.clone();
        thread::Builder::new()
            .name("texshare-consumer".into())
            .spawn(move || {
                let channel = Channel::connect(&config.channel_name, config.connect_timeout())?;
                Consumer::connect(
                    LoopbackGpu::new(&process, SizeModel::Implicit),
                    &LoopbackEvents::new(&kernel),
                    channel,
                    &config,
                )
            })
            .context("spawning consumer thread")?
    };

    let channel = listener.accept()?;
    let shared = producer.share(
        channel,
        &LoopbackTransfer::new(&producer_process),
        &consumer_process,
    );
    let mut consumer = consumer_thread
        .join()
        .map_err(|_| anyhow!("consumer thread panicked"))??;
    shared?;
    let handshake_time = started.elapsed();

    println!(
        "Handshake: {}x{} image, pid {} -> pid {}, {} bytes imported via {}",
        config.width,
        config.height,
        producer_process.pid(),
        consumer_process.pid(),
        consumer.descriptor().byte_size(),
        consumer.gpu().backend_name()
    );

    let frames = args.frames;
    let producer_shutdown = shutdown.clone();
    let producer_thread = thread::Builder::new()
        .name("texshare-producer".into())
        .spawn(move || {
            producer.run(&producer_shutdown, Some(frames), |_, image, frame| {
                image.fill((frame % 251) as u8 + 1, 4096);
                Ok(())
            })
        })
        .context("spawning producer thread")?;

    let mut torn = 0u64;
    let stats = consumer.run(&shutdown, Some(frames), |_, image, frame| {
        let pixels = image.snapshot();
        if pixels.iter().any(|&b| b != pixels[0]) {
            tracing::warn!("Demo: frame {} read with mixed pixel values", frame);
            torn += 1;
        }
        Ok(())
    })?;
    let produced = producer_thread
        .join()
        .map_err(|_| anyhow!("producer thread panicked"))??;

    println!();
    println!("  Handshake:       {:.2?}", handshake_time);
    println!("  Produced:        {}", produced);
    println!("  Read:            {}", stats.frames);
    println!("  Signalled reads: {}", stats.signaled);
    println!("  Poll timeouts:   {}", stats.timed_out);
    println!("  Torn frames:     {}", torn);
    println!("  Elapsed:         {:.2?}", started.elapsed());

    if torn > 0 {
        bail!("{torn} frames were read while the producer was writing");
    }
    Ok(())
}
