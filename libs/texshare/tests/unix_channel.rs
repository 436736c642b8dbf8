// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Handshake over a real Unix-domain socket channel.

#![cfg(unix)]

use std::thread;

use texshare::loopback::{
    LoopbackEvents, LoopbackGpu, LoopbackKernel, LoopbackTransfer, SizeModel,
};
use texshare::{
    Channel, ChannelListener, Consumer, HandleKind, Producer, SharedTextureConfig, SyncScheme,
    Timeout,
};

fn unique_name(tag: &str) -> String {
    format!("texshare_it_{tag}_{}", std::process::id())
}

#[test]
fn test_handshake_over_socket() {
    let name = unique_name("handshake");
    let config = SharedTextureConfig {
        channel_name: name.clone(),
        handle_kind: HandleKind::OpaqueFd,
        sync_scheme: SyncScheme::Semaphore,
        ..SharedTextureConfig::default()
    };

    let kernel = LoopbackKernel::new();
    let producer_process = kernel.spawn_process();
    let consumer_process = kernel.spawn_process();

    let mut producer = Producer::new(
        LoopbackGpu::new(&producer_process, SizeModel::Explicit),
        &LoopbackEvents::new(&kernel),
        &config,
    )
    .unwrap();
    let listener = ChannelListener::create(&name).unwrap();
    let socket = listener.path().to_path_buf();
    assert!(socket.exists());

    let consumer = {
        let kernel = kernel.clone();
        let process = consumer_process.clone();
        let config = config.clone();
        thread::spawn(move || {
            let channel = Channel::connect(&config.channel_name, Timeout::from_millis(5_000))?;
            Consumer::connect(
                LoopbackGpu::new(&process, SizeModel::Implicit),
                &LoopbackEvents::new(&kernel),
                channel,
                &config,
            )
        })
    };

    let channel = listener.accept().unwrap();
    producer
        .share(
            channel,
            &LoopbackTransfer::new(&producer_process),
            &consumer_process,
        )
        .unwrap();
    let consumer = consumer.join().unwrap().unwrap();

    assert!(
        producer
            .shared_image()
            .image()
            .shares_memory_with(consumer.image())
    );
    // The channel is closed once the acknowledgement arrives.
    assert!(!socket.exists());
}
