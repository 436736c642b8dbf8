// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Producer and consumer on two simulated processes sharing one kernel.

use std::thread;

use texshare::loopback::{
    LoopbackEvent, LoopbackEvents, LoopbackGpu, LoopbackKernel, LoopbackProcess, LoopbackTransfer,
    SizeModel, channel_pair,
};
use texshare::{
    Consumer, FaultClass, GpuInterop, HandleKind, HandleTransfer, HandshakeChannel, Producer,
    ShareError, SharedTextureConfig, ShutdownSignal, SyncScheme, Timeout, WaitOutcome,
};

type LoopbackProducer = Producer<LoopbackGpu, LoopbackEvent>;
type LoopbackConsumer = Consumer<LoopbackGpu, LoopbackEvent>;

struct Session {
    producer: LoopbackProducer,
    consumer: LoopbackConsumer,
    producer_process: LoopbackProcess,
    consumer_process: LoopbackProcess,
}

fn config(scheme: SyncScheme) -> SharedTextureConfig {
    SharedTextureConfig {
        sync_scheme: scheme,
        handle_kind: HandleKind::OpaqueWin32,
        lock_timeout_ms: Some(5_000),
        frame_poll_ms: 20,
        ..SharedTextureConfig::default()
    }
}

/// Runs the handshake with the consumer on its own thread.
fn connect(
    config: &SharedTextureConfig,
    producer_model: SizeModel,
    consumer_model: SizeModel,
) -> texshare::Result<Session> {
    let kernel = LoopbackKernel::new();
    let producer_process = kernel.spawn_process();
    let consumer_process = kernel.spawn_process();

    let mut producer = Producer::new(
        LoopbackGpu::new(&producer_process, producer_model),
        &LoopbackEvents::new(&kernel),
        config,
    )?;

    let (server, client) = channel_pair();
    let consumer_thread = {
        let kernel = kernel.clone();
        let process = consumer_process.clone();
        let config = config.clone();
        thread::spawn(move || {
            Consumer::connect(
                LoopbackGpu::new(&process, consumer_model),
                &LoopbackEvents::new(&kernel),
                client,
                &config,
            )
        })
    };

    let shared = producer.share(
        server,
        &LoopbackTransfer::new(&producer_process),
        &consumer_process,
    );
    let consumer = consumer_thread.join().expect("consumer thread panicked")?;
    shared?;

    Ok(Session {
        producer,
        consumer,
        producer_process,
        consumer_process,
    })
}

#[test]
fn test_keyed_mutex_scheme_shares_one_memory_object() {
    let session = connect(
        &config(SyncScheme::KeyedMutex),
        SizeModel::Explicit,
        SizeModel::Implicit,
    )
    .unwrap();

    let producer_image = session.producer.shared_image().image();
    let consumer_image = session.consumer.image();
    assert!(producer_image.shares_memory_with(consumer_image));
    assert!(consumer_image.is_imported());
    assert_eq!(consumer_image.size(), 2_097_152);

    let handshake = session.consumer.handshake();
    assert_eq!((handshake.width, handshake.height), (512, 512));
    assert_eq!(handshake.event_name.as_str(), "SharedTextureTestFrameReady");
    assert_eq!(
        session.producer.shared_with(),
        Some(session.consumer_process.pid())
    );
}

#[test]
fn test_handle_value_is_only_valid_in_the_consumer() {
    let session = connect(
        &config(SyncScheme::KeyedMutex),
        SizeModel::Explicit,
        SizeModel::Explicit,
    )
    .unwrap();

    let exported = session.producer.shared_image().exported().handle();
    assert!(session.producer_process.is_valid(exported));
    assert!(!session.consumer_process.is_valid(exported));
    // The consumer's import consumed its duplicate.
    assert_eq!(session.consumer_process.handle_count(), 0);
}

#[test]
fn test_duplicate_names_the_same_object_in_the_target() {
    let kernel = LoopbackKernel::new();
    let source = kernel.spawn_process();
    let target = kernel.spawn_process();
    let gpu = LoopbackGpu::new(&source, SizeModel::Explicit);
    let desc = config(SyncScheme::KeyedMutex).descriptor().unwrap();

    let image = gpu
        .allocate_exportable(&desc, HandleKind::OpaqueWin32)
        .unwrap()
        .image;
    let exported = gpu.export_memory(&image, HandleKind::OpaqueWin32).unwrap();

    let dup = LoopbackTransfer::new(&source)
        .duplicate(exported.handle(), &target)
        .unwrap();
    assert_eq!(dup.target_pid(), target.pid());
    assert_ne!(dup.wire_value(), exported.handle().raw());
    assert!(source.same_object(exported.handle(), &target, dup.into_local()));
}

#[test]
fn test_semaphore_scheme_waits_for_initial_transition() {
    let session = connect(
        &config(SyncScheme::Semaphore),
        SizeModel::Explicit,
        SizeModel::Implicit,
    )
    .unwrap();
    assert!(session.consumer.image().is_transitioned());

    let token = session.consumer.sync_token();
    assert_eq!(token.scheme(), SyncScheme::Semaphore);
    assert_eq!(token.event_name().as_str(), "SharedTextureTestFrameReady");
}

#[test]
fn test_frames_are_never_torn() {
    const FRAMES: u64 = 40;

    let Session {
        mut producer,
        mut consumer,
        ..
    } = connect(
        &config(SyncScheme::KeyedMutex),
        SizeModel::Explicit,
        SizeModel::Implicit,
    )
    .unwrap();

    let writer = thread::spawn(move || {
        let shutdown = ShutdownSignal::new();
        producer
            .run(&shutdown, Some(FRAMES), |_, image, frame| {
                image.fill((frame % 251) as u8 + 1, 4096);
                Ok(())
            })
            .unwrap()
    });

    let shutdown = ShutdownSignal::new();
    let stats = consumer
        .run(&shutdown, Some(FRAMES), |_, image, _| {
            let pixels = image.snapshot();
            let first = pixels[0];
            assert!(
                pixels.iter().all(|&b| b == first),
                "torn frame: mixed values under the lock"
            );
            Ok(())
        })
        .unwrap();

    assert_eq!(writer.join().unwrap(), FRAMES);
    assert_eq!(stats.frames, FRAMES);
    assert_eq!(stats.signaled + stats.timed_out, FRAMES);
}

#[test]
fn test_consumer_sees_producer_pixels() {
    let mut session = connect(
        &config(SyncScheme::KeyedMutex),
        SizeModel::Explicit,
        SizeModel::Explicit,
    )
    .unwrap();

    session
        .producer
        .produce_frame(|_, image, _| image.write(0, &[0x10, 0x20, 0x30, 0xff]))
        .unwrap();
    assert_eq!(
        session.consumer.wait_for_frame(Timeout::ZERO).unwrap(),
        WaitOutcome::Signaled
    );
    let pixel = session
        .consumer
        .consume_frame(|_, image, _| image.read(0, 4))
        .unwrap();
    assert_eq!(pixel, vec![0x10, 0x20, 0x30, 0xff]);
}

#[test]
fn test_undersized_padding_is_a_configuration_fault() {
    // A driver that needs more than twice the nominal size.
    let err = connect(
        &config(SyncScheme::KeyedMutex),
        SizeModel::Fixed(4 * 1024 * 1024),
        SizeModel::Explicit,
    )
    .err()
    .expect("allocation must be rejected");
    assert_eq!(err.fault_class(), FaultClass::Configuration);
}

#[test]
fn test_second_share_is_rejected() {
    let mut session = connect(
        &config(SyncScheme::KeyedMutex),
        SizeModel::Explicit,
        SizeModel::Explicit,
    )
    .unwrap();
    let (server, _client) = channel_pair();
    let err = session
        .producer
        .share(
            server,
            &LoopbackTransfer::new(&session.producer_process),
            &session.consumer_process,
        )
        .unwrap_err();
    assert!(matches!(err, ShareError::Protocol(_)));
}

#[test]
fn test_malformed_handshake_aborts_the_consumer() {
    let kernel = LoopbackKernel::new();
    let process = kernel.spawn_process();
    let (mut server, client) = channel_pair();
    server.send_line("12 abc 512 Evt\n").unwrap();

    let err = Consumer::connect(
        LoopbackGpu::new(&process, SizeModel::Explicit),
        &LoopbackEvents::new(&kernel),
        client,
        &config(SyncScheme::KeyedMutex),
    )
    .err()
    .expect("malformed line must abort");
    assert!(matches!(err, ShareError::MalformedHandshake { .. }));
}

#[test]
fn test_producer_gone_before_handshake_is_a_protocol_fault() {
    let kernel = LoopbackKernel::new();
    let process = kernel.spawn_process();
    let (server, client) = channel_pair();
    drop(server);

    let err = Consumer::connect(
        LoopbackGpu::new(&process, SizeModel::Explicit),
        &LoopbackEvents::new(&kernel),
        client,
        &config(SyncScheme::KeyedMutex),
    )
    .err()
    .expect("closed channel must abort");
    assert!(matches!(err, ShareError::ChannelClosed(_)));
    assert_eq!(err.fault_class(), FaultClass::Protocol);
}
