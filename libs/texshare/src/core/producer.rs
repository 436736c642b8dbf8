// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Producer side: allocate, export, hand off, then write frames.

use crate::core::allocator::ExportedSemaphore;
use crate::core::gate::{FrameAccess, GateRole};
use crate::core::handshake::{EventName, HandshakeMessage, encode_handle_line, is_ack};
use crate::core::{
    ChannelRole, EventNamespace, FrameEvent, FrameGate, GpuInterop, HandleTransfer,
    HandshakeChannel, Result, ShareError, SharedImage, SharedTextureConfig, ShutdownSignal,
    create_sync_primitive,
};

/// Owns the shared image for the lifetime of the process.
pub struct Producer<G: GpuInterop, E: FrameEvent> {
    gpu: G,
    shared: SharedImage<G>,
    semaphore: Option<ExportedSemaphore<G>>,
    event_name: EventName,
    gate: FrameGate<G::Mutex, E>,
    shared_with: Option<u32>,
}

impl<G: GpuInterop, E: FrameEvent> Producer<G, E> {
    /// Allocates the exportable image and creates its sync primitive.
    pub fn new<N>(gpu: G, events: &N, config: &SharedTextureConfig) -> Result<Self>
    where
        N: EventNamespace<Event = E>,
    {
        config.validate()?;
        let descriptor = config.descriptor()?;
        let event_name = config.event_name()?;

        let shared = SharedImage::allocate(&gpu, descriptor, config.handle_kind)?;
        let sync = create_sync_primitive(
            &gpu,
            events,
            config.sync_scheme,
            &event_name,
            config.handle_kind,
        )?;
        let mutex = gpu.keyed_mutex(shared.image())?;
        let gate = FrameGate::new(
            GateRole::Producer,
            mutex,
            sync.event,
            config.lock_timeout(),
        );

        Ok(Self {
            gpu,
            shared,
            semaphore: sync.semaphore,
            event_name,
            gate,
            shared_with: None,
        })
    }

    /// Runs the handshake with a launched consumer.
    ///
    /// Duplicates the memory handle into `target`, sends the handshake line
    /// (plus the semaphore line in the semaphore scheme), reads until a
    /// non-blank acknowledgement arrives and closes the channel.
    pub fn share<C, T>(&mut self, mut channel: C, transfer: &T, target: &T::Process) -> Result<()>
    where
        C: HandshakeChannel,
        T: HandleTransfer,
    {
        if channel.role() != ChannelRole::Producer {
            return Err(ShareError::Protocol(
                "producer must own the server end of the channel".into(),
            ));
        }
        if let Some(pid) = self.shared_with {
            return Err(ShareError::Protocol(format!(
                "shared image already handed to pid {pid}; multiple consumers are unsupported"
            )));
        }

        // Signalled before the consumer can possibly queue its wait.
        if let Some(semaphore) = &self.semaphore {
            self.gpu
                .signal_initial_transition(self.shared.image(), &semaphore.semaphore)?;
        }

        let memory = transfer.duplicate(self.shared.exported().handle(), target)?;
        let descriptor = self.shared.descriptor();
        let message = HandshakeMessage {
            memory_handle: memory.wire_value(),
            width: descriptor.width(),
            height: descriptor.height(),
            event_name: self.event_name.clone(),
        };
        channel.send_line(&message.encode())?;

        if let Some(semaphore) = &self.semaphore {
            let handle = transfer.duplicate(semaphore.exported.handle(), target)?;
            channel.send_line(&encode_handle_line(handle.wire_value()))?;
        }

        loop {
            let reply = channel.recv_line()?;
            if is_ack(&String::from_utf8_lossy(&reply)) {
                break;
            }
            tracing::debug!("Producer: ignoring blank reply while waiting for ack");
        }
        drop(channel);

        self.shared_with = Some(memory.target_pid());
        tracing::info!(
            "Producer: shared {}x{} image with pid {} (event '{}')",
            descriptor.width(),
            descriptor.height(),
            memory.target_pid(),
            self.event_name
        );
        Ok(())
    }

    /// Acquires the frame gate.
    pub fn begin_frame(&mut self) -> Result<FrameAccess<'_, G::Mutex, E>> {
        self.gate.begin_frame()
    }

    /// One full frame: acquire, write through `render`, signal, release.
    /// A failed render releases without signalling.
    pub fn produce_frame<F>(&mut self, render: F) -> Result<()>
    where
        F: FnOnce(&G, &G::Image, u64) -> Result<()>,
    {
        let access = self.gate.begin_frame()?;
        render(&self.gpu, self.shared.image(), access.frame_index())?;
        access.finish()
    }

    /// Produces frames until `shutdown` is requested or `max_frames` is
    /// reached. Returns the number of frames produced.
    pub fn run<F>(
        &mut self,
        shutdown: &ShutdownSignal,
        max_frames: Option<u64>,
        mut render: F,
    ) -> Result<u64>
    where
        F: FnMut(&G, &G::Image, u64) -> Result<()>,
    {
        let start = self.gate.frames();
        while !shutdown.is_requested() {
            if max_frames.is_some_and(|max| self.gate.frames() - start >= max) {
                break;
            }
            self.produce_frame(&mut render)?;
        }
        let produced = self.gate.frames() - start;
        tracing::info!("Producer: stopped after {} frames", produced);
        Ok(produced)
    }

    pub fn gpu(&self) -> &G {
        &self.gpu
    }

    pub fn shared_image(&self) -> &SharedImage<G> {
        &self.shared
    }

    pub fn gate(&self) -> &FrameGate<G::Mutex, E> {
        &self.gate
    }

    pub fn event_name(&self) -> &EventName {
        &self.event_name
    }

    /// Pid of the consumer the image was handed to.
    pub fn shared_with(&self) -> Option<u32> {
        self.shared_with
    }
}
