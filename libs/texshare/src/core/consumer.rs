// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Consumer side: receive the handshake, import, acknowledge, then read
//! frames.

use crate::core::gate::{FRAME_KEY, FrameAccess, GateRole};
use crate::core::handshake::{HandshakeMessage, encode_ack, parse_handle_line};
use crate::core::{
    ChannelRole, DuplicatedHandle, EventNamespace, FrameEvent, FrameGate, GpuInterop,
    HandshakeChannel, KeyedMutex, Result, ShareError, SharedImageDescriptor, SharedTextureConfig,
    ShutdownSignal, SyncScheme, SyncToken, Timeout, WaitOutcome,
};

/// Counters reported by [`Consumer::run`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumerStats {
    pub frames: u64,
    pub signaled: u64,
    pub timed_out: u64,
}

/// Owns the imported view of the producer's image.
pub struct Consumer<G: GpuInterop, E: FrameEvent> {
    gpu: G,
    image: G::Image,
    descriptor: SharedImageDescriptor,
    message: HandshakeMessage,
    token: SyncToken,
    gate: FrameGate<G::Mutex, E>,
    frame_poll: Timeout,
}

impl<G: GpuInterop, E: FrameEvent> Consumer<G, E> {
    /// Performs the consumer half of the handshake on a connected channel.
    ///
    /// The announced width and height are authoritative; the padded size is
    /// recomputed locally and checked against this device's own requirement
    /// before import.
    pub fn connect<N, C>(
        gpu: G,
        events: &N,
        mut channel: C,
        config: &SharedTextureConfig,
    ) -> Result<Self>
    where
        N: EventNamespace<Event = E>,
        C: HandshakeChannel,
    {
        if channel.role() != ChannelRole::Consumer {
            return Err(ShareError::Protocol(
                "consumer must own the client end of the channel".into(),
            ));
        }

        let line = channel.recv_line()?;
        let message = HandshakeMessage::parse_bytes(&line)?;
        let descriptor = SharedImageDescriptor::new(message.width, message.height, config.format)
            .map_err(|e| ShareError::Protocol(format!("announced image is unusable: {e}")))?;
        if (message.width, message.height) != (config.width, config.height) {
            tracing::debug!(
                "Consumer: producer announced {}x{}, configured {}x{}",
                message.width,
                message.height,
                config.width,
                config.height
            );
        }

        let semaphore_handle = match config.sync_scheme {
            SyncScheme::KeyedMutex => None,
            SyncScheme::Semaphore => {
                let line = channel.recv_line()?;
                Some(parse_handle_line(&String::from_utf8_lossy(&line))?)
            }
        };

        descriptor.verify_covers(gpu.query_required_size(&descriptor)?)?;

        // The wire value was duplicated into this process's table.
        let memory = DuplicatedHandle::new(message.memory_handle, std::process::id()).into_local();
        let image = gpu.import_memory(
            memory,
            config.handle_kind,
            descriptor.byte_size(),
            &descriptor,
        )?;

        let mutex = gpu.keyed_mutex(&image)?;
        {
            let guard = mutex.lock(FRAME_KEY, config.lock_timeout())?;
            gpu.create_view(&image)?;
            guard.unlock()?;
        }

        let event = events.open(&message.event_name)?;

        let token = match semaphore_handle {
            None => SyncToken::KeyedMutexEvent {
                event_name: message.event_name.clone(),
            },
            Some(value) => {
                let handle = DuplicatedHandle::new(value, std::process::id());
                let semaphore = gpu.import_semaphore(handle.into_local(), config.handle_kind)?;
                gpu.wait_initial_transition(&image, &semaphore)?;
                SyncToken::Semaphore {
                    event_name: message.event_name.clone(),
                    handle,
                }
            }
        };

        channel.send_line(&encode_ack())?;
        drop(channel);

        tracing::info!(
            "Consumer: imported {}x{} image ({} bytes) on {}",
            descriptor.width(),
            descriptor.height(),
            descriptor.byte_size(),
            gpu.backend_name()
        );

        let gate = FrameGate::new(GateRole::Consumer, mutex, event, config.lock_timeout());
        Ok(Self {
            gpu,
            image,
            descriptor,
            message,
            token,
            gate,
            frame_poll: config.frame_poll(),
        })
    }

    /// Waits for the producer's frame signal. Advisory only.
    pub fn wait_for_frame(&self, timeout: Timeout) -> Result<WaitOutcome> {
        self.gate.wait_for_frame(timeout)
    }

    pub fn begin_frame(&mut self) -> Result<FrameAccess<'_, G::Mutex, E>> {
        self.gate.begin_frame()
    }

    /// One full read: acquire, run `read`, release.
    pub fn consume_frame<F, T>(&mut self, read: F) -> Result<T>
    where
        F: FnOnce(&G, &G::Image, u64) -> Result<T>,
    {
        let access = self.gate.begin_frame()?;
        let value = read(&self.gpu, &self.image, access.frame_index())?;
        access.finish()?;
        Ok(value)
    }

    /// Polls the frame event and reads under the lock whether or not it
    /// fired, until `shutdown` or `max_frames`.
    pub fn run<F>(
        &mut self,
        shutdown: &ShutdownSignal,
        max_frames: Option<u64>,
        mut read: F,
    ) -> Result<ConsumerStats>
    where
        F: FnMut(&G, &G::Image, u64) -> Result<()>,
    {
        let mut stats = ConsumerStats::default();
        while !shutdown.is_requested() {
            if max_frames.is_some_and(|max| stats.frames >= max) {
                break;
            }
            match self.wait_for_frame(self.frame_poll)? {
                WaitOutcome::Signaled => stats.signaled += 1,
                WaitOutcome::TimedOut => stats.timed_out += 1,
            }
            self.consume_frame(&mut read)?;
            stats.frames += 1;
        }
        tracing::info!(
            "Consumer: stopped after {} frames ({} signalled, {} poll timeouts)",
            stats.frames,
            stats.signaled,
            stats.timed_out
        );
        Ok(stats)
    }

    pub fn gpu(&self) -> &G {
        &self.gpu
    }

    pub fn image(&self) -> &G::Image {
        &self.image
    }

    pub fn descriptor(&self) -> &SharedImageDescriptor {
        &self.descriptor
    }

    /// The handshake as received.
    pub fn handshake(&self) -> &HandshakeMessage {
        &self.message
    }

    /// How the producer's sync primitive reached this process.
    pub fn sync_token(&self) -> &SyncToken {
        &self.token
    }

    pub fn gate(&self) -> &FrameGate<G::Mutex, E> {
        &self.gate
    }
}
