// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use crossbeam_channel::{Receiver, Sender};

use crate::core::channel::{framed, strip_terminator};
use crate::core::{ChannelRole, HandshakeChannel, Result, ShareError};

/// In-memory handshake channel end.
#[derive(Debug)]
pub struct LoopbackChannel {
    role: ChannelRole,
    tx: Sender<Vec<u8>>,
    rx: Receiver<Vec<u8>>,
}

/// Connected producer and consumer ends.
pub fn channel_pair() -> (LoopbackChannel, LoopbackChannel) {
    let (to_consumer, from_producer) = crossbeam_channel::unbounded();
    let (to_producer, from_consumer) = crossbeam_channel::unbounded();
    (
        LoopbackChannel {
            role: ChannelRole::Producer,
            tx: to_consumer,
            rx: from_consumer,
        },
        LoopbackChannel {
            role: ChannelRole::Consumer,
            tx: to_producer,
            rx: from_producer,
        },
    )
}

impl HandshakeChannel for LoopbackChannel {
    fn role(&self) -> ChannelRole {
        self.role
    }

    fn send_line(&mut self, line: &str) -> Result<()> {
        self.tx
            .send(framed(line))
            .map_err(|_| ShareError::ChannelClosed("peer end dropped".into()))
    }

    fn recv_line(&mut self) -> Result<Vec<u8>> {
        self.rx
            .recv()
            .map(strip_terminator)
            .map_err(|_| ShareError::ChannelClosed("peer end dropped".into()))
    }
}
