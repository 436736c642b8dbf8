// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

pub mod allocator;
pub mod channel;
pub mod config;
pub mod consumer;
pub mod descriptor;
pub mod error;
pub mod gate;
pub mod handle;
pub mod handshake;
pub mod interop;
#[cfg(windows)]
pub mod named_event;
pub mod producer;
pub mod signals;
pub mod sync;
pub mod transfer;

pub use allocator::{ExportedSemaphore, SharedImage, SyncPrimitive, create_sync_primitive};
pub use channel::{Channel, ChannelListener, ChannelRole, HandshakeChannel};
pub use config::SharedTextureConfig;
pub use consumer::{Consumer, ConsumerStats};
pub use descriptor::{PixelFormat, SharedImageDescriptor};
pub use error::*;
pub use gate::{FrameAccess, FrameGate, GateRole, GateState};
pub use handle::{DuplicatedHandle, ExportedHandle, ExportedMemory, HandleKind, OsHandle};
pub use handshake::{EventName, HandshakeMessage};
pub use interop::{ExportableImage, GpuInterop};
#[cfg(windows)]
pub use named_event::{Win32Event, Win32Events};
pub use producer::Producer;
pub use signals::{ShutdownSignal, install_quit_handler};
pub use sync::{
    EventNamespace, FrameEvent, KeyedMutex, KeyedMutexGuard, SyncScheme, SyncToken, Timeout,
    WaitOutcome,
};
pub use transfer::HandleTransfer;
#[cfg(windows)]
pub use transfer::{TargetProcess, Win32HandleTransfer};
