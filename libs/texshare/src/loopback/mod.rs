// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! In-process model of the OS and GPU contracts the protocol relies on.
//!
//! A [`LoopbackKernel`] owns kernel objects (memory, semaphores) and named
//! events. Each [`LoopbackProcess`] has its own handle table with a disjoint
//! numeric range, so a handle value from one process never resolves in
//! another. [`LoopbackGpu`] implements [`crate::core::GpuInterop`] on top of
//! byte-backed memory objects. Threads stand in for the two processes.

mod channel;
mod event;
mod gpu;
mod kernel;
mod keyed_mutex;

pub use channel::{LoopbackChannel, channel_pair};
pub use event::{LoopbackEvent, LoopbackEvents, LoopbackSemaphore};
pub use gpu::{LoopbackGpu, LoopbackImage, SizeModel};
pub use kernel::{LoopbackKernel, LoopbackProcess, LoopbackTransfer};
pub use keyed_mutex::LoopbackKeyedMutex;
