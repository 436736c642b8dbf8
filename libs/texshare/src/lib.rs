// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Cross-process shared GPU textures.
//!
//! A producer process allocates an exportable image, duplicates its OS memory
//! handle into a consumer process and announces it over a one-shot handshake
//! channel. The consumer imports the same physical memory into its own graphics
//! API. From then on both sides take turns on the memory through a keyed mutex
//! bound to the memory object itself.
//!
//! The protocol core in [`core`] depends only on the [`core::GpuInterop`]
//! capability trait. Two GPU implementations ship with the crate:
//! [`vulkan`] (explicit export/import) and `d3d11` (driver-managed NT handles,
//! Windows only). [`loopback`] is an in-process model of the same contracts
//! used by tests and the `texshare demo` command.

#![allow(clippy::missing_safety_doc)] // Safety documented at each unsafe block

pub mod core;
pub mod loopback;

#[cfg(feature = "backend-vulkan")]
pub mod vulkan;

#[cfg(windows)]
pub mod d3d11;

pub use crate::core::*;
