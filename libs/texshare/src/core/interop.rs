// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! GPU capability interface.
//!
//! The producer and consumer protocol code is written against this trait only.
//! Vulkan implements it with explicit export/import calls, D3D11 with
//! driver-managed shared NT handles.

use crate::core::{
    ExportedHandle, ExportedMemory, HandleKind, KeyedMutex, OsHandle, Result,
    SharedImageDescriptor,
};

/// Freshly allocated exportable image plus the size the driver asked for.
#[derive(Debug)]
pub struct ExportableImage<I> {
    pub image: I,
    pub required_size: u64,
}

pub trait GpuInterop {
    /// Locally usable image (owned; released on drop).
    type Image: Send;
    /// Keyed mutex bound to an image's memory.
    type Mutex: KeyedMutex;
    /// Exportable binary semaphore.
    type Semaphore: Send;

    /// Short backend name for logs.
    fn backend_name(&self) -> &'static str;

    /// Driver-reported allocation size for an image of this shape.
    fn query_required_size(&self, desc: &SharedImageDescriptor) -> Result<u64>;

    /// Allocates an image whose memory is flagged exportable as `kind` at
    /// allocation time. No compatible memory type is a configuration fault.
    fn allocate_exportable(
        &self,
        desc: &SharedImageDescriptor,
        kind: HandleKind,
    ) -> Result<ExportableImage<Self::Image>>;

    /// Exports the image's memory as a handle owned by this process.
    fn export_memory(&self, image: &Self::Image, kind: HandleKind) -> Result<ExportedHandle>;

    /// Imports memory from a handle valid in this process and binds a new
    /// image matching `desc` to it at offset 0. `size` is the padded size, used
    /// as is. Ownership of `handle` passes to the backend.
    fn import_memory(
        &self,
        handle: OsHandle,
        kind: HandleKind,
        size: u64,
        desc: &SharedImageDescriptor,
    ) -> Result<Self::Image>;

    /// The keyed mutex carried by the image's memory object.
    fn keyed_mutex(&self, image: &Self::Image) -> Result<Self::Mutex>;

    /// Creates the mutable view over an imported image. Callers hold key 0.
    fn create_view(&self, _image: &Self::Image) -> Result<()> {
        Ok(())
    }

    fn create_exportable_semaphore(&self, kind: HandleKind) -> Result<Self::Semaphore>;

    fn export_semaphore(&self, semaphore: &Self::Semaphore, kind: HandleKind)
    -> Result<ExportedHandle>;

    fn import_semaphore(&self, handle: OsHandle, kind: HandleKind) -> Result<Self::Semaphore>;

    /// Producer side: performs the image's initial layout transition and
    /// signals `semaphore` when it completes.
    fn signal_initial_transition(
        &self,
        image: &Self::Image,
        semaphore: &Self::Semaphore,
    ) -> Result<()>;

    /// Consumer side: makes the queue wait on `semaphore` before any work on
    /// `image` is issued.
    fn wait_initial_transition(&self, image: &Self::Image, semaphore: &Self::Semaphore)
    -> Result<()>;
}

/// Convenience wrapper pairing an exported handle with the descriptor's padded
/// size.
pub fn export_padded<G: GpuInterop>(
    gpu: &G,
    image: &G::Image,
    kind: HandleKind,
    desc: &SharedImageDescriptor,
) -> Result<ExportedMemory> {
    let handle = gpu.export_memory(image, kind)?;
    Ok(ExportedMemory::new(handle, desc.byte_size()))
}
