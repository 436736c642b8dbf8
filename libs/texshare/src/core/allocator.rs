// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Producer-side allocation of the shared image and its sync primitive.

use crate::core::handshake::EventName;
use crate::core::interop::export_padded;
use crate::core::{
    EventNamespace, ExportedHandle, ExportedMemory, GpuInterop, HandleKind, Result,
    SharedImageDescriptor, SyncScheme,
};

/// The producer's shared image: local image, exported memory and geometry.
pub struct SharedImage<G: GpuInterop> {
    image: G::Image,
    exported: ExportedMemory,
    descriptor: SharedImageDescriptor,
    required_size: u64,
}

impl<G: GpuInterop> SharedImage<G> {
    /// Allocates exportable memory, checks the padded size against the
    /// driver's own requirement and exports the memory handle.
    pub fn allocate(gpu: &G, descriptor: SharedImageDescriptor, kind: HandleKind) -> Result<Self> {
        let allocation = gpu.allocate_exportable(&descriptor, kind)?;
        descriptor.verify_covers(allocation.required_size)?;
        let exported = export_padded(gpu, &allocation.image, kind, &descriptor)?;

        tracing::info!(
            "SharedImage: allocated {}x{} on {} (required {} bytes, advertised {} bytes, handle {})",
            descriptor.width(),
            descriptor.height(),
            gpu.backend_name(),
            allocation.required_size,
            exported.size(),
            exported.handle()
        );

        Ok(Self {
            image: allocation.image,
            exported,
            descriptor,
            required_size: allocation.required_size,
        })
    }

    pub fn image(&self) -> &G::Image {
        &self.image
    }

    pub fn exported(&self) -> &ExportedMemory {
        &self.exported
    }

    pub fn descriptor(&self) -> &SharedImageDescriptor {
        &self.descriptor
    }

    /// Size the local allocation actually used.
    pub fn required_size(&self) -> u64 {
        self.required_size
    }
}

/// Producer-side synchronization objects for one shared image.
pub struct SyncPrimitive<G: GpuInterop, E> {
    pub event_name: EventName,
    pub event: E,
    pub semaphore: Option<ExportedSemaphore<G>>,
}

/// Exportable semaphore and its exported handle.
pub struct ExportedSemaphore<G: GpuInterop> {
    pub semaphore: G::Semaphore,
    pub exported: ExportedHandle,
}

/// Creates the frame event and, for the semaphore scheme, an exported
/// semaphore alongside it.
pub fn create_sync_primitive<G, N>(
    gpu: &G,
    events: &N,
    scheme: SyncScheme,
    event_name: &EventName,
    kind: HandleKind,
) -> Result<SyncPrimitive<G, N::Event>>
where
    G: GpuInterop,
    N: EventNamespace,
{
    let event = events.create(event_name)?;

    let semaphore = match scheme {
        SyncScheme::KeyedMutex => None,
        SyncScheme::Semaphore => {
            let semaphore = gpu.create_exportable_semaphore(kind)?;
            let exported = gpu.export_semaphore(&semaphore, kind)?;
            tracing::debug!("SyncPrimitive: exported semaphore as {}", exported.handle());
            Some(ExportedSemaphore {
                semaphore,
                exported,
            })
        }
    };

    tracing::info!(
        "SyncPrimitive: created event '{}' ({:?} scheme)",
        event_name,
        scheme
    );

    Ok(SyncPrimitive {
        event_name: event_name.clone(),
        event,
        semaphore,
    })
}
