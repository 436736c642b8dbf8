// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Direct3D 11 backend.
//!
//! D3D11 manages sharing itself: a texture created with
//! `SHARED_NTHANDLE | SHARED_KEYEDMUTEX` yields an NT handle through
//! `IDXGIResource1::CreateSharedHandle` and is reopened with
//! `ID3D11Device1::OpenSharedResource1`. Allocation sizes are never exposed,
//! so the importing side ignores the advertised size. Binary semaphores are
//! not available; only the keyed-mutex scheme works here.

mod d3d11_device;
mod d3d11_keyed_mutex;
mod d3d11_texture;

use std::convert::Infallible;

pub use d3d11_device::D3D11Device;
pub use d3d11_keyed_mutex::D3D11KeyedMutex;
pub use d3d11_texture::D3D11Texture;

use crate::core::descriptor::round_up;
use crate::core::handle::close_native;
use crate::core::{
    ExportableImage, ExportedHandle, GpuInterop, HandleKind, OsHandle, Result, ShareError,
    SharedImageDescriptor,
};

/// D3D11 reports no allocation size; textures are placed on 64 KiB pages.
const ESTIMATE_ALIGNMENT: u64 = 64 * 1024;

pub struct D3D11Interop {
    device: D3D11Device,
}

impl D3D11Interop {
    pub fn new() -> Result<Self> {
        Ok(Self {
            device: D3D11Device::new()?,
        })
    }

    pub fn device(&self) -> &D3D11Device {
        &self.device
    }

    fn check_kind(kind: HandleKind) -> Result<()> {
        if kind != HandleKind::D3D11Texture {
            return Err(ShareError::Configuration(format!(
                "D3D11 shares textures only as D3D11 NT handles, not {kind:?}"
            )));
        }
        Ok(())
    }
}

impl GpuInterop for D3D11Interop {
    type Image = D3D11Texture;
    type Mutex = D3D11KeyedMutex;
    type Semaphore = Infallible;

    fn backend_name(&self) -> &'static str {
        "d3d11"
    }

    fn query_required_size(&self, desc: &SharedImageDescriptor) -> Result<u64> {
        Ok(round_up(desc.nominal_size(), ESTIMATE_ALIGNMENT))
    }

    fn allocate_exportable(
        &self,
        desc: &SharedImageDescriptor,
        kind: HandleKind,
    ) -> Result<ExportableImage<D3D11Texture>> {
        Self::check_kind(kind)?;
        Ok(ExportableImage {
            image: D3D11Texture::create_shared(&self.device, desc)?,
            required_size: self.query_required_size(desc)?,
        })
    }

    fn export_memory(&self, image: &D3D11Texture, kind: HandleKind) -> Result<ExportedHandle> {
        Self::check_kind(kind)?;
        let handle = image.create_shared_handle()?;
        tracing::debug!("[d3d11] created shared handle {}", handle);
        Ok(ExportedHandle::native(handle, kind))
    }

    fn import_memory(
        &self,
        handle: OsHandle,
        kind: HandleKind,
        size: u64,
        desc: &SharedImageDescriptor,
    ) -> Result<D3D11Texture> {
        let opened = Self::check_kind(kind)
            .and_then(|()| D3D11Texture::open_shared(&self.device, handle, desc));
        // OpenSharedResource1 takes its own reference to the resource.
        close_native(handle);
        let texture = opened?;
        tracing::debug!(
            "[d3d11] opened shared texture {}x{} (advertised {} bytes)",
            desc.width(),
            desc.height(),
            size
        );
        Ok(texture)
    }

    fn keyed_mutex(&self, image: &D3D11Texture) -> Result<D3D11KeyedMutex> {
        Ok(D3D11KeyedMutex::new(image.keyed_mutex()?))
    }

    fn create_view(&self, image: &D3D11Texture) -> Result<()> {
        image.ensure_view(&self.device)
    }

    fn create_exportable_semaphore(&self, _kind: HandleKind) -> Result<Infallible> {
        Err(ShareError::NotSupported(
            "D3D11 has no exportable binary semaphores; use the keyed_mutex scheme".into(),
        ))
    }

    fn export_semaphore(&self, semaphore: &Infallible, _kind: HandleKind) -> Result<ExportedHandle> {
        match *semaphore {}
    }

    fn import_semaphore(&self, handle: OsHandle, _kind: HandleKind) -> Result<Infallible> {
        close_native(handle);
        Err(ShareError::NotSupported(
            "D3D11 cannot import binary semaphores".into(),
        ))
    }

    fn signal_initial_transition(&self, _image: &D3D11Texture, semaphore: &Infallible) -> Result<()> {
        match *semaphore {}
    }

    fn wait_initial_transition(&self, _image: &D3D11Texture, semaphore: &Infallible) -> Result<()> {
        match *semaphore {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{KeyedMutex, PixelFormat, Timeout, TargetProcess, Win32HandleTransfer};
    use crate::core::HandleTransfer;

    fn interop() -> Option<D3D11Interop> {
        D3D11Interop::new().ok()
    }

    fn desc() -> SharedImageDescriptor {
        SharedImageDescriptor::new(512, 512, PixelFormat::Bgra8Unorm).unwrap()
    }

    #[test]
    fn estimate_is_covered_by_padding() {
        let Some(gpu) = interop() else {
            return;
        };
        let desc = desc();
        let required = gpu.query_required_size(&desc).unwrap();
        assert_eq!(required, 1_048_576);
        assert!(desc.verify_covers(required).is_ok());
    }

    #[test]
    fn opaque_kinds_are_rejected() {
        let Some(gpu) = interop() else {
            return;
        };
        let err = gpu
            .allocate_exportable(&desc(), HandleKind::OpaqueWin32)
            .unwrap_err();
        assert!(matches!(err, ShareError::Configuration(_)));
    }

    #[test]
    fn shared_texture_reopens_with_the_same_keyed_mutex() {
        let Some(gpu) = interop() else {
            return;
        };
        let desc = desc();
        let kind = HandleKind::D3D11Texture;
        let shared = gpu.allocate_exportable(&desc, kind).unwrap();
        let exported = gpu.export_memory(&shared.image, kind).unwrap();

        let current = TargetProcess::current().unwrap();
        let dup = Win32HandleTransfer
            .duplicate(exported.handle(), &current)
            .unwrap();
        let imported = gpu
            .import_memory(dup.into_local(), kind, desc.byte_size(), &desc)
            .unwrap();
        assert!(imported.is_imported());

        let producer = gpu.keyed_mutex(&shared.image).unwrap();
        let consumer = gpu.keyed_mutex(&imported).unwrap();

        producer.acquire(0, Timeout::Infinite).unwrap();
        let err = consumer.acquire(0, Timeout::ZERO).unwrap_err();
        assert!(matches!(err, ShareError::LockTimeout { key: 0, .. }));
        producer.release(0).unwrap();

        let guard = consumer.lock(0, Timeout::from_millis(1000)).unwrap();
        gpu.create_view(&imported).unwrap();
        assert!(imported.has_view());
        guard.unlock().unwrap();
    }

    #[test]
    fn semaphores_are_not_supported() {
        let Some(gpu) = interop() else {
            return;
        };
        let err = gpu
            .create_exportable_semaphore(HandleKind::D3D11Texture)
            .unwrap_err();
        assert!(matches!(err, ShareError::NotSupported(_)));
    }
}
