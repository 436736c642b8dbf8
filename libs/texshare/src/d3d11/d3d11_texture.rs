// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Shared D3D11 textures (NT handle + keyed mutex).

use parking_lot::Mutex;
use windows::Win32::Graphics::Direct3D11::{
    D3D11_BIND_RENDER_TARGET, D3D11_BIND_SHADER_RESOURCE, D3D11_RESOURCE_MISC_SHARED_KEYEDMUTEX,
    D3D11_RESOURCE_MISC_SHARED_NTHANDLE, D3D11_TEXTURE2D_DESC, D3D11_USAGE_DEFAULT,
    ID3D11RenderTargetView, ID3D11Texture2D,
};
use windows::Win32::Graphics::Dxgi::Common::{
    DXGI_FORMAT, DXGI_FORMAT_B8G8R8A8_UNORM, DXGI_SAMPLE_DESC,
};
use windows::Win32::Graphics::Dxgi::{
    DXGI_SHARED_RESOURCE_READ, DXGI_SHARED_RESOURCE_WRITE, IDXGIKeyedMutex, IDXGIResource1,
};
use windows::core::{Interface, PCWSTR};

use super::D3D11Device;
use crate::core::{OsHandle, PixelFormat, Result, ShareError, SharedImageDescriptor};

fn pixel_format_to_dxgi(format: PixelFormat) -> DXGI_FORMAT {
    match format {
        PixelFormat::Bgra8Unorm => DXGI_FORMAT_B8G8R8A8_UNORM,
    }
}

/// A 2D texture whose memory is shared through an NT handle and guarded by
/// the DXGI keyed mutex the driver attaches to it.
pub struct D3D11Texture {
    texture: ID3D11Texture2D,
    descriptor: SharedImageDescriptor,
    imported: bool,
    view: Mutex<Option<ID3D11RenderTargetView>>,
}

impl D3D11Texture {
    /// Creates a texture flagged for NT-handle sharing with a keyed mutex.
    pub fn create_shared(device: &D3D11Device, descriptor: &SharedImageDescriptor) -> Result<Self> {
        let desc = D3D11_TEXTURE2D_DESC {
            Width: descriptor.width(),
            Height: descriptor.height(),
            MipLevels: 1,
            ArraySize: 1,
            Format: pixel_format_to_dxgi(descriptor.format()),
            SampleDesc: DXGI_SAMPLE_DESC {
                Count: 1,
                Quality: 0,
            },
            Usage: D3D11_USAGE_DEFAULT,
            BindFlags: (D3D11_BIND_SHADER_RESOURCE.0 | D3D11_BIND_RENDER_TARGET.0) as u32,
            CPUAccessFlags: 0,
            MiscFlags: (D3D11_RESOURCE_MISC_SHARED_NTHANDLE.0
                | D3D11_RESOURCE_MISC_SHARED_KEYEDMUTEX.0) as u32,
        };

        let mut texture = None;
        unsafe { device.device().CreateTexture2D(&desc, None, Some(&mut texture)) }
            .map_err(|e| ShareError::Gpu(format!("Failed to create shared texture: {e}")))?;
        let texture =
            texture.ok_or_else(|| ShareError::Gpu("CreateTexture2D returned no texture".into()))?;

        Ok(Self::wrap(texture, descriptor, false))
    }

    /// Opens a texture shared by another process. The texture's own
    /// description must match `descriptor`.
    pub fn open_shared(
        device: &D3D11Device,
        handle: OsHandle,
        descriptor: &SharedImageDescriptor,
    ) -> Result<Self> {
        let texture: ID3D11Texture2D = unsafe { device.device1().OpenSharedResource1(handle.as_win32()) }
            .map_err(|e| ShareError::Gpu(format!("OpenSharedResource1({handle}) failed: {e}")))?;

        let mut desc = D3D11_TEXTURE2D_DESC::default();
        unsafe { texture.GetDesc(&mut desc) };
        if desc.Width != descriptor.width()
            || desc.Height != descriptor.height()
            || desc.Format != pixel_format_to_dxgi(descriptor.format())
        {
            return Err(ShareError::Protocol(format!(
                "shared texture is {}x{} {:?}, handshake announced {}x{} {:?}",
                desc.Width,
                desc.Height,
                desc.Format,
                descriptor.width(),
                descriptor.height(),
                descriptor.format()
            )));
        }

        Ok(Self::wrap(texture, descriptor, true))
    }

    fn wrap(texture: ID3D11Texture2D, descriptor: &SharedImageDescriptor, imported: bool) -> Self {
        Self {
            texture,
            descriptor: *descriptor,
            imported,
            view: Mutex::new(None),
        }
    }

    /// New NT handle to the texture, owned by the caller.
    pub fn create_shared_handle(&self) -> Result<OsHandle> {
        let resource: IDXGIResource1 = self
            .texture
            .cast()
            .map_err(|e| ShareError::Gpu(format!("texture is not an IDXGIResource1: {e}")))?;
        let handle = unsafe {
            resource.CreateSharedHandle(
                None,
                DXGI_SHARED_RESOURCE_READ | DXGI_SHARED_RESOURCE_WRITE,
                PCWSTR::null(),
            )
        }
        .map_err(|e| ShareError::Gpu(format!("CreateSharedHandle failed: {e}")))?;
        Ok(OsHandle::from_win32(handle))
    }

    pub fn keyed_mutex(&self) -> Result<IDXGIKeyedMutex> {
        self.texture.cast().map_err(|e| {
            ShareError::Configuration(format!("texture carries no keyed mutex: {e}"))
        })
    }

    /// Creates the render target view once. Callers hold key 0.
    pub(crate) fn ensure_view(&self, device: &D3D11Device) -> Result<()> {
        let mut view = self.view.lock();
        if view.is_some() {
            return Ok(());
        }
        let mut created = None;
        unsafe {
            device
                .device()
                .CreateRenderTargetView(&self.texture, None, Some(&mut created))
        }
        .map_err(|e| ShareError::Gpu(format!("Failed to create render target view: {e}")))?;
        *view = created;
        Ok(())
    }

    pub fn texture(&self) -> &ID3D11Texture2D {
        &self.texture
    }

    pub fn descriptor(&self) -> &SharedImageDescriptor {
        &self.descriptor
    }

    pub fn is_imported(&self) -> bool {
        self.imported
    }

    pub fn has_view(&self) -> bool {
        self.view.lock().is_some()
    }
}

// D3D11Texture is Send + Sync because D3D11 resources are free-threaded
unsafe impl Send for D3D11Texture {}
unsafe impl Sync for D3D11Texture {}
