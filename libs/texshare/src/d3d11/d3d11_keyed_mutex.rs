// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! [`KeyedMutex`] over `IDXGIKeyedMutex`.

use windows::Win32::Foundation::{WAIT_ABANDONED, WAIT_TIMEOUT};
use windows::Win32::Graphics::Dxgi::IDXGIKeyedMutex;
use windows::core::{HRESULT, Interface};

use crate::core::{KeyedMutex, Result, ShareError, Timeout};

/// The keyed mutex DXGI attaches to a texture created with
/// `D3D11_RESOURCE_MISC_SHARED_KEYEDMUTEX`.
pub struct D3D11KeyedMutex {
    mutex: IDXGIKeyedMutex,
}

impl D3D11KeyedMutex {
    pub fn new(mutex: IDXGIKeyedMutex) -> Self {
        Self { mutex }
    }
}

impl KeyedMutex for D3D11KeyedMutex {
    fn acquire(&self, key: u64, timeout: Timeout) -> Result<()> {
        // The generated wrapper folds success codes into Ok, which would hide
        // WAIT_TIMEOUT and WAIT_ABANDONED. Call through the vtable instead.
        let hr = unsafe {
            (Interface::vtable(&self.mutex).AcquireSync)(
                Interface::as_raw(&self.mutex),
                key,
                timeout.as_win32_millis(),
            )
        };

        if hr == HRESULT(WAIT_TIMEOUT.0 as i32) {
            return Err(ShareError::LockTimeout {
                key,
                timeout: timeout.reported(),
            });
        }
        if hr == HRESULT(WAIT_ABANDONED.0 as i32) {
            return Err(ShareError::LockAbandoned { key });
        }
        hr.ok()
            .map_err(|e| ShareError::Gpu(format!("AcquireSync({key}) failed: {e}")))?;

        tracing::trace!("D3D11KeyedMutex: acquired key {}", key);
        Ok(())
    }

    fn release(&self, key: u64) -> Result<()> {
        unsafe { self.mutex.ReleaseSync(key) }
            .map_err(|e| ShareError::Protocol(format!("ReleaseSync({key}) failed: {e}")))?;
        tracing::trace!("D3D11KeyedMutex: released key {}", key);
        Ok(())
    }
}

// D3D11KeyedMutex is Send + Sync because DXGI keyed mutexes are free-threaded
unsafe impl Send for D3D11KeyedMutex {}
unsafe impl Sync for D3D11KeyedMutex {}
