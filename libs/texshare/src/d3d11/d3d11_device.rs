// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Direct3D 11 device creation.

use std::ptr;

use windows::Win32::Foundation::HMODULE;
use windows::Win32::Graphics::Direct3D::{D3D_DRIVER_TYPE_HARDWARE, D3D_FEATURE_LEVEL};
use windows::Win32::Graphics::Direct3D11::{
    D3D11_CREATE_DEVICE_BGRA_SUPPORT, D3D11_SDK_VERSION, D3D11CreateDevice, ID3D11Device,
    ID3D11Device1,
};
use windows::core::Interface;

use crate::core::{Result, ShareError};

/// Hardware D3D11 device on the default adapter, with the 1.1 interface
/// needed for NT-handle resource sharing.
pub struct D3D11Device {
    device: ID3D11Device,
    device1: ID3D11Device1,
    feature_level: D3D_FEATURE_LEVEL,
}

impl D3D11Device {
    pub fn new() -> Result<Self> {
        let mut device = None;
        let mut feature_level = D3D_FEATURE_LEVEL::default();

        unsafe {
            D3D11CreateDevice(
                None,
                D3D_DRIVER_TYPE_HARDWARE,
                HMODULE(ptr::null_mut()),
                D3D11_CREATE_DEVICE_BGRA_SUPPORT,
                None,
                D3D11_SDK_VERSION,
                Some(&mut device),
                Some(&mut feature_level),
                None,
            )
        }
        .map_err(|e| ShareError::Gpu(format!("Failed to create D3D11 device: {e}")))?;

        let device: ID3D11Device =
            device.ok_or_else(|| ShareError::Gpu("D3D11 device is None".into()))?;
        let device1: ID3D11Device1 = device.cast().map_err(|e| {
            ShareError::Configuration(format!("D3D11.1 is required for NT handle sharing: {e}"))
        })?;

        tracing::info!(
            "D3D11 device initialized (feature level {:#x})",
            feature_level.0
        );

        Ok(Self {
            device,
            device1,
            feature_level,
        })
    }

    pub fn device(&self) -> &ID3D11Device {
        &self.device
    }

    pub fn device1(&self) -> &ID3D11Device1 {
        &self.device1
    }

    pub fn feature_level(&self) -> D3D_FEATURE_LEVEL {
        self.feature_level
    }
}

// D3D11Device is Send + Sync because the D3D11 device is free-threaded
unsafe impl Send for D3D11Device {}
unsafe impl Sync for D3D11Device {}
