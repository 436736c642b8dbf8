// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Shared image geometry and the padded byte size both sides agree on.

use serde::{Deserialize, Serialize};

use crate::core::{Result, ShareError};

/// Largest width or height accepted for a shared image.
pub const MAX_EXTENT: u32 = 16384;

/// Over-allocation factor applied to the nominal image size.
///
/// The explicit and driver-managed APIs report different minimum sizes for the
/// same logical image, so each side advertises and imports a padded size.
pub const PADDING_MULTIPLIER: u64 = 2;

/// Padded sizes are rounded to this boundary (the common allocation
/// granularity of both APIs).
pub const SIZE_ALIGNMENT: u64 = 64 * 1024;

/// The single pixel format a shared image can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PixelFormat {
    /// 8-bit BGRA, unsigned normalized.
    #[default]
    Bgra8Unorm,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> u32 {
        match self {
            PixelFormat::Bgra8Unorm => 4,
        }
    }
}

/// Immutable description of a shared image.
///
/// The byte size is derived, never transmitted: both processes recompute it
/// from width, height and format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SharedImageDescriptor {
    width: u32,
    height: u32,
    format: PixelFormat,
}

impl SharedImageDescriptor {
    pub fn new(width: u32, height: u32, format: PixelFormat) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(ShareError::Configuration(format!(
                "shared image extent must be non-zero, got {width}x{height}"
            )));
        }
        if width > MAX_EXTENT || height > MAX_EXTENT {
            return Err(ShareError::Configuration(format!(
                "shared image extent {width}x{height} exceeds the {MAX_EXTENT} limit"
            )));
        }
        Ok(Self {
            width,
            height,
            format,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    /// Tightly packed size of one image.
    pub fn nominal_size(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height) * u64::from(self.format.bytes_per_pixel())
    }

    /// Size advertised to and imported by the remote side.
    pub fn byte_size(&self) -> u64 {
        round_up(self.nominal_size() * PADDING_MULTIPLIER, SIZE_ALIGNMENT)
    }

    /// Fails when the padded size does not cover a driver-reported requirement.
    pub fn verify_covers(&self, required: u64) -> Result<()> {
        let padded = self.byte_size();
        if padded < required {
            return Err(ShareError::Configuration(format!(
                "padded size {padded} for {}x{} is below the driver requirement {required}",
                self.width, self.height
            )));
        }
        tracing::debug!(
            "SharedImageDescriptor: padded {} bytes covers driver requirement {}",
            padded,
            required
        );
        Ok(())
    }
}

pub(crate) fn round_up(value: u64, alignment: u64) -> u64 {
    value.div_ceil(alignment) * alignment
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_zero_and_oversized_extents() {
        assert!(SharedImageDescriptor::new(0, 512, PixelFormat::Bgra8Unorm).is_err());
        assert!(SharedImageDescriptor::new(512, 0, PixelFormat::Bgra8Unorm).is_err());
        assert!(SharedImageDescriptor::new(MAX_EXTENT + 1, 1, PixelFormat::Bgra8Unorm).is_err());
        assert!(SharedImageDescriptor::new(MAX_EXTENT, MAX_EXTENT, PixelFormat::Bgra8Unorm).is_ok());
    }

    #[test]
    fn padded_size_for_default_extent() {
        let desc = SharedImageDescriptor::new(512, 512, PixelFormat::Bgra8Unorm).unwrap();
        assert_eq!(desc.nominal_size(), 1_048_576);
        assert_eq!(desc.byte_size(), 2_097_152);
    }

    #[test]
    fn tiny_images_round_to_alignment() {
        let desc = SharedImageDescriptor::new(1, 1, PixelFormat::Bgra8Unorm).unwrap();
        assert_eq!(desc.byte_size(), SIZE_ALIGNMENT);
    }

    #[test]
    fn verify_covers_reports_shortfall() {
        let desc = SharedImageDescriptor::new(16, 16, PixelFormat::Bgra8Unorm).unwrap();
        assert!(desc.verify_covers(desc.byte_size()).is_ok());
        let err = desc.verify_covers(desc.byte_size() + 1).unwrap_err();
        assert!(matches!(err, ShareError::Configuration(_)));
    }
}
