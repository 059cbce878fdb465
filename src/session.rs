// src/session.rs

//! The open device channel, what the hardware behind it can do, and the
//! buffer-id counter shared by everything allocated through it.

use crate::config::{BackendChoice, DeviceConfig, GFX2D_DRIVER, LEGACY_DRIVER};
use crate::drm::{self, DrmDevice, NixDrmDevice};
use crate::error::BlitError;
use crate::format::FormatSupport;
use anyhow::{Context, Result};
use log::{debug, info};
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Largest value the 13-bit width, height and stride fields can hold.
pub const DIM_MASK: u32 = 0x1fff;

/// The two hardware generations this driver knows how to talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Generation {
    /// Kernel-validated operation records.
    Gfx2d,
    /// Raw instruction words submitted in batches.
    Legacy,
}

impl Generation {
    pub fn from_driver(name: &str) -> Option<Generation> {
        match name {
            GFX2D_DRIVER => Some(Generation::Gfx2d),
            LEGACY_DRIVER => Some(Generation::Legacy),
            _ => None,
        }
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Generation::Gfx2d => f.write_str("gfx2d"),
            Generation::Legacy => f.write_str("legacy"),
        }
    }
}

/// What a hardware generation supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// Source surfaces an operation can read besides the destination.
    pub max_sources: usize,
    /// Required stride alignment in bytes.
    pub stride_alignment: u32,
    /// The destination surface is read as an implicit blend source.
    pub dst_is_source: bool,
    /// Blends can use constant colours and per-channel alpha factors.
    pub constant_color_blend: bool,
    /// A blend without a primary source is drawn as fill-then-blend.
    /// When false such a draw is rejected as unsupported.
    pub blend_without_source: bool,
    pub formats: FormatSupport,
}

impl Capabilities {
    pub fn for_generation(generation: Generation) -> Self {
        match generation {
            Generation::Gfx2d => Capabilities {
                max_sources: 1,
                stride_alignment: 1,
                dst_is_source: true,
                constant_color_blend: true,
                blend_without_source: true,
                formats: FormatSupport::all(),
            },
            Generation::Legacy => Capabilities {
                max_sources: 2,
                stride_alignment: 1,
                dst_is_source: false,
                constant_color_blend: false,
                blend_without_source: false,
                formats: FormatSupport::all(),
            },
        }
    }
}

/// An open device node plus the state shared by every buffer created on it.
///
/// No locking is done here beyond the id counter; callers serialize access
/// to one session.
#[derive(Debug)]
pub struct DeviceSession {
    device: Arc<dyn DrmDevice>,
    generation: Generation,
    caps: Capabilities,
    next_id: AtomicU32,
}

impl DeviceSession {
    /// Opens the device named in `config`, or the first node whose driver
    /// matches the requested backend.
    pub fn open(config: &DeviceConfig) -> Result<Self> {
        let (device, driver) = match &config.path {
            Some(path) => {
                let device = NixDrmDevice::open(path)
                    .map_err(|e| BlitError::DeviceUnavailable(format!("{:#}", e)))?;
                let driver = device.driver_name().map_err(|e| {
                    BlitError::DeviceUnavailable(format!(
                        "{}: DRM_IOCTL_VERSION failed: {}",
                        path.display(),
                        e
                    ))
                })?;
                (device, driver)
            }
            None => drm::probe(|name| config.backend.accepts(name)).ok_or_else(|| {
                BlitError::DeviceUnavailable(format!(
                    "no /dev/dri/card* node with a {:?} driver",
                    config.backend
                ))
            })?,
        };
        info!("Using DRM node {} (driver '{}')", device.path().display(), driver);
        Self::with_device(Arc::new(device), config.backend)
    }

    /// Wraps an already opened device, checking its driver against `choice`.
    pub fn with_device(device: Arc<dyn DrmDevice>, choice: BackendChoice) -> Result<Self> {
        let driver = device
            .driver_name()
            .map_err(|e| BlitError::DeviceUnavailable(format!("DRM_IOCTL_VERSION failed: {}", e)))?;
        let generation = Generation::from_driver(&driver)
            .filter(|_| choice.accepts(&driver))
            .ok_or_else(|| {
                BlitError::DeviceUnavailable(format!(
                    "driver '{}' does not match backend {:?}",
                    driver, choice
                ))
            })
            .context("Failed to initialise device session")?;
        let caps = Capabilities::for_generation(generation);
        debug!("Session for {} generation: {:?}", generation, caps);
        Ok(DeviceSession {
            device,
            generation,
            caps,
            next_id: AtomicU32::new(1),
        })
    }

    pub fn device(&self) -> &Arc<dyn DrmDevice> {
        &self.device
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.caps
    }

    /// Next process-unique buffer id. Ids are never reused.
    pub fn next_buffer_id(&self) -> u32 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }
}

impl Drop for DeviceSession {
    fn drop(&mut self) {
        debug!(
            "Closing {} session ({} buffer ids issued)",
            self.generation,
            self.next_id.load(Ordering::Relaxed) - 1
        );
    }
}
