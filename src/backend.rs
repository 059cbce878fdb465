// src/backend.rs

//! Per-generation buffer handling and encoder construction.
//!
//! The two hardware generations create, import and synchronize buffers
//! through different kernel interfaces. `Backend` hides which one is in use;
//! the implementation is picked once, from the session's generation.

use crate::buffer::{Buffer, BufferParts, ImportDesc};
use crate::config::EncoderConfig;
use crate::deadline::Deadline;
use crate::drm::DrmDevice;
use crate::encoder::CommandEncoder;
use crate::format::PixelFormat;
use crate::session::Generation;
use anyhow::Result;
use std::fmt;
use std::sync::Arc;

mod gfx2d;
mod legacy;

pub(crate) use gfx2d::Gfx2dBackend;
pub(crate) use legacy::LegacyBackend;

/// Buffer lifecycle and synchronization for one hardware generation.
///
/// Dimensions reaching these methods are already validated.
pub(crate) trait Backend: Send + Sync + fmt::Debug {
    fn generation(&self) -> Generation;

    fn alloc(
        &self,
        device: &Arc<dyn DrmDevice>,
        width: u32,
        height: u32,
        format: PixelFormat,
        stride: u32,
    ) -> Result<BufferParts>;

    fn import(&self, device: &Arc<dyn DrmDevice>, desc: &ImportDesc) -> Result<BufferParts>;

    fn sync_for_cpu(
        &self,
        device: &dyn DrmDevice,
        buffer: &Buffer,
        deadline: Option<Deadline>,
    ) -> Result<()>;

    fn sync_for_gpu(&self, device: &dyn DrmDevice, buffer: &Buffer) -> Result<()>;

    fn wait(&self, device: &dyn DrmDevice, buffer: &Buffer, deadline: Option<Deadline>) -> Result<()>;

    fn encoder(&self, device: Arc<dyn DrmDevice>, config: &EncoderConfig) -> Box<dyn CommandEncoder>;
}

pub(crate) fn for_generation(generation: Generation) -> Box<dyn Backend> {
    match generation {
        Generation::Gfx2d => Box::new(Gfx2dBackend),
        Generation::Legacy => Box::new(LegacyBackend),
    }
}
