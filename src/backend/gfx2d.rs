// src/backend/gfx2d.rs

//! Buffers on the operation-record generation: the driver allocates and
//! imports its own buffer objects and handles cache maintenance itself.

use super::Backend;
use crate::buffer::{
    is_timeout, Buffer, BufferParts, GemHandle, ImportDesc, Mapping, Memory, Release, SyncDirection,
};
use crate::config::EncoderConfig;
use crate::deadline::Deadline;
use crate::drm::abi::*;
use crate::drm::DrmDevice;
use crate::encoder::{CommandEncoder, RecordEncoder};
use crate::error::BlitError;
use crate::format::PixelFormat;
use crate::session::Generation;
use anyhow::{Context, Result};
use log::{debug, trace};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, Default)]
pub struct Gfx2dBackend;

fn timeout_fields(deadline: Option<Deadline>) -> (Gfx2dTimespec, u32) {
    match deadline {
        Some(deadline) => (deadline.as_timespec(), 0),
        None => (Gfx2dTimespec::default(), WaitFlags::NONBLOCK.bits()),
    }
}

/// Classifies a failed wait: running out of time is `SyncTimeout`, anything
/// else is reported with the errno.
fn sync_failure(err: nix::Error, buffer: &Buffer, what: &str) -> anyhow::Error {
    if is_timeout(err) {
        anyhow::Error::new(BlitError::SyncTimeout { buffer: buffer.id() })
            .context(format!("{} buffer {} ({})", what, buffer.id(), err))
    } else {
        anyhow::Error::new(err).context(format!("{} buffer {}", what, buffer.id()))
    }
}

impl Backend for Gfx2dBackend {
    fn generation(&self) -> Generation {
        Generation::Gfx2d
    }

    fn alloc(
        &self,
        device: &Arc<dyn DrmDevice>,
        width: u32,
        height: u32,
        format: PixelFormat,
        stride: u32,
    ) -> Result<BufferParts> {
        let size = height * stride;
        let mut req = Gfx2dAllocBuffer {
            size,
            width: width as u16,
            height: height as u16,
            stride: stride as u16,
            format: format.hw_code(),
            direction: SyncDirection::Bidirectional.code(),
            ..Default::default()
        };
        device
            .gfx2d_alloc(&mut req)
            .map_err(|e| BlitError::AllocationFailure(format!("ALLOC_BUFFER: {}", e)))
            .with_context(|| format!("Failed to create {}x{} {} buffer", width, height, format))?;
        let handle = GemHandle::new(device, req.handle, Release::Close);

        // Dropping `handle` on the error path closes the object again.
        let mapping = Mapping::new(device, req.offset, size as usize)
            .map_err(|e| BlitError::AllocationFailure(format!("mmap: {}", e)))
            .with_context(|| format!("Failed to map buffer handle {}", req.handle))?;
        trace!("Buffer handle {} mapped at offset {:#x}", req.handle, req.offset);

        Ok(BufferParts {
            memory: Memory::Owned(mapping),
            handle,
            gpu_addr: 0,
            width,
            height,
            stride,
            format,
            direction: SyncDirection::Bidirectional,
        })
    }

    fn import(&self, device: &Arc<dyn DrmDevice>, desc: &ImportDesc) -> Result<BufferParts> {
        let mut req = Gfx2dImportBuffer {
            fd: desc.fd,
            width: desc.width as u16,
            height: desc.height as u16,
            stride: desc.stride as u16,
            format: desc.format.hw_code(),
            handle: 0,
        };
        device
            .gfx2d_import(&mut req)
            .map_err(|e| BlitError::AllocationFailure(format!("IMPORT_BUFFER: {}", e)))
            .with_context(|| format!("Failed to get a handle for PRIME fd {}", desc.fd))?;
        debug!("PRIME fd {} imported as handle {}", desc.fd, req.handle);

        Ok(BufferParts {
            memory: Memory::Borrowed(desc.cpu_addr),
            handle: GemHandle::new(device, req.handle, Release::Close),
            gpu_addr: 0,
            width: desc.width,
            height: desc.height,
            stride: desc.stride,
            format: desc.format,
            direction: SyncDirection::None,
        })
    }

    fn sync_for_cpu(
        &self,
        device: &dyn DrmDevice,
        buffer: &Buffer,
        deadline: Option<Deadline>,
    ) -> Result<()> {
        let (timeout, flags) = timeout_fields(deadline);
        let req = Gfx2dSyncForCpu {
            timeout,
            handle: buffer.handle(),
            flags,
        };
        device
            .gfx2d_sync_for_cpu(&req)
            .map_err(|e| sync_failure(e, buffer, "Failed to claim CPU ownership of"))
    }

    fn sync_for_gpu(&self, device: &dyn DrmDevice, buffer: &Buffer) -> Result<()> {
        device
            .gfx2d_sync_for_gpu(buffer.handle())
            .with_context(|| format!("Failed to synchronize buffer {} for GPU", buffer.id()))
    }

    fn wait(&self, device: &dyn DrmDevice, buffer: &Buffer, deadline: Option<Deadline>) -> Result<()> {
        let (timeout, flags) = timeout_fields(deadline);
        let req = Gfx2dWait {
            timeout,
            handle: buffer.handle(),
            flags,
        };
        device
            .gfx2d_wait(&req)
            .map_err(|e| sync_failure(e, buffer, "Failed to wait for"))
    }

    fn encoder(&self, device: Arc<dyn DrmDevice>, _config: &EncoderConfig) -> Box<dyn CommandEncoder> {
        Box::new(RecordEncoder::new(device))
    }
}
