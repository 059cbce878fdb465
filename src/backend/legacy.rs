// src/backend/legacy.rs

//! Buffers on the word-stream generation.
//!
//! The engine addresses memory by bus address, so every buffer is given a
//! global name and resolved through the driver's GEM_ADDR request. Memory
//! is plain dumb buffers: write-combined and never cached, so there is no
//! cache maintenance to do, and completion is observed by flushing the
//! engine rather than by per-buffer waits.

use super::Backend;
use crate::buffer::{
    Buffer, BufferParts, GemHandle, ImportDesc, Mapping, Memory, Release, SyncDirection,
};
use crate::config::EncoderConfig;
use crate::deadline::Deadline;
use crate::drm::abi::DrmModeCreateDumb;
use crate::drm::DrmDevice;
use crate::encoder::{CommandEncoder, WordEncoder};
use crate::error::BlitError;
use crate::format::PixelFormat;
use crate::session::Generation;
use anyhow::{Context, Result};
use log::{debug, trace};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, Default)]
pub struct LegacyBackend;

fn alloc_failure(what: &'static str) -> impl FnOnce(nix::Error) -> BlitError {
    move |e| BlitError::AllocationFailure(format!("{}: {}", what, e))
}

/// Publishes `handle` and resolves the bus address of its memory.
fn resolve_addr(device: &dyn DrmDevice, handle: u32) -> Result<u32> {
    let name = device
        .gem_flink(handle)
        .map_err(alloc_failure("GEM_FLINK"))
        .with_context(|| format!("Failed to name handle {}", handle))?;
    let paddr = device
        .legacy_gem_addr(name)
        .map_err(alloc_failure("GEM_ADDR"))
        .with_context(|| format!("Failed to resolve the bus address of name {}", name))?;
    trace!("Handle {} (name {}) at bus address {:#010x}", handle, name, paddr);
    Ok(paddr)
}

impl Backend for LegacyBackend {
    fn generation(&self) -> Generation {
        Generation::Legacy
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
        // One row of `size` bytes: the kernel object is raw storage and the
        // pixel layout lives in the engine registers.
        let mut req = DrmModeCreateDumb {
            width: size,
            height: 1,
            bpp: 8,
            ..Default::default()
        };
        device
            .create_dumb(&mut req)
            .map_err(alloc_failure("MODE_CREATE_DUMB"))
            .with_context(|| format!("Failed to create {}x{} {} buffer", width, height, format))?;
        let handle = GemHandle::new(device, req.handle, Release::DestroyDumb);

        let offset = device
            .map_dumb(req.handle)
            .map_err(alloc_failure("MODE_MAP_DUMB"))
            .with_context(|| format!("Failed to prepare handle {} for mapping", req.handle))?;
        let mapping = Mapping::new(device, offset, size as usize)
            .map_err(alloc_failure("mmap"))
            .with_context(|| format!("Failed to map handle {}", req.handle))?;
        let gpu_addr = resolve_addr(device.as_ref(), req.handle)?;

        Ok(BufferParts {
            memory: Memory::Owned(mapping),
            handle,
            gpu_addr,
            width,
            height,
            stride,
            format,
            direction: SyncDirection::Bidirectional,
        })
    }

    fn import(&self, device: &Arc<dyn DrmDevice>, desc: &ImportDesc) -> Result<BufferParts> {
        let raw = device
            .prime_fd_to_handle(desc.fd)
            .map_err(alloc_failure("PRIME_FD_TO_HANDLE"))
            .with_context(|| format!("Failed to get a handle for PRIME fd {}", desc.fd))?;
        let handle = GemHandle::new(device, raw, Release::Close);
        let gpu_addr = resolve_addr(device.as_ref(), raw)?;
        debug!("PRIME fd {} imported as handle {}", desc.fd, raw);

        Ok(BufferParts {
            memory: Memory::Borrowed(desc.cpu_addr),
            handle,
            gpu_addr,
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
        // Uncached memory: owning it only means the engine is done with it.
        self.wait(device, buffer, deadline)
    }

    fn sync_for_gpu(&self, _device: &dyn DrmDevice, buffer: &Buffer) -> Result<()> {
        trace!("Buffer {} is uncached; nothing to hand back", buffer.id());
        Ok(())
    }

    fn wait(&self, device: &dyn DrmDevice, buffer: &Buffer, deadline: Option<Deadline>) -> Result<()> {
        // The engine has no per-buffer fences and FLUSH takes no timeout: it
        // blocks until the engine is idle, whatever the deadline says.
        match deadline {
            Some(deadline) => debug!(
                "Deadline {:?} not enforceable for buffer {}; flushing the engine",
                deadline,
                buffer.id()
            ),
            None => debug!(
                "No non-blocking poll for buffer {}; flushing the engine",
                buffer.id()
            ),
        }
        device
            .legacy_flush()
            .map_err(|e| BlitError::SubmissionFailure(e.to_string()))
            .with_context(|| format!("Failed to wait for buffer {}", buffer.id()))
    }

    fn encoder(&self, device: Arc<dyn DrmDevice>, config: &EncoderConfig) -> Box<dyn CommandEncoder> {
        Box::new(WordEncoder::new(device, config))
    }
}
