// src/buffer.rs

//! Pixel buffers backed by kernel objects, and the manager that creates,
//! imports and synchronizes them.
//!
//! A `Buffer` owns its resources through RAII guards: a `Mapping` for CPU
//! memory the buffer mapped itself and a `GemHandle` for the kernel handle it
//! acquired. Struct fields drop in declaration order, so memory is always
//! unmapped before the handle backing it is released, on every path
//! including a failed allocation that is rolled back half way.

use crate::backend::{self, Backend};
use crate::deadline::Deadline;
use crate::drm::DrmDevice;
use crate::encoder::Placement;
use crate::error::BlitError;
use crate::format::PixelFormat;
use crate::session::{Capabilities, DeviceSession, DIM_MASK};
use anyhow::Result;
use log::{debug, error, warn};
use nix::errno::Errno;
use std::fmt;
use std::os::fd::RawFd;
use std::ptr::NonNull;
use std::sync::{Arc, Weak};


/// Which way cache maintenance is needed when ownership moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncDirection {
    Bidirectional,
    ToDevice,
    FromDevice,
    /// Not cache managed by this library.
    None,
}

impl SyncDirection {
    pub fn code(self) -> u32 {
        use crate::drm::abi::*;
        match self {
            SyncDirection::Bidirectional => GFX2D_DIR_BIDIRECTIONAL,
            SyncDirection::ToDevice => GFX2D_DIR_TO_DEVICE,
            SyncDirection::FromDevice => GFX2D_DIR_FROM_DEVICE,
            SyncDirection::None => GFX2D_DIR_NONE,
        }
    }
}

/// The parts of a buffer an encoder needs, copied out so a draw does not
/// hold borrows of the buffers it reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Surface {
    pub id: u32,
    pub handle: u32,
    /// Bus address, only meaningful on the word-stream generation.
    pub gpu_addr: u32,
    pub width: u32,
    pub height: u32,
    pub stride: u32,
    pub format: PixelFormat,
}

impl Surface {
    pub fn bounds(&self) -> crate::geometry::Rect {
        crate::geometry::Rect::sized(self.width as i32, self.height as i32)
    }
}

/// Reports whether a buffer still exists without keeping it alive.
///
/// The renderer holds surfaces by value, so it checks one of these before
/// handing a surface to the engine.
#[derive(Debug, Clone, Default)]
pub struct Liveness(Weak<()>);

impl Liveness {
    pub fn is_alive(&self) -> bool {
        self.0.strong_count() > 0
    }
}

impl PartialEq for Liveness {
    fn eq(&self, other: &Self) -> bool {
        Weak::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for Liveness {}

/// A CPU mapping this library created.
pub(crate) struct Mapping {
    device: Arc<dyn DrmDevice>,
    addr: NonNull<u8>,
    len: usize,
}

impl Mapping {
    pub(crate) fn new(device: &Arc<dyn DrmDevice>, offset: u64, len: usize) -> nix::Result<Self> {
        let addr = device.map(offset, len)?;
        Ok(Mapping {
            device: Arc::clone(device),
            addr,
            len,
        })
    }
}

impl Drop for Mapping {
    fn drop(&mut self) {
        if let Err(e) = self.device.unmap(self.addr, self.len) {
            warn!("Failed to unmap {} bytes at {:p}: {}", self.len, self.addr, e);
        }
    }
}

/// How a kernel handle is given back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Release {
    Close,
    DestroyDumb,
}

/// A kernel handle this library acquired and must release.
pub(crate) struct GemHandle {
    device: Arc<dyn DrmDevice>,
    handle: u32,
    release: Release,
}

impl GemHandle {
    pub(crate) fn new(device: &Arc<dyn DrmDevice>, handle: u32, release: Release) -> Self {
        GemHandle {
            device: Arc::clone(device),
            handle,
            release,
        }
    }

    pub(crate) fn raw(&self) -> u32 {
        self.handle
    }
}

impl Drop for GemHandle {
    fn drop(&mut self) {
        let result = match self.release {
            Release::Close => self.device.gem_close(self.handle),
            Release::DestroyDumb => self.device.destroy_dumb(self.handle),
        };
        if let Err(e) = result {
            error!("Failed to release kernel handle {} ({:?}): {}", self.handle, self.release, e);
        }
    }
}

/// Where a buffer's CPU-visible memory comes from.
pub(crate) enum Memory {
    /// Mapped by this library, unmapped on drop.
    Owned(Mapping),
    /// Supplied by the owner of an imported buffer. Never unmapped here.
    Borrowed(Option<NonNull<u8>>),
}

/// Everything a backend hands over when it has created a buffer.
pub(crate) struct BufferParts {
    pub memory: Memory,
    pub handle: GemHandle,
    pub gpu_addr: u32,
    pub width: u32,
    pub height: u32,
    pub stride: u32,
    pub format: PixelFormat,
    pub direction: SyncDirection,
}

/// A GPU-addressable pixel buffer.
pub struct Buffer {
    // Field order is drop order: unmap before the handle goes away.
    memory: Memory,
    handle: GemHandle,
    id: u32,
    gpu_addr: u32,
    width: u32,
    height: u32,
    stride: u32,
    format: PixelFormat,
    direction: SyncDirection,
    alive: Arc<()>,
}

// SAFETY: the raw pointers refer to shared memory mappings, not to
// thread-local data; access to the contents goes through `&`/`&mut self`.
unsafe impl Send for Buffer {}

impl Buffer {
    pub(crate) fn from_parts(id: u32, parts: BufferParts) -> Self {
        Buffer {
            memory: parts.memory,
            handle: parts.handle,
            id,
            gpu_addr: parts.gpu_addr,
            width: parts.width,
            height: parts.height,
            stride: parts.stride,
            format: parts.format,
            direction: parts.direction,
            alive: Arc::new(()),
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn stride(&self) -> u32 {
        self.stride
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn handle(&self) -> u32 {
        self.handle.raw()
    }

    pub fn gpu_addr(&self) -> u32 {
        self.gpu_addr
    }

    pub fn is_imported(&self) -> bool {
        matches!(self.memory, Memory::Borrowed(_))
    }

    pub fn direction(&self) -> SyncDirection {
        self.direction
    }

    pub fn len(&self) -> usize {
        self.height as usize * self.stride as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn cpu_addr(&self) -> Option<NonNull<u8>> {
        match &self.memory {
            Memory::Owned(mapping) => Some(mapping.addr),
            Memory::Borrowed(addr) => *addr,
        }
    }

    /// Pixel memory, `height * stride` bytes. Claim CPU ownership with
    /// `sync_for_cpu` before reading what the engine wrote.
    pub fn data(&self) -> Option<&[u8]> {
        // SAFETY: the address maps at least `len()` bytes for the lifetime
        // of `self`; for owned memory we mapped it, for imported memory the
        // importer promised it.
        self.cpu_addr()
            .map(|addr| unsafe { std::slice::from_raw_parts(addr.as_ptr(), self.len()) })
    }

    pub fn data_mut(&mut self) -> Option<&mut [u8]> {
        // SAFETY: see `data`; `&mut self` makes the slice unique.
        self.cpu_addr()
            .map(|addr| unsafe { std::slice::from_raw_parts_mut(addr.as_ptr(), self.len()) })
    }

    pub fn surface(&self) -> Surface {
        Surface {
            id: self.id,
            handle: self.handle(),
            gpu_addr: self.gpu_addr,
            width: self.width,
            height: self.height,
            stride: self.stride,
            format: self.format,
        }
    }

    pub fn liveness(&self) -> Liveness {
        Liveness(Arc::downgrade(&self.alive))
    }

    /// This buffer placed at `(x, y)` in target coordinates.
    pub fn at(&self, x: i32, y: i32) -> Placement {
        Placement::new(self.surface(), x, y)
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("id", &self.id)
            .field("handle", &self.handle())
            .field("size", &format_args!("{}x{}", self.width, self.height))
            .field("stride", &self.stride)
            .field("format", &self.format)
            .field("imported", &self.is_imported())
            .field("direction", &self.direction)
            .finish()
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        debug!("Releasing buffer {} (handle {})", self.id, self.handle());
    }
}

/// A foreign buffer to wrap.
#[derive(Debug, Clone, Copy)]
pub struct ImportDesc {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub stride: u32,
    /// DMA-BUF file descriptor exported by the owner.
    pub fd: RawFd,
    /// The owner's CPU mapping of the same memory, if any.
    pub cpu_addr: Option<NonNull<u8>>,
}

/// Checks a surface description against what the hardware can address.
pub fn validate(
    caps: &Capabilities,
    width: u32,
    height: u32,
    format: PixelFormat,
    stride: u32,
) -> Result<()> {
    if !caps.formats.contains(format.support_flag()) {
        return Err(BlitError::UnsupportedFormat(format.to_string()).into());
    }
    check_extent(width, height)?;
    let invalid = |why: String| -> Result<()> { Err(BlitError::InvalidDimension(why).into()) };
    if stride > DIM_MASK {
        return invalid(format!("stride {} exceeds {}", stride, DIM_MASK));
    }
    if stride < width * format.bytes_per_pixel() {
        return invalid(format!("stride {} too small for {} {} pixels", stride, width, format));
    }
    if stride % caps.stride_alignment != 0 {
        return invalid(format!(
            "stride {} not a multiple of {}",
            stride, caps.stride_alignment
        ));
    }
    Ok(())
}

fn check_extent(width: u32, height: u32) -> Result<()> {
    if width == 0 || height == 0 || width > DIM_MASK || height > DIM_MASK {
        return Err(BlitError::InvalidDimension(format!(
            "{}x{} outside 1..={}",
            width, height, DIM_MASK
        ))
        .into());
    }
    Ok(())
}

/// Default stride for `width` pixels on hardware with the given alignment.
pub fn default_stride(caps: &Capabilities, width: u32, format: PixelFormat) -> u32 {
    format
        .pitch_for(width)
        .checked_next_multiple_of(caps.stride_alignment)
        .unwrap_or(u32::MAX)
}

pub(crate) fn is_timeout(err: Errno) -> bool {
    matches!(err, Errno::ETIME | Errno::ETIMEDOUT | Errno::EBUSY)
}

/// Allocates, imports and synchronizes buffers on one session.
#[derive(Debug)]
pub struct BufferManager {
    session: DeviceSession,
    backend: Box<dyn Backend>,
}

impl BufferManager {
    pub fn new(session: DeviceSession) -> Self {
        let backend = backend::for_generation(session.generation());
        debug!("Buffer manager using the {} backend", backend.generation());
        BufferManager { session, backend }
    }

    pub fn session(&self) -> &DeviceSession {
        &self.session
    }

    pub fn capabilities(&self) -> &Capabilities {
        self.session.capabilities()
    }

    pub(crate) fn backend(&self) -> &dyn Backend {
        self.backend.as_ref()
    }

    /// Allocates a `width` x `height` buffer. A `None` stride picks the
    /// smallest valid one.
    pub fn alloc(
        &self,
        width: u32,
        height: u32,
        format: PixelFormat,
        stride: Option<u32>,
    ) -> Result<Buffer> {
        let caps = self.capabilities();
        check_extent(width, height)?;
        let stride = stride.unwrap_or_else(|| default_stride(caps, width, format));
        validate(caps, width, height, format, stride)?;

        let parts = self
            .backend
            .alloc(self.session.device(), width, height, format, stride)?;
        let buffer = Buffer::from_parts(self.session.next_buffer_id(), parts);
        debug!("Allocated {:?}", buffer);
        Ok(buffer)
    }

    /// Wraps a buffer owned by someone else. Only the kernel handle obtained
    /// here is released when the buffer is dropped.
    ///
    /// # Safety
    ///
    /// `desc.cpu_addr`, when set, must point to at least
    /// `desc.height * desc.stride` bytes that stay mapped and are not
    /// accessed through other references while the returned buffer exists.
    pub unsafe fn import(&self, desc: &ImportDesc) -> Result<Buffer> {
        validate(
            self.capabilities(),
            desc.width,
            desc.height,
            desc.format,
            desc.stride,
        )?;
        let parts = self.backend.import(self.session.device(), desc)?;
        let buffer = Buffer::from_parts(self.session.next_buffer_id(), parts);
        debug!("Imported fd {} as {:?}", desc.fd, buffer);
        Ok(buffer)
    }

    /// Releases a buffer. Teardown failures are logged, not returned.
    pub fn free(&self, buffer: Buffer) {
        drop(buffer);
    }

    /// Claims CPU ownership, waiting until `deadline` (or not at all when
    /// `None`) for the engine to finish with the buffer.
    pub fn sync_for_cpu(&self, buffer: &Buffer, deadline: Option<Deadline>) -> Result<()> {
        if buffer.direction() == SyncDirection::None {
            return Ok(());
        }
        self.backend
            .sync_for_cpu(self.session.device().as_ref(), buffer, deadline)
    }

    /// Hands the buffer back to the engine.
    pub fn sync_for_gpu(&self, buffer: &Buffer) -> Result<()> {
        if buffer.is_imported() || buffer.direction() == SyncDirection::None {
            return Ok(());
        }
        self.backend
            .sync_for_gpu(self.session.device().as_ref(), buffer)
    }

    /// Waits for every operation touching `buffer` to complete. On the
    /// word-stream generation this is an engine FLUSH that ignores
    /// `deadline`.
    pub fn wait(&self, buffer: &Buffer, deadline: Option<Deadline>) -> Result<()> {
        self.backend
            .wait(self.session.device().as_ref(), buffer, deadline)
    }
}
