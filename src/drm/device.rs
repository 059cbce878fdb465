// src/drm/device.rs

//! The kernel seam: every request this crate makes of the DRM device goes
//! through the `DrmDevice` trait, so the buffer manager and the encoders can
//! be exercised against a fake kernel in tests.

use super::abi::{self, *};
use anyhow::{Context, Result};
use log::{debug, trace, warn};
use nix::errno::Errno;
use nix::fcntl::{open, OFlag};
use nix::sys::mman::{mmap, munmap, MapFlags, ProtFlags};
use nix::sys::stat::Mode;
use std::ffi::c_void;
use std::fmt;
use std::num::NonZeroUsize;
use std::os::fd::{AsFd, AsRawFd, OwnedFd, RawFd};
use std::path::{Path, PathBuf};
use std::ptr::NonNull;

/// Requests the driver makes of the kernel.
///
/// Methods mirror individual ioctls and return `nix::Result` so callers can
/// inspect the errno before deciding how to report a failure.
pub trait DrmDevice: Send + Sync + fmt::Debug {
    /// Name of the DRM driver bound to this node.
    fn driver_name(&self) -> nix::Result<String>;

    fn gem_close(&self, handle: u32) -> nix::Result<()>;
    /// Publishes a global name for `handle`.
    fn gem_flink(&self, handle: u32) -> nix::Result<u32>;
    fn prime_fd_to_handle(&self, fd: RawFd) -> nix::Result<u32>;

    fn create_dumb(&self, req: &mut DrmModeCreateDumb) -> nix::Result<()>;
    /// Returns the fake mmap offset for a dumb buffer.
    fn map_dumb(&self, handle: u32) -> nix::Result<u64>;
    fn destroy_dumb(&self, handle: u32) -> nix::Result<()>;

    /// Maps `len` bytes of a kernel object at the fake offset `offset`.
    fn map(&self, offset: u64, len: usize) -> nix::Result<NonNull<u8>>;
    fn unmap(&self, addr: NonNull<u8>, len: usize) -> nix::Result<()>;

    fn gfx2d_alloc(&self, req: &mut Gfx2dAllocBuffer) -> nix::Result<()>;
    fn gfx2d_import(&self, req: &mut Gfx2dImportBuffer) -> nix::Result<()>;
    fn gfx2d_submit(&self, req: &Gfx2dSubmit) -> nix::Result<()>;
    fn gfx2d_wait(&self, req: &Gfx2dWait) -> nix::Result<()>;
    fn gfx2d_sync_for_cpu(&self, req: &Gfx2dSyncForCpu) -> nix::Result<()>;
    fn gfx2d_sync_for_gpu(&self, handle: u32) -> nix::Result<()>;

    /// Resolves a global name to the bus address the word stream uses.
    fn legacy_gem_addr(&self, name: u32) -> nix::Result<u32>;
    fn legacy_submit(&self, words: &[u32]) -> nix::Result<()>;
    /// Starts the queued words and blocks until the engine is idle.
    fn legacy_flush(&self) -> nix::Result<()>;
}

/// Retries an ioctl interrupted by a signal or asked to try again.
fn restart<T>(mut call: impl FnMut() -> nix::Result<T>) -> nix::Result<T> {
    loop {
        match call() {
            Err(Errno::EINTR) | Err(Errno::EAGAIN) => continue,
            other => return other,
        }
    }
}

/// A DRM device node opened read/write.
pub struct NixDrmDevice {
    fd: OwnedFd,
    path: PathBuf,
}

impl fmt::Debug for NixDrmDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NixDrmDevice")
            .field("fd", &self.fd.as_raw_fd())
            .field("path", &self.path)
            .finish()
    }
}

impl NixDrmDevice {
    pub fn open(path: &Path) -> Result<Self> {
        let fd = open(path, OFlag::O_RDWR | OFlag::O_CLOEXEC, Mode::empty())
            .with_context(|| format!("Failed to open DRM node {}", path.display()))?;
        debug!("Opened DRM node {} as fd {}", path.display(), fd.as_raw_fd());
        Ok(Self {
            fd,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn raw(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

impl DrmDevice for NixDrmDevice {
    fn driver_name(&self) -> nix::Result<String> {
        let mut version = DrmVersion::empty();
        restart(|| unsafe { abi::drm_version(self.raw(), &mut version) })?;

        let mut name = vec![0u8; version.name_len];
        let mut version = DrmVersion {
            name_len: name.len(),
            name: name.as_mut_ptr().cast(),
            ..DrmVersion::empty()
        };
        restart(|| unsafe { abi::drm_version(self.raw(), &mut version) })?;
        name.truncate(version.name_len);
        Ok(String::from_utf8_lossy(&name).into_owned())
    }

    fn gem_close(&self, handle: u32) -> nix::Result<()> {
        let req = DrmGemClose { handle, pad: 0 };
        restart(|| unsafe { abi::drm_gem_close(self.raw(), &req) }).map(drop)
    }

    fn gem_flink(&self, handle: u32) -> nix::Result<u32> {
        let mut req = DrmGemFlink { handle, name: 0 };
        restart(|| unsafe { abi::drm_gem_flink(self.raw(), &mut req) })?;
        Ok(req.name)
    }

    fn prime_fd_to_handle(&self, fd: RawFd) -> nix::Result<u32> {
        let mut req = DrmPrimeHandle {
            fd,
            ..Default::default()
        };
        restart(|| unsafe { abi::drm_prime_fd_to_handle(self.raw(), &mut req) })?;
        Ok(req.handle)
    }

    fn create_dumb(&self, req: &mut DrmModeCreateDumb) -> nix::Result<()> {
        restart(|| unsafe { abi::drm_mode_create_dumb(self.raw(), &mut *req) }).map(drop)
    }

    fn map_dumb(&self, handle: u32) -> nix::Result<u64> {
        let mut req = DrmModeMapDumb {
            handle,
            ..Default::default()
        };
        restart(|| unsafe { abi::drm_mode_map_dumb(self.raw(), &mut req) })?;
        Ok(req.offset)
    }

    fn destroy_dumb(&self, handle: u32) -> nix::Result<()> {
        let mut req = DrmModeDestroyDumb { handle };
        restart(|| unsafe { abi::drm_mode_destroy_dumb(self.raw(), &mut req) }).map(drop)
    }

    fn map(&self, offset: u64, len: usize) -> nix::Result<NonNull<u8>> {
        let length = NonZeroUsize::new(len).ok_or(Errno::EINVAL)?;
        let offset = libc::off_t::try_from(offset).map_err(|_| Errno::EOVERFLOW)?;
        // SAFETY: a fresh shared mapping chosen by the kernel; it aliases no
        // Rust object and is released by `unmap`.
        let addr = unsafe {
            mmap(
                None,
                length,
                ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                MapFlags::MAP_SHARED,
                self.fd.as_fd(),
                offset,
            )
        }?;
        trace!("Mapped {} bytes at offset {:#x} to {:p}", len, offset, addr);
        Ok(addr.cast())
    }

    fn unmap(&self, addr: NonNull<u8>, len: usize) -> nix::Result<()> {
        // SAFETY: callers only pass mappings returned by `map` with their
        // original length, exactly once.
        unsafe { munmap(addr.cast::<c_void>(), len) }
    }

    fn gfx2d_alloc(&self, req: &mut Gfx2dAllocBuffer) -> nix::Result<()> {
        restart(|| unsafe { abi::gfx2d_alloc_buffer(self.raw(), &mut *req) }).map(drop)
    }

    fn gfx2d_import(&self, req: &mut Gfx2dImportBuffer) -> nix::Result<()> {
        restart(|| unsafe { abi::gfx2d_import_buffer(self.raw(), &mut *req) }).map(drop)
    }

    fn gfx2d_submit(&self, req: &Gfx2dSubmit) -> nix::Result<()> {
        restart(|| unsafe { abi::gfx2d_submit(self.raw(), req) }).map(drop)
    }

    fn gfx2d_wait(&self, req: &Gfx2dWait) -> nix::Result<()> {
        restart(|| unsafe { abi::gfx2d_wait(self.raw(), req) }).map(drop)
    }

    fn gfx2d_sync_for_cpu(&self, req: &Gfx2dSyncForCpu) -> nix::Result<()> {
        restart(|| unsafe { abi::gfx2d_sync_for_cpu(self.raw(), req) }).map(drop)
    }

    fn gfx2d_sync_for_gpu(&self, handle: u32) -> nix::Result<()> {
        let req = Gfx2dSyncForGpu { handle };
        restart(|| unsafe { abi::gfx2d_sync_for_gpu(self.raw(), &req) }).map(drop)
    }

    fn legacy_gem_addr(&self, name: u32) -> nix::Result<u32> {
        let mut req = LegacyGemAddr { name, paddr: 0 };
        restart(|| unsafe { abi::legacy_gem_addr(self.raw(), &mut req) })?;
        Ok(req.paddr)
    }

    fn legacy_submit(&self, words: &[u32]) -> nix::Result<()> {
        let req = LegacySubmit {
            buf: u32::try_from(words.as_ptr() as usize).map_err(|_| Errno::EOVERFLOW)?,
            size: u32::try_from(words.len()).map_err(|_| Errno::E2BIG)?,
        };
        restart(|| unsafe { abi::legacy_submit(self.raw(), &req) }).map(drop)
    }

    fn legacy_flush(&self) -> nix::Result<()> {
        restart(|| unsafe { abi::legacy_flush(self.raw()) }).map(drop)
    }
}

impl Drop for NixDrmDevice {
    fn drop(&mut self) {
        debug!(
            "Closing DRM node {} (fd {})",
            self.path.display(),
            self.fd.as_raw_fd()
        );
    }
}

/// Opens the first `/dev/dri/card*` node whose driver name is accepted by
/// `wanted`, returning the device and its driver name.
pub fn probe(wanted: impl Fn(&str) -> bool) -> Option<(NixDrmDevice, String)> {
    (0..16).find_map(|minor| {
        let path = PathBuf::from(format!("/dev/dri/card{}", minor));
        if !path.exists() {
            return None;
        }
        let device = match NixDrmDevice::open(&path) {
            Ok(device) => device,
            Err(e) => {
                warn!("Skipping {}: {:#}", path.display(), e);
                return None;
            }
        };
        match device.driver_name() {
            Ok(name) if wanted(&name) => Some((device, name)),
            Ok(name) => {
                trace!("Skipping {}: driver '{}'", path.display(), name);
                None
            }
            Err(e) => {
                warn!("Skipping {}: DRM_IOCTL_VERSION failed: {}", path.display(), e);
                None
            }
        }
    })
}
