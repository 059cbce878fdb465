// src/drm/abi.rs

//! `#[repr(C)]` mirrors of the kernel structures and the ioctl wrappers
//! generated for them.
//!
//! Three groups of ioctls are declared here: the generic DRM core requests
//! (GEM handles, dumb buffers, PRIME import), the operation-record interface
//! of the current blit engine driver, and the raw word-stream interface of
//! the earlier generation.

use bitflags::bitflags;
use std::fmt;

pub const DRM_IOCTL_BASE: u8 = b'd';
pub const DRM_COMMAND_BASE: u8 = 0x40;

// --- DRM core ---

#[repr(C)]
#[derive(Debug)]
pub struct DrmVersion {
    pub version_major: libc::c_int,
    pub version_minor: libc::c_int,
    pub version_patchlevel: libc::c_int,
    pub name_len: usize,
    pub name: *mut libc::c_char,
    pub date_len: usize,
    pub date: *mut libc::c_char,
    pub desc_len: usize,
    pub desc: *mut libc::c_char,
}

impl DrmVersion {
    pub fn empty() -> Self {
        DrmVersion {
            version_major: 0,
            version_minor: 0,
            version_patchlevel: 0,
            name_len: 0,
            name: std::ptr::null_mut(),
            date_len: 0,
            date: std::ptr::null_mut(),
            desc_len: 0,
            desc: std::ptr::null_mut(),
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct DrmGemClose {
    pub handle: u32,
    pub pad: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct DrmGemFlink {
    pub handle: u32,
    pub name: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct DrmPrimeHandle {
    pub handle: u32,
    pub flags: u32,
    pub fd: i32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct DrmModeCreateDumb {
    pub height: u32,
    pub width: u32,
    pub bpp: u32,
    pub flags: u32,
    pub handle: u32,
    pub pitch: u32,
    pub size: u64,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct DrmModeMapDumb {
    pub handle: u32,
    pub pad: u32,
    pub offset: u64,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct DrmModeDestroyDumb {
    pub handle: u32,
}

// --- operation-record generation ---

/// Absolute `CLOCK_MONOTONIC` time, 32/64-bit ABI safe.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Gfx2dTimespec {
    pub tv_sec: i64,
    pub tv_nsec: i64,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Gfx2dSource {
    pub handle: u32,
    pub x: i32,
    pub y: i32,
}

pub const GFX2D_OP_FILL: u32 = 0;
pub const GFX2D_OP_COPY: u32 = 1;
pub const GFX2D_OP_BLEND: u32 = 2;
pub const GFX2D_OP_ROP: u32 = 3;

pub const GFX2D_DIR_BIDIRECTIONAL: u32 = 0;
pub const GFX2D_DIR_TO_DEVICE: u32 = 1;
pub const GFX2D_DIR_FROM_DEVICE: u32 = 2;
pub const GFX2D_DIR_NONE: u32 = 3;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct WaitFlags: u32 {
        const NONBLOCK = 0x0000_0001;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct BlendFlags: u32 {
        /// Destination colours are already pre-multiplied by alpha.
        const DST_PREMULTIPLIED = 0x0000_0001;
        /// Source colours are already pre-multiplied by alpha.
        const SRC_PREMULTIPLIED = 0x0000_0002;
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Gfx2dFill {
    pub color: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Gfx2dBlend {
    pub src_color: u32,
    pub dst_color: u32,
    pub flags: u32,
    pub function: u32,
    pub safactor: u32,
    pub dafactor: u32,
    pub scfactor: u32,
    pub dcfactor: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Gfx2dRop {
    pub mask_handle: u32,
    pub mode: u32,
    pub high: u8,
    pub low: u8,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub union Gfx2dParams {
    pub fill: Gfx2dFill,
    pub blend: Gfx2dBlend,
    pub rop: Gfx2dRop,
}

/// One operation over a list of rectangles.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct Gfx2dSubmit {
    pub rectangles: u64,
    pub num_rectangles: usize,
    pub target_handle: u32,
    pub sources: [Gfx2dSource; 2],
    pub operation: u32,
    pub params: Gfx2dParams,
}

impl Gfx2dSubmit {
    pub fn new(operation: u32) -> Self {
        Gfx2dSubmit {
            rectangles: 0,
            num_rectangles: 0,
            target_handle: 0,
            sources: [Gfx2dSource::default(); 2],
            operation,
            params: Gfx2dParams {
                blend: Gfx2dBlend::default(),
            },
        }
    }

    pub fn fill(&self) -> Option<Gfx2dFill> {
        // SAFETY: every variant is plain old data and the union is always
        // fully initialised through its largest member.
        (self.operation == GFX2D_OP_FILL).then(|| unsafe { self.params.fill })
    }

    pub fn blend(&self) -> Option<Gfx2dBlend> {
        // SAFETY: see `fill`.
        (self.operation == GFX2D_OP_BLEND).then(|| unsafe { self.params.blend })
    }

    pub fn rop(&self) -> Option<Gfx2dRop> {
        // SAFETY: see `fill`.
        (self.operation == GFX2D_OP_ROP).then(|| unsafe { self.params.rop })
    }
}

impl fmt::Debug for Gfx2dSubmit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("Gfx2dSubmit");
        s.field("operation", &self.operation)
            .field("target_handle", &self.target_handle)
            .field("sources", &self.sources)
            .field("num_rectangles", &self.num_rectangles);
        if let Some(fill) = self.fill() {
            s.field("fill", &fill);
        }
        if let Some(blend) = self.blend() {
            s.field("blend", &blend);
        }
        if let Some(rop) = self.rop() {
            s.field("rop", &rop);
        }
        s.finish()
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Gfx2dWait {
    pub timeout: Gfx2dTimespec,
    pub handle: u32,
    pub flags: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Gfx2dAllocBuffer {
    pub size: u32,
    pub width: u16,
    pub height: u16,
    pub stride: u16,
    pub format: u32,
    pub direction: u32,
    pub handle: u32,
    pub offset: u64,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Gfx2dImportBuffer {
    pub fd: i32,
    pub width: u16,
    pub height: u16,
    pub stride: u16,
    pub format: u32,
    pub handle: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Gfx2dSyncForCpu {
    pub timeout: Gfx2dTimespec,
    pub handle: u32,
    pub flags: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Gfx2dSyncForGpu {
    pub handle: u32,
}

// --- word-stream generation ---

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LegacySubmit {
    /// User address of the instruction words. 32 bits wide in the kernel ABI.
    pub buf: u32,
    /// Number of 32-bit words.
    pub size: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LegacyGemAddr {
    pub name: u32,
    pub paddr: u32,
}

nix::ioctl_readwrite!(drm_version, DRM_IOCTL_BASE, 0x00, DrmVersion);
nix::ioctl_write_ptr!(drm_gem_close, DRM_IOCTL_BASE, 0x09, DrmGemClose);
nix::ioctl_readwrite!(drm_gem_flink, DRM_IOCTL_BASE, 0x0a, DrmGemFlink);
nix::ioctl_readwrite!(drm_prime_fd_to_handle, DRM_IOCTL_BASE, 0x2e, DrmPrimeHandle);
nix::ioctl_readwrite!(drm_mode_create_dumb, DRM_IOCTL_BASE, 0xb2, DrmModeCreateDumb);
nix::ioctl_readwrite!(drm_mode_map_dumb, DRM_IOCTL_BASE, 0xb3, DrmModeMapDumb);
nix::ioctl_readwrite!(drm_mode_destroy_dumb, DRM_IOCTL_BASE, 0xb4, DrmModeDestroyDumb);

nix::ioctl_write_ptr!(gfx2d_submit, DRM_IOCTL_BASE, DRM_COMMAND_BASE, Gfx2dSubmit);
nix::ioctl_write_ptr!(gfx2d_wait, DRM_IOCTL_BASE, DRM_COMMAND_BASE + 0x01, Gfx2dWait);
nix::ioctl_readwrite!(gfx2d_alloc_buffer, DRM_IOCTL_BASE, DRM_COMMAND_BASE + 0x02, Gfx2dAllocBuffer);
nix::ioctl_readwrite!(gfx2d_import_buffer, DRM_IOCTL_BASE, DRM_COMMAND_BASE + 0x03, Gfx2dImportBuffer);
nix::ioctl_write_ptr!(gfx2d_sync_for_cpu, DRM_IOCTL_BASE, DRM_COMMAND_BASE + 0x05, Gfx2dSyncForCpu);
nix::ioctl_write_ptr!(gfx2d_sync_for_gpu, DRM_IOCTL_BASE, DRM_COMMAND_BASE + 0x06, Gfx2dSyncForGpu);

nix::ioctl_write_ptr!(legacy_submit, DRM_IOCTL_BASE, DRM_COMMAND_BASE, LegacySubmit);
nix::ioctl_none!(legacy_flush, DRM_IOCTL_BASE, DRM_COMMAND_BASE + 0x01);
nix::ioctl_readwrite!(legacy_gem_addr, DRM_IOCTL_BASE, DRM_COMMAND_BASE + 0x02, LegacyGemAddr);
