// src/drm/fake.rs

//! An in-process stand-in for the DRM device used by unit tests.
//!
//! `FakeDrm` keeps every kernel object in a heap slab, hands out handles and
//! fake mmap offsets for them, and records what the driver asks of it. Clones
//! share state, so a test keeps one clone for inspection and gives another to
//! the code under test.

use super::abi::*;
use super::device::DrmDevice;
use crate::geometry::Rect;
use nix::errno::Errno;
use std::collections::{HashMap, HashSet};
use std::os::fd::RawFd;
use std::ptr::NonNull;
use std::sync::{Arc, Mutex, MutexGuard};

const FIRST_FOREIGN_FD: RawFd = 500;
const MAP_OFFSET_STEP: u64 = 0x1000_0000;

/// Bus address the fake reports for a handle's backing memory.
pub fn fake_paddr(handle: u32) -> u32 {
    0x2000_0000 + handle * 0x0001_0000
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ObjectKind {
    Gfx2d,
    Dumb,
    Imported,
}

#[derive(Debug, Clone)]
struct FakeObject {
    slab: usize,
    kind: ObjectKind,
    width: u32,
    height: u32,
    stride: u32,
    format: u32,
    offset: u64,
}

#[derive(Debug, Clone)]
struct ForeignObject {
    slab: usize,
    width: u32,
    height: u32,
    stride: u32,
    format: u32,
}

/// One operation record as the fake kernel received it.
#[derive(Debug, Clone)]
pub struct RecordedSubmit {
    pub operation: u32,
    pub target: u32,
    pub sources: [Gfx2dSource; 2],
    pub rects: Vec<Rect>,
    pub fill: Option<Gfx2dFill>,
    pub blend: Option<Gfx2dBlend>,
    pub rop: Option<Gfx2dRop>,
}

#[derive(Debug)]
struct FakeState {
    driver: String,
    next_handle: u32,
    next_name: u32,
    next_slab: usize,
    next_fd: RawFd,
    slabs: HashMap<usize, Box<[u8]>>,
    objects: HashMap<u32, FakeObject>,
    names: HashMap<u32, u32>,
    foreign: HashMap<RawFd, ForeignObject>,
    mappings: Vec<(usize, u32, usize)>,
    submits: Vec<RecordedSubmit>,
    word_batches: Vec<Vec<u32>>,
    flushes: usize,
    calls: Vec<&'static str>,
    failures: HashSet<&'static str>,
    busy: HashSet<u32>,
    closed_while_mapped: usize,
}

impl Default for FakeState {
    fn default() -> Self {
        FakeState {
            driver: "microchip-gfx2d".to_string(),
            next_handle: 1,
            next_name: 1,
            next_slab: 1,
            next_fd: FIRST_FOREIGN_FD,
            slabs: HashMap::new(),
            objects: HashMap::new(),
            names: HashMap::new(),
            foreign: HashMap::new(),
            mappings: Vec::new(),
            submits: Vec::new(),
            word_batches: Vec::new(),
            flushes: 0,
            calls: Vec::new(),
            failures: HashSet::new(),
            busy: HashSet::new(),
            closed_while_mapped: 0,
        }
    }
}

impl FakeState {
    /// Logs a call and fails it if a failure was injected for it.
    fn enter(&mut self, call: &'static str) -> nix::Result<()> {
        self.calls.push(call);
        if self.failures.remove(call) {
            return Err(Errno::EIO);
        }
        Ok(())
    }

    fn new_slab(&mut self, size: usize) -> usize {
        let id = self.next_slab;
        self.next_slab += 1;
        self.slabs.insert(id, vec![0u8; size.max(1)].into_boxed_slice());
        id
    }

    fn new_object(&mut self, mut object: FakeObject) -> u32 {
        let handle = self.next_handle;
        self.next_handle += 1;
        object.offset = u64::from(handle) * MAP_OFFSET_STEP;
        self.objects.insert(handle, object);
        handle
    }

    fn object(&self, handle: u32) -> nix::Result<&FakeObject> {
        self.objects.get(&handle).ok_or(Errno::ENOENT)
    }

    fn release(&mut self, handle: u32) -> nix::Result<()> {
        let object = self.objects.remove(&handle).ok_or(Errno::EINVAL)?;
        if self.mappings.iter().any(|&(_, h, _)| h == handle) {
            self.closed_while_mapped += 1;
        }
        self.names.retain(|_, h| *h != handle);
        let shared = self.objects.values().any(|o| o.slab == object.slab)
            || self.foreign.values().any(|f| f.slab == object.slab);
        if !shared {
            self.slabs.remove(&object.slab);
        }
        Ok(())
    }

    fn slab_ptr(&mut self, slab: usize) -> nix::Result<NonNull<u8>> {
        let bytes = self.slabs.get_mut(&slab).ok_or(Errno::EFAULT)?;
        NonNull::new(bytes.as_mut_ptr()).ok_or(Errno::EFAULT)
    }

    fn execute(&mut self, rec: &RecordedSubmit) -> nix::Result<()> {
        let target = self.object(rec.target)?.clone();
        let bpp = bytes_per_pixel(target.format);
        let bounds = Rect::sized(target.width as i32, target.height as i32);
        let source = match rec.operation {
            GFX2D_OP_COPY => Some(self.object(rec.sources[0].handle)?.clone()),
            _ => None,
        };
        for rect in &rec.rects {
            let Some(clip) = rect.intersect(&bounds) else {
                continue;
            };
            for y in clip.y..clip.bottom() {
                for x in clip.x..clip.right() {
                    let pixel = match (&source, rec.fill) {
                        (None, Some(fill)) => fill.color.to_le_bytes(),
                        (Some(src), _) => {
                            let (Some(sx), Some(sy)) = (
                                x.checked_sub(rec.sources[0].x),
                                y.checked_sub(rec.sources[0].y),
                            ) else {
                                continue;
                            };
                            if sx < 0 || sy < 0 || sx as u32 >= src.width || sy as u32 >= src.height {
                                continue;
                            }
                            let at = sy as usize * src.stride as usize + sx as usize * bpp;
                            let slab = self.slabs.get(&src.slab).ok_or(Errno::EFAULT)?;
                            let mut px = [0u8; 4];
                            px[..bpp].copy_from_slice(&slab[at..at + bpp]);
                            px
                        }
                        _ => return Ok(()),
                    };
                    let at = y as usize * target.stride as usize + x as usize * bpp;
                    let slab = self.slabs.get_mut(&target.slab).ok_or(Errno::EFAULT)?;
                    slab[at..at + bpp].copy_from_slice(&pixel[..bpp]);
                }
            }
        }
        Ok(())
    }

    fn check_busy(&self, handle: u32, flags: u32) -> nix::Result<()> {
        self.object(handle)?;
        if self.busy.contains(&handle) {
            if flags & WaitFlags::NONBLOCK.bits() != 0 {
                return Err(Errno::EBUSY);
            }
            return Err(Errno::ETIMEDOUT);
        }
        Ok(())
    }
}

fn bytes_per_pixel(format: u32) -> usize {
    match format {
        11 => 4,
        9 => 2,
        _ => 1,
    }
}

#[derive(Debug, Clone, Default)]
pub struct FakeDrm {
    state: Arc<Mutex<FakeState>>,
}

impl FakeDrm {
    pub fn new() -> Self {
        Self::default()
    }

    /// A fake that reports `driver` as its driver name.
    pub fn with_driver(driver: &str) -> Self {
        let fake = Self::default();
        fake.lock().driver = driver.to_string();
        fake
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    /// Makes the next call of the named method fail with EIO.
    pub fn fail_next(&self, call: &'static str) {
        self.lock().failures.insert(call);
    }

    pub fn set_busy(&self, handle: u32, busy: bool) {
        let mut st = self.lock();
        if busy {
            st.busy.insert(handle);
        } else {
            st.busy.remove(&handle);
        }
    }

    /// Creates memory owned by "another process": returns a descriptor that
    /// can be imported and a CPU address for it.
    pub fn export_foreign(
        &self,
        width: u32,
        height: u32,
        stride: u32,
        format: u32,
    ) -> (RawFd, NonNull<u8>) {
        let mut st = self.lock();
        let slab = st.new_slab((height * stride) as usize);
        let fd = st.next_fd;
        st.next_fd += 1;
        st.foreign.insert(
            fd,
            ForeignObject {
                slab,
                width,
                height,
                stride,
                format,
            },
        );
        let ptr = st.slab_ptr(slab).unwrap();
        (fd, ptr)
    }

    pub fn open_handles(&self) -> usize {
        self.lock().objects.len()
    }

    pub fn live_mappings(&self) -> usize {
        self.lock().mappings.len()
    }

    pub fn closed_while_mapped(&self) -> usize {
        self.lock().closed_while_mapped
    }

    pub fn submits(&self) -> Vec<RecordedSubmit> {
        self.lock().submits.clone()
    }

    pub fn word_batches(&self) -> Vec<Vec<u32>> {
        self.lock().word_batches.clone()
    }

    pub fn flushes(&self) -> usize {
        self.lock().flushes
    }

    /// Number of times the named method was called.
    pub fn call_count(&self, call: &str) -> usize {
        self.lock().calls.iter().filter(|c| **c == call).count()
    }
}

impl DrmDevice for FakeDrm {
    fn driver_name(&self) -> nix::Result<String> {
        let mut st = self.lock();
        st.enter("driver_name")?;
        Ok(st.driver.clone())
    }

    fn gem_close(&self, handle: u32) -> nix::Result<()> {
        let mut st = self.lock();
        st.enter("gem_close")?;
        st.release(handle)
    }

    fn gem_flink(&self, handle: u32) -> nix::Result<u32> {
        let mut st = self.lock();
        st.enter("gem_flink")?;
        st.object(handle)?;
        let name = st.next_name;
        st.next_name += 1;
        st.names.insert(name, handle);
        Ok(name)
    }

    fn prime_fd_to_handle(&self, fd: RawFd) -> nix::Result<u32> {
        let mut st = self.lock();
        st.enter("prime_fd_to_handle")?;
        let f = st.foreign.get(&fd).cloned().ok_or(Errno::EBADF)?;
        Ok(st.new_object(FakeObject {
            slab: f.slab,
            kind: ObjectKind::Imported,
            width: f.width,
            height: f.height,
            stride: f.stride,
            format: f.format,
            offset: 0,
        }))
    }

    fn create_dumb(&self, req: &mut DrmModeCreateDumb) -> nix::Result<()> {
        let mut st = self.lock();
        st.enter("create_dumb")?;
        let pitch = req.width * req.bpp.div_ceil(8);
        let size = u64::from(pitch * req.height);
        let slab = st.new_slab(size as usize);
        req.handle = st.new_object(FakeObject {
            slab,
            kind: ObjectKind::Dumb,
            width: req.width,
            height: req.height,
            stride: pitch,
            format: 0,
            offset: 0,
        });
        req.pitch = pitch;
        req.size = size;
        Ok(())
    }

    fn map_dumb(&self, handle: u32) -> nix::Result<u64> {
        let mut st = self.lock();
        st.enter("map_dumb")?;
        Ok(st.object(handle)?.offset)
    }

    fn destroy_dumb(&self, handle: u32) -> nix::Result<()> {
        let mut st = self.lock();
        st.enter("destroy_dumb")?;
        if st.object(handle)?.kind != ObjectKind::Dumb {
            return Err(Errno::EINVAL);
        }
        st.release(handle)
    }

    fn map(&self, offset: u64, len: usize) -> nix::Result<NonNull<u8>> {
        let mut st = self.lock();
        st.enter("map")?;
        let (handle, object) = st
            .objects
            .iter()
            .find(|(_, o)| o.offset == offset && o.offset != 0)
            .map(|(h, o)| (*h, o.clone()))
            .ok_or(Errno::EINVAL)?;
        if len > st.slabs.get(&object.slab).map_or(0, |s| s.len()) {
            return Err(Errno::EINVAL);
        }
        let ptr = st.slab_ptr(object.slab)?;
        st.mappings.push((ptr.as_ptr() as usize, handle, len));
        Ok(ptr)
    }

    fn unmap(&self, addr: NonNull<u8>, len: usize) -> nix::Result<()> {
        let mut st = self.lock();
        st.enter("unmap")?;
        let at = st
            .mappings
            .iter()
            .position(|&(a, _, l)| a == addr.as_ptr() as usize && l == len)
            .ok_or(Errno::EINVAL)?;
        st.mappings.remove(at);
        Ok(())
    }

    fn gfx2d_alloc(&self, req: &mut Gfx2dAllocBuffer) -> nix::Result<()> {
        let mut st = self.lock();
        st.enter("gfx2d_alloc")?;
        let slab = st.new_slab(req.size as usize);
        let handle = st.new_object(FakeObject {
            slab,
            kind: ObjectKind::Gfx2d,
            width: u32::from(req.width),
            height: u32::from(req.height),
            stride: u32::from(req.stride),
            format: req.format,
            offset: 0,
        });
        req.handle = handle;
        req.offset = st.object(handle)?.offset;
        Ok(())
    }

    fn gfx2d_import(&self, req: &mut Gfx2dImportBuffer) -> nix::Result<()> {
        let mut st = self.lock();
        st.enter("gfx2d_import")?;
        let f = st.foreign.get(&req.fd).cloned().ok_or(Errno::EBADF)?;
        req.handle = st.new_object(FakeObject {
            slab: f.slab,
            kind: ObjectKind::Imported,
            width: u32::from(req.width),
            height: u32::from(req.height),
            stride: u32::from(req.stride),
            format: req.format,
            offset: 0,
        });
        Ok(())
    }

    fn gfx2d_submit(&self, req: &Gfx2dSubmit) -> nix::Result<()> {
        let mut st = self.lock();
        st.enter("gfx2d_submit")?;
        let rects = if req.num_rectangles == 0 {
            Vec::new()
        } else {
            // SAFETY: the driver passes a pointer to a live `[Rect]` of
            // `num_rectangles` elements for the duration of the call.
            unsafe {
                std::slice::from_raw_parts(req.rectangles as usize as *const Rect, req.num_rectangles)
            }
            .to_vec()
        };
        let rec = RecordedSubmit {
            operation: req.operation,
            target: req.target_handle,
            sources: req.sources,
            rects,
            fill: req.fill(),
            blend: req.blend(),
            rop: req.rop(),
        };
        st.execute(&rec)?;
        st.submits.push(rec);
        Ok(())
    }

    fn gfx2d_wait(&self, req: &Gfx2dWait) -> nix::Result<()> {
        let mut st = self.lock();
        st.enter("gfx2d_wait")?;
        st.check_busy(req.handle, req.flags)
    }

    fn gfx2d_sync_for_cpu(&self, req: &Gfx2dSyncForCpu) -> nix::Result<()> {
        let mut st = self.lock();
        st.enter("gfx2d_sync_for_cpu")?;
        st.check_busy(req.handle, req.flags)
    }

    fn gfx2d_sync_for_gpu(&self, handle: u32) -> nix::Result<()> {
        let mut st = self.lock();
        st.enter("gfx2d_sync_for_gpu")?;
        st.object(handle).map(drop)
    }

    fn legacy_gem_addr(&self, name: u32) -> nix::Result<u32> {
        let mut st = self.lock();
        st.enter("legacy_gem_addr")?;
        st.names.get(&name).copied().map(fake_paddr).ok_or(Errno::ENOENT)
    }

    fn legacy_submit(&self, words: &[u32]) -> nix::Result<()> {
        let mut st = self.lock();
        st.enter("legacy_submit")?;
        st.word_batches.push(words.to_vec());
        Ok(())
    }

    fn legacy_flush(&self) -> nix::Result<()> {
        let mut st = self.lock();
        st.enter("legacy_flush")?;
        st.flushes += 1;
        Ok(())
    }
}
