// src/context.rs

//! The driver's public face: one value holding the device session, the
//! buffer manager and the renderer, passed explicitly to every call.
//!
//! Buffer and synchronization calls return `Result`. Draw calls do not:
//! a draw that cannot be carried out is logged and dropped, and the
//! renderer state stays as it was so a corrected call can succeed.

use crate::blend::{BlendFactor, BlendFunction};
use crate::buffer::{Buffer, BufferManager, ImportDesc};
use crate::config::Config;
use crate::deadline::Deadline;
use crate::drm::DrmDevice;
use crate::encoder::{Placement, RopParams};
use crate::format::PixelFormat;
use crate::geometry::Rect;
use crate::renderer::{Renderer, RendererState, SourceRole};
use crate::session::{Capabilities, DeviceSession, Generation};
use anyhow::{Context as _, Result};
use log::{debug, info, warn};
use std::sync::Arc;

/// A device session with its buffers and renderer.
///
/// Not internally synchronized; share it between threads only behind a
/// lock.
#[derive(Debug)]
pub struct Context {
    renderer: Renderer,
    buffers: BufferManager,
}

impl Context {
    /// Opens the device described by `config.device`.
    pub fn init(config: &Config) -> Result<Self> {
        let session = DeviceSession::open(&config.device)?;
        Ok(Self::from_session(session, config))
    }

    /// Builds a context on an already opened device.
    pub fn with_device(device: Arc<dyn DrmDevice>, config: &Config) -> Result<Self> {
        let session = DeviceSession::with_device(device, config.device.backend)?;
        Ok(Self::from_session(session, config))
    }

    fn from_session(session: DeviceSession, config: &Config) -> Self {
        let buffers = BufferManager::new(session);
        let encoder = buffers
            .backend()
            .encoder(Arc::clone(buffers.session().device()), &config.encoder);
        info!(
            "gfx2d context ready on the {} generation",
            buffers.session().generation()
        );
        Context {
            renderer: Renderer::new(encoder),
            buffers,
        }
    }

    /// Submits outstanding work and closes the device. Dropping the context
    /// does the same but can only log a failure.
    pub fn cleanup(mut self) -> Result<()> {
        self.submit_pending()
            .context("Failed to submit queued work at cleanup")
    }

    pub fn capabilities(&self) -> &Capabilities {
        self.buffers.capabilities()
    }

    pub fn generation(&self) -> Generation {
        self.buffers.session().generation()
    }

    pub fn buffers(&self) -> &BufferManager {
        &self.buffers
    }

    // --- Buffers ---

    pub fn alloc(
        &self,
        width: u32,
        height: u32,
        format: PixelFormat,
        stride: Option<u32>,
    ) -> Result<Buffer> {
        self.buffers.alloc(width, height, format, stride)
    }

    /// Wraps a buffer exported by another owner.
    ///
    /// # Safety
    ///
    /// See `BufferManager::import`.
    pub unsafe fn import(&self, desc: &ImportDesc) -> Result<Buffer> {
        // SAFETY: forwarded from the caller.
        unsafe { self.buffers.import(desc) }
    }

    /// Releases `buffer`. Queued instructions are submitted first so none
    /// refers to freed memory, and the renderer forgets the buffer.
    pub fn free(&mut self, buffer: Buffer) {
        if let Err(e) = self.submit_pending() {
            warn!("Queued work lost before freeing buffer {}: {:#}", buffer.id(), e);
        }
        self.renderer.forget(buffer.id());
        self.buffers.free(buffer);
    }

    /// Claims CPU ownership of `buffer` once queued work touching it is
    /// done, waiting until `deadline` at most.
    ///
    /// The word-stream engine cannot bound the wait: it always blocks until
    /// the engine is idle, even for `None` or a past deadline.
    pub fn sync_for_cpu(&mut self, buffer: &Buffer, deadline: Option<Deadline>) -> Result<()> {
        self.submit_pending()?;
        self.buffers.sync_for_cpu(buffer, deadline)
    }

    pub fn sync_for_gpu(&self, buffer: &Buffer) -> Result<()> {
        self.buffers.sync_for_gpu(buffer)
    }

    /// Waits until `deadline` for queued work touching `buffer` to finish.
    /// `None` polls once. On the word-stream engine the deadline is not
    /// enforced and the call blocks until the engine is idle.
    pub fn wait(&mut self, buffer: &Buffer, deadline: Option<Deadline>) -> Result<()> {
        self.submit_pending()?;
        self.buffers.wait(buffer, deadline)
    }

    fn submit_pending(&mut self) -> Result<()> {
        let pending = self.renderer.pending_words();
        if pending == 0 {
            return Ok(());
        }
        debug!("Submitting {} queued words", pending);
        self.renderer.flush()
    }

    // --- Renderer state ---

    pub fn state(&self) -> &RendererState {
        self.renderer.state()
    }

    pub fn set_target(&mut self, buffer: Option<&Buffer>) {
        self.renderer.state_mut().set_target(buffer);
    }

    pub fn set_source(&mut self, role: SourceRole, buffer: Option<&Buffer>, x: i32, y: i32) {
        self.renderer.state_mut().set_source(role, buffer, x, y);
    }

    pub fn source_enable(&mut self, role: SourceRole, enabled: bool) {
        self.renderer.state_mut().source_enable(role, enabled);
    }

    pub fn source_color(&mut self, red: u8, green: u8, blue: u8, alpha: u8) {
        self.renderer
            .state_mut()
            .source_color(red, green, blue, alpha);
    }

    pub fn blend_color(&mut self, red: u8, green: u8, blue: u8, alpha: u8) {
        self.renderer.state_mut().blend_color(red, green, blue, alpha);
    }

    pub fn blend_enable(&mut self, enabled: bool) {
        self.renderer.state_mut().blend_enable(enabled);
    }

    pub fn blend_functions(&mut self, rgb: BlendFunction, alpha: BlendFunction) {
        self.renderer.state_mut().blend_functions(rgb, alpha);
    }

    pub fn blend_factors(
        &mut self,
        src_rgb: BlendFactor,
        dst_rgb: BlendFactor,
        src_alpha: BlendFactor,
        dst_alpha: BlendFactor,
    ) {
        self.renderer
            .state_mut()
            .blend_factors(src_rgb, dst_rgb, src_alpha, dst_alpha);
    }

    pub fn line_width(&mut self, width: u32) {
        self.renderer.state_mut().line_width(width);
    }

    // --- Drawing ---

    /// Draws `rects` with the current state. Failures only reach the log.
    pub fn draw_rectangles(&mut self, rects: &[Rect]) {
        self.renderer.draw_rectangles(&self.buffers, rects);
    }

    /// Raster operation over `surfaces`: the target first, then two or
    /// three sources as `params.mode` requires.
    pub fn rop(&mut self, params: &RopParams, surfaces: &[Placement], rects: &[Rect]) -> Result<()> {
        self.renderer.rop(surfaces, params, rects)
    }

    /// Submits queued work and, on the word-stream engine, waits for it to
    /// drain.
    pub fn flush(&mut self) -> Result<()> {
        self.renderer.flush()
    }

    /// Holds the engine until the next display event. Only the word-stream
    /// generation has such an instruction.
    pub fn wait_for_vsync(&mut self) -> Result<()> {
        self.renderer.wait_for_event()
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        if let Err(e) = self.submit_pending() {
            warn!("Queued work lost at teardown: {:#}", e);
        }
        debug!("gfx2d context closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blend::RopMode;
    use crate::config::LEGACY_DRIVER;
    use crate::drm::fake::FakeDrm;
    use crate::encoder::words::Instruction;
    use crate::error::{kind_of, BlitError};
    use std::time::Duration;
    use test_log::test;

    fn context(fake: &FakeDrm) -> Context {
        Context::with_device(Arc::new(fake.clone()), &Config::default()).unwrap()
    }

    fn pixel(buffer: &Buffer, x: u32, y: u32) -> u32 {
        let data = buffer.data().unwrap();
        let at = (y * buffer.stride() + x * 4) as usize;
        u32::from_le_bytes(data[at..at + 4].try_into().unwrap())
    }

    #[test]
    fn fill_copy_wait_readback() {
        let fake = FakeDrm::new();
        let mut ctx = context(&fake);
        let a = ctx.alloc(100, 100, PixelFormat::Argb8888, None).unwrap();
        let b = ctx.alloc(100, 100, PixelFormat::Argb8888, None).unwrap();

        ctx.set_target(Some(&a));
        ctx.source_color(0xff, 0x00, 0x00, 0x55);
        ctx.draw_rectangles(&[Rect::new(10, 10, 50, 50)]);

        // `a` sits at (20, 5) on `b`, so its filled square lands at (30, 15).
        ctx.set_target(Some(&b));
        ctx.set_source(SourceRole::Primary, Some(&a), 20, 5);
        ctx.source_enable(SourceRole::Primary, true);
        ctx.draw_rectangles(&[Rect::new(30, 15, 50, 50)]);
        ctx.flush().unwrap();

        let deadline = Deadline::after(Duration::from_millis(100)).unwrap();
        ctx.wait(&b, Some(deadline)).unwrap();
        ctx.sync_for_cpu(&b, Some(deadline)).unwrap();

        for (x, y) in [(30, 15), (79, 15), (30, 64), (79, 64), (55, 40)] {
            assert_eq!(pixel(&b, x, y), 0x55ff_0000, "inside at ({}, {})", x, y);
        }
        for (x, y) in [(29, 15), (80, 15), (30, 14), (30, 65), (0, 0), (99, 99)] {
            assert_eq!(pixel(&b, x, y), 0, "outside at ({}, {})", x, y);
        }
        ctx.sync_for_gpu(&b).unwrap();
    }

    #[test]
    fn past_deadline_on_imported_buffer_is_immediate() {
        let fake = FakeDrm::new();
        let mut ctx = context(&fake);
        let (fd, addr) = fake.export_foreign(16, 16, 64, PixelFormat::Argb8888.hw_code());
        let desc = ImportDesc {
            width: 16,
            height: 16,
            format: PixelFormat::Argb8888,
            stride: 64,
            fd,
            cpu_addr: Some(addr),
        };
        // SAFETY: the fake keeps the exported memory alive.
        let imported = unsafe { ctx.import(&desc) }.unwrap();

        ctx.wait(&imported, Some(Deadline::past())).unwrap();
        ctx.sync_for_cpu(&imported, Some(Deadline::past())).unwrap();
        ctx.sync_for_gpu(&imported).unwrap();
        assert_eq!(fake.call_count("gfx2d_sync_for_cpu"), 0);
        assert_eq!(fake.call_count("gfx2d_sync_for_gpu"), 0);
    }

    #[test]
    fn free_submits_queued_words_and_forgets_the_buffer() {
        let fake = FakeDrm::with_driver(LEGACY_DRIVER);
        let mut ctx = context(&fake);
        let target = ctx.alloc(32, 32, PixelFormat::Argb8888, None).unwrap();
        ctx.set_target(Some(&target));
        ctx.draw_rectangles(&[Rect::new(0, 0, 8, 8)]);
        assert!(fake.word_batches().is_empty());

        ctx.free(target);

        assert_eq!(fake.word_batches().len(), 1);
        assert_eq!(fake.open_handles(), 0);
        assert_eq!(fake.live_mappings(), 0);
        assert_eq!(ctx.state().target(), None);
    }

    #[test]
    fn wait_for_vsync_depends_on_generation() {
        let fake = FakeDrm::with_driver(LEGACY_DRIVER);
        let mut ctx = context(&fake);
        ctx.wait_for_vsync().unwrap();
        let batches = fake.word_batches();
        assert_eq!(batches.len(), 1);
        assert_eq!(
            Instruction::decode_all(&batches[0]).unwrap(),
            vec![Instruction::WaitForEvent { interrupt: false }]
        );

        let mut ctx = context(&FakeDrm::new());
        let err = ctx.wait_for_vsync().unwrap_err();
        assert!(matches!(
            kind_of(&err),
            Some(BlitError::UnsupportedCombination(_))
        ));
    }

    #[test]
    fn rop_with_wrong_surface_count_submits_nothing() {
        let fake = FakeDrm::new();
        let mut ctx = context(&fake);
        let a = ctx.alloc(8, 8, PixelFormat::Argb8888, None).unwrap();
        let b = ctx.alloc(8, 8, PixelFormat::Argb8888, None).unwrap();
        let params = RopParams {
            mode: RopMode::Rop3,
            high: 0xcc,
            low: 0xaa,
        };

        let err = ctx
            .rop(&params, &[a.at(0, 0), b.at(0, 0)], &[Rect::new(0, 0, 8, 8)])
            .unwrap_err();
        assert_eq!(
            kind_of(&err),
            Some(&BlitError::InvalidSurfaceCount {
                expected: 3,
                actual: 2
            })
        );
        assert!(fake.submits().is_empty());
    }

    #[test]
    fn far_out_rectangles_are_clipped_away() {
        for fake in [FakeDrm::new(), FakeDrm::with_driver(LEGACY_DRIVER)] {
            let mut ctx = context(&fake);
            let target = ctx.alloc(16, 16, PixelFormat::Argb8888, None).unwrap();
            let source = ctx.alloc(16, 16, PixelFormat::Argb8888, None).unwrap();
            ctx.set_target(Some(&target));
            ctx.draw_rectangles(&[
                Rect::new(i32::MAX - 1, 0, 10, 10),
                Rect::new(i32::MIN, i32::MIN, i32::MAX, i32::MAX),
            ]);
            ctx.set_source(SourceRole::Primary, Some(&source), i32::MIN, i32::MAX);
            ctx.source_enable(SourceRole::Primary, true);
            ctx.draw_rectangles(&[Rect::new(0, 0, 16, 16)]);
            ctx.flush().unwrap();

            assert!(fake.word_batches().is_empty());
            assert_eq!(ctx.state().target(), Some(target.surface()));
        }
    }

    #[test]
    fn drawing_after_the_target_is_dropped_submits_nothing() {
        let fake = FakeDrm::with_driver(LEGACY_DRIVER);
        let mut ctx = context(&fake);
        let target = ctx.alloc(16, 16, PixelFormat::Argb8888, None).unwrap();
        ctx.set_target(Some(&target));
        drop(target);

        ctx.draw_rectangles(&[Rect::new(0, 0, 4, 4)]);
        ctx.flush().unwrap();

        assert!(fake.word_batches().is_empty());
        assert_eq!(ctx.state().target(), None);
        assert_eq!(fake.open_handles(), 0);
    }

    #[test]
    fn cleanup_submits_queued_words() {
        let fake = FakeDrm::with_driver(LEGACY_DRIVER);
        let target = {
            let mut ctx = context(&fake);
            let target = ctx.alloc(16, 16, PixelFormat::Argb8888, None).unwrap();
            ctx.set_target(Some(&target));
            ctx.draw_rectangles(&[Rect::new(0, 0, 4, 4)]);
            ctx.cleanup().unwrap();
            target
        };
        assert_eq!(fake.word_batches().len(), 1);
        assert_eq!(fake.flushes(), 1);
        drop(target);
        assert_eq!(fake.open_handles(), 0);
    }
}
