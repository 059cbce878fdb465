// src/encoder/legacy.rs

//! Word-stream encoder with register caching and batched submission.

use super::words::{Area, Instruction, Origin, Register, TransferDirection, REGISTER_COUNT};
use super::{check_rop_surfaces, BlendParams, CommandEncoder, Placement, RopParams};
use crate::blend::RopMode;
use crate::buffer::Surface;
use crate::color::Argb;
use crate::config::EncoderConfig;
use crate::drm::DrmDevice;
use crate::error::BlitError;
use crate::geometry::Rect;
use anyhow::{Context, Result};
use log::{debug, log_enabled, trace, Level};
use std::fmt;
use std::sync::Arc;

/// Most words a single rectangle of any operation can append: four
/// surface loads plus a ROP instruction.
pub const MAX_OP_WORDS: usize = 10 * 2 + 7;

/// Packs operations into instruction words and submits them in batches.
///
/// The last value loaded into each engine register is remembered and a
/// load of the same value is skipped. Before each rectangle is appended,
/// a queue longer than the auto-submit threshold is submitted first.
pub struct WordEncoder {
    device: Arc<dyn DrmDevice>,
    queue: Vec<u32>,
    threshold: usize,
    cache: [Option<u32>; REGISTER_COUNT],
    dir: TransferDirection,
}

impl fmt::Debug for WordEncoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WordEncoder")
            .field("queued", &self.queue.len())
            .field("capacity", &self.queue.capacity())
            .field("threshold", &self.threshold)
            .finish()
    }
}

impl WordEncoder {
    pub fn new(device: Arc<dyn DrmDevice>, config: &EncoderConfig) -> Self {
        let capacity = config.page_words.max(2 * MAX_OP_WORDS);
        let threshold = config
            .auto_submit_threshold_words
            .min(capacity - MAX_OP_WORDS);
        debug!(
            "Word encoder: {} word buffer, auto-submit past {} words",
            capacity, threshold
        );
        WordEncoder {
            device,
            queue: Vec::with_capacity(capacity),
            threshold,
            cache: [None; REGISTER_COUNT],
            dir: TransferDirection::default(),
        }
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// The words queued so far.
    pub fn queued(&self) -> &[u32] {
        &self.queue
    }

    fn load(&mut self, reg: Register, value: u32) {
        let cached = &mut self.cache[reg.index()];
        if *cached == Some(value) {
            trace!("LDR {:?} = {:#010x} elided", reg, value);
            return;
        }
        *cached = Some(value);
        Instruction::LoadRegister { reg, value }.encode(&mut self.queue);
    }

    fn load_surface(&mut self, slot: usize, surface: &Surface) {
        let Some((pa, pitch, cfg)) = Register::surface(slot) else {
            return;
        };
        self.load(pa, surface.gpu_addr);
        if let Some(pitch) = pitch {
            self.load(pitch, surface.stride);
        }
        if let Some(cfg) = cfg {
            self.load(cfg, surface.format.hw_code());
        }
    }

    /// Submits the queue if it has grown past the threshold.
    fn reserve(&mut self) -> Result<()> {
        if self.queue.len() > self.threshold {
            debug!(
                "Auto-submitting {} queued words (threshold {})",
                self.queue.len(),
                self.threshold
            );
            self.submit()?;
        }
        Ok(())
    }

    /// Hands the queued words to the kernel. The queue is emptied whether
    /// or not the kernel accepts them; on failure the register cache no
    /// longer reflects the engine and is forgotten.
    fn submit(&mut self) -> Result<()> {
        if self.queue.is_empty() {
            return Ok(());
        }
        if log_enabled!(Level::Trace) {
            match Instruction::decode_all(&self.queue) {
                Ok(batch) => batch.iter().for_each(|i| trace!("  {}", i)),
                Err(at) => trace!("  undecodable word {:#010x} at {}", self.queue[at], at),
            }
        }
        let result = self.device.legacy_submit(&self.queue);
        let len = self.queue.len();
        self.queue.clear();
        if let Err(e) = result {
            self.cache = [None; REGISTER_COUNT];
            return Err(BlitError::SubmissionFailure(e.to_string()))
                .with_context(|| format!("Failed to submit {} instruction words", len));
        }
        trace!("Submitted {} words", len);
        Ok(())
    }

    fn area(rect: &Rect) -> Area {
        Area {
            x: rect.x as u16,
            y: rect.y as u16,
            width: rect.w as u16,
            height: rect.h as u16,
        }
    }

    fn origin_in(rect: &Rect, placement: Option<&Placement>) -> Origin {
        placement.map_or(Origin::default(), |p| Origin {
            x: (rect.x - p.x) as u16,
            y: (rect.y - p.y) as u16,
        })
    }

    /// Clips `rect` to the target and to every placed source.
    fn clip(rect: &Rect, target: &Surface, sources: &[&Placement]) -> Option<Rect> {
        sources
            .iter()
            .try_fold(rect.intersect(&target.bounds())?, |clip, p| clip.intersect(&p.extent()))
    }

    fn clipped(rects: &[Rect], target: &Surface, sources: &[&Placement]) -> Vec<Rect> {
        rects
            .iter()
            .filter_map(|r| {
                let clipped = Self::clip(r, target, sources);
                if clipped.is_none() {
                    trace!("Rectangle {:?} clipped away", r);
                }
                clipped
            })
            .collect()
    }
}

impl CommandEncoder for WordEncoder {
    fn fill(&mut self, target: &Surface, color: Argb, rects: &[Rect]) -> Result<()> {
        for clip in Self::clipped(rects, target, &[]) {
            self.reserve()?;
            self.load_surface(0, target);
            Instruction::Fill {
                dir: self.dir,
                dst: Self::area(&clip),
                color,
            }
            .encode(&mut self.queue);
        }
        Ok(())
    }

    fn copy(&mut self, target: &Surface, source: &Placement, rects: &[Rect]) -> Result<()> {
        for clip in Self::clipped(rects, target, &[source]) {
            self.reserve()?;
            self.load_surface(0, target);
            self.load_surface(1, &source.surface);
            Instruction::Copy {
                dir: self.dir,
                dst: Self::area(&clip),
                src: Self::origin_in(&clip, Some(source)),
            }
            .encode(&mut self.queue);
        }
        Ok(())
    }

    fn blend(
        &mut self,
        target: &Surface,
        dst: &Placement,
        src: &Placement,
        params: &BlendParams,
        rects: &[Rect],
    ) -> Result<()> {
        for clip in Self::clipped(rects, target, &[src, dst]) {
            self.reserve()?;
            self.load_surface(0, target);
            self.load_surface(1, &src.surface);
            self.load_surface(2, &dst.surface);
            Instruction::Blend {
                dir: self.dir,
                dst: Self::area(&clip),
                src0: Self::origin_in(&clip, Some(src)),
                src1: Self::origin_in(&clip, Some(dst)),
                function: params.function.word_code(),
                dst_factor: params.dst_factor.code(),
                src_factor: params.src_factor.code(),
            }
            .encode(&mut self.queue);
        }
        Ok(())
    }

    fn rop(&mut self, surfaces: &[Placement], params: &RopParams, rects: &[Rect]) -> Result<()> {
        check_rop_surfaces(params.mode, surfaces.len())?;
        let target = surfaces[0].surface;
        let pixel_sources: Vec<&Placement> = surfaces[1..].iter().take(2).collect();
        let mask_addr = match params.mode {
            RopMode::Rop4 => surfaces[3].surface.gpu_addr,
            _ => 0,
        };
        for clip in Self::clipped(rects, &target, &pixel_sources) {
            self.reserve()?;
            for (slot, placement) in surfaces.iter().enumerate() {
                self.load_surface(slot, &placement.surface);
            }
            Instruction::Rop {
                dst: Self::area(&clip),
                src0: Self::origin_in(&clip, pixel_sources.first().copied()),
                src1: Self::origin_in(&clip, pixel_sources.get(1).copied()),
                mask_addr,
                mode: params.mode.code(),
                high: params.high,
                low: params.low,
            }
            .encode(&mut self.queue);
        }
        Ok(())
    }

    fn wait_for_event(&mut self) -> Result<()> {
        self.reserve()?;
        Instruction::WaitForEvent { interrupt: false }.encode(&mut self.queue);
        self.submit()
    }

    fn flush(&mut self) -> Result<()> {
        self.submit()?;
        self.device
            .legacy_flush()
            .map_err(|e| BlitError::SubmissionFailure(e.to_string()))
            .context("Failed to flush the engine")
    }

    fn pending_words(&self) -> usize {
        self.queue.len()
    }
}
