// src/renderer.rs

//! Rectangle drawing: picks the operation the current renderer state calls
//! for and drives the encoder through it.
//!
//! Dispatch is split in two. `plan` is pure: it reads a `RendererState` and
//! the device capabilities and decides what to draw, or why nothing can be.
//! `Renderer::draw_rectangles` then carries the plan out, allocating the
//! scratch buffer the two-pass blends need. Every error `plan` can report is
//! found before anything reaches the device, so a rejected draw leaves no
//! partial work behind.

use crate::blend::{BlendFactor, BlendFunction};
use crate::buffer::{Buffer, BufferManager, Liveness, Surface};
use crate::color::Argb;
use crate::encoder::{BlendParams, CommandEncoder, Placement, RopParams};
use crate::error::BlitError;
use crate::format::PixelFormat;
use crate::geometry::Rect;
use crate::session::Capabilities;
use anyhow::{Context, Result};
use log::{debug, error, trace};
use std::collections::HashMap;

pub mod state;


pub use state::{RendererState, SourceRole, SourceSlot};

/// What a draw call turns into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrawPlan {
    /// Paint the rectangles with a constant colour.
    Fill { target: Surface, color: Argb },
    /// Copy the primary source onto the target.
    Copy { target: Surface, source: Placement },
    /// Blend the primary source with the destination side.
    Blend {
        target: Surface,
        dst: Placement,
        src: Placement,
        params: BlendParams,
    },
    /// Multiply the primary source by a constant colour into scratch, then
    /// blend the scratch with the destination side.
    BlendPremultiplied {
        target: Surface,
        dst: Placement,
        src: Placement,
        color: Argb,
        params: BlendParams,
    },
    /// Fill scratch with a constant colour, then blend it with the
    /// destination side.
    FillThenBlend {
        target: Surface,
        dst: Placement,
        color: Argb,
        params: BlendParams,
    },
}

impl DrawPlan {
    pub fn target(&self) -> Surface {
        match *self {
            DrawPlan::Fill { target, .. }
            | DrawPlan::Copy { target, .. }
            | DrawPlan::Blend { target, .. }
            | DrawPlan::BlendPremultiplied { target, .. }
            | DrawPlan::FillThenBlend { target, .. } => target,
        }
    }
}

/// Factors that multiply a source by the constant colour and alpha.
fn premultiply_params(color: Argb) -> BlendParams {
    BlendParams {
        function: BlendFunction::Add,
        src_factor: BlendFactor::ConstantColor,
        dst_factor: BlendFactor::Zero,
        src_alpha_factor: BlendFactor::ConstantAlpha,
        dst_alpha_factor: BlendFactor::Zero,
        src_color: color,
        ..BlendParams::default()
    }
}

/// The destination side of a blend: the secondary slot when it is active,
/// otherwise the target read back as a source.
fn destination(state: &RendererState, target: Surface, caps: &Capabilities) -> Result<Placement> {
    if let Some(dst) = state.slot(SourceRole::Secondary).active() {
        return Ok(dst);
    }
    if caps.dst_is_source || caps.max_sources >= 2 {
        return Ok(Placement::origin(target));
    }
    Err(BlitError::MissingSource("destination").into())
}

/// Decides how to draw with `state` on hardware with `caps`.
pub fn plan(state: &RendererState, caps: &Capabilities) -> Result<DrawPlan> {
    let target = state.target().ok_or(BlitError::NoTarget)?;
    let bound = [
        (SourceRole::Primary, "source"),
        (SourceRole::Secondary, "destination"),
    ];
    for (role, name) in bound {
        if state.slot(role).is_dangling() {
            return Err(BlitError::MissingSource(name)).context("Bound buffer was dropped");
        }
    }
    let source = state.slot(SourceRole::Primary).active();
    let color = state.current_source_color();

    if !state.is_blend_enabled() {
        return Ok(match source {
            Some(source) => DrawPlan::Copy { target, source },
            None => DrawPlan::Fill { target, color },
        });
    }

    let dst = destination(state, target, caps)?;
    let params = state.blend_params();
    match source {
        Some(src) if color.is_opaque_white() => Ok(DrawPlan::Blend {
            target,
            dst,
            src,
            params,
        }),
        Some(src) if caps.constant_color_blend => Ok(DrawPlan::BlendPremultiplied {
            target,
            dst,
            src,
            color,
            params,
        }),
        Some(_) => Err(BlitError::UnsupportedCombination(
            "blending with a constant source colour",
        )
        .into()),
        None if caps.blend_without_source => Ok(DrawPlan::FillThenBlend {
            target,
            dst,
            color,
            params,
        }),
        None => Err(BlitError::UnsupportedCombination("blending without a source surface").into()),
    }
}

/// An intermediate surface for two-pass blends and the target it serves.
#[derive(Debug)]
struct Scratch {
    owner: Liveness,
    buffer: Buffer,
}

/// Renderer state plus the encoder and scratch buffers it draws with.
#[derive(Debug)]
pub struct Renderer {
    state: RendererState,
    encoder: Box<dyn CommandEncoder>,
    /// Keyed by target id.
    scratch: HashMap<u32, Scratch>,
}

impl Renderer {
    pub fn new(encoder: Box<dyn CommandEncoder>) -> Self {
        Renderer {
            state: RendererState::new(),
            encoder,
            scratch: HashMap::new(),
        }
    }

    pub fn state(&self) -> &RendererState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut RendererState {
        &mut self.state
    }

    /// Draws `rects` as the current state says. Failures are logged and the
    /// call is dropped; the state is left as it was.
    pub fn draw_rectangles(&mut self, buffers: &BufferManager, rects: &[Rect]) {
        if let Err(e) = self.try_draw(buffers, rects) {
            error!("Dropped draw of {} rectangle(s): {:#}", rects.len(), e);
        }
    }

    pub(crate) fn try_draw(&mut self, buffers: &BufferManager, rects: &[Rect]) -> Result<()> {
        self.release_stale_scratch()?;
        let plan = plan(&self.state, buffers.capabilities())?;
        debug!(
            "Drawing {} rectangle(s) into buffer {}: {:?}",
            rects.len(),
            plan.target().id,
            plan
        );
        match plan {
            DrawPlan::Fill { target, color } => self.encoder.fill(&target, color, rects),
            DrawPlan::Copy { target, source } => self.encoder.copy(&target, &source, rects),
            DrawPlan::Blend {
                target,
                dst,
                src,
                params,
            } => self.encoder.blend(&target, &dst, &src, &params, rects),
            DrawPlan::BlendPremultiplied {
                target,
                dst,
                src,
                color,
                params,
            } => {
                let tmp = self.scratch_for(buffers, &target)?;
                trace!("source colour {} into scratch buffer {}", color, tmp.id);
                self.encoder
                    .blend(&tmp, &src, &src, &premultiply_params(color), rects)
                    .context("Pre-multiplication pass failed")?;
                self.encoder
                    .blend(&target, &dst, &Placement::origin(tmp), &params, rects)
            }
            DrawPlan::FillThenBlend {
                target,
                dst,
                color,
                params,
            } => {
                let tmp = self.scratch_for(buffers, &target)?;
                trace!("source colour {} into scratch buffer {}", color, tmp.id);
                self.encoder
                    .fill(&tmp, color, rects)
                    .context("Constant colour pass failed")?;
                self.encoder
                    .blend(&target, &dst, &Placement::origin(tmp), &params, rects)
            }
        }
    }

    /// The scratch surface for `target`: ARGB8888 at the target's size,
    /// allocated on first use.
    fn scratch_for(&mut self, buffers: &BufferManager, target: &Surface) -> Result<Surface> {
        if let Some(tmp) = self.scratch.get(&target.id) {
            return Ok(tmp.buffer.surface());
        }
        let owner = self.state.target_liveness().ok_or(BlitError::NoTarget)?;
        let format = PixelFormat::Argb8888;
        let tmp = buffers
            .alloc(
                target.width,
                target.height,
                format,
                Some(target.width * format.bytes_per_pixel()),
            )
            .with_context(|| format!("Failed to create scratch buffer for buffer {}", target.id))?;
        debug!("Scratch buffer {} created for buffer {}", tmp.id(), target.id);
        let surface = tmp.surface();
        self.scratch.insert(target.id, Scratch { owner, buffer: tmp });
        Ok(surface)
    }

    /// Releases scratch buffers whose target has been dropped. Queued
    /// words may still refer to them, so those are submitted first.
    fn release_stale_scratch(&mut self) -> Result<()> {
        if self.scratch.values().all(|s| s.owner.is_alive()) {
            return Ok(());
        }
        if self.encoder.pending_words() > 0 {
            self.encoder
                .flush()
                .context("Failed to submit work before releasing scratch buffers")?;
        }
        self.scratch.retain(|id, s| {
            let keep = s.owner.is_alive();
            if !keep {
                debug!(
                    "Releasing scratch buffer {} of dropped buffer {}",
                    s.buffer.id(),
                    id
                );
            }
            keep
        });
        Ok(())
    }

    /// Raster operation over `surfaces`; the first is the target.
    pub fn rop(&mut self, surfaces: &[Placement], params: &RopParams, rects: &[Rect]) -> Result<()> {
        debug!(
            "{:?} over {} surface(s), {} rectangle(s)",
            params.mode,
            surfaces.len(),
            rects.len()
        );
        self.release_stale_scratch()?;
        self.encoder.rop(surfaces, params, rects)
    }

    pub fn flush(&mut self) -> Result<()> {
        self.encoder.flush()?;
        self.release_stale_scratch()
    }

    /// Scratch buffers currently held.
    pub fn scratch_count(&self) -> usize {
        self.scratch.len()
    }

    pub fn wait_for_event(&mut self) -> Result<()> {
        self.encoder.wait_for_event()
    }

    pub fn pending_words(&self) -> usize {
        self.encoder.pending_words()
    }

    /// Forgets buffer `id`: clears any slot bound to it and releases the
    /// scratch buffer kept for it.
    pub fn forget(&mut self, id: u32) {
        self.state.forget(id);
        if let Some(tmp) = self.scratch.remove(&id) {
            debug!("Releasing scratch buffer {} of buffer {}", tmp.buffer.id(), id);
        }
    }
}
