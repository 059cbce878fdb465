// src/encoder.rs

//! Turning drawing operations into work for the engine.
//!
//! `CommandEncoder` is the contract both hardware generations implement:
//! the word-stream engine gets packed instructions batched in a submission
//! buffer (`WordEncoder`), the operation-record engine gets one kernel
//! record per operation (`RecordEncoder`).

use crate::blend::{BlendFactor, BlendFunction, RopMode};
use crate::buffer::Surface;
use crate::color::Argb;
use crate::drm::abi::BlendFlags;
use crate::error::BlitError;
use crate::geometry::Rect;
use anyhow::Result;
use std::fmt;

mod legacy;
mod record;
pub mod words;


pub use legacy::WordEncoder;
pub use record::RecordEncoder;

/// A surface read by an operation, positioned in target coordinates: the
/// source pixel read for target pixel `(x, y)` is `(x - self.x, y - self.y)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    pub surface: Surface,
    pub x: i32,
    pub y: i32,
}

impl Placement {
    pub fn new(surface: Surface, x: i32, y: i32) -> Self {
        Placement { surface, x, y }
    }

    /// The surface placed at the target origin.
    pub fn origin(surface: Surface) -> Self {
        Placement { surface, x: 0, y: 0 }
    }

    /// The area the surface covers, in target coordinates.
    pub fn extent(&self) -> Rect {
        self.surface.bounds().translate(self.x, self.y)
    }
}

/// Everything a BLEND operation needs besides its surfaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlendParams {
    pub function: BlendFunction,
    pub src_factor: BlendFactor,
    pub dst_factor: BlendFactor,
    pub src_alpha_factor: BlendFactor,
    pub dst_alpha_factor: BlendFactor,
    pub src_color: Argb,
    pub dst_color: Argb,
    pub flags: BlendFlags,
}

impl Default for BlendParams {
    fn default() -> Self {
        BlendParams {
            function: BlendFunction::Add,
            src_factor: BlendFactor::One,
            dst_factor: BlendFactor::Zero,
            src_alpha_factor: BlendFactor::One,
            dst_alpha_factor: BlendFactor::Zero,
            src_color: Argb::TRANSPARENT,
            dst_color: Argb::TRANSPARENT,
            flags: BlendFlags::empty(),
        }
    }
}

/// Raster-operation selector and its two control bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RopParams {
    pub mode: RopMode,
    pub high: u8,
    pub low: u8,
}

/// Encodes operations for one hardware generation.
///
/// Rectangles are in target coordinates. Errors leave the encoder ready
/// for the next operation.
pub trait CommandEncoder: Send + fmt::Debug {
    fn fill(&mut self, target: &Surface, color: Argb, rects: &[Rect]) -> Result<()>;

    fn copy(&mut self, target: &Surface, source: &Placement, rects: &[Rect]) -> Result<()>;

    /// Blends `src` (the primary source) with `dst` (the destination side)
    /// into `target`.
    fn blend(
        &mut self,
        target: &Surface,
        dst: &Placement,
        src: &Placement,
        params: &BlendParams,
        rects: &[Rect],
    ) -> Result<()>;

    /// `surfaces[0]` is the target, the rest are sources; for `Rop4` the
    /// last one is the 1 bpp mask.
    fn rop(&mut self, surfaces: &[Placement], params: &RopParams, rects: &[Rect]) -> Result<()>;

    /// Queues a wait for the next display event.
    fn wait_for_event(&mut self) -> Result<()>;

    /// Submits everything queued.
    fn flush(&mut self) -> Result<()>;

    /// Words queued but not yet submitted.
    fn pending_words(&self) -> usize {
        0
    }
}

/// Checks the surface count of a raster operation against its mode.
pub fn check_rop_surfaces(mode: RopMode, count: usize) -> Result<()> {
    if count != mode.surface_count() {
        return Err(BlitError::InvalidSurfaceCount {
            expected: mode.surface_count(),
            actual: count,
        }
        .into());
    }
    Ok(())
}
