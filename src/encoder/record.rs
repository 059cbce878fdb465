// src/encoder/record.rs

//! Operation-record encoder: one kernel submission per operation.

use super::{check_rop_surfaces, BlendParams, CommandEncoder, Placement, RopParams};
use crate::blend::RopMode;
use crate::buffer::Surface;
use crate::color::Argb;
use crate::drm::abi::*;
use crate::drm::DrmDevice;
use crate::error::BlitError;
use crate::geometry::Rect;
use anyhow::{Context, Result};
use log::{debug, log_enabled, trace, Level};
use std::sync::Arc;

#[derive(Debug)]
pub struct RecordEncoder {
    device: Arc<dyn DrmDevice>,
}

fn source_of(placement: &Placement) -> Gfx2dSource {
    Gfx2dSource {
        handle: placement.surface.handle,
        x: placement.x,
        y: placement.y,
    }
}

fn op_name(operation: u32) -> &'static str {
    match operation {
        GFX2D_OP_FILL => "FILL",
        GFX2D_OP_COPY => "COPY",
        GFX2D_OP_BLEND => "BLEND",
        _ => "ROP",
    }
}

impl RecordEncoder {
    pub fn new(device: Arc<dyn DrmDevice>) -> Self {
        RecordEncoder { device }
    }

    fn submit(&self, mut rec: Gfx2dSubmit, rects: &[Rect]) -> Result<()> {
        let name = op_name(rec.operation);
        if rects.is_empty() {
            trace!("{} with no rectangles skipped", name);
            return Ok(());
        }
        rec.rectangles = rects.as_ptr() as u64;
        rec.num_rectangles = rects.len();
        if log_enabled!(Level::Trace) {
            trace!("{:?}", rec);
            rects.iter().for_each(|r| trace!("  {:?}", r));
        }
        self.device
            .gfx2d_submit(&rec)
            .map_err(|e| BlitError::SubmissionFailure(e.to_string()))
            .with_context(|| format!("Failed to submit {} commands", name))?;
        debug!("Submitted {} over {} rectangle(s)", name, rects.len());
        Ok(())
    }
}

impl CommandEncoder for RecordEncoder {
    fn fill(&mut self, target: &Surface, color: Argb, rects: &[Rect]) -> Result<()> {
        let mut rec = Gfx2dSubmit::new(GFX2D_OP_FILL);
        rec.target_handle = target.handle;
        rec.params.fill = Gfx2dFill { color: color.0 };
        self.submit(rec, rects)
    }

    fn copy(&mut self, target: &Surface, source: &Placement, rects: &[Rect]) -> Result<()> {
        let mut rec = Gfx2dSubmit::new(GFX2D_OP_COPY);
        rec.target_handle = target.handle;
        rec.sources[0] = source_of(source);
        self.submit(rec, rects)
    }

    fn blend(
        &mut self,
        target: &Surface,
        dst: &Placement,
        src: &Placement,
        params: &BlendParams,
        rects: &[Rect],
    ) -> Result<()> {
        trace!(
            "blend {} src={} dst={} colour factors {}/{} alpha factors {}/{}",
            params.function,
            params.src_color,
            params.dst_color,
            params.src_factor,
            params.dst_factor,
            params.src_alpha_factor,
            params.dst_alpha_factor
        );
        let mut rec = Gfx2dSubmit::new(GFX2D_OP_BLEND);
        rec.target_handle = target.handle;
        rec.sources[0] = source_of(dst);
        rec.sources[1] = source_of(src);
        rec.params.blend = Gfx2dBlend {
            src_color: params.src_color.0,
            dst_color: params.dst_color.0,
            flags: params.flags.bits(),
            function: params.function.record_code(),
            safactor: params.src_alpha_factor.code(),
            dafactor: params.dst_alpha_factor.code(),
            scfactor: params.src_factor.code(),
            dcfactor: params.dst_factor.code(),
        };
        self.submit(rec, rects)
    }

    fn rop(&mut self, surfaces: &[Placement], params: &RopParams, rects: &[Rect]) -> Result<()> {
        check_rop_surfaces(params.mode, surfaces.len())?;
        let mut rec = Gfx2dSubmit::new(GFX2D_OP_ROP);
        rec.target_handle = surfaces[0].surface.handle;
        for (slot, placement) in surfaces[1..].iter().take(2).enumerate() {
            rec.sources[slot] = source_of(placement);
        }
        rec.params.rop = Gfx2dRop {
            mask_handle: match params.mode {
                RopMode::Rop4 => surfaces[3].surface.handle,
                _ => 0,
            },
            mode: params.mode.code(),
            high: params.high,
            low: params.low,
        };
        self.submit(rec, rects)
    }

    fn wait_for_event(&mut self) -> Result<()> {
        Err(BlitError::UnsupportedCombination(
            "wait-for-event needs the word-stream engine",
        )
        .into())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}
