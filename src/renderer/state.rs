// src/renderer/state.rs

//! The renderer's configuration record. Setters here never touch the
//! device; the dispatcher reads the record as it is when a draw is issued.
//!
//! Bound buffers are held by value with a `Liveness` token. A buffer
//! dropped while bound reads back as unbound.

use crate::blend::{BlendFactor, BlendFunction};
use crate::buffer::{Buffer, Liveness, Surface};
use crate::color::Argb;
use crate::encoder::{BlendParams, Placement};
use crate::drm::abi::BlendFlags;
use log::trace;
use std::fmt;

/// The role a source slot plays in a draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceRole {
    /// The surface copied or blended onto the target.
    Primary,
    /// The destination side of a blend, when it is not the target itself.
    Secondary,
    /// A 1 bpp mask.
    Mask,
}

impl SourceRole {
    pub const ALL: [SourceRole; 3] = [SourceRole::Primary, SourceRole::Secondary, SourceRole::Mask];

    fn index(self) -> usize {
        match self {
            SourceRole::Primary => 0,
            SourceRole::Secondary => 1,
            SourceRole::Mask => 2,
        }
    }
}

impl fmt::Display for SourceRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceRole::Primary => f.write_str("source"),
            SourceRole::Secondary => f.write_str("destination"),
            SourceRole::Mask => f.write_str("mask"),
        }
    }
}

/// A non-owning reference to a buffer plus where it sits on the target.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SourceSlot {
    pub surface: Option<Surface>,
    pub x: i32,
    pub y: i32,
    pub enabled: bool,
    alive: Liveness,
}

impl SourceSlot {
    /// The slot's placement if it is enabled and bound to a live buffer.
    pub fn active(&self) -> Option<Placement> {
        match (self.enabled, self.surface) {
            (true, Some(surface)) if self.alive.is_alive() => {
                Some(Placement::new(surface, self.x, self.y))
            }
            _ => None,
        }
    }

    /// Enabled, but the bound buffer has been dropped.
    pub fn is_dangling(&self) -> bool {
        self.enabled && self.surface.is_some() && !self.alive.is_alive()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RendererState {
    target: Option<(Surface, Liveness)>,
    slots: [SourceSlot; 3],
    source_color: Argb,
    blend_color: Argb,
    blend_enabled: bool,
    rgb_function: BlendFunction,
    alpha_function: BlendFunction,
    src_factor: BlendFactor,
    dst_factor: BlendFactor,
    src_alpha_factor: BlendFactor,
    dst_alpha_factor: BlendFactor,
    line_width: u32,
}

impl Default for RendererState {
    fn default() -> Self {
        RendererState {
            target: None,
            slots: Default::default(),
            source_color: Argb::OPAQUE_WHITE,
            blend_color: Argb::TRANSPARENT,
            blend_enabled: false,
            rgb_function: BlendFunction::Add,
            alpha_function: BlendFunction::Add,
            src_factor: BlendFactor::One,
            dst_factor: BlendFactor::Zero,
            src_alpha_factor: BlendFactor::One,
            dst_alpha_factor: BlendFactor::Zero,
            line_width: 1,
        }
    }
}

impl RendererState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_target(&mut self, buffer: Option<&Buffer>) {
        self.target = buffer.map(|b| (b.surface(), b.liveness()));
        trace!("target = {:?}", buffer.map(Buffer::id));
    }

    pub fn set_source(&mut self, role: SourceRole, buffer: Option<&Buffer>, x: i32, y: i32) {
        let slot = &mut self.slots[role.index()];
        slot.surface = buffer.map(Buffer::surface);
        slot.alive = buffer.map(Buffer::liveness).unwrap_or_default();
        slot.x = x;
        slot.y = y;
        trace!("{} = {:?} at ({},{})", role, slot.surface.map(|s| s.id), x, y);
    }

    pub fn source_enable(&mut self, role: SourceRole, enabled: bool) {
        self.slots[role.index()].enabled = enabled;
    }

    pub fn source_color(&mut self, red: u8, green: u8, blue: u8, alpha: u8) {
        self.source_color = Argb::from_rgba(red, green, blue, alpha);
    }

    pub fn blend_color(&mut self, red: u8, green: u8, blue: u8, alpha: u8) {
        self.blend_color = Argb::from_rgba(red, green, blue, alpha);
    }

    pub fn blend_enable(&mut self, enabled: bool) {
        self.blend_enabled = enabled;
    }

    pub fn blend_functions(&mut self, rgb: BlendFunction, alpha: BlendFunction) {
        self.rgb_function = rgb;
        self.alpha_function = alpha;
    }

    /// Sets the four blend factors. The alpha channel has no constant
    /// colour, so constant-colour alpha factors become constant-alpha ones.
    pub fn blend_factors(
        &mut self,
        src_rgb: BlendFactor,
        dst_rgb: BlendFactor,
        src_alpha: BlendFactor,
        dst_alpha: BlendFactor,
    ) {
        self.src_factor = src_rgb;
        self.dst_factor = dst_rgb;
        self.src_alpha_factor = src_alpha.for_alpha();
        self.dst_alpha_factor = dst_alpha.for_alpha();
    }

    /// Stored for API completeness; no supported operation draws lines.
    pub fn line_width(&mut self, width: u32) {
        self.line_width = width;
    }

    /// Drops every reference to buffer `id`.
    pub fn forget(&mut self, id: u32) {
        if self.target.as_ref().is_some_and(|(s, _)| s.id == id) {
            self.target = None;
        }
        for slot in &mut self.slots {
            if slot.surface.is_some_and(|s| s.id == id) {
                slot.surface = None;
                slot.alive = Liveness::default();
            }
        }
    }

    /// The bound target, if it is still alive.
    pub fn target(&self) -> Option<Surface> {
        self.target
            .as_ref()
            .filter(|(_, alive)| alive.is_alive())
            .map(|(surface, _)| *surface)
    }

    pub(crate) fn target_liveness(&self) -> Option<Liveness> {
        self.target.as_ref().map(|(_, alive)| alive.clone())
    }

    pub fn slot(&self, role: SourceRole) -> &SourceSlot {
        &self.slots[role.index()]
    }

    pub fn current_source_color(&self) -> Argb {
        self.source_color
    }

    pub fn current_blend_color(&self) -> Argb {
        self.blend_color
    }

    pub fn is_blend_enabled(&self) -> bool {
        self.blend_enabled
    }

    pub fn functions(&self) -> (BlendFunction, BlendFunction) {
        (self.rgb_function, self.alpha_function)
    }

    pub fn current_line_width(&self) -> u32 {
        self.line_width
    }

    /// The configured blend, with the blend colour as both constants.
    pub fn blend_params(&self) -> BlendParams {
        BlendParams {
            function: self.rgb_function,
            src_factor: self.src_factor,
            dst_factor: self.dst_factor,
            src_alpha_factor: self.src_alpha_factor,
            dst_alpha_factor: self.dst_alpha_factor,
            src_color: self.blend_color,
            dst_color: self.blend_color,
            flags: BlendFlags::empty(),
        }
    }
}
