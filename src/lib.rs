// src/lib.rs

//! Userspace driver for fixed-function 2D blit engines exposed through DRM.
//!
//! Two hardware generations are supported: one that takes kernel-validated
//! operation records and an older one that executes raw instruction words
//! from a submission buffer. Which one is driven is decided when the
//! [`Context`] is created, from the driver bound to the device node.
//!
//! ```no_run
//! use gfx2d::{Config, Context, PixelFormat, Rect};
//!
//! # fn main() -> anyhow::Result<()> {
//! let mut ctx = Context::init(&Config::load()?)?;
//! let target = ctx.alloc(100, 100, PixelFormat::Argb8888, None)?;
//! ctx.set_target(Some(&target));
//! ctx.source_color(0xff, 0x00, 0x00, 0x55);
//! ctx.draw_rectangles(&[Rect::new(10, 10, 50, 50)]);
//! ctx.flush()?;
//! # Ok(())
//! # }
//! ```

mod backend;
pub mod blend;
pub mod buffer;
pub mod color;
pub mod config;
pub mod context;
pub mod deadline;
pub mod drm;
pub mod encoder;
pub mod error;
pub mod format;
pub mod geometry;
pub mod renderer;
pub mod session;

pub use blend::{BlendFactor, BlendFunction, RopMode, SpecialBlend};
pub use buffer::{Buffer, BufferManager, ImportDesc, Liveness, Surface, SyncDirection};
pub use color::Argb;
pub use config::Config;
pub use context::Context;
pub use deadline::Deadline;
pub use encoder::{BlendParams, CommandEncoder, Placement, RopParams};
pub use error::{kind_of, BlitError};
pub use format::PixelFormat;
pub use geometry::Rect;
pub use renderer::{RendererState, SourceRole};
pub use session::{Capabilities, DeviceSession, Generation};
