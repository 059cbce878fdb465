// src/error.rs

//! Error kinds reported by the blit engine driver.
//!
//! Every fallible operation in this crate returns `anyhow::Result`. When a
//! failure belongs to one of the well-known categories below, the root cause
//! of the `anyhow::Error` is a `BlitError`, so callers can classify it with
//! `err.downcast_ref::<BlitError>()` while still getting the full context
//! chain when they print it.

use std::fmt;

/// The closed set of failure categories the driver reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlitError {
    /// The device node could not be opened or is not a supported 2D engine.
    DeviceUnavailable(String),
    /// A width, height, stride or coordinate does not fit the 13-bit
    /// hardware field, or a stride is too small for the width.
    InvalidDimension(String),
    /// The pixel format is not supported by the selected hardware generation.
    UnsupportedFormat(String),
    /// Creating, mapping or importing a kernel object failed.
    AllocationFailure(String),
    /// A wait or CPU-ownership claim did not complete before the deadline.
    SyncTimeout { buffer: u32 },
    /// The kernel rejected a submitted instruction stream or operation record.
    SubmissionFailure(String),
    /// A draw call was issued without a target surface.
    NoTarget,
    /// The selected draw path needs a surface that is disabled or unbound.
    MissingSource(&'static str),
    /// A raster operation was given the wrong number of surfaces for its mode.
    InvalidSurfaceCount { expected: usize, actual: usize },
    /// The renderer state asks for something this hardware generation cannot do.
    UnsupportedCombination(&'static str),
}

impl fmt::Display for BlitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlitError::DeviceUnavailable(why) => write!(f, "device unavailable: {}", why),
            BlitError::InvalidDimension(why) => write!(f, "invalid dimension: {}", why),
            BlitError::UnsupportedFormat(why) => write!(f, "unsupported format: {}", why),
            BlitError::AllocationFailure(why) => write!(f, "allocation failure: {}", why),
            BlitError::SyncTimeout { buffer } => {
                write!(f, "timed out synchronizing buffer {}", buffer)
            }
            BlitError::SubmissionFailure(why) => write!(f, "submission failure: {}", why),
            BlitError::NoTarget => write!(f, "no target surface"),
            BlitError::MissingSource(which) => write!(f, "missing {} surface", which),
            BlitError::InvalidSurfaceCount { expected, actual } => write!(
                f,
                "invalid surface count: expected {}, got {}",
                expected, actual
            ),
            BlitError::UnsupportedCombination(what) => {
                write!(f, "unsupported combination: {}", what)
            }
        }
    }
}

impl std::error::Error for BlitError {}

/// Returns the `BlitError` at the root of an `anyhow::Error`, if any.
pub fn kind_of(err: &anyhow::Error) -> Option<&BlitError> {
    err.chain().find_map(|cause| cause.downcast_ref::<BlitError>())
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;
    use test_log::test;

    #[test]
    fn kind_survives_context_wrapping() {
        let result: anyhow::Result<()> = Err(BlitError::NoTarget.into());
        let err = result.context("drawing 3 rectangles").unwrap_err();
        assert_eq!(kind_of(&err), Some(&BlitError::NoTarget));
        assert!(format!("{:#}", err).contains("no target surface"));
    }

    #[test]
    fn foreign_errors_have_no_kind() {
        let err = anyhow::anyhow!("something else");
        assert!(kind_of(&err).is_none());
    }
}
