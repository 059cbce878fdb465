// src/drm.rs

//! Access to the DRM device node: kernel ABI definitions, the `DrmDevice`
//! seam and its real implementation on top of `nix`.

pub mod abi;
pub mod device;
#[cfg(test)]
pub(crate) mod fake;

pub use device::{probe, DrmDevice, NixDrmDevice};
