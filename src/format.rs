// src/format.rs

//! Pixel formats understood by the blit engine and the per-generation
//! capability flags describing which of them a device accepts.

use bitflags::bitflags;
use std::fmt;

/// Surface pixel formats supported by this driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// 32 bits per pixel, 8 bits for alpha and each colour channel.
    Argb8888,
    /// 16 bits per pixel, 5 bits red and blue, 6 bits green.
    Rgb565,
    /// 8 bits per pixel alpha only.
    A8,
}

bitflags! {
    /// Set of pixel formats a hardware generation accepts.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct FormatSupport: u32 {
        const ARGB8888 = 1 << 0;
        const RGB565 = 1 << 1;
        const A8 = 1 << 2;
    }
}

const fn fourcc(code: &[u8; 4]) -> u32 {
    (code[0] as u32) | ((code[1] as u32) << 8) | ((code[2] as u32) << 16) | ((code[3] as u32) << 24)
}

const DRM_FORMAT_ARGB8888: u32 = fourcc(b"AR24");
const DRM_FORMAT_XRGB8888: u32 = fourcc(b"XR24");
const DRM_FORMAT_RGB565: u32 = fourcc(b"RG16");
const DRM_FORMAT_R8: u32 = fourcc(b"R8  ");

impl PixelFormat {
    pub const ALL: [PixelFormat; 3] = [PixelFormat::Argb8888, PixelFormat::Rgb565, PixelFormat::A8];

    pub fn bytes_per_pixel(self) -> u32 {
        match self {
            PixelFormat::Argb8888 => 4,
            PixelFormat::Rgb565 => 2,
            PixelFormat::A8 => 1,
        }
    }

    /// The format code the hardware expects in its configuration registers
    /// and in kernel buffer descriptors.
    pub fn hw_code(self) -> u32 {
        match self {
            PixelFormat::A8 => 1,
            PixelFormat::Rgb565 => 9,
            PixelFormat::Argb8888 => 11,
        }
    }

    pub fn support_flag(self) -> FormatSupport {
        match self {
            PixelFormat::Argb8888 => FormatSupport::ARGB8888,
            PixelFormat::Rgb565 => FormatSupport::RGB565,
            PixelFormat::A8 => FormatSupport::A8,
        }
    }

    /// Smallest stride holding `width` pixels, rounded up to a multiple of
    /// four bytes so rows stay word aligned. Saturates for widths no
    /// surface can have.
    pub fn pitch_for(self, width: u32) -> u32 {
        let bytes = u64::from(width) * u64::from(self.bytes_per_pixel());
        u32::try_from(bytes.next_multiple_of(4)).unwrap_or(u32::MAX)
    }

    /// Maps a DRM fourcc code (as used for scanout planes) to a pixel format.
    pub fn from_fourcc(code: u32) -> Option<PixelFormat> {
        match code {
            DRM_FORMAT_ARGB8888 | DRM_FORMAT_XRGB8888 => Some(PixelFormat::Argb8888),
            DRM_FORMAT_RGB565 => Some(PixelFormat::Rgb565),
            DRM_FORMAT_R8 => Some(PixelFormat::A8),
            _ => None,
        }
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PixelFormat::Argb8888 => "ARGB8888",
            PixelFormat::Rgb565 => "RGB565",
            PixelFormat::A8 => "A8",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn pitch_is_word_aligned() {
        assert_eq!(PixelFormat::Argb8888.pitch_for(800), 3200);
        assert_eq!(PixelFormat::Rgb565.pitch_for(801), 1604);
        assert_eq!(PixelFormat::A8.pitch_for(5), 8);
        assert_eq!(PixelFormat::A8.pitch_for(0), 0);
        assert_eq!(PixelFormat::Argb8888.pitch_for(0x1000_0000), u32::MAX);
    }

    #[test]
    fn fourcc_mapping() {
        assert_eq!(PixelFormat::from_fourcc(0x3432_5241), Some(PixelFormat::Argb8888));
        assert_eq!(PixelFormat::from_fourcc(DRM_FORMAT_RGB565), Some(PixelFormat::Rgb565));
        assert_eq!(PixelFormat::from_fourcc(fourcc(b"NV12")), None);
    }

    #[test]
    fn every_format_has_a_support_flag() {
        let all = PixelFormat::ALL
            .iter()
            .fold(FormatSupport::empty(), |acc, f| acc | f.support_flag());
        assert_eq!(all, FormatSupport::all());
    }
}
