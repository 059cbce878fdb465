// src/color.rs

//! Packed ARGB colour values as the hardware consumes them.

use std::fmt;

/// A colour packed as `0xAARRGGBB`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Argb(pub u32);

impl Argb {
    /// Fully opaque white. As the constant source colour it means
    /// "no pre-multiplication requested".
    pub const OPAQUE_WHITE: Argb = Argb(0xffff_ffff);
    pub const TRANSPARENT: Argb = Argb(0);

    pub const fn from_rgba(red: u8, green: u8, blue: u8, alpha: u8) -> Self {
        Argb(((alpha as u32) << 24) | ((red as u32) << 16) | ((green as u32) << 8) | blue as u32)
    }

    pub const fn alpha(self) -> u8 {
        (self.0 >> 24) as u8
    }

    pub const fn red(self) -> u8 {
        (self.0 >> 16) as u8
    }

    pub const fn green(self) -> u8 {
        (self.0 >> 8) as u8
    }

    pub const fn blue(self) -> u8 {
        self.0 as u8
    }

    pub const fn is_opaque_white(self) -> bool {
        self.0 == Self::OPAQUE_WHITE.0
    }
}

impl From<u32> for Argb {
    fn from(value: u32) -> Self {
        Argb(value)
    }
}

impl fmt::Display for Argb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08X}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn packs_alpha_in_the_top_byte() {
        let c = Argb::from_rgba(0xff, 0x00, 0x00, 0x55);
        assert_eq!(c, Argb(0x55ff_0000));
        assert_eq!((c.alpha(), c.red(), c.green(), c.blue()), (0x55, 0xff, 0, 0));
        assert_eq!(c.to_string(), "55FF0000");
    }

    #[test]
    fn sentinel_is_opaque_white() {
        assert!(Argb::from_rgba(255, 255, 255, 255).is_opaque_white());
        assert!(!Argb::from_rgba(255, 255, 255, 254).is_opaque_white());
    }
}
