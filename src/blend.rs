// src/blend.rs

//! Blend equations and raster-operation modes.
//!
//! The two hardware generations agree on the numeric codes of the standard
//! blend functions and of the blend factors, but tag the special blend
//! functions differently: the word-stream generation expects a one-hot bit
//! above the function nibble, the operation-record generation expects an
//! index. Both encodings are produced here so the encoders never need to
//! know about the mismatch.

use std::fmt;

/// Low nibble shared by every special blend function.
pub const SPECIAL_FUNCTION_NIBBLE: u32 = 5;

/// How source and destination terms are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BlendFunction {
    /// `S*Cs + D*Cd`
    #[default]
    Add,
    /// `S*Cs - D*Cd`
    Subtract,
    /// `D*Cd - S*Cs`
    Reverse,
    /// `min(Cs, Cd)`
    Min,
    /// `max(Cs, Cd)`
    Max,
    /// One of the fixed per-channel special functions.
    Special(SpecialBlend),
}

/// Fixed-function special blend modes operating on two 8-bit inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpecialBlend {
    Lighten,
    Darken,
    Multiply,
    Average,
    Add,
    Subtract,
    Difference,
    Negation,
    Screen,
    Overlay,
    Dodge,
    Burn,
    Reflect,
    Glow,
}

impl SpecialBlend {
    fn index(self) -> u32 {
        match self {
            SpecialBlend::Lighten => 0,
            SpecialBlend::Darken => 1,
            SpecialBlend::Multiply => 2,
            SpecialBlend::Average => 3,
            SpecialBlend::Add => 4,
            SpecialBlend::Subtract => 5,
            SpecialBlend::Difference => 6,
            SpecialBlend::Negation => 7,
            SpecialBlend::Screen => 8,
            SpecialBlend::Overlay => 9,
            SpecialBlend::Dodge => 10,
            SpecialBlend::Burn => 11,
            SpecialBlend::Reflect => 12,
            SpecialBlend::Glow => 13,
        }
    }
}

impl BlendFunction {
    /// Function code as packed into the word-stream BLEND instruction.
    ///
    /// Special functions carry a one-hot tag starting at bit 4.
    pub fn word_code(self) -> u32 {
        match self {
            BlendFunction::Special(special) => SPECIAL_FUNCTION_NIBBLE | (1 << (4 + special.index())),
            other => other.standard_code(),
        }
    }

    /// Function code as carried in the kernel operation record.
    ///
    /// Special functions carry their index starting at bit 4.
    pub fn record_code(self) -> u32 {
        match self {
            BlendFunction::Special(special) => SPECIAL_FUNCTION_NIBBLE | (special.index() << 4),
            other => other.standard_code(),
        }
    }

    fn standard_code(self) -> u32 {
        match self {
            BlendFunction::Add => 0,
            BlendFunction::Subtract => 1,
            BlendFunction::Reverse => 2,
            BlendFunction::Min => 3,
            BlendFunction::Max => 4,
            BlendFunction::Special(_) => SPECIAL_FUNCTION_NIBBLE,
        }
    }
}

impl fmt::Display for BlendFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlendFunction::Add => f.write_str("ADD"),
            BlendFunction::Subtract => f.write_str("SUBTRACT"),
            BlendFunction::Reverse => f.write_str("REVERSE"),
            BlendFunction::Min => f.write_str("MIN"),
            BlendFunction::Max => f.write_str("MAX"),
            BlendFunction::Special(special) => write!(f, "SPE_{:?}", special),
        }
    }
}

/// Weight applied to a source or destination term.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BlendFactor {
    #[default]
    Zero,
    One,
    SrcColor,
    OneMinusSrcColor,
    DstColor,
    OneMinusDstColor,
    SrcAlpha,
    OneMinusSrcAlpha,
    DstAlpha,
    OneMinusDstAlpha,
    ConstantColor,
    OneMinusConstantColor,
    ConstantAlpha,
    OneMinusConstantAlpha,
    SrcAlphaSaturate,
}

impl BlendFactor {
    pub fn code(self) -> u32 {
        match self {
            BlendFactor::Zero => 0,
            BlendFactor::One => 1,
            BlendFactor::SrcColor => 2,
            BlendFactor::OneMinusSrcColor => 3,
            BlendFactor::DstColor => 4,
            BlendFactor::OneMinusDstColor => 5,
            BlendFactor::SrcAlpha => 6,
            BlendFactor::OneMinusSrcAlpha => 7,
            BlendFactor::DstAlpha => 8,
            BlendFactor::OneMinusDstAlpha => 9,
            BlendFactor::ConstantColor => 10,
            BlendFactor::OneMinusConstantColor => 11,
            BlendFactor::ConstantAlpha => 12,
            BlendFactor::OneMinusConstantAlpha => 13,
            BlendFactor::SrcAlphaSaturate => 14,
        }
    }

    /// The factor to use for an alpha channel. The hardware has no notion of
    /// a constant *colour* for alpha, so those map to the constant alpha.
    pub fn for_alpha(self) -> BlendFactor {
        match self {
            BlendFactor::ConstantColor => BlendFactor::ConstantAlpha,
            BlendFactor::OneMinusConstantColor => BlendFactor::OneMinusConstantAlpha,
            other => other,
        }
    }
}

impl fmt::Display for BlendFactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BlendFactor::Zero => "ZERO",
            BlendFactor::One => "ONE",
            BlendFactor::SrcColor => "SRC_COLOR",
            BlendFactor::OneMinusSrcColor => "ONE_MINUS_SRC_COLOR",
            BlendFactor::DstColor => "DST_COLOR",
            BlendFactor::OneMinusDstColor => "ONE_MINUS_DST_COLOR",
            BlendFactor::SrcAlpha => "SRC_ALPHA",
            BlendFactor::OneMinusSrcAlpha => "ONE_MINUS_SRC_ALPHA",
            BlendFactor::DstAlpha => "DST_ALPHA",
            BlendFactor::OneMinusDstAlpha => "ONE_MINUS_DST_ALPHA",
            BlendFactor::ConstantColor => "CONSTANT_COLOR",
            BlendFactor::OneMinusConstantColor => "ONE_MINUS_CONSTANT_COLOR",
            BlendFactor::ConstantAlpha => "CONSTANT_ALPHA",
            BlendFactor::OneMinusConstantAlpha => "ONE_MINUS_CONSTANT_ALPHA",
            BlendFactor::SrcAlphaSaturate => "SRC_ALPHA_SATURATE",
        };
        f.write_str(name)
    }
}

/// Raster-operation input count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RopMode {
    /// Destination plus one source.
    Rop2,
    /// Destination plus two sources.
    Rop3,
    /// Destination plus two sources plus a 1-bit-per-pixel mask.
    Rop4,
}

impl RopMode {
    pub fn code(self) -> u32 {
        match self {
            RopMode::Rop2 => 0,
            RopMode::Rop3 => 1,
            RopMode::Rop4 => 2,
        }
    }

    /// Number of surfaces, destination included.
    pub fn surface_count(self) -> usize {
        match self {
            RopMode::Rop2 => 2,
            RopMode::Rop3 => 3,
            RopMode::Rop4 => 4,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn special_functions_are_tagged_per_generation() {
        let lighten = BlendFunction::Special(SpecialBlend::Lighten);
        assert_eq!(lighten.word_code(), 5 | (1 << 4));
        assert_eq!(lighten.record_code(), 5);

        let glow = BlendFunction::Special(SpecialBlend::Glow);
        assert_eq!(glow.word_code(), 5 | (1 << 17));
        assert_eq!(glow.record_code(), 5 | (13 << 4));
        assert_eq!(glow.word_code() & 0xf, SPECIAL_FUNCTION_NIBBLE);
    }

    #[test]
    fn standard_functions_agree_between_generations() {
        for func in [
            BlendFunction::Add,
            BlendFunction::Subtract,
            BlendFunction::Reverse,
            BlendFunction::Min,
            BlendFunction::Max,
        ] {
            assert_eq!(func.word_code(), func.record_code());
            assert!(func.word_code() < SPECIAL_FUNCTION_NIBBLE);
        }
    }

    #[test]
    fn alpha_factors_drop_constant_colour() {
        assert_eq!(BlendFactor::ConstantColor.for_alpha(), BlendFactor::ConstantAlpha);
        assert_eq!(
            BlendFactor::OneMinusConstantColor.for_alpha(),
            BlendFactor::OneMinusConstantAlpha
        );
        assert_eq!(BlendFactor::SrcAlpha.for_alpha(), BlendFactor::SrcAlpha);
    }

    #[test]
    fn rop_modes_name_their_surface_counts() {
        assert_eq!(RopMode::Rop2.surface_count(), 2);
        assert_eq!(RopMode::Rop3.surface_count(), 3);
        assert_eq!(RopMode::Rop4.surface_count(), 4);
    }
}
