// src/encoder/words.rs

//! Typed instructions of the word-stream engine and their bit layout.
//!
//! Every instruction starts with a header word whose top nibble is the
//! opcode. Drawing instructions follow it with fixed argument words; the
//! low bits of the header carry the argument count the engine expects.

use crate::color::Argb;
use std::fmt;

const OPCODE_SHIFT: u32 = 28;
const REG_SHIFT: u32 = 16;
const DIR_SHIFT: u32 = 8;
const IE_SHIFT: u32 = 24;
const REGAD_SHIFT: u32 = 12;
const SPE_SHIFT: u32 = 12;
const FUNC_SHIFT: u32 = 8;
const DFACT_SHIFT: u32 = 4;
const ROP_MODE_SHIFT: u32 = 16;
const ROP_HIGH_SHIFT: u32 = 8;

const OP_LDR: u32 = 0x8;
const OP_STR: u32 = 0x9;
const OP_WFE: u32 = 0xA;
const OP_FILL: u32 = 0xB;
const OP_COPY: u32 = 0xC;
const OP_BLEND: u32 = 0xD;
const OP_ROP: u32 = 0xE;

const FILL_ARGS: u32 = 2;
const COPY_ARGS: u32 = 2;
const BLEND_ARGS: u32 = 4;
const ROP_ARGS: u32 = 5;

/// Low nibble marking a special blend function.
const SPECIAL_FUNCTION: u32 = crate::blend::SPECIAL_FUNCTION_NIBBLE;

/// The engine's address and configuration registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum Register {
    Pa0 = 0,
    Pitch0 = 1,
    Cfg0 = 2,
    Pa1 = 3,
    Pitch1 = 4,
    Cfg1 = 5,
    Pa2 = 6,
    Pitch2 = 7,
    Cfg2 = 8,
    Pa3 = 9,
    GpReg0 = 10,
    GpReg1 = 11,
    GpReg2 = 12,
    GpReg3 = 13,
    GpReg4 = 14,
    GpReg5 = 15,
}

pub const REGISTER_COUNT: usize = 16;

impl Register {
    const ALL: [Register; REGISTER_COUNT] = [
        Register::Pa0,
        Register::Pitch0,
        Register::Cfg0,
        Register::Pa1,
        Register::Pitch1,
        Register::Cfg1,
        Register::Pa2,
        Register::Pitch2,
        Register::Cfg2,
        Register::Pa3,
        Register::GpReg0,
        Register::GpReg1,
        Register::GpReg2,
        Register::GpReg3,
        Register::GpReg4,
        Register::GpReg5,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Option<Register> {
        Self::ALL.get(index).copied()
    }

    /// Address, pitch and configuration registers of surface slot `slot`
    /// (0 is the destination). Slot 3 only has an address register.
    pub fn surface(slot: usize) -> Option<(Register, Option<Register>, Option<Register>)> {
        match slot {
            0..=2 => {
                let base = slot * 3;
                Some((
                    Self::ALL[base],
                    Some(Self::ALL[base + 1]),
                    Some(Self::ALL[base + 2]),
                ))
            }
            3 => Some((Register::Pa3, None, None)),
            _ => None,
        }
    }
}

/// Scan order the engine walks a rectangle in, for overlapping copies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TransferDirection {
    /// Left to right, top to bottom.
    #[default]
    Xy00,
    Xy01,
    Xy10,
    Xy11,
}

impl TransferDirection {
    pub fn code(self) -> u32 {
        match self {
            TransferDirection::Xy00 => 0,
            TransferDirection::Xy01 => 1,
            TransferDirection::Xy10 => 2,
            TransferDirection::Xy11 => 3,
        }
    }

    fn from_code(code: u32) -> TransferDirection {
        match code & 0x3 {
            0 => TransferDirection::Xy00,
            1 => TransferDirection::Xy01,
            2 => TransferDirection::Xy10,
            _ => TransferDirection::Xy11,
        }
    }
}

/// A rectangle in engine terms: unsigned origin and extent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Area {
    pub x: u16,
    pub y: u16,
    pub width: u16,
    pub height: u16,
}

/// An origin inside a source surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Origin {
    pub x: u16,
    pub y: u16,
}

/// One engine instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instruction {
    LoadRegister {
        reg: Register,
        value: u32,
    },
    StoreRegister {
        reg: Register,
        addr: u8,
        interrupt: bool,
    },
    WaitForEvent {
        interrupt: bool,
    },
    Fill {
        dir: TransferDirection,
        dst: Area,
        color: Argb,
    },
    Copy {
        dir: TransferDirection,
        dst: Area,
        src: Origin,
    },
    Blend {
        dir: TransferDirection,
        dst: Area,
        src0: Origin,
        src1: Origin,
        /// Word-stream function code, see `BlendFunction::word_code`.
        function: u32,
        dst_factor: u32,
        src_factor: u32,
    },
    Rop {
        dst: Area,
        src0: Origin,
        src1: Origin,
        /// Bus address of the 1 bpp mask, zero when unused.
        mask_addr: u32,
        mode: u32,
        high: u8,
        low: u8,
    },
}

fn header(opcode: u32) -> u32 {
    opcode << OPCODE_SHIFT
}

fn pack(hi: u16, lo: u16) -> u32 {
    (u32::from(hi) << 16) | u32::from(lo)
}

fn unpack(word: u32) -> (u16, u16) {
    ((word >> 16) as u16, word as u16)
}

fn size_word(area: &Area) -> u32 {
    pack(area.height.wrapping_sub(1), area.width.wrapping_sub(1))
}

fn area_from(size: u32, origin: u32) -> Area {
    let (h, w) = unpack(size);
    let (y, x) = unpack(origin);
    Area {
        x,
        y,
        width: w.wrapping_add(1),
        height: h.wrapping_add(1),
    }
}

fn origin_from(word: u32) -> Origin {
    let (y, x) = unpack(word);
    Origin { x, y }
}

impl Instruction {
    pub fn word_count(&self) -> usize {
        match self {
            Instruction::LoadRegister { .. } => 2,
            Instruction::StoreRegister { .. } | Instruction::WaitForEvent { .. } => 1,
            Instruction::Fill { .. } | Instruction::Copy { .. } => 4,
            Instruction::Blend { .. } => 6,
            Instruction::Rop { .. } => 7,
        }
    }

    /// Appends the instruction's words to `out`.
    pub fn encode(&self, out: &mut Vec<u32>) {
        match *self {
            Instruction::LoadRegister { reg, value } => {
                out.push(header(OP_LDR) | ((reg as u32) << REG_SHIFT));
                out.push(value);
            }
            Instruction::StoreRegister {
                reg,
                addr,
                interrupt,
            } => out.push(
                header(OP_STR)
                    | (u32::from(interrupt) << IE_SHIFT)
                    | ((reg as u32) << REG_SHIFT)
                    | ((u32::from(addr) & 0xf) << REGAD_SHIFT),
            ),
            Instruction::WaitForEvent { interrupt } => {
                out.push(header(OP_WFE) | (u32::from(interrupt) << IE_SHIFT))
            }
            Instruction::Fill { dir, dst, color } => out.extend_from_slice(&[
                header(OP_FILL) | (dir.code() << DIR_SHIFT) | FILL_ARGS,
                size_word(&dst),
                pack(dst.y, dst.x),
                color.0,
            ]),
            Instruction::Copy { dir, dst, src } => out.extend_from_slice(&[
                header(OP_COPY) | (dir.code() << DIR_SHIFT) | COPY_ARGS,
                size_word(&dst),
                pack(dst.y, dst.x),
                pack(src.y, src.x),
            ]),
            Instruction::Blend {
                dir,
                dst,
                src0,
                src1,
                function,
                dst_factor,
                src_factor,
            } => {
                let func = if function & 0xf == SPECIAL_FUNCTION {
                    ((function >> 4) << SPE_SHIFT) | (SPECIAL_FUNCTION << FUNC_SHIFT)
                } else {
                    (function & 0xf) << FUNC_SHIFT
                };
                out.extend_from_slice(&[
                    header(OP_BLEND) | (dir.code() << DIR_SHIFT) | BLEND_ARGS,
                    size_word(&dst),
                    pack(dst.y, dst.x),
                    pack(src0.y, src0.x),
                    pack(src1.y, src1.x),
                    func | ((dst_factor & 0xf) << DFACT_SHIFT) | (src_factor & 0xf),
                ]);
            }
            Instruction::Rop {
                dst,
                src0,
                src1,
                mask_addr,
                mode,
                high,
                low,
            } => out.extend_from_slice(&[
                header(OP_ROP) | ROP_ARGS,
                size_word(&dst),
                pack(dst.y, dst.x),
                pack(src0.y, src0.x),
                pack(src1.y, src1.x),
                mask_addr,
                (mode << ROP_MODE_SHIFT) | (u32::from(high) << ROP_HIGH_SHIFT) | u32::from(low),
            ]),
        }
    }

    /// Decodes the instruction at the start of `words`, returning it and the
    /// number of words it spans. `None` for an unknown opcode or a
    /// truncated instruction.
    pub fn decode(words: &[u32]) -> Option<(Instruction, usize)> {
        let head = *words.first()?;
        let opcode = head >> OPCODE_SHIFT;
        let dir = TransferDirection::from_code(head >> DIR_SHIFT);
        let arg = |i: usize| words.get(i).copied();
        let instruction = match opcode {
            OP_LDR => Instruction::LoadRegister {
                reg: Register::from_index(((head >> REG_SHIFT) & 0xf) as usize)?,
                value: arg(1)?,
            },
            OP_STR => Instruction::StoreRegister {
                reg: Register::from_index(((head >> REG_SHIFT) & 0xf) as usize)?,
                addr: ((head >> REGAD_SHIFT) & 0xf) as u8,
                interrupt: (head >> IE_SHIFT) & 1 != 0,
            },
            OP_WFE => Instruction::WaitForEvent {
                interrupt: (head >> IE_SHIFT) & 1 != 0,
            },
            OP_FILL => Instruction::Fill {
                dir,
                dst: area_from(arg(1)?, arg(2)?),
                color: Argb(arg(3)?),
            },
            OP_COPY => Instruction::Copy {
                dir,
                dst: area_from(arg(1)?, arg(2)?),
                src: origin_from(arg(3)?),
            },
            OP_BLEND => {
                let w5 = arg(5)?;
                let nibble = (w5 >> FUNC_SHIFT) & 0xf;
                let function = if nibble == SPECIAL_FUNCTION {
                    SPECIAL_FUNCTION | (((w5 >> SPE_SHIFT) & 0xffff) << 4)
                } else {
                    nibble
                };
                Instruction::Blend {
                    dir,
                    dst: area_from(arg(1)?, arg(2)?),
                    src0: origin_from(arg(3)?),
                    src1: origin_from(arg(4)?),
                    function,
                    dst_factor: (w5 >> DFACT_SHIFT) & 0xf,
                    src_factor: w5 & 0xf,
                }
            }
            OP_ROP => {
                let w6 = arg(6)?;
                Instruction::Rop {
                    dst: area_from(arg(1)?, arg(2)?),
                    src0: origin_from(arg(3)?),
                    src1: origin_from(arg(4)?),
                    mask_addr: arg(5)?,
                    mode: (w6 >> ROP_MODE_SHIFT) & 0xff,
                    high: (w6 >> ROP_HIGH_SHIFT) as u8,
                    low: w6 as u8,
                }
            }
            _ => return None,
        };
        let len = instruction.word_count();
        Some((instruction, len))
    }

    /// Decodes a whole batch. Stops at the first word that does not start a
    /// valid instruction and returns its index as the error.
    pub fn decode_all(mut words: &[u32]) -> Result<Vec<Instruction>, usize> {
        let mut out = Vec::new();
        let mut at = 0;
        while !words.is_empty() {
            let (instruction, len) = Instruction::decode(words).ok_or(at)?;
            out.push(instruction);
            words = &words[len..];
            at += len;
        }
        Ok(out)
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instruction::LoadRegister { reg, value } => write!(f, "LDR {:?} = {:#010x}", reg, value),
            Instruction::StoreRegister { reg, addr, .. } => write!(f, "STR {:?} -> {:#x}", reg, addr),
            Instruction::WaitForEvent { interrupt } => write!(f, "WFE ie={}", interrupt),
            Instruction::Fill { dst, color, .. } => write!(
                f,
                "FILL [{},{} {}x{}] = {}",
                dst.x, dst.y, dst.width, dst.height, color
            ),
            Instruction::Copy { dst, src, .. } => write!(
                f,
                "COPY [{},{}] -> [{},{} {}x{}]",
                src.x, src.y, dst.x, dst.y, dst.width, dst.height
            ),
            Instruction::Blend {
                dst,
                src0,
                src1,
                function,
                dst_factor,
                src_factor,
                ..
            } => write!(
                f,
                "BLEND [{},{}] [{},{}] -> [{},{} {}x{}] func={:#x} dfact={} sfact={}",
                src0.x, src0.y, src1.x, src1.y, dst.x, dst.y, dst.width, dst.height, function,
                dst_factor, src_factor
            ),
            Instruction::Rop {
                dst,
                src0,
                src1,
                mask_addr,
                mode,
                high,
                low,
            } => write!(
                f,
                "ROP{} [{},{}] [{},{}] -> [{},{} {}x{}] mask={:#010x} rop={:02x}{:02x}",
                mode + 2,
                src0.x,
                src0.y,
                src1.x,
                src1.y,
                dst.x,
                dst.y,
                dst.width,
                dst.height,
                mask_addr,
                high,
                low
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blend::{BlendFactor, BlendFunction, SpecialBlend};
    use test_log::test;

    fn words_of(instruction: Instruction) -> Vec<u32> {
        let mut out = Vec::new();
        instruction.encode(&mut out);
        assert_eq!(out.len(), instruction.word_count());
        out
    }

    #[test]
    fn fill_matches_known_dump() {
        let fill = Instruction::Fill {
            dir: TransferDirection::Xy00,
            dst: Area {
                x: 10,
                y: 10,
                width: 50,
                height: 50,
            },
            color: Argb(0x55ff_0000),
        };
        assert_eq!(
            words_of(fill),
            vec![0xb000_0002, 0x0031_0031, 0x000a_000a, 0x55ff_0000]
        );
    }

    #[test]
    fn load_register_matches_known_dump() {
        let ldr = Instruction::LoadRegister {
            reg: Register::Pitch0,
            value: 3200,
        };
        assert_eq!(words_of(ldr), vec![0x8001_0000, 3200]);
        let ldr = Instruction::LoadRegister {
            reg: Register::Pa3,
            value: 0x2000_0000,
        };
        assert_eq!(words_of(ldr), vec![0x8009_0000, 0x2000_0000]);
    }

    #[test]
    fn copy_packs_source_origin_last() {
        let copy = Instruction::Copy {
            dir: TransferDirection::Xy11,
            dst: Area {
                x: 1,
                y: 2,
                width: 3,
                height: 4,
            },
            src: Origin { x: 5, y: 6 },
        };
        assert_eq!(
            words_of(copy),
            vec![0xc000_0302, 0x0003_0002, 0x0002_0001, 0x0006_0005]
        );
    }

    #[test]
    fn blend_carries_special_tag_and_factors() {
        let function = BlendFunction::Special(SpecialBlend::Darken).word_code();
        let blend = Instruction::Blend {
            dir: TransferDirection::Xy00,
            dst: Area {
                x: 0,
                y: 0,
                width: 16,
                height: 16,
            },
            src0: Origin::default(),
            src1: Origin { x: 8, y: 0 },
            function,
            dst_factor: BlendFactor::OneMinusSrcAlpha.code(),
            src_factor: BlendFactor::SrcAlpha.code(),
        };
        let words = words_of(blend);
        assert_eq!(words[0], 0xd000_0004);
        // Darken is special function 1: one-hot bit 1 of the SPE field.
        assert_eq!(words[5], (0b10 << 12) | (5 << 8) | (7 << 4) | 6);
        assert_eq!(Instruction::decode(&words), Some((blend, 6)));

        let mut plain = blend;
        if let Instruction::Blend { function, .. } = &mut plain {
            *function = BlendFunction::Max.word_code();
        }
        assert_eq!(words_of(plain)[5], (4 << 8) | (7 << 4) | 6);
    }

    #[test]
    fn rop_carries_mask_and_control_bytes() {
        let rop = Instruction::Rop {
            dst: Area {
                x: 0,
                y: 0,
                width: 2,
                height: 2,
            },
            src0: Origin { x: 1, y: 1 },
            src1: Origin::default(),
            mask_addr: 0x2004_0000,
            mode: 2,
            high: 0xaa,
            low: 0xcc,
        };
        let words = words_of(rop);
        assert_eq!(words[0], 0xe000_0005);
        assert_eq!(words[5], 0x2004_0000);
        assert_eq!(words[6], 0x0002_aacc);
    }

    #[test]
    fn decode_walks_a_batch() {
        let mut batch = Vec::new();
        Instruction::LoadRegister {
            reg: Register::Pa0,
            value: 0x2001_0000,
        }
        .encode(&mut batch);
        Instruction::WaitForEvent { interrupt: false }.encode(&mut batch);
        Instruction::StoreRegister {
            reg: Register::GpReg2,
            addr: 3,
            interrupt: true,
        }
        .encode(&mut batch);
        assert_eq!(batch[2], 0xa000_0000);
        assert_eq!(batch[3], 0x910c_3000);

        let decoded = Instruction::decode_all(&batch).unwrap();
        assert_eq!(decoded.len(), 3);
        assert_eq!(
            decoded[2],
            Instruction::StoreRegister {
                reg: Register::GpReg2,
                addr: 3,
                interrupt: true
            }
        );
    }

    #[test]
    fn decode_rejects_garbage_and_truncation() {
        assert_eq!(Instruction::decode(&[0x1234_5678]), None);
        assert_eq!(Instruction::decode(&[0xb000_0002, 0x0031_0031]), None);
        assert_eq!(Instruction::decode_all(&[0xa000_0000, 0x0000_0001]), Err(1));
    }

    #[test]
    fn surface_slots_map_to_register_triples() {
        assert_eq!(
            Register::surface(1),
            Some((Register::Pa1, Some(Register::Pitch1), Some(Register::Cfg1)))
        );
        assert_eq!(Register::surface(3), Some((Register::Pa3, None, None)));
        assert_eq!(Register::surface(4), None);
    }
}
