//! A single Dalvik bytecode entry.
//!
//! Instead of the deep per-opcode class hierarchy some editors use, an
//! instruction is one struct whose operand storage is a closed set of
//! variants keyed by encoding format: every opcode with a `21c` encoding
//! shares `RegIndex`, every `22t` shares `RegPairBranch16`, and so on. The
//! opcode value picks the registry entry; the registry entry's format picks
//! the variant.
//!
//! The `address` field is owned by the enclosing instruction list: it is
//! assigned during decode and by `update_addresses`, and is stale after any
//! structural mutation until the list recomputes it.

use crate::dex::block::{Block, IntegerVisitor};
use crate::dex::error::DexError;
use crate::dex::extra_lines::{ExtraLine, LabelKind};
use crate::dex::opcodes::{self, Format, Opcode, ReferenceType};
use crate::dex::{read_u1, read_u2, read_u4, read_x, write_u1, write_u2, write_u4, write_x};

/// Stable identity of an instruction within its owning list. Survives
/// address recomputation; invalidated when the instruction is detached.
pub type InsId = u32;

pub const INVALID_INS_ID: InsId = u32::MAX;

/// Operand storage, one variant per encoding format.
#[derive(Debug, Clone, PartialEq)]
pub enum Operands {
    /// 10x
    None,
    /// 12x
    RegPair { a: u8, b: u8 },
    /// 11n
    RegLit4 { a: u8, lit: i8 },
    /// 11x
    Reg { a: u8 },
    /// 10t
    Branch8 { offset: i8 },
    /// 20t
    Branch16 { offset: i16 },
    /// 22x
    RegWide { a: u8, b: u16 },
    /// 21t
    RegBranch16 { a: u8, offset: i16 },
    /// 21s and 21h
    RegLit16 { a: u8, lit: i16 },
    /// 21c
    RegIndex { a: u8, index: u16 },
    /// 23x
    RegTriple { a: u8, b: u8, c: u8 },
    /// 22b
    RegPairLit8 { a: u8, b: u8, lit: i8 },
    /// 22t
    RegPairBranch16 { a: u8, b: u8, offset: i16 },
    /// 22s
    RegPairLit16 { a: u8, b: u8, lit: i16 },
    /// 22c
    RegPairIndex { a: u8, b: u8, index: u16 },
    /// 30t
    Branch32 { offset: i32 },
    /// 32x
    RegPair16 { a: u16, b: u16 },
    /// 31i
    RegLit32 { a: u8, lit: i32 },
    /// 31t
    RegBranch32 { a: u8, offset: i32 },
    /// 31c
    RegIndex32 { a: u8, index: u32 },
    /// 35c
    Args { regs: Vec<u8>, index: u16 },
    /// 3rc
    ArgsRange { first: u16, count: u8, index: u16 },
    /// 45cc
    ArgsProto { regs: Vec<u8>, index: u16, proto: u16 },
    /// 4rcc
    ArgsRangeProto {
        first: u16,
        count: u8,
        index: u16,
        proto: u16,
    },
    /// 51l
    RegLit64 { a: u8, lit: i64 },
    PackedSwitch { first_key: i32, targets: Vec<i32> },
    SparseSwitch { keys: Vec<i32>, targets: Vec<i32> },
    ArrayData { element_width: u16, data: Vec<u8> },
}

#[derive(Debug)]
pub struct Ins {
    opcode: u16,
    operands: Operands,
    address: u32,
    id: InsId,
    extra_lines: Vec<ExtraLine>,
}

impl Ins {
    /// Factory contract: an empty (all-zero operand) instance of the
    /// matching variant for a registry entry. Fails only when the opcode
    /// has no binary value at the registry's API level.
    pub fn new(opcode: &Opcode) -> Result<Ins, DexError> {
        match opcode.value() {
            Some(value) => Ok(Self::empty(value, opcode.format)),
            None => Err(DexError::new(&format!(
                "opcode {} has no value at the current api level",
                opcode.name
            ))),
        }
    }

    pub fn nop() -> Ins {
        Self::empty(0x00, Format::Format10x)
    }

    fn empty(value: u16, format: Format) -> Ins {
        let operands = match format {
            Format::Format10x => Operands::None,
            Format::Format12x => Operands::RegPair { a: 0, b: 0 },
            Format::Format11n => Operands::RegLit4 { a: 0, lit: 0 },
            Format::Format11x => Operands::Reg { a: 0 },
            Format::Format10t => Operands::Branch8 { offset: 0 },
            Format::Format20t => Operands::Branch16 { offset: 0 },
            Format::Format22x => Operands::RegWide { a: 0, b: 0 },
            Format::Format21t => Operands::RegBranch16 { a: 0, offset: 0 },
            Format::Format21s | Format::Format21h => Operands::RegLit16 { a: 0, lit: 0 },
            Format::Format21c => Operands::RegIndex { a: 0, index: 0 },
            Format::Format23x => Operands::RegTriple { a: 0, b: 0, c: 0 },
            Format::Format22b => Operands::RegPairLit8 { a: 0, b: 0, lit: 0 },
            Format::Format22t => Operands::RegPairBranch16 {
                a: 0,
                b: 0,
                offset: 0,
            },
            Format::Format22s => Operands::RegPairLit16 { a: 0, b: 0, lit: 0 },
            Format::Format22c => Operands::RegPairIndex { a: 0, b: 0, index: 0 },
            Format::Format30t => Operands::Branch32 { offset: 0 },
            Format::Format32x => Operands::RegPair16 { a: 0, b: 0 },
            Format::Format31i => Operands::RegLit32 { a: 0, lit: 0 },
            Format::Format31t => Operands::RegBranch32 { a: 0, offset: 0 },
            Format::Format31c => Operands::RegIndex32 { a: 0, index: 0 },
            Format::Format35c => Operands::Args {
                regs: Vec::new(),
                index: 0,
            },
            Format::Format3rc => Operands::ArgsRange {
                first: 0,
                count: 0,
                index: 0,
            },
            Format::Format45cc => Operands::ArgsProto {
                regs: Vec::new(),
                index: 0,
                proto: 0,
            },
            Format::Format4rcc => Operands::ArgsRangeProto {
                first: 0,
                count: 0,
                index: 0,
                proto: 0,
            },
            Format::Format51l => Operands::RegLit64 { a: 0, lit: 0 },
            Format::PackedSwitchPayload => Operands::PackedSwitch {
                first_key: 0,
                targets: Vec::new(),
            },
            Format::SparseSwitchPayload => Operands::SparseSwitch {
                keys: Vec::new(),
                targets: Vec::new(),
            },
            Format::ArrayDataPayload => Operands::ArrayData {
                element_width: 1,
                data: Vec::new(),
            },
        };
        Ins {
            opcode: value,
            operands,
            address: 0,
            id: INVALID_INS_ID,
            extra_lines: Vec::new(),
        }
    }

    pub fn with_operands(opcode: &Opcode, operands: Operands) -> Result<Ins, DexError> {
        let mut ins = Self::new(opcode)?;
        ins.operands = operands;
        Ok(ins)
    }

    pub fn opcode_value(&self) -> u16 {
        self.opcode
    }

    pub fn opcode(&self) -> Option<&'static Opcode> {
        opcodes::for_value(self.opcode)
    }

    pub fn name(&self) -> &'static str {
        self.opcode().map(|op| op.name).unwrap_or("unknown")
    }

    pub fn operands(&self) -> &Operands {
        &self.operands
    }

    pub fn operands_mut(&mut self) -> &mut Operands {
        &mut self.operands
    }

    /// Code-unit offset from the method start. Valid only while the owning
    /// list is clean.
    pub fn address(&self) -> u32 {
        self.address
    }

    pub(crate) fn set_address(&mut self, address: u32) {
        self.address = address;
    }

    pub fn id(&self) -> InsId {
        self.id
    }

    pub(crate) fn set_id(&mut self, id: InsId) {
        self.id = id;
    }

    pub fn is_attached(&self) -> bool {
        self.id != INVALID_INS_ID
    }

    pub(crate) fn detach(&mut self) {
        self.id = INVALID_INS_ID;
        self.address = 0;
        self.extra_lines.clear();
    }

    /// Length in 2-byte code units, derived from the operand encoding.
    pub fn code_units(&self) -> u32 {
        match &self.operands {
            Operands::None
            | Operands::RegPair { .. }
            | Operands::RegLit4 { .. }
            | Operands::Reg { .. }
            | Operands::Branch8 { .. } => 1,
            Operands::Branch16 { .. }
            | Operands::RegWide { .. }
            | Operands::RegBranch16 { .. }
            | Operands::RegLit16 { .. }
            | Operands::RegIndex { .. }
            | Operands::RegTriple { .. }
            | Operands::RegPairLit8 { .. }
            | Operands::RegPairBranch16 { .. }
            | Operands::RegPairLit16 { .. }
            | Operands::RegPairIndex { .. } => 2,
            Operands::Branch32 { .. }
            | Operands::RegPair16 { .. }
            | Operands::RegLit32 { .. }
            | Operands::RegBranch32 { .. }
            | Operands::RegIndex32 { .. }
            | Operands::Args { .. }
            | Operands::ArgsRange { .. } => 3,
            Operands::ArgsProto { .. } | Operands::ArgsRangeProto { .. } => 4,
            Operands::RegLit64 { .. } => 5,
            Operands::PackedSwitch { targets, .. } => 4 + 2 * targets.len() as u32,
            Operands::SparseSwitch { keys, .. } => 2 + 4 * keys.len() as u32,
            Operands::ArrayData { data, .. } => 4 + (data.len() as u32 + 1) / 2,
        }
    }

    /// Outgoing register requirement: the argument register count for
    /// invoke instructions, 0 for everything else.
    pub fn out_size(&self) -> u16 {
        let is_invoke = matches!(self.opcode, 0x6e..=0x72 | 0x74..=0x78 | 0xfa..=0xfd);
        if !is_invoke {
            return 0;
        }
        match &self.operands {
            Operands::Args { regs, .. } | Operands::ArgsProto { regs, .. } => regs.len() as u16,
            Operands::ArgsRange { count, .. } | Operands::ArgsRangeProto { count, .. } => {
                *count as u16
            }
            _ => 0,
        }
    }

    pub fn is_payload(&self) -> bool {
        matches!(
            self.operands,
            Operands::PackedSwitch { .. }
                | Operands::SparseSwitch { .. }
                | Operands::ArrayData { .. }
        )
    }

    /// The label kind this instruction produces, when it carries a target.
    pub fn label_kind(&self) -> Option<LabelKind> {
        LabelKind::for_opcode(self.opcode)
    }

    /// Absolute target address of a branch or payload reference.
    pub fn target_address(&self) -> Option<u32> {
        let offset: i64 = match &self.operands {
            Operands::Branch8 { offset } => *offset as i64,
            Operands::Branch16 { offset }
            | Operands::RegBranch16 { offset, .. }
            | Operands::RegPairBranch16 { offset, .. } => *offset as i64,
            Operands::Branch32 { offset } | Operands::RegBranch32 { offset, .. } => *offset as i64,
            _ => return None,
        };
        Some((self.address as i64 + offset) as u32)
    }

    /// Re-encodes the relative offset so that the instruction targets
    /// `target`. Fails when the offset does not fit the encoding.
    pub(crate) fn set_target_address(&mut self, target: u32) -> bool {
        let relative = target as i64 - self.address as i64;
        match &mut self.operands {
            Operands::Branch8 { offset } => {
                if relative < i8::MIN as i64 || relative > i8::MAX as i64 {
                    return false;
                }
                *offset = relative as i8;
            }
            Operands::Branch16 { offset }
            | Operands::RegBranch16 { offset, .. }
            | Operands::RegPairBranch16 { offset, .. } => {
                if relative < i16::MIN as i64 || relative > i16::MAX as i64 {
                    return false;
                }
                *offset = relative as i16;
            }
            Operands::Branch32 { offset } | Operands::RegBranch32 { offset, .. } => {
                if relative < i32::MIN as i64 || relative > i32::MAX as i64 {
                    return false;
                }
                *offset = relative as i32;
            }
            _ => return false,
        }
        true
    }

    /// Case targets of a switch payload, relative to the referencing switch
    /// instruction.
    pub fn payload_targets(&self) -> Option<&[i32]> {
        match &self.operands {
            Operands::PackedSwitch { targets, .. } | Operands::SparseSwitch { targets, .. } => {
                Some(targets)
            }
            _ => None,
        }
    }

    pub(crate) fn set_payload_target(&mut self, case: usize, relative: i32) -> bool {
        match &mut self.operands {
            Operands::PackedSwitch { targets, .. } | Operands::SparseSwitch { targets, .. } => {
                match targets.get_mut(case) {
                    Some(slot) => {
                        *slot = relative;
                        true
                    }
                    None => false,
                }
            }
            _ => false,
        }
    }

    pub fn extra_lines(&self) -> &[ExtraLine] {
        &self.extra_lines
    }

    pub fn has_extra_lines(&self) -> bool {
        !self.extra_lines.is_empty()
    }

    pub fn add_extra_line(&mut self, line: ExtraLine) {
        self.extra_lines.push(line);
    }

    pub(crate) fn clear_extra_lines(&mut self) {
        self.extra_lines.clear();
    }

    pub(crate) fn take_extra_lines(&mut self) -> Vec<ExtraLine> {
        std::mem::take(&mut self.extra_lines)
    }

    /// Drops duplicate lines and sorts the rest into emission order.
    pub(crate) fn trim_extra_lines(&mut self) {
        let mut kept: Vec<ExtraLine> = Vec::with_capacity(self.extra_lines.len());
        for line in self.extra_lines.drain(..) {
            if !kept.contains(&line) {
                kept.push(line);
            }
        }
        kept.sort_by_key(|line| line.sort_order());
        self.extra_lines = kept;
    }

    /// Try-start markers attached to this instruction, as
    /// (try id, guarded code units) pairs.
    pub fn try_start_lines(&self) -> impl Iterator<Item = (u16, u32)> + '_ {
        self.extra_lines.iter().filter_map(|line| match line {
            ExtraLine::TryStart {
                try_id,
                region_code_units,
            } => Some((*try_id, *region_code_units)),
            _ => None,
        })
    }

    /// Decodes one instruction. The caller positions the cursor at an
    /// instruction boundary; the address is assigned by the caller.
    pub(crate) fn read(bytes: &[u8], ix: &mut usize) -> Result<Ins, DexError> {
        let unit = read_u2(bytes, ix)?;
        let op = unit & 0xff;
        let hi = (unit >> 8) as u8;
        if op == 0x00 && hi != 0 {
            return Self::read_payload(unit, bytes, ix);
        }
        let opcode = match opcodes::for_value(op) {
            Some(opcode) => opcode,
            None => fail!("unknown opcode 0x{:02x} at index {}", op, *ix - 2),
        };
        let operands = match opcode.format {
            Format::Format10x => Operands::None,
            Format::Format12x => Operands::RegPair {
                a: hi & 0xf,
                b: hi >> 4,
            },
            Format::Format11n => Operands::RegLit4 {
                a: hi & 0xf,
                lit: (hi as i8) >> 4,
            },
            Format::Format11x => Operands::Reg { a: hi },
            Format::Format10t => Operands::Branch8 { offset: hi as i8 },
            Format::Format20t => Operands::Branch16 {
                offset: read_u2(bytes, ix)? as i16,
            },
            Format::Format22x => Operands::RegWide {
                a: hi,
                b: read_u2(bytes, ix)?,
            },
            Format::Format21t => Operands::RegBranch16 {
                a: hi,
                offset: read_u2(bytes, ix)? as i16,
            },
            Format::Format21s | Format::Format21h => Operands::RegLit16 {
                a: hi,
                lit: read_u2(bytes, ix)? as i16,
            },
            Format::Format21c => Operands::RegIndex {
                a: hi,
                index: read_u2(bytes, ix)?,
            },
            Format::Format23x => {
                let unit2 = read_u2(bytes, ix)?;
                Operands::RegTriple {
                    a: hi,
                    b: (unit2 & 0xff) as u8,
                    c: (unit2 >> 8) as u8,
                }
            }
            Format::Format22b => {
                let unit2 = read_u2(bytes, ix)?;
                Operands::RegPairLit8 {
                    a: hi,
                    b: (unit2 & 0xff) as u8,
                    lit: (unit2 >> 8) as u8 as i8,
                }
            }
            Format::Format22t => Operands::RegPairBranch16 {
                a: hi & 0xf,
                b: hi >> 4,
                offset: read_u2(bytes, ix)? as i16,
            },
            Format::Format22s => Operands::RegPairLit16 {
                a: hi & 0xf,
                b: hi >> 4,
                lit: read_u2(bytes, ix)? as i16,
            },
            Format::Format22c => Operands::RegPairIndex {
                a: hi & 0xf,
                b: hi >> 4,
                index: read_u2(bytes, ix)?,
            },
            Format::Format30t => Operands::Branch32 {
                offset: read_u4(bytes, ix)? as i32,
            },
            Format::Format32x => Operands::RegPair16 {
                a: read_u2(bytes, ix)?,
                b: read_u2(bytes, ix)?,
            },
            Format::Format31i => Operands::RegLit32 {
                a: hi,
                lit: read_u4(bytes, ix)? as i32,
            },
            Format::Format31t => Operands::RegBranch32 {
                a: hi,
                offset: read_u4(bytes, ix)? as i32,
            },
            Format::Format31c => Operands::RegIndex32 {
                a: hi,
                index: read_u4(bytes, ix)?,
            },
            Format::Format35c => {
                let index = read_u2(bytes, ix)?;
                let regs = Self::read_arg_regs(hi, read_u2(bytes, ix)?);
                Operands::Args { regs, index }
            }
            Format::Format3rc => {
                let index = read_u2(bytes, ix)?;
                let first = read_u2(bytes, ix)?;
                Operands::ArgsRange {
                    first,
                    count: hi,
                    index,
                }
            }
            Format::Format45cc => {
                let index = read_u2(bytes, ix)?;
                let regs = Self::read_arg_regs(hi, read_u2(bytes, ix)?);
                let proto = read_u2(bytes, ix)?;
                Operands::ArgsProto { regs, index, proto }
            }
            Format::Format4rcc => {
                let index = read_u2(bytes, ix)?;
                let first = read_u2(bytes, ix)?;
                let proto = read_u2(bytes, ix)?;
                Operands::ArgsRangeProto {
                    first,
                    count: hi,
                    index,
                    proto,
                }
            }
            Format::Format51l => {
                let lo = read_u4(bytes, ix)? as u64;
                let hi4 = read_u4(bytes, ix)? as u64;
                Operands::RegLit64 {
                    a: hi,
                    lit: ((hi4 << 32) | lo) as i64,
                }
            }
            Format::PackedSwitchPayload
            | Format::SparseSwitchPayload
            | Format::ArrayDataPayload => {
                fail!("payload format reached through the opcode table");
            }
        };
        Ok(Ins {
            opcode: op,
            operands,
            address: 0,
            id: INVALID_INS_ID,
            extra_lines: Vec::new(),
        })
    }

    fn read_arg_regs(hi: u8, regs_unit: u16) -> Vec<u8> {
        let count = (hi >> 4) as usize;
        let g = hi & 0xf;
        let all = [
            (regs_unit & 0xf) as u8,
            ((regs_unit >> 4) & 0xf) as u8,
            ((regs_unit >> 8) & 0xf) as u8,
            ((regs_unit >> 12) & 0xf) as u8,
            g,
        ];
        all[..count.min(5)].to_vec()
    }

    fn read_payload(ident: u16, bytes: &[u8], ix: &mut usize) -> Result<Ins, DexError> {
        let operands = match ident {
            0x0100 => {
                let size = read_u2(bytes, ix)? as usize;
                let first_key = read_u4(bytes, ix)? as i32;
                let mut targets = Vec::with_capacity(size);
                for _ in 0..size {
                    targets.push(read_u4(bytes, ix)? as i32);
                }
                Operands::PackedSwitch { first_key, targets }
            }
            0x0200 => {
                let size = read_u2(bytes, ix)? as usize;
                let mut keys = Vec::with_capacity(size);
                for _ in 0..size {
                    keys.push(read_u4(bytes, ix)? as i32);
                }
                let mut targets = Vec::with_capacity(size);
                for _ in 0..size {
                    targets.push(read_u4(bytes, ix)? as i32);
                }
                Operands::SparseSwitch { keys, targets }
            }
            0x0300 => {
                let element_width = read_u2(bytes, ix)?;
                let size = read_u4(bytes, ix)? as usize;
                let byte_len = size * element_width as usize;
                let data = read_x(bytes, ix, byte_len)?;
                if byte_len % 2 != 0 {
                    // pad byte keeps the stream on a code-unit boundary
                    read_u1(bytes, ix)?;
                }
                Operands::ArrayData {
                    element_width,
                    data,
                }
            }
            _ => fail!("unknown payload ident 0x{:04x} at index {}", ident, *ix - 2),
        };
        Ok(Ins {
            opcode: ident,
            operands,
            address: 0,
            id: INVALID_INS_ID,
            extra_lines: Vec::new(),
        })
    }

    /// Re-encodes the instruction. Unmodified decode then write reproduces
    /// the original bytes exactly.
    pub(crate) fn write(&self, buffer: &mut Vec<u8>) -> usize {
        let op = self.opcode;
        let mut c = 0;
        match &self.operands {
            Operands::None => {
                c += write_u2(buffer, op);
            }
            Operands::RegPair { a, b } => {
                c += write_u2(buffer, op | ((*a as u16 & 0xf) << 8) | ((*b as u16 & 0xf) << 12));
            }
            Operands::RegLit4 { a, lit } => {
                let nib = (*lit as u16) & 0xf;
                c += write_u2(buffer, op | ((*a as u16 & 0xf) << 8) | (nib << 12));
            }
            Operands::Reg { a } => {
                c += write_u2(buffer, op | ((*a as u16) << 8));
            }
            Operands::Branch8 { offset } => {
                c += write_u2(buffer, op | ((*offset as u8 as u16) << 8));
            }
            Operands::Branch16 { offset } => {
                c += write_u2(buffer, op);
                c += write_u2(buffer, *offset as u16);
            }
            Operands::RegWide { a, b } => {
                c += write_u2(buffer, op | ((*a as u16) << 8));
                c += write_u2(buffer, *b);
            }
            Operands::RegBranch16 { a, offset } => {
                c += write_u2(buffer, op | ((*a as u16) << 8));
                c += write_u2(buffer, *offset as u16);
            }
            Operands::RegLit16 { a, lit } => {
                c += write_u2(buffer, op | ((*a as u16) << 8));
                c += write_u2(buffer, *lit as u16);
            }
            Operands::RegIndex { a, index } => {
                c += write_u2(buffer, op | ((*a as u16) << 8));
                c += write_u2(buffer, *index);
            }
            Operands::RegTriple { a, b, c: reg_c } => {
                c += write_u2(buffer, op | ((*a as u16) << 8));
                c += write_u2(buffer, (*b as u16) | ((*reg_c as u16) << 8));
            }
            Operands::RegPairLit8 { a, b, lit } => {
                c += write_u2(buffer, op | ((*a as u16) << 8));
                c += write_u2(buffer, (*b as u16) | ((*lit as u8 as u16) << 8));
            }
            Operands::RegPairBranch16 { a, b, offset } => {
                c += write_u2(buffer, op | ((*a as u16 & 0xf) << 8) | ((*b as u16 & 0xf) << 12));
                c += write_u2(buffer, *offset as u16);
            }
            Operands::RegPairLit16 { a, b, lit } => {
                c += write_u2(buffer, op | ((*a as u16 & 0xf) << 8) | ((*b as u16 & 0xf) << 12));
                c += write_u2(buffer, *lit as u16);
            }
            Operands::RegPairIndex { a, b, index } => {
                c += write_u2(buffer, op | ((*a as u16 & 0xf) << 8) | ((*b as u16 & 0xf) << 12));
                c += write_u2(buffer, *index);
            }
            Operands::Branch32 { offset } => {
                c += write_u2(buffer, op);
                c += write_u4(buffer, *offset as u32);
            }
            Operands::RegPair16 { a, b } => {
                c += write_u2(buffer, op);
                c += write_u2(buffer, *a);
                c += write_u2(buffer, *b);
            }
            Operands::RegLit32 { a, lit } => {
                c += write_u2(buffer, op | ((*a as u16) << 8));
                c += write_u4(buffer, *lit as u32);
            }
            Operands::RegBranch32 { a, offset } => {
                c += write_u2(buffer, op | ((*a as u16) << 8));
                c += write_u4(buffer, *offset as u32);
            }
            Operands::RegIndex32 { a, index } => {
                c += write_u2(buffer, op | ((*a as u16) << 8));
                c += write_u4(buffer, *index);
            }
            Operands::Args { regs, index } => {
                c += write_u2(buffer, op | Self::arg_hi(regs));
                c += write_u2(buffer, *index);
                c += write_u2(buffer, Self::arg_unit(regs));
            }
            Operands::ArgsRange {
                first,
                count,
                index,
            } => {
                c += write_u2(buffer, op | ((*count as u16) << 8));
                c += write_u2(buffer, *index);
                c += write_u2(buffer, *first);
            }
            Operands::ArgsProto { regs, index, proto } => {
                c += write_u2(buffer, op | Self::arg_hi(regs));
                c += write_u2(buffer, *index);
                c += write_u2(buffer, Self::arg_unit(regs));
                c += write_u2(buffer, *proto);
            }
            Operands::ArgsRangeProto {
                first,
                count,
                index,
                proto,
            } => {
                c += write_u2(buffer, op | ((*count as u16) << 8));
                c += write_u2(buffer, *index);
                c += write_u2(buffer, *first);
                c += write_u2(buffer, *proto);
            }
            Operands::RegLit64 { a, lit } => {
                c += write_u2(buffer, op | ((*a as u16) << 8));
                c += write_u4(buffer, *lit as u32);
                c += write_u4(buffer, (*lit as u64 >> 32) as u32);
            }
            Operands::PackedSwitch { first_key, targets } => {
                c += write_u2(buffer, 0x0100);
                c += write_u2(buffer, targets.len() as u16);
                c += write_u4(buffer, *first_key as u32);
                for target in targets {
                    c += write_u4(buffer, *target as u32);
                }
            }
            Operands::SparseSwitch { keys, targets } => {
                c += write_u2(buffer, 0x0200);
                c += write_u2(buffer, keys.len() as u16);
                for key in keys {
                    c += write_u4(buffer, *key as u32);
                }
                for target in targets {
                    c += write_u4(buffer, *target as u32);
                }
            }
            Operands::ArrayData {
                element_width,
                data,
            } => {
                c += write_u2(buffer, 0x0300);
                c += write_u2(buffer, *element_width);
                let count = if *element_width == 0 {
                    0
                } else {
                    data.len() / *element_width as usize
                };
                c += write_u4(buffer, count as u32);
                c += write_x(buffer, data);
                if data.len() % 2 != 0 {
                    c += write_u1(buffer, 0);
                }
            }
        }
        c
    }

    fn arg_hi(regs: &[u8]) -> u16 {
        let g = if regs.len() == 5 { regs[4] as u16 } else { 0 };
        ((regs.len() as u16) << 12) | ((g & 0xf) << 8)
    }

    fn arg_unit(regs: &[u8]) -> u16 {
        let mut unit = 0u16;
        for (slot, reg) in regs.iter().take(4).enumerate() {
            unit |= ((*reg as u16) & 0xf) << (4 * slot);
        }
        unit
    }

    /// One formatted smali line, without indentation or the extra lines.
    /// Pool references are printed as stable `table@index` placeholders;
    /// resolving them against the pools is the owner's concern.
    pub fn smali(&self) -> String {
        let name = self.name();
        match &self.operands {
            Operands::None => name.to_string(),
            Operands::RegPair { a, b } => format!("{} v{}, v{}", name, a, b),
            Operands::RegLit4 { a, lit } => format!("{} v{}, #{}", name, a, lit),
            Operands::Reg { a } => format!("{} v{}", name, a),
            Operands::Branch8 { .. } | Operands::Branch16 { .. } | Operands::Branch32 { .. } => {
                format!("{} {}", name, self.target_label())
            }
            Operands::RegWide { a, b } => format!("{} v{}, v{}", name, a, b),
            Operands::RegBranch16 { a, .. } => format!("{} v{}, {}", name, a, self.target_label()),
            Operands::RegLit16 { a, lit } => format!("{} v{}, #{}", name, a, lit),
            Operands::RegIndex { a, index } => {
                format!("{} v{}, {}", name, a, self.reference(*index as u32, false))
            }
            Operands::RegTriple { a, b, c } => format!("{} v{}, v{}, v{}", name, a, b, c),
            Operands::RegPairLit8 { a, b, lit } => format!("{} v{}, v{}, #{}", name, a, b, lit),
            Operands::RegPairBranch16 { a, b, .. } => {
                format!("{} v{}, v{}, {}", name, a, b, self.target_label())
            }
            Operands::RegPairLit16 { a, b, lit } => format!("{} v{}, v{}, #{}", name, a, b, lit),
            Operands::RegPairIndex { a, b, index } => {
                format!("{} v{}, v{}, {}", name, a, b, self.reference(*index as u32, false))
            }
            Operands::RegPair16 { a, b } => format!("{} v{}, v{}", name, a, b),
            Operands::RegLit32 { a, lit } => format!("{} v{}, #{}", name, a, lit),
            Operands::RegBranch32 { a, .. } => format!("{} v{}, {}", name, a, self.target_label()),
            Operands::RegIndex32 { a, index } => {
                format!("{} v{}, {}", name, a, self.reference(*index, false))
            }
            Operands::Args { regs, index } => format!(
                "{} {{{}}}, {}",
                name,
                Self::reg_list(regs),
                self.reference(*index as u32, false)
            ),
            Operands::ArgsRange {
                first,
                count,
                index,
            } => format!(
                "{} {{{}}}, {}",
                name,
                Self::reg_range(*first, *count),
                self.reference(*index as u32, false)
            ),
            Operands::ArgsProto { regs, index, proto } => format!(
                "{} {{{}}}, {}, {}",
                name,
                Self::reg_list(regs),
                self.reference(*index as u32, false),
                self.reference(*proto as u32, true)
            ),
            Operands::ArgsRangeProto {
                first,
                count,
                index,
                proto,
            } => format!(
                "{} {{{}}}, {}, {}",
                name,
                Self::reg_range(*first, *count),
                self.reference(*index as u32, false),
                self.reference(*proto as u32, true)
            ),
            Operands::RegLit64 { a, lit } => format!("{} v{}, #{}", name, a, lit),
            Operands::PackedSwitch { first_key, targets } => {
                format!(".packed-switch {} ({} targets)", first_key, targets.len())
            }
            Operands::SparseSwitch { keys, .. } => {
                format!(".sparse-switch ({} entries)", keys.len())
            }
            Operands::ArrayData {
                element_width,
                data,
            } => {
                let count = if *element_width == 0 {
                    0
                } else {
                    data.len() / *element_width as usize
                };
                format!(".array-data {} ({} elements)", element_width, count)
            }
        }
    }

    fn target_label(&self) -> String {
        match (self.label_kind(), self.target_address()) {
            (Some(kind), Some(target)) => kind.name(target),
            _ => "?".to_string(),
        }
    }

    fn reg_list(regs: &[u8]) -> String {
        let names: Vec<String> = regs.iter().map(|r| format!("v{}", r)).collect();
        names.join(", ")
    }

    fn reg_range(first: u16, count: u8) -> String {
        if count == 0 {
            return String::new();
        }
        // widened so a range ending at v65535 cannot wrap
        format!("v{} .. v{}", first, first as u32 + count as u32 - 1)
    }

    fn reference(&self, index: u32, second: bool) -> String {
        let kind = self
            .opcode()
            .map(|op| {
                if second {
                    op.reference_type2.unwrap_or(ReferenceType::None)
                } else {
                    op.reference_type
                }
            })
            .unwrap_or(ReferenceType::None);
        match kind {
            ReferenceType::String => format!("string@{}", index),
            ReferenceType::Type => format!("type@{}", index),
            ReferenceType::Field => format!("field@{}", index),
            ReferenceType::Method => format!("method@{}", index),
            ReferenceType::MethodProto => format!("proto@{}", index),
            ReferenceType::MethodHandle => format!("method_handle@{}", index),
            ReferenceType::CallSite => format!("call_site@{}", index),
            ReferenceType::None => format!("#{}", index),
        }
    }
}

fn visit_u16(visitor: &mut dyn IntegerVisitor, cell: &mut u16) {
    if let Some(new) = visitor.visit(*cell as u32) {
        *cell = new as u16;
    }
}

fn visit_u32(visitor: &mut dyn IntegerVisitor, cell: &mut u32) {
    if let Some(new) = visitor.visit(*cell) {
        *cell = new;
    }
}

impl Block for Ins {
    fn size(&self) -> usize {
        self.code_units() as usize * 2
    }

    fn visit_integers(&mut self, visitor: &mut dyn IntegerVisitor) {
        let has_reference = self
            .opcode()
            .map(|op| op.reference_type != ReferenceType::None)
            .unwrap_or(false);
        if !has_reference {
            return;
        }
        match &mut self.operands {
            Operands::RegIndex { index, .. }
            | Operands::RegPairIndex { index, .. }
            | Operands::Args { index, .. }
            | Operands::ArgsRange { index, .. } => visit_u16(visitor, index),
            Operands::RegIndex32 { index, .. } => visit_u32(visitor, index),
            Operands::ArgsProto { index, proto, .. }
            | Operands::ArgsRangeProto { index, proto, .. } => {
                visit_u16(visitor, index);
                visit_u16(visitor, proto);
            }
            _ => {}
        }
    }
}
