//! The method body container: register counts, the try/debug tables and the
//! instruction stream.
//!
//! All mutations of the stream go through this type so the derived header
//! fields (`insns_code_units`, `outs_size`) can never drift from the actual
//! instruction sequence: every structural operation ends by writing the
//! list's address summary back into the header.

use crate::dex::block::{Block, IntegerVisitor};
use crate::dex::error::DexError;
use crate::dex::extra_lines::{DebugElement, ExtraLineSources, TryRegion};
use crate::dex::ins::{Ins, InsId};
use crate::dex::ins_list::InstructionList;
use crate::dex::opcodes::Opcode;
use crate::dex::{read_u2, read_u4, write_u2, write_u4};

pub struct CodeItem {
    registers_size: u16,
    ins_size: u16,
    outs_size: u16,
    insns_code_units: u32,
    tries: Vec<TryRegion>,
    debug: Vec<DebugElement>,
    instructions: InstructionList,
}

impl CodeItem {
    pub fn new(registers_size: u16, ins_size: u16) -> Self {
        CodeItem {
            registers_size,
            ins_size,
            outs_size: 0,
            insns_code_units: 0,
            tries: Vec::new(),
            debug: Vec::new(),
            instructions: InstructionList::new(),
        }
    }

    pub fn registers_size(&self) -> u16 {
        self.registers_size
    }

    pub fn set_registers_size(&mut self, registers_size: u16) {
        self.registers_size = registers_size;
    }

    pub fn ins_size(&self) -> u16 {
        self.ins_size
    }

    pub fn set_ins_size(&mut self, ins_size: u16) {
        self.ins_size = ins_size;
    }

    pub fn outs_size(&self) -> u16 {
        self.outs_size
    }

    pub fn insns_code_units(&self) -> u32 {
        self.insns_code_units
    }

    pub fn tries(&self) -> &[TryRegion] {
        &self.tries
    }

    pub fn debug(&self) -> &[DebugElement] {
        &self.debug
    }

    pub fn instructions(&self) -> &InstructionList {
        &self.instructions
    }

    fn sources<'a>(
        tries: &'a mut [TryRegion],
        debug: &'a mut [DebugElement],
    ) -> ExtraLineSources<'a> {
        ExtraLineSources { tries, debug }
    }

    fn apply_summary(&mut self) {
        let summary = self.instructions.address_summary();
        self.insns_code_units = summary.code_units;
        self.outs_size = summary.outs;
    }

    /// Registers a guarded region. Existing extra lines are rebuilt lazily
    /// on the next pass that needs them.
    pub fn add_try_region(&mut self, region: TryRegion) {
        self.tries.push(region);
        self.instructions
            .rebuild_extra_lines(&mut Self::sources(&mut self.tries, &mut self.debug));
    }

    pub fn add_debug_element(&mut self, element: DebugElement) {
        self.debug.push(element);
        self.instructions
            .rebuild_extra_lines(&mut Self::sources(&mut self.tries, &mut self.debug));
    }

    pub fn push(&mut self, ins: Ins) -> InsId {
        let id = self.instructions.push(ins);
        self.apply_summary();
        id
    }

    pub fn create_next(&mut self, opcode: &Opcode) -> Result<InsId, DexError> {
        let id = self.instructions.create_next(opcode)?;
        self.apply_summary();
        Ok(id)
    }

    pub fn insert(&mut self, index: usize, ins: Ins) -> Option<InsId> {
        let id = self
            .instructions
            .insert(index, ins, &mut Self::sources(&mut self.tries, &mut self.debug));
        self.apply_summary();
        id
    }

    pub fn insert_all(&mut self, index: usize, batch: Vec<Ins>) -> Vec<InsId> {
        let ids = self.instructions.insert_all(
            index,
            batch,
            &mut Self::sources(&mut self.tries, &mut self.debug),
        );
        self.apply_summary();
        ids
    }

    pub fn create_at(&mut self, index: usize, opcode: &Opcode) -> Result<Option<InsId>, DexError> {
        let id = self.instructions.create_at(
            index,
            opcode,
            &mut Self::sources(&mut self.tries, &mut self.debug),
        )?;
        self.apply_summary();
        Ok(id)
    }

    pub fn remove(&mut self, id: InsId) -> bool {
        let removed = self
            .instructions
            .remove(id, &mut Self::sources(&mut self.tries, &mut self.debug));
        self.apply_summary();
        removed
    }

    pub fn remove_force(&mut self, id: InsId) -> bool {
        let removed = self.instructions.remove_with(
            id,
            true,
            &mut Self::sources(&mut self.tries, &mut self.debug),
        );
        self.apply_summary();
        removed
    }

    pub fn replace(&mut self, old_id: InsId, item: Ins) -> Option<InsId> {
        let id = self.instructions.replace(
            old_id,
            item,
            &mut Self::sources(&mut self.tries, &mut self.debug),
        );
        self.apply_summary();
        id
    }

    pub fn replace_with_nop(&mut self, old_id: InsId) -> Option<InsId> {
        let id = self
            .instructions
            .replace_with_nop(old_id, &mut Self::sources(&mut self.tries, &mut self.debug));
        self.apply_summary();
        id
    }

    pub fn build_extra_lines(&mut self) {
        self.instructions
            .build_extra_lines(&mut Self::sources(&mut self.tries, &mut self.debug));
    }

    /// Decodes a code_item structure: the fixed header, the instruction
    /// region, then (when tries are present) the padded try table. Handler
    /// decoding keeps only what the editing model needs and is driven by
    /// the caller-resolved type names in `exception_names`.
    pub fn read_bytes(
        bytes: &[u8],
        ix: &mut usize,
        exception_names: &dyn Fn(u32) -> Option<String>,
    ) -> Result<CodeItem, DexError> {
        let registers_size = read_u2(bytes, ix)?;
        let ins_size = read_u2(bytes, ix)?;
        let outs_size = read_u2(bytes, ix)?;
        let tries_size = read_u2(bytes, ix)?;
        let _debug_info_off = read_u4(bytes, ix)?;
        let insns_code_units = read_u4(bytes, ix)?;
        let mut instructions = InstructionList::new();
        instructions.read_bytes(bytes, ix, insns_code_units)?;
        let mut tries = Vec::with_capacity(tries_size as usize);
        if tries_size > 0 {
            let mut raw_tries = Vec::with_capacity(tries_size as usize);
            for _ in 0..tries_size {
                let start_address = read_u4(bytes, ix)?;
                let code_units = read_u2(bytes, ix)? as u32;
                let handler_off = read_u2(bytes, ix)?;
                raw_tries.push((start_address, code_units, handler_off));
            }
            let handlers_base = *ix;
            let (_handler_list_count, _) = read_uleb128(bytes, ix)?;
            let mut handlers_end = *ix;
            for (start_address, code_units, handler_off) in raw_tries {
                let mut hx = handlers_base + handler_off as usize;
                let handlers = read_handler_list(bytes, &mut hx, exception_names)?;
                handlers_end = handlers_end.max(hx);
                tries.push(TryRegion {
                    start_address,
                    code_units,
                    handlers,
                });
            }
            // leave the cursor past the whole handler pool, not at the count
            *ix = handlers_end;
        }
        Ok(CodeItem {
            registers_size,
            ins_size,
            outs_size,
            insns_code_units,
            tries,
            debug: Vec::new(),
            instructions,
        })
    }

    /// Encodes the header and instruction region. An unmodified item writes
    /// back byte-exact up to the end of the instruction padding. The try
    /// table and debug info need pool indices and offsets this type does
    /// not hold, so re-encoding them is the pool writer's job.
    pub fn write(&self, buffer: &mut Vec<u8>) -> usize {
        let start = buffer.len();
        write_u2(buffer, self.registers_size);
        write_u2(buffer, self.ins_size);
        write_u2(buffer, self.outs_size);
        write_u2(buffer, self.tries.len() as u16);
        write_u4(buffer, 0); // debug_info_off, rebuilt by the pool writer
        write_u4(buffer, self.insns_code_units);
        self.instructions.write(buffer);
        buffer.len() - start
    }

    /// Smali-style listing of the method body.
    pub fn to_smali(&mut self) -> String {
        self.build_extra_lines();
        let mut out = String::new();
        out.push_str(&format!("    .registers {}\n", self.registers_size));
        self.instructions.append_smali(&mut out);
        out
    }
}

impl Block for CodeItem {
    fn size(&self) -> usize {
        16 + self.instructions.size()
    }

    fn refresh(&mut self, position: usize) -> usize {
        self.instructions.refresh(position + 16)
    }

    fn visit_integers(&mut self, visitor: &mut dyn IntegerVisitor) {
        self.instructions.visit_integers(visitor);
    }
}

fn read_uleb128(bytes: &[u8], ix: &mut usize) -> Result<(u32, usize), DexError> {
    let mut result: u32 = 0;
    let mut shift = 0;
    let mut count = 0;
    loop {
        if *ix >= bytes.len() {
            fail!("uleb128 at {} exceeds the stream length", *ix);
        }
        let byte = bytes[*ix];
        *ix += 1;
        count += 1;
        result |= ((byte & 0x7f) as u32) << shift;
        if byte & 0x80 == 0 {
            break;
        }
        shift += 7;
        if shift > 28 {
            fail!("uleb128 at {} is longer than five bytes", *ix);
        }
    }
    Ok((result, count))
}

fn read_sleb128(bytes: &[u8], ix: &mut usize) -> Result<i32, DexError> {
    let mut result: i32 = 0;
    let mut shift = 0;
    loop {
        if *ix >= bytes.len() {
            fail!("sleb128 at {} exceeds the stream length", *ix);
        }
        let byte = bytes[*ix];
        *ix += 1;
        result |= ((byte & 0x7f) as i32) << shift;
        shift += 7;
        if byte & 0x80 == 0 {
            if shift < 32 && byte & 0x40 != 0 {
                result |= -1i32 << shift;
            }
            break;
        }
        if shift > 28 {
            fail!("sleb128 at {} is longer than five bytes", *ix);
        }
    }
    Ok(result)
}

fn read_handler_list(
    bytes: &[u8],
    ix: &mut usize,
    exception_names: &dyn Fn(u32) -> Option<String>,
) -> Result<Vec<crate::dex::extra_lines::CatchHandler>, DexError> {
    use crate::dex::extra_lines::CatchHandler;
    let size = read_sleb128(bytes, ix)?;
    let typed = size.unsigned_abs();
    let mut handlers = Vec::new();
    for _ in 0..typed {
        let (type_idx, _) = read_uleb128(bytes, ix)?;
        let (handler_address, _) = read_uleb128(bytes, ix)?;
        handlers.push(CatchHandler {
            exception: exception_names(type_idx),
            handler_address,
        });
    }
    if size <= 0 {
        let (handler_address, _) = read_uleb128(bytes, ix)?;
        handlers.push(CatchHandler {
            exception: None,
            handler_address,
        });
    }
    Ok(handlers)
}
