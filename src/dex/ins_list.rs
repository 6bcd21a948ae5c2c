//! The instruction list: the single owner and mutator of one method body's
//! bytecode sequence.
//!
//! Every structural mutation follows the same protocol: rebuild the
//! extra-line layer so jump targets are bound to instruction identities,
//! apply the splice, recompute every address in one forward pass, re-encode
//! every label-carrying offset from the resolved targets, write the
//! refreshed try/debug anchor addresses back into the provider records, and
//! (for inserts) rebuild the lines once more against the final addresses.
//! The list is never observable in a half-updated state: an operation
//! either completes the whole protocol or returns `false`/`None` without
//! touching anything.

use log::{debug, warn};

use crate::dex::block::{Block, BlockArray, DexPositionAlign, IntegerVisitor};
use crate::dex::error::DexError;
use crate::dex::extra_lines::{
    DebugElement, ExtraLine, ExtraLineSources, Label, LabelKind, TryRegion,
};
use crate::dex::ins::{Ins, InsId};
use crate::dex::opcodes::Opcode;

/// Derived method-header fields produced by an address pass. The code-item
/// owner writes these through to its header; the list is their canonical
/// source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AddressSummary {
    pub code_units: u32,
    pub outs: u16,
}

pub struct InstructionList {
    items: BlockArray<Ins>,
    align: DexPositionAlign,
    next_id: InsId,
}

impl InstructionList {
    pub fn new() -> Self {
        InstructionList {
            items: BlockArray::new(),
            // the structure following the instruction stream is 4-aligned,
            // so an odd code-unit count carries one padding unit
            align: DexPositionAlign::with_alignment(4),
            next_id: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Ins> {
        self.items.get(index)
    }

    pub fn get_by_id(&self, id: InsId) -> Option<&Ins> {
        self.index_of(id).and_then(|index| self.items.get(index))
    }

    pub fn index_of(&self, id: InsId) -> Option<usize> {
        self.items.iter().position(|ins| ins.id() == id)
    }

    pub fn contains(&self, id: InsId) -> bool {
        self.index_of(id).is_some()
    }

    /// Index of the instruction whose address equals `address` exactly.
    /// Linear scan; called once per label during extra-line construction.
    pub fn at_address(&self, address: u32) -> Option<usize> {
        self.items.iter().position(|ins| ins.address() == address)
    }

    pub fn align(&self) -> &DexPositionAlign {
        &self.align
    }

    fn assign_id(&mut self, ins: &mut Ins) {
        ins.set_id(self.next_id);
        self.next_id += 1;
    }

    /// O(1) append: the new instruction's address follows the last one.
    /// Valid only on a list whose addresses are already correct.
    pub fn push(&mut self, mut ins: Ins) -> InsId {
        let address = match self.items.last() {
            Some(prev) => prev.address() + prev.code_units(),
            None => 0,
        };
        ins.set_address(address);
        self.assign_id(&mut ins);
        let id = ins.id();
        let units = ins.code_units();
        self.items.push(ins);
        self.align.align((address + units) as usize * 2);
        id
    }

    /// Inserts at `index`, shifting everything after it. Runs the full
    /// mutation protocol; addresses, labels and provider records are
    /// consistent on return.
    pub fn insert(
        &mut self,
        index: usize,
        ins: Ins,
        sources: &mut ExtraLineSources,
    ) -> Option<InsId> {
        self.insert_all(index, vec![ins], sources).into_iter().next()
    }

    /// Batch insert with a single recompute.
    pub fn insert_all(
        &mut self,
        index: usize,
        batch: Vec<Ins>,
        sources: &mut ExtraLineSources,
    ) -> Vec<InsId> {
        if index > self.items.len() || batch.is_empty() {
            return Vec::new();
        }
        self.rebuild_extra_lines(sources);
        let mut ids = Vec::with_capacity(batch.len());
        let mut prepared = Vec::with_capacity(batch.len());
        for mut ins in batch {
            self.assign_id(&mut ins);
            ids.push(ins.id());
            prepared.push(ins);
        }
        self.items.insert_all(index, prepared);
        self.update_addresses();
        self.update_label_address();
        self.update_source_addresses(sources);
        self.rebuild_extra_lines(sources);
        ids
    }

    /// Factory + insert.
    pub fn create_at(
        &mut self,
        index: usize,
        opcode: &Opcode,
        sources: &mut ExtraLineSources,
    ) -> Result<Option<InsId>, DexError> {
        let ins = Ins::new(opcode)?;
        Ok(self.insert(index, ins, sources))
    }

    /// Factory + append.
    pub fn create_next(&mut self, opcode: &Opcode) -> Result<InsId, DexError> {
        Ok(self.push(Ins::new(opcode)?))
    }

    /// True when some try-start marker on the instruction at `index` guards
    /// a region no larger than the instruction itself, i.e. removing it
    /// would leave that handler region empty.
    pub fn is_lonely_in_try_catch(&mut self, index: usize, sources: &mut ExtraLineSources) -> bool {
        self.build_extra_lines(sources);
        let ins = match self.items.get(index) {
            Some(ins) => ins,
            None => return false,
        };
        let code_units = ins.code_units();
        ins.try_start_lines()
            .any(|(_, region_code_units)| region_code_units <= code_units)
    }

    pub fn remove(&mut self, id: InsId, sources: &mut ExtraLineSources) -> bool {
        self.remove_with(id, false, sources)
    }

    /// Removes the instruction, or — when it is the sole guard of a
    /// try-handler region and `force` is false — substitutes a NOP in its
    /// place instead of shrinking the region to nothing. Extra lines of a
    /// genuinely removed instruction transfer to its successor.
    pub fn remove_with(&mut self, id: InsId, force: bool, sources: &mut ExtraLineSources) -> bool {
        let index = match self.index_of(id) {
            Some(index) => index,
            None => return false,
        };
        if !force && self.is_lonely_in_try_catch(index, sources) {
            debug!("removal redirected to nop, instruction is a lonely try guard");
            return self.replace_with_nop(id, sources).is_some();
        }
        self.rebuild_extra_lines(sources);
        if index + 1 < self.items.len() {
            let lines = match self.items.get_mut(index) {
                Some(ins) if ins.has_extra_lines() => ins.take_extra_lines(),
                _ => Vec::new(),
            };
            if !lines.is_empty() {
                if let Some(next) = self.items.get_mut(index + 1) {
                    for line in lines {
                        next.add_extra_line(line);
                    }
                    next.trim_extra_lines();
                }
            }
        }
        let mut old = self.items.remove(index);
        old.detach();
        self.update_addresses();
        self.update_label_address();
        self.update_source_addresses(sources);
        true
    }

    pub fn replace_with_nop(
        &mut self,
        old_id: InsId,
        sources: &mut ExtraLineSources,
    ) -> Option<InsId> {
        self.replace(old_id, Ins::nop(), sources)
    }

    /// Substitutes `item` at the old instruction's index, transferring the
    /// address and any extra lines. The old instruction comes back detached
    /// and must not be reused in another list.
    pub fn replace(
        &mut self,
        old_id: InsId,
        mut item: Ins,
        sources: &mut ExtraLineSources,
    ) -> Option<InsId> {
        let index = self.index_of(old_id)?;
        self.rebuild_extra_lines(sources);
        self.assign_id(&mut item);
        let new_id = item.id();
        {
            let old_ref = self.items.get_mut(index)?;
            item.set_address(old_ref.address());
            for line in old_ref.take_extra_lines() {
                item.add_extra_line(line);
            }
            item.trim_extra_lines();
        }
        let mut old = self.items.set_item(index, item);
        old.detach();
        self.update_addresses();
        self.update_label_address();
        self.update_source_addresses(sources);
        Some(new_id)
    }

    /// Single forward pass: assigns every address, recomputes the trailing
    /// alignment and reports the derived header fields.
    pub fn update_addresses(&mut self) -> AddressSummary {
        let mut address = 0u32;
        let mut outs = 0u16;
        for ins in self.items.iter_mut() {
            ins.set_address(address);
            address += ins.code_units();
            let out = ins.out_size();
            if out > outs {
                outs = out;
            }
        }
        self.align.align(address as usize * 2);
        AddressSummary {
            code_units: address,
            outs,
        }
    }

    /// Read-only recompute of the derived header fields.
    pub fn address_summary(&self) -> AddressSummary {
        let mut code_units = 0u32;
        let mut outs = 0u16;
        for ins in self.items.iter() {
            code_units += ins.code_units();
            let out = ins.out_size();
            if out > outs {
                outs = out;
            }
        }
        AddressSummary { code_units, outs }
    }

    /// Second pass after an address recompute: every attached label tells
    /// its source instruction to re-encode the relative offset it carries.
    /// Plain branch offsets go first so switch payloads are reachable
    /// through their refreshed offsets when case targets are written back.
    pub fn update_label_address(&mut self) {
        let mut branch_updates: Vec<(InsId, u32)> = Vec::new();
        let mut case_updates: Vec<(InsId, u16, u32)> = Vec::new();
        for ins in self.items.iter() {
            let target_address = ins.address();
            for line in ins.extra_lines() {
                if let ExtraLine::Label(label) = line {
                    match label.kind {
                        LabelKind::PackedCase(case) | LabelKind::SparseCase(case) => {
                            case_updates.push((label.source, case, target_address));
                        }
                        _ => branch_updates.push((label.source, target_address)),
                    }
                }
            }
        }
        for (source, target) in branch_updates {
            if let Some(index) = self.index_of(source) {
                if let Some(ins) = self.items.get_mut(index) {
                    if !ins.set_target_address(target) {
                        warn!(
                            "branch offset overflow retargeting {} to {:#x}",
                            ins.name(),
                            target
                        );
                    }
                }
            }
        }
        for (source, case, target) in case_updates {
            let (source_address, payload_address) = match self
                .index_of(source)
                .and_then(|index| self.items.get(index))
            {
                Some(ins) => match ins.target_address() {
                    Some(payload_address) => (ins.address(), payload_address),
                    None => continue,
                },
                None => continue,
            };
            let relative = (target as i64 - source_address as i64) as i32;
            if let Some(payload_index) = self.at_address(payload_address) {
                if let Some(payload) = self.items.get_mut(payload_index) {
                    payload.set_payload_target(case as usize, relative);
                }
            }
        }
    }

    /// Third pass after an address recompute: each try/debug line carries
    /// the identity of the provider record it came from, so the refreshed
    /// address of the instruction it is attached to is written back into
    /// that record. A try-end marker recomputes the region length from the
    /// already-refreshed start; iteration order guarantees the start marker
    /// is visited first.
    fn update_source_addresses(&self, sources: &mut ExtraLineSources) {
        for ins in self.items.iter() {
            let address = ins.address();
            for line in ins.extra_lines() {
                match line {
                    ExtraLine::TryStart { try_id, .. } => {
                        if let Some(region) = sources.tries.get_mut(*try_id as usize) {
                            region.start_address = address;
                        }
                    }
                    ExtraLine::TryEnd { try_id } => {
                        if let Some(region) = sources.tries.get_mut(*try_id as usize) {
                            region.code_units = address.saturating_sub(region.start_address);
                        }
                    }
                    ExtraLine::Handler {
                        try_id, handler_id, ..
                    } => {
                        let handler = sources
                            .tries
                            .get_mut(*try_id as usize)
                            .and_then(|region| region.handlers.get_mut(*handler_id as usize));
                        if let Some(handler) = handler {
                            handler.handler_address = address;
                        }
                    }
                    ExtraLine::Debug { debug_id, .. } => {
                        if let Some(element) = sources.debug.get_mut(*debug_id as usize) {
                            element.target_address = address;
                        }
                    }
                    _ => {}
                }
            }
        }
    }

    fn have_extra_lines(&self) -> bool {
        self.items.iter().any(|ins| ins.has_extra_lines())
    }

    fn clear_extra_lines(&mut self) {
        for ins in self.items.iter_mut() {
            ins.clear_extra_lines();
        }
    }

    /// Lazy construction of the decoration layer. Short-circuits when any
    /// instruction already carries lines; callers that need a fresh view
    /// use [`InstructionList::rebuild_extra_lines`].
    pub fn build_extra_lines(&mut self, sources: &mut ExtraLineSources) {
        if self.have_extra_lines() {
            return;
        }
        self.build_labels();
        self.build_try_blocks(sources.tries);
        self.build_debug_info(sources.debug);
        for ins in self.items.iter_mut() {
            ins.trim_extra_lines();
        }
    }

    pub fn rebuild_extra_lines(&mut self, sources: &mut ExtraLineSources) {
        self.clear_extra_lines();
        self.build_extra_lines(sources);
    }

    fn build_labels(&mut self) {
        let mut pending: Vec<(u32, ExtraLine)> = Vec::new();
        for ins in self.items.iter() {
            let kind = match ins.label_kind() {
                Some(kind) => kind,
                None => continue,
            };
            let target = match ins.target_address() {
                Some(target) => target,
                None => continue,
            };
            pending.push((
                target,
                ExtraLine::Label(Label {
                    kind,
                    source: ins.id(),
                    target_address: target,
                }),
            ));
            if !matches!(kind, LabelKind::PackedData | LabelKind::SparseData) {
                continue;
            }
            // switch case targets live in the payload, relative to the
            // switch instruction itself
            let payload_targets = self
                .at_address(target)
                .and_then(|index| self.items.get(index))
                .and_then(|payload| payload.payload_targets());
            if let Some(targets) = payload_targets {
                for (case, relative) in targets.iter().enumerate() {
                    let case_kind = if kind == LabelKind::PackedData {
                        LabelKind::PackedCase(case as u16)
                    } else {
                        LabelKind::SparseCase(case as u16)
                    };
                    let case_target = (ins.address() as i64 + *relative as i64) as u32;
                    pending.push((
                        case_target,
                        ExtraLine::Label(Label {
                            kind: case_kind,
                            source: ins.id(),
                            target_address: case_target,
                        }),
                    ));
                }
            }
        }
        self.attach_lines(pending);
    }

    fn build_try_blocks(&mut self, tries: &[TryRegion]) {
        let mut pending = Vec::new();
        for (try_id, region) in tries.iter().enumerate() {
            pending.extend(region.lines(try_id as u16));
        }
        self.attach_lines(pending);
    }

    fn build_debug_info(&mut self, debug: &[DebugElement]) {
        let pending = debug
            .iter()
            .enumerate()
            .map(|(debug_id, element)| {
                (
                    element.target_address,
                    ExtraLine::Debug {
                        debug_id: debug_id as u16,
                        element: element.clone(),
                    },
                )
            })
            .collect();
        self.attach_lines(pending);
    }

    /// Attaches each line to the instruction at its exact target address.
    /// Unresolved lines are dropped silently.
    fn attach_lines(&mut self, pending: Vec<(u32, ExtraLine)>) {
        for (target, line) in pending {
            if let Some(index) = self.at_address(target) {
                if let Some(ins) = self.items.get_mut(index) {
                    ins.add_extra_line(line);
                }
            }
        }
    }

    /// Decodes the declared region: one opcode + operand block at a time,
    /// each instruction's address being its code-unit offset from the
    /// region start. A boundary mismatch is recovered by forcing the
    /// cursor to the expected end; malformed input in the wild makes this
    /// an anomaly, not a failure. Trailing alignment padding is skipped.
    pub fn read_bytes(
        &mut self,
        bytes: &[u8],
        ix: &mut usize,
        insn_code_units: u32,
    ) -> Result<(), DexError> {
        let zero_position = *ix;
        let end_position = zero_position + insn_code_units as usize * 2;
        if bytes.len() < end_position {
            fail!(
                "instruction region of {} code units exceeds the stream length",
                insn_code_units
            );
        }
        self.items = BlockArray::new();
        while *ix < end_position {
            let start = *ix;
            let mut ins = Ins::read(bytes, ix)?;
            ins.set_address(((start - zero_position) / 2) as u32);
            self.assign_id(&mut ins);
            self.items.push(ins);
        }
        if *ix != end_position {
            // should not happen with well-formed input
            warn!(
                "instruction region boundary mismatch, seeking from {} to expected end {}",
                *ix, end_position
            );
            *ix = end_position;
        }
        let total_read = *ix - zero_position;
        self.align.align(total_read);
        *ix += self.align.size();
        Ok(())
    }

    /// Re-encodes the whole stream plus trailing padding. An unmodified
    /// read followed by a write is byte-exact.
    pub fn write(&self, buffer: &mut Vec<u8>) -> usize {
        let mut c = 0;
        for ins in self.items.iter() {
            c += ins.write(buffer);
        }
        c += self.align.write(buffer);
        c
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Ins> {
        self.items.iter()
    }

    /// Instructions with the given opcode value.
    pub fn iter_opcode(&self, opcode_value: u16) -> impl Iterator<Item = &Ins> + '_ {
        self.iter()
            .filter(move |ins| ins.opcode_value() == opcode_value)
    }

    /// Live slice by index, clamped to the list bounds.
    pub fn iter_range(&self, start: usize, count: usize) -> std::slice::Iter<'_, Ins> {
        let len = self.items.len();
        let start = start.min(len);
        let end = start.saturating_add(count).min(len);
        self.items.as_slice()[start..end].iter()
    }

    /// Instructions covering `code_units` code units from `start_address`.
    /// Both endpoints must resolve (the region end may be the method end);
    /// otherwise the iterator is empty.
    pub fn iter_address_range(
        &self,
        start_address: u32,
        code_units: u32,
    ) -> std::slice::Iter<'_, Ins> {
        let slice: &[Ins] = match self.at_address(start_address) {
            Some(start_index) => {
                let end_address = start_address + code_units;
                let end_index = if end_address == self.address_summary().code_units {
                    self.items.len()
                } else {
                    match self.at_address(end_address) {
                        Some(end_index) => end_index,
                        None => start_index,
                    }
                };
                &self.items.as_slice()[start_index..end_index]
            }
            None => &[],
        };
        slice.iter()
    }

    /// One formatted line per instruction, preceded by its extra lines.
    /// The caller builds extra lines first; label names come from the
    /// decorated instruction's current address.
    pub fn append_smali(&self, out: &mut String) {
        for ins in self.items.iter() {
            for line in ins.extra_lines() {
                out.push_str("    ");
                match line {
                    ExtraLine::Label(label) => out.push_str(&label.kind.name(ins.address())),
                    other => out.push_str(&other.smali()),
                }
                out.push('\n');
            }
            out.push_str("    ");
            out.push_str(&ins.smali());
            out.push('\n');
        }
    }
}

impl Default for InstructionList {
    fn default() -> Self {
        Self::new()
    }
}

impl Block for InstructionList {
    fn size(&self) -> usize {
        self.items.size() + self.align.size()
    }

    fn refresh(&mut self, position: usize) -> usize {
        let end = self.items.refresh(position);
        // post-layout fix-up: padding depends on where the stream ends
        self.align.refresh(end)
    }

    fn visit_integers(&mut self, visitor: &mut dyn IntegerVisitor) {
        self.items.visit_integers(visitor);
    }
}
