//! The decoration layer attached to instructions: branch labels, try-region
//! markers and debug anchors.
//!
//! Extra lines are not part of an instruction's binary encoding. They are
//! rebuilt from raw target addresses whenever the owning list asks for them,
//! and resolution is always by exact address match against the current
//! instruction sequence. A line whose target address matches no instruction
//! is dropped silently.

use crate::dex::ins::InsId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelKind {
    Goto,
    Cond,
    /// 31t reference to an array-data payload.
    ArrayData,
    /// 31t reference to a packed-switch payload.
    PackedData,
    /// 31t reference to a sparse-switch payload.
    SparseData,
    /// Case target inside a packed-switch payload, by position.
    PackedCase(u16),
    /// Case target inside a sparse-switch payload, by position.
    SparseCase(u16),
}

impl LabelKind {
    /// The label kind produced by a branch or payload-referencing opcode,
    /// or `None` when the opcode carries no target.
    pub fn for_opcode(opcode_value: u16) -> Option<LabelKind> {
        match opcode_value {
            0x26 => Some(LabelKind::ArrayData),
            0x28..=0x2a => Some(LabelKind::Goto),
            0x2b => Some(LabelKind::PackedData),
            0x2c => Some(LabelKind::SparseData),
            0x32..=0x3d => Some(LabelKind::Cond),
            _ => None,
        }
    }

    pub fn name(&self, target_address: u32) -> String {
        match self {
            LabelKind::Goto => format!(":goto_{:x}", target_address),
            LabelKind::Cond => format!(":cond_{:x}", target_address),
            LabelKind::ArrayData => format!(":array_{:x}", target_address),
            LabelKind::PackedData => format!(":pswitch_data_{:x}", target_address),
            LabelKind::SparseData => format!(":sswitch_data_{:x}", target_address),
            LabelKind::PackedCase(_) => format!(":pswitch_{:x}", target_address),
            LabelKind::SparseCase(_) => format!(":sswitch_{:x}", target_address),
        }
    }
}

/// A resolved (or resolvable) jump label. `source` is the identity of the
/// instruction whose encoding carries the offset; the label itself never
/// keeps that instruction alive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Label {
    pub kind: LabelKind,
    pub source: InsId,
    pub target_address: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExtraLine {
    Label(Label),
    TryStart {
        try_id: u16,
        /// Code units guarded by the try region this marker opens. Used by
        /// the sole-guard removal check.
        region_code_units: u32,
    },
    TryEnd {
        try_id: u16,
    },
    /// `.catch` directive, attached at the region's end address.
    Catch {
        try_id: u16,
        exception: Option<String>,
        handler_address: u32,
    },
    /// Handler entry label, attached at the handler address.
    Handler {
        try_id: u16,
        handler_id: u16,
        exception: Option<String>,
    },
    Debug {
        debug_id: u16,
        element: DebugElement,
    },
}

impl ExtraLine {
    /// Emission order when several lines attach to one instruction: close
    /// the previous try region before opening the next, labels in between,
    /// debug anchors last.
    pub(crate) fn sort_order(&self) -> u8 {
        match self {
            ExtraLine::TryEnd { .. } => 0,
            ExtraLine::Catch { .. } => 1,
            ExtraLine::Label(_) => 2,
            ExtraLine::Handler { .. } => 3,
            ExtraLine::TryStart { .. } => 4,
            ExtraLine::Debug { .. } => 5,
        }
    }

    pub fn smali(&self) -> String {
        match self {
            ExtraLine::Label(label) => label.kind.name(label.target_address),
            ExtraLine::TryStart { try_id, .. } => format!(":try_start_{}", try_id),
            ExtraLine::TryEnd { try_id } => format!(":try_end_{}", try_id),
            ExtraLine::Catch {
                try_id,
                exception,
                ..
            } => match exception {
                Some(exc) => format!(
                    ".catch {} {{:try_start_{} .. :try_end_{}}} :catch_{}",
                    exc, try_id, try_id, try_id
                ),
                None => format!(
                    ".catchall {{:try_start_{} .. :try_end_{}}} :catch_{}",
                    try_id, try_id, try_id
                ),
            },
            ExtraLine::Handler { try_id, .. } => format!(":catch_{}", try_id),
            ExtraLine::Debug { element, .. } => element.smali(),
        }
    }
}

/// One catch handler of a try region. `exception` is the handled type
/// descriptor, `None` for a catch-all.
#[derive(Debug, Clone, PartialEq)]
pub struct CatchHandler {
    pub exception: Option<String>,
    pub handler_address: u32,
}

/// Try-block provider record: one guarded region and its handlers. Supplied
/// by the code-item owner during extra-line construction.
#[derive(Debug, Clone, PartialEq)]
pub struct TryRegion {
    pub start_address: u32,
    pub code_units: u32,
    pub handlers: Vec<CatchHandler>,
}

impl TryRegion {
    pub fn end_address(&self) -> u32 {
        self.start_address + self.code_units
    }

    /// The (target address, line) pairs this region contributes.
    pub(crate) fn lines(&self, try_id: u16) -> Vec<(u32, ExtraLine)> {
        let mut out = vec![
            (
                self.start_address,
                ExtraLine::TryStart {
                    try_id,
                    region_code_units: self.code_units,
                },
            ),
            (self.end_address(), ExtraLine::TryEnd { try_id }),
        ];
        for (handler_id, handler) in self.handlers.iter().enumerate() {
            out.push((
                self.end_address(),
                ExtraLine::Catch {
                    try_id,
                    exception: handler.exception.clone(),
                    handler_address: handler.handler_address,
                },
            ));
            out.push((
                handler.handler_address,
                ExtraLine::Handler {
                    try_id,
                    handler_id: handler_id as u16,
                    exception: handler.exception.clone(),
                },
            ));
        }
        out
    }
}

/// Debug-info provider record: one debug event anchored to an address.
#[derive(Debug, Clone, PartialEq)]
pub struct DebugElement {
    pub target_address: u32,
    pub kind: DebugKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DebugKind {
    LineNumber(u32),
    PrologueEnd,
    EpilogueBegin,
    StartLocal { register: u16, name: String },
    EndLocal { register: u16 },
}

impl DebugElement {
    pub fn smali(&self) -> String {
        match &self.kind {
            DebugKind::LineNumber(line) => format!(".line {}", line),
            DebugKind::PrologueEnd => ".prologue".to_string(),
            DebugKind::EpilogueBegin => ".epilogue".to_string(),
            DebugKind::StartLocal { register, name } => {
                format!(".local v{}, \"{}\"", register, name)
            }
            DebugKind::EndLocal { register } => format!(".end local v{}", register),
        }
    }
}

/// Collaborator records for one extra-line build pass. Mutable because an
/// address-shifting mutation writes each attached line's refreshed address
/// back into the owning record before the final rebuild; the records stay
/// keyed to instruction identity, not to stale absolute addresses.
pub struct ExtraLineSources<'a> {
    pub tries: &'a mut [TryRegion],
    pub debug: &'a mut [DebugElement],
}

impl ExtraLineSources<'_> {
    pub fn empty() -> ExtraLineSources<'static> {
        ExtraLineSources {
            tries: &mut [],
            debug: &mut [],
        }
    }
}
