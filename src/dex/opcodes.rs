//! The Dalvik opcode registry.
//!
//! One immutable, process-wide table initialized on first use. Each entry
//! records the mnemonic, the operand encoding format, capability flags and
//! which constant-pool table an index operand points into. Opcode values
//! that only exist from a given API level carry that constraint as a range
//! map, so the same registry serves version-gated lookups.

use bitflags::bitflags;
use once_cell::sync::Lazy;
use rangemap::RangeInclusiveMap;
use std::collections::HashMap;
use std::ops::RangeInclusive;

/// Instruction operand encoding formats. The name encodes size in code
/// units, register/operand count and operand kind, per the dex bytecode
/// format list (e.g. `21c` = 2 units, 1 register, constant-pool index).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum Format {
    Format10x,
    Format12x,
    Format11n,
    Format11x,
    Format10t,
    Format20t,
    Format22x,
    Format21t,
    Format21s,
    Format21h,
    Format21c,
    Format23x,
    Format22b,
    Format22t,
    Format22s,
    Format22c,
    Format30t,
    Format32x,
    Format31i,
    Format31t,
    Format31c,
    Format35c,
    Format3rc,
    Format45cc,
    Format4rcc,
    Format51l,
    PackedSwitchPayload,
    SparseSwitchPayload,
    ArrayDataPayload,
}

impl Format {
    /// Fixed size in 2-byte code units; `None` for the variable-length
    /// payload pseudo-formats.
    pub fn code_units(self) -> Option<u32> {
        match self {
            Format::Format10x
            | Format::Format12x
            | Format::Format11n
            | Format::Format11x
            | Format::Format10t => Some(1),
            Format::Format20t
            | Format::Format22x
            | Format::Format21t
            | Format::Format21s
            | Format::Format21h
            | Format::Format21c
            | Format::Format23x
            | Format::Format22b
            | Format::Format22t
            | Format::Format22s
            | Format::Format22c => Some(2),
            Format::Format30t
            | Format::Format32x
            | Format::Format31i
            | Format::Format31t
            | Format::Format31c
            | Format::Format35c
            | Format::Format3rc => Some(3),
            Format::Format45cc | Format::Format4rcc => Some(4),
            Format::Format51l => Some(5),
            Format::PackedSwitchPayload
            | Format::SparseSwitchPayload
            | Format::ArrayDataPayload => None,
        }
    }

    pub fn is_payload(self) -> bool {
        self.code_units().is_none()
    }
}

/// Which pool an index operand references.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum ReferenceType {
    None,
    String,
    Type,
    Field,
    Method,
    MethodProto,
    MethodHandle,
    CallSite,
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OpcodeFlags: u32 {
        const CAN_THROW = 0x1;
        const CAN_CONTINUE = 0x4;
        const SETS_RESULT = 0x8;
        const SETS_REGISTER = 0x10;
        const SETS_WIDE_REGISTER = 0x20;
        const CAN_BRANCH = 0x40;
    }
}

/// Registry entry for one opcode.
pub struct Opcode {
    pub name: &'static str,
    pub reference_type: ReferenceType,
    pub reference_type2: Option<ReferenceType>,
    pub format: Format,
    pub flags: OpcodeFlags,
    pub api_to_value_map: RangeInclusiveMap<i32, u16>,
}

const ALL_APIS: RangeInclusive<i32> = 1..=i32::MAX;

/// API level assumed when a caller does not care about version gating.
pub const LATEST_API: i32 = 34;

impl Opcode {
    fn with_api(
        api_range: RangeInclusive<i32>,
        value: u16,
        name: &'static str,
        reference_type: ReferenceType,
        reference_type2: Option<ReferenceType>,
        format: Format,
        flags: OpcodeFlags,
    ) -> Self {
        let mut api_to_value_map = RangeInclusiveMap::new();
        api_to_value_map.insert(api_range, value);
        Opcode {
            name,
            reference_type,
            reference_type2,
            format,
            flags,
            api_to_value_map,
        }
    }

    fn plain(value: u16, name: &'static str, format: Format, flags: OpcodeFlags) -> Self {
        Self::with_api(ALL_APIS, value, name, ReferenceType::None, None, format, flags)
    }

    fn refop(
        value: u16,
        name: &'static str,
        reference_type: ReferenceType,
        format: Format,
        flags: OpcodeFlags,
    ) -> Self {
        Self::with_api(ALL_APIS, value, name, reference_type, None, format, flags)
    }

    /// The binary value at [`LATEST_API`].
    pub fn value(&self) -> Option<u16> {
        self.value_for_api(LATEST_API)
    }

    /// The binary value at the given API level, or `None` when the opcode
    /// does not exist there.
    pub fn value_for_api(&self, api: i32) -> Option<u16> {
        self.api_to_value_map.get(&api).copied()
    }

    pub fn is_payload(&self) -> bool {
        self.format.is_payload()
    }
}

/// Raw binary tag to registry entry. Payload pseudo-opcodes are keyed by
/// their full first code unit (0x0100, 0x0200, 0x0300).
pub fn for_value(value: u16) -> Option<&'static Opcode> {
    BY_VALUE.get(&value).copied()
}

pub fn for_name(name: &str) -> Option<&'static Opcode> {
    BY_NAME.get(name).copied()
}

pub fn nop() -> &'static Opcode {
    for_value(0x00).unwrap()
}

pub fn all() -> &'static [Opcode] {
    &OPCODES
}

static BY_VALUE: Lazy<HashMap<u16, &'static Opcode>> = Lazy::new(|| {
    let mut map = HashMap::new();
    for op in OPCODES.iter() {
        if let Some(value) = op.value() {
            map.insert(value, op);
        }
    }
    map
});

static BY_NAME: Lazy<HashMap<&'static str, &'static Opcode>> = Lazy::new(|| {
    OPCODES.iter().map(|op| (op.name, op)).collect()
});

static OPCODES: Lazy<Vec<Opcode>> = Lazy::new(|| {
    use Format::*;
    use ReferenceType as R;

    let cont = OpcodeFlags::CAN_CONTINUE;
    let set = OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_REGISTER;
    let setw = set | OpcodeFlags::SETS_WIDE_REGISTER;
    let br = OpcodeFlags::CAN_BRANCH;
    let brc = OpcodeFlags::CAN_CONTINUE | OpcodeFlags::CAN_BRANCH;
    let thr = OpcodeFlags::CAN_THROW;
    let set_t = set | thr;
    let setw_t = setw | thr;
    let invoke = OpcodeFlags::CAN_CONTINUE | OpcodeFlags::CAN_THROW | OpcodeFlags::SETS_RESULT;
    let none = OpcodeFlags::empty();

    vec![
        Opcode::plain(0x00, "nop", Format10x, cont),
        Opcode::plain(0x01, "move", Format12x, set),
        Opcode::plain(0x02, "move/from16", Format22x, set),
        Opcode::plain(0x03, "move/16", Format32x, set),
        Opcode::plain(0x04, "move-wide", Format12x, setw),
        Opcode::plain(0x05, "move-wide/from16", Format22x, setw),
        Opcode::plain(0x06, "move-wide/16", Format32x, setw),
        Opcode::plain(0x07, "move-object", Format12x, set),
        Opcode::plain(0x08, "move-object/from16", Format22x, set),
        Opcode::plain(0x09, "move-object/16", Format32x, set),
        Opcode::plain(0x0a, "move-result", Format11x, set),
        Opcode::plain(0x0b, "move-result-wide", Format11x, setw),
        Opcode::plain(0x0c, "move-result-object", Format11x, set),
        Opcode::plain(0x0d, "move-exception", Format11x, set),
        Opcode::plain(0x0e, "return-void", Format10x, none),
        Opcode::plain(0x0f, "return", Format11x, none),
        Opcode::plain(0x10, "return-wide", Format11x, none),
        Opcode::plain(0x11, "return-object", Format11x, none),
        Opcode::plain(0x12, "const/4", Format11n, set),
        Opcode::plain(0x13, "const/16", Format21s, set),
        Opcode::plain(0x14, "const", Format31i, set),
        Opcode::plain(0x15, "const/high16", Format21h, set),
        Opcode::plain(0x16, "const-wide/16", Format21s, setw),
        Opcode::plain(0x17, "const-wide/32", Format31i, setw),
        Opcode::plain(0x18, "const-wide", Format51l, setw),
        Opcode::plain(0x19, "const-wide/high16", Format21h, setw),
        Opcode::refop(0x1a, "const-string", R::String, Format21c, set_t),
        Opcode::refop(0x1b, "const-string/jumbo", R::String, Format31c, set_t),
        Opcode::refop(0x1c, "const-class", R::Type, Format21c, set_t),
        Opcode::plain(0x1d, "monitor-enter", Format11x, cont | thr),
        Opcode::plain(0x1e, "monitor-exit", Format11x, cont | thr),
        Opcode::refop(0x1f, "check-cast", R::Type, Format21c, set_t),
        Opcode::refop(0x20, "instance-of", R::Type, Format22c, set_t),
        Opcode::plain(0x21, "array-length", Format12x, set_t),
        Opcode::refop(0x22, "new-instance", R::Type, Format21c, set_t),
        Opcode::refop(0x23, "new-array", R::Type, Format22c, set_t),
        Opcode::refop(0x24, "filled-new-array", R::Type, Format35c, invoke),
        Opcode::refop(0x25, "filled-new-array/range", R::Type, Format3rc, invoke),
        Opcode::plain(0x26, "fill-array-data", Format31t, cont | thr),
        Opcode::plain(0x27, "throw", Format11x, thr),
        Opcode::plain(0x28, "goto", Format10t, br),
        Opcode::plain(0x29, "goto/16", Format20t, br),
        Opcode::plain(0x2a, "goto/32", Format30t, br),
        Opcode::plain(0x2b, "packed-switch", Format31t, brc),
        Opcode::plain(0x2c, "sparse-switch", Format31t, brc),
        Opcode::plain(0x2d, "cmpl-float", Format23x, set),
        Opcode::plain(0x2e, "cmpg-float", Format23x, set),
        Opcode::plain(0x2f, "cmpl-double", Format23x, set),
        Opcode::plain(0x30, "cmpg-double", Format23x, set),
        Opcode::plain(0x31, "cmp-long", Format23x, set),
        Opcode::plain(0x32, "if-eq", Format22t, brc),
        Opcode::plain(0x33, "if-ne", Format22t, brc),
        Opcode::plain(0x34, "if-lt", Format22t, brc),
        Opcode::plain(0x35, "if-ge", Format22t, brc),
        Opcode::plain(0x36, "if-gt", Format22t, brc),
        Opcode::plain(0x37, "if-le", Format22t, brc),
        Opcode::plain(0x38, "if-eqz", Format21t, brc),
        Opcode::plain(0x39, "if-nez", Format21t, brc),
        Opcode::plain(0x3a, "if-ltz", Format21t, brc),
        Opcode::plain(0x3b, "if-gez", Format21t, brc),
        Opcode::plain(0x3c, "if-gtz", Format21t, brc),
        Opcode::plain(0x3d, "if-lez", Format21t, brc),
        Opcode::plain(0x44, "aget", Format23x, set_t),
        Opcode::plain(0x45, "aget-wide", Format23x, setw_t),
        Opcode::plain(0x46, "aget-object", Format23x, set_t),
        Opcode::plain(0x47, "aget-boolean", Format23x, set_t),
        Opcode::plain(0x48, "aget-byte", Format23x, set_t),
        Opcode::plain(0x49, "aget-char", Format23x, set_t),
        Opcode::plain(0x4a, "aget-short", Format23x, set_t),
        Opcode::plain(0x4b, "aput", Format23x, cont | thr),
        Opcode::plain(0x4c, "aput-wide", Format23x, cont | thr),
        Opcode::plain(0x4d, "aput-object", Format23x, cont | thr),
        Opcode::plain(0x4e, "aput-boolean", Format23x, cont | thr),
        Opcode::plain(0x4f, "aput-byte", Format23x, cont | thr),
        Opcode::plain(0x50, "aput-char", Format23x, cont | thr),
        Opcode::plain(0x51, "aput-short", Format23x, cont | thr),
        Opcode::refop(0x52, "iget", R::Field, Format22c, set_t),
        Opcode::refop(0x53, "iget-wide", R::Field, Format22c, setw_t),
        Opcode::refop(0x54, "iget-object", R::Field, Format22c, set_t),
        Opcode::refop(0x55, "iget-boolean", R::Field, Format22c, set_t),
        Opcode::refop(0x56, "iget-byte", R::Field, Format22c, set_t),
        Opcode::refop(0x57, "iget-char", R::Field, Format22c, set_t),
        Opcode::refop(0x58, "iget-short", R::Field, Format22c, set_t),
        Opcode::refop(0x59, "iput", R::Field, Format22c, cont | thr),
        Opcode::refop(0x5a, "iput-wide", R::Field, Format22c, cont | thr),
        Opcode::refop(0x5b, "iput-object", R::Field, Format22c, cont | thr),
        Opcode::refop(0x5c, "iput-boolean", R::Field, Format22c, cont | thr),
        Opcode::refop(0x5d, "iput-byte", R::Field, Format22c, cont | thr),
        Opcode::refop(0x5e, "iput-char", R::Field, Format22c, cont | thr),
        Opcode::refop(0x5f, "iput-short", R::Field, Format22c, cont | thr),
        Opcode::refop(0x60, "sget", R::Field, Format21c, set_t),
        Opcode::refop(0x61, "sget-wide", R::Field, Format21c, setw_t),
        Opcode::refop(0x62, "sget-object", R::Field, Format21c, set_t),
        Opcode::refop(0x63, "sget-boolean", R::Field, Format21c, set_t),
        Opcode::refop(0x64, "sget-byte", R::Field, Format21c, set_t),
        Opcode::refop(0x65, "sget-char", R::Field, Format21c, set_t),
        Opcode::refop(0x66, "sget-short", R::Field, Format21c, set_t),
        Opcode::refop(0x67, "sput", R::Field, Format21c, cont | thr),
        Opcode::refop(0x68, "sput-wide", R::Field, Format21c, cont | thr),
        Opcode::refop(0x69, "sput-object", R::Field, Format21c, cont | thr),
        Opcode::refop(0x6a, "sput-boolean", R::Field, Format21c, cont | thr),
        Opcode::refop(0x6b, "sput-byte", R::Field, Format21c, cont | thr),
        Opcode::refop(0x6c, "sput-char", R::Field, Format21c, cont | thr),
        Opcode::refop(0x6d, "sput-short", R::Field, Format21c, cont | thr),
        Opcode::refop(0x6e, "invoke-virtual", R::Method, Format35c, invoke),
        Opcode::refop(0x6f, "invoke-super", R::Method, Format35c, invoke),
        Opcode::refop(0x70, "invoke-direct", R::Method, Format35c, invoke),
        Opcode::refop(0x71, "invoke-static", R::Method, Format35c, invoke),
        Opcode::refop(0x72, "invoke-interface", R::Method, Format35c, invoke),
        Opcode::refop(0x74, "invoke-virtual/range", R::Method, Format3rc, invoke),
        Opcode::refop(0x75, "invoke-super/range", R::Method, Format3rc, invoke),
        Opcode::refop(0x76, "invoke-direct/range", R::Method, Format3rc, invoke),
        Opcode::refop(0x77, "invoke-static/range", R::Method, Format3rc, invoke),
        Opcode::refop(0x78, "invoke-interface/range", R::Method, Format3rc, invoke),
        Opcode::plain(0x7b, "neg-int", Format12x, set),
        Opcode::plain(0x7c, "not-int", Format12x, set),
        Opcode::plain(0x7d, "neg-long", Format12x, setw),
        Opcode::plain(0x7e, "not-long", Format12x, setw),
        Opcode::plain(0x7f, "neg-float", Format12x, set),
        Opcode::plain(0x80, "neg-double", Format12x, setw),
        Opcode::plain(0x81, "int-to-long", Format12x, setw),
        Opcode::plain(0x82, "int-to-float", Format12x, set),
        Opcode::plain(0x83, "int-to-double", Format12x, setw),
        Opcode::plain(0x84, "long-to-int", Format12x, set),
        Opcode::plain(0x85, "long-to-float", Format12x, set),
        Opcode::plain(0x86, "long-to-double", Format12x, setw),
        Opcode::plain(0x87, "float-to-int", Format12x, set),
        Opcode::plain(0x88, "float-to-long", Format12x, setw),
        Opcode::plain(0x89, "float-to-double", Format12x, setw),
        Opcode::plain(0x8a, "double-to-int", Format12x, set),
        Opcode::plain(0x8b, "double-to-long", Format12x, setw),
        Opcode::plain(0x8c, "double-to-float", Format12x, set),
        Opcode::plain(0x8d, "int-to-byte", Format12x, set),
        Opcode::plain(0x8e, "int-to-char", Format12x, set),
        Opcode::plain(0x8f, "int-to-short", Format12x, set),
        Opcode::plain(0x90, "add-int", Format23x, set),
        Opcode::plain(0x91, "sub-int", Format23x, set),
        Opcode::plain(0x92, "mul-int", Format23x, set),
        Opcode::plain(0x93, "div-int", Format23x, set_t),
        Opcode::plain(0x94, "rem-int", Format23x, set_t),
        Opcode::plain(0x95, "and-int", Format23x, set),
        Opcode::plain(0x96, "or-int", Format23x, set),
        Opcode::plain(0x97, "xor-int", Format23x, set),
        Opcode::plain(0x98, "shl-int", Format23x, set),
        Opcode::plain(0x99, "shr-int", Format23x, set),
        Opcode::plain(0x9a, "ushr-int", Format23x, set),
        Opcode::plain(0x9b, "add-long", Format23x, setw),
        Opcode::plain(0x9c, "sub-long", Format23x, setw),
        Opcode::plain(0x9d, "mul-long", Format23x, setw),
        Opcode::plain(0x9e, "div-long", Format23x, setw_t),
        Opcode::plain(0x9f, "rem-long", Format23x, setw_t),
        Opcode::plain(0xa0, "and-long", Format23x, setw),
        Opcode::plain(0xa1, "or-long", Format23x, setw),
        Opcode::plain(0xa2, "xor-long", Format23x, setw),
        Opcode::plain(0xa3, "shl-long", Format23x, setw),
        Opcode::plain(0xa4, "shr-long", Format23x, setw),
        Opcode::plain(0xa5, "ushr-long", Format23x, setw),
        Opcode::plain(0xa6, "add-float", Format23x, set),
        Opcode::plain(0xa7, "sub-float", Format23x, set),
        Opcode::plain(0xa8, "mul-float", Format23x, set),
        Opcode::plain(0xa9, "div-float", Format23x, set),
        Opcode::plain(0xaa, "rem-float", Format23x, set),
        Opcode::plain(0xab, "add-double", Format23x, setw),
        Opcode::plain(0xac, "sub-double", Format23x, setw),
        Opcode::plain(0xad, "mul-double", Format23x, setw),
        Opcode::plain(0xae, "div-double", Format23x, setw),
        Opcode::plain(0xaf, "rem-double", Format23x, setw),
        Opcode::plain(0xb0, "add-int/2addr", Format12x, set),
        Opcode::plain(0xb1, "sub-int/2addr", Format12x, set),
        Opcode::plain(0xb2, "mul-int/2addr", Format12x, set),
        Opcode::plain(0xb3, "div-int/2addr", Format12x, set_t),
        Opcode::plain(0xb4, "rem-int/2addr", Format12x, set_t),
        Opcode::plain(0xb5, "and-int/2addr", Format12x, set),
        Opcode::plain(0xb6, "or-int/2addr", Format12x, set),
        Opcode::plain(0xb7, "xor-int/2addr", Format12x, set),
        Opcode::plain(0xb8, "shl-int/2addr", Format12x, set),
        Opcode::plain(0xb9, "shr-int/2addr", Format12x, set),
        Opcode::plain(0xba, "ushr-int/2addr", Format12x, set),
        Opcode::plain(0xbb, "add-long/2addr", Format12x, setw),
        Opcode::plain(0xbc, "sub-long/2addr", Format12x, setw),
        Opcode::plain(0xbd, "mul-long/2addr", Format12x, setw),
        Opcode::plain(0xbe, "div-long/2addr", Format12x, setw_t),
        Opcode::plain(0xbf, "rem-long/2addr", Format12x, setw_t),
        Opcode::plain(0xc0, "and-long/2addr", Format12x, setw),
        Opcode::plain(0xc1, "or-long/2addr", Format12x, setw),
        Opcode::plain(0xc2, "xor-long/2addr", Format12x, setw),
        Opcode::plain(0xc3, "shl-long/2addr", Format12x, setw),
        Opcode::plain(0xc4, "shr-long/2addr", Format12x, setw),
        Opcode::plain(0xc5, "ushr-long/2addr", Format12x, setw),
        Opcode::plain(0xc6, "add-float/2addr", Format12x, set),
        Opcode::plain(0xc7, "sub-float/2addr", Format12x, set),
        Opcode::plain(0xc8, "mul-float/2addr", Format12x, set),
        Opcode::plain(0xc9, "div-float/2addr", Format12x, set),
        Opcode::plain(0xca, "rem-float/2addr", Format12x, set),
        Opcode::plain(0xcb, "add-double/2addr", Format12x, setw),
        Opcode::plain(0xcc, "sub-double/2addr", Format12x, setw),
        Opcode::plain(0xcd, "mul-double/2addr", Format12x, setw),
        Opcode::plain(0xce, "div-double/2addr", Format12x, setw),
        Opcode::plain(0xcf, "rem-double/2addr", Format12x, setw),
        Opcode::plain(0xd0, "add-int/lit16", Format22s, set),
        Opcode::plain(0xd1, "rsub-int", Format22s, set),
        Opcode::plain(0xd2, "mul-int/lit16", Format22s, set),
        Opcode::plain(0xd3, "div-int/lit16", Format22s, set_t),
        Opcode::plain(0xd4, "rem-int/lit16", Format22s, set_t),
        Opcode::plain(0xd5, "and-int/lit16", Format22s, set),
        Opcode::plain(0xd6, "or-int/lit16", Format22s, set),
        Opcode::plain(0xd7, "xor-int/lit16", Format22s, set),
        Opcode::plain(0xd8, "add-int/lit8", Format22b, set),
        Opcode::plain(0xd9, "rsub-int/lit8", Format22b, set),
        Opcode::plain(0xda, "mul-int/lit8", Format22b, set),
        Opcode::plain(0xdb, "div-int/lit8", Format22b, set_t),
        Opcode::plain(0xdc, "rem-int/lit8", Format22b, set_t),
        Opcode::plain(0xdd, "and-int/lit8", Format22b, set),
        Opcode::plain(0xde, "or-int/lit8", Format22b, set),
        Opcode::plain(0xdf, "xor-int/lit8", Format22b, set),
        Opcode::plain(0xe0, "shl-int/lit8", Format22b, set),
        Opcode::plain(0xe1, "shr-int/lit8", Format22b, set),
        Opcode::plain(0xe2, "ushr-int/lit8", Format22b, set),
        Opcode::with_api(
            26..=i32::MAX,
            0xfa,
            "invoke-polymorphic",
            R::Method,
            Some(R::MethodProto),
            Format45cc,
            invoke,
        ),
        Opcode::with_api(
            26..=i32::MAX,
            0xfb,
            "invoke-polymorphic/range",
            R::Method,
            Some(R::MethodProto),
            Format4rcc,
            invoke,
        ),
        Opcode::with_api(
            26..=i32::MAX,
            0xfc,
            "invoke-custom",
            R::CallSite,
            None,
            Format35c,
            invoke,
        ),
        Opcode::with_api(
            26..=i32::MAX,
            0xfd,
            "invoke-custom/range",
            R::CallSite,
            None,
            Format3rc,
            invoke,
        ),
        Opcode::with_api(
            28..=i32::MAX,
            0xfe,
            "const-method-handle",
            R::MethodHandle,
            None,
            Format21c,
            set_t,
        ),
        Opcode::with_api(
            28..=i32::MAX,
            0xff,
            "const-method-type",
            R::MethodProto,
            None,
            Format21c,
            set_t,
        ),
        // Pseudo-instructions, keyed by the full first code unit.
        Opcode::plain(0x0100, "packed-switch-payload", PackedSwitchPayload, cont),
        Opcode::plain(0x0200, "sparse-switch-payload", SparseSwitchPayload, cont),
        Opcode::plain(0x0300, "array-data-payload", ArrayDataPayload, cont),
    ]
});
