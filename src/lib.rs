//! # Dexlist
//!
//! A library for byte-exact structural editing of Dalvik (DEX) method
//! bytecode: decode a method's instruction region, insert, remove and
//! replace instructions while every branch target, switch case, try region
//! and alignment padding stays correct, and write the result back.
//!
//! The editing surface is [`dex::code_item::CodeItem`]; the engine behind
//! it is [`dex::ins_list::InstructionList`].
//!
//! # Examples
//!
//! ```
//! use dexlist::dex::code_item::CodeItem;
//! use dexlist::dex::ins::{Ins, Operands};
//! use dexlist::dex::opcodes;
//!
//! let mut code = CodeItem::new(2, 1);
//! let op = opcodes::for_name("const/16").unwrap();
//! let ins = Ins::with_operands(op, Operands::RegLit16 { a: 0, lit: 7 }).unwrap();
//! code.push(ins);
//! assert_eq!(code.insns_code_units(), 2);
//! ```

pub mod dex;
mod tests;

pub use crate::dex::error::DexError;
