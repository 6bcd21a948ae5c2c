use crate::dex::code_item::CodeItem;
use crate::dex::extra_lines::{CatchHandler, DebugElement, DebugKind, TryRegion};
use crate::dex::ins::{Ins, Operands};
use crate::dex::opcodes;

fn const16(reg: u8, lit: i16) -> Ins {
    Ins::with_operands(
        opcodes::for_name("const/16").unwrap(),
        Operands::RegLit16 { a: reg, lit },
    )
    .unwrap()
}

fn invoke_virtual(regs: Vec<u8>, index: u16) -> Ins {
    Ins::with_operands(
        opcodes::for_name("invoke-virtual").unwrap(),
        Operands::Args { regs, index },
    )
    .unwrap()
}

fn return_void() -> Ins {
    Ins::with_operands(opcodes::for_name("return-void").unwrap(), Operands::None).unwrap()
}

#[test]
fn header_follows_mutations() {
    let mut item = CodeItem::new(2, 1);
    item.push(const16(0, 1));
    item.push(const16(1, 2));
    assert_eq!(item.insns_code_units(), 4);
    assert_eq!(item.outs_size(), 0);

    let call = item.push(invoke_virtual(vec![0, 1], 5));
    assert_eq!(item.insns_code_units(), 7);
    assert_eq!(item.outs_size(), 2);

    // a smaller requirement does not lower the maximum
    item.push(invoke_virtual(vec![0], 6));
    assert_eq!(item.outs_size(), 2);

    assert!(item.remove(call));
    assert_eq!(item.insns_code_units(), 7);
    assert_eq!(item.outs_size(), 1);
}

#[test]
fn insert_retargets_branch_through_owner() {
    let mut item = CodeItem::new(1, 0);
    item.push(const16(0, 1));
    item.push(const16(0, 2));
    let branch = item
        .push(
            Ins::with_operands(
                opcodes::for_name("if-eqz").unwrap(),
                Operands::RegBranch16 { a: 0, offset: -4 },
            )
            .unwrap(),
        );

    item.insert(1, const16(1, 3)).unwrap();

    assert_eq!(item.insns_code_units(), 8);
    let branch_ins = item.instructions().get_by_id(branch).unwrap();
    assert_eq!(branch_ins.address(), 6);
    assert_eq!(branch_ins.target_address(), Some(0));
}

#[test]
fn lonely_guard_removal_through_owner_keeps_region() {
    let mut item = CodeItem::new(1, 0);
    let guarded = item.push(const16(0, 1));
    item.push(const16(0, 2));
    item.push(return_void());
    item.add_try_region(TryRegion {
        start_address: 0,
        code_units: 2,
        handlers: vec![CatchHandler {
            exception: Some("Ljava/lang/Exception;".to_string()),
            handler_address: 4,
        }],
    });

    assert!(item.remove(guarded));

    // substituted by a nop, one code unit shorter
    assert_eq!(item.instructions().len(), 3);
    assert_eq!(item.instructions().get(0).unwrap().name(), "nop");
    assert_eq!(item.insns_code_units(), 4);
}

#[test]
fn forced_removal_through_owner() {
    let mut item = CodeItem::new(1, 0);
    let guarded = item.push(const16(0, 1));
    item.push(const16(0, 2));
    item.push(return_void());
    item.add_try_region(TryRegion {
        start_address: 0,
        code_units: 2,
        handlers: vec![CatchHandler {
            exception: None,
            handler_address: 4,
        }],
    });

    assert!(item.remove_force(guarded));
    assert_eq!(item.instructions().len(), 2);
    assert_eq!(item.insns_code_units(), 3);
}

#[test]
fn try_table_follows_insert_through_owner() {
    let mut item = CodeItem::new(1, 0);
    item.push(const16(0, 1));
    item.push(const16(0, 2));
    item.push(return_void());
    item.add_try_region(TryRegion {
        start_address: 2,
        code_units: 2,
        handlers: vec![CatchHandler {
            exception: None,
            handler_address: 4,
        }],
    });

    item.insert(0, const16(0, 3)).unwrap();

    let region = &item.tries()[0];
    assert_eq!(region.start_address, 4);
    assert_eq!(region.code_units, 2);
    assert_eq!(region.handlers[0].handler_address, 6);
}

#[test]
fn create_next_uses_registry_defaults() {
    let mut item = CodeItem::new(1, 0);
    let id = item
        .create_next(opcodes::for_name("return-void").unwrap())
        .unwrap();
    let ins = item.instructions().get_by_id(id).unwrap();
    assert_eq!(ins.name(), "return-void");
    assert_eq!(item.insns_code_units(), 1);
}

#[test]
fn to_smali_renders_labels_and_directives() {
    let mut item = CodeItem::new(1, 0);
    item.push(const16(0, 1));
    item.push(
        Ins::with_operands(
            opcodes::for_name("if-eqz").unwrap(),
            Operands::RegBranch16 { a: 0, offset: -2 },
        )
        .unwrap(),
    );
    item.push(return_void());
    item.add_try_region(TryRegion {
        start_address: 0,
        code_units: 4,
        handlers: vec![CatchHandler {
            exception: Some("Ljava/lang/Exception;".to_string()),
            handler_address: 4,
        }],
    });
    item.add_debug_element(DebugElement {
        target_address: 0,
        kind: DebugKind::LineNumber(12),
    });

    let smali = item.to_smali();

    assert!(smali.contains(".registers 1"));
    assert!(smali.contains(":cond_0"));
    assert!(smali.contains("if-eqz v0, :cond_0"));
    assert!(smali.contains(":try_start_0"));
    assert!(smali.contains(".catch Ljava/lang/Exception;"));
    assert!(smali.contains(".line 12"));
}
