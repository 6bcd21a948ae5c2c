use crate::dex::block::{Block, IntegerVisitor};
use crate::dex::extra_lines::{
    CatchHandler, DebugElement, DebugKind, ExtraLine, ExtraLineSources, LabelKind, TryRegion,
};
use crate::dex::ins::{Ins, Operands};
use crate::dex::ins_list::InstructionList;
use crate::dex::opcodes;

fn const16(reg: u8, lit: i16) -> Ins {
    Ins::with_operands(
        opcodes::for_name("const/16").unwrap(),
        Operands::RegLit16 { a: reg, lit },
    )
    .unwrap()
}

fn if_eqz(reg: u8, offset: i16) -> Ins {
    Ins::with_operands(
        opcodes::for_name("if-eqz").unwrap(),
        Operands::RegBranch16 { a: reg, offset },
    )
    .unwrap()
}

fn goto8(offset: i8) -> Ins {
    Ins::with_operands(
        opcodes::for_name("goto").unwrap(),
        Operands::Branch8 { offset },
    )
    .unwrap()
}

fn return_void() -> Ins {
    Ins::with_operands(opcodes::for_name("return-void").unwrap(), Operands::None).unwrap()
}

fn addresses(list: &InstructionList) -> Vec<u32> {
    list.iter().map(|ins| ins.address()).collect()
}

#[test]
fn push_assigns_contiguous_addresses() {
    let mut list = InstructionList::new();
    list.push(const16(0, 1));
    list.push(const16(0, 2));
    list.push(return_void());
    assert_eq!(addresses(&list), vec![0, 2, 4]);
    assert_eq!(list.address_summary().code_units, 5);
}

#[test]
fn padding_tracks_code_units() {
    let mut list = InstructionList::new();
    list.push(const16(0, 1));
    let ret = list.push(return_void());
    // 3 code units, padded to the next 4-byte boundary
    assert_eq!(list.align().size(), 2);
    assert_eq!(list.size(), 8);
    assert!(list.remove(ret, &mut ExtraLineSources::empty()));
    assert_eq!(list.align().size(), 0);
    assert_eq!(list.size(), 4);
}

#[test]
fn insert_shifts_addresses_and_retargets_branch() {
    let mut sources = ExtraLineSources::empty();
    let mut list = InstructionList::new();
    let first = list.push(const16(0, 1));
    list.push(const16(0, 2));
    // branches back to the first instruction: address 4, offset -4
    let branch = list.push(if_eqz(0, -4));
    assert_eq!(addresses(&list), vec![0, 2, 4]);

    let inserted = list.insert(1, const16(1, 3), &mut sources).unwrap();

    assert_eq!(addresses(&list), vec![0, 2, 4, 6]);
    assert_eq!(list.get_by_id(inserted).unwrap().address(), 2);
    let branch_ins = list.get_by_id(branch).unwrap();
    assert_eq!(branch_ins.target_address(), Some(0));
    match branch_ins.operands() {
        Operands::RegBranch16 { offset, .. } => assert_eq!(*offset, -6),
        other => panic!("unexpected operands {:?}", other),
    }
    // the label stayed bound to the original first instruction
    let target = list.get_by_id(first).unwrap();
    assert!(target.extra_lines().iter().any(|line| matches!(
        line,
        ExtraLine::Label(label) if label.kind == LabelKind::Cond && label.source == branch
    )));
}

#[test]
fn insert_before_forward_branch_target() {
    let mut sources = ExtraLineSources::empty();
    let mut list = InstructionList::new();
    let jump = list.push(goto8(1));
    list.push(return_void());

    list.insert(1, const16(0, 9), &mut sources).unwrap();

    let jump_ins = list.get_by_id(jump).unwrap();
    assert_eq!(jump_ins.target_address(), Some(3));
    assert_eq!(list.get(2).unwrap().name(), "return-void");
}

#[test]
fn batch_insert_recomputes_once() {
    let mut sources = ExtraLineSources::empty();
    let mut list = InstructionList::new();
    list.push(const16(0, 1));
    list.push(return_void());

    let ids = list.insert_all(1, vec![const16(1, 2), const16(2, 3)], &mut sources);

    assert_eq!(ids.len(), 2);
    assert_eq!(addresses(&list), vec![0, 2, 4, 6]);
    assert_eq!(list.get_by_id(ids[1]).unwrap().address(), 4);
}

#[test]
fn insert_out_of_bounds_is_rejected() {
    let mut sources = ExtraLineSources::empty();
    let mut list = InstructionList::new();
    list.push(return_void());
    assert!(list.insert(5, const16(0, 1), &mut sources).is_none());
    assert_eq!(list.len(), 1);
}

#[test]
fn remove_missing_id_is_noop() {
    let mut sources = ExtraLineSources::empty();
    let mut list = InstructionList::new();
    list.push(return_void());
    assert!(!list.remove(9999, &mut sources));
    assert_eq!(list.len(), 1);
}

#[test]
fn remove_transfers_extra_lines_to_successor() {
    let mut sources = ExtraLineSources::empty();
    let mut list = InstructionList::new();
    list.push(const16(0, 1));
    let middle = list.push(const16(0, 2));
    // branches to the middle instruction: address 4, offset -2
    let branch = list.push(if_eqz(0, -2));

    assert!(list.remove(middle, &mut sources));

    assert_eq!(addresses(&list), vec![0, 2]);
    // the label moved to the instruction that followed the removed one
    let branch_ins = list.get_by_id(branch).unwrap();
    assert!(branch_ins
        .extra_lines()
        .iter()
        .any(|line| matches!(line, ExtraLine::Label(_))));
    assert_eq!(branch_ins.target_address(), Some(2));
}

fn guarded_list() -> (InstructionList, u32, u32) {
    let mut list = InstructionList::new();
    let guarded = list.push(const16(0, 1));
    let after = list.push(const16(0, 2));
    list.push(return_void());
    (list, guarded, after)
}

fn guard_region() -> TryRegion {
    TryRegion {
        start_address: 0,
        code_units: 2,
        handlers: vec![CatchHandler {
            exception: Some("Ljava/lang/Exception;".to_string()),
            handler_address: 4,
        }],
    }
}

#[test]
fn lonely_try_guard_removal_substitutes_nop() {
    let (mut list, guarded, _) = guarded_list();
    let mut tries = [guard_region()];
    let mut sources = ExtraLineSources {
        tries: &mut tries,
        debug: &mut [],
    };

    assert!(list.remove(guarded, &mut sources));

    assert_eq!(list.len(), 3);
    assert!(!list.contains(guarded));
    assert_eq!(list.get(0).unwrap().name(), "nop");
}

#[test]
fn forced_removal_drops_lonely_guard() {
    let (mut list, guarded, after) = guarded_list();
    let mut tries = [guard_region()];
    let mut sources = ExtraLineSources {
        tries: &mut tries,
        debug: &mut [],
    };

    assert!(list.remove_with(guarded, true, &mut sources));

    assert_eq!(list.len(), 2);
    assert!(!list.contains(guarded));
    // the try-start marker transferred to the next instruction
    let next = list.get_by_id(after).unwrap();
    assert!(next
        .extra_lines()
        .iter()
        .any(|line| matches!(line, ExtraLine::TryStart { .. })));
}

#[test]
fn wide_guard_region_allows_plain_removal() {
    let mut list = InstructionList::new();
    let guarded = list.push(const16(0, 1));
    list.push(const16(0, 2));
    list.push(return_void());
    // region spans both const instructions
    let mut tries = [TryRegion {
        start_address: 0,
        code_units: 4,
        handlers: vec![CatchHandler {
            exception: None,
            handler_address: 4,
        }],
    }];
    let mut sources = ExtraLineSources {
        tries: &mut tries,
        debug: &mut [],
    };

    assert!(list.remove(guarded, &mut sources));
    assert_eq!(list.len(), 2);
    assert_ne!(list.get(0).unwrap().name(), "nop");
    // the region shrank with the removal and the handler anchor moved
    assert_eq!(tries[0].start_address, 0);
    assert_eq!(tries[0].code_units, 2);
    assert_eq!(tries[0].handlers[0].handler_address, 2);
}

#[test]
fn try_region_follows_guarded_instruction_across_insert() {
    let mut list = InstructionList::new();
    list.push(const16(0, 1));
    let guarded = list.push(const16(0, 2));
    list.push(return_void());
    let mut tries = [TryRegion {
        start_address: 2,
        code_units: 2,
        handlers: vec![CatchHandler {
            exception: Some("Ljava/lang/Exception;".to_string()),
            handler_address: 4,
        }],
    }];
    let mut sources = ExtraLineSources {
        tries: &mut tries,
        debug: &mut [],
    };

    list.insert(0, const16(1, 3), &mut sources).unwrap();

    // the record shifted with the instruction it guards
    assert_eq!(tries[0].start_address, 4);
    assert_eq!(tries[0].code_units, 2);
    assert_eq!(tries[0].handlers[0].handler_address, 6);
    // and the start marker stayed on the same instruction
    let guarded_ins = list.get_by_id(guarded).unwrap();
    assert_eq!(guarded_ins.address(), 4);
    assert!(guarded_ins
        .extra_lines()
        .iter()
        .any(|line| matches!(line, ExtraLine::TryStart { .. })));
}

#[test]
fn debug_anchor_follows_instruction_across_insert() {
    let mut list = InstructionList::new();
    list.push(const16(0, 1));
    let anchored = list.push(return_void());
    let mut debug = [DebugElement {
        target_address: 2,
        kind: DebugKind::LineNumber(40),
    }];
    let mut sources = ExtraLineSources {
        tries: &mut [],
        debug: &mut debug,
    };

    list.insert(0, const16(1, 2), &mut sources).unwrap();

    assert_eq!(debug[0].target_address, 4);
    let anchored_ins = list.get_by_id(anchored).unwrap();
    assert_eq!(anchored_ins.address(), 4);
    assert!(anchored_ins
        .extra_lines()
        .iter()
        .any(|line| matches!(line, ExtraLine::Debug { .. })));
}

#[test]
fn replace_preserves_address_and_lines() {
    let mut sources = ExtraLineSources::empty();
    let mut list = InstructionList::new();
    list.push(const16(0, 1));
    let old = list.push(const16(0, 2));
    list.push(if_eqz(0, -2));

    let new_id = list.replace(old, const16(7, 9), &mut sources).unwrap();

    assert!(!list.contains(old));
    let new_ins = list.get_by_id(new_id).unwrap();
    assert_eq!(new_ins.address(), 2);
    assert!(new_ins
        .extra_lines()
        .iter()
        .any(|line| matches!(line, ExtraLine::Label(_))));
}

#[test]
fn switch_case_targets_follow_insert() {
    let mut sources = ExtraLineSources::empty();
    let mut list = InstructionList::new();
    let switch = list
        .push(
            Ins::with_operands(
                opcodes::for_name("packed-switch").unwrap(),
                // payload at address 5
                Operands::RegBranch32 { a: 0, offset: 5 },
            )
            .unwrap(),
        );
    let case_target = list.push(const16(0, 1));
    let payload = list.push(
        Ins::with_operands(
            opcodes::for_value(0x0100).unwrap(),
            Operands::PackedSwitch {
                first_key: 0,
                // case 0 jumps to address 3, relative to the switch
                targets: vec![3],
            },
        )
        .unwrap(),
    );
    assert_eq!(addresses(&list), vec![0, 3, 5]);

    list.insert(1, const16(1, 2), &mut sources).unwrap();

    assert_eq!(addresses(&list), vec![0, 3, 5, 7]);
    let switch_ins = list.get_by_id(switch).unwrap();
    assert_eq!(switch_ins.target_address(), Some(7));
    let payload_ins = list.get_by_id(payload).unwrap();
    assert_eq!(payload_ins.payload_targets(), Some(&[5][..]));
    assert_eq!(list.get_by_id(case_target).unwrap().address(), 5);
}

#[test]
fn build_extra_lines_short_circuits_until_rebuilt() {
    let mut list = InstructionList::new();
    list.push(const16(0, 1));
    list.push(const16(0, 2));
    list.push(if_eqz(0, -4));
    list.build_extra_lines(&mut ExtraLineSources::empty());
    assert!(list.get(0).unwrap().has_extra_lines());

    let mut tries = [guard_region()];
    let mut sources = ExtraLineSources {
        tries: &mut tries,
        debug: &mut [],
    };
    // lines already exist, so the try markers do not appear yet
    list.build_extra_lines(&mut sources);
    assert!(!list
        .iter()
        .flat_map(|ins| ins.extra_lines())
        .any(|line| matches!(line, ExtraLine::TryStart { .. })));

    list.rebuild_extra_lines(&mut sources);
    assert!(list
        .iter()
        .flat_map(|ins| ins.extra_lines())
        .any(|line| matches!(line, ExtraLine::TryStart { .. })));
}

#[test]
fn iter_opcode_filters() {
    let mut list = InstructionList::new();
    list.push(const16(0, 1));
    list.push(return_void());
    list.push(const16(1, 2));
    assert_eq!(list.iter_opcode(0x13).count(), 2);
    assert_eq!(list.iter_opcode(0x0e).count(), 1);
}

#[test]
fn iter_address_range_endpoints() {
    let mut list = InstructionList::new();
    list.push(const16(0, 1));
    list.push(const16(0, 2));
    list.push(return_void());
    // region end may be one past the last instruction
    assert_eq!(list.iter_address_range(2, 3).count(), 2);
    // an end address inside an instruction resolves nothing
    assert_eq!(list.iter_address_range(2, 1).count(), 0);
    // so does a start address inside an instruction
    assert_eq!(list.iter_address_range(1, 2).count(), 0);
}

#[test]
fn iter_range_clamps_to_bounds() {
    let mut list = InstructionList::new();
    list.push(const16(0, 1));
    list.push(return_void());
    assert_eq!(list.iter_range(1, 10).count(), 1);
    assert_eq!(list.iter_range(5, 2).count(), 0);
}

#[test]
fn refresh_and_visitor_forward_through_the_tree() {
    struct Bump;
    impl IntegerVisitor for Bump {
        fn visit(&mut self, value: u32) -> Option<u32> {
            Some(value + 1)
        }
    }
    let mut list = InstructionList::new();
    list.push(
        Ins::with_operands(
            opcodes::for_name("const-string").unwrap(),
            Operands::RegIndex { a: 0, index: 5 },
        )
        .unwrap(),
    );
    list.push(return_void());
    // 3 code units plus 2 padding bytes
    assert_eq!(list.refresh(0), 8);
    list.visit_integers(&mut Bump);
    match list.get(0).unwrap().operands() {
        Operands::RegIndex { index, .. } => assert_eq!(*index, 6),
        other => panic!("unexpected operands {:?}", other),
    }
}

#[test]
fn at_address_requires_exact_match() {
    let mut list = InstructionList::new();
    list.push(const16(0, 1));
    list.push(return_void());
    assert_eq!(list.at_address(2), Some(1));
    assert_eq!(list.at_address(1), None);
    assert_eq!(list.at_address(3), None);
}
