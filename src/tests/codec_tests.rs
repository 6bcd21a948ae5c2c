use crate::dex::code_item::CodeItem;
use crate::dex::extra_lines::{CatchHandler, TryRegion};
use crate::dex::ins_list::InstructionList;

#[test]
fn list_roundtrip_is_byte_exact_with_padding() {
    // const/16 v0, 5; return-void; two padding bytes to the 4-byte boundary
    let bytes = [0x13, 0x00, 0x05, 0x00, 0x0e, 0x00, 0x00, 0x00];
    let mut list = InstructionList::new();
    let mut ix = 0;
    list.read_bytes(&bytes, &mut ix, 3).unwrap();
    assert_eq!(ix, bytes.len());
    assert_eq!(list.len(), 2);
    assert_eq!(list.align().size(), 2);

    let mut out = Vec::new();
    let written = list.write(&mut out);
    assert_eq!(written, bytes.len());
    assert_eq!(out, bytes);
}

#[test]
fn list_roundtrip_even_units_has_no_padding() {
    // const/16 v0, 5; const/16 v1, 6
    let bytes = [0x13, 0x00, 0x05, 0x00, 0x13, 0x01, 0x06, 0x00];
    let mut list = InstructionList::new();
    let mut ix = 0;
    list.read_bytes(&bytes, &mut ix, 4).unwrap();
    assert_eq!(ix, bytes.len());
    assert_eq!(list.align().size(), 0);

    let mut out = Vec::new();
    list.write(&mut out);
    assert_eq!(out, bytes);
}

#[test]
fn list_read_assigns_addresses_from_region_start() {
    let bytes = [0x13, 0x00, 0x05, 0x00, 0x28, 0x01, 0x0e, 0x00];
    let mut list = InstructionList::new();
    let mut ix = 0;
    list.read_bytes(&bytes, &mut ix, 4).unwrap();
    let addresses: Vec<u32> = list.iter().map(|ins| ins.address()).collect();
    assert_eq!(addresses, vec![0, 2, 3]);
}

#[test]
fn list_read_recovers_from_boundary_overrun() {
    // goto/32 is 3 code units but the region declares 2
    let bytes = [0x2a, 0x00, 0x04, 0x00, 0x00, 0x00];
    let mut list = InstructionList::new();
    let mut ix = 0;
    list.read_bytes(&bytes, &mut ix, 2).unwrap();
    // the cursor is forced back to the declared region end
    assert_eq!(ix, 4);
    assert_eq!(list.len(), 1);
}

#[test]
fn list_read_rejects_truncated_region() {
    let bytes = [0x13, 0x00];
    let mut list = InstructionList::new();
    let mut ix = 0;
    assert!(list.read_bytes(&bytes, &mut ix, 3).is_err());
}

#[test]
fn code_item_roundtrip_is_byte_exact() {
    let bytes = [
        0x02, 0x00, // registers_size
        0x01, 0x00, // ins_size
        0x00, 0x00, // outs_size
        0x00, 0x00, // tries_size
        0x00, 0x00, 0x00, 0x00, // debug_info_off
        0x03, 0x00, 0x00, 0x00, // insns code units
        0x13, 0x00, 0x05, 0x00, // const/16 v0, 5
        0x0e, 0x00, // return-void
        0x00, 0x00, // padding
    ];
    let mut ix = 0;
    let item = CodeItem::read_bytes(&bytes, &mut ix, &|_| None).unwrap();
    assert_eq!(ix, bytes.len());
    assert_eq!(item.registers_size(), 2);
    assert_eq!(item.insns_code_units(), 3);
    assert_eq!(item.instructions().len(), 2);

    let mut out = Vec::new();
    item.write(&mut out);
    assert_eq!(out, bytes);
}

#[test]
fn code_item_reads_typed_handler() {
    let bytes = [
        0x01, 0x00, // registers_size
        0x00, 0x00, // ins_size
        0x00, 0x00, // outs_size
        0x01, 0x00, // tries_size
        0x00, 0x00, 0x00, 0x00, // debug_info_off
        0x04, 0x00, 0x00, 0x00, // insns code units
        0x13, 0x00, 0x05, 0x00, // const/16 v0, 5
        0x13, 0x01, 0x06, 0x00, // const/16 v1, 6
        0x00, 0x00, 0x00, 0x00, // try start address
        0x02, 0x00, // try code units
        0x01, 0x00, // handler offset
        0x01, // handler list count
        0x01, // handler size (one typed, no catch-all)
        0x03, // type index
        0x02, // handler address
    ];
    let mut ix = 0;
    let names = |idx: u32| {
        if idx == 3 {
            Some("Ljava/lang/Exception;".to_string())
        } else {
            None
        }
    };
    let item = CodeItem::read_bytes(&bytes, &mut ix, &names).unwrap();
    // the cursor ends past the handler pool, not at the list count
    assert_eq!(ix, bytes.len());
    assert_eq!(
        item.tries(),
        &[TryRegion {
            start_address: 0,
            code_units: 2,
            handlers: vec![CatchHandler {
                exception: Some("Ljava/lang/Exception;".to_string()),
                handler_address: 2,
            }],
        }]
    );
}

#[test]
fn code_item_reads_catch_all_handler() {
    let bytes = [
        0x01, 0x00, // registers_size
        0x00, 0x00, // ins_size
        0x00, 0x00, // outs_size
        0x01, 0x00, // tries_size
        0x00, 0x00, 0x00, 0x00, // debug_info_off
        0x04, 0x00, 0x00, 0x00, // insns code units
        0x13, 0x00, 0x05, 0x00, // const/16 v0, 5
        0x13, 0x01, 0x06, 0x00, // const/16 v1, 6
        0x00, 0x00, 0x00, 0x00, // try start address
        0x02, 0x00, // try code units
        0x01, 0x00, // handler offset
        0x01, // handler list count
        0x00, // handler size 0 (catch-all only)
        0x02, // catch-all address
    ];
    let mut ix = 0;
    let item = CodeItem::read_bytes(&bytes, &mut ix, &|_| None).unwrap();
    assert_eq!(ix, bytes.len());
    let handlers = &item.tries()[0].handlers;
    assert_eq!(handlers.len(), 1);
    assert_eq!(handlers[0].exception, None);
    assert_eq!(handlers[0].handler_address, 2);
}
