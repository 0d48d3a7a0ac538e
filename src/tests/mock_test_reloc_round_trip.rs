use std::sync::Arc;

use crate::code::object::CodeObject;
use crate::code::reloc::{RelocEntry, MAX_COMPACT_CODE_DELTA};
use crate::code_manager;
use crate::util::constants::CODE_DATA_DISPLACEMENT;
use crate::util::test_util::serial_test;
use crate::util::Value;
use crate::vm::mock_vm::{MockVM, KIND_IMMEDIATE, KIND_LITERAL};
use crate::vm::Generation;
use crate::CMTK;

fn new_code(cmtk: &CMTK<MockVM>) -> Arc<CodeObject> {
    code_manager::create_code_object(
        cmtk,
        0,
        0,
        Value::from_usize(0),
        Value::from_usize(0),
        128,
        Value::from_usize(0),
        None,
    )
    .unwrap()
}

fn fill_table(code: &Arc<CodeObject>, entries: &[RelocEntry]) {
    let mut slots = Vec::new();
    for entry in entries {
        entry.encode(&mut slots);
    }
    code_manager::attach_reloc_table::<MockVM>(code, slots.len());
    for (index, word) in slots.iter().enumerate() {
        code_manager::write_reloc_slot(code, index, *word);
    }
}

#[test]
fn round_trip_compact_and_extended() {
    serial_test(|| {
        MockVM::reset();
        let cmtk = CMTK::<MockVM>::new();
        let code = new_code(&cmtk);

        let first = MockVM::heap_ref(0x10);
        let second = MockVM::heap_ref(0x20);
        let third = MockVM::heap_ref(0x30);
        let big_delta = MAX_COMPACT_CODE_DELTA + 16;
        fill_table(
            &code,
            &[
                RelocEntry::new(
                    KIND_LITERAL,
                    MockVM::intern_literal(first),
                    CODE_DATA_DISPLACEMENT + 4,
                ),
                RelocEntry::new(KIND_LITERAL, MockVM::intern_literal(second), 8),
                // Forced into the extended format by the delta.
                RelocEntry::new(KIND_LITERAL, MockVM::intern_literal(third), big_delta),
            ],
        );

        let refs = code_manager::get_code_refs_with_offsets::<MockVM>(&code);
        assert_eq!(
            refs,
            vec![
                (first, 4),
                (second, 12),
                (third, 12 + big_delta),
            ]
        );
    })
}

#[test]
fn plain_decode_deduplicates_identical_values() {
    serial_test(|| {
        MockVM::reset();
        let cmtk = CMTK::<MockVM>::new();
        let code = new_code(&cmtk);

        let shared = MockVM::heap_ref(0x40);
        let other = MockVM::heap_ref(0x50);
        // The same value is referenced from two sites through two pool
        // slots, so deduplication has to compare values, not item offsets.
        fill_table(
            &code,
            &[
                RelocEntry::new(
                    KIND_LITERAL,
                    MockVM::intern_literal(shared),
                    CODE_DATA_DISPLACEMENT + 8,
                ),
                RelocEntry::new(KIND_LITERAL, MockVM::intern_literal(other), 8),
                RelocEntry::new(KIND_LITERAL, MockVM::intern_literal(shared), 8),
            ],
        );

        assert_eq!(
            code_manager::get_code_refs::<MockVM>(&code),
            vec![shared, other]
        );
        assert_eq!(
            code_manager::get_code_refs_with_offsets::<MockVM>(&code),
            vec![(shared, 8), (other, 16), (shared, 24)]
        );
    })
}

#[test]
fn immediates_are_skipped() {
    serial_test(|| {
        MockVM::reset();
        let cmtk = CMTK::<MockVM>::new();
        let code = new_code(&cmtk);

        let heap = MockVM::heap_ref(0x60);
        fill_table(
            &code,
            &[
                RelocEntry::new(KIND_IMMEDIATE, 7, CODE_DATA_DISPLACEMENT + 4),
                RelocEntry::new(KIND_LITERAL, MockVM::intern_literal(heap), 4),
                RelocEntry::new(
                    KIND_LITERAL,
                    MockVM::intern_literal(MockVM::immediate(99)),
                    4,
                ),
            ],
        );

        assert_eq!(code_manager::get_code_refs::<MockVM>(&code), vec![heap]);
        assert_eq!(
            code_manager::get_code_refs_with_offsets::<MockVM>(&code),
            vec![(heap, 8)]
        );
    })
}

#[test]
fn static_generation_decodes_to_nothing() {
    serial_test(|| {
        MockVM::reset();
        let cmtk = CMTK::<MockVM>::new();
        let code = new_code(&cmtk);

        fill_table(
            &code,
            &[RelocEntry::new(
                KIND_LITERAL,
                MockVM::intern_literal(MockVM::heap_ref(0x70)),
                CODE_DATA_DISPLACEMENT,
            )],
        );
        MockVM::set_generation(&code, Generation::STATIC);

        assert!(code_manager::get_code_refs::<MockVM>(&code).is_empty());
        assert!(code_manager::get_code_refs_with_offsets::<MockVM>(&code).is_empty());
    })
}

#[test]
fn code_without_a_table_decodes_to_nothing() {
    serial_test(|| {
        MockVM::reset();
        let cmtk = CMTK::<MockVM>::new();
        let code = new_code(&cmtk);
        assert!(code_manager::get_code_refs::<MockVM>(&code).is_empty());
        assert!(code_manager::get_code_refs_with_offsets::<MockVM>(&code).is_empty());
    })
}

#[test]
fn random_entry_streams_round_trip() {
    use rand::Rng;

    serial_test(|| {
        MockVM::reset();
        let cmtk = CMTK::<MockVM>::new();
        let mut rng = rand::rng();

        for _ in 0..16 {
            let code = new_code(&cmtk);
            let count = rng.random_range(1..24);
            let mut entries = Vec::new();
            let mut expected = Vec::new();
            let mut abs = 0usize;
            for i in 0..count {
                let value = MockVM::heap_ref(0x1000 + i);
                let delta = if i == 0 {
                    CODE_DATA_DISPLACEMENT + rng.random_range(0..64)
                } else if rng.random_range(0..4) == 0 {
                    // Sprinkle in extended entries.
                    MAX_COMPACT_CODE_DELTA + rng.random_range(1..64)
                } else {
                    rng.random_range(1..64)
                };
                abs += delta;
                entries.push(RelocEntry::new(
                    KIND_LITERAL,
                    MockVM::intern_literal(value),
                    delta,
                ));
                expected.push((value, abs - CODE_DATA_DISPLACEMENT));
            }
            fill_table(&code, &entries);
            assert_eq!(
                code_manager::get_code_refs_with_offsets::<MockVM>(&code),
                expected
            );
        }
    })
}
