use criterion::{black_box, Criterion};

use cmtk::code_manager;
use cmtk::code::reloc::{RelocEntry, MAX_COMPACT_CODE_DELTA};
use cmtk::util::constants::CODE_DATA_DISPLACEMENT;
use cmtk::util::Value;
use cmtk::vm::mock_vm::{MockVM, KIND_LITERAL};
use cmtk::CMTK;

pub fn bench(c: &mut Criterion) {
    MockVM::reset();
    let cmtk = CMTK::<MockVM>::new();
    let code = code_manager::create_code_object(
        &cmtk,
        0,
        0,
        Value::from_usize(0),
        Value::from_usize(0),
        4096,
        Value::from_usize(0),
        None,
    )
    .unwrap();

    // A mixed table: every eighth entry spills into the extended format.
    let mut slots = Vec::new();
    for i in 0..64usize {
        let item = MockVM::intern_literal(MockVM::heap_ref(0x1000 + i));
        let delta = if i == 0 {
            CODE_DATA_DISPLACEMENT
        } else if i % 8 == 0 {
            MAX_COMPACT_CODE_DELTA + 1
        } else {
            16
        };
        RelocEntry::new(KIND_LITERAL, item, delta).encode(&mut slots);
    }
    code_manager::attach_reloc_table::<MockVM>(&code, slots.len());
    for (index, word) in slots.iter().enumerate() {
        code_manager::write_reloc_slot(&code, index, *word);
    }

    c.bench_function("reloc_decode_with_offsets", |b| {
        b.iter(|| black_box(code_manager::get_code_refs_with_offsets::<MockVM>(&code)))
    });
    c.bench_function("reloc_decode_dedup", |b| {
        b.iter(|| black_box(code_manager::get_code_refs::<MockVM>(&code)))
    });
    c.bench_function("patch_long", |b| {
        b.iter(|| code_manager::set_code_long::<MockVM>(&code, 128, black_box(0x1234_5678)))
    });
    c.bench_function("patch_quad_unaligned", |b| {
        b.iter(|| {
            code_manager::set_code_quad::<MockVM>(&code, 129, black_box(0x0102_0304_0506_0708))
        })
    });
}
