//! A mock VM binding for testing and benchmarking CMTK without a real
//! runtime. The mock keeps its state in globals, so tests that mutate it
//! run under [`crate::util::test_util::serial_test`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::code::object::CodeObject;
use crate::code::reloc::RelocKind;
use crate::util::{Address, Value};
use crate::vm::{Generation, VMBinding};

/// Resolves through the mock literal pool: the referenced value is
/// `literal_pool[item_offset]`.
pub const KIND_LITERAL: RelocKind = RelocKind(1);
/// Resolves to a fixnum-style immediate built from `item_offset`, without
/// touching the pool.
pub const KIND_IMMEDIATE: RelocKind = RelocKind(2);

lazy_static! {
    static ref LITERALS: Mutex<Vec<Value>> = Mutex::default();
    static ref GENERATIONS: Mutex<HashMap<usize, Generation>> = Mutex::default();
}

static OPEN_WRITES: AtomicUsize = AtomicUsize::new(0);
static BRACKETS_OPENED: AtomicUsize = AtomicUsize::new(0);
static BRACKETS_CLOSED: AtomicUsize = AtomicUsize::new(0);
static CACHE_FLUSHES: AtomicUsize = AtomicUsize::new(0);

pub struct MockVM;

impl MockVM {
    /// Clear all mock state. Tests call this first.
    pub fn reset() {
        LITERALS.lock().unwrap().clear();
        GENERATIONS.lock().unwrap().clear();
        OPEN_WRITES.store(0, Ordering::SeqCst);
        BRACKETS_OPENED.store(0, Ordering::SeqCst);
        BRACKETS_CLOSED.store(0, Ordering::SeqCst);
        CACHE_FLUSHES.store(0, Ordering::SeqCst);
    }

    /// A mock heap reference. Even bit patterns are heap references.
    pub fn heap_ref(raw: usize) -> Value {
        Value::from_usize(raw << 1)
    }

    /// A mock immediate (fixnum-style, low bit set).
    pub fn immediate(n: usize) -> Value {
        Value::from_usize((n << 1) | 1)
    }

    /// Add a value to the literal pool, returning its index for use as a
    /// relocation entry's item offset with [`KIND_LITERAL`].
    pub fn intern_literal(value: Value) -> usize {
        let mut pool = LITERALS.lock().unwrap();
        pool.push(value);
        pool.len() - 1
    }

    pub fn set_generation(code: &CodeObject, generation: Generation) {
        GENERATIONS
            .lock()
            .unwrap()
            .insert(code.base().as_usize(), generation);
    }

    pub fn brackets_opened() -> usize {
        BRACKETS_OPENED.load(Ordering::SeqCst)
    }

    pub fn brackets_closed() -> usize {
        BRACKETS_CLOSED.load(Ordering::SeqCst)
    }

    pub fn open_write_depth() -> usize {
        OPEN_WRITES.load(Ordering::SeqCst)
    }

    pub fn cache_flushes() -> usize {
        CACHE_FLUSHES.load(Ordering::SeqCst)
    }
}

impl VMBinding for MockVM {
    fn resolve_code_ref(
        kind: RelocKind,
        _code: &CodeObject,
        _code_offset: usize,
        item_offset: usize,
    ) -> Value {
        match kind {
            KIND_LITERAL => LITERALS.lock().unwrap()[item_offset],
            KIND_IMMEDIATE => Self::immediate(item_offset),
            _ => panic!("mock resolver cannot classify relocation kind {:?}", kind),
        }
    }

    fn is_immediate(value: Value) -> bool {
        value.as_usize() & 1 == 1
    }

    fn generation_of_code(code: &CodeObject) -> Generation {
        GENERATIONS
            .lock()
            .unwrap()
            .get(&code.base().as_usize())
            .copied()
            .unwrap_or(Generation::NURSERY)
    }

    fn begin_code_write(_start: Address, _len: usize) {
        OPEN_WRITES.fetch_add(1, Ordering::SeqCst);
        BRACKETS_OPENED.fetch_add(1, Ordering::SeqCst);
    }

    fn end_code_write(_start: Address, _len: usize) {
        let open = OPEN_WRITES.fetch_sub(1, Ordering::SeqCst);
        assert!(open > 0, "code write bracket closed without being open");
        BRACKETS_CLOSED.fetch_add(1, Ordering::SeqCst);
    }

    fn flush_instruction_cache() {
        CACHE_FLUSHES.fetch_add(1, Ordering::SeqCst);
    }
}
