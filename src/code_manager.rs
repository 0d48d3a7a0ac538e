//! Runtime-to-CMTK interface: safe Rust APIs.
//!
//! This module provides the safe API for the code-object subsystem. We
//! expect the VM binding to inherit and extend this API by adding their
//! VM-specific functions, and to expose it to native code if necessary,
//! managing the unsafety of doing so on their side.
//!
//! All mutation of instruction bytes and of collector-visible header
//! fields goes through these functions, which bracket each mutation with
//! the binding's code-write coordination (see
//! [`crate::code::write::CodeWriteScope`]). Offsets and slot indexes are
//! trusted in release builds; this layer sits directly above raw memory,
//! and higher layers validate.

use std::sync::Arc;

use crate::cmtk::CMTK;
use crate::code::object::{Closure, CodeObject};
use crate::code::reloc;
use crate::code::reloc::RelocTable;
use crate::code::write;
use crate::code::write::CodeWriteScope;
use crate::util::{Address, Value};
use crate::vm::{Generation, VMBinding};

/// Initialize a CMTK instance. A runtime should call this once, when its
/// collector subsystem comes up, and keep the returned instance for the
/// lifetime of the process.
///
/// Note that this method will attempt to initialize a logger. If the VM
/// would like to use its own logger, it should initialize the logger
/// before calling this method.
pub fn cmtk_init<VM: VMBinding>() -> Box<CMTK<VM>> {
    match crate::util::logger::try_init() {
        Ok(_) => debug!("CMTK initialized the logger."),
        Err(_) => debug!(
            "CMTK failed to initialize the logger. Possibly a logger has been initialized by user."
        ),
    }
    Box::new(CMTK::new())
}

/// Allocate a code object with a fixed-size executable body and the given
/// header fields. The body starts zeroed; the compiler backend fills it in
/// afterwards through the patch operations. If `profiling_info` is
/// present, a weak association is registered in the profiling counter
/// registry under the same bracket discipline as the rest of the
/// construction.
///
/// Allocation failure is propagated to the caller as an unrecoverable
/// error; it is not retried here.
///
/// Arguments:
/// * `cmtk`: The CMTK instance.
/// * `flags`: Calling-convention flags, kept verbatim in the header.
/// * `free_var_count`: Number of free variables of closures over this code.
/// * `name`: Display identifier, for debugging and profiling only.
/// * `arity_mask`: Acceptable argument count(s) for fast dispatch.
/// * `size`: Byte length of the instruction stream. Never changes.
/// * `debug_info`: Opaque debug payload.
/// * `profiling_info`: Profiling metadata to share with the registry.
pub fn create_code_object<VM: VMBinding>(
    cmtk: &CMTK<VM>,
    flags: usize,
    free_var_count: usize,
    name: Value,
    arity_mask: Value,
    size: usize,
    debug_info: Value,
    profiling_info: Option<Value>,
) -> std::io::Result<Arc<CodeObject>> {
    // Construction itself is serialized with the collector by the
    // allocator; the zero-length bracket covers the header stores and the
    // registry insertion, both collector-visible.
    let _scope = CodeWriteScope::<VM>::new(Address::ZERO, 0);
    let code = Arc::new(CodeObject::alloc(
        flags,
        free_var_count,
        name,
        arity_mask,
        size,
        debug_info,
        profiling_info,
    )?);
    if let Some(counters) = profiling_info {
        cmtk.profile_registry.register::<VM>(&code, counters);
    }
    Ok(code)
}

/// Create a callable value whose entry point is `code.base() + offset`.
/// The offset is not validated against the code size: this mirrors the
/// trust boundary at this layer, and higher layers validate.
///
/// Arguments:
/// * `code`: The code object to enter.
/// * `offset`: Byte offset of the entry point into the instruction stream.
pub fn make_closure<VM: VMBinding>(code: &Arc<CodeObject>, offset: usize) -> Closure {
    Closure::new(code.clone(), offset)
}

/// Allocate a relocation table of `word_count` encoded words, zero-filled,
/// and link it to the code object. The table stores a back-reference to
/// the code object for identification; the code object owns the table. An
/// existing table is replaced. The link is a header field the collector
/// reads, so it is mutated under the code-write bracket.
///
/// Arguments:
/// * `code`: The code object to attach the table to.
/// * `word_count`: Number of encoded words, fixed for the table lifetime.
pub fn attach_reloc_table<VM: VMBinding>(code: &Arc<CodeObject>, word_count: usize) {
    let table = RelocTable::new(code, word_count);
    let _scope = CodeWriteScope::<VM>::new(code.base(), 0);
    *code.reloc_mut() = Some(table);
}

/// Overwrite one encoded word of the attached relocation table. Used when
/// a table is constructed incrementally, e.g. during deserialization. The
/// caller is responsible for producing a well-formed encoding; nothing is
/// decoded or validated here.
///
/// Arguments:
/// * `code`: The code object whose table is written.
/// * `index`: Word index into the table.
/// * `raw`: The encoded word.
pub fn write_reloc_slot(code: &CodeObject, index: usize, raw: usize) {
    let mut reloc = code.reloc_mut();
    let table = reloc
        .as_mut()
        .expect("writing a relocation slot with no table attached");
    table.write_slot(index, raw);
}

/// The set of distinct heap values the code object's table references,
/// deduplicated by identity. Code in the static generation returns an
/// empty set unconditionally: it never moves, and its pointers are never
/// revisited by the collector.
///
/// Arguments:
/// * `code`: The code object to decode.
pub fn get_code_refs<VM: VMBinding>(code: &CodeObject) -> Vec<Value> {
    reloc::referenced_values::<VM>(code)
}

/// Every reference site of the code object's table, with the offset of
/// the site into the instruction stream, in code-offset order and without
/// deduplication. Serves callers that must locate each embedded
/// reference, e.g. a collector performing a precise fixup pass. The
/// static-generation short-circuit of [`get_code_refs`] applies.
///
/// Arguments:
/// * `code`: The code object to decode.
pub fn get_code_refs_with_offsets<VM: VMBinding>(code: &CodeObject) -> Vec<(Value, usize)> {
    reloc::referenced_values_with_offsets::<VM>(code)
}

/// Patch one byte of the instruction stream.
///
/// Arguments:
/// * `code`: The code object to patch.
/// * `offset`: Byte offset into the instruction stream.
/// * `value`: Sign-extended small integer; stored truncated to 8 bits.
pub fn set_code_byte<VM: VMBinding>(code: &CodeObject, offset: usize, value: isize) {
    write::patch::<VM, i8>(code, offset, value as i8);
}

/// Patch two bytes of the instruction stream.
///
/// Arguments:
/// * `code`: The code object to patch.
/// * `offset`: Byte offset into the instruction stream.
/// * `value`: Sign-extended small integer; stored truncated to 16 bits.
pub fn set_code_word<VM: VMBinding>(code: &CodeObject, offset: usize, value: isize) {
    write::patch::<VM, i16>(code, offset, value as i16);
}

/// Patch four bytes of the instruction stream.
///
/// Arguments:
/// * `code`: The code object to patch.
/// * `offset`: Byte offset into the instruction stream.
/// * `value`: The 32-bit value to store.
pub fn set_code_long<VM: VMBinding>(code: &CodeObject, offset: usize, value: i32) {
    write::patch::<VM, i32>(code, offset, value);
}

/// Patch four bytes of the instruction stream with `(high << 16) + low`,
/// for assemblers that emit a 32-bit value as two half-words. The
/// composition happens before the store, so it is independent of host
/// byte order.
///
/// Arguments:
/// * `code`: The code object to patch.
/// * `offset`: Byte offset into the instruction stream.
/// * `high`: The upper half-word.
/// * `low`: The lower half-word.
pub fn set_code_long2<VM: VMBinding>(code: &CodeObject, offset: usize, high: isize, low: isize) {
    write::patch::<VM, i32>(code, offset, ((high << 16) + low) as i32);
}

/// Patch eight bytes of the instruction stream. The store is unaligned:
/// quadword patches land at arbitrary instruction offsets, and a plain
/// store could fault on targets with alignment checking.
///
/// Arguments:
/// * `code`: The code object to patch.
/// * `offset`: Byte offset into the instruction stream.
/// * `value`: The 64-bit value to store.
pub fn set_code_quad<VM: VMBinding>(code: &CodeObject, offset: usize, value: i64) {
    write::patch_unaligned::<VM, i64>(code, offset, value);
}

/// Flush the instruction cache through the binding. Callers that batch
/// many patches use this for a single pass at the end rather than relying
/// on the per-patch bracket alone. Repeated calls have no observable
/// effect beyond cache coherency.
pub fn flush_instruction_cache<VM: VMBinding>() {
    VM::flush_instruction_cache();
}

/// Register a weak association from a code object to its profiling
/// counters, making it the youngest registry entry. The registry list is
/// collector-visible global state, so the insertion is bracketed like any
/// other header mutation.
///
/// Arguments:
/// * `cmtk`: The CMTK instance.
/// * `code`: The code object. The association does not keep it alive.
/// * `counters`: The counter structure to hand back once `code` dies.
pub fn register_profile_counters<VM: VMBinding>(
    cmtk: &CMTK<VM>,
    code: &Arc<CodeObject>,
    counters: Value,
) {
    let _scope = CodeWriteScope::<VM>::new(Address::ZERO, 0);
    cmtk.profile_registry.register::<VM>(code, counters);
}

/// Sweep the profiling counter registry after a collection of all
/// generations up to `max_generation`. Entries whose code object has been
/// collected are dropped from the registry and their counters returned
/// for reclamation; surviving entries are retained in order. The scan
/// stops at the first entry older than `max_generation`, relying on the
/// registry's age ordering.
///
/// Arguments:
/// * `cmtk`: The CMTK instance.
/// * `max_generation`: The oldest generation the collection covered.
pub fn release_profile_counters<VM: VMBinding>(
    cmtk: &CMTK<VM>,
    max_generation: Generation,
) -> Vec<Value> {
    cmtk.profile_registry.sweep::<VM>(max_generation)
}
