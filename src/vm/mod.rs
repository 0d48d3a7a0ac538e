//! This module defines the contract between CMTK and the embedding
//! runtime. The runtime implements [`VMBinding`] once and instantiates
//! every CMTK operation with it. CMTK never implements the underlying
//! mechanics itself: reference resolution belongs to the runtime's object
//! model, and page protection, thread coordination and cache invalidation
//! belong to its safepoint machinery ([`crate::util::memory`] offers the
//! raw OS pieces a binding can build those from).

use crate::code::object::CodeObject;
use crate::code::reloc::RelocKind;
use crate::util::Address;
use crate::util::Value;

#[cfg(any(test, feature = "mock_test"))]
pub mod mock_vm;

/// An age class assigned to heap values by the binding's generational
/// collector. Larger is older. The oldest generation is reserved for
/// static, immovable objects.
#[repr(transparent)]
#[derive(Copy, Clone, Eq, Hash, PartialOrd, Ord, PartialEq, Debug)]
pub struct Generation(pub u8);

impl Generation {
    /// The youngest generation; freshly allocated objects start here.
    pub const NURSERY: Generation = Generation(0);
    /// The static generation. Code in it never moves, and its embedded
    /// pointers are never revisited by the collector.
    pub const STATIC: Generation = Generation(u8::MAX);

    pub fn is_static(self) -> bool {
        self == Self::STATIC
    }
}

/// The trait an embedding runtime implements to use CMTK.
pub trait VMBinding
where
    Self: Sized + 'static + Send + Sync,
{
    /// Resolve the value a relocation entry refers to. CMTK treats `kind`
    /// as an opaque dispatch tag: the binding's compiler chose it when the
    /// entry was emitted, and only the binding knows how to recompute the
    /// referenced value from it.
    ///
    /// Arguments:
    /// * `kind`: The dispatch tag decoded from the entry.
    /// * `code`: The code object whose table is being decoded.
    /// * `code_offset`: Absolute offset of the described location,
    ///   measured from the code object base (header included).
    /// * `item_offset`: Auxiliary value carried by the entry, passed
    ///   through verbatim (e.g. an index into a literal pool).
    fn resolve_code_ref(
        kind: RelocKind,
        code: &CodeObject,
        code_offset: usize,
        item_offset: usize,
    ) -> Value;

    /// Return whether a value is an immediate (non-heap) value. Immediates
    /// need no relocation tracking and are skipped during table decode.
    ///
    /// Arguments:
    /// * `value`: The value to classify.
    fn is_immediate(value: Value) -> bool;

    /// Return the current generation of a code object.
    ///
    /// Arguments:
    /// * `code`: The code object to query.
    fn generation_of_code(code: &CodeObject) -> Generation;

    /// Called before executable memory in `[start, start + len)` is
    /// mutated. The binding is expected to (a) make the region writable if
    /// the platform enforces write-xor-execute, (b) coordinate with any
    /// thread that might concurrently inspect or execute the region, under
    /// its safepoint discipline, and (c) note the region for instruction
    /// cache invalidation. A zero-length region announces header-only
    /// mutation (no instruction bytes change).
    ///
    /// Arguments:
    /// * `start`: Start of the region about to be mutated.
    /// * `len`: Length of the region in bytes.
    fn begin_code_write(start: Address, len: usize);

    /// Called after the mutation announced by the matching
    /// [`VMBinding::begin_code_write`] completed. Restores protection and
    /// performs the cache invalidation appropriate to the target.
    ///
    /// Arguments:
    /// * `start`: Start of the mutated region.
    /// * `len`: Length of the region in bytes.
    fn end_code_write(start: Address, len: usize);

    /// Flush the instruction cache. Exposed standalone for callers that
    /// batch many patches and want a single pass at the end instead of one
    /// per patch.
    fn flush_instruction_cache();
}
