//! The code-write barrier.
//!
//! Instruction bytes and collector-visible header fields are only mutated
//! inside a bracket that tells the runtime a region of executable memory
//! is about to change, so it can toggle page protection, coordinate with
//! threads that might execute the region, and invalidate instruction
//! caches afterwards. The bracket itself holds no lock; serialization of
//! overlapping writers is the runtime safepoint protocol's job. Callers
//! keep bracketed regions minimal, as an open bracket can stall
//! collection system-wide.

use std::marker::PhantomData;
use std::mem;

use crate::code::object::CodeObject;
use crate::util::Address;
use crate::vm::VMBinding;

/// A scoped code-write bracket over `[start, start + len)`. Creating the
/// scope opens the bracket through the binding's coordinator; dropping it
/// closes the bracket, restoring protection and flushing caches. A
/// zero-length scope announces header-only mutation.
pub struct CodeWriteScope<VM: VMBinding> {
    start: Address,
    len: usize,
    phantom: PhantomData<VM>,
}

impl<VM: VMBinding> CodeWriteScope<VM> {
    pub fn new(start: Address, len: usize) -> CodeWriteScope<VM> {
        trace!("open code write: start={} len={}", start, len);
        VM::begin_code_write(start, len);
        CodeWriteScope {
            start,
            len,
            phantom: PhantomData,
        }
    }
}

impl<VM: VMBinding> Drop for CodeWriteScope<VM> {
    fn drop(&mut self) {
        VM::end_code_write(self.start, self.len);
        trace!("close code write: start={} len={}", self.start, self.len);
    }
}

/// Offsets are a caller contract; the release contract stays unchecked
/// unless extreme_assertions promotes the check.
fn assert_patch_in_bounds(code: &CodeObject, offset: usize, width: usize) {
    #[cfg(feature = "extreme_assertions")]
    assert!(
        offset.saturating_add(width) <= code.size(),
        "{}-byte patch at offset {} overruns code object of size {}",
        width,
        offset,
        code.size()
    );
    debug_assert!(
        offset + width <= code.size(),
        "{}-byte patch at offset {} overruns code object of size {}",
        width,
        offset,
        code.size()
    );
}

/// Store one value into the instruction stream, bracketed by exactly one
/// begin/end pair covering the stored bytes.
pub(crate) fn patch<VM: VMBinding, T>(code: &CodeObject, offset: usize, value: T) {
    assert_patch_in_bounds(code, offset, mem::size_of::<T>());
    let addr = code.base() + offset;
    debug_assert!(
        addr.is_aligned_to(mem::align_of::<T>()),
        "misaligned {}-byte patch at {}",
        mem::size_of::<T>(),
        addr
    );
    let _scope = CodeWriteScope::<VM>::new(addr, mem::size_of::<T>());
    unsafe { addr.store(value) };
}

/// Like [`patch`], but stores without an alignment requirement. Used for
/// widths that can fault on misaligned stores on some targets.
pub(crate) fn patch_unaligned<VM: VMBinding, T>(code: &CodeObject, offset: usize, value: T) {
    assert_patch_in_bounds(code, offset, mem::size_of::<T>());
    let addr = code.base() + offset;
    let _scope = CodeWriteScope::<VM>::new(addr, mem::size_of::<T>());
    unsafe { addr.store_unaligned(value) };
}
