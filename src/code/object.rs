//! The code object store: executable memory blocks as first-class values.

use atomic_refcell::{AtomicRef, AtomicRefCell, AtomicRefMut};
use std::sync::Arc;

use crate::code::reloc::RelocTable;
use crate::util::constants::BYTES_IN_PAGE;
use crate::util::conversions;
use crate::util::memory;
use crate::util::{Address, Value};

/// A fixed-size executable memory block produced by a compiler backend,
/// together with its header metadata and an optional relocation table.
///
/// The instruction stream is owned by the object and unmapped when the
/// object is dropped. Its bytes may only be mutated through the patch
/// operations in [`crate::code_manager`]: every mutation has to be
/// bracketed for protection toggling and cache coherency, and direct
/// writes would bypass the bracket.
pub struct CodeObject {
    flags: usize,
    free_var_count: usize,
    name: Value,
    arity_mask: Value,
    debug_info: Value,
    profiling_info: Option<Value>,
    /// Byte length of the instruction stream. Fixed at creation.
    size: usize,
    base: Address,
    mmap_size: usize,
    /// Exactly one relocation table, or none. The cell is read by the
    /// collector, so linking a table in goes through the write bracket.
    reloc: AtomicRefCell<Option<RelocTable>>,
}

impl CodeObject {
    /// Map a fresh executable block and initialize the header from the
    /// arguments. The body is zeroed by the OS. Mapping failure is
    /// propagated; there is nothing to retry at this layer.
    pub(crate) fn alloc(
        flags: usize,
        free_var_count: usize,
        name: Value,
        arity_mask: Value,
        size: usize,
        debug_info: Value,
        profiling_info: Option<Value>,
    ) -> std::io::Result<CodeObject> {
        // A zero-sized body still gets a page so the base address is valid
        // as a closure entry point.
        let mmap_size = conversions::raw_align_up(size.max(1), BYTES_IN_PAGE);
        let base = memory::mmap_exec(mmap_size)?;
        debug!(
            "allocated code object: base={} size={} name={:?}",
            base, size, name
        );
        Ok(CodeObject {
            flags,
            free_var_count,
            name,
            arity_mask,
            debug_info,
            profiling_info,
            size,
            base,
            mmap_size,
            reloc: AtomicRefCell::new(None),
        })
    }

    /// Calling-convention flags, as supplied by the compiler.
    pub fn flags(&self) -> usize {
        self.flags
    }

    /// Number of free variables closed over by closures on this code.
    pub fn free_var_count(&self) -> usize {
        self.free_var_count
    }

    /// Display identifier, for debugging and profiling only.
    pub fn name(&self) -> Value {
        self.name
    }

    /// Acceptable argument count(s), encoded for fast dispatch.
    pub fn arity_mask(&self) -> Value {
        self.arity_mask
    }

    /// Opaque debug payload.
    pub fn debug_info(&self) -> Value {
        self.debug_info
    }

    /// Profiling metadata shared with the profiling counter registry, if
    /// this code object carries counters.
    pub fn profiling_info(&self) -> Option<Value> {
        self.profiling_info
    }

    /// Byte length of the instruction stream.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Start address of the instruction stream.
    pub fn base(&self) -> Address {
        self.base
    }

    pub fn has_reloc_table(&self) -> bool {
        self.reloc.borrow().is_some()
    }

    pub(crate) fn reloc(&self) -> AtomicRef<'_, Option<RelocTable>> {
        self.reloc.borrow()
    }

    pub(crate) fn reloc_mut(&self) -> AtomicRefMut<'_, Option<RelocTable>> {
        self.reloc.borrow_mut()
    }
}

impl Drop for CodeObject {
    fn drop(&mut self) {
        if let Err(e) = memory::munmap(self.base, self.mmap_size) {
            warn!("failed to unmap code object at {}: {}", self.base, e);
        }
    }
}

/// A callable value: an entry point at some offset into a code object.
/// Holding a closure keeps the code object alive.
pub struct Closure {
    code: Arc<CodeObject>,
    entry: Address,
}

impl Closure {
    /// The offset is trusted, not validated against the code size. This
    /// layer sits directly above raw memory; higher layers validate.
    pub(crate) fn new(code: Arc<CodeObject>, offset: usize) -> Closure {
        let entry = code.base() + offset;
        Closure { code, entry }
    }

    pub fn entry(&self) -> Address {
        self.entry
    }

    pub fn code(&self) -> &Arc<CodeObject> {
        &self.code
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_initializes_header() {
        let co = CodeObject::alloc(
            0x3,
            2,
            Value::from_usize(0xbeef),
            Value::from_usize(0x7),
            64,
            Value::from_usize(0),
            None,
        )
        .unwrap();
        assert_eq!(co.flags(), 0x3);
        assert_eq!(co.free_var_count(), 2);
        assert_eq!(co.name(), Value::from_usize(0xbeef));
        assert_eq!(co.arity_mask(), Value::from_usize(0x7));
        assert_eq!(co.size(), 64);
        assert!(co.profiling_info().is_none());
        assert!(!co.has_reloc_table());
    }

    #[test]
    fn alloc_zeroes_body() {
        let co = CodeObject::alloc(
            0,
            0,
            Value::from_usize(0),
            Value::from_usize(0),
            16,
            Value::from_usize(0),
            None,
        )
        .unwrap();
        for i in 0usize..16 {
            assert_eq!(unsafe { (co.base() + i).load::<u8>() }, 0);
        }
    }

    #[test]
    fn closure_entry_is_base_plus_offset() {
        let co = Arc::new(
            CodeObject::alloc(
                0,
                0,
                Value::from_usize(0),
                Value::from_usize(0),
                32,
                Value::from_usize(0),
                None,
            )
            .unwrap(),
        );
        let closure = Closure::new(co.clone(), 8);
        assert_eq!(closure.entry(), co.base() + 8usize);
    }
}
