//! Code Management ToolKit (CMTK) is a toolkit for representing
//! compiler-generated machine code as first-class, collector-managed
//! objects. It owns four cooperating components:
//!
//! * The *code object store* ([`crate::code::object`]) represents one
//!   allocated executable block together with its header metadata and
//!   builds callable closures over entry points within it.
//! * The *relocation table codec* ([`crate::code::reloc`]) records where a
//!   code object's instruction stream embeds references to other managed
//!   values, in a compact variable-width encoding, and decodes a table
//!   back into the set of referenced values.
//! * The *code-write barrier and patch operations* ([`crate::code::write`]
//!   and the patch table in [`crate::code_manager`]) provide the only path
//!   for mutating instruction bytes, bracketed so the runtime can toggle
//!   page protection and keep instruction caches coherent.
//! * The *profiling counter registry* ([`crate::util::profile_registry`])
//!   weakly associates profiling counters with code objects so that
//!   counters for collected code are eventually reclaimed.
//!
//! The embedding runtime supplies its half of the contract (reference
//! resolution, generation queries, safepoint/protection coordination)
//! through the [`crate::vm::VMBinding`] trait. All operations go through
//! the safe API in [`crate::code_manager`] with a [`CMTK`] instance as the
//! context handle.

#[macro_use]
extern crate log;
#[cfg(any(test, feature = "mock_test"))]
#[macro_use]
extern crate lazy_static;
#[macro_use]
extern crate static_assertions;

mod cmtk;
pub use crate::cmtk::CMTK;

/// The safe API surface exposed to the runtime.
pub mod code_manager;

/// Code objects, the relocation table codec, and the code-write barrier.
pub mod code;

/// Utilities used by all components.
pub mod util;

/// The trait the embedding runtime implements for CMTK.
pub mod vm;

#[cfg(test)]
mod tests;
