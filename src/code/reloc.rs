//! The relocation table codec.
//!
//! A relocation table records where a code object's instruction stream
//! embeds references to managed values, as an ordered sequence of encoded
//! words. Each logical entry carries a dispatch tag (`kind`), an auxiliary
//! `item_offset` passed through to the binding's resolver, and the
//! displacement of the described location relative to the previous entry's
//! absolute offset. Storing deltas rather than absolute offsets lets one
//! packed word usually hold all three fields; an entry whose fields do not
//! fit the packing spills into the three-word extended format. The choice
//! is per entry and self-describing through a tag bit in the first word.
//!
//! Entries are stored in increasing code-offset order. Decoding keeps a
//! running absolute offset by accumulating deltas, so corrupting the order
//! of a table corrupts all offsets from that point on.

use std::sync::{Arc, Weak};

use crate::code::object::CodeObject;
use crate::util::constants::BITS_IN_WORD;
use crate::util::constants::CODE_DATA_DISPLACEMENT;
use crate::util::Value;
use crate::vm::VMBinding;

/// Opaque dispatch tag of a relocation entry. The binding's compiler
/// assigns tags when emitting entries and its resolver interprets them;
/// CMTK only moves them around. Tags must fit [`RELOC_KIND_BITS`].
#[repr(transparent)]
#[derive(Copy, Clone, Eq, Hash, PartialOrd, Ord, PartialEq, Debug)]
pub struct RelocKind(pub u8);

/// Width of the kind field in the encoding.
pub const RELOC_KIND_BITS: usize = 4;
/// Width of the item offset field in a compact word.
pub const RELOC_ITEM_OFFSET_BITS: usize = (BITS_IN_WORD - 1 - RELOC_KIND_BITS) / 2;
/// Width of the code offset delta field in a compact word.
pub const RELOC_CODE_OFFSET_BITS: usize =
    BITS_IN_WORD - 1 - RELOC_KIND_BITS - RELOC_ITEM_OFFSET_BITS;

// The extended-format tag bit, the kind and the two packed fields have to
// tile the word exactly.
const_assert_eq!(
    1 + RELOC_KIND_BITS + RELOC_ITEM_OFFSET_BITS + RELOC_CODE_OFFSET_BITS,
    BITS_IN_WORD
);

const EXTENDED_BIT: usize = 1;
const KIND_SHIFT: usize = 1;
const KIND_MASK: usize = (1 << RELOC_KIND_BITS) - 1;
const ITEM_SHIFT: usize = KIND_SHIFT + RELOC_KIND_BITS;
const ITEM_MASK: usize = (1 << RELOC_ITEM_OFFSET_BITS) - 1;
const DELTA_SHIFT: usize = ITEM_SHIFT + RELOC_ITEM_OFFSET_BITS;

/// Largest item offset a compact word can carry.
pub const MAX_COMPACT_ITEM_OFFSET: usize = ITEM_MASK;
/// Largest code offset delta a compact word can carry.
pub const MAX_COMPACT_CODE_DELTA: usize = (1 << RELOC_CODE_OFFSET_BITS) - 1;

/// One decoded relocation entry. Both variants carry the same logical
/// fields; the variant records which wire format the entry uses.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum RelocEntry {
    /// One packed word.
    Compact {
        kind: RelocKind,
        item_offset: usize,
        code_delta: usize,
    },
    /// Three words: a tag word holding the kind, then the full item
    /// offset, then the full code offset delta.
    Extended {
        kind: RelocKind,
        item_offset: usize,
        code_delta: usize,
    },
}

impl RelocEntry {
    /// Build an entry, choosing the compact format iff both fields fit
    /// their packed widths.
    pub fn new(kind: RelocKind, item_offset: usize, code_delta: usize) -> RelocEntry {
        debug_assert!(
            (kind.0 as usize) <= KIND_MASK,
            "relocation kind {:?} does not fit {} bits",
            kind,
            RELOC_KIND_BITS
        );
        if item_offset <= MAX_COMPACT_ITEM_OFFSET && code_delta <= MAX_COMPACT_CODE_DELTA {
            RelocEntry::Compact {
                kind,
                item_offset,
                code_delta,
            }
        } else {
            RelocEntry::Extended {
                kind,
                item_offset,
                code_delta,
            }
        }
    }

    pub fn kind(&self) -> RelocKind {
        match *self {
            RelocEntry::Compact { kind, .. } | RelocEntry::Extended { kind, .. } => kind,
        }
    }

    pub fn item_offset(&self) -> usize {
        match *self {
            RelocEntry::Compact { item_offset, .. } | RelocEntry::Extended { item_offset, .. } => {
                item_offset
            }
        }
    }

    pub fn code_delta(&self) -> usize {
        match *self {
            RelocEntry::Compact { code_delta, .. } | RelocEntry::Extended { code_delta, .. } => {
                code_delta
            }
        }
    }

    /// Number of table words the entry occupies on the wire.
    pub fn encoded_len(&self) -> usize {
        match *self {
            RelocEntry::Compact { .. } => 1,
            RelocEntry::Extended { .. } => 3,
        }
    }

    /// Append the wire encoding of this entry.
    pub fn encode(&self, out: &mut Vec<usize>) {
        match *self {
            RelocEntry::Compact {
                kind,
                item_offset,
                code_delta,
            } => {
                debug_assert!(item_offset <= MAX_COMPACT_ITEM_OFFSET);
                debug_assert!(code_delta <= MAX_COMPACT_CODE_DELTA);
                out.push(
                    ((kind.0 as usize) << KIND_SHIFT)
                        | (item_offset << ITEM_SHIFT)
                        | (code_delta << DELTA_SHIFT),
                );
            }
            RelocEntry::Extended {
                kind,
                item_offset,
                code_delta,
            } => {
                out.push(EXTENDED_BIT | ((kind.0 as usize) << KIND_SHIFT));
                out.push(item_offset);
                out.push(code_delta);
            }
        }
    }

    /// Decode one entry starting at `cursor`. Returns the entry and the
    /// cursor past it. A truncated extended entry is a caller contract
    /// violation and panics on the slice bound.
    fn decode(slots: &[usize], cursor: usize) -> (RelocEntry, usize) {
        let word = slots[cursor];
        let kind = RelocKind(((word >> KIND_SHIFT) & KIND_MASK) as u8);
        if word & EXTENDED_BIT != 0 {
            let entry = RelocEntry::Extended {
                kind,
                item_offset: slots[cursor + 1],
                code_delta: slots[cursor + 2],
            };
            (entry, cursor + 3)
        } else {
            let entry = RelocEntry::Compact {
                kind,
                item_offset: (word >> ITEM_SHIFT) & ITEM_MASK,
                code_delta: word >> DELTA_SHIFT,
            };
            (entry, cursor + 1)
        }
    }
}

/// A relocation table: a fixed number of encoded words, owned by exactly
/// one code object. The back-reference identifies the owner; it does not
/// keep it alive.
pub struct RelocTable {
    code: Weak<CodeObject>,
    slots: Box<[usize]>,
}

impl RelocTable {
    pub(crate) fn new(code: &Arc<CodeObject>, word_count: usize) -> RelocTable {
        RelocTable {
            code: Arc::downgrade(code),
            slots: vec![0; word_count].into_boxed_slice(),
        }
    }

    pub fn word_count(&self) -> usize {
        self.slots.len()
    }

    /// The owning code object, if it is still alive.
    pub fn code(&self) -> Option<Arc<CodeObject>> {
        self.code.upgrade()
    }

    /// Overwrite one encoded word. The caller is responsible for producing
    /// a well-formed encoding; nothing is decoded or validated here.
    pub(crate) fn write_slot(&mut self, index: usize, raw: usize) {
        #[cfg(feature = "extreme_assertions")]
        assert!(
            index < self.slots.len(),
            "reloc slot {} out of bounds for a {}-word table",
            index,
            self.slots.len()
        );
        self.slots[index] = raw;
    }

    /// Iterate the decoded entries front to back, yielding each entry with
    /// its accumulated absolute code offset.
    pub fn iter(&self) -> RelocIter<'_> {
        RelocIter {
            slots: &self.slots,
            cursor: 0,
            abs_offset: 0,
        }
    }
}

pub struct RelocIter<'a> {
    slots: &'a [usize],
    cursor: usize,
    abs_offset: usize,
}

impl<'a> Iterator for RelocIter<'a> {
    type Item = (RelocEntry, usize);

    fn next(&mut self) -> Option<(RelocEntry, usize)> {
        if self.cursor >= self.slots.len() {
            return None;
        }
        let (entry, cursor) = RelocEntry::decode(self.slots, self.cursor);
        self.cursor = cursor;
        self.abs_offset += entry.code_delta();
        Some((entry, self.abs_offset))
    }
}

/// Walk a code object's table, resolving every entry through the binding
/// and visiting each non-immediate value with its absolute code offset.
fn walk<VM: VMBinding, F: FnMut(Value, usize)>(code: &CodeObject, mut visit: F) {
    // Static-generation code never moves and its pointers are never
    // revisited by the collector.
    if VM::generation_of_code(code).is_static() {
        return;
    }
    let reloc = code.reloc();
    let table = match reloc.as_ref() {
        Some(table) => table,
        None => return,
    };
    for (entry, abs_offset) in table.iter() {
        let value = VM::resolve_code_ref(entry.kind(), code, abs_offset, entry.item_offset());
        if VM::is_immediate(value) {
            continue;
        }
        visit(value, abs_offset);
    }
}

/// The set of distinct heap values the code object references, in first
/// occurrence order. Deduplicates by identity with a linear scan: the
/// referenced-object count per code object is small by construction.
pub(crate) fn referenced_values<VM: VMBinding>(code: &CodeObject) -> Vec<Value> {
    let mut values: Vec<Value> = Vec::new();
    walk::<VM, _>(code, |value, _| {
        if !values.contains(&value) {
            values.push(value);
        }
    });
    values
}

/// Every reference site with its offset into the instruction stream, in
/// code-offset order and without deduplication. This serves callers that
/// must locate each embedded reference, e.g. a precise fixup pass.
pub(crate) fn referenced_values_with_offsets<VM: VMBinding>(
    code: &CodeObject,
) -> Vec<(Value, usize)> {
    let mut values = Vec::new();
    walk::<VM, _>(code, |value, abs_offset| {
        debug_assert!(abs_offset >= CODE_DATA_DISPLACEMENT);
        values.push((value, abs_offset - CODE_DATA_DISPLACEMENT));
    });
    values
}
