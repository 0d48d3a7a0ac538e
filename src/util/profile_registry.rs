//! The profiling counter registry.
//!
//! A generation-ordered list of weak associations from code objects to
//! their profiling counter structures. The association does not keep the
//! code object alive; once the collector drops a code object, the next
//! sweep hands its counters back to the caller for reclamation. The
//! registry is process-wide state owned by a [`crate::CMTK`] instance and
//! reached through that handle only.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, Weak};

use crate::code::object::CodeObject;
use crate::util::Value;
use crate::vm::{Generation, VMBinding};

/// Observation of the weakly-held code-object side of an entry. Only the
/// collector clears the reference (by dropping the last strong one); the
/// registry just reads the tag.
pub enum WeakSlot {
    Alive(Arc<CodeObject>),
    Cleared,
}

struct RegistryEntry {
    code: Weak<CodeObject>,
    counters: Value,
    /// Age of the code object, stamped at registration and refreshed on
    /// every sweep that scans the entry. Used as the scan bound once the
    /// weak side is cleared and the object can no longer be queried.
    age: Generation,
}

impl RegistryEntry {
    fn slot(&self) -> WeakSlot {
        match self.code.upgrade() {
            Some(code) => WeakSlot::Alive(code),
            None => WeakSlot::Cleared,
        }
    }
}

struct ProfileRegistrySync {
    /// Youngest entries at the head; ages are non-decreasing toward the
    /// tail. A sweep can therefore stop at the first entry older than the
    /// collected generations instead of rescanning the whole list.
    entries: VecDeque<RegistryEntry>,
}

/// The registry. Internally serialized; callers additionally register
/// under the code-write bracket because the list is collector-visible
/// state, like any other header mutation.
pub struct ProfileRegistry {
    sync: Mutex<ProfileRegistrySync>,
}

impl ProfileRegistry {
    pub fn new() -> Self {
        ProfileRegistry {
            sync: Mutex::new(ProfileRegistrySync {
                entries: VecDeque::new(),
            }),
        }
    }

    /// Prepend a weak association, making the new entry the youngest.
    pub fn register<VM: VMBinding>(&self, code: &Arc<CodeObject>, counters: Value) {
        let age = VM::generation_of_code(code);
        let mut sync = self.sync.lock().unwrap();
        sync.entries.push_front(RegistryEntry {
            code: Arc::downgrade(code),
            counters,
            age,
        });
        trace!(
            "registered profile counters for {} ({} entries)",
            code.base(),
            sync.entries.len()
        );
    }

    /// Scan from the head while entries are at most `max_generation` old,
    /// dropping entries whose code object has been collected. Returns the
    /// discarded entries' counters for the caller to reclaim. Surviving
    /// scanned entries stay at the head, entries past the scan bound stay
    /// untouched, and relative order is preserved in both partitions, so
    /// the list remains sorted by non-decreasing age.
    pub fn sweep<VM: VMBinding>(&self, max_generation: Generation) -> Vec<Value> {
        let mut sync = self.sync.lock().unwrap();
        let mut retained: VecDeque<RegistryEntry> = VecDeque::new();
        let mut discarded = Vec::new();
        while let Some(entry) = sync.entries.front() {
            match entry.slot() {
                WeakSlot::Alive(code) => {
                    let age = VM::generation_of_code(&code);
                    if age > max_generation {
                        break;
                    }
                    let mut entry = sync.entries.pop_front().unwrap();
                    entry.age = age;
                    retained.push_back(entry);
                }
                WeakSlot::Cleared => {
                    if entry.age > max_generation {
                        break;
                    }
                    let entry = sync.entries.pop_front().unwrap();
                    discarded.push(entry.counters);
                }
            }
        }
        while let Some(entry) = retained.pop_back() {
            sync.entries.push_front(entry);
        }
        debug!(
            "profile registry sweep (max generation {:?}): {} discarded, {} remain",
            max_generation,
            discarded.len(),
            sync.entries.len()
        );
        discarded
    }

    /// Snapshot of the current associations, youngest first.
    pub fn counters(&self) -> Vec<(WeakSlot, Value)> {
        let sync = self.sync.lock().unwrap();
        sync.entries
            .iter()
            .map(|entry| (entry.slot(), entry.counters))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sync.lock().unwrap().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ProfileRegistry {
    fn default() -> Self {
        Self::new()
    }
}
