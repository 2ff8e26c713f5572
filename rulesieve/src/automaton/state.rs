use rulesieve_intmap::{IntIntMap, NO_VALUE};

use super::transition::{ByteTransition, Shortcut, StateId};

/// Dense byte-indexed transition table: an [`IntIntMap`] from byte to slot
/// plus a slot arena, so the common lookup is two array probes with no
/// per-entry boxing.
#[derive(Default, Debug)]
pub(crate) struct ByteMap {
    slots: IntIntMap,
    table: Vec<ByteTransition>,
    free: Vec<usize>,
}

impl ByteMap {
    fn get(&self, byte: u8) -> Option<&ByteTransition> {
        match self.slots.get(byte as i64) {
            NO_VALUE => None,
            idx => Some(&self.table[idx as usize]),
        }
    }

    fn ensure_mut(&mut self, byte: u8) -> &mut ByteTransition {
        let key = byte as i64;
        let idx = match self.slots.get(key) {
            NO_VALUE => {
                let idx = self.free.pop().unwrap_or_else(|| {
                    self.table.push(ByteTransition::default());
                    self.table.len() - 1
                });
                self.slots.put(key, idx as i64);
                idx
            }
            idx => idx as usize,
        };
        &mut self.table[idx]
    }

    fn remove(&mut self, byte: u8) {
        let idx = self.slots.remove(byte as i64);
        debug_assert_ne!(idx, NO_VALUE);
        if idx != NO_VALUE {
            self.table[idx as usize] = ByteTransition::default();
            self.free.push(idx as usize);
        }
    }

    fn len(&self) -> usize {
        self.slots.len()
    }

    /// The single remaining entry; only called when `len() == 1`.
    fn take_only(&mut self) -> (u8, ByteTransition) {
        let (key, idx) = self.slots.iter().next().expect("non-empty map");
        (key as u8, std::mem::take(&mut self.table[idx as usize]))
    }
}

/// Per-state storage shape for outgoing transitions, selected by count.
#[derive(Default, Debug)]
enum TransitionStore {
    #[default]
    Empty,
    One(u8, ByteTransition),
    Many(Box<ByteMap>),
}

/// A node of the byte-level automaton.
#[derive(Default, Debug)]
pub struct ByteState {
    store: TransitionStore,
    /// Applies to every byte, unioned with the per-byte entry: wildcard
    /// fans, any-digit ladders, exists markers.
    for_all: ByteTransition,
    /// Collapsed exact chains, keyed by first byte.
    shortcuts: Vec<Shortcut>,
    /// Set on states reachable past a wildcard star; such states never
    /// hold shortcuts.
    indeterminate_prefix: bool,
}

impl ByteState {
    pub(crate) fn edge(&self, byte: u8) -> Option<&ByteTransition> {
        match &self.store {
            TransitionStore::Empty => None,
            TransitionStore::One(b, t) => (*b == byte).then_some(t),
            TransitionStore::Many(map) => map.get(byte),
        }
    }

    /// The entry for `byte`, created empty if absent. Migrates the storage
    /// shape as the entry count grows.
    pub(crate) fn edge_mut(&mut self, byte: u8) -> &mut ByteTransition {
        match &self.store {
            TransitionStore::Empty => {
                self.store = TransitionStore::One(byte, ByteTransition::default());
            }
            TransitionStore::One(b, _) if *b != byte => {
                let TransitionStore::One(b, t) = std::mem::take(&mut self.store) else {
                    unreachable!()
                };
                let mut map = ByteMap::default();
                *map.ensure_mut(b) = t;
                self.store = TransitionStore::Many(Box::new(map));
            }
            _ => {}
        }
        match &mut self.store {
            TransitionStore::Empty => unreachable!(),
            TransitionStore::One(_, t) => t,
            TransitionStore::Many(map) => map.ensure_mut(byte),
        }
    }

    /// Drops the entry for `byte` if it has become empty, shrinking the
    /// storage shape where possible.
    pub(crate) fn prune_edge(&mut self, byte: u8) {
        if !self.edge(byte).is_some_and(ByteTransition::is_empty) {
            return;
        }
        match &mut self.store {
            TransitionStore::Empty => {}
            TransitionStore::One(b, _) => {
                debug_assert_eq!(*b, byte);
                self.store = TransitionStore::Empty;
            }
            TransitionStore::Many(map) => {
                map.remove(byte);
                match map.len() {
                    0 => self.store = TransitionStore::Empty,
                    1 => {
                        let (b, t) = map.take_only();
                        self.store = TransitionStore::One(b, t);
                    }
                    _ => {}
                }
            }
        }
    }

    pub(crate) fn for_all(&self) -> &ByteTransition {
        &self.for_all
    }

    pub(crate) fn for_all_mut(&mut self) -> &mut ByteTransition {
        &mut self.for_all
    }

    /// Union of the per-byte entry and the for-all-bytes overlay, exactly
    /// what traversal observes for `byte`.
    pub fn get_transition(&self, byte: u8) -> ByteTransition {
        match self.edge(byte) {
            Some(t) if self.for_all.is_empty() => t.clone(),
            Some(t) => t.merged(&self.for_all),
            None => self.for_all.clone(),
        }
    }

    pub(crate) fn shortcuts(&self) -> &[Shortcut] {
        &self.shortcuts
    }

    pub(crate) fn shortcut_index(&self, first_byte: u8) -> Option<usize> {
        self.shortcuts.iter().position(|s| s.first_byte() == first_byte)
    }

    pub(crate) fn push_shortcut(&mut self, shortcut: Shortcut) {
        debug_assert!(shortcut.bytes.len() >= 2);
        debug_assert!(!self.indeterminate_prefix);
        debug_assert!(self.shortcut_index(shortcut.first_byte()).is_none());
        self.shortcuts.push(shortcut);
    }

    pub(crate) fn remove_shortcut_at(&mut self, index: usize) -> Shortcut {
        self.shortcuts.swap_remove(index)
    }

    pub(crate) fn indeterminate_prefix(&self) -> bool {
        self.indeterminate_prefix
    }

    pub(crate) fn set_indeterminate_prefix(&mut self) {
        self.indeterminate_prefix = true;
    }

    /// No matches, no transitions, no overlay, no shortcuts: eligible for
    /// removal from its parent.
    pub fn is_empty(&self) -> bool {
        matches!(self.store, TransitionStore::Empty)
            && self.for_all.is_empty()
            && self.shortcuts.is_empty()
    }

    /// The fixed point left behind by looping constructs: the state's only
    /// remaining content is an overlay loop onto itself.
    pub fn has_only_self_referential_transition(&self, me: StateId) -> bool {
        matches!(self.store, TransitionStore::Empty)
            && self.shortcuts.is_empty()
            && self.for_all.next().is_none()
            && self.for_all.matches().is_empty()
            && !self.for_all.side().is_empty()
            && self.for_all.side().iter().all(|&s| s == me)
    }

    /// Sorted byte boundaries where the outgoing transition function
    /// changes value, terminated by 256. A state with a single entry for
    /// byte `b` yields `[b, b + 1, 256]`.
    pub fn get_ceilings(&self) -> Vec<u16> {
        let mut ceilings = Vec::new();
        let mut prev = self.edge(0);
        for b in 1..=255u16 {
            let cur = self.edge(b as u8);
            if cur != prev {
                ceilings.push(b);
                prev = cur;
            }
        }
        ceilings.push(256);
        ceilings
    }
}
