use crate::{machine::name_state::NameStateId, pattern::Pattern};

/// Index of a [`ByteState`](super::state::ByteState) in its machine's arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StateId(pub(crate) u32);

impl StateId {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// Index of a [`ByteMatch`] in its machine's arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MatchId(pub(crate) u32);

impl MatchId {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// Accept marker: traversal consuming an edge that carries this match means
/// `pattern` matched, and control passes to the name state `next`.
#[derive(Clone, Debug)]
pub struct ByteMatch {
    pub pattern: Pattern,
    pub next: NameStateId,
    /// Fire as soon as the edge is consumed instead of only when the edge
    /// consumes the value's last byte (prefix-like kinds, and wildcards
    /// that end in a star).
    pub immediate: bool,
}

/// Classification of a transition per its storage contract.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransitionKind {
    Empty,
    /// Exactly one next state, nothing attached.
    Single,
    /// One next state (or none) with attached matches.
    Composite,
    /// A parallel union: several next states evaluated simultaneously.
    Compound,
}

/// The effective move for one byte out of one state.
///
/// `next` is the deterministic trie continuation; `side` holds additional
/// states entered in parallel (case-variant chains, wildcard fans, range
/// ladders); `matches` are the accept markers attached to the edge. `side`
/// and `matches` are multisets: the same entry may be contributed by
/// several pattern insertions and is removed once per deletion.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ByteTransition {
    next: Option<StateId>,
    side: Vec<StateId>,
    matches: Vec<MatchId>,
}

impl ByteTransition {
    pub const EMPTY: ByteTransition = ByteTransition {
        next: None,
        side: Vec::new(),
        matches: Vec::new(),
    };

    pub fn is_empty(&self) -> bool {
        self.next.is_none() && self.side.is_empty() && self.matches.is_empty()
    }

    pub fn kind(&self) -> TransitionKind {
        let targets = usize::from(self.next.is_some()) + self.side.len();
        match (targets, self.matches.is_empty()) {
            (0, true) => TransitionKind::Empty,
            (1, true) if self.next.is_some() => TransitionKind::Single,
            (0, false) | (1, _) => TransitionKind::Composite,
            _ => TransitionKind::Compound,
        }
    }

    pub fn next(&self) -> Option<StateId> {
        self.next
    }

    pub fn side(&self) -> &[StateId] {
        &self.side
    }

    pub fn matches(&self) -> &[MatchId] {
        &self.matches
    }

    pub(crate) fn set_next(&mut self, state: StateId) {
        debug_assert!(self.next.is_none(), "trie continuation already present");
        self.next = Some(state);
    }

    pub(crate) fn clear_next(&mut self) {
        self.next = None;
    }

    pub(crate) fn add_side(&mut self, state: StateId) {
        self.side.push(state);
    }

    pub(crate) fn remove_side(&mut self, state: StateId) {
        if let Some(at) = self.side.iter().position(|&s| s == state) {
            self.side.swap_remove(at);
        } else {
            debug_assert!(false, "side target not present");
        }
    }

    pub(crate) fn add_match(&mut self, m: MatchId) {
        self.matches.push(m);
    }

    pub(crate) fn remove_match(&mut self, m: MatchId) {
        if let Some(at) = self.matches.iter().position(|&x| x == m) {
            self.matches.swap_remove(at);
        } else {
            debug_assert!(false, "match not present");
        }
    }

    /// All states this transition enters.
    pub fn targets(&self) -> impl Iterator<Item = StateId> + '_ {
        self.next.into_iter().chain(self.side.iter().copied())
    }

    /// Coalesced union of two transitions (the per-byte entry and the
    /// for-all-bytes overlay).
    pub fn merged(&self, other: &ByteTransition) -> ByteTransition {
        let mut out = self.clone();
        match other.next {
            Some(n) if out.next.is_none() => out.next = Some(n),
            Some(n) => out.side.push(n),
            None => {}
        }
        out.side.extend_from_slice(&other.side);
        out.matches.extend_from_slice(&other.matches);
        out
    }
}

/// A collapsed linear chain of single-byte states ending in exactly one
/// match: from the holding state, the remaining input must equal `bytes`,
/// after which `match_id` fires. Always at least two bytes; shorter
/// remainders are stored as plain edge matches.
#[derive(Clone, Debug)]
pub struct Shortcut {
    pub bytes: Box<[u8]>,
    pub match_id: MatchId,
}

impl Shortcut {
    pub fn first_byte(&self) -> u8 {
        self.bytes[0]
    }
}
