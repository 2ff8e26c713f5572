/*!
The byte machine: a trie-shaped NFA with shortcuts over byte strings.

One machine holds every predicate registered for one field name and
evaluates all of them against a candidate value in a single left-to-right
pass. Patterns are inserted and deleted incrementally; equal patterns are
reference-counted; deleting everything returns the machine to a
structurally empty state.

States live in an arena and are addressed by [`StateId`]; parent edges are
kept in a parallel table so deletion can walk back toward the root without
ownership cycles. Every pattern insertion records a teardown plan (the
shared edges it marked, the private states it allocated), which makes
deletion an exact inverse regardless of how later insertions reshaped the
shared trie.
*/

use std::collections::{HashMap, HashSet};

use crate::{
    machine::name_state::NameStateId,
    pattern::{Pattern, Range, Segment},
};

mod state;
mod transition;

pub use state::ByteState;
pub use transition::{ByteMatch, ByteTransition, MatchId, Shortcut, StateId, TransitionKind};

const START: StateId = StateId(0);

const HEX_DIGITS: &[u8; 16] = b"0123456789ABCDEF";

fn hex_index(digit: u8) -> usize {
    HEX_DIGITS
        .iter()
        .position(|&d| d == digit)
        .expect("canonical keys hold uppercase hex digits")
}

/// What a pattern insertion did to the machine, in undoable form. Ops that
/// name a private state are skipped during teardown (private states are
/// freed wholesale); shortcut ops are rewritten in place when a later
/// insertion re-expands the shortcut.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum PlanOp {
    EdgeMatch { state: StateId, byte: u8 },
    OverlayMatch { state: StateId },
    EdgeSide { state: StateId, byte: u8, target: StateId },
    OverlaySide { state: StateId, target: StateId },
    ShortcutAt { state: StateId, first_byte: u8 },
    Private { state: StateId },
}

struct PatternEntry {
    match_id: MatchId,
    refs: usize,
    plan: Vec<PlanOp>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Lane {
    Forward,
    Reversed,
}

/// An active position of the traversal frontier: a state, or an offset
/// inside one of a state's shortcuts.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Pos {
    State(StateId),
    Cut {
        state: StateId,
        slot: u32,
        offset: u32,
    },
}

pub struct ByteMachine {
    states: Vec<Option<ByteState>>,
    free_states: Vec<u32>,
    /// Parallel to `states`: the trie edge this state hangs off, for
    /// root-ward pruning. Private (side-linked) states have no parent.
    parents: Vec<Option<(StateId, u8)>>,
    matches: Vec<Option<ByteMatch>>,
    free_matches: Vec<u32>,
    registry: HashMap<Pattern, PatternEntry>,
    /// Match ids of the inverted (anything-but) patterns, consulted after
    /// every traversal.
    exclusions: Vec<MatchId>,
    /// Live suffix patterns; the reversed run is skipped when zero.
    reversed_count: usize,
}

impl Default for ByteMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl ByteMachine {
    pub fn new() -> Self {
        Self {
            states: vec![Some(ByteState::default())],
            free_states: Vec::new(),
            parents: vec![None],
            matches: Vec::new(),
            free_matches: Vec::new(),
            registry: HashMap::new(),
            exclusions: Vec::new(),
            reversed_count: 0,
        }
    }

    /// True iff every pattern has been deleted: nothing remains at the
    /// root and the registry is drained.
    pub fn is_empty(&self) -> bool {
        self.registry.is_empty() && self.state(START).is_empty()
    }

    pub fn pattern_count(&self) -> usize {
        self.registry.len()
    }

    /// Live states, the start state included.
    pub fn state_count(&self) -> usize {
        self.states.iter().flatten().count()
    }

    pub fn start(&self) -> &ByteState {
        self.state(START)
    }

    fn state(&self, id: StateId) -> &ByteState {
        self.states[id.index()].as_ref().expect("live state")
    }

    fn state_mut(&mut self, id: StateId) -> &mut ByteState {
        self.states[id.index()].as_mut().expect("live state")
    }

    fn match_ref(&self, id: MatchId) -> &ByteMatch {
        self.matches[id.index()].as_ref().expect("live match")
    }

    fn alloc_state(&mut self) -> StateId {
        match self.free_states.pop() {
            Some(slot) => {
                self.states[slot as usize] = Some(ByteState::default());
                StateId(slot)
            }
            None => {
                self.states.push(Some(ByteState::default()));
                self.parents.push(None);
                StateId((self.states.len() - 1) as u32)
            }
        }
    }

    fn free_state(&mut self, id: StateId) {
        debug_assert_ne!(id, START);
        debug_assert!(self.states[id.index()].is_some());
        self.states[id.index()] = None;
        self.parents[id.index()] = None;
        self.free_states.push(id.0);
    }

    fn alloc_match(&mut self, m: ByteMatch) -> MatchId {
        match self.free_matches.pop() {
            Some(slot) => {
                self.matches[slot as usize] = Some(m);
                MatchId(slot)
            }
            None => {
                self.matches.push(Some(m));
                MatchId((self.matches.len() - 1) as u32)
            }
        }
    }

    fn free_match(&mut self, id: MatchId) {
        debug_assert!(self.matches[id.index()].is_some());
        self.matches[id.index()] = None;
        self.free_matches.push(id.0);
    }

    fn child(&self, s: StateId, byte: u8) -> Option<StateId> {
        self.state(s).edge(byte).and_then(ByteTransition::next)
    }

    fn ensure_child(&mut self, s: StateId, byte: u8) -> StateId {
        if let Some(c) = self.child(s, byte) {
            return c;
        }
        let c = self.alloc_state();
        self.state_mut(s).edge_mut(byte).set_next(c);
        self.parents[c.index()] = Some((s, byte));
        c
    }

    /// Mutates the machine so that, thereafter, [`transition_on`] for a
    /// matching value includes the name state linked to `pattern`. The
    /// name state is created via `make_target` on the first insertion of
    /// this pattern key and reused afterwards; the returned flag is true
    /// exactly when this call created the registry entry.
    ///
    /// [`transition_on`]: ByteMachine::transition_on
    pub fn add_pattern(
        &mut self,
        pattern: Pattern,
        make_target: impl FnOnce() -> NameStateId,
    ) -> (NameStateId, bool) {
        if let Some(entry) = self.registry.get_mut(&pattern) {
            entry.refs += 1;
            let next = self.matches[entry.match_id.index()]
                .as_ref()
                .expect("live match")
                .next;
            return (next, false);
        }

        let next = make_target();
        let immediate = match &pattern {
            // A trailing star makes the whole pattern prefix-like.
            Pattern::Wildcard(w) => w.segments().last() == Some(&Segment::Star),
            p => p.fires_immediately(),
        };
        let m = self.alloc_match(ByteMatch {
            pattern: pattern.clone(),
            next,
            immediate,
        });
        let plan = self.insert_structure(&pattern, m);
        if pattern.runs_reversed() {
            self.reversed_count += 1;
        }
        if pattern.is_exclusion() {
            self.exclusions.push(m);
        }
        self.registry.insert(
            pattern,
            PatternEntry {
                match_id: m,
                refs: 1,
                plan,
            },
        );
        (next, true)
    }

    /// The name state `pattern` leads to, if it is registered.
    pub fn find_pattern(&self, pattern: &Pattern) -> Option<NameStateId> {
        self.registry
            .get(pattern)
            .map(|e| self.match_ref(e.match_id).next)
    }

    /// Decrements the pattern's reference count, tearing down its
    /// structure when it reaches zero. Returns the name state it led to
    /// and whether the registry entry was removed; `None` when the pattern
    /// was never registered.
    pub fn delete_pattern(&mut self, pattern: &Pattern) -> Option<(NameStateId, bool)> {
        let entry = self.registry.get_mut(pattern)?;
        let m = entry.match_id;
        let next = self.matches[m.index()].as_ref().expect("live match").next;
        entry.refs -= 1;
        if entry.refs > 0 {
            return Some((next, false));
        }

        let entry = self.registry.remove(pattern).expect("entry just seen");
        self.tear_down(m, &entry.plan);
        if pattern.runs_reversed() {
            self.reversed_count -= 1;
        }
        if pattern.is_exclusion() {
            let at = self
                .exclusions
                .iter()
                .position(|&x| x == m)
                .expect("registered exclusion");
            self.exclusions.swap_remove(at);
        }
        self.free_match(m);
        Some((next, true))
    }

    // ---- insertion ----------------------------------------------------

    fn insert_structure(&mut self, pattern: &Pattern, m: MatchId) -> Vec<PlanOp> {
        let mut plan = Vec::new();
        match pattern {
            Pattern::Exact(s) | Pattern::NumericEq(s) => {
                self.insert_exact(s.as_bytes(), m, &mut plan)
            }
            Pattern::Prefix(s) | Pattern::AnythingButPrefix(s) => {
                self.insert_prefix(s.as_bytes(), m, &mut plan)
            }
            Pattern::Suffix(s) => {
                let reversed: Vec<u8> = s.bytes().rev().collect();
                self.insert_prefix(&reversed, m, &mut plan);
            }
            Pattern::EqualsIgnoreCase(s) => self.insert_ignore_case(s.as_bytes(), m, &mut plan),
            Pattern::Wildcard(w) => self.insert_wildcard(w.segments(), m, &mut plan),
            Pattern::Range(r) => self.insert_range(r, m, &mut plan),
            Pattern::AnythingBut(values) => {
                for v in values {
                    self.insert_exact(v.as_bytes(), m, &mut plan);
                }
            }
            Pattern::Exists => {
                self.state_mut(START).for_all_mut().add_match(m);
                plan.push(PlanOp::OverlayMatch { state: START });
            }
            Pattern::Absent => unreachable!("absence is resolved by the matching driver"),
        }
        plan
    }

    /// Walks existing children for `bytes[..len-1]`, expanding shortcuts
    /// that share the walked byte, then either compacts the fresh
    /// remainder into a shortcut or materializes it as a chain with an
    /// edge match on the final byte.
    fn insert_exact(&mut self, bytes: &[u8], m: MatchId, plan: &mut Vec<PlanOp>) {
        debug_assert!(!bytes.is_empty());
        let mut s = START;
        let mut i = 0;
        while i + 1 < bytes.len() {
            if let Some(c) = self.child(s, bytes[i]) {
                s = c;
                i += 1;
            } else if self.state(s).shortcut_index(bytes[i]).is_some() {
                self.expand_shortcut_step(s, bytes[i], m, plan);
            } else {
                break;
            }
        }
        let rem = &bytes[i..];
        if rem.len() >= 2 && !self.state(s).indeterminate_prefix() {
            debug_assert!(self.state(s).shortcut_index(rem[0]).is_none());
            self.state_mut(s).push_shortcut(Shortcut {
                bytes: rem.into(),
                match_id: m,
            });
            plan.push(PlanOp::ShortcutAt {
                state: s,
                first_byte: rem[0],
            });
        } else {
            for &b in &rem[..rem.len() - 1] {
                s = self.ensure_child(s, b);
            }
            let last = *rem.last().expect("non-empty remainder");
            self.state_mut(s).edge_mut(last).add_match(m);
            plan.push(PlanOp::EdgeMatch { state: s, byte: last });
        }
    }

    fn insert_prefix(&mut self, bytes: &[u8], m: MatchId, plan: &mut Vec<PlanOp>) {
        debug_assert!(!bytes.is_empty());
        let s = self.walk_create(START, &bytes[..bytes.len() - 1], m, plan);
        let last = bytes[bytes.len() - 1];
        self.state_mut(s).edge_mut(last).add_match(m);
        plan.push(PlanOp::EdgeMatch { state: s, byte: last });
    }

    /// Case-variant branches live on a private chain entered by side
    /// links, never merged into case-sensitive trie paths.
    fn insert_ignore_case(&mut self, bytes: &[u8], m: MatchId, plan: &mut Vec<PlanOp>) {
        debug_assert!(!bytes.is_empty());
        let mut s = START;
        let last = bytes.len() - 1;
        for (i, &b) in bytes.iter().enumerate() {
            let pair = [b.to_ascii_lowercase(), b.to_ascii_uppercase()];
            let single = [b];
            let variants: &[u8] = if b.is_ascii_alphabetic() {
                &pair
            } else {
                &single
            };
            if i == last {
                for &v in variants {
                    self.state_mut(s).edge_mut(v).add_match(m);
                    plan.push(PlanOp::EdgeMatch { state: s, byte: v });
                }
            } else {
                let next = self.alloc_state();
                plan.push(PlanOp::Private { state: next });
                for &v in variants {
                    self.state_mut(s).edge_mut(v).add_side(next);
                    plan.push(PlanOp::EdgeSide {
                        state: s,
                        byte: v,
                        target: next,
                    });
                }
                s = next;
            }
        }
    }

    /// The literal prefix before the first star walks the shared trie;
    /// everything after lives on private states. Each star becomes a
    /// self-looping state entered through the overlay of every current
    /// attach point, and the points set keeps the pre-star state so the
    /// star can also match the empty run.
    fn insert_wildcard(&mut self, segments: &[Segment], m: MatchId, plan: &mut Vec<PlanOp>) {
        let segments = match segments.last() {
            Some(Segment::Star) => &segments[..segments.len() - 1],
            _ => segments,
        };
        if segments.is_empty() {
            // Bare star: any non-empty value.
            self.state_mut(START).for_all_mut().add_match(m);
            plan.push(PlanOp::OverlayMatch { state: START });
            return;
        }

        let mut points: Vec<StateId> = vec![START];
        let mut private = false;
        let last_seg = segments.len() - 1;
        for (si, seg) in segments.iter().enumerate() {
            match seg {
                Segment::Star => {
                    let loop_state = self.alloc_state();
                    plan.push(PlanOp::Private { state: loop_state });
                    self.state_mut(loop_state).set_indeterminate_prefix();
                    self.state_mut(loop_state)
                        .for_all_mut()
                        .add_side(loop_state);
                    plan.push(PlanOp::OverlaySide {
                        state: loop_state,
                        target: loop_state,
                    });
                    for i in 0..points.len() {
                        let p = points[i];
                        self.state_mut(p).for_all_mut().add_side(loop_state);
                        plan.push(PlanOp::OverlaySide {
                            state: p,
                            target: loop_state,
                        });
                    }
                    points.push(loop_state);
                    private = true;
                }
                Segment::Literal(text) => {
                    let is_last_seg = si == last_seg;
                    if !private {
                        debug_assert_eq!(points.len(), 1);
                        if is_last_seg {
                            // Star-free source; degenerates to exact.
                            let s = self.walk_create(points[0], &text[..text.len() - 1], m, plan);
                            let b = text[text.len() - 1];
                            self.state_mut(s).edge_mut(b).add_match(m);
                            plan.push(PlanOp::EdgeMatch { state: s, byte: b });
                        } else {
                            points[0] = self.walk_create(points[0], text, m, plan);
                        }
                    } else {
                        for (bi, &b) in text.iter().enumerate() {
                            if is_last_seg && bi + 1 == text.len() {
                                for i in 0..points.len() {
                                    let p = points[i];
                                    self.state_mut(p).edge_mut(b).add_match(m);
                                    plan.push(PlanOp::EdgeMatch { state: p, byte: b });
                                }
                            } else {
                                let c = self.alloc_state();
                                plan.push(PlanOp::Private { state: c });
                                self.state_mut(c).set_indeterminate_prefix();
                                for i in 0..points.len() {
                                    let p = points[i];
                                    self.state_mut(p).edge_mut(b).add_side(c);
                                    plan.push(PlanOp::EdgeSide {
                                        state: p,
                                        byte: b,
                                        target: c,
                                    });
                                }
                                points.clear();
                                points.push(c);
                            }
                        }
                    }
                }
            }
        }
    }

    /// Digit-trie decomposition: walk the common prefix of the bounds,
    /// fan middle digits into an any-digit ladder, then thread the two
    /// bound chains with better-digit fans at every position.
    fn insert_range(&mut self, range: &Range, m: MatchId, plan: &mut Vec<PlanOp>) {
        let lo = range.bottom_digits().to_vec();
        let hi = range.top_digits().to_vec();
        let w = lo.len();
        debug_assert_eq!(hi.len(), w);

        let mut ladder: Vec<StateId> = Vec::new();
        let mut s = START;
        let mut j = 0;
        while j < w && lo[j] == hi[j] {
            if j + 1 == w {
                // Degenerate single-point interval.
                if !range.open_bottom() && !range.open_top() {
                    self.state_mut(s).edge_mut(lo[j]).add_match(m);
                    plan.push(PlanOp::EdgeMatch { state: s, byte: lo[j] });
                }
                return;
            }
            s = self.walk_create(s, &lo[j..=j], m, plan);
            j += 1;
        }

        let k = w - j - 1;
        let (lo_i, hi_i) = (hex_index(lo[j]), hex_index(hi[j]));
        if k == 0 {
            // The last digit decides; openness trims the endpoints.
            let from = lo_i + usize::from(range.open_bottom());
            let to = hi_i + 1 - usize::from(range.open_top());
            for &d in &HEX_DIGITS[from..to] {
                self.state_mut(s).edge_mut(d).add_match(m);
                plan.push(PlanOp::EdgeMatch { state: s, byte: d });
            }
            return;
        }

        let head = self.ladder_head(&mut ladder, k, m, plan);
        for &d in &HEX_DIGITS[lo_i + 1..hi_i] {
            self.state_mut(s).edge_mut(d).add_side(head);
            plan.push(PlanOp::EdgeSide {
                state: s,
                byte: d,
                target: head,
            });
        }

        let s_lo = self.walk_create(s, &lo[j..=j], m, plan);
        self.insert_bound_chain(s_lo, &lo, j + 1, true, range.open_bottom(), m, &mut ladder, plan);
        let s_hi = self.walk_create(s, &hi[j..=j], m, plan);
        self.insert_bound_chain(s_hi, &hi, j + 1, false, range.open_top(), m, &mut ladder, plan);
    }

    #[allow(clippy::too_many_arguments)]
    fn insert_bound_chain(
        &mut self,
        mut s: StateId,
        bound: &[u8],
        start: usize,
        lower: bool,
        open: bool,
        m: MatchId,
        ladder: &mut Vec<StateId>,
        plan: &mut Vec<PlanOp>,
    ) {
        let w = bound.len();
        for j in start..w {
            let k = w - j - 1;
            let i = hex_index(bound[j]);
            let better: &[u8] = if lower {
                &HEX_DIGITS[i + 1..]
            } else {
                &HEX_DIGITS[..i]
            };
            if k == 0 {
                for &d in better {
                    self.state_mut(s).edge_mut(d).add_match(m);
                    plan.push(PlanOp::EdgeMatch { state: s, byte: d });
                }
                if !open {
                    self.state_mut(s).edge_mut(bound[j]).add_match(m);
                    plan.push(PlanOp::EdgeMatch {
                        state: s,
                        byte: bound[j],
                    });
                }
                return;
            }
            if !better.is_empty() {
                let head = self.ladder_head(ladder, k, m, plan);
                for &d in better {
                    self.state_mut(s).edge_mut(d).add_side(head);
                    plan.push(PlanOp::EdgeSide {
                        state: s,
                        byte: d,
                        target: head,
                    });
                }
            }
            s = self.walk_create(s, &bound[j..=j], m, plan);
        }
    }

    /// `ladder[i]` accepts exactly `i + 1` further digits and then fires
    /// `m`; one ladder is shared by all fans of a single insertion.
    fn ladder_head(
        &mut self,
        ladder: &mut Vec<StateId>,
        k: usize,
        m: MatchId,
        plan: &mut Vec<PlanOp>,
    ) -> StateId {
        while ladder.len() < k {
            let state = self.alloc_state();
            plan.push(PlanOp::Private { state });
            match ladder.last() {
                None => {
                    self.state_mut(state).for_all_mut().add_match(m);
                    plan.push(PlanOp::OverlayMatch { state });
                }
                Some(&below) => {
                    self.state_mut(state).for_all_mut().add_side(below);
                    plan.push(PlanOp::OverlaySide {
                        state,
                        target: below,
                    });
                }
            }
            ladder.push(state);
        }
        ladder[k - 1]
    }

    /// Descends through existing children for each byte, creating missing
    /// ones and expanding any shortcut that blocks the walked byte.
    fn walk_create(
        &mut self,
        mut s: StateId,
        bytes: &[u8],
        me: MatchId,
        plan: &mut Vec<PlanOp>,
    ) -> StateId {
        for &b in bytes {
            loop {
                if let Some(c) = self.child(s, b) {
                    s = c;
                    break;
                }
                if self.state(s).shortcut_index(b).is_some() {
                    self.expand_shortcut_step(s, b, me, plan);
                    continue;
                }
                s = self.ensure_child(s, b);
                break;
            }
        }
        s
    }

    /// Re-expands one step of a shortcut in place: materialize its first
    /// byte as a real child and push the remainder down (or convert a
    /// two-byte remainder into a plain edge match). The owning pattern's
    /// teardown plan is rewritten to the new location; `me`/`my_plan`
    /// cover the pattern currently being inserted, whose registry entry
    /// does not exist yet.
    fn expand_shortcut_step(
        &mut self,
        s: StateId,
        first_byte: u8,
        me: MatchId,
        my_plan: &mut Vec<PlanOp>,
    ) {
        let idx = self
            .state(s)
            .shortcut_index(first_byte)
            .expect("shortcut present");
        let sc = self.state_mut(s).remove_shortcut_at(idx);
        let c = self.ensure_child(s, sc.bytes[0]);
        let rest = &sc.bytes[1..];
        let new_op = match rest.len() {
            0 => unreachable!("shortcuts hold at least two bytes"),
            1 => {
                self.state_mut(c).edge_mut(rest[0]).add_match(sc.match_id);
                PlanOp::EdgeMatch {
                    state: c,
                    byte: rest[0],
                }
            }
            _ => {
                self.state_mut(c).push_shortcut(Shortcut {
                    bytes: rest.into(),
                    match_id: sc.match_id,
                });
                PlanOp::ShortcutAt {
                    state: c,
                    first_byte: rest[0],
                }
            }
        };
        let old = PlanOp::ShortcutAt {
            state: s,
            first_byte,
        };
        let plan = if sc.match_id == me {
            my_plan
        } else {
            let pattern = self.match_ref(sc.match_id).pattern.clone();
            &mut self
                .registry
                .get_mut(&pattern)
                .expect("registered pattern")
                .plan
        };
        let op = plan
            .iter_mut()
            .find(|op| **op == old)
            .expect("plan op for relocated shortcut");
        *op = new_op;
    }

    // ---- deletion -----------------------------------------------------

    fn tear_down(&mut self, m: MatchId, plan: &[PlanOp]) {
        let private: HashSet<StateId> = plan
            .iter()
            .filter_map(|op| match op {
                PlanOp::Private { state } => Some(*state),
                _ => None,
            })
            .collect();
        let mut touched: Vec<StateId> = Vec::new();

        for &op in plan {
            match op {
                PlanOp::EdgeMatch { state, byte } => {
                    if !private.contains(&state) {
                        self.state_mut(state).edge_mut(byte).remove_match(m);
                        self.state_mut(state).prune_edge(byte);
                        touched.push(state);
                    }
                }
                PlanOp::OverlayMatch { state } => {
                    if !private.contains(&state) {
                        self.state_mut(state).for_all_mut().remove_match(m);
                        touched.push(state);
                    }
                }
                PlanOp::EdgeSide { state, byte, target } => {
                    if !private.contains(&state) {
                        self.state_mut(state).edge_mut(byte).remove_side(target);
                        self.state_mut(state).prune_edge(byte);
                        touched.push(state);
                    }
                }
                PlanOp::OverlaySide { state, target } => {
                    if !private.contains(&state) {
                        self.state_mut(state).for_all_mut().remove_side(target);
                        touched.push(state);
                    }
                }
                PlanOp::ShortcutAt { state, first_byte } => {
                    let idx = self
                        .state(state)
                        .shortcut_index(first_byte)
                        .expect("shortcut present");
                    let sc = self.state_mut(state).remove_shortcut_at(idx);
                    debug_assert_eq!(sc.match_id, m);
                    touched.push(state);
                }
                PlanOp::Private { .. } => {}
            }
        }

        for &p in &private {
            self.free_state(p);
        }
        touched.sort_unstable();
        touched.dedup();
        for s in touched {
            self.prune_from(s);
        }
    }

    /// Frees states that ended up with no content, walking parent edges
    /// toward the root.
    fn prune_from(&mut self, mut s: StateId) {
        loop {
            if s == START || self.states[s.index()].is_none() {
                return;
            }
            let removable = {
                let st = self.state(s);
                st.is_empty() || st.has_only_self_referential_transition(s)
            };
            if !removable {
                return;
            }
            let Some((parent, byte)) = self.parents[s.index()] else {
                return;
            };
            self.free_state(s);
            let edge = self.state_mut(parent).edge_mut(byte);
            debug_assert_eq!(edge.next(), Some(s));
            edge.clear_next();
            self.state_mut(parent).prune_edge(byte);
            s = parent;
        }
    }

    // ---- traversal ----------------------------------------------------

    /// Runs `value` through the machine and returns, for every satisfied
    /// pattern, the pattern and the name state it links to. `canonical`
    /// carries the value's canonical numeric key when the value is
    /// number-typed.
    pub fn transition_on(&self, value: &[u8], canonical: Option<&str>) -> Vec<(&Pattern, NameStateId)> {
        let mut matched: Vec<MatchId> = Vec::new();
        self.run(value, Lane::Forward, &mut matched);
        if self.reversed_count > 0 {
            let reversed: Vec<u8> = value.iter().rev().copied().collect();
            self.run(&reversed, Lane::Reversed, &mut matched);
        }
        if let Some(key) = canonical {
            self.run(key.as_bytes(), Lane::Forward, &mut matched);
        }
        matched.sort_unstable();
        matched.dedup();

        let mut out: Vec<(&Pattern, NameStateId)> = matched
            .iter()
            .map(|&m| self.match_ref(m))
            .filter(|bm| !bm.pattern.is_exclusion())
            .map(|bm| (&bm.pattern, bm.next))
            .collect();
        for &x in &self.exclusions {
            if matched.binary_search(&x).is_err() {
                let bm = self.match_ref(x);
                out.push((&bm.pattern, bm.next));
            }
        }
        out
    }

    fn run(&self, bytes: &[u8], lane: Lane, matched: &mut Vec<MatchId>) {
        if bytes.is_empty() {
            return;
        }
        let mut positions: Vec<Pos> = vec![Pos::State(START)];
        let mut next: Vec<Pos> = Vec::new();
        for (i, &b) in bytes.iter().enumerate() {
            let last = i + 1 == bytes.len();
            next.clear();
            for &pos in &positions {
                match pos {
                    Pos::State(s) => {
                        let st = self.state(s);
                        if let Some(t) = st.edge(b) {
                            self.follow(t, lane, last, matched, &mut next);
                        }
                        if !st.for_all().is_empty() {
                            self.follow(st.for_all(), lane, last, matched, &mut next);
                        }
                        for (slot, sc) in st.shortcuts().iter().enumerate() {
                            if sc.first_byte() == b {
                                next.push(Pos::Cut {
                                    state: s,
                                    slot: slot as u32,
                                    offset: 1,
                                });
                            }
                        }
                    }
                    Pos::Cut {
                        state,
                        slot,
                        offset,
                    } => {
                        let sc = &self.state(state).shortcuts()[slot as usize];
                        if sc.bytes[offset as usize] == b {
                            if offset as usize + 1 == sc.bytes.len() {
                                if last && self.lane_accepts(lane, sc.match_id) {
                                    matched.push(sc.match_id);
                                }
                            } else {
                                next.push(Pos::Cut {
                                    state,
                                    slot,
                                    offset: offset + 1,
                                });
                            }
                        }
                    }
                }
            }
            next.sort_unstable();
            next.dedup();
            std::mem::swap(&mut positions, &mut next);
            if positions.is_empty() {
                return;
            }
        }
    }

    fn follow(
        &self,
        t: &ByteTransition,
        lane: Lane,
        last: bool,
        matched: &mut Vec<MatchId>,
        next: &mut Vec<Pos>,
    ) {
        for &m in t.matches() {
            if self.lane_accepts(lane, m) && (last || self.match_ref(m).immediate) {
                matched.push(m);
            }
        }
        for target in t.targets() {
            next.push(Pos::State(target));
        }
    }

    fn lane_accepts(&self, lane: Lane, m: MatchId) -> bool {
        let reversed = self.match_ref(m).pattern.runs_reversed();
        match lane {
            Lane::Forward => !reversed,
            Lane::Reversed => reversed,
        }
    }

    // ---- diagnostics --------------------------------------------------

    /// Upper bound on the number of wildcard fans that can be active at
    /// once during one traversal: reachable states carrying a
    /// for-all-bytes overlay, discovered run by run via the ceilings of
    /// each state's transition function.
    pub fn evaluate_complexity(&self) -> usize {
        let mut seen = vec![false; self.states.len()];
        seen[START.index()] = true;
        let mut stack = vec![START];
        let mut fans = 0;
        while let Some(s) = stack.pop() {
            let st = self.state(s);
            if !st.for_all().is_empty() {
                fans += 1;
            }
            let mut floor: u16 = 0;
            for ceiling in st.get_ceilings() {
                let t = st.get_transition(floor as u8);
                for target in t.targets() {
                    if !seen[target.index()] {
                        seen[target.index()] = true;
                        stack.push(target);
                    }
                }
                floor = ceiling;
                if floor > 255 {
                    break;
                }
            }
        }
        fans
    }

    /// Live states plus live matches; a leak detector for tests.
    pub fn approximate_object_count(&self) -> usize {
        self.state_count() + self.matches.iter().flatten().count()
    }
}
