use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};

use crate::{automaton::ByteMachine, pattern::Pattern};

/// Index of a [`NameState`] in its machine's arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NameStateId(u32);

impl NameStateId {
    pub(crate) fn from_index(index: u32) -> Self {
        NameStateId(index)
    }

    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// One conjunction of field predicates contributing to a named rule. The
/// id is what distinguishes two sub-rules of the same rule; ids are
/// doubles handed out by [`Generator`] in next-representable-up order, so
/// independent generators produce identical sequences.
#[derive(Clone, Debug)]
pub struct SubRuleContext<R> {
    id: f64,
    rule: R,
}

impl<R> SubRuleContext<R> {
    pub fn id(&self) -> f64 {
        self.id
    }

    /// The id in set-key form; ids are unique per generator, so the bits
    /// identify a sub-rule within one machine.
    pub(crate) fn id_bits(&self) -> u64 {
        self.id.to_bits()
    }

    pub fn rule(&self) -> &R {
        &self.rule
    }
}

impl<R: PartialEq> PartialEq for SubRuleContext<R> {
    fn eq(&self, other: &Self) -> bool {
        self.id.to_bits() == other.id.to_bits() && self.rule == other.rule
    }
}

impl<R: Eq> Eq for SubRuleContext<R> {}

impl<R: Hash> Hash for SubRuleContext<R> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.id.to_bits());
        self.rule.hash(state);
    }
}

/// Hands out sub-rule ids, starting at the smallest representable double
/// and advancing by one representable step per call. Instance-scoped: the
/// sequence depends only on the call order.
#[derive(Clone, Debug)]
pub struct Generator {
    next: f64,
}

impl Generator {
    pub fn new() -> Self {
        Self { next: -f64::MAX }
    }

    pub fn generate<R>(&mut self, rule: R) -> SubRuleContext<R> {
        let id = self.next;
        self.next = self.next.next_up();
        SubRuleContext { id, rule }
    }
}

impl Default for Generator {
    fn default() -> Self {
        Self::new()
    }
}

/// Automaton node representing "all sub-rules matched up to and including
/// one field": per next field name, the byte machine holding that field's
/// predicates and the epsilon edge taken when the field is absent; per
/// pattern, the sub-rules completed here (terminal) or passing through
/// (non-terminal).
pub(crate) struct NameState<R> {
    value_transitions: HashMap<String, ByteMachine>,
    absent_transitions: HashMap<String, NameStateId>,
    terminal: HashMap<Pattern, HashSet<SubRuleContext<R>>>,
    non_terminal: HashMap<Pattern, HashSet<SubRuleContext<R>>>,
    /// Incoming references: byte-machine registry entries plus absent
    /// links. A name state persists while any sub-rule references it.
    refs: usize,
}

impl<R> Default for NameState<R> {
    fn default() -> Self {
        Self {
            value_transitions: HashMap::new(),
            absent_transitions: HashMap::new(),
            terminal: HashMap::new(),
            non_terminal: HashMap::new(),
            refs: 0,
        }
    }
}

impl<R: Clone + Eq + Hash> NameState<R> {
    pub fn machine(&self, field: &str) -> Option<&ByteMachine> {
        self.value_transitions.get(field)
    }

    pub fn machine_mut(&mut self, field: &str) -> &mut ByteMachine {
        self.value_transitions.entry(field.to_owned()).or_default()
    }

    pub fn drop_machine_if_empty(&mut self, field: &str) {
        if self.value_transitions.get(field).is_some_and(ByteMachine::is_empty) {
            self.value_transitions.remove(field);
        }
    }

    pub fn machines(&self) -> impl Iterator<Item = (&str, &ByteMachine)> {
        self.value_transitions.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// False for leaf states; lets the driver skip the field scan.
    pub fn has_machines(&self) -> bool {
        !self.value_transitions.is_empty()
    }

    pub fn absent(&self, field: &str) -> Option<NameStateId> {
        self.absent_transitions.get(field).copied()
    }

    pub fn absents(&self) -> impl Iterator<Item = (&str, NameStateId)> {
        self.absent_transitions.iter().map(|(k, &v)| (k.as_str(), v))
    }

    pub fn set_absent(&mut self, field: &str, target: NameStateId) {
        self.absent_transitions.insert(field.to_owned(), target);
    }

    pub fn remove_absent(&mut self, field: &str) {
        self.absent_transitions.remove(field);
    }

    /// Stores `ctx` under `pattern` in the terminal or non-terminal
    /// bucket. A context lives in exactly one bucket per pattern key.
    pub fn add_sub_rule(&mut self, ctx: SubRuleContext<R>, pattern: Pattern, terminal: bool) {
        let bucket = if terminal {
            &mut self.terminal
        } else {
            &mut self.non_terminal
        };
        bucket.entry(pattern).or_default().insert(ctx);
    }

    /// Removes every context of `rule` stored under `pattern`, in both
    /// buckets. Absent pairs are a no-op; returns whether anything was
    /// removed.
    pub fn delete_sub_rule(&mut self, rule: &R, pattern: &Pattern) -> bool {
        let mut removed = false;
        for bucket in [&mut self.terminal, &mut self.non_terminal] {
            if let Some(set) = bucket.get_mut(pattern) {
                let before = set.len();
                set.retain(|ctx| ctx.rule() != rule);
                removed |= set.len() != before;
                if set.is_empty() {
                    bucket.remove(pattern);
                }
            }
        }
        removed
    }

    pub fn contains_rule(&self, rule: &R, pattern: &Pattern) -> bool {
        [&self.terminal, &self.non_terminal].iter().any(|bucket| {
            bucket
                .get(pattern)
                .is_some_and(|set| set.iter().any(|ctx| ctx.rule() == rule))
        })
    }

    pub fn has_terminal(&self, rule: &R, pattern: &Pattern) -> bool {
        self.terminal
            .get(pattern)
            .is_some_and(|set| set.iter().any(|ctx| ctx.rule() == rule))
    }

    /// Contexts stored under `pattern`, terminal and non-terminal alike,
    /// as sorted id bits: the sub-rules still viable after arriving here
    /// through `pattern`.
    pub fn viable_ids(&self, pattern: &Pattern) -> Vec<u64> {
        let mut ids: Vec<u64> = [&self.terminal, &self.non_terminal]
            .into_iter()
            .filter_map(|bucket| bucket.get(pattern))
            .flatten()
            .map(SubRuleContext::id_bits)
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Sub-rules completed on arrival through `pattern`.
    pub fn terminal_ctxs(&self, pattern: &Pattern) -> impl Iterator<Item = &SubRuleContext<R>> {
        self.terminal.get(pattern).into_iter().flatten()
    }

    /// True when no sub-rule stores anything under `pattern` anymore.
    pub fn pattern_unreferenced(&self, pattern: &Pattern) -> bool {
        !self.terminal.contains_key(pattern) && !self.non_terminal.contains_key(pattern)
    }

    pub fn inc_ref(&mut self) {
        self.refs += 1;
    }

    pub fn dec_ref(&mut self) {
        debug_assert!(self.refs > 0);
        self.refs -= 1;
    }

    pub fn refs(&self) -> usize {
        self.refs
    }

    pub fn is_empty(&self) -> bool {
        self.value_transitions.is_empty()
            && self.absent_transitions.is_empty()
            && self.terminal.is_empty()
            && self.non_terminal.is_empty()
    }

    pub fn machine_object_count(&self) -> usize {
        self.value_transitions
            .values()
            .map(ByteMachine::approximate_object_count)
            .sum()
    }
}
