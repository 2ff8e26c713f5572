/*!
The rule machine: compile rules in, stream events through, get rule names
back.

Rules are threaded as chains of [`NameState`]s, one per field step, each
holding the byte machines for the next fields, and matching walks the
flattened event against that graph with an explicit step worklist. Steps
carry the array membership accumulated so far (conflicting memberships are
pruned on the spot, which is the array-consistency filter) and are
memoized so pathological events stay linear.

## Example
```
use rulesieve::Machine;

let mut machine = Machine::default();
machine
    .add_rule("shipped".to_string(), r#"{"status": ["shipped"], "weight": [{"numeric": ["<", 100]}]}"#)
    .unwrap();
assert_eq!(
    machine.rules_for_json_event(r#"{"status": "shipped", "weight": 3.5}"#).unwrap(),
    vec!["shipped".to_string()]
);
```
*/

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::hash::Hash;
use std::rc::Rc;

use bon::bon;
use rulesieve_intmap::{IntIntMap, NO_VALUE};
use serde_json::Value;
use tracing::debug;

use crate::{
    compiler::{self, SubRuleSpec},
    error::{Error, Result},
    event::{ArrayMembership, Event, Field},
    numeric,
    pattern::Pattern,
};

pub mod name_state;

use name_state::{Generator, NameState, NameStateId};

/// The ordinary machine, keyed by string rule names.
pub type Machine = GenericMachine<String>;

/// A rule machine generic over the rule-name type.
pub struct GenericMachine<R> {
    states: Vec<Option<NameState<R>>>,
    free: Vec<u32>,
    generator: Generator,
    additional_name_state_reuse: bool,
}

/// One unit of matching work: a name state, the first field index still
/// worth looking at, the interned membership accumulated along the path,
/// and, under name-state reuse, the sub-rules still viable.
struct Step {
    state: NameStateId,
    from: usize,
    mem: u32,
    candidates: Option<Rc<Vec<u64>>>,
}

/// Per-evaluation scratch: membership interning, step memoization and the
/// result set.
struct Search<R> {
    memberships: Vec<ArrayMembership>,
    membership_ids: HashMap<ArrayMembership, u32>,
    /// Fast-path memo for candidate-free steps, packed into int keys.
    seen_packed: IntIntMap,
    /// Exact memo for steps that carry candidate sets (or overflow the
    /// packing widths).
    seen_rich: HashSet<(usize, usize, u32, Vec<u64>)>,
    work: Vec<Step>,
    found: HashSet<R>,
}

impl<R> Search<R> {
    fn new() -> Self {
        Self {
            memberships: vec![ArrayMembership::default()],
            membership_ids: HashMap::from([(ArrayMembership::default(), 0)]),
            seen_packed: IntIntMap::new(),
            seen_rich: HashSet::new(),
            work: Vec::new(),
            found: HashSet::new(),
        }
    }

    fn intern(&mut self, membership: ArrayMembership) -> u32 {
        if let Some(&id) = self.membership_ids.get(&membership) {
            return id;
        }
        let id = self.memberships.len() as u32;
        self.memberships.push(membership.clone());
        self.membership_ids.insert(membership, id);
        id
    }
}

fn pack_step(state: NameStateId, from: usize, mem: u32) -> Option<i64> {
    let (s, f, m) = (state.index() as u64, from as u64, mem as u64);
    (s < (1 << 22) && f < (1 << 20) && m < (1 << 20))
        .then(|| ((s << 40) | (f << 20) | m) as i64)
}

fn intersect_sorted(a: &[u64], b: &[u64]) -> Vec<u64> {
    let mut out = Vec::with_capacity(a.len().min(b.len()));
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        match a[i].cmp(&b[j]) {
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => {
                out.push(a[i]);
                i += 1;
                j += 1;
            }
        }
    }
    out
}

fn is_absence(patterns: &[Pattern]) -> bool {
    matches!(patterns, [Pattern::Absent])
}

#[bon]
impl<R: Clone + Eq + Hash + fmt::Debug> GenericMachine<R> {
    #[builder]
    pub fn new(
        /// Share equivalent downstream name states across independently
        /// inserted compatible sub-rules: a smaller machine at the cost
        /// of candidate-set tracking during matching.
        #[builder(default = false)]
        additional_name_state_reuse: bool,
    ) -> Self {
        Self {
            states: vec![Some(NameState::default())],
            free: Vec::new(),
            generator: Generator::new(),
            additional_name_state_reuse,
        }
    }
}

impl<R: Clone + Eq + Hash + fmt::Debug> Default for GenericMachine<R> {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl<R: Clone + Eq + Hash + fmt::Debug> GenericMachine<R> {
    fn start_id(&self) -> NameStateId {
        NameStateId::from_index(0)
    }

    fn state(&self, id: NameStateId) -> &NameState<R> {
        self.states[id.index()].as_ref().expect("live name state")
    }

    fn state_mut(&mut self, id: NameStateId) -> &mut NameState<R> {
        self.states[id.index()].as_mut().expect("live name state")
    }

    fn alloc(&mut self) -> NameStateId {
        match self.free.pop() {
            Some(slot) => {
                self.states[slot as usize] = Some(NameState::default());
                NameStateId::from_index(slot)
            }
            None => {
                self.states.push(Some(NameState::default()));
                NameStateId::from_index((self.states.len() - 1) as u32)
            }
        }
    }

    fn free_if_unused(&mut self, id: NameStateId) {
        if id == self.start_id() {
            return;
        }
        if let Some(ns) = &self.states[id.index()] {
            if ns.refs() == 0 && ns.is_empty() {
                self.states[id.index()] = None;
                self.free.push(id.index() as u32);
            }
        }
    }

    // ---- mutation -----------------------------------------------------

    /// Parses and inserts one rule; a disjunction expands into several
    /// sub-rules. All validation happens before the first mutation, so a
    /// failed call leaves the machine untouched. Re-adding an identical
    /// rule is a no-op.
    pub fn add_rule(&mut self, rule: R, definition: &str) -> Result<()> {
        let value: Value =
            serde_json::from_str(definition).map_err(|e| Error::InvalidRule(e.to_string()))?;
        self.add_rule_from_value(rule, &value)
    }

    pub fn add_rule_from_value(&mut self, rule: R, definition: &Value) -> Result<()> {
        let specs = compiler::compile(definition)?;
        debug!(rule = ?rule, sub_rules = specs.len(), "adding rule");
        for spec in &specs {
            self.add_sub_rule(rule.clone(), spec);
        }
        Ok(())
    }

    /// Exact inverse of [`add_rule`](GenericMachine::add_rule). Deleting
    /// a rule that was never added (or was already deleted) is a no-op.
    pub fn delete_rule(&mut self, rule: &R, definition: &str) -> Result<()> {
        let value: Value =
            serde_json::from_str(definition).map_err(|e| Error::InvalidRule(e.to_string()))?;
        self.delete_rule_from_value(rule, &value)
    }

    pub fn delete_rule_from_value(&mut self, rule: &R, definition: &Value) -> Result<()> {
        let specs = compiler::compile(definition)?;
        debug!(rule = ?rule, sub_rules = specs.len(), "deleting rule");
        for spec in &specs {
            self.delete_sub_rule(rule, spec);
        }
        Ok(())
    }

    fn add_sub_rule(&mut self, rule: R, spec: &SubRuleSpec) {
        if self.contains_sub_rule(&rule, spec) {
            return;
        }
        let ctx = self.generator.generate(rule);
        let mut current = vec![self.start_id()];
        let steps = spec.len();
        for (i, (field, patterns)) in spec.iter().enumerate() {
            let terminal = i + 1 == steps;
            let mut next: Vec<NameStateId> = Vec::new();
            let mut registrations: Vec<(NameStateId, Pattern)> = Vec::new();
            for &s in &current {
                if is_absence(patterns) {
                    let target = match self.state(s).absent(field) {
                        Some(t) => t,
                        None => {
                            let t = self.alloc();
                            self.state_mut(s).set_absent(field, t);
                            self.state_mut(t).inc_ref();
                            t
                        }
                    };
                    next.push(target);
                    registrations.push((target, Pattern::Absent));
                } else {
                    let shared = if self.additional_name_state_reuse {
                        self.state(s)
                            .machine(field)
                            .and_then(|bm| patterns.iter().find_map(|p| bm.find_pattern(p)))
                    } else {
                        None
                    };
                    let step_target = shared.unwrap_or_else(|| self.alloc());
                    let mut used = shared.is_some();
                    for p in patterns {
                        let (t, created) = self
                            .state_mut(s)
                            .machine_mut(field)
                            .add_pattern(p.clone(), || step_target);
                        if created {
                            used = true;
                            self.state_mut(t).inc_ref();
                        }
                        next.push(t);
                        registrations.push((t, p.clone()));
                    }
                    if !used {
                        self.free_if_unused(step_target);
                    }
                }
            }
            for (t, p) in registrations {
                self.state_mut(t).add_sub_rule(ctx.clone(), p, terminal);
            }
            next.sort_unstable();
            next.dedup();
            current = next;
        }
    }

    /// True when this exact (rule, sub-rule) is already threaded through
    /// the machine, terminal context included.
    fn contains_sub_rule(&self, rule: &R, spec: &SubRuleSpec) -> bool {
        let mut current = vec![self.start_id()];
        let mut final_pairs: Vec<(NameStateId, &Pattern)> = Vec::new();
        let steps = spec.len();
        for (i, (field, patterns)) in spec.iter().enumerate() {
            let terminal = i + 1 == steps;
            let mut next = Vec::new();
            for &s in &current {
                if is_absence(patterns) {
                    let Some(t) = self.state(s).absent(field) else {
                        return false;
                    };
                    if terminal {
                        final_pairs.push((t, &patterns[0]));
                    } else if !self.state(t).contains_rule(rule, &patterns[0]) {
                        return false;
                    }
                    next.push(t);
                } else {
                    let Some(bm) = self.state(s).machine(field) else {
                        return false;
                    };
                    for p in patterns {
                        let Some(t) = bm.find_pattern(p) else {
                            return false;
                        };
                        if terminal {
                            final_pairs.push((t, p));
                        } else if !self.state(t).contains_rule(rule, p) {
                            return false;
                        }
                        next.push(t);
                    }
                }
            }
            next.sort_unstable();
            next.dedup();
            current = next;
        }
        final_pairs
            .iter()
            .all(|(t, p)| self.state(*t).has_terminal(rule, p))
    }

    fn delete_sub_rule(&mut self, rule: &R, spec: &SubRuleSpec) {
        struct DeleteOp {
            parent: NameStateId,
            field: String,
            pattern: Pattern,
            target: NameStateId,
            last: bool,
        }

        // Read-only walk first: if any piece is missing, the sub-rule is
        // not present and the whole deletion is a no-op.
        let mut current = vec![self.start_id()];
        let mut ops: Vec<DeleteOp> = Vec::new();
        let steps = spec.len();
        for (i, (field, patterns)) in spec.iter().enumerate() {
            let last = i + 1 == steps;
            let mut next = Vec::new();
            for &s in &current {
                if is_absence(patterns) {
                    let Some(t) = self.state(s).absent(field) else {
                        return;
                    };
                    ops.push(DeleteOp {
                        parent: s,
                        field: field.clone(),
                        pattern: Pattern::Absent,
                        target: t,
                        last,
                    });
                    next.push(t);
                } else {
                    let Some(bm) = self.state(s).machine(field) else {
                        return;
                    };
                    for p in patterns {
                        let Some(t) = bm.find_pattern(p) else {
                            return;
                        };
                        ops.push(DeleteOp {
                            parent: s,
                            field: field.clone(),
                            pattern: p.clone(),
                            target: t,
                            last,
                        });
                        next.push(t);
                    }
                }
            }
            next.sort_unstable();
            next.dedup();
            current = next;
        }
        // Ownership check: only proceed when the terminal contexts are
        // actually this rule's (deleting someone else's identical
        // patterns would corrupt their reference counts).
        if !ops
            .iter()
            .filter(|op| op.last)
            .all(|op| self.state(op.target).has_terminal(rule, &op.pattern))
        {
            return;
        }

        for op in &ops {
            self.state_mut(op.target).delete_sub_rule(rule, &op.pattern);
            if op.pattern == Pattern::Absent {
                if self.state(op.target).pattern_unreferenced(&Pattern::Absent) {
                    self.state_mut(op.parent).remove_absent(&op.field);
                    self.state_mut(op.target).dec_ref();
                }
            } else {
                let deleted = self
                    .state_mut(op.parent)
                    .machine_mut(&op.field)
                    .delete_pattern(&op.pattern);
                if let Some((t, removed)) = deleted {
                    debug_assert_eq!(t, op.target);
                    if removed {
                        self.state_mut(op.target).dec_ref();
                    }
                }
                self.state_mut(op.parent).drop_machine_if_empty(&op.field);
            }
        }
        // Leaf-first cleanup of states nothing references anymore.
        for op in ops.iter().rev() {
            self.free_if_unused(op.target);
        }
    }

    // ---- matching -----------------------------------------------------

    /// The fast path: flatten the event, walk the name-state graph,
    /// enforce array consistency, return the matching rule names (no
    /// duplicates, order unspecified).
    pub fn rules_for_json_event(&self, event_json: &str) -> Result<Vec<R>> {
        let event = Event::from_json(event_json)?;
        Ok(self.rules_for_fields(&event))
    }

    pub fn rules_for_json_value(&self, event: &Value) -> Result<Vec<R>> {
        let event = Event::from_value(event)?;
        Ok(self.rules_for_fields(&event))
    }

    /// Compatibility path over a pre-flattened name → values map. Values
    /// are expected in normal form (strings carrying their JSON quotes).
    /// No array-consistency is enforced here, so matches can be broader
    /// than [`rules_for_json_event`](GenericMachine::rules_for_json_event);
    /// prefer the JSON path.
    pub fn rules_for_event(&self, event: &HashMap<String, Vec<String>>) -> Vec<R> {
        let fields = event
            .iter()
            .flat_map(|(name, values)| {
                values.iter().map(|value| Field {
                    name: name.clone(),
                    value: value.clone(),
                    canonical: numeric::canonicalize_str(value).ok(),
                    membership: ArrayMembership::default(),
                })
            })
            .collect();
        self.rules_for_fields(&Event::from_fields(fields))
    }

    fn rules_for_fields(&self, event: &Event) -> Vec<R> {
        let fields = event.fields();
        let mut search = Search::new();
        if let Some(key) = pack_step(self.start_id(), 0, 0) {
            search.seen_packed.put(key, 1);
        }
        search.work.push(Step {
            state: self.start_id(),
            from: 0,
            mem: 0,
            candidates: None,
        });

        while let Some(step) = search.work.pop() {
            let ns = self.state(step.state);
            for (field, target) in ns.absents() {
                if !event.contains_name(field) {
                    self.arrive(
                        target,
                        &Pattern::Absent,
                        step.from,
                        step.mem,
                        &step.candidates,
                        &mut search,
                    );
                }
            }
            if !ns.has_machines() {
                continue;
            }
            for (i, field) in fields.iter().enumerate().skip(step.from) {
                let Some(bm) = ns.machine(&field.name) else {
                    continue;
                };
                let results = bm.transition_on(field.value.as_bytes(), field.canonical.as_deref());
                if results.is_empty() {
                    continue;
                }
                let Some(merged) =
                    search.memberships[step.mem as usize].merge(&field.membership)
                else {
                    continue;
                };
                let mem = search.intern(merged);
                for (pattern, target) in results {
                    self.arrive(target, pattern, i + 1, mem, &step.candidates, &mut search);
                }
            }
        }
        search.found.into_iter().collect()
    }

    /// One arrival at a name state through a matched pattern: narrow the
    /// candidate set (under name-state reuse), memoize, collect completed
    /// rules, enqueue the continuation.
    fn arrive(
        &self,
        target: NameStateId,
        pattern: &Pattern,
        from: usize,
        mem: u32,
        prev: &Option<Rc<Vec<u64>>>,
        search: &mut Search<R>,
    ) {
        let ns = self.state(target);
        let candidates = if self.additional_name_state_reuse {
            let viable = ns.viable_ids(pattern);
            let narrowed = match prev {
                None => viable,
                Some(prev) => intersect_sorted(prev, &viable),
            };
            if narrowed.is_empty() {
                return;
            }
            Some(Rc::new(narrowed))
        } else {
            None
        };

        let fresh = match &candidates {
            None => match pack_step(target, from, mem) {
                Some(key) => search.seen_packed.put(key, 1) == NO_VALUE,
                None => search
                    .seen_rich
                    .insert((target.index(), from, mem, Vec::new())),
            },
            Some(c) => search
                .seen_rich
                .insert((target.index(), from, mem, c.as_ref().clone())),
        };
        if !fresh {
            return;
        }

        for ctx in ns.terminal_ctxs(pattern) {
            let confirmed = candidates
                .as_ref()
                .is_none_or(|c| c.binary_search(&ctx.id_bits()).is_ok());
            if confirmed {
                search.found.insert(ctx.rule().clone());
            }
        }
        search.work.push(Step {
            state: target,
            from,
            mem,
            candidates,
        });
    }

    // ---- inspection ---------------------------------------------------

    /// True iff every rule has been deleted.
    pub fn is_empty(&self) -> bool {
        self.states.iter().flatten().count() == 1 && self.state(self.start_id()).is_empty()
    }

    /// Live name states plus the object counts of their byte machines; a
    /// leak detector for tests.
    pub fn approximate_object_count(&self) -> usize {
        self.states
            .iter()
            .flatten()
            .map(|ns| 1 + ns.machine_object_count())
            .sum()
    }

    /// The worst wildcard-fan complexity across all byte machines.
    pub fn evaluate_complexity(&self) -> usize {
        self.states
            .iter()
            .flatten()
            .flat_map(|ns| ns.machines())
            .map(|(_, bm)| bm.evaluate_complexity())
            .max()
            .unwrap_or(0)
    }
}
