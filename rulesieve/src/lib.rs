/*!
A declarative rule matching engine for structured events.

Rules are JSON objects mirroring the shape of the events they match;
leaves constrain single fields with exact values, prefixes, suffixes,
case-insensitive equality, `*`-wildcards, numeric comparisons and ranges,
negations and existence checks. All predicates registered for one field
are compiled into a single shared byte-level automaton, so matching cost
stays linear in the event size no matter how many rules are loaded.

## Features
- Incremental [`add_rule`](machine::GenericMachine::add_rule) /
  [`delete_rule`](machine::GenericMachine::delete_rule): deleting every
  rule returns the machine to a structurally empty state.
- Array-consistency: predicates of one rule matching inside the same
  array must match the same element.
- Disjunctions via `"$or"`, expanded into independent sub-rules.
- Order-preserving numeric canonicalization, so ranges and numeric
  equality run through the same byte machinery as strings.

## Usage
```
use rulesieve::Machine;

let mut machine = Machine::default();
machine
    .add_rule(
        "eu-orders".to_string(),
        r#"{"detail": {"state": ["placed"], "region": [{"prefix": "eu-"}]}}"#,
    )
    .unwrap();

let matched = machine
    .rules_for_json_event(r#"{"detail": {"state": "placed", "region": "eu-west-1"}}"#)
    .unwrap();
assert_eq!(matched, vec!["eu-orders".to_string()]);

machine
    .delete_rule(
        &"eu-orders".to_string(),
        r#"{"detail": {"state": ["placed"], "region": [{"prefix": "eu-"}]}}"#,
    )
    .unwrap();
assert!(machine.is_empty());
```

Matching takes `&self`: any number of evaluations may run concurrently
against a stable machine, while rule mutation requires `&mut self`.
*/

pub mod automaton;
mod compiler;
mod error;
pub mod event;
pub mod machine;
pub mod numeric;
pub mod pattern;

pub use error::{Error, Result};
pub use machine::{GenericMachine, Machine};
