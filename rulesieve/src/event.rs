/*!
Event flattening.

A JSON event is turned into a stable, lexicographically ordered list of
[`Field`]s. String values are rendered with their JSON quoting so they can
never collide with numbers or keywords of the same spelling; numbers carry
their canonical key alongside the literal text. Every array encountered is
assigned an id in document order, and each field remembers the chain of
`(array id, index)` pairs it sits under, which is the raw material of the
array-consistency filter.
*/

use std::collections::HashSet;

use itertools::{EitherOrBoth, Itertools};
use serde_json::Value;

use crate::{
    error::{Error, Result},
    numeric,
};

/// For every enclosing array, the element index this value was drawn
/// from. Entries are ordered by array id (outer arrays first).
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ArrayMembership(Vec<(u32, u32)>);

impl ArrayMembership {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn entries(&self) -> &[(u32, u32)] {
        &self.0
    }

    fn push(&mut self, array_id: u32, index: u32) {
        debug_assert!(self.0.last().is_none_or(|&(id, _)| id < array_id));
        self.0.push((array_id, index));
    }

    fn pop(&mut self) {
        self.0.pop();
    }

    /// Union of two memberships, or `None` when they disagree on the
    /// index inside any shared array.
    pub fn merge(&self, other: &ArrayMembership) -> Option<ArrayMembership> {
        let mut merged = Vec::with_capacity(self.0.len().max(other.0.len()));
        for pair in self
            .0
            .iter()
            .merge_join_by(other.0.iter(), |a, b| a.0.cmp(&b.0))
        {
            match pair {
                EitherOrBoth::Both(&(id, ixa), &(_, ixb)) => {
                    if ixa != ixb {
                        return None;
                    }
                    merged.push((id, ixa));
                }
                EitherOrBoth::Left(&e) | EitherOrBoth::Right(&e) => merged.push(e),
            }
        }
        Some(ArrayMembership(merged))
    }
}

/// One leaf of the event tree, in normal form.
#[derive(Clone, Debug)]
pub struct Field {
    pub name: String,
    pub value: String,
    /// Canonical numeric key, when the value is a number inside the
    /// admissible domain. Out-of-range numbers stay matchable as text but
    /// silently skip the numeric lane.
    pub canonical: Option<String>,
    pub membership: ArrayMembership,
}

/// A flattened event: fields sorted by dotted name (document order among
/// duplicates) plus the set of names present, for absence checks.
#[derive(Debug, Default)]
pub struct Event {
    fields: Vec<Field>,
    names: HashSet<String>,
}

impl Event {
    pub fn from_json(text: &str) -> Result<Event> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| Error::InvalidEvent(e.to_string()))?;
        Self::from_value(&value)
    }

    pub fn from_value(value: &Value) -> Result<Event> {
        let Value::Object(map) = value else {
            return Err(Error::InvalidEvent(
                "event root must be a JSON object".into(),
            ));
        };
        let mut event = Event::default();
        let mut membership = ArrayMembership::default();
        let mut next_array_id = 0u32;
        for (key, val) in map {
            walk(key.clone(), val, &mut membership, &mut next_array_id, &mut event);
        }
        event.fields.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(event)
    }

    /// Builds an event from already-flattened fields (the compatibility
    /// path); sorts and indexes them the same way the JSON path does.
    pub(crate) fn from_fields(mut fields: Vec<Field>) -> Event {
        fields.sort_by(|a, b| a.name.cmp(&b.name));
        let names = fields.iter().map(|f| f.name.clone()).collect();
        Event { fields, names }
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn contains_name(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    fn push(&mut self, name: String, value: String, canonical: Option<String>, membership: &ArrayMembership) {
        self.names.insert(name.clone());
        self.fields.push(Field {
            name,
            value,
            canonical,
            membership: membership.clone(),
        });
    }
}

fn walk(
    path: String,
    value: &Value,
    membership: &mut ArrayMembership,
    next_array_id: &mut u32,
    event: &mut Event,
) {
    match value {
        Value::Object(map) => {
            for (key, val) in map {
                walk(format!("{path}.{key}"), val, membership, next_array_id, event);
            }
        }
        Value::Array(items) => {
            let id = *next_array_id;
            *next_array_id += 1;
            for (index, item) in items.iter().enumerate() {
                membership.push(id, index as u32);
                walk(path.clone(), item, membership, next_array_id, event);
                membership.pop();
            }
        }
        Value::String(s) => {
            let rendered =
                serde_json::to_string(s).expect("string serialization is infallible");
            event.push(path, rendered, None, membership);
        }
        Value::Number(n) => {
            let canonical = n.as_f64().and_then(|f| numeric::canonicalize(f).ok());
            event.push(path, n.to_string(), canonical, membership);
        }
        Value::Bool(b) => event.push(path, b.to_string(), None, membership),
        Value::Null => event.push(path, "null".to_string(), None, membership),
    }
}
