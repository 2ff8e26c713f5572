/*!
Value-level predicates.

A [`Pattern`] is one predicate over one field value. Patterns are plain
values: equality and hashing follow structural content, so two patterns
built from the same operands are interchangeable, and the byte machine
reference-counts repeated insertions of equal patterns.

String operands are held in *normal form*: the JSON quoting that the event
flattener applies to string values is part of the operand (an exact match
for the string `foo` is the byte sequence `"foo"`). Numeric operands are
held as canonical hex keys (see [`crate::numeric`]). The rule compiler
applies both conventions; tests that drive the byte machine directly may
use bare byte strings.
*/

use std::collections::BTreeSet;

use crate::error::Result;

mod range;
mod wildcard;

pub use range::Range;
pub use wildcard::{Segment, WildcardPattern};

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Pattern {
    /// The value equals the operand byte for byte.
    Exact(String),
    /// The value starts with the operand.
    Prefix(String),
    /// The value ends with the operand.
    Suffix(String),
    /// The value equals the operand up to ASCII case.
    EqualsIgnoreCase(String),
    /// `*`-wildcard match over the whole value.
    Wildcard(WildcardPattern),
    /// The value is a number equal to the operand (canonical hex form).
    NumericEq(String),
    /// The value is a number inside the interval.
    Range(Range),
    /// The value differs from every member (members in normal form).
    AnythingBut(BTreeSet<String>),
    /// The value does not start with the operand.
    AnythingButPrefix(String),
    /// The field is present, with any value.
    Exists,
    /// The field is absent from the event. Never inserted into a byte
    /// machine; the matching driver resolves it.
    Absent,
}

impl Pattern {
    pub fn exact(value: impl Into<String>) -> Self {
        Pattern::Exact(value.into())
    }

    pub fn prefix(value: impl Into<String>) -> Self {
        Pattern::Prefix(value.into())
    }

    pub fn suffix(value: impl Into<String>) -> Self {
        Pattern::Suffix(value.into())
    }

    pub fn equals_ignore_case(value: impl Into<String>) -> Self {
        Pattern::EqualsIgnoreCase(value.into())
    }

    /// Fails with [`Error::InvalidPattern`](crate::Error::InvalidPattern)
    /// on malformed wildcard sources.
    pub fn wildcard(source: &str) -> Result<Self> {
        Ok(Pattern::Wildcard(WildcardPattern::parse(source)?))
    }

    /// Fails with [`Error::InvalidNumber`](crate::Error::InvalidNumber)
    /// outside the admissible numeric domain.
    pub fn numeric_eq(value: f64) -> Result<Self> {
        Ok(Pattern::NumericEq(crate::numeric::canonicalize(value)?))
    }

    pub fn range(range: Range) -> Self {
        Pattern::Range(range)
    }

    pub fn anything_but<I>(values: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        Pattern::AnythingBut(values.into_iter().map(Into::into).collect())
    }

    pub fn anything_but_prefix(value: impl Into<String>) -> Self {
        Pattern::AnythingButPrefix(value.into())
    }

    /// True for the inverted kinds, whose byte-machine matches mark the
    /// *excluded* values.
    pub(crate) fn is_exclusion(&self) -> bool {
        matches!(
            self,
            Pattern::AnythingBut(_) | Pattern::AnythingButPrefix(_)
        )
    }

    /// True for kinds collected from the value's reversed bytes.
    pub(crate) fn runs_reversed(&self) -> bool {
        matches!(self, Pattern::Suffix(_))
    }

    /// True for kinds that are satisfied as soon as their final edge is
    /// consumed, rather than on the value's last byte.
    pub(crate) fn fires_immediately(&self) -> bool {
        matches!(
            self,
            Pattern::Prefix(_)
                | Pattern::Suffix(_)
                | Pattern::AnythingButPrefix(_)
                | Pattern::Exists
        )
    }
}
