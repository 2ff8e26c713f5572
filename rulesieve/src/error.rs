use thiserror::Error;

/// Everything that can go wrong at the rule/event boundary.
///
/// All variants are recoverable: a failed [`add_rule`](crate::machine::GenericMachine::add_rule)
/// or match call leaves the machine unchanged and the caller may continue.
/// Internal invariant violations are bugs and panic instead.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid rule: {0}")]
    InvalidRule(String),

    #[error("invalid event: {0}")]
    InvalidEvent(String),

    /// A numeric operand or bound is unparseable or outside ±5×10⁹.
    #[error("invalid number: {0}")]
    InvalidNumber(String),

    /// A pattern is syntactically malformed, e.g. consecutive unescaped
    /// wildcard stars.
    #[error("invalid pattern: {0}")]
    InvalidPattern(String),
}

pub type Result<T> = std::result::Result<T, Error>;
