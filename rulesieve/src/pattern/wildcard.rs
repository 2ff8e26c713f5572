use logos::Logos;

use crate::error::{Error, Result};

/// One step of a wildcard pattern: literal bytes, or a star matching any
/// byte run (including the empty run).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Segment {
    Literal(Vec<u8>),
    Star,
}

#[derive(Logos, Clone, Copy, Debug, PartialEq)]
enum WildcardToken {
    #[token("*")]
    Star,

    /// Backslash-escaped character; only `\*` and `\\` are legal.
    #[regex(r"\\.")]
    Escaped,

    /// Plain text.
    #[regex(r"[^*\\]+")]
    Text,
}

/// A validated wildcard source plus its parsed segments.
///
/// Equality and hashing follow the source text; the segments are a pure
/// function of it.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct WildcardPattern {
    source: String,
    segments: Vec<Segment>,
}

impl WildcardPattern {
    /// Parses `source`, rejecting consecutive unescaped stars, illegal
    /// escapes and a trailing bare backslash.
    pub fn parse(source: &str) -> Result<Self> {
        let mut lex = WildcardToken::lexer(source);
        let mut segments: Vec<Segment> = Vec::new();
        let mut literal: Vec<u8> = Vec::new();
        while let Some(token) = lex.next() {
            match token {
                Ok(WildcardToken::Star) => {
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    if segments.last() == Some(&Segment::Star) {
                        return Err(Error::InvalidPattern(format!(
                            "consecutive wildcard characters in `{source}`"
                        )));
                    }
                    segments.push(Segment::Star);
                }
                Ok(WildcardToken::Escaped) => {
                    let escaped = &lex.slice()[1..];
                    if escaped != "*" && escaped != "\\" {
                        return Err(Error::InvalidPattern(format!(
                            "illegal escape `\\{escaped}` in `{source}`"
                        )));
                    }
                    literal.extend_from_slice(escaped.as_bytes());
                }
                Ok(WildcardToken::Text) => literal.extend_from_slice(lex.slice().as_bytes()),
                Err(()) => {
                    return Err(Error::InvalidPattern(format!(
                        "dangling escape in `{source}`"
                    )));
                }
            }
        }
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }
        if segments.is_empty() {
            return Err(Error::InvalidPattern("empty wildcard pattern".into()));
        }
        Ok(Self {
            source: source.to_owned(),
            segments,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// True when the pattern contains no star at all (it degenerates to an
    /// exact match).
    pub fn is_literal(&self) -> bool {
        !self.segments.contains(&Segment::Star)
    }
}
