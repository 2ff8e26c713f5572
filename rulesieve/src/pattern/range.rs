use crate::{
    error::{Error, Result},
    numeric::{self, FIVE_BILLION},
};

/// A numeric interval, stored as the canonical hex keys of its endpoints so
/// the byte machine can decompose it digit by digit.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Range {
    bottom: String,
    top: String,
    open_bottom: bool,
    open_top: bool,
}

impl Range {
    /// A two-sided interval. The bounds must be ordered; equal bounds are
    /// only admissible when both ends are closed (a single point).
    pub fn between(bottom: f64, open_bottom: bool, top: f64, open_top: bool) -> Result<Self> {
        if bottom > top || (bottom == top && (open_bottom || open_top)) {
            return Err(Error::InvalidRule(format!(
                "bottom must be less than top: {bottom} vs {top}"
            )));
        }
        Ok(Self {
            bottom: numeric::canonicalize(bottom)?,
            top: numeric::canonicalize(top)?,
            open_bottom,
            open_top,
        })
    }

    pub fn less_than(top: f64) -> Result<Self> {
        Self::between(-FIVE_BILLION, false, top, true)
    }

    pub fn less_than_or_equal_to(top: f64) -> Result<Self> {
        Self::between(-FIVE_BILLION, false, top, false)
    }

    pub fn greater_than(bottom: f64) -> Result<Self> {
        Self::between(bottom, true, FIVE_BILLION, false)
    }

    pub fn greater_than_or_equal_to(bottom: f64) -> Result<Self> {
        Self::between(bottom, false, FIVE_BILLION, false)
    }

    pub(crate) fn bottom_digits(&self) -> &[u8] {
        self.bottom.as_bytes()
    }

    pub(crate) fn top_digits(&self) -> &[u8] {
        self.top.as_bytes()
    }

    pub(crate) fn open_bottom(&self) -> bool {
        self.open_bottom
    }

    pub(crate) fn open_top(&self) -> bool {
        self.open_top
    }

    /// Oracle semantics, used by tests and the traversal's sanity checks.
    pub fn contains(&self, value: f64) -> bool {
        let Ok(key) = numeric::canonicalize(value) else {
            return false;
        };
        let above = if self.open_bottom {
            key.as_str() > self.bottom.as_str()
        } else {
            key.as_str() >= self.bottom.as_str()
        };
        let below = if self.open_top {
            key.as_str() < self.top.as_str()
        } else {
            key.as_str() <= self.top.as_str()
        };
        above && below
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openness() {
        let r = Range::between(1.11, true, 3.33, true).unwrap();
        assert!(r.contains(1.11) == false);
        assert!(r.contains(2.0));
        assert!(r.contains(3.33) == false);

        let r = Range::between(1.11, false, 3.33, false).unwrap();
        assert!(r.contains(1.11));
        assert!(r.contains(3.33));
    }

    #[test]
    fn one_sided() {
        let r = Range::greater_than_or_equal_to(-1e9).unwrap();
        assert!(r.contains(-1e9));
        assert!(r.contains(0.0));
        assert!(r.contains(-2e9) == false);

        let r = Range::less_than(0.0).unwrap();
        assert!(r.contains(-0.5));
        assert!(r.contains(0.0) == false);
    }

    #[test]
    fn rejects_inverted_bounds() {
        assert!(Range::between(2.0, false, 1.0, false).is_err());
        assert!(Range::between(1.0, true, 1.0, false).is_err());
        assert!(Range::between(1.0, false, 1.0, false).is_ok());
    }

    #[test]
    fn rejects_out_of_domain() {
        assert!(Range::between(-6e9, false, 0.0, false).is_err());
        assert!(Range::less_than(6e9).is_err());
    }
}
