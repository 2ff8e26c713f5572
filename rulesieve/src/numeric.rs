/*!
Order-preserving numeric canonicalization.

Numeric predicates and numeric event values are compared through the same
byte-level automaton as strings, so every admissible number is mapped to a
fixed-width uppercase hex key whose byte-lexicographic order equals numeric
order: shift by [`FIVE_BILLION`], scale to millionth ticks, render as
[`CANONICAL_WIDTH`] hex digits.

```
use rulesieve::numeric::canonicalize;

let a = canonicalize(-1.5).unwrap();
let b = canonicalize(0.0).unwrap();
let c = canonicalize(1e9).unwrap();
assert!(a < b && b < c);
```
*/

use crate::error::{Error, Result};

/// The admissible extremes: canonicalization is defined on `[-5e9, 5e9]`.
pub const FIVE_BILLION: f64 = 5_000_000_000.0;

/// Hex digits in a canonical key. `(2 × 5e9) × 1e6` ticks fit in 54 bits,
/// which 14 hex digits cover.
pub const CANONICAL_WIDTH: usize = 14;

/// Millionth ticks: six decimal digits of precision survive the encoding.
const TICK_SCALE: f64 = 1_000_000.0;

/// Maps `value` to its canonical hex key.
///
/// Fails with [`Error::InvalidNumber`] when `value` is not finite or lies
/// outside ±[`FIVE_BILLION`].
pub fn canonicalize(value: f64) -> Result<String> {
    if !value.is_finite() || !(-FIVE_BILLION..=FIVE_BILLION).contains(&value) {
        return Err(Error::InvalidNumber(value.to_string()));
    }
    let ticks = ((value + FIVE_BILLION) * TICK_SCALE).round() as u64;
    Ok(format!("{ticks:0width$X}", width = CANONICAL_WIDTH))
}

/// Parses a decimal numeral and canonicalizes it.
pub fn canonicalize_str(text: &str) -> Result<String> {
    let value: f64 = text
        .trim()
        .parse()
        .map_err(|_| Error::InvalidNumber(text.to_string()))?;
    canonicalize(value)
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn known_keys() {
        assert_eq!(canonicalize(-FIVE_BILLION).unwrap(), "00000000000000");
        assert_eq!(canonicalize(0.0).unwrap(), "11C37937E08000");
        assert_eq!(canonicalize(FIVE_BILLION).unwrap(), "2386F26FC10000");
        assert_eq!(canonicalize(-FIVE_BILLION + 1e-6).unwrap(), "00000000000001");
    }

    #[test]
    fn fixed_width() {
        for v in [-5e9, -1.0, -1e-6, 0.0, 3.8, 1e9, 5e9] {
            assert_eq!(canonicalize(v).unwrap().len(), CANONICAL_WIDTH);
        }
    }

    #[test]
    fn rejects_out_of_range() {
        assert!(canonicalize(5e9 + 1.0).is_err());
        assert!(canonicalize(-5e9 - 1.0).is_err());
        assert!(canonicalize(f64::NAN).is_err());
        assert!(canonicalize(f64::INFINITY).is_err());
    }

    #[test]
    fn parses_decimal_text() {
        assert_eq!(
            canonicalize_str("35").unwrap(),
            canonicalize(35.0).unwrap()
        );
        assert_eq!(
            canonicalize_str("3.5e1").unwrap(),
            canonicalize(35.0).unwrap()
        );
        assert!(canonicalize_str("0A,").is_err());
        assert!(canonicalize_str("").is_err());
    }

    #[test]
    fn order_over_spot_vectors() {
        let values = [
            -5e9, -4_999_999_999.99999, -1e9, -123_456_789.101112, -1.0,
            -1e-6, 0.0, 1e-6, 3.8, 2_400.000001, 5e8, 999_999_999.999999,
            5e9,
        ];
        let keys: Vec<String> = values.iter().map(|&v| canonicalize(v).unwrap()).collect();
        for pair in keys.windows(2) {
            assert!(pair[0] < pair[1], "{} !< {}", pair[0], pair[1]);
        }
    }

    proptest! {
        #[test]
        fn order_preserving(a in -5e9..5e9f64, b in -5e9..5e9f64) {
            // Six decimal digits is the precision contract; quantize so the
            // property holds exactly.
            let a = (a * 1e6).round() / 1e6;
            let b = (b * 1e6).round() / 1e6;
            let ka = canonicalize(a).unwrap();
            let kb = canonicalize(b).unwrap();
            prop_assert_eq!(a.partial_cmp(&b).unwrap(), ka.cmp(&kb));
        }
    }
}
