// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Saturating score arithmetic with infinity sentinels.
//!
//! Placement preferences are signed scores with two saturating sentinels:
//! `+INFINITY` (required) and `-INFINITY` (banned). Addition never leaves
//! the sentinel range, and a ban always wins: `+INFINITY + -INFINITY`
//! yields `-INFINITY`.

use std::fmt;

use thiserror::Error;

/// Magnitude of the infinity sentinels.
///
/// Finite scores are clamped into the open interval so that no sequence of
/// finite additions can accidentally manufacture an infinity.
const INFINITY_MAGNITUDE: i64 = 1_000_000;

/// A placement score: wrapped `i64` with saturating `±INFINITY` sentinels.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct Score(i64);

impl Score {
    /// The `+INFINITY` sentinel: the node is required.
    pub const INFINITY: Score = Score(INFINITY_MAGNITUDE);
    /// The `-INFINITY` sentinel: the node is banned.
    pub const NEG_INFINITY: Score = Score(-INFINITY_MAGNITUDE);
    /// The neutral score.
    pub const ZERO: Score = Score(0);

    /// Creates a score, clamping finite overflow into the sentinels.
    #[must_use]
    pub fn new(value: i64) -> Self {
        Score(value.clamp(-INFINITY_MAGNITUDE, INFINITY_MAGNITUDE))
    }

    /// Returns the wrapped value (sentinels included).
    #[must_use]
    pub fn value(self) -> i64 {
        self.0
    }

    /// True when this score is the `+INFINITY` sentinel.
    #[must_use]
    pub fn is_pos_infinity(self) -> bool {
        self.0 == INFINITY_MAGNITUDE
    }

    /// True when this score is the `-INFINITY` sentinel.
    #[must_use]
    pub fn is_neg_infinity(self) -> bool {
        self.0 == -INFINITY_MAGNITUDE
    }

    /// Saturating addition with ban-wins semantics.
    ///
    /// Invariants:
    /// - `-INFINITY + x = -INFINITY` for every `x` (bans win);
    /// - `+INFINITY + x = +INFINITY` for every finite `x`;
    /// - finite sums clamp to the sentinel range.
    #[must_use]
    pub fn plus(self, other: Score) -> Score {
        if self.is_neg_infinity() || other.is_neg_infinity() {
            return Score::NEG_INFINITY;
        }
        if self.is_pos_infinity() || other.is_pos_infinity() {
            return Score::INFINITY;
        }
        Score::new(self.0.saturating_add(other.0))
    }

    /// Parses a CIB score attribute.
    ///
    /// Accepts `INFINITY`, `+INFINITY`, `-INFINITY` (case-insensitive) and
    /// signed decimal; decimals clamp into the sentinel range.
    pub fn parse(text: &str) -> Result<Score, ScoreParseError> {
        let trimmed = text.trim();
        match trimmed.to_ascii_uppercase().as_str() {
            "INFINITY" | "+INFINITY" => return Ok(Score::INFINITY),
            "-INFINITY" => return Ok(Score::NEG_INFINITY),
            _ => {}
        }
        trimmed
            .parse::<i64>()
            .map(Score::new)
            .map_err(|_| ScoreParseError::Malformed(trimmed.to_string()))
    }
}

impl fmt::Display for Score {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_pos_infinity() {
            write!(f, "INFINITY")
        } else if self.is_neg_infinity() {
            write!(f, "-INFINITY")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

/// Error parsing a score attribute string.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScoreParseError {
    /// The text was neither an infinity keyword nor a signed decimal.
    #[error("malformed score: {0:?}")]
    Malformed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finite_addition_is_plain() {
        assert_eq!(Score::new(100).plus(Score::new(-30)), Score::new(70));
    }

    #[test]
    fn finite_addition_clamps_to_sentinels() {
        let near = Score::new(INFINITY_MAGNITUDE - 1);
        assert_eq!(near.plus(Score::new(10)), Score::INFINITY);
        let low = Score::new(-(INFINITY_MAGNITUDE - 1));
        assert_eq!(low.plus(Score::new(-10)), Score::NEG_INFINITY);
    }

    #[test]
    fn positive_infinity_absorbs_finite() {
        assert_eq!(Score::INFINITY.plus(Score::new(-999_999)), Score::INFINITY);
        assert_eq!(Score::new(5).plus(Score::INFINITY), Score::INFINITY);
    }

    #[test]
    fn bans_win_over_requirements() {
        assert_eq!(Score::INFINITY.plus(Score::NEG_INFINITY), Score::NEG_INFINITY);
        assert_eq!(Score::NEG_INFINITY.plus(Score::INFINITY), Score::NEG_INFINITY);
        assert_eq!(Score::NEG_INFINITY.plus(Score::new(42)), Score::NEG_INFINITY);
    }

    #[test]
    fn parse_accepts_keywords_and_decimals() {
        assert_eq!(Score::parse("INFINITY"), Ok(Score::INFINITY));
        assert_eq!(Score::parse("+INFINITY"), Ok(Score::INFINITY));
        assert_eq!(Score::parse("-INFINITY"), Ok(Score::NEG_INFINITY));
        assert_eq!(Score::parse(" 250 "), Ok(Score::new(250)));
        assert_eq!(Score::parse("-77"), Ok(Score::new(-77)));
        assert!(Score::parse("banana").is_err());
    }

    #[test]
    fn display_round_trips_keywords() {
        assert_eq!(Score::INFINITY.to_string(), "INFINITY");
        assert_eq!(Score::NEG_INFINITY.to_string(), "-INFINITY");
        assert_eq!(Score::new(12).to_string(), "12");
    }
}
