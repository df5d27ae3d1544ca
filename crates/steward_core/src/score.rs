//! Placement score arithmetic.
//!
//! Scores are signed weights with two saturating sentinels. Adding any
//! finite value to an infinity returns the same infinity, and
//! `+INFINITY + -INFINITY = -INFINITY`: a ban always wins.

use serde::{Deserialize, Serialize};

/// Magnitude used for the infinity sentinels
const INFINITY_VALUE: i64 = 1_000_000;

/// A placement score with saturating infinity arithmetic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub struct Score(i64);

impl Score {
    /// The `+INFINITY` sentinel (a mandatory placement)
    pub const INFINITY: Self = Self(INFINITY_VALUE);

    /// The `-INFINITY` sentinel (a ban)
    pub const NEG_INFINITY: Self = Self(-INFINITY_VALUE);

    /// Zero score
    pub const ZERO: Self = Self(0);

    /// Create a score, clamping into the sentinel range
    #[must_use]
    pub const fn new(value: i64) -> Self {
        if value >= INFINITY_VALUE {
            Self::INFINITY
        } else if value <= -INFINITY_VALUE {
            Self::NEG_INFINITY
        } else {
            Self(value)
        }
    }

    /// Get the raw value (sentinels are `±1_000_000`)
    #[must_use]
    pub const fn value(&self) -> i64 {
        self.0
    }

    /// Check for the `+INFINITY` sentinel
    #[must_use]
    pub const fn is_infinity(&self) -> bool {
        self.0 == INFINITY_VALUE
    }

    /// Check for the `-INFINITY` sentinel
    #[must_use]
    pub const fn is_neg_infinity(&self) -> bool {
        self.0 == -INFINITY_VALUE
    }

    /// Saturating addition with ban-wins semantics
    #[must_use]
    pub const fn plus(self, other: Self) -> Self {
        if self.is_neg_infinity() || other.is_neg_infinity() {
            return Self::NEG_INFINITY;
        }
        if self.is_infinity() || other.is_infinity() {
            return Self::INFINITY;
        }
        Self::new(self.0.saturating_add(other.0))
    }

    /// Parse the textual score forms used in cluster configuration
    ///
    /// Accepts `INFINITY`, `+INFINITY`, `-INFINITY`, or a signed
    /// integer.
    ///
    /// # Errors
    ///
    /// Returns error if the string is none of the accepted forms
    pub fn parse(s: &str) -> Result<Self, crate::CoreError> {
        match s {
            "INFINITY" | "+INFINITY" => Ok(Self::INFINITY),
            "-INFINITY" => Ok(Self::NEG_INFINITY),
            other => other.parse::<i64>().map(Self::new).map_err(|_| {
                crate::CoreError::ParseError {
                    message: format!("invalid score: {other}"),
                }
            }),
        }
    }
}

impl std::ops::Add for Score {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        self.plus(other)
    }
}

impl std::ops::AddAssign for Score {
    fn add_assign(&mut self, other: Self) {
        *self = self.plus(other);
    }
}

impl std::fmt::Display for Score {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_infinity() {
            write!(f, "INFINITY")
        } else if self.is_neg_infinity() {
            write!(f, "-INFINITY")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finite_addition() {
        assert_eq!(Score::new(100) + Score::new(-30), Score::new(70));
        assert_eq!(Score::ZERO + Score::new(5), Score::new(5));
    }

    #[test]
    fn test_infinity_saturates() {
        assert_eq!(Score::INFINITY + Score::new(1), Score::INFINITY);
        assert_eq!(Score::INFINITY + Score::new(-999_999), Score::INFINITY);
        assert_eq!(Score::NEG_INFINITY + Score::new(999_999), Score::NEG_INFINITY);
    }

    #[test]
    fn test_ban_wins() {
        assert_eq!(Score::INFINITY + Score::NEG_INFINITY, Score::NEG_INFINITY);
        assert_eq!(Score::NEG_INFINITY + Score::INFINITY, Score::NEG_INFINITY);
    }

    #[test]
    fn test_new_clamps() {
        assert_eq!(Score::new(2_000_000), Score::INFINITY);
        assert_eq!(Score::new(-2_000_000), Score::NEG_INFINITY);
        assert_eq!(Score::new(999_999).value(), 999_999);
    }

    #[test]
    fn test_parse() {
        assert_eq!(Score::parse("INFINITY").unwrap(), Score::INFINITY);
        assert_eq!(Score::parse("+INFINITY").unwrap(), Score::INFINITY);
        assert_eq!(Score::parse("-INFINITY").unwrap(), Score::NEG_INFINITY);
        assert_eq!(Score::parse("42").unwrap(), Score::new(42));
        assert_eq!(Score::parse("-7").unwrap(), Score::new(-7));
        assert!(Score::parse("red").is_err());
    }

    #[test]
    fn test_display() {
        assert_eq!(format!("{}", Score::INFINITY), "INFINITY");
        assert_eq!(format!("{}", Score::NEG_INFINITY), "-INFINITY");
        assert_eq!(format!("{}", Score::new(100)), "100");
    }

    #[test]
    fn test_ordering() {
        assert!(Score::NEG_INFINITY < Score::new(-5));
        assert!(Score::new(-5) < Score::ZERO);
        assert!(Score::new(100) < Score::INFINITY);
    }
}
