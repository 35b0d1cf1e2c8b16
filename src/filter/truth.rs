//! Tri-valued truth used as the outcome of every directive.
//!
//! `Null` means "no opinion": it is the identity element of both `and` and
//! `or`. Actions that are not tests (SET, LOG, FOR, ...) evaluate to `Null` so
//! they never short-circuit an enclosing sequence or flip its aggregate.

use std::fmt;

/// The outcome of applying a directive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Truth {
    /// Absent or unknown outcome.
    #[default]
    Null,
    False,
    True,
}

impl Truth {
    pub fn of(value: bool) -> Self {
        if value { Truth::True } else { Truth::False }
    }

    /// Tri-valued conjunction with `Null` as identity.
    pub fn and(self, other: Truth) -> Truth {
        match (self, other) {
            (Truth::Null, y) => y,
            (x, Truth::Null) => x,
            (x, y) => Truth::of(x == Truth::True && y == Truth::True),
        }
    }

    /// Tri-valued disjunction with `Null` as identity.
    pub fn or(self, other: Truth) -> Truth {
        match (self, other) {
            (Truth::Null, y) => y,
            (x, Truth::Null) => x,
            (x, y) => Truth::of(x == Truth::True || y == Truth::True),
        }
    }

    /// Swaps `True` and `False`; `Null` is its own negation.
    pub fn negate(self) -> Truth {
        match self {
            Truth::True => Truth::False,
            Truth::False => Truth::True,
            Truth::Null => Truth::Null,
        }
    }

    pub fn is_true(self) -> bool {
        self == Truth::True
    }

    pub fn is_false(self) -> bool {
        self == Truth::False
    }
}

impl From<bool> for Truth {
    fn from(value: bool) -> Self {
        Truth::of(value)
    }
}

impl fmt::Display for Truth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Truth::Null => "NULL",
            Truth::False => "FALSE",
            Truth::True => "TRUE",
        })
    }
}
