use serde::{Deserialize, Serialize};
use std::fmt;

use super::Tuple;

/// Which way a range scan walks the key space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

/// Single-bounded range condition driving an ordered scan.
///
/// Lower bounds (`Gt`, `Gte`) scan ascending from the boundary, upper bounds
/// (`Lt`, `Lte`) scan descending from it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Condition {
    Gt(Tuple),
    Gte(Tuple),
    Lt(Tuple),
    Lte(Tuple),
}

impl Condition {
    pub fn boundary(&self) -> &Tuple {
        match self {
            Self::Gt(t) | Self::Gte(t) | Self::Lt(t) | Self::Lte(t) => t,
        }
    }

    pub fn direction(&self) -> Direction {
        match self {
            Self::Gt(_) | Self::Gte(_) => Direction::Ascending,
            Self::Lt(_) | Self::Lte(_) => Direction::Descending,
        }
    }

    pub fn is_inclusive(&self) -> bool {
        matches!(self, Self::Gte(_) | Self::Lte(_))
    }

    pub fn matches(&self, key: &Tuple) -> bool {
        match self {
            Self::Gt(b) => key > b,
            Self::Gte(b) => key >= b,
            Self::Lt(b) => key < b,
            Self::Lte(b) => key <= b,
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Gt(t) => write!(f, "> {}", t),
            Self::Gte(t) => write!(f, ">= {}", t),
            Self::Lt(t) => write!(f, "< {}", t),
            Self::Lte(t) => write!(f, "<= {}", t),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tuple;

    #[test]
    fn test_condition_matches() {
        let bound = tuple![-1];
        assert!(Condition::Lt(bound.clone()).matches(&tuple![-2]));
        assert!(!Condition::Lt(bound.clone()).matches(&tuple![-1]));
        assert!(Condition::Lte(bound.clone()).matches(&tuple![-1]));
        assert!(Condition::Gt(bound.clone()).matches(&tuple![123]));
        assert!(!Condition::Gt(bound.clone()).matches(&tuple![-1]));
        assert!(Condition::Gte(bound).matches(&tuple![-1]));
    }

    #[test]
    fn test_condition_direction() {
        assert_eq!(Condition::Gte(tuple![]).direction(), Direction::Ascending);
        assert_eq!(Condition::Lte(tuple![]).direction(), Direction::Descending);
    }

    #[test]
    fn test_prefix_extension_falls_inside_gt() {
        // ("a", 1) extends ("a") and therefore sorts after it
        assert!(Condition::Gt(tuple!["a"]).matches(&tuple!["a", 1]));
        assert!(!Condition::Lt(tuple!["a"]).matches(&tuple!["a", 1]));
    }
}
