use serde::{Deserialize, Serialize};
use std::fmt;

use super::Component;

/// Ordered, finite sequence of components used as a store key.
///
/// Ordering is lexicographic; a strict prefix sorts before its extensions.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Tuple(Vec<Component>);

impl Tuple {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn components(&self) -> &[Component] {
        &self.0
    }

    pub fn into_components(self) -> Vec<Component> {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Component> {
        self.0.get(index)
    }

    pub fn push(&mut self, component: impl Into<Component>) {
        self.0.push(component.into());
    }

    /// Builder-style `push`.
    pub fn with(mut self, component: impl Into<Component>) -> Self {
        self.push(component);
        self
    }

    pub fn starts_with(&self, prefix: &Tuple) -> bool {
        self.0.starts_with(&prefix.0)
    }
}

impl From<Vec<Component>> for Tuple {
    fn from(components: Vec<Component>) -> Self {
        Self(components)
    }
}

impl FromIterator<Component> for Tuple {
    fn from_iter<I: IntoIterator<Item = Component>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl fmt::Display for Tuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, component) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", component)?;
        }
        write!(f, ")")
    }
}

/// Builds a [`Tuple`] from anything convertible into a [`Component`].
///
/// ```
/// use tuplekv::tuple;
/// let key = tuple!["board", 42, true];
/// assert_eq!(key.len(), 3);
/// ```
#[macro_export]
macro_rules! tuple {
    () => {
        $crate::core::Tuple::new()
    };
    ($($component:expr),+ $(,)?) => {
        $crate::core::Tuple::from(vec![$($crate::core::Component::from($component)),+])
    };
}

/// A key/value pair produced by a scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry<V> {
    pub key: Tuple,
    pub value: V,
}

impl<V> Entry<V> {
    pub fn new(key: Tuple, value: V) -> Self {
        Self { key, value }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_sorts_first() {
        let short = tuple!["a"];
        let long = tuple!["a", 1];
        assert!(short < long);
        assert!(long.starts_with(&short));
        assert!(!short.starts_with(&long));
    }

    #[test]
    fn test_nested_tuple_order() {
        let a = tuple![Tuple::from(vec![Component::Int(1)]), 9];
        let b = tuple![Tuple::from(vec![Component::Int(1), Component::Int(0)])];
        assert!(a < b);
    }

    #[test]
    fn test_display() {
        assert_eq!(tuple!["x", 1, false].to_string(), "(\"x\", 1, false)");
        assert_eq!(tuple![].to_string(), "()");
    }
}
