//! User-supplied keys for element identity during reconciliation.

use std::fmt;

/// A key identifying an element across rebuilds.
///
/// Keys pair elements between two successive build outputs even when their
/// position in the tree changed. A key must be unique within the build
/// boundary it appears in; duplicates are reported as a hard error.
///
/// Keys are either a string, an integer, or a composite of other keys.
/// Composites are handy for list items identified by several fields:
///
/// ```
/// use ripple_foundation::Key;
///
/// let key = Key::composite([Key::from("row"), Key::from(17)]);
/// assert_eq!(key.to_string(), "(row, 17)");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Key {
    /// String key.
    Str(String),
    /// Integer key.
    Int(i64),
    /// Compound key built from several parts.
    Composite(Vec<Key>),
}

impl Key {
    /// Build a composite key from parts.
    pub fn composite<I>(parts: I) -> Self
    where
        I: IntoIterator<Item = Key>,
    {
        Self::Composite(parts.into_iter().collect())
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Self::Str(s.to_owned())
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

impl From<i64> for Key {
    fn from(n: i64) -> Self {
        Self::Int(n)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Str(s) => f.write_str(s),
            Self::Int(n) => write!(f, "{n}"),
            Self::Composite(parts) => {
                f.write_str("(")?;
                for (i, part) in parts.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{part}")?;
                }
                f.write_str(")")
            }
        }
    }
}

#[cfg(feature = "serde")]
impl serde::Serialize for Key {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        // Keys serialize as their display form; the client only needs a
        // stable string.
        serializer.serialize_str(&self.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_forms() {
        assert_eq!(Key::from("header").to_string(), "header");
        assert_eq!(Key::from(3).to_string(), "3");
        assert_eq!(
            Key::composite([Key::from("item"), Key::from(3)]).to_string(),
            "(item, 3)"
        );
    }

    #[test]
    fn equality_distinguishes_kinds() {
        assert_ne!(Key::from("3"), Key::from(3));
        assert_eq!(Key::from("x"), Key::Str("x".into()));
    }
}
