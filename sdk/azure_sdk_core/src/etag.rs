//! Entity tags for conditional requests.

use std::fmt;

use serde::{Deserialize, Serialize};

/// An HTTP entity tag, kept verbatim including quotes and any `W/` prefix.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ETag(String);

impl ETag {
    /// Matches any current representation (`*`).
    pub const ANY: &'static str = "*";

    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The wildcard tag.
    pub fn any() -> Self {
        Self(Self::ANY.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns `true` for `W/"..."`.
    pub fn is_weak(&self) -> bool {
        self.0.len() >= 4 && self.0.starts_with("W/\"") && self.0.ends_with('"')
    }

    /// Strong comparison: both tags must be strong and identical.
    pub fn equals(&self, other: &ETag) -> bool {
        !self.is_weak() && !other.is_weak() && self.0 == other.0
    }

    /// Weak comparison: the opaque tags match, ignoring any `W/` prefix.
    pub fn weak_equals(&self, other: &ETag) -> bool {
        self.opaque() == other.opaque()
    }

    fn opaque(&self) -> &str {
        if self.is_weak() {
            &self.0[2..]
        } else {
            &self.0
        }
    }
}

impl fmt::Display for ETag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ETag {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ETag {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl AsRef<str> for ETag {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STRONG_1: &str = "\"1\"";
    const STRONG_2: &str = "\"2\"";
    const WEAK_1: &str = "W/\"1\"";
    const WEAK_2: &str = "W/\"2\"";

    fn tag(s: &str) -> ETag {
        ETag::from(s)
    }

    #[test]
    fn weakness() {
        assert!(tag(WEAK_1).is_weak());
        assert!(!tag(STRONG_1).is_weak());
        assert!(!ETag::any().is_weak());
        assert!(!tag("W/\"").is_weak());
        assert!(!tag("W/1").is_weak());
    }

    #[test]
    fn strong_comparison() {
        let cases = [
            (WEAK_1, WEAK_1, false),
            (WEAK_1, WEAK_2, false),
            (WEAK_1, STRONG_1, false),
            (STRONG_1, WEAK_1, false),
            (STRONG_1, STRONG_2, false),
            (STRONG_1, STRONG_1, true),
        ];
        for (a, b, expected) in cases {
            assert_eq!(tag(a).equals(&tag(b)), expected, "{a} equals {b}");
        }
    }

    #[test]
    fn weak_comparison() {
        let cases = [
            (WEAK_1, WEAK_1, true),
            (WEAK_1, WEAK_2, false),
            (WEAK_1, STRONG_1, true),
            (STRONG_2, WEAK_1, false),
            (STRONG_1, STRONG_2, false),
            (STRONG_1, STRONG_1, true),
        ];
        for (a, b, expected) in cases {
            assert_eq!(tag(a).weak_equals(&tag(b)), expected, "{a} weak_equals {b}");
        }
    }

    #[test]
    fn serializes_as_plain_string() {
        let json = serde_json::to_string(&tag(STRONG_1)).unwrap();
        assert_eq!(json, "\"\\\"1\\\"\"");
        let back: ETag = serde_json::from_str(&json).unwrap();
        assert_eq!(back, tag(STRONG_1));
        assert_eq!(ETag::any().to_string(), "*");
    }
}
