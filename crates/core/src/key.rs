//! Hierarchical keys and range scoping
//!
//! A [`Key`] is a sequence of string components split into a *major path*,
//! which determines partition placement, and a *minor path*, which orders
//! records that share a major path.
//!
//! ## Encoding
//!
//! ```text
//! major[0] 0x00 major[1] 0x00 ... [0xFF minor[0] 0x00 minor[1] ...]
//! ```
//!
//! Components are UTF-8 and may not contain NUL. UTF-8 never produces 0xFF,
//! so the first 0xFF always marks the start of the minor path, and byte
//! order of encodings equals hierarchical order: a parent sorts before its
//! children and siblings sort by component bytes.
//!
//! ## String form
//!
//! `/major1/major2/-/minor1/minor2`. A key without a minor path omits the
//! `-` marker.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

use crate::error::{Error, Result};

/// Separator between components of the same path
pub const COMPONENT_SEPARATOR: u8 = 0x00;

/// Marker between the major and minor path
pub const MINOR_SEPARATOR: u8 = 0xFF;

const PATH_DELIMITER: char = '/';
const MINOR_MARKER: &str = "-";

/// Hierarchical key
///
/// Immutable once constructed. Equality and ordering follow the encoded
/// byte form. Deserialized keys pass the same checks as [`Key::new`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "KeyParts", into = "KeyParts")]
pub struct Key {
    major: Vec<String>,
    minor: Vec<String>,
}

/// Serialized form of a [`Key`]
#[derive(Serialize, Deserialize)]
struct KeyParts {
    major: Vec<String>,
    minor: Vec<String>,
}

impl TryFrom<KeyParts> for Key {
    type Error = Error;

    fn try_from(parts: KeyParts) -> Result<Self> {
        Key::new(parts.major, parts.minor)
    }
}

impl From<Key> for KeyParts {
    fn from(key: Key) -> Self {
        Self {
            major: key.major,
            minor: key.minor,
        }
    }
}

impl Key {
    /// Create a key from major and minor components.
    ///
    /// # Errors
    ///
    /// `IllegalArgument` if the major path is empty, a major component is
    /// the `-` minor marker, or a component contains NUL.
    pub fn new<M, N>(major: M, minor: N) -> Result<Self>
    where
        M: IntoIterator,
        M::Item: Into<String>,
        N: IntoIterator,
        N::Item: Into<String>,
    {
        let major: Vec<String> = major.into_iter().map(Into::into).collect();
        let minor: Vec<String> = minor.into_iter().map(Into::into).collect();

        if major.is_empty() {
            return Err(Error::illegal_argument(
                "key must have at least one major path component",
            ));
        }
        // The marker would start the minor path when the key is reparsed
        if let Some(marker) = major.iter().find(|c| c.as_str() == MINOR_MARKER) {
            return Err(Error::illegal_argument(format!(
                "major path component must not be {:?}",
                marker
            )));
        }
        for component in major.iter().chain(minor.iter()) {
            validate_component(component)?;
        }

        Ok(Self { major, minor })
    }

    /// Create a key with only a major path.
    pub fn from_major<M>(major: M) -> Result<Self>
    where
        M: IntoIterator,
        M::Item: Into<String>,
    {
        Self::new(major, Vec::<String>::new())
    }

    /// Parse the `/major/-/minor` string form.
    pub fn parse(s: &str) -> Result<Self> {
        let rest = s.strip_prefix(PATH_DELIMITER).ok_or_else(|| {
            Error::illegal_argument(format!("key string must start with '/': {:?}", s))
        })?;

        let mut major = Vec::new();
        let mut minor = Vec::new();
        let mut in_minor = false;

        for component in rest.split(PATH_DELIMITER) {
            if component == MINOR_MARKER && !in_minor {
                in_minor = true;
                continue;
            }
            if in_minor {
                minor.push(component.to_string());
            } else {
                major.push(component.to_string());
            }
        }

        Self::new(major, minor)
    }

    /// Major path components
    pub fn major(&self) -> &[String] {
        &self.major
    }

    /// Minor path components
    pub fn minor(&self) -> &[String] {
        &self.minor
    }

    /// Total number of components across both paths
    pub fn full_path_len(&self) -> usize {
        self.major.len() + self.minor.len()
    }

    /// All components, major path first
    pub fn full_path(&self) -> Vec<&str> {
        self.major
            .iter()
            .chain(self.minor.iter())
            .map(String::as_str)
            .collect()
    }

    /// Whether `other` is this key or one of its descendants
    pub fn is_prefix_of(&self, other: &Key) -> bool {
        other.depth_below(self).is_some()
    }

    /// Component at `index` of the combined major + minor path
    pub fn component(&self, index: usize) -> Option<&str> {
        if index < self.major.len() {
            Some(&self.major[index])
        } else {
            self.minor.get(index - self.major.len()).map(String::as_str)
        }
    }

    /// A copy of this key with the minor path removed
    pub fn major_key(&self) -> Key {
        Key {
            major: self.major.clone(),
            minor: Vec::new(),
        }
    }

    /// Whether two keys share the exact same major path
    pub fn same_major_path(&self, other: &Key) -> bool {
        self.major == other.major
    }

    /// Encoded bytes of the major path only.
    ///
    /// This is the input to partition routing.
    pub fn major_path_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(encoded_len(&self.major));
        encode_path(&mut out, &self.major);
        out
    }

    /// Full encoded form
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(encoded_len(&self.major) + 1 + encoded_len(&self.minor));
        encode_path(&mut out, &self.major);
        if !self.minor.is_empty() {
            out.push(MINOR_SEPARATOR);
            encode_path(&mut out, &self.minor);
        }
        out
    }

    /// Decode a key from its encoded form
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let (major_bytes, minor_bytes) = match bytes.iter().position(|b| *b == MINOR_SEPARATOR) {
            Some(pos) => (&bytes[..pos], Some(&bytes[pos + 1..])),
            None => (bytes, None),
        };

        let major = decode_path(major_bytes)?;
        let minor = match minor_bytes {
            Some(b) => decode_path(b)?,
            None => Vec::new(),
        };

        Self::new(major, minor)
    }

    /// Number of components this key extends `parent` by.
    ///
    /// Returns `Some(0)` for the parent itself and `None` when this key is
    /// not the parent or one of its descendants. A parent with a minor path
    /// only has descendants under the same major path.
    pub fn depth_below(&self, parent: &Key) -> Option<usize> {
        let plen = parent.major.len();
        if plen > self.major.len() || self.major[..plen] != parent.major[..] {
            return None;
        }

        if !parent.minor.is_empty() {
            let mlen = parent.minor.len();
            if self.major.len() != plen
                || mlen > self.minor.len()
                || self.minor[..mlen] != parent.minor[..]
            {
                return None;
            }
        }

        Some(self.full_path_len() - parent.full_path_len())
    }

    /// Whether this key falls in the subtree described by `parent`,
    /// `range` and `depth`.
    ///
    /// The range restricts the first component below the parent; it never
    /// excludes the parent itself.
    pub fn is_in_scope(&self, parent: &Key, range: Option<&KeyRange>, depth: Depth) -> bool {
        match self.depth_below(parent) {
            None => false,
            Some(extra) if !depth.accepts(extra) => false,
            Some(0) => true,
            Some(_) => match (range, self.component(parent.full_path_len())) {
                (Some(r), Some(c)) => r.contains(c),
                _ => true,
            },
        }
    }

    /// Like [`is_in_scope`](Self::is_in_scope), but only descendants
    /// through the minor path count.
    ///
    /// Used when `parent` carries a complete major path. A key with a longer
    /// major path is placed by its own hash, so it is not part of the
    /// parent's subtree even when it lands in the same partition.
    pub fn is_in_minor_scope(
        &self,
        parent: &Key,
        range: Option<&KeyRange>,
        depth: Depth,
    ) -> bool {
        self.same_major_path(parent) && self.is_in_scope(parent, range, depth)
    }
}

impl Ord for Key {
    fn cmp(&self, other: &Self) -> Ordering {
        self.to_bytes().cmp(&other.to_bytes())
    }
}

impl PartialOrd for Key {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for c in &self.major {
            write!(f, "{}{}", PATH_DELIMITER, c)?;
        }
        if !self.minor.is_empty() {
            write!(f, "{}{}", PATH_DELIMITER, MINOR_MARKER)?;
            for c in &self.minor {
                write!(f, "{}{}", PATH_DELIMITER, c)?;
            }
        }
        Ok(())
    }
}

fn validate_component(component: &str) -> Result<()> {
    if component.contains('\x00') {
        return Err(Error::illegal_argument(format!(
            "key component must not contain NUL: {:?}",
            component
        )));
    }
    Ok(())
}

fn encoded_len(path: &[String]) -> usize {
    path.iter().map(|c| c.len()).sum::<usize>() + path.len().saturating_sub(1)
}

fn encode_path(out: &mut Vec<u8>, path: &[String]) {
    for (i, component) in path.iter().enumerate() {
        if i > 0 {
            out.push(COMPONENT_SEPARATOR);
        }
        out.extend_from_slice(component.as_bytes());
    }
}

fn decode_path(bytes: &[u8]) -> Result<Vec<String>> {
    bytes
        .split(|b| *b == COMPONENT_SEPARATOR)
        .map(|part| {
            String::from_utf8(part.to_vec())
                .map_err(|e| Error::serialization(format!("key component is not UTF-8: {}", e)))
        })
        .collect()
}

// ============================================================================
// Range scoping
// ============================================================================

/// Restriction on the first path component below a parent key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyRange {
    /// Components between two optional bounds
    Bounded {
        /// Lower bound, unbounded when `None`
        start: Option<String>,
        /// Whether `start` itself is included
        start_inclusive: bool,
        /// Upper bound, unbounded when `None`
        end: Option<String>,
        /// Whether `end` itself is included
        end_inclusive: bool,
    },
    /// Components starting with the given prefix
    Prefix(String),
}

impl KeyRange {
    /// Create a bounded range.
    ///
    /// # Errors
    ///
    /// `IllegalArgument` if both bounds are absent or the range is empty.
    pub fn new(
        start: Option<String>,
        start_inclusive: bool,
        end: Option<String>,
        end_inclusive: bool,
    ) -> Result<Self> {
        match (&start, &end) {
            (None, None) => {
                return Err(Error::illegal_argument(
                    "key range needs at least one bound",
                ))
            }
            (Some(s), Some(e)) => {
                if s > e || (s == e && !(start_inclusive && end_inclusive)) {
                    return Err(Error::illegal_argument(format!(
                        "empty key range: start {:?} end {:?}",
                        s, e
                    )));
                }
            }
            _ => {}
        }

        Ok(KeyRange::Bounded {
            start,
            start_inclusive,
            end,
            end_inclusive,
        })
    }

    /// Range matching every component that starts with `prefix`
    pub fn prefix(prefix: impl Into<String>) -> Self {
        KeyRange::Prefix(prefix.into())
    }

    /// Whether `component` lies inside the range
    pub fn contains(&self, component: &str) -> bool {
        match self {
            KeyRange::Prefix(p) => component.starts_with(p.as_str()),
            KeyRange::Bounded {
                start,
                start_inclusive,
                end,
                end_inclusive,
            } => {
                let above = match start {
                    None => true,
                    Some(s) if *start_inclusive => component >= s.as_str(),
                    Some(s) => component > s.as_str(),
                };
                let below = match end {
                    None => true,
                    Some(e) if *end_inclusive => component <= e.as_str(),
                    Some(e) => component < e.as_str(),
                };
                above && below
            }
        }
    }
}

/// Scope of a hierarchical scan relative to its parent key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Depth {
    /// Immediate children only
    ChildrenOnly,
    /// The parent plus its immediate children
    ParentAndChildren,
    /// All descendants, excluding the parent
    DescendantsOnly,
    /// The parent plus all descendants
    #[default]
    ParentAndDescendants,
}

impl Depth {
    /// Whether a key `extra` components below the parent is in scope
    pub fn accepts(self, extra: usize) -> bool {
        match self {
            Depth::ChildrenOnly => extra == 1,
            Depth::ParentAndChildren => extra <= 1,
            Depth::DescendantsOnly => extra >= 1,
            Depth::ParentAndDescendants => true,
        }
    }

    /// Whether the parent key itself is included
    pub fn includes_parent(self) -> bool {
        self.accepts(0)
    }
}

/// Ordering of results returned by multi-key reads and iterators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// Ascending encoded-key order
    Forward,
    /// Descending encoded-key order
    Reverse,
    /// No cross-batch ordering promise
    Unordered,
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn key(s: &str) -> Key {
        Key::parse(s).unwrap()
    }

    // ========================================
    // Construction and string form
    // ========================================

    #[test]
    fn test_parse_and_display() {
        let k = key("/user/42/-/profile/name");
        assert_eq!(k.major(), &["user".to_string(), "42".to_string()]);
        assert_eq!(k.minor(), &["profile".to_string(), "name".to_string()]);
        assert_eq!(k.to_string(), "/user/42/-/profile/name");

        let major_only = key("/user/42");
        assert!(major_only.minor().is_empty());
        assert_eq!(major_only.to_string(), "/user/42");
    }

    #[test]
    fn test_parse_rejects_missing_slash() {
        assert!(Key::parse("user/42").is_err());
    }

    #[test]
    fn test_empty_major_rejected() {
        assert!(Key::new(Vec::<String>::new(), vec!["x"]).is_err());
        assert!(Key::parse("/-/x").is_err());
    }

    #[test]
    fn test_nul_component_rejected() {
        let err = Key::from_major(vec!["a\x00b"]).unwrap_err();
        assert!(matches!(err, Error::IllegalArgument { .. }));
    }

    #[test]
    fn test_minor_marker_rejected_in_major_path() {
        let err = Key::new(vec!["a", "-"], vec!["b"]).unwrap_err();
        assert!(matches!(err, Error::IllegalArgument { .. }));
        assert!(Key::from_major(vec!["-"]).is_err());
        assert!(Key::from_bytes(b"a\x00-").is_err());
        // Only the first marker splits, so later ones are minor components
        assert_eq!(key("/a/-/-").minor(), ["-"]);
    }

    #[test]
    fn test_deserialize_validates() {
        let k: Key = serde_json::from_str(r#"{"major":["a"],"minor":["b"]}"#).unwrap();
        assert_eq!(k, key("/a/-/b"));
        assert_eq!(serde_json::to_string(&k).unwrap(), r#"{"major":["a"],"minor":["b"]}"#);

        for bad in [
            r#"{"major":[],"minor":["b"]}"#,
            r#"{"major":["a\u0000b"],"minor":[]}"#,
            r#"{"major":["-"],"minor":[]}"#,
        ] {
            let err = serde_json::from_str::<Key>(bad).unwrap_err();
            assert!(err.to_string().contains("illegal argument"), "{}", err);
        }
    }

    // ========================================
    // Encoding
    // ========================================

    #[test]
    fn test_major_path_bytes_ignore_minor() {
        let a = key("/user/42/-/x");
        let b = key("/user/42/-/y/z");
        assert_eq!(a.major_path_bytes(), b.major_path_bytes());
        assert_eq!(a.major_path_bytes(), b"user\x0042".to_vec());
    }

    #[test]
    fn test_parent_sorts_before_children() {
        let parent = key("/a");
        let child = key("/a/-/b");
        let grandchild = key("/a/-/b/c");
        let sibling = key("/a/-/c");
        assert!(parent < child);
        assert!(child < grandchild);
        assert!(grandchild < sibling);
    }

    #[test]
    fn test_minor_with_empty_component_distinct() {
        let plain = key("/a");
        let empty_minor = Key::new(vec!["a"], vec![""]).unwrap();
        assert_ne!(plain.to_bytes(), empty_minor.to_bytes());
        assert_eq!(Key::from_bytes(&empty_minor.to_bytes()).unwrap(), empty_minor);
    }

    #[test]
    fn test_from_bytes_rejects_bad_utf8() {
        assert!(Key::from_bytes(&[0xC3, 0x28]).is_err());
    }

    // ========================================
    // Depth and range
    // ========================================

    #[test]
    fn test_depth_below() {
        let parent = key("/a/-/b");
        assert_eq!(key("/a/-/b").depth_below(&parent), Some(0));
        assert_eq!(key("/a/-/b/c").depth_below(&parent), Some(1));
        assert_eq!(key("/a/-/b/c/d").depth_below(&parent), Some(2));
        assert_eq!(key("/a/-/c").depth_below(&parent), None);
        assert_eq!(key("/a/x/-/b").depth_below(&parent), None);
        assert!(parent.is_prefix_of(&key("/a/-/b/c")));
        assert!(!parent.is_prefix_of(&key("/a")));
    }

    #[test]
    fn test_depth_below_partial_major_parent() {
        let parent = key("/a");
        assert_eq!(key("/a/b").depth_below(&parent), Some(1));
        assert_eq!(key("/a/-/b").depth_below(&parent), Some(1));
        assert_eq!(key("/a/b/-/c").depth_below(&parent), Some(2));
        assert_eq!(key("/ab").depth_below(&parent), None);
    }

    #[test]
    fn test_depth_accepts() {
        assert!(!Depth::ChildrenOnly.accepts(0));
        assert!(Depth::ChildrenOnly.accepts(1));
        assert!(!Depth::ChildrenOnly.accepts(2));
        assert!(Depth::ParentAndChildren.accepts(0));
        assert!(!Depth::DescendantsOnly.accepts(0));
        assert!(Depth::DescendantsOnly.accepts(5));
        assert!(Depth::ParentAndDescendants.includes_parent());
    }

    #[test]
    fn test_key_range_bounds() {
        let r = KeyRange::new(Some("b".into()), true, Some("d".into()), false).unwrap();
        assert!(!r.contains("a"));
        assert!(r.contains("b"));
        assert!(r.contains("c"));
        assert!(!r.contains("d"));

        let open_end = KeyRange::new(Some("b".into()), false, None, false).unwrap();
        assert!(!open_end.contains("b"));
        assert!(open_end.contains("zzz"));
    }

    #[test]
    fn test_key_range_invalid() {
        assert!(KeyRange::new(None, true, None, true).is_err());
        assert!(KeyRange::new(Some("d".into()), true, Some("b".into()), true).is_err());
        assert!(KeyRange::new(Some("b".into()), true, Some("b".into()), false).is_err());
        assert!(KeyRange::new(Some("b".into()), true, Some("b".into()), true).is_ok());
    }

    #[test]
    fn test_key_range_prefix() {
        let r = KeyRange::prefix("img");
        assert!(r.contains("img"));
        assert!(r.contains("img-01"));
        assert!(!r.contains("im"));
    }

    #[test]
    fn test_is_in_scope_applies_range_below_parent() {
        let parent = key("/u/-/photos");
        let range = KeyRange::prefix("2024");
        let depth = Depth::ParentAndDescendants;

        assert!(parent.is_in_scope(&parent, Some(&range), depth));
        assert!(key("/u/-/photos/2024-01").is_in_scope(&parent, Some(&range), depth));
        assert!(key("/u/-/photos/2024-01/raw").is_in_scope(&parent, Some(&range), depth));
        assert!(!key("/u/-/photos/2023-12").is_in_scope(&parent, Some(&range), depth));
        assert!(!parent.is_in_scope(&parent, None, Depth::DescendantsOnly));
    }

    // ========================================
    // Properties
    // ========================================

    fn components(min: usize, max: usize) -> impl Strategy<Value = Vec<String>> {
        prop::collection::vec("[a-c]{0,3}", min..max)
    }

    #[test]
    fn test_minor_scope_excludes_longer_major_paths() {
        let parent = key("/cart/9");
        let depth = Depth::ParentAndDescendants;
        assert!(key("/cart/9/x").is_in_scope(&parent, None, depth));
        assert!(!key("/cart/9/x").is_in_minor_scope(&parent, None, depth));
        assert!(!key("/cart/9/x/-/a").is_in_minor_scope(&parent, None, depth));
        assert!(key("/cart/9").is_in_minor_scope(&parent, None, depth));
        assert!(key("/cart/9/-/a").is_in_minor_scope(&parent, None, depth));
        assert!(key("/cart/9/-/a/b").is_in_minor_scope(&parent, None, Depth::DescendantsOnly));
    }

    proptest! {
        #[test]
        fn prop_encoding_round_trips(major in components(1, 4), minor in components(0, 3)) {
            let k = Key::new(major, minor).unwrap();
            prop_assert_eq!(Key::from_bytes(&k.to_bytes()).unwrap(), k);
        }

        #[test]
        fn prop_byte_order_matches_component_order(a in components(1, 4), b in components(1, 4)) {
            let ka = Key::from_major(a.clone()).unwrap();
            let kb = Key::from_major(b.clone()).unwrap();
            prop_assert_eq!(ka.cmp(&kb), a.cmp(&b));
        }
    }
}
