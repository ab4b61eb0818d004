//! ICN names.
//!
//! A name is an ordered sequence of opaque byte-string components. Names
//! compare component-wise and support prefix matching; a name is immutable
//! once handed to a table, so all combinators return new values.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A single name component: an opaque byte string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NameComponent(pub Bytes);

impl NameComponent {
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl From<&str> for NameComponent {
    fn from(s: &str) -> Self {
        Self(Bytes::copy_from_slice(s.as_bytes()))
    }
}

impl From<Bytes> for NameComponent {
    fn from(b: Bytes) -> Self {
        Self(b)
    }
}

impl fmt::Display for NameComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&escape_component(&self.0))
    }
}

/// A hierarchical ICN name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub struct Name {
    components: Vec<NameComponent>,
}

impl Name {
    /// The empty (root) name.
    pub fn new() -> Self {
        Self {
            components: Vec::new(),
        }
    }

    /// Parse a name from its textual form, e.g. `/a/b/c`.
    ///
    /// Components are separated by `/`; `%XX` escapes are decoded so that
    /// arbitrary byte components round-trip through [`fmt::Display`].
    /// Malformed escapes are taken literally.
    pub fn from_string(s: &str) -> Self {
        let components = s
            .split('/')
            .filter(|comp| !comp.is_empty())
            .map(|comp| NameComponent(unescape_component(comp)))
            .collect();
        Self { components }
    }

    pub fn from_components(components: Vec<NameComponent>) -> Self {
        Self { components }
    }

    /// Append a component, returning `self` for chaining.
    pub fn push(&mut self, component: impl Into<NameComponent>) -> &mut Self {
        self.components.push(component.into());
        self
    }

    /// Append all components of `other`.
    pub fn extend(&mut self, other: &Name) -> &mut Self {
        self.components.extend(other.components.iter().cloned());
        self
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    pub fn components(&self) -> impl Iterator<Item = &NameComponent> {
        self.components.iter()
    }

    pub fn get(&self, index: usize) -> Option<&NameComponent> {
        self.components.get(index)
    }

    /// The first `len` components as a new name.
    pub fn prefix(&self, len: usize) -> Self {
        Self {
            components: self.components.iter().take(len).cloned().collect(),
        }
    }

    /// The components from `start` onwards as a new name.
    pub fn suffix(&self, start: usize) -> Self {
        Self {
            components: self.components.iter().skip(start).cloned().collect(),
        }
    }

    /// `self` is a prefix of `other` iff `self` is no longer than `other`
    /// and all components match position-wise. Every name is a prefix of
    /// itself; the empty name is a prefix of everything.
    pub fn is_prefix_of(&self, other: &Self) -> bool {
        self.components.len() <= other.components.len()
            && self
                .components
                .iter()
                .zip(other.components.iter())
                .all(|(a, b)| a == b)
    }
}

// Display is the canonical reversible textual form: components joined by
// `/`, each percent-escaped. `Name::from_string(&name.to_string())` yields
// the original name for any byte content.
impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.components.is_empty() {
            return write!(f, "/");
        }
        for component in &self.components {
            write!(f, "/{}", component)?;
        }
        Ok(())
    }
}

/// Percent-escape a component: graphic ASCII stays literal except `/` and
/// `%`; everything else becomes `%XX`.
fn escape_component(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len());
    for &b in bytes {
        if b.is_ascii_graphic() && b != b'/' && b != b'%' {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{:02X}", b));
        }
    }
    out
}

fn unescape_component(s: &str) -> Bytes {
    let raw = s.as_bytes();
    let mut out = Vec::with_capacity(raw.len());
    let mut i = 0;
    while i < raw.len() {
        if raw[i] == b'%' && i + 2 < raw.len() {
            let hi = (raw[i + 1] as char).to_digit(16);
            let lo = (raw[i + 2] as char).to_digit(16);
            if let (Some(hi), Some(lo)) = (hi, lo) {
                out.push((hi * 16 + lo) as u8);
                i += 3;
                continue;
            }
        }
        out.push(raw[i]);
        i += 1;
    }
    Bytes::from(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_creation() {
        let name = Name::from_string("/test/data/1");
        assert_eq!(name.len(), 3);
        assert_eq!(name.get(0).unwrap().as_bytes(), b"test");
        assert_eq!(name.get(1).unwrap().as_bytes(), b"data");
        assert_eq!(name.get(2).unwrap().as_bytes(), b"1");
        assert_eq!(name.to_string(), "/test/data/1");
    }

    #[test]
    fn name_compare() {
        let name1 = Name::from_string("/a/b/c");
        let name2 = Name::from_string("/a/b/c");
        let name3 = Name::from_string("/a/b/d");
        let name4 = Name::from_string("/a/b");

        assert_eq!(name1, name2);
        assert_ne!(name1, name3);
        assert_ne!(name1, name4);

        assert!(name4.is_prefix_of(&name1));
        assert!(!name1.is_prefix_of(&name4));
        assert!(!name3.is_prefix_of(&name1));
        assert!(name1.is_prefix_of(&name1));
        assert!(Name::new().is_prefix_of(&name1));
    }

    #[test]
    fn push_and_extend() {
        let mut name = Name::from_string("/autoconfig/service");
        name.push("udp4://127.0.1.1:1337");
        name.extend(&Name::from_string("/test/testrepo"));
        assert_eq!(name.len(), 5);
        assert_eq!(name.get(2).unwrap().as_bytes(), b"udp4://127.0.1.1:1337");
        assert_eq!(name.suffix(3), Name::from_string("/test/testrepo"));
        assert_eq!(name.prefix(2), Name::from_string("/autoconfig/service"));
    }

    #[test]
    fn display_round_trip_escapes() {
        let mut name = Name::new();
        name.push("plain");
        name.push(NameComponent::new(vec![0x00u8, 0xff, b'/', b'%', b' ']));
        name.push("udp4://127.0.0.1:9000");
        let text = name.to_string();
        assert_eq!(Name::from_string(&text), name);
        // slashes inside components are escaped, so only the three
        // separators remain and re-parsing keeps the component count
        assert_eq!(text.matches('/').count(), 3);
        assert_eq!(Name::from_string(&text).len(), 3);
    }

    #[test]
    fn empty_name_displays_as_root() {
        assert_eq!(Name::new().to_string(), "/");
        assert_eq!(Name::from_string("/"), Name::new());
    }
}
