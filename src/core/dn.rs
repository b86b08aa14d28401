//! Distinguished names and search scopes.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::error::{CoreError, InvalidId};

/// A single-valued relative distinguished name, `attr=value`.
#[derive(Clone, Debug)]
pub struct Rdn {
    attr: String,
    value: String,
}

impl Rdn {
    pub fn new(attr: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            attr: attr.into(),
            value: value.into(),
        }
    }

    pub fn attr(&self) -> &str {
        &self.attr
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    /// Whether the RDN's attribute type is `name`, ignoring case.
    pub fn is_type(&self, name: &str) -> bool {
        self.attr.eq_ignore_ascii_case(name)
    }

    fn normalized(&self) -> (String, String) {
        (
            self.attr.to_ascii_lowercase(),
            self.value.trim().to_lowercase(),
        )
    }
}

impl PartialEq for Rdn {
    fn eq(&self, other: &Self) -> bool {
        self.normalized() == other.normalized()
    }
}

impl Eq for Rdn {}

impl fmt::Display for Rdn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}=", self.attr)?;
        for (idx, ch) in self.value.chars().enumerate() {
            let leading = idx == 0 && (ch == ' ' || ch == '#');
            if leading || matches!(ch, ',' | '+' | '"' | '\\' | '<' | '>' | ';') {
                write!(f, "\\{ch}")?;
            } else {
                write!(f, "{ch}")?;
            }
        }
        Ok(())
    }
}

/// A distinguished name, stored leaf first.
///
/// Attribute types and values compare case-insensitively.
#[derive(Clone, Debug, Default)]
pub struct Dn {
    rdns: Vec<Rdn>,
}

impl Dn {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_rdns(rdns: Vec<Rdn>) -> Self {
        Self { rdns }
    }

    pub fn parse(raw: &str) -> Result<Self, CoreError> {
        let invalid = |reason: String| {
            CoreError::from(InvalidId::Dn {
                raw: raw.to_string(),
                reason,
            })
        };
        if raw.trim().is_empty() {
            return Ok(Self::empty());
        }

        let mut rdns = Vec::new();
        for component in split_unescaped(raw, ',') {
            let Some((attr, value)) = split_once_unescaped(&component, '=') else {
                return Err(invalid(format!("rdn `{component}` has no `=`")));
            };
            let attr = attr.trim();
            if attr.is_empty() {
                return Err(invalid(format!("rdn `{component}` has an empty attribute")));
            }
            if !attr
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.' || c == ';')
            {
                return Err(invalid(format!("attribute type `{attr}` is malformed")));
            }
            let value = unescape(value.trim()).map_err(invalid)?;
            rdns.push(Rdn::new(attr, value));
        }
        Ok(Self { rdns })
    }

    pub fn size(&self) -> usize {
        self.rdns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rdns.is_empty()
    }

    /// Leaf RDN, if any.
    pub fn rdn(&self) -> Option<&Rdn> {
        self.rdns.first()
    }

    pub fn rdns(&self) -> &[Rdn] {
        &self.rdns
    }

    pub fn parent(&self) -> Option<Dn> {
        if self.rdns.is_empty() {
            return None;
        }
        Some(Self {
            rdns: self.rdns[1..].to_vec(),
        })
    }

    pub fn child(&self, rdn: Rdn) -> Dn {
        let mut rdns = Vec::with_capacity(self.rdns.len() + 1);
        rdns.push(rdn);
        rdns.extend(self.rdns.iter().cloned());
        Self { rdns }
    }

    /// `self` placed directly below `suffix`.
    pub fn under(&self, suffix: &Dn) -> Dn {
        let mut rdns = self.rdns.clone();
        rdns.extend(suffix.rdns.iter().cloned());
        Self { rdns }
    }

    /// Whether `self` equals `ancestor` or lies anywhere below it.
    pub fn is_descendant_of(&self, ancestor: &Dn) -> bool {
        if ancestor.rdns.len() > self.rdns.len() {
            return false;
        }
        let offset = self.rdns.len() - ancestor.rdns.len();
        self.rdns[offset..] == ancestor.rdns[..]
    }

    pub fn matches_base_and_scope(&self, base: &Dn, scope: SearchScope) -> bool {
        match scope {
            SearchScope::BaseObject => self == base,
            SearchScope::SingleLevel => self.parent().as_ref() == Some(base),
            SearchScope::WholeSubtree => self.is_descendant_of(base),
            SearchScope::SubordinateSubtree => self != base && self.is_descendant_of(base),
        }
    }

    fn normalized_from_root(&self) -> impl Iterator<Item = (String, String)> + '_ {
        self.rdns.iter().rev().map(Rdn::normalized)
    }
}

impl PartialEq for Dn {
    fn eq(&self, other: &Self) -> bool {
        self.rdns == other.rdns
    }
}

impl Eq for Dn {}

impl Ord for Dn {
    fn cmp(&self, other: &Self) -> Ordering {
        self.normalized_from_root().cmp(other.normalized_from_root())
    }
}

impl PartialOrd for Dn {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Hash for Dn {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for rdn in &self.rdns {
            rdn.normalized().hash(state);
        }
    }
}

impl fmt::Display for Dn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, rdn) in self.rdns.iter().enumerate() {
            if idx > 0 {
                f.write_str(",")?;
            }
            write!(f, "{rdn}")?;
        }
        Ok(())
    }
}

impl FromStr for Dn {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for Dn {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Dn {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Dn::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// LDAP search scope.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchScope {
    BaseObject,
    SingleLevel,
    WholeSubtree,
    SubordinateSubtree,
}

fn split_unescaped(raw: &str, sep: char) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut escaped = false;
    for ch in raw.chars() {
        if escaped {
            current.push(ch);
            escaped = false;
        } else if ch == '\\' {
            current.push(ch);
            escaped = true;
        } else if ch == sep {
            parts.push(std::mem::take(&mut current));
        } else {
            current.push(ch);
        }
    }
    parts.push(current);
    parts
}

fn split_once_unescaped(raw: &str, sep: char) -> Option<(String, String)> {
    let mut escaped = false;
    for (idx, ch) in raw.char_indices() {
        if escaped {
            escaped = false;
        } else if ch == '\\' {
            escaped = true;
        } else if ch == sep {
            return Some((raw[..idx].to_string(), raw[idx + 1..].to_string()));
        }
    }
    None
}

fn unescape(raw: &str) -> Result<String, String> {
    let mut out = Vec::with_capacity(raw.len());
    let bytes = raw.as_bytes();
    let mut idx = 0;
    while idx < bytes.len() {
        if bytes[idx] != b'\\' {
            out.push(bytes[idx]);
            idx += 1;
            continue;
        }
        let Some(&next) = bytes.get(idx + 1) else {
            return Err("dangling escape".to_string());
        };
        let hex = bytes
            .get(idx + 1..idx + 3)
            .and_then(|pair| std::str::from_utf8(pair).ok())
            .filter(|pair| pair.chars().all(|c| c.is_ascii_hexdigit()))
            .and_then(|pair| u8::from_str_radix(pair, 16).ok());
        match hex {
            Some(byte) => {
                out.push(byte);
                idx += 3;
            }
            None => {
                out.push(next);
                idx += 2;
            }
        }
    }
    String::from_utf8(out).map_err(|_| "escaped value is not valid utf-8".to_string())
}
