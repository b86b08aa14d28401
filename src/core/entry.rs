//! Directory entries as returned to search clients.

use std::fmt::Write as _;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;

use super::dn::Dn;

/// One attribute with its values, in insertion order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Attribute {
    name: String,
    values: Vec<String>,
    operational: bool,
}

impl Attribute {
    pub fn new(name: impl Into<String>, values: Vec<String>) -> Self {
        Self {
            name: name.into(),
            values,
            operational: false,
        }
    }

    pub fn single(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(name, vec![value.into()])
    }

    pub fn operational(mut self) -> Self {
        self.operational = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn values(&self) -> &[String] {
        &self.values
    }

    pub fn first_value(&self) -> Option<&str> {
        self.values.first().map(String::as_str)
    }

    pub fn is_operational(&self) -> bool {
        self.operational
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Attribute type comparison ignores case and attribute options.
    pub fn is_type(&self, name: &str) -> bool {
        let base = self.name.split(';').next().unwrap_or(&self.name);
        base.eq_ignore_ascii_case(name)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Entry {
    dn: Dn,
    object_classes: Vec<String>,
    attributes: Vec<Attribute>,
}

impl Entry {
    pub fn new(dn: Dn, object_classes: Vec<String>) -> Self {
        Self {
            dn,
            object_classes,
            attributes: Vec::new(),
        }
    }

    pub fn dn(&self) -> &Dn {
        &self.dn
    }

    pub fn object_classes(&self) -> &[String] {
        &self.object_classes
    }

    pub fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }

    /// Adds or replaces the attribute with the same type.
    pub fn put(&mut self, attribute: Attribute) {
        match self
            .attributes
            .iter_mut()
            .find(|existing| existing.name.eq_ignore_ascii_case(&attribute.name))
        {
            Some(existing) => *existing = attribute,
            None => self.attributes.push(attribute),
        }
    }

    pub fn put_value(&mut self, name: &str, value: impl Into<String>) {
        self.put(Attribute::single(name, value));
    }

    pub fn get(&self, name: &str) -> Option<&Attribute> {
        self.attributes.iter().find(|attr| attr.is_type(name))
    }

    pub fn first_value(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(Attribute::first_value)
    }

    /// Values of `name`, treating `objectClass` as an attribute.
    pub fn values_of(&self, name: &str) -> Vec<&str> {
        if name.eq_ignore_ascii_case("objectclass") {
            return self.object_classes.iter().map(String::as_str).collect();
        }
        self.attributes
            .iter()
            .filter(|attr| attr.is_type(name))
            .flat_map(|attr| attr.values.iter().map(String::as_str))
            .collect()
    }

    /// Deterministic LDIF rendering.
    pub fn to_ldif(&self) -> String {
        let mut out = String::new();
        out.push_str("dn");
        append_ldif_separator_and_value(&mut out, &self.dn.to_string());
        out.push('\n');
        for class in &self.object_classes {
            out.push_str("objectClass");
            append_ldif_separator_and_value(&mut out, class);
            out.push('\n');
        }
        for attr in &self.attributes {
            for value in &attr.values {
                out.push_str(&attr.name);
                append_ldif_separator_and_value(&mut out, value);
                out.push('\n');
            }
        }
        out
    }
}

/// Appends `: value`, or `:: base64` when the value is not LDIF-safe.
pub fn append_ldif_separator_and_value(out: &mut String, value: &str) {
    if needs_base64(value) {
        let _ = write!(out, ":: {}", STANDARD.encode(value.as_bytes()));
    } else {
        let _ = write!(out, ": {value}");
    }
}

fn needs_base64(value: &str) -> bool {
    let bytes = value.as_bytes();
    let (Some(first), Some(last)) = (bytes.first(), bytes.last()) else {
        return false;
    };
    if matches!(first, b' ' | b':' | b'<') || *last == b' ' {
        return true;
    }
    bytes
        .iter()
        .any(|b| matches!(b, b'\0' | b'\n' | b'\r') || !b.is_ascii())
}
