//! Committed changes as read from the per-domain change log.

use std::fmt;

use uuid::Uuid;

use super::csn::Csn;
use super::dn::Dn;
use super::entry::Attribute;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModificationType {
    Add,
    Delete,
    Replace,
    Increment,
}

impl ModificationType {
    pub fn as_str(self) -> &'static str {
        match self {
            ModificationType::Add => "add",
            ModificationType::Delete => "delete",
            ModificationType::Replace => "replace",
            ModificationType::Increment => "increment",
        }
    }
}

impl fmt::Display for ModificationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Modification {
    pub kind: ModificationType,
    pub attribute: Attribute,
}

impl Modification {
    pub fn new(kind: ModificationType, attribute: Attribute) -> Self {
        Self { kind, attribute }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UpdateKind {
    Add {
        attributes: Vec<Attribute>,
    },
    Modify {
        mods: Vec<Modification>,
    },
    ModifyDn {
        mods: Vec<Modification>,
        new_rdn: String,
        new_superior: Option<Dn>,
        delete_old_rdn: bool,
    },
    Delete {
        initiators_name: Option<String>,
    },
    /// Replica went offline. Carries a CSN but is not a directory change.
    ReplicaOffline,
}

impl UpdateKind {
    pub fn name(&self) -> &'static str {
        match self {
            UpdateKind::Add { .. } => "add",
            UpdateKind::Modify { .. } => "modify",
            UpdateKind::ModifyDn { .. } => "modrdn",
            UpdateKind::Delete { .. } => "delete",
            UpdateKind::ReplicaOffline => "replica-offline",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UpdateMsg {
    pub csn: Csn,
    pub dn: Dn,
    pub entry_uuid: Option<Uuid>,
    /// Attributes the domain is configured to include in changelog entries.
    pub ecl_includes: Vec<Attribute>,
    pub kind: UpdateKind,
}

impl UpdateMsg {
    pub fn new(csn: Csn, dn: Dn, kind: UpdateKind) -> Self {
        Self {
            csn,
            dn,
            entry_uuid: None,
            ecl_includes: Vec::new(),
            kind,
        }
    }

    pub fn with_entry_uuid(mut self, uuid: Uuid) -> Self {
        self.entry_uuid = Some(uuid);
        self
    }

    pub fn with_ecl_includes(mut self, includes: Vec<Attribute>) -> Self {
        self.ecl_includes = includes;
        self
    }

    pub fn add(csn: Csn, dn: Dn, attributes: Vec<Attribute>) -> Self {
        Self::new(csn, dn, UpdateKind::Add { attributes })
    }

    pub fn modify(csn: Csn, dn: Dn, mods: Vec<Modification>) -> Self {
        Self::new(csn, dn, UpdateKind::Modify { mods })
    }

    pub fn delete(csn: Csn, dn: Dn, initiators_name: Option<String>) -> Self {
        Self::new(csn, dn, UpdateKind::Delete { initiators_name })
    }

    /// Whether this message is a directory change that renders as an entry.
    pub fn is_ldap_update(&self) -> bool {
        !matches!(self.kind, UpdateKind::ReplicaOffline)
    }
}
