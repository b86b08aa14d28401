//! Renders update messages as changelog entries.
//!
//! Rendering is a pure function of its inputs so the live path can render a
//! change once and share the entry between searches.

use time::OffsetDateTime;
use time::macros::format_description;

use crate::core::entry::append_ldif_separator_and_value;
use crate::core::{
    Attribute, Dn, Entry, Modification, ModificationType, Rdn, UpdateKind, UpdateMsg,
};

use super::error::SearchError;

pub const SCHEMA_SUBENTRY_DN: &str = "cn=schema";
const CHANGELOG_ENTRY_OBJECT_CLASSES: [&str; 2] = ["top", "changeLogEntry"];
const CHANGELOG_ROOT_OBJECT_CLASSES: [&str; 2] = ["top", "container"];
const CREATORS_NAME: &str = "creatorsName";
const MODIFIERS_NAME: &str = "modifiersName";

/// Builds the changelog entry for `msg`.
///
/// With `change_number > 0` the entry is named `changeNumber=N,<root>`,
/// otherwise `replicationCSN=<csn>,<domain>,<root>`.
pub fn create_entry_from_msg(
    root: &Dn,
    domain: &Dn,
    change_number: i64,
    cookie: &str,
    msg: &UpdateMsg,
) -> Result<Entry, SearchError> {
    let (change_type, changes, initiator) = match &msg.kind {
        UpdateKind::Add { attributes } => {
            let initiator = attributes
                .iter()
                .find(|attr| attr.is_type(CREATORS_NAME))
                .and_then(Attribute::first_value)
                .map(str::to_string);
            ("add", Some(attributes_ldif(attributes)), initiator)
        }
        UpdateKind::Modify { mods } => ("modify", Some(mods_ldif(mods)), modifiers_name(mods)),
        UpdateKind::ModifyDn { mods, .. } => ("modrdn", Some(mods_ldif(mods)), modifiers_name(mods)),
        UpdateKind::Delete { initiators_name } => ("delete", None, initiators_name.clone()),
        UpdateKind::ReplicaOffline => {
            return Err(SearchError::UnexpectedMessage {
                domain: domain.clone(),
                kind: msg.kind.name(),
            });
        }
    };

    let csn = msg.csn;
    let dn = if change_number > 0 {
        root.child(Rdn::new("changeNumber", change_number.to_string()))
    } else {
        domain
            .under(root)
            .child(Rdn::new("replicationCSN", csn.to_string()))
    };

    let mut entry = Entry::new(dn.clone(), object_classes(&CHANGELOG_ENTRY_OBJECT_CLASSES));
    entry.put(Attribute::single("subschemaSubentry", SCHEMA_SUBENTRY_DN).operational());
    entry.put(Attribute::single("numSubordinates", "0").operational());
    entry.put(Attribute::single("hasSubordinates", "false").operational());
    entry.put(Attribute::single("entryDN", dn.to_string()).operational());

    if change_number > 0 {
        entry.put_value("changeNumber", change_number.to_string());
    }
    entry.put_value("changeTime", change_time(csn.timestamp_ms())?);
    entry.put_value("changeType", change_type);
    entry.put_value("targetDN", msg.dn.to_string());
    entry.put_value("replicationCSN", csn.to_string());
    entry.put_value("replicaIdentifier", csn.server_id().to_string());
    if let Some(changes) = changes {
        entry.put_value("changes", changes);
    }
    if let Some(initiator) = initiator {
        entry.put_value("changeInitiatorsName", initiator);
    }
    if let Some(uuid) = msg.entry_uuid {
        entry.put_value("targetEntryUUID", uuid.to_string());
    }
    entry.put_value("changeLogCookie", cookie);
    if !msg.ecl_includes.is_empty() {
        entry.put_value("includedAttributes", attributes_ldif(&msg.ecl_includes));
    }

    if let UpdateKind::ModifyDn {
        new_rdn,
        new_superior,
        delete_old_rdn,
        ..
    } = &msg.kind
    {
        entry.put_value("newrdn", new_rdn.as_str());
        if let Some(superior) = new_superior {
            entry.put_value("newsuperior", superior.to_string());
        }
        entry.put_value("deleteoldrdn", delete_old_rdn.to_string());
    }
    Ok(entry)
}

/// The entry for the changelog root itself. It never carries
/// `numSubordinates`: the count would be stale as soon as it was sent.
pub fn build_base_changelog_entry(root: &Dn, has_subordinates: bool) -> Entry {
    let mut entry = Entry::new(root.clone(), object_classes(&CHANGELOG_ROOT_OBJECT_CLASSES));
    if let Some(rdn) = root.rdn() {
        entry.put_value(rdn.attr(), rdn.value());
    }
    entry.put(Attribute::single("subschemaSubentry", SCHEMA_SUBENTRY_DN).operational());
    entry.put(Attribute::single("hasSubordinates", has_subordinates.to_string()).operational());
    entry.put(Attribute::single("entryDN", root.to_string()).operational());
    entry
}

/// GeneralizedTime `YYYYMMDDhhmmssZ` in UTC.
pub fn change_time(timestamp_ms: u64) -> Result<String, SearchError> {
    let invalid = || SearchError::InvalidTimestamp { timestamp_ms };
    let nanos = i128::from(timestamp_ms) * 1_000_000;
    let time = OffsetDateTime::from_unix_timestamp_nanos(nanos).map_err(|_| invalid())?;
    time.format(format_description!(
        "[year][month][day][hour][minute][second]Z"
    ))
    .map_err(|_| invalid())
}

fn object_classes(classes: &[&str]) -> Vec<String> {
    classes.iter().map(|class| class.to_string()).collect()
}

fn attributes_ldif(attributes: &[Attribute]) -> String {
    let mut out = String::new();
    for attr in attributes {
        for value in attr.values() {
            out.push_str(attr.name());
            append_ldif_separator_and_value(&mut out, value);
            out.push('\n');
        }
    }
    out
}

fn mods_ldif(mods: &[Modification]) -> String {
    let mut out = String::new();
    for modification in mods {
        let name = modification.attribute.name();
        out.push_str(modification.kind.as_str());
        out.push_str(": ");
        out.push_str(name);
        out.push('\n');
        for value in modification.attribute.values() {
            out.push_str(name);
            append_ldif_separator_and_value(&mut out, value);
            out.push('\n');
        }
        out.push_str("-\n");
    }
    out
}

fn modifiers_name(mods: &[Modification]) -> Option<String> {
    mods.iter()
        .filter(|m| m.kind == ModificationType::Replace && m.attribute.is_type(MODIFIERS_NAME))
        .find_map(|m| m.attribute.first_value())
        .map(str::to_string)
}
