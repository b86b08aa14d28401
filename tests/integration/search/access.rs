//! Access control, base checks and backend configuration.

use ecl_backend::backend::{Privileges, ResultCode, SearchRequest};
use ecl_backend::config::{from_toml_str, BackendConfig};
use ecl_backend::core::{MultiDomainServerState, SearchFilter, SearchScope};

use crate::fixtures::changelog::{dn, request, ChangelogFixture, CHANGES_ONLY_FILTER};

#[test]
fn search_without_changelog_read_is_refused_before_scanning() {
    let fixture = ChangelogFixture::new();
    fixture.write(&dn("dc=a"), 1);

    let err = fixture
        .search(request(CHANGES_ONLY_FILTER).with_privileges(Privileges::default()))
        .expect_err("no privilege");
    assert_eq!(err.result_code(), ResultCode::InsufficientAccessRights);
}

#[test]
fn changes_only_registration_checks_privilege() {
    let fixture = ChangelogFixture::new();
    let (op, _rx) = fixture.operation(
        request(CHANGES_ONLY_FILTER)
            .with_cookie(MultiDomainServerState::new())
            .persistent(true)
            .with_privileges(Privileges::default()),
    );
    let err = fixture
        .backend
        .register_persistent_search(&op)
        .expect_err("no privilege");
    assert_eq!(err.result_code(), ResultCode::InsufficientAccessRights);
    assert_eq!(fixture.backend.persistent_search_count(), 0);
}

#[test]
fn base_scope_on_root_returns_only_the_root_entry() {
    let fixture = ChangelogFixture::new();
    fixture.write(&dn("dc=a"), 1);

    let request = SearchRequest::new(
        dn("cn=changelog"),
        SearchScope::BaseObject,
        SearchFilter::match_all(),
    );
    let (outcome, entries) = fixture.search(request).expect("search");
    assert_eq!(outcome.entries_sent, 1);
    let root = &entries[0].entry;
    assert_eq!(root.first_value("cn"), Some("changelog"));
    assert_eq!(root.first_value("subschemaSubentry"), Some("cn=schema"));
    assert!(root.get("numSubordinates").is_none());
}

#[test]
fn one_level_search_skips_cookie_mode_entries_below_domains() {
    let fixture = ChangelogFixture::new();
    fixture.write(&dn("dc=a"), 1);

    let request = SearchRequest::new(
        dn("cn=changelog"),
        SearchScope::SingleLevel,
        SearchFilter::parse(CHANGES_ONLY_FILTER).expect("filter"),
    )
    .with_cookie(MultiDomainServerState::new());
    let (_, entries) = fixture.search(request).expect("search");
    assert!(entries.is_empty());
}

#[test]
fn configured_root_and_exclusions_are_honoured() {
    let config = from_toml_str(
        r#"
[changelog]
root_dn = "cn=changes"
excluded_domains = ["dc=private"]
"#,
    )
    .expect("config");
    let backend_config = BackendConfig::try_from(&config.changelog).expect("valid");
    let fixture = ChangelogFixture::with_config(backend_config);
    fixture.write(&dn("dc=private"), 1);
    let public = fixture.write(&dn("dc=public"), 2);

    let request = SearchRequest::new(
        dn("cn=changes"),
        SearchScope::WholeSubtree,
        SearchFilter::parse(CHANGES_ONLY_FILTER).expect("filter"),
    )
    .with_cookie(MultiDomainServerState::new());
    let (_, entries) = fixture.search(request).expect("search");
    assert_eq!(entries.len(), 1);
    assert_eq!(
        entries[0].entry.dn(),
        &dn(&format!("replicationCSN={},dc=public,cn=changes", public.csn))
    );
    assert_eq!(fixture.backend.changelog_root(), &dn("cn=changes"));

    let err = fixture
        .search(request_under("cn=changelog"))
        .expect_err("old root");
    assert_eq!(err.result_code(), ResultCode::NoSuchObject);
}

fn request_under(base: &str) -> SearchRequest {
    SearchRequest::new(dn(base), SearchScope::WholeSubtree, SearchFilter::match_all())
}
