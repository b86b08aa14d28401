//! Cookie mode: resuming, excluded and disabled domains, cookie validation.

use ecl_backend::backend::ResultCode;
use ecl_backend::core::MultiDomainServerState;

use crate::fixtures::changelog::{
    csns, dn, msg_csns, request, ChangelogFixture, CHANGES_ONLY_FILTER,
};

#[test]
fn empty_cookie_returns_every_change_with_running_cookie() {
    let fixture = ChangelogFixture::new();
    let a = dn("dc=a");
    let b = dn("dc=b");
    let first = fixture.write(&a, 1);
    let second = fixture.write(&b, 2);

    let (_, entries) = fixture
        .search(request(CHANGES_ONLY_FILTER).with_cookie(MultiDomainServerState::new()))
        .expect("search");

    assert_eq!(csns(&entries), vec![first.csn, second.csn]);
    assert_eq!(
        entries[0].entry.dn(),
        &dn(&format!("replicationCSN={},dc=a,cn=changelog", first.csn))
    );
    assert_eq!(
        entries[1].cookie.as_deref(),
        Some(format!("dc=a:{};dc=b:{};", first.csn, second.csn).as_str())
    );
    assert_eq!(
        entries[1].entry.first_value("changeLogCookie"),
        entries[1].cookie.as_deref()
    );
    assert!(entries[0].entry.get("changeNumber").is_none());
}

#[test]
fn resuming_from_a_returned_cookie_continues_without_gaps() {
    let fixture = ChangelogFixture::new();
    let a = dn("dc=a");
    let b = dn("dc=b");
    let mut msgs = Vec::new();
    for _ in 0..3 {
        msgs.push(fixture.write(&a, 1));
        msgs.push(fixture.write(&b, 2));
    }

    let (_, first_page) = fixture
        .search(
            request(CHANGES_ONLY_FILTER)
                .with_cookie(MultiDomainServerState::new())
                .with_size_limit(4),
        )
        .expect("first page");
    assert_eq!(first_page.len(), 4);

    let cookie: MultiDomainServerState = first_page[3]
        .cookie
        .as_deref()
        .expect("cookie")
        .parse()
        .expect("cookie text");
    let (_, rest) = fixture
        .search(request(CHANGES_ONLY_FILTER).with_cookie(cookie))
        .expect("second page");

    let mut seen = csns(&first_page);
    seen.extend(csns(&rest));
    assert_eq!(seen, msg_csns(&msgs));
}

#[test]
fn excluded_and_disabled_domains_are_hidden() {
    let fixture = ChangelogFixture::new();
    let visible = dn("dc=visible");
    let admin = dn("cn=admin data");
    let disabled = dn("dc=disabled");
    fixture.log.disable_ecl(&disabled).expect("disable");

    fixture.write(&admin, 1);
    let shown = fixture.write(&visible, 2);
    fixture.write(&disabled, 3);

    let (_, entries) = fixture
        .search(request(CHANGES_ONLY_FILTER).with_cookie(MultiDomainServerState::new()))
        .expect("search");
    assert_eq!(csns(&entries), vec![shown.csn]);
    assert_eq!(
        entries[0].cookie.as_deref(),
        Some(format!("dc=visible:{};", shown.csn).as_str())
    );
}

#[test]
fn stale_cookie_is_refused() {
    let fixture = ChangelogFixture::new();
    let a = dn("dc=a");
    let msgs = fixture.write_many(&a, 1, 4);
    fixture.log.purge_through(&a, msgs[2].csn).expect("purge");

    let mut cookie = MultiDomainServerState::new();
    cookie.update(&a, msgs[0].csn);
    let err = fixture
        .search(request(CHANGES_ONLY_FILTER).with_cookie(cookie))
        .expect_err("stale cookie");
    assert_eq!(err.result_code(), ResultCode::UnwillingToPerform);
}

#[test]
fn cookie_naming_an_unknown_or_excluded_domain_is_refused() {
    let fixture = ChangelogFixture::new();
    let a = dn("dc=a");
    let msg = fixture.write(&a, 1);

    for domain in ["dc=unknown", "cn=admin data"] {
        let mut cookie = MultiDomainServerState::new();
        cookie.update(&dn(domain), msg.csn);
        let err = fixture
            .search(request(CHANGES_ONLY_FILTER).with_cookie(cookie))
            .expect_err("unknown domain");
        assert_eq!(err.result_code(), ResultCode::UnwillingToPerform, "{domain}");
    }
}

#[test]
fn root_entry_is_returned_for_subtree_searches() {
    let fixture = ChangelogFixture::new();
    let a = dn("dc=a");
    fixture.write(&a, 1);

    let (outcome, entries) = fixture
        .search(request("(objectClass=*)").with_cookie(MultiDomainServerState::new()))
        .expect("search");
    assert_eq!(outcome.entries_sent, 2);
    assert_eq!(entries[0].entry.dn(), &dn("cn=changelog"));
    assert_eq!(entries[0].entry.first_value("hasSubordinates"), Some("true"));
    assert!(entries[0].cookie.is_none());
}
