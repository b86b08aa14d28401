//! Change-number mode: index-driven scans, ranges and index/log consistency.

use ecl_backend::backend::{ResultCode, SearchRequest};
use ecl_backend::core::{Csn, SearchFilter, SearchScope, ServerId};

use crate::fixtures::changelog::{
    change_numbers, csns, delete_at, dn, request, ChangelogFixture, CHANGES_ONLY_FILTER,
};

#[test]
fn bounded_range_emits_exactly_the_requested_change_numbers() {
    let fixture = ChangelogFixture::new();
    let a = dn("dc=example,dc=com");
    fixture.write_many(&a, 1, 5);

    let (outcome, entries) = fixture
        .search(request("(&(changeNumber>=2)(changeNumber<=4))"))
        .expect("search");

    assert_eq!(change_numbers(&entries), vec![2, 3, 4]);
    assert_eq!(outcome.result_code, ResultCode::Success);
    assert_eq!(outcome.entries_sent, 3);
    assert!(entries.iter().all(|e| e.cookie.is_none()));
}

#[test]
fn entries_are_named_by_change_number_and_carry_a_display_cookie() {
    let fixture = ChangelogFixture::new();
    let a = dn("dc=example,dc=com");
    let msgs = fixture.write_many(&a, 1, 2);

    let (_, entries) = fixture.search(request(CHANGES_ONLY_FILTER)).expect("search");

    assert_eq!(entries.len(), 2);
    let second = &entries[1].entry;
    assert_eq!(second.dn(), &dn("changeNumber=2,cn=changelog"));
    assert_eq!(second.first_value("changeType"), Some("delete"));
    assert_eq!(
        second.first_value("targetDN"),
        Some(msgs[1].dn.to_string().as_str())
    );
    assert_eq!(
        second.first_value("changeLogCookie"),
        Some(format!("dc=example,dc=com:{};", msgs[1].csn).as_str())
    );
}

#[test]
fn change_number_base_returns_that_change_only() {
    let fixture = ChangelogFixture::new();
    let a = dn("dc=example,dc=com");
    fixture.write_many(&a, 1, 4);

    let request = SearchRequest::new(
        dn("changeNumber=3,cn=changelog"),
        SearchScope::BaseObject,
        SearchFilter::match_all(),
    );
    let (_, entries) = fixture.search(request).expect("search");
    assert_eq!(change_numbers(&entries), vec![3]);
}

#[test]
fn changes_from_several_domains_share_one_sequence() {
    let fixture = ChangelogFixture::new();
    let a = dn("dc=a");
    let b = dn("dc=b");
    fixture.write(&a, 1);
    fixture.write(&b, 2);
    fixture.write(&a, 3);

    let (_, entries) = fixture.search(request(CHANGES_ONLY_FILTER)).expect("search");
    assert_eq!(change_numbers(&entries), vec![1, 2, 3]);
    let domains: Vec<_> = entries
        .iter()
        .map(|e| e.entry.first_value("targetDN").unwrap_or_default().to_string())
        .collect();
    assert!(domains[1].ends_with("dc=b"));
}

#[test]
fn index_pointing_past_the_log_is_an_operations_error() {
    let fixture = ChangelogFixture::new();
    let a = dn("dc=example,dc=com");
    fixture.write_many(&a, 1, 2);
    fixture
        .log
        .append_index_only(&a, Csn::new(u64::MAX >> 8, 0, ServerId::new(1)))
        .expect("index only");

    let err = fixture
        .search(request(CHANGES_ONLY_FILTER))
        .expect_err("index ahead of log");
    assert_eq!(err.result_code(), ResultCode::OperationsError);
}

#[test]
fn purged_changes_are_skipped() {
    let fixture = ChangelogFixture::new();
    let a = dn("dc=example,dc=com");
    let msgs = fixture.write_many(&a, 1, 4);
    fixture.log.purge_through(&a, msgs[1].csn).expect("purge");

    let (_, entries) = fixture.search(request(CHANGES_ONLY_FILTER)).expect("search");
    assert_eq!(change_numbers(&entries), vec![3, 4]);
}

#[test]
fn size_limit_ends_the_scan_early() {
    let fixture = ChangelogFixture::new();
    let a = dn("dc=example,dc=com");
    fixture.write_many(&a, 1, 5);

    let (outcome, entries) = fixture
        .search(request(CHANGES_ONLY_FILTER).with_size_limit(2))
        .expect("search");
    assert_eq!(change_numbers(&entries), vec![1, 2]);
    assert_eq!(outcome.result_code, ResultCode::SizeLimitExceeded);
}

#[test]
fn malformed_change_number_filter_is_rejected() {
    let fixture = ChangelogFixture::new();
    let err = fixture
        .search(request("(changeNumber>=first)"))
        .expect_err("bad change number");
    assert_eq!(err.result_code(), ResultCode::InvalidAttributeSyntax);
}

#[test]
fn change_committed_behind_a_newer_change_of_another_replica_is_returned() {
    let fixture = ChangelogFixture::new();
    let a = dn("dc=a");
    let newer = delete_at(&a, 10, 1);
    let older = delete_at(&a, 5, 2);
    fixture.commit(&a, newer.clone());
    fixture.commit(&a, older.clone());
    fixture.commit(&a, delete_at(&a, 11, 1));

    let (_, entries) = fixture.search(request(CHANGES_ONLY_FILTER)).expect("search");
    assert_eq!(change_numbers(&entries), vec![1, 2, 3]);
    assert_eq!(&csns(&entries)[..2], &[newer.csn, older.csn]);
}

#[test]
fn hexadecimal_change_number_filter_matches_the_change() {
    let fixture = ChangelogFixture::new();
    let a = dn("dc=example,dc=com");
    fixture.write_many(&a, 1, 20);

    for filter in ["(changeNumber=0x10)", "(changeNumber=#10)"] {
        let (_, entries) = fixture.search(request(filter)).expect("search");
        assert_eq!(change_numbers(&entries), vec![16], "{filter}");
    }
}
