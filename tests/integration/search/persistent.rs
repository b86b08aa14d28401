//! Persistent searches: changes-only, scan-then-live hand-off under concurrent
//! writers, late replicas and cancellation.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::thread;

use ecl_backend::backend::ResultCode;
use ecl_backend::core::{Csn, Dn, MultiDomainServerState, ReplicaId, ServerId};

use crate::fixtures::changelog::{
    assert_quiet, change_numbers, csns, delete_at, dn, msg_csns, recv_n, request,
    ChangelogFixture, CHANGES_ONLY_FILTER,
};

const SEEDED_PER_REPLICA: u64 = 5;
const WRITTEN_PER_REPLICA: u64 = 60;

/// One thread per replica, each committing and notifying on its own with
/// CSNs increasing per replica only.
fn spawn_replica_writers(
    fixture: &Arc<ChangelogFixture>,
    replicas: &[(Dn, u16)],
) -> Vec<thread::JoinHandle<()>> {
    replicas
        .iter()
        .cloned()
        .map(|(domain, server)| {
            let fixture = Arc::clone(fixture);
            thread::spawn(move || {
                let first = SEEDED_PER_REPLICA + 1;
                for offset in first..first + WRITTEN_PER_REPLICA {
                    fixture.commit_and_notify(&domain, delete_at(&domain, offset, server));
                }
            })
        })
        .collect()
}

fn seed(fixture: &ChangelogFixture, replicas: &[(Dn, u16)]) {
    for offset in 1..=SEEDED_PER_REPLICA {
        for (domain, server) in replicas {
            fixture.commit_and_notify(domain, delete_at(domain, offset, *server));
        }
    }
}

#[test]
fn changes_only_cookie_search_starts_from_newest_cookie() {
    let fixture = ChangelogFixture::new();
    let a = dn("dc=a");
    let old = fixture.write(&a, 1);

    let (op, rx) = fixture.operation(
        request(CHANGES_ONLY_FILTER)
            .with_cookie(MultiDomainServerState::new())
            .persistent(true),
    );
    let outcome = fixture.backend.search(&op).expect("register");
    assert_eq!(outcome.entries_sent, 0);
    assert_quiet(&rx);

    let new = fixture.write(&a, 1);
    let entries = recv_n(&rx, 1);
    assert_eq!(csns(&entries), vec![new.csn]);
    assert_eq!(
        entries[0].cookie.as_deref(),
        Some(format!("dc=a:{};", new.csn).as_str())
    );
    assert_ne!(old.csn, new.csn);
}

#[test]
fn changes_only_change_number_search_sees_new_changes_only() {
    let fixture = ChangelogFixture::new();
    let a = dn("dc=a");
    fixture.write_many(&a, 1, 3);

    let (op, rx) = fixture.operation(request(CHANGES_ONLY_FILTER).persistent(true));
    fixture.backend.search(&op).expect("register");

    fixture.write_many(&a, 1, 2);
    assert_eq!(change_numbers(&recv_n(&rx, 2)), vec![4, 5]);
    assert_quiet(&rx);
}

#[test]
fn cookie_search_hands_off_to_live_without_gaps_or_duplicates() {
    let fixture = Arc::new(ChangelogFixture::new());
    let a = dn("dc=a");
    let b = dn("dc=b");
    let mut expected = fixture.write_many(&a, 1, 20);
    expected.extend(fixture.write_many(&b, 2, 20));

    let (op, rx) = fixture.operation(
        request(CHANGES_ONLY_FILTER)
            .with_cookie(MultiDomainServerState::new())
            .persistent(false),
    );

    let writers: Vec<_> = [(a.clone(), 1_u16), (a.clone(), 3), (b.clone(), 2)]
        .into_iter()
        .map(|(domain, server)| {
            let fixture = Arc::clone(&fixture);
            thread::spawn(move || fixture.write_many(&domain, server, 50))
        })
        .collect();
    fixture.backend.search(&op).expect("initial scan");
    for writer in writers {
        expected.extend(writer.join().expect("writer"));
    }

    let received = recv_n(&rx, expected.len());
    assert_quiet(&rx);

    let got: BTreeSet<Csn> = csns(&received).into_iter().collect();
    let want: BTreeSet<Csn> = msg_csns(&expected).into_iter().collect();
    assert_eq!(got.len(), received.len(), "duplicate deliveries");
    assert_eq!(got, want);

    let mut last_per_replica: BTreeMap<ReplicaId, Csn> = BTreeMap::new();
    for entry in &received {
        let csn = csns(std::slice::from_ref(entry))[0];
        let domain = if entry.entry.dn().is_descendant_of(&dn("dc=a,cn=changelog")) {
            dn("dc=a")
        } else {
            dn("dc=b")
        };
        let replica = ReplicaId::new(domain, csn.server_id());
        if let Some(last) = last_per_replica.insert(replica.clone(), csn) {
            assert!(last < csn, "{replica} out of order: {last} then {csn}");
        }
    }
}

#[test]
fn change_number_search_hands_off_to_live_without_gaps_or_duplicates() {
    let fixture = Arc::new(ChangelogFixture::new());
    let a = dn("dc=a");
    let b = dn("dc=b");
    fixture.write_many(&a, 1, 25);

    let (op, rx) = fixture.operation(request(CHANGES_ONLY_FILTER).persistent(false));

    let writers: Vec<_> = [(a.clone(), 1_u16), (b.clone(), 2)]
        .into_iter()
        .map(|(domain, server)| {
            let fixture = Arc::clone(&fixture);
            thread::spawn(move || fixture.write_many(&domain, server, 60))
        })
        .collect();
    fixture.backend.search(&op).expect("initial scan");
    for writer in writers {
        writer.join().expect("writer");
    }

    let total = 25 + 2 * 60;
    let received = change_numbers(&recv_n(&rx, total));
    assert_quiet(&rx);
    let expected: Vec<i64> = (1..=total as i64).collect();
    assert_eq!(received, expected);
}

#[test]
fn replica_first_seen_after_the_scan_is_delivered_live() {
    let fixture = ChangelogFixture::new();
    let a = dn("dc=a");
    fixture.write(&a, 1);

    let (op, rx) = fixture.operation(
        request(CHANGES_ONLY_FILTER)
            .with_cookie(MultiDomainServerState::new())
            .persistent(false),
    );
    fixture.backend.search(&op).expect("initial scan");
    assert_eq!(recv_n(&rx, 1).len(), 1);

    let newcomer = fixture.write(&a, 9);
    let other_domain = fixture.write(&dn("dc=b"), 4);
    assert_eq!(
        csns(&recv_n(&rx, 2)),
        vec![newcomer.csn, other_domain.csn]
    );
}

#[test]
fn deregistered_search_stops_receiving() {
    let fixture = ChangelogFixture::new();
    let a = dn("dc=a");
    let (op, rx) = fixture.operation(
        request(CHANGES_ONLY_FILTER)
            .with_cookie(MultiDomainServerState::new())
            .persistent(true),
    );
    fixture.backend.search(&op).expect("register");
    fixture.write(&a, 1);
    assert_eq!(recv_n(&rx, 1).len(), 1);

    assert!(fixture.backend.deregister_persistent_search(op.id()));
    fixture.write(&a, 1);
    assert_quiet(&rx);
    assert_eq!(op.outcome().result_code, ResultCode::Cancelled);
    assert_eq!(fixture.backend.persistent_search_count(), 0);
}

#[test]
fn dropped_client_is_pruned_on_next_change() {
    let fixture = ChangelogFixture::new();
    let a = dn("dc=a");
    let (op, rx) = fixture.operation(request(CHANGES_ONLY_FILTER).persistent(true));
    fixture.backend.search(&op).expect("register");
    drop(rx);

    fixture.write(&a, 1);
    assert!(op.is_cancelled());
    fixture.write(&a, 1);
    assert_eq!(fixture.backend.persistent_search_count(), 0);
}

#[test]
fn scan_failure_deregisters_the_search() {
    let fixture = ChangelogFixture::new();
    let a = dn("dc=a");
    let msgs = fixture.write_many(&a, 1, 3);
    fixture.log.purge_through(&a, msgs[1].csn).expect("purge");

    let mut stale = MultiDomainServerState::new();
    stale.update(&a, msgs[0].csn);
    let (op, _rx) = fixture.operation(
        request(CHANGES_ONLY_FILTER)
            .with_cookie(stale)
            .persistent(false),
    );
    let err = fixture.backend.search(&op).expect_err("stale cookie");
    assert_eq!(err.result_code(), ResultCode::UnwillingToPerform);
    assert_eq!(fixture.backend.persistent_search_count(), 0);
    assert!(op.is_cancelled());
}

#[test]
fn concurrent_replica_writers_are_delivered_once_in_replica_order() {
    let fixture = Arc::new(ChangelogFixture::new());
    let a = dn("dc=a");
    let b = dn("dc=b");
    let replicas = [(a.clone(), 1_u16), (a.clone(), 2), (b.clone(), 3), (b.clone(), 4)];
    seed(&fixture, &replicas);

    let (op, rx) = fixture.operation(
        request(CHANGES_ONLY_FILTER)
            .with_cookie(MultiDomainServerState::new())
            .persistent(false),
    );
    let writers = spawn_replica_writers(&fixture, &replicas);
    fixture.backend.search(&op).expect("initial scan");
    for writer in writers {
        writer.join().expect("writer");
    }

    let per_replica = SEEDED_PER_REPLICA + WRITTEN_PER_REPLICA;
    let received = recv_n(&rx, replicas.len() * per_replica as usize);
    assert_quiet(&rx);

    let mut by_server: BTreeMap<ServerId, Vec<Csn>> = BTreeMap::new();
    for csn in csns(&received) {
        by_server.entry(csn.server_id()).or_default().push(csn);
    }
    assert_eq!(by_server.len(), replicas.len());
    for (server, seen) in &by_server {
        assert_eq!(seen.len() as u64, per_replica, "replica {server}");
        assert!(
            seen.windows(2).all(|pair| pair[0] < pair[1]),
            "replica {server} out of order or duplicated"
        );
    }

    // Every earlier notification has returned, so the next entry carries
    // the cookie of everything committed.
    let last = fixture.commit_and_notify(&a, delete_at(&a, 10_000, 1));
    let entry = recv_n(&rx, 1).remove(0);
    let cookie: MultiDomainServerState = entry
        .cookie
        .as_deref()
        .expect("cookie")
        .parse()
        .expect("cookie parses");
    assert_eq!(cookie, fixture.log.newest_cookie().expect("newest"));
    assert_eq!(cookie.to_string(), last.cookie);
}

#[test]
fn concurrent_replica_writers_get_every_change_number_once() {
    let fixture = Arc::new(ChangelogFixture::new());
    let replicas = [(dn("dc=a"), 1_u16), (dn("dc=a"), 2), (dn("dc=b"), 3)];
    seed(&fixture, &replicas);

    let (op, rx) = fixture.operation(request(CHANGES_ONLY_FILTER).persistent(false));
    let writers = spawn_replica_writers(&fixture, &replicas);
    fixture.backend.search(&op).expect("initial scan");
    for writer in writers {
        writer.join().expect("writer");
    }

    let total = replicas.len() as i64 * (SEEDED_PER_REPLICA + WRITTEN_PER_REPLICA) as i64;
    let received = change_numbers(&recv_n(&rx, total as usize));
    assert_quiet(&rx);
    let unique: BTreeSet<i64> = received.iter().copied().collect();
    assert_eq!(unique.len(), received.len(), "duplicate deliveries");
    assert_eq!(unique, (1..=total).collect());
}

#[test]
fn disabled_domain_is_hidden_from_scan_and_live_alike() {
    let fixture = ChangelogFixture::new();
    let a = dn("dc=a");
    let dark = dn("dc=dark");
    fixture.log.disable_ecl(&dark).expect("disable");
    fixture.write(&a, 1);
    fixture.write(&dark, 2);

    let (op, rx) = fixture.operation(request(CHANGES_ONLY_FILTER).persistent(false));
    fixture.backend.search(&op).expect("initial scan");
    fixture.write(&dark, 2);
    fixture.write(&a, 1);

    assert_eq!(change_numbers(&recv_n(&rx, 2)), vec![1, 4]);
    assert_quiet(&rx);
}
