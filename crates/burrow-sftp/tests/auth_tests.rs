//! Authorization decision tests against committed key fixtures

use burrow_core::parse_public_key;
use burrow_sftp::{decide, AuthorizationSnapshot, Decision};
use russh::keys::PublicKey;

const ALICE_K1: &str = include_str!("fixtures/alice_k1.pub");
const ALICE_K2: &str = include_str!("fixtures/alice_k2.pub");
const BOB: &str = include_str!("fixtures/bob.pub");

fn key(line: &str) -> PublicKey {
    parse_public_key(line).unwrap()
}

#[test]
fn test_alice_k1_allowed_k2_denied_mallory_denied() {
    let snapshot = AuthorizationSnapshot::from_entries([("alice", ALICE_K1)]);

    assert_eq!(decide(&snapshot, "alice", &key(ALICE_K1)), Decision::Allow);
    assert_eq!(decide(&snapshot, "alice", &key(ALICE_K2)), Decision::Deny);
    assert_eq!(decide(&snapshot, "mallory", &key(ALICE_K1)), Decision::Deny);
}

#[test]
fn test_every_registered_key_allows() {
    let snapshot = AuthorizationSnapshot::from_entries([
        ("alice", ALICE_K1),
        ("alice", ALICE_K2),
        ("bob", BOB),
    ]);

    for k in [ALICE_K1, ALICE_K2] {
        assert_eq!(decide(&snapshot, "alice", &key(k)), Decision::Allow);
    }
    assert_eq!(decide(&snapshot, "alice", &key(BOB)), Decision::Deny);
    assert_eq!(decide(&snapshot, "bob", &key(BOB)), Decision::Allow);
    assert_eq!(decide(&snapshot, "bob", &key(ALICE_K1)), Decision::Deny);
}

#[test]
fn test_comment_is_ignored() {
    let stored = ALICE_K1.trim().rsplit_once(' ').unwrap().0;
    let snapshot = AuthorizationSnapshot::from_entries([("alice", stored)]);

    assert_eq!(decide(&snapshot, "alice", &key(ALICE_K1)), Decision::Allow);
}

#[test]
fn test_no_prefix_or_substring_matching() {
    // A truncated copy of the stored key must not authorize anything
    let truncated = &ALICE_K1.trim()[..40];
    let snapshot = AuthorizationSnapshot::from_entries([("alice", truncated)]);

    assert_eq!(decide(&snapshot, "alice", &key(ALICE_K1)), Decision::Deny);
}

#[test]
fn test_corrupt_entries_are_skipped() {
    let snapshot = AuthorizationSnapshot::from_entries([
        ("alice", "ssh-ed25519 !!!garbage!!!"),
        ("alice", ""),
        ("alice", ALICE_K2),
    ]);

    assert_eq!(decide(&snapshot, "alice", &key(ALICE_K2)), Decision::Allow);
    assert_eq!(decide(&snapshot, "alice", &key(ALICE_K1)), Decision::Deny);
}

#[test]
fn test_usernames_are_case_sensitive() {
    let snapshot = AuthorizationSnapshot::from_entries([("alice", ALICE_K1)]);

    assert_eq!(decide(&snapshot, "Alice", &key(ALICE_K1)), Decision::Deny);
}
