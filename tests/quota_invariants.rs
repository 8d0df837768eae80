//! Quota invariants under concurrency
//!
//! However many callers race for a provider, committed usage never exceeds
//! the quota and exactly `min(limit, attempts)` reservations succeed.

use careroute::config::Config;
use careroute::quota::QuotaTracker;
use proptest::prelude::*;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

fn tracker(quota_limit: u64, user_quota_limit: Option<u64>) -> QuotaTracker {
    let user_limit = user_quota_limit
        .map(|l| format!("user_quota_limit = {l}"))
        .unwrap_or_default();
    let config = Config::from_str(&format!(
        r#"
[server]
host = "127.0.0.1"
port = 3000

[[providers]]
name = "local"
kind = "local_template"
tier = "local"
templates = [{{ patterns = ["hello"], answer = "Hi!" }}]

[[providers]]
name = "free-1"
kind = "static"
tier = "free"
quota_limit = {quota_limit}
{user_limit}
response = "free"

[[providers]]
name = "premium"
kind = "static"
tier = "premium"
response = "premium"
safety = true
"#
    ))
    .expect("test config should be valid");
    QuotaTracker::from_config(&config)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn prop_concurrent_reservations_never_exceed_quota(
        quota_limit in 0u64..40,
        threads in 1usize..8,
        attempts_per_thread in 1usize..12,
    ) {
        let tracker = tracker(quota_limit, None);
        let accepted = AtomicU64::new(0);

        std::thread::scope(|scope| {
            for t in 0..threads {
                let tracker = &tracker;
                let accepted = &accepted;
                scope.spawn(move || {
                    for _ in 0..attempts_per_thread {
                        if tracker.try_consume("free-1", &format!("user-{t}"), 1) {
                            accepted.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                });
            }
        });

        let attempts = (threads * attempts_per_thread) as u64;
        let accepted = accepted.load(Ordering::SeqCst);
        prop_assert_eq!(accepted, quota_limit.min(attempts));
        prop_assert_eq!(tracker.units_used("free-1"), accepted);
        prop_assert!(tracker.units_used("free-1") <= quota_limit);
    }

    #[test]
    fn prop_multi_unit_reservations_are_all_or_nothing(
        quota_limit in 1u64..60,
        sizes in proptest::collection::vec(1u64..10, 1..20),
    ) {
        let tracker = tracker(quota_limit, None);
        let mut expected = 0u64;

        for units in &sizes {
            let admitted = tracker.try_consume("free-1", "u", *units);
            prop_assert_eq!(admitted, expected + units <= quota_limit);
            if admitted {
                expected += units;
            }
        }
        prop_assert_eq!(tracker.units_used("free-1"), expected);
    }

    #[test]
    fn prop_release_restores_capacity(
        quota_limit in 1u64..30,
        releases in 0usize..30,
    ) {
        let tracker = tracker(quota_limit, None);
        let reservations: Vec<_> = (0..quota_limit)
            .filter_map(|_| tracker.reserve("free-1", "u", 1))
            .collect();
        prop_assert_eq!(reservations.len() as u64, quota_limit);
        prop_assert!(!tracker.is_usable("free-1", "u"));

        let released = releases.min(reservations.len());
        for reservation in reservations.iter().take(released) {
            tracker.release(reservation);
        }
        prop_assert_eq!(tracker.units_used("free-1"), quota_limit - released as u64);
        prop_assert_eq!(tracker.is_usable("free-1", "u"), released > 0);
    }
}

#[test]
fn test_per_user_quota_caps_one_user_without_blocking_others() {
    let tracker = tracker(10, Some(3));

    let first_user = (0..5).filter(|_| tracker.try_consume("free-1", "alice", 1)).count();
    assert_eq!(first_user, 3);
    assert!(!tracker.is_usable("free-1", "alice"));

    assert!(tracker.is_usable("free-1", "bob"));
    assert!(tracker.try_consume("free-1", "bob", 1));
    assert_eq!(tracker.units_used("free-1"), 4);
    assert_eq!(tracker.user_units_used("alice", "free-1"), 3);
}

#[test]
fn test_unknown_provider_is_never_admitted() {
    let tracker = tracker(10, None);
    assert!(!tracker.try_consume("missing", "u", 1));
    assert!(!tracker.is_usable("missing", "u"));
}
