use chrono::{TimeDelta, TimeZone, Utc};

use hackaplan_core::rate_limit::{Admission, RateLimitRule, RateLimiter};
use hackaplan_core::traits::AdmissionLedger;

use crate::integration::common::setup_test_db;

#[tokio::test]
async fn admissions_are_counted_per_hour_bucket() {
    let repo = setup_test_db().await.rate_limit_repo();
    let morning = Utc.with_ymd_and_hms(2025, 3, 1, 9, 5, 0).unwrap();

    repo.record("abc", morning).await.unwrap();
    repo.record("abc", morning + TimeDelta::minutes(30)).await.unwrap();
    repo.record("abc", morning + TimeDelta::hours(2)).await.unwrap();
    repo.record("other", morning).await.unwrap();

    assert_eq!(repo.count_since("abc", morning).await.unwrap(), 3);
    assert_eq!(
        repo.count_since("abc", morning + TimeDelta::hours(1)).await.unwrap(),
        1
    );
    assert_eq!(repo.count_since("nobody", morning).await.unwrap(), 0);
}

#[tokio::test]
async fn prune_drops_stale_buckets_only() {
    let repo = setup_test_db().await.rate_limit_repo();
    let old = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
    let fresh = Utc.with_ymd_and_hms(2025, 1, 3, 0, 0, 0).unwrap();

    repo.record("abc", old).await.unwrap();
    repo.record("def", old).await.unwrap();
    repo.record("abc", fresh).await.unwrap();

    let removed = repo.prune(fresh - TimeDelta::days(1)).await.unwrap();
    assert_eq!(removed, 2);
    assert_eq!(repo.count_since("abc", old).await.unwrap(), 1);
}

#[tokio::test]
async fn ledger_reports_bucket_ends() {
    let repo = setup_test_db().await.rate_limit_repo();
    let morning = Utc.with_ymd_and_hms(2025, 3, 1, 9, 5, 0).unwrap();

    repo.record("abc", morning).await.unwrap();
    repo.record("abc", morning + TimeDelta::minutes(20)).await.unwrap();
    repo.record("abc", morning + TimeDelta::hours(3)).await.unwrap();

    let tallies = repo
        .admissions_since("abc", morning + TimeDelta::minutes(40))
        .await
        .unwrap();
    assert_eq!(
        tallies,
        vec![
            (Utc.with_ymd_and_hms(2025, 3, 1, 10, 0, 0).unwrap(), 2),
            (Utc.with_ymd_and_hms(2025, 3, 1, 13, 0, 0).unwrap(), 1),
        ]
    );
}

#[tokio::test]
async fn limits_hold_across_a_restart() {
    let db = setup_test_db().await;
    let repo = db.rate_limit_repo();
    let identity = RateLimiter::fingerprint("198.51.100.20", "salt");

    let before = RateLimiter::new(vec![RateLimitRule::per_hour(3)]);
    for _ in 0..3 {
        let admission = before.admit_recorded(&identity, &repo).await.unwrap();
        assert!(admission.is_allowed());
    }

    let after = RateLimiter::new(vec![RateLimitRule::per_hour(3)]);
    let admission = after.admit_recorded(&identity, &db.rate_limit_repo()).await.unwrap();
    assert!(matches!(admission, Admission::Denied { .. }), "{admission:?}");

    let stored = repo
        .count_since(&identity, Utc::now() - TimeDelta::hours(1))
        .await
        .unwrap();
    assert_eq!(stored, 3);
}
