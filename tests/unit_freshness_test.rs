use chrono::{Duration as ChronoDuration, Utc};
use pakmirror::core::cache::Freshness;
use pakmirror::core::cache::HeaderRecord;
use pakmirror::core::cache::freshness;

fn record_with_headers(headers: Vec<(&str, &str)>, age_secs: i64) -> HeaderRecord {
    let response_time = Utc::now() - ChronoDuration::seconds(age_secs);
    HeaderRecord {
        status: 200,
        reason: "OK".to_string(),
        headers: headers
            .into_iter()
            .map(|(n, v)| (n.to_string(), v.to_string()))
            .collect(),
        request_time: response_time,
        response_time,
        access_time: response_time,
        body_size: 0,
    }
}

#[test]
fn test_fresh_within_max_age() {
    let record = record_with_headers(vec![("Cache-Control", "max-age=3600")], 10);
    assert_eq!(freshness::evaluate(&record, Utc::now()), Freshness::Fresh);
}

#[test]
fn test_stale_past_max_age() {
    let record = record_with_headers(vec![("Cache-Control", "max-age=60")], 120);
    assert_eq!(freshness::evaluate(&record, Utc::now()), Freshness::Stale);
}

#[test]
fn test_s_maxage_takes_precedence() {
    let record = record_with_headers(vec![("Cache-Control", "max-age=3600, s-maxage=1")], 10);
    assert_eq!(freshness::evaluate(&record, Utc::now()), Freshness::Stale);
}

#[test]
fn test_age_header_counts_against_lifetime() {
    let record = record_with_headers(
        vec![("Cache-Control", "max-age=100"), ("Age", "95")],
        10,
    );
    // 10s elapsed + 95s initial age = 105s > 100s.
    assert_eq!(freshness::evaluate(&record, Utc::now()), Freshness::Stale);
}

#[test]
fn test_expires_fallback() {
    let future = (Utc::now() + ChronoDuration::hours(1)).to_rfc2822();
    let record = record_with_headers(vec![("Expires", &future)], 10);
    assert_eq!(freshness::evaluate(&record, Utc::now()), Freshness::Fresh);

    let past = (Utc::now() - ChronoDuration::hours(1)).to_rfc2822();
    let record = record_with_headers(vec![("Expires", &past)], 10);
    assert_eq!(freshness::evaluate(&record, Utc::now()), Freshness::Stale);
}

#[test]
fn test_no_freshness_information_means_stale() {
    let record = record_with_headers(vec![("Content-Type", "text/plain")], 0);
    assert_eq!(freshness::evaluate(&record, Utc::now()), Freshness::Stale);
}

#[test]
fn test_no_cache_always_revalidates() {
    let record = record_with_headers(vec![("Cache-Control", "no-cache, max-age=3600")], 1);
    assert_eq!(
        freshness::evaluate(&record, Utc::now()),
        Freshness::MustRevalidate
    );
}

#[test]
fn test_must_revalidate_applies_once_stale() {
    let record = record_with_headers(vec![("Cache-Control", "max-age=60, must-revalidate")], 10);
    assert_eq!(freshness::evaluate(&record, Utc::now()), Freshness::Fresh);

    let record = record_with_headers(vec![("Cache-Control", "max-age=60, must-revalidate")], 120);
    assert_eq!(
        freshness::evaluate(&record, Utc::now()),
        Freshness::MustRevalidate
    );
}

#[test]
fn test_stale_if_error_window() {
    let record = record_with_headers(
        vec![("Cache-Control", "max-age=60, stale-if-error=120")],
        100,
    );
    assert!(freshness::stale_if_error_allows(&record, Utc::now()));

    let record = record_with_headers(
        vec![("Cache-Control", "max-age=60, stale-if-error=120")],
        300,
    );
    assert!(!freshness::stale_if_error_allows(&record, Utc::now()));
}

#[test]
fn test_stale_while_revalidate_window() {
    let record = record_with_headers(
        vec![("Cache-Control", "max-age=60, stale-while-revalidate=60")],
        90,
    );
    assert!(freshness::swr_allows(&record, Utc::now()));

    let record = record_with_headers(
        vec![("Cache-Control", "max-age=60, stale-while-revalidate=60")],
        180,
    );
    assert!(!freshness::swr_allows(&record, Utc::now()));
}
