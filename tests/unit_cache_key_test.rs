use pakmirror::core::cache::CacheKey;
use url::Url;

#[test]
fn test_fingerprint_is_fixed_length_hex() {
    let url = Url::parse("http://archive.ubuntu.com/ubuntu/dists/noble/InRelease").unwrap();
    let key = CacheKey::new("GET", &url, &[]);
    assert_eq!(key.fingerprint().len(), 64);
    assert!(key.fingerprint().chars().all(|c| c.is_ascii_hexdigit()));
}

#[test]
fn test_method_is_uppercased() {
    let url = Url::parse("http://example.com/x").unwrap();
    let a = CacheKey::new("get", &url, &[]);
    let b = CacheKey::new("GET", &url, &[]);
    assert_eq!(a, b);
    assert!(a.printable().starts_with("GET "));
}

#[test]
fn test_query_parameters_are_sorted() {
    let a = CacheKey::new(
        "GET",
        &Url::parse("http://example.com/x?b=2&a=1").unwrap(),
        &[],
    );
    let b = CacheKey::new(
        "GET",
        &Url::parse("http://example.com/x?a=1&b=2").unwrap(),
        &[],
    );
    assert_eq!(a.fingerprint(), b.fingerprint());
}

#[test]
fn test_different_urls_produce_different_keys() {
    let a = CacheKey::new(
        "GET",
        &Url::parse("http://example.com/pool/a.deb").unwrap(),
        &[],
    );
    let b = CacheKey::new(
        "GET",
        &Url::parse("http://example.com/pool/b.deb").unwrap(),
        &[],
    );
    assert_ne!(a.fingerprint(), b.fingerprint());
}

#[test]
fn test_vary_values_are_part_of_the_key() {
    let url = Url::parse("http://example.com/x").unwrap();
    let plain = CacheKey::new("GET", &url, &[]);
    let varied = CacheKey::new(
        "GET",
        &url,
        &[("Accept-Encoding".to_string(), "gzip".to_string())],
    );
    assert_ne!(plain.fingerprint(), varied.fingerprint());
    assert!(varied.printable().contains("accept-encoding=gzip"));
}

#[test]
fn test_non_default_port_is_preserved() {
    let a = CacheKey::new("GET", &Url::parse("http://example.com:8080/x").unwrap(), &[]);
    let b = CacheKey::new("GET", &Url::parse("http://example.com/x").unwrap(), &[]);
    assert_ne!(a.fingerprint(), b.fingerprint());
}
