use pakmirror::config::{Config, ProxyMode};
use std::io::Write;
use std::time::Duration;

fn write_config(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

#[test]
fn test_defaults() {
    let config = Config::default();
    assert_eq!(config.port, 3142);
    assert_eq!(config.mode, ProxyMode::All);
    assert_eq!(config.cache.max_size_bytes, 10 * 1024 * 1024 * 1024);
    assert_eq!(config.cache.ttl, Duration::ZERO);
    assert_eq!(config.cache.cleanup_interval, Duration::from_secs(3600));
    assert_eq!(config.benchmark.tries, 3);
    assert_eq!(config.benchmark.result_ttl, Duration::from_secs(86400));
    assert_eq!(config.upstream.max_retries, 3);
    assert!(config.admin.enabled);
    assert!(config.mirrors.is_empty());
    assert!(config.validate().is_ok());
}

#[test]
fn test_from_file_with_overrides() {
    let file = write_config(
        r#"
port = 8080
mode = "debian"

[cache]
dir = "/var/cache/pakmirror"
max_size_bytes = 1048576
ttl = "7d"
cleanup_interval = "30m"

[benchmark]
tries = 5
probe_timeout = "2s"

[upstream]
retry_base_delay = "50ms"

[admin]
enabled = false
secret = "s3cret"

[mirrors]
debian = "cn:tsinghua"
"#,
    );
    let config = Config::from_file(file.path().to_str().unwrap()).unwrap();
    assert_eq!(config.port, 8080);
    assert_eq!(config.mode, ProxyMode::Debian);
    assert_eq!(config.cache.dir.to_str().unwrap(), "/var/cache/pakmirror");
    assert_eq!(config.cache.max_size_bytes, 1048576);
    assert_eq!(config.cache.ttl, Duration::from_secs(7 * 24 * 3600));
    assert_eq!(config.cache.cleanup_interval, Duration::from_secs(1800));
    assert_eq!(config.benchmark.tries, 5);
    assert_eq!(config.benchmark.probe_timeout, Duration::from_secs(2));
    // Unset fields keep their defaults.
    assert_eq!(config.benchmark.concurrency, 8);
    assert_eq!(config.upstream.retry_base_delay, Duration::from_millis(50));
    assert!(!config.admin.enabled);
    assert_eq!(config.admin.secret, "s3cret");
    assert_eq!(config.mirrors.get("debian").unwrap(), "cn:tsinghua");
}

#[test]
fn test_mode_includes() {
    assert!(ProxyMode::All.includes("ubuntu"));
    assert!(ProxyMode::All.includes("alpine"));
    assert!(ProxyMode::Ubuntu.includes("ubuntu"));
    assert!(!ProxyMode::Ubuntu.includes("debian"));
}

#[test]
fn test_validation_rejects_zero_tries() {
    let file = write_config("[benchmark]\ntries = 0\n");
    assert!(Config::from_file(file.path().to_str().unwrap()).is_err());
}

#[test]
fn test_missing_file_is_an_error() {
    assert!(Config::from_file("/nonexistent/pakmirror.toml").is_err());
}

#[test]
fn test_example_config_parses() {
    let config = Config::from_file("config.example.toml").unwrap();
    assert_eq!(config.port, 3142);
    assert_eq!(config.admin.port, 3143);
}
