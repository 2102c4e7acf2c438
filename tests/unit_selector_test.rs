use axum::Router;
use axum::routing::get;
use pakmirror::config::BenchmarkConfig;
use pakmirror::core::mirror::geolist::parse_mirror_list;
use pakmirror::core::mirror::{MirrorBindings, MirrorSelector};
use pakmirror::core::registry::{Distribution, DistroKind, Mirror, Registry};
use regex::Regex;
use std::collections::HashMap;
use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

async fn spawn_mirror(delay: Duration) -> SocketAddr {
    let app = Router::new().route(
        "/probe",
        get(move || async move {
            tokio::time::sleep(delay).await;
            "probe body"
        }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(axum::serve(listener, app).into_future());
    addr
}

fn test_distribution(mirrors: Vec<Url>) -> Distribution {
    Distribution {
        ident: "ubuntu",
        kind: DistroKind::Ubuntu,
        match_pattern: Regex::new(r"^/ubuntu/").unwrap(),
        extract_pattern: Regex::new(r"^/ubuntu/(.*)$").unwrap(),
        benchmark_probe: "probe".to_string(),
        geo_mirror_list: None,
        mirrors: mirrors
            .into_iter()
            .map(|url| Mirror {
                url,
                alias: None,
                official: true,
            })
            .collect(),
        rules: Vec::new(),
    }
}

fn bench_config() -> BenchmarkConfig {
    BenchmarkConfig {
        tries: 2,
        concurrency: 4,
        take: 2,
        probe_timeout: Duration::from_secs(2),
        overall_timeout: Duration::from_secs(5),
        result_ttl: Duration::from_secs(3600),
    }
}

fn selector_for(
    dist: Distribution,
    overrides: HashMap<DistroKind, Url>,
) -> (Arc<MirrorSelector>, Arc<MirrorBindings>) {
    let registry = Arc::new(Registry::from_distributions(vec![dist]));
    let bindings = Arc::new(MirrorBindings::new());
    let selector = Arc::new(
        MirrorSelector::new(registry, Arc::clone(&bindings), bench_config(), overrides).unwrap(),
    );
    let bindings = selector.bindings();
    (selector, bindings)
}

#[test]
fn test_parse_mirror_list_drops_garbage() {
    let body = "\
http://mirror.one.example/ubuntu
# a comment
not a url
ftp://old.example/ubuntu/
https://mirror.two.example/ubuntu/

";
    let mirrors = parse_mirror_list(body);
    assert_eq!(mirrors.len(), 2);
    // Trailing slashes are normalized so the URLs can serve as join bases.
    assert_eq!(mirrors[0].as_str(), "http://mirror.one.example/ubuntu/");
    assert_eq!(mirrors[1].as_str(), "https://mirror.two.example/ubuntu/");
}

#[tokio::test]
async fn test_select_ranks_the_fastest_mirror_first() {
    let slow = spawn_mirror(Duration::from_millis(120)).await;
    let fast = spawn_mirror(Duration::from_millis(5)).await;

    let slow_url = Url::parse(&format!("http://{slow}/")).unwrap();
    let fast_url = Url::parse(&format!("http://{fast}/")).unwrap();
    let dist = test_distribution(vec![slow_url, fast_url.clone()]);
    let (selector, _) = selector_for(dist, HashMap::new());

    let dist_ref = selector_distribution(&selector);
    let winner = selector.select(dist_ref).await.unwrap();
    assert_eq!(winner, fast_url);
}

#[tokio::test]
async fn test_select_async_binds_default_immediately_then_swaps() {
    let slow = spawn_mirror(Duration::from_millis(100)).await;
    let fast = spawn_mirror(Duration::from_millis(5)).await;

    let slow_url = Url::parse(&format!("http://{slow}/")).unwrap();
    let fast_url = Url::parse(&format!("http://{fast}/")).unwrap();
    let dist = test_distribution(vec![slow_url.clone(), fast_url.clone()]);
    let (selector, bindings) = selector_for(dist, HashMap::new());

    selector.select_async_into_bindings(DistroKind::Ubuntu);

    // The binding is published synchronously: no request observes an absent
    // binding, and early requests go to the first candidate.
    let initial = bindings.get(DistroKind::Ubuntu).unwrap();
    assert_eq!(initial, slow_url);

    // The benchmark completes and swaps in the fastest mirror.
    tokio::time::sleep(Duration::from_millis(1500)).await;
    let rebound = bindings.get(DistroKind::Ubuntu).unwrap();
    assert_eq!(rebound, fast_url);
}

#[tokio::test]
async fn test_override_pins_binding_and_skips_benchmark() {
    let fast = spawn_mirror(Duration::from_millis(5)).await;
    let fast_url = Url::parse(&format!("http://{fast}/")).unwrap();
    let pinned = Url::parse("http://pinned.example/ubuntu/").unwrap();

    let dist = test_distribution(vec![fast_url]);
    let mut overrides = HashMap::new();
    overrides.insert(DistroKind::Ubuntu, pinned.clone());
    let (selector, bindings) = selector_for(dist, overrides);

    selector.select_async_into_bindings(DistroKind::Ubuntu);
    assert_eq!(bindings.get(DistroKind::Ubuntu).unwrap(), pinned);

    tokio::time::sleep(Duration::from_millis(300)).await;
    // Still pinned: no benchmark replaced it.
    assert_eq!(bindings.get(DistroKind::Ubuntu).unwrap(), pinned);
}

#[tokio::test]
async fn test_refresh_recomputes_bindings() {
    let fast = spawn_mirror(Duration::from_millis(5)).await;
    let fast_url = Url::parse(&format!("http://{fast}/")).unwrap();
    let dist = test_distribution(vec![fast_url.clone()]);
    let (selector, bindings) = selector_for(dist, HashMap::new());

    selector.refresh(Some(DistroKind::Ubuntu)).await;
    assert_eq!(bindings.get(DistroKind::Ubuntu).unwrap(), fast_url);
}

#[tokio::test]
async fn test_unreachable_candidates_are_invalidated() {
    // Nothing listens on port 1; selection must fail rather than pick it.
    let dead = Url::parse("http://127.0.0.1:1/").unwrap();
    let dist = test_distribution(vec![dead]);
    let (selector, _) = selector_for(dist, HashMap::new());

    let dist_ref = selector_distribution(&selector);
    assert!(selector.select(dist_ref).await.is_err());
}

/// The selector's registry owns the distribution; borrow it back for
/// blocking-select tests.
fn selector_distribution(selector: &Arc<MirrorSelector>) -> &Distribution {
    selector.registry().get(DistroKind::Ubuntu).unwrap()
}
