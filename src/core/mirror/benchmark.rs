// src/core/mirror/benchmark.rs

//! The mirror latency benchmark.
//!
//! Every candidate is probed with a GET of its benchmark file; the duration
//! runs from request send to full body drain, so slow-but-responsive
//! mirrors do not win on time-to-first-byte alone. A candidate is probed
//! `tries` times and ranked by the mean. Probes run in parallel under a
//! semaphore, the whole round is bounded by an overall deadline, and the
//! first up-to-`take` successful candidates are what get ranked.

use crate::config::BenchmarkConfig;
use crate::core::metrics;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};
use url::Url;

/// One candidate's benchmark outcome.
#[derive(Debug, Clone)]
pub struct Measurement {
    pub url: Url,
    pub mean: Duration,
    /// Position in the candidate list, used as the ranking tie-break.
    pub order: usize,
}

/// Probes every candidate and returns the ranked successful measurements,
/// fastest first. An empty result means no candidate answered in time.
pub async fn rank_candidates(
    client: &reqwest::Client,
    candidates: &[Url],
    probe_path: &str,
    config: &BenchmarkConfig,
) -> Vec<Measurement> {
    let semaphore = Arc::new(Semaphore::new(config.concurrency));
    let mut tasks = JoinSet::new();

    for (order, candidate) in candidates.iter().cloned().enumerate() {
        let Ok(probe_url) = candidate.join(probe_path) else {
            warn!("Skipping candidate with unjoinable probe path: {candidate}");
            continue;
        };
        let client = client.clone();
        let semaphore = Arc::clone(&semaphore);
        let tries = config.tries;
        tasks.spawn(async move {
            let _permit = semaphore.acquire_owned().await.ok()?;
            let mean = probe_mean(&client, &probe_url, tries).await?;
            Some(Measurement {
                url: candidate,
                mean,
                order,
            })
        });
    }

    let mut measurements = Vec::new();
    let deadline = tokio::time::sleep(config.overall_timeout);
    tokio::pin!(deadline);

    // Collect the first `take` successes, or whatever arrived by the deadline.
    loop {
        tokio::select! {
            joined = tasks.join_next() => {
                match joined {
                    Some(Ok(Some(m))) => {
                        debug!("Benchmarked {} at {:?} mean.", m.url, m.mean);
                        measurements.push(m);
                        if measurements.len() >= config.take {
                            break;
                        }
                    }
                    Some(_) => {}
                    None => break,
                }
            }
            _ = &mut deadline => {
                warn!("Benchmark round hit its overall deadline with {} measurements.", measurements.len());
                break;
            }
        }
    }
    tasks.abort_all();

    measurements.sort_by(|a, b| a.mean.cmp(&b.mean).then(a.order.cmp(&b.order)));
    measurements
}

/// Probes one URL `tries` times and returns the mean duration. Any non-2xx
/// response or transport error invalidates the candidate for the round.
async fn probe_mean(client: &reqwest::Client, probe_url: &Url, tries: u32) -> Option<Duration> {
    let mut total = Duration::ZERO;
    for _ in 0..tries {
        let started = Instant::now();
        let response = client.get(probe_url.clone()).send().await.ok()?;
        if !response.status().is_success() {
            debug!(
                "Candidate probe {} answered status {}; dropping for this round.",
                probe_url,
                response.status()
            );
            return None;
        }
        // Drain the body: the measurement covers the full transfer.
        response.bytes().await.ok()?;
        let elapsed = started.elapsed();
        metrics::BENCHMARK_PROBE_SECONDS.observe(elapsed.as_secs_f64());
        total += elapsed;
    }
    Some(total / tries)
}
