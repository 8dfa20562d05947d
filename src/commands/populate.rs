//! `populate-test-data`: bulk-load deterministic key/value pairs.
//!
//! A single producer feeds key indices through a bounded channel to a pool
//! of workers; each worker accumulates a batch and issues it as one
//! pipelined round-trip against the clustered client, which routes every
//! SET to the owning primary. Progress prints once a second.

use std::sync::Arc;
use std::time::{Duration, Instant};

use fred::prelude::*;
use tokio::sync::{mpsc, Mutex};

use crate::client::address::parse_address;
use crate::client::node_client::{connect_clustered_pool, ValkeyError};
use crate::client::types::{ClusterInfo, ClusterState};
use crate::error::{AdminError, Result};
use crate::report::{format_count, format_duration};
use crate::settings::Settings;

/// Upper bound on the number of keys per invocation.
pub const MAX_KEYS: u64 = 10_000_000;

/// Worker count scaled to the load size.
pub fn worker_count(num_keys: u64) -> usize {
    match num_keys {
        0..=1_000 => 2,
        1_001..=10_000 => 4,
        10_001..=50_000 => 8,
        50_001..=100_000 => 12,
        100_001..=1_000_000 => 20,
        _ => 30,
    }
}

/// Batch size scaled to the load size.
pub fn batch_size(num_keys: u64) -> usize {
    match num_keys {
        0..=1_000 => 50,
        1_001..=10_000 => 100,
        10_001..=100_000 => 200,
        _ => 500,
    }
}

/// Deterministic test key for a 1-based index.
pub fn test_key(index: u64) -> String {
    format!("key:{:010}", index)
}

/// Deterministic test value for a 1-based index.
pub fn test_value(index: u64) -> String {
    format!("val:{:010}", index)
}

struct BatchResult {
    ok: u64,
    failed: u64,
}

pub async fn run(settings: &Settings, cluster_node: &str, num_keys: u64) -> Result<()> {
    settings.require_password()?;

    if num_keys == 0 {
        return Err(AdminError::Input(
            "--num-keys must be at least 1".to_string(),
        ));
    }
    if num_keys > MAX_KEYS {
        return Err(AdminError::Input(format!(
            "--num-keys may not exceed {}",
            MAX_KEYS
        )));
    }

    println!("populating test data via {}", cluster_node);
    println!("  keys: {}", format_count(num_keys as i64));

    let (host, port) = parse_address(cluster_node)?;
    let pool = connect_clustered_pool(&host, port, settings).await?;

    let check_client: Client = pool.next().clone();
    let info_raw: String = check_client
        .cluster_info()
        .await
        .map_err(ValkeyError::from)?;
    let info = ClusterInfo::parse(&info_raw).map_err(ValkeyError::from)?;
    if info.state != ClusterState::Ok {
        let _ = pool.quit().await;
        return Err(AdminError::Preflight(format!(
            "cluster state is '{}', expected 'ok'",
            info.state
        )));
    }

    let workers = worker_count(num_keys);
    let batch = batch_size(num_keys);
    println!("  workers: {}, batch size: {}", workers, batch);

    let (work_tx, work_rx) = mpsc::channel::<u64>(workers * 2);
    let work_rx = Arc::new(Mutex::new(work_rx));
    let (result_tx, mut result_rx) = mpsc::channel::<BatchResult>(workers);

    let producer = tokio::spawn(async move {
        for index in 1..=num_keys {
            if work_tx.send(index).await.is_err() {
                break;
            }
        }
    });

    let mut workers_handles = Vec::with_capacity(workers);
    for _ in 0..workers {
        let rx = Arc::clone(&work_rx);
        let tx = result_tx.clone();
        let client: Client = pool.next().clone();
        workers_handles.push(tokio::spawn(async move {
            let mut pending: Vec<u64> = Vec::with_capacity(batch);
            loop {
                let item = { rx.lock().await.recv().await };
                match item {
                    Some(index) => {
                        pending.push(index);
                        if pending.len() >= batch {
                            let result = flush_batch(&client, &pending).await;
                            pending.clear();
                            if tx.send(result).await.is_err() {
                                return;
                            }
                        }
                    }
                    None => {
                        if !pending.is_empty() {
                            let result = flush_batch(&client, &pending).await;
                            let _ = tx.send(result).await;
                        }
                        return;
                    }
                }
            }
        }));
    }
    // The result channel closes once every worker drops its sender.
    drop(result_tx);

    let started = Instant::now();
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    let mut completed = 0u64;
    let mut errors = 0u64;

    loop {
        tokio::select! {
            received = result_rx.recv() => match received {
                Some(result) => {
                    completed += result.ok;
                    errors += result.failed;
                }
                None => break,
            },
            _ = ticker.tick() => {
                let total = completed + errors;
                if total > 0 {
                    let elapsed = started.elapsed().as_secs_f64().max(0.001);
                    println!(
                        "  progress: {}/{} ({:.1}%) | {:.0} keys/sec | errors: {}",
                        format_count(total as i64),
                        format_count(num_keys as i64),
                        total as f64 / num_keys as f64 * 100.0,
                        total as f64 / elapsed,
                        errors
                    );
                }
            }
        }
    }

    let _ = producer.await;
    for handle in workers_handles {
        let _ = handle.await;
    }
    let _ = pool.quit().await;

    let elapsed = started.elapsed();
    let rate = completed as f64 / elapsed.as_secs_f64().max(0.001);

    println!();
    println!("load complete");
    println!("  total: {}", format_count(num_keys as i64));
    println!(
        "  succeeded: {} ({:.1}%)",
        format_count(completed as i64),
        completed as f64 / num_keys as f64 * 100.0
    );
    if errors > 0 {
        println!(
            "  failed: {} ({:.1}%)",
            format_count(errors as i64),
            errors as f64 / num_keys as f64 * 100.0
        );
        if errors as f64 / num_keys as f64 > 0.05 {
            println!("  high failure rate: inspect the cluster and the network");
        }
    }
    println!("  elapsed: {}", format_duration(elapsed));
    println!("  rate: {} keys/sec", format_count(rate as i64));
    println!("  performance: {}", classify_rate(rate));

    // Per-key errors are reported above but do not change the exit code.
    Ok(())
}

/// Issue one pipelined SET batch. A whole-pipeline failure fails every item
/// in the batch; otherwise items are settled individually.
async fn flush_batch(client: &Client, indices: &[u64]) -> BatchResult {
    let pipeline = client.pipeline();
    for &index in indices {
        let queued: std::result::Result<(), fred::error::Error> = pipeline
            .set(test_key(index), test_value(index), None, None, false)
            .await;
        if queued.is_err() {
            return BatchResult {
                ok: 0,
                failed: indices.len() as u64,
            };
        }
    }

    let results: Vec<std::result::Result<Value, fred::error::Error>> =
        pipeline.try_all().await;
    let ok = results.iter().filter(|r| r.is_ok()).count() as u64;
    BatchResult {
        ok,
        failed: indices.len() as u64 - ok,
    }
}

/// Coarse performance classification for the final summary.
fn classify_rate(rate: f64) -> &'static str {
    if rate > 10_000.0 {
        "excellent"
    } else if rate > 5_000.0 {
        "good"
    } else if rate > 1_000.0 {
        "fair (possible bottleneck)"
    } else {
        "slow (inspect the cluster)"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_value_generation_is_zero_padded() {
        assert_eq!(test_key(1), "key:0000000001");
        assert_eq!(test_value(1), "val:0000000001");
        assert_eq!(test_key(123_456), "key:0000123456");
        assert_eq!(test_key(MAX_KEYS), "key:0010000000");
    }

    #[test]
    fn key_generation_is_deterministic() {
        for index in [1u64, 42, 999_999] {
            assert_eq!(test_key(index), test_key(index));
            assert_eq!(test_value(index), test_value(index));
        }
    }

    #[test]
    fn worker_scaling_table() {
        assert_eq!(worker_count(1), 2);
        assert_eq!(worker_count(1_000), 2);
        assert_eq!(worker_count(1_001), 4);
        assert_eq!(worker_count(10_000), 4);
        assert_eq!(worker_count(50_000), 8);
        assert_eq!(worker_count(100_000), 12);
        assert_eq!(worker_count(1_000_000), 20);
        assert_eq!(worker_count(1_000_001), 30);
    }

    #[test]
    fn batch_scaling_table() {
        assert_eq!(batch_size(1_000), 50);
        assert_eq!(batch_size(10_000), 100);
        assert_eq!(batch_size(100_000), 200);
        assert_eq!(batch_size(100_001), 500);
    }

    #[tokio::test]
    async fn rejects_out_of_range_key_counts() {
        let settings = Settings {
            password: Some("pw".to_string()),
            ..Default::default()
        };
        // Both bounds are rejected before any connection is attempted.
        let zero = run(&settings, "127.0.0.1:7001", 0).await;
        assert!(matches!(zero, Err(AdminError::Input(_))));
        let too_many = run(&settings, "127.0.0.1:7001", MAX_KEYS + 1).await;
        assert!(matches!(too_many, Err(AdminError::Input(_))));
    }

    #[test]
    fn rate_classification_bands() {
        assert_eq!(classify_rate(20_000.0), "excellent");
        assert_eq!(classify_rate(7_000.0), "good");
        assert_eq!(classify_rate(2_000.0), "fair (possible bottleneck)");
        assert_eq!(classify_rate(500.0), "slow (inspect the cluster)");
    }
}
