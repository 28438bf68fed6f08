use std::sync::Arc;
use std::time::{Duration, Instant};

use http_body_util::BodyExt;
use hyper::{Request, StatusCode, Uri};
use tokio::task::JoinSet;
use tracing::debug;

use crate::client::{empty_body, HttpClient};

/// 每个节点的探测次数
const PROBE_COUNT: u32 = 6;
/// 相邻两次探测之间的间隔, 避免瞬时突发
const PROBE_INTERVAL: Duration = Duration::from_millis(50);

/// 一轮延迟探测的统计结果
#[derive(Debug, Clone, Copy, Default)]
pub struct LatencyStats {
    pub average: Duration,
    pub jitter: Duration,
    pub packet_loss: f64,
}

/// Fire `PROBE_COUNT` zero-byte requests through the proxy's client,
/// staggered by `PROBE_INTERVAL` but awaited concurrently.
pub async fn probe(client: Arc<HttpClient>, server_url: &str, timeout: Duration) -> LatencyStats {
    let url = format!("{}/__down?bytes=0", server_url);

    let mut probes = JoinSet::new();
    for i in 0..PROBE_COUNT {
        let client = client.clone();
        let url = url.clone();
        probes.spawn(async move { probe_once(&client, &url, timeout).await });
        if i + 1 < PROBE_COUNT {
            tokio::time::sleep(PROBE_INTERVAL).await;
        }
    }

    let mut samples = Vec::with_capacity(PROBE_COUNT as usize);
    let mut failed = 0u32;
    while let Some(joined) = probes.join_next().await {
        match joined {
            Ok(Some(rtt)) => samples.push(rtt),
            _ => failed += 1,
        }
    }
    debug!(ok = samples.len(), failed, "latency probes finished");

    compute_stats(&samples, failed)
}

async fn probe_once(client: &HttpClient, url: &str, deadline: Duration) -> Option<Duration> {
    let uri: Uri = url.parse().ok()?;
    let req = Request::get(uri).body(empty_body()).ok()?;

    let start = Instant::now();
    let resp = tokio::time::timeout(deadline, client.request(req))
        .await
        .ok()?
        .ok()?;
    if resp.status() != StatusCode::OK {
        return None;
    }
    // Zero-byte body; drain it so the connection goes back to the pool.
    resp.into_body().collect().await.ok()?;
    Some(start.elapsed())
}

/// `packet_loss` counts every probe that never produced a sample; `jitter`
/// is the population standard deviation of the successful round trips and
/// stays zero with fewer than two samples.
fn compute_stats(samples: &[Duration], failed: u32) -> LatencyStats {
    let total = samples.len() as u32 + failed;
    let mut stats = LatencyStats {
        packet_loss: f64::from(failed) / f64::from(total.max(1)) * 100.0,
        ..Default::default()
    };
    if samples.is_empty() {
        return stats;
    }

    let sum: Duration = samples.iter().sum();
    stats.average = sum / samples.len() as u32;

    if samples.len() > 1 {
        let avg = stats.average.as_secs_f64();
        let variance = samples
            .iter()
            .map(|s| {
                let diff = s.as_secs_f64() - avg;
                diff * diff
            })
            .sum::<f64>()
            / samples.len() as f64;
        stats.jitter = Duration::from_secs_f64(variance.sqrt());
    }
    stats
}
