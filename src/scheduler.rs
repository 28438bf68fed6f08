use std::sync::Arc;

use tokio::sync::{mpsc, Semaphore};
use tokio::time::timeout;
use tracing::warn;

use crate::client::ClientFactory;
use crate::config::TestConfig;
use crate::types::{ProxyMap, SpeedResult, TestProxy};
use crate::{latency, throughput};

/// SpeedTester: 受限并发的节点测速调度器
///
/// At most `max_jobs` proxies are in flight at once; each job's own chunk
/// fan-out is bounded separately by `concurrent`. Results stream out in
/// completion order, one per scheduled proxy, no matter how a job ends.
pub struct SpeedTester {
    config: Arc<TestConfig>,
    clients: Arc<ClientFactory>,
}

impl SpeedTester {
    pub fn new(config: Arc<TestConfig>) -> Self {
        let clients = Arc::new(ClientFactory::new(config.clone()));
        Self { config, clients }
    }

    /// Run the full measurement job for every proxy, invoking `on_result`
    /// as each finishes (unordered).
    pub async fn test_proxies<F>(&self, proxies: ProxyMap, mut on_result: F)
    where
        F: FnMut(SpeedResult),
    {
        let slots = Arc::new(Semaphore::new(self.config.max_jobs));
        let (tx, mut rx) = mpsc::unbounded_channel();

        for (name, proxy) in proxies {
            let slots = slots.clone();
            let tx = tx.clone();
            let config = self.config.clone();
            let clients = self.clients.clone();

            tokio::spawn(async move {
                let Ok(_slot) = slots.acquire_owned().await else {
                    return;
                };
                // The job runs in its own task so a panic is contained at
                // this boundary and still yields a result for the proxy.
                let fallback = SpeedResult::new(&name, &proxy);
                let job = tokio::spawn(run_job(name.clone(), proxy, config, clients));
                let result = match job.await {
                    Ok(result) => result,
                    Err(err) => {
                        warn!("measurement job for {name} died: {err}");
                        fallback
                    }
                };
                let _ = tx.send(result);
            });
        }
        drop(tx);

        while let Some(result) = rx.recv().await {
            on_result(result);
        }
    }
}

/// One proxy's job: latency first; only a reachable proxy moves on to the
/// download and upload phases, which run concurrently with each other.
async fn run_job(
    name: String,
    proxy: TestProxy,
    config: Arc<TestConfig>,
    clients: Arc<ClientFactory>,
) -> SpeedResult {
    let mut result = SpeedResult::new(&name, &proxy);
    let client = clients.get(&name, &proxy.handle);

    match timeout(
        config.timeout,
        latency::probe(client.clone(), &config.server_url, config.timeout),
    )
    .await
    {
        Ok(stats) => {
            result.latency = stats.average;
            result.jitter = stats.jitter;
            result.packet_loss = stats.packet_loss;
        }
        Err(_) => {
            // Probe batch never finished inside the deadline: count the
            // proxy as unreachable and do not waste transfer time on it.
            result.packet_loss = 100.0;
            return result;
        }
    }
    if result.packet_loss >= 100.0 {
        return result;
    }

    let download = throughput::measure_download(
        &client,
        &config.server_url,
        config.download_size,
        config.concurrent,
        config.timeout,
    );
    let upload = throughput::measure_upload(
        &client,
        &config.server_url,
        config.upload_size,
        config.concurrent,
        config.timeout,
    );
    let (down, up) = tokio::join!(download, upload);

    if down.bytes > 0 {
        result.download_size = down.bytes as f64;
        result.download_time = down.duration;
        result.download_speed = down.speed();
    }
    if up.bytes > 0 {
        result.upload_size = up.bytes as f64;
        result.upload_time = up.duration;
        result.upload_speed = up.speed();
    }
    result
}
