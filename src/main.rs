mod client;
mod config;
mod error;
mod latency;
mod loader;
mod outbound;
mod report;
mod scheduler;
#[cfg(test)]
mod testutil;
mod throughput;
mod traits;
mod types;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::warn;
use tracing_subscriber::EnvFilter;

use config::TestConfig;
use loader::ProxyLoader;
use outbound::NativeEngine;
use scheduler::SpeedTester;
use traits::ProxyEngine;
use types::SpeedResult;

#[derive(Parser)]
#[command(name = "proxy-speedtest")]
#[command(about = "Measure latency and throughput of clash-style outbound proxies", version)]
struct Cli {
    /// Config file path, also supports http(s) urls; comma-separate multiple sources
    #[arg(short = 'c', long = "config")]
    config: Option<String>,

    /// Filter proxies by name, using a regular expression
    #[arg(short = 'f', long = "filter", default_value = ".+")]
    filter: String,

    /// Measurement server url (plain http, see speedtest-server)
    #[arg(long, default_value = "http://127.0.0.1:8080")]
    server_url: String,

    /// Download size per proxy, in bytes
    #[arg(long, default_value_t = 10 * 1024 * 1024)]
    download_size: u64,

    /// Upload size per proxy, in bytes
    #[arg(long, default_value_t = 10 * 1024 * 1024)]
    upload_size: u64,

    /// Per-probe / per-chunk timeout, in seconds
    #[arg(long, default_value_t = 5)]
    timeout: u64,

    /// Concurrent transfer chunks per proxy
    #[arg(long, default_value_t = 4)]
    concurrent: usize,

    /// How many proxies to measure in parallel
    #[arg(long, default_value_t = 10)]
    max_jobs: usize,

    /// Write proxies that pass the thresholds to this yaml file
    #[arg(short = 'o', long = "output")]
    output: Option<PathBuf>,

    /// Drop proxies with more latency than this from the output, in ms (0 disables)
    #[arg(long, default_value_t = 800)]
    max_latency: u64,

    /// Drop proxies slower than this from the output, in MB/s (0 disables)
    #[arg(long, default_value_t = 5.0)]
    min_speed: f64,

    /// Print the full result list as json instead of a table
    #[arg(long)]
    json: bool,

    /// Batch mode: toml file with [[sources]] name/url entries
    #[arg(short = 's', long = "sources")]
    sources: Option<PathBuf>,
}

impl Cli {
    fn test_config(&self, config_paths: String, name_prefix: String) -> TestConfig {
        TestConfig {
            config_paths,
            filter_regex: self.filter.clone(),
            server_url: self.server_url.clone(),
            download_size: self.download_size,
            upload_size: self.upload_size,
            timeout: Duration::from_secs(self.timeout),
            concurrent: self.concurrent,
            max_jobs: self.max_jobs,
            name_prefix,
        }
        .normalized()
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    if cli.config.is_none() && cli.sources.is_none() {
        bail!("please specify either a config file (-c) or a sources file (-s)");
    }

    let engine: Arc<dyn ProxyEngine> = Arc::new(NativeEngine::new());
    let mut all_results: Vec<SpeedResult> = Vec::new();

    if let Some(sources_path) = &cli.sources {
        // 批量模式: 逐个命名源测试, 结果汇总到一张表
        for source in config::load_sources(sources_path)? {
            println!("\nTesting source: {}", source.name);
            let cfg = cli.test_config(source.url.clone(), format!("{}-", source.name));
            if let Err(err) = run_source(cfg, engine.clone(), &mut all_results).await {
                warn!("load proxies failed for {}: {err}", source.name);
            }
        }
    } else {
        let cfg = cli.test_config(cli.config.clone().unwrap_or_default(), String::new());
        run_source(cfg, engine.clone(), &mut all_results).await?;
    }

    report::sort_results(&mut all_results);

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&all_results)?);
    } else {
        report::print_results(&all_results);
    }

    if let Some(output) = &cli.output {
        let kept = report::filter_results(
            &all_results,
            Duration::from_millis(cli.max_latency),
            cli.min_speed,
        );
        report::save_config(output, &kept)?;
        println!("\nsaved {} proxies to {}", kept.len(), output.display());
    }

    Ok(())
}

/// Load one source's catalog and measure it, appending to `results`.
async fn run_source(
    cfg: TestConfig,
    engine: Arc<dyn ProxyEngine>,
    results: &mut Vec<SpeedResult>,
) -> Result<()> {
    let cfg = Arc::new(cfg);
    let proxies = ProxyLoader::new(cfg.clone(), engine).load().await?;
    if proxies.is_empty() {
        println!("no proxies matched");
        return Ok(());
    }

    let bar = ProgressBar::new(proxies.len() as u64);
    bar.set_style(
        ProgressStyle::with_template("[{bar:40.cyan/blue}] {pos}/{len} {msg}")?
            .progress_chars("|| "),
    );
    bar.set_message("testing...");

    let tester = SpeedTester::new(cfg);
    tester
        .test_proxies(proxies, |result| {
            bar.inc(1);
            bar.set_message(result.proxy_name.clone());
            results.push(result);
        })
        .await;

    bar.finish_with_message("done");
    Ok(())
}
