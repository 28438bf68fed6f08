use std::cmp::Ordering;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::error::Result;
use crate::types::{RawConfig, SpeedResult};

const COLOR_RED: &str = "\x1b[31m";
const COLOR_GREEN: &str = "\x1b[32m";
const COLOR_YELLOW: &str = "\x1b[33m";
const COLOR_RESET: &str = "\x1b[0m";

const FAST_LATENCY: Duration = Duration::from_millis(800);
const SLOW_LATENCY: Duration = Duration::from_millis(1500);

/// 按下载速度从高到低排序
pub fn sort_results(results: &mut [SpeedResult]) {
    results.sort_by(|a, b| {
        b.download_speed
            .partial_cmp(&a.download_speed)
            .unwrap_or(Ordering::Equal)
    });
}

/// Keep only results inside the export thresholds: latency at most
/// `max_latency` (a zero latency means unreachable and is dropped too when
/// the threshold is active) and download speed at least `min_speed_mb` MB/s.
pub fn filter_results(
    results: &[SpeedResult],
    max_latency: Duration,
    min_speed_mb: f64,
) -> Vec<SpeedResult> {
    results
        .iter()
        .filter(|r| {
            if !max_latency.is_zero() && (r.latency.is_zero() || r.latency > max_latency) {
                return false;
            }
            if min_speed_mb > 0.0 && r.download_speed / (1024.0 * 1024.0) < min_speed_mb {
                return false;
            }
            true
        })
        .cloned()
        .collect()
}

/// Serialize the kept proxies' original descriptors back into a document
/// the loader can re-read. Provider-expanded results carry no descriptor
/// and are skipped.
pub fn save_config(path: &Path, results: &[SpeedResult]) -> Result<()> {
    let proxies = results
        .iter()
        .filter_map(|r| r.proxy_config.clone())
        .collect();
    let raw = RawConfig {
        proxies,
        ..RawConfig::default()
    };
    fs::write(path, serde_yaml::to_string(&raw)?)?;
    Ok(())
}

pub fn print_results(results: &[SpeedResult]) {
    println!();
    println!(
        "{:<5} {:<34} {:<12} {:<10} {:<10} {:<8} {:<12} {:<12}",
        "RANK", "NAME", "TYPE", "LATENCY", "JITTER", "LOSS", "DOWNLOAD", "UPLOAD"
    );
    println!("{}", "-".repeat(108));

    for (i, result) in results.iter().enumerate() {
        println!(
            "{:<5} {:<34} {:<12} {} {} {:<8} {} {:<12}",
            format!("{}.", i + 1),
            truncate_name(&result.proxy_name, 32),
            result.proxy_type.to_string(),
            colorize_latency(result),
            format!("{:<10}", result.format_jitter()),
            result.format_packet_loss(),
            colorize_speed(result.download_speed, result.format_download_speed()),
            result.format_upload_speed(),
        );
    }
    println!();
}

/// Pad first, then colour: escape sequences must stay outside the padding
/// or the columns drift.
fn colorize_latency(result: &SpeedResult) -> String {
    let padded = format!("{:<10}", result.format_latency());
    let color = if result.latency.is_zero() {
        COLOR_RED
    } else if result.latency < FAST_LATENCY {
        COLOR_GREEN
    } else if result.latency < SLOW_LATENCY {
        COLOR_YELLOW
    } else {
        COLOR_RED
    };
    format!("{color}{padded}{COLOR_RESET}")
}

fn colorize_speed(bytes_per_second: f64, formatted: String) -> String {
    let padded = format!("{formatted:<12}");
    let mb = bytes_per_second / (1024.0 * 1024.0);
    let color = if mb >= 10.0 {
        COLOR_GREEN
    } else if mb >= 5.0 {
        COLOR_YELLOW
    } else {
        COLOR_RED
    };
    format!("{color}{padded}{COLOR_RESET}")
}

fn truncate_name(name: &str, max: usize) -> String {
    if name.chars().count() <= max {
        return name.to_string();
    }
    let kept: String = name.chars().take(max.saturating_sub(3)).collect();
    format!("{kept}...")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ProxyType;
    use serde_yaml::{Mapping, Value};

    fn result(name: &str, latency_ms: u64, speed_mb: f64) -> SpeedResult {
        let mut raw = Mapping::new();
        raw.insert(
            Value::String("name".to_string()),
            Value::String(name.to_string()),
        );
        raw.insert(
            Value::String("type".to_string()),
            Value::String("socks5".to_string()),
        );
        raw.insert(
            Value::String("server".to_string()),
            Value::String("127.0.0.1".to_string()),
        );
        raw.insert(Value::String("port".to_string()), Value::Number(1080.into()));

        SpeedResult {
            proxy_name: name.to_string(),
            proxy_type: ProxyType::Socks5,
            proxy_config: Some(raw),
            latency: Duration::from_millis(latency_ms),
            jitter: Duration::ZERO,
            packet_loss: 0.0,
            download_size: 0.0,
            download_time: Duration::ZERO,
            download_speed: speed_mb * 1024.0 * 1024.0,
            upload_size: 0.0,
            upload_time: Duration::ZERO,
            upload_speed: 0.0,
        }
    }

    #[test]
    fn test_sort_by_download_speed_descending() {
        let mut results = vec![
            result("slow", 100, 1.0),
            result("fast", 100, 20.0),
            result("mid", 100, 7.5),
        ];
        sort_results(&mut results);
        let names: Vec<_> = results.iter().map(|r| r.proxy_name.as_str()).collect();
        assert_eq!(names, ["fast", "mid", "slow"]);
    }

    #[test]
    fn test_filter_thresholds() {
        let results = vec![
            result("keeper", 200, 12.0),
            result("laggy", 2000, 12.0),
            result("crawler", 200, 0.5),
            result("unreachable", 0, 0.0),
        ];

        let kept = filter_results(&results, Duration::from_millis(800), 5.0);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].proxy_name, "keeper");

        // disabled thresholds keep everything
        let all = filter_results(&results, Duration::ZERO, 0.0);
        assert_eq!(all.len(), results.len());
    }

    #[test]
    fn test_truncate_name() {
        assert_eq!(truncate_name("short", 10), "short");
        assert_eq!(truncate_name("abcdefghij", 10), "abcdefghij");
        assert_eq!(truncate_name("abcdefghijk", 10), "abcdefg...");
    }

    #[tokio::test]
    async fn test_save_config_round_trips_through_loader() {
        use crate::config::TestConfig;
        use crate::loader::ProxyLoader;
        use crate::testutil::StaticEngine;
        use std::sync::Arc;

        let results = vec![result("rt-a", 100, 10.0), result("rt-b", 100, 9.0)];
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kept.yaml");
        save_config(&path, &results).unwrap();

        let config = TestConfig {
            config_paths: path.display().to_string(),
            ..TestConfig::default()
        };
        let loader = ProxyLoader::new(Arc::new(config), Arc::new(StaticEngine));
        let reloaded = loader.load().await.unwrap();

        let mut names: Vec<_> = reloaded.keys().cloned().collect();
        names.sort();
        assert_eq!(names, ["rt-a", "rt-b"]);
    }
}
