use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::Result;

const DEFAULT_DOWNLOAD_SIZE: u64 = 100 * 1024 * 1024;
const DEFAULT_UPLOAD_SIZE: u64 = 10 * 1024 * 1024;
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_MAX_JOBS: usize = 10;

/// 一次测速运行的完整配置
///
/// Built once, then handed to the loader, client factory and scheduler
/// explicitly. Nothing in the crate reads ambient/global state.
#[derive(Debug, Clone)]
pub struct TestConfig {
    /// Comma-separated descriptor sources: local paths or http(s) urls.
    pub config_paths: String,
    /// Regular expression applied to resolved proxy names.
    pub filter_regex: String,
    /// Base url of the measurement endpoint (`/__down`, `/__up`).
    pub server_url: String,
    pub download_size: u64,
    pub upload_size: u64,
    /// Deadline for each probe and each transfer chunk, and for the
    /// latency phase of a job as a whole.
    pub timeout: Duration,
    /// Parallel transfer chunks per direction within one job.
    pub concurrent: usize,
    /// How many proxies are measured at once (the job pool ceiling,
    /// independent of `concurrent`).
    pub max_jobs: usize,
    /// Prepended to every resolved proxy name; used in batch runs to keep
    /// provenance and avoid cross-source collisions.
    pub name_prefix: String,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            config_paths: String::new(),
            filter_regex: ".+".to_string(),
            server_url: "http://127.0.0.1:8080".to_string(),
            download_size: DEFAULT_DOWNLOAD_SIZE,
            upload_size: DEFAULT_UPLOAD_SIZE,
            timeout: DEFAULT_TIMEOUT,
            concurrent: 1,
            max_jobs: DEFAULT_MAX_JOBS,
            name_prefix: String::new(),
        }
    }
}

impl TestConfig {
    /// Replace zero/empty values with usable defaults and normalize the
    /// server url so paths can be appended directly.
    pub fn normalized(mut self) -> Self {
        if self.concurrent == 0 {
            self.concurrent = 1;
        }
        if self.max_jobs == 0 {
            self.max_jobs = DEFAULT_MAX_JOBS;
        }
        if self.download_size == 0 {
            self.download_size = DEFAULT_DOWNLOAD_SIZE;
        }
        if self.upload_size == 0 {
            self.upload_size = DEFAULT_UPLOAD_SIZE;
        }
        if self.timeout.is_zero() {
            self.timeout = DEFAULT_TIMEOUT;
        }
        if self.filter_regex.is_empty() {
            self.filter_regex = ".+".to_string();
        }
        while self.server_url.ends_with('/') {
            self.server_url.pop();
        }
        self
    }
}

/// 批量模式的一个命名源
#[derive(Debug, Clone, Deserialize)]
pub struct Source {
    pub name: String,
    pub url: String,
}

#[derive(Debug, Deserialize)]
struct SourceList {
    #[serde(default)]
    sources: Vec<Source>,
}

/// Parse the batch sources file: a TOML document of `[[sources]]` entries
/// with `name` and `url` keys.
pub fn load_sources(path: &Path) -> Result<Vec<Source>> {
    let content = fs::read_to_string(path)?;
    let list: SourceList = toml::from_str(&content)?;
    Ok(list.sources)
}
