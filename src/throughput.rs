use std::convert::Infallible;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use bytes::Bytes;
use http_body_util::BodyExt;
use hyper::body::{Body, Frame, SizeHint};
use hyper::header::CONTENT_TYPE;
use hyper::{Request, StatusCode, Uri};
use tracing::debug;

use crate::client::{empty_body, HttpClient, ReqBody};

/// 单方向吞吐量聚合结果
///
/// `duration` is the arithmetic mean of the successful chunks' durations;
/// dividing total bytes by it yields the average observed throughput.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThroughputSample {
    pub bytes: u64,
    pub duration: Duration,
}

impl ThroughputSample {
    pub fn speed(&self) -> f64 {
        if self.bytes == 0 || self.duration.is_zero() {
            return 0.0;
        }
        self.bytes as f64 / self.duration.as_secs_f64()
    }
}

/// Download `total` bytes as `concurrent` equal, independently timed chunks.
pub async fn measure_download(
    client: &Arc<HttpClient>,
    server_url: &str,
    total: u64,
    concurrent: usize,
    deadline: Duration,
) -> ThroughputSample {
    let chunk = total / concurrent.max(1) as u64;
    let url = format!("{}/__down?bytes={}", server_url, chunk);

    let chunks = (0..concurrent).map(|_| download_chunk(client.clone(), url.clone(), deadline));
    aggregate(futures::future::join_all(chunks).await)
}

/// Upload `total` bytes of filler as `concurrent` equal concurrent chunks.
pub async fn measure_upload(
    client: &Arc<HttpClient>,
    server_url: &str,
    total: u64,
    concurrent: usize,
    deadline: Duration,
) -> ThroughputSample {
    let chunk = total / concurrent.max(1) as u64;
    let url = format!("{}/__up", server_url);

    let chunks = (0..concurrent).map(|_| upload_chunk(client.clone(), url.clone(), chunk, deadline));
    aggregate(futures::future::join_all(chunks).await)
}

async fn download_chunk(
    client: Arc<HttpClient>,
    url: String,
    deadline: Duration,
) -> Option<(u64, Duration)> {
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

    let mut received = 0u64;
    let drain = async {
        let mut body = resp.into_body();
        while let Some(frame) = body.frame().await {
            match frame {
                Ok(frame) => {
                    if let Some(data) = frame.data_ref() {
                        received += data.len() as u64;
                    }
                }
                // A transfer that dies mid-stream still moved bytes; keep them.
                Err(err) => {
                    debug!("download chunk interrupted: {err}");
                    break;
                }
            }
        }
    };
    let _ = tokio::time::timeout(deadline.saturating_sub(start.elapsed()), drain).await;

    Some((received, start.elapsed()))
}

async fn upload_chunk(
    client: Arc<HttpClient>,
    url: String,
    size: u64,
    deadline: Duration,
) -> Option<(u64, Duration)> {
    let uri: Uri = url.parse().ok()?;
    let req = Request::post(uri)
        .header(CONTENT_TYPE, "application/octet-stream")
        .body(zero_body(size))
        .ok()?;

    let start = Instant::now();
    let resp = tokio::time::timeout(deadline, client.request(req))
        .await
        .ok()?
        .ok()?;
    if resp.status() != StatusCode::OK {
        return None;
    }
    let _ = resp.into_body().collect().await;

    // The server only answers after draining the request, so a 200 means
    // the full chunk went through.
    Some((size, start.elapsed()))
}

/// Sum the successful chunks' bytes and average their durations. No
/// successful chunk at all yields the zero sample, not an error.
fn aggregate(chunks: Vec<Option<(u64, Duration)>>) -> ThroughputSample {
    let mut bytes = 0u64;
    let mut elapsed = Duration::ZERO;
    let mut count = 0u32;
    for (chunk_bytes, chunk_time) in chunks.into_iter().flatten() {
        bytes += chunk_bytes;
        elapsed += chunk_time;
        count += 1;
    }
    if count == 0 {
        return ThroughputSample::default();
    }
    ThroughputSample {
        bytes,
        duration: elapsed / count,
    }
}

const FILL_CHUNK: usize = 64 * 1024;

/// 定长零字节请求体 (上传填充)
struct ZeroBody {
    remaining: u64,
    chunk: Bytes,
}

pub fn zero_body(size: u64) -> ReqBody {
    ZeroBody {
        remaining: size,
        chunk: Bytes::from(vec![0u8; FILL_CHUNK]),
    }
    .boxed()
}

impl Body for ZeroBody {
    type Data = Bytes;
    type Error = Infallible;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        if self.remaining == 0 {
            return Poll::Ready(None);
        }
        let len = self.remaining.min(self.chunk.len() as u64) as usize;
        self.remaining -= len as u64;
        let data = self.chunk.slice(..len);
        Poll::Ready(Some(Ok(Frame::data(data))))
    }

    fn is_end_stream(&self) -> bool {
        self.remaining == 0
    }

    fn size_hint(&self) -> SizeHint {
        SizeHint::with_exact(self.remaining)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aggregate_all_success() {
        let chunks = vec![
            Some((1024, Duration::from_secs(1))),
            Some((2048, Duration::from_secs(2))),
            Some((1024, Duration::from_secs(3))),
        ];
        let sample = aggregate(chunks);
        assert_eq!(sample.bytes, 4096);
        assert_eq!(sample.duration, Duration::from_secs(2));
        assert!((sample.speed() - 2048.0).abs() < 1e-9);
    }

    #[test]
    fn test_aggregate_skips_failed_chunks() {
        // 4 chunks, the third one failed: totals only cover the other 3
        let chunks = vec![
            Some((1000, Duration::from_secs(1))),
            Some((1000, Duration::from_secs(1))),
            None,
            Some((1000, Duration::from_secs(4))),
        ];
        let sample = aggregate(chunks);
        assert_eq!(sample.bytes, 3000);
        assert_eq!(sample.duration, Duration::from_secs(2));
        assert!((sample.speed() - 1500.0).abs() < 1e-9);
    }

    #[test]
    fn test_aggregate_nothing_succeeded() {
        let sample = aggregate(vec![None, None]);
        assert_eq!(sample.bytes, 0);
        assert_eq!(sample.duration, Duration::ZERO);
        assert_eq!(sample.speed(), 0.0);
    }

    #[tokio::test]
    async fn test_zero_body_exact_size() {
        for size in [0u64, 1, 1024, FILL_CHUNK as u64 * 2 + 17] {
            let collected = zero_body(size).collect().await.unwrap();
            assert_eq!(collected.to_bytes().len() as u64, size);
        }
    }
}
