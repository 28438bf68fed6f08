//! speedtest-server: the measurement endpoint the prober talks to.
//!
//! `GET /__down?bytes=N` streams exactly N filler bytes; `POST /__up`
//! swallows whatever it is sent. Self-contained on purpose: it shares no
//! state with the measurement CLI and can run anywhere reachable through
//! the proxies under test.

use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;

use axum::body::Body;
use axum::extract::{DefaultBodyLimit, Query};
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use bytes::Bytes;
use clap::Parser;
use futures::StreamExt;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

const FILL_CHUNK: usize = 1024 * 1024;

#[derive(Parser)]
#[command(name = "speedtest-server")]
#[command(about = "Download/upload sink endpoint for proxy-speedtest", version)]
struct Cli {
    /// Listen address
    #[arg(short = 'l', long, default_value = "0.0.0.0:8080")]
    listen: SocketAddr,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let listener = TcpListener::bind(cli.listen).await?;
    info!("speedtest server listening on http://{}", cli.listen);

    axum::serve(listener, app()).await?;
    Ok(())
}

fn app() -> Router {
    // method routing answers 405 for anything but the declared verbs
    Router::new()
        .route("/", get(index))
        .route("/__down", get(download))
        .route("/__up", post(upload))
        .layer(DefaultBodyLimit::disable())
}

async fn index() -> Html<&'static str> {
    Html("<h1>SpeedTest Server</h1>")
}

/// Stream exactly `bytes` filler bytes, in `FILL_CHUNK`-sized frames.
async fn download(Query(params): Query<HashMap<String, String>>) -> Response {
    let size: u64 = match params.get("bytes").map(|raw| raw.parse()) {
        Some(Ok(size)) => size,
        Some(Err(err)) => return (StatusCode::BAD_REQUEST, err.to_string()).into_response(),
        None => return (StatusCode::BAD_REQUEST, "missing bytes parameter").into_response(),
    };

    let chunk = Bytes::from(vec![0u8; FILL_CHUNK]);
    let stream = futures::stream::unfold(size, move |remaining| {
        let chunk = chunk.clone();
        async move {
            if remaining == 0 {
                return None;
            }
            let len = remaining.min(FILL_CHUNK as u64);
            let frame: Result<Bytes, Infallible> = Ok(chunk.slice(..len as usize));
            Some((frame, remaining - len))
        }
    });

    (
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=speedtest-{size}.bin"),
            ),
        ],
        Body::from_stream(stream),
    )
        .into_response()
}

/// Read and discard the entire request body.
async fn upload(body: Body) -> StatusCode {
    let mut stream = body.into_data_stream();
    while let Some(chunk) = stream.next().await {
        if chunk.is_err() {
            break;
        }
    }
    StatusCode::OK
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use axum::http::Request;
    use tower::util::ServiceExt;

    #[tokio::test]
    async fn test_download_exact_bytes_and_headers() {
        let response = app()
            .oneshot(
                Request::get("/__down?bytes=70000")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "application/octet-stream"
        );
        assert_eq!(
            response.headers()[header::CONTENT_DISPOSITION],
            "attachment; filename=speedtest-70000.bin"
        );

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(body.len(), 70000);
    }

    #[tokio::test]
    async fn test_download_rejects_bad_size() {
        let response = app()
            .oneshot(
                Request::get("/__down?bytes=abc")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app()
            .oneshot(Request::get("/__down").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_method_not_allowed() {
        let response = app()
            .oneshot(Request::post("/__down").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);

        let response = app()
            .oneshot(Request::get("/__up").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn test_upload_drains_and_accepts() {
        let payload = vec![0x5au8; 512 * 1024];
        let response = app()
            .oneshot(Request::post("/__up").body(Body::from(payload)).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
