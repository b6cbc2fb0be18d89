//! A ready-made router exposing [`FileSender`] over HTTP.

use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use serde::Deserialize;
use tracing::{debug, info};

use crate::{FileSender, RequestHeaders, ServeConfig};

/// Query string of `/videos/start`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FileQuery {
    /// File name inside the configured root. Missing means not found.
    #[serde(default)]
    pub fl: String,
}

#[derive(Debug, Clone)]
struct AppState {
    root: Arc<PathBuf>,
    sender: FileSender,
}

/// `GET /videos/start?fl=<name>` serving `<root>/<name>`. `HEAD` is handled
/// by the same route.
pub fn router(config: ServeConfig) -> Router {
    info!(root = %config.root.display(), rate_limit = config.sender.rate_limit, "file router configured");
    let state = AppState {
        root: Arc::new(config.root),
        sender: FileSender::new(config.sender),
    };
    Router::new().route("/videos/start", get(start)).with_state(state)
}

async fn start(State(state): State<AppState>, Query(query): Query<FileQuery>, headers: HeaderMap) -> Response {
    debug!(file = %query.fl, "file requested");
    let headers = RequestHeaders::from_headers(&headers);
    match state.sender.serve_path(state.root.as_path(), &query.fl, &headers).await {
        Ok(response) => response.into_response(),
        Err(err) => err.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{header, StatusCode};

    use crate::SenderConfig;

    fn state(root: &std::path::Path) -> AppState {
        AppState {
            root: Arc::new(root.to_path_buf()),
            sender: FileSender::new(SenderConfig { rate_limit: u64::MAX, ..SenderConfig::default() }),
        }
    }

    fn query(name: &str) -> Query<FileQuery> {
        Query(FileQuery { fl: name.to_string() })
    }

    #[tokio::test]
    async fn test_start_serves_range() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("clip.mp4"), b"0123456789").unwrap();

        let mut headers = HeaderMap::new();
        headers.insert(header::RANGE, "bytes=2-5".parse().unwrap());
        let response = start(State(state(dir.path())), query("clip.mp4"), headers).await;

        assert_eq!(StatusCode::PARTIAL_CONTENT, response.status());
        assert_eq!("video/mp4", response.headers()[header::CONTENT_TYPE]);
        assert_eq!("bytes 2-5/10", response.headers()[header::CONTENT_RANGE]);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&b"2345"[..], &body[..]);
    }

    #[tokio::test]
    async fn test_start_missing_name() {
        let dir = tempfile::tempdir().unwrap();
        let response = start(State(state(dir.path())), Query(FileQuery::default()), HeaderMap::new()).await;
        assert_eq!(StatusCode::NOT_FOUND, response.status());
    }

    #[tokio::test]
    async fn test_start_rejects_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let inner = dir.path().join("root");
        std::fs::create_dir(&inner).unwrap();
        std::fs::write(dir.path().join("secret.txt"), b"secret").unwrap();

        let response = start(State(state(&inner)), query("../secret.txt"), HeaderMap::new()).await;
        assert_eq!(StatusCode::NOT_FOUND, response.status());
    }

    #[test]
    fn test_query_deserialize() {
        let FileQuery { fl } = serde_json::from_str(r#"{"fl": "a.mp4"}"#).unwrap();
        assert_eq!("a.mp4", fl);
        let FileQuery { fl } = serde_json::from_str("{}").unwrap();
        assert!(fl.is_empty());
    }
}
