//! # axum-byteserve
//!
//! Rate-limited HTTP byte-range file streaming for [`axum`][1].
//!
//! A [`FileSender`] takes a resolved [`FileResource`] and the request's
//! [`RequestHeaders`] and either ends the request early with a [`SendError`]
//! (304, 404, 412, 416, 500) or produces a [`RangedResponse`]: a full 200, a
//! single-range 206, or a `multipart/byteranges` 206. Bodies are streamed in
//! fixed-size chunks, each paced through a per-transfer token bucket.
//!
//! Evaluation order is fixed: `If-None-Match`, `If-Modified-Since`,
//! `If-Match`, `If-Unmodified-Since`, then `Range` (gated by `If-Range`),
//! then `Accept` for the `Content-Disposition`.
//!
//! Any source implementing both [`AsyncRead`] and [`AsyncSeekStart`] can be
//! streamed, see [`Prepared::respond`]. [`AsyncSeekStart`] is a trait defined
//! by this crate which only allows seeking from the start of a file. It is
//! automatically implemented for any type implementing [`AsyncSeek`].
//!
//! ```no_run
//! use axum::http::HeaderMap;
//! use axum::response::{IntoResponse, Response};
//! use axum_byteserve::{FileSender, RequestHeaders};
//!
//! async fn video(headers: HeaderMap) -> Response {
//!     let sender = FileSender::default();
//!     let headers = RequestHeaders::from_headers(&headers);
//!     match sender.serve_path("/srv/videos", "intro.mp4", &headers).await {
//!         Ok(response) => response.into_response(),
//!         Err(err) => err.into_response(),
//!     }
//! }
//! ```
//!
//! [`service::router`] wires this into a ready-made `GET /videos/start?fl=<name>` route.
//!
//! [1]: https://docs.rs/axum

pub mod conditional;
pub mod config;
mod error;
mod file;
pub mod limiter;
pub mod negotiate;
pub mod range;
mod sender;
pub mod service;
mod stream;

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::AsyncSeek;

pub use config::{SenderConfig, ServeConfig};
pub use error::SendError;
pub use file::{FileResource, ResourceInfo};
pub use range::ByteRange;
pub use sender::{BodyPlan, FileSender, Prepared, RangedResponse, RequestHeaders, MULTIPART_BOUNDARY};
pub use stream::{RangeCopier, RangeReader, RangedStream};

#[cfg(doc)]
use tokio::io::AsyncRead;

/// [`AsyncSeek`] narrowed to only allow seeking from start.
pub trait AsyncSeekStart {
    /// Same semantics as [`AsyncSeek::start_seek`], always passing position as the `SeekFrom::Start` variant.
    fn start_seek(self: Pin<&mut Self>, position: u64) -> io::Result<()>;

    /// Same semantics as [`AsyncSeek::poll_complete`], returning `()` instead of the new stream position.
    fn poll_complete(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>>;
}

impl<T: AsyncSeek> AsyncSeekStart for T {
    fn start_seek(self: Pin<&mut Self>, position: u64) -> io::Result<()> {
        AsyncSeek::start_seek(self, io::SeekFrom::Start(position))
    }

    fn poll_complete(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        AsyncSeek::poll_complete(self, cx).map_ok(|_| ())
    }
}
