//! Response composition: validators, then ranges, then disposition, then a body.

use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::http::header::{self, HeaderName};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum_extra::headers::{AcceptRanges, ContentLength, Expires, HeaderMapExt, LastModified};
use bytes::Bytes;
use tokio::io::AsyncRead;
use tracing::{debug, info, warn};

use crate::conditional::{self, Precondition};
use crate::negotiate::{self, Disposition};
use crate::range::{self, ByteRange};
use crate::stream::{RangeCopier, RangedStream};
use crate::file::MAX_HTTP_DATE_SECS;
use crate::{AsyncSeekStart, FileResource, ResourceInfo, SendError, SenderConfig};

/// Boundary between `multipart/byteranges` parts. Fixed, since a response
/// is never interleaved with another on the same connection.
pub const MULTIPART_BOUNDARY: &str = "MULTIPART_BYTERANGES";

/// The request headers the sender looks at, captured once per request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestHeaders {
    pub range: Option<String>,
    pub if_range: Option<String>,
    pub if_match: Option<String>,
    pub if_none_match: Option<String>,
    pub if_modified_since: Option<String>,
    pub if_unmodified_since: Option<String>,
    pub accept: Option<String>,
}

impl RequestHeaders {
    /// Header names match case-insensitively. List headers sent on several
    /// lines are joined with `, `. Bytes outside visible ASCII are replaced
    /// with U+FFFD, so such a header still counts as sent and never matches.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let first = |name: HeaderName| headers.get(name).map(lossy);
        let list = |name: HeaderName| {
            let values: Vec<String> = headers.get_all(name).iter().map(lossy).collect();
            (!values.is_empty()).then(|| values.join(", "))
        };

        RequestHeaders {
            range: first(header::RANGE),
            if_range: first(header::IF_RANGE),
            if_match: list(header::IF_MATCH),
            if_none_match: list(header::IF_NONE_MATCH),
            if_modified_since: first(header::IF_MODIFIED_SINCE),
            if_unmodified_since: first(header::IF_UNMODIFIED_SINCE),
            accept: list(header::ACCEPT),
        }
    }
}

fn lossy(value: &HeaderValue) -> String {
    String::from_utf8_lossy(value.as_bytes()).into_owned()
}

/// Which body a response carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BodyPlan {
    /// 200, the whole resource.
    Full(ByteRange),
    /// 206, one slice.
    Single(ByteRange),
    /// 206, `multipart/byteranges` with one part per range, in request order.
    Multiple(Vec<ByteRange>),
}

impl BodyPlan {
    fn from_ranges(ranges: Vec<ByteRange>, total: u64) -> Self {
        match ranges.as_slice() {
            [] => BodyPlan::Full(ByteRange::full(total)),
            [range] if range.is_full() => BodyPlan::Full(*range),
            [range] => BodyPlan::Single(*range),
            _ => BodyPlan::Multiple(ranges),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            BodyPlan::Full(_) => StatusCode::OK,
            BodyPlan::Single(_) | BodyPlan::Multiple(_) => StatusCode::PARTIAL_CONTENT,
        }
    }
}

/// Serves files per request. Holds only configuration, so one sender can be
/// cloned into every handler; all per-request state lives in [`Prepared`].
#[derive(Debug, Clone, Default)]
pub struct FileSender {
    config: SenderConfig,
}

impl FileSender {
    pub fn new(config: SenderConfig) -> Self {
        FileSender { config }
    }

    pub fn config(&self) -> &SenderConfig {
        &self.config
    }

    /// Decide the response for `info` without touching the file.
    ///
    /// Conditional headers are evaluated first, then the `Range` header.
    /// Every error returned here ends the request before any body byte.
    pub fn prepare(&self, info: &ResourceInfo, headers: &RequestHeaders) -> Result<Prepared, SendError> {
        let etag = info.etag();

        conditional::evaluate(headers, etag, info.last_modified_millis()).map_err(|outcome| match outcome {
            Precondition::NotModified => SendError::NotModified { etag: etag.to_string() },
            Precondition::Failed => SendError::PreconditionFailed,
        })?;

        let ranges = match headers.range.as_deref() {
            None => Vec::new(),
            Some(value) => range::parse_range_header(value, headers.if_range.as_deref(), etag, info.byte_size)
                .map_err(|_| {
                    debug!(name = %info.name, range = %value, "range not satisfiable");
                    SendError::RangeNotSatisfiable { total: info.byte_size }
                })?,
        };

        let disposition = negotiate::disposition(&info.content_type, headers.accept.as_deref());
        debug!(content_type = %info.content_type, %disposition, "negotiated");

        Ok(Prepared {
            info: info.clone(),
            disposition,
            plan: BodyPlan::from_ranges(ranges, info.byte_size),
            config: self.config.clone(),
        })
    }

    /// [`prepare`](FileSender::prepare), then open the file and build the response.
    pub async fn serve(&self, file: &FileResource, headers: &RequestHeaders) -> Result<RangedResponse, SendError> {
        let prepared = self.prepare(file.info(), headers)?;
        let source = file.open().await?;
        Ok(prepared.respond(source))
    }

    /// Resolve `identifier` inside `root`, then [`serve`](FileSender::serve) it.
    pub async fn serve_path(
        &self,
        root: impl AsRef<Path>,
        identifier: &str,
        headers: &RequestHeaders,
    ) -> Result<RangedResponse, SendError> {
        let file = FileResource::resolve(root, identifier).await?;
        self.serve(&file, headers).await
    }
}

/// A response that passed every check and only lacks its source.
#[derive(Debug, Clone)]
pub struct Prepared {
    info: ResourceInfo,
    disposition: Disposition,
    plan: BodyPlan,
    config: SenderConfig,
}

impl Prepared {
    pub fn plan(&self) -> &BodyPlan {
        &self.plan
    }

    pub fn disposition(&self) -> Disposition {
        self.disposition
    }

    /// Attach `source`, which must be positioned at offset 0 and hold
    /// exactly the bytes described by the resource info.
    pub fn respond<R>(self, source: R) -> RangedResponse
    where
        R: AsyncRead + AsyncSeekStart + Unpin + Send + 'static,
    {
        let info = &self.info;
        let copier = RangeCopier::new(self.config.rate_limit, self.config.buffer_size);
        let mut headers = HeaderMap::new();

        let stream = match &self.plan {
            BodyPlan::Full(range) => {
                info!(name = %info.name, "return full file");
                insert(&mut headers, header::CONTENT_TYPE, &info.content_type);
                if range.total > 0 {
                    insert(&mut headers, header::CONTENT_RANGE, &range.content_range());
                }
                RangedStream::single(source, copier, *range)
            }
            BodyPlan::Single(range) => {
                info!(name = %info.name, start = range.start, end = range.end, "return 1 part of file");
                insert(&mut headers, header::CONTENT_TYPE, &info.content_type);
                insert(&mut headers, header::CONTENT_RANGE, &range.content_range());
                RangedStream::single(source, copier, *range)
            }
            BodyPlan::Multiple(ranges) => {
                info!(name = %info.name, parts = ranges.len(), "return multi part of file");
                let content_type = format!("multipart/byteranges; boundary={MULTIPART_BOUNDARY}");
                insert(&mut headers, header::CONTENT_TYPE, &content_type);
                let parts = ranges
                    .iter()
                    .enumerate()
                    .map(|(i, range)| (part_preamble(i, &info.content_type, range), *range))
                    .collect();
                let closing = Bytes::from(format!("\r\n--{MULTIPART_BOUNDARY}--\r\n"));
                RangedStream::multipart(source, copier, parts, closing)
            }
        };

        insert(&mut headers, header::CONTENT_DISPOSITION, &self.disposition.header_value(&info.name));
        headers.typed_insert(AcceptRanges::bytes());
        insert(&mut headers, header::ETAG, info.etag());
        headers.typed_insert(LastModified::from(info.last_modified_time()));
        headers.typed_insert(Expires::from(expires_at(SystemTime::now(), self.config.expiry_secs)));
        headers.typed_insert(ContentLength(stream.len()));

        RangedResponse {
            status: self.plan.status(),
            headers,
            stream,
        }
    }
}

/// `now + expiry_secs`, held to the latest date an HTTP header can carry.
fn expires_at(now: SystemTime, expiry_secs: u64) -> SystemTime {
    let latest = UNIX_EPOCH + Duration::from_secs(MAX_HTTP_DATE_SECS);
    now.checked_add(Duration::from_secs(expiry_secs))
        .map_or(latest, |expires| expires.min(latest))
}

fn part_preamble(index: usize, content_type: &str, range: &ByteRange) -> Bytes {
    let lead = if index == 0 { "" } else { "\r\n" };
    Bytes::from(format!(
        "{lead}--{MULTIPART_BOUNDARY}\r\nContent-Type: {content_type}\r\nContent-Range: {}\r\n\r\n",
        range.content_range(),
    ))
}

fn insert(headers: &mut HeaderMap, name: HeaderName, value: &str) {
    match HeaderValue::from_bytes(value.as_bytes()) {
        Ok(value) => {
            headers.insert(name, value);
        }
        Err(_) => warn!(header = %name, %value, "dropping unrepresentable header value"),
    }
}

/// Status, headers and body of a successful response. Implements [`IntoResponse`].
pub struct RangedResponse {
    status: StatusCode,
    headers: HeaderMap,
    stream: RangedStream,
}

impl RangedResponse {
    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn into_stream(self) -> RangedStream {
        self.stream
    }
}

impl IntoResponse for RangedResponse {
    fn into_response(self) -> Response {
        (self.status, self.headers, self.stream).into_response()
    }
}
