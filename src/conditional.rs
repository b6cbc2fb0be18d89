//! Conditional request evaluation (`If-None-Match`, `If-Modified-Since`,
//! `If-Match`, `If-Unmodified-Since`).

use std::time::{SystemTime, UNIX_EPOCH};

use tracing::debug;

use crate::RequestHeaders;

/// Slack applied to header dates, which are truncated to whole seconds.
const DATE_SLACK_MILLIS: u64 = 1000;

/// Outcome of a conditional check that ends the request before any body byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precondition {
    /// 304. The client's cached copy is current.
    NotModified,
    /// 412. An `If-Match` or `If-Unmodified-Since` guard failed.
    Failed,
}

/// Apply the cache validators to a resource identified by `etag` and last
/// modified at `last_modified_millis` (milliseconds since the Unix epoch).
///
/// Checks run in a fixed order and the first hit wins:
///
/// 1. `If-None-Match` matching the etag
/// 2. `If-Modified-Since` (only without `If-None-Match`) not older than the resource
/// 3. `If-Match` not matching the etag
/// 4. `If-Unmodified-Since` older than the resource
///
/// Dates that fail to parse are ignored.
pub fn evaluate(
    headers: &RequestHeaders,
    etag: &str,
    last_modified_millis: u64,
) -> Result<(), Precondition> {
    match headers.if_none_match.as_deref() {
        Some(if_none_match) if matches(if_none_match, etag) => {
            debug!(%etag, "If-None-Match hit");
            return Err(Precondition::NotModified);
        }
        Some(_) => {}
        None => {
            let since = headers.if_modified_since.as_deref().and_then(parse_millis);
            if since.is_some_and(|since| since + DATE_SLACK_MILLIS > last_modified_millis) {
                debug!(%etag, "not modified since client copy");
                return Err(Precondition::NotModified);
            }
        }
    }

    if let Some(if_match) = headers.if_match.as_deref() {
        if !matches(if_match, etag) {
            debug!(%etag, %if_match, "If-Match miss");
            return Err(Precondition::Failed);
        }
    }

    let unmodified_since = headers.if_unmodified_since.as_deref().and_then(parse_millis);
    if unmodified_since.is_some_and(|since| since + DATE_SLACK_MILLIS <= last_modified_millis) {
        debug!(%etag, "modified after If-Unmodified-Since");
        return Err(Precondition::Failed);
    }

    Ok(())
}

/// Whether a comma separated entity-tag list contains `etag` or the `*` wildcard.
pub fn matches(header: &str, etag: &str) -> bool {
    header
        .split(',')
        .map(str::trim)
        .any(|token| token == etag || token == "*")
}

/// Parse an HTTP date into milliseconds since the Unix epoch.
pub(crate) fn parse_millis(value: &str) -> Option<u64> {
    let time = httpdate::parse_http_date(value.trim()).ok()?;
    Some(epoch_millis(time))
}

pub(crate) fn epoch_millis(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}
