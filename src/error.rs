use axum::http::header::ETAG;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum_extra::headers::ContentRange;
use axum_extra::TypedHeader;
use thiserror::Error;

/// Every way a request can end before (or instead of) streaming a body.
///
/// Implements [`IntoResponse`], producing the matching status with an empty
/// body. Failures once streaming has started are plain [`std::io::Error`]s.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SendError {
    #[error("no readable file for {0:?}")]
    NotFound(String),

    #[error("metadata unavailable for {path}: {reason}")]
    MetadataUnavailable { path: String, reason: String },

    #[error("client copy of {etag} is current")]
    NotModified { etag: String },

    #[error("precondition failed")]
    PreconditionFailed,

    #[error("range not satisfiable for {total} bytes")]
    RangeNotSatisfiable { total: u64 },
}

impl SendError {
    pub fn status(&self) -> StatusCode {
        match self {
            SendError::NotFound(_) => StatusCode::NOT_FOUND,
            SendError::MetadataUnavailable { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            SendError::NotModified { .. } => StatusCode::NOT_MODIFIED,
            SendError::PreconditionFailed => StatusCode::PRECONDITION_FAILED,
            SendError::RangeNotSatisfiable { .. } => StatusCode::RANGE_NOT_SATISFIABLE,
        }
    }
}

impl IntoResponse for SendError {
    fn into_response(self) -> Response {
        let status = self.status();
        match self {
            SendError::RangeNotSatisfiable { total } => {
                let header = TypedHeader(ContentRange::unsatisfied_bytes(total));
                (status, header, ()).into_response()
            }
            SendError::NotModified { etag } => {
                let mut response = (status, ()).into_response();
                if let Ok(value) = HeaderValue::from_str(&etag) {
                    response.headers_mut().insert(ETAG, value);
                }
                response
            }
            _ => (status, ()).into_response(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_statuses() {
        assert_eq!(404, SendError::NotFound("x".into()).status().as_u16());
        assert_eq!(412, SendError::PreconditionFailed.status().as_u16());
        assert_eq!(
            500,
            SendError::MetadataUnavailable { path: "x".into(), reason: "gone".into() }
                .status()
                .as_u16(),
        );
    }

    #[test]
    fn test_range_not_satisfiable_response() {
        let response = SendError::RangeNotSatisfiable { total: 1000 }.into_response();
        assert_eq!(StatusCode::RANGE_NOT_SATISFIABLE, response.status());
        assert_eq!(
            Some(&HeaderValue::from_static("bytes */1000")),
            response.headers().get("Content-Range"),
        );
    }

    #[test]
    fn test_not_modified_response() {
        let response = SendError::NotModified { etag: "clip.mp4".into() }.into_response();
        assert_eq!(StatusCode::NOT_MODIFIED, response.status());
        assert_eq!(Some(&HeaderValue::from_static("clip.mp4")), response.headers().get("ETag"));
    }
}
