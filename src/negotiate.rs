//! `Content-Disposition` selection from the `Accept` header.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Inline,
    Attachment,
}

impl Disposition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Disposition::Inline => "inline",
            Disposition::Attachment => "attachment",
        }
    }

    /// Value for the `Content-Disposition` header.
    pub fn header_value(&self, file_name: &str) -> String {
        format!("{};filename=\"{}\"", self.as_str(), file_name)
    }
}

impl fmt::Display for Disposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Images are always shown inline. Anything else is an attachment only when
/// the client sent an `Accept` header that rules the content type out.
pub fn disposition(content_type: &str, accept: Option<&str>) -> Disposition {
    if content_type.starts_with("image") {
        return Disposition::Inline;
    }
    match accept {
        Some(accept) if !accepts(accept, content_type) => Disposition::Attachment,
        _ => Disposition::Inline,
    }
}

/// Whether any `,`/`;` separated token of `accept` admits `content_type`,
/// exactly, through a `type/*` wildcard, or through `*/*`.
pub fn accepts(accept: &str, content_type: &str) -> bool {
    let essence = content_type.split(';').next().unwrap_or_default().trim();
    let wildcard = match essence.split_once('/') {
        Some((kind, _)) => format!("{kind}/*"),
        None => format!("{essence}/*"),
    };

    accept
        .split([',', ';'])
        .map(str::trim)
        .any(|token| token == essence || token == wildcard || token == "*/*")
}
