//! Reply text and the status conventions layered on it.
//!
//! The protocol has no status codes. Two textual conventions stand in for
//! them and are preserved exactly:
//!
//! - a reply signals success by containing [`SUCCESS_MARKER`]
//!   (case-insensitive substring match); failure replies never contain it
//! - the client reports its own transport faults as a reply beginning with
//!   [`ERROR_SENTINEL`], so callers always receive displayable text

use std::fmt;

use crate::reply;

/// Substring that marks a successful reply.
pub const SUCCESS_MARKER: &str = "successful";

/// Prefix of client-side fault replies.
pub const ERROR_SENTINEL: &str = "[ERROR]";

/// Whether `text` carries the success marker.
pub fn is_success(text: &str) -> bool {
    text.to_lowercase().contains(SUCCESS_MARKER)
}

/// Raw text returned for one command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response(String);

impl Response {
    /// Wrap reply text.
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    /// Sentinel reply standing in for a transport fault.
    pub fn error(detail: impl fmt::Display) -> Self {
        Self(format!("{ERROR_SENTINEL} {detail}"))
    }

    /// Reply text.
    pub fn text(&self) -> &str {
        &self.0
    }

    /// Take the reply text.
    pub fn into_text(self) -> String {
        self.0
    }

    /// Whether this is a client-side fault sentinel.
    pub fn is_error(&self) -> bool {
        self.0.starts_with(ERROR_SENTINEL)
    }

    /// Fault description of a sentinel reply.
    pub fn error_detail(&self) -> Option<&str> {
        self.0.strip_prefix(ERROR_SENTINEL).map(str::trim)
    }

    /// Whether the reply carries the success marker.
    pub fn is_success(&self) -> bool {
        !self.is_error() && is_success(&self.0)
    }

    /// Whether the server refused a privileged request.
    pub fn is_unauthorized(&self) -> bool {
        self.0.trim_start().starts_with(reply::UNAUTHORIZED)
    }

    /// Whether the server refused because the connection is not logged in.
    pub fn is_login_required(&self) -> bool {
        self.0.trim_start().starts_with(reply::LOGIN_REQUIRED)
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for Response {
    fn from(text: String) -> Self {
        Self(text)
    }
}

impl AsRef<str> for Response {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
