//! Shared primitives used across xslview crates.

use core::fmt;

/// Result alias used across the workspace.
pub type XvResult<T> = Result<T, XvError>;

/// Coded error value shared by the DOM, network, and transform layers.
///
/// `code` is a dotted, stable identifier (`net.http.status_invalid`,
/// `xslt.compile.unsupported`, ...) that tests and callers can match on;
/// `message` is the human-readable detail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XvError {
    pub code: &'static str,
    pub message: String,
}

impl XvError {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Returns true when the code sits under the given dotted prefix.
    pub fn is_in(&self, prefix: &str) -> bool {
        self.code == prefix
            || (self.code.starts_with(prefix)
                && self.code.as_bytes().get(prefix.len()).copied() == Some(b'.'))
    }

    /// Prepends context to the message while keeping the code.
    pub fn context(mut self, context: impl fmt::Display) -> Self {
        self.message = format!("{context}: {}", self.message);
        self
    }
}

impl fmt::Display for XvError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for XvError {}
