//! Rejection reasons.
//!
//! The source of a rejection may be a structured [`Error`], a plain message,
//! or an arbitrary value that only knows how to print itself. Reasons are
//! normalized at the rejection boundary so that no rejection is ever
//! silently dropped: [`Reason::into_error`] always yields a throwable
//! [`Error`] with a printable message.

use crate::error::{Error, ErrorKind};
use core::fmt;

/// The reason a promise was rejected.
#[derive(Debug, Clone)]
pub enum Reason {
    /// A structured runtime error.
    Error(Error),
    /// A string-like reason.
    Message(String),
    /// An opaque reason, captured as its printable serialization.
    Opaque(String),
}

impl Reason {
    /// Captures an arbitrary displayable value as an opaque reason.
    #[must_use]
    pub fn opaque(value: impl fmt::Display) -> Self {
        Self::Opaque(value.to_string())
    }

    /// Returns true if this reason represents cancellation.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Error(e) if e.is_cancelled())
    }

    /// Normalizes this reason into a throwable [`Error`].
    ///
    /// Structured errors pass through unchanged; message and opaque reasons
    /// become `User`-kind errors carrying the printable text.
    #[must_use]
    pub fn into_error(self) -> Error {
        match self {
            Self::Error(e) => e,
            Self::Message(msg) | Self::Opaque(msg) => {
                Error::new(ErrorKind::User).with_context(msg)
            }
        }
    }
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Error(e) => write!(f, "{e}"),
            Self::Message(msg) | Self::Opaque(msg) => write!(f, "{msg}"),
        }
    }
}

impl From<Error> for Reason {
    fn from(e: Error) -> Self {
        Self::Error(e)
    }
}

impl From<&str> for Reason {
    fn from(msg: &str) -> Self {
        Self::Message(msg.to_string())
    }
}

impl From<String> for Reason {
    fn from(msg: String) -> Self {
        Self::Message(msg)
    }
}
