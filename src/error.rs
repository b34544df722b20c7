//! Error types and error handling strategy for Filament.
//!
//! Error handling follows these principles:
//!
//! - Errors are explicit and typed (no stringly-typed errors)
//! - Cancellation is a distinct error kind carried in the result channel,
//!   not a panic
//! - Panics inside fibers are isolated and converted to `Panic`-kind errors

use core::fmt;
use std::sync::Arc;
use std::time::Duration;

/// The kind of error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    // === Cancellation ===
    /// Awaited a cancelled promise, or tripped `throw_if_cancelled`.
    Cancelled,

    // === Time ===
    /// A `timeout` wrapper elapsed before its operand settled.
    Timeout,

    // === Combinators ===
    /// Every input to `any` rejected.
    Aggregate,
    /// Invalid argument (concurrency limit, batch size, timeout duration).
    InvalidArgument,

    // === Fiber context ===
    /// A fiber-only primitive was used outside any fiber.
    NotInFiber,
    /// A fiber body panicked.
    Panic,

    // === Event loop ===
    /// The event loop is already running; re-entry is forbidden.
    LoopBusy,

    // === Internal / user ===
    /// Internal runtime error (bug).
    Internal,
    /// User-provided error.
    User,
}

/// The main error type for Filament operations.
#[derive(Debug, Clone)]
pub struct Error {
    kind: ErrorKind,
    context: Option<String>,
    source: Option<Arc<dyn std::error::Error + Send + Sync>>,
    /// Duration of the elapsed timeout, for `Timeout`-kind errors.
    elapsed: Option<Duration>,
    /// Member errors, for `Aggregate`-kind errors (input order preserved).
    related: Vec<Error>,
}

impl Error {
    /// Creates a new error with the given kind.
    #[must_use]
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            context: None,
            source: None,
            elapsed: None,
            related: Vec::new(),
        }
    }

    /// Creates a cancellation error.
    #[must_use]
    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled)
    }

    /// Creates a timeout error carrying the elapsed duration.
    #[must_use]
    pub fn timeout(elapsed: Duration) -> Self {
        let mut err = Self::new(ErrorKind::Timeout);
        err.elapsed = Some(elapsed);
        err
    }

    /// Creates an aggregate error from member errors in input order.
    #[must_use]
    pub fn aggregate(errors: Vec<Self>) -> Self {
        let mut err = Self::new(ErrorKind::Aggregate);
        err.related = errors;
        err
    }

    /// Creates an invalid-argument error with context.
    #[must_use]
    pub fn invalid_argument(ctx: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArgument).with_context(ctx)
    }

    /// Creates a not-in-fiber error with context.
    #[must_use]
    pub fn not_in_fiber(ctx: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotInFiber).with_context(ctx)
    }

    /// Creates a panic error from a caught panic payload.
    ///
    /// Extracts the conventional `&str` / `String` payloads; anything else is
    /// reported as an opaque panic.
    #[must_use]
    pub fn from_panic(payload: &(dyn std::any::Any + Send)) -> Self {
        let msg = payload.downcast_ref::<&str>().map_or_else(
            || {
                payload
                    .downcast_ref::<String>()
                    .cloned()
                    .unwrap_or_else(|| "panic of unknown type".to_string())
            },
            |s| (*s).to_string(),
        );
        Self::new(ErrorKind::Panic).with_context(msg)
    }

    /// Returns the error kind.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns true if this error represents cancellation.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self.kind, ErrorKind::Cancelled)
    }

    /// Returns true if this error is a timeout.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self.kind, ErrorKind::Timeout)
    }

    /// Returns the elapsed duration for `Timeout`-kind errors.
    #[must_use]
    pub const fn timeout_elapsed(&self) -> Option<Duration> {
        self.elapsed
    }

    /// Returns the member errors of an `Aggregate`-kind error.
    #[must_use]
    pub fn aggregate_errors(&self) -> &[Self] {
        &self.related
    }

    /// Adds deterministic context text to the error.
    #[must_use]
    pub fn with_context(mut self, ctx: impl Into<String>) -> Self {
        self.context = Some(ctx.into());
        self
    }

    /// Adds a source error to the chain.
    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Arc::new(source));
        self
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.kind)?;
        if let Some(d) = self.elapsed {
            write!(f, "({:?})", d)?;
        }
        if self.kind == ErrorKind::Aggregate {
            write!(f, "({} errors)", self.related.len())?;
        }
        if let Some(ctx) = &self.context {
            write!(f, ": {ctx}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|e| e.as_ref() as _)
    }
}

/// Extension trait for adding context to Results.
pub trait ResultExt<T> {
    /// Attach a context string on error.
    fn context(self, ctx: impl Into<String>) -> Result<T>;
    /// Attach context computed lazily on error.
    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T>;
}

impl<T, E: Into<Error>> ResultExt<T> for core::result::Result<T, E> {
    fn context(self, ctx: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.into().with_context(ctx))
    }

    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T> {
        self.map_err(|e| e.into().with_context(f()))
    }
}

/// A specialized Result type for Filament operations.
pub type Result<T> = core::result::Result<T, Error>;
