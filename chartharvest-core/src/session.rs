//! Chart session contract: the browsing context that logs in and fetches snapshots.
//!
//! Concrete sessions drive a real chart site (browser automation, HTTP) or
//! replay captured snapshots from disk ([`crate::replay::ReplaySession`]).
//! The harvest engine only sees this trait and its typed outcomes.

use std::fmt;

use chrono::NaiveDate;
use thiserror::Error;

use crate::domain::{ChartKind, RawBlob};

/// Account credentials used to authenticate a session.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    username: String,
    password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn password(&self) -> &str {
        &self.password
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Typed failures surfaced by a session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("timed out: {0}")]
    Timeout(String),

    #[error("navigation failed: {0}")]
    Navigation(String),

    #[error("rejected: {0}")]
    Rejected(String),

    #[error("session is closed")]
    Closed,
}

impl SessionError {
    /// Timeouts and navigation errors are worth retrying or skipping past;
    /// rejection and a closed session are not.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, SessionError::Timeout(_) | SessionError::Navigation(_))
    }
}

/// An exclusive browsing context against the chart source.
///
/// Implementations are used by one worker thread at a time and are never
/// shared, so they only need to be `Send`.
pub trait ChartSession: Send {
    /// Authenticate this context.
    fn login(&mut self, credentials: &Credentials) -> Result<(), SessionError>;

    /// Fetch the raw text of one chart snapshot.
    fn fetch_blob(
        &mut self,
        date: NaiveDate,
        region: &str,
        kind: ChartKind,
    ) -> Result<RawBlob, SessionError>;

    /// Release the underlying resources. Called exactly once by the pool.
    fn close(&mut self) {}
}
