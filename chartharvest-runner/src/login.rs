//! Login coordinator: authenticates pooled sessions with bounded retries.
//!
//! Recoverable failures (timeouts, navigation errors) are retried up to
//! `max_retries` more times with exponential backoff. Rejection, or running
//! out of retries, moves the session to `Failed`. Either way the outcome is
//! reported, never raised: a failed session only costs its own slice.

use std::thread;
use std::time::Duration;

use chartharvest_core::{ChartSession, Credentials, SessionError};
use tracing::{error, info, warn};

use crate::pool::{Session, SessionState};

/// Terminal authentication result for one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOutcome {
    pub session: usize,
    pub state: SessionState,
    /// Login attempts made, including the first.
    pub attempts: u32,
    /// The last error seen, if the session ended up `Failed`.
    pub error: Option<SessionError>,
}

#[derive(Debug, Clone)]
pub struct LoginCoordinator {
    credentials: Credentials,
    max_retries: u32,
    base_delay: Duration,
}

impl LoginCoordinator {
    pub fn new(credentials: Credentials, max_retries: u32, base_delay: Duration) -> Self {
        Self {
            credentials,
            max_retries,
            base_delay,
        }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Drive `session` to a terminal state: `Authenticated` or `Failed`.
    pub fn authenticate<S: ChartSession>(&self, session: &mut Session<S>) -> SessionOutcome {
        let id = session.id();
        let mut last_error = None;
        let mut attempts = 0;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = self.base_delay.saturating_mul(2u32.saturating_pow(attempt - 1));
                thread::sleep(delay);
            }
            attempts += 1;

            let result = session
                .handle()
                .and_then(|inner| inner.login(&self.credentials));

            match result {
                Ok(()) => {
                    session.set_state(SessionState::Authenticated);
                    info!(session = id, attempts, "session authenticated");
                    return SessionOutcome {
                        session: id,
                        state: SessionState::Authenticated,
                        attempts,
                        error: None,
                    };
                }
                Err(e) if e.is_recoverable() && attempt < self.max_retries => {
                    warn!(
                        session = id,
                        attempt = attempt + 1,
                        error = %e,
                        "login did not complete; retrying"
                    );
                    last_error = Some(e);
                }
                Err(e) => {
                    last_error = Some(e);
                    break;
                }
            }
        }

        session.set_state(SessionState::Failed);
        error!(
            session = id,
            attempts,
            error = ?last_error,
            "could not authenticate session; its slice will be skipped"
        );
        SessionOutcome {
            session: id,
            state: SessionState::Failed,
            attempts,
            error: last_error,
        }
    }
}
