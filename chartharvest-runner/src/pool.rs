//! Session pool: one exclusively owned chart session per worker.
//!
//! Sessions are heavyweight and not shareable, so the pool hands each worker
//! a `&mut Session` for the whole run and never re-pools mid-run. Every
//! session is closed exactly once: by [`SessionPool::release_all`] on the
//! normal path, or by `Drop` when a run unwinds early.

use std::slice::IterMut;

use chartharvest_core::{ChartSession, SessionError};
use tracing::{debug, error};

use crate::HarvestError;

/// Authentication state of a pooled session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unauthenticated,
    Authenticated,
    /// Terminal: login was rejected or retries ran out.
    Failed,
}

/// A pooled chart session plus its authentication state.
pub struct Session<S: ChartSession> {
    id: usize,
    inner: Option<S>,
    state: SessionState,
}

impl<S: ChartSession> Session<S> {
    fn new(id: usize, inner: S) -> Self {
        Self {
            id,
            inner: Some(inner),
            state: SessionState::Unauthenticated,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_authenticated(&self) -> bool {
        self.state == SessionState::Authenticated
    }

    pub fn is_released(&self) -> bool {
        self.inner.is_none()
    }

    pub(crate) fn set_state(&mut self, state: SessionState) {
        self.state = state;
    }

    /// The underlying session, or `Closed` once released.
    pub fn handle(&mut self) -> Result<&mut S, SessionError> {
        self.inner.as_mut().ok_or(SessionError::Closed)
    }

    /// Close the underlying session. Idempotent.
    pub fn release(&mut self) {
        if let Some(mut inner) = self.inner.take() {
            inner.close();
            debug!(session = self.id, "session released");
        }
    }
}

impl<S: ChartSession> Drop for Session<S> {
    fn drop(&mut self) {
        self.release();
    }
}

/// Owns the run's sessions from construction until release.
pub struct SessionPool<S: ChartSession> {
    sessions: Vec<Session<S>>,
}

impl<S: ChartSession> SessionPool<S> {
    /// Construct `n` fresh, unauthenticated sessions.
    ///
    /// If any construction fails, the sessions built so far are released and
    /// the whole acquisition fails.
    pub fn acquire<F>(n: usize, mut factory: F) -> Result<Self, HarvestError>
    where
        F: FnMut(usize) -> Result<S, SessionError>,
    {
        let mut sessions = Vec::with_capacity(n);
        for id in 0..n {
            match factory(id) {
                Ok(inner) => sessions.push(Session::new(id, inner)),
                Err(source) => {
                    error!(session = id, error = %source, "failed to construct session");
                    // `sessions` drops here, closing what was already built.
                    return Err(HarvestError::SessionConstruction { index: id, source });
                }
            }
        }
        debug!(sessions = n, "session pool acquired");
        Ok(Self { sessions })
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn sessions(&self) -> &[Session<S>] {
        &self.sessions
    }

    /// Exclusive access to every session, one per worker.
    pub fn sessions_mut(&mut self) -> IterMut<'_, Session<S>> {
        self.sessions.iter_mut()
    }

    /// Close every session and tear the pool down.
    pub fn release_all(mut self) {
        for session in &mut self.sessions {
            session.release();
        }
        debug!(sessions = self.sessions.len(), "session pool released");
    }
}
