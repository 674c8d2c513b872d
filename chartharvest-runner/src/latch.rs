//! Count-down latch gating worker start-up on session authentication.
//!
//! Each worker takes an [`Arrival`] before logging in. Arriving counts the
//! latch down and blocks until every worker has arrived. An arrival that is
//! dropped without arriving (a worker that unwinds mid-login) still counts
//! down, so one failed login can never strand the others at the gate.

use std::sync::{Condvar, Mutex, PoisonError};

#[derive(Debug)]
pub struct CountDownLatch {
    remaining: Mutex<usize>,
    released: Condvar,
}

impl CountDownLatch {
    pub fn new(count: usize) -> Self {
        Self {
            remaining: Mutex::new(count),
            released: Condvar::new(),
        }
    }

    pub fn remaining(&self) -> usize {
        *self.remaining.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn count_down(&self) {
        let mut remaining = self.remaining.lock().unwrap_or_else(PoisonError::into_inner);
        if *remaining > 0 {
            *remaining -= 1;
            if *remaining == 0 {
                self.released.notify_all();
            }
        }
    }

    /// Block until the count reaches zero.
    pub fn wait(&self) {
        let mut remaining = self.remaining.lock().unwrap_or_else(PoisonError::into_inner);
        while *remaining > 0 {
            remaining = self
                .released
                .wait(remaining)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Register one participant. See [`Arrival`].
    pub fn arrival(&self) -> Arrival<'_> {
        Arrival {
            latch: self,
            arrived: false,
        }
    }
}

/// One participant's pending arrival at a [`CountDownLatch`].
#[must_use = "an unused arrival counts down immediately"]
pub struct Arrival<'a> {
    latch: &'a CountDownLatch,
    arrived: bool,
}

impl Arrival<'_> {
    /// Count down and wait for every other participant.
    pub fn arrive_and_wait(mut self) {
        self.arrived = true;
        self.latch.count_down();
        self.latch.wait();
    }
}

impl Drop for Arrival<'_> {
    fn drop(&mut self) {
        if !self.arrived {
            self.latch.count_down();
        }
    }
}
