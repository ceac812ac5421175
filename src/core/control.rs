//! Pump control state shared by a caller and a pump worker
//!
//! One mutex guards the flags and one condition variable carries every
//! wakeup: the worker waiting to run, callers waiting for the worker to
//! park, and joiners waiting for it to finish. Waits are predicate loops,
//! so spurious or interrupted wakeups simply re-check the flags.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Observable state of a pipe's control record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipeState {
    /// Constructed, never started
    New,
    /// Copying is enabled
    Running,
    /// Copying is disabled until the next start
    Paused,
    /// Terminal; the worker exits at its next safe point
    Stopped,
}

#[derive(Debug, Default)]
struct ControlState {
    running: bool,
    stopped: bool,
    started: bool,
    /// Worker sits at the paused wait point
    parked: bool,
    /// Worker has left its loop and handed back its parts
    finished: bool,
}

/// Mutex/condvar pair owned jointly by a pipe handle and its worker
#[derive(Debug, Default)]
pub struct PumpControl {
    state: Mutex<ControlState>,
    cond: Condvar,
}

impl PumpControl {
    /// Create a control record in the `New` state
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ControlState> {
        // Plain flags stay consistent even if a holder panicked
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wait<'a>(&self, guard: MutexGuard<'a, ControlState>) -> MutexGuard<'a, ControlState> {
        self.cond.wait(guard).unwrap_or_else(PoisonError::into_inner)
    }

    /// Enable copying. No-op once stopped.
    pub fn start(&self) {
        let mut state = self.lock();
        if state.stopped || state.running {
            return;
        }
        state.running = true;
        state.started = true;
        self.cond.notify_all();
    }

    /// Disable copying.
    ///
    /// With `block`, returns only once the worker is parked or gone, so no
    /// write can happen after this call until the next `start`. On a
    /// stopped pipe a blocking pause waits for the worker to finish.
    pub fn pause(&self, block: bool) {
        let mut state = self.lock();
        if state.stopped {
            drop(state);
            if block {
                self.join();
            }
            return;
        }

        state.running = false;
        self.cond.notify_all();

        if block {
            while !state.parked && !state.finished {
                state = self.wait(state);
            }
        }
    }

    /// Stop the pipe permanently. With `block`, waits for the worker to exit.
    pub fn stop(&self, block: bool) {
        {
            let mut state = self.lock();
            if !state.stopped {
                state.running = false;
                state.stopped = true;
                self.cond.notify_all();
            }
        }
        if block {
            self.join();
        }
    }

    /// Block until the worker has exited
    pub fn join(&self) {
        let mut state = self.lock();
        while !state.finished {
            state = self.wait(state);
        }
    }

    /// Block until the worker has exited or `timeout` elapses.
    /// Returns whether the worker finished.
    pub fn join_timeout(&self, timeout: Duration) -> bool {
        let state = self.lock();
        let (state, _) = self
            .cond
            .wait_timeout_while(state, timeout, |s| !s.finished)
            .unwrap_or_else(PoisonError::into_inner);
        state.finished
    }

    /// Current control state
    pub fn state(&self) -> PipeState {
        let state = self.lock();
        if state.stopped {
            PipeState::Stopped
        } else if state.running {
            PipeState::Running
        } else if state.started {
            PipeState::Paused
        } else {
            PipeState::New
        }
    }

    /// Whether the worker has exited
    pub fn is_finished(&self) -> bool {
        self.lock().finished
    }

    /// Worker side: wait until copying is enabled.
    ///
    /// Returns `false` when the pipe was stopped and the worker should exit.
    pub(crate) fn wait_until_running(&self) -> bool {
        let mut state = self.lock();
        loop {
            if state.running {
                state.parked = false;
                return true;
            }
            if state.stopped {
                state.parked = false;
                return false;
            }
            if !state.parked {
                state.parked = true;
                self.cond.notify_all();
            }
            state = self.wait(state);
        }
    }

    /// Worker side: record that the worker loop has exited
    pub(crate) fn mark_finished(&self) {
        let mut state = self.lock();
        state.parked = false;
        state.finished = true;
        self.cond.notify_all();
    }
}
