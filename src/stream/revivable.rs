//! Revivable source: a blocking byte source whose reads can be abandoned
//!
//! A look-ahead thread reads one byte at a time from the wrapped source and
//! parks it in a single slot. Consumers read from the slot, so a consumer
//! can be released with [`RevivableSource::kill`] even while the look-ahead
//! thread is stuck in a read that nothing can interrupt. Killing never
//! touches the underlying source, and [`RevivableSource::resurrect`] lets
//! reading continue where the look-ahead thread left off; a byte fetched
//! while killed is delivered after resurrection.
//!
//! [`RevivableSource::close`] is terminal. The wrapped source itself is
//! owned by the look-ahead thread, which may be blocked inside a read; it
//! is dropped as soon as that read returns.

use crate::error::{PipeError, Result};
use std::io::{self, Read};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

static NEXT_READER_ID: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Default)]
struct SlotState {
    killed: bool,
    source_closed: bool,
    slot: Option<u8>,
    reader_fault: Option<io::Error>,
    fault_reported: bool,
    /// Closed or dropped; the reader should exit and reads see end of data
    abandoned: bool,
}

#[derive(Debug, Default)]
struct SlotShared {
    state: Mutex<SlotState>,
    cond: Condvar,
}

impl SlotShared {
    fn lock(&self) -> MutexGuard<'_, SlotState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wait<'a>(&self, guard: MutexGuard<'a, SlotState>) -> MutexGuard<'a, SlotState> {
        self.cond.wait(guard).unwrap_or_else(PoisonError::into_inner)
    }

    fn kill(&self) {
        self.lock().killed = true;
        self.cond.notify_all();
    }

    fn resurrect(&self) {
        self.lock().killed = false;
        self.cond.notify_all();
    }

    fn close(&self) {
        let mut state = self.lock();
        state.abandoned = true;
        state.slot = None;
        self.cond.notify_all();
    }

    /// Take the next byte, or `None` at end of data or while killed.
    fn next(&self, deadline: Option<Instant>) -> io::Result<Option<u8>> {
        let mut state = self.lock();
        loop {
            if state.abandoned {
                return Ok(None);
            }
            if let Some(fault) = state.reader_fault.take() {
                state.fault_reported = true;
                return Err(fault);
            }
            if state.killed {
                return Ok(None);
            }
            if let Some(byte) = state.slot.take() {
                self.cond.notify_all();
                return Ok(Some(byte));
            }
            if state.source_closed || state.fault_reported {
                return Ok(None);
            }

            state = match deadline {
                None => self.wait(state),
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return Err(io::Error::new(io::ErrorKind::TimedOut, "no data before deadline"));
                    }
                    self.cond
                        .wait_timeout(state, remaining)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
            };
        }
    }
}

/// Look-ahead loop: fetch one byte, publish it, wait until it is taken.
fn look_ahead<R: Read>(mut source: R, shared: &SlotShared) {
    let mut byte = [0u8; 1];
    loop {
        let outcome = loop {
            match source.read(&mut byte) {
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                other => break other,
            }
        };

        let mut state = shared.lock();
        if state.abandoned {
            tracing::trace!("revivable source closed, releasing reader");
            return;
        }
        match outcome {
            Ok(0) => {
                tracing::trace!("revivable source reached end of data");
                state.source_closed = true;
                shared.cond.notify_all();
                return;
            }
            Ok(_) => {
                state.slot = Some(byte[0]);
                shared.cond.notify_all();
                while state.slot.is_some() && !state.abandoned {
                    state = shared.wait(state);
                }
                if state.abandoned {
                    return;
                }
            }
            Err(e) => {
                tracing::debug!(error = %e, "revivable source read failed");
                state.reader_fault = Some(e);
                shared.cond.notify_all();
                return;
            }
        }
    }
}

/// Blocking byte source that can be killed and resurrected
///
/// Implements [`Read`], handing out at most one byte per call, so it can
/// feed a [`Pipe`](crate::core::Pipe) directly.
#[derive(Debug)]
pub struct RevivableSource {
    shared: Arc<SlotShared>,
}

impl RevivableSource {
    /// Wrap `source` and start its look-ahead thread
    pub fn new<R>(source: R) -> Result<Self>
    where
        R: Read + Send + 'static,
    {
        let shared = Arc::new(SlotShared::default());
        let name = format!("revivable-{}", NEXT_READER_ID.fetch_add(1, Ordering::Relaxed));

        let reader_shared = Arc::clone(&shared);
        thread::Builder::new()
            .name(name.clone())
            .spawn(move || look_ahead(source, &reader_shared))
            .map_err(|e| PipeError::spawn(name, e))?;

        Ok(Self { shared })
    }

    /// Read one byte.
    ///
    /// Blocks until a byte is available, the source ends, a deferred read
    /// failure is pending, or the source is killed. Returns `Ok(None)` at
    /// end of data and while killed. A read failure in the look-ahead
    /// thread is returned once; every read after it reports end of data.
    pub fn read_unit(&self) -> io::Result<Option<u8>> {
        self.shared.next(None)
    }

    /// Like [`RevivableSource::read_unit`], but fails with
    /// [`io::ErrorKind::TimedOut`] if nothing happens within `timeout`
    pub fn read_timeout(&self, timeout: Duration) -> io::Result<Option<u8>> {
        self.shared.next(Some(Instant::now() + timeout))
    }

    /// Release every blocked reader with end of data until `resurrect`
    pub fn kill(&self) {
        self.shared.kill();
    }

    /// Allow reads to return data again
    pub fn resurrect(&self) {
        self.shared.resurrect();
    }

    /// Whether the source is currently killed
    pub fn is_killed(&self) -> bool {
        self.shared.lock().killed
    }

    /// Close for good: every blocked and future read returns end of data,
    /// and `resurrect` no longer helps. Any unread byte is discarded.
    pub fn close(&self) {
        self.shared.close();
    }

    /// A cloneable handle for killing and resurrecting from other threads
    pub fn kill_switch(&self) -> KillSwitch {
        KillSwitch {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl Read for RevivableSource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        match self.read_unit()? {
            Some(byte) => {
                buf[0] = byte;
                Ok(1)
            }
            None => Ok(0),
        }
    }
}

impl Drop for RevivableSource {
    fn drop(&mut self) {
        // The look-ahead thread leaves once its current read returns
        self.shared.close();
    }
}

/// Kills or resurrects a [`RevivableSource`] from another thread
#[derive(Debug, Clone)]
pub struct KillSwitch {
    shared: Arc<SlotShared>,
}

impl KillSwitch {
    /// See [`RevivableSource::kill`]
    pub fn kill(&self) {
        self.shared.kill();
    }

    /// See [`RevivableSource::resurrect`]
    pub fn resurrect(&self) {
        self.shared.resurrect();
    }

    /// See [`RevivableSource::is_killed`]
    pub fn is_killed(&self) -> bool {
        self.shared.lock().killed
    }

    /// See [`RevivableSource::close`]
    pub fn close(&self) {
        self.shared.close();
    }
}
