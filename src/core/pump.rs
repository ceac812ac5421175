//! Pump worker: the loop that copies a source into a sink
//!
//! The worker owns its source, sink and scratch buffer while it runs. When
//! the loop ends, for whatever reason, both streams are parked in
//! [`PumpShared`] so the pipe handle (or a closing watcher) can take them.

use crate::core::PumpControl;
use crate::progress::PumpStats;
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Streams handed back by a finished worker
#[derive(Debug)]
struct Parts<R, W> {
    source: Option<R>,
    sink: Option<W>,
}

/// State shared between a pipe handle, its worker and any watcher
#[derive(Debug)]
pub(crate) struct PumpShared<R, W> {
    pub(crate) control: Arc<PumpControl>,
    pub(crate) stats: Arc<PumpStats>,
    parts: Mutex<Parts<R, W>>,
}

impl<R, W> PumpShared<R, W> {
    pub(crate) fn new() -> Self {
        Self {
            control: Arc::new(PumpControl::new()),
            stats: Arc::new(PumpStats::new()),
            parts: Mutex::new(Parts {
                source: None,
                sink: None,
            }),
        }
    }

    fn parts(&self) -> MutexGuard<'_, Parts<R, W>> {
        self.parts.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn store_parts(&self, source: R, sink: W) {
        let mut parts = self.parts();
        parts.source = Some(source);
        parts.sink = Some(sink);
    }

    pub(crate) fn take_source(&self) -> Option<R> {
        self.parts().source.take()
    }

    pub(crate) fn take_sink(&self) -> Option<W> {
        self.parts().sink.take()
    }
}

/// Marks the worker finished even if the source or sink panics
struct FinishGuard<'a, R, W>(&'a PumpShared<R, W>);

impl<R, W> Drop for FinishGuard<'_, R, W> {
    fn drop(&mut self) {
        self.0.control.mark_finished();
    }
}

/// Why a worker loop ended
#[derive(Debug)]
pub(crate) enum PumpExit {
    /// Source reported end of data
    Exhausted,
    /// Pipe was stopped
    Stopped,
    /// Read from the source failed
    ReadFailed(io::Error),
    /// Write to the sink failed
    WriteFailed(io::Error),
}

/// A worker's owned resources
pub(crate) struct PumpCore<R, W> {
    source: R,
    sink: W,
    buffer: Box<[u8]>,
    shared: Arc<PumpShared<R, W>>,
}

impl<R: Read, W: Write> PumpCore<R, W> {
    /// Allocate the scratch buffer once, up front
    pub(crate) fn new(source: R, sink: W, buffer_size: usize, shared: Arc<PumpShared<R, W>>) -> Self {
        Self {
            source,
            sink,
            buffer: vec![0u8; buffer_size].into_boxed_slice(),
            shared,
        }
    }

    /// Run the worker loop to completion, then hand back source and sink
    pub(crate) fn run(self) {
        let Self {
            mut source,
            mut sink,
            mut buffer,
            shared,
        } = self;
        let _finished = FinishGuard(&shared);

        tracing::trace!(capacity = buffer.len(), "pump worker starting");
        let exit = pump_loop(&mut source, &mut sink, &mut buffer, &shared);
        match &exit {
            PumpExit::Exhausted | PumpExit::Stopped => {
                tracing::trace!(?exit, bytes = shared.stats.bytes_copied(), "pump worker exiting");
            }
            PumpExit::ReadFailed(e) | PumpExit::WriteFailed(e) => {
                tracing::debug!(error = %e, ?exit, "pump worker stopped early");
            }
        }

        shared.store_parts(source, sink);
    }
}

/// The copy loop: wait for permission, read once, write what was read.
fn pump_loop<R: Read, W: Write, SR, SW>(
    source: &mut R,
    sink: &mut W,
    buffer: &mut [u8],
    shared: &PumpShared<SR, SW>,
) -> PumpExit {
    loop {
        if !shared.control.wait_until_running() {
            return PumpExit::Stopped;
        }

        let count = loop {
            match source.read(buffer) {
                Ok(n) => break n,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return PumpExit::ReadFailed(e),
            }
        };
        if count == 0 {
            return PumpExit::Exhausted;
        }

        if let Err(e) = sink.write_all(&buffer[..count]).and_then(|()| sink.flush()) {
            return PumpExit::WriteFailed(e);
        }
        shared.stats.record_chunk(count);
    }
}
