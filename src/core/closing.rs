//! ClosingPipe: a pipe that closes its sink once pumping is over
//!
//! A watcher thread waits for the pump worker to exit, whether the source
//! ran dry or the pipe was stopped, then closes the sink exactly once. This
//! is how a child process's stdin gets closed when upstream data runs out,
//! without the caller tracking completion.

use crate::config::PipeConfig;
use crate::core::{Pipe, PipeController, PipeState};
use crate::error::{PipeError, Result};
use crate::progress::PumpStats;
use std::io::{self, Read, Write};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Operation that closes a sink; failures are logged and dropped
pub type Closer<W> = Box<dyn FnOnce(W) -> io::Result<()> + Send>;

/// Flush, then drop (which releases the underlying handle)
fn flush_and_drop<W: Write>(mut sink: W) -> io::Result<()> {
    sink.flush()
}

#[derive(Debug, Default)]
struct CloseLatch {
    closed: Mutex<bool>,
    cond: Condvar,
}

impl CloseLatch {
    fn lock(&self) -> MutexGuard<'_, bool> {
        self.closed.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn release(&self) {
        *self.lock() = true;
        self.cond.notify_all();
    }

    fn wait(&self) {
        let mut closed = self.lock();
        while !*closed {
            closed = self.cond.wait(closed).unwrap_or_else(PoisonError::into_inner);
        }
    }

    fn wait_timeout(&self, timeout: Duration) -> bool {
        let closed = self.lock();
        let (closed, _) = self
            .cond
            .wait_timeout_while(closed, timeout, |closed| !*closed)
            .unwrap_or_else(PoisonError::into_inner);
        *closed
    }
}

/// Releases the latch even if the closer panics
struct ReleaseOnDrop(Arc<CloseLatch>);

impl Drop for ReleaseOnDrop {
    fn drop(&mut self) {
        self.0.release();
    }
}

/// A [`Pipe`] whose sink is closed after the pump finishes
pub struct ClosingPipe<R, W> {
    pipe: Pipe<R, W>,
    latch: Arc<CloseLatch>,
    _watcher: JoinHandle<()>,
}

impl<R, W> ClosingPipe<R, W>
where
    R: Read + Send + 'static,
    W: Write + Send + 'static,
{
    /// Create a closing pipe with the default buffer size
    pub fn new(source: R, sink: W) -> Result<Self> {
        Self::with_config(source, sink, &PipeConfig::default())
    }

    /// Create a closing pipe with a `buffer_size`-byte scratch buffer
    pub fn with_buffer_size(source: R, sink: W, buffer_size: usize) -> Result<Self> {
        let config = PipeConfig {
            buffer_size,
            ..Default::default()
        };
        Self::with_config(source, sink, &config)
    }

    /// Create a closing pipe from a [`PipeConfig`]; the sink is flushed and
    /// dropped when pumping ends
    pub fn with_config(source: R, sink: W, config: &PipeConfig) -> Result<Self> {
        Self::with_closer(source, sink, config, Box::new(flush_and_drop::<W>))
    }

    /// Create a closing pipe that finishes the sink with `closer`
    pub fn with_closer(source: R, sink: W, config: &PipeConfig, closer: Closer<W>) -> Result<Self> {
        let pipe = Pipe::with_config(source, sink, config)?;
        let latch = Arc::new(CloseLatch::default());

        let name = format!("{}-closer", pipe.thread_name().unwrap_or("pipe"));
        let shared = Arc::clone(&pipe.shared);
        let release = ReleaseOnDrop(Arc::clone(&latch));
        let watcher = thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                let _release = release;
                shared.control.join();
                if let Some(sink) = shared.take_sink() {
                    match closer(sink) {
                        Ok(()) => tracing::trace!("sink closed"),
                        Err(e) => tracing::debug!(error = %e, "closing sink failed"),
                    }
                }
            })
            .map_err(|e| PipeError::spawn(name, e))?;

        Ok(Self {
            pipe,
            latch,
            _watcher: watcher,
        })
    }
}

impl<R, W> ClosingPipe<R, W> {
    /// See [`Pipe::start`]
    pub fn start(&self) {
        self.pipe.start();
    }

    /// See [`Pipe::pause`]
    pub fn pause(&self, block: bool) {
        self.pipe.pause(block);
    }

    /// Stop the pipe for good. With `block`, same as [`ClosingPipe::join`].
    pub fn stop(&self, block: bool) {
        self.pipe.stop(false);
        if block {
            self.join();
        }
    }

    /// Wait for the pump to exit and the sink to be closed
    pub fn join(&self) {
        self.pipe.join();
        self.latch.wait();
    }

    /// Like [`ClosingPipe::join`] but gives up after `timeout`
    pub fn join_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        if !self.pipe.join_timeout(timeout) {
            return false;
        }
        self.latch
            .wait_timeout(deadline.saturating_duration_since(Instant::now()))
    }

    /// Whether the sink has been closed
    pub fn is_closed(&self) -> bool {
        *self.latch.lock()
    }

    /// See [`Pipe::state`]
    pub fn state(&self) -> PipeState {
        self.pipe.state()
    }

    /// Whether the pump worker has exited (the close may still be pending)
    pub fn is_finished(&self) -> bool {
        self.pipe.is_finished()
    }

    /// See [`Pipe::stats`]
    pub fn stats(&self) -> Arc<PumpStats> {
        self.pipe.stats()
    }

    /// See [`Pipe::controller`]
    pub fn controller(&self) -> PipeController {
        self.pipe.controller()
    }

    /// Wait for completion and take back the source
    pub fn into_source(self) -> Option<R> {
        self.join();
        self.pipe.shared.take_source()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Records its contents and counts how often it was dropped
    struct CloseCheckingSink {
        data: Arc<Mutex<Vec<u8>>>,
        drops: Arc<AtomicUsize>,
    }

    impl Write for CloseCheckingSink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.data.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Drop for CloseCheckingSink {
        fn drop(&mut self) {
            self.drops.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn checking_sink() -> (CloseCheckingSink, Arc<Mutex<Vec<u8>>>, Arc<AtomicUsize>) {
        let data = Arc::new(Mutex::new(Vec::new()));
        let drops = Arc::new(AtomicUsize::new(0));
        let sink = CloseCheckingSink {
            data: Arc::clone(&data),
            drops: Arc::clone(&drops),
        };
        (sink, data, drops)
    }

    #[test]
    fn test_closes_sink_after_source_drained() {
        let input: Vec<u8> = (0..4023u32).map(|i| (i % 251) as u8).collect();
        let (sink, data, drops) = checking_sink();

        let pipe = ClosingPipe::new(Cursor::new(input.clone()), sink).unwrap();
        pipe.start();
        pipe.join();

        assert!(pipe.is_closed());
        assert_eq!(drops.load(Ordering::SeqCst), 1);
        assert_eq!(*data.lock().unwrap(), input);
    }

    #[test]
    fn test_plain_pipe_keeps_sink_open() {
        let (sink, _data, drops) = checking_sink();

        let pipe = Pipe::new(Cursor::new(b"abc".to_vec()), sink).unwrap();
        pipe.start();
        let (_, sink) = pipe.into_inner().unwrap();

        assert_eq!(drops.load(Ordering::SeqCst), 0);
        drop(sink);
    }

    #[test]
    fn test_closer_runs_once_under_concurrent_joins() {
        let calls = Arc::new(AtomicUsize::new(0));
        let closer: Closer<Vec<u8>> = {
            let calls = Arc::clone(&calls);
            Box::new(move |_sink| {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        };

        let pipe = Arc::new(
            ClosingPipe::with_closer(Cursor::new(vec![5u8; 10_000]), Vec::new(), &PipeConfig::default(), closer)
                .unwrap(),
        );
        let joiners: Vec<_> = (0..8)
            .map(|_| {
                let pipe = Arc::clone(&pipe);
                thread::spawn(move || pipe.join())
            })
            .collect();

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        pipe.start();
        for joiner in joiners {
            joiner.join().unwrap();
        }
        pipe.join();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_stop_closes_sink() {
        let (sink, data, drops) = checking_sink();

        let pipe = ClosingPipe::new(Cursor::new(b"never copied".to_vec()), sink).unwrap();
        assert!(!pipe.join_timeout(Duration::from_millis(20)));
        assert!(!pipe.is_closed());

        pipe.stop(true);
        assert!(pipe.is_closed());
        assert_eq!(drops.load(Ordering::SeqCst), 1);
        assert!(data.lock().unwrap().is_empty());
    }

    #[test]
    fn test_close_failure_is_swallowed() {
        let closer: Closer<Vec<u8>> =
            Box::new(|_| Err(io::Error::new(io::ErrorKind::Other, "already closed")));

        let pipe = ClosingPipe::with_closer(Cursor::new(b"x".to_vec()), Vec::new(), &PipeConfig::default(), closer)
            .unwrap();
        pipe.start();
        assert!(pipe.join_timeout(Duration::from_secs(5)));
        assert!(pipe.is_closed());
    }

    #[test]
    fn test_into_source_returns_drained_source() {
        let pipe = ClosingPipe::with_buffer_size(Cursor::new(b"hello world".to_vec()), Vec::new(), 4).unwrap();
        pipe.start();

        let source = pipe.into_source().unwrap();
        assert_eq!(source.position(), 11);
    }
}
