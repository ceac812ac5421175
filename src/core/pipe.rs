//! Pipe: a handle to one pump worker thread
//!
//! A pipe copies everything its source produces into its sink on a
//! dedicated thread, once started, until it is stopped or the source is
//! exhausted. It never closes either stream; [`Pipe::into_inner`] returns
//! both once the worker is done.

use crate::config::PipeConfig;
use crate::core::pump::{PumpCore, PumpShared};
use crate::core::{PipeState, PumpControl};
use crate::error::{PipeError, Result};
use crate::progress::PumpStats;
use std::io::{Read, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Scratch buffer size used when none is given
pub const DEFAULT_BUFFER_SIZE: usize = 1024;

static NEXT_PIPE_ID: AtomicU64 = AtomicU64::new(0);

/// A background pump from `R` to `W`
///
/// Dropping a pipe stops it (without blocking) unless it was detached.
pub struct Pipe<R, W> {
    pub(crate) shared: Arc<PumpShared<R, W>>,
    worker: Option<JoinHandle<()>>,
    stop_on_drop: bool,
}

impl<R, W> Pipe<R, W>
where
    R: Read + Send + 'static,
    W: Write + Send + 'static,
{
    /// Create a pipe with the default buffer size. Copying begins at `start`.
    pub fn new(source: R, sink: W) -> Result<Self> {
        Self::with_config(source, sink, &PipeConfig::default())
    }

    /// Create a pipe with a `buffer_size`-byte scratch buffer
    pub fn with_buffer_size(source: R, sink: W, buffer_size: usize) -> Result<Self> {
        let config = PipeConfig {
            buffer_size,
            ..Default::default()
        };
        Self::with_config(source, sink, &config)
    }

    /// Create a pipe from a [`PipeConfig`]
    pub fn with_config(source: R, sink: W, config: &PipeConfig) -> Result<Self> {
        config.validate()?;

        let shared = Arc::new(PumpShared::new());
        let core = PumpCore::new(source, sink, config.buffer_size, Arc::clone(&shared));

        let name = config
            .thread_name
            .clone()
            .unwrap_or_else(|| format!("pipe-{}", NEXT_PIPE_ID.fetch_add(1, Ordering::Relaxed)));
        let worker = thread::Builder::new()
            .name(name.clone())
            .spawn(move || core.run())
            .map_err(|e| PipeError::spawn(name, e))?;

        Ok(Self {
            shared,
            worker: Some(worker),
            stop_on_drop: true,
        })
    }
}

impl<R, W> Pipe<R, W> {
    /// Start or resume copying. No-op after `stop`.
    pub fn start(&self) {
        self.shared.control.start();
    }

    /// Pause copying.
    ///
    /// With `block`, no byte reaches the sink after this returns until the
    /// next `start`. An in-flight read/write pair is always completed first,
    /// so a worker stuck in a blocking read keeps this call waiting.
    pub fn pause(&self, block: bool) {
        self.shared.control.pause(block);
    }

    /// Stop the pipe for good. With `block`, same as [`Pipe::join`].
    pub fn stop(&self, block: bool) {
        self.shared.control.stop(block);
    }

    /// Wait for the worker to exit: source exhausted, sink failed, or stopped
    pub fn join(&self) {
        self.shared.control.join();
    }

    /// Like [`Pipe::join`] but gives up after `timeout`; returns whether the
    /// worker has exited
    pub fn join_timeout(&self, timeout: Duration) -> bool {
        self.shared.control.join_timeout(timeout)
    }

    /// Current control state
    pub fn state(&self) -> PipeState {
        self.shared.control.state()
    }

    /// Whether the worker has exited
    pub fn is_finished(&self) -> bool {
        self.shared.control.is_finished()
    }

    /// Transfer counters for this pipe
    pub fn stats(&self) -> Arc<PumpStats> {
        Arc::clone(&self.shared.stats)
    }

    /// A cloneable handle that controls this pipe from other threads
    pub fn controller(&self) -> PipeController {
        PipeController {
            control: Arc::clone(&self.shared.control),
        }
    }

    /// Wait for the worker to exit and take back the source and sink.
    ///
    /// A pipe that was never started is stopped first. A paused pipe has to
    /// be started or stopped by someone else, or this blocks for good.
    /// Returns `None` if the worker panicked inside the source or sink.
    pub fn into_inner(mut self) -> Option<(R, W)> {
        if self.state() == PipeState::New {
            self.stop(false);
        }
        self.join();
        self.reap();
        let source = self.shared.take_source()?;
        let sink = self.shared.take_sink()?;
        Some((source, sink))
    }

    /// Release the handle and let the worker run on its own
    pub fn detach(mut self) {
        self.stop_on_drop = false;
    }

    pub(crate) fn thread_name(&self) -> Option<&str> {
        self.worker.as_ref().and_then(|worker| worker.thread().name())
    }

    fn reap(&mut self) {
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::debug!("pump worker panicked");
            }
        }
    }
}

impl<R, W> Drop for Pipe<R, W> {
    fn drop(&mut self) {
        if self.stop_on_drop {
            self.shared.control.stop(false);
        }
    }
}

/// Cloneable remote control for a [`Pipe`], e.g. for signal handlers
#[derive(Clone)]
pub struct PipeController {
    control: Arc<PumpControl>,
}

impl PipeController {
    /// See [`Pipe::start`]
    pub fn start(&self) {
        self.control.start();
    }

    /// See [`Pipe::pause`]
    pub fn pause(&self, block: bool) {
        self.control.pause(block);
    }

    /// See [`Pipe::stop`]
    pub fn stop(&self, block: bool) {
        self.control.stop(block);
    }

    /// See [`Pipe::join`]
    pub fn join(&self) {
        self.control.join();
    }

    /// See [`Pipe::state`]
    pub fn state(&self) -> PipeState {
        self.control.state()
    }
}

impl std::fmt::Debug for PipeController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipeController")
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::io::{self, Cursor};
    use std::sync::Mutex;
    use std::time::Instant;

    /// Sink shared between pipes and the test body
    #[derive(Clone, Default)]
    struct SharedSink(Arc<Mutex<Vec<u8>>>);

    impl SharedSink {
        fn contents(&self) -> Vec<u8> {
            self.0.lock().unwrap().clone()
        }
    }

    impl Write for SharedSink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    /// Hands out one byte per read and yields, to interleave pipes
    struct SlowReader<R>(R);

    impl<R: Read> Read for SlowReader<R> {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            thread::yield_now();
            let len = buf.len().min(1);
            self.0.read(&mut buf[..len])
        }
    }

    /// Produces bytes from a channel; blocks while the channel is empty
    struct ChannelReader(crossbeam::channel::Receiver<Vec<u8>>, Vec<u8>);

    impl Read for ChannelReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.1.is_empty() {
                match self.0.recv() {
                    Ok(data) => self.1 = data,
                    Err(_) => return Ok(0),
                }
            }
            let n = buf.len().min(self.1.len());
            buf[..n].copy_from_slice(&self.1[..n]);
            self.1.drain(..n);
            Ok(n)
        }
    }

    fn payload(seed: u8, len: usize) -> Vec<u8> {
        (0..len).map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed)).collect()
    }

    #[test]
    fn test_copies_whole_stream() {
        let input = payload(7, 3708);
        let pipe = Pipe::new(Cursor::new(input.clone()), Vec::new()).unwrap();
        pipe.start();
        pipe.join();

        let (_, sink) = pipe.into_inner().unwrap();
        assert_eq!(sink, input);
    }

    #[test]
    fn test_small_buffer_copies_everything() {
        let pipe = Pipe::with_buffer_size(Cursor::new(b"hello world".to_vec()), Vec::new(), 4).unwrap();
        pipe.start();

        let stats = pipe.stats();
        let (_, sink) = pipe.into_inner().unwrap();
        assert_eq!(sink, b"hello world");
        assert_eq!(stats.bytes_copied(), 11);
    }

    #[test]
    fn test_zero_buffer_rejected() {
        let result = Pipe::with_buffer_size(Cursor::new(Vec::new()), Vec::new(), 0);
        assert!(matches!(result, Err(PipeError::InvalidBufferSize(0))));
    }

    #[test]
    fn test_sequential_pipes_concatenate() {
        let mut sink = Vec::new();
        let mut expected = Vec::new();

        for i in 0..10u8 {
            let input = payload(i, 100);
            expected.extend_from_slice(&input);

            let pipe = Pipe::new(Cursor::new(input), sink).unwrap();
            pipe.start();
            pipe.join();
            sink = pipe.into_inner().unwrap().1;
        }

        assert_eq!(sink, expected);
    }

    #[test]
    fn test_concurrent_pipes_share_sink() {
        let sink = SharedSink::default();
        let digits = b"123456789";

        let pipes: Vec<_> = digits
            .iter()
            .map(|&d| Pipe::new(SlowReader(Cursor::new(vec![d; 30])), sink.clone()).unwrap())
            .collect();
        for pipe in &pipes {
            pipe.start();
        }
        for pipe in &pipes {
            pipe.join();
        }

        let output = sink.contents();
        for &d in digits {
            assert_eq!(output.iter().filter(|&&b| b == d).count(), 30);
        }
    }

    #[test]
    fn test_nothing_copied_before_start() {
        let sink = SharedSink::default();
        let pipe = Pipe::new(Cursor::new(b"data".to_vec()), sink.clone()).unwrap();

        assert!(!pipe.join_timeout(Duration::from_millis(50)));
        assert!(sink.contents().is_empty());
        assert_eq!(pipe.state(), PipeState::New);
    }

    #[test]
    fn test_blocking_pause_holds_back_writes() {
        let (tx, rx) = crossbeam::channel::unbounded();
        let sink = SharedSink::default();
        let pipe = Pipe::new(ChannelReader(rx, Vec::new()), sink.clone()).unwrap();
        pipe.start();

        tx.send(b"first".to_vec()).unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while sink.contents().len() < 5 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(sink.contents(), b"first");

        // The worker is usually blocked reading here, in which case the
        // blocking pause returns only after one more read/write pair.
        let pauser = {
            let controller = pipe.controller();
            thread::spawn(move || controller.pause(true))
        };
        while pipe.state() != PipeState::Paused {
            thread::yield_now();
        }
        tx.send(b"second".to_vec()).unwrap();
        pauser.join().unwrap();

        let snapshot = sink.contents();
        assert!(snapshot.starts_with(b"first"));
        tx.send(b"third".to_vec()).unwrap();
        thread::sleep(Duration::from_millis(50));
        assert_eq!(sink.contents(), snapshot);

        pipe.start();
        drop(tx);
        pipe.join();
        assert_eq!(sink.contents(), b"firstsecondthird");
    }

    #[test]
    fn test_stop_is_terminal() {
        let (tx, rx) = crossbeam::channel::unbounded::<Vec<u8>>();
        let sink = SharedSink::default();
        let pipe = Pipe::new(ChannelReader(rx, Vec::new()), sink.clone()).unwrap();

        pipe.stop(true);
        assert!(pipe.is_finished());
        assert_eq!(pipe.state(), PipeState::Stopped);

        pipe.start();
        assert_eq!(pipe.state(), PipeState::Stopped);
        tx.send(b"late".to_vec()).unwrap();
        assert!(pipe.join_timeout(Duration::from_millis(10)));
        pipe.join();
        assert!(sink.contents().is_empty());
    }

    #[test]
    fn test_into_inner_on_unstarted_pipe_returns_parts() {
        let pipe = Pipe::new(Cursor::new(b"untouched".to_vec()), Vec::new()).unwrap();

        let (source, sink) = pipe.into_inner().unwrap();
        assert_eq!(source.position(), 0);
        assert!(sink.is_empty());
    }

    #[test]
    fn test_stop_while_paused_mid_stream() {
        let (tx, rx) = crossbeam::channel::unbounded();
        let sink = SharedSink::default();
        let pipe = Pipe::new(ChannelReader(rx, Vec::new()), sink.clone()).unwrap();
        pipe.start();

        tx.send(b"first".to_vec()).unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while sink.contents().len() < 5 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }

        // The worker is blocked reading; one more chunk lets it reach the park
        let pauser = {
            let controller = pipe.controller();
            thread::spawn(move || controller.pause(true))
        };
        while pipe.state() != PipeState::Paused {
            thread::yield_now();
        }
        tx.send(b"second".to_vec()).unwrap();
        pauser.join().unwrap();
        let snapshot = sink.contents();

        pipe.stop(true);
        assert!(pipe.is_finished());
        assert_eq!(pipe.state(), PipeState::Stopped);

        tx.send(b"third".to_vec()).unwrap();
        thread::sleep(Duration::from_millis(20));
        assert_eq!(sink.contents(), snapshot);
    }

    #[test]
    fn test_stop_during_blocked_read_allows_one_more_write() {
        let (tx, rx) = crossbeam::channel::unbounded();
        let sink = SharedSink::default();
        let pipe = Pipe::new(ChannelReader(rx, Vec::new()), sink.clone()).unwrap();
        pipe.start();

        tx.send(b"a".to_vec()).unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while sink.contents().is_empty() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }

        pipe.stop(false);

        // Releases the read the worker may be blocked in; nothing after it
        tx.send(b"b".to_vec()).unwrap();
        tx.send(b"c".to_vec()).unwrap();
        assert!(pipe.join_timeout(Duration::from_secs(5)));

        let output = sink.contents();
        assert!(output == b"a" || output == b"ab", "unexpected output {:?}", output);
    }

    #[test]
    fn test_write_failure_finishes_pipe() {
        struct Broken;
        impl Write for Broken {
            fn write(&mut self, _: &[u8]) -> io::Result<usize> {
                Err(io::Error::new(io::ErrorKind::BrokenPipe, "gone"))
            }
            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }

        let pipe = Pipe::new(Cursor::new(vec![0u8; 4096]), Broken).unwrap();
        pipe.start();
        assert!(pipe.join_timeout(Duration::from_secs(5)));
        assert_eq!(pipe.stats().bytes_copied(), 0);
    }

    #[test]
    fn test_concurrent_joins_return() {
        let pipe = Arc::new(Pipe::new(Cursor::new(payload(3, 10_000)), io::sink()).unwrap());
        let joiners: Vec<_> = (0..4)
            .map(|_| {
                let pipe = Arc::clone(&pipe);
                thread::spawn(move || pipe.join())
            })
            .collect();

        pipe.start();
        for joiner in joiners {
            joiner.join().unwrap();
        }
        assert!(pipe.is_finished());
    }

    #[test]
    fn test_file_sink() {
        let mut file = tempfile::tempfile().unwrap();
        let input = payload(9, 5000);

        let pipe = Pipe::with_buffer_size(Cursor::new(input.clone()), file.try_clone().unwrap(), 512).unwrap();
        pipe.start();
        pipe.join();
        drop(pipe);

        use std::io::{Seek, SeekFrom};
        file.seek(SeekFrom::Start(0)).unwrap();
        let mut output = Vec::new();
        file.read_to_end(&mut output).unwrap();
        assert_eq!(output, input);
    }

    #[test]
    fn test_named_worker_thread() {
        let config = PipeConfig {
            thread_name: Some("relay".to_string()),
            ..Default::default()
        };

        struct NameRecorder(Option<String>);
        impl Read for NameRecorder {
            fn read(&mut self, _: &mut [u8]) -> io::Result<usize> {
                self.0 = thread::current().name().map(str::to_string);
                Ok(0)
            }
        }

        let pipe = Pipe::with_config(NameRecorder(None), io::sink(), &config).unwrap();
        pipe.start();
        let (recorder, _) = pipe.into_inner().unwrap();
        assert_eq!(recorder.0.as_deref(), Some("relay"));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_sink_matches_source(input in proptest::collection::vec(any::<u8>(), 0..4096), size in 1usize..64) {
            let pipe = Pipe::with_buffer_size(Cursor::new(input.clone()), Vec::new(), size).unwrap();
            pipe.start();
            let (_, sink) = pipe.into_inner().unwrap();
            prop_assert_eq!(sink, input);
        }
    }
}
