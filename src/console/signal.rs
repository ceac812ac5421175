//! Signal handler chains
//!
//! Each signal gets a chain of handlers, newest first. A handler returns
//! `true` to pass the signal on to the handler registered before it, or
//! `false` to stop there. A panicking handler also stops the chain. When
//! every handler passes the signal on, the disposition that was in place
//! before the first registration runs: the default action is re-raised, an
//! ignored signal stays ignored, and a plain handler function is called.
//!
//! The process-level handler only writes the signal number to a
//! non-blocking self-pipe. Handlers run on a named dispatcher thread, so
//! they may lock, allocate and log freely.

use crate::error::{PipeError, Result};
use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};
use std::collections::BTreeMap;
use std::io::{self, Read};
use std::os::fd::IntoRawFd;
use std::os::unix::net::UnixStream;
use std::panic::{self, AssertUnwindSafe};
use std::str::FromStr;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;

/// A signal handler; `false` stops the chain
pub type SignalHandler = Arc<dyn Fn() -> bool + Send + Sync>;

/// Write end of the self-pipe, or -1 before the dispatcher runs
static WAKE_FD: AtomicI32 = AtomicI32::new(-1);

static CHAINS: Mutex<BTreeMap<i32, SignalChain>> = Mutex::new(BTreeMap::new());

struct SignalChain {
    /// Oldest first; dispatch walks it backwards
    handlers: Vec<SignalHandler>,
    /// Disposition replaced by the first registration
    previous: SigAction,
}

fn chains() -> MutexGuard<'static, BTreeMap<i32, SignalChain>> {
    CHAINS.lock().unwrap_or_else(PoisonError::into_inner)
}

extern "C" fn on_signal(signum: libc::c_int) {
    let fd = WAKE_FD.load(Ordering::Relaxed);
    if fd >= 0 {
        let byte = signum as u8;
        // Only async-signal-safe calls here. A full pipe drops the wakeup,
        // which is fine since the dispatcher is already behind.
        unsafe {
            libc::write(fd, &byte as *const u8 as *const libc::c_void, 1);
        }
    }
}

fn chain_action() -> SigAction {
    SigAction::new(SigHandler::Handler(on_signal), SaFlags::SA_RESTART, SigSet::empty())
}

/// Parse a signal name such as `"INT"`, `"sigint"` or `"SIGINT"`, or a
/// signal number such as `"15"`
pub fn parse_signal(name: &str) -> Result<Signal> {
    let name = name.trim();
    if let Ok(signum) = name.parse::<i32>() {
        return Signal::try_from(signum).map_err(|_| PipeError::UnknownSignal(name.to_string()));
    }

    let upper = name.to_ascii_uppercase();
    let bare = upper.strip_prefix("SIG").unwrap_or(&upper);
    Signal::from_str(&format!("SIG{}", bare)).map_err(|_| PipeError::UnknownSignal(bare.to_string()))
}

/// Bare name of `signal`, without the `SIG` prefix
fn bare_name(signal: Signal) -> &'static str {
    let name = signal.as_str();
    name.strip_prefix("SIG").unwrap_or(name)
}

/// Add `handler` to the front of the chain for the signal called `name`.
///
/// The name is case-insensitive and may omit the `SIG` prefix. Signals
/// that cannot be caught, like `KILL` and `STOP`, fail with
/// [`PipeError::SignalRegistration`].
pub fn register<F>(name: &str, handler: F) -> Result<()>
where
    F: Fn() -> bool + Send + Sync + 'static,
{
    let signal = parse_signal(name)?;
    let mut chains = chains();
    ensure_dispatcher()?;

    let signum = signal as i32;
    if let Some(chain) = chains.get_mut(&signum) {
        chain.handlers.push(Arc::new(handler));
        tracing::debug!(signal = bare_name(signal), handlers = chain.handlers.len(), "signal handler added");
        return Ok(());
    }

    // SAFETY: on_signal only performs an atomic load and write(2)
    let previous = unsafe { signal::sigaction(signal, &chain_action()) }.map_err(|source| {
        PipeError::SignalRegistration {
            signal: bare_name(signal).to_string(),
            source,
        }
    })?;
    chains.insert(
        signum,
        SignalChain {
            handlers: vec![Arc::new(handler)],
            previous,
        },
    );
    tracing::debug!(signal = bare_name(signal), "signal chain installed");
    Ok(())
}

/// Like [`register`], but reports failure as `false`
pub fn try_register<F>(name: &str, handler: F) -> bool
where
    F: Fn() -> bool + Send + Sync + 'static,
{
    match register(name, handler) {
        Ok(()) => true,
        Err(e) => {
            tracing::debug!(error = %e, "signal registration failed");
            false
        }
    }
}

/// Start the dispatcher thread once; callers hold the chain lock
fn ensure_dispatcher() -> Result<()> {
    if WAKE_FD.load(Ordering::Acquire) >= 0 {
        return Ok(());
    }

    let (reader, writer) = UnixStream::pair()?;
    writer.set_nonblocking(true)?;

    let name = "signal-dispatch";
    thread::Builder::new()
        .name(name.to_string())
        .spawn(move || dispatch(reader))
        .map_err(|e| PipeError::spawn(name, e))?;

    WAKE_FD.store(writer.into_raw_fd(), Ordering::Release);
    Ok(())
}

fn dispatch(mut wake: UnixStream) {
    let mut pending = [0u8; 64];
    loop {
        let n = match wake.read(&mut pending) {
            Ok(0) => break,
            Ok(n) => n,
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                tracing::debug!(error = %e, "signal dispatcher stopped");
                break;
            }
        };

        for &signum in &pending[..n] {
            match Signal::try_from(i32::from(signum)) {
                Ok(signal) => run_chain(signal),
                Err(_) => tracing::debug!(signum, "wakeup for unknown signal"),
            }
        }
    }
}

fn run_chain(signal: Signal) {
    let (handlers, previous) = match chains().get(&(signal as i32)) {
        Some(chain) => (chain.handlers.clone(), chain.previous.handler()),
        None => return,
    };

    tracing::trace!(signal = bare_name(signal), "dispatching signal");
    for handler in handlers.iter().rev() {
        match panic::catch_unwind(AssertUnwindSafe(|| handler())) {
            Ok(true) => continue,
            Ok(false) => return,
            Err(_) => {
                tracing::debug!(signal = bare_name(signal), "signal handler panicked");
                return;
            }
        }
    }

    run_previous(signal, previous);
}

fn run_previous(signal: Signal, previous: SigHandler) {
    match previous {
        SigHandler::SigIgn => {}
        SigHandler::Handler(f) => f(signal as libc::c_int),
        SigHandler::SigDfl => {
            let default = SigAction::new(SigHandler::SigDfl, SaFlags::empty(), SigSet::empty());
            // SAFETY: swapping between the default action and on_signal
            unsafe {
                if let Err(e) = signal::sigaction(signal, &default) {
                    tracing::debug!(error = %e, "restoring default action failed");
                    return;
                }
                if let Err(e) = signal::raise(signal) {
                    tracing::debug!(error = %e, "re-raising signal failed");
                }
                if let Err(e) = signal::sigaction(signal, &chain_action()) {
                    tracing::debug!(error = %e, "reinstalling signal chain failed");
                }
            }
        }
        SigHandler::SigAction(_) => {
            tracing::debug!(signal = bare_name(signal), "previous siginfo handler not invoked");
        }
    }
}
