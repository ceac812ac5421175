//! Terminal echo control and password input

use crate::error::{PipeError, Result};
use nix::errno::Errno;
use nix::sys::termios::{self, LocalFlags, SetArg};
use std::io::{self, Read};
use std::os::fd::AsFd;
use std::sync::{Mutex, PoisonError};

/// Serializes read-modify-write cycles on the terminal attributes
static ECHO_LOCK: Mutex<()> = Mutex::new(());

/// Turn echo on the controlling terminal (stdin) on or off.
///
/// Returns whether echo was on before the call.
pub fn set_echo(enable: bool) -> Result<bool> {
    let _lock = ECHO_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
    let stdin = io::stdin();

    let mut attrs = termios::tcgetattr(stdin.as_fd()).map_err(PipeError::EchoToggle)?;
    let previous = attrs.local_flags.contains(LocalFlags::ECHO);
    attrs.local_flags.set(LocalFlags::ECHO, enable);
    termios::tcsetattr(stdin.as_fd(), SetArg::TCSANOW, &attrs).map_err(PipeError::EchoToggle)?;

    tracing::trace!(enable, previous, "terminal echo toggled");
    Ok(previous)
}

/// Restores the previous echo state when dropped
#[derive(Debug)]
pub struct EchoGuard {
    previous: bool,
}

impl EchoGuard {
    /// Turn echo off until the guard is dropped
    pub fn disable() -> Result<Self> {
        let previous = set_echo(false)?;
        Ok(Self { previous })
    }

    /// Echo state that will be restored
    pub fn previous(&self) -> bool {
        self.previous
    }
}

impl Drop for EchoGuard {
    fn drop(&mut self) {
        if let Err(e) = set_echo(self.previous) {
            tracing::debug!(error = %e, "restoring terminal echo failed");
        }
    }
}

/// Read one line from `reader` with terminal echo turned off.
///
/// When stdin is not a terminal there is no echo to hide and the line is
/// read as is. See [`read_secret_line`] for the line rules.
pub fn read_password<R: Read>(reader: R) -> Result<String> {
    let _guard = match EchoGuard::disable() {
        Ok(guard) => Some(guard),
        Err(PipeError::EchoToggle(Errno::ENOTTY)) => {
            tracing::debug!("stdin is not a terminal, reading without hiding echo");
            None
        }
        Err(e) => return Err(e),
    };

    Ok(read_secret_line(reader)?)
}

/// Read up to the first `\n` or end of data, dropping every `\r`.
///
/// The newline is not part of the result. Invalid UTF-8 fails with
/// [`io::ErrorKind::InvalidData`].
pub fn read_secret_line<R: Read>(mut reader: R) -> io::Result<String> {
    let mut line = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        match reader.read(&mut byte) {
            Ok(0) => break,
            Ok(_) => match byte[0] {
                b'\n' => break,
                b'\r' => continue,
                b => line.push(b),
            },
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    String::from_utf8(line).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}
