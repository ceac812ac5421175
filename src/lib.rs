//! # Pipeworks - Background Byte Pumps
//!
//! Pipeworks moves bytes from a source to a sink on a dedicated background
//! thread, under external control: copying can be started, paused, resumed
//! and stopped at any time, and callers can wait for a pump to finish.
//!
//! ## Features
//!
//! - **Pipe**: a pausable, stoppable copy worker over any `Read`/`Write` pair
//! - **ClosingPipe**: a pipe that closes its sink once the source runs dry
//! - **RevivableSource**: a blocking reader whose reads can be abandoned and
//!   later resumed without closing the underlying stream
//! - **Console bindings** (unix): terminal echo control and chained signal
//!   handlers
//!
//! ## Quick Start
//!
//! ```no_run
//! use pipeworks::core::Pipe;
//! use std::io::Cursor;
//!
//! let pipe = Pipe::new(Cursor::new(b"hello world".to_vec()), Vec::new()).unwrap();
//! pipe.start();
//!
//! let (_, sink) = pipe.into_inner().unwrap();
//! assert_eq!(sink, b"hello world");
//! ```
//!
//! ## Feeding a Child Process
//!
//! ```no_run
//! use pipeworks::core::ClosingPipe;
//! use pipeworks::stream::RevivableSource;
//! use std::process::{Command, Stdio};
//!
//! let mut child = Command::new("sort").stdin(Stdio::piped()).spawn().unwrap();
//! let stdin = child.stdin.take().unwrap();
//!
//! // Our stdin stays open after the child is done with it
//! let source = RevivableSource::new(std::io::stdin()).unwrap();
//! let kill = source.kill_switch();
//!
//! let feed = ClosingPipe::new(source, stdin).unwrap();
//! feed.start();
//!
//! child.wait().unwrap();
//! kill.kill();
//! feed.join();
//! ```
//!
//! ## Signal Chains
//!
//! ```no_run
//! # #[cfg(unix)] {
//! use pipeworks::console;
//!
//! // Returning false keeps the default action (terminate) from running
//! console::register("INT", || {
//!     eprintln!("interrupted");
//!     false
//! })
//! .unwrap();
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
#[cfg(unix)]
pub mod console;
pub mod core;
pub mod error;
pub mod progress;
pub mod stream;

// Re-export commonly used types
pub use config::PipeConfig;
pub use core::{ClosingPipe, Pipe, PipeController, PipeState};
pub use error::{PipeError, Result};
pub use stream::{KillSwitch, RevivableSource};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude module for convenient imports
pub mod prelude {
    //! Convenient re-exports for common usage
    //!
    //! ```no_run
    //! use pipeworks::prelude::*;
    //! ```

    pub use crate::config::PipeConfig;
    #[cfg(unix)]
    pub use crate::console::{read_password, register, set_echo, try_register, EchoGuard};
    pub use crate::core::{ClosingPipe, Closer, Pipe, PipeController, PipeState, DEFAULT_BUFFER_SIZE};
    pub use crate::error::{PipeError, Result};
    pub use crate::progress::{ProgressReporter, PumpStats};
    pub use crate::stream::{KillSwitch, RevivableSource};
}
