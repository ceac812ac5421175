//! Console module
//!
//! Thin typed bindings to the terminal and to POSIX signals: echo control
//! for password prompts, and chained signal handlers.

mod echo;
mod signal;

pub use echo::*;
pub use signal::*;
