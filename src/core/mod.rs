//! Core pump module
//!
//! Provides the pump control state machine, the worker loop, and the
//! [`Pipe`] and [`ClosingPipe`] handles built on them.

mod closing;
mod control;
mod pipe;
mod pump;

pub use closing::*;
pub use control::*;
pub use pipe::*;
