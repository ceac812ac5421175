//! Stream adapters
//!
//! Sources that plug into a [`Pipe`](crate::core::Pipe) and add behavior a
//! plain reader lacks.

mod revivable;

pub use revivable::*;
