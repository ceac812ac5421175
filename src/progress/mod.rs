//! Progress reporting module
//!
//! Transfer counters kept by every pump, and a spinner that renders them.

mod reporter;
mod stats;

pub use reporter::*;
pub use stats::*;
