//! Configuration module for Pipeworks
//!
//! Provides configuration management including CLI arguments,
//! config files, and pipe settings.

mod settings;

pub use settings::*;
