//! Integration testing framework for muxpect
//!
//! This module covers multi-producer streams, subprocess forwarding, stdout
//! hijacking, and the command line driver.

pub mod scenarios;

// Re-export commonly used types for convenience
pub use infrastructure::{LogCapture, ProcessTestHarness, TestProcess};
