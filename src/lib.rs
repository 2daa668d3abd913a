//! Multiplexed pattern-matching I/O for interactive process testing.
//!
//! A [`PatternStream`] funnels bytes from any number of producers into one
//! pipe so a single consumer can block on patterns against all of them:
//!
//! - [`ShellProcess`] forwards a child's merged output on a background thread
//! - [`DuplicateStdout`] routes [`mprint!`]/[`mprintln!`] output into a stream
//! - anything else can call [`PatternStream::send`] or implement [`ForwardIo`]
//!
//! All traffic is logged line by line through `tracing`.
//!
//! ```no_run
//! use muxpect::{PatternStream, ShellProcess, StreamConfig};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # fn main() -> muxpect::Result<()> {
//! let stream = Arc::new(PatternStream::open(1, 1, StreamConfig::default())?);
//! let shell = ShellProcess::spawn("cat")?;
//! shell.start_forwarding(Arc::clone(&stream))?;
//!
//! shell.send("hello")?;
//! stream.expect_exact("hello", Some(Duration::from_secs(5)))?;
//! # Ok(())
//! # }
//! ```

pub mod app;
pub mod channel;
pub mod convert;
pub mod error;
pub mod expect;
pub mod forward;
pub mod process;
pub mod stdout;
pub mod stream;

pub use app::{App, Attributes};
pub use channel::ChannelPair;
pub use convert::{to_bytes, to_str, DecodeMode, Payload, Utf8Decoder};
pub use error::{Error, Result};
pub use expect::{Match, Pattern};
pub use forward::{CancelToken, ForwardIo, Forwarder};
pub use process::{live_print_call, ShellConfig, ShellProcess};
pub use stdout::{current_stdout, replace_stdout, DuplicateStdout, OutputSink, StdoutTarget};
pub use stream::{open_streams, PatternStream, StreamConfig};
