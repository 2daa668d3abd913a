use muxpect::Error;
use std::time::{Duration, Instant};

/// Stream-specific assertions for integration tests

/// Assert that an operation failed with a timeout rather than end of stream
pub fn assert_timeout<T: std::fmt::Debug>(result: muxpect::Result<T>, context: &str) {
    match result {
        Err(Error::Timeout(_)) => {}
        other => panic!("{}: expected a timeout, got {:?}", context, other),
    }
}

/// Assert that an operation reported end of stream
pub fn assert_end_of_stream<T: std::fmt::Debug>(result: muxpect::Result<T>, context: &str) {
    match result {
        Err(Error::EndOfStream(_)) => {}
        other => panic!("{}: expected end of stream, got {:?}", context, other),
    }
}

/// Assert that `started` is no older than `limit`
pub fn assert_elapsed_within(started: Instant, limit: Duration, context: &str) {
    let elapsed = started.elapsed();
    assert!(
        elapsed <= limit,
        "{} took {:?}, exceeding {:?}",
        context,
        elapsed,
        limit
    );
}
