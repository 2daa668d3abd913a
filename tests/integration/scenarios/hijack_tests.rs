use muxpect::{current_stdout, live_print_call, mprint, mprintln, DuplicateStdout, PatternStream, StreamConfig};
use std::io::Write;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

const LONG: Option<Duration> = Some(Duration::from_secs(5));

static SERIAL: Mutex<()> = Mutex::new(());

/// The stdout target is process-wide; these tests must not overlap
fn serial() -> MutexGuard<'static, ()> {
    SERIAL.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn stream() -> Arc<PatternStream> {
    Arc::new(PatternStream::open(1, 1, StreamConfig::default()).unwrap())
}

/// Test that printing through the macros lands in the stream
#[test]
fn test_prints_are_captured() {
    let _serial = serial();
    let stream = stream();
    let guard = DuplicateStdout::install(Arc::clone(&stream));
    assert!(guard.isatty());

    mprint!("status: ");
    mprintln!("{} of {}", 3, 4);
    writeln!(muxpect::stdout::stdout(), "writer line").unwrap();
    drop(guard);

    let found = stream.expect_exact("writer line", LONG).unwrap();
    assert_eq!(found.before, "status: 3 of 4\n");
}

/// Test that heavy printing with nobody reading neither blocks nor loses output
#[test]
fn test_unread_prints_do_not_block() {
    let _serial = serial();
    let stream = stream();
    let guard = DuplicateStdout::install(Arc::clone(&stream));

    let line = "z".repeat(99);
    for _ in 0..2000 {
        mprintln!("{}", line);
    }
    mprintln!("finished");
    drop(guard);

    let found = stream.expect_exact("finished", LONG).unwrap();
    assert_eq!(found.before.len(), 2000 * 100);
}

/// Test that entering and closing are idempotent and restore the target
#[test]
fn test_guard_lifecycle() {
    let _serial = serial();
    let original = current_stdout();

    let mut guard = DuplicateStdout::new(stream());
    assert!(!guard.is_active());

    guard.enter();
    guard.enter();
    assert!(guard.is_active());
    assert!(current_stdout().same_as(&guard.target()));
    assert!(guard.previous().is_some_and(|previous| previous.same_as(&original)));

    guard.close();
    guard.exit();
    assert!(!guard.is_active());
    assert!(current_stdout().same_as(&original));
}

/// Test that nested guards unwind in order
#[test]
fn test_nested_guards() {
    let _serial = serial();
    let original = current_stdout();
    let outer_stream = stream();
    let inner_stream = stream();

    let outer = DuplicateStdout::install(Arc::clone(&outer_stream));
    {
        let _inner = DuplicateStdout::install(Arc::clone(&inner_stream));
        mprintln!("inner");
    }
    mprintln!("outer");
    drop(outer);

    assert!(current_stdout().same_as(&original));
    inner_stream.expect_exact("inner", LONG).unwrap();
    let found = outer_stream.expect_exact("outer", LONG).unwrap();
    assert_eq!(found.before, "");
}

/// Test that a subprocess run through live_print_call is captured
#[test]
fn test_live_print_call_is_captured() {
    let _serial = serial();
    let stream = stream();
    let guard = DuplicateStdout::install(Arc::clone(&stream));

    let status = live_print_call("echo alpha; echo beta 1>&2; exit 2").unwrap();
    drop(guard);

    assert_eq!(status.code(), Some(2));
    stream.expect_exact("alpha", LONG).unwrap();
    stream.expect_exact("beta", LONG).unwrap();
}
