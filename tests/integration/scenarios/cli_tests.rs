use crate::infrastructure::ProcessTestHarness;
use anyhow::Result;
use nix::sys::signal::Signal;
use std::time::Duration;

/// Test that a pattern from a simple command is matched
#[tokio::test]
async fn test_expect_echo_output() -> Result<()> {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let mut harness = ProcessTestHarness::new()?;
    let mut process = harness
        .spawn_muxpect(&["--expect", "hello", "--", "echo hello"])
        .await?;

    let (status, output) = process
        .wait_for_exit_timeout(Duration::from_secs(10))
        .await?
        .expect("muxpect should exit after matching");

    assert_eq!(status.code(), Some(0));
    assert!(output.contains("hello"), "traffic should be logged: {}", output);
    Ok(())
}

/// Test that sent lines reach the command and its reply is matched
#[tokio::test]
async fn test_send_then_expect_reply() -> Result<()> {
    let mut harness = ProcessTestHarness::new()?;
    let mut process = harness
        .spawn_muxpect(&[
            "--send",
            "ping",
            "--expect",
            "got:ping",
            "--",
            "read line; echo got:$line",
        ])
        .await?;

    let (status, _) = process
        .wait_for_exit_timeout(Duration::from_secs(10))
        .await?
        .expect("muxpect should exit after matching");

    assert_eq!(status.code(), Some(0));
    Ok(())
}

/// Test that a regex pattern can be used
#[tokio::test]
async fn test_regex_pattern() -> Result<()> {
    let mut harness = ProcessTestHarness::new()?;
    let mut process = harness
        .spawn_muxpect(&["--regex", "--expect", r"value=\d+", "--", "echo value=42"])
        .await?;

    let (status, _) = process
        .wait_for_exit_timeout(Duration::from_secs(10))
        .await?
        .expect("muxpect should exit after matching");

    assert_eq!(status.code(), Some(0));
    Ok(())
}

/// Test that the command's exit code is passed through after all matches
#[tokio::test]
async fn test_exit_code_passthrough() -> Result<()> {
    let mut harness = ProcessTestHarness::new()?;
    let mut process = harness
        .spawn_muxpect(&["--expect", "done", "--", "echo done; exit 3"])
        .await?;

    let (status, _) = process
        .wait_for_exit_timeout(Duration::from_secs(10))
        .await?
        .expect("muxpect should exit after the command");

    assert_eq!(status.code(), Some(3));
    Ok(())
}

/// Test that a missing pattern surfaces as a timeout exit code
#[tokio::test]
async fn test_missing_pattern_times_out() -> Result<()> {
    let mut harness = ProcessTestHarness::new()?;
    let mut process = harness
        .spawn_muxpect(&["--timeout-secs", "1", "--expect", "never", "--", "sleep 30"])
        .await?;

    let (status, _) = process
        .wait_for_exit_timeout(Duration::from_secs(10))
        .await?
        .expect("muxpect should give up after its timeout");

    assert_eq!(status.code(), Some(124));
    assert!(process.runtime() < Duration::from_secs(10));
    Ok(())
}

/// Test that SIGTERM stops the run and kills the command
#[tokio::test]
async fn test_sigterm_interrupts_run() -> Result<()> {
    let mut harness = ProcessTestHarness::new()?;
    let mut process = harness
        .spawn_muxpect(&["--expect", "never", "--", "sleep 30"])
        .await?;

    // Allow signal handlers to be installed
    tokio::time::sleep(Duration::from_millis(500)).await;
    process.signal(Signal::SIGTERM)?;

    let (status, _) = process
        .wait_for_exit_timeout(Duration::from_secs(10))
        .await?
        .expect("muxpect should exit after SIGTERM");

    assert_eq!(status.code(), Some(130));
    Ok(())
}
