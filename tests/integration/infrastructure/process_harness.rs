use anyhow::{Context, Result};
use nix::{sys::signal::Signal, unistd::Pid};
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tokio::time::timeout;

/// Core testing harness for running the muxpect binary during integration tests
pub struct ProcessTestHarness {
    binary: PathBuf,
    cleanup_pids: Vec<Pid>,
}

impl ProcessTestHarness {
    /// Create a new test harness pointing at the binary cargo built for this test run
    pub fn new() -> Result<Self> {
        let binary = PathBuf::from(env!("CARGO_BIN_EXE_muxpect"));
        if !binary.exists() {
            return Err(anyhow::anyhow!("muxpect binary not found at {:?}", binary));
        }

        Ok(Self {
            binary,
            cleanup_pids: Vec::new(),
        })
    }

    /// Spawn muxpect with the given arguments, capturing its stdout
    pub async fn spawn_muxpect(&mut self, args: &[&str]) -> Result<TestProcess> {
        let mut cmd = Command::new(&self.binary);
        cmd.args(args);
        cmd.env("RUST_LOG", "info");
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::inherit());

        let start_time = Instant::now();
        let child = cmd.spawn().context("Failed to spawn muxpect process")?;

        let pid = Pid::from_raw(
            child
                .id()
                .ok_or_else(|| anyhow::anyhow!("Failed to get child PID"))? as i32,
        );

        // Track PID for cleanup
        self.cleanup_pids.push(pid);

        Ok(TestProcess {
            pid,
            start_time,
            child,
        })
    }
}

impl Drop for ProcessTestHarness {
    fn drop(&mut self) {
        // Clean up any remaining processes
        for pid in &self.cleanup_pids {
            let _ = nix::sys::signal::kill(*pid, Signal::SIGKILL);
        }
    }
}

/// A spawned muxpect process with timing and control capabilities
pub struct TestProcess {
    pub pid: Pid,
    pub start_time: Instant,
    child: Child,
}

impl TestProcess {
    /// Wait for process exit with a timeout, returning its status and stdout
    pub async fn wait_for_exit_timeout(
        &mut self,
        duration: Duration,
    ) -> Result<Option<(ExitStatus, String)>> {
        let mut stdout = self
            .child
            .stdout
            .take()
            .ok_or_else(|| anyhow::anyhow!("stdout already taken"))?;

        let waited = timeout(duration, async {
            let mut output = String::new();
            stdout.read_to_string(&mut output).await?;
            let status = self.child.wait().await?;
            Ok::<_, std::io::Error>((status, output))
        })
        .await;

        match waited {
            Ok(result) => Ok(Some(result.context("Process wait failed")?)),
            Err(_) => Ok(None), // Timeout occurred
        }
    }

    /// Send a signal to the process
    pub fn signal(&self, signal: Signal) -> Result<()> {
        nix::sys::signal::kill(self.pid, signal).context("Failed to signal muxpect")
    }

    /// Get the runtime duration since process start
    pub fn runtime(&self) -> Duration {
        self.start_time.elapsed()
    }
}
