use crate::convert::{to_bytes, DecodeMode, Payload, Utf8Decoder};
use crate::error::Result;
use crate::forward::{CancelToken, ForwardIo, Forwarder};
use crate::stdout::print_to_stdout;
use crate::stream::{lock, wait_readable, PatternStream};
use nix::fcntl::OFlag;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::{pipe2, Pid};
use std::collections::HashMap;
use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::AsFd;
use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::process::{Child, ChildStdin, Command, ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// How often a forwarding loop wakes up to check for cancellation and exit.
const FORWARD_POLL_INTERVAL: Duration = Duration::from_millis(100);

const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Configuration for spawning a shell command
#[derive(Debug, Clone)]
pub struct ShellConfig {
    /// Command line handed to the shell
    pub command: String,
    /// Shell used to run the command
    pub shell: PathBuf,
    /// Working directory for the process
    pub working_directory: Option<PathBuf>,
    /// Environment variables to set on top of the inherited ones
    pub environment: HashMap<String, String>,
}

impl ShellConfig {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ..Default::default()
        }
    }
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            command: String::new(),
            shell: PathBuf::from("/bin/sh"),
            working_directory: None,
            environment: HashMap::new(),
        }
    }
}

/// A child process run through a shell, with piped stdin and stderr merged
/// into stdout.
///
/// Both directions are unbuffered: `send` writes straight to the child's
/// stdin and the forwarding loop hands over whatever a single read returns.
/// The child leads its own process group so [`kill`](Self::kill) reaches
/// everything the shell started.
pub struct ShellProcess {
    config: ShellConfig,
    pid: Pid,
    child: Mutex<Child>,
    stdin: Mutex<Option<ChildStdin>>,
    output: Mutex<File>,
    forwarder: Forwarder,
}

impl ShellProcess {
    /// Spawns `command` through `/bin/sh -c`.
    pub fn spawn(command: impl Into<String>) -> Result<Arc<Self>> {
        Self::spawn_with(ShellConfig::new(command))
    }

    pub fn spawn_with(config: ShellConfig) -> Result<Arc<Self>> {
        info!("Spawning process: {}", config.command);

        // the child gets dup'd copies; ours must not leak into other spawns
        let (read_fd, write_fd) = pipe2(OFlag::O_CLOEXEC)?;
        let stderr_fd = write_fd.try_clone()?;

        let mut command = Command::new(&config.shell);
        command.arg("-c").arg(&config.command);
        command.process_group(0);
        command.stdin(Stdio::piped());
        command.stdout(Stdio::from(write_fd));
        command.stderr(Stdio::from(stderr_fd));

        if let Some(ref work_dir) = config.working_directory {
            command.current_dir(work_dir);
        }
        for (key, value) in &config.environment {
            command.env(key, value);
        }

        let mut child = command.spawn()?;
        // the command still holds our copies of the write end; EOF needs them gone
        drop(command);

        let pid = Pid::from_raw(i32::try_from(child.id()).map_err(io::Error::other)?);
        let stdin = child.stdin.take();
        info!("Process spawned with PID: {}", pid);

        Ok(Arc::new(Self {
            config,
            pid,
            child: Mutex::new(child),
            stdin: Mutex::new(stdin),
            output: Mutex::new(File::from(read_fd)),
            forwarder: Forwarder::new(),
        }))
    }

    pub fn id(&self) -> u32 {
        self.pid.as_raw().unsigned_abs()
    }

    pub fn command(&self) -> &str {
        &self.config.command
    }

    /// Writes to the child's stdin.
    ///
    /// Text gets a trailing newline; bytes are written unmodified.
    pub fn send<'a>(&self, data: impl Into<Payload<'a>>) -> Result<()> {
        let data = data.into();
        let bytes = if data.is_text() {
            to_bytes(data, Some(b"\n"))
        } else {
            data.as_bytes().to_vec()
        };

        let mut stdin = lock(&self.stdin);
        let Some(stdin) = stdin.as_mut() else {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "stdin already closed").into());
        };
        stdin.write_all(&bytes)?;
        stdin.flush()?;
        Ok(())
    }

    /// Closes the child's stdin so it sees end of input.
    pub fn close_stdin(&self) {
        drop(lock(&self.stdin).take());
    }

    /// Starts the background thread copying the child's output into
    /// `stream`. Returns `Ok(false)` if it was already started.
    pub fn start_forwarding(self: &Arc<Self>, stream: Arc<PatternStream>) -> Result<bool> {
        self.forwarder.start(Arc::clone(self), stream)
    }

    pub fn forwarder(&self) -> &Forwarder {
        &self.forwarder
    }

    pub fn try_wait(&self) -> Result<Option<ExitStatus>> {
        Ok(lock(&self.child).try_wait()?)
    }

    /// Waits for the child to exit.
    ///
    /// Polls instead of blocking on the child lock so a forwarding thread can
    /// keep draining output meanwhile.
    pub fn wait(&self) -> Result<ExitStatus> {
        loop {
            if let Some(status) = self.try_wait()? {
                return Ok(status);
            }
            thread::sleep(WAIT_POLL_INTERVAL);
        }
    }

    /// Like [`wait`](Self::wait) but gives up after `timeout`.
    pub fn wait_timeout(&self, timeout: Duration) -> Result<Option<ExitStatus>> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(status) = self.try_wait()? {
                return Ok(Some(status));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            thread::sleep(WAIT_POLL_INTERVAL);
        }
    }

    /// Sends SIGKILL to the child's process group.
    pub fn kill(&self) -> Result<()> {
        self.signal_group(Signal::SIGKILL)
    }

    /// Sends `signal` to the child's process group. A group that is already
    /// gone is not an error.
    pub fn signal_group(&self, signal: Signal) -> Result<()> {
        debug!("Sending signal {:?} to process group {}", signal, self.pid);
        match killpg(self.pid, signal) {
            Ok(()) | Err(nix::errno::Errno::ESRCH) => Ok(()),
            Err(e) => Err(io::Error::from(e).into()),
        }
    }

    /// Reads whatever output is available within `timeout`. `Ok(None)` means
    /// the child closed its side.
    fn read_available(output: &mut File, buf: &mut [u8], timeout: Duration) -> Result<Option<usize>> {
        if !wait_readable(output.as_fd(), timeout)? {
            return Ok(Some(0));
        }
        loop {
            match output.read(buf) {
                Ok(0) => return Ok(None),
                Ok(count) => return Ok(Some(count)),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }
}

impl ForwardIo for ShellProcess {
    /// Copies output into `stream` until the child exits, the output pipe
    /// closes, the stream is terminated, or `cancel` is set.
    fn forward_loop(&self, stream: &PatternStream, cancel: &CancelToken) -> Result<()> {
        let mut output = lock(&self.output);
        let mut buf = [0u8; 4096];

        while !cancel.is_cancelled() && !stream.is_terminated() {
            match Self::read_available(&mut output, &mut buf, FORWARD_POLL_INTERVAL)? {
                None => break,
                Some(0) => {
                    if self.try_wait()?.is_some() {
                        // exited while we were idle; pick up anything still buffered
                        while let Some(count) = Self::read_available(&mut output, &mut buf, Duration::ZERO)? {
                            if count == 0 {
                                break;
                            }
                            stream.write(&buf[..count])?;
                        }
                        break;
                    }
                }
                Some(count) => stream.write(&buf[..count])?,
            }
        }

        debug!("stopped forwarding output of {}", self.config.command);
        Ok(())
    }
}

impl Drop for ShellProcess {
    fn drop(&mut self) {
        let running = lock(&self.child).try_wait().map(|s| s.is_none()).unwrap_or(false);
        if running {
            warn!("ShellProcess dropped with running child (PID: {}), killing process group", self.pid);
            if let Err(e) = self.kill() {
                warn!("Failed to kill process group {}: {}", self.pid, e);
            }
            let _ = lock(&self.child).wait();
        }
    }
}

/// Runs `command` through the shell, printing its merged output to the
/// current stdout target as it arrives. Blocks until the child exits.
///
/// Use this while a [`DuplicateStdout`](crate::DuplicateStdout) guard is
/// active to get live output into the stream and its log at once.
pub fn live_print_call(command: &str) -> Result<ExitStatus> {
    let process = ShellProcess::spawn(command)?;
    process.close_stdin();

    let mut decoder = Utf8Decoder::new(DecodeMode::Replace);
    let mut buf = [0u8; 4096];
    {
        let mut output = lock(&process.output);
        while let Some(count) = ShellProcess::read_available(&mut output, &mut buf, FORWARD_POLL_INTERVAL)? {
            if count == 0 {
                continue;
            }
            let text = decoder.decode(&buf[..count], false)?;
            print_to_stdout(&text)?;
        }
        let tail = decoder.decode(&[], true)?;
        if !tail.is_empty() {
            print_to_stdout(&tail)?;
        }
    }

    let status = process.wait()?;
    if !status.success() {
        debug!("{} exited with {}", command, status);
    }
    Ok(status)
}
