use crate::channel::ChannelPair;
use crate::convert::{DecodeMode, Payload, Utf8Decoder};
use crate::error::{Error, Result};
use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::{AsFd, BorrowedFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Configuration for pattern matching behavior
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Default timeout for reads and expects
    pub timeout: Duration,
    /// Largest chunk pulled from the channel per read
    pub max_read_size: usize,
    /// Only the trailing part of the pending buffer is searched when set
    pub search_window: Option<usize>,
    /// How malformed UTF-8 from producers is handled
    pub decode: DecodeMode,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_read_size: 2000,
            search_window: None,
            decode: DecodeMode::Replace,
        }
    }
}

struct WriteState {
    file: Option<File>,
    /// Bytes accepted by `send` that did not fit into the channel yet
    queued: Vec<u8>,
}

struct ReadState {
    file: Option<File>,
    decoder: Utf8Decoder,
}

/// Gathers bytes from any number of producers into one channel and lets a
/// single consumer pattern-match against it.
///
/// Writers call [`send`](Self::send) from any thread; the consumer pulls
/// through [`read_nonblocking`](Self::read_nonblocking) or the `expect`
/// family. All traffic in both directions is logged line by line.
///
/// Sending never blocks. Whatever the channel cannot take right away is
/// queued in memory and moved over as the consumer reads, so a stream
/// nobody reads from grows without bound.
pub struct PatternStream {
    source: Option<String>,
    config: StreamConfig,
    writer: Mutex<WriteState>,
    reader: Mutex<ReadState>,
    pub(crate) pending: Mutex<String>,
    terminated: AtomicBool,
}

impl PatternStream {
    /// Creates a stream over an existing channel pair.
    ///
    /// # Arguments
    /// * `channel` - The read and write ends the stream takes ownership of
    /// * `count` - 1-based ordinal of this stream within the session
    /// * `total` - Number of streams in the session; tags are only attached when greater than one
    /// * `config` - Timeout and decoding configuration
    pub fn new(channel: ChannelPair, count: usize, total: usize, config: StreamConfig) -> Self {
        let source = (total > 1).then(|| format!("dut-{}", count));
        let decoder = Utf8Decoder::new(config.decode);

        Self {
            source,
            config,
            writer: Mutex::new(WriteState {
                file: Some(channel.write_end),
                queued: Vec::new(),
            }),
            reader: Mutex::new(ReadState {
                file: Some(channel.read_end),
                decoder,
            }),
            pending: Mutex::new(String::new()),
            terminated: AtomicBool::new(false),
        }
    }

    /// Creates a stream backed by a fresh pipe.
    pub fn open(count: usize, total: usize, config: StreamConfig) -> Result<Self> {
        Ok(Self::new(ChannelPair::pipe()?, count, total, config))
    }

    /// The source tag prefixed to log lines, if any.
    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }

    /// Logs `data` and writes it into the channel.
    ///
    /// Returns the number of bytes accepted; bytes the channel has no room
    /// for yet are queued rather than waited on. A write after
    /// [`terminate`](Self::terminate) returns `Ok(0)`: producers run on
    /// detached threads and routinely race teardown.
    pub fn send<'a>(&self, data: impl Into<Payload<'a>>) -> Result<usize> {
        let data = data.into();
        let mut writer = lock(&self.writer);

        self.log_traffic(&String::from_utf8_lossy(data.as_bytes()));

        let WriteState { file, queued } = &mut *writer;
        let Some(file) = file.as_mut() else {
            debug!("dropping {} bytes sent to a terminated stream", data.as_bytes().len());
            return Ok(0);
        };

        let bytes = data.as_bytes();
        queued.extend_from_slice(bytes);
        match flush_queued(file, queued) {
            Ok(()) => Ok(bytes.len()),
            Err(e) if is_closed_channel(&e) => {
                debug!("write to closed channel dropped: {}", e);
                queued.clear();
                Ok(0)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Moves queued bytes into the channel as far as it has room.
    ///
    /// Runs before every wait for readability: afterwards either nothing is
    /// queued or the channel is full, so polling the read end cannot miss
    /// pending data.
    fn pump_queued(&self) {
        let mut writer = lock(&self.writer);
        let WriteState { file, queued } = &mut *writer;
        let Some(file) = file.as_mut() else {
            return;
        };
        if queued.is_empty() {
            return;
        }
        if let Err(e) = flush_queued(file, queued) {
            debug!("dropping {} queued bytes: {}", queued.len(), e);
            queued.clear();
        }
    }

    /// Same as [`send`](Self::send), discarding the byte count.
    pub fn write<'a>(&self, data: impl Into<Payload<'a>>) -> Result<()> {
        self.send(data).map(|_| ())
    }

    /// Waits for the channel to become readable and performs one read.
    ///
    /// `None` uses the configured timeout. An idle but open channel yields
    /// [`Error::Timeout`]; only a closed descriptor yields
    /// [`Error::EndOfStream`].
    pub fn read_nonblocking(&self, max_size: usize, timeout: Option<Duration>) -> Result<String> {
        let timeout = timeout.unwrap_or(self.config.timeout);
        self.pump_queued();
        let mut state = lock(&self.reader);
        let ReadState { file, decoder } = &mut *state;

        let Some(file) = file.as_mut() else {
            return Err(Error::EndOfStream("bad file descriptor"));
        };

        if !wait_readable(file.as_fd(), timeout)? {
            return Err(Error::Timeout(timeout));
        }

        let mut buf = vec![0u8; max_size.max(1)];
        let count = loop {
            match file.read(&mut buf) {
                Ok(count) => break count,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => match e.raw_os_error().map(Errno::from_raw) {
                    // Linux reports EOF on a hung-up terminal as EIO
                    Some(Errno::EIO) => break 0,
                    Some(Errno::EBADF) => return Err(Error::EndOfStream("bad file descriptor")),
                    _ => return Err(e.into()),
                },
            }
        };

        let text = decoder.decode(&buf[..count], false)?;
        drop(state);

        self.log_traffic(&text);
        Ok(text)
    }

    /// Closes both ends of the channel. Never fails.
    ///
    /// The write end goes first so a consumer blocked in
    /// [`read_nonblocking`](Self::read_nonblocking) wakes up on hang-up.
    pub fn terminate(&self, force: bool) {
        if self.terminated.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!("terminating stream {:?} (force: {})", self.source, force);

        {
            let mut writer = lock(&self.writer);
            writer.file = None;
            writer.queued = Vec::new();
        }
        drop(lock(&self.reader).file.take());
    }

    fn log_traffic(&self, text: &str) {
        for line in text.split(['\r', '\n']) {
            if line.trim().is_empty() {
                continue;
            }
            match &self.source {
                Some(source) => info!("[{}]{}", source, line),
                None => info!("{}", line),
            }
        }
    }
}

impl Write for &PatternStream {
    /// Swallowed writes to a terminated stream still report the full length
    /// so `write_all` callers do not fail with `WriteZero`.
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.send(buf) {
            Ok(_) => Ok(buf.len()),
            Err(Error::Io(e)) => Err(e),
            Err(e) => Err(io::Error::other(e)),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Write for PatternStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Write::write(&mut &*self, buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl std::fmt::Debug for PatternStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PatternStream")
            .field("source", &self.source)
            .field("config", &self.config)
            .field("terminated", &self.is_terminated())
            .finish()
    }
}

/// Opens `total` tagged streams, numbered from 1.
pub fn open_streams(total: usize, config: &StreamConfig) -> Result<Vec<Arc<PatternStream>>> {
    (1..=total)
        .map(|count| PatternStream::open(count, total, config.clone()).map(Arc::new))
        .collect()
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Writes as much of `queued` as the channel accepts without blocking.
fn flush_queued(file: &mut File, queued: &mut Vec<u8>) -> io::Result<()> {
    while !queued.is_empty() {
        match file.write(queued) {
            Ok(0) => break,
            Ok(count) => {
                queued.drain(..count);
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

fn is_closed_channel(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::BrokenPipe
        || err.raw_os_error().map(Errno::from_raw) == Some(Errno::EBADF)
}

/// Polls `fd` for readability, retrying when a signal interrupts the wait.
///
/// Hang-up and invalid-descriptor conditions count as readable; the read
/// that follows reports them.
pub(crate) fn wait_readable(fd: BorrowedFd<'_>, timeout: Duration) -> Result<bool> {
    let deadline = Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let mut fds = [PollFd::new(fd, PollFlags::POLLIN)];
        match poll(&mut fds, poll_timeout(remaining)) {
            Ok(0) => return Ok(false),
            Ok(_) => return Ok(true),
            Err(Errno::EINTR) => continue,
            Err(e) => return Err(io::Error::from(e).into()),
        }
    }
}

fn poll_timeout(remaining: Duration) -> PollTimeout {
    let millis = remaining.as_nanos().div_ceil(1_000_000);
    let millis = i32::try_from(millis).unwrap_or(i32::MAX);
    PollTimeout::try_from(millis).unwrap_or(PollTimeout::MAX)
}
