use crate::error::Result;
use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::unistd::pipe2;
use std::fs::File;
use std::os::fd::AsFd;
use tracing::debug;

/// The two ends of one logical duplex channel.
///
/// Every producer writes into `write_end`; the single consumer reads from
/// `read_end`. Both ends are owned together and closed together.
///
/// The write end is always non-blocking. A full channel never stalls a
/// producer; the stream queues what did not fit.
#[derive(Debug)]
pub struct ChannelPair {
    pub read_end: File,
    pub write_end: File,
}

impl ChannelPair {
    /// Opens a new pipe-backed channel.
    ///
    /// Both descriptors are created close-on-exec so that shell children
    /// spawned by producers never hold a copy of either end.
    pub fn pipe() -> Result<Self> {
        let (read_fd, write_fd) = pipe2(OFlag::O_CLOEXEC)?;
        debug!("opened channel pair {:?} -> {:?}", write_fd, read_fd);

        Self::from_files(File::from(read_fd), File::from(write_fd))
    }

    /// Wraps two already-open endpoints, such as a pipe or two handles on
    /// one temporary file.
    pub fn from_files(read_end: File, write_end: File) -> Result<Self> {
        set_nonblocking(&write_end)?;
        Ok(Self {
            read_end,
            write_end,
        })
    }
}

/// Sets O_NONBLOCK on a descriptor, keeping its other status flags.
fn set_nonblocking(fd: impl AsFd) -> Result<()> {
    let fd = fd.as_fd();
    let mut flags = OFlag::from_bits_truncate(fcntl(fd, FcntlArg::F_GETFL)?);
    flags.insert(OFlag::O_NONBLOCK);
    fcntl(fd, FcntlArg::F_SETFL(flags))?;
    Ok(())
}
