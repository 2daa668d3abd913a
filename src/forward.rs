use crate::error::{Error, Result};
use crate::stream::{lock, PatternStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use tracing::{debug, warn};

/// A producer that copies bytes from some external source into a stream.
///
/// Implementors supply [`forward_loop`](Self::forward_loop) and own a
/// [`Forwarder`] that runs it on a background thread.
pub trait ForwardIo: Send + Sync + 'static {
    /// Copies bytes into `stream` until the source is exhausted or `cancel`
    /// is set.
    fn forward_loop(&self, stream: &PatternStream, cancel: &CancelToken) -> Result<()> {
        let _ = (stream, cancel);
        Err(Error::NotImplemented("forward_loop"))
    }
}

/// Cooperative stop flag shared with a forwarding thread.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Runs at most one forwarding thread per producer.
///
/// The thread is detached: nothing joins it unless [`join`](Self::join) is
/// called, and teardown may abandon it mid-write.
#[derive(Debug, Default)]
pub struct Forwarder {
    started: AtomicBool,
    cancel: CancelToken,
    handle: Mutex<Option<JoinHandle<Result<()>>>>,
}

impl Forwarder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawns the forwarding thread for `producer`.
    ///
    /// Returns `Ok(false)` without spawning when a thread was already
    /// started.
    pub fn start<P: ForwardIo>(&self, producer: Arc<P>, stream: Arc<PatternStream>) -> Result<bool> {
        if self.started.swap(true, Ordering::SeqCst) {
            debug!("forwarder already started");
            return Ok(false);
        }

        let cancel = self.cancel.clone();
        let spawned = thread::Builder::new()
            .name("forward-io".to_string())
            .spawn(move || {
                let result = producer.forward_loop(&stream, &cancel);
                match &result {
                    Ok(()) => debug!("forwarding into {:?} finished", stream.source()),
                    Err(e) => warn!("forwarding into {:?} stopped: {}", stream.source(), e),
                }
                result
            });

        match spawned {
            Ok(handle) => {
                *lock(&self.handle) = Some(handle);
                Ok(true)
            }
            Err(e) => {
                self.started.store(false, Ordering::SeqCst);
                Err(e.into())
            }
        }
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Whether a started thread has not finished yet.
    pub fn is_running(&self) -> bool {
        lock(&self.handle)
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Asks the forwarding loop to stop at its next check.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Waits for the forwarding thread and returns what its loop returned.
    /// Returns `Ok(())` when there is nothing to join.
    pub fn join(&self) -> Result<()> {
        let Some(handle) = lock(&self.handle).take() else {
            return Ok(());
        };
        match handle.join() {
            Ok(result) => result,
            Err(_) => Err(std::io::Error::other("forwarding thread panicked").into()),
        }
    }
}

impl Drop for Forwarder {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
