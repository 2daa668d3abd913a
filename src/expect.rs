//! Blocking pattern matching on top of [`PatternStream::read_nonblocking`].
//!
//! Text read from the channel accumulates in the stream's pending buffer.
//! Each `expect` call searches that buffer, reads more when nothing matches,
//! and stops at the first match or when its deadline passes. Whatever follows
//! a match stays pending for the next call.

use crate::error::{Error, Result};
use crate::stream::{lock, PatternStream};
use regex::Regex;
use std::thread;
use std::time::{Duration, Instant};
use tracing::debug;

/// Back-off after a read that was ready but returned nothing.
const IDLE_READ_PAUSE: Duration = Duration::from_millis(10);

/// Something an `expect` call can wait for.
#[derive(Debug, Clone)]
pub enum Pattern {
    /// Literal text.
    Exact(String),
    Regex(Regex),
    /// Matches when the stream reports end of stream.
    Eof,
    /// Matches when the deadline passes.
    Timeout,
}

impl Pattern {
    pub fn exact(text: impl Into<String>) -> Self {
        Pattern::Exact(text.into())
    }

    pub fn regex(pattern: &str) -> Result<Self> {
        Ok(Pattern::Regex(Regex::new(pattern)?))
    }

    fn find(&self, haystack: &str) -> Option<Found> {
        match self {
            Pattern::Exact(text) => haystack.find(text.as_str()).map(|start| Found {
                start,
                end: start + text.len(),
                captures: Vec::new(),
            }),
            Pattern::Regex(regex) => regex.captures(haystack).and_then(|caps| {
                let whole = caps.get(0)?;
                Some(Found {
                    start: whole.start(),
                    end: whole.end(),
                    captures: caps
                        .iter()
                        .skip(1)
                        .map(|group| group.map(|m| m.as_str().to_string()))
                        .collect(),
                })
            }),
            Pattern::Eof | Pattern::Timeout => None,
        }
    }
}

impl From<&str> for Pattern {
    fn from(text: &str) -> Self {
        Pattern::exact(text)
    }
}

impl From<String> for Pattern {
    fn from(text: String) -> Self {
        Pattern::Exact(text)
    }
}

impl From<Regex> for Pattern {
    fn from(regex: Regex) -> Self {
        Pattern::Regex(regex)
    }
}

/// The outcome of a successful `expect` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Match {
    /// Index of the pattern that matched
    pub index: usize,
    /// Text consumed before the match
    pub before: String,
    /// The matched text; empty for `Eof` and `Timeout`
    pub matched: String,
    /// Regex capture groups, excluding the whole match
    pub captures: Vec<Option<String>>,
}

struct Found {
    start: usize,
    end: usize,
    captures: Vec<Option<String>>,
}

impl PatternStream {
    /// Waits until one of `patterns` matches.
    ///
    /// The match starting earliest in the buffer wins; ties go to the pattern
    /// listed first. `None` uses the configured timeout.
    pub fn expect_any(&self, patterns: &[Pattern], timeout: Option<Duration>) -> Result<Match> {
        let timeout = timeout.unwrap_or(self.config().timeout);
        let deadline = Instant::now() + timeout;
        let mut pending = lock(&self.pending);
        let mut expired = false;

        loop {
            if let Some((index, found)) = search(patterns, &pending, self.config().search_window) {
                let matched = pending[found.start..found.end].to_string();
                let before = pending[..found.start].to_string();
                pending.replace_range(..found.end, "");
                debug!("pattern {} matched {:?}", index, matched);

                return Ok(Match {
                    index,
                    before,
                    matched,
                    captures: found.captures,
                });
            }

            if expired {
                return timed_out(patterns, &pending, timeout);
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.read_nonblocking(self.config().max_read_size, Some(remaining)) {
                Ok(text) => {
                    // readable-but-empty channels (EOF on a file, EIO on a
                    // pty) never report a timeout themselves
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    expired = remaining.is_zero();
                    if text.is_empty() && !expired {
                        thread::sleep(remaining.min(IDLE_READ_PAUSE));
                    }
                    pending.push_str(&text);
                }
                Err(Error::Timeout(_)) => return timed_out(patterns, &pending, timeout),
                Err(Error::EndOfStream(reason)) => {
                    return match position(patterns, |p| matches!(p, Pattern::Eof)) {
                        Some(index) => Ok(Match {
                            index,
                            before: std::mem::take(&mut *pending),
                            matched: String::new(),
                            captures: Vec::new(),
                        }),
                        None => Err(Error::EndOfStream(reason)),
                    };
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Waits until `pattern` matches.
    pub fn expect(&self, pattern: impl Into<Pattern>, timeout: Option<Duration>) -> Result<Match> {
        self.expect_any(&[pattern.into()], timeout)
    }

    /// Waits until the literal `text` appears.
    pub fn expect_exact(&self, text: &str, timeout: Option<Duration>) -> Result<Match> {
        self.expect_any(&[Pattern::exact(text)], timeout)
    }

    /// Text read from the channel but not yet consumed by a match.
    pub fn buffer(&self) -> String {
        lock(&self.pending).clone()
    }

    /// Drops any unmatched text.
    pub fn clear_buffer(&self) {
        lock(&self.pending).clear();
    }
}

fn timed_out(patterns: &[Pattern], pending: &str, timeout: Duration) -> Result<Match> {
    match position(patterns, |p| matches!(p, Pattern::Timeout)) {
        Some(index) => Ok(Match {
            index,
            before: pending.to_string(),
            matched: String::new(),
            captures: Vec::new(),
        }),
        None => Err(Error::Timeout(timeout)),
    }
}

fn position(patterns: &[Pattern], predicate: impl Fn(&Pattern) -> bool) -> Option<usize> {
    patterns.iter().position(predicate)
}

fn search(patterns: &[Pattern], pending: &str, window: Option<usize>) -> Option<(usize, Found)> {
    let mut offset = window.map_or(0, |window| pending.len().saturating_sub(window));
    while !pending.is_char_boundary(offset) {
        offset += 1;
    }
    let haystack = &pending[offset..];

    let mut best: Option<(usize, Found)> = None;
    for (index, pattern) in patterns.iter().enumerate() {
        let Some(found) = pattern.find(haystack) else {
            continue;
        };
        if best.as_ref().map_or(true, |(_, b)| found.start < b.start) {
            best = Some((index, found));
        }
    }

    best.map(|(index, found)| {
        (
            index,
            Found {
                start: found.start + offset,
                end: found.end + offset,
                captures: found.captures,
            },
        )
    })
}
