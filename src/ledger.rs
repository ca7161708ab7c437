//! Change-suppression ledger
//!
//! Every write or delete the engine performs on an entry file will also be observed by the
//! filesystem watcher. Before touching the file the engine records a token predicting that
//! observation; the watcher consumes the token instead of reprocessing its own change.
//!
//! Tokens that are never matched (the OS coalesced or dropped the event) expire after the
//! configured ttl so the ledger cannot grow without bound.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};
use tracing::debug;

/// Kind of self-caused mutation a token predicts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Set,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Set => "set",
            Method::Delete => "delete",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A predicted filesystem change on one entry
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChangeToken {
    pub method: Method,
    pub store: String,
    pub id: String,
}

impl ChangeToken {
    pub fn new(method: Method, store: &str, id: &str) -> Self {
        Self {
            method,
            store: store.to_string(),
            id: id.to_string(),
        }
    }

    fn matches(&self, method: Method, store: &str, id: &str) -> bool {
        self.method == method && self.store == store && self.id == id
    }
}

impl fmt::Display for ChangeToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}::{}", self.method, self.store, self.id)
    }
}

/// FIFO of pending tokens, shared by API callers and the watch thread
pub struct ModLedger {
    ttl: Duration,
    tokens: Mutex<VecDeque<(ChangeToken, Instant)>>,
}

impl ModLedger {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            tokens: Mutex::new(VecDeque::new()),
        }
    }

    /// Append a token for a change the engine is about to make.
    pub fn record(&self, method: Method, store: &str, id: &str) {
        let now = Instant::now();
        let mut tokens = self.tokens.lock();
        self.prune(&mut tokens, now);
        tokens.push_back((ChangeToken::new(method, store, id), now));
    }

    /// Remove the oldest live token matching the change.
    ///
    /// Returns true when the change was predicted, meaning the caller should not process it.
    pub fn check_and_consume(&self, method: Method, store: &str, id: &str) -> bool {
        let mut tokens = self.tokens.lock();
        self.prune(&mut tokens, Instant::now());
        match tokens.iter().position(|(t, _)| t.matches(method, store, id)) {
            Some(index) => {
                if let Some((token, _)) = tokens.remove(index) {
                    debug!(token = %token, "Suppressed self-caused change");
                }
                true
            }
            None => false,
        }
    }

    /// Number of live tokens
    pub fn len(&self) -> usize {
        let mut tokens = self.tokens.lock();
        self.prune(&mut tokens, Instant::now());
        tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn prune(&self, tokens: &mut VecDeque<(ChangeToken, Instant)>, now: Instant) {
        // Tokens are appended in time order, so expired ones sit at the front.
        while let Some((token, recorded)) = tokens.front() {
            if now.duration_since(*recorded) < self.ttl {
                break;
            }
            debug!(token = %token, "Expired unmatched change token");
            tokens.pop_front();
        }
    }
}
