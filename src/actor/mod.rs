//! Actor plumbing: addresses, envelopes and the in-process router
//!
//! Every participant (master, frameworks, workers) owns a mailbox of
//! envelopes processed serially in arrival order. The router maps an
//! address to a delivery sink and reports broken endpoints as `Exited`
//! events to peers that linked against them. There is no shared
//! mutable state across actors; everything crosses this seam.

pub mod clock;

use crate::messages::Protocol;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

/// A process address: `id@host:port`. The address part is the key the
/// master uses to map senders back to principals.
#[derive(Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Pid {
    pub id: String,
    pub address: String,
}

impl Pid {
    pub fn new<I: Into<String>, A: Into<String>>(id: I, address: A) -> Self {
        Pid {
            id: id.into(),
            address: address.into(),
        }
    }

    /// Parse `id@host:port`.
    pub fn parse(text: &str) -> Result<Self, String> {
        match text.split_once('@') {
            Some((id, address)) if !id.is_empty() && !address.is_empty() => {
                Ok(Pid::new(id, address))
            }
            _ => Err(format!("expected 'id@host:port', got '{}'", text)),
        }
    }
}

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.id, self.address)
    }
}

/// A mailbox event. Messages carry the sender so handlers can verify
/// the source; Exited reports a linked endpoint going away.
#[derive(Clone, Debug)]
pub enum Envelope {
    Message { from: Pid, message: Protocol },
    Exited { pid: Pid },
}

type Sink = Arc<dyn Fn(Envelope) + Send + Sync>;

struct RouterInner {
    endpoints: HashMap<Pid, Sink>,
    /// target -> observers to notify when target goes away.
    links: HashMap<Pid, HashSet<Pid>>,
}

/// In-process message routing between actors.
///
/// Delivery is synchronous into the destination mailbox (the sink is
/// expected to be an unbounded channel push), so messages from one
/// sender arrive in send order.
#[derive(Clone)]
pub struct Router {
    inner: Arc<Mutex<RouterInner>>,
}

impl Router {
    pub fn new() -> Self {
        Router {
            inner: Arc::new(Mutex::new(RouterInner {
                endpoints: HashMap::new(),
                links: HashMap::new(),
            })),
        }
    }

    /// Register a delivery sink for `pid`.
    pub fn register<F: Fn(Envelope) + Send + Sync + 'static>(&self, pid: Pid, sink: F) {
        self.inner.lock().endpoints.insert(pid, Arc::new(sink));
    }

    /// Register a mailbox for `pid` and return its receiving end.
    pub fn register_mailbox(&self, pid: Pid) -> mpsc::UnboundedReceiver<Envelope> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.register(pid, move |envelope| {
            let _ = tx.send(envelope);
        });
        rx
    }

    /// Ask to be notified with an `Exited` event when `target`'s
    /// endpoint is torn down.
    pub fn link(&self, observer: &Pid, target: &Pid) {
        self.inner
            .lock()
            .links
            .entry(target.clone())
            .or_default()
            .insert(observer.clone());
    }

    /// Tear down `pid`'s endpoint and notify linked observers.
    pub fn unregister(&self, pid: &Pid) {
        let (removed, observers) = {
            let mut inner = self.inner.lock();
            let removed = inner.endpoints.remove(pid).is_some();
            let observers: Vec<Sink> = inner
                .links
                .remove(pid)
                .into_iter()
                .flatten()
                .filter_map(|observer| inner.endpoints.get(&observer).cloned())
                .collect();
            (removed, observers)
        };

        if removed {
            for sink in observers {
                sink(Envelope::Exited { pid: pid.clone() });
            }
        }
    }

    /// Deliver a message. Returns false when the destination is gone.
    pub fn send(&self, from: &Pid, to: &Pid, message: Protocol) -> bool {
        let sink = self.inner.lock().endpoints.get(to).cloned();
        match sink {
            Some(sink) => {
                sink(Envelope::Message {
                    from: from.clone(),
                    message,
                });
                true
            }
            None => false,
        }
    }
}

impl Default for Router {
    fn default() -> Self {
        Router::new()
    }
}
