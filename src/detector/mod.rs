//! Leader election interfaces
//!
//! The coordinator (an external leader-election and durable-registry
//! service) is abstracted behind two seams: a [`Contender`] through
//! which this master stands for election, and a [`Detector`] through
//! which any process learns who currently leads. The master reference
//! URL selects the backing: `zk://host:port,.../path` for a
//! coordinated cluster, `file://path` to read an address from a file,
//! and a bare `host:port` for standalone operation.

use crate::eventual::{Eventual, Promise};
use crate::state::MasterInfo;
use parking_lot::Mutex;
use std::sync::Arc;

#[derive(Clone, Debug, PartialEq)]
pub enum MasterUrl {
    /// Coordinated cluster with election.
    Zk { servers: String, path: String },
    /// Address read from a file.
    File(String),
    /// Fixed standalone address.
    Address(String),
}

impl std::str::FromStr for MasterUrl {
    type Err = String;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        if let Some(rest) = text.strip_prefix("zk://") {
            let (servers, path) = rest
                .split_once('/')
                .ok_or_else(|| format!("zk url '{}' is missing a path", text))?;
            if servers.is_empty() {
                return Err(format!("zk url '{}' has no servers", text));
            }
            return Ok(MasterUrl::Zk {
                servers: servers.to_string(),
                path: format!("/{}", path),
            });
        }
        if let Some(path) = text.strip_prefix("file://") {
            return Ok(MasterUrl::File(path.to_string()));
        }
        if text.contains(':') && !text.contains("://") {
            return Ok(MasterUrl::Address(text.to_string()));
        }
        Err(format!("unrecognized master url '{}'", text))
    }
}

/// Stands this master for election. `contend` resolves once candidacy
/// is acquired; the inner eventual resolves when candidacy is lost.
pub trait Contender: Send + Sync {
    fn contend(&self) -> Eventual<Eventual<()>>;
}

/// Watches leadership. `detect` resolves when the leader differs from
/// `previous`; `None` means no leader is currently elected.
pub trait Detector: Send + Sync {
    fn detect(&self, previous: Option<MasterInfo>) -> Eventual<Option<MasterInfo>>;
}

struct StandaloneState {
    leader: Option<MasterInfo>,
    watchers: Vec<(Option<MasterInfo>, Promise<Option<MasterInfo>>)>,
}

/// Detector for standalone setups and tests: leadership is whatever
/// `appoint` last announced.
#[derive(Clone)]
pub struct StandaloneDetector {
    state: Arc<Mutex<StandaloneState>>,
}

impl StandaloneDetector {
    pub fn new() -> Self {
        StandaloneDetector {
            state: Arc::new(Mutex::new(StandaloneState {
                leader: None,
                watchers: Vec::new(),
            })),
        }
    }

    /// Announce a new leader (or None for no leader) and wake every
    /// watcher whose previous view differs.
    pub fn appoint(&self, leader: Option<MasterInfo>) {
        let woken = {
            let mut state = self.state.lock();
            state.leader = leader.clone();
            let (wake, keep): (Vec<_>, Vec<_>) = state
                .watchers
                .drain(..)
                .partition(|(previous, _)| previous != &leader);
            state.watchers = keep;
            wake
        };
        for (_, promise) in woken {
            promise.set(leader.clone());
        }
    }
}

impl Default for StandaloneDetector {
    fn default() -> Self {
        StandaloneDetector::new()
    }
}

impl Detector for StandaloneDetector {
    fn detect(&self, previous: Option<MasterInfo>) -> Eventual<Option<MasterInfo>> {
        let mut state = self.state.lock();
        if state.leader != previous {
            return Eventual::ready(state.leader.clone());
        }
        let promise = Promise::new();
        let eventual = promise.eventual();
        state.watchers.push((previous, promise));
        eventual
    }
}

/// Contender that always wins candidacy and never loses it unless
/// told to.
pub struct StandaloneContender {
    lost: Mutex<Option<Promise<()>>>,
}

impl StandaloneContender {
    pub fn new() -> Self {
        StandaloneContender {
            lost: Mutex::new(None),
        }
    }

    /// Force loss of candidacy (used by tests).
    pub fn lose(&self) {
        if let Some(promise) = self.lost.lock().take() {
            promise.set(());
        }
    }
}

impl Default for StandaloneContender {
    fn default() -> Self {
        StandaloneContender::new()
    }
}

impl Contender for StandaloneContender {
    fn contend(&self) -> Eventual<Eventual<()>> {
        let promise = Promise::new();
        let lost = promise.eventual();
        *self.lost.lock() = Some(promise);
        Eventual::ready(lost)
    }
}
