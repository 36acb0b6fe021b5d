//! Identifier newtypes
//!
//! All ids on the wire are opaque byte-strings. The master mints
//! framework, worker and offer ids scoped by its own epoch id so that
//! ids from a previous master generation can never collide.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl $name {
            pub fn new<S: Into<String>>(value: S) -> Self {
                $name(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                $name(value.to_string())
            }
        }
    };
}

id_type!(
    /// Identifies a framework across failovers of its scheduler.
    FrameworkId
);
id_type!(
    /// Identifies a worker for its whole lifetime, across re-registrations.
    WorkerId
);
id_type!(
    /// Identifies a single resource offer within a master epoch.
    OfferId
);
id_type!(
    /// Identifies a task within its framework.
    TaskId
);
id_type!(
    /// Identifies an executor within (framework, worker).
    ExecutorId
);

/// The master epoch id: `{date}-{ip}-{port}-{pid}`.
#[derive(Clone, Debug, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub struct MasterId(pub String);

impl MasterId {
    /// Mint an epoch id for a master bound to `ip:port`.
    pub fn generate(ip: &str, port: u16) -> Self {
        let date = chrono::Utc::now().format("%Y%m%d-%H%M%S");
        let pid = std::process::id();
        MasterId(format!("{}-{}-{}-{}", date, ip, port, pid))
    }
}

impl fmt::Display for MasterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Mints framework, worker and offer ids scoped by the master id.
///
/// Sequence numbers are per-kind and only ever increase within an epoch,
/// which makes offer ids globally unique for the epoch.
#[derive(Debug)]
pub struct IdMinter {
    master_id: MasterId,
    next_framework: u64,
    next_worker: u64,
    next_offer: u64,
}

impl IdMinter {
    pub fn new(master_id: MasterId) -> Self {
        IdMinter {
            master_id,
            next_framework: 0,
            next_worker: 0,
            next_offer: 0,
        }
    }

    pub fn framework_id(&mut self) -> FrameworkId {
        let seq = self.next_framework;
        self.next_framework += 1;
        FrameworkId(format!("{}-{:04}", self.master_id, seq))
    }

    pub fn worker_id(&mut self) -> WorkerId {
        let seq = self.next_worker;
        self.next_worker += 1;
        WorkerId(format!("{}-S{}", self.master_id, seq))
    }

    pub fn offer_id(&mut self) -> OfferId {
        let seq = self.next_offer;
        self.next_offer += 1;
        OfferId(format!("{}-O{}", self.master_id, seq))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minted_ids_are_scoped_and_sequential() {
        let mut minter = IdMinter::new(MasterId("20260101-000000-lo-5050-1".into()));

        assert_eq!(
            minter.framework_id().as_str(),
            "20260101-000000-lo-5050-1-0000"
        );
        assert_eq!(
            minter.framework_id().as_str(),
            "20260101-000000-lo-5050-1-0001"
        );
        assert_eq!(minter.worker_id().as_str(), "20260101-000000-lo-5050-1-S0");
        assert_eq!(minter.offer_id().as_str(), "20260101-000000-lo-5050-1-O0");
        assert_eq!(minter.offer_id().as_str(), "20260101-000000-lo-5050-1-O1");
    }

    #[test]
    fn test_offer_ids_unique_within_epoch() {
        let mut minter = IdMinter::new(MasterId("m".into()));
        let mut seen = std::collections::HashSet::new();
        for _ in 0..1000 {
            assert!(seen.insert(minter.offer_id()));
        }
    }
}
