//! Master configuration

use std::fmt;
use std::time::Duration;

/// Workers recovered from the registry get at least this long to
/// re-register before removal.
pub const MIN_WORKER_REREGISTER_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Health-check cadence towards each worker.
pub const PING_INTERVAL: Duration = Duration::from_secs(15);

/// Unanswered pings tolerated before a worker is shut down.
pub const MAX_MISSED_PINGS: u32 = 5;

/// Completed frameworks retained for lookups and worker teardown.
pub const MAX_COMPLETED_FRAMEWORKS: usize = 50;

/// Completed tasks retained per framework.
pub const MAX_COMPLETED_TASKS_PER_FRAMEWORK: usize = 1000;

/// Removed workers remembered to fence out zombies. Eviction-only.
pub const MAX_REMOVED_WORKERS: usize = 100_000;

/// In-flight authorization requests are abandoned after this long.
pub const AUTHORIZATION_TIMEOUT: Duration = Duration::from_secs(30);

/// Rate limit for one principal. `qps: None` leaves the principal
/// unthrottled even when a default limiter exists.
#[derive(Clone, Debug)]
pub struct RateLimit {
    pub principal: String,
    pub qps: Option<f64>,
    pub capacity: Option<u64>,
}

#[derive(Clone, Debug, Default)]
pub struct RateLimits {
    pub limits: Vec<RateLimit>,
    /// Applied to registered frameworks without a principal, or whose
    /// principal has no entry above.
    pub aggregate_default_qps: Option<f64>,
    pub aggregate_default_capacity: Option<u64>,
}

#[derive(Clone, Debug)]
pub struct MasterConfig {
    pub hostname: String,
    pub port: u16,
    /// Roles frameworks may register with. Always includes `*`.
    pub roles: Vec<String>,
    /// Whether frameworks may run as the root user.
    pub root_submissions: bool,
    pub registry_strict: bool,
    pub worker_reregister_timeout: Duration,
    /// Percentage string, e.g. `"100%"`. If post-recovery removal
    /// would exceed this fraction of recovered workers, the master
    /// aborts instead.
    pub recovery_worker_removal_limit: String,
    pub offer_timeout: Option<Duration>,
    pub max_executors_per_worker: Option<usize>,
    pub ping_interval: Duration,
    pub max_missed_pings: u32,
    pub rate_limits: Option<RateLimits>,
    pub whitelist: Option<Vec<String>>,
}

impl Default for MasterConfig {
    fn default() -> Self {
        MasterConfig {
            hostname: "localhost".to_string(),
            port: 5050,
            roles: vec!["*".to_string()],
            root_submissions: true,
            registry_strict: false,
            worker_reregister_timeout: MIN_WORKER_REREGISTER_TIMEOUT,
            recovery_worker_removal_limit: "100%".to_string(),
            offer_timeout: None,
            max_executors_per_worker: None,
            ping_interval: PING_INTERVAL,
            max_missed_pings: MAX_MISSED_PINGS,
            rate_limits: None,
            whitelist: None,
        }
    }
}

impl MasterConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_reregister_timeout < MIN_WORKER_REREGISTER_TIMEOUT {
            return Err(ConfigError::ReregisterTimeoutTooShort {
                configured: self.worker_reregister_timeout,
                minimum: MIN_WORKER_REREGISTER_TIMEOUT,
            });
        }

        self.removal_limit_fraction()?;

        if !self.roles.contains(&"*".to_string()) {
            return Err(ConfigError::MissingDefaultRole);
        }

        if let Some(limits) = &self.rate_limits {
            let mut seen = std::collections::HashSet::new();
            for limit in &limits.limits {
                if !seen.insert(&limit.principal) {
                    return Err(ConfigError::DuplicateRateLimit {
                        principal: limit.principal.clone(),
                    });
                }
                if limit.capacity.is_some() && limit.qps.is_none() {
                    return Err(ConfigError::CapacityWithoutQps {
                        principal: limit.principal.clone(),
                    });
                }
                if let Some(qps) = limit.qps {
                    if qps <= 0.0 {
                        return Err(ConfigError::InvalidQps {
                            principal: limit.principal.clone(),
                            qps,
                        });
                    }
                }
            }
            if let Some(qps) = limits.aggregate_default_qps {
                if qps <= 0.0 {
                    return Err(ConfigError::InvalidQps {
                        principal: "(default)".to_string(),
                        qps,
                    });
                }
            }
        }

        Ok(())
    }

    /// The removal limit as a fraction in [0, 1].
    pub fn removal_limit_fraction(&self) -> Result<f64, ConfigError> {
        let raw = self
            .recovery_worker_removal_limit
            .strip_suffix('%')
            .unwrap_or(&self.recovery_worker_removal_limit);
        let percent: f64 = raw.trim().parse().map_err(|_| ConfigError::InvalidPercentage {
            value: self.recovery_worker_removal_limit.clone(),
        })?;
        if !(0.0..=100.0).contains(&percent) {
            return Err(ConfigError::InvalidPercentage {
                value: self.recovery_worker_removal_limit.clone(),
            });
        }
        Ok(percent / 100.0)
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.hostname, self.port)
    }
}

#[derive(Debug)]
pub enum ConfigError {
    ReregisterTimeoutTooShort {
        configured: Duration,
        minimum: Duration,
    },
    InvalidPercentage {
        value: String,
    },
    MissingDefaultRole,
    DuplicateRateLimit {
        principal: String,
    },
    CapacityWithoutQps {
        principal: String,
    },
    InvalidQps {
        principal: String,
        qps: f64,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::ReregisterTimeoutTooShort {
                configured,
                minimum,
            } => write!(
                f,
                "worker re-register timeout {:?} is below the minimum {:?}",
                configured, minimum
            ),
            ConfigError::InvalidPercentage { value } => {
                write!(f, "'{}' is not a valid percentage", value)
            }
            ConfigError::MissingDefaultRole => {
                write!(f, "the role list must include the unreserved role '*'")
            }
            ConfigError::DuplicateRateLimit { principal } => {
                write!(f, "duplicate rate limit for principal '{}'", principal)
            }
            ConfigError::CapacityWithoutQps { principal } => write!(
                f,
                "rate limit capacity for principal '{}' requires a qps",
                principal
            ),
            ConfigError::InvalidQps { principal, qps } => {
                write!(f, "invalid qps {} for principal '{}'", qps, principal)
            }
        }
    }
}

impl std::error::Error for ConfigError {}
