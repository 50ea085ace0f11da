//! Lease state machine for containers and blobs.
//!
//! A [`Lease`] is stored as the last record written by a lease operation.
//! Time-driven transitions (a fixed lease running out, a break period
//! elapsing) are never written eagerly; they are re-derived from the stored
//! instants against the caller's `now` every time the record is read. Every
//! operation here is a pure function of `(record, arguments, now)`.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ErrorCode, StorageError, StorageResult};

/// Shortest fixed lease, in seconds.
pub const MIN_LEASE_DURATION: i64 = 15;
/// Longest fixed lease, in seconds.
pub const MAX_LEASE_DURATION: i64 = 60;
/// Longest break period, in seconds.
pub const MAX_BREAK_PERIOD: i64 = 60;

/// Lease duration kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LeaseDuration {
    Infinite,
    /// Fixed lease of the given number of seconds.
    Fixed(u32),
}

impl LeaseDuration {
    /// Parses `x-ms-lease-duration`: `-1` is infinite, otherwise 15..=60.
    pub fn from_seconds(seconds: i64) -> StorageResult<Self> {
        if seconds == -1 {
            return Ok(LeaseDuration::Infinite);
        }
        if (MIN_LEASE_DURATION..=MAX_LEASE_DURATION).contains(&seconds) {
            return Ok(LeaseDuration::Fixed(seconds as u32));
        }
        Err(StorageError::with_message(
            ErrorCode::InvalidHeaderValue,
            format!(
                "Lease duration {} is invalid. It must be -1 or between {} and {} seconds.",
                seconds, MIN_LEASE_DURATION, MAX_LEASE_DURATION
            ),
        ))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LeaseDuration::Infinite => "infinite",
            LeaseDuration::Fixed(_) => "fixed",
        }
    }

    fn expiry_from(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            LeaseDuration::Infinite => None,
            LeaseDuration::Fixed(seconds) => Some(now + Duration::seconds(i64::from(*seconds))),
        }
    }
}

/// Observable lease state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseState {
    Available,
    Leased,
    Expired,
    Breaking,
    Broken,
}

impl LeaseState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LeaseState::Available => "available",
            LeaseState::Leased => "leased",
            LeaseState::Expired => "expired",
            LeaseState::Breaking => "breaking",
            LeaseState::Broken => "broken",
        }
    }
}

/// Observable lease status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseStatus {
    Unlocked,
    Locked,
}

impl LeaseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LeaseStatus::Unlocked => "unlocked",
            LeaseStatus::Locked => "locked",
        }
    }
}

/// Stored lease record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Lease {
    #[default]
    Available,
    Leased {
        lease_id: String,
        duration: LeaseDuration,
        /// Absent for infinite leases.
        expires_at: Option<DateTime<Utc>>,
    },
    Expired {
        lease_id: String,
        duration: LeaseDuration,
    },
    Breaking {
        lease_id: String,
        break_at: DateTime<Utc>,
    },
    Broken {
        lease_id: String,
    },
}

/// A lease operation requested by a caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaseAction {
    Acquire {
        /// `-1` for infinite.
        duration: i64,
        proposed_id: Option<String>,
    },
    Renew {
        lease_id: String,
    },
    Change {
        lease_id: String,
        proposed_id: String,
    },
    Release {
        lease_id: String,
    },
    Break {
        break_period: Option<i64>,
    },
}

impl LeaseAction {
    pub fn name(&self) -> &'static str {
        match self {
            LeaseAction::Acquire { .. } => "acquire",
            LeaseAction::Renew { .. } => "renew",
            LeaseAction::Change { .. } => "change",
            LeaseAction::Release { .. } => "release",
            LeaseAction::Break { .. } => "break",
        }
    }
}

/// Result of a lease operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaseOutcome {
    /// Record to persist.
    pub lease: Lease,
    /// Surfaced as `x-ms-lease-id`.
    pub lease_id: Option<String>,
    /// Surfaced as `x-ms-lease-time` (seconds until a break completes).
    pub lease_time: Option<u64>,
}

/// Which kind of resource a lease protects; selects error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseTarget {
    Blob,
    Container,
}

impl Lease {
    /// Re-derives time-driven transitions against `now`.
    pub fn observe(&self, now: DateTime<Utc>) -> Lease {
        match self {
            Lease::Leased {
                lease_id,
                duration,
                expires_at: Some(expires_at),
            } if *expires_at <= now => Lease::Expired {
                lease_id: lease_id.clone(),
                duration: *duration,
            },
            Lease::Breaking { lease_id, break_at } if *break_at <= now => Lease::Broken {
                lease_id: lease_id.clone(),
            },
            other => other.clone(),
        }
    }

    pub fn state(&self, now: DateTime<Utc>) -> LeaseState {
        match self.observe(now) {
            Lease::Available => LeaseState::Available,
            Lease::Leased { .. } => LeaseState::Leased,
            Lease::Expired { .. } => LeaseState::Expired,
            Lease::Breaking { .. } => LeaseState::Breaking,
            Lease::Broken { .. } => LeaseState::Broken,
        }
    }

    pub fn status(&self, now: DateTime<Utc>) -> LeaseStatus {
        match self.state(now) {
            LeaseState::Leased | LeaseState::Breaking => LeaseStatus::Locked,
            _ => LeaseStatus::Unlocked,
        }
    }

    /// Duration kind, reported only while the lease is held.
    pub fn duration(&self, now: DateTime<Utc>) -> Option<LeaseDuration> {
        match self.observe(now) {
            Lease::Leased { duration, .. } => Some(duration),
            _ => None,
        }
    }

    /// The id of the current or most recent holder.
    pub fn lease_id(&self) -> Option<&str> {
        match self {
            Lease::Available => None,
            Lease::Leased { lease_id, .. }
            | Lease::Expired { lease_id, .. }
            | Lease::Breaking { lease_id, .. }
            | Lease::Broken { lease_id } => Some(lease_id),
        }
    }

    /// Applies a lease operation.
    pub fn apply(&self, action: &LeaseAction, now: DateTime<Utc>) -> StorageResult<LeaseOutcome> {
        match action {
            LeaseAction::Acquire {
                duration,
                proposed_id,
            } => {
                let lease = self.acquire(*duration, proposed_id.as_deref(), now)?;
                Ok(LeaseOutcome {
                    lease_id: lease.lease_id().map(str::to_string),
                    lease,
                    lease_time: None,
                })
            }
            LeaseAction::Renew { lease_id } => {
                let lease = self.renew(lease_id, now)?;
                Ok(LeaseOutcome {
                    lease_id: lease.lease_id().map(str::to_string),
                    lease,
                    lease_time: None,
                })
            }
            LeaseAction::Change {
                lease_id,
                proposed_id,
            } => {
                let lease = self.change(lease_id, proposed_id, now)?;
                Ok(LeaseOutcome {
                    lease_id: lease.lease_id().map(str::to_string),
                    lease,
                    lease_time: None,
                })
            }
            LeaseAction::Release { lease_id } => {
                let lease = self.release(lease_id, now)?;
                Ok(LeaseOutcome {
                    lease,
                    lease_id: None,
                    lease_time: None,
                })
            }
            LeaseAction::Break { break_period } => {
                let (lease, remaining) = self.break_lease(*break_period, now)?;
                Ok(LeaseOutcome {
                    lease,
                    lease_id: None,
                    lease_time: Some(remaining),
                })
            }
        }
    }

    /// Acquires the lease; `duration` is `-1` for infinite.
    pub fn acquire(
        &self,
        duration: i64,
        proposed_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> StorageResult<Lease> {
        let duration = LeaseDuration::from_seconds(duration)?;
        let lease_id = match self.observe(now) {
            Lease::Available | Lease::Expired { .. } | Lease::Broken { .. } => proposed_id
                .map(str::to_string)
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            // Re-acquiring with the held id restarts the lease.
            Lease::Leased { lease_id, .. } => {
                if proposed_id != Some(lease_id.as_str()) {
                    return Err(StorageError::new(ErrorCode::LeaseAlreadyPresent));
                }
                lease_id
            }
            Lease::Breaking { lease_id, .. } => {
                let code = if proposed_id == Some(lease_id.as_str()) {
                    ErrorCode::LeaseIsBreakingAndCannotBeAcquired
                } else {
                    ErrorCode::LeaseAlreadyPresent
                };
                return Err(StorageError::new(code));
            }
        };

        Ok(Lease::Leased {
            lease_id,
            duration,
            expires_at: duration.expiry_from(now),
        })
    }

    /// Renews a held or expired lease for its original duration.
    pub fn renew(&self, lease_id: &str, now: DateTime<Utc>) -> StorageResult<Lease> {
        match self.observe(now) {
            Lease::Available => Err(StorageError::new(
                ErrorCode::LeaseNotPresentWithLeaseOperation,
            )),
            Lease::Leased {
                lease_id: current,
                duration,
                ..
            }
            | Lease::Expired {
                lease_id: current,
                duration,
            } => {
                if current != lease_id {
                    return Err(StorageError::new(
                        ErrorCode::LeaseIdMismatchWithLeaseOperation,
                    ));
                }
                Ok(Lease::Leased {
                    lease_id: current,
                    duration,
                    expires_at: duration.expiry_from(now),
                })
            }
            Lease::Breaking {
                lease_id: current, ..
            }
            | Lease::Broken { lease_id: current } => {
                let code = if current == lease_id {
                    ErrorCode::LeaseIsBrokenAndCannotBeRenewed
                } else {
                    ErrorCode::LeaseIdMismatchWithLeaseOperation
                };
                Err(StorageError::new(code))
            }
        }
    }

    /// Swaps the lease id of a held lease. Retrying with the new id succeeds.
    pub fn change(
        &self,
        lease_id: &str,
        proposed_id: &str,
        now: DateTime<Utc>,
    ) -> StorageResult<Lease> {
        match self.observe(now) {
            Lease::Available | Lease::Expired { .. } | Lease::Broken { .. } => Err(
                StorageError::new(ErrorCode::LeaseNotPresentWithLeaseOperation),
            ),
            Lease::Leased {
                lease_id: current,
                duration,
                expires_at,
            } => {
                if current != lease_id && current != proposed_id {
                    return Err(StorageError::new(
                        ErrorCode::LeaseIdMismatchWithLeaseOperation,
                    ));
                }
                Ok(Lease::Leased {
                    lease_id: proposed_id.to_string(),
                    duration,
                    expires_at,
                })
            }
            Lease::Breaking {
                lease_id: current, ..
            } => {
                let code = if current == lease_id {
                    ErrorCode::LeaseIsBreakingAndCannotBeChanged
                } else {
                    ErrorCode::LeaseIdMismatchWithLeaseOperation
                };
                Err(StorageError::new(code))
            }
        }
    }

    /// Releases the lease, returning the resource to `Available`.
    pub fn release(&self, lease_id: &str, now: DateTime<Utc>) -> StorageResult<Lease> {
        match self.observe(now).lease_id() {
            Some(current) if current == lease_id => Ok(Lease::Available),
            _ => Err(StorageError::new(
                ErrorCode::LeaseIdMismatchWithLeaseOperation,
            )),
        }
    }

    /// Breaks the lease. Returns the new record and the seconds remaining
    /// until the break completes.
    pub fn break_lease(
        &self,
        break_period: Option<i64>,
        now: DateTime<Utc>,
    ) -> StorageResult<(Lease, u64)> {
        if let Some(period) = break_period {
            if !(0..=MAX_BREAK_PERIOD).contains(&period) {
                return Err(StorageError::with_message(
                    ErrorCode::InvalidHeaderValue,
                    format!(
                        "Lease break period {} is invalid. It must be between 0 and {} seconds.",
                        period, MAX_BREAK_PERIOD
                    ),
                ));
            }
        }
        let requested = break_period.map(|period| now + Duration::seconds(period));

        let next = match self.observe(now) {
            Lease::Available => {
                return Err(StorageError::new(
                    ErrorCode::LeaseNotPresentWithLeaseOperation,
                ))
            }
            Lease::Leased {
                lease_id,
                expires_at,
                ..
            } => {
                let break_at = match (requested, expires_at) {
                    (Some(requested), Some(expires_at)) => Some(requested.min(expires_at)),
                    (Some(requested), None) => Some(requested),
                    (None, Some(expires_at)) => Some(expires_at),
                    (None, None) => None,
                };
                match break_at {
                    Some(break_at) if break_at > now => Lease::Breaking { lease_id, break_at },
                    _ => Lease::Broken { lease_id },
                }
            }
            Lease::Expired { lease_id, .. } => Lease::Broken { lease_id },
            Lease::Breaking { lease_id, break_at } => match requested {
                None => Lease::Breaking { lease_id, break_at },
                Some(requested) if requested.min(break_at) > now => Lease::Breaking {
                    lease_id,
                    break_at: requested.min(break_at),
                },
                Some(_) => Lease::Broken { lease_id },
            },
            broken @ Lease::Broken { .. } => broken,
        };

        let remaining = next.remaining_break_seconds(now);
        Ok((next, remaining))
    }

    /// Seconds until a breaking lease is broken, rounded up.
    pub fn remaining_break_seconds(&self, now: DateTime<Utc>) -> u64 {
        match self.observe(now) {
            Lease::Breaking { break_at, .. } => {
                let millis = (break_at - now).num_milliseconds().max(0) as u64;
                millis.div_ceil(1000)
            }
            _ => 0,
        }
    }

    /// Record to persist after a successful write to the leased resource:
    /// an expired or broken lease is cleared.
    pub fn after_write(&self, now: DateTime<Utc>) -> Lease {
        match self.observe(now) {
            Lease::Expired { .. } | Lease::Broken { .. } => Lease::Available,
            other => other,
        }
    }

    /// Validates `lease_id` for an operation that modifies the resource.
    pub fn check_write_access(
        &self,
        lease_id: Option<&str>,
        target: LeaseTarget,
        now: DateTime<Utc>,
    ) -> StorageResult<()> {
        let observed = self.observe(now);
        let held = match &observed {
            Lease::Leased { lease_id, .. } | Lease::Breaking { lease_id, .. } => Some(lease_id),
            _ => None,
        };
        match (held, lease_id) {
            (Some(_), None) => Err(StorageError::new(ErrorCode::LeaseIdMissing)),
            (Some(held), Some(given)) if held != given => {
                Err(StorageError::new(target.mismatch_code()))
            }
            (None, Some(_)) => Err(StorageError::new(target.lost_code())),
            _ => Ok(()),
        }
    }

    /// Validates `lease_id` for a read; reads only fail when an id is given.
    pub fn check_read_access(
        &self,
        lease_id: Option<&str>,
        target: LeaseTarget,
        now: DateTime<Utc>,
    ) -> StorageResult<()> {
        let Some(given) = lease_id else {
            return Ok(());
        };
        match self.observe(now) {
            Lease::Leased { lease_id, .. } | Lease::Breaking { lease_id, .. } => {
                if lease_id != given {
                    return Err(StorageError::new(target.mismatch_code()));
                }
                Ok(())
            }
            _ => Err(StorageError::new(target.lost_code())),
        }
    }
}

impl LeaseTarget {
    fn mismatch_code(&self) -> ErrorCode {
        match self {
            LeaseTarget::Blob => ErrorCode::LeaseIdMismatchWithBlobOperation,
            LeaseTarget::Container => ErrorCode::LeaseIdMismatchWithContainerOperation,
        }
    }

    fn lost_code(&self) -> ErrorCode {
        match self {
            LeaseTarget::Blob => ErrorCode::LeaseLost,
            LeaseTarget::Container => ErrorCode::LeaseNotPresentWithContainerOperation,
        }
    }
}
