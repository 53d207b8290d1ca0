//! Connection lifecycle states and health check results.

use std::fmt;
use std::time::{Duration, Instant};

/// Lifecycle state of a pooled connection.
///
/// ```text
/// Free -> CheckedOut -> Free
///              |
///              v
///       PossiblyBroken -> Destroyed
/// ```
///
/// `PossiblyBroken` can be entered from any live state; `Destroyed` is
/// terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Sitting in its partition's free queue, or being tested by the reaper.
    Free,
    /// Exclusively held by one caller.
    CheckedOut,
    /// A driver call failed; the connection will be destroyed rather than reused.
    PossiblyBroken,
    /// Physically closed and removed from partition accounting.
    Destroyed,
}

impl ConnectionState {
    /// Whether the connection can still be handed to a caller.
    #[must_use]
    pub fn is_reusable(&self) -> bool {
        matches!(self, Self::Free | Self::CheckedOut)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Free => "free",
            Self::CheckedOut => "checked-out",
            Self::PossiblyBroken => "possibly-broken",
            Self::Destroyed => "destroyed",
        };
        f.write_str(s)
    }
}

/// Outcome of a keep-alive test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthCheckResult {
    /// The connection answered.
    Healthy {
        /// Round-trip time of the test.
        latency: Duration,
    },
    /// The connection did not answer; it will be destroyed.
    ValidationFailed {
        /// Why the test failed.
        reason: String,
    },
}

impl HealthCheckResult {
    /// Whether the test passed.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        matches!(self, Self::Healthy { .. })
    }
}

/// Point-in-time snapshot of a connection's bookkeeping.
#[derive(Debug, Clone, Copy)]
pub struct ConnectionMetadata {
    /// Pool-unique connection id.
    pub id: u64,
    /// Partition that owns the connection.
    pub partition: usize,
    /// When the physical connection was opened.
    pub created_at: Instant,
    /// Last time a caller released the connection.
    pub last_used_at: Instant,
    /// Last successful keep-alive test (or creation).
    pub last_reset_at: Instant,
    /// Current lifecycle state.
    pub state: ConnectionState,
}

impl ConnectionMetadata {
    /// Time since the connection was last released.
    #[must_use]
    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_used_at)
    }

    /// Age of the physical connection.
    #[must_use]
    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.created_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reusable_states() {
        assert!(ConnectionState::Free.is_reusable());
        assert!(ConnectionState::CheckedOut.is_reusable());
        assert!(!ConnectionState::PossiblyBroken.is_reusable());
        assert!(!ConnectionState::Destroyed.is_reusable());
    }

    #[test]
    fn test_metadata_durations() {
        let start = Instant::now();
        let meta = ConnectionMetadata {
            id: 1,
            partition: 0,
            created_at: start,
            last_used_at: start + Duration::from_millis(10),
            last_reset_at: start,
            state: ConnectionState::Free,
        };
        let now = start + Duration::from_millis(110);
        assert_eq!(meta.idle_for(now), Duration::from_millis(100));
        assert_eq!(meta.age(now), Duration::from_millis(110));
        assert_eq!(meta.idle_for(start), Duration::ZERO);
    }
}
