//! Bounds-healing policy.
//!
//! The transport never lets a caller-supplied size reach the kernel or a copy
//! unchecked. When a request has to be narrowed, the narrowing is expressed
//! as a [`HealingAction`] and counted here so embedders can observe how often
//! it happens.

use std::sync::atomic::{AtomicU64, Ordering};

/// A deterministic bound applied to an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HealingAction {
    /// A read request was narrowed to `min(staging, destination)`.
    ClampRead { requested: usize, clamped: usize },
    /// An address was cut to the `sun_path` limit.
    TruncateAddress { requested: usize, truncated: usize },
    /// No healing needed.
    None,
}

impl HealingAction {
    /// Returns true if this action represents an actual healing (not None).
    #[must_use]
    pub const fn is_heal(&self) -> bool {
        !matches!(self, Self::None)
    }

    /// Stable lowercase name used in log records.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::ClampRead { .. } => "clamp_read",
            Self::TruncateAddress { .. } => "truncate_address",
            Self::None => "none",
        }
    }
}

/// Counters for every healing action applied in this process.
pub struct HealingPolicy {
    /// Total heals applied.
    pub total_heals: AtomicU64,
    /// Read requests narrowed to the destination capacity.
    pub read_clamps: AtomicU64,
    /// Addresses truncated to the path limit.
    pub address_truncations: AtomicU64,
}

impl HealingPolicy {
    /// Create a new policy with zeroed counters.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            total_heals: AtomicU64::new(0),
            read_clamps: AtomicU64::new(0),
            address_truncations: AtomicU64::new(0),
        }
    }

    /// Record a healing action.
    pub fn record(&self, action: &HealingAction) {
        if action.is_heal() {
            self.total_heals.fetch_add(1, Ordering::Relaxed);
        }

        match action {
            HealingAction::ClampRead { .. } => {
                self.read_clamps.fetch_add(1, Ordering::Relaxed);
            }
            HealingAction::TruncateAddress { .. } => {
                self.address_truncations.fetch_add(1, Ordering::Relaxed);
            }
            HealingAction::None => {}
        }
    }

    /// Decide whether a completed read was bounded by its destination.
    ///
    /// A staging buffer of `staging_capacity` bytes read `delivered` bytes
    /// into a destination of `destination_capacity`. Only a read that filled
    /// a destination smaller than the staging buffer was clamped; a short
    /// read delivered everything that was pending.
    #[must_use]
    pub fn heal_read_bounds(
        &self,
        staging_capacity: usize,
        destination_capacity: usize,
        delivered: usize,
    ) -> HealingAction {
        if destination_capacity < staging_capacity && delivered >= destination_capacity {
            HealingAction::ClampRead {
                requested: staging_capacity,
                clamped: destination_capacity,
            }
        } else {
            HealingAction::None
        }
    }

    /// Decide healing for an address of `len` bytes against `limit`.
    #[must_use]
    pub fn heal_address_bounds(&self, len: usize, limit: usize) -> HealingAction {
        if len > limit {
            HealingAction::TruncateAddress {
                requested: len,
                truncated: limit,
            }
        } else {
            HealingAction::None
        }
    }

    /// Snapshot of all counters as `(total, read_clamps, address_truncations)`.
    #[must_use]
    pub fn snapshot(&self) -> (u64, u64, u64) {
        (
            self.total_heals.load(Ordering::Relaxed),
            self.read_clamps.load(Ordering::Relaxed),
            self.address_truncations.load(Ordering::Relaxed),
        )
    }
}

impl Default for HealingPolicy {
    fn default() -> Self {
        Self::new()
    }
}

static GLOBAL_POLICY: HealingPolicy = HealingPolicy::new();

/// Process-wide healing counters.
#[must_use]
pub fn global_healing_policy() -> &'static HealingPolicy {
    &GLOBAL_POLICY
}
