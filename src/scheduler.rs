//! Group Scheduler: partitions entities into fixed-size id ranges so each
//! group's working set fits in memory, and halves the group size on an
//! out-of-memory signal instead of failing the whole run.

/// Batch-size table keyed by available memory tier, in rows. Below 8 GiB
/// picks the smallest batch; above 24 GiB picks the largest.
const MEMORY_TIERS: &[(u64, u64)] = &[
    (8 * GIB, 100_000),
    (16 * GIB, 500_000),
    (24 * GIB, 1_000_000),
    (u64::MAX, 5_000_000),
];

const GIB: u64 = 1024 * 1024 * 1024;

/// Never halve below this many rows per group; below this, a single group
/// that still doesn't fit is a hard `OutOfMemory` failure, not a further
/// retry.
pub const GROUP_SIZE_FLOOR: u64 = 10_000;

pub struct GroupScheduler {
    group_size: u64,
}

impl GroupScheduler {
    /// Chooses the initial group size from the memory-tier table.
    pub fn for_available_memory(available_bytes: u64) -> Self {
        let group_size = MEMORY_TIERS
            .iter()
            .find(|(ceiling, _)| available_bytes < *ceiling)
            .map(|(_, size)| *size)
            .unwrap_or(GROUP_SIZE_FLOOR);
        Self { group_size }
    }

    pub fn group_size(&self) -> u64 {
        self.group_size
    }

    /// `group_id = floor(entity_id / group_size)`.
    pub fn group_of(&self, entity_id: i64) -> i64 {
        entity_id.div_euclid(self.group_size as i64)
    }

    /// Halves the group size for subsequent groups after an OOM signal.
    /// Returns `false` (and leaves the size at the floor) once it can no
    /// longer be halved — the caller should surface `CoreError::OutOfMemory`
    /// at that point.
    pub fn halve(&mut self) -> bool {
        if self.group_size <= GROUP_SIZE_FLOOR {
            return false;
        }
        self.group_size = (self.group_size / 2).max(GROUP_SIZE_FLOOR);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn picks_tier_by_available_memory() {
        assert_eq!(GroupScheduler::for_available_memory(4 * GIB).group_size(), 100_000);
        assert_eq!(GroupScheduler::for_available_memory(12 * GIB).group_size(), 500_000);
        assert_eq!(GroupScheduler::for_available_memory(20 * GIB).group_size(), 1_000_000);
        assert_eq!(GroupScheduler::for_available_memory(64 * GIB).group_size(), 5_000_000);
    }

    #[test]
    fn halves_down_to_floor_then_stops() {
        let mut sched = GroupScheduler { group_size: 40_000 };
        assert!(sched.halve());
        assert_eq!(sched.group_size(), 20_000);
        assert!(sched.halve());
        assert_eq!(sched.group_size(), GROUP_SIZE_FLOOR);
        assert!(!sched.halve());
        assert_eq!(sched.group_size(), GROUP_SIZE_FLOOR);
    }

    #[test]
    fn group_of_partitions_by_floor_division() {
        let sched = GroupScheduler::for_available_memory(4 * GIB);
        assert_eq!(sched.group_of(0), 0);
        assert_eq!(sched.group_of(99_999), 0);
        assert_eq!(sched.group_of(100_000), 1);
    }
}
