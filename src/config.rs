//! Cluster configuration: follower timeout range and cluster size.

use rand::Rng;

/// Configuration mistakes caught at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("leader timeout minimum must be positive")]
    ZeroTimeout,
    #[error("leader timeout maximum must exceed the minimum")]
    EmptyTimeoutRange,
    #[error("cluster size must be at least one")]
    EmptyCluster,
}

/// Static cluster parameters, fixed for the lifetime of the node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Config {
    /// Lower bound of the follower timeout draw, in milliseconds.
    pub leader_timeout_min: u64,
    /// Upper bound (exclusive) of the follower timeout draw.
    pub leader_timeout_max: u64,
    /// Number of members in the cluster.
    pub cluster_size: usize,
}

impl Config {
    /// # Errors
    ///
    /// Rejects a zero minimum timeout, an empty timeout range, and an empty
    /// cluster.
    pub fn new(
        leader_timeout_min: u64,
        leader_timeout_max: u64,
        cluster_size: usize,
    ) -> Result<Self, ConfigError> {
        if leader_timeout_min == 0 {
            return Err(ConfigError::ZeroTimeout);
        }
        if leader_timeout_max <= leader_timeout_min {
            return Err(ConfigError::EmptyTimeoutRange);
        }
        if cluster_size == 0 {
            return Err(ConfigError::EmptyCluster);
        }
        Ok(Self {
            leader_timeout_min,
            leader_timeout_max,
            cluster_size,
        })
    }

    /// Majority test: strictly more than half the cluster.
    #[must_use]
    pub fn quorum_reached(&self, votes: usize) -> bool {
        votes > self.cluster_size / 2
    }

    /// Heartbeat period. A quarter of the minimum follower timeout, so
    /// several heartbeats fit inside any timeout draw.
    #[must_use]
    pub fn heartbeat_interval(&self) -> u64 {
        self.leader_timeout_min / 4
    }

    /// A fresh deadline: `now` plus a uniform draw from the timeout range.
    pub fn random_timeout(&self, now: u64, rng: &mut impl Rng) -> u64 {
        now + rng.random_range(self.leader_timeout_min..self.leader_timeout_max)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            leader_timeout_min: 100,
            leader_timeout_max: 300,
            cluster_size: 3,
        }
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    use super::*;

    #[test]
    fn rejects_bad_parameters() {
        assert_eq!(Config::new(0, 10, 3), Err(ConfigError::ZeroTimeout));
        assert_eq!(Config::new(10, 10, 3), Err(ConfigError::EmptyTimeoutRange));
        assert_eq!(Config::new(10, 20, 0), Err(ConfigError::EmptyCluster));
        assert!(Config::new(100, 300, 3).is_ok());
    }

    #[test]
    fn quorum_is_a_strict_majority() {
        let three = Config::new(100, 300, 3).unwrap();
        assert!(!three.quorum_reached(1));
        assert!(three.quorum_reached(2));

        let one = Config::new(100, 300, 1).unwrap();
        assert!(one.quorum_reached(1));

        let two = Config::new(100, 300, 2).unwrap();
        assert!(!two.quorum_reached(1));
        assert!(two.quorum_reached(2));
    }

    #[test]
    fn timeout_draw_stays_in_range() {
        let config = Config::default();
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..64 {
            let deadline = config.random_timeout(1_000, &mut rng);
            assert!(deadline >= 1_000 + config.leader_timeout_min);
            assert!(deadline < 1_000 + config.leader_timeout_max);
        }
    }

    #[test]
    fn heartbeat_fits_inside_minimum_timeout() {
        let config = Config::default();
        assert!(config.heartbeat_interval() * 3 < config.leader_timeout_min);
    }
}
