use core::time::Duration;

use crate::error::{Error, Result};

/// Tuning for [`StoreAllocator`](crate::StoreAllocator).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoreAllocatorConfig {
    /// First path segment of every key the allocator writes.
    pub key_prefix: String,
    /// TTL of the lease backing a claimed node ID.
    pub lease_ttl: Duration,
    /// Period of the background renewal task.
    pub renew_interval: Duration,
    /// Upper bound on a whole claim: lock wait plus every store round trip.
    /// Must be shorter than `lease_ttl`, which also bounds the lock lease.
    pub allocate_timeout: Duration,
    /// Start the background renewal task after allocating. When off, the
    /// caller keeps the lease alive through `refresh_lease`.
    pub auto_renew: bool,
}

impl Default for StoreAllocatorConfig {
    fn default() -> Self {
        Self {
            key_prefix: "fleetflake".to_owned(),
            lease_ttl: Duration::from_secs(30),
            renew_interval: Duration::from_secs(10),
            allocate_timeout: Duration::from_secs(10),
            auto_renew: true,
        }
    }
}

impl StoreAllocatorConfig {
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] for zero durations, an empty key
    /// prefix, or a renewal interval or allocate timeout that does not fit
    /// inside the lease TTL.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| Err(Error::InvalidConfig(msg.to_owned()));

        if self.key_prefix.trim_matches('/').is_empty() {
            return invalid("key prefix must not be empty");
        }
        if self.lease_ttl < Duration::from_secs(1) {
            return invalid("lease TTL must be at least one second");
        }
        if self.renew_interval.is_zero() || self.allocate_timeout.is_zero() {
            return invalid("renew interval and allocate timeout must be non-zero");
        }
        if self.renew_interval >= self.lease_ttl {
            return invalid("renew interval must be shorter than the lease TTL");
        }
        if self.allocate_timeout >= self.lease_ttl {
            return invalid("allocate timeout must be shorter than the lease TTL");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = StoreAllocatorConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.lease_ttl, Duration::from_secs(30));
        assert_eq!(config.renew_interval, Duration::from_secs(10));
        assert_eq!(config.allocate_timeout, Duration::from_secs(10));
    }

    #[test]
    fn rejects_renewal_slower_than_ttl() {
        let config = StoreAllocatorConfig {
            renew_interval: Duration::from_secs(30),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn rejects_claims_that_outlive_the_lock_lease() {
        let config = StoreAllocatorConfig {
            allocate_timeout: Duration::from_secs(30),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));

        let config = StoreAllocatorConfig {
            allocate_timeout: Duration::from_secs(29),
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_zero_durations_and_blank_prefix() {
        for config in [
            StoreAllocatorConfig {
                allocate_timeout: Duration::ZERO,
                ..Default::default()
            },
            StoreAllocatorConfig {
                lease_ttl: Duration::from_millis(500),
                renew_interval: Duration::from_millis(100),
                ..Default::default()
            },
            StoreAllocatorConfig {
                key_prefix: "//".into(),
                ..Default::default()
            },
        ] {
            assert!(config.validate().is_err(), "{config:?}");
        }
    }
}
