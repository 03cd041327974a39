//! Host configuration
//!
//! A [`HostConfig`] sizes the packet buffer pool and sets the timeouts and limits of the host. The
//! configuration can be persisted with [`to_bytes`](HostConfig::to_bytes) and restored with
//! [`from_bytes`](HostConfig::from_bytes).

use crate::att::MIN_ATT_MTU;
use crate::Error;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// The size of a packet buffer block
    pub block_size: usize,
    /// The number of blocks in the packet buffer pool
    pub block_count: usize,
    /// Bytes reserved at the front of the first block of a packet for headers
    pub headroom: usize,
    /// Milliseconds the controller has to answer a command
    pub command_timeout_ms: u64,
    /// Milliseconds a peer has to answer an attribute request or confirm an indication
    pub att_timeout_ms: u64,
    /// The ATT MTU this host asks for and answers an exchange with
    pub preferred_mtu: u16,
    /// The largest ACL data payload the controller accepts, until the controller is asked
    pub acl_max_data_len: usize,
    /// The number of ACL data buffers of the controller, until the controller is asked
    pub acl_buffers: usize,
    pub max_connections: usize,
    /// The largest number of prepared writes a client may queue
    pub prepare_queue_limit: usize,
    /// The smallest connection interval a peripheral may request, in units of 1.25ms
    pub accepted_interval_min: u16,
    /// The largest connection interval a peripheral may request, in units of 1.25ms
    pub accepted_interval_max: u16,
}

impl Default for HostConfig {
    fn default() -> Self {
        HostConfig {
            block_size: 64,
            block_count: 128,
            headroom: 8,
            command_timeout_ms: 2_000,
            att_timeout_ms: 30_000,
            preferred_mtu: 256,
            acl_max_data_len: 27,
            acl_buffers: 8,
            max_connections: 4,
            prepare_queue_limit: 32,
            accepted_interval_min: 0x0006,
            accepted_interval_max: 0x0C80,
        }
    }
}

impl HostConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn att_timeout(&self) -> Duration {
        Duration::from_millis(self.att_timeout_ms)
    }

    /// Check the configuration
    ///
    /// # Error
    /// `InvalidParameter` naming the first field with an unusable value
    pub fn validate(&self) -> Result<(), Error> {
        if self.block_count == 0 {
            Err(Error::InvalidParameter("block_count cannot be zero"))
        } else if self.block_size <= self.headroom {
            Err(Error::InvalidParameter("block_size must be larger than the headroom"))
        } else if self.preferred_mtu < MIN_ATT_MTU {
            Err(Error::InvalidParameter("preferred_mtu is smaller than the minimum ATT MTU"))
        } else if self.acl_max_data_len == 0 || self.acl_buffers == 0 {
            Err(Error::InvalidParameter("the controller must have ACL buffers"))
        } else if self.max_connections == 0 {
            Err(Error::InvalidParameter("max_connections cannot be zero"))
        } else if self.command_timeout_ms == 0 || self.att_timeout_ms == 0 {
            Err(Error::InvalidParameter("timeouts cannot be zero"))
        } else if self.accepted_interval_min > self.accepted_interval_max {
            Err(Error::InvalidParameter("accepted connection interval range is empty"))
        } else {
            Ok(())
        }
    }

    /// Check if a connection interval range requested by a peer is acceptable
    pub fn accepts_interval(&self, interval_min: u16, interval_max: u16) -> bool {
        interval_min >= self.accepted_interval_min && interval_max <= self.accepted_interval_max
    }

    /// Serialize the configuration for storage
    pub fn to_bytes(&self) -> Result<Vec<u8>, Error> {
        bincode::serialize(self).map_err(|e| Error::Decode(e.to_string()))
    }

    /// Restore a configuration from its serialized form
    ///
    /// The restored configuration is validated.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        let config: HostConfig = bincode::deserialize(bytes).map_err(|e| Error::Decode(e.to_string()))?;

        config.validate()?;

        Ok(config)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn default_is_valid() {
        assert_eq!(Ok(()), HostConfig::default().validate());
    }

    #[test]
    fn stored_config_is_restored() {
        let config = HostConfig {
            preferred_mtu: 185,
            max_connections: 1,
            ..HostConfig::default()
        };

        let bytes = config.to_bytes().unwrap();

        assert_eq!(Ok(config), HostConfig::from_bytes(&bytes));
    }

    #[test]
    fn invalid_configs() {
        let small_mtu = HostConfig {
            preferred_mtu: 22,
            ..HostConfig::default()
        };

        let no_room = HostConfig {
            block_size: 8,
            headroom: 8,
            ..HostConfig::default()
        };

        assert!(small_mtu.validate().is_err());
        assert!(no_room.validate().is_err());
        assert!(HostConfig::from_bytes(&small_mtu.to_bytes().unwrap()).is_err());
        assert!(HostConfig::from_bytes(&[1, 2, 3]).is_err());
    }
}
