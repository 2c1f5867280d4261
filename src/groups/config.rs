/// Runtime configuration for the group engine.
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::groups::limits::{
    DEFAULT_BANNED_MEMBER_CAPACITY, DEFAULT_INVITE_LINK_PASSWORD_LEN, HIGHEST_KNOWN_EPOCH,
};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("banned_member_capacity must be at least 1")]
    ZeroBanCapacity,

    #[error("invite_link_password_len must be at least 1")]
    ZeroPasswordLength,

    #[error("highest_known_epoch {configured} exceeds what this build supports ({supported})")]
    EpochBeyondBuild { configured: u32, supported: u32 },
}

// ─── Configuration ───────────────────────────────────────────────────────────

/// Group engine configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupsConfig {
    /// Maximum entries in a group's banned list; new bans past this evict
    /// the oldest.
    pub banned_member_capacity: usize,
    /// Wire changes from a later epoch are rejected. May be lowered (e.g. to
    /// stage a rollout) but never raised above `HIGHEST_KNOWN_EPOCH`.
    pub highest_known_epoch: u32,
    /// Length of freshly generated invite-link passwords.
    pub invite_link_password_len: usize,
}

impl Default for GroupsConfig {
    fn default() -> Self {
        Self {
            banned_member_capacity: DEFAULT_BANNED_MEMBER_CAPACITY,
            highest_known_epoch: HIGHEST_KNOWN_EPOCH,
            invite_link_password_len: DEFAULT_INVITE_LINK_PASSWORD_LEN,
        }
    }
}

impl GroupsConfig {
    /// Load from JSON. Missing keys take their defaults.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: GroupsConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.banned_member_capacity == 0 {
            return Err(ConfigError::ZeroBanCapacity);
        }
        if self.invite_link_password_len == 0 {
            return Err(ConfigError::ZeroPasswordLength);
        }
        if self.highest_known_epoch > HIGHEST_KNOWN_EPOCH {
            return Err(ConfigError::EpochBeyondBuild {
                configured: self.highest_known_epoch,
                supported: HIGHEST_KNOWN_EPOCH,
            });
        }
        Ok(())
    }
}
