//! Configuration for call coordination
//!
//! Values are plain serde structures so an application can embed them in
//! its own configuration file. Loading and watching files is left to the
//! application; [`CallCoreConfig::from_toml_str`] covers the common case of
//! a TOML fragment.
//!
//! # Example
//!
//! ```rust
//! use rvoip_call_core::CallCoreConfig;
//!
//! let config = CallCoreConfig::from_toml_str(r#"
//!     [policy]
//!     call_waiting_disabled = true
//!
//!     [conference]
//!     transient_state_timeout_ms = 2000
//! "#).unwrap();
//!
//! assert!(config.policy.call_waiting_disabled);
//! assert!(config.policy.single_call_in_progress_enabled);
//! assert_eq!(config.conference.transient_state_timeout_ms, 2000);
//! ```

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CallCoreError, CallCoreResult};
use crate::provider::presence;

/// Presence band treated as "busy" for do-not-disturb rejection
///
/// A status `s` is busy iff `above < s < below`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusyRange {
    /// Exclusive lower bound
    pub above: u32,
    /// Exclusive upper bound
    pub below: u32,
}

impl BusyRange {
    pub fn new(above: u32, below: u32) -> Self {
        Self { above, below }
    }

    /// Check whether `status` falls inside the band
    pub fn contains(&self, status: u32) -> bool {
        status > self.above && status < self.below
    }
}

impl Default for BusyRange {
    fn default() -> Self {
        Self {
            above: presence::ONLINE_THRESHOLD,
            below: presence::EXTENDED_AWAY_THRESHOLD,
        }
    }
}

/// Admission policy flags
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Put other calls on hold when a call becomes active
    pub single_call_in_progress_enabled: bool,
    /// Reject new calls with "busy here" while another call is in progress
    pub call_waiting_disabled: bool,
    /// Reject new calls with "busy here" while presence is in the busy band
    pub reject_incoming_on_dnd: bool,
    /// Per-account override of `reject_incoming_on_dnd`, keyed by account id
    pub account_reject_on_dnd: HashMap<String, bool>,
    /// Presence band considered busy
    pub busy_range: BusyRange,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            single_call_in_progress_enabled: true,
            call_waiting_disabled: false,
            reject_incoming_on_dnd: false,
            account_reject_on_dnd: HashMap::new(),
            busy_range: BusyRange::default(),
        }
    }
}

impl PolicyConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_single_call_in_progress(mut self, enabled: bool) -> Self {
        self.single_call_in_progress_enabled = enabled;
        self
    }

    pub fn with_call_waiting_disabled(mut self, disabled: bool) -> Self {
        self.call_waiting_disabled = disabled;
        self
    }

    pub fn with_reject_on_dnd(mut self, enabled: bool) -> Self {
        self.reject_incoming_on_dnd = enabled;
        self
    }

    /// Override the do-not-disturb rejection flag for one account
    pub fn with_account_reject_on_dnd(mut self, account_id: impl Into<String>, enabled: bool) -> Self {
        self.account_reject_on_dnd.insert(account_id.into(), enabled);
        self
    }

    pub fn with_busy_range(mut self, busy_range: BusyRange) -> Self {
        self.busy_range = busy_range;
        self
    }

    /// Effective do-not-disturb rejection flag for `account_id`
    pub fn reject_on_dnd_for(&self, account_id: &str) -> bool {
        self.account_reject_on_dnd
            .get(account_id)
            .copied()
            .unwrap_or(self.reject_incoming_on_dnd)
    }

    pub fn validate(&self) -> CallCoreResult<()> {
        if self.busy_range.above >= self.busy_range.below {
            return Err(CallCoreError::invalid_configuration(
                "policy.busy_range",
                format!(
                    "empty band: above ({}) must be lower than below ({})",
                    self.busy_range.above, self.busy_range.below
                ),
            ));
        }
        if self.busy_range.below > presence::MAX_STATUS_VALUE {
            return Err(CallCoreError::invalid_configuration(
                "policy.busy_range.below",
                format!("exceeds maximum status value {}", presence::MAX_STATUS_VALUE),
            ));
        }
        Ok(())
    }
}

/// Conference display-state settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConferenceConfig {
    /// Default auto-reset delay for transient display states
    pub transient_state_timeout_ms: u64,
}

impl Default for ConferenceConfig {
    fn default() -> Self {
        Self {
            transient_state_timeout_ms: 5000,
        }
    }
}

impl ConferenceConfig {
    pub fn with_transient_timeout(mut self, timeout: Duration) -> Self {
        self.transient_state_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn transient_timeout(&self) -> Duration {
        Duration::from_millis(self.transient_state_timeout_ms)
    }

    pub fn validate(&self) -> CallCoreResult<()> {
        if self.transient_state_timeout_ms == 0 {
            return Err(CallCoreError::invalid_configuration(
                "conference.transient_state_timeout_ms",
                "must be greater than zero",
            ));
        }
        Ok(())
    }
}

/// Complete call-core configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CallCoreConfig {
    pub policy: PolicyConfig,
    pub conference: ConferenceConfig,
}

impl CallCoreConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_policy(mut self, policy: PolicyConfig) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_conference(mut self, conference: ConferenceConfig) -> Self {
        self.conference = conference;
        self
    }

    /// Parse and validate a TOML document
    pub fn from_toml_str(text: &str) -> CallCoreResult<Self> {
        let config: CallCoreConfig = toml::from_str(text).map_err(|e| CallCoreError::ConfigParse {
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> CallCoreResult<()> {
        self.policy.validate()?;
        self.conference.validate()
    }
}
