//! Synchronization description.
//!
//! A description is an ordered list of groups. Each group gives the delay,
//! active and total windows (in time and/or position domain) and the number of
//! repeats:
//!
//! ```text
//! [{delay: {Time: 0.0}, active: {Time: 0.1}, total: {Time: 0.15}, repeats: 10}, ...]
//! ```
//!
//! The description is opaque to the measurement group apart from the
//! integration time, which is the active time of the single group.

use crate::defs::{SynchDomain, SynchParam};
use crate::error::{AppResult, MeasurementGroupError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Value of one synchronization parameter per domain.
pub type DomainValues = BTreeMap<SynchDomain, f64>;

/// One group of equidistant synchronization windows.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SynchronizationGroup {
    /// Offset before the first active window
    #[serde(default)]
    pub delay: DomainValues,
    /// Length of the active window
    #[serde(default)]
    pub active: DomainValues,
    /// Period between consecutive windows
    #[serde(default)]
    pub total: DomainValues,
    /// Number of windows
    #[serde(default = "default_repeats")]
    pub repeats: u64,
}

fn default_repeats() -> u64 {
    1
}

impl SynchronizationGroup {
    /// Windows expressed in time only.
    pub fn in_time(delay: f64, active: f64, total: f64, repeats: u64) -> Self {
        Self {
            delay: BTreeMap::from([(SynchDomain::Time, delay)]),
            active: BTreeMap::from([(SynchDomain::Time, active)]),
            total: BTreeMap::from([(SynchDomain::Time, total)]),
            repeats,
        }
    }

    /// Value of a window parameter in `domain`.
    ///
    /// `SynchParam::Repeats` is domain independent.
    pub fn get(&self, param: SynchParam, domain: SynchDomain) -> Option<f64> {
        match param {
            SynchParam::Delay => self.delay.get(&domain).copied(),
            SynchParam::Active => self.active.get(&domain).copied(),
            SynchParam::Total => self.total.get(&domain).copied(),
            SynchParam::Repeats => Some(self.repeats as f64),
        }
    }

    /// Active time of this group.
    pub fn active_time(&self) -> Option<f64> {
        self.get(SynchParam::Active, SynchDomain::Time)
    }
}

/// Ordered synchronization groups of an acquisition.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SynchronizationDescription {
    groups: Vec<SynchronizationGroup>,
}

impl SynchronizationDescription {
    /// Wrap the given groups.
    pub fn new(groups: Vec<SynchronizationGroup>) -> Self {
        Self { groups }
    }

    /// Single group of one window: no delay, `integration_time` active and
    /// `integration_time + latency_time` total.
    pub fn from_integration_time(integration_time: f64, latency_time: f64) -> Self {
        Self::new(vec![SynchronizationGroup::in_time(
            0.0,
            integration_time,
            integration_time + latency_time,
            1,
        )])
    }

    /// The groups, in order.
    pub fn groups(&self) -> &[SynchronizationGroup] {
        &self.groups
    }

    /// Whether no group was configured yet.
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Number of groups.
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    /// Sum of repeats over all groups.
    pub fn total_repeats(&self) -> u64 {
        self.groups.iter().map(|group| group.repeats).sum()
    }

    /// Active time of the single group.
    ///
    /// # Errors
    ///
    /// [`MeasurementGroupError::SynchronizationState`] when there is not exactly
    /// one group, or when that group has no active time.
    pub fn integration_time(&self) -> AppResult<f64> {
        match self.groups.as_slice() {
            [] => Err(MeasurementGroupError::SynchronizationState(
                "The synchronization group has not been initialized".to_string(),
            )),
            [group] => group.active_time().ok_or_else(|| {
                MeasurementGroupError::SynchronizationState(
                    "The synchronization group has no active time".to_string(),
                )
            }),
            _ => Err(MeasurementGroupError::SynchronizationState(
                "There are more than one synchronization groups".to_string(),
            )),
        }
    }
}
