//! Persisted user configuration.
//!
//! This is the only artifact that survives a restart. Its shape is:
//!
//! ```text
//! {label, description, timer, monitor,
//!  controllers: {name: {synchronizer, synchronization, timer, monitor,
//!                       channels: {name: {index, enabled, label, plot_type, ...}}}}}
//! ```
//!
//! Maps keep insertion order so that a configuration read from JSON is written
//! back in the same order. Configurations from older releases nest the channels
//! one level deeper under `units.0` and name the synchronization type
//! `trigger_type`; both are accepted on read and never written.

use crate::defs::{AcqSynchType, Normalization, PlotType};
use crate::error::AppResult;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Synchronizer value meaning "driven by the software synchronizer".
pub const SOFTWARE_SYNCHRONIZER: &str = "software";

/// Top-level user configuration of a measurement group.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserConfiguration {
    /// Group label (defaults to the group name)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,

    /// Free text description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Group-level master timer full name
    #[serde(default)]
    pub timer: Option<String>,

    /// Group-level master monitor full name
    #[serde(default)]
    pub monitor: Option<String>,

    /// Controllers keyed by full name (or `__tango__` for external channels)
    #[serde(default)]
    pub controllers: IndexMap<String, UserControllerConfig>,
}

impl UserConfiguration {
    /// Parse a JSON document.
    pub fn from_json_str(json: &str) -> AppResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Serialize to pretty JSON.
    pub fn to_json_string(&self) -> AppResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Total number of channel entries across controllers, legacy units included.
    pub fn channel_count(&self) -> usize {
        self.controllers
            .values()
            .map(|ctrl| ctrl.effective().channels.len())
            .sum()
    }
}

/// Per-controller user configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserControllerConfig {
    /// `"software"` or the full name of a trigger/gate element
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synchronizer: Option<String>,

    /// Synchronization type
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synchronization: Option<AcqSynchType>,

    /// Deprecated name of `synchronization`; read only
    #[serde(default, skip_serializing)]
    pub trigger_type: Option<AcqSynchType>,

    /// Timer channel full name (timerable controllers)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timer: Option<String>,

    /// Monitor channel full name (timerable controllers)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monitor: Option<String>,

    /// Channels keyed by full name
    #[serde(default)]
    pub channels: IndexMap<String, UserChannelConfig>,

    /// Legacy nesting of the whole controller entry; read only
    #[serde(default, skip_serializing)]
    pub units: Option<IndexMap<String, UserControllerConfig>>,
}

impl UserControllerConfig {
    /// The entry holding the channels: the first legacy unit if present, else `self`.
    pub fn effective(&self) -> &UserControllerConfig {
        match &self.units {
            Some(units) => units
                .get("0")
                .or_else(|| units.values().next())
                .unwrap_or(self),
            None => self,
        }
    }
}

/// Per-channel user configuration.
///
/// Every field is optional on input; normalization fills the defaults.
/// Keys not known here are kept in `extra` and written back unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserChannelConfig {
    /// Position in the group; mandatory
    #[serde(default)]
    pub index: Option<usize>,

    /// Short name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Fully qualified name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,

    /// Value source
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,

    /// Whether the channel takes part in acquisitions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,

    /// Display label
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,

    /// Value dimensionality, always re-introspected
    #[serde(default)]
    pub ndim: Option<u8>,

    /// Whether the value is shown in the output
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<bool>,

    /// Plot hint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plot_type: Option<PlotType>,

    /// Plot axes hint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plot_axes: Option<Vec<String>>,

    /// Conditioning expression
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conditioning: Option<String>,

    /// Normalization hint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub normalization: Option<Normalization>,

    /// Value data type name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_type: Option<String>,

    /// Value units
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_units: Option<String>,

    /// NeXus path hint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nexus_path: Option<String>,

    /// Value shape
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shape: Option<Vec<usize>>,

    /// Owning controller full name (pool channels)
    #[serde(
        default,
        rename = "_controller_name",
        skip_serializing_if = "Option::is_none"
    )]
    pub controller_name: Option<String>,

    /// Any other attribute
    #[serde(flatten)]
    pub extra: IndexMap<String, serde_json::Value>,
}

impl UserChannelConfig {
    /// Channel entry carrying only its index, as produced by the builder.
    pub fn with_index(index: usize) -> Self {
        Self {
            index: Some(index),
            ..Default::default()
        }
    }

    /// Enabled flag, defaulting to true.
    pub fn is_enabled(&self) -> bool {
        self.enabled.unwrap_or(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_units_are_read_but_not_written() {
        let json = r#"{
            "timer": "pool/ct01",
            "controllers": {
                "pool/ctctrl01": {
                    "units": {"0": {
                        "trigger_type": 0,
                        "channels": {"pool/ct01": {"index": 0, "plot_axes": ["<mov>"], "color": 3}}
                    }}
                }
            }
        }"#;
        let cfg = UserConfiguration::from_json_str(json).unwrap();
        let ctrl = &cfg.controllers["pool/ctctrl01"];
        assert!(ctrl.channels.is_empty());
        let effective = ctrl.effective();
        assert_eq!(effective.trigger_type, Some(AcqSynchType::Trigger));
        let channel = &effective.channels["pool/ct01"];
        assert_eq!(channel.index, Some(0));
        assert_eq!(channel.extra["color"], serde_json::json!(3));
        assert_eq!(cfg.channel_count(), 1);

        let written = cfg.to_json_string().unwrap();
        assert!(!written.contains("units"));
        assert!(!written.contains("trigger_type"));
    }

    #[test]
    fn channel_order_is_preserved() {
        let json = r#"{"controllers": {"c": {"channels": {
            "z": {"index": 0}, "a": {"index": 1}, "m": {"index": 2}
        }}}}"#;
        let cfg = UserConfiguration::from_json_str(json).unwrap();
        let names: Vec<_> = cfg.controllers["c"].channels.keys().cloned().collect();
        assert_eq!(names, vec!["z", "a", "m"]);
    }
}
