//! Measurement group configuration model.
//!
//! - [`user`]: the persisted, round-trippable user configuration
//! - [`builder`]: the minimal configuration of a new group
//! - [`item`], [`controller`]: per-element configuration items
//! - [`measurement`]: the validated snapshot and its query API

pub mod builder;
pub mod controller;
pub mod item;
pub mod measurement;
pub mod user;

pub use builder::build_measurement_configuration;
pub use controller::{
    ControllerConfiguration, ControllerKind, EnabledFilter, Synchronizer,
    SynchronizerControllerConfiguration, TimerableRoles, EXTERNAL_CONTROLLER,
};
pub use item::{ChannelConfiguration, ConfigurationItem, SynchronizerConfiguration};
pub use measurement::{
    Member, MemberId, MeasurementConfiguration, NormalizeContext, SynchFilter, DEFAULT_DESCRIPTION,
};
pub use user::{UserChannelConfig, UserConfiguration, UserControllerConfig, SOFTWARE_SYNCHRONIZER};
