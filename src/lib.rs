//! # DAQ Measurement Group
//!
//! This crate implements the measurement group of a device pool: a named set of
//! experimental channels, spread over heterogeneous hardware controllers, that
//! is acquired together. It turns a loosely structured, persisted user
//! configuration into a validated internal model, elects the master timer and
//! monitor per synchronization domain, and orchestrates prepare/start/stop/abort
//! sequences against an external acquisition engine while fusing the group
//! state from its members.
//!
//! ## Crate Structure
//!
//! - **`config`**: The configuration model. `user` is the persisted JSON shape,
//!   `builder` creates the minimal configuration of a new group, `item` and
//!   `controller` hold the per-element configuration, and `measurement` holds
//!   the validated `MeasurementConfiguration` snapshot with its query API.
//! - **`defs`**: Pool enumerations such as `AcqSynch`, `AcqMode`, `SynchDomain` and `State`.
//! - **`element`** / **`registry`**: The element and registry interfaces the
//!   core consumes, plus an in-memory registry.
//! - **`synchronization`**: Synchronization descriptions and integration time.
//! - **`acquisition`**: The `AcquisitionEngine` trait and its prepare request.
//! - **`state`**: Base aggregation of member states and sub-engine fusion.
//! - **`group`**: `PoolMeasurementGroup`, the orchestrator.
//! - **`error`**: The `MeasurementGroupError` enum and `AppResult` alias.
//! - **`settings`**: Figment-based settings for group defaults and logging.
//! - **`logging`**: `tracing-subscriber` setup.
//! - **`mock`**: A mock acquisition engine and a small laboratory registry.
//!
//! ## Example
//!
//! ```
//! use daq_measurement_group::group::PoolMeasurementGroup;
//! use daq_measurement_group::mock::{laboratory_registry, MockAcquisitionEngine};
//! use std::sync::Arc;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let group = PoolMeasurementGroup::builder("mntgrp01")
//!     .registry(Arc::new(laboratory_registry()))
//!     .engine(Arc::new(MockAcquisitionEngine::new()))
//!     .member_names(&["ct01", "ct05", "zerod01"])?
//!     .build()?;
//!
//! group.set_integration_time(0.1, 1);
//! group.set_nb_starts(2, 1)?;
//! group.prepare(1).await?;
//! group.start_acquisition(None, 1).await?;
//! group.start_acquisition(None, 1).await?;
//! assert_eq!(group.pending_starts(), 0);
//! # Ok(())
//! # }
//! ```

pub mod acquisition;
pub mod config;
pub mod defs;
pub mod element;
pub mod error;
pub mod group;
pub mod logging;
pub mod mock;
pub mod registry;
pub mod settings;
pub mod state;
pub mod synchronization;

pub use config::{MeasurementConfiguration, UserConfiguration};
pub use error::{AppResult, MeasurementGroupError};
pub use group::{ElementEvent, GroupEvent, GroupNotification, PoolMeasurementGroup};
