//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use daq_measurement_group::acquisition::AcquisitionEngine;
use daq_measurement_group::config::{MeasurementConfiguration, NormalizeContext};
use daq_measurement_group::group::PoolMeasurementGroup;
use daq_measurement_group::mock::{laboratory_registry, MockAcquisitionEngine};
use daq_measurement_group::registry::InMemoryRegistry;
use daq_measurement_group::{AppResult, UserConfiguration};
use std::sync::Arc;

/// Group named `mntgrp01` over the laboratory registry.
pub fn group(names: &[&str]) -> (Arc<PoolMeasurementGroup>, Arc<MockAcquisitionEngine>) {
    let engine = Arc::new(MockAcquisitionEngine::new());
    let group = PoolMeasurementGroup::builder("mntgrp01")
        .registry(Arc::new(laboratory_registry()))
        .engine(engine.clone())
        .member_names(names)
        .expect("laboratory members resolve")
        .build()
        .expect("valid group");
    (Arc::new(group), engine)
}

/// Group named `mntgrp01` driving `engine`.
pub fn group_with_engine(names: &[&str], engine: Arc<dyn AcquisitionEngine>) -> Arc<PoolMeasurementGroup> {
    let group = PoolMeasurementGroup::builder("mntgrp01")
        .registry(Arc::new(laboratory_registry()))
        .engine(engine)
        .member_names(names)
        .expect("laboratory members resolve")
        .build()
        .expect("valid group");
    Arc::new(group)
}

/// Normalize a JSON user configuration against `registry`.
pub fn normalize_json(
    registry: &InMemoryRegistry,
    json: &str,
) -> AppResult<MeasurementConfiguration> {
    let cfg = UserConfiguration::from_json_str(json)?;
    MeasurementConfiguration::from_user(&cfg, &NormalizeContext::new(registry, "mntgrp01"))
}
