//! Multi-start acquisition sequencing
//!
//! prepare/start/stop/abort against the mock acquisition engine, including the
//! deprecated start without prior prepare.

mod common;

use anyhow::Result;
use async_trait::async_trait;
use daq_measurement_group::acquisition::{AcquisitionEngine, AcquisitionValue, PrepareRequest};
use daq_measurement_group::defs::{AcqMode, SynchDomain};
use daq_measurement_group::mock::{EngineCall, MockAcquisitionEngine};
use daq_measurement_group::GroupEvent;
use std::sync::Arc;
use tokio::sync::Notify;
use tracing_test::traced_test;

/// Mock engine whose `prepare` waits until released.
#[derive(Debug, Default)]
struct GatedEngine {
    inner: MockAcquisitionEngine,
    preparing: Notify,
    release: Notify,
}

#[async_trait]
impl AcquisitionEngine for GatedEngine {
    async fn prepare(&self, request: PrepareRequest) -> Result<()> {
        self.preparing.notify_one();
        self.release.notified().await;
        self.inner.prepare(request).await
    }

    async fn run(&self) -> Result<()> {
        self.inner.run().await
    }

    async fn stop(&self) -> Result<()> {
        self.inner.stop().await
    }

    async fn abort(&self) -> Result<()> {
        self.inner.abort().await
    }

    async fn stop_software_synchronizer(&self) -> Result<()> {
        self.inner.stop_software_synchronizer().await
    }

    fn is_software_synchronizer_started(&self) -> bool {
        self.inner.is_software_synchronizer_started()
    }

    fn is_software_acquisition_started(&self) -> bool {
        self.inner.is_software_acquisition_started()
    }

    fn is_zerod_acquisition_started(&self) -> bool {
        self.inner.is_zerod_acquisition_started()
    }
}

/// Start without prepare, then stop or abort while the implicit prepare is pending.
async fn cancel_during_implicit_prepare(abort: bool) {
    let engine = Arc::new(GatedEngine::default());
    let group = common::group_with_engine(&["ct01"], engine.clone());
    group.set_integration_time(0.1, 0);

    let start = tokio::spawn({
        let group = group.clone();
        async move { group.start_acquisition(None, 1).await }
    });
    engine.preparing.notified().await;
    assert_eq!(group.pending_starts(), 1);

    if abort {
        group.abort().await.unwrap();
    } else {
        group.stop().await.unwrap();
    }
    engine.release.notify_one();
    start.await.unwrap().unwrap();

    assert_eq!(group.pending_starts(), 0);
    assert_eq!(engine.inner.run_count(), 0);
    assert_eq!(group.is_aborted(), abort);
}

#[tokio::test]
#[traced_test]
async fn three_starts_then_implicit_prepare() {
    let (group, engine) = common::group(&["ct01", "ct05", "zerod01"]);
    group.set_integration_time(0.2, 0);
    group.set_nb_starts(3, 0).unwrap();

    group.prepare(1).await.unwrap();
    assert_eq!(group.pending_starts(), 3);

    for expected in [2, 1, 0] {
        group.start_acquisition(None, 1).await.unwrap();
        assert_eq!(group.pending_starts(), expected);
    }
    assert_eq!(engine.run_count(), 3);
    assert!(!logs_contain("without prior preparing"));

    group.start_acquisition(None, 1).await.unwrap();
    assert!(logs_contain(
        "starting acquisition without prior preparing is deprecated"
    ));
    assert!(logs_contain("Preparing with number_of_starts equal to 1"));
    assert_eq!(group.nb_starts(), 3);
    assert_eq!(group.pending_starts(), 0);
    assert_eq!(engine.run_count(), 4);

    let prepares: Vec<_> = engine
        .calls()
        .into_iter()
        .filter(|call| matches!(call, EngineCall::Prepare { .. }))
        .collect();
    assert_eq!(
        prepares,
        vec![
            EngineCall::Prepare {
                nb_starts: 3,
                multiple: 1
            },
            EngineCall::Prepare {
                nb_starts: 1,
                multiple: 1
            },
        ]
    );
}

#[tokio::test]
async fn prepare_hands_the_parameters_to_the_engine() {
    let (group, engine) = common::group(&["ct01", "ct05"]);
    group.set_integration_time(0.5, 0);
    group.set_moveable(Some("mot01"), 0, true).unwrap();
    group.set_sw_synch_initial_domain(SynchDomain::Time);

    group.prepare(1).await.unwrap();
    let request = engine.last_request().unwrap();
    assert_eq!(request.group, "mntgrp01");
    assert_eq!(request.mode, AcqMode::Timer);
    assert_eq!(request.value, AcquisitionValue::IntegrationTime(0.5));
    assert_eq!(request.initial_domain, SynchDomain::Time);
    assert_eq!(request.moveable.unwrap().full_name(), "pool/mot01");
    assert_eq!(request.nb_starts, 1);
    assert!(request.config_dirty);
    assert_eq!(request.configuration.enabled_channel_count(), 2);

    // latency of ctctrl02 is the largest
    let total = request.synchronization.groups()[0].total[&SynchDomain::Time];
    assert!((total - 0.8).abs() < 1e-12);

    group.prepare(1).await.unwrap();
    assert!(!engine.last_request().unwrap().config_dirty);
}

#[tokio::test]
async fn stop_between_starts_cancels_the_sequence() {
    let (group, engine) = common::group(&["ct01"]);
    group.set_integration_time(0.1, 0);
    group.set_nb_starts(5, 0).unwrap();
    engine.set_busy_on_run(true);

    group.prepare(1).await.unwrap();
    group.start_acquisition(None, 1).await.unwrap();
    assert!(engine.is_software_synchronizer_started());
    group.stop().await.unwrap();

    assert_eq!(group.pending_starts(), 0);
    assert!(!engine.is_software_synchronizer_started());
    assert!(!group.is_aborted());

    // next start goes through the implicit prepare again
    group.start_acquisition(None, 1).await.unwrap();
    assert_eq!(
        engine.last_request().map(|request| request.nb_starts),
        Some(1)
    );
}

#[tokio::test]
async fn abort_is_accepted_from_any_state() {
    let (group, engine) = common::group(&["ct01"]);
    group.abort().await.unwrap();
    group.abort().await.unwrap();
    assert!(group.is_aborted());
    assert_eq!(engine.run_count(), 0);

    group.set_integration_time(0.1, 0);
    group.start_acquisition(Some(AcquisitionValue::IntegrationTime(9.0)), 1)
        .await
        .unwrap();
    assert!(!group.is_aborted());
    assert_eq!(
        engine.last_request().unwrap().value,
        AcquisitionValue::IntegrationTime(0.1)
    );
}

#[tokio::test]
async fn parameter_setters_notify_with_priority() {
    let (group, _) = common::group(&["ct01"]);
    let mut rx = group.subscribe();

    group.set_integration_time(1.0, 1);
    group.set_nb_starts(2, 0).unwrap();
    group.set_monitor_count(100, 2);

    let events: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
    assert_eq!(events.len(), 3);
    assert!(matches!(events[0].event, GroupEvent::Synchronization(_)));
    assert_eq!(events[1].event, GroupEvent::IntegrationTime(1.0));
    assert_eq!(events[2].event, GroupEvent::MonitorCount(100));
    assert_eq!(events[2].priority, 2);
}

#[tokio::test]
async fn stop_during_implicit_prepare_cancels_the_start() {
    cancel_during_implicit_prepare(false).await;
}

#[tokio::test]
async fn abort_during_implicit_prepare_cancels_the_start() {
    cancel_during_implicit_prepare(true).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_starts_consume_each_armed_start_once() {
    let (group, engine) = common::group(&["ct01"]);
    group.set_integration_time(0.1, 0);
    group.set_nb_starts(8, 0).unwrap();
    group.prepare(1).await.unwrap();

    let starts: Vec<_> = (0..8)
        .map(|_| {
            let group = group.clone();
            tokio::spawn(async move { group.start_acquisition(None, 1).await })
        })
        .collect();
    for start in starts {
        start.await.unwrap().unwrap();
    }

    assert_eq!(group.pending_starts(), 0);
    assert_eq!(engine.run_count(), 8);
    let prepares = engine
        .calls()
        .iter()
        .filter(|call| matches!(call, EngineCall::Prepare { .. }))
        .count();
    assert_eq!(prepares, 1);
}
