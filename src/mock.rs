//! Mock acquisition engine and a small laboratory registry.
//!
//! Useful for embedding the measurement group without hardware and for tests.
//!
//! | Controller    | Kind        | Elements                              |
//! |---------------|-------------|---------------------------------------|
//! | `ctctrl01`    | timerable   | `ct01`..`ct04` (latency 0.1 s)        |
//! | `ctctrl02`    | timerable   | `ct05`, `ct06` (latency 0.3 s)        |
//! | `zerodctrl01` | 0D          | `zerod01`, `zerod02`                  |
//! | `tgctrl01`    | trigger/gate| `tg01`, `tg02`                        |
//! | `motctrl01`   | motor       | `mot01`                               |
//! | `twodctrl01`  | timerable   | `twod01` (integer image)              |
//! | `pcctrl01`    | pseudo      | `pc01`                                |
//!
//! plus the external scalar attribute [`EXTERNAL_AMPLI`].

use crate::acquisition::{AcquisitionEngine, PrepareRequest};
use crate::defs::{DataFormat, DataType, ElementType};
use crate::element::ValueInfo;
use crate::registry::{InMemoryRegistry, PoolElement};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

/// External attribute registered with a scalar data format.
pub const EXTERNAL_AMPLI: &str = "tango://host:10000/sys/tg_test/1/ampli";

/// Registry populated with the controllers and elements listed in the module docs.
pub fn laboratory_registry() -> InMemoryRegistry {
    let registry = InMemoryRegistry::new();

    registry.register(
        PoolElement::controller(1, "ctctrl01", ElementType::CTExpChannel, true)
            .with_ctrl_par("latency_time", 0.1),
    );
    for (id, name) in [(10, "ct01"), (11, "ct02"), (12, "ct03"), (13, "ct04")] {
        registry.register(
            PoolElement::channel(id, name, ElementType::CTExpChannel, "ctctrl01")
                .with_value_info(ValueInfo::scalar_double()),
        );
    }

    registry.register(
        PoolElement::controller(2, "ctctrl02", ElementType::CTExpChannel, true)
            .with_ctrl_par("latency_time", 0.3),
    );
    for (id, name) in [(20, "ct05"), (21, "ct06")] {
        registry.register(
            PoolElement::channel(id, name, ElementType::CTExpChannel, "ctctrl02")
                .with_value_info(ValueInfo::scalar_double()),
        );
    }

    registry.register(PoolElement::controller(
        3,
        "zerodctrl01",
        ElementType::ZeroDExpChannel,
        false,
    ));
    for (id, name) in [(30, "zerod01"), (31, "zerod02")] {
        registry.register(
            PoolElement::channel(id, name, ElementType::ZeroDExpChannel, "zerodctrl01")
                .with_value_info(ValueInfo::scalar_double()),
        );
    }

    registry.register(PoolElement::controller(
        4,
        "tgctrl01",
        ElementType::TriggerGate,
        false,
    ));
    for (id, name) in [(40, "tg01"), (41, "tg02")] {
        registry.register(PoolElement::channel(
            id,
            name,
            ElementType::TriggerGate,
            "tgctrl01",
        ));
    }

    registry.register(PoolElement::controller(5, "motctrl01", ElementType::Motor, false));
    registry.register(PoolElement::channel(50, "mot01", ElementType::Motor, "motctrl01"));

    registry.register(PoolElement::controller(
        6,
        "twodctrl01",
        ElementType::TwoDExpChannel,
        true,
    ));
    registry.register(
        PoolElement::channel(60, "twod01", ElementType::TwoDExpChannel, "twodctrl01")
            .with_value_info(ValueInfo {
                dtype: DataType::Integer,
                dformat: DataFormat::TwoD,
                max_dim_size: vec![1024, 1024],
            }),
    );

    registry.register(PoolElement::controller(
        7,
        "pcctrl01",
        ElementType::PseudoCounter,
        false,
    ));
    registry.register(
        PoolElement::channel(70, "pc01", ElementType::PseudoCounter, "pcctrl01")
            .with_value_info(ValueInfo::scalar_double()),
    );

    registry.set_external_data_format(EXTERNAL_AMPLI, DataFormat::Scalar);
    registry
}

// =============================================================================
// MockAcquisitionEngine
// =============================================================================

/// One call received by the mock engine.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineCall {
    /// `prepare` with the armed number of starts
    Prepare {
        /// Armed starts
        nb_starts: u64,
        /// Legacy multiplicity
        multiple: u64,
    },
    /// `run`
    Run,
    /// `stop`
    Stop,
    /// `abort`
    Abort,
    /// `stop_software_synchronizer`
    StopSoftwareSynchronizer,
}

/// Acquisition engine recording every call.
///
/// With [`MockAcquisitionEngine::set_busy_on_run`], `run` marks the software
/// synchronizer busy; `stop`, `abort` and `stop_software_synchronizer` clear the
/// flags again. Flags can also be set
/// directly to simulate sub-engine activity.
#[derive(Debug, Default)]
pub struct MockAcquisitionEngine {
    calls: Mutex<Vec<EngineCall>>,
    last_request: Mutex<Option<PrepareRequest>>,
    software_synchronizer: AtomicBool,
    software_acquisition: AtomicBool,
    zerod_acquisition: AtomicBool,
    fail_prepare: AtomicBool,
    busy_on_run: AtomicBool,
}

impl MockAcquisitionEngine {
    /// Engine with all sub-engines idle.
    pub fn new() -> Self {
        Self::default()
    }

    /// Calls received so far, in order.
    pub fn calls(&self) -> Vec<EngineCall> {
        self.calls.lock().clone()
    }

    /// Number of `run` calls received so far.
    pub fn run_count(&self) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|call| matches!(call, EngineCall::Run))
            .count()
    }

    /// The last prepare request.
    pub fn last_request(&self) -> Option<PrepareRequest> {
        self.last_request.lock().clone()
    }

    /// Make the next prepares fail.
    pub fn set_fail_prepare(&self, fail: bool) {
        self.fail_prepare.store(fail, Ordering::SeqCst);
    }

    /// Mark the software synchronizer busy on every `run`.
    pub fn set_busy_on_run(&self, busy: bool) {
        self.busy_on_run.store(busy, Ordering::SeqCst);
    }

    /// Set the software synchronizer busy flag.
    pub fn set_software_synchronizer_started(&self, started: bool) {
        self.software_synchronizer.store(started, Ordering::SeqCst);
    }

    /// Set the software acquisition busy flag.
    pub fn set_software_acquisition_started(&self, started: bool) {
        self.software_acquisition.store(started, Ordering::SeqCst);
    }

    /// Set the 0D acquisition busy flag.
    pub fn set_zerod_acquisition_started(&self, started: bool) {
        self.zerod_acquisition.store(started, Ordering::SeqCst);
    }

    fn record(&self, call: EngineCall) {
        debug!(?call, "Mock acquisition engine call");
        self.calls.lock().push(call);
    }

    fn clear_flags(&self) {
        self.software_synchronizer.store(false, Ordering::SeqCst);
        self.software_acquisition.store(false, Ordering::SeqCst);
        self.zerod_acquisition.store(false, Ordering::SeqCst);
    }
}

#[async_trait]
impl AcquisitionEngine for MockAcquisitionEngine {
    async fn prepare(&self, request: PrepareRequest) -> Result<()> {
        self.record(EngineCall::Prepare {
            nb_starts: request.nb_starts,
            multiple: request.multiple,
        });
        if self.fail_prepare.load(Ordering::SeqCst) {
            return Err(anyhow!("mock prepare failure for {}", request.group));
        }
        *self.last_request.lock() = Some(request);
        Ok(())
    }

    async fn run(&self) -> Result<()> {
        self.record(EngineCall::Run);
        if self.busy_on_run.load(Ordering::SeqCst) {
            self.software_synchronizer.store(true, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.record(EngineCall::Stop);
        self.clear_flags();
        Ok(())
    }

    async fn abort(&self) -> Result<()> {
        self.record(EngineCall::Abort);
        self.clear_flags();
        Ok(())
    }

    async fn stop_software_synchronizer(&self) -> Result<()> {
        self.record(EngineCall::StopSoftwareSynchronizer);
        self.software_synchronizer.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_software_synchronizer_started(&self) -> bool {
        self.software_synchronizer.load(Ordering::SeqCst)
    }

    fn is_software_acquisition_started(&self) -> bool {
        self.software_acquisition.load(Ordering::SeqCst)
    }

    fn is_zerod_acquisition_started(&self) -> bool {
        self.zerod_acquisition.load(Ordering::SeqCst)
    }
}
