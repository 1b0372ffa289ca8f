//! Acquisition engine interface.
//!
//! The measurement group does not drive hardware itself. It hands a validated
//! configuration snapshot and the acquisition parameters to an
//! [`AcquisitionEngine`], then asks it to run, stop or abort. The engine owns
//! the software synchronizer and the software and 0D acquisition paths; the
//! group only observes whether they are busy when it fuses its state.

use crate::config::MeasurementConfiguration;
use crate::defs::{AcqMode, SynchDomain};
use crate::element::ElementHandle;
use crate::synchronization::SynchronizationDescription;
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// Value bounding each acquisition.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AcquisitionValue {
    /// Seconds of integration ([`AcqMode::Timer`])
    IntegrationTime(f64),
    /// Counts of the monitor channel ([`AcqMode::Monitor`])
    MonitorCount(u64),
}

/// Everything the engine needs to arm a sequence of starts.
#[derive(Debug, Clone)]
pub struct PrepareRequest {
    /// Name of the preparing group
    pub group: String,
    /// Configuration snapshot valid for the whole sequence
    pub configuration: Arc<MeasurementConfiguration>,
    /// Whether the configuration or mode changed since the last prepare
    pub config_dirty: bool,
    /// Acquisition mode
    pub mode: AcqMode,
    /// Integration time or monitor count
    pub value: AcquisitionValue,
    /// Synchronization description
    pub synchronization: SynchronizationDescription,
    /// Moveable used by position-domain synchronization
    pub moveable: Option<ElementHandle>,
    /// Domain the software synchronizer starts in
    pub initial_domain: SynchDomain,
    /// Number of starts armed by this prepare
    pub nb_starts: u64,
    /// Legacy multiplicity forwarded unchanged
    pub multiple: u64,
}

/// Busy flags of the engine sub-engines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubEngineStatus {
    /// Software synchronizer is generating events
    pub software_synchronizer: bool,
    /// Software acquisition path is acquiring
    pub software_acquisition: bool,
    /// 0D acquisition path is acquiring
    pub zerod_acquisition: bool,
}

impl SubEngineStatus {
    /// Whether any sub-engine is busy.
    pub fn any_started(&self) -> bool {
        self.software_synchronizer || self.software_acquisition || self.zerod_acquisition
    }
}

/// Executes acquisitions on behalf of a measurement group.
///
/// Status queries are synchronous and may be called from any thread while an
/// acquisition is running.
#[async_trait]
pub trait AcquisitionEngine: Send + Sync {
    /// Arm the controllers for `request.nb_starts` starts.
    async fn prepare(&self, request: PrepareRequest) -> Result<()>;

    /// Start one acquisition. Returns once started, not when finished.
    async fn run(&self) -> Result<()>;

    /// Stop the running acquisition.
    async fn stop(&self) -> Result<()>;

    /// Abort the running acquisition.
    async fn abort(&self) -> Result<()>;

    /// Stop the software synchronizer. Must be a no-op when it is idle.
    async fn stop_software_synchronizer(&self) -> Result<()>;

    /// Software synchronizer busy flag.
    fn is_software_synchronizer_started(&self) -> bool;

    /// Software acquisition busy flag.
    fn is_software_acquisition_started(&self) -> bool;

    /// 0D acquisition busy flag.
    fn is_zerod_acquisition_started(&self) -> bool;

    /// All busy flags at once.
    fn sub_engine_status(&self) -> SubEngineStatus {
        SubEngineStatus {
            software_synchronizer: self.is_software_synchronizer_started(),
            software_acquisition: self.is_software_acquisition_started(),
            zerod_acquisition: self.is_zerod_acquisition_started(),
        }
    }
}
