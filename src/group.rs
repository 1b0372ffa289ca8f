//! Measurement group orchestrator.
//!
//! [`PoolMeasurementGroup`] owns the current configuration snapshot and the
//! acquisition parameters of a group, drives an [`AcquisitionEngine`] through
//! prepare/start/stop/abort and keeps the group state fused from its members.
//!
//! # Locking
//!
//! - The configuration is an `Arc` snapshot behind a `parking_lot::RwLock`;
//!   reconfiguration swaps the pointer, readers keep the snapshot they hold.
//! - Acquisition parameters live behind a `parking_lot::Mutex` that is never
//!   held across an `.await`.
//! - The state mutex guards the last state reported by each element and
//!   serializes "fuse, publish, notify". Configuration swaps happen under it too,
//!   so a state is always fused against a complete membership.
//!
//! Lock order is state, then configuration, then parameters.
//!
//! # Multi-start sequencing
//!
//! ```text
//! prepare()            pending_starts = nb_starts
//! start_acquisition()  pending_starts -= 1, engine.run()
//! start_acquisition()  with pending_starts == 0: deprecated implicit prepare of one start
//! stop() / abort()     pending_starts = 0
//! ```

use crate::acquisition::{AcquisitionEngine, AcquisitionValue, PrepareRequest};
use crate::config::{
    build_measurement_configuration, EnabledFilter, MeasurementConfiguration, Member, MemberId,
    NormalizeContext, SynchFilter, UserConfiguration,
};
use crate::defs::{AcqMode, ElementType, State, SynchDomain};
use crate::element::{ElementHandle, ElementRegistry};
use crate::error::{AppResult, MeasurementGroupError};
use crate::settings::GroupDefaults;
use crate::state::{calculate_states, ElementStatus, GroupState};
use crate::synchronization::SynchronizationDescription;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// Notification priority of state changes.
pub const STATE_PRIORITY: u8 = 2;

// =============================================================================
// Events
// =============================================================================

/// Change notified to observers of a group.
#[derive(Debug, Clone, PartialEq)]
pub enum GroupEvent {
    /// A new configuration was applied
    Configuration(Arc<UserConfiguration>),
    /// Integration time set
    IntegrationTime(f64),
    /// Monitor count set
    MonitorCount(u64),
    /// Acquisition mode set
    AcquisitionMode(AcqMode),
    /// Synchronization description set
    Synchronization(SynchronizationDescription),
    /// Moveable set (canonical name)
    Moveable(Option<String>),
    /// Number of starts set
    NbStarts(u64),
    /// Fused state changed
    State(GroupState),
}

/// A [`GroupEvent`] with its propagation priority.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupNotification {
    /// Emitting group name
    pub group: String,
    /// What changed
    pub event: GroupEvent,
    /// Propagation priority, never 0
    pub priority: u8,
}

/// Change reported by a member element.
#[derive(Debug, Clone, PartialEq)]
pub enum ElementEvent {
    /// The element state changed
    State {
        /// Full name of the element
        source: String,
        /// New state
        state: State,
        /// New status text
        status: String,
    },
    /// Any other attribute changed; ignored by the group
    Other {
        /// Full name of the element
        source: String,
        /// Attribute name
        name: String,
    },
}

impl ElementEvent {
    /// State event with an empty status.
    pub fn state(source: impl Into<String>, state: State) -> Self {
        ElementEvent::State {
            source: source.into(),
            state,
            status: String::new(),
        }
    }
}

// =============================================================================
// Parameters
// =============================================================================

#[derive(Debug)]
struct AcquisitionParams {
    monitor_count: Option<u64>,
    nb_starts: u64,
    pending_starts: u64,
    acquisition_mode: AcqMode,
    config_dirty: bool,
    moveable: Option<String>,
    moveable_element: Option<ElementHandle>,
    sw_synch_initial_domain: SynchDomain,
    synchronization: SynchronizationDescription,
}

impl AcquisitionParams {
    fn new(defaults: &GroupDefaults) -> Self {
        Self {
            monitor_count: None,
            nb_starts: defaults.nb_starts.max(1),
            pending_starts: 0,
            acquisition_mode: defaults.acquisition_mode,
            config_dirty: true,
            moveable: None,
            moveable_element: None,
            sw_synch_initial_domain: defaults.sw_synch_initial_domain,
            synchronization: SynchronizationDescription::default(),
        }
    }

    fn value(&self) -> AppResult<AcquisitionValue> {
        match self.acquisition_mode {
            AcqMode::Timer => Ok(AcquisitionValue::IntegrationTime(
                self.synchronization.integration_time()?,
            )),
            AcqMode::Monitor => self
                .monitor_count
                .map(AcquisitionValue::MonitorCount)
                .ok_or_else(|| {
                    MeasurementGroupError::Parameter("monitor count is not set".to_string())
                }),
        }
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Builder for [`PoolMeasurementGroup`].
///
/// # Example
/// ```
/// use daq_measurement_group::group::PoolMeasurementGroup;
/// use daq_measurement_group::mock::{laboratory_registry, MockAcquisitionEngine};
/// use std::sync::Arc;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let registry = Arc::new(laboratory_registry());
/// let group = PoolMeasurementGroup::builder("mntgrp01")
///     .registry(registry)
///     .engine(Arc::new(MockAcquisitionEngine::new()))
///     .member_names(&["ct01", "ct02", "zerod01"])?
///     .build()?;
///
/// assert_eq!(group.timer().as_deref(), Some("pool/ct01"));
/// # Ok(())
/// # }
/// ```
pub struct MeasurementGroupBuilder {
    name: String,
    registry: Option<Arc<dyn ElementRegistry>>,
    engine: Option<Arc<dyn AcquisitionEngine>>,
    members: Vec<ElementHandle>,
    configuration: Option<UserConfiguration>,
    defaults: GroupDefaults,
}

impl MeasurementGroupBuilder {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            registry: None,
            engine: None,
            members: Vec::new(),
            configuration: None,
            defaults: GroupDefaults::default(),
        }
    }

    /// Registry resolving element names.
    pub fn registry(mut self, registry: Arc<dyn ElementRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Engine executing the acquisitions.
    pub fn engine(mut self, engine: Arc<dyn AcquisitionEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    /// Append a member. Trigger/gate elements already present are skipped.
    pub fn member(mut self, element: ElementHandle) -> Self {
        let duplicate = self
            .members
            .iter()
            .any(|member| member.full_name() == element.full_name());
        if duplicate && element.element_type() == ElementType::TriggerGate {
            return self;
        }
        self.members.push(element);
        self
    }

    /// Append members in order.
    pub fn members(self, elements: impl IntoIterator<Item = ElementHandle>) -> Self {
        elements.into_iter().fold(self, Self::member)
    }

    /// Append members by name, resolved through the registry.
    ///
    /// The registry must be set first.
    pub fn member_names(self, names: &[&str]) -> AppResult<Self> {
        let registry = self.registry.clone().ok_or_else(|| {
            MeasurementGroupError::Parameter("registry must be set before members".to_string())
        })?;
        names.iter().try_fold(self, |builder, name| {
            let full_name = registry.resolve_to_canonical_name(name);
            let element = registry.get_element_by_full_name(&full_name).ok_or_else(|| {
                MeasurementGroupError::rejected(format!("unknown member {name}"))
            })?;
            Ok(builder.member(element))
        })
    }

    /// Explicit configuration; members are then ignored.
    pub fn configuration(mut self, configuration: UserConfiguration) -> Self {
        self.configuration = Some(configuration);
        self
    }

    /// Initial acquisition parameters.
    pub fn defaults(mut self, defaults: GroupDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    /// Normalize the configuration and create the group.
    ///
    /// # Errors
    ///
    /// `Parameter` when the registry or engine is missing, `ConfigurationRejected`
    /// when the members (or explicit configuration) do not give a valid configuration.
    pub fn build(self) -> AppResult<PoolMeasurementGroup> {
        let registry = self
            .registry
            .ok_or_else(|| MeasurementGroupError::Parameter("registry is required".to_string()))?;
        let engine = self
            .engine
            .ok_or_else(|| MeasurementGroupError::Parameter("engine is required".to_string()))?;

        for (position, member) in self.members.iter().enumerate() {
            if self.members[..position]
                .iter()
                .any(|other| other.full_name() == member.full_name())
            {
                return Err(MeasurementGroupError::rejected(format!(
                    "{} is used more than once",
                    member.full_name()
                )));
            }
        }

        let user_config = match self.configuration {
            Some(configuration) => configuration,
            None => build_measurement_configuration(&self.members)?,
        };
        let ctx = NormalizeContext {
            registry: registry.as_ref(),
            group_name: &self.name,
            to_fqdn: self.defaults.use_fqdn,
            previous: None,
        };
        let configuration = MeasurementConfiguration::from_user(&user_config, &ctx)?;

        let initial = calculate_states(
            configuration.membership(),
            &HashMap::new(),
            engine.sub_engine_status(),
        );
        let (state_tx, _) = watch::channel(initial);
        let (notifications, _) = broadcast::channel(self.defaults.notification_capacity.max(1));

        info!(
            group = %self.name,
            channels = configuration.enabled_channel_count(),
            "Measurement group created"
        );

        Ok(PoolMeasurementGroup {
            name: self.name,
            registry,
            engine,
            config: RwLock::new(Arc::new(configuration)),
            params: Mutex::new(AcquisitionParams::new(&self.defaults)),
            element_states: Mutex::new(HashMap::new()),
            state_tx,
            notifications,
            event_queue_capacity: self.defaults.event_queue_capacity.max(1),
            use_fqdn: self.defaults.use_fqdn,
            simulation_mode: AtomicBool::new(false),
            aborted: AtomicBool::new(false),
        })
    }
}

// =============================================================================
// PoolMeasurementGroup
// =============================================================================

/// A named set of channels acquired together.
pub struct PoolMeasurementGroup {
    name: String,
    registry: Arc<dyn ElementRegistry>,
    engine: Arc<dyn AcquisitionEngine>,
    config: RwLock<Arc<MeasurementConfiguration>>,
    params: Mutex<AcquisitionParams>,
    element_states: Mutex<HashMap<String, ElementStatus>>,
    state_tx: watch::Sender<GroupState>,
    notifications: broadcast::Sender<GroupNotification>,
    event_queue_capacity: usize,
    use_fqdn: bool,
    simulation_mode: AtomicBool,
    aborted: AtomicBool,
}

impl std::fmt::Debug for PoolMeasurementGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolMeasurementGroup")
            .field("name", &self.name)
            .field("state", &self.state_tx.borrow().state)
            .finish_non_exhaustive()
    }
}

impl PoolMeasurementGroup {
    /// Start building a group named `name`.
    pub fn builder(name: impl Into<String>) -> MeasurementGroupBuilder {
        MeasurementGroupBuilder::new(name)
    }

    /// Group name.
    pub fn name(&self) -> &str {
        &self.name
    }

    fn fire_event(&self, event: GroupEvent, priority: u8) {
        if priority == 0 {
            return;
        }
        let notification = GroupNotification {
            group: self.name.clone(),
            event,
            priority,
        };
        // no subscribers is not an error
        let _ = self.notifications.send(notification);
    }

    /// Subscribe to change notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<GroupNotification> {
        self.notifications.subscribe()
    }

    // -------------------------------------------------------------------------
    // Configuration
    // -------------------------------------------------------------------------

    /// Current configuration snapshot.
    pub fn configuration(&self) -> Arc<MeasurementConfiguration> {
        self.config.read().clone()
    }

    /// Normalize `cfg` and make it the current configuration.
    ///
    /// On error the current configuration is left untouched.
    pub fn set_configuration_from_user(
        &self,
        cfg: &UserConfiguration,
        propagate: u8,
        to_fqdn: bool,
    ) -> AppResult<()> {
        let previous = self.configuration();
        let ctx = NormalizeContext {
            registry: self.registry.as_ref(),
            group_name: &self.name,
            to_fqdn,
            previous: Some(&previous),
        };
        let next = Arc::new(MeasurementConfiguration::from_user(cfg, &ctx)?);

        {
            let states = self.element_states.lock();
            *self.config.write() = next.clone();
            self.publish(&states, next.membership());
        }
        self.params.lock().config_dirty = true;

        info!(
            group = %self.name,
            channels = next.enabled_channel_count(),
            timer = ?next.timer(),
            "Configuration applied"
        );
        self.fire_event(
            GroupEvent::Configuration(next.user_configuration_arc()),
            propagate,
        );
        Ok(())
    }

    /// Apply `cfg` with notification and the configured name canonicalization.
    pub fn set_configuration(&self, cfg: &UserConfiguration) -> AppResult<()> {
        self.set_configuration_from_user(cfg, 1, self.use_fqdn)
    }

    /// Normalized user configuration of the current snapshot.
    pub fn user_configuration(&self) -> Arc<UserConfiguration> {
        self.configuration().user_configuration_arc()
    }

    /// Whether the configuration or mode changed since the last prepare.
    pub fn is_config_dirty(&self) -> bool {
        self.params.lock().config_dirty
    }

    /// Group-level master timer.
    pub fn timer(&self) -> Option<String> {
        self.configuration().timer().map(str::to_string)
    }

    /// Group-level master monitor.
    pub fn monitor(&self) -> Option<String> {
        self.configuration().monitor().map(str::to_string)
    }

    /// Enabled members in acquisition order.
    pub fn user_element_ids(&self) -> Vec<MemberId> {
        self.configuration().user_element_ids()
    }

    /// Pool controllers of the configuration, external pseudo-controller excluded.
    pub fn pool_controllers(&self) -> Vec<ElementHandle> {
        self.configuration()
            .controllers()
            .iter()
            .filter(|ctrl| !ctrl.is_external())
            .filter_map(|ctrl| ctrl.item().resolve(self.registry.as_ref()))
            .collect()
    }

    /// Pool controller by short or full name, case-insensitive.
    pub fn pool_controller_by_name(&self, name: &str) -> Option<ElementHandle> {
        let name = name.to_lowercase();
        self.pool_controllers().into_iter().find(|ctrl| {
            ctrl.name().to_lowercase() == name || ctrl.full_name().to_lowercase() == name
        })
    }

    // -------------------------------------------------------------------------
    // Acquisition parameters
    // -------------------------------------------------------------------------

    /// Active time of the single synchronization group.
    pub fn integration_time(&self) -> AppResult<f64> {
        self.params.lock().synchronization.integration_time()
    }

    /// Replace the synchronization with one window of `integration_time`.
    pub fn set_integration_time(&self, integration_time: f64, propagate: u8) {
        let latency_time = self.latency_time();
        let synchronization =
            SynchronizationDescription::from_integration_time(integration_time, latency_time);
        self.set_synchronization(synchronization, propagate);
        self.fire_event(GroupEvent::IntegrationTime(integration_time), propagate);
    }

    /// Monitor count, if set.
    pub fn monitor_count(&self) -> Option<u64> {
        self.params.lock().monitor_count
    }

    /// Set the monitor count used in [`AcqMode::Monitor`].
    pub fn set_monitor_count(&self, monitor_count: u64, propagate: u8) {
        self.params.lock().monitor_count = Some(monitor_count);
        self.fire_event(GroupEvent::MonitorCount(monitor_count), propagate);
    }

    /// Acquisition mode.
    pub fn acquisition_mode(&self) -> AcqMode {
        self.params.lock().acquisition_mode
    }

    /// Set the acquisition mode; marks the configuration dirty.
    pub fn set_acquisition_mode(&self, acquisition_mode: AcqMode, propagate: u8) {
        {
            let mut params = self.params.lock();
            params.acquisition_mode = acquisition_mode;
            params.config_dirty = true;
        }
        self.fire_event(GroupEvent::AcquisitionMode(acquisition_mode), propagate);
    }

    /// Synchronization description.
    pub fn synchronization(&self) -> SynchronizationDescription {
        self.params.lock().synchronization.clone()
    }

    /// Set the synchronization description; marks the configuration dirty.
    pub fn set_synchronization(&self, synchronization: SynchronizationDescription, propagate: u8) {
        {
            let mut params = self.params.lock();
            params.synchronization = synchronization.clone();
            params.config_dirty = true;
        }
        self.fire_event(GroupEvent::Synchronization(synchronization), propagate);
    }

    /// Moveable used in position-domain synchronization.
    pub fn moveable(&self) -> Option<String> {
        self.params.lock().moveable.clone()
    }

    /// Set the moveable by name. `None` and `"None"` clear it.
    ///
    /// # Errors
    ///
    /// `StaleReference` when the name does not resolve to an element.
    pub fn set_moveable(&self, moveable: Option<&str>, propagate: u8, to_fqdn: bool) -> AppResult<()> {
        let resolved = match moveable.filter(|name| *name != "None") {
            None => None,
            Some(name) => {
                let ctx = NormalizeContext {
                    registry: self.registry.as_ref(),
                    group_name: &self.name,
                    to_fqdn,
                    previous: None,
                };
                let full_name = ctx.canonical(name);
                let element = self
                    .registry
                    .get_element_by_full_name(&full_name)
                    .ok_or_else(|| {
                        MeasurementGroupError::StaleReference(format!("unknown moveable {name}"))
                    })?;
                Some((full_name, element))
            }
        };
        let name = resolved.as_ref().map(|(full_name, _)| full_name.clone());
        {
            let mut params = self.params.lock();
            params.moveable = name.clone();
            params.moveable_element = resolved.map(|(_, element)| element);
        }
        self.fire_event(GroupEvent::Moveable(name), propagate);
        Ok(())
    }

    /// Largest `latency_time` over the enabled timerable controllers, 0 if none.
    pub fn latency_time(&self) -> f64 {
        self.configuration()
            .timerable_ctrls(SynchFilter::Any, EnabledFilter::Enabled)
            .into_iter()
            .filter_map(|ctrl| ctrl.item().resolve(self.registry.as_ref()))
            .filter_map(|ctrl| ctrl.ctrl_par("latency_time"))
            .fold(0.0, f64::max)
    }

    /// Domain the software synchronizer starts in.
    pub fn sw_synch_initial_domain(&self) -> SynchDomain {
        self.params.lock().sw_synch_initial_domain
    }

    /// Set the domain the software synchronizer starts in.
    pub fn set_sw_synch_initial_domain(&self, domain: SynchDomain) {
        self.params.lock().sw_synch_initial_domain = domain;
    }

    /// Starts armed by each prepare.
    pub fn nb_starts(&self) -> u64 {
        self.params.lock().nb_starts
    }

    /// Set the starts armed by each prepare.
    ///
    /// # Errors
    ///
    /// `Parameter` when `nb_starts` is 0.
    pub fn set_nb_starts(&self, nb_starts: u64, propagate: u8) -> AppResult<()> {
        if nb_starts == 0 {
            return Err(MeasurementGroupError::Parameter(
                "nb_starts must be at least 1".to_string(),
            ));
        }
        self.params.lock().nb_starts = nb_starts;
        self.fire_event(GroupEvent::NbStarts(nb_starts), propagate);
        Ok(())
    }

    /// Starts left from the last prepare.
    pub fn pending_starts(&self) -> u64 {
        self.params.lock().pending_starts
    }

    /// Whether acquisitions skip the engine run.
    pub fn simulation_mode(&self) -> bool {
        self.simulation_mode.load(Ordering::SeqCst)
    }

    /// Enable or disable simulation.
    pub fn set_simulation_mode(&self, simulation_mode: bool) {
        self.simulation_mode.store(simulation_mode, Ordering::SeqCst);
    }

    /// Whether the last acquisition was aborted.
    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    // -------------------------------------------------------------------------
    // Acquisition
    // -------------------------------------------------------------------------

    /// Arm the engine for `nb_starts` starts.
    pub async fn prepare(&self, multiple: u64) -> AppResult<()> {
        let nb_starts = self.nb_starts();
        self.prepare_starts(nb_starts, multiple).await
    }

    async fn prepare_starts(&self, nb_starts: u64, multiple: u64) -> AppResult<()> {
        let configuration = self.configuration();
        let request = {
            let mut params = self.params.lock();
            let value = params.value()?;
            params.pending_starts = nb_starts;
            PrepareRequest {
                group: self.name.clone(),
                configuration,
                config_dirty: params.config_dirty,
                mode: params.acquisition_mode,
                value,
                synchronization: params.synchronization.clone(),
                moveable: params.moveable_element.clone(),
                initial_domain: params.sw_synch_initial_domain,
                nb_starts,
                multiple,
            }
        };
        debug!(group = %self.name, nb_starts, mode = ?request.mode, "Preparing acquisition");

        if let Err(err) = self.engine.prepare(request).await {
            self.params.lock().pending_starts = 0;
            return Err(err.into());
        }
        self.params.lock().config_dirty = false;
        Ok(())
    }

    /// Start one acquisition.
    ///
    /// Without pending starts this prepares a single start first, which is
    /// deprecated. `value` is accepted for compatibility and ignored.
    pub async fn start_acquisition(
        &self,
        value: Option<AcquisitionValue>,
        multiple: u64,
    ) -> AppResult<()> {
        if let Some(value) = value {
            debug!(group = %self.name, ?value, "Ignoring start value");
        }
        if !self.claim_start() {
            warn!(
                group = %self.name,
                deprecated = true,
                "starting acquisition without prior preparing is deprecated"
            );
            debug!(group = %self.name, "Preparing with number_of_starts equal to 1");
            self.prepare_starts(1, multiple).await?;
            // a stop or abort during the prepare zeroed the armed start
            if !self.claim_start() {
                debug!(group = %self.name, "Start cancelled while preparing");
                return Ok(());
            }
        }
        self.aborted.store(false, Ordering::SeqCst);
        if self.simulation_mode() {
            debug!(group = %self.name, "Simulation mode, not running the engine");
            return Ok(());
        }
        self.engine.run().await?;
        Ok(())
    }

    /// Take one armed start, if any, in a single step.
    fn claim_start(&self) -> bool {
        let mut params = self.params.lock();
        if params.pending_starts == 0 {
            return false;
        }
        params.pending_starts -= 1;
        true
    }

    /// Stop the acquisition and the software synchronizer. Idempotent.
    pub async fn stop(&self) -> AppResult<()> {
        self.params.lock().pending_starts = 0;
        debug!(group = %self.name, "Stopping acquisition");
        let synchronizer = self.engine.stop_software_synchronizer().await;
        let stop = self.engine.stop().await;
        synchronizer.and(stop)?;
        Ok(())
    }

    /// Abort the acquisition and the software synchronizer. Idempotent.
    pub async fn abort(&self) -> AppResult<()> {
        self.params.lock().pending_starts = 0;
        self.aborted.store(true, Ordering::SeqCst);
        debug!(group = %self.name, "Aborting acquisition");
        let synchronizer = self.engine.stop_software_synchronizer().await;
        let abort = self.engine.abort().await;
        synchronizer.and(abort)?;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // State
    // -------------------------------------------------------------------------

    /// Last published state.
    pub fn state(&self) -> GroupState {
        self.state_tx.borrow().clone()
    }

    /// Watch the published state.
    pub fn subscribe_state(&self) -> watch::Receiver<GroupState> {
        self.state_tx.subscribe()
    }

    /// Fuse the state now, without publishing it.
    pub fn calculate_states(&self) -> GroupState {
        let states = self.element_states.lock();
        let configuration = self.configuration();
        calculate_states(
            configuration.membership(),
            &states,
            self.engine.sub_engine_status(),
        )
    }

    /// Fuse and publish the state, e.g. after a sub-engine finished.
    pub fn refresh_state(&self) -> GroupState {
        let states = self.element_states.lock();
        let configuration = self.configuration();
        self.publish(&states, configuration.membership())
    }

    /// Handle a change of a member. Only state changes are considered.
    pub fn on_element_changed(&self, event: &ElementEvent) {
        match event {
            ElementEvent::State {
                source,
                state,
                status,
            } => {
                let mut states = self.element_states.lock();
                states.insert(
                    source.clone(),
                    ElementStatus {
                        state: *state,
                        status: status.clone(),
                    },
                );
                let configuration = self.configuration();
                self.publish(&states, configuration.membership());
            }
            ElementEvent::Other { source, name } => {
                trace!(group = %self.name, %source, %name, "Ignoring element event");
            }
        }
    }

    /// Fuse and publish; the caller holds the state mutex.
    fn publish(&self, states: &HashMap<String, ElementStatus>, members: &[Member]) -> GroupState {
        let fused = calculate_states(members, states, self.engine.sub_engine_status());
        let changed = self.state_tx.send_if_modified(|current| {
            if *current == fused {
                false
            } else {
                *current = fused.clone();
                true
            }
        });
        if changed {
            debug!(group = %self.name, state = %fused.state, "State changed");
            self.fire_event(GroupEvent::State(fused.clone()), STATE_PRIORITY);
        }
        fused
    }

    /// Spawn a task consuming element events from a bounded queue.
    ///
    /// The task ends when every sender is dropped or the group is dropped.
    pub fn spawn_event_listener(self: &Arc<Self>) -> (mpsc::Sender<ElementEvent>, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel(self.event_queue_capacity);
        let group = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let Some(group) = group.upgrade() else {
                    break;
                };
                group.on_element_changed(&event);
            }
        });
        (tx, handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{laboratory_registry, EngineCall, MockAcquisitionEngine};

    fn group_with(names: &[&str]) -> (PoolMeasurementGroup, Arc<MockAcquisitionEngine>) {
        let engine = Arc::new(MockAcquisitionEngine::new());
        let group = PoolMeasurementGroup::builder("mntgrp01")
            .registry(Arc::new(laboratory_registry()))
            .engine(engine.clone())
            .member_names(names)
            .unwrap()
            .build()
            .unwrap();
        (group, engine)
    }

    #[test]
    fn builder_requires_members_or_configuration() {
        let result = PoolMeasurementGroup::builder("empty")
            .registry(Arc::new(laboratory_registry()))
            .engine(Arc::new(MockAcquisitionEngine::new()))
            .build();
        assert!(matches!(
            result,
            Err(MeasurementGroupError::ConfigurationRejected(_))
        ));
    }

    #[test]
    fn builder_skips_repeated_trigger_gates() {
        let (group, _) = group_with(&["ct01", "tg01", "tg01"]);
        assert_eq!(
            group.user_element_ids(),
            vec![MemberId::Id(10), MemberId::Id(40)]
        );

        let registry = Arc::new(laboratory_registry());
        let repeated = PoolMeasurementGroup::builder("mntgrp02")
            .registry(registry)
            .engine(Arc::new(MockAcquisitionEngine::new()))
            .member_names(&["ct01", "ct01"])
            .unwrap()
            .build();
        assert!(repeated.is_err());
    }

    #[test]
    fn latency_is_the_maximum_over_enabled_timerable_controllers() {
        let (group, _) = group_with(&["ct01", "ct05", "zerod01"]);
        assert_eq!(group.latency_time(), 0.3);

        let (single, _) = group_with(&["ct01"]);
        assert_eq!(single.latency_time(), 0.1);

        let (none, _) = group_with(&["zerod01"]);
        assert_eq!(none.latency_time(), 0.0);
    }

    #[test]
    fn integration_time_builds_one_group_with_latency() {
        let (group, _) = group_with(&["ct01"]);
        assert!(matches!(
            group.integration_time(),
            Err(MeasurementGroupError::SynchronizationState(_))
        ));
        group.set_integration_time(0.5, 1);
        assert_eq!(group.integration_time().unwrap(), 0.5);
        let synchronization = group.synchronization();
        let total = synchronization.groups()[0]
            .get(crate::defs::SynchParam::Total, SynchDomain::Time)
            .unwrap();
        assert!((total - 0.6).abs() < 1e-12);
        assert!(group.is_config_dirty());
    }

    #[test]
    fn notifications_respect_priority() {
        let (group, _) = group_with(&["ct01"]);
        let mut rx = group.subscribe();
        group.set_monitor_count(10, 0);
        group.set_acquisition_mode(AcqMode::Monitor, 1);
        let notification = rx.try_recv().unwrap();
        assert_eq!(notification.event, GroupEvent::AcquisitionMode(AcqMode::Monitor));
        assert_eq!(notification.priority, 1);
        assert!(rx.try_recv().is_err());
        assert_eq!(group.monitor_count(), Some(10));
    }

    #[test]
    fn moveable_none_clears_and_unknown_is_rejected() {
        let (group, _) = group_with(&["ct01"]);
        group.set_moveable(Some("mot01"), 1, true).unwrap();
        assert_eq!(group.moveable().as_deref(), Some("pool/mot01"));
        group.set_moveable(Some("None"), 1, true).unwrap();
        assert!(group.moveable().is_none());
        assert!(matches!(
            group.set_moveable(Some("mot99"), 1, true),
            Err(MeasurementGroupError::StaleReference(_))
        ));
    }

    #[test]
    fn pool_controllers_lookup_is_case_insensitive() {
        let (group, _) = group_with(&["ct01", "zerod01"]);
        assert_eq!(group.pool_controllers().len(), 2);
        assert!(group.pool_controller_by_name("ZERODCTRL01").is_some());
        assert!(group.pool_controller_by_name("pool/CtCtrl01").is_some());
        assert!(group.pool_controller_by_name("ctctrl02").is_none());
    }

    #[tokio::test]
    async fn monitor_mode_requires_monitor_count() {
        let (group, engine) = group_with(&["ct01"]);
        group.set_acquisition_mode(AcqMode::Monitor, 0);
        assert!(matches!(
            group.prepare(1).await,
            Err(MeasurementGroupError::Parameter(_))
        ));
        group.set_monitor_count(1000, 0);
        group.prepare(1).await.unwrap();
        let request = engine.last_request().unwrap();
        assert_eq!(request.value, AcquisitionValue::MonitorCount(1000));
        assert!(request.config_dirty);
        assert!(!group.is_config_dirty());
    }

    #[tokio::test]
    async fn failed_prepare_leaves_no_pending_starts() {
        let (group, engine) = group_with(&["ct01"]);
        group.set_integration_time(0.1, 0);
        engine.set_fail_prepare(true);
        let err = group.prepare(1).await.unwrap_err();
        assert!(matches!(err, MeasurementGroupError::Acquisition(_)));
        assert_eq!(group.pending_starts(), 0);
    }

    #[tokio::test]
    async fn simulation_mode_skips_the_engine_run() {
        let (group, engine) = group_with(&["ct01"]);
        group.set_integration_time(0.1, 0);
        group.set_simulation_mode(true);
        group.prepare(1).await.unwrap();
        group.start_acquisition(None, 1).await.unwrap();
        assert_eq!(engine.run_count(), 0);
        assert_eq!(group.pending_starts(), 0);
    }

    #[tokio::test]
    async fn stop_and_abort_are_idempotent() {
        let (group, engine) = group_with(&["ct01"]);
        group.set_nb_starts(3, 0).unwrap();
        group.set_integration_time(0.1, 0);
        group.prepare(1).await.unwrap();
        group.stop().await.unwrap();
        group.stop().await.unwrap();
        assert_eq!(group.pending_starts(), 0);
        group.abort().await.unwrap();
        assert!(group.is_aborted());

        let calls = engine.calls();
        assert_eq!(
            &calls[1..],
            &[
                EngineCall::StopSoftwareSynchronizer,
                EngineCall::Stop,
                EngineCall::StopSoftwareSynchronizer,
                EngineCall::Stop,
                EngineCall::StopSoftwareSynchronizer,
                EngineCall::Abort,
            ]
        );
    }

    #[test]
    fn element_state_events_update_the_fused_state() {
        let (group, engine) = group_with(&["ct01", "zerod01"]);
        assert_eq!(group.state().state, State::Unknown);

        group.on_element_changed(&ElementEvent::state("pool/ct01", State::On));
        group.on_element_changed(&ElementEvent::state("pool/zerod01", State::On));
        assert_eq!(group.state().state, State::On);

        engine.set_zerod_acquisition_started(true);
        assert_eq!(group.calculate_states().state, State::Moving);
        assert_eq!(group.state().state, State::On);
        assert_eq!(group.refresh_state().state, State::Moving);
        assert_eq!(group.state().state, State::Moving);

        group.on_element_changed(&ElementEvent::Other {
            source: "pool/ct01".to_string(),
            name: "value".to_string(),
        });
        assert_eq!(group.state().state, State::Moving);
    }

    #[test]
    fn reconfiguration_recomputes_state_against_new_membership() {
        let (group, _) = group_with(&["ct01", "zerod01"]);
        group.on_element_changed(&ElementEvent::state("pool/ct01", State::On));
        assert_eq!(group.state().state, State::Unknown);

        let cfg = UserConfiguration::from_json_str(
            r#"{"controllers": {"pool/ctctrl01": {"channels": {"pool/ct01": {"index": 0}}}}}"#,
        )
        .unwrap();
        let mut rx = group.subscribe();
        group.set_configuration(&cfg).unwrap();
        assert_eq!(group.state().state, State::On);

        let mut saw_configuration = false;
        while let Ok(notification) = rx.try_recv() {
            saw_configuration |= matches!(notification.event, GroupEvent::Configuration(_));
        }
        assert!(saw_configuration);
    }
}
