//! Measurement configuration: normalization, master election and queries.
//!
//! [`MeasurementConfiguration::from_user`] turns a loosely structured
//! [`UserConfiguration`] into an immutable snapshot:
//!
//! ```text
//! UserConfiguration ──▶ per controller:  migrate legacy shape
//!                                        resolve names / synchronizer
//!                                        classify (timerable / 0D / external / plain)
//!                                        fill channel defaults, elect timer & monitor
//!                                        validate
//!                   ──▶ per domain:      elect master timer & monitor
//!                   ──▶ membership:      enabled channels by index, then synchronizers
//! ```
//!
//! Nothing is committed until every controller has been validated: the caller
//! either gets a complete new snapshot or an error and keeps the previous one.

use super::controller::{
    is_external_controller, ControllerConfiguration, ControllerKind, EnabledFilter, Synchronizer,
    SynchronizerControllerConfiguration,
};
use super::item::ChannelConfiguration;
use super::user::{UserChannelConfig, UserConfiguration, UserControllerConfig, SOFTWARE_SYNCHRONIZER};
use crate::defs::{AcqSynch, AcqSynchType, DataType, ElementType, Normalization, PlotType};
use crate::element::{
    Element, ElementHandle, ElementId, ElementRef, ElementRegistry, ExternalChannel,
};
use crate::error::{AppResult, MeasurementGroupError};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, warn};

/// Description used when the user configuration has none.
pub const DEFAULT_DESCRIPTION: &str = "General purpose measurement configuration";

// =============================================================================
// Membership
// =============================================================================

/// Identity of a group member as pushed to the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MemberId {
    /// Pool element id
    Id(ElementId),
    /// External (or id-less) element full name
    Name(String),
}

/// One enabled member of the group, in acquisition order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    /// Identity pushed to the orchestrator
    pub id: MemberId,
    /// Full name, used to match state events
    pub full_name: String,
    /// Channel index; `None` for synchronizers
    pub index: Option<usize>,
}

// =============================================================================
// Query filters
// =============================================================================

/// Filter on the synchronization of timerable controllers.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SynchFilter {
    /// Every synchronization
    #[default]
    Any,
    /// Only the listed synchronizations, in this order
    Only(Vec<AcqSynch>),
}

impl From<AcqSynch> for SynchFilter {
    fn from(value: AcqSynch) -> Self {
        SynchFilter::Only(vec![value])
    }
}

impl From<Vec<AcqSynch>> for SynchFilter {
    fn from(value: Vec<AcqSynch>) -> Self {
        SynchFilter::Only(value)
    }
}

impl From<&[AcqSynch]> for SynchFilter {
    fn from(value: &[AcqSynch]) -> Self {
        SynchFilter::Only(value.to_vec())
    }
}

impl From<Option<AcqSynch>> for SynchFilter {
    fn from(value: Option<AcqSynch>) -> Self {
        value.map_or(SynchFilter::Any, SynchFilter::from)
    }
}

// =============================================================================
// Normalization context
// =============================================================================

/// Collaborators and options of one normalization pass.
#[derive(Clone, Copy)]
pub struct NormalizeContext<'a> {
    /// Registry resolving names to elements
    pub registry: &'a dyn ElementRegistry,
    /// Name of the owning group, the default label
    pub group_name: &'a str,
    /// Rewrite names into their canonical form
    pub to_fqdn: bool,
    /// Configuration being replaced, for the group-level timer/monitor fallback
    pub previous: Option<&'a MeasurementConfiguration>,
}

impl<'a> NormalizeContext<'a> {
    /// Context for a first configuration.
    pub fn new(registry: &'a dyn ElementRegistry, group_name: &'a str) -> Self {
        Self {
            registry,
            group_name,
            to_fqdn: true,
            previous: None,
        }
    }

    /// Canonical form of `name`, warning when a rewrite was needed.
    pub(crate) fn canonical(&self, name: &str) -> String {
        if !self.to_fqdn {
            return name.to_string();
        }
        let full_name = self.registry.resolve_to_canonical_name(name);
        if full_name != name {
            warn!(
                group = %self.group_name,
                name = %name,
                full_name = %full_name,
                deprecated = true,
                "PQDN full name is deprecated in favor of FQDN full name. \
                 Re-apply configuration in order to upgrade."
            );
        }
        full_name
    }

    fn element(&self, full_name: &str, what: &str) -> AppResult<ElementHandle> {
        self.registry
            .get_element_by_full_name(full_name)
            .ok_or_else(|| MeasurementGroupError::rejected(format!("unknown {what} {full_name}")))
    }
}

/// Smallest-index master candidate seen so far in one domain.
#[derive(Debug, Default)]
struct MasterSlot {
    controller: Option<usize>,
    index: Option<usize>,
}

impl MasterSlot {
    fn offer(&mut self, controller: usize, channel: Option<&ChannelConfiguration>) {
        let Some(channel) = channel.filter(|channel| channel.enabled()) else {
            return;
        };
        if self.index.map_or(true, |best| channel.index() < best) {
            self.controller = Some(controller);
            self.index = Some(channel.index());
        }
    }
}

// =============================================================================
// Measurement Configuration
// =============================================================================

/// Immutable, validated configuration of a measurement group.
#[derive(Debug, Clone)]
pub struct MeasurementConfiguration {
    label: String,
    description: String,
    controllers: Vec<ControllerConfiguration>,
    timerable: BTreeMap<AcqSynch, Vec<usize>>,
    zerod: Vec<usize>,
    other: Vec<usize>,
    synch_ctrls: Vec<SynchronizerControllerConfiguration>,
    master_timer_sw: Option<usize>,
    master_monitor_sw: Option<usize>,
    master_timer_sw_start: Option<usize>,
    master_monitor_sw_start: Option<usize>,
    channel_acq_synch: HashMap<String, AcqSynch>,
    ctrl_acq_synch: HashMap<String, AcqSynch>,
    membership: Vec<Member>,
    user_config: Arc<UserConfiguration>,
    changed: bool,
}

impl MeasurementConfiguration {
    /// Normalize and validate a user configuration.
    ///
    /// # Errors
    ///
    /// [`MeasurementGroupError::ConfigurationRejected`] when the configuration
    /// has no channels or no enabled channel, references unknown elements, has a
    /// channel without index, a value type that is not implemented, or a timerable
    /// controller failing validation.
    pub fn from_user(cfg: &UserConfiguration, ctx: &NormalizeContext<'_>) -> AppResult<Self> {
        if cfg.channel_count() == 0 {
            return Err(MeasurementGroupError::rejected(
                "The configuration has no channels",
            ));
        }

        let label = cfg
            .label
            .clone()
            .unwrap_or_else(|| ctx.group_name.to_string());
        let description = cfg
            .description
            .clone()
            .unwrap_or_else(|| DEFAULT_DESCRIPTION.to_string());

        let mut controllers = Vec::new();
        let mut timerable: BTreeMap<AcqSynch, Vec<usize>> =
            AcqSynch::ALL.iter().map(|synch| (*synch, Vec::new())).collect();
        let mut zerod = Vec::new();
        let mut other = Vec::new();
        let mut synch_ctrls: Vec<SynchronizerControllerConfiguration> = Vec::new();
        let mut timer_sw = MasterSlot::default();
        let mut monitor_sw = MasterSlot::default();
        let mut timer_sw_start = MasterSlot::default();
        let mut monitor_sw_start = MasterSlot::default();
        let mut members_by_index: BTreeMap<usize, Member> = BTreeMap::new();
        let mut channel_acq_synch = HashMap::new();
        let mut ctrl_acq_synch = HashMap::new();

        let mut user_config = UserConfiguration {
            label: Some(label.clone()),
            description: Some(description.clone()),
            ..Default::default()
        };

        for (raw_name, raw_data) in &cfg.controllers {
            let data = raw_data.effective();
            // discard controllers which don't have items (garbage)
            if data.channels.is_empty() {
                debug!(group = %ctx.group_name, controller = %raw_name, "Discarding controller without channels");
                continue;
            }

            let external = is_external_controller(raw_name);
            let (ctrl_name, ctrl_element) = if external {
                (raw_name.clone(), None)
            } else {
                let name = ctx.canonical(raw_name);
                let element = ctx.element(&name, "controller")?;
                if element.element_type() != ElementType::Controller {
                    return Err(MeasurementGroupError::rejected(format!(
                        "{name} is not a controller"
                    )));
                }
                (name, Some(element))
            };

            let synchronizer = match data.synchronizer.as_deref() {
                None | Some(SOFTWARE_SYNCHRONIZER) => Synchronizer::Software,
                Some(name) => Synchronizer::Element(ctx.canonical(name)),
            };
            let synch_slot = match &synchronizer {
                Synchronizer::Software => None,
                Synchronizer::Element(name) => {
                    Some(Self::attach_synchronizer(ctx, &mut synch_ctrls, name)?)
                }
            };

            let synchronization = match (data.synchronization, data.trigger_type) {
                (Some(synchronization), _) => synchronization,
                (None, Some(trigger_type)) => {
                    warn!(
                        group = %ctx.group_name,
                        controller = %ctrl_name,
                        deprecated = true,
                        "trigger_type configuration parameter is deprecated in favor of \
                         synchronization. Re-apply configuration in order to upgrade."
                    );
                    trigger_type
                }
                (None, None) => AcqSynchType::Trigger,
            };

            let mut ctrl_item = match &ctrl_element {
                None => ControllerConfiguration::external(
                    &ctrl_name,
                    synchronizer.clone(),
                    synchronization,
                ),
                Some(element) if element.is_timerable() => {
                    let acq_synch =
                        AcqSynch::from_synch_type(synchronizer.is_software(), synchronization);
                    ctrl_acq_synch.insert(ctrl_name.clone(), acq_synch);
                    ControllerConfiguration::timerable(
                        ElementRef::of(element.as_ref()),
                        acq_synch,
                        synchronizer.clone(),
                        synchronization,
                    )
                }
                Some(element) => {
                    let kind = match element.ctrl_types().first() {
                        Some(ElementType::ZeroDExpChannel) => ControllerKind::ZeroD,
                        _ => ControllerKind::Plain,
                    };
                    ControllerConfiguration::new(
                        ElementRef::of(element.as_ref()),
                        kind,
                        synchronizer.clone(),
                        synchronization,
                    )
                }
            };
            let acq_synch = ctrl_item.acq_synch();

            let mut user_ctrl = UserControllerConfig {
                synchronizer: Some(synchronizer.as_user_value().to_string()),
                synchronization: Some(synchronization),
                ..Default::default()
            };

            for (ch_name, ch_data) in &data.channels {
                let (key, channel): (String, ElementHandle) = if external {
                    let full_name = ch_data.full_name.clone().unwrap_or_else(|| ch_name.clone());
                    let format = ctx.registry.external_data_format(&full_name);
                    (ch_name.clone(), Arc::new(ExternalChannel::new(full_name, format)))
                } else {
                    let name = ctx.canonical(ch_name);
                    let element = ctx.element(&name, "channel")?;
                    (name, element)
                };

                let owner = (!external).then_some(ctrl_name.as_str());
                let filled = fill_channel_data(channel.as_ref(), ch_data, owner)?;
                let index = filled.index.unwrap_or_default();
                let item = ChannelConfiguration::new(
                    ElementRef::of(channel.as_ref()),
                    ctrl_name.clone(),
                    acq_synch,
                    filled.clone(),
                    index,
                );

                if item.enabled() {
                    let id = match channel.id() {
                        Some(id) if !external => MemberId::Id(id),
                        _ => MemberId::Name(channel.full_name().to_string()),
                    };
                    let member = Member {
                        id,
                        full_name: channel.full_name().to_string(),
                        index: Some(index),
                    };
                    if let Some(previous) = members_by_index.insert(index, member) {
                        return Err(MeasurementGroupError::rejected(format!(
                            "index {index} is used by {} and {}",
                            previous.full_name,
                            channel.full_name()
                        )));
                    }
                    if let Some(acq_synch) = acq_synch {
                        channel_acq_synch.insert(channel.full_name().to_string(), acq_synch);
                    }
                }

                user_ctrl.channels.insert(key, filled);
                ctrl_item.add_channel(item);
            }

            if ctrl_item.is_timerable() {
                let timer = data.timer.as_deref().map(|name| ctx.canonical(name));
                let monitor = data.monitor.as_deref().map(|name| ctx.canonical(name));
                ctrl_item.update_timer(timer.as_deref())?;
                ctrl_item.update_monitor(monitor.as_deref())?;
                user_ctrl.timer = ctrl_item.timer().map(|ch| ch.full_name().to_string());
                user_ctrl.monitor = ctrl_item.monitor().map(|ch| ch.full_name().to_string());
            }

            if let Some((position, synch_ref)) = synch_slot {
                synch_ctrls[position]
                    .synchronizer_mut(synch_ref)
                    .mark_referenced(ctrl_item.enabled());
            }

            ctrl_item.validate()?;

            let position = controllers.len();
            match ctrl_item.kind() {
                ControllerKind::Timerable(roles) => {
                    timerable.entry(roles.acq_synch).or_default().push(position);
                    match roles.acq_synch {
                        AcqSynch::SoftwareTrigger | AcqSynch::SoftwareGate => {
                            timer_sw.offer(position, ctrl_item.timer());
                            monitor_sw.offer(position, ctrl_item.monitor());
                        }
                        AcqSynch::SoftwareStart => {
                            timer_sw_start.offer(position, ctrl_item.timer());
                            monitor_sw_start.offer(position, ctrl_item.monitor());
                        }
                        _ => {}
                    }
                }
                ControllerKind::ZeroD => zerod.push(position),
                ControllerKind::External => other.push(position),
                // pseudo counters and other plain controllers are only listed in `controllers`
                ControllerKind::Plain => {}
            }

            user_config.controllers.insert(ctrl_name, user_ctrl);
            controllers.push(ctrl_item);
        }

        if members_by_index.is_empty() {
            return Err(MeasurementGroupError::rejected(
                "The configuration has all the channels disabled",
            ));
        }

        for synch_ctrl in &mut synch_ctrls {
            synch_ctrl.update_state();
        }

        let master_name = |slot: &MasterSlot, pick: fn(&ControllerConfiguration) -> Option<&ChannelConfiguration>| {
            slot.controller
                .and_then(|position| pick(&controllers[position]))
                .map(|channel| channel.full_name().to_string())
        };
        let previous_config = ctx.previous.map(|previous| previous.user_configuration());
        user_config.timer = master_name(&timer_sw, ControllerConfiguration::timer)
            .or_else(|| master_name(&timer_sw_start, ControllerConfiguration::timer))
            .or_else(|| cfg.timer.clone())
            .or_else(|| previous_config.and_then(|previous| previous.timer.clone()));
        user_config.monitor = master_name(&monitor_sw, ControllerConfiguration::monitor)
            .or_else(|| master_name(&monitor_sw_start, ControllerConfiguration::monitor))
            .or_else(|| cfg.monitor.clone())
            .or_else(|| previous_config.and_then(|previous| previous.monitor.clone()));

        // sorted indexes may not be consecutive (if a channel is disabled)
        let mut membership: Vec<Member> = members_by_index.into_values().collect();
        for synch_ctrl in &synch_ctrls {
            for synch in synch_ctrl.channels(EnabledFilter::Enabled) {
                let id = match synch.id() {
                    Some(id) => MemberId::Id(id),
                    None => MemberId::Name(synch.full_name().to_string()),
                };
                membership.push(Member {
                    id,
                    full_name: synch.full_name().to_string(),
                    index: None,
                });
            }
        }

        Ok(Self {
            label,
            description,
            controllers,
            timerable,
            zerod,
            other,
            synch_ctrls,
            master_timer_sw: timer_sw.controller,
            master_monitor_sw: monitor_sw.controller,
            master_timer_sw_start: timer_sw_start.controller,
            master_monitor_sw_start: monitor_sw_start.controller,
            channel_acq_synch,
            ctrl_acq_synch,
            membership,
            user_config: Arc::new(user_config),
            changed: true,
        })
    }

    /// Replace `self` with the normalization of `cfg`; on error `self` is untouched.
    pub fn set_configuration_from_user(
        &mut self,
        cfg: &UserConfiguration,
        registry: &dyn ElementRegistry,
        group_name: &str,
        to_fqdn: bool,
    ) -> AppResult<()> {
        let next = {
            let ctx = NormalizeContext {
                registry,
                group_name,
                to_fqdn,
                previous: Some(self),
            };
            Self::from_user(cfg, &ctx)?
        };
        *self = next;
        Ok(())
    }

    /// Find (or create) the configuration of the controller owning `name` and
    /// make sure it holds an item for the synchronizer.
    fn attach_synchronizer(
        ctx: &NormalizeContext<'_>,
        synch_ctrls: &mut Vec<SynchronizerControllerConfiguration>,
        name: &str,
    ) -> AppResult<(usize, ElementRef)> {
        let synch = ctx.element(name, "synchronizer")?;
        let ctrl_name = synch.controller_name().ok_or_else(|| {
            MeasurementGroupError::rejected(format!("synchronizer {name} has no controller"))
        })?;
        let ctrl = ctx.element(ctrl_name, "synchronizer controller")?;
        let position = match synch_ctrls
            .iter()
            .position(|conf| conf.full_name() == ctrl.full_name())
        {
            Some(position) => position,
            None => {
                synch_ctrls.push(SynchronizerControllerConfiguration::new(ElementRef::of(
                    ctrl.as_ref(),
                )));
                synch_ctrls.len() - 1
            }
        };
        let synch_ref = ElementRef::of(synch.as_ref());
        synch_ctrls[position].synchronizer_mut(synch_ref.clone());
        Ok((position, synch_ref))
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    /// Group label.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Group description.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Whether this snapshot was produced by a normalization pass.
    pub fn changed(&self) -> bool {
        self.changed
    }

    /// Normalized, round-trippable user configuration.
    pub fn user_configuration(&self) -> &UserConfiguration {
        &self.user_config
    }

    /// Shared handle to the user configuration, for notifications.
    pub fn user_configuration_arc(&self) -> Arc<UserConfiguration> {
        self.user_config.clone()
    }

    /// All controller configurations, in configuration order.
    pub fn controllers(&self) -> &[ControllerConfiguration] {
        &self.controllers
    }

    fn filtered(&self, positions: &[usize], enabled: EnabledFilter) -> Vec<&ControllerConfiguration> {
        positions
            .iter()
            .map(|&position| &self.controllers[position])
            .filter(|ctrl| enabled.accepts(ctrl.enabled()))
            .collect()
    }

    /// Timerable controllers filtered by synchronization and enabled flag.
    pub fn timerable_ctrls(
        &self,
        acq_synch: impl Into<SynchFilter>,
        enabled: EnabledFilter,
    ) -> Vec<&ControllerConfiguration> {
        let positions: Vec<usize> = match acq_synch.into() {
            SynchFilter::Any => self.timerable.values().flatten().copied().collect(),
            SynchFilter::Only(synchs) => synchs
                .iter()
                .filter_map(|synch| self.timerable.get(synch))
                .flatten()
                .copied()
                .collect(),
        };
        self.filtered(&positions, enabled)
    }

    /// 0D controllers filtered by enabled flag.
    pub fn zerod_ctrls(&self, enabled: EnabledFilter) -> Vec<&ControllerConfiguration> {
        self.filtered(&self.zerod, enabled)
    }

    /// External pseudo-controllers.
    pub fn other_ctrls(&self, enabled: EnabledFilter) -> Vec<&ControllerConfiguration> {
        self.filtered(&self.other, enabled)
    }

    /// Synchronizer controllers filtered by enabled flag.
    pub fn synch_ctrls(&self, enabled: EnabledFilter) -> Vec<&SynchronizerControllerConfiguration> {
        self.synch_ctrls
            .iter()
            .filter(|ctrl| enabled.accepts(ctrl.enabled()))
            .collect()
    }

    /// Master timer of software trigger/gate acquisitions.
    pub fn master_timer_software(&self) -> Option<&ChannelConfiguration> {
        self.master_timer_sw
            .and_then(|position| self.controllers[position].timer())
    }

    /// Master monitor of software trigger/gate acquisitions.
    pub fn master_monitor_software(&self) -> Option<&ChannelConfiguration> {
        self.master_monitor_sw
            .and_then(|position| self.controllers[position].monitor())
    }

    /// Master timer of software start acquisitions.
    pub fn master_timer_software_start(&self) -> Option<&ChannelConfiguration> {
        self.master_timer_sw_start
            .and_then(|position| self.controllers[position].timer())
    }

    /// Master monitor of software start acquisitions.
    pub fn master_monitor_software_start(&self) -> Option<&ChannelConfiguration> {
        self.master_monitor_sw_start
            .and_then(|position| self.controllers[position].monitor())
    }

    /// Group-level timer name.
    pub fn timer(&self) -> Option<&str> {
        self.user_config.timer.as_deref()
    }

    /// Group-level monitor name.
    pub fn monitor(&self) -> Option<&str> {
        self.user_config.monitor.as_deref()
    }

    /// Synchronization of an enabled channel of a timerable controller.
    pub fn acq_synch_by_channel(&self, full_name: &str) -> AppResult<AcqSynch> {
        self.channel_acq_synch.get(full_name).copied().ok_or_else(|| {
            MeasurementGroupError::StaleReference(format!(
                "channel {full_name} has no acquisition synchronization in this configuration"
            ))
        })
    }

    /// Synchronization of a timerable controller.
    pub fn acq_synch_by_controller(&self, full_name: &str) -> AppResult<AcqSynch> {
        self.ctrl_acq_synch.get(full_name).copied().ok_or_else(|| {
            MeasurementGroupError::StaleReference(format!(
                "controller {full_name} has no acquisition synchronization in this configuration"
            ))
        })
    }

    /// Controller by short or full name, case-insensitive.
    pub fn controller_by_name(&self, name: &str) -> Option<&ControllerConfiguration> {
        let name = name.to_lowercase();
        self.controllers.iter().find(|ctrl| {
            ctrl.name().to_lowercase() == name || ctrl.full_name().to_lowercase() == name
        })
    }

    /// Channel by short or full name.
    pub fn channel(&self, name: &str) -> Option<&ChannelConfiguration> {
        self.controllers.iter().find_map(|ctrl| ctrl.channel(name))
    }

    /// Enabled members in acquisition order: channels by index, then synchronizers.
    pub fn membership(&self) -> &[Member] {
        &self.membership
    }

    /// Ids of [`Self::membership`].
    pub fn user_element_ids(&self) -> Vec<MemberId> {
        self.membership.iter().map(|member| member.id.clone()).collect()
    }

    /// Number of enabled channels, synchronizers excluded.
    pub fn enabled_channel_count(&self) -> usize {
        self.membership
            .iter()
            .filter(|member| member.index.is_some())
            .count()
    }
}

// =============================================================================
// Channel defaults
// =============================================================================

fn type_name(dtype: DataType) -> AppResult<&'static str> {
    match dtype {
        DataType::Double => Ok("float"),
        other => Err(MeasurementGroupError::rejected(format!(
            "{other:?} data type is not implemented"
        ))),
    }
}

/// Fill channel defaults from the live element.
///
/// `controller` is the owning controller full name, `None` for external channels.
fn fill_channel_data(
    channel: &dyn Element,
    data: &UserChannelConfig,
    controller: Option<&str>,
) -> AppResult<UserChannelConfig> {
    // index MUST be here already
    let index = data.index.ok_or_else(|| {
        MeasurementGroupError::rejected(format!("channel {} has no index", channel.full_name()))
    })?;

    let (ndim, data_type, shape) = match (channel.element_type(), channel.value_info()) {
        (ElementType::External, Some(info)) => (Some(info.dformat.ndim()), Some("float64"), Vec::new()),
        (ElementType::External, None) => (None, None, Vec::new()),
        (_, Some(info)) => (
            Some(info.dformat.ndim()),
            Some(type_name(info.dtype)?),
            info.max_dim_size,
        ),
        (_, None) => (None, None, Vec::new()),
    };

    let mut filled = data.clone();
    filled.index = Some(index);
    let name = filled
        .name
        .get_or_insert_with(|| channel.name().to_string())
        .clone();
    filled
        .full_name
        .get_or_insert_with(|| channel.full_name().to_string());
    filled.source.get_or_insert_with(|| channel.source());
    filled.enabled.get_or_insert(true);
    filled.label.get_or_insert(name);
    filled.ndim = ndim;
    filled.output.get_or_insert(true);
    filled.plot_type.get_or_insert(PlotType::No);
    filled.plot_axes.get_or_insert_with(Vec::new);
    filled.conditioning.get_or_insert_with(String::new);
    filled.normalization.get_or_insert(Normalization::No);
    if filled.data_type.is_none() {
        filled.data_type = data_type.map(str::to_string);
    }
    filled.data_units.get_or_insert_with(String::new);
    filled.nexus_path.get_or_insert_with(String::new);
    filled.shape.get_or_insert(shape);
    if let Some(controller) = controller {
        filled
            .controller_name
            .get_or_insert_with(|| controller.to_string());
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::builder::build_measurement_configuration;
    use crate::mock::{laboratory_registry, EXTERNAL_AMPLI};

    fn normalize(registry: &dyn ElementRegistry, cfg: &UserConfiguration) -> AppResult<MeasurementConfiguration> {
        MeasurementConfiguration::from_user(cfg, &NormalizeContext::new(registry, "mntgrp01"))
    }

    fn members(registry: &dyn ElementRegistry, names: &[&str]) -> Vec<ElementHandle> {
        names
            .iter()
            .map(|name| {
                registry
                    .get_element_by_full_name(name)
                    .unwrap_or_else(|| Arc::new(ExternalChannel::new(*name, None)))
            })
            .collect()
    }

    #[test]
    fn skeleton_normalizes_with_defaults() {
        let registry = laboratory_registry();
        let skeleton = build_measurement_configuration(&members(
            &registry,
            &["pool/ct01", "pool/ct02", "pool/zerod01"],
        ))
        .unwrap();
        let config = normalize(&registry, &skeleton).unwrap();

        assert_eq!(config.label(), "mntgrp01");
        assert_eq!(config.description(), DEFAULT_DESCRIPTION);
        assert_eq!(config.enabled_channel_count(), 3);
        let ct01 = config.channel("ct01").unwrap();
        let data = ct01.data();
        assert_eq!(data.data_type.as_deref(), Some("float"));
        assert_eq!(data.ndim, Some(0));
        assert_eq!(data.label.as_deref(), Some("ct01"));
        assert_eq!(data.controller_name.as_deref(), Some("pool/ctctrl01"));
        assert_eq!(data.source.as_deref(), Some("pool/ct01/value"));

        let software = config.timerable_ctrls(AcqSynch::SoftwareTrigger, EnabledFilter::Any);
        assert_eq!(software.len(), 1);
        assert_eq!(config.zerod_ctrls(EnabledFilter::Enabled).len(), 1);
        assert_eq!(config.master_timer_software().unwrap().name(), "ct01");
        assert_eq!(config.timer(), Some("pool/ct01"));
        assert_eq!(
            config.acq_synch_by_controller("pool/ctctrl01").unwrap(),
            AcqSynch::SoftwareTrigger
        );
    }

    #[test]
    fn membership_orders_by_index_then_synchronizers() {
        let registry = laboratory_registry();
        let json = r#"{"controllers": {
            "pool/ctctrl01": {"synchronizer": "pool/tg01", "synchronization": "Gate",
                              "channels": {"pool/ct02": {"index": 2}, "pool/ct01": {"index": 0}}},
            "pool/zerodctrl01": {"channels": {"pool/zerod01": {"index": 1},
                                              "pool/zerod02": {"index": 3, "enabled": false}}}
        }}"#;
        let cfg = UserConfiguration::from_json_str(json).unwrap();
        let config = normalize(&registry, &cfg).unwrap();

        let ids = config.user_element_ids();
        assert_eq!(
            ids,
            vec![
                MemberId::Id(10),
                MemberId::Id(30),
                MemberId::Id(11),
                MemberId::Id(40)
            ]
        );
        assert_eq!(
            config.acq_synch_by_channel("pool/ct01").unwrap(),
            AcqSynch::HardwareGate
        );
        assert!(config.master_timer_software().is_none());
        assert_eq!(config.synch_ctrls(EnabledFilter::Enabled).len(), 1);
        assert!(matches!(
            config.acq_synch_by_channel("pool/zerod01"),
            Err(MeasurementGroupError::StaleReference(_))
        ));
    }

    #[test]
    fn external_channels_are_grouped_under_pseudo_controller() {
        let registry = laboratory_registry();
        let skeleton = build_measurement_configuration(&members(
            &registry,
            &["pool/ct01", EXTERNAL_AMPLI],
        ))
        .unwrap();
        let config = normalize(&registry, &skeleton).unwrap();

        let other = config.other_ctrls(EnabledFilter::Any);
        assert_eq!(other.len(), 1);
        assert!(other[0].is_external());
        let ampli = config.channel(EXTERNAL_AMPLI).unwrap();
        assert_eq!(ampli.data().data_type.as_deref(), Some("float64"));
        assert!(ampli.data().controller_name.is_none());
        assert_eq!(
            config.membership()[1].id,
            MemberId::Name(EXTERNAL_AMPLI.to_string())
        );
    }

    #[test]
    fn pseudo_counters_are_not_other_controllers() {
        let registry = laboratory_registry();
        let skeleton = build_measurement_configuration(&members(
            &registry,
            &["pool/ct01", "pool/pc01", EXTERNAL_AMPLI],
        ))
        .unwrap();
        let config = normalize(&registry, &skeleton).unwrap();

        let other = config.other_ctrls(EnabledFilter::Any);
        assert_eq!(other.len(), 1);
        assert!(other[0].is_external());
        assert!(config.zerod_ctrls(EnabledFilter::Any).is_empty());
        assert_eq!(config.timerable_ctrls(SynchFilter::Any, EnabledFilter::Any).len(), 1);

        let pseudo = config.controller_by_name("pcctrl01").unwrap();
        assert_eq!(pseudo.kind(), ControllerKind::Plain);
        assert_eq!(config.controllers().len(), 3);
        assert_eq!(config.membership()[1].id, MemberId::Id(70));
    }

    #[test]
    fn unimplemented_data_type_is_rejected() {
        let registry = laboratory_registry();
        let skeleton =
            build_measurement_configuration(&members(&registry, &["pool/twod01"])).unwrap();
        let err = normalize(&registry, &skeleton).unwrap_err();
        assert!(err.to_string().contains("not implemented"));
    }

    #[test]
    fn missing_index_is_rejected() {
        let registry = laboratory_registry();
        let cfg = UserConfiguration::from_json_str(
            r#"{"controllers": {"pool/ctctrl01": {"channels": {"pool/ct01": {}}}}}"#,
        )
        .unwrap();
        let err = normalize(&registry, &cfg).unwrap_err();
        assert!(err.to_string().contains("has no index"));
    }

    #[test]
    fn all_disabled_is_rejected() {
        let registry = laboratory_registry();
        let cfg = UserConfiguration::from_json_str(
            r#"{"controllers": {"pool/zerodctrl01": {"channels": {
                "pool/zerod01": {"index": 0, "enabled": false}}}}}"#,
        )
        .unwrap();
        assert!(normalize(&registry, &cfg).is_err());
        assert!(normalize(&registry, &UserConfiguration::default()).is_err());
    }

    #[test]
    fn controllers_without_channels_are_discarded() {
        let registry = laboratory_registry();
        let cfg = UserConfiguration::from_json_str(
            r#"{"controllers": {
                "pool/ctctrl02": {"channels": {}},
                "pool/ctctrl01": {"channels": {"pool/ct01": {"index": 0}}}}}"#,
        )
        .unwrap();
        let config = normalize(&registry, &cfg).unwrap();
        assert_eq!(config.controllers().len(), 1);
        assert!(config.controller_by_name("CTCTRL01").is_some());
        assert!(config.controller_by_name("ctctrl02").is_none());
    }

    #[test]
    fn short_names_are_canonicalized() {
        let registry = laboratory_registry();
        let cfg = UserConfiguration::from_json_str(
            r#"{"controllers": {"ctctrl01": {"channels": {"ct01": {"index": 0}}}}}"#,
        )
        .unwrap();
        let config = normalize(&registry, &cfg).unwrap();
        let user = config.user_configuration();
        assert!(user.controllers.contains_key("pool/ctctrl01"));
        assert!(user.controllers["pool/ctctrl01"]
            .channels
            .contains_key("pool/ct01"));
    }

    #[test]
    fn failed_replacement_keeps_previous_configuration() {
        let registry = laboratory_registry();
        let good = build_measurement_configuration(&members(&registry, &["pool/ct01"])).unwrap();
        let mut config = normalize(&registry, &good).unwrap();
        let bad = UserConfiguration::from_json_str(
            r#"{"controllers": {"pool/ctctrl01": {"channels": {"pool/ct09": {"index": 0}}}}}"#,
        )
        .unwrap();
        assert!(config
            .set_configuration_from_user(&bad, &registry, "mntgrp01", true)
            .is_err());
        assert_eq!(config.timer(), Some("pool/ct01"));
        assert_eq!(config.enabled_channel_count(), 1);
    }

    #[test]
    fn hardware_only_falls_back_to_previous_group_timer() {
        let registry = laboratory_registry();
        let first = build_measurement_configuration(&members(&registry, &["pool/ct05"])).unwrap();
        let mut config = normalize(&registry, &first).unwrap();
        assert_eq!(config.timer(), Some("pool/ct05"));

        let hardware = UserConfiguration::from_json_str(
            r#"{"controllers": {"pool/ctctrl01": {"synchronizer": "pool/tg02",
                "channels": {"pool/ct01": {"index": 0}}}}}"#,
        )
        .unwrap();
        config
            .set_configuration_from_user(&hardware, &registry, "mntgrp01", true)
            .unwrap();
        assert!(config.master_timer_software().is_none());
        assert_eq!(config.timer(), Some("pool/ct05"));
    }

    #[test]
    fn software_start_masters_are_tracked_separately() {
        let registry = laboratory_registry();
        let cfg = UserConfiguration::from_json_str(
            r#"{"controllers": {
                "pool/ctctrl01": {"synchronization": "Start",
                                  "channels": {"pool/ct01": {"index": 1}}},
                "pool/ctctrl02": {"channels": {"pool/ct05": {"index": 0}}}}}"#,
        )
        .unwrap();
        let config = normalize(&registry, &cfg).unwrap();
        assert_eq!(config.master_timer_software().unwrap().name(), "ct05");
        assert_eq!(config.master_timer_software_start().unwrap().name(), "ct01");
        assert_eq!(config.master_monitor_software_start().unwrap().name(), "ct01");
        assert_eq!(config.timer(), Some("pool/ct05"));
    }
}
