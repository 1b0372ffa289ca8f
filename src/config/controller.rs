//! Controller configurations.
//!
//! A controller configuration aggregates the channel configurations of one
//! physical controller (or of the `__tango__` pseudo-controller for external
//! channels). Its enabled flag is derived: a controller is enabled when at least
//! one of its channels is. Controller kinds differ in what they elect and
//! validate, see [`ControllerKind`].

use super::item::{ChannelConfiguration, ConfigurationItem, SynchronizerConfiguration};
use crate::defs::{AcqSynch, AcqSynchType};
use crate::element::ElementRef;
use crate::error::{AppResult, MeasurementGroupError};

/// Controller key under which external channels are grouped.
pub const EXTERNAL_CONTROLLER: &str = "__tango__";

/// Whether a controller name denotes an external pseudo-controller.
pub fn is_external_controller(name: &str) -> bool {
    name.starts_with("__")
}

/// Filter on the enabled flag of controllers and channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EnabledFilter {
    /// Enabled and disabled
    #[default]
    Any,
    /// Enabled only
    Enabled,
    /// Disabled only
    Disabled,
}

impl EnabledFilter {
    /// Whether an item with the given flag passes the filter.
    pub fn accepts(&self, enabled: bool) -> bool {
        match self {
            EnabledFilter::Any => true,
            EnabledFilter::Enabled => enabled,
            EnabledFilter::Disabled => !enabled,
        }
    }
}

impl From<Option<bool>> for EnabledFilter {
    fn from(value: Option<bool>) -> Self {
        match value {
            None => EnabledFilter::Any,
            Some(true) => EnabledFilter::Enabled,
            Some(false) => EnabledFilter::Disabled,
        }
    }
}

/// Source of the synchronization signal of a controller.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Synchronizer {
    /// The software synchronizer
    Software,
    /// A trigger/gate element, by full name
    Element(String),
}

impl Synchronizer {
    /// Whether this is the software synchronizer.
    pub fn is_software(&self) -> bool {
        matches!(self, Synchronizer::Software)
    }

    /// Name as stored in the user configuration.
    pub fn as_user_value(&self) -> &str {
        match self {
            Synchronizer::Software => super::user::SOFTWARE_SYNCHRONIZER,
            Synchronizer::Element(name) => name,
        }
    }
}

/// Elected timer and monitor of a timerable controller.
///
/// Positions index into the controller's channel list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerableRoles {
    /// Synchronization elected for this controller
    pub acq_synch: AcqSynch,
    timer: Option<usize>,
    monitor: Option<usize>,
}

/// Capability class of a controller configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerKind {
    /// Controller without timer/monitor roles (pseudo counters, trigger/gates)
    Plain,
    /// Zero-dimensional channels sampled by the software acquisition
    ZeroD,
    /// Controller whose channels can act as timer and monitor
    Timerable(TimerableRoles),
    /// Pseudo-controller for externally addressed channels
    External,
}

/// Which master role is elected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Timer,
    Monitor,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Timer => write!(f, "timer"),
            Role::Monitor => write!(f, "monitor"),
        }
    }
}

/// Configuration of one controller and its channels.
#[derive(Debug, Clone, PartialEq)]
pub struct ControllerConfiguration {
    item: ConfigurationItem,
    kind: ControllerKind,
    synchronizer: Synchronizer,
    synchronization: AcqSynchType,
    channels: Vec<ChannelConfiguration>,
    channels_enabled: Vec<usize>,
    channels_disabled: Vec<usize>,
}

impl ControllerConfiguration {
    /// Create an empty, disabled controller configuration.
    pub fn new(
        element: ElementRef,
        kind: ControllerKind,
        synchronizer: Synchronizer,
        synchronization: AcqSynchType,
    ) -> Self {
        let mut item = ConfigurationItem::new(element);
        item.enabled = false;
        Self {
            item,
            kind,
            synchronizer,
            synchronization,
            channels: Vec::new(),
            channels_enabled: Vec::new(),
            channels_disabled: Vec::new(),
        }
    }

    /// Create the pseudo-controller for external channels named `name`.
    pub fn external(name: &str, synchronizer: Synchronizer, synchronization: AcqSynchType) -> Self {
        let element = ElementRef {
            full_name: name.to_string(),
            name: name.to_string(),
            id: None,
        };
        Self::new(element, ControllerKind::External, synchronizer, synchronization)
    }

    /// Create a timerable controller configuration for `acq_synch`.
    pub fn timerable(
        element: ElementRef,
        acq_synch: AcqSynch,
        synchronizer: Synchronizer,
        synchronization: AcqSynchType,
    ) -> Self {
        let roles = TimerableRoles {
            acq_synch,
            timer: None,
            monitor: None,
        };
        Self::new(
            element,
            ControllerKind::Timerable(roles),
            synchronizer,
            synchronization,
        )
    }

    /// Underlying configuration item.
    pub fn item(&self) -> &ConfigurationItem {
        &self.item
    }

    /// Full name of the controller.
    pub fn full_name(&self) -> &str {
        self.item.full_name()
    }

    /// Short name of the controller.
    pub fn name(&self) -> &str {
        self.item.name()
    }

    /// Whether at least one channel is enabled.
    pub fn enabled(&self) -> bool {
        self.item.enabled
    }

    /// Capability class.
    pub fn kind(&self) -> ControllerKind {
        self.kind
    }

    /// Whether this is a timerable controller.
    pub fn is_timerable(&self) -> bool {
        matches!(self.kind, ControllerKind::Timerable(_))
    }

    /// Whether this is the external pseudo-controller.
    pub fn is_external(&self) -> bool {
        matches!(self.kind, ControllerKind::External)
    }

    /// Elected synchronization, timerable controllers only.
    pub fn acq_synch(&self) -> Option<AcqSynch> {
        match self.kind {
            ControllerKind::Timerable(roles) => Some(roles.acq_synch),
            _ => None,
        }
    }

    /// Synchronizer driving this controller.
    pub fn synchronizer(&self) -> &Synchronizer {
        &self.synchronizer
    }

    /// Configured synchronization type.
    pub fn synchronization(&self) -> AcqSynchType {
        self.synchronization
    }

    /// Aggregate a channel configuration.
    pub fn add_channel(&mut self, channel: ChannelConfiguration) {
        let position = self.channels.len();
        if channel.enabled() {
            self.item.enabled = true;
            self.channels_enabled.push(position);
        } else {
            self.channels_disabled.push(position);
        }
        self.channels.push(channel);
    }

    /// Recompute the enabled flag and the enabled/disabled caches.
    pub fn update_state(&mut self) {
        self.channels_enabled.clear();
        self.channels_disabled.clear();
        for (position, channel) in self.channels.iter().enumerate() {
            if channel.enabled() {
                self.channels_enabled.push(position);
            } else {
                self.channels_disabled.push(position);
            }
        }
        self.item.enabled = !self.channels_enabled.is_empty();
    }

    /// Channels passing the filter, in insertion order.
    pub fn channels(&self, enabled: EnabledFilter) -> Vec<&ChannelConfiguration> {
        let positions: Box<dyn Iterator<Item = &usize>> = match enabled {
            EnabledFilter::Any => return self.channels.iter().collect(),
            EnabledFilter::Enabled => Box::new(self.channels_enabled.iter()),
            EnabledFilter::Disabled => Box::new(self.channels_disabled.iter()),
        };
        positions.map(|&position| &self.channels[position]).collect()
    }

    /// Number of channels.
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Find a channel by full or short name.
    pub fn channel(&self, name: &str) -> Option<&ChannelConfiguration> {
        self.channels
            .iter()
            .find(|channel| channel.full_name() == name || channel.name() == name)
    }

    /// Elected timer channel.
    pub fn timer(&self) -> Option<&ChannelConfiguration> {
        match self.kind {
            ControllerKind::Timerable(roles) => roles.timer.map(|p| &self.channels[p]),
            _ => None,
        }
    }

    /// Elected monitor channel.
    pub fn monitor(&self) -> Option<&ChannelConfiguration> {
        match self.kind {
            ControllerKind::Timerable(roles) => roles.monitor.map(|p| &self.channels[p]),
            _ => None,
        }
    }

    /// Elect the timer: `requested` by name, else the enabled channel with the
    /// smallest index.
    pub fn update_timer(&mut self, requested: Option<&str>) -> AppResult<()> {
        self.update_master(Role::Timer, requested)
    }

    /// Elect the monitor: `requested` by name, else the enabled channel with the
    /// smallest index.
    pub fn update_monitor(&mut self, requested: Option<&str>) -> AppResult<()> {
        self.update_master(Role::Monitor, requested)
    }

    fn update_master(&mut self, role: Role, requested: Option<&str>) -> AppResult<()> {
        let elected = match requested {
            Some(name) => Some(self.find_requested(role, name)?),
            None => self.smallest_index(&self.channels_enabled).or_else(|| {
                let all: Vec<usize> = (0..self.channels.len()).collect();
                self.smallest_index(&all)
            }),
        };
        match &mut self.kind {
            ControllerKind::Timerable(roles) => {
                match role {
                    Role::Timer => roles.timer = elected,
                    Role::Monitor => roles.monitor = elected,
                }
                Ok(())
            }
            _ => Err(MeasurementGroupError::rejected(format!(
                "controller {} is not timerable and cannot have a {}",
                self.item.full_name(),
                role
            ))),
        }
    }

    /// First channel with the smallest index among `positions`.
    fn smallest_index(&self, positions: &[usize]) -> Option<usize> {
        let mut best: Option<usize> = None;
        for &position in positions {
            let index = self.channels[position].index();
            match best {
                Some(current) if self.channels[current].index() <= index => {}
                _ => best = Some(position),
            }
        }
        best
    }

    fn find_requested(&self, role: Role, name: &str) -> AppResult<usize> {
        let matches = |position: &usize| {
            let channel = &self.channels[*position];
            channel.full_name() == name || channel.name() == name
        };
        self.channels_enabled
            .iter()
            .copied()
            .find(matches)
            .or_else(|| (0..self.channels.len()).find(matches))
            .ok_or_else(|| {
                MeasurementGroupError::rejected(format!(
                    "{role} {name} is not a channel of controller {}",
                    self.item.full_name()
                ))
            })
    }

    /// Check the invariants of this controller kind.
    ///
    /// An enabled timerable controller needs an enabled timer or monitor.
    pub fn validate(&self) -> AppResult<()> {
        match self.kind {
            ControllerKind::Timerable(_) => {
                if !self.enabled() {
                    return Ok(());
                }
                let (Some(timer), Some(monitor)) = (self.timer(), self.monitor()) else {
                    return Err(MeasurementGroupError::rejected(format!(
                        "timer and monitor of controller {} have not been elected",
                        self.full_name()
                    )));
                };
                if !timer.enabled() && !monitor.enabled() {
                    return Err(MeasurementGroupError::rejected(format!(
                        "The channel {} used as timer and the channel {} used as monitor \
                         are disabled. One of them must be enabled",
                        timer.name(),
                        monitor.name()
                    )));
                }
                Ok(())
            }
            ControllerKind::Plain | ControllerKind::ZeroD | ControllerKind::External => Ok(()),
        }
    }
}

/// Configuration of a controller owning synchronizer elements.
#[derive(Debug, Clone, PartialEq)]
pub struct SynchronizerControllerConfiguration {
    item: ConfigurationItem,
    synchronizers: Vec<SynchronizerConfiguration>,
}

impl SynchronizerControllerConfiguration {
    /// Create an empty, disabled configuration.
    pub fn new(element: ElementRef) -> Self {
        let mut item = ConfigurationItem::new(element);
        item.enabled = false;
        Self {
            item,
            synchronizers: Vec::new(),
        }
    }

    /// Full name of the controller.
    pub fn full_name(&self) -> &str {
        self.item.full_name()
    }

    /// Whether at least one synchronizer is enabled.
    pub fn enabled(&self) -> bool {
        self.item.enabled
    }

    /// Get the item for `element`, adding it if this is its first reference.
    pub(crate) fn synchronizer_mut(&mut self, element: ElementRef) -> &mut SynchronizerConfiguration {
        let position = match self
            .synchronizers
            .iter()
            .position(|synch| synch.full_name() == element.full_name)
        {
            Some(position) => position,
            None => {
                self.synchronizers
                    .push(SynchronizerConfiguration::new(element));
                self.synchronizers.len() - 1
            }
        };
        &mut self.synchronizers[position]
    }

    /// Recompute the enabled flag from the synchronizers.
    pub fn update_state(&mut self) {
        self.item.enabled = self.synchronizers.iter().any(|synch| synch.enabled());
    }

    /// Synchronizers passing the filter.
    pub fn channels(&self, enabled: EnabledFilter) -> Vec<&SynchronizerConfiguration> {
        self.synchronizers
            .iter()
            .filter(|synch| enabled.accepts(synch.enabled()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::user::UserChannelConfig;

    fn channel(name: &str, index: usize, enabled: bool) -> ChannelConfiguration {
        let mut data = UserChannelConfig::with_index(index);
        data.enabled = Some(enabled);
        ChannelConfiguration::new(
            ElementRef {
                full_name: format!("pool/{name}"),
                name: name.to_string(),
                id: None,
            },
            "pool/ctctrl01",
            Some(AcqSynch::SoftwareTrigger),
            data,
            index,
        )
    }

    fn timerable() -> ControllerConfiguration {
        ControllerConfiguration::timerable(
            ElementRef {
                full_name: "pool/ctctrl01".into(),
                name: "ctctrl01".into(),
                id: Some(1),
            },
            AcqSynch::SoftwareTrigger,
            Synchronizer::Software,
            AcqSynchType::Trigger,
        )
    }

    #[test]
    fn enabled_is_derived_from_channels() {
        let mut ctrl = timerable();
        assert!(!ctrl.enabled());
        ctrl.add_channel(channel("ct01", 0, false));
        assert!(!ctrl.enabled());
        ctrl.add_channel(channel("ct02", 1, true));
        assert!(ctrl.enabled());
        assert_eq!(ctrl.channels(EnabledFilter::Enabled).len(), 1);
        assert_eq!(ctrl.channels(EnabledFilter::Disabled)[0].name(), "ct01");
        ctrl.update_state();
        assert!(ctrl.enabled());
        assert_eq!(ctrl.channels(EnabledFilter::Any).len(), 2);
    }

    #[test]
    fn default_election_takes_smallest_enabled_index() {
        let mut ctrl = timerable();
        ctrl.add_channel(channel("ct03", 5, true));
        ctrl.add_channel(channel("ct01", 0, false));
        ctrl.add_channel(channel("ct02", 2, true));
        ctrl.update_timer(None).unwrap();
        ctrl.update_monitor(None).unwrap();
        assert_eq!(ctrl.timer().unwrap().name(), "ct02");
        assert_eq!(ctrl.monitor().unwrap().name(), "ct02");
        assert!(ctrl.validate().is_ok());
    }

    #[test]
    fn ties_keep_the_first_channel_found() {
        let mut ctrl = timerable();
        ctrl.add_channel(channel("ct01", 4, true));
        ctrl.add_channel(channel("ct02", 4, true));
        ctrl.update_timer(None).unwrap();
        assert_eq!(ctrl.timer().unwrap().name(), "ct01");
    }

    #[test]
    fn explicit_roles_resolve_by_name() {
        let mut ctrl = timerable();
        ctrl.add_channel(channel("ct01", 0, true));
        ctrl.add_channel(channel("ct02", 1, true));
        ctrl.update_timer(Some("pool/ct02")).unwrap();
        ctrl.update_monitor(Some("ct01")).unwrap();
        assert_eq!(ctrl.timer().unwrap().name(), "ct02");
        assert_eq!(ctrl.monitor().unwrap().name(), "ct01");
        assert!(ctrl.update_timer(Some("pool/ct09")).is_err());
    }

    #[test]
    fn validation_rejects_disabled_timer_and_monitor() {
        let mut ctrl = timerable();
        ctrl.add_channel(channel("ct01", 0, false));
        ctrl.add_channel(channel("ct02", 1, true));
        ctrl.update_timer(Some("pool/ct01")).unwrap();
        ctrl.update_monitor(Some("pool/ct01")).unwrap();
        let err = ctrl.validate().unwrap_err();
        assert!(matches!(err, MeasurementGroupError::ConfigurationRejected(_)));
        assert!(err.to_string().contains("ct01"));

        ctrl.update_monitor(Some("pool/ct02")).unwrap();
        assert!(ctrl.validate().is_ok());
    }

    #[test]
    fn disabled_controllers_still_elect_and_validate() {
        let mut ctrl = timerable();
        ctrl.add_channel(channel("ct01", 3, false));
        ctrl.add_channel(channel("ct02", 1, false));
        ctrl.update_timer(None).unwrap();
        assert_eq!(ctrl.timer().unwrap().name(), "ct02");
        ctrl.update_monitor(None).unwrap();
        assert!(ctrl.validate().is_ok());
    }

    #[test]
    fn plain_controllers_have_no_roles() {
        let mut ctrl = ControllerConfiguration::external(
            EXTERNAL_CONTROLLER,
            Synchronizer::Software,
            AcqSynchType::Trigger,
        );
        assert!(ctrl.update_timer(None).is_err());
        assert!(ctrl.timer().is_none());
        assert!(ctrl.validate().is_ok());
        assert!(is_external_controller(ctrl.full_name()));
    }

    #[test]
    fn synchronizers_are_shared_per_element() {
        let element = ElementRef {
            full_name: "pool/tg01".into(),
            name: "tg01".into(),
            id: Some(9),
        };
        let mut ctrl = SynchronizerControllerConfiguration::new(ElementRef {
            full_name: "pool/tgctrl01".into(),
            name: "tgctrl01".into(),
            id: Some(8),
        });
        ctrl.synchronizer_mut(element.clone()).mark_referenced(false);
        ctrl.synchronizer_mut(element).mark_referenced(true);
        ctrl.update_state();
        assert_eq!(ctrl.channels(EnabledFilter::Any).len(), 1);
        assert!(ctrl.enabled());
    }
}
