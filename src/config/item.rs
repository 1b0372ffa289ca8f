//! Configuration items: an element reference plus configurable attributes.

use super::user::UserChannelConfig;
use crate::defs::AcqSynch;
use crate::element::{ElementHandle, ElementId, ElementRef, ElementRegistry};
use indexmap::IndexMap;

/// Container of configuration attributes related to one element.
///
/// Holds a non-owning [`ElementRef`]; the element itself stays in the registry.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigurationItem {
    element: ElementRef,
    /// Whether the element takes part in acquisitions
    pub enabled: bool,
    /// Attributes without a first-class field
    pub attrs: IndexMap<String, serde_json::Value>,
}

impl ConfigurationItem {
    /// Wrap an element, enabled by default.
    pub fn new(element: ElementRef) -> Self {
        Self {
            element,
            enabled: true,
            attrs: IndexMap::new(),
        }
    }

    /// The wrapped element reference.
    pub fn element(&self) -> &ElementRef {
        &self.element
    }

    /// Resolve the live element.
    pub fn resolve(&self, registry: &dyn ElementRegistry) -> Option<ElementHandle> {
        self.element.resolve(registry)
    }

    /// Full name of the element.
    pub fn full_name(&self) -> &str {
        &self.element.full_name
    }

    /// Short name of the element.
    pub fn name(&self) -> &str {
        &self.element.name
    }

    /// Registry id, if the element is a pool element.
    pub fn id(&self) -> Option<ElementId> {
        self.element.id
    }
}

/// Configuration of an experimental channel.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelConfiguration {
    item: ConfigurationItem,
    index: usize,
    controller: String,
    acq_synch: Option<AcqSynch>,
    data: UserChannelConfig,
}

impl ChannelConfiguration {
    /// Build from normalized channel data. `data.index` must be set.
    pub(crate) fn new(
        element: ElementRef,
        controller: impl Into<String>,
        acq_synch: Option<AcqSynch>,
        data: UserChannelConfig,
        index: usize,
    ) -> Self {
        let mut item = ConfigurationItem::new(element);
        item.enabled = data.is_enabled();
        item.attrs = data.extra.clone();
        Self {
            item,
            index,
            controller: controller.into(),
            acq_synch,
            data,
        }
    }

    /// Underlying configuration item.
    pub fn item(&self) -> &ConfigurationItem {
        &self.item
    }

    /// Position of the channel in the group.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Whether the channel is enabled.
    pub fn enabled(&self) -> bool {
        self.item.enabled
    }

    /// Full name of the channel.
    pub fn full_name(&self) -> &str {
        self.item.full_name()
    }

    /// Short name of the channel.
    pub fn name(&self) -> &str {
        self.item.name()
    }

    /// Display label.
    pub fn label(&self) -> &str {
        self.data.label.as_deref().unwrap_or_else(|| self.name())
    }

    /// Full name (or pseudo name) of the owning controller configuration.
    pub fn controller(&self) -> &str {
        &self.controller
    }

    /// Synchronization of the owning controller, for timerable controllers.
    pub fn acq_synch(&self) -> Option<AcqSynch> {
        self.acq_synch
    }

    /// Normalized user data of this channel.
    pub fn data(&self) -> &UserChannelConfig {
        &self.data
    }
}

/// Configuration of a trigger/gate element used as synchronizer.
///
/// Disabled until a controller with enabled channels references it.
#[derive(Debug, Clone, PartialEq)]
pub struct SynchronizerConfiguration {
    item: ConfigurationItem,
}

impl SynchronizerConfiguration {
    /// Wrap a synchronizer element, disabled.
    pub fn new(element: ElementRef) -> Self {
        let mut item = ConfigurationItem::new(element);
        item.enabled = false;
        Self { item }
    }

    /// Underlying configuration item.
    pub fn item(&self) -> &ConfigurationItem {
        &self.item
    }

    /// Whether any referencing controller has enabled channels.
    pub fn enabled(&self) -> bool {
        self.item.enabled
    }

    /// Mark as used by an enabled controller. Never clears the flag.
    pub(crate) fn mark_referenced(&mut self, controller_enabled: bool) {
        self.item.enabled |= controller_enabled;
    }

    /// Full name of the synchronizer element.
    pub fn full_name(&self) -> &str {
        self.item.full_name()
    }

    /// Registry id of the synchronizer element.
    pub fn id(&self) -> Option<ElementId> {
        self.item.id()
    }
}
