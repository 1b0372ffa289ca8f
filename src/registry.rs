//! In-memory element registry.
//!
//! A thread-safe [`ElementRegistry`] for embedding the measurement group core
//! without a device server, and for tests. Elements registered here are
//! reachable by full name, by id and by their short name alias.
//!
//! # Example
//!
//! ```rust
//! use daq_measurement_group::defs::ElementType;
//! use daq_measurement_group::element::{ElementRegistry, ValueInfo};
//! use daq_measurement_group::registry::{InMemoryRegistry, PoolElement};
//!
//! let registry = InMemoryRegistry::new();
//! registry.register(PoolElement::controller(1, "ctctrl01", ElementType::CTExpChannel, true));
//! registry.register(
//!     PoolElement::channel(2, "ct01", ElementType::CTExpChannel, "ctctrl01")
//!         .with_value_info(ValueInfo::scalar_double()),
//! );
//!
//! assert_eq!(registry.resolve_to_canonical_name("ct01"), "pool/ct01");
//! assert!(registry.get_element_by_id(2).is_some());
//! ```

use crate::defs::{DataFormat, ElementType};
use crate::element::{Element, ElementHandle, ElementId, ElementRegistry, ValueInfo};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Prefix used to derive full names of elements registered by short name.
pub const DEFAULT_NAMESPACE: &str = "pool";

// =============================================================================
// Pool Element
// =============================================================================

/// Plain-data element description.
#[derive(Debug, Clone)]
pub struct PoolElement {
    id: ElementId,
    name: String,
    full_name: String,
    element_type: ElementType,
    controller: Option<String>,
    value_info: Option<ValueInfo>,
    timerable: bool,
    ctrl_types: Vec<ElementType>,
    ctrl_pars: HashMap<String, f64>,
}

impl PoolElement {
    /// A controller handling elements of `ctrl_type`.
    pub fn controller(
        id: ElementId,
        name: impl Into<String>,
        ctrl_type: ElementType,
        timerable: bool,
    ) -> Self {
        let name = name.into();
        Self {
            id,
            full_name: format!("{DEFAULT_NAMESPACE}/{name}"),
            name,
            element_type: ElementType::Controller,
            controller: None,
            value_info: None,
            timerable,
            ctrl_types: vec![ctrl_type],
            ctrl_pars: HashMap::new(),
        }
    }

    /// A channel (or trigger/gate, or motor) owned by the controller `controller`.
    ///
    /// `controller` may be a short name; it is qualified like the controller's own
    /// full name.
    pub fn channel(
        id: ElementId,
        name: impl Into<String>,
        element_type: ElementType,
        controller: &str,
    ) -> Self {
        let name = name.into();
        let controller = if controller.contains('/') {
            controller.to_string()
        } else {
            format!("{DEFAULT_NAMESPACE}/{controller}")
        };
        Self {
            id,
            full_name: format!("{DEFAULT_NAMESPACE}/{name}"),
            name,
            element_type,
            controller: Some(controller),
            value_info: None,
            timerable: false,
            ctrl_types: Vec::new(),
            ctrl_pars: HashMap::new(),
        }
    }

    /// Set the value attribute introspection.
    pub fn with_value_info(mut self, value_info: ValueInfo) -> Self {
        self.value_info = Some(value_info);
        self
    }

    /// Set a numeric controller parameter.
    pub fn with_ctrl_par(mut self, name: impl Into<String>, value: f64) -> Self {
        self.ctrl_pars.insert(name.into(), value);
        self
    }
}

impl Element for PoolElement {
    fn id(&self) -> Option<ElementId> {
        Some(self.id)
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn full_name(&self) -> &str {
        &self.full_name
    }

    fn element_type(&self) -> ElementType {
        self.element_type
    }

    fn controller_name(&self) -> Option<&str> {
        self.controller.as_deref()
    }

    fn value_info(&self) -> Option<ValueInfo> {
        self.value_info.clone()
    }

    fn is_timerable(&self) -> bool {
        self.timerable
    }

    fn ctrl_types(&self) -> Vec<ElementType> {
        self.ctrl_types.clone()
    }

    fn ctrl_par(&self, name: &str) -> Option<f64> {
        self.ctrl_pars.get(name).copied()
    }
}

// =============================================================================
// Registry
// =============================================================================

#[derive(Default)]
struct RegistryInner {
    by_name: HashMap<String, ElementHandle>,
    by_id: HashMap<ElementId, ElementHandle>,
    aliases: HashMap<String, String>,
    external_formats: HashMap<String, DataFormat>,
}

/// Thread-safe in-memory registry.
#[derive(Default)]
pub struct InMemoryRegistry {
    inner: RwLock<RegistryInner>,
}

impl InMemoryRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an element; its short name becomes an alias of its full name.
    pub fn register(&self, element: impl Element + 'static) -> ElementHandle {
        self.register_handle(Arc::new(element))
    }

    /// Register an already shared element.
    pub fn register_handle(&self, element: ElementHandle) -> ElementHandle {
        let mut inner = self.inner.write();
        let full_name = element.full_name().to_string();
        inner
            .aliases
            .insert(element.name().to_lowercase(), full_name.clone());
        if let Some(id) = element.id() {
            inner.by_id.insert(id, element.clone());
        }
        inner.by_name.insert(full_name, element.clone());
        element
    }

    /// Remove an element, as if it had been deleted from the pool.
    pub fn remove(&self, full_name: &str) -> Option<ElementHandle> {
        let mut inner = self.inner.write();
        let element = inner.by_name.remove(full_name)?;
        if let Some(id) = element.id() {
            inner.by_id.remove(&id);
        }
        inner.aliases.retain(|_, target| target != full_name);
        Some(element)
    }

    /// Declare the data format of an externally addressed value.
    pub fn set_external_data_format(&self, full_name: impl Into<String>, format: DataFormat) {
        self.inner
            .write()
            .external_formats
            .insert(full_name.into(), format);
    }

    /// Number of registered elements.
    pub fn len(&self) -> usize {
        self.inner.read().by_name.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ElementRegistry for InMemoryRegistry {
    fn resolve_to_canonical_name(&self, name: &str) -> String {
        let inner = self.inner.read();
        if inner.by_name.contains_key(name) {
            return name.to_string();
        }
        inner
            .aliases
            .get(&name.to_lowercase())
            .cloned()
            .unwrap_or_else(|| name.to_string())
    }

    fn get_element_by_full_name(&self, full_name: &str) -> Option<ElementHandle> {
        self.inner.read().by_name.get(full_name).cloned()
    }

    fn get_element_by_id(&self, id: ElementId) -> Option<ElementHandle> {
        self.inner.read().by_id.get(&id).cloned()
    }

    fn external_data_format(&self, full_name: &str) -> Option<DataFormat> {
        self.inner.read().external_formats.get(full_name).copied()
    }
}
