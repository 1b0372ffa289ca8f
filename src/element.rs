//! Element and registry interfaces.
//!
//! Elements (controllers, channels, synchronizers, moveables) are owned by the
//! surrounding device registry. The configuration model only keeps
//! [`ElementRef`] handles, re-resolving them through an [`ElementRegistry`]
//! when live information (value introspection, controller parameters) is needed.

use crate::defs::{DataFormat, DataType, ElementType};
use std::fmt::Debug;
use std::sync::Arc;

/// Numeric element identifier assigned by the registry.
pub type ElementId = u64;

/// Shared handle to a registry-owned element.
pub type ElementHandle = Arc<dyn Element>;

/// Introspected description of a channel value attribute.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueInfo {
    /// Element data type
    pub dtype: DataType,
    /// Dimensionality
    pub dformat: DataFormat,
    /// Maximum size per dimension (empty for scalars)
    pub max_dim_size: Vec<usize>,
}

impl ValueInfo {
    /// Scalar double, the value of counters and timers.
    pub fn scalar_double() -> Self {
        Self {
            dtype: DataType::Double,
            dformat: DataFormat::Scalar,
            max_dim_size: Vec::new(),
        }
    }
}

/// An addressable hardware entity.
///
/// Implementations must be cheap to query: the orchestrator calls these
/// methods while normalizing configurations.
pub trait Element: Send + Sync + Debug {
    /// Registry id, `None` for externally addressed values.
    fn id(&self) -> Option<ElementId>;

    /// Short name.
    fn name(&self) -> &str;

    /// Stable fully qualified name.
    fn full_name(&self) -> &str;

    /// Element kind.
    fn element_type(&self) -> ElementType;

    /// Full name of the owning controller, if any.
    fn controller_name(&self) -> Option<&str> {
        None
    }

    /// Data source of the element value.
    fn source(&self) -> String {
        format!("{}/value", self.full_name())
    }

    /// Introspection of the value attribute.
    fn value_info(&self) -> Option<ValueInfo> {
        None
    }

    /// Controllers only: whether channels can act as timer/monitor.
    fn is_timerable(&self) -> bool {
        false
    }

    /// Controllers only: element types handled by the controller.
    fn ctrl_types(&self) -> Vec<ElementType> {
        Vec::new()
    }

    /// Controllers only: numeric controller parameter (e.g. `latency_time`).
    fn ctrl_par(&self, _name: &str) -> Option<f64> {
        None
    }
}

/// Device/name registry consumed by the configuration model.
pub trait ElementRegistry: Send + Sync {
    /// Rewrite a possibly short name into its canonical full name.
    ///
    /// Must be idempotent.
    fn resolve_to_canonical_name(&self, name: &str) -> String {
        name.to_string()
    }

    /// Look up an element by its full name.
    fn get_element_by_full_name(&self, full_name: &str) -> Option<ElementHandle>;

    /// Look up an element by id.
    fn get_element_by_id(&self, id: ElementId) -> Option<ElementHandle>;

    /// Data format of an externally addressed value, when it can be read.
    fn external_data_format(&self, _full_name: &str) -> Option<DataFormat> {
        None
    }
}

// =============================================================================
// Non-owning references
// =============================================================================

/// Non-owning reference to an element.
///
/// The full name is the identity; the id is a registry handle that may be
/// refreshed if the element object is recreated.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ElementRef {
    /// Fully qualified name
    pub full_name: String,
    /// Short name
    pub name: String,
    /// Registry id
    pub id: Option<ElementId>,
}

impl ElementRef {
    /// Capture the identity of a live element.
    pub fn of(element: &dyn Element) -> Self {
        Self {
            full_name: element.full_name().to_string(),
            name: element.name().to_string(),
            id: element.id(),
        }
    }

    /// Resolve back to the live element, by id first, then by name.
    pub fn resolve(&self, registry: &dyn ElementRegistry) -> Option<ElementHandle> {
        self.id
            .and_then(|id| registry.get_element_by_id(id))
            .filter(|element| element.full_name() == self.full_name)
            .or_else(|| registry.get_element_by_full_name(&self.full_name))
    }
}

// =============================================================================
// External channels
// =============================================================================

/// Externally addressed value taking part in a group by reference only.
#[derive(Debug, Clone)]
pub struct ExternalChannel {
    name: String,
    full_name: String,
    data_format: Option<DataFormat>,
}

impl ExternalChannel {
    /// Build from the attribute full name, e.g. `tango://host:10000/sys/tg_test/1/double_scalar`.
    pub fn new(full_name: impl Into<String>, data_format: Option<DataFormat>) -> Self {
        let full_name = full_name.into();
        let name = full_name
            .rsplit('/')
            .next()
            .unwrap_or(full_name.as_str())
            .to_string();
        Self {
            name,
            full_name,
            data_format,
        }
    }

    /// Data format reported by the value source.
    pub fn data_format(&self) -> Option<DataFormat> {
        self.data_format
    }
}

impl Element for ExternalChannel {
    fn id(&self) -> Option<ElementId> {
        None
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn full_name(&self) -> &str {
        &self.full_name
    }

    fn element_type(&self) -> ElementType {
        ElementType::External
    }

    fn source(&self) -> String {
        self.full_name.clone()
    }

    fn value_info(&self) -> Option<ValueInfo> {
        self.data_format.map(|dformat| ValueInfo {
            dtype: DataType::Double,
            dformat,
            max_dim_size: Vec::new(),
        })
    }
}
