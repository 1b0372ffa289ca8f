//! Pool definitions shared by the configuration model and the orchestrator.
//!
//! Acquisition synchronization is described along two axes: who produces the
//! synchronization signal (software or a hardware synchronizer element) and
//! what the signal means (a trigger per acquisition, a gate spanning the
//! acquisition, or a single start). [`AcqSynch`] is their cross product.

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

// =============================================================================
// Synchronization
// =============================================================================

/// Timing semantics of the synchronization signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize)]
pub enum AcqSynchType {
    /// One trigger per acquisition
    #[default]
    Trigger,
    /// The signal is active during the whole acquisition
    Gate,
    /// A single start for a sequence of acquisitions
    Start,
}

impl AcqSynchType {
    fn from_code(code: u64) -> Option<Self> {
        match code {
            0 => Some(AcqSynchType::Trigger),
            1 => Some(AcqSynchType::Gate),
            2 => Some(AcqSynchType::Start),
            _ => None,
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "trigger" => Some(AcqSynchType::Trigger),
            "gate" => Some(AcqSynchType::Gate),
            "start" => Some(AcqSynchType::Start),
            _ => None,
        }
    }
}

/// Older configurations store enumerations as integer codes.
#[derive(Deserialize)]
#[serde(untagged)]
enum NameOrCode {
    Code(u64),
    Name(String),
}

/// Deserialize an enumeration written either by name or by integer code.
fn deserialize_name_or_code<'de, D, T>(
    deserializer: D,
    what: &str,
    from_code: fn(u64) -> Option<T>,
    from_name: fn(&str) -> Option<T>,
) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
{
    match NameOrCode::deserialize(deserializer)? {
        NameOrCode::Code(code) => from_code(code)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown {what} code {code}"))),
        NameOrCode::Name(name) => from_name(&name)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown {what} '{name}'"))),
    }
}

impl<'de> Deserialize<'de> for AcqSynchType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserialize_name_or_code(
            deserializer,
            "synchronization type",
            AcqSynchType::from_code,
            AcqSynchType::from_name,
        )
    }
}

impl fmt::Display for AcqSynchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AcqSynchType::Trigger => write!(f, "Trigger"),
            AcqSynchType::Gate => write!(f, "Gate"),
            AcqSynchType::Start => write!(f, "Start"),
        }
    }
}

/// Acquisition synchronization of a timerable controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AcqSynch {
    /// Software trigger per acquisition
    SoftwareTrigger,
    /// Hardware trigger per acquisition
    HardwareTrigger,
    /// Software gate
    SoftwareGate,
    /// Hardware gate
    HardwareGate,
    /// Single software start
    SoftwareStart,
    /// Single hardware start
    HardwareStart,
}

impl AcqSynch {
    /// All six variants, software first.
    pub const ALL: [AcqSynch; 6] = [
        AcqSynch::SoftwareTrigger,
        AcqSynch::SoftwareGate,
        AcqSynch::SoftwareStart,
        AcqSynch::HardwareTrigger,
        AcqSynch::HardwareGate,
        AcqSynch::HardwareStart,
    ];

    /// Combine the synchronizer kind with the synchronization type.
    pub fn from_synch_type(is_software: bool, synch_type: AcqSynchType) -> Self {
        match (is_software, synch_type) {
            (true, AcqSynchType::Trigger) => AcqSynch::SoftwareTrigger,
            (true, AcqSynchType::Gate) => AcqSynch::SoftwareGate,
            (true, AcqSynchType::Start) => AcqSynch::SoftwareStart,
            (false, AcqSynchType::Trigger) => AcqSynch::HardwareTrigger,
            (false, AcqSynchType::Gate) => AcqSynch::HardwareGate,
            (false, AcqSynchType::Start) => AcqSynch::HardwareStart,
        }
    }

    /// Whether the software synchronizer drives this variant.
    pub fn is_software(&self) -> bool {
        matches!(
            self,
            AcqSynch::SoftwareTrigger | AcqSynch::SoftwareGate | AcqSynch::SoftwareStart
        )
    }

    /// The timing semantics of this variant.
    pub fn synch_type(&self) -> AcqSynchType {
        match self {
            AcqSynch::SoftwareTrigger | AcqSynch::HardwareTrigger => AcqSynchType::Trigger,
            AcqSynch::SoftwareGate | AcqSynch::HardwareGate => AcqSynchType::Gate,
            AcqSynch::SoftwareStart | AcqSynch::HardwareStart => AcqSynchType::Start,
        }
    }
}

impl fmt::Display for AcqSynch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// What bounds a single acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AcqMode {
    /// Integrate for a given time
    #[default]
    Timer,
    /// Count until the monitor reaches a given value
    Monitor,
}

/// Domain in which synchronization windows are expressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub enum SynchDomain {
    /// Seconds
    Time,
    /// Moveable position
    #[default]
    Position,
}

/// Parameters of one synchronization group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SynchParam {
    /// Offset before the first active window
    Delay,
    /// Length of the active window
    Active,
    /// Period between consecutive windows
    Total,
    /// Number of windows
    Repeats,
}

// =============================================================================
// Elements
// =============================================================================

/// Kind of an element known to the device registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ElementType {
    /// Hardware controller owning channels
    Controller,
    /// Counter/timer channel
    CTExpChannel,
    /// Zero-dimensional channel sampled by software
    ZeroDExpChannel,
    /// One-dimensional channel
    OneDExpChannel,
    /// Two-dimensional channel
    TwoDExpChannel,
    /// Pseudo counter computed from other channels
    PseudoCounter,
    /// Trigger/gate synchronizer
    TriggerGate,
    /// Motor usable as moveable in position synchronization
    Motor,
    /// Externally addressed value, not a pool element
    External,
}

/// Data type of a channel value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataType {
    /// 64-bit float
    Double,
    /// Signed integer
    Integer,
    /// Boolean
    Boolean,
    /// Text
    String,
}

/// Dimensionality of a channel value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataFormat {
    /// Single value
    Scalar,
    /// Spectrum
    OneD,
    /// Image
    TwoD,
}

impl DataFormat {
    /// Number of dimensions.
    pub fn ndim(&self) -> u8 {
        match self {
            DataFormat::Scalar => 0,
            DataFormat::OneD => 1,
            DataFormat::TwoD => 2,
        }
    }
}

/// Plot hint stored per channel.
///
/// Read from names or the codes `No = 0`, `Spectrum = 1`, `Image = 2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum PlotType {
    /// Not plotted
    #[default]
    No,
    /// Plotted as a spectrum
    Spectrum,
    /// Plotted as an image
    Image,
}

impl PlotType {
    fn from_code(code: u64) -> Option<Self> {
        match code {
            0 => Some(PlotType::No),
            1 => Some(PlotType::Spectrum),
            2 => Some(PlotType::Image),
            _ => None,
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "no" => Some(PlotType::No),
            "spectrum" => Some(PlotType::Spectrum),
            "image" => Some(PlotType::Image),
            _ => None,
        }
    }
}

impl<'de> Deserialize<'de> for PlotType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserialize_name_or_code(deserializer, "plot type", PlotType::from_code, PlotType::from_name)
    }
}

/// Normalization hint stored per channel.
///
/// Read from names or the codes `No = 0`, `Avg = 1`, `Integ = 2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum Normalization {
    /// Raw value
    #[default]
    No,
    /// Averaged
    Avg,
    /// Integrated
    Integ,
}

impl Normalization {
    fn from_code(code: u64) -> Option<Self> {
        match code {
            0 => Some(Normalization::No),
            1 => Some(Normalization::Avg),
            2 => Some(Normalization::Integ),
            _ => None,
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "no" => Some(Normalization::No),
            "avg" => Some(Normalization::Avg),
            "integ" => Some(Normalization::Integ),
            _ => None,
        }
    }
}

impl<'de> Deserialize<'de> for Normalization {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserialize_name_or_code(
            deserializer,
            "normalization",
            Normalization::from_code,
            Normalization::from_name,
        )
    }
}

// =============================================================================
// State
// =============================================================================

/// Operational state of an element or of the group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum State {
    /// Idle and ready
    On,
    /// Switched off
    Off,
    /// Busy (acquiring, moving, synchronizing)
    Moving,
    /// Waiting for an external event
    Standby,
    /// Failed
    Fault,
    /// Initializing
    Init,
    /// Working with warnings
    Alarm,
    /// Disabled
    Disable,
    /// Not known yet
    #[default]
    Unknown,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}
