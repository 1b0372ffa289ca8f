//! Custom error types for the measurement group core.
//!
//! This module defines the primary error type, `MeasurementGroupError`. Using the
//! `thiserror` crate, it provides a centralized and consistent way to report the
//! failures that can occur while normalizing a configuration, querying it, or
//! driving an acquisition.
//!
//! ## Error Hierarchy
//!
//! - **`ConfigurationRejected`**: Structural problems in a user configuration: no
//!   enabled members, a channel without an index, an unknown element, a value
//!   data type that is not implemented, or a timerable controller whose timer and
//!   monitor are both disabled. Normalization is all-or-nothing, so when this is
//!   returned the previous configuration is still in place.
//! - **`StaleReference`**: A query by channel or controller name against an
//!   element that is not part of the current configuration.
//! - **`SynchronizationState`**: The integration time was requested while the
//!   synchronization description holds zero or more than one group.
//! - **`Parameter`**: An acquisition parameter needed by `prepare` is unset.
//! - **`Acquisition`**: The external acquisition engine reported a failure.
//! - **`Settings`** / **`Serialization`**: Wrap `figment` and `serde_json` errors.
//!
//! Deprecated usage (legacy `trigger_type`, starting without a prior prepare) is
//! never an error: it is logged with `tracing::warn!` and compensated.

use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type AppResult<T> = std::result::Result<T, MeasurementGroupError>;

/// Primary error type for measurement group configuration and orchestration.
#[derive(Error, Debug)]
pub enum MeasurementGroupError {
    /// The user configuration cannot be turned into a valid internal model.
    ///
    /// **Error Type**: Permanent - retrying with the same input reproduces it.
    #[error("Configuration rejected: {0}")]
    ConfigurationRejected(String),

    /// The element is not part of the current configuration.
    #[error("Stale reference: {0}")]
    StaleReference(String),

    /// The synchronization description does not hold exactly one group.
    #[error("Synchronization state error: {0}")]
    SynchronizationState(String),

    /// An acquisition parameter required for the requested operation is unset.
    #[error("Acquisition parameter error: {0}")]
    Parameter(String),

    /// The acquisition engine failed to prepare, run, stop or abort.
    ///
    /// Hardware faults belong to the engine; they are wrapped here only so the
    /// caller of `prepare`/`start_acquisition` sees them.
    #[error("Acquisition engine error: {0}")]
    Acquisition(#[from] anyhow::Error),

    /// Settings could not be loaded or extracted.
    #[error("Settings error: {0}")]
    Settings(#[from] Box<figment::Error>),

    /// A user configuration could not be (de)serialized.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl MeasurementGroupError {
    /// Shorthand for [`MeasurementGroupError::ConfigurationRejected`].
    pub fn rejected(message: impl Into<String>) -> Self {
        MeasurementGroupError::ConfigurationRejected(message.into())
    }

    /// Whether retrying the same call could succeed.
    ///
    /// Configuration and stale-reference errors are deterministic in their input.
    pub fn can_recover(&self) -> bool {
        matches!(
            self,
            MeasurementGroupError::Acquisition(_) | MeasurementGroupError::Parameter(_)
        )
    }
}

impl From<figment::Error> for MeasurementGroupError {
    fn from(value: figment::Error) -> Self {
        MeasurementGroupError::Settings(Box::new(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejected_formats_message() {
        let err = MeasurementGroupError::rejected("all the channels are disabled");
        assert_eq!(
            err.to_string(),
            "Configuration rejected: all the channels are disabled"
        );
        assert!(!err.can_recover());
    }

    #[test]
    fn engine_errors_convert_and_are_recoverable() {
        let err: MeasurementGroupError = anyhow::anyhow!("synchronizer busy").into();
        assert!(matches!(err, MeasurementGroupError::Acquisition(_)));
        assert!(err.can_recover());
        assert!(err.to_string().contains("synchronizer busy"));
    }

    #[test]
    fn json_errors_convert() {
        let parse = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: MeasurementGroupError = parse.into();
        assert!(matches!(err, MeasurementGroupError::Serialization(_)));
    }
}
