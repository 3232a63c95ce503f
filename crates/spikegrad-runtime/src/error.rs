//! Error types for the spikegrad runtime

use thiserror::Error;

/// Result type for runtime operations
pub type Result<T> = std::result::Result<T, RuntimeError>;

/// Errors that can occur while building, simulating or training a network
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Invalid network configuration
    #[error("Invalid network configuration: {reason}")]
    InvalidConfiguration {
        /// Reason for invalid configuration
        reason: String,
    },

    /// Invalid parameter value
    #[error("Invalid parameter {parameter}: {value} (expected {constraint})")]
    InvalidParameter {
        /// Parameter name
        parameter: String,
        /// Invalid value
        value: String,
        /// Constraint description
        constraint: String,
    },

    /// Network topology error
    #[error("Network topology error: {reason}")]
    NetworkTopology {
        /// Reason for topology error
        reason: String,
    },

    /// Tensor shape disagreement
    #[error("Shape mismatch for {what}: expected {expected}, got {actual}")]
    ShapeMismatch {
        /// What was being checked
        what: String,
        /// Expected shape
        expected: String,
        /// Actual shape
        actual: String,
    },

    /// Monitor requested for a variable the network does not expose
    #[error("Unknown observable '{name}'")]
    UnknownObservable {
        /// Requested observable name
        name: String,
    },

    /// NaN or infinity in a state variable
    #[error("Non-finite value in {variable} at step {step}")]
    NonFinite {
        /// Time step at which the value was detected
        step: usize,
        /// State variable name
        variable: String,
    },

    /// Trainable tensor and gradient set disagree
    #[error("Unregistered parameter {name}: {reason}")]
    UnregisteredParameter {
        /// Parameter name
        name: String,
        /// What is missing
        reason: String,
    },

    /// Inputs and labels cannot be shuffled as a pair
    #[error("Shuffle desynchronised: {inputs} input samples vs {labels} labels")]
    ShuffleDesync {
        /// Number of input samples
        inputs: usize,
        /// Number of labels
        labels: usize,
    },
}

impl RuntimeError {
    /// Create an invalid configuration error
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            reason: reason.into(),
        }
    }

    /// Create an invalid parameter error
    pub fn invalid_parameter(
        parameter: impl Into<String>,
        value: impl Into<String>,
        constraint: impl Into<String>,
    ) -> Self {
        Self::InvalidParameter {
            parameter: parameter.into(),
            value: value.into(),
            constraint: constraint.into(),
        }
    }

    /// Create a network topology error
    pub fn network_topology(reason: impl Into<String>) -> Self {
        Self::NetworkTopology {
            reason: reason.into(),
        }
    }

    /// Create a shape mismatch error
    pub fn shape_mismatch(
        what: impl Into<String>,
        expected: impl std::fmt::Debug,
        actual: impl std::fmt::Debug,
    ) -> Self {
        Self::ShapeMismatch {
            what: what.into(),
            expected: format!("{:?}", expected),
            actual: format!("{:?}", actual),
        }
    }

    /// Create an unregistered parameter error
    pub fn unregistered(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::UnregisteredParameter {
            name: name.into(),
            reason: reason.into(),
        }
    }
}

/// Reject non-positive or non-finite values
pub(crate) fn ensure_positive(parameter: &str, value: f32) -> Result<()> {
    if !(value.is_finite() && value > 0.0) {
        return Err(RuntimeError::invalid_parameter(
            parameter,
            value.to_string(),
            "finite and > 0.0",
        ));
    }
    Ok(())
}

/// Reject non-finite values
pub(crate) fn ensure_finite(parameter: &str, value: f32) -> Result<()> {
    if !value.is_finite() {
        return Err(RuntimeError::invalid_parameter(
            parameter,
            value.to_string(),
            "finite",
        ));
    }
    Ok(())
}
