//! Error handling for the filter framework
//!
//! One error type is shared by every crate in the workspace. Errors fall into
//! three classes (see [`ErrorKind`]): configuration errors are accumulated
//! during preflight, runtime errors abort the current run, and fatal errors
//! abort framework startup.

use core::fmt;

/// Result type alias for framework operations
pub type BciResult<T> = Result<T, BciError>;

/// Severity class of a [`BciError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Invalid configuration, reported before a session may start
    Configuration,
    /// Failure while processing blocks, fatal to the current run
    Runtime,
    /// Framework misuse or broken registration, fatal to startup
    Fatal,
}

/// Error type for all framework operations
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum BciError {
    /// Generic configuration error raised by a filter
    Configuration {
        /// Description of the configuration problem
        message: String,
    },

    /// A parameter was requested that nobody declared
    UnknownParameter {
        /// Parameter name
        name: String,
    },

    /// A parameter holds a value of the wrong kind
    ParameterType {
        /// Parameter name
        name: String,
        /// Expected value kind
        expected: &'static str,
    },

    /// A numeric parameter lies outside its declared bounds
    ParameterRange {
        /// Parameter name
        name: String,
        /// Offending value
        value: f64,
        /// Declared lower bound
        min: Option<f64>,
        /// Declared upper bound
        max: Option<f64>,
    },

    /// A state was requested that is not in the state list
    UnknownState {
        /// State name
        name: String,
    },

    /// A state declaration has an unusable or conflicting bit width
    StateWidth {
        /// State name
        name: String,
        /// Requested width in bits
        bits: u32,
    },

    /// Signal shape differs from what was negotiated
    ShapeMismatch {
        /// Negotiated (channels, elements)
        expected: (usize, usize),
        /// Actual (channels, elements)
        actual: (usize, usize),
    },

    /// Failure inside a filter's process call
    Processing {
        /// Filter that failed
        filter: String,
        /// Description of the failure
        message: String,
    },

    /// A value does not fit into its state's bit width
    StateOverflow {
        /// State name
        name: String,
        /// Offending value
        value: u64,
        /// State width in bits
        bits: u32,
    },

    /// Two registrations share one position key
    DuplicatePosition {
        /// Shared position key
        position: String,
        /// Type registered first
        first: String,
        /// Type registered second
        second: String,
    },

    /// A sub-filter position does not sort after its parent
    InvalidPosition {
        /// Parent position key
        parent: String,
        /// Rejected child position key
        position: String,
    },

    /// No registration exists for a filter type
    UnknownFilter {
        /// Requested type name
        type_name: String,
    },

    /// Wrong number of registered filters for the requested use
    FilterCount {
        /// Number of filters required
        required: usize,
        /// Number of filters registered
        registered: usize,
    },

    /// An accessor was used in a phase that does not permit it
    PhaseViolation {
        /// Operation attempted
        operation: &'static str,
        /// Phase the environment was in
        phase: &'static str,
    },

    /// A lifecycle call was made from a state that does not allow it
    InvalidTransition {
        /// Current lifecycle state
        from: &'static str,
        /// Requested lifecycle step
        to: &'static str,
    },

    /// One or more errors were collected during a lifecycle phase
    PhaseFailed {
        /// Phase that failed
        phase: &'static str,
        /// Number of errors collected
        count: usize,
        /// First collected error, rendered
        first: String,
    },
}

impl BciError {
    /// Severity class of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            BciError::Configuration { .. }
            | BciError::UnknownParameter { .. }
            | BciError::ParameterType { .. }
            | BciError::ParameterRange { .. }
            | BciError::UnknownState { .. }
            | BciError::StateWidth { .. }
            | BciError::ShapeMismatch { .. }
            | BciError::PhaseFailed { .. } => ErrorKind::Configuration,
            BciError::Processing { .. } | BciError::StateOverflow { .. } => ErrorKind::Runtime,
            BciError::DuplicatePosition { .. }
            | BciError::InvalidPosition { .. }
            | BciError::UnknownFilter { .. }
            | BciError::FilterCount { .. }
            | BciError::PhaseViolation { .. }
            | BciError::InvalidTransition { .. } => ErrorKind::Fatal,
        }
    }

    /// Whether this error aborts framework startup
    pub fn is_fatal(&self) -> bool {
        self.kind() == ErrorKind::Fatal
    }
}

fn bound(value: Option<f64>) -> String {
    value.map_or_else(|| "%".to_string(), |v| v.to_string())
}

impl fmt::Display for BciError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BciError::Configuration { message } => {
                write!(f, "Configuration error: {}", message)
            }
            BciError::UnknownParameter { name } => {
                write!(f, "Parameter \"{}\" is not declared", name)
            }
            BciError::ParameterType { name, expected } => {
                write!(f, "Parameter \"{}\" must be {}", name, expected)
            }
            BciError::ParameterRange { name, value, min, max } => {
                write!(f, "Parameter \"{}\" value {} outside range [{}, {}]",
                       name, value, bound(*min), bound(*max))
            }
            BciError::UnknownState { name } => {
                write!(f, "State \"{}\" is not in the state list", name)
            }
            BciError::StateWidth { name, bits } => {
                write!(f, "State \"{}\" has unusable bit width {}", name, bits)
            }
            BciError::ShapeMismatch { expected, actual } => {
                write!(f, "Signal shape mismatch: expected {}x{}, got {}x{}",
                       expected.0, expected.1, actual.0, actual.1)
            }
            BciError::Processing { filter, message } => {
                write!(f, "Processing error in {}: {}", filter, message)
            }
            BciError::StateOverflow { name, value, bits } => {
                write!(f, "Value {} does not fit state \"{}\" ({} bits)",
                       value, name, bits)
            }
            BciError::DuplicatePosition { position, first, second } => {
                write!(f, "Filters {} and {} share position \"{}\"",
                       first, second, position)
            }
            BciError::InvalidPosition { parent, position } => {
                write!(f, "Sub-filter position \"{}\" must sort after parent position \"{}\"",
                       position, parent)
            }
            BciError::UnknownFilter { type_name } => {
                write!(f, "No filter of type {} is registered", type_name)
            }
            BciError::FilterCount { required, registered } => {
                write!(f, "Expected {} registered filter(s), found {}",
                       required, registered)
            }
            BciError::PhaseViolation { operation, phase } => {
                write!(f, "{} is not permitted during {} phase", operation, phase)
            }
            BciError::InvalidTransition { from, to } => {
                write!(f, "Cannot {} from {} state", to, from)
            }
            BciError::PhaseFailed { phase, count, first } => {
                write!(f, "{} failed with {} error(s); first: {}", phase, count, first)
            }
        }
    }
}

impl std::error::Error for BciError {}

/// Convenience macro for creating configuration errors
#[macro_export]
macro_rules! config_error {
    ($($arg:tt)+) => {
        $crate::error::BciError::Configuration {
            message: format!($($arg)+),
        }
    };
}

/// Convenience macro for creating processing errors
#[macro_export]
macro_rules! processing_error {
    ($filter:expr, $($arg:tt)+) => {
        $crate::error::BciError::Processing {
            filter: $filter.to_string(),
            message: format!($($arg)+),
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = BciError::ShapeMismatch {
            expected: (4, 16),
            actual: (2, 16),
        };
        let display = format!("{}", error);
        assert!(display.contains("shape mismatch"));
        assert!(display.contains("4x16"));
        assert!(display.contains("2x16"));
    }

    #[test]
    fn test_error_equality() {
        let error1 = config_error!("rows {} exceed channels {}", 5, 4);
        let error2 = BciError::Configuration {
            message: "rows 5 exceed channels 4".to_string(),
        };
        assert_eq!(error1, error2);
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(config_error!("x").kind(), ErrorKind::Configuration);
        assert_eq!(processing_error!("FIRFilter", "nan").kind(), ErrorKind::Runtime);
        let duplicate = BciError::DuplicatePosition {
            position: "2.C".into(),
            first: "A".into(),
            second: "B".into(),
        };
        assert!(duplicate.is_fatal());
    }

    #[test]
    fn test_range_display_open_bounds() {
        let error = BciError::ParameterRange {
            name: "FIRIntegration".into(),
            value: 7.0,
            min: Some(0.0),
            max: None,
        };
        assert_eq!(
            error.to_string(),
            "Parameter \"FIRIntegration\" value 7 outside range [0, %]"
        );
    }
}
