//! BCI-Core: data model for the real-time filter pipeline
//!
//! Signals, signal properties, state variables, and parameters exchanged
//! between acquisition, the filter chain, and its consumers.

pub mod error;
pub mod param;
pub mod signal;
pub mod state;

pub use error::{BciError, BciResult, ErrorKind};
pub use param::{Matrix, ParamDefinition, ParamKind, ParamList, ParamValue};
pub use signal::{BlockStats, PhysicalUnit, Signal, SignalProperties, SignalType};
pub use state::{State, StateList, StateVector, MAX_STATE_BITS};
