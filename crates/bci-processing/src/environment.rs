//! Phase-gated access to parameters and states, plus the preflight error sink

use bci_core::{BciError, BciResult, ParamList, ParamValue, StateList, StateVector};
use tracing::warn;

/// Lifecycle phase the environment is currently in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Between lifecycle calls; nothing is accessible
    NonAccess,
    Construction,
    Preflight,
    Initialization,
    StartRun,
    Processing,
    StopRun,
    Resting,
}

impl Phase {
    pub fn name(&self) -> &'static str {
        match self {
            Phase::NonAccess => "non-access",
            Phase::Construction => "construction",
            Phase::Preflight => "preflight",
            Phase::Initialization => "initialization",
            Phase::StartRun => "start-run",
            Phase::Processing => "processing",
            Phase::StopRun => "stop-run",
            Phase::Resting => "resting",
        }
    }

    fn may_read(&self) -> bool {
        !matches!(self, Phase::NonAccess | Phase::Construction)
    }

    fn may_write_states(&self) -> bool {
        matches!(
            self,
            Phase::StartRun | Phase::Processing | Phase::StopRun | Phase::Resting
        )
    }
}

/// Shared parameter set, state list and state vector seen by every filter
#[derive(Debug, Clone)]
pub struct Environment {
    phase: Phase,
    parameters: ParamList,
    states: StateList,
    state_vector: StateVector,
}

impl Environment {
    pub fn new(parameters: ParamList, states: StateList) -> Self {
        let state_vector = StateVector::new(&states);
        Self {
            phase: Phase::NonAccess,
            parameters,
            states,
            state_vector,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub(crate) fn enter(&mut self, phase: Phase) {
        self.phase = phase;
    }

    /// Look up a parameter value
    pub fn parameter(&self, name: &str) -> BciResult<&ParamValue> {
        self.require_read("parameter access")?;
        self.parameters.value(name)
    }

    /// Typed view of the parameter set
    pub fn parameters(&self) -> BciResult<&ParamList> {
        self.require_read("parameter access")?;
        Ok(&self.parameters)
    }

    /// Current value of a state
    pub fn state(&self, name: &str) -> BciResult<u64> {
        self.require_read("state access")?;
        self.state_vector.value(name)
    }

    /// Value a state had when the current block entered the chain
    pub fn previous_state(&self, name: &str) -> BciResult<u64> {
        self.require_read("state access")?;
        self.state_vector.previous_value(name)
    }

    pub fn set_state(&mut self, name: &str, value: u64) -> BciResult<()> {
        if !self.phase.may_write_states() {
            return Err(BciError::PhaseViolation {
                operation: "state write",
                phase: self.phase.name(),
            });
        }
        self.state_vector.set_value(name, value)
    }

    pub fn state_list(&self) -> &StateList {
        &self.states
    }

    pub fn state_vector(&self) -> &StateVector {
        &self.state_vector
    }

    pub(crate) fn state_vector_mut(&mut self) -> &mut StateVector {
        &mut self.state_vector
    }

    /// Unchecked parameter access for the framework itself
    pub(crate) fn param_list(&self) -> &ParamList {
        &self.parameters
    }

    pub(crate) fn param_list_mut(&mut self) -> &mut ParamList {
        &mut self.parameters
    }

    fn require_read(&self, operation: &'static str) -> BciResult<()> {
        if self.phase.may_read() {
            Ok(())
        } else {
            Err(BciError::PhaseViolation {
                operation,
                phase: self.phase.name(),
            })
        }
    }
}

/// One error collected during a lifecycle phase
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    /// Filter (or framework component) that reported the error
    pub source: String,
    pub error: BciError,
}

/// Error sink passed into preflight and initialization
///
/// Every filter gets to report its own errors in the same pass; the chain
/// checks [`Diagnostics::error_count`] before moving to the next phase.
#[derive(Debug, Clone, Default)]
pub struct Diagnostics {
    source: String,
    entries: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attribute subsequent reports to `source`
    pub(crate) fn enter(&mut self, source: &str) {
        self.source = source.to_string();
    }

    pub fn report(&mut self, error: BciError) {
        warn!(source = %self.source, %error, "configuration error");
        self.entries.push(Diagnostic {
            source: self.source.clone(),
            error,
        });
    }

    /// Unwrap `result`, reporting its error if there is one
    pub fn check<T>(&mut self, result: BciResult<T>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(error) => {
                self.report(error);
                None
            }
        }
    }

    pub fn error_count(&self) -> usize {
        self.entries.len()
    }

    pub fn is_clean(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[Diagnostic] {
        &self.entries
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Collapse the collected errors into a single phase result
    pub fn to_result(&self, phase: Phase) -> BciResult<()> {
        match self.entries.first() {
            None => Ok(()),
            Some(first) => Err(BciError::PhaseFailed {
                phase: phase.name(),
                count: self.entries.len(),
                first: format!("{}: {}", first.source, first.error),
            }),
        }
    }
}
