//! Core filter trait and declaration types

use crate::environment::{Diagnostics, Environment};
use bci_core::{BciResult, ParamDefinition, Signal, SignalProperties, State};

/// Core trait for all filters in a chain
///
/// A filter is driven through a fixed lifecycle by its [`FilterChain`]:
/// `declare` once at construction, `preflight` and `initialize` whenever the
/// configuration changes, then `start_run`, `process` (once per block) and
/// `stop_run` for each run, with `resting` calls in between runs. `halt` may
/// arrive in any state.
///
/// [`FilterChain`]: crate::chain::FilterChain
pub trait GenericFilter: Send {
    /// Filter type name used in logs and diagnostics
    fn name(&self) -> &str;

    /// Parameters and states this filter needs
    fn declare(&self) -> BciResult<FilterDeclaration> {
        Ok(FilterDeclaration::new())
    }

    /// Validate the configuration against `input` and describe the output
    ///
    /// Must not change the filter. Problems are reported to `diagnostics`
    /// rather than returned so that every filter in the chain gets checked.
    fn preflight(
        &self,
        env: &Environment,
        input: &SignalProperties,
        diagnostics: &mut Diagnostics,
    ) -> SignalProperties;

    /// Allocate buffers for the negotiated shapes; replaces any prior state
    fn initialize(
        &mut self,
        env: &Environment,
        input: &SignalProperties,
        output: &SignalProperties,
    ) -> BciResult<()>;

    fn start_run(&mut self, _env: &mut Environment) -> BciResult<()> {
        Ok(())
    }

    /// Map one input block to one output block
    fn process(&mut self, env: &mut Environment, input: &Signal, output: &mut Signal) -> BciResult<()>;

    fn stop_run(&mut self, _env: &mut Environment) -> BciResult<()> {
        Ok(())
    }

    /// Called periodically while no run is active
    fn resting(&mut self, _env: &mut Environment) -> BciResult<()> {
        Ok(())
    }

    /// Release all run-time resources
    fn halt(&mut self) {}
}

/// Parameters and states published by a filter at construction
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterDeclaration {
    pub parameters: Vec<ParamDefinition>,
    pub states: Vec<State>,
}

impl FilterDeclaration {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parameter(mut self, definition: ParamDefinition) -> Self {
        self.parameters.push(definition);
        self
    }

    pub fn state(mut self, state: State) -> Self {
        self.states.push(state);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty() && self.states.is_empty()
    }
}
