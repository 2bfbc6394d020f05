//! Filter chain: ordered filter instances driven through the lifecycle

use crate::environment::{Diagnostics, Environment, Phase};
use crate::filter::GenericFilter;
use crate::registry::{FilterRegistration, FrozenRegistry};
use bci_core::{BciError, BciResult, ParamList, Signal, SignalProperties, State, StateList};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{debug, error, info};

/// State the framework itself declares; non-zero while a run is active
pub const RUNNING: &str = "Running";

/// Lifecycle position of a whole chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChainState {
    Constructed,
    Preflighted,
    Initialized,
    Running,
    Stopped,
    Halted,
}

impl ChainState {
    pub fn name(&self) -> &'static str {
        match self {
            ChainState::Constructed => "constructed",
            ChainState::Preflighted => "preflighted",
            ChainState::Initialized => "initialized",
            ChainState::Running => "running",
            ChainState::Stopped => "stopped",
            ChainState::Halted => "halted",
        }
    }
}

/// One filter instance together with the output buffer it writes
struct ChainSlot {
    position: String,
    type_name: &'static str,
    filter: Box<dyn GenericFilter>,
    output_properties: SignalProperties,
    output: Signal,
}

/// Block timing collected while processing
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChainMetrics {
    pub blocks_processed: u64,
    pub last_block_us: u64,
    pub max_block_us: u64,
    pub total_us: u64,
}

impl ChainMetrics {
    fn record(&mut self, elapsed_us: u64) {
        self.blocks_processed += 1;
        self.last_block_us = elapsed_us;
        self.max_block_us = self.max_block_us.max(elapsed_us);
        self.total_us += elapsed_us;
    }

    pub fn average_block_us(&self) -> f64 {
        if self.blocks_processed == 0 {
            0.0
        } else {
            self.total_us as f64 / self.blocks_processed as f64
        }
    }
}

/// Ordered filter instances sharing one [`Environment`]
pub struct FilterChain {
    slots: Vec<ChainSlot>,
    env: Environment,
    state: ChainState,
    diagnostics: Diagnostics,
    input_properties: Option<SignalProperties>,
    /// Output of a chain without filters
    passthrough: Signal,
    metrics: ChainMetrics,
}

impl FilterChain {
    /// One instance of every registered filter, in position order
    pub fn instantiate(registry: &FrozenRegistry) -> BciResult<Self> {
        let slots = registry.entries().iter().map(|entry| (entry, entry.instantiate()));
        Self::construct(slots)
    }

    /// Chain around the only registered filter
    pub fn wrap_single(registry: &FrozenRegistry) -> BciResult<Self> {
        let single = registry.instantiate_single()?;
        Self::construct(std::iter::once(single))
    }

    fn construct<'a>(
        filters: impl Iterator<Item = (&'a FilterRegistration, Box<dyn GenericFilter>)>,
    ) -> BciResult<Self> {
        let mut parameters = ParamList::new();
        let mut states = StateList::new();
        states.add(State::new(RUNNING, 1, 0)?)?;

        let mut slots = Vec::new();
        for (entry, filter) in filters {
            let declaration = filter.declare()?;
            for definition in declaration.parameters {
                parameters.declare(definition);
            }
            for state in declaration.states {
                states.add(state)?;
            }

            debug!(position = %entry.position, filter = entry.type_name, "constructed filter");
            slots.push(ChainSlot {
                position: entry.position.clone(),
                type_name: entry.type_name,
                filter,
                output_properties: SignalProperties::default(),
                output: Signal::default(),
            });
        }

        info!(filters = slots.len(), states = states.len(), "filter chain constructed");
        Ok(Self {
            slots,
            env: Environment::new(parameters, states),
            state: ChainState::Constructed,
            diagnostics: Diagnostics::new(),
            input_properties: None,
            passthrough: Signal::default(),
            metrics: ChainMetrics::default(),
        })
    }

    pub fn state(&self) -> ChainState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == ChainState::Running
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Position keys in processing order
    pub fn positions(&self) -> Vec<&str> {
        self.slots.iter().map(|slot| slot.position.as_str()).collect()
    }

    pub fn type_names(&self) -> Vec<&'static str> {
        self.slots.iter().map(|slot| slot.type_name).collect()
    }

    pub fn environment(&self) -> &Environment {
        &self.env
    }

    /// Declared parameters with their current values
    pub fn parameters(&self) -> &ParamList {
        self.env.param_list()
    }

    /// Errors collected by the last preflight or initialization
    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    pub fn metrics(&self) -> &ChainMetrics {
        &self.metrics
    }

    /// Properties negotiated for the last filter's output
    pub fn output_properties(&self) -> Option<&SignalProperties> {
        self.input_properties.as_ref()?;
        Some(match self.slots.last() {
            Some(slot) => &slot.output_properties,
            None => self.passthrough.properties(),
        })
    }

    /// Override parameter values; the chain has to be preflighted again
    pub fn apply_parameters(&mut self, values: &ParamList) -> BciResult<()> {
        self.require(
            &[
                ChainState::Constructed,
                ChainState::Preflighted,
                ChainState::Initialized,
                ChainState::Stopped,
                ChainState::Halted,
            ],
            "change parameters",
        )?;
        self.env.param_list_mut().merge(values);
        if self.state != ChainState::Halted {
            self.state = ChainState::Constructed;
        }
        debug!(count = values.len(), "parameters applied");
        Ok(())
    }

    /// Negotiate signal properties through every filter
    ///
    /// Each filter sees the output properties declared by its predecessor.
    /// All filters are checked even after an error; the collected errors are
    /// available from [`FilterChain::diagnostics`].
    pub fn preflight(&mut self, input: &SignalProperties) -> BciResult<SignalProperties> {
        self.require(
            &[
                ChainState::Constructed,
                ChainState::Preflighted,
                ChainState::Initialized,
                ChainState::Stopped,
                ChainState::Halted,
            ],
            "preflight",
        )?;

        self.diagnostics.clear();
        self.env.enter(Phase::Preflight);

        self.diagnostics.enter("Parameters");
        for problem in self.env.param_list().validate() {
            self.diagnostics.report(problem);
        }

        let mut current = input.clone();
        for slot in &mut self.slots {
            self.diagnostics.enter(slot.filter.name());
            let output = slot.filter.preflight(&self.env, &current, &mut self.diagnostics);
            debug!(
                position = %slot.position,
                filter = slot.filter.name(),
                input = ?current.shape(),
                output = ?output.shape(),
                "preflight"
            );
            slot.output_properties = output.clone();
            current = output;
        }
        self.env.enter(Phase::NonAccess);

        if let Err(e) = self.diagnostics.to_result(Phase::Preflight) {
            self.state = ChainState::Constructed;
            self.input_properties = None;
            return Err(e);
        }

        if self.slots.is_empty() {
            self.passthrough.set_properties(input.clone());
        }
        self.input_properties = Some(input.clone());
        self.state = ChainState::Preflighted;
        info!(input = ?input.shape(), output = ?current.shape(), "preflight complete");
        Ok(current)
    }

    /// Allocate output buffers and let every filter initialize itself
    pub fn initialize(&mut self) -> BciResult<()> {
        self.require(&[ChainState::Preflighted], "initialize")?;
        let Some(input) = self.input_properties.clone() else {
            return Err(BciError::InvalidTransition {
                from: self.state.name(),
                to: "initialize",
            });
        };

        self.diagnostics.clear();
        self.env.enter(Phase::Initialization);
        self.env.state_vector_mut().reset();

        let mut current = input;
        for slot in &mut self.slots {
            self.diagnostics.enter(slot.filter.name());
            debug!(position = %slot.position, filter = slot.filter.name(), "initialize");
            let result = slot.filter.initialize(&self.env, &current, &slot.output_properties);
            self.diagnostics.check(result);
            slot.output.set_properties(slot.output_properties.clone());
            current = slot.output_properties.clone();
        }
        self.env.enter(Phase::NonAccess);

        self.diagnostics.to_result(Phase::Initialization)?;
        self.state = ChainState::Initialized;
        info!(filters = self.slots.len(), "filter chain initialized");
        Ok(())
    }

    /// Begin a run: sets `Running` and notifies every filter
    pub fn start_run(&mut self) -> BciResult<()> {
        self.require(&[ChainState::Initialized, ChainState::Stopped], "start run")?;

        self.env.enter(Phase::StartRun);
        self.env.set_state(RUNNING, 1)?;
        self.state = ChainState::Running;
        if let Err(e) = self.dispatch(Phase::StartRun, |filter, env| filter.start_run(env)) {
            self.abort_run();
            return Err(e);
        }

        info!("run started");
        Ok(())
    }

    /// Run one block through every filter and return the last output
    ///
    /// An error from any filter ends the run: every filter receives
    /// `stop_run` and `Running` is cleared before the error is returned.
    pub fn process(&mut self, input: &Signal) -> BciResult<&Signal> {
        self.require(&[ChainState::Running], "process")?;

        let started = Instant::now();
        if let Err(e) = self.process_block(input) {
            error!(error = %e, "processing failed, stopping run");
            self.abort_run();
            return Err(e);
        }
        self.metrics.record(started.elapsed().as_micros() as u64);

        // A filter may end the run by clearing Running
        if self.env.state_vector().value(RUNNING)? == 0 {
            info!("Running cleared during processing");
            self.stop_run()?;
        }

        Ok(self.output())
    }

    fn process_block(&mut self, input: &Signal) -> BciResult<()> {
        let expected = self
            .input_properties
            .as_ref()
            .map(SignalProperties::shape)
            .unwrap_or_default();
        if input.properties().shape() != expected {
            return Err(BciError::ShapeMismatch {
                expected,
                actual: input.properties().shape(),
            });
        }

        self.env.state_vector_mut().begin_block();
        self.env.enter(Phase::Processing);
        let result = self.run_filters(input);
        self.env.enter(Phase::NonAccess);
        result
    }

    fn run_filters(&mut self, input: &Signal) -> BciResult<()> {
        if self.slots.is_empty() {
            return self.passthrough.copy_from(input);
        }

        for i in 0..self.slots.len() {
            let (done, rest) = self.slots.split_at_mut(i);
            let slot = &mut rest[0];
            let source = done.last().map_or(input, |previous| &previous.output);
            slot.filter.process(&mut self.env, source, &mut slot.output)?;
        }
        Ok(())
    }

    /// Output of the most recent block
    pub fn output(&self) -> &Signal {
        self.slots.last().map_or(&self.passthrough, |slot| &slot.output)
    }

    /// End a run: clears `Running` and notifies every filter
    pub fn stop_run(&mut self) -> BciResult<()> {
        self.require(&[ChainState::Running], "stop run")?;

        self.env.enter(Phase::StopRun);
        self.env.set_state(RUNNING, 0)?;
        self.state = ChainState::Stopped;
        self.dispatch(Phase::StopRun, |filter, env| filter.stop_run(env))?;

        info!(blocks = self.metrics.blocks_processed, "run stopped");
        Ok(())
    }

    fn abort_run(&mut self) {
        self.env.enter(Phase::StopRun);
        if let Err(e) = self.env.set_state(RUNNING, 0) {
            error!(error = %e, "failed to clear Running");
        }
        self.state = ChainState::Stopped;
        // Errors are already logged by dispatch
        let _ = self.dispatch(Phase::StopRun, |filter, env| filter.stop_run(env));
    }

    /// Idle-time notification between runs
    pub fn resting(&mut self) -> BciResult<()> {
        self.require(&[ChainState::Initialized, ChainState::Stopped], "rest")?;
        self.dispatch(Phase::Resting, |filter, env| filter.resting(env))
    }

    /// Halt every filter and release all buffers; valid from any state
    pub fn halt(&mut self) {
        for slot in &mut self.slots {
            debug!(position = %slot.position, filter = slot.filter.name(), "halt");
            slot.filter.halt();
            slot.output.release();
        }
        self.passthrough.release();
        self.env.enter(Phase::NonAccess);
        self.env.state_vector_mut().reset();
        self.input_properties = None;
        self.state = ChainState::Halted;
        info!("filter chain halted");
    }

    /// Call `f` on every filter in order; returns the first error
    fn dispatch<F>(&mut self, phase: Phase, mut f: F) -> BciResult<()>
    where
        F: FnMut(&mut dyn GenericFilter, &mut Environment) -> BciResult<()>,
    {
        self.env.enter(phase);
        let mut first_error = None;
        for slot in &mut self.slots {
            debug!(position = %slot.position, filter = slot.filter.name(), phase = phase.name(), "dispatch");
            if let Err(e) = f(slot.filter.as_mut(), &mut self.env) {
                error!(filter = slot.filter.name(), phase = phase.name(), error = %e, "filter failed");
                first_error.get_or_insert(e);
            }
        }
        self.env.enter(Phase::NonAccess);

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn require(&self, allowed: &[ChainState], operation: &'static str) -> BciResult<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(BciError::InvalidTransition {
                from: self.state.name(),
                to: operation,
            })
        }
    }
}

impl std::fmt::Debug for FilterChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterChain")
            .field("positions", &self.positions())
            .field("state", &self.state)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::FilterDeclaration;
    use crate::registry::FilterRegistry;
    use bci_core::{processing_error, ParamDefinition, ParamKind};

    /// Multiplies every sample by the "Gain" parameter
    struct Scale {
        gain: f64,
    }

    impl GenericFilter for Scale {
        fn name(&self) -> &str {
            "Scale"
        }

        fn declare(&self) -> BciResult<FilterDeclaration> {
            Ok(FilterDeclaration::new()
                .parameter(ParamDefinition::new("Filtering", "Gain", ParamKind::Float, 2.0).range(0.0, 10.0)))
        }

        fn preflight(&self, env: &Environment, input: &SignalProperties, diagnostics: &mut Diagnostics) -> SignalProperties {
            diagnostics.check(env.parameter("Gain").map(|_| ()));
            input.clone()
        }

        fn initialize(&mut self, env: &Environment, _: &SignalProperties, _: &SignalProperties) -> BciResult<()> {
            self.gain = env.parameters()?.float("Gain")?;
            Ok(())
        }

        fn process(&mut self, _: &mut Environment, input: &Signal, output: &mut Signal) -> BciResult<()> {
            for ch in 0..input.channels() {
                for (o, i) in output.channel_mut(ch).iter_mut().zip(input.channel(ch)) {
                    *o = i * self.gain;
                }
            }
            if output.samples().iter().any(|v| *v > 1000.0) {
                return Err(processing_error!("Scale", "output exceeds limit"));
            }
            Ok(())
        }
    }

    fn scale() -> Box<dyn GenericFilter> {
        Box::new(Scale { gain: 0.0 })
    }

    fn chain() -> FilterChain {
        let mut registry = FilterRegistry::new();
        registry.register("Scale", "1.A", scale);
        FilterChain::instantiate(&registry.freeze().unwrap()).unwrap()
    }

    fn block(values: &[f64]) -> Signal {
        Signal::from_channels(SignalProperties::new(1, values.len()), vec![values.to_vec()]).unwrap()
    }

    #[test]
    fn test_lifecycle_order_enforced() {
        let mut chain = chain();
        assert!(matches!(chain.initialize(), Err(BciError::InvalidTransition { .. })));
        assert!(chain.start_run().is_err());
        assert!(chain.process(&block(&[1.0])).is_err());

        chain.preflight(&SignalProperties::new(1, 2)).unwrap();
        chain.initialize().unwrap();
        chain.start_run().unwrap();
        assert!(chain.preflight(&SignalProperties::new(1, 2)).is_err());
        assert_eq!(chain.state(), ChainState::Running);
    }

    #[test]
    fn test_declared_parameters_and_running_state() {
        let chain = chain();
        assert_eq!(chain.parameters().float("Gain").unwrap(), 2.0);
        assert!(chain.environment().state_list().contains(RUNNING));
        assert_eq!(chain.positions(), vec!["1.A"]);
        assert_eq!(chain.type_names(), vec!["Scale"]);
    }

    #[test]
    fn test_process_applies_filters() {
        let mut chain = chain();
        chain.preflight(&SignalProperties::new(1, 3)).unwrap();
        chain.initialize().unwrap();
        chain.start_run().unwrap();

        let output = chain.process(&block(&[1.0, 2.0, 3.0])).unwrap();
        assert_eq!(output.samples(), &[2.0, 4.0, 6.0]);
        assert_eq!(chain.environment().state_vector().value(RUNNING).unwrap(), 1);
        assert_eq!(chain.metrics().blocks_processed, 1);
    }

    #[test]
    fn test_shape_mismatch_aborts_run() {
        let mut chain = chain();
        chain.preflight(&SignalProperties::new(1, 3)).unwrap();
        chain.initialize().unwrap();
        chain.start_run().unwrap();

        let err = chain.process(&block(&[1.0])).unwrap_err();
        assert!(matches!(err, BciError::ShapeMismatch { expected: (1, 3), actual: (1, 1) }));
        assert_eq!(chain.state(), ChainState::Stopped);
    }

    #[test]
    fn test_parameter_range_checked_at_preflight() {
        let mut chain = chain();
        let mut values = ParamList::new();
        values.set("Gain", 50.0);
        chain.apply_parameters(&values).unwrap();

        assert!(chain.preflight(&SignalProperties::new(1, 3)).is_err());
        assert_eq!(chain.diagnostics().error_count(), 1);
        assert_eq!(chain.diagnostics().entries()[0].source, "Parameters");
        assert_eq!(chain.state(), ChainState::Constructed);
    }

    #[test]
    fn test_empty_chain_passes_input_through() {
        let registry = FilterRegistry::new().freeze().unwrap();
        let mut chain = FilterChain::instantiate(&registry).unwrap();
        let output = chain.preflight(&SignalProperties::new(1, 2)).unwrap();
        assert_eq!(output.shape(), (1, 2));

        chain.initialize().unwrap();
        chain.start_run().unwrap();
        assert_eq!(chain.process(&block(&[5.0, 6.0])).unwrap().samples(), &[5.0, 6.0]);
    }

    #[test]
    fn test_resting_only_between_runs() {
        let mut chain = chain();
        chain.preflight(&SignalProperties::new(1, 1)).unwrap();
        chain.initialize().unwrap();
        assert!(chain.resting().is_ok());
        chain.start_run().unwrap();
        assert!(chain.resting().is_err());
        chain.stop_run().unwrap();
        assert!(chain.resting().is_ok());
    }

    #[test]
    fn test_metrics_average() {
        let mut metrics = ChainMetrics::default();
        assert_eq!(metrics.average_block_us(), 0.0);
        metrics.record(10);
        metrics.record(30);
        assert_eq!(metrics.average_block_us(), 20.0);
        assert_eq!(metrics.max_block_us, 30);
        assert_eq!(metrics.last_block_us, 30);
    }
}
