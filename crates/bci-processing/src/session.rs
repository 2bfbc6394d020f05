//! Session: drives a chain block by block and gates its output on `Running`

use crate::chain::{ChainState, FilterChain};
use bci_core::{BciResult, Signal, SignalProperties};
use tracing::{info, warn};
use uuid::Uuid;

/// What a session hands to storage and visualization for one block
#[derive(Debug, Clone, PartialEq)]
pub struct BlockOutput {
    /// Index of the block since the session started
    pub block: u64,
    /// Packed state vector, present when running before or after the block
    pub state_vector: Option<Vec<u8>>,
    /// Chain output, present only while running after the block
    pub signal: Option<Signal>,
    /// The run started or stopped with this block
    pub running_changed: bool,
}

impl BlockOutput {
    pub fn is_empty(&self) -> bool {
        self.state_vector.is_none() && self.signal.is_none()
    }
}

/// A configured chain plus the operator's run request
#[derive(Debug)]
pub struct Session {
    id: Uuid,
    chain: FilterChain,
    running_requested: bool,
    blocks: u64,
}

impl Session {
    pub fn new(chain: FilterChain) -> Self {
        Self {
            id: Uuid::new_v4(),
            chain,
            running_requested: false,
            blocks: 0,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn chain(&self) -> &FilterChain {
        &self.chain
    }

    pub fn chain_mut(&mut self) -> &mut FilterChain {
        &mut self.chain
    }

    pub fn is_running(&self) -> bool {
        self.chain.is_running()
    }

    pub fn blocks_processed(&self) -> u64 {
        self.blocks
    }

    /// Ask for a run to start or stop with the next block
    pub fn request_running(&mut self, running: bool) {
        self.running_requested = running;
    }

    /// Preflight and initialize the chain for `input`
    pub fn start(&mut self, input: &SignalProperties) -> BciResult<SignalProperties> {
        let output = self.chain.preflight(input)?;
        self.chain.initialize()?;
        self.blocks = 0;
        info!(session = %self.id, output = ?output.shape(), "session ready");
        Ok(output)
    }

    /// Run one block, applying any pending start or stop request first
    pub fn process_block(&mut self, input: &Signal) -> BciResult<BlockOutput> {
        let was_running = self.chain.is_running();

        let transition = if self.running_requested && !was_running {
            self.chain.start_run()
        } else if !self.running_requested && was_running {
            self.chain.stop_run()
        } else {
            Ok(())
        };
        if let Err(e) = transition {
            warn!(session = %self.id, error = %e, "run transition failed");
            self.running_requested = false;
            return Err(e);
        }

        if self.chain.is_running() {
            if let Err(e) = self.chain.process(input) {
                warn!(session = %self.id, error = %e, "run aborted");
                self.running_requested = false;
                return Err(e);
            }
            // A filter may have ended the run itself
            if !self.chain.is_running() {
                self.running_requested = false;
            }
        } else if let Err(e) = self.chain.resting() {
            self.running_requested = false;
            return Err(e);
        }

        let is_running = self.chain.is_running();
        let output = BlockOutput {
            block: self.blocks,
            state_vector: (was_running || is_running)
                .then(|| self.chain.environment().state_vector().as_bytes().to_vec()),
            signal: is_running.then(|| self.chain.output().clone()),
            running_changed: was_running != is_running,
        };
        self.blocks += 1;
        Ok(output)
    }

    /// Halt the chain; safe in any state
    pub fn halt(&mut self) {
        self.running_requested = false;
        self.chain.halt();
        info!(session = %self.id, blocks = self.blocks, "session halted");
    }

    pub fn chain_state(&self) -> ChainState {
        self.chain.state()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::{Diagnostics, Environment};
    use crate::filter::GenericFilter;
    use crate::fir;
    use crate::registry::FilterRegistry;
    use bci_core::{processing_error, BciError, Matrix, ParamList};
    use std::sync::atomic::{AtomicUsize, Ordering};

    static START_ATTEMPTS: AtomicUsize = AtomicUsize::new(0);

    /// Refuses every run
    struct NoStart;

    impl GenericFilter for NoStart {
        fn name(&self) -> &str {
            "NoStart"
        }

        fn preflight(&self, _: &Environment, input: &SignalProperties, _: &mut Diagnostics) -> SignalProperties {
            input.clone()
        }

        fn initialize(&mut self, _: &Environment, _: &SignalProperties, _: &SignalProperties) -> BciResult<()> {
            Ok(())
        }

        fn start_run(&mut self, _: &mut Environment) -> BciResult<()> {
            START_ATTEMPTS.fetch_add(1, Ordering::SeqCst);
            Err(processing_error!("NoStart", "device not ready"))
        }

        fn process(&mut self, _: &mut Environment, input: &Signal, output: &mut Signal) -> BciResult<()> {
            output.copy_from(input)
        }
    }

    fn create_no_start() -> Box<dyn GenericFilter> {
        Box::new(NoStart)
    }

    fn session() -> Session {
        let mut registry = FilterRegistry::new();
        fir::register(&mut registry);
        let mut chain = FilterChain::wrap_single(&registry.freeze().unwrap()).unwrap();
        let mut values = ParamList::new();
        values.set(fir::COEFFICIENTS, Matrix::leading_ones(1));
        chain.apply_parameters(&values).unwrap();
        Session::new(chain)
    }

    fn block(values: &[f64]) -> Signal {
        Signal::from_channels(SignalProperties::new(1, values.len()), vec![values.to_vec()]).unwrap()
    }

    #[test]
    fn test_idle_blocks_produce_nothing() {
        let mut session = session();
        session.start(&SignalProperties::new(1, 2)).unwrap();

        let output = session.process_block(&block(&[1.0, 2.0])).unwrap();
        assert!(output.is_empty());
        assert!(!output.running_changed);
        assert_eq!(session.blocks_processed(), 1);
    }

    #[test]
    fn test_run_gating() {
        let mut session = session();
        session.start(&SignalProperties::new(1, 2)).unwrap();

        session.request_running(true);
        let first = session.process_block(&block(&[1.0, 2.0])).unwrap();
        assert!(first.running_changed);
        assert_eq!(first.signal.unwrap().samples(), &[1.0, 2.0]);
        assert_eq!(first.state_vector.unwrap(), vec![1]);

        let second = session.process_block(&block(&[3.0, 4.0])).unwrap();
        assert!(!second.running_changed);
        assert!(second.signal.is_some());

        session.request_running(false);
        let last = session.process_block(&block(&[5.0, 6.0])).unwrap();
        assert!(last.running_changed);
        assert!(last.signal.is_none());
        assert_eq!(last.state_vector.unwrap(), vec![0]);
        assert_eq!(last.block, 2);
        assert_eq!(session.chain_state(), ChainState::Stopped);
    }

    #[test]
    fn test_session_ids_are_unique() {
        assert_ne!(session().id(), session().id());
    }

    #[test]
    fn test_halt_then_restart() {
        let mut session = session();
        session.start(&SignalProperties::new(1, 2)).unwrap();
        session.request_running(true);
        session.process_block(&block(&[1.0, 2.0])).unwrap();

        session.halt();
        assert_eq!(session.chain_state(), ChainState::Halted);
        assert!(!session.is_running());

        session.start(&SignalProperties::new(1, 2)).unwrap();
        session.request_running(true);
        let output = session.process_block(&block(&[7.0, 8.0])).unwrap();
        assert_eq!(output.block, 0);
        assert_eq!(output.signal.unwrap().samples(), &[7.0, 8.0]);
    }

    #[test]
    fn test_failed_start_is_not_retried() {
        let mut registry = FilterRegistry::new();
        registry.register("NoStart", "1.A", create_no_start);
        let chain = FilterChain::wrap_single(&registry.freeze().unwrap()).unwrap();
        let mut session = Session::new(chain);
        session.start(&SignalProperties::new(1, 2)).unwrap();

        session.request_running(true);
        let first = session.process_block(&block(&[1.0, 2.0]));
        assert!(matches!(first, Err(BciError::Processing { .. })));
        assert_eq!(session.chain_state(), ChainState::Stopped);

        for _ in 0..2 {
            let output = session.process_block(&block(&[3.0, 4.0])).unwrap();
            assert!(output.is_empty());
        }
        assert_eq!(START_ATTEMPTS.load(Ordering::SeqCst), 1);
        assert!(!session.is_running());
    }
}
