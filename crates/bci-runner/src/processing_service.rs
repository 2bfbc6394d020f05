//! Processing service: runs a filter session on its own task

use bci_core::{BciResult, Signal, SignalProperties};
use bci_processing::{BlockOutput, Session};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Commands for controlling processing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingCommand {
    /// Set `Running` with the next block
    StartRun,
    /// Clear `Running` with the next block
    StopRun,
    /// Halt the chain and end the service
    Shutdown,
}

/// One block result for storage and visualization consumers
#[derive(Debug, Clone)]
pub struct ProcessedBlock {
    pub output: BlockOutput,
    pub processing_time_us: u64,
}

/// Statistics about processing performance
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessingStats {
    pub is_running: bool,
    pub blocks_received: u64,
    /// Blocks whose signal reached the consumers
    pub signals_emitted: u64,
    pub runs_started: u64,
    pub errors: u64,
    pub total_processing_time_us: u64,
    pub average_latency_us: u64,
}

/// Real-time filter session driver
pub struct ProcessingService {
    session: Session,
    output_properties: SignalProperties,
    blocks: mpsc::Receiver<Signal>,
    commands: mpsc::Receiver<ProcessingCommand>,
    outputs: broadcast::Sender<ProcessedBlock>,
    stats: Arc<Mutex<ProcessingStats>>,
}

/// Handles returned by [`start_processing_service`]
pub struct ServiceHandle {
    pub output_properties: SignalProperties,
    pub outputs: broadcast::Receiver<ProcessedBlock>,
    pub commands: mpsc::Sender<ProcessingCommand>,
    pub stats: Arc<Mutex<ProcessingStats>>,
    pub task: JoinHandle<ProcessingStats>,
}

impl ProcessingService {
    /// Prepare `session` for blocks of shape `input`
    ///
    /// Preflight and initialization happen here so configuration errors
    /// surface before any task is spawned.
    pub fn new(
        mut session: Session,
        input: &SignalProperties,
        blocks: mpsc::Receiver<Signal>,
    ) -> BciResult<(Self, mpsc::Sender<ProcessingCommand>)> {
        let output_properties = session.start(input)?;
        let (outputs, _) = broadcast::channel(64);
        let (command_sender, commands) = mpsc::channel(32);

        let service = ProcessingService {
            session,
            output_properties,
            blocks,
            commands,
            outputs,
            stats: Arc::new(Mutex::new(ProcessingStats::default())),
        };
        Ok((service, command_sender))
    }

    /// Get output receiver for processed blocks
    pub fn subscribe_output(&self) -> broadcast::Receiver<ProcessedBlock> {
        self.outputs.subscribe()
    }

    pub fn output_properties(&self) -> &SignalProperties {
        &self.output_properties
    }

    pub fn stats_handle(&self) -> Arc<Mutex<ProcessingStats>> {
        Arc::clone(&self.stats)
    }

    /// Main processing loop; ends on shutdown or when either channel closes
    pub async fn run(mut self) -> ProcessingStats {
        info!(session = %self.session.id(), "processing service started");

        loop {
            tokio::select! {
                // Commands first so a start request applies to the next block
                biased;

                command = self.commands.recv() => {
                    match command {
                        Some(ProcessingCommand::StartRun) => {
                            self.session.request_running(true);
                            debug!("run requested");
                        }
                        Some(ProcessingCommand::StopRun) => {
                            self.session.request_running(false);
                            debug!("stop requested");
                        }
                        Some(ProcessingCommand::Shutdown) | None => break,
                    }
                }

                block = self.blocks.recv() => {
                    match block {
                        Some(block) => self.process(block).await,
                        None => {
                            info!("input stream closed");
                            break;
                        }
                    }
                }
            }
        }

        self.session.halt();
        let mut stats = self.stats.lock().await;
        stats.is_running = false;
        info!(
            blocks = stats.blocks_received,
            errors = stats.errors,
            "processing service stopped"
        );
        stats.clone()
    }

    async fn process(&mut self, block: Signal) {
        let started = Instant::now();
        let result = self.session.process_block(&block);
        let elapsed_us = started.elapsed().as_micros() as u64;

        let mut stats = self.stats.lock().await;
        stats.blocks_received += 1;
        stats.total_processing_time_us += elapsed_us;
        stats.average_latency_us = stats.total_processing_time_us / stats.blocks_received;

        match result {
            Ok(output) => {
                if output.running_changed && self.session.is_running() {
                    stats.runs_started += 1;
                }
                if output.signal.is_some() {
                    stats.signals_emitted += 1;
                }
                stats.is_running = self.session.is_running();
                if !output.is_empty() {
                    // Send to subscribers (ignore if no receivers)
                    let _ = self.outputs.send(ProcessedBlock {
                        output,
                        processing_time_us: elapsed_us,
                    });
                }
            }
            Err(e) => {
                stats.errors += 1;
                stats.is_running = false;
                if e.is_fatal() {
                    error!(error = %e, "processing failed");
                } else {
                    warn!(error = %e, "block rejected, run stopped");
                }
            }
        }
    }
}

/// Helper function to start the processing service in the background
pub fn start_processing_service(
    session: Session,
    input: &SignalProperties,
    blocks: mpsc::Receiver<Signal>,
) -> BciResult<ServiceHandle> {
    let (service, commands) = ProcessingService::new(session, input, blocks)?;
    let outputs = service.subscribe_output();
    let stats = service.stats_handle();
    let output_properties = service.output_properties().clone();
    let task = tokio::spawn(service.run());

    Ok(ServiceHandle {
        output_properties,
        outputs,
        commands,
        stats,
        task,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use bci_core::{Matrix, ParamList};
    use bci_processing::{builtin_registry, fir, FilterChain};
    use tokio::time::{timeout, Duration};

    fn session(integration: i64) -> Session {
        let mut chain = FilterChain::wrap_single(builtin_registry().unwrap()).unwrap();
        let mut values = ParamList::new();
        values.set(fir::COEFFICIENTS, Matrix::leading_ones(1));
        values.set(fir::INTEGRATION, integration);
        chain.apply_parameters(&values).unwrap();
        Session::new(chain)
    }

    fn block(values: &[f64]) -> Signal {
        Signal::from_channels(SignalProperties::new(1, values.len()), vec![values.to_vec()]).unwrap()
    }

    #[tokio::test]
    async fn test_outputs_follow_run_commands() {
        let (block_tx, block_rx) = mpsc::channel(8);
        let mut handle =
            start_processing_service(session(0), &SignalProperties::new(1, 2), block_rx).unwrap();
        assert_eq!(handle.output_properties.shape(), (1, 2));

        // Idle block produces no output
        block_tx.send(block(&[1.0, 1.0])).await.unwrap();
        while handle.stats.lock().await.blocks_received < 1 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        assert!(handle.outputs.try_recv().is_err());

        handle.commands.send(ProcessingCommand::StartRun).await.unwrap();
        block_tx.send(block(&[2.0, 3.0])).await.unwrap();

        let first = timeout(Duration::from_secs(1), handle.outputs.recv()).await.unwrap().unwrap();
        assert!(first.output.running_changed);
        assert_eq!(first.output.signal.unwrap().samples(), &[2.0, 3.0]);

        handle.commands.send(ProcessingCommand::StopRun).await.unwrap();
        block_tx.send(block(&[4.0, 5.0])).await.unwrap();
        let last = timeout(Duration::from_secs(1), handle.outputs.recv()).await.unwrap().unwrap();
        assert!(last.output.signal.is_none());
        assert!(last.output.state_vector.is_some());

        handle.commands.send(ProcessingCommand::Shutdown).await.unwrap();
        let stats = handle.task.await.unwrap();
        assert_eq!(stats.blocks_received, 3);
        assert_eq!(stats.signals_emitted, 1);
        assert_eq!(stats.runs_started, 1);
        assert_eq!(stats.errors, 0);
    }

    #[tokio::test]
    async fn test_bad_block_counts_error_and_stops_run() {
        let (block_tx, block_rx) = mpsc::channel(8);
        let handle = start_processing_service(session(2), &SignalProperties::new(1, 2), block_rx).unwrap();
        assert_eq!(handle.output_properties.shape(), (1, 1));

        handle.commands.send(ProcessingCommand::StartRun).await.unwrap();
        block_tx.send(block(&[1.0, 2.0, 3.0])).await.unwrap();
        drop(block_tx);

        let stats = handle.task.await.unwrap();
        assert_eq!(stats.errors, 1);
        assert!(!stats.is_running);
    }

    #[tokio::test]
    async fn test_configuration_error_surfaces_before_spawn() {
        let (_block_tx, block_rx) = mpsc::channel(1);
        // Default FIR coefficients have four rows; two channels are not enough
        let chain = FilterChain::wrap_single(builtin_registry().unwrap()).unwrap();
        let result = start_processing_service(Session::new(chain), &SignalProperties::new(2, 4), block_rx);
        assert!(result.is_err());
    }
}
