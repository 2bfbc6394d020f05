//! Real-time block streaming from a simulated source

use crate::block_source::{BlockSource, BlockSourceConfig};
use crate::signal_patterns::SignalPattern;
use bci_core::{BciResult, Signal, SignalProperties};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant};
use tracing::{debug, info, warn};

/// Configuration for a block stream
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    pub source: BlockSourceConfig,
    /// Pace blocks at their wall-clock duration; otherwise emit as fast as
    /// the consumer accepts them
    pub realtime: bool,
    /// Blocks buffered between the stream and its consumer
    pub buffer_size: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            source: BlockSourceConfig::default(),
            realtime: true,
            buffer_size: 16,
        }
    }
}

/// Commands for controlling the stream
#[derive(Debug, Clone)]
pub enum StreamCommand {
    Start,
    /// Stop and rewind the waveform
    Stop,
    Pause,
    Resume,
    SetPattern(SignalPattern),
}

/// Stream statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamStats {
    pub is_running: bool,
    pub blocks_sent: u64,
    /// Blocks discarded because the consumer fell behind
    pub blocks_dropped: u64,
    /// Signal time generated, in seconds
    pub total_duration: f64,
    pub average_block_us: f64,
}

impl StreamStats {
    fn record(&mut self, block_seconds: f64, generation_us: f64) {
        let n = (self.blocks_sent + self.blocks_dropped) as f64;
        self.average_block_us = (self.average_block_us * n + generation_us) / (n + 1.0);
        self.total_duration += block_seconds;
    }
}

/// Real-time block stream
pub struct BlockStream {
    config: StreamConfig,
    source: BlockSource,
    blocks: mpsc::Sender<Signal>,
    commands: mpsc::Receiver<StreamCommand>,
    stats: StreamStats,
}

/// Handles returned by [`start_block_stream`]
pub struct StreamHandle {
    /// Properties of every block on `blocks`
    pub properties: SignalProperties,
    pub blocks: mpsc::Receiver<Signal>,
    pub control: mpsc::Sender<StreamCommand>,
    /// Resolves to the final statistics once the stream ends
    pub task: JoinHandle<StreamStats>,
}

impl BlockStream {
    /// Create a stream plus its block receiver and control sender
    pub fn new(
        config: StreamConfig,
    ) -> BciResult<(Self, mpsc::Receiver<Signal>, mpsc::Sender<StreamCommand>)> {
        let source = BlockSource::new(config.source.clone())?;
        let (block_sender, block_receiver) = mpsc::channel(config.buffer_size.max(1));
        let (control_sender, control_receiver) = mpsc::channel(32);

        let stream = BlockStream {
            config,
            source,
            blocks: block_sender,
            commands: control_receiver,
            stats: StreamStats::default(),
        };
        Ok((stream, block_receiver, control_sender))
    }

    pub fn properties(&self) -> &SignalProperties {
        self.source.properties()
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// Run until the control channel closes or the consumer goes away
    pub async fn run(mut self) -> StreamStats {
        let block_duration = self.config.source.block_duration();
        let block_seconds = block_duration.as_secs_f64();
        let mut ticker = interval(block_duration);
        let mut running = false;

        info!(
            realtime = self.config.realtime,
            block_ms = block_seconds * 1000.0,
            shape = ?self.source.properties().shape(),
            "block stream ready"
        );

        loop {
            tokio::select! {
                _ = ticker.tick(), if running && self.config.realtime => {
                    let started = Instant::now();
                    let block = self.source.next_block();
                    let generation_us = started.elapsed().as_secs_f64() * 1e6;
                    self.stats.record(block_seconds, generation_us);

                    match self.blocks.try_send(block) {
                        Ok(()) => self.stats.blocks_sent += 1,
                        Err(mpsc::error::TrySendError::Full(_)) => {
                            self.stats.blocks_dropped += 1;
                            warn!(dropped = self.stats.blocks_dropped, "consumer fell behind, block dropped");
                        }
                        Err(mpsc::error::TrySendError::Closed(_)) => break,
                    }
                }

                permit = self.blocks.reserve(), if running && !self.config.realtime => {
                    let Ok(permit) = permit else { break };
                    let started = Instant::now();
                    let block = self.source.next_block();
                    self.stats.record(block_seconds, started.elapsed().as_secs_f64() * 1e6);
                    permit.send(block);
                    self.stats.blocks_sent += 1;
                }

                command = self.commands.recv() => {
                    match command {
                        Some(StreamCommand::Start) | Some(StreamCommand::Resume) => {
                            running = true;
                            ticker.reset();
                            info!("block stream running");
                        }
                        Some(StreamCommand::Stop) => {
                            running = false;
                            self.source.reset();
                            info!(blocks = self.stats.blocks_sent, "block stream stopped");
                        }
                        Some(StreamCommand::Pause) => {
                            running = false;
                            debug!("block stream paused");
                        }
                        Some(StreamCommand::SetPattern(pattern)) => {
                            info!(pattern = pattern.description(), "source pattern updated");
                            self.source.set_pattern(pattern);
                        }
                        None => {
                            debug!("block stream control channel closed");
                            break;
                        }
                    }
                    self.stats.is_running = running;
                }
            }
        }

        self.stats.is_running = false;
        info!(
            sent = self.stats.blocks_sent,
            dropped = self.stats.blocks_dropped,
            "block stream finished"
        );
        self.stats
    }
}

/// Helper function to create a stream and run it in the background
pub fn start_block_stream(config: StreamConfig) -> BciResult<StreamHandle> {
    let (stream, blocks, control) = BlockStream::new(config)?;
    let properties = stream.properties().clone();
    let task = tokio::spawn(stream.run());

    Ok(StreamHandle {
        properties,
        blocks,
        control,
        task,
    })
}
