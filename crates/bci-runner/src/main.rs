//! bci-filtertool: run a simulated acquisition through the filter chain
//!
//! Loads a session configuration (JSON file or built-in preset), builds the
//! chain from the built-in registry, streams simulated blocks through it and
//! reports what the chain produced.

mod processing_service;

use anyhow::{bail, Context, Result};
use bci_core::BlockStats;
use bci_processing::{builtin_registry, FilterChain, Session, SessionConfig};
use bci_simulation::{start_block_stream, BlockSourceConfig, SignalPattern, StreamCommand, StreamConfig};
use clap::{Parser, ValueEnum};
use processing_service::{start_processing_service, ProcessingCommand};
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Preset {
    /// Identity kernel, four channels
    Passthrough,
    /// Moving average plus block RMS
    RmsPower,
    /// Empty coefficient matrix
    Disabled,
}

impl Preset {
    fn config(self) -> SessionConfig {
        match self {
            Preset::Passthrough => SessionConfig::fir_passthrough(),
            Preset::RmsPower => SessionConfig::fir_rms_power(),
            Preset::Disabled => SessionConfig::fir_disabled(),
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "bci-filtertool", version, about = "Run simulated signal blocks through the filter chain", long_about = None)]
struct Args {
    /// Session configuration file (JSON); overrides --preset
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Built-in configuration to use when no file is given
    #[arg(short, long, value_enum, default_value_t = Preset::Passthrough)]
    preset: Preset,

    /// Blocks to collect while running
    #[arg(short, long, default_value_t = 32)]
    blocks: u64,

    /// Idle blocks processed before the run starts
    #[arg(long, default_value_t = 2)]
    warmup: u64,

    /// Pace the source at its sampling rate instead of running flat out
    #[arg(long)]
    realtime: bool,

    /// Instantiate only the first registered filter
    #[arg(long)]
    single: bool,

    /// Gaussian noise added by the simulated source
    #[arg(long, default_value_t = 0.0)]
    noise: f64,

    /// Seed for the simulated noise
    #[arg(long)]
    seed: Option<u64>,

    /// Print one JSON line per block instead of a summary
    #[arg(long)]
    json: bool,

    /// Print the resolved configuration and exit
    #[arg(long)]
    dump_config: bool,
}

#[derive(Serialize)]
struct BlockLine<'a> {
    block: u64,
    running_changed: bool,
    state_vector: Option<&'a [u8]>,
    channels: Vec<&'a [f64]>,
    processing_time_us: u64,
}

fn load_config(args: &Args) -> Result<SessionConfig> {
    let config = match &args.config {
        Some(path) => {
            let json = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            SessionConfig::from_json(&json)?
        }
        None => args.preset.config(),
    };
    config.validate()?;
    Ok(config)
}

fn build_session(config: &SessionConfig, single: bool) -> Result<Session> {
    let registry = builtin_registry()?;
    let mut chain = if single {
        FilterChain::wrap_single(registry)?
    } else {
        FilterChain::instantiate(registry)?
    };
    info!(positions = ?chain.positions(), filters = ?chain.type_names(), "chain constructed");

    chain.apply_parameters(&config.parameters)?;
    Ok(Session::new(chain))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = load_config(&args)?;

    if args.dump_config {
        println!("{}", config.to_json()?);
        return Ok(());
    }

    info!(name = %config.name, shape = ?(config.source.channels, config.source.elements), "loaded configuration");

    let session = build_session(&config, args.single)?;
    let session_id = session.id();

    let stream = start_block_stream(StreamConfig {
        source: BlockSourceConfig {
            channels: config.source.channels,
            elements: config.source.elements,
            sampling_rate: config.source.sampling_rate,
            pattern: SignalPattern::default(),
            noise_std: args.noise,
            channel_gain_step: 0.1,
            seed: args.seed,
        },
        realtime: args.realtime,
        buffer_size: 16,
    })?;

    let input = config.signal_properties();
    let mut service = start_processing_service(session, &input, stream.blocks)
        .with_context(|| format!("session {} failed to start", session_id))?;
    info!(
        session = %session_id,
        output = ?service.output_properties.shape(),
        "session initialized"
    );

    stream.control.send(StreamCommand::Start).await?;

    if args.warmup > 0 {
        // Idle blocks emit nothing, so pace the warmup by block duration
        tokio::time::sleep(config.block_duration() * args.warmup as u32).await;
    }
    service.commands.send(ProcessingCommand::StartRun).await?;

    let mut collected = 0u64;
    let mut first_channel = Vec::new();
    while collected < args.blocks {
        let processed = match tokio::time::timeout(Duration::from_secs(5), service.outputs.recv()).await {
            Ok(Ok(processed)) => processed,
            Ok(Err(RecvError::Lagged(n))) => {
                warn!(skipped = n, "output consumer lagged");
                continue;
            }
            Ok(Err(RecvError::Closed)) => break,
            Err(_) => bail!("no output for 5 seconds; processing stalled"),
        };

        let output = &processed.output;
        let Some(signal) = &output.signal else {
            // Run stopped underneath us
            break;
        };
        collected += 1;

        if args.json {
            let line = BlockLine {
                block: output.block,
                running_changed: output.running_changed,
                state_vector: output.state_vector.as_deref(),
                channels: (0..signal.channels()).map(|ch| signal.channel(ch)).collect(),
                processing_time_us: processed.processing_time_us,
            };
            println!("{}", serde_json::to_string(&line)?);
        } else if signal.channels() > 0 {
            first_channel.extend_from_slice(signal.channel(0));
        }
    }

    service.commands.send(ProcessingCommand::StopRun).await?;
    service.commands.send(ProcessingCommand::Shutdown).await?;
    drop(stream.control);

    let stats = service.task.await?;
    let stream_stats = stream.task.await?;

    if !args.json {
        println!("configuration   {}", config.name);
        println!("session         {}", session_id);
        println!("blocks          {} collected, {} processed", collected, stats.blocks_received);
        println!("errors          {}", stats.errors);
        println!("latency         {} us average", stats.average_latency_us);
        println!("source dropped  {}", stream_stats.blocks_dropped);
        if !first_channel.is_empty() {
            let summary = BlockStats::calculate(&first_channel);
            println!(
                "channel 0       mean {:.3}  rms {:.3}  min {:.3}  max {:.3}",
                summary.mean, summary.rms, summary.min, summary.max
            );
        }
    }

    if stats.errors > 0 {
        bail!("{} block(s) failed during the run", stats.errors);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_parse() {
        let args = Args::parse_from(["bci-filtertool", "--preset", "rms-power", "--blocks", "4", "--json"]);
        assert!(matches!(args.preset, Preset::RmsPower));
        assert_eq!(args.blocks, 4);
        assert!(args.json);
        assert!(args.config.is_none());
    }

    #[test]
    fn test_presets_build_sessions() {
        for preset in [Preset::Passthrough, Preset::RmsPower, Preset::Disabled] {
            let config = preset.config();
            let mut session = build_session(&config, false).unwrap();
            let output = session.start(&config.signal_properties()).unwrap();
            assert_eq!(output.channels(), config.source.channels);
        }
    }

    #[test]
    fn test_single_wraps_first_filter() {
        let session = build_session(&SessionConfig::default(), true).unwrap();
        assert_eq!(session.chain().len(), 1);
    }
}
