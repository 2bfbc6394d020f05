//! BCI-Simulation: simulated acquisition for the filter pipeline
//!
//! Generates fixed-shape signal blocks from deterministic waveforms plus
//! optional noise, either on demand or as a paced tokio stream.

pub mod block_source;
pub mod real_time_stream;
pub mod signal_patterns;

pub use block_source::{BlockSource, BlockSourceConfig};
pub use real_time_stream::{start_block_stream, BlockStream, StreamCommand, StreamConfig, StreamHandle, StreamStats};
pub use signal_patterns::SignalPattern;
