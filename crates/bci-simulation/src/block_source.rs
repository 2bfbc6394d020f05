//! Simulated acquisition: fixed-shape blocks from a pattern plus noise

use crate::signal_patterns::SignalPattern;
use bci_core::{config_error, BciResult, PhysicalUnit, Signal, SignalProperties, SignalType};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for a simulated source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockSourceConfig {
    pub channels: usize,
    /// Samples per channel and block
    pub elements: usize,
    /// Sampling rate in Hz
    pub sampling_rate: f64,
    pub pattern: SignalPattern,
    /// Gaussian noise standard deviation (0.0 = no noise)
    pub noise_std: f64,
    /// Per-channel gain step; channel `c` is scaled by `1 + c * channel_gain_step`
    pub channel_gain_step: f64,
    /// Random seed for reproducibility
    pub seed: Option<u64>,
}

impl Default for BlockSourceConfig {
    fn default() -> Self {
        Self {
            channels: 4,
            elements: 16,
            sampling_rate: 256.0,
            pattern: SignalPattern::default(),
            noise_std: 2.0,
            channel_gain_step: 0.1,
            seed: None,
        }
    }
}

impl BlockSourceConfig {
    /// Noise-free source, handy for exact assertions
    pub fn deterministic(channels: usize, elements: usize, pattern: SignalPattern) -> Self {
        Self {
            channels,
            elements,
            pattern,
            noise_std: 0.0,
            channel_gain_step: 0.0,
            seed: Some(0),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> BciResult<()> {
        if self.channels == 0 || self.elements == 0 {
            return Err(config_error!(
                "Source shape {}x{} must not be empty",
                self.channels,
                self.elements
            ));
        }
        if !(self.sampling_rate.is_finite() && self.sampling_rate > 0.0) {
            return Err(config_error!("Invalid sampling rate: {}", self.sampling_rate));
        }
        let duration = Duration::try_from_secs_f64(self.elements as f64 / self.sampling_rate);
        if duration.map_or(true, |d| d.is_zero()) {
            return Err(config_error!(
                "Block of {} samples at {} Hz has no representable duration",
                self.elements,
                self.sampling_rate
            ));
        }
        if !(self.noise_std.is_finite() && self.noise_std >= 0.0) {
            return Err(config_error!("Invalid noise level: {}", self.noise_std));
        }
        Ok(())
    }

    /// Wall-clock time covered by one block
    pub fn block_duration(&self) -> Duration {
        Duration::from_secs_f64(self.elements as f64 / self.sampling_rate)
    }
}

/// Block generator standing in for an amplifier driver
#[derive(Debug)]
pub struct BlockSource {
    config: BlockSourceConfig,
    properties: SignalProperties,
    rng: StdRng,
    noise: Option<Normal<f64>>,
    /// Index of the next sample to generate
    sample_index: u64,
}

impl BlockSource {
    pub fn new(config: BlockSourceConfig) -> BciResult<Self> {
        config.validate()?;

        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let noise = if config.noise_std > 0.0 {
            let normal = Normal::new(0.0, config.noise_std)
                .map_err(|e| config_error!("Failed to create noise distribution: {}", e))?;
            Some(normal)
        } else {
            None
        };
        let properties = SignalProperties::new(config.channels, config.elements)
            .with_type(SignalType::Float32)
            .with_element_unit(PhysicalUnit::seconds(1.0 / config.sampling_rate));

        Ok(Self {
            config,
            properties,
            rng,
            noise,
            sample_index: 0,
        })
    }

    /// Properties of every block this source produces
    pub fn properties(&self) -> &SignalProperties {
        &self.properties
    }

    pub fn config(&self) -> &BlockSourceConfig {
        &self.config
    }

    pub fn set_pattern(&mut self, pattern: SignalPattern) {
        self.config.pattern = pattern;
    }

    /// Samples generated so far, per channel
    pub fn sample_index(&self) -> u64 {
        self.sample_index
    }

    /// Generate the next block
    pub fn next_block(&mut self) -> Signal {
        let mut block = Signal::new(self.properties.clone());
        let rate = self.config.sampling_rate;

        for ch in 0..self.config.channels {
            let gain = 1.0 + ch as f64 * self.config.channel_gain_step;
            for (i, sample) in block.channel_mut(ch).iter_mut().enumerate() {
                let index = self.sample_index + i as u64;
                let mut value = gain * self.config.pattern.value(index, rate);
                if let Some(noise) = &self.noise {
                    value += noise.sample(&mut self.rng);
                }
                *sample = value;
            }
        }

        self.sample_index += self.config.elements as u64;
        block
    }

    /// Restart the waveform at t = 0
    pub fn reset(&mut self) {
        self.sample_index = 0;
    }
}
