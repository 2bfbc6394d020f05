//! Session configuration: acquisition shape plus parameter values

use bci_core::{config_error, BciResult, Matrix, ParamList, PhysicalUnit, SignalProperties, SignalType};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::fir;

/// Shape and timing of the blocks delivered by acquisition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub channels: usize,
    /// Samples per channel and block
    pub elements: usize,
    /// Samples per second
    pub sampling_rate: f64,
    #[serde(default)]
    pub signal_type: SignalType,
}

/// Complete configuration of one filter session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Configuration name/profile
    pub name: String,
    pub source: SourceConfig,
    /// Parameter values; anything missing falls back to declared defaults
    #[serde(default)]
    pub parameters: ParamList,
}

impl SessionConfig {
    /// Four channels through the default FIR kernel (identity)
    pub fn fir_passthrough() -> Self {
        let mut parameters = ParamList::new();
        parameters.set(fir::COEFFICIENTS, Matrix::leading_ones(4));
        parameters.set(fir::INTEGRATION, 0i64);

        Self {
            name: "FIR passthrough".to_string(),
            source: SourceConfig {
                channels: 4,
                elements: 16,
                sampling_rate: 256.0,
                signal_type: SignalType::Float32,
            },
            parameters,
        }
    }

    /// Moving-average smoothing followed by block RMS, e.g. for band power
    pub fn fir_rms_power() -> Self {
        let taps = 4;
        let mut parameters = ParamList::new();
        parameters.set(fir::COEFFICIENTS, Matrix::filled(4, taps, 1.0 / taps as f64));
        parameters.set(fir::INTEGRATION, 2i64);

        Self {
            name: "FIR RMS power".to_string(),
            source: SourceConfig {
                channels: 4,
                elements: 32,
                sampling_rate: 512.0,
                signal_type: SignalType::Float32,
            },
            parameters,
        }
    }

    /// FIR filter present but disabled by an empty coefficient matrix
    pub fn fir_disabled() -> Self {
        let mut config = Self::fir_passthrough();
        config.name = "FIR disabled".to_string();
        config.parameters.set(fir::COEFFICIENTS, Matrix::empty());
        config
    }

    /// Validate everything that does not depend on filter declarations
    pub fn validate(&self) -> BciResult<()> {
        if self.name.is_empty() {
            return Err(config_error!("Configuration name cannot be empty"));
        }
        if self.source.channels == 0 {
            return Err(config_error!("Source must have at least one channel"));
        }
        if self.source.elements == 0 {
            return Err(config_error!("Source block size must be greater than 0"));
        }
        if !(self.source.sampling_rate.is_finite() && self.source.sampling_rate > 0.0) {
            return Err(config_error!(
                "Sampling rate {} must be a positive number",
                self.source.sampling_rate
            ));
        }
        let duration = Duration::try_from_secs_f64(self.source.elements as f64 / self.source.sampling_rate);
        if duration.map_or(true, |d| d.is_zero()) {
            return Err(config_error!(
                "Block of {} samples at {} Hz has no representable duration",
                self.source.elements,
                self.source.sampling_rate
            ));
        }
        Ok(())
    }

    /// Properties of the blocks entering the chain
    pub fn signal_properties(&self) -> SignalProperties {
        SignalProperties::new(self.source.channels, self.source.elements)
            .with_type(self.source.signal_type)
            .with_element_unit(PhysicalUnit::seconds(1.0 / self.source.sampling_rate))
    }

    /// Wall-clock time covered by one block
    pub fn block_duration(&self) -> Duration {
        Duration::from_secs_f64(self.source.elements as f64 / self.source.sampling_rate)
    }

    /// Export configuration to JSON
    pub fn to_json(&self) -> BciResult<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| config_error!("Failed to serialize config: {}", e))
    }

    /// Import configuration from JSON
    pub fn from_json(json: &str) -> BciResult<Self> {
        serde_json::from_str(json).map_err(|e| config_error!("Failed to parse config: {}", e))
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::fir_passthrough()
    }
}
