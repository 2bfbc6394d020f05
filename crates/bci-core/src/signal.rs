//! Signal: block-oriented multi-channel sample container
//!
//! A [`Signal`] holds `channels x elements` samples in channel-major order,
//! described by its [`SignalProperties`]. Properties are negotiated during
//! preflight; buffers are (re)allocated only when a filter is initialized.

use crate::error::{BciError, BciResult};
use serde::{Deserialize, Serialize};
use std::ops::{Index, IndexMut};

/// Numeric type of the samples as delivered by the source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SignalType {
    Int16,
    Int32,
    #[default]
    Float32,
    Other,
}

/// Affine mapping from an element index to a physical value
///
/// `physical = (raw - offset) * gain`, expressed in `symbol`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhysicalUnit {
    pub offset: f64,
    pub gain: f64,
    pub symbol: String,
}

impl PhysicalUnit {
    pub fn new(offset: f64, gain: f64, symbol: &str) -> Self {
        Self {
            offset,
            gain,
            symbol: symbol.to_string(),
        }
    }

    /// Time axis with one element every `period` seconds
    pub fn seconds(period: f64) -> Self {
        Self::new(0.0, period, "s")
    }

    pub fn raw_to_physical(&self, raw: f64) -> f64 {
        (raw - self.offset) * self.gain
    }

    pub fn physical_to_raw(&self, value: f64) -> f64 {
        value / self.gain + self.offset
    }
}

impl Default for PhysicalUnit {
    fn default() -> Self {
        Self::new(0.0, 1.0, "")
    }
}

/// Shape and type descriptor of a signal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalProperties {
    channels: usize,
    elements: usize,
    signal_type: SignalType,
    element_unit: PhysicalUnit,
}

impl SignalProperties {
    /// Create properties for `channels x elements` float samples
    pub fn new(channels: usize, elements: usize) -> Self {
        Self {
            channels,
            elements,
            signal_type: SignalType::default(),
            element_unit: PhysicalUnit::default(),
        }
    }

    pub fn with_type(mut self, signal_type: SignalType) -> Self {
        self.signal_type = signal_type;
        self
    }

    pub fn with_element_unit(mut self, unit: PhysicalUnit) -> Self {
        self.element_unit = unit;
        self
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn elements(&self) -> usize {
        self.elements
    }

    pub fn signal_type(&self) -> SignalType {
        self.signal_type
    }

    pub fn element_unit(&self) -> &PhysicalUnit {
        &self.element_unit
    }

    pub fn element_unit_mut(&mut self) -> &mut PhysicalUnit {
        &mut self.element_unit
    }

    pub fn set_channels(&mut self, channels: usize) {
        self.channels = channels;
    }

    pub fn set_elements(&mut self, elements: usize) {
        self.elements = elements;
    }

    /// Block-integrated signal: one element per channel and block
    pub fn is_reduced(&self) -> bool {
        self.elements == 1
    }

    /// Nominal time covered by one element, in element-unit terms
    pub fn sample_period(&self) -> f64 {
        self.element_unit.gain
    }

    /// (channels, elements) pair, used in shape comparisons
    pub fn shape(&self) -> (usize, usize) {
        (self.channels, self.elements)
    }

    pub fn is_empty(&self) -> bool {
        self.channels == 0 || self.elements == 0
    }
}

impl Default for SignalProperties {
    fn default() -> Self {
        Self::new(0, 0)
    }
}

/// Multi-channel block of samples bound to its properties
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Signal {
    properties: SignalProperties,
    /// Channel-major samples: `data[channel * elements + element]`
    data: Vec<f64>,
}

impl Signal {
    /// Create a zero-filled signal with the given properties
    pub fn new(properties: SignalProperties) -> Self {
        let len = properties.channels() * properties.elements();
        Self {
            properties,
            data: vec![0.0; len],
        }
    }

    /// Create a signal from per-channel sample vectors
    pub fn from_channels(properties: SignalProperties, channels: Vec<Vec<f64>>) -> BciResult<Self> {
        if channels.len() != properties.channels()
            || channels.iter().any(|c| c.len() != properties.elements())
        {
            return Err(BciError::ShapeMismatch {
                expected: properties.shape(),
                actual: (
                    channels.len(),
                    channels.first().map_or(0, |c| c.len()),
                ),
            });
        }

        Ok(Self {
            properties,
            data: channels.into_iter().flatten().collect(),
        })
    }

    /// Replace properties, resizing and zeroing the buffer if the shape changes
    pub fn set_properties(&mut self, properties: SignalProperties) {
        if properties.shape() != self.properties.shape() {
            self.data = vec![0.0; properties.channels() * properties.elements()];
        }
        self.properties = properties;
    }

    pub fn properties(&self) -> &SignalProperties {
        &self.properties
    }

    pub fn channels(&self) -> usize {
        self.properties.channels()
    }

    pub fn elements(&self) -> usize {
        self.properties.elements()
    }

    /// Samples of one channel
    pub fn channel(&self, channel: usize) -> &[f64] {
        let n = self.elements();
        &self.data[channel * n..(channel + 1) * n]
    }

    pub fn channel_mut(&mut self, channel: usize) -> &mut [f64] {
        let n = self.elements();
        &mut self.data[channel * n..(channel + 1) * n]
    }

    /// Copy samples from a signal of identical shape
    pub fn copy_from(&mut self, other: &Signal) -> BciResult<()> {
        if other.properties.shape() != self.properties.shape() {
            return Err(BciError::ShapeMismatch {
                expected: self.properties.shape(),
                actual: other.properties.shape(),
            });
        }
        self.data.copy_from_slice(&other.data);
        Ok(())
    }

    /// Drop the sample buffer, keeping nothing allocated
    pub fn release(&mut self) {
        self.properties = SignalProperties::default();
        self.data = Vec::new();
    }

    pub fn samples(&self) -> &[f64] {
        &self.data
    }

    /// Time axis of one block, using the element unit
    pub fn time_vector(&self) -> Vec<f64> {
        let unit = self.properties.element_unit();
        (0..self.elements())
            .map(|i| unit.raw_to_physical(i as f64))
            .collect()
    }
}

impl Index<(usize, usize)> for Signal {
    type Output = f64;

    fn index(&self, (channel, element): (usize, usize)) -> &f64 {
        &self.data[channel * self.properties.elements() + element]
    }
}

impl IndexMut<(usize, usize)> for Signal {
    fn index_mut(&mut self, (channel, element): (usize, usize)) -> &mut f64 {
        let n = self.properties.elements();
        &mut self.data[channel * n + element]
    }
}

/// Summary statistics over one block of samples
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BlockStats {
    pub mean: f64,
    pub rms: f64,
    pub min: f64,
    pub max: f64,
}

impl BlockStats {
    pub fn calculate(data: &[f64]) -> Self {
        if data.is_empty() {
            return Self {
                mean: 0.0,
                rms: 0.0,
                min: 0.0,
                max: 0.0,
            };
        }

        let n = data.len() as f64;
        let mean = data.iter().sum::<f64>() / n;
        let rms = (data.iter().map(|x| x * x).sum::<f64>() / n).sqrt();
        let min = data.iter().fold(f64::INFINITY, |a, &b| a.min(b));
        let max = data.iter().fold(f64::NEG_INFINITY, |a, &b| a.max(b));

        Self { mean, rms, min, max }
    }
}
