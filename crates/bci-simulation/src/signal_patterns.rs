//! Deterministic waveforms used by the simulated acquisition source

use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Waveform shape of a simulated channel
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum SignalPattern {
    /// Constant level
    Constant { level: f64 },
    /// Sine wave around an offset
    Sinusoid {
        frequency: f64,
        amplitude: f64,
        offset: f64,
    },
    /// Linear ramp, holding `end` after `duration` seconds
    Ramp { start: f64, end: f64, duration: f64 },
    /// Oscillation switched on and off, e.g. alpha bursts
    Burst {
        frequency: f64,
        amplitude: f64,
        on_duration: f64,
        off_duration: f64,
    },
    /// Single unit sample at t = 0, for impulse responses
    Impulse,
    /// Running sample index; makes block continuity easy to check
    Counter,
}

impl SignalPattern {
    /// Value at sample `index` for the given sampling rate
    pub fn value(&self, index: u64, sampling_rate: f64) -> f64 {
        let time = index as f64 / sampling_rate;
        match *self {
            SignalPattern::Constant { level } => level,

            SignalPattern::Sinusoid { frequency, amplitude, offset } => {
                offset + amplitude * (2.0 * PI * frequency * time).sin()
            }

            SignalPattern::Ramp { start, end, duration } => {
                if time >= duration {
                    end
                } else {
                    start + (end - start) * (time / duration)
                }
            }

            SignalPattern::Burst { frequency, amplitude, on_duration, off_duration } => {
                let phase = time % (on_duration + off_duration);
                if phase < on_duration {
                    amplitude * (2.0 * PI * frequency * time).sin()
                } else {
                    0.0
                }
            }

            SignalPattern::Impulse => {
                if index == 0 {
                    1.0
                } else {
                    0.0
                }
            }

            SignalPattern::Counter => index as f64,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            SignalPattern::Constant { .. } => "Constant level",
            SignalPattern::Sinusoid { .. } => "Sine wave",
            SignalPattern::Ramp { .. } => "Linear ramp",
            SignalPattern::Burst { .. } => "Oscillation bursts",
            SignalPattern::Impulse => "Unit impulse",
            SignalPattern::Counter => "Sample counter",
        }
    }

    /// Common preset patterns
    pub fn presets() -> Vec<(&'static str, SignalPattern)> {
        vec![
            ("Flat", SignalPattern::Constant { level: 0.0 }),
            ("Alpha", SignalPattern::Sinusoid { frequency: 10.0, amplitude: 20.0, offset: 0.0 }),
            ("Beta", SignalPattern::Sinusoid { frequency: 20.0, amplitude: 8.0, offset: 0.0 }),
            ("Line noise", SignalPattern::Sinusoid { frequency: 50.0, amplitude: 5.0, offset: 0.0 }),
            ("Drift", SignalPattern::Ramp { start: 0.0, end: 50.0, duration: 30.0 }),
            ("Alpha bursts", SignalPattern::Burst {
                frequency: 10.0, amplitude: 30.0, on_duration: 2.0, off_duration: 3.0,
            }),
            ("Impulse", SignalPattern::Impulse),
            ("Counter", SignalPattern::Counter),
        ]
    }
}

impl Default for SignalPattern {
    fn default() -> Self {
        SignalPattern::Sinusoid {
            frequency: 10.0,
            amplitude: 20.0,
            offset: 0.0,
        }
    }
}
