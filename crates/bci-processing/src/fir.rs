//! FIR temporal filter with optional block-wise integration
//!
//! Each channel is convolved with one row of `FIRCoefficients`. A per-channel
//! ring buffer keeps the last `L - 1` samples of the previous block so the
//! convolution is continuous across block boundaries. With an integration
//! mode other than `None` every channel is reduced to a single value per
//! block and the element period grows by the block length.

use crate::environment::{Diagnostics, Environment};
use crate::filter::{FilterDeclaration, GenericFilter};
use crate::registry::FilterRegistry;
use bci_core::{
    config_error, processing_error, BciResult, Matrix, ParamDefinition, ParamKind, ParamList, ParamValue,
    Signal, SignalProperties,
};

pub const TYPE_NAME: &str = "FIRFilter";
pub const POSITION: &str = "2.C";

pub const COEFFICIENTS: &str = "FIRCoefficients";
pub const INTEGRATION: &str = "FIRIntegration";

const SECTION: &str = "Filtering:FIR";

/// Add the FIR filter to `registry` at its standard position
pub fn register(registry: &mut FilterRegistry) {
    registry.register(TYPE_NAME, POSITION, create);
}

fn create() -> Box<dyn GenericFilter> {
    Box::new(FirFilter::new())
}

/// Block-wise reduction applied after filtering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Integration {
    #[default]
    None,
    Mean,
    Rms,
    Max,
}

impl Integration {
    /// Decode the `FIRIntegration` parameter value
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Integration::None),
            1 => Some(Integration::Mean),
            2 => Some(Integration::Rms),
            3 => Some(Integration::Max),
            _ => None,
        }
    }

    pub fn code(&self) -> i64 {
        match self {
            Integration::None => 0,
            Integration::Mean => 1,
            Integration::Rms => 2,
            Integration::Max => 3,
        }
    }

    /// Whether the output holds one element per block
    pub fn reduces(&self) -> bool {
        *self != Integration::None
    }

    /// Reduce one filtered block; `None` keeps every sample
    fn apply(&self, filtered: &[f64]) -> Option<f64> {
        let n = filtered.len() as f64;
        match self {
            Integration::None => None,
            Integration::Mean => Some(filtered.iter().sum::<f64>() / n),
            Integration::Rms => Some((filtered.iter().map(|y| y * y).sum::<f64>() / n).sqrt()),
            Integration::Max => Some(filtered.iter().copied().fold(f64::NEG_INFINITY, f64::max)),
        }
    }
}

/// Per-channel FIR filter
#[derive(Debug, Default)]
pub struct FirFilter {
    /// Impulse response per input channel
    kernels: Vec<Vec<f64>>,
    /// `L + E - 1` most recent input samples per channel
    buffers: Vec<Vec<f64>>,
    /// Filtered samples of the current block, one channel at a time
    scratch: Vec<f64>,
    integration: Integration,
    enabled: bool,
}

impl FirFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn integration(&self) -> Integration {
        self.integration
    }

    fn violates_declaration(params: &ParamList, code: i64) -> bool {
        params
            .definition(INTEGRATION)
            .is_some_and(|definition| definition.check(&ParamValue::Int(code)).is_err())
    }

    fn integration_from(code: i64) -> BciResult<Integration> {
        Integration::from_code(code).ok_or_else(|| {
            config_error!(
                "{} value {} is unknown; use 0 (none), 1 (mean), 2 (rms) or 3 (max)",
                INTEGRATION,
                code
            )
        })
    }
}

impl GenericFilter for FirFilter {
    fn name(&self) -> &str {
        TYPE_NAME
    }

    fn declare(&self) -> BciResult<FilterDeclaration> {
        Ok(FilterDeclaration::new()
            .parameter(
                ParamDefinition::new(SECTION, COEFFICIENTS, ParamKind::Matrix, Matrix::leading_ones(4))
                    .describe("FIR filter coefficients, one row per channel"),
            )
            .parameter(
                ParamDefinition::new(SECTION, INTEGRATION, ParamKind::Int, 0i64)
                    .range(0.0, 3.0)
                    .describe("Integration: 0 none, 1 mean, 2 rms, 3 max"),
            ))
    }

    fn preflight(
        &self,
        env: &Environment,
        input: &SignalProperties,
        diagnostics: &mut Diagnostics,
    ) -> SignalProperties {
        let Some(params) = diagnostics.check(env.parameters()) else {
            return input.clone();
        };

        if let Some(coefficients) = diagnostics.check(params.matrix(COEFFICIENTS)) {
            if coefficients.rows() > input.channels() {
                diagnostics.report(config_error!(
                    "{} has {} rows, exceeding the {} input channels",
                    COEFFICIENTS,
                    coefficients.rows(),
                    input.channels()
                ));
            }
            if coefficients.is_empty() {
                return input.clone();
            }
        }

        let integration = diagnostics.check(params.int(INTEGRATION)).and_then(|code| {
            match Integration::from_code(code) {
                Some(integration) => Some(integration),
                // Already reported by parameter validation
                None if Self::violates_declaration(params, code) => None,
                None => diagnostics.check(Self::integration_from(code)),
            }
        });

        let mut output = input.clone();
        if integration.is_some_and(|i| i.reduces()) {
            output.set_elements(1);
            output.element_unit_mut().gain *= input.elements() as f64;
        }
        output
    }

    fn initialize(
        &mut self,
        env: &Environment,
        input: &SignalProperties,
        _output: &SignalProperties,
    ) -> BciResult<()> {
        let params = env.parameters()?;
        let coefficients = params.matrix(COEFFICIENTS)?;
        self.integration = Self::integration_from(params.int(INTEGRATION)?)?;
        self.enabled = !coefficients.is_empty();

        let elements = input.elements();
        self.kernels = (0..input.channels())
            .map(|ch| {
                if ch < coefficients.rows() {
                    coefficients.row(ch).to_vec()
                } else {
                    vec![1.0]
                }
            })
            .collect();
        self.buffers = self
            .kernels
            .iter()
            .map(|kernel| vec![0.0; kernel.len() + elements - 1])
            .collect();
        self.scratch = vec![0.0; elements];
        Ok(())
    }

    fn process(&mut self, _env: &mut Environment, input: &Signal, output: &mut Signal) -> BciResult<()> {
        if !self.enabled {
            return output.copy_from(input);
        }

        let elements = input.elements();
        if elements == 0 {
            return Ok(());
        }

        for (ch, (kernel, buffer)) in self.kernels.iter().zip(&mut self.buffers).enumerate() {
            let taps = kernel.len();

            buffer.copy_within(elements.., 0);
            let tail = buffer.len() - elements;
            buffer[tail..].copy_from_slice(input.channel(ch));

            for (s, y) in self.scratch.iter_mut().enumerate() {
                let newest = s + taps - 1;
                *y = kernel
                    .iter()
                    .enumerate()
                    .map(|(k, h)| h * buffer[newest - k])
                    .sum();
                if !y.is_finite() {
                    return Err(processing_error!(
                        TYPE_NAME,
                        "non-finite output on channel {} at sample {}",
                        ch,
                        s
                    ));
                }
            }

            match self.integration.apply(&self.scratch) {
                Some(value) => output[(ch, 0)] = value,
                None => output.channel_mut(ch).copy_from_slice(&self.scratch),
            }
        }
        Ok(())
    }

    fn halt(&mut self) {
        self.kernels = Vec::new();
        self.buffers = Vec::new();
        self.scratch = Vec::new();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::FilterChain;
    use crate::environment::Phase;
    use bci_core::{BciError, PhysicalUnit, StateList};

    fn environment(coefficients: Matrix, integration: i64) -> Environment {
        let mut params = ParamList::new();
        for definition in FirFilter::new().declare().unwrap().parameters {
            params.declare(definition);
        }
        params.set(COEFFICIENTS, coefficients);
        params.set(INTEGRATION, integration);
        let mut env = Environment::new(params, StateList::new());
        env.enter(Phase::Preflight);
        env
    }

    fn prepared(coefficients: Matrix, integration: i64, input: &SignalProperties) -> (FirFilter, Environment, Signal) {
        let env = environment(coefficients, integration);
        let mut diagnostics = Diagnostics::new();
        let mut filter = FirFilter::new();
        let output = filter.preflight(&env, input, &mut diagnostics);
        assert!(diagnostics.is_clean(), "{:?}", diagnostics.entries());
        filter.initialize(&env, input, &output).unwrap();
        (filter, env, Signal::new(output))
    }

    fn single_channel(values: &[f64]) -> Signal {
        Signal::from_channels(SignalProperties::new(1, values.len()), vec![values.to_vec()]).unwrap()
    }

    #[test]
    fn test_integration_codes() {
        assert_eq!(Integration::from_code(2), Some(Integration::Rms));
        assert_eq!(Integration::from_code(4), None);
        assert_eq!(Integration::Max.code(), 3);
        assert!(!Integration::None.reduces());
    }

    #[test]
    fn test_preflight_reduces_shape() {
        let input = SignalProperties::new(2, 8).with_element_unit(PhysicalUnit::seconds(0.004));
        let env = environment(Matrix::leading_ones(2), 1);
        let mut diagnostics = Diagnostics::new();

        let output = FirFilter::new().preflight(&env, &input, &mut diagnostics);
        assert!(diagnostics.is_clean());
        assert_eq!(output.shape(), (2, 1));
        assert!((output.sample_period() - 0.032).abs() < 1e-12);
    }

    #[test]
    fn test_preflight_rejects_extra_rows() {
        let env = environment(Matrix::leading_ones(4), 0);
        let mut diagnostics = Diagnostics::new();
        FirFilter::new().preflight(&env, &SignalProperties::new(2, 8), &mut diagnostics);
        assert_eq!(diagnostics.error_count(), 1);
    }

    #[test]
    fn test_preflight_rejects_unknown_integration() {
        // Without a declaration the filter is the only check
        let mut params = ParamList::new();
        params.set(COEFFICIENTS, Matrix::leading_ones(1));
        params.set(INTEGRATION, 7i64);
        let mut env = Environment::new(params, StateList::new());
        env.enter(Phase::Preflight);

        let mut diagnostics = Diagnostics::new();
        FirFilter::new().preflight(&env, &SignalProperties::new(1, 4), &mut diagnostics);
        assert_eq!(diagnostics.error_count(), 1);
    }

    #[test]
    fn test_out_of_range_integration_reported_once() {
        let mut registry = FilterRegistry::new();
        register(&mut registry);
        let mut chain = FilterChain::wrap_single(&registry.freeze().unwrap()).unwrap();
        let mut values = ParamList::new();
        values.set(COEFFICIENTS, Matrix::leading_ones(1));
        values.set(INTEGRATION, 7i64);
        chain.apply_parameters(&values).unwrap();

        assert!(chain.preflight(&SignalProperties::new(1, 4)).is_err());
        let entries = chain.diagnostics().entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].source, "Parameters");
        assert!(matches!(entries[0].error, BciError::ParameterRange { .. }));
    }

    #[test]
    fn test_moving_sum_spans_blocks() {
        let kernel = Matrix::from_rows(vec![vec![1.0, 1.0]]).unwrap();
        let (mut filter, mut env, mut output) = prepared(kernel, 0, &SignalProperties::new(1, 3));

        filter.process(&mut env, &single_channel(&[1.0, 2.0, 3.0]), &mut output).unwrap();
        assert_eq!(output.samples(), &[1.0, 3.0, 5.0]);

        filter.process(&mut env, &single_channel(&[4.0, 5.0, 6.0]), &mut output).unwrap();
        assert_eq!(output.samples(), &[7.0, 9.0, 11.0]);
    }

    #[test]
    fn test_delay_kernel() {
        let kernel = Matrix::from_rows(vec![vec![0.0, 1.0]]).unwrap();
        let (mut filter, mut env, mut output) = prepared(kernel, 0, &SignalProperties::new(1, 2));

        filter.process(&mut env, &single_channel(&[1.0, 2.0]), &mut output).unwrap();
        assert_eq!(output.samples(), &[0.0, 1.0]);
        filter.process(&mut env, &single_channel(&[3.0, 4.0]), &mut output).unwrap();
        assert_eq!(output.samples(), &[2.0, 3.0]);
    }

    #[test]
    fn test_max_integration() {
        let kernel = Matrix::from_rows(vec![vec![1.0]]).unwrap();
        let (mut filter, mut env, mut output) = prepared(kernel, 3, &SignalProperties::new(1, 4));

        filter.process(&mut env, &single_channel(&[-1.0, 7.0, 2.0, 3.0]), &mut output).unwrap();
        assert_eq!(output.samples(), &[7.0]);
    }

    #[test]
    fn test_extra_channels_use_identity() {
        let kernel = Matrix::from_rows(vec![vec![2.0]]).unwrap();
        let (mut filter, mut env, mut output) = prepared(kernel, 1, &SignalProperties::new(2, 2));

        let input = Signal::from_channels(
            SignalProperties::new(2, 2),
            vec![vec![1.0, 3.0], vec![4.0, 6.0]],
        )
        .unwrap();
        filter.process(&mut env, &input, &mut output).unwrap();
        assert_eq!(output.samples(), &[4.0, 5.0]);
    }

    #[test]
    fn test_non_finite_output_is_error() {
        let kernel = Matrix::from_rows(vec![vec![1.0]]).unwrap();
        let (mut filter, mut env, mut output) = prepared(kernel, 0, &SignalProperties::new(1, 2));

        let err = filter
            .process(&mut env, &single_channel(&[1.0, f64::NAN]), &mut output)
            .unwrap_err();
        assert_eq!(err.kind(), bci_core::ErrorKind::Runtime);
    }

    #[test]
    fn test_initialize_resets_history() {
        let kernel = Matrix::from_rows(vec![vec![0.0, 1.0]]).unwrap();
        let input = SignalProperties::new(1, 2);
        let (mut filter, mut env, mut output) = prepared(kernel, 0, &input);

        filter.process(&mut env, &single_channel(&[5.0, 6.0]), &mut output).unwrap();
        filter.initialize(&env, &input, output.properties()).unwrap();
        filter.process(&mut env, &single_channel(&[1.0, 2.0]), &mut output).unwrap();
        assert_eq!(output.samples(), &[0.0, 1.0]);
    }
}
