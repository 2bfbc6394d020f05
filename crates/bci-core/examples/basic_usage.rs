//! Basic usage of the BCI-Core data model
//!
//! Walks through the pieces a filter chain exchanges: signal blocks and
//! their properties, the packed state vector, and declared parameters.

use bci_core::{
    BciResult, Matrix, ParamDefinition, ParamKind, ParamList, PhysicalUnit, Signal, SignalProperties,
    SignalType, State, StateList, StateVector,
};

fn main() -> BciResult<()> {
    println!("=== BCI-Core Basic Usage ===\n");

    signal_block_example()?;
    state_vector_example()?;
    parameter_example()?;

    println!("=== Done ===");
    Ok(())
}

/// Example 1: a 2x4 block at 250 Hz
fn signal_block_example() -> BciResult<()> {
    println!("1. Signal blocks");

    let properties = SignalProperties::new(2, 4)
        .with_type(SignalType::Float32)
        .with_element_unit(PhysicalUnit::seconds(1.0 / 250.0));
    let block = Signal::from_channels(
        properties,
        vec![vec![1.0, 2.0, 3.0, 4.0], vec![-1.0, -2.0, -3.0, -4.0]],
    )?;

    println!("   shape: {:?}", block.properties().shape());
    println!("   sample period: {:.4} s", block.properties().sample_period());
    println!("   channel 1: {:?}", block.channel(1));
    println!("   time vector: {:?}\n", block.time_vector());
    Ok(())
}

/// Example 2: states packed into a bit field
fn state_vector_example() -> BciResult<()> {
    println!("2. State vector");

    let mut states = StateList::new();
    states.add(State::new("Running", 1, 0)?)?;
    states.add(State::new("TargetCode", 4, 0)?)?;
    states.add(State::new("Feedback", 8, 0)?)?;
    println!("   {} states in {} bits", states.len(), states.bit_length());

    let mut vector = StateVector::new(&states);
    vector.set_value("TargetCode", 5)?;
    vector.begin_block();
    vector.set_value("TargetCode", 9)?;

    println!("   TargetCode: {} (was {})", vector.value("TargetCode")?, vector.previous_value("TargetCode")?);
    println!("   packed: {:02x?}", vector.as_bytes());

    if let Err(e) = vector.set_value("TargetCode", 16) {
        println!("   rejected: {}\n", e);
    }
    Ok(())
}

/// Example 3: declarations, defaults and range checks
fn parameter_example() -> BciResult<()> {
    println!("3. Parameters");

    let mut parameters = ParamList::new();
    parameters.declare(
        ParamDefinition::new("Filtering:FIR", "FIRIntegration", ParamKind::Int, 0i64)
            .range(0.0, 3.0)
            .describe("0 none, 1 mean, 2 rms, 3 max"),
    );
    parameters.declare(ParamDefinition::new(
        "Filtering:FIR",
        "FIRCoefficients",
        ParamKind::Matrix,
        Matrix::leading_ones(2),
    ));

    println!("   integration default: {}", parameters.int("FIRIntegration")?);

    parameters.set("FIRIntegration", 7i64);
    for error in parameters.validate() {
        println!("   invalid: {}", error);
    }
    println!();
    Ok(())
}
