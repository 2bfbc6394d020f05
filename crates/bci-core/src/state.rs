//! Named fixed-width state variables and their packed per-block vector

use crate::error::{BciError, BciResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Largest supported state width in bits
pub const MAX_STATE_BITS: u32 = 64;

/// A named unsigned integer variable tracked alongside the signal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct State {
    name: String,
    bit_width: u32,
    default: u64,
    /// Bit offset inside the packed vector, assigned by the list
    #[serde(skip)]
    location: usize,
}

impl State {
    pub fn new(name: &str, bit_width: u32, default: u64) -> BciResult<Self> {
        if bit_width == 0 || bit_width > MAX_STATE_BITS {
            return Err(BciError::StateWidth {
                name: name.to_string(),
                bits: bit_width,
            });
        }
        check_fits(name, default, bit_width)?;

        Ok(Self {
            name: name.to_string(),
            bit_width,
            default,
            location: 0,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bit_width(&self) -> u32 {
        self.bit_width
    }

    pub fn default_value(&self) -> u64 {
        self.default
    }

    pub fn location(&self) -> usize {
        self.location
    }
}

fn check_fits(name: &str, value: u64, bits: u32) -> BciResult<()> {
    if bits < MAX_STATE_BITS && value >> bits != 0 {
        return Err(BciError::StateOverflow {
            name: name.to_string(),
            value,
            bits,
        });
    }
    Ok(())
}

/// Ordered set of states; locations follow insertion order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateList {
    states: Vec<State>,
    index: HashMap<String, usize>,
    bit_length: usize,
}

impl StateList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a state; re-adding an identical width is a no-op
    pub fn add(&mut self, mut state: State) -> BciResult<()> {
        if let Some(&i) = self.index.get(state.name()) {
            let existing = &self.states[i];
            if existing.bit_width != state.bit_width {
                return Err(BciError::StateWidth {
                    name: state.name,
                    bits: state.bit_width,
                });
            }
            return Ok(());
        }

        state.location = self.bit_length;
        self.bit_length += state.bit_width as usize;
        self.index.insert(state.name.clone(), self.states.len());
        self.states.push(state);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&State> {
        self.index.get(name).map(|&i| &self.states[i])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &State> {
        self.states.iter()
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Total width of all states in bits
    pub fn bit_length(&self) -> usize {
        self.bit_length
    }

    /// Size of the packed vector in bytes
    pub fn byte_length(&self) -> usize {
        self.bit_length.div_ceil(8)
    }
}

/// Packed bit-field snapshot of all states, double-buffered per block
///
/// `previous` holds the values as they were when the current block started;
/// `current` receives writes made while the block travels the chain.
#[derive(Debug, Clone, PartialEq)]
pub struct StateVector {
    list: Arc<StateList>,
    current: Vec<u8>,
    previous: Vec<u8>,
}

impl StateVector {
    /// Allocate a vector for `list`, filled with the states' defaults
    pub fn new(list: &StateList) -> Self {
        let list = Arc::new(list.clone());
        let mut current = vec![0u8; list.byte_length()];
        for state in list.iter() {
            write_bits(&mut current, state.location, state.bit_width, state.default);
        }

        Self {
            previous: current.clone(),
            current,
            list,
        }
    }

    pub fn state_list(&self) -> &StateList {
        &self.list
    }

    /// Start a new block: the current values become the "before" snapshot
    pub fn begin_block(&mut self) {
        self.previous.copy_from_slice(&self.current);
    }

    pub fn value(&self, name: &str) -> BciResult<u64> {
        let state = self.lookup(name)?;
        Ok(read_bits(&self.current, state.location, state.bit_width))
    }

    /// Value at the start of the current block
    pub fn previous_value(&self, name: &str) -> BciResult<u64> {
        let state = self.lookup(name)?;
        Ok(read_bits(&self.previous, state.location, state.bit_width))
    }

    pub fn set_value(&mut self, name: &str, value: u64) -> BciResult<()> {
        let (location, bits) = {
            let state = self.lookup(name)?;
            (state.location, state.bit_width)
        };
        check_fits(name, value, bits)?;
        write_bits(&mut self.current, location, bits, value);
        Ok(())
    }

    /// Restore every state to its declared default
    pub fn reset(&mut self) {
        for state in self.list.iter() {
            write_bits(&mut self.current, state.location, state.bit_width, state.default);
        }
        self.previous.copy_from_slice(&self.current);
    }

    /// Packed little-endian bit representation of the current values
    pub fn as_bytes(&self) -> &[u8] {
        &self.current
    }

    pub fn byte_length(&self) -> usize {
        self.current.len()
    }

    fn lookup(&self, name: &str) -> BciResult<&State> {
        self.list.get(name).ok_or_else(|| BciError::UnknownState {
            name: name.to_string(),
        })
    }
}

fn read_bits(bytes: &[u8], location: usize, width: u32) -> u64 {
    let mut value = 0u64;
    for bit in 0..width as usize {
        let pos = location + bit;
        if bytes[pos / 8] & (1 << (pos % 8)) != 0 {
            value |= 1 << bit;
        }
    }
    value
}

fn write_bits(bytes: &mut [u8], location: usize, width: u32, value: u64) {
    for bit in 0..width as usize {
        let pos = location + bit;
        let mask = 1u8 << (pos % 8);
        if value & (1 << bit) != 0 {
            bytes[pos / 8] |= mask;
        } else {
            bytes[pos / 8] &= !mask;
        }
    }
}
