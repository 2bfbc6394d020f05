//! Parameters: declared, typed configuration values resolved before preflight

use crate::error::{BciError, BciResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Dense row-major matrix of numeric parameter values
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(try_from = "Vec<Vec<f64>>", into = "Vec<Vec<f64>>")]
pub struct Matrix {
    rows: usize,
    columns: usize,
    values: Vec<f64>,
}

impl Matrix {
    pub fn new(rows: usize, columns: usize) -> Self {
        Self {
            rows,
            columns,
            values: vec![0.0; rows * columns],
        }
    }

    /// Matrix with every entry set to `value`
    pub fn filled(rows: usize, columns: usize, value: f64) -> Self {
        Self {
            rows,
            columns,
            values: vec![value; rows * columns],
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Build from rows of equal length
    pub fn from_rows(rows: Vec<Vec<f64>>) -> BciResult<Self> {
        let columns = rows.first().map_or(0, |r| r.len());
        if rows.iter().any(|r| r.len() != columns) {
            return Err(BciError::Configuration {
                message: "matrix rows must all have the same length".to_string(),
            });
        }
        let n_rows = if columns == 0 { 0 } else { rows.len() };

        Ok(Self {
            rows: n_rows,
            columns,
            values: rows.into_iter().flatten().collect(),
        })
    }

    /// Square matrix with a leading 1 in every row
    pub fn leading_ones(size: usize) -> Self {
        let mut matrix = Self::new(size, size);
        for row in 0..size {
            matrix.values[row * size] = 1.0;
        }
        matrix
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn columns(&self) -> usize {
        self.columns
    }

    /// Total number of values
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, row: usize, column: usize) -> f64 {
        self.values[row * self.columns + column]
    }

    pub fn row(&self, row: usize) -> &[f64] {
        &self.values[row * self.columns..(row + 1) * self.columns]
    }
}

impl TryFrom<Vec<Vec<f64>>> for Matrix {
    type Error = String;

    fn try_from(rows: Vec<Vec<f64>>) -> Result<Self, Self::Error> {
        Matrix::from_rows(rows).map_err(|e| e.to_string())
    }
}

impl From<Matrix> for Vec<Vec<f64>> {
    fn from(matrix: Matrix) -> Self {
        (0..matrix.rows).map(|r| matrix.row(r).to_vec()).collect()
    }
}

/// Parameter value types for flexible configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Int(i64),
    Float(f64),
    Text(String),
    Matrix(Matrix),
    List(Vec<f64>),
}

/// Kind of value a parameter declaration accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParamKind {
    Int,
    Float,
    Text,
    List,
    Matrix,
}

impl ParamKind {
    pub fn name(&self) -> &'static str {
        match self {
            ParamKind::Int => "an integer",
            ParamKind::Float => "a number",
            ParamKind::Text => "a string",
            ParamKind::List => "a list of numbers",
            ParamKind::Matrix => "a matrix",
        }
    }

    fn accepts(&self, value: &ParamValue) -> bool {
        match (self, value) {
            (ParamKind::Int, ParamValue::Int(_)) => true,
            (ParamKind::Int, ParamValue::Float(v)) => v.fract() == 0.0,
            (ParamKind::Float, ParamValue::Float(_) | ParamValue::Int(_)) => true,
            (ParamKind::Text, ParamValue::Text(_)) => true,
            (ParamKind::List, ParamValue::List(_)) => true,
            (ParamKind::Matrix, ParamValue::Matrix(_)) => true,
            (ParamKind::Matrix, ParamValue::List(v)) => v.is_empty(),
            _ => false,
        }
    }
}

impl ParamValue {
    /// Convert to f64 if possible
    pub fn as_float(&self) -> Option<f64> {
        match self {
            ParamValue::Float(v) => Some(*v),
            ParamValue::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    /// Convert to i64 if possible; floats must be integral
    pub fn as_int(&self) -> Option<i64> {
        match self {
            ParamValue::Int(v) => Some(*v),
            ParamValue::Float(v) if v.fract() == 0.0 => Some(*v as i64),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            ParamValue::Text(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_matrix(&self) -> Option<Matrix> {
        match self {
            ParamValue::Matrix(m) => Some(m.clone()),
            // An empty JSON array cannot be told apart from an empty list
            ParamValue::List(v) if v.is_empty() => Some(Matrix::empty()),
            _ => None,
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Int(v) => write!(f, "{}", v),
            ParamValue::Float(v) => write!(f, "{}", v),
            ParamValue::Text(v) => write!(f, "{}", v),
            ParamValue::List(v) => write!(f, "{:?}", v),
            ParamValue::Matrix(m) => write!(f, "{}x{} matrix", m.rows(), m.columns()),
        }
    }
}

impl From<i64> for ParamValue {
    fn from(value: i64) -> Self {
        ParamValue::Int(value)
    }
}

impl From<f64> for ParamValue {
    fn from(value: f64) -> Self {
        ParamValue::Float(value)
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        ParamValue::Text(value.to_string())
    }
}

impl From<Vec<f64>> for ParamValue {
    fn from(value: Vec<f64>) -> Self {
        ParamValue::List(value)
    }
}

impl From<Matrix> for ParamValue {
    fn from(value: Matrix) -> Self {
        ParamValue::Matrix(value)
    }
}

/// Declaration of a parameter as published by a filter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamDefinition {
    pub name: String,
    /// Category path, e.g. "Filtering:FIR"
    pub section: String,
    pub kind: ParamKind,
    pub default: ParamValue,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub description: String,
}

impl ParamDefinition {
    pub fn new(section: &str, name: &str, kind: ParamKind, default: impl Into<ParamValue>) -> Self {
        Self {
            name: name.to_string(),
            section: section.to_string(),
            kind,
            default: default.into(),
            min: None,
            max: None,
            description: String::new(),
        }
    }

    pub fn range(mut self, min: f64, max: f64) -> Self {
        self.min = Some(min);
        self.max = Some(max);
        self
    }

    pub fn describe(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    /// Check a value against kind and bounds
    pub fn check(&self, value: &ParamValue) -> BciResult<()> {
        if !self.kind.accepts(value) {
            return Err(BciError::ParameterType {
                name: self.name.clone(),
                expected: self.kind.name(),
            });
        }

        if let Some(v) = value.as_float() {
            let below = self.min.is_some_and(|min| v < min);
            let above = self.max.is_some_and(|max| v > max);
            if below || above {
                return Err(BciError::ParameterRange {
                    name: self.name.clone(),
                    value: v,
                    min: self.min,
                    max: self.max,
                });
            }
        }

        Ok(())
    }
}

/// Resolved parameter set: name to value, plus the declarations seen so far
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParamList {
    values: BTreeMap<String, ParamValue>,
    #[serde(skip)]
    definitions: BTreeMap<String, ParamDefinition>,
}

impl ParamList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a declaration; its default fills in a missing value
    pub fn declare(&mut self, definition: ParamDefinition) {
        self.values
            .entry(definition.name.clone())
            .or_insert_with(|| definition.default.clone());
        self.definitions.insert(definition.name.clone(), definition);
    }

    pub fn set(&mut self, name: &str, value: impl Into<ParamValue>) {
        self.values.insert(name.to_string(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.values.get(name)
    }

    pub fn definition(&self, name: &str) -> Option<&ParamDefinition> {
        self.definitions.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ParamValue)> {
        self.values.iter()
    }

    pub fn value(&self, name: &str) -> BciResult<&ParamValue> {
        self.get(name).ok_or_else(|| BciError::UnknownParameter {
            name: name.to_string(),
        })
    }

    pub fn int(&self, name: &str) -> BciResult<i64> {
        self.value(name)?.as_int().ok_or_else(|| BciError::ParameterType {
            name: name.to_string(),
            expected: ParamKind::Int.name(),
        })
    }

    pub fn float(&self, name: &str) -> BciResult<f64> {
        self.value(name)?.as_float().ok_or_else(|| BciError::ParameterType {
            name: name.to_string(),
            expected: ParamKind::Float.name(),
        })
    }

    pub fn matrix(&self, name: &str) -> BciResult<Matrix> {
        self.value(name)?.as_matrix().ok_or_else(|| BciError::ParameterType {
            name: name.to_string(),
            expected: ParamKind::Matrix.name(),
        })
    }

    /// Copy values from `other`, overriding existing ones
    pub fn merge(&mut self, other: &ParamList) {
        for (name, value) in other.iter() {
            self.values.insert(name.clone(), value.clone());
        }
    }

    /// Check every declared parameter; returns all violations
    pub fn validate(&self) -> Vec<BciError> {
        self.definitions
            .values()
            .filter_map(|def| match self.values.get(&def.name) {
                Some(value) => def.check(value).err(),
                None => Some(BciError::UnknownParameter {
                    name: def.name.clone(),
                }),
            })
            .collect()
    }
}
