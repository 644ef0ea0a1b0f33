//! Axis value representations.
//!
//! An axis carries the coordinate values that give meaning to integer indices along one
//! dimension. Values may be a compact arithmetic range, an explicit sequence, a list of
//! labels, or nothing at all.
//!
use serde_json::{json, Value};

use crate::{
    buffer::ArrayData,
    errors::{Error, Result},
};

/// An evenly spaced sequence of integers.
///
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IntRange {
    pub start: i64,
    pub step: i64,
    pub steps: usize,
}

impl IntRange {
    pub fn new(start: i64, step: i64, steps: usize) -> Self {
        assert!(step != 0, "range step must be nonzero");
        Self { start, step, steps }
    }

    pub fn len(&self) -> usize {
        self.steps
    }

    pub fn is_empty(&self) -> bool {
        self.steps == 0
    }

    pub fn get(&self, index: usize) -> i64 {
        assert!(index < self.steps, "index out of bounds");
        self.start + self.step * index as i64
    }

    pub fn slice(&self, start: usize, end: usize) -> Self {
        assert!(start <= end && end <= self.steps, "slice out of bounds");
        Self {
            start: self.start + self.step * start as i64,
            step: self.step,
            steps: end - start,
        }
    }
}

/// An evenly spaced sequence of floats.
///
#[derive(Clone, Debug, PartialEq)]
pub struct FloatRange {
    pub start: f64,
    pub step: f64,
    pub steps: usize,
}

impl FloatRange {
    pub fn new(start: f64, step: f64, steps: usize) -> Self {
        assert!(step != 0.0, "range step must be nonzero");
        Self { start, step, steps }
    }

    pub fn len(&self) -> usize {
        self.steps
    }

    pub fn is_empty(&self) -> bool {
        self.steps == 0
    }

    pub fn get(&self, index: usize) -> f64 {
        assert!(index < self.steps, "index out of bounds");
        self.start + self.step * index as f64
    }

    pub fn slice(&self, start: usize, end: usize) -> Self {
        assert!(start <= end && end <= self.steps, "slice out of bounds");
        Self {
            start: self.start + self.step * start as f64,
            step: self.step,
            steps: end - start,
        }
    }
}

/// How an axis resolves values to indices.
///
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AxisKind {
    /// Evenly spaced numeric values, representable as a range.
    Regular,

    /// Numeric values with no regular spacing.
    Irregular,

    /// String labels.
    Categorical,

    /// No values, only positions.
    Positional,
}

/// The coordinate values along one axis.
///
#[derive(Clone, Debug, PartialEq)]
pub enum AxisValues {
    RangeI64(IntRange),
    RangeF64(FloatRange),
    SeqI64(Vec<i64>),
    SeqF64(Vec<f64>),
    Labels(Vec<String>),
    Bare(usize),
}

impl AxisValues {
    pub fn len(&self) -> usize {
        match self {
            Self::RangeI64(range) => range.len(),
            Self::RangeF64(range) => range.len(),
            Self::SeqI64(values) => values.len(),
            Self::SeqF64(values) => values.len(),
            Self::Labels(labels) => labels.len(),
            Self::Bare(len) => *len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn kind(&self) -> AxisKind {
        match self {
            Self::RangeI64(_) | Self::RangeF64(_) => AxisKind::Regular,
            Self::SeqI64(_) | Self::SeqF64(_) => AxisKind::Irregular,
            Self::Labels(_) => AxisKind::Categorical,
            Self::Bare(_) => AxisKind::Positional,
        }
    }

    /// Materialize numeric values, widened to `f64`. `None` for non-numeric axes.
    ///
    pub fn numeric(&self) -> Option<Vec<f64>> {
        match self {
            Self::RangeI64(range) => Some((0..range.len()).map(|i| range.get(i) as f64).collect()),
            Self::RangeF64(range) => Some((0..range.len()).map(|i| range.get(i)).collect()),
            Self::SeqI64(values) => Some(values.iter().map(|&v| v as f64).collect()),
            Self::SeqF64(values) => Some(values.clone()),
            Self::Labels(_) | Self::Bare(_) => None,
        }
    }

    /// Materialize integer values. `None` unless every value is an integer.
    ///
    pub fn integers(&self) -> Option<Vec<i64>> {
        match self {
            Self::RangeI64(range) => Some((0..range.len()).map(|i| range.get(i)).collect()),
            Self::SeqI64(values) => Some(values.clone()),
            _ => None,
        }
    }

    /// Whether two axes carry the same values, regardless of representation.
    ///
    pub fn same_values(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Labels(left), Self::Labels(right)) => left == right,
            (Self::Bare(left), Self::Bare(right)) => left == right,
            (Self::Labels(_) | Self::Bare(_), _) | (_, Self::Labels(_) | Self::Bare(_)) => false,
            _ => match (self.numeric(), other.numeric()) {
                (Some(left), Some(right)) => {
                    left.len() == right.len()
                        && left.iter().zip(&right).all(|(l, r)| l == r)
                }
                _ => false,
            },
        }
    }

    pub fn slice(&self, start: usize, end: usize) -> Self {
        assert!(start <= end && end <= self.len(), "slice out of bounds");
        match self {
            Self::RangeI64(range) => Self::RangeI64(range.slice(start, end)),
            Self::RangeF64(range) => Self::RangeF64(range.slice(start, end)),
            Self::SeqI64(values) => Self::SeqI64(values[start..end].to_vec()),
            Self::SeqF64(values) => Self::SeqF64(values[start..end].to_vec()),
            Self::Labels(labels) => Self::Labels(labels[start..end].to_vec()),
            Self::Bare(_) => Self::Bare(end - start),
        }
    }

    /// Concatenate axis values end to end.
    ///
    /// All parts must be of the same kind class. Numeric parts stay integers when every
    /// part is an integer kind, and widen to floats otherwise. Ranges are not reconstituted.
    ///
    pub fn concat(parts: &[&AxisValues]) -> AxisValues {
        assert!(!parts.is_empty(), "concat requires at least one part");
        match parts[0] {
            Self::Labels(_) => {
                let mut labels = vec![];
                for part in parts {
                    match part {
                        Self::Labels(more) => labels.extend(more.iter().cloned()),
                        _ => panic!("cannot concatenate labels with non-labels"),
                    }
                }
                Self::Labels(labels)
            }
            Self::Bare(_) => Self::Bare(parts.iter().map(|part| part.len()).sum()),
            _ => {
                if parts.iter().all(|part| part.integers().is_some()) {
                    let mut values = vec![];
                    for part in parts {
                        values.extend(part.integers().unwrap());
                    }
                    Self::SeqI64(values)
                } else {
                    let mut values = vec![];
                    for part in parts {
                        values.extend(
                            part.numeric()
                                .expect("cannot concatenate numeric values with non-numeric"),
                        );
                    }
                    Self::SeqF64(values)
                }
            }
        }
    }

    /// The JSON form used to persist range and label axes inline. `None` for kinds that
    /// are persisted some other way.
    ///
    pub fn to_json(&self) -> Option<Value> {
        match self {
            Self::RangeI64(range) => Some(json!({
                "range": {"start": range.start, "step": range.step, "steps": range.steps},
            })),
            Self::RangeF64(range) => Some(json!({
                "range": {"start": range.start, "step": range.step, "steps": range.steps},
            })),
            Self::Labels(labels) => Some(json!({ "labels": labels })),
            Self::SeqI64(_) | Self::SeqF64(_) | Self::Bare(_) => None,
        }
    }

    pub fn from_json(value: &Value) -> Result<Self> {
        if let Some(range) = value.get("range") {
            let start = range
                .get("start")
                .ok_or_else(|| Error::Corrupt("range is missing start".into()))?;
            let step = range
                .get("step")
                .ok_or_else(|| Error::Corrupt("range is missing step".into()))?;
            let steps = range
                .get("steps")
                .and_then(Value::as_u64)
                .ok_or_else(|| Error::Corrupt("range is missing steps".into()))?
                as usize;

            if start.is_i64() && step.is_i64() {
                return Ok(Self::RangeI64(IntRange::new(
                    start.as_i64().unwrap(),
                    step.as_i64().unwrap(),
                    steps,
                )));
            }

            let start = start
                .as_f64()
                .ok_or_else(|| Error::Corrupt("range start is not a number".into()))?;
            let step = step
                .as_f64()
                .ok_or_else(|| Error::Corrupt("range step is not a number".into()))?;

            return Ok(Self::RangeF64(FloatRange::new(start, step, steps)));
        }

        if let Some(labels) = value.get("labels") {
            let labels = labels
                .as_array()
                .ok_or_else(|| Error::Corrupt("labels is not an array".into()))?
                .iter()
                .map(|label| {
                    label
                        .as_str()
                        .map(String::from)
                        .ok_or_else(|| Error::Corrupt("label is not a string".into()))
                })
                .collect::<Result<Vec<String>>>()?;

            return Ok(Self::Labels(labels));
        }

        Err(Error::Corrupt(format!("unrecognized axis values: {value}")))
    }

    /// Axis values from a one dimensional coordinate array.
    ///
    pub fn from_data(data: &ArrayData) -> Self {
        assert_eq!(data.shape().len(), 1, "coordinate array must be 1-dimensional");
        match data {
            ArrayData::I32(values) => Self::SeqI64(values.iter().map(|&v| v as i64).collect()),
            ArrayData::I64(values) => Self::SeqI64(values.iter().copied().collect()),
            ArrayData::F32(values) => Self::SeqF64(values.iter().map(|&v| v as f64).collect()),
            ArrayData::F64(values) => Self::SeqF64(values.iter().copied().collect()),
        }
    }

    /// A one dimensional coordinate array holding these values. `None` for non-numeric axes.
    ///
    pub fn to_data(&self) -> Option<ArrayData> {
        if let Some(values) = self.integers() {
            return Some(ArrayData::I64(ndarray::ArrayD::from_shape_vec(
                ndarray::IxDyn(&[values.len()]),
                values,
            ).unwrap()));
        }

        let values = self.numeric()?;
        Some(ArrayData::F64(ndarray::ArrayD::from_shape_vec(
            ndarray::IxDyn(&[values.len()]),
            values,
        ).unwrap()))
    }
}
