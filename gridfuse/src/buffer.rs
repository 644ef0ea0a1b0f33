//! Typed array storage and mutable destination buffers.
//!
use ndarray::{ArrayD, ArrayViewMutD, Axis, IxDyn, Slice};
use serde::{Deserialize, Serialize};

use crate::{
    errors::{Error, Result},
    geom::Window,
};

/// The element type of a cube, as stored.
///
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum Encoding {
    I32 = 4,
    I64 = 8,
    F32 = 32,
    F64 = 64,
}

impl Encoding {
    /// Size of one element, in bytes.
    ///
    pub fn size(&self) -> usize {
        match self {
            Encoding::I32 | Encoding::F32 => 4,
            Encoding::I64 | Encoding::F64 => 8,
        }
    }

    pub fn is_float(&self) -> bool {
        matches!(self, Encoding::F32 | Encoding::F64)
    }

    /// The sentinel used for cells no source provides a value for.
    ///
    pub fn default_fill(&self) -> f64 {
        match self {
            Encoding::I32 => i32::MIN as f64,
            Encoding::I64 => i64::MIN as f64,
            Encoding::F32 | Encoding::F64 => f64::NAN,
        }
    }
}

impl TryFrom<u8> for Encoding {
    type Error = Error;

    fn try_from(code: u8) -> Result<Self> {
        match code {
            4 => Ok(Encoding::I32),
            8 => Ok(Encoding::I64),
            32 => Ok(Encoding::F32),
            64 => Ok(Encoding::F64),
            _ => Err(Error::Corrupt(format!("unrecognized encoding: {code}"))),
        }
    }
}

/// An owned n-dimensional array of any supported element type.
///
#[derive(Clone, Debug, PartialEq)]
pub enum ArrayData {
    I32(ArrayD<i32>),
    I64(ArrayD<i64>),
    F32(ArrayD<f32>),
    F64(ArrayD<f64>),
}

impl ArrayData {
    pub fn zeros(encoding: Encoding, shape: &[usize]) -> Self {
        match encoding {
            Encoding::I32 => Self::I32(ArrayD::zeros(IxDyn(shape))),
            Encoding::I64 => Self::I64(ArrayD::zeros(IxDyn(shape))),
            Encoding::F32 => Self::F32(ArrayD::zeros(IxDyn(shape))),
            Encoding::F64 => Self::F64(ArrayD::zeros(IxDyn(shape))),
        }
    }

    pub fn filled(encoding: Encoding, shape: &[usize], value: f64) -> Self {
        let mut data = Self::zeros(encoding, shape);
        data.buffer().fill(value);

        data
    }

    pub fn encoding(&self) -> Encoding {
        match self {
            Self::I32(_) => Encoding::I32,
            Self::I64(_) => Encoding::I64,
            Self::F32(_) => Encoding::F32,
            Self::F64(_) => Encoding::F64,
        }
    }

    pub fn shape(&self) -> &[usize] {
        match self {
            Self::I32(data) => data.shape(),
            Self::I64(data) => data.shape(),
            Self::F32(data) => data.shape(),
            Self::F64(data) => data.shape(),
        }
    }

    /// Number of elements.
    ///
    pub fn len(&self) -> usize {
        self.shape().iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy out the subarray covered by `window`.
    ///
    pub fn slice(&self, window: &Window) -> Self {
        assert_eq!(window.ndim(), self.shape().len());
        let subarray = |ax: ndarray::AxisDescription| Slice::from(window.axis(ax.axis().index()).clone());
        match self {
            Self::I32(data) => Self::I32(data.slice_each_axis(subarray).to_owned()),
            Self::I64(data) => Self::I64(data.slice_each_axis(subarray).to_owned()),
            Self::F32(data) => Self::F32(data.slice_each_axis(subarray).to_owned()),
            Self::F64(data) => Self::F64(data.slice_each_axis(subarray).to_owned()),
        }
    }

    /// A mutable view of the whole array.
    ///
    pub fn buffer(&mut self) -> ArrayBuffer<'_> {
        match self {
            Self::I32(data) => ArrayBuffer::I32(data.view_mut()),
            Self::I64(data) => ArrayBuffer::I64(data.view_mut()),
            Self::F32(data) => ArrayBuffer::F32(data.view_mut()),
            Self::F64(data) => ArrayBuffer::F64(data.view_mut()),
        }
    }

    /// Read a single element, widened to `f64`.
    ///
    pub fn get(&self, coord: &[usize]) -> f64 {
        match self {
            Self::I32(data) => data[IxDyn(coord)] as f64,
            Self::I64(data) => data[IxDyn(coord)] as f64,
            Self::F32(data) => data[IxDyn(coord)] as f64,
            Self::F64(data) => data[IxDyn(coord)],
        }
    }
}

impl From<ArrayD<i32>> for ArrayData {
    fn from(data: ArrayD<i32>) -> Self {
        Self::I32(data)
    }
}

impl From<ArrayD<i64>> for ArrayData {
    fn from(data: ArrayD<i64>) -> Self {
        Self::I64(data)
    }
}

impl From<ArrayD<f32>> for ArrayData {
    fn from(data: ArrayD<f32>) -> Self {
        Self::F32(data)
    }
}

impl From<ArrayD<f64>> for ArrayData {
    fn from(data: ArrayD<f64>) -> Self {
        Self::F64(data)
    }
}

/// A mutable destination for window reads.
///
/// `slice` hands out views with the buffer's own lifetime rather than a reborrow, so that
/// non-overlapping subwindows of one destination can be filled concurrently. Callers are
/// responsible for keeping the slices disjoint.
///
pub enum ArrayBuffer<'a> {
    I32(ArrayViewMutD<'a, i32>),
    I64(ArrayViewMutD<'a, i64>),
    F32(ArrayViewMutD<'a, f32>),
    F64(ArrayViewMutD<'a, f64>),
}

impl<'a> ArrayBuffer<'a> {
    pub fn encoding(&self) -> Encoding {
        match self {
            Self::I32(_) => Encoding::I32,
            Self::I64(_) => Encoding::I64,
            Self::F32(_) => Encoding::F32,
            Self::F64(_) => Encoding::F64,
        }
    }

    pub fn shape(&self) -> &[usize] {
        match self {
            Self::I32(view) => view.shape(),
            Self::I64(view) => view.shape(),
            Self::F32(view) => view.shape(),
            Self::F64(view) => view.shape(),
        }
    }

    /// Get a mutable view of a subwindow of this buffer.
    ///
    pub fn slice(&mut self, window: &Window) -> ArrayBuffer<'a> {
        assert_eq!(window.ndim(), self.shape().len());
        let subarray = |ax: ndarray::AxisDescription| Slice::from(window.axis(ax.axis().index()).clone());
        match self {
            Self::I32(view) => ArrayBuffer::I32(unsafe {
                view.slice_each_axis_mut(subarray)
                    .raw_view_mut()
                    .deref_into_view_mut()
            }),
            Self::I64(view) => ArrayBuffer::I64(unsafe {
                view.slice_each_axis_mut(subarray)
                    .raw_view_mut()
                    .deref_into_view_mut()
            }),
            Self::F32(view) => ArrayBuffer::F32(unsafe {
                view.slice_each_axis_mut(subarray)
                    .raw_view_mut()
                    .deref_into_view_mut()
            }),
            Self::F64(view) => ArrayBuffer::F64(unsafe {
                view.slice_each_axis_mut(subarray)
                    .raw_view_mut()
                    .deref_into_view_mut()
            }),
        }
    }

    /// Get a view of this buffer with one axis removed at a fixed index.
    ///
    pub fn index_axis(&mut self, dimension: usize, index: usize) -> ArrayBuffer<'a> {
        match self {
            Self::I32(view) => ArrayBuffer::I32(unsafe {
                view.index_axis_mut(Axis(dimension), index)
                    .raw_view_mut()
                    .deref_into_view_mut()
            }),
            Self::I64(view) => ArrayBuffer::I64(unsafe {
                view.index_axis_mut(Axis(dimension), index)
                    .raw_view_mut()
                    .deref_into_view_mut()
            }),
            Self::F32(view) => ArrayBuffer::F32(unsafe {
                view.index_axis_mut(Axis(dimension), index)
                    .raw_view_mut()
                    .deref_into_view_mut()
            }),
            Self::F64(view) => ArrayBuffer::F64(unsafe {
                view.index_axis_mut(Axis(dimension), index)
                    .raw_view_mut()
                    .deref_into_view_mut()
            }),
        }
    }

    /// Set every element to `value`, narrowed to the element type.
    ///
    pub fn fill(&mut self, value: f64) {
        match self {
            Self::I32(view) => view.fill(value as i32),
            Self::I64(view) => view.fill(value as i64),
            Self::F32(view) => view.fill(value as f32),
            Self::F64(view) => view.fill(value),
        }
    }

    /// Copy `data` into this buffer. Shapes and encodings must match.
    ///
    pub fn assign(&mut self, data: &ArrayData) {
        match (self, data) {
            (Self::I32(view), ArrayData::I32(data)) => view.assign(data),
            (Self::I64(view), ArrayData::I64(data)) => view.assign(data),
            (Self::F32(view), ArrayData::F32(data)) => view.assign(data),
            (Self::F64(view), ArrayData::F64(data)) => view.assign(data),
            (view, data) => panic!(
                "encoding mismatch: {:?} buffer, {:?} data",
                view.encoding(),
                data.encoding()
            ),
        }
    }
}
