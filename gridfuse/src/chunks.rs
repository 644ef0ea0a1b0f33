//! Chunk layout of an array, as per-axis block extents.
//!
use std::ops::Range;

use crate::geom::Window;

/// The chunk layout of an n-dimensional array.
///
/// Each axis is described by the extents of its consecutive blocks, so irregular layouts,
/// like the short leading block produced by a chunk offset, are represented directly.
///
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChunkGeometry {
    axes: Vec<Vec<usize>>,
}

impl ChunkGeometry {
    pub fn new(axes: Vec<Vec<usize>>) -> Self {
        for extents in &axes {
            for &extent in extents {
                assert!(extent > 0, "chunk extent must be positive");
            }
        }

        Self { axes }
    }

    /// A layout with evenly sized chunks, with a possibly short tail.
    ///
    pub fn regular(shape: &[usize], chunk_shape: &[usize]) -> Self {
        assert_eq!(shape.len(), chunk_shape.len());
        Self {
            axes: shape
                .iter()
                .zip(chunk_shape)
                .map(|(&len, &chunk)| chunk_extents(len, chunk, 0))
                .collect(),
        }
    }

    /// A layout with one chunk covering the whole array.
    ///
    pub fn single(shape: &[usize]) -> Self {
        Self {
            axes: shape
                .iter()
                .map(|&len| if len == 0 { vec![] } else { vec![len] })
                .collect(),
        }
    }

    pub fn ndim(&self) -> usize {
        self.axes.len()
    }

    pub fn axis(&self, dimension: usize) -> &[usize] {
        &self.axes[dimension]
    }

    pub fn shape(&self) -> Vec<usize> {
        self.axes
            .iter()
            .map(|extents| extents.iter().sum())
            .collect()
    }

    /// The largest chunk extent along each axis.
    ///
    pub fn chunk_shape(&self) -> Vec<usize> {
        self.axes
            .iter()
            .map(|extents| extents.iter().copied().max().unwrap_or(1))
            .collect()
    }

    /// The layout of the subarray covered by `window`.
    ///
    /// Chunks partially covered by the window become shorter blocks at the edges.
    ///
    pub fn clip(&self, window: &Window) -> Self {
        assert_eq!(window.ndim(), self.ndim());
        let axes = self
            .axes
            .iter()
            .enumerate()
            .map(|(dimension, extents)| {
                cover(extents, window.axis(dimension))
                    .into_iter()
                    .map(|piece| piece.local.end - piece.local.start)
                    .collect()
            })
            .collect();

        Self { axes }
    }

    /// Concatenate another layout after this one along `dimension`.
    ///
    pub fn concat(&self, other: &ChunkGeometry, dimension: usize) -> Self {
        assert_eq!(self.ndim(), other.ndim());
        let axes = self
            .axes
            .iter()
            .zip(&other.axes)
            .enumerate()
            .map(|(d, (left, right))| {
                if d == dimension {
                    left.iter().chain(right.iter()).copied().collect()
                } else {
                    assert_eq!(left, right, "chunk layouts differ off the concat axis");
                    left.clone()
                }
            })
            .collect();

        Self { axes }
    }
}

/// Block extents along one axis of length `len` chunked by `chunk`, with the origin of the
/// chunk grid displaced `offset` elements before index zero.
///
/// A nonzero offset shortens the first block. `offset` must be less than `chunk`.
///
pub fn chunk_extents(len: usize, chunk: usize, offset: usize) -> Vec<usize> {
    assert!(chunk > 0, "chunk extent must be positive");
    assert!(offset < chunk, "chunk offset must be less than the chunk extent");

    let mut extents = vec![];
    let mut start = 0;
    while start < len {
        let extent = if start == 0 { chunk - offset } else { chunk };
        extents.push(extent.min(len - start));
        start += extent;
    }

    extents
}

/// One block's contribution to a range along a single axis.
///
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Piece {
    /// Index of the block within the axis.
    pub block: usize,

    /// The covered range, in the block's own coordinates.
    pub local: Range<usize>,

    /// The covered range, relative to the start of the queried range.
    pub dest: Range<usize>,
}

/// Decompose a range along one axis into the blocks it intersects.
///
pub fn cover(extents: &[usize], range: &Range<usize>) -> Vec<Piece> {
    let mut pieces = vec![];
    let mut start = 0;
    for (block, &extent) in extents.iter().enumerate() {
        let end = start + extent;
        let lo = range.start.max(start);
        let hi = range.end.min(end);
        if lo < hi {
            pieces.push(Piece {
                block,
                local: lo - start..hi - start,
                dest: lo - range.start..hi - range.start,
            });
        }
        start = end;
    }

    pieces
}
