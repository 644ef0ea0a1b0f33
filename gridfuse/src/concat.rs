//! Lazy concatenation of sources arranged in a block grid.
//!
use std::sync::Arc;

use async_trait::async_trait;
use futures::{stream::FuturesUnordered, TryStreamExt};

use crate::{
    buffer::{ArrayBuffer, Encoding},
    chunks::{self, ChunkGeometry, Piece},
    errors::{Error, Result},
    geom::{self, Window},
    source::Source,
};

/// Sources arranged in an n-dimensional block grid, read as one contiguous array.
///
/// Constructing one reads no element data. Windows decompose into per-block subwindows,
/// which are filled concurrently into disjoint slices of the destination buffer. Grid
/// cells no source occupies read as the fill value.
///
pub struct ConcatArray {
    grid: Vec<usize>,
    cells: Vec<Option<Arc<dyn Source>>>,
    extents: Vec<Vec<usize>>,
    shape: Vec<usize>,
    chunks: ChunkGeometry,
    encoding: Encoding,
    fill: f64,
}

impl ConcatArray {
    /// Arrange `cells` into a block grid with the given per-axis block counts.
    ///
    /// `cells` holds one entry per grid cell, in row major order. Every present source
    /// must agree on encoding and on the extents of the blocks it occupies, and every
    /// block extent must be pinned down by at least one present source.
    ///
    pub fn new(
        name: &str,
        grid: Vec<usize>,
        cells: Vec<Option<Arc<dyn Source>>>,
        fill: f64,
    ) -> Result<Self> {
        let ndim = grid.len();
        let n_cells: usize = grid.iter().product();
        assert_eq!(cells.len(), n_cells, "cell count doesn't match the grid");

        let encoding = cells
            .iter()
            .flatten()
            .next()
            .map(|cell| cell.encoding())
            .ok_or_else(|| Error::ShapeMismatch {
                name: name.into(),
                reason: "block grid has no sources".into(),
            })?;

        let mut extents: Vec<Vec<Option<usize>>> =
            grid.iter().map(|&blocks| vec![None; blocks]).collect();
        let mut chunk_axes: Vec<Vec<Option<Vec<usize>>>> =
            grid.iter().map(|&blocks| vec![None; blocks]).collect();

        for (flat, cell) in cells.iter().enumerate() {
            let cell = match cell {
                Some(cell) => cell,
                None => continue,
            };

            if cell.encoding() != encoding {
                return Err(Error::ShapeMismatch {
                    name: name.into(),
                    reason: format!(
                        "sources disagree on encoding: {:?} and {:?}",
                        encoding,
                        cell.encoding()
                    ),
                });
            }
            if cell.shape().len() != ndim {
                return Err(Error::ShapeMismatch {
                    name: name.into(),
                    reason: format!(
                        "source has {} dimensions, grid has {ndim}",
                        cell.shape().len()
                    ),
                });
            }

            let coord = unflatten(flat, &grid);
            for (dimension, (&block, &len)) in coord.iter().zip(cell.shape()).enumerate() {
                match extents[dimension][block] {
                    None => {
                        extents[dimension][block] = Some(len);
                        chunk_axes[dimension][block] =
                            Some(cell.chunks().axis(dimension).to_vec());
                    }
                    Some(extent) if extent != len => {
                        return Err(Error::ShapeMismatch {
                            name: name.into(),
                            reason: format!(
                                "sources disagree on the extent of block {block} along \
                                 axis {dimension}: {extent} and {len}"
                            ),
                        });
                    }
                    Some(_) => {}
                }
            }
        }

        let extents = extents
            .into_iter()
            .enumerate()
            .map(|(dimension, blocks)| {
                blocks
                    .into_iter()
                    .enumerate()
                    .map(|(block, extent)| {
                        extent.ok_or_else(|| Error::ShapeMismatch {
                            name: name.into(),
                            reason: format!(
                                "no source pins down the extent of block {block} along \
                                 axis {dimension}"
                            ),
                        })
                    })
                    .collect::<Result<Vec<usize>>>()
            })
            .collect::<Result<Vec<Vec<usize>>>>()?;

        let shape: Vec<usize> = extents.iter().map(|blocks| blocks.iter().sum()).collect();
        let chunks = ChunkGeometry::new(
            chunk_axes
                .into_iter()
                .zip(&extents)
                .map(|(blocks, block_extents)| {
                    blocks
                        .into_iter()
                        .zip(block_extents)
                        .flat_map(|(chunks, &extent)| chunks.unwrap_or_else(|| vec![extent]))
                        .collect()
                })
                .collect(),
        );

        Ok(Self {
            grid,
            cells,
            extents,
            shape,
            chunks,
            encoding,
            fill,
        })
    }

    pub fn grid(&self) -> &[usize] {
        &self.grid
    }

    pub fn fill_value(&self) -> f64 {
        self.fill
    }
}

#[async_trait]
impl Source for ConcatArray {
    fn shape(&self) -> &[usize] {
        &self.shape
    }

    fn chunks(&self) -> &ChunkGeometry {
        &self.chunks
    }

    fn encoding(&self) -> Encoding {
        self.encoding
    }

    async fn fill_window(&self, window: &Window, buffer: &mut ArrayBuffer<'_>) -> Result<()> {
        assert_eq!(window.ndim(), self.shape.len());

        let pieces: Vec<Vec<Piece>> = (0..self.shape.len())
            .map(|dimension| chunks::cover(&self.extents[dimension], window.axis(dimension)))
            .collect();
        let counts: Vec<usize> = pieces.iter().map(|axis| axis.len()).collect();

        let mut futures = FuturesUnordered::new();
        for combo in geom::grid(&counts) {
            let mut coord = Vec::with_capacity(combo.len());
            let mut local = Vec::with_capacity(combo.len());
            let mut dest = Vec::with_capacity(combo.len());
            for (dimension, &index) in combo.iter().enumerate() {
                let piece = &pieces[dimension][index];
                coord.push(piece.block);
                local.push(piece.local.clone());
                dest.push(piece.dest.clone());
            }

            let mut slice = buffer.slice(&Window::new(dest));
            match &self.cells[geom::flatten(&coord, &self.grid)] {
                Some(cell) => {
                    let cell = Arc::clone(cell);
                    let local = Window::new(local);
                    futures.push(async move { cell.fill_window(&local, &mut slice).await });
                }
                None => slice.fill(self.fill),
            }
        }

        while let Some(_) = futures.try_next().await? {
            continue;
        }

        Ok(())
    }
}

fn unflatten(mut flat: usize, grid: &[usize]) -> Vec<usize> {
    let mut coord = vec![0; grid.len()];
    for dimension in (0..grid.len()).rev() {
        coord[dimension] = flat % grid[dimension];
        flat /= grid[dimension];
    }

    coord
}
