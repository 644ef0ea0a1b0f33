//! The read interface shared by in-memory arrays, lazy views, and stored cubes.
//!
use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    buffer::{ArrayBuffer, ArrayData, Encoding},
    chunks::ChunkGeometry,
    errors::Result,
    geom::Window,
};

/// An n-dimensional array that can fill windows of a destination buffer.
///
/// Implementations are lazy: constructing one reads no element data, and `fill_window`
/// touches only the chunks the window intersects.
///
#[async_trait]
pub trait Source: Send + Sync {
    fn shape(&self) -> &[usize];

    fn chunks(&self) -> &ChunkGeometry;

    fn encoding(&self) -> Encoding;

    /// Fill `buffer` with the elements covered by `window`.
    ///
    /// The buffer's shape and encoding must match the window and this source.
    ///
    async fn fill_window(&self, window: &Window, buffer: &mut ArrayBuffer<'_>) -> Result<()>;

    /// Read the elements covered by `window` into a new array.
    ///
    async fn read_window(&self, window: &Window) -> Result<ArrayData> {
        let mut data = ArrayData::zeros(self.encoding(), &window.shape());
        let mut buffer = data.buffer();
        self.fill_window(window, &mut buffer).await?;

        Ok(data)
    }
}

/// A source backed by an array in memory.
///
pub struct ArraySource {
    data: ArrayData,
    chunks: ChunkGeometry,
}

impl ArraySource {
    pub fn new(data: ArrayData) -> Self {
        let chunks = ChunkGeometry::single(data.shape());
        Self { data, chunks }
    }

    /// An in-memory source that reports the given chunk layout.
    ///
    pub fn with_chunks(data: ArrayData, chunks: ChunkGeometry) -> Self {
        assert_eq!(chunks.shape(), data.shape());
        Self { data, chunks }
    }
}

#[async_trait]
impl Source for ArraySource {
    fn shape(&self) -> &[usize] {
        self.data.shape()
    }

    fn chunks(&self) -> &ChunkGeometry {
        &self.chunks
    }

    fn encoding(&self) -> Encoding {
        self.data.encoding()
    }

    async fn fill_window(&self, window: &Window, buffer: &mut ArrayBuffer<'_>) -> Result<()> {
        buffer.assign(&self.data.slice(window));

        Ok(())
    }
}

/// A rectangular view into another source.
///
pub struct SliceSource {
    inner: Arc<dyn Source>,
    window: Window,
    shape: Vec<usize>,
    chunks: ChunkGeometry,
}

impl SliceSource {
    pub fn new(inner: Arc<dyn Source>, window: Window) -> Self {
        assert_eq!(window.ndim(), inner.shape().len());
        for (range, &len) in window.axes().iter().zip(inner.shape()) {
            assert!(range.end <= len, "window out of bounds");
        }

        let shape = window.shape();
        let chunks = inner.chunks().clip(&window);

        Self {
            inner,
            window,
            shape,
            chunks,
        }
    }
}

#[async_trait]
impl Source for SliceSource {
    fn shape(&self) -> &[usize] {
        &self.shape
    }

    fn chunks(&self) -> &ChunkGeometry {
        &self.chunks
    }

    fn encoding(&self) -> Encoding {
        self.inner.encoding()
    }

    async fn fill_window(&self, window: &Window, buffer: &mut ArrayBuffer<'_>) -> Result<()> {
        let origin: Vec<usize> = self.window.axes().iter().map(|range| range.start).collect();
        self.inner
            .fill_window(&window.translate(&origin), buffer)
            .await
    }
}

/// A source with an extra leading axis of length one.
///
pub struct ExpandDims {
    inner: Arc<dyn Source>,
    shape: Vec<usize>,
    chunks: ChunkGeometry,
}

impl ExpandDims {
    pub fn new(inner: Arc<dyn Source>) -> Self {
        let mut shape = vec![1];
        shape.extend_from_slice(inner.shape());

        let mut axes = vec![vec![1]];
        for dimension in 0..inner.chunks().ndim() {
            axes.push(inner.chunks().axis(dimension).to_vec());
        }

        Self {
            inner,
            shape,
            chunks: ChunkGeometry::new(axes),
        }
    }
}

#[async_trait]
impl Source for ExpandDims {
    fn shape(&self) -> &[usize] {
        &self.shape
    }

    fn chunks(&self) -> &ChunkGeometry {
        &self.chunks
    }

    fn encoding(&self) -> Encoding {
        self.inner.encoding()
    }

    async fn fill_window(&self, window: &Window, buffer: &mut ArrayBuffer<'_>) -> Result<()> {
        assert!(window.axis(0).end <= 1, "window out of bounds");
        if window.is_empty() {
            return Ok(());
        }

        let inner_window = Window::new(window.axes()[1..].to_vec());
        let mut inner_buffer = buffer.index_axis(0, 0);
        self.inner.fill_window(&inner_window, &mut inner_buffer).await
    }
}
