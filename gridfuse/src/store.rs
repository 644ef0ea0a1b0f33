//! Persisting datasets to chunked stores, and opening them again.
//!
use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use ndarray::{ArrayD, IxDyn};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::{
    axis::AxisValues,
    buffer::{ArrayData, Encoding},
    chunks::{chunk_extents, ChunkGeometry},
    config::{self, Config},
    dataset::{Attrs, Axis, Cube, Dataset},
    errors::{Error, Result},
    geom::Window,
    offsets::{self, DeclaredOffsets},
    source::{ArraySource, Source},
};

/// Axis attribute holding the chunk offset: the number of grid positions the chunk grid
/// starts before index zero.
///
pub const ARRAY_OFFSET_ATTR: &str = "_ARRAY_OFFSET";

/// Axis attribute holding inline axis values, for axes compact enough to keep in metadata.
///
pub const ARRAY_VALUES_ATTR: &str = "_ARRAY_VALUES";

/// One axis of a stored layout.
///
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AxisSpec {
    pub name: String,
    pub len: usize,
    #[serde(default)]
    pub attrs: Attrs,
}

impl AxisSpec {
    pub fn offset(&self) -> usize {
        self.attrs
            .get(ARRAY_OFFSET_ATTR)
            .and_then(Value::as_u64)
            .unwrap_or(0) as usize
    }
}

/// One cube of a stored layout.
///
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CubeSpec {
    pub name: String,
    pub dims: Vec<String>,
    pub encoding: Encoding,
    pub chunk_shape: Vec<usize>,
    #[serde(default)]
    pub attrs: Attrs,
}

/// A run of new positions appended to the end of an axis.
///
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AxisSegment {
    pub name: String,
    pub start: usize,
    pub len: usize,
}

/// The complete metadata of a stored dataset.
///
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Layout {
    #[serde(default)]
    pub attrs: Attrs,
    pub axes: Vec<AxisSpec>,
    pub cubes: Vec<CubeSpec>,
}

impl Layout {
    pub fn get_axis(&self, name: &str) -> Option<&AxisSpec> {
        self.axes.iter().find(|axis| axis.name == name)
    }

    pub fn get_cube(&self, name: &str) -> Option<&CubeSpec> {
        self.cubes.iter().find(|cube| cube.name == name)
    }

    pub fn cube_shape(&self, spec: &CubeSpec) -> Vec<usize> {
        spec.dims
            .iter()
            .map(|dim| self.get_axis(dim).map(|axis| axis.len).unwrap_or(0))
            .collect()
    }

    /// The chunk layout of a stored cube, accounting for axis offsets.
    ///
    pub fn cube_chunks(&self, spec: &CubeSpec) -> ChunkGeometry {
        ChunkGeometry::new(
            spec.dims
                .iter()
                .zip(&spec.chunk_shape)
                .map(|(dim, &chunk)| {
                    let axis = self.get_axis(dim).expect("cube references unknown axis");
                    chunk_extents(axis.len, chunk, axis.offset())
                })
                .collect(),
        )
    }

    /// This layout with axes extended and cubes added, validated before anything is
    /// committed.
    ///
    /// Segments must start exactly at the current end of their axis. New cube names must
    /// be unused, their dims must name existing axes, and their chunks must be larger
    /// than any offset carried by those axes.
    ///
    pub fn extended(&self, segments: &[AxisSegment], new_cubes: &[CubeSpec]) -> Result<Layout> {
        let mut layout = self.clone();

        for segment in segments {
            let axis = layout
                .axes
                .iter_mut()
                .find(|axis| axis.name == segment.name)
                .ok_or_else(|| Error::BadName(segment.name.clone()))?;
            if segment.start != axis.len {
                return Err(Error::SizeMismatch {
                    name: segment.name.clone(),
                    expected: axis.len,
                    got: segment.start,
                });
            }
            axis.len += segment.len;
        }

        for cube in new_cubes {
            if layout.get_cube(&cube.name).is_some() {
                return Err(Error::AlreadyExists(cube.name.clone()));
            }
            if cube.dims.len() != cube.chunk_shape.len() {
                return Err(Error::ShapeMismatch {
                    name: cube.name.clone(),
                    reason: "chunk shape doesn't match dimensions".into(),
                });
            }
            for (dim, &chunk) in cube.dims.iter().zip(&cube.chunk_shape) {
                let axis = layout
                    .get_axis(dim)
                    .ok_or_else(|| Error::BadName(dim.clone()))?;
                if chunk == 0 || axis.offset() >= chunk {
                    return Err(Error::SizeMismatch {
                        name: dim.clone(),
                        expected: axis.offset() + 1,
                        got: chunk,
                    });
                }
            }
            layout.cubes.push(cube.clone());
        }

        Ok(layout)
    }
}

/// A chunked store that can hold dataset layouts.
///
#[async_trait]
pub trait Store: Send + Sync {
    /// Create a new layout at `path`. Fails if something is already there.
    ///
    async fn create(&self, path: &str, layout: &Layout) -> Result<()>;

    /// Read the layout stored at `path`.
    ///
    async fn open(&self, path: &str) -> Result<Layout>;

    /// Extend the layout at `path`, validating before any metadata is touched.
    ///
    async fn extend(
        &self,
        path: &str,
        segments: &[AxisSegment],
        cubes: &[CubeSpec],
    ) -> Result<Layout>;

    /// Obtain a writer for one cube of the layout at `path`.
    ///
    async fn writer(&self, path: &str, cube: &str) -> Result<Box<dyn LayoutWriter + '_>>;

    /// Obtain a lazy reader for one cube of the layout at `path`.
    ///
    async fn reader(&self, path: &str, cube: &str) -> Result<Arc<dyn Source>>;
}

/// An output stream for writing windows of one cube.
///
#[async_trait]
pub trait LayoutWriter: Send {
    /// Write `data` at the position covered by `window`.
    ///
    async fn write_window(&mut self, window: &Window, data: &ArrayData) -> Result<()>;

    /// Flush and close the stream.
    ///
    async fn finish(self: Box<Self>) -> Result<()>;
}

/// Write a dataset to a store.
///
pub async fn persist(dataset: &Dataset, store: &dyn Store, path: &str) -> Result<()> {
    persist_with(dataset, store, path, &DeclaredOffsets::new()).await
}

/// Write a dataset to a store, aligning chunk grids to the declared offsets.
///
/// Axis values are persisted inline for range and label axes, as coordinate cubes for
/// irregular numeric axes, and not at all for bare axes. Cube data is copied in windows
/// of whole chunks along the leading axis, sized by the configured copy budget.
///
pub async fn persist_with(
    dataset: &Dataset,
    store: &dyn Store,
    path: &str,
    declared: &DeclaredOffsets,
) -> Result<()> {
    let config = config::get();
    let offsets = offsets::reconcile(dataset.cubes(), declared)?;
    let layout = build_layout(dataset, &offsets)?;
    store.create(path, &layout).await?;

    for spec in &layout.cubes {
        let source = cube_source(dataset, &spec.name);
        let chunk = spec.chunk_shape.first().copied().unwrap_or(1);
        let mut writer = store.writer(path, &spec.name).await?;
        copy_cube(&*source, &mut *writer, chunk, 0, 0, &config).await?;
        writer.finish().await?;
    }

    Ok(())
}

/// Append a dataset to the end of one axis of a stored layout.
///
/// `start` must equal the current length of the axis. Every cube in `segment` must exist
/// in the layout, span the append axis, and match the stored lengths of its other axes.
///
pub async fn append(
    segment: &Dataset,
    store: &dyn Store,
    path: &str,
    axis: &str,
    start: usize,
) -> Result<()> {
    let config = config::get();
    let layout = store.open(path).await?;
    let ax = segment
        .get_axis(axis)
        .ok_or_else(|| Error::BadName(axis.into()))?;
    let spec_axis = layout
        .get_axis(axis)
        .ok_or_else(|| Error::BadName(axis.into()))?;
    if spec_axis.attrs.contains_key(ARRAY_VALUES_ATTR) {
        return Err(Error::ShapeMismatch {
            name: axis.into(),
            reason: "cannot append to an axis with inline values".into(),
        });
    }

    let mut jobs: Vec<(String, Arc<dyn Source>, usize)> = vec![];
    for cube in segment.cubes() {
        let spec = layout
            .get_cube(&cube.name)
            .ok_or_else(|| Error::BadName(cube.name.clone()))?;
        if spec.dims != cube.dims {
            return Err(Error::ShapeMismatch {
                name: cube.name.clone(),
                reason: "dimensions differ from the stored cube".into(),
            });
        }
        if spec.encoding != cube.encoding() {
            return Err(Error::ShapeMismatch {
                name: cube.name.clone(),
                reason: "encoding differs from the stored cube".into(),
            });
        }
        let position = cube
            .dims
            .iter()
            .position(|dim| dim == axis)
            .ok_or_else(|| Error::ShapeMismatch {
                name: cube.name.clone(),
                reason: "cube doesn't span the append axis".into(),
            })?;
        for (d, dim) in cube.dims.iter().enumerate() {
            if d == position {
                continue;
            }
            let len = layout
                .get_axis(dim)
                .ok_or_else(|| Error::BadName(dim.clone()))?
                .len;
            if cube.shape()[d] != len {
                return Err(Error::SizeMismatch {
                    name: dim.clone(),
                    expected: len,
                    got: cube.shape()[d],
                });
            }
        }
        jobs.push((cube.name.clone(), Arc::clone(&cube.data), position));
    }

    // Continue the coordinate cube, if the axis has one.
    if layout.get_cube(axis).is_some() && segment.get_cube(axis).is_none() {
        let spec = layout.get_cube(axis).unwrap();
        let values = coordinate_values(&ax.values, spec.encoding).ok_or_else(|| {
            Error::ShapeMismatch {
                name: axis.into(),
                reason: "axis values don't match the stored coordinate cube".into(),
            }
        })?;
        jobs.push((axis.into(), Arc::new(ArraySource::new(values)), 0));
    }

    let new_layout = store
        .extend(
            path,
            &[AxisSegment {
                name: axis.into(),
                start,
                len: ax.len(),
            }],
            &[],
        )
        .await?;

    for (name, source, position) in jobs {
        let spec = new_layout.get_cube(&name).unwrap();
        let chunk = spec.chunk_shape[position];
        let mut writer = store.writer(path, &name).await?;
        copy_cube(&*source, &mut *writer, chunk, position, start, &config).await?;
        writer.finish().await?;
    }

    Ok(())
}

/// Add new cubes, dimensioned by existing axes, to a stored layout.
///
pub async fn add_cubes(dataset: &Dataset, store: &dyn Store, path: &str) -> Result<()> {
    let config = config::get();
    let layout = store.open(path).await?;

    let mut specs = vec![];
    for cube in dataset.cubes() {
        if layout.get_cube(&cube.name).is_some() {
            return Err(Error::AlreadyExists(cube.name.clone()));
        }
        for (d, dim) in cube.dims.iter().enumerate() {
            let axis = layout
                .get_axis(dim)
                .ok_or_else(|| Error::BadName(dim.clone()))?;
            if cube.shape()[d] != axis.len {
                return Err(Error::SizeMismatch {
                    name: dim.clone(),
                    expected: axis.len,
                    got: cube.shape()[d],
                });
            }
        }
        specs.push(CubeSpec {
            name: cube.name.clone(),
            dims: cube.dims.clone(),
            encoding: cube.encoding(),
            chunk_shape: cube.data.chunks().chunk_shape(),
            attrs: cube.attrs.clone(),
        });
    }

    store.extend(path, &[], &specs).await?;

    for cube in dataset.cubes() {
        let chunk = cube.data.chunks().chunk_shape().first().copied().unwrap_or(1);
        let mut writer = store.writer(path, &cube.name).await?;
        copy_cube(&*cube.data, &mut *writer, chunk, 0, 0, &config).await?;
        writer.finish().await?;
    }

    Ok(())
}

/// Open a stored layout as a lazy dataset.
///
/// Axis values come from inline metadata when present, then from a coordinate cube of
/// the same name, and are bare otherwise. Coordinate cubes consumed this way don't
/// appear as data cubes.
///
pub async fn open_dataset(store: &dyn Store, path: &str) -> Result<Dataset> {
    let layout = store.open(path).await?;

    let mut coordinate_cubes = vec![];
    let mut axes = vec![];
    for spec in &layout.axes {
        let values = if let Some(inline) = spec.attrs.get(ARRAY_VALUES_ATTR) {
            AxisValues::from_json(inline)?
        } else if layout
            .get_cube(&spec.name)
            .map(|cube| cube.dims == [spec.name.clone()])
            .unwrap_or(false)
        {
            coordinate_cubes.push(spec.name.clone());
            let source = store.reader(path, &spec.name).await?;
            let data = source.read_window(&Window::whole(source.shape())).await?;
            AxisValues::from_data(&data)
        } else {
            AxisValues::Bare(spec.len)
        };

        if values.len() != spec.len {
            return Err(Error::Corrupt(format!(
                "axis {:?} has {} values for {} positions",
                spec.name,
                values.len(),
                spec.len
            )));
        }
        axes.push(Axis::with_attrs(
            spec.name.clone(),
            values,
            spec.attrs.clone(),
        ));
    }

    let mut dataset = Dataset::new(axes);
    dataset.attrs = layout.attrs.clone();
    for spec in &layout.cubes {
        if coordinate_cubes.contains(&spec.name) {
            continue;
        }
        let source = store.reader(path, &spec.name).await?;
        dataset = dataset.add_cube(
            spec.name.clone(),
            spec.dims.clone(),
            source,
            spec.attrs.clone(),
        )?;
    }

    Ok(dataset)
}

fn build_layout(dataset: &Dataset, offsets: &HashMap<String, usize>) -> Result<Layout> {
    let mut axes = vec![];
    for axis in dataset.axes() {
        let mut attrs = axis.attrs.clone();
        // A reopened dataset carries the previous layout's bookkeeping attrs on
        // its axes. The reconciled offsets and current values are authoritative.
        attrs.remove(ARRAY_OFFSET_ATTR);
        attrs.remove(ARRAY_VALUES_ATTR);
        let offset = offsets.get(&axis.name).copied().unwrap_or(0);
        if offset > 0 {
            attrs.insert(ARRAY_OFFSET_ATTR.into(), json!(offset));
        }
        if dataset.get_cube(&axis.name).is_none() {
            if let Some(inline) = axis.values.to_json() {
                attrs.insert(ARRAY_VALUES_ATTR.into(), inline);
            }
        }
        axes.push(AxisSpec {
            name: axis.name.clone(),
            len: axis.len(),
            attrs,
        });
    }

    let mut cubes = vec![];
    for cube in dataset.cubes() {
        let chunk_shape = cube.data.chunks().chunk_shape();
        for (dim, &chunk) in cube.dims.iter().zip(&chunk_shape) {
            let offset = offsets.get(dim).copied().unwrap_or(0);
            if offset >= chunk {
                return Err(Error::SizeMismatch {
                    name: dim.clone(),
                    expected: offset + 1,
                    got: chunk,
                });
            }
        }
        cubes.push(CubeSpec {
            name: cube.name.clone(),
            dims: cube.dims.clone(),
            encoding: cube.encoding(),
            chunk_shape,
            attrs: cube.attrs.clone(),
        });
    }

    // Coordinate cubes for irregular numeric axes with no inline form and no
    // user-provided coordinate cube.
    for axis in dataset.axes() {
        if axis.is_empty()
            || axis.values.to_json().is_some()
            || axis.values.numeric().is_none()
            || dataset.get_cube(&axis.name).is_some()
        {
            continue;
        }
        let encoding = if axis.values.integers().is_some() {
            Encoding::I64
        } else {
            Encoding::F64
        };
        cubes.push(CubeSpec {
            name: axis.name.clone(),
            dims: vec![axis.name.clone()],
            encoding,
            chunk_shape: vec![axis.len()],
            attrs: Attrs::new(),
        });
    }

    Ok(Layout {
        attrs: dataset.attrs.clone(),
        axes,
        cubes,
    })
}

fn cube_source(dataset: &Dataset, name: &str) -> Arc<dyn Source> {
    match dataset.get_cube(name) {
        Some(cube) => Arc::clone(&cube.data),
        None => {
            // A coordinate cube synthesized by build_layout.
            let values = dataset
                .get_axis(name)
                .expect("layout cube matches neither a cube nor an axis")
                .values
                .to_data()
                .expect("coordinate cube for a non-numeric axis");
            Arc::new(ArraySource::new(values))
        }
    }
}

fn coordinate_values(values: &AxisValues, encoding: Encoding) -> Option<ArrayData> {
    let data = match encoding {
        Encoding::I64 => values.to_data()?,
        Encoding::F64 => ArrayData::F64(
            ArrayD::from_shape_vec(IxDyn(&[values.len()]), values.numeric()?).unwrap(),
        ),
        _ => return None,
    };
    if data.encoding() != encoding {
        return None;
    }

    Some(data)
}

/// Copy a source into a writer in windows of whole chunks along one axis.
///
/// Windows cover `copy_chunks` chunks at a time, clamped so the window stays under the
/// configured buffer size, but never less than one position along the copy axis.
///
async fn copy_cube(
    source: &dyn Source,
    writer: &mut (dyn LayoutWriter + '_),
    chunk: usize,
    axis: usize,
    origin: usize,
    config: &Config,
) -> Result<()> {
    let shape = source.shape().to_vec();
    if shape.is_empty() {
        let window = Window::whole(&[]);
        let data = source.read_window(&window).await?;
        return writer.write_window(&window, &data).await;
    }

    let row_bytes = shape
        .iter()
        .enumerate()
        .filter(|&(d, _)| d != axis)
        .map(|(_, &len)| len)
        .product::<usize>()
        .max(1)
        * source.encoding().size();
    let budget = (config.copy_buffer_bytes / row_bytes).max(1);
    let step = (chunk.max(1) * config.copy_chunks).min(budget).max(1);

    let mut displacement = vec![0; shape.len()];
    displacement[axis] = origin;

    let mut start = 0;
    while start < shape[axis] {
        let end = (start + step).min(shape[axis]);
        let window = Window::new(
            shape
                .iter()
                .enumerate()
                .map(|(d, &len)| if d == axis { start..end } else { 0..len })
                .collect(),
        );
        let data = source.read_window(&window).await?;
        writer
            .write_window(&window.translate(&displacement), &data)
            .await?;
        start = end;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        axis::IntRange,
        testing::{self, MemStore},
    };
    use ndarray::arr2;

    fn dataset() -> Dataset {
        let ds = Dataset::new(vec![
            Axis::new("time", AxisValues::SeqI64(vec![10, 20, 30])),
            Axis::new("y", AxisValues::RangeI64(IntRange::new(0, 1, 2))),
            Axis::new("station", AxisValues::Labels(vec!["a".into(), "b".into()])),
        ]);
        let temp = arr2(&[[1.0_f64, 2.0], [3.0, 4.0], [5.0, 6.0]]).into_dyn();
        let ds = ds
            .add_cube(
                "temp",
                vec!["time".into(), "y".into()],
                Arc::new(ArraySource::new(temp.into())),
                Attrs::new(),
            )
            .unwrap();
        let names = arr2(&[[7_i32, 8], [9, 10], [11, 12]]).into_dyn();
        ds.add_cube(
            "counts",
            vec!["time".into(), "station".into()],
            Arc::new(ArraySource::new(names.into())),
            Attrs::new(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn persist_and_reopen() -> Result<()> {
        let store = MemStore::new();
        let mut ds = dataset();
        ds.attrs.insert("title".into(), json!("test"));
        persist(&ds, &store, "d1").await?;

        let reopened = open_dataset(&store, "d1").await?;
        assert_eq!(reopened.attrs["title"], json!("test"));
        assert_eq!(
            reopened.get_axis("time").unwrap().values,
            AxisValues::SeqI64(vec![10, 20, 30])
        );
        assert_eq!(
            reopened.get_axis("y").unwrap().values,
            AxisValues::RangeI64(IntRange::new(0, 1, 2))
        );
        assert_eq!(
            reopened.get_axis("station").unwrap().values,
            AxisValues::Labels(vec!["a".into(), "b".into()])
        );

        // the coordinate cube for time is consumed, not exposed
        assert!(reopened.get_cube("time").is_none());

        let data = reopened.materialize("temp").await?;
        assert_eq!(data, ds.materialize("temp").await?);
        let data = reopened.materialize("counts").await?;
        assert_eq!(data, ds.materialize("counts").await?);

        Ok(())
    }

    #[tokio::test]
    async fn persist_twice_fails() -> Result<()> {
        let store = MemStore::new();
        persist(&dataset(), &store, "d1").await?;
        let result = persist(&dataset(), &store, "d1").await;
        assert!(matches!(result, Err(Error::AlreadyExists(_))));

        Ok(())
    }

    #[tokio::test]
    async fn offsets_survive_a_roundtrip() -> Result<()> {
        let store = MemStore::new();
        // chunked [4, 2] along time so a nonzero offset is meaningful
        let data = ArrayData::filled(Encoding::F64, &[6, 2], 1.0);
        let source = ArraySource::with_chunks(data, ChunkGeometry::regular(&[6, 2], &[4, 2]));
        let ds = Dataset::new(vec![
            Axis::new("time", AxisValues::Bare(6)),
            Axis::new("y", AxisValues::Bare(2)),
        ])
        .add_cube(
            "temp",
            vec!["time".into(), "y".into()],
            Arc::new(source) as Arc<dyn Source>,
            Attrs::new(),
        )?;

        let mut declared = DeclaredOffsets::new();
        declared.insert("temp".into(), HashMap::from([("time".into(), 3_usize)]));
        persist_with(&ds, &store, "d1", &declared).await?;

        let layout = store.open("d1").await?;
        assert_eq!(layout.get_axis("time").unwrap().offset(), 3);
        let spec = layout.get_cube("temp").unwrap();
        assert_eq!(layout.cube_chunks(spec).axis(0), &[1, 4, 1]);

        let reopened = open_dataset(&store, "d1").await?;
        assert_eq!(reopened.get_cube("temp").unwrap().data.chunks().axis(0), &[1, 4, 1]);

        Ok(())
    }

    #[tokio::test]
    async fn repersisting_a_reopened_dataset_drops_the_stored_offset() -> Result<()> {
        let store = MemStore::new();
        let data = ArrayData::filled(Encoding::F64, &[4, 2], 1.0);
        let source =
            ArraySource::with_chunks(data.clone(), ChunkGeometry::regular(&[4, 2], &[4, 2]));
        let ds = Dataset::new(vec![
            Axis::new("time", AxisValues::Bare(4)),
            Axis::new("y", AxisValues::Bare(2)),
        ])
        .add_cube(
            "temp",
            vec!["time".into(), "y".into()],
            Arc::new(source) as Arc<dyn Source>,
            Attrs::new(),
        )?;

        let mut declared = DeclaredOffsets::new();
        declared.insert("temp".into(), HashMap::from([("time".into(), 3_usize)]));
        persist_with(&ds, &store, "d1", &declared).await?;

        // The reopened axes carry the stored layout's bookkeeping attrs.
        // Persisting the dataset again must not re-declare the old offset.
        let reopened = open_dataset(&store, "d1").await?;
        persist(&reopened, &store, "d2").await?;

        let layout = store.open("d2").await?;
        assert_eq!(layout.get_axis("time").unwrap().offset(), 0);
        let copy = open_dataset(&store, "d2").await?;
        assert_eq!(copy.materialize("temp").await?, data);

        Ok(())
    }

    #[tokio::test]
    async fn offset_larger_than_chunk_is_rejected() -> Result<()> {
        let store = MemStore::new();
        let ds = testing::time_dataset(
            "temp",
            &[1, 2],
            arr2(&[[1.0, 1.0], [2.0, 2.0]]).into_dyn().into(),
        );
        let mut declared = DeclaredOffsets::new();
        declared.insert("temp".into(), HashMap::from([("time".into(), 7_usize)]));
        let result = persist_with(&ds, &store, "d1", &declared).await;
        assert!(matches!(result, Err(Error::SizeMismatch { .. })));

        Ok(())
    }

    #[tokio::test]
    async fn append_grows_an_axis() -> Result<()> {
        let store = MemStore::new();
        let first = testing::time_dataset(
            "temp",
            &[1, 2],
            arr2(&[[1.0, 1.0], [2.0, 2.0]]).into_dyn().into(),
        );
        persist(&first, &store, "d1").await?;

        let second = testing::time_dataset(
            "temp",
            &[3],
            arr2(&[[3.0, 3.0]]).into_dyn().into(),
        );
        append(&second, &store, "d1", "time", 2).await?;

        let reopened = open_dataset(&store, "d1").await?;
        assert_eq!(
            reopened.get_axis("time").unwrap().values,
            AxisValues::SeqI64(vec![1, 2, 3])
        );
        let data = reopened.materialize("temp").await?;
        assert_eq!(
            data,
            arr2(&[[1.0, 1.0], [2.0, 2.0], [3.0, 3.0]]).into_dyn().into()
        );

        Ok(())
    }

    #[tokio::test]
    async fn append_at_the_wrong_position_is_rejected() -> Result<()> {
        let store = MemStore::new();
        let first = testing::time_dataset(
            "temp",
            &[1, 2],
            arr2(&[[1.0, 1.0], [2.0, 2.0]]).into_dyn().into(),
        );
        persist(&first, &store, "d1").await?;

        let second =
            testing::time_dataset("temp", &[3], arr2(&[[3.0, 3.0]]).into_dyn().into());
        let result = append(&second, &store, "d1", "time", 1).await;
        assert!(matches!(result, Err(Error::SizeMismatch { .. })));

        // nothing was committed
        let layout = store.open("d1").await?;
        assert_eq!(layout.get_axis("time").unwrap().len, 2);

        Ok(())
    }

    #[tokio::test]
    async fn append_of_unknown_cube_is_rejected() -> Result<()> {
        let store = MemStore::new();
        let first = testing::time_dataset(
            "temp",
            &[1],
            arr2(&[[1.0, 1.0]]).into_dyn().into(),
        );
        persist(&first, &store, "d1").await?;

        let second = testing::time_dataset(
            "pressure",
            &[2],
            arr2(&[[2.0, 2.0]]).into_dyn().into(),
        );
        let result = append(&second, &store, "d1", "time", 1).await;
        assert!(matches!(result, Err(Error::BadName(_))));

        Ok(())
    }

    #[tokio::test]
    async fn append_to_an_inline_axis_is_rejected() -> Result<()> {
        let store = MemStore::new();
        let ds = Dataset::new(vec![
            Axis::new("time", AxisValues::RangeI64(IntRange::new(0, 1, 2))),
            Axis::new("y", AxisValues::Bare(2)),
        ])
        .add_cube(
            "temp",
            vec!["time".into(), "y".into()],
            Arc::new(ArraySource::new(ArrayData::zeros(Encoding::F64, &[2, 2]))),
            Attrs::new(),
        )?;
        persist(&ds, &store, "d1").await?;

        let more = Dataset::new(vec![
            Axis::new("time", AxisValues::RangeI64(IntRange::new(2, 1, 1))),
            Axis::new("y", AxisValues::Bare(2)),
        ])
        .add_cube(
            "temp",
            vec!["time".into(), "y".into()],
            Arc::new(ArraySource::new(ArrayData::zeros(Encoding::F64, &[1, 2]))),
            Attrs::new(),
        )?;
        let result = append(&more, &store, "d1", "time", 2).await;
        assert!(matches!(result, Err(Error::ShapeMismatch { .. })));

        Ok(())
    }

    #[tokio::test]
    async fn add_cubes_extends_a_layout() -> Result<()> {
        let store = MemStore::new();
        let first = testing::time_dataset(
            "temp",
            &[1, 2],
            arr2(&[[1.0, 1.0], [2.0, 2.0]]).into_dyn().into(),
        );
        persist(&first, &store, "d1").await?;

        let more = Dataset::new(vec![
            Axis::new("time", AxisValues::SeqI64(vec![1, 2])),
            Axis::new("y", AxisValues::Bare(2)),
        ])
        .add_cube(
            "humidity",
            vec!["time".into(), "y".into()],
            Arc::new(ArraySource::new(ArrayData::filled(
                Encoding::F64,
                &[2, 2],
                0.5,
            ))),
            Attrs::new(),
        )?;
        add_cubes(&more, &store, "d1").await?;

        let reopened = open_dataset(&store, "d1").await?;
        assert!(reopened.get_cube("temp").is_some());
        let data = reopened.materialize("humidity").await?;
        assert_eq!(data, ArrayData::filled(Encoding::F64, &[2, 2], 0.5));

        let result = add_cubes(&more, &store, "d1").await;
        assert!(matches!(result, Err(Error::AlreadyExists(_))));

        Ok(())
    }

    #[test]
    fn extended_validates_before_committing() {
        let layout = Layout {
            attrs: Attrs::new(),
            axes: vec![AxisSpec {
                name: "time".into(),
                len: 4,
                attrs: Attrs::new(),
            }],
            cubes: vec![],
        };

        let grown = layout
            .extended(
                &[AxisSegment {
                    name: "time".into(),
                    start: 4,
                    len: 2,
                }],
                &[],
            )
            .unwrap();
        assert_eq!(grown.get_axis("time").unwrap().len, 6);

        let result = layout.extended(
            &[AxisSegment {
                name: "time".into(),
                start: 3,
                len: 2,
            }],
            &[],
        );
        assert!(matches!(result, Err(Error::SizeMismatch { .. })));

        let result = layout.extended(
            &[AxisSegment {
                name: "bogus".into(),
                start: 0,
                len: 2,
            }],
            &[],
        );
        assert!(matches!(result, Err(Error::BadName(_))));
    }

    #[test]
    fn extended_rejects_chunks_smaller_than_the_offset() {
        let mut attrs = Attrs::new();
        attrs.insert(ARRAY_OFFSET_ATTR.into(), json!(3));
        let layout = Layout {
            attrs: Attrs::new(),
            axes: vec![AxisSpec {
                name: "time".into(),
                len: 4,
                attrs,
            }],
            cubes: vec![],
        };

        let result = layout.extended(
            &[],
            &[CubeSpec {
                name: "temp".into(),
                dims: vec!["time".into()],
                encoding: Encoding::F64,
                chunk_shape: vec![2],
                attrs: Attrs::new(),
            }],
        );
        assert!(matches!(result, Err(Error::SizeMismatch { .. })));
    }
}
