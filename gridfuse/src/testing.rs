//! Fixtures and an in-memory store, for tests.
//!
use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::{
    axis::{AxisValues, IntRange},
    buffer::ArrayData,
    dataset::{Attrs, Axis, Dataset},
    errors::{Error, Result},
    geom::Window,
    source::{ArraySource, Source},
    store::{AxisSegment, CubeSpec, Layout, LayoutWriter, Store},
};

const DIM_NAMES: [&str; 4] = ["time", "y", "x", "z"];

/// A dataset with one cube over a `time` axis with the given values; later axes are bare.
///
pub fn time_dataset(name: &str, times: &[i64], data: ArrayData) -> Dataset {
    let shape = data.shape().to_vec();
    assert_eq!(shape[0], times.len());

    let mut axes = vec![Axis::new("time", AxisValues::SeqI64(times.to_vec()))];
    for (dimension, &len) in shape.iter().enumerate().skip(1) {
        axes.push(Axis::new(DIM_NAMES[dimension], AxisValues::Bare(len)));
    }

    let dims = DIM_NAMES[..shape.len()]
        .iter()
        .map(|&dim| dim.to_string())
        .collect();

    Dataset::new(axes)
        .add_cube(name, dims, Arc::new(ArraySource::new(data)), Attrs::new())
        .unwrap()
}

/// A dataset with one cube; the first axis is a regular integer range, the rest are bare.
///
pub fn dataset2(name: &str, dims: &[&str], data: ArrayData) -> Dataset {
    let shape = data.shape().to_vec();
    assert_eq!(dims.len(), shape.len());

    let axes = dims
        .iter()
        .zip(&shape)
        .enumerate()
        .map(|(dimension, (&dim, &len))| {
            if dimension == 0 {
                Axis::new(dim, AxisValues::RangeI64(IntRange::new(0, 1, len)))
            } else {
                Axis::new(dim, AxisValues::Bare(len))
            }
        })
        .collect();

    Dataset::new(axes)
        .add_cube(
            name,
            dims.iter().map(|&dim| dim.to_string()).collect(),
            Arc::new(ArraySource::new(data)),
            Attrs::new(),
        )
        .unwrap()
}

/// An in-memory `Store` that keeps each cube as one fully materialized array.
///
pub struct MemStore {
    entries: Mutex<HashMap<String, Entry>>,
}

type Entry = Arc<Mutex<(Layout, HashMap<String, ArrayData>)>>;

impl MemStore {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn entry(&self, path: &str) -> Result<Entry> {
        self.entries
            .lock()
            .get(path)
            .cloned()
            .ok_or_else(|| Error::BadName(path.into()))
    }
}

impl Default for MemStore {
    fn default() -> Self {
        Self::new()
    }
}

fn allocate(layout: &Layout, spec: &CubeSpec) -> ArrayData {
    ArrayData::filled(
        spec.encoding,
        &layout.cube_shape(spec),
        spec.encoding.default_fill(),
    )
}

#[async_trait]
impl Store for MemStore {
    async fn create(&self, path: &str, layout: &Layout) -> Result<()> {
        let mut entries = self.entries.lock();
        if entries.contains_key(path) {
            return Err(Error::AlreadyExists(path.into()));
        }

        let data = layout
            .cubes
            .iter()
            .map(|spec| (spec.name.clone(), allocate(layout, spec)))
            .collect();
        entries.insert(path.into(), Arc::new(Mutex::new((layout.clone(), data))));

        Ok(())
    }

    async fn open(&self, path: &str) -> Result<Layout> {
        Ok(self.entry(path)?.lock().0.clone())
    }

    async fn extend(
        &self,
        path: &str,
        segments: &[AxisSegment],
        cubes: &[CubeSpec],
    ) -> Result<Layout> {
        let entry = self.entry(path)?;
        let mut entry = entry.lock();
        let grown = entry.0.extended(segments, cubes)?;

        for spec in &grown.cubes {
            let new_shape = grown.cube_shape(spec);
            match entry.1.get(&spec.name).cloned() {
                Some(old) if old.shape() == new_shape.as_slice() => continue,
                Some(old) => {
                    let mut bigger = allocate(&grown, spec);
                    let mut buffer = bigger.buffer();
                    buffer.slice(&Window::whole(old.shape())).assign(&old);
                    entry.1.insert(spec.name.clone(), bigger);
                }
                None => {
                    entry.1.insert(spec.name.clone(), allocate(&grown, spec));
                }
            }
        }
        entry.0 = grown.clone();

        Ok(grown)
    }

    async fn writer(&self, path: &str, cube: &str) -> Result<Box<dyn LayoutWriter + '_>> {
        let entry = self.entry(path)?;
        if !entry.lock().1.contains_key(cube) {
            return Err(Error::BadName(cube.into()));
        }

        Ok(Box::new(MemWriter {
            entry,
            cube: cube.into(),
        }))
    }

    async fn reader(&self, path: &str, cube: &str) -> Result<Arc<dyn Source>> {
        let entry = self.entry(path)?;
        let entry = entry.lock();
        let spec = entry
            .0
            .get_cube(cube)
            .ok_or_else(|| Error::BadName(cube.into()))?;
        let data = entry.1[cube].clone();
        let chunks = entry.0.cube_chunks(spec);

        Ok(Arc::new(ArraySource::with_chunks(data, chunks)))
    }
}

struct MemWriter {
    entry: Entry,
    cube: String,
}

#[async_trait]
impl LayoutWriter for MemWriter {
    async fn write_window(&mut self, window: &Window, data: &ArrayData) -> Result<()> {
        let mut entry = self.entry.lock();
        let array = entry.1.get_mut(&self.cube).expect("writer for unknown cube");
        array.buffer().slice(window).assign(data);

        Ok(())
    }

    async fn finish(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}
