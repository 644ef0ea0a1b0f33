//! A filesystem-backed chunked store for gridfuse datasets.
//!
//! A dataset is a directory holding a `meta.json` layout and one subdirectory per cube.
//! Each chunk is its own file, named by its position in the chunk grid, holding a small
//! binary header followed by the elements in big endian order. Chunk files record their
//! own shape, so a tail chunk left short by a later append reads back padded with the
//! fill value.
//!
use std::{
    io,
    path::{Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;
use futures::{io::Cursor, stream::FuturesUnordered, FutureExt, TryStreamExt};
use ndarray::{ArrayD, IxDyn};
use serde_json::Value;

use gridfuse::{
    chunks::{cover, Piece},
    config, geom,
    store::{AxisSegment, CubeSpec, Layout, LayoutWriter, Store},
    ArrayBuffer, ArrayData, ChunkGeometry, Encoding, Error, Result, Source, Window,
};

mod cache;
mod extio;

use cache::ChunkCache;
use extio::{ExtendedAsyncRead, ExtendedAsyncWrite};

const MAGIC_NUMBER: u16 = 0x67F5;
const FORMAT_VERSION: u32 = 0;

const META_FILE: &str = "meta.json";

/// A store that keeps each dataset in a directory of chunk files.
///
pub struct FsStore {
    root: PathBuf,
    cache: Arc<ChunkCache>,
}

impl FsStore {
    pub fn new<P: Into<PathBuf>>(root: P, cache_bytes: u64) -> Self {
        Self {
            root: root.into(),
            cache: Arc::new(ChunkCache::new(cache_bytes)),
        }
    }

    /// A store rooted at the configured working directory.
    ///
    pub fn from_config() -> Self {
        let config = config::get();
        Self::new(config.working_dir, config.cache_bytes)
    }

    fn dataset_dir(&self, path: &str) -> PathBuf {
        self.root.join(path)
    }

    async fn read_layout(&self, path: &str) -> Result<Layout> {
        let bytes = tokio::fs::read(self.dataset_dir(path).join(META_FILE)).await?;

        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn write_layout(&self, path: &str, layout: &Layout) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(layout)?;
        tokio::fs::write(self.dataset_dir(path).join(META_FILE), bytes).await?;

        Ok(())
    }
}

#[async_trait]
impl Store for FsStore {
    async fn create(&self, path: &str, layout: &Layout) -> Result<()> {
        let dir = self.dataset_dir(path);
        if tokio::fs::metadata(&dir).await.is_ok() {
            return Err(Error::AlreadyExists(path.into()));
        }

        tokio::fs::create_dir_all(&dir).await?;
        for cube in &layout.cubes {
            tokio::fs::create_dir_all(dir.join(&cube.name)).await?;
        }
        self.write_layout(path, layout).await?;
        log::debug!("created layout at {dir:?}");

        Ok(())
    }

    async fn open(&self, path: &str) -> Result<Layout> {
        self.read_layout(path).await
    }

    async fn extend(
        &self,
        path: &str,
        segments: &[AxisSegment],
        cubes: &[CubeSpec],
    ) -> Result<Layout> {
        let layout = self.read_layout(path).await?;
        let grown = layout.extended(segments, cubes)?;

        let dir = self.dataset_dir(path);
        for cube in cubes {
            tokio::fs::create_dir_all(dir.join(&cube.name)).await?;
        }
        self.write_layout(path, &grown).await?;
        log::debug!("extended layout at {dir:?}");

        Ok(grown)
    }

    async fn writer(&self, path: &str, cube: &str) -> Result<Box<dyn LayoutWriter + '_>> {
        let layout = self.read_layout(path).await?;
        let spec = layout
            .get_cube(cube)
            .ok_or_else(|| Error::BadName(cube.into()))?;
        let chunks = layout.cube_chunks(spec);

        Ok(Box::new(FsWriter {
            dir: self.dataset_dir(path),
            cube: spec.name.clone(),
            encoding: spec.encoding,
            fill: spec_fill(spec),
            extents: (0..chunks.ndim()).map(|d| chunks.axis(d).to_vec()).collect(),
            cache: Arc::clone(&self.cache),
        }))
    }

    async fn reader(&self, path: &str, cube: &str) -> Result<Arc<dyn Source>> {
        let layout = self.read_layout(path).await?;
        let spec = layout
            .get_cube(cube)
            .ok_or_else(|| Error::BadName(cube.into()))?;

        Ok(Arc::new(FsSource {
            dir: self.dataset_dir(path),
            cube: spec.name.clone(),
            shape: layout.cube_shape(spec),
            chunks: layout.cube_chunks(spec),
            encoding: spec.encoding,
            fill: spec_fill(spec),
            cache: Arc::clone(&self.cache),
        }))
    }
}

fn spec_fill(spec: &CubeSpec) -> f64 {
    for key in ["_FillValue", "missing_value"] {
        if let Some(value) = spec.attrs.get(key).and_then(Value::as_f64) {
            return value;
        }
    }

    spec.encoding.default_fill()
}

fn chunk_path(dir: &Path, cube: &str, coord: &[usize]) -> PathBuf {
    let indices: Vec<String> = coord.iter().map(|index| index.to_string()).collect();

    dir.join(cube).join(format!("c{}", indices.join(".")))
}

/// A writer that rewrites whole chunk files for each incoming window.
///
struct FsWriter {
    dir: PathBuf,
    cube: String,
    encoding: Encoding,
    fill: f64,
    extents: Vec<Vec<usize>>,
    cache: Arc<ChunkCache>,
}

#[async_trait]
impl LayoutWriter for FsWriter {
    async fn write_window(&mut self, window: &Window, data: &ArrayData) -> Result<()> {
        assert_eq!(window.shape(), data.shape());

        let pieces: Vec<Vec<Piece>> = (0..self.extents.len())
            .map(|dimension| cover(&self.extents[dimension], window.axis(dimension)))
            .collect();
        let counts: Vec<usize> = pieces.iter().map(|axis| axis.len()).collect();

        for combo in geom::grid(&counts) {
            let mut coord = Vec::with_capacity(combo.len());
            let mut local = Vec::with_capacity(combo.len());
            let mut dest = Vec::with_capacity(combo.len());
            let mut chunk_shape = Vec::with_capacity(combo.len());
            for (dimension, &index) in combo.iter().enumerate() {
                let piece = &pieces[dimension][index];
                coord.push(piece.block);
                local.push(piece.local.clone());
                dest.push(piece.dest.clone());
                chunk_shape.push(self.extents[dimension][piece.block]);
            }

            let path = chunk_path(&self.dir, &self.cube, &coord);
            let local = Window::new(local);
            let covers_whole_chunk = local.shape() == chunk_shape;

            let mut chunk = if covers_whole_chunk {
                ArrayData::filled(self.encoding, &chunk_shape, self.fill)
            } else {
                match tokio::fs::read(&path).await {
                    Ok(bytes) => {
                        let stored = decode_chunk(&bytes, &self.cube).await?;
                        embed(stored, &chunk_shape, self.encoding, self.fill, &self.cube)?
                    }
                    Err(err) if err.kind() == io::ErrorKind::NotFound => {
                        ArrayData::filled(self.encoding, &chunk_shape, self.fill)
                    }
                    Err(err) => return Err(err.into()),
                }
            };

            chunk
                .buffer()
                .slice(&local)
                .assign(&data.slice(&Window::new(dest)));

            let bytes = encode_chunk(&self.cube, &chunk).await?;
            tokio::fs::write(&path, bytes).await?;
            self.cache.invalidate(&path);
        }

        Ok(())
    }

    async fn finish(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

/// A lazy reader over the chunk files of one cube.
///
struct FsSource {
    dir: PathBuf,
    cube: String,
    shape: Vec<usize>,
    chunks: ChunkGeometry,
    encoding: Encoding,
    fill: f64,
    cache: Arc<ChunkCache>,
}

#[async_trait]
impl Source for FsSource {
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
            .map(|dimension| cover(self.chunks.axis(dimension), window.axis(dimension)))
            .collect();
        let counts: Vec<usize> = pieces.iter().map(|axis| axis.len()).collect();

        let mut futures = FuturesUnordered::new();
        for combo in geom::grid(&counts) {
            let mut coord = Vec::with_capacity(combo.len());
            let mut local = Vec::with_capacity(combo.len());
            let mut dest = Vec::with_capacity(combo.len());
            let mut chunk_shape = Vec::with_capacity(combo.len());
            for (dimension, &index) in combo.iter().enumerate() {
                let piece = &pieces[dimension][index];
                coord.push(piece.block);
                local.push(piece.local.clone());
                dest.push(piece.dest.clone());
                chunk_shape.push(self.chunks.axis(dimension)[piece.block]);
            }

            let mut slice = buffer.slice(&Window::new(dest));
            let local = Window::new(local);
            let path = chunk_path(&self.dir, &self.cube, &coord);
            let cache = Arc::clone(&self.cache);
            let cube = self.cube.clone();
            let encoding = self.encoding;
            let fill = self.fill;

            futures.push(async move {
                let chunk = cache
                    .get(&path, move |path| {
                        load_chunk(path, cube, chunk_shape, encoding, fill).boxed()
                    })
                    .await?;
                slice.assign(&chunk.slice(&local));

                Ok::<(), Error>(())
            });
        }

        while let Some(_) = futures.try_next().await? {
            continue;
        }

        Ok(())
    }
}

async fn load_chunk(
    path: PathBuf,
    cube: String,
    shape: Vec<usize>,
    encoding: Encoding,
    fill: f64,
) -> Result<ArrayData> {
    match tokio::fs::read(&path).await {
        Ok(bytes) => {
            let stored = decode_chunk(&bytes, &cube).await?;
            embed(stored, &shape, encoding, fill, &cube)
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            Ok(ArrayData::filled(encoding, &shape, fill))
        }
        Err(err) => Err(err.into()),
    }
}

/// Grow a stored chunk to `shape`, padding new positions with the fill value.
///
fn embed(
    stored: ArrayData,
    shape: &[usize],
    encoding: Encoding,
    fill: f64,
    cube: &str,
) -> Result<ArrayData> {
    if stored.encoding() != encoding
        || stored.shape().len() != shape.len()
        || stored.shape().iter().zip(shape).any(|(&s, &e)| s > e)
    {
        return Err(Error::Corrupt(format!(
            "chunk doesn't fit the layout of cube {cube:?}"
        )));
    }
    if stored.shape() == shape {
        return Ok(stored);
    }

    let mut chunk = ArrayData::filled(encoding, shape, fill);
    chunk
        .buffer()
        .slice(&Window::whole(stored.shape()))
        .assign(&stored);

    Ok(chunk)
}

async fn encode_chunk(cube: &str, chunk: &ArrayData) -> Result<Vec<u8>> {
    let mut stream = Vec::with_capacity(chunk.len() * chunk.encoding().size() + 64);
    stream.write_u16(MAGIC_NUMBER).await?;
    stream.write_u32(FORMAT_VERSION).await?;
    stream.write_str(cube).await?;
    stream.write_byte(chunk.encoding() as u8).await?;
    stream.write_byte(chunk.shape().len() as u8).await?;
    for &len in chunk.shape() {
        stream.write_u32(len as u32).await?;
    }

    let mut payload = Vec::with_capacity(chunk.len() * chunk.encoding().size());
    match chunk {
        ArrayData::I32(data) => {
            for &value in data.iter() {
                payload.extend_from_slice(&value.to_be_bytes());
            }
        }
        ArrayData::I64(data) => {
            for &value in data.iter() {
                payload.extend_from_slice(&value.to_be_bytes());
            }
        }
        ArrayData::F32(data) => {
            for &value in data.iter() {
                payload.extend_from_slice(&value.to_be_bytes());
            }
        }
        ArrayData::F64(data) => {
            for &value in data.iter() {
                payload.extend_from_slice(&value.to_be_bytes());
            }
        }
    }
    stream.extend_from_slice(&payload);

    Ok(stream)
}

async fn decode_chunk(bytes: &[u8], cube: &str) -> Result<ArrayData> {
    let mut stream = Cursor::new(bytes);
    if stream.read_u16().await? != MAGIC_NUMBER {
        return Err(Error::Corrupt("not a chunk file".into()));
    }
    if stream.read_u32().await? != FORMAT_VERSION {
        return Err(Error::Corrupt("unrecognized chunk format version".into()));
    }
    let name = stream.read_str().await?;
    if name != cube {
        return Err(Error::Corrupt(format!(
            "chunk belongs to cube {name:?}, expected {cube:?}"
        )));
    }
    let encoding = Encoding::try_from(stream.read_byte().await?)?;
    let ndim = stream.read_byte().await? as usize;
    let mut shape = Vec::with_capacity(ndim);
    for _ in 0..ndim {
        shape.push(stream.read_u32().await? as usize);
    }

    let offset = stream.position() as usize;
    let payload = &bytes[offset..];
    let count: usize = shape.iter().product();
    if payload.len() != count * encoding.size() {
        return Err(Error::Corrupt(format!(
            "chunk payload is {} bytes, expected {}",
            payload.len(),
            count * encoding.size()
        )));
    }

    let corrupt = |err: ndarray::ShapeError| Error::Corrupt(err.to_string());
    let data = match encoding {
        Encoding::I32 => ArrayData::I32(
            ArrayD::from_shape_vec(
                IxDyn(&shape),
                payload
                    .chunks_exact(4)
                    .map(|b| i32::from_be_bytes([b[0], b[1], b[2], b[3]]))
                    .collect(),
            )
            .map_err(corrupt)?,
        ),
        Encoding::I64 => ArrayData::I64(
            ArrayD::from_shape_vec(
                IxDyn(&shape),
                payload
                    .chunks_exact(8)
                    .map(|b| i64::from_be_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
                    .collect(),
            )
            .map_err(corrupt)?,
        ),
        Encoding::F32 => ArrayData::F32(
            ArrayD::from_shape_vec(
                IxDyn(&shape),
                payload
                    .chunks_exact(4)
                    .map(|b| f32::from_be_bytes([b[0], b[1], b[2], b[3]]))
                    .collect(),
            )
            .map_err(corrupt)?,
        ),
        Encoding::F64 => ArrayData::F64(
            ArrayD::from_shape_vec(
                IxDyn(&shape),
                payload
                    .chunks_exact(8)
                    .map(|b| f64::from_be_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
                    .collect(),
            )
            .map_err(corrupt)?,
        ),
    };

    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridfuse::{
        open_dataset, persist, persist_with, stack,
        source::ArraySource,
        store::append,
        Attrs, Axis, AxisValues, Dataset, DeclaredOffsets,
    };
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn store() -> (TempDir, FsStore) {
        let tmp = tempfile::tempdir().unwrap();
        let store = FsStore::new(tmp.path(), 1 << 20);

        (tmp, store)
    }

    fn floats(shape: &[usize], base: f64) -> ArrayData {
        let count: usize = shape.iter().product();
        ArrayData::F64(
            ArrayD::from_shape_vec(
                IxDyn(shape),
                (0..count).map(|i| base + i as f64).collect(),
            )
            .unwrap(),
        )
    }

    fn chunked_dataset(times: &[i64], chunk: usize, base: f64) -> Dataset {
        let shape = [times.len(), 2];
        let source = ArraySource::with_chunks(
            floats(&shape, base),
            ChunkGeometry::regular(&shape, &[chunk, 2]),
        );

        Dataset::new(vec![
            Axis::new("time", AxisValues::SeqI64(times.to_vec())),
            Axis::new("y", AxisValues::Bare(2)),
        ])
        .add_cube(
            "temp",
            vec!["time".into(), "y".into()],
            Arc::new(source),
            Attrs::new(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn codec_roundtrip() -> Result<()> {
        let chunk = floats(&[2, 3], 10.0);
        let bytes = encode_chunk("temp", &chunk).await?;
        assert_eq!(decode_chunk(&bytes, "temp").await?, chunk);

        Ok(())
    }

    #[tokio::test]
    async fn codec_rejects_garbage() -> Result<()> {
        let chunk = floats(&[2], 0.0);
        let bytes = encode_chunk("temp", &chunk).await?;

        assert!(matches!(
            decode_chunk(&bytes, "other").await,
            Err(Error::Corrupt(_))
        ));

        let mut mangled = bytes.clone();
        mangled[0] ^= 0xFF;
        assert!(matches!(
            decode_chunk(&mangled, "temp").await,
            Err(Error::Corrupt(_))
        ));

        let truncated = &bytes[..bytes.len() - 4];
        assert!(matches!(
            decode_chunk(truncated, "temp").await,
            Err(Error::Corrupt(_))
        ));

        Ok(())
    }

    #[tokio::test]
    async fn persist_and_reopen() -> Result<()> {
        let (tmp, store) = store();
        let ds = chunked_dataset(&[1, 2, 3, 4, 5, 6], 4, 0.0);
        persist(&ds, &store, "weather").await?;

        assert!(tmp.path().join("weather").join(META_FILE).is_file());
        assert!(tmp.path().join("weather/temp/c0.0").is_file());
        assert!(tmp.path().join("weather/temp/c1.0").is_file());
        assert!(tmp.path().join("weather/time/c0").is_file());

        let reopened = open_dataset(&store, "weather").await?;
        assert_eq!(
            reopened.get_axis("time").unwrap().values,
            AxisValues::SeqI64(vec![1, 2, 3, 4, 5, 6])
        );
        assert_eq!(
            reopened.get_cube("temp").unwrap().data.chunks().axis(0),
            &[4, 2]
        );
        assert_eq!(reopened.materialize("temp").await?, floats(&[6, 2], 0.0));

        Ok(())
    }

    #[tokio::test]
    async fn create_twice_fails() -> Result<()> {
        let (_tmp, store) = store();
        let ds = chunked_dataset(&[1], 4, 0.0);
        persist(&ds, &store, "weather").await?;
        let result = persist(&ds, &store, "weather").await;
        assert!(matches!(result, Err(Error::AlreadyExists(_))));

        Ok(())
    }

    #[tokio::test]
    async fn append_rewrites_the_tail_chunk() -> Result<()> {
        let (tmp, store) = store();
        persist(&chunked_dataset(&[1, 2, 3, 4, 5, 6], 4, 0.0), &store, "weather").await?;
        append(
            &chunked_dataset(&[7, 8, 9], 4, 100.0),
            &store,
            "weather",
            "time",
            6,
        )
        .await?;

        assert!(tmp.path().join("weather/temp/c2.0").is_file());

        let reopened = open_dataset(&store, "weather").await?;
        assert_eq!(
            reopened.get_axis("time").unwrap().values,
            AxisValues::SeqI64(vec![1, 2, 3, 4, 5, 6, 7, 8, 9])
        );
        assert_eq!(
            reopened.get_cube("temp").unwrap().data.chunks().axis(0),
            &[4, 4, 1]
        );

        let data = reopened.materialize("temp").await?;
        let mut expected: Vec<f64> = (0..12).map(|i| i as f64).collect();
        expected.extend((0..6).map(|i| 100.0 + i as f64));
        assert_eq!(
            data,
            ArrayData::F64(ArrayD::from_shape_vec(IxDyn(&[9, 2]), expected).unwrap())
        );

        Ok(())
    }

    #[tokio::test]
    async fn failed_append_leaves_the_store_untouched() -> Result<()> {
        let (tmp, store) = store();
        persist(&chunked_dataset(&[1, 2], 4, 0.0), &store, "weather").await?;

        let result = append(
            &chunked_dataset(&[7], 4, 100.0),
            &store,
            "weather",
            "time",
            5, // not the current end of the axis
        )
        .await;
        assert!(matches!(result, Err(Error::SizeMismatch { .. })));

        let layout = store.open("weather").await?;
        assert_eq!(layout.get_axis("time").unwrap().len, 2);
        assert!(!tmp.path().join("weather/temp/c1.0").exists());

        Ok(())
    }

    #[tokio::test]
    async fn declared_offsets_shift_the_chunk_grid() -> Result<()> {
        let (tmp, store) = store();
        let ds = chunked_dataset(&[1, 2, 3, 4, 5, 6], 4, 0.0);
        let mut declared = DeclaredOffsets::new();
        declared.insert("temp".into(), HashMap::from([("time".into(), 3_usize)]));
        persist_with(&ds, &store, "weather", &declared).await?;

        // a 3-position offset leaves one row in the leading chunk
        assert!(tmp.path().join("weather/temp/c0.0").is_file());
        assert!(tmp.path().join("weather/temp/c1.0").is_file());
        assert!(tmp.path().join("weather/temp/c2.0").is_file());

        let reopened = open_dataset(&store, "weather").await?;
        assert_eq!(
            reopened.get_cube("temp").unwrap().data.chunks().axis(0),
            &[1, 4, 1]
        );
        assert_eq!(reopened.materialize("temp").await?, floats(&[6, 2], 0.0));

        Ok(())
    }

    #[tokio::test]
    async fn missing_chunks_read_as_fill() -> Result<()> {
        let (tmp, store) = store();
        persist(&chunked_dataset(&[1, 2, 3, 4, 5, 6], 4, 0.0), &store, "weather").await?;
        std::fs::remove_file(tmp.path().join("weather/temp/c1.0")).unwrap();

        let reopened = open_dataset(&store, "weather").await?;
        let data = reopened.materialize("temp").await?;
        assert_eq!(data.get(&[3, 1]), 7.0);
        assert!(data.get(&[4, 0]).is_nan());
        assert!(data.get(&[5, 1]).is_nan());

        Ok(())
    }

    #[tokio::test]
    async fn stacked_datasets_roundtrip() -> Result<()> {
        let (_tmp, store) = store();
        let stacked = stack(
            &[
                chunked_dataset(&[1, 2], 4, 0.0),
                chunked_dataset(&[1, 2], 4, 100.0),
            ],
            Axis::new("member", AxisValues::SeqI64(vec![0, 1])),
        )?;
        persist(&stacked, &store, "ensemble").await?;

        let reopened = open_dataset(&store, "ensemble").await?;
        assert_eq!(
            reopened.get_cube("temp").unwrap().dims,
            vec!["member", "time", "y"]
        );
        assert_eq!(
            reopened.materialize("temp").await?,
            stacked.materialize("temp").await?
        );

        Ok(())
    }

    #[tokio::test]
    async fn windows_spanning_chunks() -> Result<()> {
        let (_tmp, store) = store();
        persist(&chunked_dataset(&[1, 2, 3, 4, 5, 6], 2, 0.0), &store, "weather").await?;

        let reopened = open_dataset(&store, "weather").await?;
        let cube = reopened.get_cube("temp").unwrap();
        let data = cube.data.read_window(&Window::new(vec![1..5, 0..1])).await?;
        assert_eq!(
            data,
            ArrayData::F64(
                ArrayD::from_shape_vec(IxDyn(&[4, 1]), vec![2.0, 4.0, 6.0, 8.0]).unwrap()
            )
        );

        Ok(())
    }
}
