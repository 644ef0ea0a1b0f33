//! Datasets: named cubes sharing named axes.
//!
use std::{fmt, ops::Range, sync::Arc};

use serde_json::Value;

use crate::{
    axis::{AxisKind, AxisValues},
    buffer::{ArrayData, Encoding},
    errors::{Error, Result},
    geom::Window,
    source::{SliceSource, Source},
};

/// Free-form metadata attached to datasets, axes, and cubes.
///
pub type Attrs = serde_json::Map<String, Value>;

/// A named dimension and the coordinate values along it.
///
#[derive(Clone, Debug)]
pub struct Axis {
    pub name: String,
    pub values: AxisValues,
    pub attrs: Attrs,
}

impl Axis {
    pub fn new<S: Into<String>>(name: S, values: AxisValues) -> Self {
        Self {
            name: name.into(),
            values,
            attrs: Attrs::new(),
        }
    }

    pub fn with_attrs<S: Into<String>>(name: S, values: AxisValues, attrs: Attrs) -> Self {
        Self {
            name: name.into(),
            values,
            attrs,
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn kind(&self) -> AxisKind {
        self.values.kind()
    }
}

/// A named array variable, dimensioned by the axes named in `dims`.
///
#[derive(Clone)]
pub struct Cube {
    pub name: String,
    pub dims: Vec<String>,
    pub data: Arc<dyn Source>,
    pub attrs: Attrs,
}

impl Cube {
    pub fn shape(&self) -> &[usize] {
        self.data.shape()
    }

    pub fn encoding(&self) -> Encoding {
        self.data.encoding()
    }

    /// The value that marks cells with no data, from the cube's attributes if declared,
    /// otherwise the encoding's sentinel.
    ///
    pub fn fill_value(&self) -> f64 {
        for key in ["_FillValue", "missing_value"] {
            if let Some(value) = self.attrs.get(key).and_then(Value::as_f64) {
                return value;
            }
        }

        self.data.encoding().default_fill()
    }
}

impl fmt::Debug for Cube {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Cube")
            .field("name", &self.name)
            .field("dims", &self.dims)
            .field("shape", &self.shape())
            .field("attrs", &self.attrs)
            .finish()
    }
}

/// A collection of cubes sharing a set of named axes.
///
/// Datasets are immutable. Methods that change a dataset return a new one, sharing the
/// underlying cube data with the original.
///
#[derive(Clone, Debug)]
pub struct Dataset {
    axes: Vec<Axis>,
    cubes: Vec<Cube>,
    pub attrs: Attrs,
}

impl Dataset {
    pub fn new(axes: Vec<Axis>) -> Self {
        for (i, axis) in axes.iter().enumerate() {
            assert!(
                !axes[..i].iter().any(|other| other.name == axis.name),
                "duplicate axis name: {}",
                axis.name
            );
        }

        Self {
            axes,
            cubes: vec![],
            attrs: Attrs::new(),
        }
    }

    pub(crate) fn assemble(axes: Vec<Axis>, cubes: Vec<Cube>, attrs: Attrs) -> Self {
        Self { axes, cubes, attrs }
    }

    pub fn axes(&self) -> &[Axis] {
        &self.axes
    }

    pub fn cubes(&self) -> &[Cube] {
        &self.cubes
    }

    pub fn get_axis(&self, name: &str) -> Option<&Axis> {
        self.axes.iter().find(|axis| axis.name == name)
    }

    pub fn get_cube(&self, name: &str) -> Option<&Cube> {
        self.cubes.iter().find(|cube| cube.name == name)
    }

    /// Add a cube, returning a new dataset.
    ///
    /// Every name in `dims` must be an axis of this dataset, and the source's shape must
    /// match the lengths of those axes.
    ///
    pub fn add_cube<S: Into<String>>(
        &self,
        name: S,
        dims: Vec<String>,
        data: Arc<dyn Source>,
        attrs: Attrs,
    ) -> Result<Self> {
        let name = name.into();
        if self.get_cube(&name).is_some() {
            return Err(Error::AlreadyExists(name));
        }
        if data.shape().len() != dims.len() {
            return Err(Error::ShapeMismatch {
                name,
                reason: format!(
                    "source has {} dimensions, cube has {}",
                    data.shape().len(),
                    dims.len()
                ),
            });
        }
        for (dim, &len) in dims.iter().zip(data.shape()) {
            let axis = self
                .get_axis(dim)
                .ok_or_else(|| Error::BadName(dim.clone()))?;
            if axis.len() != len {
                return Err(Error::SizeMismatch {
                    name: dim.clone(),
                    expected: axis.len(),
                    got: len,
                });
            }
        }

        let mut cubes = self.cubes.clone();
        cubes.push(Cube {
            name,
            dims,
            data,
            attrs,
        });

        Ok(Self {
            axes: self.axes.clone(),
            cubes,
            attrs: self.attrs.clone(),
        })
    }

    /// Select an index range along one axis, returning a new dataset of lazy views.
    ///
    pub fn isel(&self, axis: &str, range: Range<usize>) -> Result<Self> {
        let target = self
            .get_axis(axis)
            .ok_or_else(|| Error::BadName(axis.into()))?;
        assert!(
            range.start <= range.end && range.end <= target.len(),
            "selection out of bounds"
        );

        let axes = self
            .axes
            .iter()
            .map(|ax| {
                if ax.name == axis {
                    Axis::with_attrs(
                        ax.name.clone(),
                        ax.values.slice(range.start, range.end),
                        ax.attrs.clone(),
                    )
                } else {
                    ax.clone()
                }
            })
            .collect();

        let cubes = self
            .cubes
            .iter()
            .map(|cube| {
                if !cube.dims.iter().any(|dim| dim == axis) {
                    return cube.clone();
                }

                let window = Window::new(
                    cube.dims
                        .iter()
                        .zip(cube.shape())
                        .map(|(dim, &len)| if dim == axis { range.clone() } else { 0..len })
                        .collect(),
                );

                Cube {
                    name: cube.name.clone(),
                    dims: cube.dims.clone(),
                    data: Arc::new(SliceSource::new(Arc::clone(&cube.data), window)),
                    attrs: cube.attrs.clone(),
                }
            })
            .collect();

        Ok(Self {
            axes,
            cubes,
            attrs: self.attrs.clone(),
        })
    }

    /// Read a whole cube into memory.
    ///
    pub async fn materialize(&self, name: &str) -> Result<ArrayData> {
        let cube = self
            .get_cube(name)
            .ok_or_else(|| Error::BadName(name.into()))?;

        cube.data.read_window(&Window::whole(cube.shape())).await
    }
}

impl fmt::Display for Dataset {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "Dataset")?;
        writeln!(f, "Axes:")?;
        for axis in &self.axes {
            let kind = match axis.kind() {
                AxisKind::Regular => "regular",
                AxisKind::Irregular => "irregular",
                AxisKind::Categorical => "categorical",
                AxisKind::Positional => "positional",
            };
            writeln!(f, "    {}: {kind}, length {}", axis.name, axis.len())?;
        }
        writeln!(f, "Cubes:")?;
        for cube in &self.cubes {
            writeln!(
                f,
                "    {}({}): {:?} {:?}",
                cube.name,
                cube.dims.join(", "),
                cube.encoding(),
                cube.shape()
            )?;
        }
        if !self.attrs.is_empty() {
            writeln!(f, "Attributes:")?;
            for key in self.attrs.keys() {
                writeln!(f, "    {key}")?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{axis::IntRange, source::ArraySource, testing};
    use ndarray::arr2;

    fn dataset() -> Dataset {
        testing::dataset2(
            "temp",
            &["time", "y"],
            arr2(&[[1.0_f32, 2.0], [3.0, 4.0], [5.0, 6.0]]).into_dyn().into(),
        )
    }

    #[test]
    fn add_cube_is_immutable() -> Result<()> {
        let original = Dataset::new(vec![Axis::new("y", AxisValues::Bare(2))]);
        let data: Arc<dyn Source> =
            Arc::new(ArraySource::new(ArrayData::zeros(Encoding::F32, &[2])));
        let extended = original.add_cube("v", vec!["y".into()], data, Attrs::new())?;

        assert!(original.get_cube("v").is_none());
        assert!(extended.get_cube("v").is_some());

        Ok(())
    }

    #[test]
    fn add_cube_rejects_duplicates() {
        let ds = dataset();
        let data: Arc<dyn Source> =
            Arc::new(ArraySource::new(ArrayData::zeros(Encoding::F32, &[3, 2])));
        let result = ds.add_cube("temp", vec!["time".into(), "y".into()], data, Attrs::new());
        assert!(matches!(result, Err(Error::AlreadyExists(_))));
    }

    #[test]
    fn add_cube_rejects_unknown_axes() {
        let ds = dataset();
        let data: Arc<dyn Source> =
            Arc::new(ArraySource::new(ArrayData::zeros(Encoding::F32, &[3])));
        let result = ds.add_cube("v", vec!["z".into()], data, Attrs::new());
        assert!(matches!(result, Err(Error::BadName(_))));
    }

    #[test]
    fn add_cube_rejects_wrong_lengths() {
        let ds = dataset();
        let data: Arc<dyn Source> =
            Arc::new(ArraySource::new(ArrayData::zeros(Encoding::F32, &[4, 2])));
        let result = ds.add_cube("v", vec!["time".into(), "y".into()], data, Attrs::new());
        assert!(matches!(result, Err(Error::SizeMismatch { .. })));
    }

    #[tokio::test]
    async fn isel_slices_axis_and_cubes() -> Result<()> {
        let ds = dataset();
        let selected = ds.isel("time", 1..3)?;

        assert_eq!(
            selected.get_axis("time").unwrap().values,
            AxisValues::RangeI64(IntRange::new(1, 1, 2))
        );
        assert_eq!(selected.get_axis("y").unwrap().len(), 2);

        let data = selected.materialize("temp").await?;
        assert_eq!(
            data,
            arr2(&[[3.0_f32, 4.0], [5.0, 6.0]]).into_dyn().into()
        );

        Ok(())
    }

    #[test]
    fn isel_unknown_axis() {
        let result = dataset().isel("z", 0..1);
        assert!(matches!(result, Err(Error::BadName(_))));
    }

    #[test]
    #[should_panic]
    fn isel_out_of_bounds() {
        dataset().isel("time", 0..9).unwrap();
    }

    #[test]
    fn fill_value_from_attrs() {
        let mut ds = dataset();
        assert!(ds.get_cube("temp").unwrap().fill_value().is_nan());

        let mut attrs = Attrs::new();
        attrs.insert("_FillValue".into(), serde_json::json!(-9999.0));
        let mut cube = ds.get_cube("temp").unwrap().clone();
        cube.attrs = attrs;
        ds.cubes[0] = cube;
        assert_eq!(ds.get_cube("temp").unwrap().fill_value(), -9999.0);
    }

    #[test]
    fn display_lists_axes_and_cubes() {
        let rendering = format!("{}", dataset());
        assert!(rendering.contains("time: regular, length 3"));
        assert!(rendering.contains("temp(time, y): F32 [3, 2]"));
    }

    #[test]
    #[should_panic]
    fn duplicate_axis_names() {
        Dataset::new(vec![
            Axis::new("y", AxisValues::Bare(2)),
            Axis::new("y", AxisValues::Bare(3)),
        ]);
    }
}
