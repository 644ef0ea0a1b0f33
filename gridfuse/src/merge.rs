//! Combining datasets by aligning their axes.
//!
use std::{collections::HashMap, sync::Arc};

use crate::{
    axis::AxisValues,
    concat::ConcatArray,
    dataset::{Attrs, Axis, Cube, Dataset},
    errors::{Error, Result},
    geom,
    join::{self, AxisJoin},
    source::{ExpandDims, Source},
};

/// Merge datasets into one by inferring, from their axis values, how they line up.
///
/// Axes are combined per [`join::analyze`]. Each qualifying cube, one present in every
/// source, becomes a lazy block grid over the sources' data. Cubes missing from any
/// source are dropped. Dataset attributes come from the first source; axis and cube
/// attributes are merged left to right, later sources overwriting on collision.
///
pub fn merge(sources: &[Dataset]) -> Result<Dataset> {
    assert!(!sources.is_empty(), "merge requires at least one dataset");
    if sources.len() == 1 {
        return Ok(sources[0].clone());
    }

    let axis_names = union(sources.iter().flat_map(|ds| ds.axes().iter().map(|a| &a.name)));
    let mut joins = HashMap::new();
    for name in &axis_names {
        let values: Vec<&AxisValues> = sources
            .iter()
            .filter_map(|ds| ds.get_axis(name))
            .map(|axis| &axis.values)
            .collect();
        joins.insert(name.clone(), join::analyze(name, &values)?);
    }

    let mut cubes = vec![];
    for name in &union(sources.iter().flat_map(|ds| ds.cubes().iter().map(|c| &c.name))) {
        if sources.iter().any(|ds| ds.get_cube(name).is_none()) {
            log::debug!("dropping cube {name:?}: not present in every source");
            continue;
        }
        cubes.push(merge_cube(name, sources, &joins)?);
    }

    let axes = axis_names
        .iter()
        .map(|name| {
            let attrs = merge_attrs(
                sources
                    .iter()
                    .filter_map(|ds| ds.get_axis(name))
                    .map(|axis| &axis.attrs),
            );
            Axis::with_attrs(name.clone(), joins[name].whole(), attrs)
        })
        .collect();

    Ok(Dataset::assemble(axes, cubes, sources[0].attrs.clone()))
}

fn merge_cube(
    name: &str,
    sources: &[Dataset],
    joins: &HashMap<String, AxisJoin>,
) -> Result<Cube> {
    let first = sources[0].get_cube(name).unwrap();
    let dims = first.dims.clone();
    let grid: Vec<usize> = dims.iter().map(|dim| joins[dim].blocks()).collect();
    let n_cells: usize = grid.iter().product();
    if n_cells != sources.len() {
        return Err(Error::ShapeMismatch {
            name: name.into(),
            reason: format!(
                "{} sources don't fill a {:?} block grid over ({})",
                sources.len(),
                grid,
                dims.join(", ")
            ),
        });
    }

    let mut cells: Vec<Option<Arc<dyn Source>>> = vec![None; n_cells];
    for (index, ds) in sources.iter().enumerate() {
        let cube = ds.get_cube(name).unwrap();
        if cube.dims != dims {
            return Err(Error::ShapeMismatch {
                name: name.into(),
                reason: "sources disagree on dimensions".into(),
            });
        }

        let coord: Vec<usize> = dims.iter().map(|dim| joins[dim].position(index)).collect();
        let flat = geom::flatten(&coord, &grid);
        if cells[flat].is_some() {
            return Err(Error::ShapeMismatch {
                name: name.into(),
                reason: "two sources occupy the same block".into(),
            });
        }
        cells[flat] = Some(Arc::clone(&cube.data));
    }

    let composite = ConcatArray::new(name, grid, cells, first.fill_value())?;
    let attrs = merge_attrs(sources.iter().map(|ds| &ds.get_cube(name).unwrap().attrs));

    Ok(Cube {
        name: name.into(),
        dims,
        data: Arc::new(composite),
        attrs,
    })
}

/// Stack datasets along a new leading axis.
///
/// Every shared axis must carry the same values in every source that has it. `axis`
/// names the new dimension and must have one value per source.
///
pub fn stack(sources: &[Dataset], axis: Axis) -> Result<Dataset> {
    assert!(!sources.is_empty(), "stack requires at least one dataset");
    if axis.len() != sources.len() {
        let got = axis.len();
        return Err(Error::SizeMismatch {
            name: axis.name,
            expected: sources.len(),
            got,
        });
    }
    if sources.iter().any(|ds| ds.get_axis(&axis.name).is_some()) {
        return Err(Error::AlreadyExists(axis.name));
    }

    let axis_names = union(sources.iter().flat_map(|ds| ds.axes().iter().map(|a| &a.name)));
    for name in &axis_names {
        let values: Vec<&AxisValues> = sources
            .iter()
            .filter_map(|ds| ds.get_axis(name))
            .map(|ax| &ax.values)
            .collect();
        if !matches!(join::analyze(name, &values)?, AxisJoin::AllEqual(_)) {
            return Err(Error::ShapeMismatch {
                name: name.clone(),
                reason: "sources must agree on every shared axis when stacking".into(),
            });
        }
    }

    let mut cubes = vec![];
    for name in &union(sources.iter().flat_map(|ds| ds.cubes().iter().map(|c| &c.name))) {
        if sources.iter().any(|ds| ds.get_cube(name).is_none()) {
            log::debug!("dropping cube {name:?}: not present in every source");
            continue;
        }

        let first = sources[0].get_cube(name).unwrap();
        let mut cells: Vec<Option<Arc<dyn Source>>> = vec![];
        for ds in sources {
            let cube = ds.get_cube(name).unwrap();
            if cube.dims != first.dims {
                return Err(Error::ShapeMismatch {
                    name: name.clone(),
                    reason: "sources disagree on dimensions".into(),
                });
            }
            cells.push(Some(Arc::new(ExpandDims::new(Arc::clone(&cube.data)))));
        }

        let mut grid = vec![sources.len()];
        grid.extend(std::iter::repeat(1).take(first.dims.len()));
        let composite = ConcatArray::new(name, grid, cells, first.fill_value())?;

        let mut dims = vec![axis.name.clone()];
        dims.extend(first.dims.iter().cloned());
        let attrs = merge_attrs(sources.iter().map(|ds| &ds.get_cube(name).unwrap().attrs));

        cubes.push(Cube {
            name: name.clone(),
            dims,
            data: Arc::new(composite),
            attrs,
        });
    }

    let mut axes = vec![axis];
    for name in &axis_names {
        let attrs = merge_attrs(
            sources
                .iter()
                .filter_map(|ds| ds.get_axis(name))
                .map(|ax| &ax.attrs),
        );
        let values = sources
            .iter()
            .find_map(|ds| ds.get_axis(name))
            .unwrap()
            .values
            .clone();
        axes.push(Axis::with_attrs(name.clone(), values, attrs));
    }

    Ok(Dataset::assemble(axes, cubes, sources[0].attrs.clone()))
}

fn union<'a>(names: impl Iterator<Item = &'a String>) -> Vec<String> {
    let mut seen = vec![];
    for name in names {
        if !seen.contains(name) {
            seen.push(name.clone());
        }
    }

    seen
}

/// Combine attribute maps left to right, later values overwriting earlier ones.
///
fn merge_attrs<'a>(parts: impl Iterator<Item = &'a Attrs>) -> Attrs {
    let mut attrs = Attrs::new();
    for part in parts {
        for (key, value) in part {
            attrs.insert(key.clone(), value.clone());
        }
    }

    attrs
}
