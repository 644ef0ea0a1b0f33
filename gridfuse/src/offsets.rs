//! Reconciling per-cube chunk offsets into per-axis offsets.
//!
use std::collections::HashMap;

use crate::{
    dataset::Cube,
    errors::{Error, Result},
};

/// Chunk offsets declared per cube, keyed by cube name then axis name.
///
/// An axis a cube doesn't declare is implicitly offset zero.
///
pub type DeclaredOffsets = HashMap<String, HashMap<String, usize>>;

/// Resolve declared offsets into a single offset per axis.
///
/// Cubes sharing an axis must agree on its offset, counting undeclared axes as zero, so
/// that one chunk grid serves every cube along that axis.
///
pub fn reconcile(cubes: &[Cube], declared: &DeclaredOffsets) -> Result<HashMap<String, usize>> {
    let mut offsets: HashMap<String, usize> = HashMap::new();
    for cube in cubes {
        let cube_offsets = declared.get(&cube.name);
        for dim in &cube.dims {
            let offset = cube_offsets
                .and_then(|offsets| offsets.get(dim))
                .copied()
                .unwrap_or(0);

            if let Some(&existing) = offsets.get(dim) {
                if existing != offset {
                    return Err(Error::ChunkOffsetConflict {
                        axis: dim.clone(),
                        left: existing,
                        right: offset,
                    });
                }
            } else {
                offsets.insert(dim.clone(), offset);
            }
        }
    }

    Ok(offsets)
}
