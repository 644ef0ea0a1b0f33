//! Inference of how axes from different sources line up.
//!
use crate::{
    axis::{AxisKind, AxisValues},
    errors::{Error, Result},
};

/// How the values one axis carries in several sources combine into a single axis.
///
#[derive(Clone, Debug, PartialEq)]
pub enum AxisJoin {
    /// Every source carries the same values. The axis contributes one block.
    AllEqual(AxisValues),

    /// Sources carry disjoint monotonic runs that concatenate, in `order`, into one
    /// monotonic sequence. Each source contributes one block.
    SortedRanges {
        sequences: Vec<AxisValues>,
        order: Vec<usize>,
    },

    /// A new axis not present in any source, one block per source.
    NewDim(AxisValues),
}

impl AxisJoin {
    /// Number of blocks this axis contributes to the merged block grid.
    ///
    pub fn blocks(&self) -> usize {
        match self {
            Self::AllEqual(_) => 1,
            Self::SortedRanges { sequences, .. } => sequences.len(),
            Self::NewDim(values) => values.len(),
        }
    }

    /// The block index a source's data lands in along this axis.
    ///
    pub fn position(&self, source: usize) -> usize {
        match self {
            Self::AllEqual(_) => 0,
            Self::SortedRanges { order, .. } => order
                .iter()
                .position(|&s| s == source)
                .expect("source is not part of this join"),
            Self::NewDim(_) => source,
        }
    }

    /// The values of the combined axis.
    ///
    pub fn whole(&self) -> AxisValues {
        match self {
            Self::AllEqual(values) => values.clone(),
            Self::SortedRanges { sequences, order } => {
                let parts: Vec<&AxisValues> = order.iter().map(|&s| &sequences[s]).collect();
                AxisValues::concat(&parts)
            }
            Self::NewDim(values) => values.clone(),
        }
    }
}

/// Work out how the values an axis carries in each source combine.
///
/// Numeric axes that differ between sources must form disjoint monotonic runs, all in the
/// same direction, that can be reordered into one monotonic sequence. Label and bare axes
/// have no ordering to exploit, so they must be identical everywhere.
///
pub fn analyze(axis: &str, sources: &[&AxisValues]) -> Result<AxisJoin> {
    assert!(!sources.is_empty(), "axis join requires at least one source");

    let class = kind_class(sources[0]);
    if sources[1..].iter().any(|values| kind_class(values) != class) {
        return Err(Error::InconsistentAxisKind { axis: axis.into() });
    }

    if sources[1..].iter().all(|values| sources[0].same_values(values)) {
        return Ok(AxisJoin::AllEqual(sources[0].clone()));
    }

    if class != KindClass::Numeric {
        // No ordering to fall back on.
        return Err(Error::InconsistentOrdering { axis: axis.into() });
    }

    let sequences: Vec<Vec<f64>> = sources
        .iter()
        .map(|values| values.numeric().unwrap())
        .collect();

    let mut ascending = false;
    let mut descending = false;
    for sequence in &sequences {
        if sequence.is_empty() || sequence.iter().any(|value| value.is_nan()) {
            return Err(Error::InconsistentOrdering { axis: axis.into() });
        }

        let non_decreasing = sequence.windows(2).all(|pair| pair[0] <= pair[1]);
        let non_increasing = sequence.windows(2).all(|pair| pair[0] >= pair[1]);
        match (non_decreasing, non_increasing) {
            (false, false) => return Err(Error::InconsistentOrdering { axis: axis.into() }),
            (true, false) => ascending = true,
            (false, true) => descending = true,
            (true, true) => {} // constant or single element, direction-neutral
        }
    }
    if ascending && descending {
        return Err(Error::InconsistentOrdering { axis: axis.into() });
    }

    let bounds: Vec<(f64, f64)> = sequences
        .iter()
        .map(|sequence| {
            let min = sequence.iter().copied().fold(f64::INFINITY, f64::min);
            let max = sequence.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            (min, max)
        })
        .collect();

    let mut order: Vec<usize> = (0..sequences.len()).collect();
    if descending {
        order.sort_by(|&left, &right| bounds[right].1.partial_cmp(&bounds[left].1).unwrap());
    } else {
        order.sort_by(|&left, &right| bounds[left].0.partial_cmp(&bounds[right].0).unwrap());
    }

    for pair in order.windows(2) {
        let (earlier, later) = (bounds[pair[0]], bounds[pair[1]]);
        let disjoint = if descending {
            earlier.0 > later.1
        } else {
            earlier.1 < later.0
        };
        if !disjoint {
            return Err(Error::OverlappingRanges { axis: axis.into() });
        }
    }

    Ok(AxisJoin::SortedRanges {
        sequences: sources.iter().map(|&values| values.clone()).collect(),
        order,
    })
}

#[derive(Copy, Clone, PartialEq, Eq)]
enum KindClass {
    Numeric,
    Categorical,
    Positional,
}

fn kind_class(values: &AxisValues) -> KindClass {
    match values.kind() {
        AxisKind::Regular | AxisKind::Irregular => KindClass::Numeric,
        AxisKind::Categorical => KindClass::Categorical,
        AxisKind::Positional => KindClass::Positional,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::axis::IntRange;

    fn seq(values: &[i64]) -> AxisValues {
        AxisValues::SeqI64(values.to_vec())
    }

    fn fseq(values: &[f64]) -> AxisValues {
        AxisValues::SeqF64(values.to_vec())
    }

    #[test]
    fn identical_sources_are_all_equal() -> Result<()> {
        let range = AxisValues::RangeI64(IntRange::new(0, 10, 4));
        let explicit = seq(&[0, 10, 20, 30]);
        let join = analyze("time", &[&range, &explicit])?;
        assert_eq!(join, AxisJoin::AllEqual(range.clone()));
        assert_eq!(join.blocks(), 1);
        assert_eq!(join.position(0), 0);
        assert_eq!(join.position(1), 0);

        Ok(())
    }

    #[test]
    fn disjoint_ascending_runs_sort() -> Result<()> {
        let join = analyze("time", &[&seq(&[3]), &seq(&[1]), &seq(&[2])])?;
        match &join {
            AxisJoin::SortedRanges { order, .. } => assert_eq!(order, &[1, 2, 0]),
            _ => panic!("expected sorted ranges"),
        }
        assert_eq!(join.blocks(), 3);
        assert_eq!(join.position(1), 0);
        assert_eq!(join.position(2), 1);
        assert_eq!(join.position(0), 2);
        assert_eq!(join.whole(), seq(&[1, 2, 3]));

        Ok(())
    }

    #[test]
    fn descending_runs_sort_in_reverse() -> Result<()> {
        let join = analyze("depth", &[&fseq(&[2.0, 1.0]), &fseq(&[9.0, 5.0])])?;
        assert_eq!(join.whole(), fseq(&[9.0, 5.0, 2.0, 1.0]));
        assert_eq!(join.position(1), 0);
        assert_eq!(join.position(0), 1);

        Ok(())
    }

    #[test]
    fn single_element_runs_follow_the_majority() -> Result<()> {
        // [5] on its own is direction-neutral
        let join = analyze("depth", &[&fseq(&[5.0]), &fseq(&[4.0, 3.0])])?;
        assert_eq!(join.whole(), fseq(&[5.0, 4.0, 3.0]));

        Ok(())
    }

    #[test]
    fn shared_boundary_value_overlaps() {
        let result = analyze("time", &[&seq(&[1, 2]), &seq(&[2, 3])]);
        assert!(matches!(result, Err(Error::OverlappingRanges { .. })));
    }

    #[test]
    fn interleaved_runs_overlap() {
        let result = analyze("time", &[&seq(&[1, 5]), &seq(&[3, 8])]);
        assert!(matches!(result, Err(Error::OverlappingRanges { .. })));
    }

    #[test]
    fn mixed_kinds_are_inconsistent() {
        let labels = AxisValues::Labels(vec!["a".into()]);
        let result = analyze("station", &[&seq(&[1]), &labels]);
        assert!(matches!(result, Err(Error::InconsistentAxisKind { .. })));
    }

    #[test]
    fn mixed_directions_are_inconsistent() {
        let result = analyze("time", &[&seq(&[1, 2]), &seq(&[9, 8])]);
        assert!(matches!(result, Err(Error::InconsistentOrdering { .. })));
    }

    #[test]
    fn unsorted_run_is_inconsistent() {
        let result = analyze("time", &[&seq(&[1, 3, 2]), &seq(&[5, 6])]);
        assert!(matches!(result, Err(Error::InconsistentOrdering { .. })));
    }

    #[test]
    fn nan_values_are_inconsistent() {
        let result = analyze("time", &[&fseq(&[1.0, f64::NAN]), &fseq(&[5.0])]);
        assert!(matches!(result, Err(Error::InconsistentOrdering { .. })));
    }

    #[test]
    fn empty_sequence_is_inconsistent() {
        let result = analyze("time", &[&fseq(&[]), &fseq(&[5.0])]);
        assert!(matches!(result, Err(Error::InconsistentOrdering { .. })));
    }

    #[test]
    fn divergent_labels_are_inconsistent() {
        let left = AxisValues::Labels(vec!["a".into(), "b".into()]);
        let right = AxisValues::Labels(vec!["b".into(), "a".into()]);
        let result = analyze("station", &[&left, &right]);
        assert!(matches!(result, Err(Error::InconsistentOrdering { .. })));
    }

    #[test]
    fn bare_axes_of_equal_length_are_all_equal() -> Result<()> {
        let join = analyze("y", &[&AxisValues::Bare(4), &AxisValues::Bare(4)])?;
        assert_eq!(join, AxisJoin::AllEqual(AxisValues::Bare(4)));

        Ok(())
    }

    #[test]
    fn bare_axes_of_unequal_length_are_inconsistent() {
        let result = analyze("y", &[&AxisValues::Bare(4), &AxisValues::Bare(5)]);
        assert!(matches!(result, Err(Error::InconsistentOrdering { .. })));
    }
}
