//! N-dimensional index geometry.
//!
use std::ops::Range;

/// A rectangular region of an n-dimensional array, as half open index ranges.
///
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Window {
    axes: Vec<Range<usize>>,
}

impl Window {
    pub fn new(axes: Vec<Range<usize>>) -> Self {
        for range in &axes {
            assert!(range.start <= range.end, "window range is reversed");
        }

        Self { axes }
    }

    /// The window covering the whole of an array with the given shape.
    ///
    pub fn whole(shape: &[usize]) -> Self {
        Self {
            axes: shape.iter().map(|&n| 0..n).collect(),
        }
    }

    pub fn ndim(&self) -> usize {
        self.axes.len()
    }

    pub fn shape(&self) -> Vec<usize> {
        self.axes.iter().map(|range| range.end - range.start).collect()
    }

    pub fn axes(&self) -> &[Range<usize>] {
        &self.axes
    }

    pub fn axis(&self, dimension: usize) -> &Range<usize> {
        &self.axes[dimension]
    }

    pub fn len(&self, dimension: usize) -> usize {
        let range = &self.axes[dimension];
        range.end - range.start
    }

    pub fn is_empty(&self) -> bool {
        self.axes.iter().any(|range| range.start == range.end)
    }

    /// Shift every range by a per-axis displacement.
    ///
    pub fn translate(&self, displacement: &[usize]) -> Self {
        assert_eq!(self.axes.len(), displacement.len());
        Self {
            axes: self
                .axes
                .iter()
                .zip(displacement)
                .map(|(range, shift)| range.start + shift..range.end + shift)
                .collect(),
        }
    }
}

/// Iterate the coordinates of a grid with the given shape, in row major order.
///
pub fn grid(shape: &[usize]) -> GridIter {
    let next = if shape.contains(&0) {
        None
    } else {
        Some(vec![0; shape.len()])
    };

    GridIter {
        shape: shape.to_vec(),
        next,
    }
}

pub struct GridIter {
    shape: Vec<usize>,
    next: Option<Vec<usize>>,
}

impl Iterator for GridIter {
    type Item = Vec<usize>;

    fn next(&mut self) -> Option<Self::Item> {
        let coord = self.next.take()?;
        let mut succ = coord.clone();
        for dimension in (0..succ.len()).rev() {
            succ[dimension] += 1;
            if succ[dimension] < self.shape[dimension] {
                self.next = Some(succ);
                break;
            }
            succ[dimension] = 0;
        }

        Some(coord)
    }
}

/// Convert grid coordinates to a flat, row major index.
///
pub fn flatten(coord: &[usize], shape: &[usize]) -> usize {
    assert_eq!(coord.len(), shape.len());
    coord
        .iter()
        .zip(shape)
        .fold(0, |index, (&i, &n)| index * n + i)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_shape() {
        let window = Window::new(vec![2..5, 0..4]);
        assert_eq!(window.ndim(), 2);
        assert_eq!(window.shape(), vec![3, 4]);
        assert_eq!(window.len(0), 3);
        assert!(!window.is_empty());
    }

    #[test]
    fn window_whole() {
        let window = Window::whole(&[3, 4, 5]);
        assert_eq!(window.axes(), &[0..3, 0..4, 0..5]);
    }

    #[test]
    fn window_translate() {
        let window = Window::new(vec![0..2, 1..3]);
        assert_eq!(window.translate(&[10, 0]), Window::new(vec![10..12, 1..3]));
    }

    #[test]
    fn window_empty() {
        let window = Window::new(vec![2..2, 0..4]);
        assert!(window.is_empty());
    }

    #[test]
    #[should_panic]
    fn window_reversed_range() {
        Window::new(vec![5..2]);
    }

    #[test]
    fn grid_row_major() {
        let coords: Vec<Vec<usize>> = grid(&[2, 3]).collect();
        assert_eq!(
            coords,
            vec![
                vec![0, 0],
                vec![0, 1],
                vec![0, 2],
                vec![1, 0],
                vec![1, 1],
                vec![1, 2],
            ]
        );
    }

    #[test]
    fn grid_empty_axis() {
        assert_eq!(grid(&[2, 0]).count(), 0);
    }

    #[test]
    fn grid_zero_dimensional() {
        let coords: Vec<Vec<usize>> = grid(&[]).collect();
        assert_eq!(coords, vec![Vec::<usize>::new()]);
    }

    #[test]
    fn flatten_row_major() {
        assert_eq!(flatten(&[0, 0], &[2, 3]), 0);
        assert_eq!(flatten(&[1, 2], &[2, 3]), 5);
        assert_eq!(flatten(&[1, 0, 1], &[2, 2, 2]), 5);
    }
}
