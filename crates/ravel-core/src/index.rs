use crate::{rvec, RVec, Shape};

/// An ordered coordinate sequence addressing one element of a view.
pub type MultiIndex = RVec<usize>;

/// Anything usable as an index into a [`crate::Tensor`]: a full
/// multi-index, or explicit per-axis coordinates for ranks 1 through 4.
/// Higher ranks must go through the multi-index form.
pub trait TensorIndex {
    fn coords(&self) -> MultiIndex;
}

impl TensorIndex for usize {
    fn coords(&self) -> MultiIndex {
        rvec![*self]
    }
}

impl TensorIndex for (usize, usize) {
    fn coords(&self) -> MultiIndex {
        rvec![self.0, self.1]
    }
}

impl TensorIndex for (usize, usize, usize) {
    fn coords(&self) -> MultiIndex {
        rvec![self.0, self.1, self.2]
    }
}

impl TensorIndex for (usize, usize, usize, usize) {
    fn coords(&self) -> MultiIndex {
        rvec![self.0, self.1, self.2, self.3]
    }
}

impl TensorIndex for &[usize] {
    fn coords(&self) -> MultiIndex {
        self.iter().copied().collect()
    }
}

impl TensorIndex for &MultiIndex {
    fn coords(&self) -> MultiIndex {
        (*self).clone()
    }
}

/// Finite, restartable, row-major iteration over every valid multi-index
/// of a shape. The last axis varies fastest; each element is visited
/// exactly once. Drives the element-wise fallbacks for non-contiguous
/// copy and arithmetic, independent of storage layout.
#[derive(Clone)]
pub struct ShapeIndexIterator<'a> {
    shape: &'a Shape,
    next: Option<MultiIndex>,
}

impl<'a> ShapeIndexIterator<'a> {
    pub fn new(shape: &'a Shape) -> Self {
        let next = if shape.numel() == 0 {
            None
        } else {
            Some(rvec![0usize; shape.rank()])
        };
        Self { shape, next }
    }

    /// Rewinds to the first index.
    pub fn reset(&mut self) {
        *self = Self::new(self.shape);
    }
}

impl Iterator for ShapeIndexIterator<'_> {
    type Item = MultiIndex;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next.take()?;
        let mut succ = current.clone();
        let mut axis = self.shape.rank();
        while axis > 0 {
            axis -= 1;
            succ[axis] += 1;
            if succ[axis] < self.shape[axis] {
                self.next = Some(succ);
                break;
            }
            succ[axis] = 0;
        }
        Some(current)
    }
}
