use crate::{rvec, RVec, Shape};

/// Per-axis strides plus a base offset into the backing allocation.
///
/// All flat positions are computed as `offset + Σ index[k] * strides[k]`.
/// Derived views (transpose, permute, slice, pack slots) manipulate the
/// stride vector and offset without touching the data.
#[derive(Clone, PartialEq, Eq, Default, Hash)]
pub struct Strides {
    strides: RVec<isize>,
    offset: isize,
}

impl Strides {
    pub fn to_vec(&self) -> Vec<isize> {
        self.strides.to_vec()
    }

    pub fn len(&self) -> usize {
        self.strides.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strides.is_empty()
    }

    pub fn base_offset(&self) -> isize {
        self.offset
    }

    pub fn with_offset(mut self, offset: isize) -> Self {
        self.offset = offset;
        self
    }

    pub fn inc_offset(mut self, delta: isize) -> Self {
        self.offset += delta;
        self
    }

    /// Flat position of a multi-index. The caller is responsible for
    /// range checking; see [`Shape::check_in_range`].
    #[inline]
    pub fn offset_of(&self, ix: &[usize]) -> isize {
        debug_assert_eq!(ix.len(), self.strides.len());
        self.offset
            + ix.iter()
                .zip(self.strides.iter())
                .map(|(&i, &s)| i as isize * s)
                .sum::<isize>()
    }

    /// True when the stride vector equals the default row-major strides
    /// for `shape` (no transpose, permute or slice applied). The base
    /// offset is not considered: a pack slot is regular within its range.
    pub fn is_regular(&self, shape: &Shape) -> bool {
        self.strides == Strides::from(shape).strides
    }

    /// Number of elements of backing store the view addresses, ignoring
    /// the base offset. Equal to `shape.numel()` exactly when the view
    /// has no gaps.
    pub fn memsize(&self, shape: &Shape) -> usize {
        if shape.numel() == 0 {
            return 0;
        }
        1 + shape
            .iter()
            .zip(self.strides.iter())
            .map(|(&d, &s)| (d - 1) * s.unsigned_abs())
            .sum::<usize>()
    }

    pub fn is_contiguous(&self, shape: &Shape) -> bool {
        self.memsize(shape) == shape.numel()
    }

    pub fn transposed(&self) -> Self {
        Self {
            strides: self.strides.iter().rev().copied().collect(),
            offset: self.offset,
        }
    }

    pub fn permuted(&self, perm: &[usize]) -> Self {
        debug_assert_eq!(perm.len(), self.strides.len());
        Self {
            strides: perm.iter().map(|&p| self.strides[p]).collect(),
            offset: self.offset,
        }
    }

    pub fn removed(&self, axis: usize) -> Self {
        debug_assert!(axis < self.strides.len());
        let mut strides = self.strides.clone();
        strides.remove(axis);
        Self {
            strides,
            offset: self.offset,
        }
    }
}

impl std::fmt::Debug for Strides {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut repr = format!("[{}", self.strides.first().unwrap_or(&0));
        for stride in self.strides.iter().skip(1) {
            repr.push_str(&format!("x{}", stride));
        }
        write!(f, "{}]", repr)?;
        if self.offset != 0 {
            write!(f, "+{}", self.offset)?;
        }
        Ok(())
    }
}

impl From<&Shape> for Strides {
    fn from(shape: &Shape) -> Self {
        let mut strides = rvec![];
        let mut stride = 1;
        for size in shape.inner().iter().rev() {
            strides.push(stride);
            stride *= *size as isize;
        }
        strides.reverse();
        Self { strides, offset: 0 }
    }
}

impl std::ops::Index<usize> for Strides {
    type Output = isize;

    fn index(&self, index: usize) -> &Self::Output {
        &self.strides[index]
    }
}

#[cfg(test)]
mod tests {
    use crate::shape;

    #[test]
    fn test_strides() {
        use super::*;
        let shape = shape![2, 3, 4];
        let strides = Strides::from(&shape);
        assert_eq!(strides.to_vec(), vec![12, 4, 1]);
        assert_eq!(strides.base_offset(), 0);
    }

    #[test]
    fn test_offset_of() {
        use super::*;
        let shape = shape![2, 3];
        let strides = Strides::from(&shape);
        assert_eq!(strides.offset_of(&[0, 0]), 0);
        assert_eq!(strides.offset_of(&[1, 2]), 5);
        assert_eq!(strides.clone().inc_offset(6).offset_of(&[1, 2]), 11);
    }

    #[test]
    fn test_classification() {
        use super::*;
        let shape = shape![2, 3];
        let strides = Strides::from(&shape);
        assert!(strides.is_regular(&shape));
        assert!(strides.is_contiguous(&shape));

        // Transposed: no longer regular, still gap-free.
        let t_shape = shape.transposed();
        let t_strides = strides.transposed();
        assert!(!t_strides.is_regular(&t_shape));
        assert!(t_strides.is_contiguous(&t_shape));

        // An inner-axis slice leaves gaps.
        let s_shape = shape.removed(1);
        let s_strides = strides.removed(1);
        assert!(!s_strides.is_contiguous(&s_shape));
        assert_eq!(s_strides.memsize(&s_shape), 4);
    }
}
