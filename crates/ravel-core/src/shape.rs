use crate::{RVec, ShapeIndexIterator};

#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct Shape(RVec<usize>);

impl Shape {
    pub fn new(shape: RVec<usize>) -> Self {
        Self(shape)
    }

    pub fn inner(&self) -> &RVec<usize> {
        &self.0
    }

    pub fn get(&self, index: usize) -> Option<&usize> {
        self.0.get(index)
    }

    pub fn numel(&self) -> usize {
        self.0.iter().product()
    }

    pub fn to_vec(&self) -> Vec<usize> {
        self.0.to_vec()
    }

    pub fn iter(&self) -> impl Iterator<Item = &usize> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn rank(&self) -> usize {
        self.len()
    }

    pub fn is_scalar(&self) -> bool {
        self.0.iter().all(|&x| x == 1)
    }

    /// Axis order reversed.
    pub fn transposed(&self) -> Self {
        Self(self.0.iter().rev().copied().collect())
    }

    /// Axes reordered per `perm`; `perm` must be a valid permutation of `0..rank`.
    pub fn permuted(&self, perm: &[usize]) -> Self {
        debug_assert_eq!(perm.len(), self.rank());
        Self(perm.iter().map(|&p| self.0[p]).collect())
    }

    /// The shape with one axis dropped.
    pub fn removed(&self, axis: usize) -> Self {
        debug_assert!(axis < self.rank());
        let mut dims = self.0.clone();
        dims.remove(axis);
        Self(dims)
    }

    /// Lazily yields every valid multi-index in row-major order.
    pub fn iter_indices(&self) -> ShapeIndexIterator<'_> {
        ShapeIndexIterator::new(self)
    }

    /// Bounds check for hot accessors. Active only in checked builds;
    /// release builds compile this to nothing and callers must not rely
    /// on it firing.
    #[inline]
    #[allow(unused_variables)]
    pub fn check_in_range(&self, ix: &[usize]) {
        #[cfg(debug_assertions)]
        {
            if ix.len() != self.rank() {
                panic!(
                    "index rank {} does not match shape rank {} of {:?}",
                    ix.len(),
                    self.rank(),
                    self
                );
            }
            for (axis, (&i, &extent)) in ix.iter().zip(self.0.iter()).enumerate() {
                if i >= extent {
                    panic!("index {i} out of range 0..{extent} on axis {axis} of {self:?}");
                }
            }
        }
    }
}

impl std::fmt::Debug for Shape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut shape = format!("[{}", self.0.first().unwrap_or(&0));
        for dim in self.0.iter().skip(1) {
            shape.push_str(&format!("x{}", dim));
        }
        write!(f, "{}]", shape)
    }
}

impl std::fmt::Display for Shape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl std::ops::Index<usize> for Shape {
    type Output = usize;

    fn index(&self, index: usize) -> &Self::Output {
        &self.0[index]
    }
}

impl From<Vec<usize>> for Shape {
    fn from(shape: Vec<usize>) -> Self {
        Self(shape.into())
    }
}

impl From<&[usize]> for Shape {
    fn from(slice: &[usize]) -> Self {
        Shape(slice.into())
    }
}

macro_rules! impl_try_into_for_shape {
    ($($N:expr),*) => {
        $(
            impl TryInto<[usize; $N]> for &Shape {
                type Error = anyhow::Error;

                fn try_into(self) -> Result<[usize; $N], Self::Error> {
                    if self.0.len() == $N {
                        let mut arr = [0; $N];
                        for (i, &item) in self.0.iter().enumerate().take($N) {
                            arr[i] = item;
                        }
                        Ok(arr)
                    } else {
                        Err(anyhow::anyhow!("Shape has length {} but expected {}", self.0.len(), $N))
                    }
                }
            }
        )*
    };
}

impl_try_into_for_shape!(0, 1, 2, 3, 4);

#[cfg(test)]
mod tests {
    use crate::shape;

    #[test]
    fn test_numel() {
        assert_eq!(shape![2, 3, 4].numel(), 24);
        assert_eq!(shape![].numel(), 1);
        assert_eq!(shape![3, 0, 2].numel(), 0);
    }

    #[test]
    fn test_derived_shapes() {
        let s = shape![2, 3, 4];
        assert_eq!(s.transposed(), shape![4, 3, 2]);
        assert_eq!(s.permuted(&[2, 0, 1]), shape![4, 2, 3]);
        assert_eq!(s.removed(1), shape![2, 4]);
    }

    #[test]
    fn test_try_into_array() {
        let s = shape![5, 7];
        let [m, n]: [usize; 2] = (&s).try_into().unwrap();
        assert_eq!((m, n), (5, 7));
        let bad: Result<[usize; 3], _> = (&s).try_into();
        assert!(bad.is_err());
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "out of range")]
    fn test_check_in_range_panics() {
        shape![2, 3].check_in_range(&[1, 3]);
    }
}
