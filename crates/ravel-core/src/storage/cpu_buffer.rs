use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::TensorDType;

/// Host-resident element buffer.
///
/// `Clone` aliases the same allocation: every view and pack slot derived
/// from a tensor holds one of these, and the backing store is released
/// when the last one drops. There is no internal synchronization beyond
/// the lock's own exclusivity; concurrent mutation of aliasing views
/// must be serialized by the caller.
#[derive(Clone, Debug)]
pub struct CPUBuffer<T: TensorDType> {
    inner: Arc<RwLock<Vec<T>>>,
}

impl<T: TensorDType> CPUBuffer<T> {
    /// Fresh storage for `numel` elements. Safe Rust has no uninitialized
    /// reads, so "uninitialized" storage is a zeroed allocation.
    pub fn uninit(numel: usize) -> Self {
        Self::zeros(numel)
    }

    pub fn zeros(numel: usize) -> Self {
        Self {
            inner: Arc::new(RwLock::new(vec![T::zero(); numel])),
        }
    }

    pub fn from_slice(data: &[T]) -> Self {
        Self {
            inner: Arc::new(RwLock::new(data.to_vec())),
        }
    }

    pub fn n_elements(&self) -> usize {
        self.inner.read().len()
    }

    pub fn n_bytes(&self) -> usize {
        self.n_elements() * std::mem::size_of::<T>()
    }

    /// True when both handles alias the same allocation.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn read(&self) -> RwLockReadGuard<'_, Vec<T>> {
        self.inner.read()
    }

    pub(crate) fn write(&self) -> RwLockWriteGuard<'_, Vec<T>> {
        self.inner.write()
    }

    pub fn deep_clone(&self) -> Self {
        Self::from_slice(&self.read())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clone_aliases() {
        let a = CPUBuffer::<f32>::zeros(4);
        let b = a.clone();
        assert!(a.ptr_eq(&b));
        b.write()[2] = 5.0;
        assert_eq!(a.read()[2], 5.0);
    }

    #[test]
    fn test_deep_clone_detaches() {
        let a = CPUBuffer::<i32>::from_slice(&[1, 2, 3]);
        let b = a.deep_clone();
        assert!(!a.ptr_eq(&b));
        b.write()[0] = 9;
        assert_eq!(a.read()[0], 1);
    }
}
