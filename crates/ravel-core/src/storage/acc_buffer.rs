use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Accelerator-resident byte block.
///
/// Only the installed [`crate::Accelerator`] backend touches its
/// contents; the core addresses it exclusively through byte offsets
/// handed to the backend primitives. The reference
/// [`crate::EmulatedAccelerator`] keeps the bytes in host memory; a
/// hardware backend would treat the block as an opaque device handle.
/// `Clone` aliases, same as [`crate::CPUBuffer`].
#[derive(Clone, Debug)]
pub struct ACCBuffer {
    inner: Arc<RwLock<Vec<u8>>>,
}

impl ACCBuffer {
    pub fn uninit(n_bytes: usize) -> Self {
        Self {
            inner: Arc::new(RwLock::new(vec![0u8; n_bytes])),
        }
    }

    pub fn n_bytes(&self) -> usize {
        self.inner.read().len()
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Backend-side access to the raw bytes.
    pub fn read(&self) -> RwLockReadGuard<'_, Vec<u8>> {
        self.inner.read()
    }

    /// Backend-side access to the raw bytes.
    pub fn write(&self) -> RwLockWriteGuard<'_, Vec<u8>> {
        self.inner.write()
    }
}
