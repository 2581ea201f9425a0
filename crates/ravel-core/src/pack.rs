use crate::{Device, Shape, Storage, Strides, Tensor, TensorDType, TensorError};

/// One slot of a pack directory: the slot's shape and its starting
/// element offset in the flat backing buffer.
#[derive(Debug, Clone, PartialEq, derive_new::new)]
pub struct PackEntry {
    pub shape: Shape,
    pub offset: usize,
}

/// Immutable directory of pack slots. Offsets are assigned sequentially
/// at construction, so slot ranges never overlap.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PackDir {
    entries: Vec<PackEntry>,
    total: usize,
}

impl PackDir {
    pub fn from_shapes(shapes: &[Shape]) -> Self {
        let mut entries = Vec::with_capacity(shapes.len());
        let mut total = 0;
        for s in shapes {
            entries.push(PackEntry::new(s.clone(), total));
            total += s.numel();
        }
        Self { entries, total }
    }

    /// `n` slots of the same shape.
    pub fn uniform(shape: Shape, n: usize) -> Self {
        Self::from_shapes(&vec![shape; n])
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total element count across all slots.
    pub fn total(&self) -> usize {
        self.total
    }

    pub fn shape(&self, i: usize) -> Option<&Shape> {
        self.entries.get(i).map(|e| &e.shape)
    }

    pub fn offset(&self, i: usize) -> Option<usize> {
        self.entries.get(i).map(|e| e.offset)
    }
}

/// A collection of tensors of possibly differing shapes packed into one
/// flat allocation, addressed through a [`PackDir`].
///
/// There is deliberately no `Clone` impl: duplicating a pack duplicates
/// its whole allocation, which callers must spell out as
/// [`TensorPack::deep_clone`]. Handing a pack around is a Rust move.
pub struct TensorPack<T: TensorDType> {
    storage: Storage<T>,
    dir: PackDir,
    device: Device,
}

impl<T: TensorDType> TensorPack<T> {
    pub fn uninit(dir: PackDir, device: Device) -> Result<Self, TensorError> {
        log::debug!(
            "allocating TensorPack of {} slots, {} elements, on {:?}",
            dir.len(),
            dir.total(),
            device
        );
        let storage = Storage::uninit(dir.total(), device)?;
        Ok(Self {
            storage,
            dir,
            device,
        })
    }

    pub fn zeros(dir: PackDir, device: Device) -> Result<Self, TensorError> {
        let storage = Storage::zeros(dir.total(), device)?;
        Ok(Self {
            storage,
            dir,
            device,
        })
    }

    /// Flat position `i` of the backing buffer gets value `i`,
    /// running straight across slot boundaries.
    pub fn sequential(dir: PackDir, device: Device) -> Result<Self, TensorError> {
        let data: Vec<T> = (0..dir.total()).map(|i| T::from_f64(i as f64)).collect();
        let storage = Storage::from_slice(&data, device)?;
        Ok(Self {
            storage,
            dir,
            device,
        })
    }

    /// Every slot filled with IID standard-normal samples scaled by `c`.
    #[cfg(feature = "rand")]
    pub fn gaussian(dir: PackDir, c: T, device: Device) -> Result<Self, TensorError>
    where
        T: num_traits::Float,
    {
        use rand::prelude::*;
        let mut rng = rand::thread_rng();
        let data = (0..dir.total())
            .map(|_| {
                let sample: f32 = rand_distr::StandardNormal.sample(&mut rng);
                T::from(sample).expect("Failed to convert sample") * c
            })
            .collect::<Vec<_>>();
        let storage = Storage::from_slice(&data, device)?;
        Ok(Self {
            storage,
            dir,
            device,
        })
    }

    /// Zero-filled pack with one slot per shape.
    pub fn from_shapes(shapes: &[Shape], device: Device) -> Result<Self, TensorError> {
        Self::zeros(PackDir::from_shapes(shapes), device)
    }

    /// Packs copies of the given tensors, slot by slot. Sources may live
    /// on any device; their residency is untouched.
    pub fn from_tensors(tensors: &[Tensor<T>], device: Device) -> Result<Self, TensorError> {
        let shapes: Vec<Shape> = tensors.iter().map(|t| t.shape().clone()).collect();
        let pack = Self::uninit(PackDir::from_shapes(&shapes), device)?;
        for (i, t) in tensors.iter().enumerate() {
            pack.get(i)?.copy_from(t)?;
        }
        Ok(pack)
    }

    pub fn len(&self) -> usize {
        self.dir.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dir.is_empty()
    }

    pub fn total(&self) -> usize {
        self.dir.total()
    }

    pub fn device(&self) -> Device {
        self.device
    }

    pub fn dir(&self) -> &PackDir {
        &self.dir
    }

    /// View of slot `i`, aliasing exactly its range of the backing
    /// buffer. Writes through the view land in the pack.
    pub fn get(&self, i: usize) -> Result<Tensor<T>, TensorError> {
        let entry = self
            .dir
            .entries
            .get(i)
            .ok_or(TensorError::SlotOutOfRange {
                slot: i,
                len: self.dir.len(),
            })?;
        let strides = Strides::from(&entry.shape).with_offset(entry.offset as isize);
        Ok(Tensor::from_parts(
            self.storage.clone(),
            entry.shape.clone(),
            strides,
            self.device,
        ))
    }

    /// Rank-1 view over the whole backing buffer, slot boundaries
    /// ignored.
    pub fn flat_view(&self) -> Tensor<T> {
        let shape = crate::shape![self.dir.total()];
        let strides = Strides::from(&shape);
        Tensor::from_parts(self.storage.clone(), shape, strides, self.device)
    }

    /// Re-homes the pack in place. A no-op when already resident on
    /// `device`; otherwise the flat buffer is transported and the
    /// storage swapped, so outstanding slot views keep seeing the old
    /// allocation.
    pub fn move_to_device(&mut self, device: Device) -> Result<(), TensorError> {
        if device == self.device {
            return Ok(());
        }
        log::debug!(
            "moving TensorPack of {} slots {:?} -> {:?}",
            self.dir.len(),
            self.device,
            device
        );
        let moved = self.flat_view().to(device)?;
        let (storage, _, _, dev) = moved.into_parts();
        self.storage = storage;
        self.device = dev;
        Ok(())
    }

    /// Copies the whole allocation. Expensive and therefore loud.
    pub fn deep_clone(&self) -> Result<Self, TensorError> {
        log::warn!("deep-cloning a TensorPack of {} elements", self.dir.total());
        Ok(Self {
            storage: self.storage.deep_clone()?,
            dir: self.dir.clone(),
            device: self.device,
        })
    }
}

impl<T: TensorDType> std::fmt::Debug for TensorPack<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TensorPack")
            .field("dir", &self.dir)
            .field("device", &self.device)
            .finish()
    }
}

impl<T: TensorDType> std::fmt::Display for TensorPack<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for i in 0..self.len() {
            writeln!(f, "Tensor {}:", i)?;
            match self.get(i) {
                Ok(t) => write!(f, "{}", t)?,
                Err(e) => writeln!(f, "  <{}>", e)?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{set_accelerator, shape, EmulatedAccelerator};

    fn install_emulated() {
        let _ = env_logger::builder().is_test(true).try_init();
        let _ = set_accelerator(Box::new(EmulatedAccelerator));
    }

    fn mixed_dir() -> PackDir {
        PackDir::from_shapes(&[shape![2, 3], shape![4], shape![2, 2]])
    }

    #[test]
    fn test_dir_offsets_and_total() {
        let dir = mixed_dir();
        assert_eq!(dir.len(), 3);
        assert_eq!(dir.total(), 6 + 4 + 4);
        assert_eq!(dir.offset(0), Some(0));
        assert_eq!(dir.offset(1), Some(6));
        assert_eq!(dir.offset(2), Some(10));
        assert_eq!(dir.shape(1), Some(&shape![4]));
        assert_eq!(dir.shape(3), None);

        let u = PackDir::uniform(shape![2, 2], 3);
        assert_eq!(u.total(), 12);
        assert_eq!(u.offset(2), Some(8));
    }

    #[test]
    fn test_slot_isolation() {
        let pack = TensorPack::<f32>::zeros(mixed_dir(), Device::CPU).unwrap();
        let slot1 = pack.get(1).unwrap();
        slot1.set(0, 7.0);
        slot1.set(3, 9.0);
        assert_eq!(pack.get(0).unwrap().sum().unwrap(), 0.0);
        assert_eq!(pack.get(2).unwrap().sum().unwrap(), 0.0);
        assert_eq!(pack.get(1).unwrap().to_vec().unwrap(), vec![7.0, 0.0, 0.0, 9.0]);
        // The flat view sees the writes at the slot's offset.
        let flat = pack.flat_view();
        assert_eq!(flat.get(6), 7.0);
        assert_eq!(flat.get(9), 9.0);
    }

    #[test]
    fn test_sequential_runs_across_slots() {
        let pack = TensorPack::<f32>::sequential(mixed_dir(), Device::CPU).unwrap();
        assert_eq!(pack.get(0).unwrap().get((1, 2)), 5.0);
        assert_eq!(pack.get(1).unwrap().get(0), 6.0);
        assert_eq!(pack.get(2).unwrap().get((0, 0)), 10.0);
    }

    #[test]
    fn test_slot_reshape_stays_in_range() {
        let pack = TensorPack::<f32>::sequential(mixed_dir(), Device::CPU).unwrap();
        let flat1 = pack.get(1).unwrap().reshaped(shape![2, 2]).unwrap();
        assert_eq!(flat1.to_vec().unwrap(), vec![6.0, 7.0, 8.0, 9.0]);
    }

    #[test]
    fn test_from_tensors() {
        let a = Tensor::<f32>::sequential(shape![2, 2], Device::CPU).unwrap();
        let b = Tensor::<f32>::from_data([9.0, 8.0, 7.0], shape![3], Device::CPU).unwrap();
        let pack = TensorPack::from_tensors(&[a.clone(), b], Device::CPU).unwrap();
        assert_eq!(pack.len(), 2);
        assert_eq!(pack.total(), 7);
        assert_eq!(pack.get(0).unwrap().to_vec().unwrap(), a.to_vec().unwrap());
        assert_eq!(pack.get(1).unwrap().to_vec().unwrap(), vec![9.0, 8.0, 7.0]);
        // Slot copies are detached from the sources.
        a.set((0, 0), 100.0);
        assert_eq!(pack.get(0).unwrap().get((0, 0)), 0.0);
    }

    #[test]
    fn test_device_round_trip() {
        install_emulated();
        let mut pack = TensorPack::<f32>::sequential(mixed_dir(), Device::CPU).unwrap();
        let before = pack.flat_view().to_vec().unwrap();
        pack.move_to_device(Device::ACC).unwrap();
        assert!(pack.device().is_acc());
        assert!(pack.get(1).unwrap().device().is_acc());
        pack.move_to_device(Device::CPU).unwrap();
        assert_eq!(pack.flat_view().to_vec().unwrap(), before);
    }

    #[test]
    fn test_deep_clone_is_detached() {
        let pack = TensorPack::<f32>::zeros(mixed_dir(), Device::CPU).unwrap();
        let copy = pack.deep_clone().unwrap();
        pack.get(0).unwrap().set((0, 0), 5.0);
        assert_eq!(copy.get(0).unwrap().get((0, 0)), 0.0);
    }

    #[test]
    fn test_slot_out_of_range() {
        let pack = TensorPack::<f32>::zeros(mixed_dir(), Device::CPU).unwrap();
        assert!(matches!(
            pack.get(3),
            Err(TensorError::SlotOutOfRange { slot: 3, len: 3 })
        ));
    }
}
