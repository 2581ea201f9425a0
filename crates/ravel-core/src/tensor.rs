use crate::{
    accelerator, CPUBuffer, Device, DeviceError, Shape, Storage, Strides, TensorDType, TensorIndex,
};

#[cfg(feature = "rand")]
use {rand::prelude::*, rand_distr::StandardNormal};

#[derive(Debug, thiserror::Error)]
pub enum TensorError {
    #[error("Shape mismatch, {lhs:?} != {rhs:?}")]
    ShapeMismatch { lhs: Shape, rhs: Shape },
    #[error("Rank mismatch, expected {expected}, actual {actual}")]
    RankMismatch { expected: usize, actual: usize },
    #[error("Extent mismatch at axes {left},{right}: {a} != {b}")]
    ExtentMismatch {
        left: usize,
        right: usize,
        a: usize,
        b: usize,
    },
    #[error("Cannot reshape {from:?} into {to:?}")]
    InvalidReshape { from: Shape, to: Shape },
    #[error("Duplicate or out-of-range axes in permutation {0:?}")]
    InvalidPermutation(Vec<usize>),
    #[error("Index {index} out of range 0..{extent} on axis {axis}")]
    IndexOutOfRange {
        axis: usize,
        index: usize,
        extent: usize,
    },
    #[error("Slot {slot} out of range for pack of {len}")]
    SlotOutOfRange { slot: usize, len: usize },
    #[error(transparent)]
    DeviceError(#[from] DeviceError),
    #[error("Unimplemented: {0}")]
    Unimplemented(&'static str),
}

/// A strided, device-aware window over a shared backing allocation.
///
/// `Clone` is cheap: it aliases the same storage, exactly like the views
/// produced by [`Tensor::transposed`], [`Tensor::sliced`] and pack-slot
/// extraction. The only whole-buffer copy is the explicitly named
/// [`Tensor::deep_clone`].
#[derive(Clone)]
pub struct Tensor<T: TensorDType> {
    storage: Storage<T>,
    shape: Shape,
    strides: Strides,
    device: Device,
}

fn check_rank<T: TensorDType>(t: &Tensor<T>, expected: usize) -> Result<(), TensorError> {
    if t.rank() != expected {
        return Err(TensorError::RankMismatch {
            expected,
            actual: t.rank(),
        });
    }
    Ok(())
}

fn check_extent<T: TensorDType>(
    a: &Tensor<T>,
    left: usize,
    b: &Tensor<T>,
    right: usize,
) -> Result<(), TensorError> {
    if a.shape[left] != b.shape[right] {
        return Err(TensorError::ExtentMismatch {
            left,
            right,
            a: a.shape[left],
            b: b.shape[right],
        });
    }
    Ok(())
}

impl<T: TensorDType> Tensor<T> {
    pub(crate) fn from_parts(
        storage: Storage<T>,
        shape: Shape,
        strides: Strides,
        device: Device,
    ) -> Self {
        debug_assert_eq!(storage.device(), device);
        debug_assert_eq!(shape.rank(), strides.len());
        Self {
            storage,
            shape,
            strides,
            device,
        }
    }

    pub(crate) fn into_parts(self) -> (Storage<T>, Shape, Strides, Device) {
        (self.storage, self.shape, self.strides, self.device)
    }

    /// Freshly owned, default-strided storage. "Uninitialized" reads as
    /// zeroes on the host; accelerator contents are whatever the backend
    /// allocator hands back.
    pub fn uninit(shape: Shape, device: Device) -> Result<Self, TensorError> {
        let storage = Storage::uninit(shape.numel(), device)?;
        let strides = Strides::from(&shape);
        Ok(Self::from_parts(storage, shape, strides, device))
    }

    pub fn zeros(shape: Shape, device: Device) -> Result<Self, TensorError> {
        let storage = Storage::zeros(shape.numel(), device)?;
        let strides = Strides::from(&shape);
        Ok(Self::from_parts(storage, shape, strides, device))
    }

    /// Flat position `i` of the backing store gets value `i`.
    pub fn sequential(shape: Shape, device: Device) -> Result<Self, TensorError> {
        let data: Vec<T> = (0..shape.numel()).map(|i| T::from_f64(i as f64)).collect();
        Self::from_data(data, shape, Device::CPU)?.to(device)
    }

    /// IID samples from a standard normal, scaled by `c`.
    #[cfg(feature = "rand")]
    pub fn randn(shape: Shape, c: T, device: Device) -> Result<Self, TensorError>
    where
        T: num_traits::Float,
    {
        let mut rng = rand::thread_rng();
        let data = (0..shape.numel())
            .map(|_| {
                let sample: f32 = StandardNormal.sample(&mut rng);
                T::from(sample).expect("Failed to convert sample") * c
            })
            .collect::<Vec<_>>();
        Self::from_data(data, shape, Device::CPU)?.to(device)
    }

    pub fn from_data<U: AsRef<[T]>>(
        data: U,
        shape: Shape,
        device: Device,
    ) -> Result<Self, TensorError> {
        let data = data.as_ref();
        assert_eq!(data.len(), shape.numel());
        let storage = Storage::from_slice(data, device)?;
        let strides = Strides::from(&shape);
        Ok(Self::from_parts(storage, shape, strides, device))
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn strides(&self) -> &Strides {
        &self.strides
    }

    pub fn device(&self) -> Device {
        self.device
    }

    pub fn rank(&self) -> usize {
        self.shape.rank()
    }

    pub fn numel(&self) -> usize {
        self.shape.numel()
    }

    /// Strides equal the default row-major strides for the shape.
    pub fn is_regular(&self) -> bool {
        self.strides.is_regular(&self.shape)
    }

    /// The addressed span has no gaps, though it may be transposed.
    pub fn is_contiguous(&self) -> bool {
        self.strides.is_contiguous(&self.shape)
    }

    pub fn memsize(&self) -> usize {
        self.strides.memsize(&self.shape)
    }

    pub(crate) fn storage(&self) -> &Storage<T> {
        &self.storage
    }

    fn expect_cpu(&self) -> &CPUBuffer<T> {
        match &self.storage {
            Storage::CPU(b) => b,
            Storage::ACC(_) => panic!("indexed access requires a host-resident tensor"),
        }
    }
}

// ---- Indexed access ---------------------------------------------------

impl<T: TensorDType> Tensor<T> {
    /// Reads one element. Host-resident tensors only; range-checked in
    /// checked builds.
    pub fn get<I: TensorIndex>(&self, ix: I) -> T {
        let buf = self.expect_cpu();
        let coords = ix.coords();
        self.shape.check_in_range(&coords);
        let g = buf.read();
        g[self.strides.offset_of(&coords) as usize]
    }

    pub fn set<I: TensorIndex>(&self, ix: I, value: T) {
        let buf = self.expect_cpu();
        let coords = ix.coords();
        self.shape.check_in_range(&coords);
        let mut g = buf.write();
        g[self.strides.offset_of(&coords) as usize] = value;
    }

    pub fn inc<I: TensorIndex>(&self, ix: I, value: T) {
        let buf = self.expect_cpu();
        let coords = ix.coords();
        self.shape.check_in_range(&coords);
        let mut g = buf.write();
        let o = self.strides.offset_of(&coords) as usize;
        g[o] = g[o] + value;
    }

    /// The view's elements in row-major index order.
    pub fn to_vec(&self) -> Result<Vec<T>, TensorError> {
        self.gather_host()
    }

    /// Element-wise comparison within `tol`, after transporting both
    /// operands to the host. Shapes must match; `tol` of zero gives
    /// exact comparison.
    pub fn all_close(&self, other: &Tensor<T>, tol: f64) -> Result<bool, TensorError> {
        if self.shape != other.shape {
            return Ok(false);
        }
        let a = self.to(Device::CPU)?;
        let b = other.to(Device::CPU)?;
        Ok(a.gather_host()?
            .into_iter()
            .zip(b.gather_host()?)
            .all(|(x, y)| (x.to_f64() - y.to_f64()).abs() <= tol))
    }

    pub fn sum(&self) -> Result<T, TensorError> {
        Ok(self
            .gather_host()?
            .into_iter()
            .fold(T::zero(), |acc, v| acc + v))
    }

    fn gather_host(&self) -> Result<Vec<T>, TensorError> {
        let buf = self.storage.try_cpu()?;
        let g = buf.read();
        Ok(self
            .shape
            .iter_indices()
            .map(|ix| g[self.strides.offset_of(&ix) as usize])
            .collect())
    }

    fn scatter_host(&self, values: &[T]) -> Result<(), TensorError> {
        let buf = self.storage.try_cpu()?;
        let mut g = buf.write();
        for (ix, &v) in self.shape.iter_indices().zip(values.iter()) {
            g[self.strides.offset_of(&ix) as usize] = v;
        }
        Ok(())
    }
}

// ---- Index-reshaping views (alias the same memory) --------------------

impl<T: TensorDType> Tensor<T> {
    /// Axis order reversed.
    pub fn transposed(&self) -> Self {
        Self::from_parts(
            self.storage.clone(),
            self.shape.transposed(),
            self.strides.transposed(),
            self.device,
        )
    }

    /// Axes reordered per `perm`.
    pub fn permuted(&self, perm: &[usize]) -> Result<Self, TensorError> {
        if perm.len() != self.rank() {
            return Err(TensorError::RankMismatch {
                expected: self.rank(),
                actual: perm.len(),
            });
        }
        let mut seen = vec![false; perm.len()];
        for &p in perm {
            if p >= perm.len() || seen[p] {
                return Err(TensorError::InvalidPermutation(perm.to_vec()));
            }
            seen[p] = true;
        }
        Ok(Self::from_parts(
            self.storage.clone(),
            self.shape.permuted(perm),
            self.strides.permuted(perm),
            self.device,
        ))
    }

    /// Same memory under fresh default strides. Requires a regular view
    /// and matching element counts. The base offset is preserved, so
    /// pack-slot views reshape within their own range.
    pub fn reshaped(&self, shape: Shape) -> Result<Self, TensorError> {
        if shape.numel() != self.numel() || !self.is_regular() {
            return Err(TensorError::InvalidReshape {
                from: self.shape.clone(),
                to: shape,
            });
        }
        let strides = Strides::from(&shape).with_offset(self.strides.base_offset());
        Ok(Self::from_parts(
            self.storage.clone(),
            shape,
            strides,
            self.device,
        ))
    }

    /// Drops `axis`, fixing it at coordinate `i`.
    pub fn sliced(&self, axis: usize, i: usize) -> Result<Self, TensorError> {
        let extent = *self.shape.get(axis).ok_or(TensorError::RankMismatch {
            expected: axis + 1,
            actual: self.rank(),
        })?;
        if i >= extent {
            return Err(TensorError::IndexOutOfRange {
                axis,
                index: i,
                extent,
            });
        }
        let strides = self
            .strides
            .removed(axis)
            .inc_offset(self.strides[axis] * i as isize);
        Ok(Self::from_parts(
            self.storage.clone(),
            self.shape.removed(axis),
            strides,
            self.device,
        ))
    }
}

// ---- Copying and transport --------------------------------------------

impl<T: TensorDType> Tensor<T> {
    /// Value copy into this view. Contiguous pairs take a bulk path
    /// keyed by the device pair; anything else walks the multi-index
    /// iterator, staging through the host for mixed-device pairs.
    pub fn copy_from(&self, src: &Tensor<T>) -> Result<(), TensorError> {
        if self.shape != src.shape {
            return Err(TensorError::ShapeMismatch {
                lhs: self.shape.clone(),
                rhs: src.shape.clone(),
            });
        }
        let n = self.numel();
        if n == 0 {
            return Ok(());
        }
        let sz = std::mem::size_of::<T>();
        let doff = self.strides.base_offset() as usize;
        let soff = src.strides.base_offset() as usize;

        if self.is_contiguous() && src.is_contiguous() {
            match (&self.storage, &src.storage) {
                (Storage::CPU(d), Storage::CPU(s)) => {
                    if d.ptr_eq(s) {
                        d.write().copy_within(soff..soff + n, doff);
                    } else {
                        let mut gd = d.write();
                        let gs = s.read();
                        gd[doff..doff + n].copy_from_slice(&gs[soff..soff + n]);
                    }
                }
                (Storage::CPU(d), Storage::ACC(s)) => {
                    let mut gd = d.write();
                    accelerator()?.download(
                        s,
                        soff * sz,
                        bytemuck::cast_slice_mut(&mut gd[doff..doff + n]),
                    )?;
                }
                (Storage::ACC(d), Storage::CPU(s)) => {
                    let gs = s.read();
                    accelerator()?.upload(d, doff * sz, bytemuck::cast_slice(&gs[soff..soff + n]))?;
                }
                (Storage::ACC(d), Storage::ACC(s)) => {
                    accelerator()?.copy_within(d, doff * sz, s, soff * sz, n * sz)?;
                }
            }
            return Ok(());
        }

        match (&self.storage, &src.storage) {
            (Storage::CPU(_), Storage::CPU(_)) => {
                let values = src.gather_host()?;
                self.scatter_host(&values)
            }
            (Storage::CPU(_), Storage::ACC(s)) => {
                if !src.is_regular() {
                    return Err(TensorError::Unimplemented(
                        "element-wise copy from a non-regular accelerator view",
                    ));
                }
                let mut tmp = vec![T::zero(); n];
                accelerator()?.download(s, soff * sz, bytemuck::cast_slice_mut(&mut tmp))?;
                self.scatter_host(&tmp)
            }
            (Storage::ACC(d), Storage::CPU(_)) => {
                if !self.is_regular() {
                    return Err(TensorError::Unimplemented(
                        "element-wise copy into a non-regular accelerator view",
                    ));
                }
                let values = src.gather_host()?;
                accelerator()?.upload(d, doff * sz, bytemuck::cast_slice(&values))?;
                Ok(())
            }
            (Storage::ACC(_), Storage::ACC(_)) => Err(TensorError::Unimplemented(
                "non-contiguous accelerator-to-accelerator copy",
            )),
        }
    }

    /// Fresh owned copy on `device`, or a cheap aliasing clone when
    /// already resident there.
    pub fn to(&self, device: Device) -> Result<Self, TensorError> {
        if device == self.device {
            return Ok(self.clone());
        }
        log::trace!(
            "transporting Tensor{:?} {:?} -> {:?}",
            self.shape,
            self.device,
            device
        );
        let dst = Self::uninit(self.shape.clone(), device)?;
        dst.copy_from(self)?;
        Ok(dst)
    }

    /// Detached copy of the whole backing allocation, same device and
    /// layout.
    pub fn deep_clone(&self) -> Result<Self, TensorError> {
        Ok(Self {
            storage: self.storage.deep_clone()?,
            shape: self.shape.clone(),
            strides: self.strides.clone(),
            device: self.device,
        })
    }
}

// ---- In-place operations ----------------------------------------------

impl<T: TensorDType> Tensor<T> {
    /// Only the contiguous fast path is supported on either device.
    pub fn fill_zero(&self) -> Result<(), TensorError> {
        if !self.is_contiguous() {
            return Err(TensorError::Unimplemented("non-contiguous zero fill"));
        }
        let n = self.numel();
        if n == 0 {
            return Ok(());
        }
        let off = self.strides.base_offset() as usize;
        match &self.storage {
            Storage::CPU(b) => {
                b.write()[off..off + n].fill(T::zero());
            }
            Storage::ACC(b) => {
                let sz = std::mem::size_of::<T>();
                accelerator()?.fill_zero(b, off * sz, n * sz)?;
            }
        }
        Ok(())
    }

    /// In-place multiplication by a constant.
    pub fn scale(&self, c: T) -> Result<(), TensorError> {
        let n = self.numel();
        if n == 0 {
            return Ok(());
        }
        match &self.storage {
            Storage::CPU(b) => {
                let mut g = b.write();
                if self.is_contiguous() {
                    let off = self.strides.base_offset() as usize;
                    for v in g[off..off + n].iter_mut() {
                        *v = *v * c;
                    }
                } else {
                    for ix in self.shape.iter_indices() {
                        let o = self.strides.offset_of(&ix) as usize;
                        g[o] = g[o] * c;
                    }
                }
            }
            Storage::ACC(b) => {
                if !self.is_contiguous() {
                    return Err(TensorError::Unimplemented("non-contiguous accelerator scale"));
                }
                let sz = std::mem::size_of::<T>();
                let off = self.strides.base_offset() as usize;
                accelerator()?.scaled_copy(T::dt(), b, off * sz, n * sz, c.to_f64())?;
            }
        }
        Ok(())
    }
}

// ---- Cumulative operations --------------------------------------------

impl<T: TensorDType> Tensor<T> {
    /// `self += x`.
    pub fn add(&self, x: &Tensor<T>) -> Result<(), TensorError> {
        self.add_scaled(x, T::one())
    }

    /// `self += c * x`. Requires equal device and shape.
    pub fn add_scaled(&self, x: &Tensor<T>, c: T) -> Result<(), TensorError> {
        if self.device != x.device {
            return Err(DeviceError::DeviceMismatch(self.device, x.device).into());
        }
        if self.shape != x.shape {
            return Err(TensorError::ShapeMismatch {
                lhs: self.shape.clone(),
                rhs: x.shape.clone(),
            });
        }
        let n = self.numel();
        if n == 0 {
            return Ok(());
        }
        let fast = self.is_contiguous() && x.is_contiguous() && self.strides == x.strides;
        match (&self.storage, &x.storage) {
            (Storage::CPU(d), Storage::CPU(s)) => {
                if fast && !d.ptr_eq(s) {
                    let off = self.strides.base_offset() as usize;
                    let mut gd = d.write();
                    let gs = s.read();
                    for (y, &xv) in gd[off..off + n].iter_mut().zip(gs[off..off + n].iter()) {
                        *y = *y + c * xv;
                    }
                } else {
                    // Slow path; also covers aliasing operands, whose
                    // source values are snapshotted first.
                    let values = x.gather_host()?;
                    let mut gd = d.write();
                    for (ix, xv) in self.shape.iter_indices().zip(values) {
                        let o = self.strides.offset_of(&ix) as usize;
                        gd[o] = gd[o] + c * xv;
                    }
                }
            }
            (Storage::ACC(d), Storage::ACC(s)) => {
                if !fast {
                    return Err(TensorError::Unimplemented(
                        "non-contiguous accelerator accumulate",
                    ));
                }
                let sz = std::mem::size_of::<T>();
                let off = self.strides.base_offset() as usize;
                accelerator()?.axpy(T::dt(), d, off * sz, s, off * sz, n * sz, c.to_f64())?;
            }
            _ => unreachable!("equal device tags with mismatched storage variants"),
        }
        Ok(())
    }
}

// ---- Matrix products --------------------------------------------------

impl<T: TensorDType> Tensor<T> {
    /// `self += x · y` for matrix `x` and vector `y`. Operands are
    /// reconciled onto this tensor's device by copying; their own
    /// residency is never mutated.
    pub fn add_mvprod(&self, x: &Tensor<T>, y: &Tensor<T>) -> Result<(), TensorError> {
        check_rank(self, 1)?;
        check_rank(x, 2)?;
        check_rank(y, 1)?;
        check_extent(x, 0, self, 0)?;
        check_extent(x, 1, y, 0)?;
        if self.device.is_acc() {
            return Err(TensorError::Unimplemented("accelerator matrix-vector product"));
        }
        let x = x.to(self.device)?;
        let y = y.to(self.device)?;
        for i in 0..self.shape[0] {
            let mut t = T::zero();
            for k in 0..x.shape[1] {
                t = t + x.get((i, k)) * y.get(k);
            }
            self.inc(i, t);
        }
        Ok(())
    }

    /// `self += xᵀ · y`.
    pub fn add_mvprod_t(&self, x: &Tensor<T>, y: &Tensor<T>) -> Result<(), TensorError> {
        check_rank(self, 1)?;
        check_rank(x, 2)?;
        check_rank(y, 1)?;
        check_extent(x, 1, self, 0)?;
        check_extent(x, 0, y, 0)?;
        if self.device.is_acc() {
            return Err(TensorError::Unimplemented(
                "accelerator transposed matrix-vector product",
            ));
        }
        let x = x.to(self.device)?;
        let y = y.to(self.device)?;
        for i in 0..self.shape[0] {
            let mut t = T::zero();
            for k in 0..x.shape[0] {
                t = t + x.get((k, i)) * y.get(k);
            }
            self.inc(i, t);
        }
        Ok(())
    }

    /// `self += x · y` for matrices.
    pub fn add_mprod(&self, x: &Tensor<T>, y: &Tensor<T>) -> Result<(), TensorError> {
        check_rank(self, 2)?;
        check_rank(x, 2)?;
        check_rank(y, 2)?;
        check_extent(x, 0, self, 0)?;
        check_extent(y, 1, self, 1)?;
        check_extent(x, 1, y, 0)?;
        if self.device.is_acc() {
            return Err(TensorError::Unimplemented("accelerator matrix product"));
        }
        let x = x.to(self.device)?;
        let y = y.to(self.device)?;
        for i in 0..self.shape[0] {
            for j in 0..self.shape[1] {
                let mut t = T::zero();
                for k in 0..x.shape[1] {
                    t = t + x.get((i, k)) * y.get((k, j));
                }
                self.inc((i, j), t);
            }
        }
        Ok(())
    }
}

// ---- I/O ---------------------------------------------------------------

impl<T: TensorDType> std::fmt::Debug for Tensor<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tensor")
            .field("shape", &self.shape)
            .field("strides", &self.strides)
            .field("device", &self.device)
            .finish()
    }
}

/// Diagnostic rendering for rank-1 and rank-2 views. Higher ranks
/// produce an empty body.
impl<T: TensorDType> std::fmt::Display for Tensor<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let host = if self.device.is_cpu() {
            self.clone()
        } else {
            match self.to(Device::CPU) {
                Ok(t) => t,
                Err(_) => return write!(f, "Tensor{:?} resident on {:?}", self.shape, self.device),
            }
        };
        match host.rank() {
            1 => {
                write!(f, "[ ")?;
                for i0 in 0..host.shape[0] {
                    write!(f, "{} ", host.get(i0))?;
                }
                writeln!(f, "]")
            }
            2 => {
                for i0 in 0..host.shape[0] {
                    write!(f, "[ ")?;
                    for i1 in 0..host.shape[1] {
                        write!(f, "{} ", host.get((i0, i1)))?;
                    }
                    writeln!(f, "]")?;
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{set_accelerator, shape, EmulatedAccelerator};
    use proptest::prelude::*;

    fn install_emulated() {
        let _ = env_logger::builder().is_test(true).try_init();
        let _ = set_accelerator(Box::new(EmulatedAccelerator));
    }

    #[test]
    fn test_zeros_readback() {
        let t = Tensor::<f32>::zeros(shape![2, 3], Device::CPU).unwrap();
        let s = t.shape().clone();
        for ix in s.iter_indices() {
            assert_eq!(t.get(&ix), 0.0);
        }

        install_emulated();
        let a = Tensor::<f32>::zeros(shape![2, 3], Device::ACC).unwrap();
        assert_eq!(a.to(Device::CPU).unwrap().to_vec().unwrap(), vec![0.0; 6]);
    }

    #[test]
    fn test_sequential_readback() {
        let t = Tensor::<f32>::sequential(shape![2, 3], Device::CPU).unwrap();
        assert_eq!(t.get((0, 0)), 0.0);
        assert_eq!(t.get((0, 2)), 2.0);
        assert_eq!(t.get((1, 0)), 3.0);
        assert_eq!(t.get((1, 2)), 5.0);

        let tt = t.transposed();
        assert_eq!(tt.shape(), &shape![3, 2]);
        assert_eq!(tt.get((1, 0)), t.get((0, 1)));
        assert_eq!(tt.get((1, 0)), 1.0);
    }

    #[test]
    fn test_permuted() {
        let t = Tensor::<f32>::sequential(shape![2, 3, 4], Device::CPU).unwrap();
        let p = t.permuted(&[2, 0, 1]).unwrap();
        assert_eq!(p.shape(), &shape![4, 2, 3]);
        assert_eq!(p.get((3, 1, 2)), t.get((1, 2, 3)));
        assert!(matches!(
            t.permuted(&[0, 0, 1]),
            Err(TensorError::InvalidPermutation(_))
        ));
    }

    #[test]
    fn test_slice_row() {
        let t = Tensor::<f32>::sequential(shape![2, 3], Device::CPU).unwrap();
        let row = t.sliced(0, 1).unwrap();
        assert_eq!(row.shape(), &shape![3]);
        assert_eq!(row.to_vec().unwrap(), vec![3.0, 4.0, 5.0]);
        assert!(!row.sliced(0, 7).is_ok());
        assert!(matches!(
            t.sliced(0, 2),
            Err(TensorError::IndexOutOfRange { axis: 0, .. })
        ));
    }

    #[test]
    fn test_reshape() {
        let t = Tensor::<f32>::sequential(shape![2, 3], Device::CPU).unwrap();
        let flat = t.reshaped(shape![6]).unwrap();
        assert_eq!(flat.to_vec().unwrap(), t.to_vec().unwrap());
        // Transposed views are not regular.
        assert!(matches!(
            t.transposed().reshaped(shape![6]),
            Err(TensorError::InvalidReshape { .. })
        ));
        assert!(matches!(
            t.reshaped(shape![7]),
            Err(TensorError::InvalidReshape { .. })
        ));
    }

    #[test]
    fn test_views_alias() {
        let t = Tensor::<f32>::zeros(shape![2, 3], Device::CPU).unwrap();
        t.transposed().set((2, 1), 7.0);
        assert_eq!(t.get((1, 2)), 7.0);
    }

    #[test]
    fn test_add_scaled_inverse_restores() {
        let t = Tensor::<i32>::sequential(shape![2, 3], Device::CPU).unwrap();
        let x = Tensor::<i32>::from_data([5, -3, 2, 9, 0, -8], shape![2, 3], Device::CPU).unwrap();
        let before = t.to_vec().unwrap();
        t.add_scaled(&x, 3).unwrap();
        t.add_scaled(&x, -3).unwrap();
        assert_eq!(t.to_vec().unwrap(), before);
    }

    #[test]
    fn test_add_slow_path() {
        // Transposed rhs forces the iterator fallback.
        let t = Tensor::<f32>::zeros(shape![2, 2], Device::CPU).unwrap();
        let x = Tensor::<f32>::sequential(shape![2, 2], Device::CPU).unwrap();
        t.add(&x.transposed().transposed()).unwrap();
        t.add(&x.transposed()).unwrap();
        // t = x + x^T
        assert_eq!(t.get((0, 1)), x.get((0, 1)) + x.get((1, 0)));
        assert_eq!(t.get((0, 0)), 2.0 * x.get((0, 0)));
    }

    #[test]
    fn test_add_shape_mismatch_leaves_operands_unmodified() {
        let a = Tensor::<f32>::sequential(shape![2, 3], Device::CPU).unwrap();
        let b = Tensor::<f32>::sequential(shape![3, 2], Device::CPU).unwrap();
        let a_before = a.to_vec().unwrap();
        let b_before = b.to_vec().unwrap();
        assert!(matches!(
            a.add(&b),
            Err(TensorError::ShapeMismatch { .. })
        ));
        assert_eq!(a.to_vec().unwrap(), a_before);
        assert_eq!(b.to_vec().unwrap(), b_before);
    }

    #[test]
    fn test_scale() {
        let t = Tensor::<f32>::sequential(shape![2, 3], Device::CPU).unwrap();
        t.scale(2.0).unwrap();
        assert_eq!(t.to_vec().unwrap(), vec![0.0, 2.0, 4.0, 6.0, 8.0, 10.0]);

        // A column slice is non-contiguous; only its elements change.
        let col = t.sliced(1, 0).unwrap();
        assert!(!col.is_contiguous());
        col.scale(10.0).unwrap();
        assert_eq!(t.to_vec().unwrap(), vec![0.0, 2.0, 4.0, 60.0, 8.0, 10.0]);
    }

    #[test]
    fn test_fill_zero_non_contiguous_unimplemented() {
        let t = Tensor::<f32>::sequential(shape![2, 3], Device::CPU).unwrap();
        let col = t.sliced(1, 1).unwrap();
        assert!(matches!(
            col.fill_zero(),
            Err(TensorError::Unimplemented(_))
        ));
    }

    #[test]
    fn test_device_mismatch() {
        install_emulated();
        let a = Tensor::<f32>::zeros(shape![2], Device::CPU).unwrap();
        let b = Tensor::<f32>::zeros(shape![2], Device::ACC).unwrap();
        assert!(matches!(
            a.add(&b),
            Err(TensorError::DeviceError(DeviceError::DeviceMismatch(..)))
        ));
    }

    #[test]
    fn test_device_round_trip_contiguous() {
        install_emulated();
        let t = Tensor::<f32>::sequential(shape![2, 3], Device::CPU).unwrap();
        let on_acc = t.to(Device::ACC).unwrap();
        assert!(on_acc.all_close(&t, 0.0).unwrap());
        let back = on_acc.to(Device::CPU).unwrap();
        assert_eq!(back.to_vec().unwrap(), t.to_vec().unwrap());
    }

    #[test]
    fn test_device_round_trip_sliced() {
        install_emulated();
        let t = Tensor::<f32>::sequential(shape![2, 3], Device::CPU).unwrap();
        let row = t.sliced(0, 1).unwrap();
        assert!(row.is_contiguous());
        let col = t.sliced(1, 1).unwrap();
        assert!(!col.is_contiguous());
        for view in [row, col] {
            let back = view.to(Device::ACC).unwrap().to(Device::CPU).unwrap();
            assert_eq!(back.to_vec().unwrap(), view.to_vec().unwrap());
        }
    }

    #[test]
    fn test_accelerator_ops() {
        install_emulated();
        let t = Tensor::<f32>::sequential(shape![4], Device::ACC).unwrap();
        t.scale(2.0).unwrap();
        let x = Tensor::<f32>::from_data([1.0, 1.0, 1.0, 1.0], shape![4], Device::ACC).unwrap();
        t.add_scaled(&x, 10.0).unwrap();
        assert_eq!(
            t.to(Device::CPU).unwrap().to_vec().unwrap(),
            vec![10.0, 12.0, 14.0, 16.0]
        );
        t.fill_zero().unwrap();
        assert_eq!(t.to(Device::CPU).unwrap().to_vec().unwrap(), vec![0.0; 4]);
    }

    #[test]
    fn test_add_mprod() {
        let r = Tensor::<f32>::zeros(shape![2, 2], Device::CPU).unwrap();
        let x = Tensor::<f32>::from_data([1.0, 2.0, 3.0, 4.0], shape![2, 2], Device::CPU).unwrap();
        let y = Tensor::<f32>::from_data([5.0, 6.0, 7.0, 8.0], shape![2, 2], Device::CPU).unwrap();
        r.add_mprod(&x, &y).unwrap();
        assert_eq!(r.to_vec().unwrap(), vec![19.0, 22.0, 43.0, 50.0]);
    }

    #[test]
    fn test_add_mvprod() {
        let r = Tensor::<f32>::zeros(shape![2], Device::CPU).unwrap();
        let x = Tensor::<f32>::from_data([1.0, 2.0, 3.0, 4.0], shape![2, 2], Device::CPU).unwrap();
        let y = Tensor::<f32>::from_data([1.0, 1.0], shape![2], Device::CPU).unwrap();
        r.add_mvprod(&x, &y).unwrap();
        assert_eq!(r.to_vec().unwrap(), vec![3.0, 7.0]);

        let rt = Tensor::<f32>::zeros(shape![2], Device::CPU).unwrap();
        rt.add_mvprod_t(&x, &y).unwrap();
        assert_eq!(rt.to_vec().unwrap(), vec![4.0, 6.0]);

        assert!(matches!(
            r.add_mvprod(&x, &r),
            Err(TensorError::ExtentMismatch { .. })
        ));
    }

    #[test]
    fn test_mprod_reconciles_devices() {
        install_emulated();
        let r = Tensor::<f32>::zeros(shape![2, 2], Device::CPU).unwrap();
        let x = Tensor::<f32>::from_data([1.0, 2.0, 3.0, 4.0], shape![2, 2], Device::ACC).unwrap();
        let y = Tensor::<f32>::from_data([5.0, 6.0, 7.0, 8.0], shape![2, 2], Device::CPU).unwrap();
        r.add_mprod(&x, &y).unwrap();
        assert_eq!(r.to_vec().unwrap(), vec![19.0, 22.0, 43.0, 50.0]);
        // The operand itself stays on its device.
        assert!(x.device().is_acc());
    }

    #[test]
    fn test_mprod_on_accelerator_unimplemented() {
        install_emulated();
        let r = Tensor::<f32>::zeros(shape![2, 2], Device::ACC).unwrap();
        let x = Tensor::<f32>::sequential(shape![2, 2], Device::CPU).unwrap();
        assert!(matches!(
            r.add_mprod(&x, &x),
            Err(TensorError::Unimplemented(_))
        ));
    }

    #[test]
    fn test_display() {
        let t = Tensor::<i32>::sequential(shape![2, 2], Device::CPU).unwrap();
        assert_eq!(format!("{}", t), "[ 0 1 ]\n[ 2 3 ]\n");
        let v = Tensor::<i32>::sequential(shape![3], Device::CPU).unwrap();
        assert_eq!(format!("{}", v), "[ 0 1 2 ]\n");
        let cube = Tensor::<i32>::zeros(shape![2, 2, 2], Device::CPU).unwrap();
        assert_eq!(format!("{}", cube), "");
    }

    proptest! {
        #[test]
        fn transpose_involution(dims in proptest::collection::vec(1usize..5, 1..4)) {
            let shape = Shape::from(dims);
            let t = Tensor::<f32>::sequential(shape.clone(), Device::CPU).unwrap();
            let tt = t.transposed().transposed();
            prop_assert_eq!(tt.shape(), &shape);
            for ix in shape.iter_indices() {
                prop_assert_eq!(t.get(&ix), tt.get(&ix));
            }
        }

        #[test]
        fn sequential_matches_row_major_order(dims in proptest::collection::vec(1usize..5, 1..4)) {
            let shape = Shape::from(dims);
            let t = Tensor::<f32>::sequential(shape.clone(), Device::CPU).unwrap();
            for (pos, ix) in shape.iter_indices().enumerate() {
                prop_assert_eq!(t.get(&ix), pos as f32);
            }
        }
    }
}
