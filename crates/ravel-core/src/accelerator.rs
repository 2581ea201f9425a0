use std::sync::OnceLock;

use crate::{ACCBuffer, DType, DeviceError};

/// Blocking bulk primitives an accelerator backend must provide.
///
/// All offsets and lengths are in bytes; typed operations carry a
/// [`DType`] tag and an `f64` scalar because trait objects cannot be
/// generic over the element type. Calls block until the transfer or
/// kernel has completed; failures are fatal to the calling operation,
/// with no software fallback.
pub trait Accelerator: std::fmt::Debug + Send + Sync {
    /// Allocates an uninitialized accelerator-resident block.
    fn alloc(&self, n_bytes: usize) -> Result<ACCBuffer, DeviceError>;

    /// Host to accelerator copy of `src.len()` bytes.
    fn upload(&self, dst: &ACCBuffer, dst_offset: usize, src: &[u8]) -> Result<(), DeviceError>;

    /// Accelerator to host copy of `dst.len()` bytes.
    fn download(&self, src: &ACCBuffer, src_offset: usize, dst: &mut [u8])
        -> Result<(), DeviceError>;

    /// Accelerator to accelerator copy.
    fn copy_within(
        &self,
        dst: &ACCBuffer,
        dst_offset: usize,
        src: &ACCBuffer,
        src_offset: usize,
        len: usize,
    ) -> Result<(), DeviceError>;

    /// Zeroes a byte range.
    fn fill_zero(&self, dst: &ACCBuffer, offset: usize, len: usize) -> Result<(), DeviceError>;

    /// In-place `dst *= c` over a contiguous element range.
    fn scaled_copy(
        &self,
        dt: DType,
        dst: &ACCBuffer,
        offset: usize,
        len: usize,
        c: f64,
    ) -> Result<(), DeviceError>;

    /// `dst += c * src` over contiguous, identically laid out ranges.
    fn axpy(
        &self,
        dt: DType,
        dst: &ACCBuffer,
        dst_offset: usize,
        src: &ACCBuffer,
        src_offset: usize,
        len: usize,
        c: f64,
    ) -> Result<(), DeviceError>;
}

static ACCELERATOR: OnceLock<Box<dyn Accelerator>> = OnceLock::new();

/// Installs the process-wide accelerator backend. Must be called before
/// any operation touching [`crate::Device::ACC`]; at most once.
pub fn set_accelerator(backend: Box<dyn Accelerator>) -> Result<(), DeviceError> {
    ACCELERATOR
        .set(backend)
        .map_err(|_| DeviceError::BackendAlreadySet)
}

/// The installed backend, or `BackendUninitialized`.
pub fn accelerator() -> Result<&'static dyn Accelerator, DeviceError> {
    ACCELERATOR
        .get()
        .map(|b| b.as_ref())
        .ok_or(DeviceError::BackendUninitialized)
}

fn map_elems<T: crate::TensorDType>(bytes: &mut [u8], f: impl Fn(T) -> T) {
    let sz = std::mem::size_of::<T>();
    debug_assert_eq!(bytes.len() % sz, 0);
    for chunk in bytes.chunks_exact_mut(sz) {
        let v: T = bytemuck::pod_read_unaligned(chunk);
        chunk.copy_from_slice(bytemuck::bytes_of(&f(v)));
    }
}

fn zip_elems<T: crate::TensorDType>(dst: &mut [u8], src: &[u8], f: impl Fn(T, T) -> T) {
    let sz = std::mem::size_of::<T>();
    debug_assert_eq!(dst.len(), src.len());
    for (d, s) in dst.chunks_exact_mut(sz).zip(src.chunks_exact(sz)) {
        let y: T = bytemuck::pod_read_unaligned(d);
        let x: T = bytemuck::pod_read_unaligned(s);
        d.copy_from_slice(bytemuck::bytes_of(&f(y, x)));
    }
}

/// Host-backed reference backend.
///
/// Implements the `Accelerator` contract against ordinary host memory so
/// the accelerator code paths can be exercised and validated against the
/// host reference semantics without real device hardware.
#[derive(Debug, Default)]
pub struct EmulatedAccelerator;

impl EmulatedAccelerator {
    fn check_range(buf_len: usize, offset: usize, len: usize) -> Result<(), DeviceError> {
        if offset + len > buf_len {
            return Err(DeviceError::TransferSizeMismatch {
                dst: buf_len,
                src: offset + len,
            });
        }
        Ok(())
    }
}

impl Accelerator for EmulatedAccelerator {
    fn alloc(&self, n_bytes: usize) -> Result<ACCBuffer, DeviceError> {
        Ok(ACCBuffer::uninit(n_bytes))
    }

    fn upload(&self, dst: &ACCBuffer, dst_offset: usize, src: &[u8]) -> Result<(), DeviceError> {
        let mut g = dst.write();
        Self::check_range(g.len(), dst_offset, src.len())?;
        g[dst_offset..dst_offset + src.len()].copy_from_slice(src);
        Ok(())
    }

    fn download(
        &self,
        src: &ACCBuffer,
        src_offset: usize,
        dst: &mut [u8],
    ) -> Result<(), DeviceError> {
        let g = src.read();
        Self::check_range(g.len(), src_offset, dst.len())?;
        dst.copy_from_slice(&g[src_offset..src_offset + dst.len()]);
        Ok(())
    }

    fn copy_within(
        &self,
        dst: &ACCBuffer,
        dst_offset: usize,
        src: &ACCBuffer,
        src_offset: usize,
        len: usize,
    ) -> Result<(), DeviceError> {
        if dst.ptr_eq(src) {
            let mut g = dst.write();
            Self::check_range(g.len(), dst_offset.max(src_offset), len)?;
            g.copy_within(src_offset..src_offset + len, dst_offset);
        } else {
            let tmp = {
                let gs = src.read();
                Self::check_range(gs.len(), src_offset, len)?;
                gs[src_offset..src_offset + len].to_vec()
            };
            self.upload(dst, dst_offset, &tmp)?;
        }
        Ok(())
    }

    fn fill_zero(&self, dst: &ACCBuffer, offset: usize, len: usize) -> Result<(), DeviceError> {
        let mut g = dst.write();
        Self::check_range(g.len(), offset, len)?;
        g[offset..offset + len].fill(0);
        Ok(())
    }

    fn scaled_copy(
        &self,
        dt: DType,
        dst: &ACCBuffer,
        offset: usize,
        len: usize,
        c: f64,
    ) -> Result<(), DeviceError> {
        let mut g = dst.write();
        Self::check_range(g.len(), offset, len)?;
        let bytes = &mut g[offset..offset + len];
        match dt {
            DType::F16 => map_elems::<half::f16>(bytes, |v| half::f16::from_f64(v.to_f64() * c)),
            DType::F32 => map_elems::<f32>(bytes, |v| v * c as f32),
            DType::F64 => map_elems::<f64>(bytes, |v| v * c),
            DType::I32 => map_elems::<i32>(bytes, |v| (v as f64 * c) as i32),
        }
        Ok(())
    }

    fn axpy(
        &self,
        dt: DType,
        dst: &ACCBuffer,
        dst_offset: usize,
        src: &ACCBuffer,
        src_offset: usize,
        len: usize,
        c: f64,
    ) -> Result<(), DeviceError> {
        // Staged through a host copy so that aliasing src/dst buffers
        // cannot deadlock on the same lock.
        let src_bytes = {
            let gs = src.read();
            Self::check_range(gs.len(), src_offset, len)?;
            gs[src_offset..src_offset + len].to_vec()
        };
        let mut g = dst.write();
        Self::check_range(g.len(), dst_offset, len)?;
        let bytes = &mut g[dst_offset..dst_offset + len];
        match dt {
            DType::F16 => zip_elems::<half::f16>(bytes, &src_bytes, |y, x| {
                half::f16::from_f64(y.to_f64() + c * x.to_f64())
            }),
            DType::F32 => zip_elems::<f32>(bytes, &src_bytes, |y, x| y + c as f32 * x),
            DType::F64 => zip_elems::<f64>(bytes, &src_bytes, |y, x| y + c * x),
            DType::I32 => zip_elems::<i32>(bytes, &src_bytes, |y, x| y + (x as f64 * c) as i32),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upload_download_round_trip() {
        let acc = EmulatedAccelerator;
        let buf = acc.alloc(16).unwrap();
        let data: Vec<u8> = (0..16).collect();
        acc.upload(&buf, 0, &data).unwrap();
        let mut back = vec![0u8; 16];
        acc.download(&buf, 0, &mut back).unwrap();
        assert_eq!(back, data);
    }

    #[test]
    fn test_scaled_copy_matches_host() {
        let acc = EmulatedAccelerator;
        let buf = acc.alloc(12).unwrap();
        acc.upload(&buf, 0, bytemuck::cast_slice(&[1.0f32, 2.0, 3.0]))
            .unwrap();
        acc.scaled_copy(DType::F32, &buf, 0, 12, 2.0).unwrap();
        let mut back = [0.0f32; 3];
        acc.download(&buf, 0, bytemuck::cast_slice_mut(&mut back))
            .unwrap();
        assert_eq!(back, [2.0, 4.0, 6.0]);
    }

    #[test]
    fn test_axpy_matches_host() {
        let acc = EmulatedAccelerator;
        let y = acc.alloc(8).unwrap();
        let x = acc.alloc(8).unwrap();
        acc.upload(&y, 0, bytemuck::cast_slice(&[1.0f32, 1.0])).unwrap();
        acc.upload(&x, 0, bytemuck::cast_slice(&[3.0f32, 4.0])).unwrap();
        acc.axpy(DType::F32, &y, 0, &x, 0, 8, -1.0).unwrap();
        let mut back = [0.0f32; 2];
        acc.download(&y, 0, bytemuck::cast_slice_mut(&mut back))
            .unwrap();
        assert_eq!(back, [-2.0, -3.0]);
    }

    #[test]
    fn test_out_of_range_transfer_fails() {
        let acc = EmulatedAccelerator;
        let buf = acc.alloc(4).unwrap();
        let err = acc.upload(&buf, 2, &[0u8; 4]).unwrap_err();
        assert!(matches!(err, DeviceError::TransferSizeMismatch { .. }));
    }
}
