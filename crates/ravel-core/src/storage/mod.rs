mod acc_buffer;
mod cpu_buffer;

pub use acc_buffer::*;
pub use cpu_buffer::*;

use crate::{accelerator, Device, DeviceError, TensorDType};

/// Device-tagged backing store of a tensor or pack.
///
/// `Clone` aliases the underlying allocation on either device; the
/// refcount of the inner buffer is the only ownership the views carry.
#[derive(Clone, Debug)]
pub enum Storage<T: TensorDType> {
    CPU(CPUBuffer<T>),
    ACC(ACCBuffer),
}

impl<T: TensorDType> Storage<T> {
    pub fn uninit(numel: usize, device: Device) -> Result<Self, DeviceError> {
        match device {
            Device::CPU => Ok(Storage::CPU(CPUBuffer::uninit(numel))),
            Device::ACC => {
                let buf = accelerator()?.alloc(numel * std::mem::size_of::<T>())?;
                Ok(Storage::ACC(buf))
            }
        }
    }

    pub fn zeros(numel: usize, device: Device) -> Result<Self, DeviceError> {
        match device {
            Device::CPU => Ok(Storage::CPU(CPUBuffer::zeros(numel))),
            Device::ACC => {
                let acc = accelerator()?;
                let n_bytes = numel * std::mem::size_of::<T>();
                let buf = acc.alloc(n_bytes)?;
                acc.fill_zero(&buf, 0, n_bytes)?;
                Ok(Storage::ACC(buf))
            }
        }
    }

    pub fn from_slice(data: &[T], device: Device) -> Result<Self, DeviceError> {
        match device {
            Device::CPU => Ok(Storage::CPU(CPUBuffer::from_slice(data))),
            Device::ACC => {
                let acc = accelerator()?;
                let bytes: &[u8] = bytemuck::cast_slice(data);
                let buf = acc.alloc(bytes.len())?;
                acc.upload(&buf, 0, bytes)?;
                Ok(Storage::ACC(buf))
            }
        }
    }

    pub fn device(&self) -> Device {
        match self {
            Storage::CPU(_) => Device::CPU,
            Storage::ACC(_) => Device::ACC,
        }
    }

    pub fn n_bytes(&self) -> usize {
        match self {
            Storage::CPU(b) => b.n_bytes(),
            Storage::ACC(b) => b.n_bytes(),
        }
    }

    pub fn try_cpu(&self) -> Result<&CPUBuffer<T>, DeviceError> {
        match self {
            Storage::CPU(b) => Ok(b),
            Storage::ACC(_) => Err(DeviceError::DeviceMismatch(Device::CPU, Device::ACC)),
        }
    }

    pub fn try_acc(&self) -> Result<&ACCBuffer, DeviceError> {
        match self {
            Storage::ACC(b) => Ok(b),
            Storage::CPU(_) => Err(DeviceError::DeviceMismatch(Device::ACC, Device::CPU)),
        }
    }

    /// Detached copy of the full allocation on the same device.
    pub fn deep_clone(&self) -> Result<Self, DeviceError> {
        match self {
            Storage::CPU(b) => Ok(Storage::CPU(b.deep_clone())),
            Storage::ACC(b) => {
                let acc = accelerator()?;
                let dst = acc.alloc(b.n_bytes())?;
                acc.copy_within(&dst, 0, b, 0, b.n_bytes())?;
                Ok(Storage::ACC(dst))
            }
        }
    }
}
