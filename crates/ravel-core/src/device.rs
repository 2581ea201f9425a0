/// Memory residency domain of a buffer: the host, or the process-wide
/// accelerator reached through the installed [`crate::Accelerator`].
#[derive(Copy, Clone, Default, PartialEq, Eq, Hash)]
pub enum Device {
    #[default]
    CPU,
    ACC,
}

#[derive(Clone, Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("Device mismatch, expected {0:?}, actual {1:?}")]
    DeviceMismatch(Device, Device),
    #[error("No accelerator backend installed; call set_accelerator before any accelerator-path operation")]
    BackendUninitialized,
    #[error("An accelerator backend is already installed")]
    BackendAlreadySet,
    #[error("Accelerator transfer size mismatch: {dst} dst bytes, {src} src bytes")]
    TransferSizeMismatch { dst: usize, src: usize },
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Device::CPU => write!(f, "CPU"),
            Device::ACC => write!(f, "ACC"),
        }
    }
}

impl Device {
    pub fn is_cpu(&self) -> bool {
        matches!(self, Device::CPU)
    }

    pub fn is_acc(&self) -> bool {
        matches!(self, Device::ACC)
    }

    pub fn label(&self) -> String {
        format!("{:?}", self)
    }
}
