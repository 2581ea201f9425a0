use half::f16;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Hash)]
pub enum DType {
    F16,
    #[default]
    F32,
    F64,
    I32,
}

impl DType {
    /// Returns the size of the type in bytes.
    pub fn size_of(self) -> usize {
        match self {
            DType::F16 => 2,
            DType::F32 => 4,
            DType::F64 => 8,
            DType::I32 => 4,
        }
    }
}

/// Element types a [`crate::Tensor`] can hold.
///
/// `to_f64`/`from_f64` carry untyped scalars across the accelerator
/// backend seam, where trait objects cannot be generic over the element.
pub trait TensorDType:
    bytemuck::Pod
    + Copy
    + Clone
    + std::fmt::Debug
    + std::fmt::Display
    + PartialEq
    + num_traits::Num
    + Send
    + Sync
    + 'static
{
    fn dt() -> DType;

    fn to_f64(self) -> f64;

    fn from_f64(v: f64) -> Self;
}

macro_rules! impl_tensor_dtype {
    ($t:ty, $dt:ident, |$v:ident| $to:expr, |$f:ident| $from:expr) => {
        impl TensorDType for $t {
            fn dt() -> DType {
                DType::$dt
            }

            fn to_f64(self) -> f64 {
                let $v = self;
                $to
            }

            fn from_f64($f: f64) -> Self {
                $from
            }
        }
    };
}

impl_tensor_dtype!(f16, F16, |v| v.to_f64(), |f| f16::from_f64(f));
impl_tensor_dtype!(f32, F32, |v| v as f64, |f| f as f32);
impl_tensor_dtype!(f64, F64, |v| v, |f| f);
impl_tensor_dtype!(i32, I32, |v| v as f64, |f| f as i32);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_of() {
        assert_eq!(DType::F16.size_of(), 2);
        assert_eq!(DType::F32.size_of(), 4);
        assert_eq!(DType::F64.size_of(), 8);
        assert_eq!(DType::I32.size_of(), 4);
    }

    #[test]
    fn test_scalar_round_trip() {
        assert_eq!(f32::from_f64(2.5f32.to_f64()), 2.5);
        assert_eq!(i32::from_f64((-7i32).to_f64()), -7);
        assert_eq!(<f32 as TensorDType>::dt(), DType::F32);
    }
}
