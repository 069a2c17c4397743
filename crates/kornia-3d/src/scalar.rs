use std::fmt::{Debug, Display};
use std::iter::Sum;

use num_traits::{Float, NumAssign};

/// Floating point precision used to store and process 3D data.
///
/// Implemented for `f32` (accelerator-class execution) and `f64` (CPU execution). Algorithms
/// are written once against this trait so that switching precision is a type substitution.
pub trait Scalar:
    Float + NumAssign + Sum + Debug + Display + Default + Send + Sync + 'static
{
    /// Convert from `f64`, rounding to the nearest representable value.
    fn cast_f64(value: f64) -> Self;

    /// Convert into `f64`.
    fn into_f64(self) -> f64;

    /// Convert to another precision.
    #[inline]
    fn cast<U: Scalar>(self) -> U {
        U::cast_f64(self.into_f64())
    }
}

macro_rules! impl_scalar {
    ($($t:ty),*) => {
        $(
            impl Scalar for $t {
                #[inline]
                fn cast_f64(value: f64) -> Self {
                    value as $t
                }

                #[inline]
                fn into_f64(self) -> f64 {
                    self as f64
                }
            }
        )*
    };
}

impl_scalar!(f32, f64);
