use nalgebra::RealField;
use num_traits::{Bounded, NumCast, ToPrimitive};
use std::fmt::Debug;
use std::str::FromStr;

use qpseq_types::{QpError, Result};

/// Floating point type a [`QpProblem`](crate::QpProblem) can be built over.
///
/// Unbounded limits are stored as the most negative / most positive finite
/// value of the type rather than as infinities.
pub trait Scalar: RealField + Copy + Bounded + NumCast + FromStr + Debug {
    /// Value encoding "no lower bound"
    fn lower_sentinel() -> Self {
        <Self as Bounded>::min_value()
    }

    /// Value encoding "no upper bound"
    fn upper_sentinel() -> Self {
        <Self as Bounded>::max_value()
    }

    fn is_lower_unbounded(value: Self) -> bool {
        value <= Self::lower_sentinel()
    }

    fn is_upper_unbounded(value: Self) -> bool {
        value >= Self::upper_sentinel()
    }

    /// Lossy conversion for reporting
    fn to_f64_lossy(self) -> f64 {
        ToPrimitive::to_f64(&self).unwrap_or(f64::NAN)
    }
}

impl Scalar for f32 {}
impl Scalar for f64 {}

/// Converts a value between scalar types, keeping sentinels as sentinels.
pub(crate) fn cast_value<T: Scalar, S: Scalar>(value: T) -> Result<S> {
    if T::is_lower_unbounded(value) {
        return Ok(S::lower_sentinel());
    }
    if T::is_upper_unbounded(value) {
        return Ok(S::upper_sentinel());
    }

    let converted = <S as NumCast>::from(value)
        .ok_or_else(|| QpError::Cast(format!("{:?} has no representation", value)))?;

    if value.is_finite() && !converted.is_finite() {
        return Err(QpError::Cast(format!(
            "{:?} overflows the destination scalar type",
            value
        )));
    }

    Ok(converted)
}
