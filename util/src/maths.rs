//! Utility maths functions

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use num_traits::Float;

/// Map a value from one range into another.
pub fn lin_map<T>(source_range: (T, T), target_range: (T, T), value: T) -> T
where 
    T: Float 
{
    target_range.0 
        + ((value - source_range.0) 
        * (target_range.1 - target_range.0) 
        / (source_range.1 - source_range.0))
}

/// Apply polynomial coefficients to a value.
///
/// The coefficients are ordered lowest power first, i.e. `coeffs[0]` is the
/// constant term. An empty coefficient slice evaluates to zero.
pub fn poly_val<T>(value: T, coeffs: &[T]) -> T
where
    T: Float
{
    // Horner's method, starting from the highest power
    coeffs
        .iter()
        .rev()
        .fold(T::zero(), |acc, c| acc * value + *c)
}

/// Convert degrees into radians
pub fn deg_to_rad<T>(deg: T) -> T
where
    T: Float
{
    deg.to_radians()
}
