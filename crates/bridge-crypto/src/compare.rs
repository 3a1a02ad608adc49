use subtle::ConstantTimeEq;

/// Compares two byte strings in time independent of their contents.
///
/// ## Timing Contract
/// Every byte is visited regardless of where the first difference sits.
/// Only the lengths leak, and a length mismatch compares unequal.
#[inline]
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.ct_eq(b).into()
}
