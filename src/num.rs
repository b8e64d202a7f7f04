//! Utilities for numerics.

use std::cmp::Ordering;

use itertools::Itertools;

/// An `f32` that implements [`Ord`] according to the IEEE 754 totalOrder predicate.
#[derive(Debug, Clone, Copy)]
pub struct TotalF32(pub f32);

impl PartialEq for TotalF32 {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for TotalF32 {}

impl PartialOrd for TotalF32 {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TotalF32 {
    fn cmp(&self, other: &Self) -> Ordering {
        f32::total_cmp(&self.0, &other.0)
    }
}

/// Applies the standard sigmoid/logistic function to the input.
pub fn sigmoid(v: f32) -> f32 {
    1.0 / (1.0 + (-v).exp())
}

/// Returns the index of the largest value in `values`, or [`None`] if `values` is empty.
///
/// Ties resolve to the last maximum. Values are compared with [`TotalF32`].
pub fn argmax(values: &[f32]) -> Option<usize> {
    values.iter().position_max_by_key(|v| TotalF32(**v))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn total_order() {
        let mut values = [3.0, -1.0, 0.5].map(TotalF32);
        values.sort();
        assert_eq!(values.map(|v| v.0), [-1.0, 0.5, 3.0]);
    }

    #[test]
    fn argmax_finds_largest() {
        assert_eq!(argmax(&[]), None);
        assert_eq!(argmax(&[0.1, 0.7, 0.2]), Some(1));
        assert_eq!(argmax(&[-5.0]), Some(0));
        assert_eq!(argmax(&[0.4, 0.1, 0.4]), Some(2));
    }

    #[test]
    fn sigmoid_midpoint() {
        assert_eq!(sigmoid(0.0), 0.5);
        assert!(sigmoid(10.0) > 0.99);
        assert!(sigmoid(-10.0) < 0.01);
    }
}
