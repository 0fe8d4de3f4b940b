//! Per-vector min-max scaling.
//!
//! Every vector is scaled against its own minimum and maximum, there is no running or global
//! statistic. A constant vector has no spread to scale by and normalizes to all zeros, which
//! `denormalize` maps back onto the constant.

/// Smallest and largest element, `(0, 0)` for an empty slice.
pub fn bounds(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }

    values
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(min, max), &v| {
            (min.min(v), max.max(v))
        })
}

/// Maps each value to `(v - min) / (max - min)` using the bounds of `values` itself.
pub fn normalize(values: &[f64]) -> Vec<f64> {
    let (min, max) = bounds(values);
    let span = max - min;

    if span == 0.0 {
        return vec![0.0; values.len()];
    }

    values.iter().map(|v| (v - min) / span).collect()
}

/// Rescales `value` from [0, 1] back into the range spanned by `original`.
pub fn denormalize(value: f64, original: &[f64]) -> f64 {
    let (min, max) = bounds(original);
    value * (max - min) + min
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(a: f64, b: f64) {
        assert!((a - b).abs() <= 1e-9 * b.abs().max(1.0), "{a} != {b}");
    }

    #[test]
    fn scales_into_unit_interval() {
        assert_eq!(
            normalize(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]),
            vec![0.0, 0.2, 0.4, 0.6, 0.8, 1.0]
        );
    }

    #[test]
    fn uses_the_vectors_own_bounds() {
        assert_eq!(normalize(&[10.0, 20.0]), normalize(&[-3.0, 7.0]));
    }

    #[test]
    fn round_trips_vectors_with_spread() {
        let samples: [&[f64]; 3] = [
            &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0],
            &[-7.5, 0.0, 13.25, 2.0, 2.0, -1.0],
            &[1e-3, 5e6, 42.0, 0.0, -9.9, 3.3],
        ];

        for values in samples {
            let normalized = normalize(values);
            assert!(normalized.iter().all(|v| (0.0..=1.0).contains(v)));
            for (n, &v) in normalized.iter().zip(values) {
                assert_close(denormalize(*n, values), v);
            }
        }
    }

    #[test]
    fn constant_vector_normalizes_to_zeros() {
        let values = [4.0; 6];
        assert_eq!(normalize(&values), vec![0.0; 6]);
        assert_eq!(denormalize(0.0, &values), 4.0);
        assert_eq!(denormalize(0.7, &values), 4.0);
    }

    #[test]
    fn denormalize_extrapolates_outside_unit_interval() {
        let values = [0.0, 10.0];
        assert_close(denormalize(1.5, &values), 15.0);
        assert_close(denormalize(-0.5, &values), -5.0);
    }

    #[test]
    fn empty_input() {
        assert!(normalize(&[]).is_empty());
        assert_eq!(denormalize(0.5, &[]), 0.0);
    }
}
