/// Squared Euclidean distance between two vectors.
///
/// Accumulates in f64 so that an exact match yields exactly 0.
/// Returns `f32::INFINITY` for dimension mismatches.
pub fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return f32::INFINITY;
    }

    let mut sum: f64 = 0.0;
    for (&x, &y) in a.iter().zip(b.iter()) {
        let d = x as f64 - y as f64;
        sum += d * d;
    }
    sum as f32
}

/// Euclidean distance between two vectors.
pub fn euclidean(a: &[f32], b: &[f32]) -> f32 {
    squared_l2(a, b).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical() {
        assert_eq!(squared_l2(&[0.5, -1.0, 2.0], &[0.5, -1.0, 2.0]), 0.0);
        assert_eq!(euclidean(&[0.5, -1.0, 2.0], &[0.5, -1.0, 2.0]), 0.0);
    }

    #[test]
    fn test_three_four_five() {
        assert!((squared_l2(&[0.0, 0.0], &[3.0, 4.0]) - 25.0).abs() < 1e-6);
        assert!((euclidean(&[0.0, 0.0], &[3.0, 4.0]) - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_symmetric() {
        let a = [0.1, 0.7, -0.3];
        let b = [-0.4, 0.2, 0.9];
        assert_eq!(squared_l2(&a, &b), squared_l2(&b, &a));
    }

    #[test]
    fn test_dimension_mismatch() {
        assert!(squared_l2(&[1.0, 0.0], &[1.0, 0.0, 0.0]).is_infinite());
    }
}
