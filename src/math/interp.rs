//! Small numeric helpers: grids, linear interpolation, medians.

/// `n` evenly spaced points from `lo` to `hi` inclusive.
pub fn linspace(lo: f64, hi: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![lo],
        _ => {
            let step = (hi - lo) / (n as f64 - 1.0);
            (0..n).map(|i| lo + step * i as f64).collect()
        }
    }
}

/// Abscissa where the segment `(x0, y0) → (x1, y1)` reaches `level`.
///
/// Returns `None` when the segment is flat.
pub fn lerp_root(x0: f64, y0: f64, x1: f64, y1: f64, level: f64) -> Option<f64> {
    let dy = y1 - y0;
    if dy == 0.0 {
        return None;
    }
    Some(x0 + (level - y0) * (x1 - x0) / dy)
}

/// Median of the finite values; `None` when there are none.
pub fn median(values: &[f64]) -> Option<f64> {
    let mut v: Vec<f64> = values.iter().copied().filter(|x| x.is_finite()).collect();
    if v.is_empty() {
        return None;
    }
    v.sort_by(f64::total_cmp);
    let mid = v.len() / 2;
    if v.len() % 2 == 1 {
        Some(v[mid])
    } else {
        Some(0.5 * (v[mid - 1] + v[mid]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linspace_hits_both_ends() {
        let g = linspace(-1.0, 1.0, 5);
        assert_eq!(g, vec![-1.0, -0.5, 0.0, 0.5, 1.0]);
        assert!(linspace(0.0, 1.0, 0).is_empty());
    }

    #[test]
    fn lerp_root_interpolates() {
        // Y(-0.2) = 1.0, Y(0.3) = 1.5: value at x = 0 is 1.2
        let x = lerp_root(1.0, -0.2, 1.5, 0.3, 0.0).unwrap();
        assert!((x - 1.2).abs() < 1e-12);
        assert!(lerp_root(0.0, 1.0, 1.0, 1.0, 0.0).is_none());
    }

    #[test]
    fn median_of_even_count_averages() {
        assert_eq!(median(&[3.0, 1.0, f64::NAN, 2.0, 4.0]), Some(2.5));
        assert_eq!(median(&[]), None);
    }
}
