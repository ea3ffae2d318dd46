//! Synthetic hysteresis loops for demos and tests.
//!
//! Each branch is a `tanh` switching curve centred on `±hc`, plus a shared
//! background (`offset + slope·x + curvature·x²`) that a correction step is
//! expected to remove, plus optional Gaussian noise. Output is deterministic
//! for a given seed.

use rand::prelude::*;
use rand::rngs::StdRng;
use rand_distr::Normal;
use serde::{Deserialize, Serialize};

use crate::domain::{BranchData, LoopDataset};
use crate::error::AppError;
use crate::math::linspace;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleOptions {
    /// Samples per branch.
    pub n: usize,
    /// Field sweep is `[-field_max, field_max]`.
    pub field_max: f64,
    /// Coercive field of the switching curve.
    pub hc: f64,
    /// Switching width.
    pub width: f64,
    pub offset: f64,
    pub slope: f64,
    pub curvature: f64,
    /// Standard deviation of the Y noise; also written as per-sample sigma.
    pub noise: f64,
    pub seed: u64,
}

impl Default for SampleOptions {
    fn default() -> Self {
        Self {
            n: 201,
            field_max: 10.0,
            hc: 1.5,
            width: 0.8,
            offset: 0.0,
            slope: 0.05,
            curvature: 0.0,
            noise: 0.0,
            seed: 42,
        }
    }
}

pub fn generate_loop(opts: &SampleOptions) -> Result<LoopDataset, AppError> {
    if opts.n < 2 {
        return Err(AppError::new(2, "Sample count must be >= 2."));
    }
    if !(opts.field_max.is_finite() && opts.field_max > 0.0) {
        return Err(AppError::new(2, "Field range must be > 0."));
    }
    if !(opts.width.is_finite() && opts.width > 0.0) {
        return Err(AppError::new(2, "Switching width must be > 0."));
    }
    if !(opts.noise.is_finite() && opts.noise >= 0.0) {
        return Err(AppError::new(2, "Noise must be >= 0."));
    }

    let mut rng = StdRng::seed_from_u64(opts.seed);
    let normal = Normal::new(0.0, 1.0)
        .map_err(|e| AppError::new(4, format!("Noise distribution error: {e}")))?;

    let background = |x: f64| opts.offset + opts.slope * x + opts.curvature * x * x;

    let up_x = linspace(-opts.field_max, opts.field_max, opts.n);
    let down_x: Vec<f64> = up_x.iter().rev().copied().collect();

    let mut branch = |xs: Vec<f64>, center: f64| {
        let y = xs
            .iter()
            .map(|&x| {
                let clean = ((x - center) / opts.width).tanh() + background(x);
                clean + opts.noise * normal.sample(&mut rng)
            })
            .collect();
        let sigma = (opts.noise > 0.0).then(|| vec![opts.noise; xs.len()]);
        BranchData { x: xs, y, sigma }
    };

    let up = branch(up_x, opts.hc);
    let down = branch(down_x, -opts.hc);

    log::debug!(
        "generated loop: n={} hc={} slope={} noise={} seed={}",
        opts.n,
        opts.hc,
        opts.slope,
        opts.noise,
        opts.seed
    );
    Ok(LoopDataset { up, down })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_same_loop() {
        let opts = SampleOptions {
            noise: 0.01,
            ..SampleOptions::default()
        };
        let a = generate_loop(&opts).unwrap();
        let b = generate_loop(&opts).unwrap();
        assert_eq!(a, b);

        let c = generate_loop(&SampleOptions { seed: 7, ..opts }).unwrap();
        assert_ne!(a.up.y, c.up.y);
    }

    #[test]
    fn noiseless_loop_has_expected_shape() {
        let opts = SampleOptions {
            n: 101,
            slope: 0.1,
            ..SampleOptions::default()
        };
        let ds = generate_loop(&opts).unwrap();
        assert_eq!(ds.up.len(), 101);
        assert!(ds.up.sigma.is_none());
        // Sweep directions.
        assert_eq!(ds.up.x[0], -10.0);
        assert_eq!(ds.down.x[0], 10.0);
        // Deep saturation: tanh ≈ ±1 on top of the linear background.
        let last = ds.up.y[100];
        assert!((last - (1.0 + 0.1 * 10.0)).abs() < 1e-3, "{last}");
    }

    #[test]
    fn invalid_options_are_rejected() {
        let err = generate_loop(&SampleOptions {
            n: 1,
            ..SampleOptions::default()
        })
        .unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }
}
