//! Region resolution: which samples of a branch a fit sees.

use crate::domain::{LoopDataset, Region};
use crate::error::LoopError;

impl Region {
    /// Indices of the samples of `self.branch` whose X is finite and inside
    /// `[lo, hi]`, in dataset order.
    ///
    /// Errors with `EmptyRegion` when nothing matches and with
    /// `InsufficientSamples` when fewer than `min_samples` match.
    pub fn resolve(&self, dataset: &LoopDataset, min_samples: usize) -> Result<Vec<usize>, LoopError> {
        let data = dataset.branch(self.branch);
        let idx: Vec<usize> = data
            .x
            .iter()
            .enumerate()
            .filter(|(_, x)| x.is_finite() && self.contains(**x))
            .map(|(i, _)| i)
            .collect();

        if idx.is_empty() {
            return Err(LoopError::EmptyRegion {
                branch: self.branch,
                lo: self.lo,
                hi: self.hi,
            });
        }
        if idx.len() < min_samples {
            return Err(LoopError::InsufficientSamples {
                branch: self.branch,
                found: idx.len(),
                required: min_samples,
            });
        }
        Ok(idx)
    }

    /// Resolve and gather the `(x, y)` samples.
    pub fn samples(
        &self,
        dataset: &LoopDataset,
        min_samples: usize,
    ) -> Result<(Vec<f64>, Vec<f64>), LoopError> {
        let idx = self.resolve(dataset, min_samples)?;
        let data = dataset.branch(self.branch);
        let x = idx.iter().map(|&i| data.x[i]).collect();
        let y = idx.iter().map(|&i| data.y[i]).collect();
        Ok((x, y))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Branch;

    fn dataset() -> LoopDataset {
        let x = vec![-10.0, -5.0, f64::NAN, 0.0, 5.0, 7.5, 10.0];
        let y = vec![1.0; 7];
        LoopDataset::new(x.clone(), y.clone(), x, y).unwrap()
    }

    #[test]
    fn resolve_is_inclusive_and_ordered() {
        let r = Region::new(Branch::Up, 5.0, 10.0);
        assert_eq!(r.resolve(&dataset(), 2).unwrap(), vec![4, 5, 6]);
    }

    #[test]
    fn reversed_range_is_normalized() {
        let r = Region::new(Branch::Down, 10.0, 5.0);
        assert_eq!((r.lo, r.hi), (5.0, 10.0));
        assert_eq!(r.resolve(&dataset(), 1).unwrap(), vec![4, 5, 6]);
    }

    #[test]
    fn empty_and_short_regions_are_errors() {
        let ds = dataset();
        let err = Region::new(Branch::Up, 20.0, 30.0).resolve(&ds, 1).unwrap_err();
        assert!(matches!(err, LoopError::EmptyRegion { branch: Branch::Up, .. }));

        let err = Region::new(Branch::Up, -1.0, 1.0).resolve(&ds, 2).unwrap_err();
        assert_eq!(
            err,
            LoopError::InsufficientSamples {
                branch: Branch::Up,
                found: 1,
                required: 2
            }
        );
    }
}
