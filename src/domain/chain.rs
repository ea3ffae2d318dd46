//! Append-only version chain of loop datasets.
//!
//! `raw → corrected-1 → corrected-2 → …`
//!
//! Links are shared as `Arc<LoopDataset>` and never rewritten. Undoing a
//! correction appends a new link pointing at an earlier dataset.
//!
//! Each link also records its `FieldFrame`: how its field axes relate to the
//! raw field, so regions entered in raw units can be located on any link.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{Branch, DatasetVersion, FitResult, LoopDataset, Region};

/// `x' = scale * x + offset`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AxisMap {
    pub scale: f64,
    pub offset: f64,
}

impl AxisMap {
    pub const IDENTITY: AxisMap = AxisMap {
        scale: 1.0,
        offset: 0.0,
    };

    pub fn map(self, x: f64) -> f64 {
        self.scale * x + self.offset
    }

    /// Followed by `v - a`.
    pub fn shifted(self, a: f64) -> Self {
        Self {
            scale: self.scale,
            offset: self.offset - a,
        }
    }

    /// Followed by `v * k`.
    pub fn scaled(self, k: f64) -> Self {
        Self {
            scale: self.scale * k,
            offset: self.offset * k,
        }
    }
}

/// Field axes of a link relative to the raw dataset.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FieldFrame {
    pub up: AxisMap,
    pub down: AxisMap,
}

impl Default for FieldFrame {
    fn default() -> Self {
        Self {
            up: AxisMap::IDENTITY,
            down: AxisMap::IDENTITY,
        }
    }
}

impl FieldFrame {
    pub fn axis(&self, branch: Branch) -> AxisMap {
        match branch {
            Branch::Up => self.up,
            Branch::Down => self.down,
        }
    }

    pub fn with_axis(mut self, branch: Branch, map: AxisMap) -> Self {
        match branch {
            Branch::Up => self.up = map,
            Branch::Down => self.down = map,
        }
        self
    }

    pub fn is_identity(&self) -> bool {
        *self == FieldFrame::default()
    }

    /// `region`, given in raw field units, expressed in this frame.
    pub fn locate(&self, region: &Region) -> Region {
        let map = self.axis(region.branch);
        Region::new(region.branch, map.map(region.lo), map.map(region.hi))
    }
}

/// An operation that was requested but not applied, and why.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedOp {
    pub operation: String,
    pub reason: String,
}

/// One fit performed by a correction step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegionFit {
    pub region: Region,
    pub fit: FitResult,
}

/// How a link was produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Provenance {
    /// Short label of the step (`"raw"` for the first link).
    pub label: String,
    /// Index of the link this one was derived from.
    pub source: Option<usize>,
    pub fits: Vec<RegionFit>,
    pub skipped: Vec<SkippedOp>,
    /// Free-form notes (applied shift/scale, normalization, ...).
    pub notes: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl Provenance {
    pub fn new(label: impl Into<String>, source: Option<usize>) -> Self {
        Self {
            label: label.into(),
            source,
            fits: Vec::new(),
            skipped: Vec::new(),
            notes: Vec::new(),
            created_at: Utc::now(),
        }
    }

    /// Total SSE over all fits of the step.
    pub fn total_sse(&self) -> f64 {
        self.fits.iter().map(|f| f.fit.quality.sse).sum()
    }
}

#[derive(Debug, Clone)]
pub struct LoopVersion {
    pub version: DatasetVersion,
    pub dataset: Arc<LoopDataset>,
    pub frame: FieldFrame,
    pub provenance: Provenance,
}

#[derive(Debug, Clone)]
pub struct VersionChain {
    links: Vec<LoopVersion>,
}

impl VersionChain {
    pub fn new(raw: LoopDataset) -> Self {
        Self {
            links: vec![LoopVersion {
                version: DatasetVersion::Raw,
                dataset: Arc::new(raw),
                frame: FieldFrame::default(),
                provenance: Provenance::new("raw", None),
            }],
        }
    }

    pub fn head(&self) -> &LoopVersion {
        // The chain is created with a raw link and only ever grows.
        &self.links[self.links.len() - 1]
    }

    pub fn head_index(&self) -> usize {
        self.links.len() - 1
    }

    pub fn get(&self, index: usize) -> Option<&LoopVersion> {
        self.links.get(index)
    }

    pub fn raw(&self) -> &LoopVersion {
        &self.links[0]
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &LoopVersion> {
        self.links.iter()
    }

    /// Number of correction passes behind the head dataset.
    pub fn iterations(&self) -> usize {
        self.head().version.iteration()
    }

    /// Append a corrected dataset derived from the current head.
    pub fn push(
        &mut self,
        dataset: LoopDataset,
        frame: FieldFrame,
        mut provenance: Provenance,
    ) -> &LoopVersion {
        provenance.source = Some(self.head_index());
        let version = self.head().version.next();
        self.links.push(LoopVersion {
            version,
            dataset: Arc::new(dataset),
            frame,
            provenance,
        });
        self.head()
    }

    /// Make link `index` current again by appending a link that shares its dataset.
    pub fn reset_to(&mut self, index: usize) -> Option<&LoopVersion> {
        let target = self.links.get(index)?.clone();
        let mut provenance = Provenance::new(format!("reset to {}", target.version), Some(index));
        provenance
            .notes
            .push(format!("restored link {index} ({})", target.version));
        self.links.push(LoopVersion {
            version: target.version,
            dataset: target.dataset,
            frame: target.frame,
            provenance,
        });
        Some(self.head())
    }
}
