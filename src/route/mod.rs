//! Grid routing: write the series of a dataset into destination columns.
//!
//! A `GridMapping` sends source slots (branch × axis) to destination slots;
//! a `DestinationGrid` binds each destination slot to a column name. Routing
//! validates everything before the first write, so a rejected mapping leaves
//! the destination table untouched.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::domain::{LoopDataset, Slot};
use crate::error::LoopError;
use crate::io::table::{normalize_header_name, ColumnTable};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    pub source: Slot,
    pub dest: Slot,
}

impl std::str::FromStr for Route {
    type Err = LoopError;

    /// `up-x=down-x` or `up-x` (identity).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('=') {
            Some((src, dst)) => Ok(Route {
                source: src.parse()?,
                dest: dst.parse()?,
            }),
            None => {
                let slot: Slot = s.parse()?;
                Ok(Route {
                    source: slot,
                    dest: slot,
                })
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridMapping {
    pub routes: Vec<Route>,
}

impl GridMapping {
    /// Every slot to itself.
    pub fn identity() -> Self {
        Self {
            routes: Slot::ALL
                .iter()
                .map(|&s| Route { source: s, dest: s })
                .collect(),
        }
    }

    /// The mapping must be injective in both directions.
    pub fn validate(&self) -> Result<(), LoopError> {
        let mut sources = BTreeSet::new();
        let mut dests = BTreeSet::new();
        for route in &self.routes {
            if !sources.insert(route.source) {
                return Err(LoopError::ConflictingMapping(format!(
                    "source {} is routed twice",
                    route.source
                )));
            }
            if !dests.insert(route.dest) {
                return Err(LoopError::ConflictingMapping(format!(
                    "destination {} is written twice",
                    route.dest
                )));
            }
        }
        Ok(())
    }
}

/// Column names bound to destination slots.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DestinationGrid {
    pub columns: BTreeMap<Slot, String>,
}

impl DestinationGrid {
    /// Bind the four slots, in grid order, to `names`.
    pub fn from_names(names: &[String]) -> Result<Self, LoopError> {
        if names.len() != Slot::ALL.len() {
            return Err(LoopError::invalid(
                "destination columns",
                format!("expected 4 names (up-x, up-y, down-x, down-y), got {}", names.len()),
            ));
        }
        Ok(Self {
            columns: Slot::ALL.iter().copied().zip(names.iter().cloned()).collect(),
        })
    }

    pub fn column(&self, slot: Slot) -> Option<&str> {
        self.columns.get(&slot).map(String::as_str)
    }
}

/// What `route` wrote.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteReport {
    /// `(source, destination column, samples written)`
    pub written: Vec<(Slot, String, usize)>,
}

/// Write every mapped series of `dataset` into `table`, all or nothing.
pub fn route(
    dataset: &LoopDataset,
    mapping: &GridMapping,
    grid: &DestinationGrid,
    table: &mut ColumnTable,
) -> Result<RouteReport, LoopError> {
    mapping.validate()?;

    let mut staged = Vec::with_capacity(mapping.routes.len());
    let mut seen_columns: BTreeMap<String, Slot> = BTreeMap::new();
    for route in &mapping.routes {
        let Some(column) = grid.column(route.dest) else {
            return Err(LoopError::UnboundDestination(route.dest));
        };
        if let Some(other) = seen_columns.insert(normalize_header_name(column), route.dest) {
            return Err(LoopError::ConflictingMapping(format!(
                "destinations {other} and {} are both bound to column '{column}'",
                route.dest
            )));
        }
        staged.push((route.source, column.to_string(), dataset.series(route.source).to_vec()));
    }

    let mut written = Vec::with_capacity(staged.len());
    for (source, column, values) in staged {
        log::debug!("route {source} -> '{column}' ({} samples)", values.len());
        written.push((source, column.clone(), values.len()));
        table.set_column(&column, values);
    }
    Ok(RouteReport { written })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dataset() -> LoopDataset {
        LoopDataset::new(vec![1.0, 2.0], vec![3.0, 4.0], vec![5.0], vec![6.0]).unwrap()
    }

    fn grid() -> DestinationGrid {
        let names: Vec<String> = ["H_up", "M_up", "H_dw", "M_dw"].iter().map(|s| s.to_string()).collect();
        DestinationGrid::from_names(&names).unwrap()
    }

    #[test]
    fn identity_route_writes_all_slots() {
        let mut table = ColumnTable::new();
        table.set_column("keep", vec![42.0]);
        let report = route(&dataset(), &GridMapping::identity(), &grid(), &mut table).unwrap();
        assert_eq!(report.written.len(), 4);
        assert_eq!(table.get("M_dw"), Some(&[6.0][..]));
        assert_eq!(table.get("keep"), Some(&[42.0][..]));
    }

    #[test]
    fn duplicate_destination_mutates_nothing() {
        let mut table = ColumnTable::new();
        table.set_column("H_up", vec![0.0]);
        let before = table.clone();
        let mapping = GridMapping {
            routes: vec![
                Route {
                    source: Slot::UP_X,
                    dest: Slot::UP_X,
                },
                Route {
                    source: Slot::DOWN_X,
                    dest: Slot::UP_X,
                },
            ],
        };
        let err = route(&dataset(), &mapping, &grid(), &mut table).unwrap_err();
        assert!(matches!(err, LoopError::ConflictingMapping(_)));
        assert_eq!(table, before);
    }

    #[test]
    fn unbound_destination_is_rejected_before_writing() {
        let mut g = grid();
        g.columns.remove(&Slot::DOWN_Y);
        let mut table = ColumnTable::new();
        let err = route(&dataset(), &GridMapping::identity(), &g, &mut table).unwrap_err();
        assert_eq!(err, LoopError::UnboundDestination(Slot::DOWN_Y));
        assert!(table.is_empty());
    }

    #[test]
    fn two_slots_on_one_column_conflict() {
        let mut g = grid();
        g.columns.insert(Slot::DOWN_X, "h_UP".to_string());
        let mut table = ColumnTable::new();
        let err = route(&dataset(), &GridMapping::identity(), &g, &mut table).unwrap_err();
        assert!(matches!(err, LoopError::ConflictingMapping(_)));
        assert!(table.is_empty());
    }

    #[test]
    fn routes_parse_from_text() {
        let r: Route = "up-x=dw-x".parse().unwrap();
        assert_eq!(r.dest, Slot::DOWN_X);
        let r: Route = "down-y".parse().unwrap();
        assert_eq!(r.source, r.dest);
    }
}
