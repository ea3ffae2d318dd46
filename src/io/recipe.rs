//! JSON correction recipes.
//!
//! A recipe is the file form of a full run: the correction steps, how many
//! times to apply them, where to route the result and which metrics options
//! to use. Every field except `steps` has a default.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::correct::CorrectionStep;
use crate::error::AppError;
use crate::metrics::MetricsOptions;
use crate::route::{DestinationGrid, GridMapping};

fn default_passes() -> usize {
    1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recipe {
    pub steps: Vec<CorrectionStep>,
    /// How many times the whole step list is applied.
    #[serde(default = "default_passes")]
    pub passes: usize,
    /// Slot routes; identity when absent.
    #[serde(default)]
    pub routes: Option<GridMapping>,
    /// Destination column names per slot; slot names when absent.
    #[serde(default)]
    pub destination: Option<DestinationGrid>,
    #[serde(default)]
    pub metrics: MetricsOptions,
}

impl Recipe {
    /// Reject a recipe that cannot run before any data is touched.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.steps.is_empty() {
            return Err(AppError::new(4, "Recipe has no steps."));
        }
        if self.passes == 0 {
            return Err(AppError::new(4, "Recipe passes must be >= 1."));
        }
        for (i, step) in self.steps.iter().enumerate() {
            step.validate().map_err(|e| e.at_step(i, &step.label))?;
        }
        if let Some(routes) = &self.routes {
            routes.validate()?;
        }
        self.metrics.anisotropy.validate()?;
        Ok(())
    }
}

/// Read and validate a recipe file.
pub fn load_recipe(path: &Path) -> Result<Recipe, AppError> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| AppError::new(2, format!("Failed to read recipe '{}': {e}", path.display())))?;
    parse_recipe(&text)
}

/// Parse and validate recipe JSON.
pub fn parse_recipe(text: &str) -> Result<Recipe, AppError> {
    let recipe: Recipe = serde_json::from_str(text)
        .map_err(|e| AppError::new(2, format!("Invalid recipe JSON: {e}")))?;
    recipe.validate()?;
    Ok(recipe)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correct::DependentShift;
    use crate::domain::{Branch, ModelSpec, Region, Slot};

    #[test]
    fn minimal_recipe_fills_defaults() {
        let recipe = parse_recipe(
            r#"{
                "steps": [{
                    "regions": [
                        {"branch": "up", "lo": -10, "hi": -5},
                        {"branch": "up", "lo": 5, "hi": 10}
                    ],
                    "model": {"kind": "polynomial", "degree": 1}
                }]
            }"#,
        )
        .unwrap();
        assert_eq!(recipe.passes, 1);
        assert!(recipe.routes.is_none());
        let step = &recipe.steps[0];
        assert_eq!(step.label, "correction");
        assert_eq!(step.model, ModelSpec::Polynomial { degree: 1 });
        assert_eq!(step.regions[1].branch, Branch::Up);
        assert!(step.transform.is_identity());
    }

    #[test]
    fn full_recipe_parses_routes_and_shift() {
        let recipe = parse_recipe(
            r#"{
                "steps": [{
                    "label": "center",
                    "regions": [],
                    "transform": {"shift": 0.5},
                    "dependent_shift": {"kind": "fixed", "amount": 0.1}
                }],
                "passes": 2,
                "routes": {"routes": [
                    {"source": "up-x", "dest": "down-x"},
                    {"source": "down-x", "dest": "up-x"}
                ]},
                "destination": {"columns": {"up-x": "H1", "down-x": "H2"}}
            }"#,
        )
        .unwrap();
        assert_eq!(recipe.passes, 2);
        assert_eq!(
            recipe.steps[0].dependent_shift,
            Some(DependentShift::Fixed { amount: 0.1 })
        );
        let grid = recipe.destination.unwrap();
        assert_eq!(grid.column(Slot::DOWN_X), Some("H2"));
    }

    #[test]
    fn reversed_ranges_and_axis_options() {
        let recipe = parse_recipe(
            r#"{
                "steps": [{
                    "regions": [{"branch": "down", "lo": 10, "hi": 5}],
                    "invert": ["up-x", "down-x"],
                    "close_loop": true,
                    "normalize_endpoints": true
                }]
            }"#,
        )
        .unwrap();
        let step = &recipe.steps[0];
        assert_eq!(step.regions[0], Region::new(Branch::Down, 5.0, 10.0));
        assert_eq!(step.invert, Slot::field_slots());
        assert!(step.close_loop && step.normalize_endpoints);
        assert!(!step.symmetrize);

        let both = r#"{"steps": [{"regions": [], "normalize": true, "normalize_endpoints": true}]}"#;
        assert_eq!(parse_recipe(both).unwrap_err().exit_code(), 4);
    }

    #[test]
    fn invalid_recipes_map_to_exit_codes() {
        assert_eq!(parse_recipe("{").unwrap_err().exit_code(), 2);
        assert_eq!(parse_recipe(r#"{"steps": []}"#).unwrap_err().exit_code(), 4);

        let duplicate = r#"{
            "steps": [{"regions": [], "transform": {"scale": 2}}],
            "routes": {"routes": [
                {"source": "up-x", "dest": "up-x"},
                {"source": "down-x", "dest": "up-x"}
            ]}
        }"#;
        assert_eq!(parse_recipe(duplicate).unwrap_err().exit_code(), 4);
    }
}
