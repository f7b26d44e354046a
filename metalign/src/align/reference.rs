use std::path::Path;

use metcore::data::feature::FeatureTable;

use crate::error::{AlignError, Result};

/// Number of most intense features whose median ranks a run for auto-selection.
pub const REFERENCE_TOP_N: usize = 100;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReferenceSelection {
    Auto,
    Named(String),
}

impl ReferenceSelection {
    /// `"0"` or an empty value selects automatically.
    pub fn parse(value: &str) -> Self {
        match value.trim() {
            "" | "0" => ReferenceSelection::Auto,
            name => ReferenceSelection::Named(name.to_string()),
        }
    }
}

/// Position of the reference run in `runs`.
///
/// Auto picks the run with the largest median intensity over its top features; on ties
/// the later run wins. A name matches either the run name or a file name with extension.
pub fn select_reference(runs: &[FeatureTable], selection: &ReferenceSelection) -> Result<usize> {
    if runs.is_empty() {
        return Err(AlignError::Configuration("no feature runs given".to_string()));
    }
    match selection {
        ReferenceSelection::Auto => {
            let mut best = 0;
            let mut best_value = f64::NEG_INFINITY;
            for (i, run) in runs.iter().enumerate() {
                let value = run.top_n_median_intensity(REFERENCE_TOP_N);
                if value >= best_value {
                    best = i;
                    best_value = value;
                }
            }
            log::info!("Reference run (automatically selected): {}", runs[best].name);
            Ok(best)
        }
        ReferenceSelection::Named(name) => {
            let stem = Path::new(name).file_stem().map(|s| s.to_string_lossy().into_owned());
            let pos = runs
                .iter()
                .position(|r| r.name == *name || stem.as_deref() == Some(r.name.as_str()))
                .ok_or_else(|| AlignError::Configuration(format!("reference run '{}' is not among the input runs", name)))?;
            log::info!("Reference run (specified by the user): {}", runs[pos].name);
            Ok(pos)
        }
    }
}
