use metcore::calibration::run::calibrate_run;
use metcore::data::feature::FeatureTable;
use metcore::matching::matcher::{FeatureMatcher, MatchOutcome};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::align::matrix::AlignmentMatrix;
use crate::align::reference::select_reference;
use crate::align::result::{AlignmentResult, RunAlignmentCounts};
use crate::error::Result;
use crate::params::AlignmentParams;

/// Calibration and matching statistics of one comparison run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunCalibrationSummary {
    pub name: String,
    pub n_features: usize,
    pub mean_rt_sd: f64,
    pub mean_mz_sd: f64,
    pub locally_calibrated: bool,
    pub n_matched: usize,
    pub n_rescued: usize,
}

/// Serializable overview of an alignment, printed by the binary.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AlignmentSummary {
    pub reference: String,
    pub calibration: Vec<RunCalibrationSummary>,
    pub counts: Vec<RunAlignmentCounts>,
}

#[derive(Clone, Debug)]
pub struct AlignmentOutcome {
    pub reference: usize,
    /// input runs with the comparison runs replaced by their calibrated copies
    pub runs: Vec<FeatureTable>,
    pub matrix: AlignmentMatrix,
    pub result: AlignmentResult,
    /// one entry per comparison run, in input order
    pub calibration: Vec<RunCalibrationSummary>,
}

impl AlignmentOutcome {
    pub fn summary(&self) -> AlignmentSummary {
        AlignmentSummary {
            reference: self.runs[self.reference].name.clone(),
            calibration: self.calibration.clone(),
            counts: self.result.counts.clone(),
        }
    }
}

struct AlignedRun {
    col: usize,
    table: FeatureTable,
    outcome: MatchOutcome,
    summary: RunCalibrationSummary,
}

/// Aligns N runs against one reference run.
#[derive(Clone, Debug, Default)]
pub struct MultiRunAligner {
    pub params: AlignmentParams,
}

impl MultiRunAligner {
    pub fn new(params: AlignmentParams) -> Self {
        MultiRunAligner { params }
    }

    /// Calibrate and match every comparison run against the reference, then partition.
    ///
    /// Comparison runs are independent of each other and run in parallel; any failing run
    /// fails the whole alignment.
    pub fn align(&self, runs: Vec<FeatureTable>) -> Result<AlignmentOutcome> {
        self.params.validate()?;
        let ref_col = select_reference(&runs, &self.params.reference_selection())?;

        if runs.len() < 2 {
            log::info!("Only one run given; nothing to align");
            let matrix = AlignmentMatrix::new(runs[ref_col].len(), 1, ref_col);
            let result = AlignmentResult::from_matrix(&runs, &matrix, self.params.pct_full_alignment);
            return Ok(AlignmentOutcome { reference: ref_col, runs, matrix, result, calibration: Vec::new() });
        }

        let calibration_params = self.params.calibration_params();
        let matcher = FeatureMatcher::new(self.params.sd_width);
        let rescue = self.params.rescue_stage();
        let reference = &runs[ref_col];

        let aligned = (0..runs.len())
            .into_par_iter()
            .filter(|&c| c != ref_col)
            .map(|col| -> metcore::Result<AlignedRun> {
                let comp = &runs[col];
                log::info!("Aligning {} against {}", comp.name, reference.name);
                let calibrated = calibrate_run(reference, comp, &calibration_params)?;

                let mut outcome = matcher.match_features(reference, &calibrated.table, &calibrated.tolerance);
                let n_matched = outcome.len();
                log::info!("{} features of {} are matched to the reference", n_matched, comp.name);

                let n_rescued = match &rescue {
                    Some(stage) => {
                        log::info!("Rescue of unaligned features of {}", comp.name);
                        stage.rescue(reference, &calibrated.table, &calibrated.tolerance, &mut outcome)
                    }
                    None => 0,
                };

                let summary = RunCalibrationSummary {
                    name: comp.name.clone(),
                    n_features: comp.len(),
                    mean_rt_sd: calibrated.tolerance.mean_rt_sd(),
                    mean_mz_sd: calibrated.tolerance.mean_mz_sd(),
                    locally_calibrated: calibrated.locally_calibrated,
                    n_matched,
                    n_rescued,
                };
                Ok(AlignedRun { col, table: calibrated.table, outcome, summary })
            })
            .collect::<metcore::Result<Vec<_>>>()?;

        let mut matrix = AlignmentMatrix::new(reference.len(), runs.len(), ref_col);
        let mut runs = runs;
        let mut calibration = Vec::with_capacity(aligned.len());
        for run in aligned {
            matrix.fill_column(run.col, &run.outcome);
            runs[run.col] = run.table;
            calibration.push(run.summary);
        }

        let result = AlignmentResult::from_matrix(&runs, &matrix, self.params.pct_full_alignment);
        Ok(AlignmentOutcome { reference: ref_col, runs, matrix, result, calibration })
    }
}
