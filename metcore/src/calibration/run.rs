use serde::{Deserialize, Serialize};

use crate::algorithm::loess::LoessParams;
use crate::calibration::global::{GlobalCalibrator, GlobalShifts};
use crate::calibration::local::LocalCalibrator;
use crate::data::feature::FeatureTable;
use crate::data::tolerance::ToleranceModel;
use crate::error::{CalibrationError, Result};

/// Settings for calibrating one comparison run.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CalibrationParams {
    /// m/z window of the global stage, ppm
    pub tol_initial: f64,
    /// dynamic tolerance = SD x sd_width
    pub sd_width: f64,
    pub global_match_fraction: f64,
    pub loess: LoessParams,
}

impl Default for CalibrationParams {
    fn default() -> Self {
        CalibrationParams {
            tol_initial: 20.0,
            sd_width: 10.0,
            global_match_fraction: 0.05,
            loess: LoessParams::default(),
        }
    }
}

impl CalibrationParams {
    pub fn global(&self) -> GlobalCalibrator {
        GlobalCalibrator { tol_ppm: self.tol_initial, match_fraction: self.global_match_fraction }
    }

    pub fn local(&self) -> LocalCalibrator {
        LocalCalibrator { sd_width: self.sd_width, loess: self.loess.clone(), ..Default::default() }
    }
}

/// A calibrated comparison run with its tolerance model.
#[derive(Clone, Debug)]
pub struct CalibratedRun {
    pub table: FeatureTable,
    pub tolerance: ToleranceModel,
    pub global: GlobalShifts,
    /// false if local calibration fell back to the global estimate
    pub locally_calibrated: bool,
}

/// Global then local calibration of `comp` against `reference`.
///
/// A global stage without any pair fails the run. A local stage short of matched
/// features falls back to the globally calibrated table with uniform global SDs.
pub fn calibrate_run(reference: &FeatureTable, comp: &FeatureTable, params: &CalibrationParams) -> Result<CalibratedRun> {
    log::info!("Global calibration of features is being performed");
    let global = params.global().estimate(reference, comp)?;
    let mut table = comp.clone();
    global.apply(&mut table);

    let initial = ToleranceModel::uniform(reference.len(), global.rt_sd(), global.mz_sd());

    log::info!("Local calibration of features is being performed (through LOESS modeling)");
    log::info!("RT- and m/z-tolerance = {} x dynamically estimated SD of RT- and m/z-shifts", params.sd_width);

    match params.local().calibrate(reference, &table, initial.clone()) {
        Ok(local) => Ok(CalibratedRun {
            table: local.table,
            tolerance: local.tolerance,
            global,
            locally_calibrated: true,
        }),
        Err(CalibrationError::InsufficientData { stage, found, required }) => {
            log::warn!(
                "{} of {} stopped with {} matched features (need {}); using global calibration only",
                stage, comp.name, found, required
            );
            Ok(CalibratedRun { table, tolerance: initial.floored(), global, locally_calibrated: false })
        }
        Err(e) => Err(e),
    }
}
