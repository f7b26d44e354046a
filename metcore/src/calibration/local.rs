use std::fmt::{self, Display, Formatter};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::algorithm::loess::{Loess, LoessModel, LoessParams, MIN_OBSERVATIONS};
use crate::algorithm::utility::{gather, ppm_shift, remove_ppm_shift, trim_to_percentiles};
use crate::data::feature::FeatureTable;
use crate::data::tolerance::ToleranceModel;
use crate::error::{CalibrationError, Result};
use crate::matching::index::{CandidateIndex, ChargeRule, SearchWindow};

/// Coordinate corrected by a calibration pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CalibrationAxis {
    Rt,
    Mz,
}

impl Display for CalibrationAxis {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            CalibrationAxis::Rt => write!(f, "RT"),
            CalibrationAxis::Mz => write!(f, "m/z"),
        }
    }
}

/// Columns of the reference/comparison pairs found by [`matched_subset`].
#[derive(Clone, Debug, Default)]
pub struct MatchedSubset {
    pub ref_rt: Vec<f64>,
    pub comp_rt: Vec<f64>,
    pub ref_mz: Vec<f64>,
    pub comp_mz: Vec<f64>,
}

impl MatchedSubset {
    pub fn len(&self) -> usize {
        self.ref_rt.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ref_rt.is_empty()
    }

    /// comparison minus reference RT
    pub fn rt_shifts(&self) -> Vec<f64> {
        self.comp_rt.iter().zip(&self.ref_rt).map(|(c, r)| c - r).collect()
    }

    /// comparison m/z relative to reference in ppm
    pub fn mz_shifts(&self) -> Vec<f64> {
        self.ref_mz.iter().zip(&self.comp_mz).map(|(&r, &c)| ppm_shift(r, c)).collect()
    }
}

/// Non-destructive nearest matching for model fitting.
///
/// Every reference feature takes the most intense comparison feature inside its dynamic
/// window; a comparison feature may serve several reference features.
pub fn matched_subset(
    reference: &FeatureTable,
    comp: &FeatureTable,
    tolerance: &ToleranceModel,
    sd_width: f64,
) -> MatchedSubset {
    let index = CandidateIndex::new(comp);
    let pairs: Vec<(usize, usize)> = reference
        .intensity_order()
        .par_iter()
        .filter_map(|&i| {
            let r = reference.get(i);
            let window = SearchWindow::new(
                r.mz,
                tolerance.mz_tolerance(i, sd_width),
                r.rt,
                tolerance.rt_tolerance(i, sd_width),
            );
            index.select(&window, r.z, ChargeRule::Strict, |_| true).map(|j| (i, j))
        })
        .collect();

    let mut subset = MatchedSubset::default();
    for (i, j) in pairs {
        let (r, c) = (reference.get(i), comp.get(j));
        subset.ref_rt.push(r.rt);
        subset.comp_rt.push(c.rt);
        subset.ref_mz.push(r.mz);
        subset.comp_mz.push(c.mz);
    }
    subset
}

/// Iterative LOESS calibration of a comparison run against the reference.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LocalCalibrator {
    /// tolerance = SD x sd_width
    pub sd_width: f64,
    pub loess: LoessParams,
    pub schedule: Vec<CalibrationAxis>,
}

impl Default for LocalCalibrator {
    fn default() -> Self {
        LocalCalibrator {
            sd_width: 10.0,
            loess: LoessParams::default(),
            schedule: vec![CalibrationAxis::Rt, CalibrationAxis::Rt, CalibrationAxis::Mz, CalibrationAxis::Mz],
        }
    }
}

/// Output of [`LocalCalibrator::calibrate`].
#[derive(Clone, Debug)]
pub struct LocalCalibration {
    pub table: FeatureTable,
    pub tolerance: ToleranceModel,
}

impl LocalCalibrator {
    /// Run every pass of the schedule on a copy of `comp`.
    ///
    /// # Arguments
    ///
    /// * `reference` - reference run, read only
    /// * `comp` - comparison run, already globally calibrated
    /// * `tolerance` - starting SDs, one entry per reference feature
    pub fn calibrate(
        &self,
        reference: &FeatureTable,
        comp: &FeatureTable,
        tolerance: ToleranceModel,
    ) -> Result<LocalCalibration> {
        let mut table = comp.clone();
        let mut tolerance = tolerance.floored();
        let mut rounds = [0usize; 2];

        for &axis in &self.schedule {
            tolerance = self.pass(axis, reference, &mut table, &tolerance)?;
            let round = &mut rounds[axis as usize];
            *round += 1;

            let (lo, hi, unit) = match axis {
                CalibrationAxis::Rt => {
                    let (lo, hi) = tolerance.rt_sd_range();
                    (lo, hi, "second")
                }
                CalibrationAxis::Mz => {
                    let (lo, hi) = tolerance.mz_sd_range();
                    (lo, hi, "ppm")
                }
            };
            log::info!("Round {} of {}-calibration is done; SD of {}-shifts {:.4} to {:.4} {}", round, axis, axis, lo, hi, unit);
        }

        Ok(LocalCalibration { table, tolerance })
    }

    /// One calibration pass along `axis`; returns the refreshed (floored) SDs.
    ///
    /// `comp` is corrected in place. Both RT and m/z SDs are re-estimated whatever the axis.
    pub fn pass(
        &self,
        axis: CalibrationAxis,
        reference: &FeatureTable,
        comp: &mut FeatureTable,
        tolerance: &ToleranceModel,
    ) -> Result<ToleranceModel> {
        let subset = matched_subset(reference, comp, tolerance, self.sd_width);
        if subset.len() < MIN_OBSERVATIONS {
            return Err(CalibrationError::InsufficientData {
                stage: "local calibration",
                found: subset.len(),
                required: MIN_OBSERVATIONS,
            });
        }
        log::debug!("{}-pass on {} matched features", axis, subset.len());

        let ref_rt = reference.rt_values();
        let ref_mz = reference.mz_values();

        let (rt_sd, mz_sd) = match axis {
            CalibrationAxis::Rt => {
                let model = self.fit_curve(&subset.comp_rt, &subset.rt_shifts())?;
                let cal_rt: Vec<f64> = subset.comp_rt.iter().zip(model.fitted()).map(|(c, f)| c - f).collect();
                let cal_shifts: Vec<f64> = cal_rt.iter().zip(&subset.ref_rt).map(|(c, r)| c - r).collect();

                let rt_sd = self.dynamic_sd(&cal_rt, &cal_shifts, true, &ref_rt)?;
                let mz_sd = self.dynamic_sd(&subset.comp_mz, &subset.mz_shifts(), false, &ref_mz)?;

                let correction = model.predict(&comp.rt_values());
                for (pos, d) in correction.into_iter().enumerate() {
                    let rt = comp.get(pos).rt;
                    comp.set_rt(pos, rt - d);
                }
                (rt_sd, mz_sd)
            }
            CalibrationAxis::Mz => {
                let model = self.fit_curve(&subset.comp_mz, &subset.mz_shifts())?;
                let cal_mz: Vec<f64> = subset
                    .comp_mz
                    .iter()
                    .zip(model.fitted())
                    .map(|(&c, &f)| remove_ppm_shift(c, f))
                    .collect();
                let cal_shifts: Vec<f64> = subset.ref_mz.iter().zip(&cal_mz).map(|(&r, &c)| ppm_shift(r, c)).collect();

                let mz_sd = self.dynamic_sd(&cal_mz, &cal_shifts, false, &ref_mz)?;
                let rt_sd = self.dynamic_sd(&subset.comp_rt, &subset.rt_shifts(), true, &ref_rt)?;

                let correction = model.predict(&comp.mz_values());
                for (pos, d) in correction.into_iter().enumerate() {
                    let mz = comp.get(pos).mz;
                    comp.set_mz(pos, remove_ppm_shift(mz, d));
                }
                (rt_sd, mz_sd)
            }
        };

        Ok(ToleranceModel::new(rt_sd, mz_sd).floored())
    }

    /// Shift curve; identical shifts give a flat curve at that shift.
    fn fit_curve(&self, x: &[f64], shifts: &[f64]) -> Result<LoessModel> {
        match Loess::fit(x, shifts, &self.loess) {
            Err(CalibrationError::DegenerateRegression) => Ok(LoessModel::constant(shifts, shifts[0])),
            other => other,
        }
    }

    /// SD of the shifts as a function of position, evaluated at `at`.
    ///
    /// With `trim` only the central 80 % of shifts enter the variance curve, unless that
    /// leaves too few points to fit.
    fn dynamic_sd(&self, x: &[f64], shifts: &[f64], trim: bool, at: &[f64]) -> Result<Vec<f64>> {
        let (x, shifts) = if trim {
            let keep = trim_to_percentiles(shifts, 10.0, 90.0);
            if keep.len() >= MIN_OBSERVATIONS {
                (gather(x, &keep), gather(shifts, &keep))
            } else {
                (x.to_vec(), shifts.to_vec())
            }
        } else {
            (x.to_vec(), shifts.to_vec())
        };

        let squared: Vec<f64> = shifts.iter().map(|s| s * s).collect();
        let model = self.fit_curve(&x, &squared)?;
        Ok(model.predict(at).into_iter().map(|v| v.max(0.0).sqrt()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::feature::Feature;
    use crate::data::tolerance::MIN_SD;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn synthetic_reference(n: usize, seed: u64) -> FeatureTable {
        let mut rng = StdRng::seed_from_u64(seed);
        let features = (0..n)
            .map(|i| {
                let mz = rng.gen_range(100.0..1000.0);
                let rt = rng.gen_range(60.0..1800.0);
                let z = rng.gen_range(0..3);
                let intensity = rng.gen_range(1e3..1e7);
                Feature::new(i as i64, mz, rt, z, intensity)
            })
            .collect();
        FeatureTable::new("ref", features)
    }

    /// Smooth RT drift and constant m/z drift plus small noise.
    fn drifted(reference: &FeatureTable, seed: u64) -> FeatureTable {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut comp = reference.clone();
        comp.name = "comp".into();
        for f in comp.features.iter_mut() {
            f.rt += 5.0 + 3.0 * (f.rt / 600.0).sin() + rng.gen_range(-0.2..0.2);
            let ppm = 2.0 + rng.gen_range(-0.3..0.3);
            f.mz *= 1.0 + ppm / 1e6;
        }
        comp
    }

    #[test]
    fn test_identical_runs_are_left_unchanged() {
        let r = synthetic_reference(300, 1);
        let cal = LocalCalibrator::default();
        let out = cal.calibrate(&r, &r, ToleranceModel::uniform(r.len(), MIN_SD, MIN_SD)).unwrap();
        for (a, b) in r.iter().zip(out.table.iter()) {
            assert!((a.rt - b.rt).abs() < 1e-9);
            assert!((a.mz - b.mz).abs() < 1e-9);
        }
        assert!(out.tolerance.rt_sd.iter().all(|&v| v > 0.0));
        assert!(out.tolerance.mz_sd.iter().all(|&v| v > 0.0));
    }

    #[test]
    fn test_smooth_drift_is_removed() {
        let r = synthetic_reference(600, 2);
        let mut c = drifted(&r, 3);
        // coarse alignment first, as the pipeline does
        for f in c.features.iter_mut() {
            f.rt -= 5.0;
            f.mz /= 1.0 + 2.0 / 1e6;
        }
        let cal = LocalCalibrator::default();
        let out = cal.calibrate(&r, &c, ToleranceModel::uniform(r.len(), 2.0, 0.5)).unwrap();

        let rt_err: Vec<f64> = r.iter().zip(out.table.iter()).map(|(a, b)| (a.rt - b.rt).abs()).collect();
        let mean_err = rt_err.iter().sum::<f64>() / rt_err.len() as f64;
        assert!(mean_err < 1.0, "mean RT error {}", mean_err);

        let mz_err: Vec<f64> = r.iter().zip(out.table.iter()).map(|(a, b)| ppm_shift(a.mz, b.mz).abs()).collect();
        let mean_mz = mz_err.iter().sum::<f64>() / mz_err.len() as f64;
        assert!(mean_mz < 0.5, "mean m/z error {} ppm", mean_mz);

        let mean_rt_sd = out.tolerance.mean_rt_sd();
        assert!(mean_rt_sd > 0.0 && mean_rt_sd < 2.0, "mean RT SD {}", mean_rt_sd);
    }

    #[test]
    fn test_subset_respects_strict_charge() {
        let r = FeatureTable::new("ref", vec![Feature::new(0, 300.0, 100.0, 2, 10.0)]);
        let c = FeatureTable::new(
            "comp",
            vec![Feature::new(0, 300.0001, 100.1, 0, 1000.0), Feature::new(1, 300.0002, 100.2, 2, 10.0)],
        );
        let tol = ToleranceModel::uniform(1, 1.0, 1.0);
        let s = matched_subset(&r, &c, &tol, 10.0);
        assert_eq!(s.len(), 1);
        assert!((s.comp_rt[0] - 100.2).abs() < 1e-12);
    }

    #[test]
    fn test_too_few_pairs_is_insufficient_data() {
        let r = synthetic_reference(50, 4);
        let mut c = r.clone();
        for f in c.features.iter_mut() {
            f.rt += 500.0;
        }
        let cal = LocalCalibrator::default();
        let res = cal.calibrate(&r, &c, ToleranceModel::uniform(r.len(), 1.0, 1.0));
        assert!(matches!(res, Err(CalibrationError::InsufficientData { .. })));
    }
}
