use serde::{Deserialize, Serialize};

use crate::algorithm::utility::{median, ppm_shift, remove_ppm_shift, sample_std, trim_central};
use crate::data::feature::FeatureTable;
use crate::data::tolerance::MIN_SD;
use crate::error::{CalibrationError, Result};
use crate::matching::index::{CandidateIndex, ChargeRule, SearchWindow};

/// Trimmed RT- and m/z-shift samples from the strongest features of two runs.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GlobalShifts {
    /// comparison RT minus reference RT, seconds
    pub rt: Vec<f64>,
    /// comparison m/z relative to reference m/z, ppm
    pub mz_ppm: Vec<f64>,
    /// number of pairs before trimming
    pub n_pairs: usize,
}

impl GlobalShifts {
    pub fn median_rt(&self) -> f64 {
        median(&self.rt)
    }

    pub fn median_mz_ppm(&self) -> f64 {
        median(&self.mz_ppm)
    }

    /// Sample SD of the RT shifts, never below [`MIN_SD`].
    pub fn rt_sd(&self) -> f64 {
        sd_or_floor(&self.rt)
    }

    pub fn mz_sd(&self) -> f64 {
        sd_or_floor(&self.mz_ppm)
    }

    /// Remove the median shifts from every feature of `comp`.
    pub fn apply(&self, comp: &mut FeatureTable) {
        let rt_shift = self.median_rt();
        let mz_shift = self.median_mz_ppm();
        for f in comp.features.iter_mut() {
            f.rt -= rt_shift;
            f.mz = remove_ppm_shift(f.mz, mz_shift);
        }
    }
}

fn sd_or_floor(values: &[f64]) -> f64 {
    let sd = sample_std(values);
    if sd.is_finite() { sd.max(MIN_SD) } else { MIN_SD }
}

/// Coarse one-shot drift estimate between a reference and a comparison run.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GlobalCalibrator {
    /// m/z window half-width in ppm
    pub tol_ppm: f64,
    /// fraction of the reference features to pair before stopping
    pub match_fraction: f64,
}

impl Default for GlobalCalibrator {
    fn default() -> Self {
        GlobalCalibrator { tol_ppm: 20.0, match_fraction: 0.05 }
    }
}

impl GlobalCalibrator {
    /// Number of pairs to collect for a reference run of `n` features.
    pub fn target_pairs(&self, n: usize) -> usize {
        ((self.match_fraction * n as f64).round() as usize).max(1)
    }

    /// Greedy one-to-one pairing of the strongest reference features.
    ///
    /// Reference features are visited in descending intensity; each takes the most intense
    /// remaining comparison feature inside the m/z window with a compatible charge.
    pub fn estimate(&self, reference: &FeatureTable, comp: &FeatureTable) -> Result<GlobalShifts> {
        let target = self.target_pairs(reference.len());
        let index = CandidateIndex::new(comp);
        let mut available = vec![true; comp.len()];

        let mut rt = Vec::with_capacity(target);
        let mut mz_ppm = Vec::with_capacity(target);

        for i in reference.intensity_order() {
            if rt.len() >= target {
                break;
            }
            let r = reference.get(i);
            let window = SearchWindow::mz_only(r.mz, self.tol_ppm);
            if let Some(j) = index.select(&window, r.z, ChargeRule::Strict, |p| available[p]) {
                available[j] = false;
                let c = comp.get(j);
                rt.push(c.rt - r.rt);
                mz_ppm.push(ppm_shift(r.mz, c.mz));
            }
        }

        if rt.is_empty() {
            return Err(CalibrationError::InsufficientData {
                stage: "global calibration",
                found: 0,
                required: 1,
            });
        }

        let n_pairs = rt.len();
        let shifts = GlobalShifts { rt: trim_central(&rt), mz_ppm: trim_central(&mz_ppm), n_pairs };

        log::info!("Based on {} matched features within {} ppm", n_pairs, self.tol_ppm);
        log::info!("The global RT-shift is {:.4} second", shifts.median_rt());
        log::info!("The global m/z-shift is {:.4} ppm", shifts.median_mz_ppm());

        Ok(shifts)
    }
}
