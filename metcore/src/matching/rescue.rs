//! Recovery of near-miss features left unmatched by the final matching.
//!
//! Rescue uses looser windows but only accepts comparison features that look like the
//! confidently matched ones: bright enough and with a typical intensity ratio. It only
//! adds pairs.

use serde::{Deserialize, Serialize};

use crate::algorithm::utility::{median, quantile};
use crate::data::feature::FeatureTable;
use crate::data::tolerance::ToleranceModel;
use crate::error::{CalibrationError, Result};
use crate::matching::index::{CandidateIndex, ChargeRule, SearchWindow};
use crate::matching::matcher::MatchOutcome;

/// How a rescue tolerance value is interpreted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ToleranceUnit {
    /// value x per-feature SD (code 1)
    SdMultiple,
    /// fixed window, seconds for RT and ppm for m/z (code 2)
    Absolute,
}

impl ToleranceUnit {
    pub fn from_code(code: &str) -> Result<Self> {
        match code.trim() {
            "1" => Ok(ToleranceUnit::SdMultiple),
            "2" => Ok(ToleranceUnit::Absolute),
            other => Err(CalibrationError::Configuration(format!(
                "tolerance unit must be 1 (SD multiple) or 2 (absolute), got '{}'", other
            ))),
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct RescueTolerance {
    pub unit: ToleranceUnit,
    pub value: f64,
}

impl RescueTolerance {
    pub fn new(unit: ToleranceUnit, value: f64) -> Self {
        RescueTolerance { unit, value }
    }

    #[inline]
    pub fn half_width(&self, sd: f64) -> f64 {
        match self.unit {
            ToleranceUnit::SdMultiple => self.value * sd,
            ToleranceUnit::Absolute => self.value,
        }
    }
}

/// RT and m/z tolerances of one rescue round.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct RescueRound {
    pub rt: RescueTolerance,
    pub mz: RescueTolerance,
}

/// Acceptance thresholds derived from the confident pairs.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RescueCriteria {
    /// candidates must be strictly brighter than this
    pub min_intensity: f64,
    /// band for log2(ref intensity) - log2(comp intensity)
    pub ratio_lo: f64,
    pub ratio_hi: f64,
}

impl RescueCriteria {
    /// Thresholds from the current pairs; `None` if no pair has positive intensities.
    pub fn from_pairs(reference: &FeatureTable, comp: &FeatureTable, outcome: &MatchOutcome, ratio_pct: f64) -> Option<Self> {
        let (comp_int, ratios): (Vec<f64>, Vec<f64>) = outcome
            .pairs
            .iter()
            .map(|p| (reference.get(p.ref_pos).intensity, comp.get(p.comp_pos).intensity))
            .filter(|&(r, c)| r > 0.0 && c > 0.0)
            .map(|(r, c)| (c, r.log2() - c.log2()))
            .unzip();
        if ratios.is_empty() {
            return None;
        }
        let tail = (100.0 - ratio_pct) / 2.0 / 100.0;
        Some(RescueCriteria {
            min_intensity: median(&comp_int),
            ratio_lo: quantile(&ratios, tail),
            ratio_hi: quantile(&ratios, 1.0 - tail),
        })
    }

    #[inline]
    pub fn accepts(&self, ref_intensity: f64, comp_intensity: f64) -> bool {
        if ref_intensity <= 0.0 || comp_intensity <= self.min_intensity {
            return false;
        }
        let ratio = ref_intensity.log2() - comp_intensity.log2();
        ratio >= self.ratio_lo && ratio <= self.ratio_hi
    }
}

/// Relaxed matching of leftovers, one pass per round.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RescueStage {
    pub rounds: Vec<RescueRound>,
    /// central percentage of confident ratios accepted
    pub ratio_pct: f64,
}

impl RescueStage {
    pub fn new(rounds: Vec<RescueRound>) -> Self {
        RescueStage { rounds, ratio_pct: 95.0 }
    }

    /// Add pairs for unmatched features; returns the number rescued.
    pub fn rescue(
        &self,
        reference: &FeatureTable,
        comp: &FeatureTable,
        tolerance: &ToleranceModel,
        outcome: &mut MatchOutcome,
    ) -> usize {
        let criteria = match RescueCriteria::from_pairs(reference, comp, outcome, self.ratio_pct) {
            Some(c) => c,
            None => {
                log::info!("No aligned features to derive rescue criteria from; rescue is skipped");
                return 0;
            }
        };
        let unaligned = outcome.unmatched_comp().count();
        log::info!(
            "Rescue of {} unaligned features: intensity above {:.0} (median of aligned features), central {} % of intensity ratios",
            unaligned,
            criteria.min_intensity,
            self.ratio_pct
        );

        let tolerance = tolerance.clone().floored();
        let index = CandidateIndex::new(comp);
        let order = reference.intensity_order();
        let mut total = 0;

        for round in &self.rounds {
            let mut rescued = 0;
            for &i in &order {
                if outcome.ref_matched[i] {
                    continue;
                }
                let r = reference.get(i);
                let window = SearchWindow::new(
                    r.mz,
                    round.mz.half_width(tolerance.mz_sd[i]),
                    r.rt,
                    round.rt.half_width(tolerance.rt_sd[i]),
                );
                let comp_matched = &outcome.comp_matched;
                let accept = |p: usize| !comp_matched[p] && criteria.accepts(r.intensity, comp.get(p).intensity);
                if let Some(j) = index.select(&window, r.z, ChargeRule::Permissive, accept) {
                    outcome.push(i, j);
                    rescued += 1;
                }
            }
            log::info!("Through the rescue procedure {} features are additionally aligned", rescued);
            total += rescued;
        }
        total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::feature::Feature;
    use crate::matching::matcher::FeatureMatcher;
    use std::collections::HashSet;

    fn runs() -> (FeatureTable, FeatureTable) {
        let mut rf = Vec::new();
        let mut cf = Vec::new();
        for i in 0..20 {
            let mz = 150.0 + i as f64 * 10.0;
            let rt = 100.0 + i as f64 * 20.0;
            let int = 1000.0 + i as f64 * 100.0;
            rf.push(Feature::new(i, mz, rt, 1, int));
            cf.push(Feature::new(i, mz * (1.0 + 1e-6), rt + 0.5, 1, int * (0.85 + 0.005 * i as f64)));
        }
        // near miss: 8 s off, outside 10 x 0.5 s but inside an absolute 10 s window
        rf.push(Feature::new(20, 900.0, 900.0, 2, 3000.0));
        cf.push(Feature::new(20, 900.0009, 908.0, 2, 2700.0));
        // near miss that is too faint to be rescued
        rf.push(Feature::new(21, 950.0, 950.0, 1, 30.0));
        cf.push(Feature::new(21, 950.0005, 957.0, 1, 27.0));
        (FeatureTable::new("ref", rf), FeatureTable::new("comp", cf))
    }

    #[test]
    fn test_unit_codes() {
        assert_eq!(ToleranceUnit::from_code("1").unwrap(), ToleranceUnit::SdMultiple);
        assert_eq!(ToleranceUnit::from_code(" 2 ").unwrap(), ToleranceUnit::Absolute);
        assert!(matches!(ToleranceUnit::from_code("3"), Err(CalibrationError::Configuration(_))));
    }

    #[test]
    fn test_rescue_adds_bright_near_miss_only() {
        let (r, c) = runs();
        let tol = ToleranceModel::uniform(r.len(), 0.5, 1.0);
        let mut out = FeatureMatcher::new(10.0).match_features(&r, &c, &tol);
        assert_eq!(out.len(), 20);
        let before = out.pairs.clone();

        let stage = RescueStage::new(vec![RescueRound {
            rt: RescueTolerance::new(ToleranceUnit::Absolute, 10.0),
            mz: RescueTolerance::new(ToleranceUnit::SdMultiple, 10.0),
        }]);
        let n = stage.rescue(&r, &c, &tol, &mut out);
        assert_eq!(n, 1);
        assert_eq!(out.len(), 21);
        // existing pairs are kept untouched
        assert_eq!(&out.pairs[..20], &before[..]);
        assert_eq!(out.pairs[20].ref_pos, 20);
        assert_eq!(out.pairs[20].comp_pos, 20);
        assert!(!out.ref_matched[21]);

        let comps: HashSet<usize> = out.pairs.iter().map(|p| p.comp_pos).collect();
        assert_eq!(comps.len(), out.len());
    }

    #[test]
    fn test_criteria_from_pairs() {
        let (r, c) = runs();
        let tol = ToleranceModel::uniform(r.len(), 0.5, 1.0);
        let out = FeatureMatcher::new(10.0).match_features(&r, &c, &tol);
        let crit = RescueCriteria::from_pairs(&r, &c, &out, 95.0).unwrap();
        let expected_ratio = 1.0f64.log2() - 0.9f64.log2();
        assert!(crit.ratio_lo < expected_ratio && expected_ratio < crit.ratio_hi);
        assert!(crit.ratio_lo > 0.0);
        assert!(crit.min_intensity > 1000.0);
        assert!(!crit.accepts(3000.0, 1000.0));
    }

    #[test]
    fn test_rescue_without_pairs_is_skipped() {
        let (r, c) = runs();
        let mut out = MatchOutcome::empty(r.len(), c.len());
        let stage = RescueStage::new(vec![RescueRound {
            rt: RescueTolerance::new(ToleranceUnit::Absolute, 100.0),
            mz: RescueTolerance::new(ToleranceUnit::Absolute, 100.0),
        }]);
        assert_eq!(stage.rescue(&r, &c, &ToleranceModel::uniform(r.len(), 1.0, 1.0), &mut out), 0);
        assert!(out.is_empty());
    }
}
