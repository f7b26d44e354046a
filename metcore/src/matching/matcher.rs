use serde::{Deserialize, Serialize};

use crate::data::feature::FeatureTable;
use crate::data::tolerance::ToleranceModel;
use crate::matching::index::{CandidateIndex, ChargeRule, SearchWindow};

/// A reference/comparison pair, as storage positions in their tables.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchedPair {
    pub ref_pos: usize,
    pub comp_pos: usize,
}

/// One-to-one pairs between a reference and a comparison run.
#[derive(Clone, Debug, Default)]
pub struct MatchOutcome {
    pub pairs: Vec<MatchedPair>,
    pub ref_matched: Vec<bool>,
    pub comp_matched: Vec<bool>,
}

impl MatchOutcome {
    pub fn empty(n_ref: usize, n_comp: usize) -> Self {
        MatchOutcome { pairs: Vec::new(), ref_matched: vec![false; n_ref], comp_matched: vec![false; n_comp] }
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Record a pair. Both sides must still be unmatched.
    pub fn push(&mut self, ref_pos: usize, comp_pos: usize) {
        debug_assert!(!self.ref_matched[ref_pos] && !self.comp_matched[comp_pos]);
        self.ref_matched[ref_pos] = true;
        self.comp_matched[comp_pos] = true;
        self.pairs.push(MatchedPair { ref_pos, comp_pos });
    }

    pub fn unmatched_ref(&self) -> impl Iterator<Item = usize> + '_ {
        self.ref_matched.iter().enumerate().filter(|&(_, &m)| !m).map(|(i, _)| i)
    }

    pub fn unmatched_comp(&self) -> impl Iterator<Item = usize> + '_ {
        self.comp_matched.iter().enumerate().filter(|&(_, &m)| !m).map(|(i, _)| i)
    }
}

/// Final greedy matching of a calibrated comparison run.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FeatureMatcher {
    pub sd_width: f64,
}

impl Default for FeatureMatcher {
    fn default() -> Self {
        FeatureMatcher { sd_width: 10.0 }
    }
}

impl FeatureMatcher {
    pub fn new(sd_width: f64) -> Self {
        FeatureMatcher { sd_width }
    }

    /// Destructive greedy matching within the dynamic tolerance.
    ///
    /// Reference features are visited by descending intensity. A charged reference takes
    /// the most intense candidate if that one has unknown charge, otherwise the most
    /// intense candidate of equal charge. Matched comparison features leave the pool.
    pub fn match_features(
        &self,
        reference: &FeatureTable,
        comp: &FeatureTable,
        tolerance: &ToleranceModel,
    ) -> MatchOutcome {
        let tolerance = tolerance.clone().floored();
        let index = CandidateIndex::new(comp);
        let mut outcome = MatchOutcome::empty(reference.len(), comp.len());

        for i in reference.intensity_order() {
            let r = reference.get(i);
            let window = SearchWindow::new(
                r.mz,
                tolerance.mz_tolerance(i, self.sd_width),
                r.rt,
                tolerance.rt_tolerance(i, self.sd_width),
            );
            let comp_matched = &outcome.comp_matched;
            if let Some(j) = index.select(&window, r.z, ChargeRule::Permissive, |p| !comp_matched[p]) {
                outcome.push(i, j);
            }
        }

        log::debug!("{} of {} reference features matched in {}", outcome.len(), reference.len(), comp.name);
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::feature::Feature;
    use std::collections::HashSet;

    fn scenario() -> (FeatureTable, FeatureTable) {
        let r = FeatureTable::new(
            "ref",
            vec![
                Feature::new(0, 100.0, 60.0, 1, 1000.0),
                Feature::new(1, 200.0, 120.0, 0, 500.0),
                Feature::new(2, 300.0, 180.0, 2, 100.0),
            ],
        );
        let mut c = r.clone();
        c.name = "comp".into();
        for f in c.features.iter_mut() {
            f.mz *= 1.0 + 2.0 / 1e6;
            f.rt += 1.0;
        }
        (r, c)
    }

    #[test]
    fn test_shifted_scenario_matches_all_three() {
        let (r, c) = scenario();
        let tol = ToleranceModel::uniform(3, 1.0, 1.0);
        let out = FeatureMatcher::new(10.0).match_features(&r, &c, &tol);
        assert_eq!(out.len(), 3);
        for p in &out.pairs {
            assert_eq!(p.ref_pos, p.comp_pos);
            assert!(r.get(p.ref_pos).charge_compatible(c.get(p.comp_pos).z));
        }
    }

    #[test]
    fn test_matching_is_one_to_one() {
        // two reference features compete for the same comparison feature
        let r = FeatureTable::new(
            "ref",
            vec![Feature::new(0, 400.0, 300.0, 1, 10.0), Feature::new(1, 400.0004, 300.5, 1, 20.0)],
        );
        let c = FeatureTable::new("comp", vec![Feature::new(0, 400.0002, 300.2, 1, 5.0)]);
        let tol = ToleranceModel::uniform(2, 1.0, 1.0);
        let out = FeatureMatcher::new(10.0).match_features(&r, &c, &tol);
        assert_eq!(out.len(), 1);
        // the more intense reference feature wins
        assert_eq!(out.pairs[0], MatchedPair { ref_pos: 1, comp_pos: 0 });
        assert_eq!(out.unmatched_ref().collect::<Vec<_>>(), vec![0]);
        assert_eq!(out.unmatched_comp().count(), 0);
    }

    #[test]
    fn test_no_index_reused_in_dense_run() {
        let features: Vec<Feature> = (0..200)
            .map(|i| Feature::new(i, 500.0 + (i % 10) as f64 * 0.0005, 100.0 + (i % 7) as f64 * 0.3, (i % 3) as i32, 1.0 + i as f64))
            .collect();
        let r = FeatureTable::new("ref", features.clone());
        let c = FeatureTable::new("comp", features.into_iter().rev().collect());
        let tol = ToleranceModel::uniform(200, 1.0, 1.0);
        let out = FeatureMatcher::new(10.0).match_features(&r, &c, &tol);

        let refs: HashSet<usize> = out.pairs.iter().map(|p| p.ref_pos).collect();
        let comps: HashSet<usize> = out.pairs.iter().map(|p| p.comp_pos).collect();
        assert_eq!(refs.len(), out.len());
        assert_eq!(comps.len(), out.len());
        for p in &out.pairs {
            assert!(r.get(p.ref_pos).charge_compatible(c.get(p.comp_pos).z));
        }
    }

    #[test]
    fn test_charged_reference_skips_other_charge() {
        let r = FeatureTable::new("ref", vec![Feature::new(0, 250.0, 50.0, 2, 100.0)]);
        let c = FeatureTable::new(
            "comp",
            vec![Feature::new(0, 250.0001, 50.1, 1, 900.0), Feature::new(1, 250.0002, 50.2, 2, 10.0)],
        );
        let out = FeatureMatcher::new(10.0).match_features(&r, &c, &ToleranceModel::uniform(1, 1.0, 1.0));
        assert_eq!(out.pairs, vec![MatchedPair { ref_pos: 0, comp_pos: 1 }]);
    }

    #[test]
    fn test_zero_sd_entries_are_floored_before_matching() {
        let (r, c) = scenario();
        let tol = ToleranceModel::new(vec![0.0, 1.0, 1.0], vec![1.0, 0.0, 1.0]);
        let out = FeatureMatcher::new(10.0).match_features(&r, &c, &tol);
        assert_eq!(out.len(), 3);
    }
}
