use ordered_float::OrderedFloat;

use crate::algorithm::utility::{ppm_shift, ppm_window};
use crate::data::feature::{Feature, FeatureTable};

/// How charge states of a reference feature and its candidates are reconciled.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChargeRule {
    /// Same charge, or any charge when the reference charge is unknown.
    Strict,
    /// Like `Strict`, but the most intense candidate is also accepted when its own
    /// charge is unknown.
    Permissive,
}

/// Acceptance window around a reference feature.
#[derive(Clone, Copy, Debug)]
pub struct SearchWindow {
    pub mz: f64,
    pub mz_tol_ppm: f64,
    pub rt: f64,
    /// Half-width in seconds, `f64::INFINITY` for no RT constraint.
    pub rt_tol: f64,
    /// m/z bounds are `[lo, hi)` instead of a closed ppm distance
    pub half_open: bool,
}

impl SearchWindow {
    pub fn new(mz: f64, mz_tol_ppm: f64, rt: f64, rt_tol: f64) -> Self {
        SearchWindow { mz, mz_tol_ppm, rt, rt_tol, half_open: false }
    }

    /// m/z-only window `[mz (1 - tol / 1e6), mz (1 + tol / 1e6))`.
    pub fn mz_only(mz: f64, mz_tol_ppm: f64) -> Self {
        SearchWindow { mz, mz_tol_ppm, rt: 0.0, rt_tol: f64::INFINITY, half_open: true }
    }

    #[inline]
    pub fn contains(&self, f: &Feature) -> bool {
        if (f.rt - self.rt).abs() > self.rt_tol {
            return false;
        }
        if self.half_open {
            let (lo, hi) = ppm_window(self.mz, self.mz_tol_ppm);
            lo <= f.mz && f.mz < hi
        } else {
            ppm_shift(self.mz, f.mz).abs() <= self.mz_tol_ppm
        }
    }
}

/// m/z-sorted view over a comparison table with the intensity rank of every feature.
///
/// Lookups return storage positions; among several acceptable candidates the one with
/// the best intensity rank wins.
pub struct CandidateIndex<'a> {
    table: &'a FeatureTable,
    by_mz: Vec<usize>,
    sorted_mz: Vec<f64>,
    rank: Vec<usize>,
}

impl<'a> CandidateIndex<'a> {
    pub fn new(table: &'a FeatureTable) -> Self {
        let mut by_mz: Vec<usize> = (0..table.len()).collect();
        by_mz.sort_by_key(|&i| OrderedFloat(table.get(i).mz));
        let sorted_mz = by_mz.iter().map(|&i| table.get(i).mz).collect();
        CandidateIndex { table, by_mz, sorted_mz, rank: table.intensity_rank() }
    }

    /// Positions whose m/z could lie inside the window; callers re-check with `contains`.
    fn mz_slice(&self, window: &SearchWindow) -> &[usize] {
        // slightly wider than the window so rounding never drops a boundary candidate
        let (lo, hi) = ppm_window(window.mz, window.mz_tol_ppm * (1.0 + 1e-9) + 1e-9);
        let start = self.sorted_mz.partition_point(|&m| m < lo);
        let end = self.sorted_mz.partition_point(|&m| m <= hi);
        &self.by_mz[start..end.max(start)]
    }

    /// All acceptable candidates in intensity order.
    pub fn candidates<F>(&self, window: &SearchWindow, accept: F) -> Vec<usize>
    where
        F: Fn(usize) -> bool,
    {
        let mut out: Vec<usize> = self
            .mz_slice(window)
            .iter()
            .copied()
            .filter(|&pos| window.contains(self.table.get(pos)) && accept(pos))
            .collect();
        out.sort_by_key(|&pos| self.rank[pos]);
        out
    }

    /// Choose the partner of a reference feature with charge `z` under `rule`.
    ///
    /// `accept` filters candidates beyond the window (availability, intensity criteria).
    pub fn select<F>(&self, window: &SearchWindow, z: i32, rule: ChargeRule, accept: F) -> Option<usize>
    where
        F: Fn(usize) -> bool,
    {
        let mut best_any: Option<usize> = None;
        let mut best_same: Option<usize> = None;

        for &pos in self.mz_slice(window) {
            let f = self.table.get(pos);
            if !window.contains(f) || !accept(pos) {
                continue;
            }
            if best_any.map_or(true, |b| self.rank[pos] < self.rank[b]) {
                best_any = Some(pos);
            }
            if f.z == z && best_same.map_or(true, |b| self.rank[pos] < self.rank[b]) {
                best_same = Some(pos);
            }
        }

        if z == 0 {
            return best_any;
        }
        match rule {
            ChargeRule::Strict => best_same,
            ChargeRule::Permissive => match best_any {
                Some(top) if self.table.get(top).z == 0 => Some(top),
                _ => best_same,
            },
        }
    }
}
