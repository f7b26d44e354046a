use serde::{Deserialize, Serialize};

/// Smallest standard deviation ever used for a tolerance window (seconds for RT, ppm for m/z).
pub const MIN_SD: f64 = 1e-3;

/// Replace non-positive (or non-finite) entries with the minimum positive entry.
///
/// Entries that were already positive are left untouched. If the slice has no positive
/// entry at all, every entry is set to `fallback`.
pub fn floor_zero_entries(values: &mut [f64], fallback: f64) {
    let min_pos = values
        .iter()
        .copied()
        .filter(|v| v.is_finite() && *v > 0.0)
        .fold(f64::INFINITY, f64::min);
    let floor = if min_pos.is_finite() { min_pos } else { fallback };

    for v in values.iter_mut() {
        if !(v.is_finite() && *v > 0.0) {
            *v = floor;
        }
    }
}

/// Per-reference-feature standard deviations of RT- and m/z-shifts.
///
/// Indexed by storage position of the reference table.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToleranceModel {
    pub rt_sd: Vec<f64>,
    pub mz_sd: Vec<f64>,
}

impl ToleranceModel {
    pub fn new(rt_sd: Vec<f64>, mz_sd: Vec<f64>) -> Self {
        debug_assert_eq!(rt_sd.len(), mz_sd.len());
        ToleranceModel { rt_sd, mz_sd }
    }

    /// Same SD for every one of `n` reference features.
    pub fn uniform(n: usize, rt_sd: f64, mz_sd: f64) -> Self {
        ToleranceModel { rt_sd: vec![rt_sd; n], mz_sd: vec![mz_sd; n] }
    }

    pub fn len(&self) -> usize {
        self.rt_sd.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rt_sd.is_empty()
    }

    /// Apply [`floor_zero_entries`] to both arrays.
    pub fn floored(mut self) -> Self {
        floor_zero_entries(&mut self.rt_sd, MIN_SD);
        floor_zero_entries(&mut self.mz_sd, MIN_SD);
        self
    }

    /// RT half-window (seconds) for reference position `i`.
    #[inline]
    pub fn rt_tolerance(&self, i: usize, sd_width: f64) -> f64 {
        self.rt_sd[i] * sd_width
    }

    /// m/z half-window (ppm) for reference position `i`.
    #[inline]
    pub fn mz_tolerance(&self, i: usize, sd_width: f64) -> f64 {
        self.mz_sd[i] * sd_width
    }

    pub fn mean_rt_sd(&self) -> f64 {
        mean_or_zero(&self.rt_sd)
    }

    pub fn mean_mz_sd(&self) -> f64 {
        mean_or_zero(&self.mz_sd)
    }

    pub fn rt_sd_range(&self) -> (f64, f64) {
        min_max(&self.rt_sd)
    }

    pub fn mz_sd_range(&self) -> (f64, f64) {
        min_max(&self.mz_sd)
    }
}

fn mean_or_zero(v: &[f64]) -> f64 {
    if v.is_empty() { 0.0 } else { v.iter().sum::<f64>() / v.len() as f64 }
}

fn min_max(v: &[f64]) -> (f64, f64) {
    v.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &x| (lo.min(x), hi.max(x)))
}
