use statrs::statistics::{Data, Median, OrderStatistics, Statistics};

/// Relative deviation of `observed` from `reference` in parts per million.
#[inline]
pub fn ppm_shift(reference: f64, observed: f64) -> f64 {
    (observed - reference) / reference * 1e6
}

/// Lower and upper m/z bounds of a symmetric `tol_ppm` window around `mz`.
#[inline]
pub fn ppm_window(mz: f64, tol_ppm: f64) -> (f64, f64) {
    let d = mz * tol_ppm / 1e6;
    (mz - d, mz + d)
}

/// Undo a ppm shift: the m/z that, shifted by `shift_ppm`, would read as `mz`.
#[inline]
pub fn remove_ppm_shift(mz: f64, shift_ppm: f64) -> f64 {
    mz / (1.0 + shift_ppm / 1e6)
}

pub fn median(values: &[f64]) -> f64 {
    Data::new(values.to_vec()).median()
}

/// Sample standard deviation (n - 1 denominator); `NaN` for fewer than two values.
pub fn sample_std(values: &[f64]) -> f64 {
    values.iter().std_dev()
}

pub fn mean(values: &[f64]) -> f64 {
    values.iter().mean()
}

/// Quantile `tau` in `[0, 1]` of `values`.
pub fn quantile(values: &[f64], tau: f64) -> f64 {
    Data::new(values.to_vec()).quantile(tau)
}

/// Indices of the values lying inside the inclusive `[lo_pct, hi_pct]` percentile band.
///
/// The returned indices are ascending, so gathering them preserves the sample order.
pub fn trim_to_percentiles(values: &[f64], lo_pct: f64, hi_pct: f64) -> Vec<usize> {
    if values.is_empty() {
        return Vec::new();
    }
    let mut data = Data::new(values.to_vec());
    let lo = data.quantile(lo_pct / 100.0);
    let hi = data.quantile(hi_pct / 100.0);

    values
        .iter()
        .enumerate()
        .filter(|&(_, &v)| v >= lo && v <= hi)
        .map(|(i, _)| i)
        .collect()
}

/// Values inside the 10th to 90th percentile band; untrimmed if fewer than three remain.
pub fn trim_central(values: &[f64]) -> Vec<f64> {
    let keep = trim_to_percentiles(values, 10.0, 90.0);
    if keep.len() < 3 {
        return values.to_vec();
    }
    gather(values, &keep)
}

pub fn gather(values: &[f64], idx: &[usize]) -> Vec<f64> {
    idx.iter().map(|&i| values[i]).collect()
}

/// True if every value equals the first one (or the slice is empty).
pub fn all_identical(values: &[f64]) -> bool {
    match values.first() {
        None => true,
        Some(&v0) => values.iter().all(|&v| v == v0),
    }
}
