//! Locally weighted polynomial regression (LOESS) for one predictor.
//!
//! Every evaluation is a direct local fit: the `q = floor(span * n)` training points
//! nearest to the evaluation point are weighted by a kernel of their scaled distance and
//! a polynomial of the configured degree is fitted by weighted least squares. When no
//! span is given, it is chosen by minimising the AICc criterion over `span_range`.

use itertools::izip;
use nalgebra::{DMatrix, DVector};
use ordered_float::OrderedFloat;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::algorithm::utility::all_identical;
use crate::error::{CalibrationError, Result};

/// Minimum number of observations for a local regression.
pub const MIN_OBSERVATIONS: usize = 3;

const INV_PHI: f64 = 0.618_033_988_749_894_8;

/// The bandwidth sits just past the farthest neighbour so every neighbour keeps a weight.
const BANDWIDTH_INFLATION: f64 = 1.0 + 1e-3;

/// Distance kernel, evaluated on `u = d / h` with `h` the local bandwidth.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Kernel {
    Tricube,
    /// Gaussian with sigma = 0.4 h, truncated at the bandwidth.
    Gaussian,
}

impl Kernel {
    #[inline]
    pub fn weight(&self, u: f64) -> f64 {
        if u >= 1.0 {
            return 0.0;
        }
        match self {
            Kernel::Tricube => {
                let a = 1.0 - u * u * u;
                a * a * a
            }
            Kernel::Gaussian => {
                let z = u / 0.4;
                (-0.5 * z * z).exp()
            }
        }
    }
}

/// Parameters of a LOESS fit.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LoessParams {
    /// Local polynomial degree, 0 to 2.
    pub degree: usize,
    pub kernel: Kernel,
    /// Fixed span; `None` selects it by AICc.
    pub span: Option<f64>,
    pub span_range: (f64, f64),
    pub span_tolerance: f64,
}

impl Default for LoessParams {
    fn default() -> Self {
        LoessParams {
            degree: 1,
            kernel: Kernel::Tricube,
            span: None,
            span_range: (0.05, 0.95),
            span_tolerance: 1e-4,
        }
    }
}

impl LoessParams {
    pub fn with_span(span: f64) -> Self {
        LoessParams { span: Some(span), ..Default::default() }
    }

    fn validate(&self) -> Result<()> {
        if self.degree > 2 {
            return Err(CalibrationError::Configuration(format!(
                "loess degree must be 0, 1 or 2, got {}", self.degree
            )));
        }
        let (lo, hi) = self.span_range;
        if !(lo > 0.0 && lo < hi && hi <= 1.0) {
            return Err(CalibrationError::Configuration(format!(
                "loess span range must satisfy 0 < lo < hi <= 1, got ({}, {})", lo, hi
            )));
        }
        if let Some(s) = self.span {
            if !(s > 0.0 && s <= 1.0) {
                return Err(CalibrationError::Configuration(format!(
                    "loess span must lie in (0, 1], got {}", s
                )));
            }
        }
        Ok(())
    }
}

#[derive(Clone, Debug)]
enum Surface {
    Local {
        xs: Vec<f64>,
        ys: Vec<f64>,
        degree: usize,
        kernel: Kernel,
        span: f64,
        trace_hat: f64,
    },
    Constant(f64),
}

/// A fitted LOESS curve.
#[derive(Clone, Debug)]
pub struct LoessModel {
    surface: Surface,
    y: Vec<f64>,
    fitted: Vec<f64>,
}

/// Fit entry point.
pub struct Loess;

impl Loess {
    /// Fit `y ~ x`.
    ///
    /// # Arguments
    ///
    /// * `x` - predictor values
    /// * `y` - responses, same length as `x`
    /// * `params` - degree, kernel and span selection
    ///
    /// # Errors
    ///
    /// `InsufficientData` for fewer than three points, `Configuration` for mismatched or
    /// non-finite input, `DegenerateRegression` when all responses are identical.
    pub fn fit(x: &[f64], y: &[f64], params: &LoessParams) -> Result<LoessModel> {
        params.validate()?;
        if x.len() != y.len() {
            return Err(CalibrationError::Configuration(format!(
                "loess input lengths differ: {} predictors, {} responses", x.len(), y.len()
            )));
        }
        if x.len() < MIN_OBSERVATIONS {
            return Err(CalibrationError::InsufficientData {
                stage: "loess fit",
                found: x.len(),
                required: MIN_OBSERVATIONS,
            });
        }
        if x.iter().chain(y.iter()).any(|v| !v.is_finite()) {
            return Err(CalibrationError::Configuration(
                "loess input contains non-finite values".to_string(),
            ));
        }
        if all_identical(y) {
            return Err(CalibrationError::DegenerateRegression);
        }

        let mut order: Vec<usize> = (0..x.len()).collect();
        order.sort_by_key(|&i| OrderedFloat(x[i]));
        let xs: Vec<f64> = order.iter().map(|&i| x[i]).collect();
        let ys: Vec<f64> = order.iter().map(|&i| y[i]).collect();

        let span = match params.span {
            Some(s) => s,
            None => select_span(&xs, &ys, params),
        };
        let (fitted_sorted, trace_hat) = fit_at_training_points(&xs, &ys, span, params);

        let mut fitted = vec![0.0; x.len()];
        for (&pos, &f) in order.iter().zip(&fitted_sorted) {
            fitted[pos] = f;
        }

        log::trace!("loess fit: n = {}, span = {:.4}, trace = {:.3}", x.len(), span, trace_hat);

        Ok(LoessModel {
            surface: Surface::Local {
                xs,
                ys,
                degree: params.degree,
                kernel: params.kernel,
                span,
                trace_hat,
            },
            y: y.to_vec(),
            fitted,
        })
    }
}

impl LoessModel {
    /// A flat curve at `value`, fitted to the responses `y`.
    pub fn constant(y: &[f64], value: f64) -> Self {
        LoessModel {
            surface: Surface::Constant(value),
            y: y.to_vec(),
            fitted: vec![value; y.len()],
        }
    }

    /// Fitted values at the training predictors, in input order.
    pub fn fitted(&self) -> &[f64] {
        &self.fitted
    }

    pub fn residuals(&self) -> Vec<f64> {
        self.y.iter().zip(&self.fitted).map(|(y, f)| y - f).collect()
    }

    pub fn span(&self) -> Option<f64> {
        match &self.surface {
            Surface::Local { span, .. } => Some(*span),
            Surface::Constant(_) => None,
        }
    }

    pub fn trace_hat(&self) -> f64 {
        match &self.surface {
            Surface::Local { trace_hat, .. } => *trace_hat,
            Surface::Constant(_) => 1.0,
        }
    }

    pub fn is_constant(&self) -> bool {
        matches!(self.surface, Surface::Constant(_))
    }

    /// Curve value at an arbitrary `x`, extrapolating with the boundary neighbourhood.
    pub fn predict_one(&self, x: f64) -> f64 {
        match &self.surface {
            Surface::Constant(c) => *c,
            Surface::Local { xs, ys, degree, kernel, span, .. } => {
                let q = neighbourhood_size(xs.len(), *span, *degree);
                local_fit(xs, ys, x, q, *degree, *kernel).value
            }
        }
    }

    pub fn predict(&self, x: &[f64]) -> Vec<f64> {
        x.par_iter().map(|&v| self.predict_one(v)).collect()
    }
}

struct LocalFit {
    value: f64,
    /// Hat-matrix weight of an observation sitting exactly at the evaluation point.
    self_influence: f64,
}

#[inline]
fn neighbourhood_size(n: usize, span: f64, degree: usize) -> usize {
    ((span * n as f64).floor() as usize).max(degree + 2).min(n)
}

/// Half-open window `[lo, hi)` of the `q` sorted points nearest to `x0`.
fn nearest_window(xs: &[f64], x0: f64, q: usize) -> (usize, usize) {
    let n = xs.len();
    let start = xs.partition_point(|&v| v < x0);
    let (mut lo, mut hi) = (start, start);
    while hi - lo < q {
        let take_left = if lo == 0 {
            false
        } else if hi == n {
            true
        } else {
            x0 - xs[lo - 1] <= xs[hi] - x0
        };
        if take_left { lo -= 1 } else { hi += 1 }
    }
    (lo, hi)
}

fn local_fit(xs: &[f64], ys: &[f64], x0: f64, q: usize, degree: usize, kernel: Kernel) -> LocalFit {
    let (lo, hi) = nearest_window(xs, x0, q);
    let h = (x0 - xs[lo]).abs().max((xs[hi - 1] - x0).abs()) * BANDWIDTH_INFLATION;

    let p = degree + 1;
    let mut a = DMatrix::<f64>::zeros(p, p);
    let mut b = DVector::<f64>::zeros(p);
    let mut phi = vec![0.0; p];
    let mut w_sum = 0.0;
    let mut wy_sum = 0.0;
    let mut distinct = 0usize;
    let mut last = f64::NAN;

    for (&xj, &yj) in izip!(&xs[lo..hi], &ys[lo..hi]) {
        let t = if h > 0.0 { (xj - x0) / h } else { 0.0 };
        let w = kernel.weight(t.abs());
        if w <= 0.0 {
            continue;
        }
        if xj != last {
            distinct += 1;
            last = xj;
        }
        phi[0] = 1.0;
        for k in 1..p {
            phi[k] = phi[k - 1] * t;
        }
        for r in 0..p {
            b[r] += w * phi[r] * yj;
            for c in 0..p {
                a[(r, c)] += w * phi[r] * phi[c];
            }
        }
        w_sum += w;
        wy_sum += w * yj;
    }

    // a polynomial of degree d needs d + 1 distinct abscissae
    if distinct > degree {
        // A z = e1 gives the first row of A^-1, so the intercept is z . b
        let mut e1 = DVector::<f64>::zeros(p);
        e1[0] = 1.0;
        if let Some(chol) = a.cholesky() {
            let z = chol.solve(&e1);
            if z.iter().all(|v| v.is_finite()) {
                return LocalFit { value: z.dot(&b), self_influence: z[0] };
            }
        }
    }

    LocalFit { value: wy_sum / w_sum, self_influence: 1.0 / w_sum }
}

/// Fits at every (sorted) training point and the trace of the hat matrix.
fn fit_at_training_points(xs: &[f64], ys: &[f64], span: f64, params: &LoessParams) -> (Vec<f64>, f64) {
    let q = neighbourhood_size(xs.len(), span, params.degree);
    let fits: Vec<LocalFit> = xs
        .par_iter()
        .map(|&x0| local_fit(xs, ys, x0, q, params.degree, params.kernel))
        .collect();
    let trace = fits.iter().map(|f| f.self_influence).sum();
    (fits.into_iter().map(|f| f.value).collect(), trace)
}

/// AICc of a fit with the given span; `+inf` when the effective degrees of freedom run out.
fn aicc(xs: &[f64], ys: &[f64], span: f64, params: &LoessParams) -> f64 {
    let n = xs.len() as f64;
    let (fitted, trace) = fit_at_training_points(xs, ys, span, params);
    let rss: f64 = ys.iter().zip(&fitted).map(|(y, f)| (y - f) * (y - f)).sum();
    let sigma2 = (rss / (n - 1.0)).max(f64::MIN_POSITIVE);
    let denom = n - trace - 2.0;
    if denom <= 0.0 {
        return f64::INFINITY;
    }
    sigma2.ln() + 1.0 + 2.0 * (2.0 * (trace + 1.0)) / denom
}

/// Golden-section search for the AICc-minimising span.
fn select_span(xs: &[f64], ys: &[f64], params: &LoessParams) -> f64 {
    let (mut a, mut b) = params.span_range;
    let mut c = b - INV_PHI * (b - a);
    let mut d = a + INV_PHI * (b - a);
    let mut fc = aicc(xs, ys, c, params);
    let mut fd = aicc(xs, ys, d, params);

    while (b - a).abs() > params.span_tolerance {
        if fc <= fd {
            b = d;
            d = c;
            fd = fc;
            c = b - INV_PHI * (b - a);
            fc = aicc(xs, ys, c, params);
        } else {
            a = c;
            c = d;
            fc = fd;
            d = a + INV_PHI * (b - a);
            fd = aicc(xs, ys, d, params);
        }
    }
    let span = if fc <= fd { c } else { d };
    if span.is_finite() { span } else { params.span_range.1 }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    #[test]
    fn test_degree_one_reproduces_line() {
        let x: Vec<f64> = (0..50).map(|i| i as f64 * 2.0).collect();
        let y: Vec<f64> = x.iter().map(|v| 0.5 * v - 3.0).collect();
        let model = Loess::fit(&x, &y, &LoessParams::with_span(0.3)).unwrap();
        for (f, yy) in model.fitted().iter().zip(&y) {
            assert!((f - yy).abs() < 1e-8);
        }
        // extrapolation of a line stays on the line
        assert!((model.predict_one(150.0) - 72.0).abs() < 1e-6);
        assert!((model.predict_one(-10.0) + 8.0).abs() < 1e-6);
    }

    #[test]
    fn test_fitted_values_follow_input_order() {
        let x = vec![5.0, 1.0, 3.0, 2.0, 4.0, 0.0];
        let y: Vec<f64> = x.iter().map(|v| 2.0 * v).collect();
        let model = Loess::fit(&x, &y, &LoessParams::with_span(0.9)).unwrap();
        for (f, yy) in model.fitted().iter().zip(&y) {
            assert!((f - yy).abs() < 1e-8);
        }
        assert!(model.residuals().iter().all(|r| r.abs() < 1e-8));
    }

    #[test]
    fn test_automatic_span_tracks_smooth_curve() {
        let mut rng = StdRng::seed_from_u64(7);
        let x: Vec<f64> = (0..200).map(|i| i as f64 / 10.0).collect();
        let truth: Vec<f64> = x.iter().map(|v| (v / 3.0).sin()).collect();
        let y: Vec<f64> = truth.iter().map(|t| t + rng.gen_range(-0.05..0.05)).collect();

        let model = Loess::fit(&x, &y, &LoessParams::default()).unwrap();
        let span = model.span().unwrap();
        assert!(span >= 0.05 && span <= 0.95);
        assert!(model.trace_hat() > 1.0);

        let max_err = model
            .fitted()
            .iter()
            .zip(&truth)
            .map(|(f, t)| (f - t).abs())
            .fold(0.0, f64::max);
        assert!(max_err < 0.15, "max error {}", max_err);

        let mid = model.predict(&[10.0])[0];
        assert!((mid - (10.0f64 / 3.0).sin()).abs() < 0.1);
    }

    #[test]
    fn test_gaussian_kernel_and_quadratic_degree() {
        let x: Vec<f64> = (0..40).map(|i| i as f64).collect();
        let y: Vec<f64> = x.iter().map(|v| 0.01 * v * v).collect();
        let params = LoessParams { degree: 2, kernel: Kernel::Gaussian, ..LoessParams::with_span(0.5) };
        let model = Loess::fit(&x, &y, &params).unwrap();
        for (f, yy) in model.fitted().iter().zip(&y) {
            assert!((f - yy).abs() < 1e-6);
        }
    }

    #[test]
    fn test_duplicate_predictors_fall_back_to_weighted_mean() {
        let x = vec![1.0, 1.0, 1.0, 1.0];
        let y = vec![1.0, 2.0, 3.0, 2.0];
        let model = Loess::fit(&x, &y, &LoessParams::with_span(0.9)).unwrap();
        assert!((model.predict_one(1.0) - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_prediction_between_duplicate_clusters_is_finite() {
        let x = vec![0.0, 0.0, 0.0, 2.0, 2.0, 2.0];
        let y = vec![1.0, 1.1, 0.9, 3.0, 3.1, 2.9];
        let model = Loess::fit(&x, &y, &LoessParams::with_span(0.3)).unwrap();
        let mid = model.predict_one(1.0);
        assert!(mid.is_finite());
        assert!((0.9..=3.1).contains(&mid), "prediction {}", mid);
        assert!(model.fitted().iter().all(|v| v.is_finite()));
        assert!((model.predict_one(0.0) - 1.0).abs() < 1e-9);
        assert!((model.predict_one(2.0) - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_input_errors() {
        let p = LoessParams::default();
        assert!(matches!(
            Loess::fit(&[1.0, 2.0], &[1.0, 2.0], &p),
            Err(CalibrationError::InsufficientData { found: 2, .. })
        ));
        assert!(matches!(
            Loess::fit(&[1.0, 2.0, 3.0], &[1.0, 2.0], &p),
            Err(CalibrationError::Configuration(_))
        ));
        assert!(matches!(
            Loess::fit(&[1.0, 2.0, 3.0], &[4.0, 4.0, 4.0], &p),
            Err(CalibrationError::DegenerateRegression)
        ));
        let bad = LoessParams { degree: 3, ..LoessParams::default() };
        assert!(Loess::fit(&[1.0, 2.0, 3.0], &[1.0, 2.0, 3.0], &bad).is_err());
    }

    #[test]
    fn test_constant_model() {
        let model = LoessModel::constant(&[2.0, 2.0, 2.0], 2.0);
        assert!(model.is_constant());
        assert_eq!(model.predict(&[0.0, 100.0]), vec![2.0, 2.0]);
        assert!(model.residuals().iter().all(|&r| r == 0.0));
    }
}
