//! Numeric helpers shared by the likelihood and the chain summaries.

/// Numerically stable `ln(Σ exp(x_i))`.
///
/// The largest term is factored out before exponentiating so that very
/// negative log-densities (large Mahalanobis distances) do not underflow to
/// zero. Returns negative infinity for an empty slice or when every term is
/// negative infinity.
///
/// # Example
/// ```
/// use dustvar_core::utils::numeric::log_sum_exp;
///
/// let terms = [-1000.0, -1000.0];
/// let total = log_sum_exp(&terms);
/// assert!((total - (-1000.0 + 2.0_f64.ln())).abs() < 1e-12);
/// ```
pub fn log_sum_exp(terms: &[f64]) -> f64 {
    let max = terms.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        // Covers the empty slice, all -inf, and a +inf term.
        return max;
    }

    let sum: f64 = terms.iter().map(|&t| (t - max).exp()).sum();
    max + sum.ln()
}

/// Percentile of an already sorted slice, `q` in [0, 100].
///
/// Uses linear interpolation between the two nearest order statistics, the
/// same convention as numpy's default `percentile`. Returns NaN for an empty
/// slice.
pub fn percentile_sorted(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return f64::NAN;
    }

    let q = q.clamp(0.0, 100.0);
    let idx = q / 100.0 * (sorted.len() - 1) as f64;
    let lo = idx.floor() as usize;
    let hi = (idx.ceil() as usize).min(sorted.len() - 1);
    let frac = idx - lo as f64;
    if frac == 0.0 {
        return sorted[lo];
    }

    sorted[lo] * (1.0 - frac) + sorted[hi] * frac
}

/// Compute several percentiles of unsorted values in one pass.
///
/// Any NaN in `values` makes every percentile NaN, as with numpy, so a
/// broken chain is visible in its summary. Infinities are ranked normally.
pub fn percentiles<I>(values: I, qs: &[f64]) -> Vec<f64>
where
    I: IntoIterator<Item = f64>,
{
    let mut sorted: Vec<f64> = values.into_iter().collect();
    if sorted.iter().any(|v| v.is_nan()) {
        return vec![f64::NAN; qs.len()];
    }
    sorted.sort_by(f64::total_cmp);

    qs.iter().map(|&q| percentile_sorted(&sorted, q)).collect()
}
