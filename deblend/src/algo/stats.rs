//! Robust statistics used by background and noise estimation.

/// MAD to standard deviation conversion factor for a normal distribution.
///
/// Equal to 1 / Φ⁻¹(3/4).
pub const MAD_TO_SIGMA: f64 = 1.482_602_218_505_602;

/// Calculate median of a slice of f64 values
///
/// NaN values are filtered out; infinite values are kept. For even-length
/// data the two middle values are averaged.
///
/// # Returns
///
/// * `Ok(median)` - The median value
/// * `Err(message)` - If no valid values remain after filtering NaN
pub fn median(values: &[f64]) -> Result<f64, String> {
    let mut valid_values: Vec<f64> = values.iter().filter(|v| !v.is_nan()).copied().collect();

    if valid_values.is_empty() {
        return Err(format!(
            "Insufficient data points to compute median: {} total values, 0 valid (all NaN)",
            values.len()
        ));
    }

    Ok(median_in_place(&mut valid_values))
}

/// Median of NaN-free data, reordering the buffer.
fn median_in_place(data: &mut [f64]) -> f64 {
    debug_assert!(!data.is_empty());

    let len = data.len();
    let mid = len / 2;
    let (left, upper, _) = data.select_nth_unstable_by(mid, |a, b| a.total_cmp(b));
    let upper = *upper;

    if len % 2 == 1 {
        upper
    } else {
        let lower = left.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        (lower + upper) / 2.0
    }
}

/// Median absolute deviation about the median.
///
/// Returns `(median, mad)`, or an error when the input holds no finite-or-infinite
/// (non-NaN) values.
pub fn median_and_mad(values: &[f64]) -> Result<(f64, f64), String> {
    let center = median(values)?;
    let deviations: Vec<f64> = values
        .iter()
        .filter(|v| !v.is_nan())
        .map(|v| (v - center).abs())
        .collect();
    let mad = median(&deviations)?;
    Ok((center, mad))
}

/// Result of iterative sigma clipping.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClippedStats {
    /// Median of the surviving values
    pub median: f64,
    /// MAD-derived standard deviation of the surviving values
    pub sigma: f64,
    /// Number of values that survived clipping
    pub count: usize,
}

/// Sigma-clipped median and MAD sigma.
///
/// Iteratively rejects values further than `kappa × sigma` from the median,
/// stopping after `iterations` passes or when nothing more is rejected.
/// NaN and infinite values are ignored.
pub fn sigma_clipped_stats(values: &[f64], kappa: f64, iterations: usize) -> ClippedStats {
    let mut active: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if active.is_empty() {
        return ClippedStats {
            median: 0.0,
            sigma: 0.0,
            count: 0,
        };
    }

    let mut scratch = Vec::with_capacity(active.len());

    for _ in 0..iterations {
        let (center, sigma) = median_sigma(&active, &mut scratch);
        if sigma < f64::EPSILON {
            return ClippedStats {
                median: center,
                sigma: 0.0,
                count: active.len(),
            };
        }

        let threshold = kappa * sigma;
        let before = active.len();
        active.retain(|v| (v - center).abs() <= threshold);

        // Converged: nothing clipped
        if active.len() == before || active.len() < 3 {
            break;
        }
    }

    let (center, sigma) = median_sigma(&active, &mut scratch);
    ClippedStats {
        median: center,
        sigma,
        count: active.len(),
    }
}

fn median_sigma(values: &[f64], scratch: &mut Vec<f64>) -> (f64, f64) {
    scratch.clear();
    scratch.extend_from_slice(values);
    let center = median_in_place(scratch);

    scratch.clear();
    scratch.extend(values.iter().map(|v| (v - center).abs()));
    let mad = median_in_place(scratch);

    (center, mad * MAD_TO_SIGMA)
}
