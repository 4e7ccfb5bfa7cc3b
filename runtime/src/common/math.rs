/// Adds `inc` to `sum` with Kahan compensation. `c` carries the running
/// compensation, the compensated total is `sum + c`.
#[inline]
pub(crate) fn kahan_sum_inc(inc: f64, sum: f64, c: f64) -> (f64, f64) {
    let t = sum + inc;
    let c = if t.is_infinite() {
        0.0
    } else if sum.abs() >= inc.abs() {
        c + ((sum - t) + inc)
    } else {
        c + ((inc - t) + sum)
    };
    (t, c)
}

pub(crate) fn kahan_sum(values: impl IntoIterator<Item = f64>) -> f64 {
    let (sum, c) = values
        .into_iter()
        .fold((0.0, 0.0), |(sum, c), v| kahan_sum_inc(v, sum, c));
    sum + c
}

pub(crate) fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    let n = values.len() as f64;
    let sum = kahan_sum(values.iter().copied());
    if sum.is_finite() || values.iter().any(|v| !v.is_finite()) {
        return sum / n;
    }
    // the sum overflowed, fall back to an incremental mean
    let mut mean = 0.0;
    for (i, v) in values.iter().enumerate() {
        mean += (v - mean) / (i + 1) as f64;
    }
    mean
}

/// Population variance, Welford's method with compensated accumulators.
pub(crate) fn stdvar(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    let mut count = 0.0;
    let (mut mean, mut c_mean) = (0.0, 0.0);
    let (mut aux, mut c_aux) = (0.0, 0.0);
    for v in values {
        count += 1.0;
        let delta = v - (mean + c_mean);
        (mean, c_mean) = kahan_sum_inc(delta / count, mean, c_mean);
        (aux, c_aux) = kahan_sum_inc(delta * (v - (mean + c_mean)), aux, c_aux);
    }
    (aux + c_aux) / count
}

pub(crate) fn stddev(values: &[f64]) -> f64 {
    stdvar(values).sqrt()
}

/// Linearly interpolated φ-quantile. φ below 0 gives -Inf and above 1 gives
/// +Inf.
pub(crate) fn quantile(phi: f64, values: &[f64]) -> f64 {
    if values.is_empty() || phi.is_nan() {
        return f64::NAN;
    }
    if phi < 0.0 {
        return f64::NEG_INFINITY;
    }
    if phi > 1.0 {
        return f64::INFINITY;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let n = sorted.len() as f64;
    let rank = phi * (n - 1.0);
    let lower = rank.floor().max(0.0) as usize;
    let upper = (lower + 1).min(sorted.len() - 1);
    let weight = rank - rank.floor();
    sorted[lower] * (1.0 - weight) + sorted[upper] * weight
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test]
    fn kahan_sum_keeps_small_terms() {
        let values = [1.0, 1e100, 1.0, -1e100];
        assert_eq!(kahan_sum(values), 2.0);
    }

    #[test_case(0.0, 1.0)]
    #[test_case(0.5, 2.5)]
    #[test_case(1.0, 4.0)]
    #[test_case(0.25, 1.75)]
    fn quantile_interpolates(phi: f64, expected: f64) {
        assert_eq!(quantile(phi, &[4.0, 1.0, 3.0, 2.0]), expected);
    }

    #[test]
    fn quantile_out_of_range() {
        assert_eq!(quantile(-0.1, &[1.0]), f64::NEG_INFINITY);
        assert_eq!(quantile(1.1, &[1.0]), f64::INFINITY);
        assert!(quantile(f64::NAN, &[1.0]).is_nan());
        assert!(quantile(0.5, &[]).is_nan());
    }

    #[test]
    fn variance_of_constant_is_zero() {
        assert_eq!(stdvar(&[3.0, 3.0, 3.0]), 0.0);
        assert_eq!(stdvar(&[1.0, 3.0]), 1.0);
        assert_eq!(stddev(&[1.0, 3.0]), 1.0);
    }

    #[test]
    fn mean_of_values() {
        assert_eq!(mean(&[1.0, 2.0, 3.0, 4.0]), 2.5);
        assert!(mean(&[]).is_nan());
    }
}
