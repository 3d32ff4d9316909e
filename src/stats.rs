//! Shared numeric helpers: moments, quantiles, ranks, and distribution tails.
//!
//! Every helper returns `None` for statistically undefined inputs instead of
//! producing NaN, so callers can surface missing cells directly.

use statrs::distribution::{ChiSquared, ContinuousCDF, FisherSnedecor, Normal, StudentsT};

/// Collect the present, finite values of a nullable column.
pub fn present(values: &[Option<f64>]) -> Vec<f64> {
    values
        .iter()
        .filter_map(|value| value.filter(|v| v.is_finite()))
        .collect()
}

/// Arithmetic mean; undefined when empty.
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Unbiased (n - 1) sample variance; undefined below two observations.
pub fn sample_variance(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let mu = mean(values)?;
    let ss: f64 = values.iter().map(|v| (v - mu).powi(2)).sum();
    Some(ss / (values.len() - 1) as f64)
}

/// Linearly interpolated sample quantile (Hyndman-Fan type 7).
///
/// This is the single quantile definition used for every threshold label.
pub fn quantile(values: &[f64], q: f64) -> Option<f64> {
    if values.is_empty() || !(0.0..=1.0).contains(&q) {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let h = (sorted.len() - 1) as f64 * q;
    let lo = h.floor() as usize;
    let hi = (lo + 1).min(sorted.len() - 1);
    Some(sorted[lo] + (h - lo as f64) * (sorted[hi] - sorted[lo]))
}

/// 1-based ranks with ties assigned their average rank.
pub fn average_ranks(values: &[f64]) -> Vec<f64> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));
    let mut ranks = vec![0.0; values.len()];
    let mut start = 0;
    while start < order.len() {
        let mut end = start + 1;
        while end < order.len() && values[order[end]] == values[order[start]] {
            end += 1;
        }
        // positions start..end share ranks start+1..=end
        let shared = (start + 1 + end) as f64 / 2.0;
        for &idx in &order[start..end] {
            ranks[idx] = shared;
        }
        start = end;
    }
    ranks
}

/// Pearson correlation; undefined for mismatched lengths, fewer than two
/// observations, or zero variance in either vector.
pub fn pearson(x: &[f64], y: &[f64]) -> Option<f64> {
    if x.len() != y.len() || x.len() < 2 {
        return None;
    }
    let mx = mean(x)?;
    let my = mean(y)?;
    let mut sxy = 0.0;
    let mut sxx = 0.0;
    let mut syy = 0.0;
    for (a, b) in x.iter().zip(y) {
        let dx = a - mx;
        let dy = b - my;
        sxy += dx * dy;
        sxx += dx * dx;
        syy += dy * dy;
    }
    if sxx <= 0.0 || syy <= 0.0 {
        return None;
    }
    Some((sxy / (sxx * syy).sqrt()).clamp(-1.0, 1.0))
}

/// Two-sided p-value of a standard normal statistic.
pub fn normal_two_sided_p(z: f64) -> Option<f64> {
    if !z.is_finite() {
        return None;
    }
    let normal = Normal::new(0.0, 1.0).ok()?;
    Some((2.0 * normal.sf(z.abs())).min(1.0))
}

/// Standard normal quantile.
pub fn normal_quantile(p: f64) -> Option<f64> {
    if !(p > 0.0 && p < 1.0) {
        return None;
    }
    let normal = Normal::new(0.0, 1.0).ok()?;
    Some(normal.inverse_cdf(p))
}

/// Two-sided p-value of a Student t statistic.
pub fn t_two_sided_p(t: f64, df: f64) -> Option<f64> {
    if t.is_nan() || !(df > 0.0) {
        return None;
    }
    if t.is_infinite() {
        return Some(0.0);
    }
    let dist = StudentsT::new(0.0, 1.0, df).ok()?;
    Some((2.0 * dist.sf(t.abs())).min(1.0))
}

/// Upper-tail probability of an F statistic.
pub fn f_upper_tail(stat: f64, d1: f64, d2: f64) -> Option<f64> {
    if !stat.is_finite() || !(d1 > 0.0) || !(d2 > 0.0) {
        return None;
    }
    if stat <= 0.0 {
        return Some(1.0);
    }
    let dist = FisherSnedecor::new(d1, d2).ok()?;
    Some(dist.sf(stat))
}

/// Upper-tail probability of a chi-squared statistic.
pub fn chi_squared_upper_tail(stat: f64, df: f64) -> Option<f64> {
    if stat.is_nan() || !(df > 0.0) {
        return None;
    }
    if stat <= 0.0 {
        return Some(1.0);
    }
    let dist = ChiSquared::new(df).ok()?;
    Some(dist.sf(stat))
}

/// Chi-squared quantile.
pub fn chi_squared_quantile(p: f64, df: f64) -> Option<f64> {
    if !(p > 0.0 && p < 1.0) || !(df > 0.0) {
        return None;
    }
    let dist = ChiSquared::new(df).ok()?;
    Some(dist.inverse_cdf(p))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quantile_interpolates_type_seven() {
        let values = [1.0, 2.0, 3.0, 4.0, 5.0];
        assert_eq!(quantile(&values, 0.5), Some(3.0));
        assert_eq!(quantile(&values, 0.0), Some(1.0));
        assert_eq!(quantile(&values, 1.0), Some(5.0));
        let q9 = quantile(&values, 0.9).expect("quantile");
        assert!((q9 - 4.6).abs() < 1e-12);
        assert_eq!(quantile(&[], 0.5), None);
    }

    #[test]
    fn quantile_ignores_input_order() {
        let shuffled = [5.0, 1.0, 4.0, 2.0, 3.0];
        assert_eq!(quantile(&shuffled, 0.25), Some(2.0));
    }

    #[test]
    fn average_ranks_split_ties() {
        let ranks = average_ranks(&[10.0, 20.0, 20.0, 5.0]);
        assert_eq!(ranks, vec![2.0, 3.5, 3.5, 1.0]);
    }

    #[test]
    fn sample_variance_needs_two_values() {
        assert_eq!(sample_variance(&[1.0]), None);
        let var = sample_variance(&[1.0, 3.0]).expect("variance");
        assert!((var - 2.0).abs() < 1e-12);
    }

    #[test]
    fn pearson_rejects_constant_vectors() {
        assert_eq!(pearson(&[1.0, 1.0, 1.0], &[1.0, 2.0, 3.0]), None);
        let r = pearson(&[1.0, 2.0, 3.0], &[2.0, 4.0, 6.0]).expect("r");
        assert!((r - 1.0).abs() < 1e-12);
    }

    #[test]
    fn tails_match_reference_values() {
        let p = normal_two_sided_p(1.959964).expect("p");
        assert!((p - 0.05).abs() < 1e-5);
        let q = chi_squared_quantile(0.95, 1.0).expect("q");
        assert!((q - 3.841459).abs() < 1e-4);
        let p = t_two_sided_p(0.0, 10.0).expect("p");
        assert!((p - 1.0).abs() < 1e-12);
        assert_eq!(f_upper_tail(0.0, 2.0, 10.0), Some(1.0));
        assert_eq!(normal_quantile(1.0), None);
    }

    #[test]
    fn present_drops_missing_and_non_finite() {
        let values = [Some(1.0), None, Some(f64::NAN), Some(2.0)];
        assert_eq!(present(&values), vec![1.0, 2.0]);
    }
}
