// Numeric summaries over value sequences. Undefined inputs (null, NaN) are
// skipped everywhere unless noted.

use std::cmp::Ordering;
use std::collections::HashMap;

use crate::value::{ascending_defined, Value};

const E10: f64 = 7.0710678118654755; // sqrt(50)
const E5: f64 = 3.1622776601683795; // sqrt(10)
const E2: f64 = std::f64::consts::SQRT_2;

fn defined(values: &[f64]) -> impl Iterator<Item = f64> + '_ {
    values.iter().copied().filter(|v| !v.is_nan())
}

pub fn sum(values: &[f64]) -> f64 {
    defined(values).sum()
}

pub fn count(values: &[f64]) -> usize {
    defined(values).count()
}

pub fn mean(values: &[f64]) -> Option<f64> {
    let n = count(values);
    if n == 0 {
        return None;
    }
    Some(sum(values) / n as f64)
}

/// Sample variance (Welford), `None` with fewer than two defined values.
pub fn variance(values: &[f64]) -> Option<f64> {
    let mut n = 0.0;
    let mut mean = 0.0;
    let mut m2 = 0.0;
    for v in defined(values) {
        n += 1.0;
        let delta = v - mean;
        mean += delta / n;
        m2 += delta * (v - mean);
    }
    if n > 1.0 {
        Some(m2 / (n - 1.0))
    } else {
        None
    }
}

pub fn deviation(values: &[f64]) -> Option<f64> {
    variance(values).map(f64::sqrt)
}

pub fn min(values: &[f64]) -> Option<f64> {
    defined(values).reduce(f64::min)
}

pub fn max(values: &[f64]) -> Option<f64> {
    defined(values).reduce(f64::max)
}

pub fn extent(values: &[f64]) -> Option<(f64, f64)> {
    Some((min(values)?, max(values)?))
}

/// Position of the first least defined value.
pub fn min_index(values: &[f64]) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (i, &v) in values.iter().enumerate() {
        if v.is_nan() {
            continue;
        }
        match best {
            Some((_, b)) if b <= v => {}
            _ => best = Some((i, v)),
        }
    }
    best.map(|(i, _)| i)
}

/// Position of the first greatest defined value.
pub fn max_index(values: &[f64]) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (i, &v) in values.iter().enumerate() {
        if v.is_nan() {
            continue;
        }
        match best {
            Some((_, b)) if b >= v => {}
            _ => best = Some((i, v)),
        }
    }
    best.map(|(i, _)| i)
}

/// Linear interpolation between closest ranks over already sorted data.
pub fn percentile(sorted_data: &[f64], p: f64) -> f64 {
    let n = sorted_data.len();
    if n == 0 {
        return f64::NAN;
    }
    if n == 1 || p <= 0.0 {
        return sorted_data[0];
    }
    if p >= 1.0 {
        return sorted_data[n - 1];
    }

    let rank = p * (n - 1) as f64;
    let lower_idx = rank.floor() as usize;
    let upper_idx = rank.ceil() as usize;

    if lower_idx == upper_idx {
        sorted_data[lower_idx]
    } else {
        let weight = rank - lower_idx as f64;
        sorted_data[lower_idx] * (1.0 - weight) + sorted_data[upper_idx] * weight
    }
}

/// The `p`-quantile of the defined values.
pub fn quantile(values: &[f64], p: f64) -> Option<f64> {
    let mut sorted: Vec<f64> = defined(values).collect();
    if sorted.is_empty() {
        return None;
    }
    sorted.sort_by(f64::total_cmp);
    Some(percentile(&sorted, p))
}

pub fn median(values: &[f64]) -> Option<f64> {
    quantile(values, 0.5)
}

/// Most frequent defined value; ties go to the value seen first.
pub fn mode(values: &[Value]) -> Option<Value> {
    let mut counts: HashMap<&Value, (usize, usize)> = HashMap::new();
    for (i, v) in values.iter().enumerate().filter(|(_, v)| v.is_defined()) {
        counts.entry(v).or_insert((0, i)).0 += 1;
    }
    counts
        .into_iter()
        .max_by(|(_, (ca, ia)), (_, (cb, ib))| ca.cmp(cb).then(ib.cmp(ia)))
        .map(|(v, _)| v.clone())
}

/// Number of distinct defined values.
pub fn distinct(values: &[Value]) -> usize {
    let mut seen = std::collections::HashSet::new();
    values
        .iter()
        .filter(|v| v.is_defined())
        .filter(|v| seen.insert(*v))
        .count()
}

/// Zero-based rank of each value; ties share the lowest rank and undefined
/// values rank NaN.
pub fn rank(values: &[Value]) -> Vec<f64> {
    let mut order: Vec<usize> = (0..values.len())
        .filter(|&i| values[i].is_defined())
        .collect();
    order.sort_by(|&a, &b| ascending_defined(&values[a], &values[b]));

    let mut ranks = vec![f64::NAN; values.len()];
    let mut previous: Option<&Value> = None;
    let mut current = 0.0;
    for (position, &i) in order.iter().enumerate() {
        let v = &values[i];
        if previous.map_or(true, |p| ascending_defined(p, v) != Ordering::Equal) {
            current = position as f64;
        }
        ranks[i] = current;
        previous = Some(v);
    }
    ranks
}

fn js_round(x: f64) -> f64 {
    (x + 0.5).floor()
}

fn tick_spec(start: f64, stop: f64, count: f64) -> (f64, f64, f64) {
    let step = (stop - start) / count.max(0.0);
    let power = step.log10().floor();
    let error = step / 10f64.powf(power);
    let factor = if error >= E10 {
        10.0
    } else if error >= E5 {
        5.0
    } else if error >= E2 {
        2.0
    } else {
        1.0
    };

    let (mut i1, mut i2, inc);
    if power < 0.0 {
        let positive = 10f64.powf(-power) / factor;
        i1 = js_round(start * positive);
        i2 = js_round(stop * positive);
        if i1 / positive < start {
            i1 += 1.0;
        }
        if i2 / positive > stop {
            i2 -= 1.0;
        }
        inc = -positive;
    } else {
        inc = 10f64.powf(power) * factor;
        i1 = js_round(start / inc);
        i2 = js_round(stop / inc);
        if i1 * inc < start {
            i1 += 1.0;
        }
        if i2 * inc > stop {
            i2 -= 1.0;
        }
    }

    if i2 < i1 && (0.5..2.0).contains(&count) {
        return tick_spec(start, stop, count * 2.0);
    }
    (i1, i2, inc)
}

/// Tick increment; a negative result `-n` stands for the step `1/n`.
pub fn tick_increment(start: f64, stop: f64, count: f64) -> f64 {
    tick_spec(start, stop, count).2
}

/// Tick step as a plain (possibly fractional) number.
pub fn tick_step(start: f64, stop: f64, count: f64) -> f64 {
    let reverse = stop < start;
    let inc = if reverse {
        tick_increment(stop, start, count)
    } else {
        tick_increment(start, stop, count)
    };
    let step = if inc < 0.0 { 1.0 / -inc } else { inc };
    if reverse {
        -step
    } else {
        step
    }
}

/// Approximately `count` round values spanning `[start, stop]`.
pub fn ticks(start: f64, stop: f64, count: f64) -> Vec<f64> {
    if !(count > 0.0) {
        return Vec::new();
    }
    if start == stop {
        return vec![start];
    }
    let reverse = stop < start;
    let (i1, i2, inc) = if reverse {
        tick_spec(stop, start, count)
    } else {
        tick_spec(start, stop, count)
    };
    if !(i2 >= i1) {
        return Vec::new();
    }
    let n = (i2 - i1 + 1.0) as usize;
    (0..n)
        .map(|i| {
            let k = if reverse { i2 - i as f64 } else { i1 + i as f64 };
            if inc < 0.0 {
                k / -inc
            } else {
                k * inc
            }
        })
        .collect()
}

/// Scott's normal reference rule.
pub fn threshold_scott(values: &[f64], min: f64, max: f64) -> usize {
    let c = count(values) as f64;
    match deviation(values) {
        Some(d) if c > 0.0 && d > 0.0 => {
            ((max - min) * c.cbrt() / (3.49 * d)).ceil().max(1.0) as usize
        }
        _ => 1,
    }
}

/// Sturges' formula.
pub fn threshold_sturges(values: &[f64]) -> usize {
    let c = count(values) as f64;
    if c < 1.0 {
        return 1;
    }
    (c.log2().ceil() + 1.0).max(1.0) as usize
}

/// The Freedman–Diaconis rule.
pub fn threshold_freedman_diaconis(values: &[f64], min: f64, max: f64) -> usize {
    let c = count(values) as f64;
    let iqr = match (quantile(values, 0.75), quantile(values, 0.25)) {
        (Some(q3), Some(q1)) => q3 - q1,
        _ => 0.0,
    };
    if c > 0.0 && iqr > 0.0 {
        ((max - min) / (2.0 * iqr * c.powf(-1.0 / 3.0))).ceil().max(1.0) as usize
    } else {
        1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_cmp::approx_eq;

    #[test]
    fn test_summaries_skip_nan() {
        let v = [1.0, f64::NAN, 2.0, 3.0];
        assert_eq!(sum(&v), 6.0);
        assert_eq!(mean(&v), Some(2.0));
        assert_eq!(median(&v), Some(2.0));
        assert_eq!(extent(&v), Some((1.0, 3.0)));
        assert_eq!(min_index(&v), Some(0));
        assert_eq!(max_index(&v), Some(3));
        assert_eq!(mean(&[f64::NAN]), None);
    }

    #[test]
    fn test_variance() {
        let v = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        assert!(approx_eq!(f64, variance(&v).unwrap(), 32.0 / 7.0, epsilon = 1e-12));
        assert_eq!(variance(&[1.0]), None);
    }

    #[test]
    fn test_quantile() {
        let v = [3.0, 1.0, 2.0, 4.0];
        assert!(approx_eq!(f64, quantile(&v, 0.25).unwrap(), 1.75, epsilon = 1e-12));
        assert_eq!(quantile(&v, 0.0), Some(1.0));
        assert_eq!(quantile(&v, 1.0), Some(4.0));
    }

    #[test]
    fn test_mode_prefers_first_on_tie() {
        let v: Vec<Value> = ["b", "a", "a", "b", "c"].into_iter().map(Value::from).collect();
        assert_eq!(mode(&v), Some(Value::from("b")));
    }

    #[test]
    fn test_rank_ties_share_lowest() {
        let v: Vec<Value> = vec![30.into(), 10.into(), 30.into(), Value::Null, 20.into()];
        let r = rank(&v);
        assert_eq!(&r[..3], &[2.0, 0.0, 2.0]);
        assert!(r[3].is_nan());
        assert_eq!(r[4], 1.0);
    }

    #[test]
    fn test_ticks() {
        assert_eq!(ticks(0.0, 10.0, 5.0), vec![0.0, 2.0, 4.0, 6.0, 8.0, 10.0]);
        assert_eq!(ticks(0.0, 1.0, 5.0), vec![0.0, 0.2, 0.4, 0.6, 0.8, 1.0]);
        assert_eq!(ticks(3.0, 3.0, 5.0), vec![3.0]);
        assert_eq!(tick_increment(0.0, 1.0, 10.0), -10.0);
        assert_eq!(tick_step(0.0, 1.0, 10.0), 0.1);
        assert_eq!(tick_increment(0.0, 100.0, 10.0), 10.0);
    }

    #[test]
    fn test_threshold_rules() {
        let v: Vec<f64> = (0..16).map(f64::from).collect();
        assert_eq!(threshold_sturges(&v), 5);
        assert!(threshold_scott(&v, 0.0, 15.0) >= 1);
        assert_eq!(threshold_scott(&[1.0, 1.0], 1.0, 1.0), 1);
        assert_eq!(threshold_freedman_diaconis(&[2.0], 2.0, 2.0), 1);
    }
}
