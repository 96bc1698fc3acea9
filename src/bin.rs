use anyhow::{bail, Result};
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, trace};

use crate::basic::{basic, Transform};
use crate::channel::Channel;
use crate::column::{is_temporal, valueof, Column, Columns, ValueSpec};
use crate::data::Data;
use crate::error::PipelineError;
use crate::facet::{Facets, Frame};
use crate::group::{group_index, Outputs, Reducers, SeriesChannels};
use crate::interval::{utc_tick_interval, Interval};
use crate::options::MarkOptions;
use crate::reduce::{Extent, Reduce};
use crate::stats;
use crate::value::Value;

pub type ThresholdRule = dyn Fn(&[f64], f64, f64) -> usize + Send + Sync;

/// How bin boundaries are chosen.
#[derive(Clone, Default, Deserialize)]
#[serde(try_from = "ThresholdsRepr")]
pub enum Thresholds {
    /// Scott's rule, capped at 200 bins.
    #[default]
    Auto,
    Scott,
    Sturges,
    FreedmanDiaconis,
    /// About this many bins, on round boundaries.
    Count(usize),
    /// Exactly these boundaries.
    Values(Vec<Value>),
    /// One bin per interval.
    Interval(Interval),
    /// A bin count computed from `(values, min, max)`.
    Rule(Arc<ThresholdRule>),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ThresholdsRepr {
    Count(usize),
    Name(String),
    Values(Vec<Value>),
}

impl TryFrom<ThresholdsRepr> for Thresholds {
    type Error = anyhow::Error;

    fn try_from(repr: ThresholdsRepr) -> Result<Self> {
        match repr {
            ThresholdsRepr::Count(n) => Ok(Thresholds::Count(n)),
            ThresholdsRepr::Name(name) => name.parse(),
            ThresholdsRepr::Values(values) => Ok(Thresholds::Values(values)),
        }
    }
}

impl FromStr for Thresholds {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(Thresholds::Auto),
            "scott" => Ok(Thresholds::Scott),
            "sturges" => Ok(Thresholds::Sturges),
            "freedman-diaconis" => Ok(Thresholds::FreedmanDiaconis),
            _ => match s.trim().parse::<usize>() {
                Ok(n) => Ok(Thresholds::Count(n)),
                Err(_) => s
                    .parse::<Interval>()
                    .map(Thresholds::Interval)
                    .map_err(|_| PipelineError::invalid("thresholds", s).into()),
            },
        }
    }
}

impl fmt::Debug for Thresholds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Thresholds::Auto => f.write_str("Auto"),
            Thresholds::Scott => f.write_str("Scott"),
            Thresholds::Sturges => f.write_str("Sturges"),
            Thresholds::FreedmanDiaconis => f.write_str("FreedmanDiaconis"),
            Thresholds::Count(n) => f.debug_tuple("Count").field(n).finish(),
            Thresholds::Values(v) => f.debug_tuple("Values").field(v).finish(),
            Thresholds::Interval(i) => f.debug_tuple("Interval").field(i).finish(),
            Thresholds::Rule(_) => f.write_str("Rule(..)"),
        }
    }
}

/// Per-dimension binning options.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BinOptions {
    pub thresholds: Thresholds,
    /// Takes precedence over `thresholds`.
    pub interval: Option<Interval>,
    /// Fixed `[min, max]`; defaults to the extent of the values.
    pub domain: Option<(Value, Value)>,
    /// Positive accumulates from the first bin, negative from the last.
    pub cumulative: i32,
}

impl BinOptions {
    pub fn with_thresholds(mut self, thresholds: Thresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    pub fn with_interval(mut self, interval: Interval) -> Self {
        self.interval = Some(interval);
        self
    }

    pub fn with_domain(mut self, min: impl Into<Value>, max: impl Into<Value>) -> Self {
        self.domain = Some((min.into(), max.into()));
        self
    }

    pub fn with_cumulative(mut self, cumulative: i32) -> Self {
        self.cumulative = cumulative;
        self
    }
}

/// One binned dimension: its input channel plus how to cut it.
#[derive(Debug, Clone)]
struct Binner {
    value: ValueSpec,
    options: BinOptions,
}

/// Bins computed for one dataset.
struct Bins {
    thresholds: Vec<f64>,
    edges: Vec<(f64, f64)>,
    values: Vec<f64>,
    temporal: bool,
    cumulative: i32,
}

enum Cut {
    Count(usize),
    Interval(Interval),
    Values(Vec<f64>),
}

impl Binner {
    fn bins(&self, data: &Data, columns: &Columns) -> Result<Bins> {
        let raw = valueof(data, &self.value, columns)?;
        let interval = self.options.interval.or(match &self.options.thresholds {
            Thresholds::Interval(i) => Some(*i),
            _ => None,
        });
        let temporal = is_temporal(&raw) || interval.is_some_and(|i| i.is_temporal());
        let values: Vec<f64> = raw.iter().map(Value::to_number).collect();

        let thresholds = self.thresholds(&values, interval, temporal);
        let edges = match thresholds.len() {
            0 => Vec::new(),
            1 => vec![(thresholds[0], thresholds[0])],
            _ => thresholds.windows(2).map(|w| (w[0], w[1])).collect(),
        };
        trace!(bins = edges.len(), temporal, "computed bin thresholds");

        Ok(Bins {
            thresholds,
            edges,
            values,
            temporal,
            cumulative: self.options.cumulative,
        })
    }

    fn thresholds(&self, values: &[f64], interval: Option<Interval>, temporal: bool) -> Vec<f64> {
        let extent_domain = self.options.domain.is_none();
        let (mut min, mut max) = match &self.options.domain {
            Some((lo, hi)) => (lo.to_number(), hi.to_number()),
            None => match stats::extent(values) {
                Some(extent) => extent,
                None => return Vec::new(),
            },
        };

        let cut = match (interval, &self.options.thresholds) {
            (Some(i), _) => Cut::Interval(i),
            (None, Thresholds::Auto) => {
                Cut::Count(stats::threshold_scott(values, min, max).min(200))
            }
            (None, Thresholds::Scott) => Cut::Count(stats::threshold_scott(values, min, max)),
            (None, Thresholds::Sturges) => Cut::Count(stats::threshold_sturges(values)),
            (None, Thresholds::FreedmanDiaconis) => {
                Cut::Count(stats::threshold_freedman_diaconis(values, min, max))
            }
            (None, Thresholds::Count(n)) => Cut::Count(*n),
            (None, Thresholds::Rule(rule)) => Cut::Count(rule(values, min, max)),
            (None, Thresholds::Values(v)) => {
                let mut t: Vec<f64> = v.iter().map(Value::to_number).filter(|t| !t.is_nan()).collect();
                t.sort_by(f64::total_cmp);
                Cut::Values(t)
            }
            (None, Thresholds::Interval(i)) => Cut::Interval(*i),
        };

        let cut = match cut {
            Cut::Count(n) if temporal => {
                Cut::Interval(Interval::Utc(utc_tick_interval(min, max, n as f64)))
            }
            cut => cut,
        };

        match cut {
            Cut::Values(t) => t,
            Cut::Interval(i) => {
                if extent_domain {
                    min = i.floor(min);
                    max = i.offset(i.floor(max), 1);
                }
                i.range(min, i.offset(max, 1))
            }
            Cut::Count(n) if !extent_domain => stats::ticks(min, max, n as f64),
            Cut::Count(n) => nice_thresholds(min, max, n as f64),
        }
    }
}

/// Round thresholds covering `[min, max]`, the last strictly above `max`.
fn nice_thresholds(min: f64, max: f64, count: f64) -> Vec<f64> {
    let step = stats::tick_increment(min, max, count);
    if !step.is_finite() || step == 0.0 {
        return vec![min];
    }
    let steps = |r0: f64, r1: f64, at: &dyn Fn(f64) -> f64| -> Vec<f64> {
        let n = (r1 - r0 + 1.0).max(0.0) as usize;
        (0..n).map(|i| at(r0 + i as f64)).collect()
    };
    if step > 0.0 {
        let mut r0 = (min / step).round();
        let mut r1 = (max / step).round();
        if !(r0 * step <= min) {
            r0 -= 1.0;
        }
        if !(r1 * step > max) {
            r1 += 1.0;
        }
        steps(r0, r1, &|k| k * step)
    } else {
        let step = -step;
        let mut r0 = (min * step).round();
        let mut r1 = (max * step).round();
        if !(r0 / step <= min) {
            r0 -= 1.0;
        }
        if !(r1 / step > max) {
            r1 += 1.0;
        }
        steps(r0, r1, &|k| k / step)
    }
}

impl Bins {
    /// Members of each bin among `index`, in bin order.
    fn bin(&self, index: &[usize]) -> Vec<Vec<usize>> {
        let mut bins = vec![Vec::new(); self.edges.len()];
        for &i in index {
            let v = self.values[i];
            if v.is_nan() {
                continue;
            }
            let j = self.thresholds.partition_point(|&t| t <= v);
            if j == 0 {
                continue;
            }
            if let Some(bin) = bins.get_mut(j - 1) {
                bin.push(i);
            }
        }

        if self.cumulative > 0 {
            for k in 1..bins.len() {
                let previous = bins[k - 1].clone();
                bins[k].extend(previous);
            }
        } else if self.cumulative < 0 {
            for k in (0..bins.len().saturating_sub(1)).rev() {
                let next = bins[k + 1].clone();
                bins[k].extend(next);
            }
        }
        bins
    }

    fn edge(&self, x: f64) -> Value {
        if self.temporal {
            Value::from_millis(x)
        } else {
            Value::Number(x)
        }
    }
}

/// Columns for one binned dimension: the two edges and their midpoint.
#[derive(Debug, Clone)]
struct EdgeColumns {
    lo: Column,
    hi: Column,
    mid: Column,
}

impl EdgeColumns {
    fn new(options: &mut MarkOptions, value: &ValueSpec) -> Self {
        Self {
            lo: options.column(value.label()),
            hi: options.column(value.label()),
            mid: options.column(value.label()),
        }
    }
}

#[derive(Default)]
struct EdgeValues {
    lo: Vec<Value>,
    hi: Vec<Value>,
    mid: Vec<Value>,
}

impl EdgeValues {
    fn push(&mut self, lo: &Value, hi: &Value) {
        let mid = (lo.to_number() + hi.to_number()) / 2.0;
        self.mid.push(if lo.is_date() {
            Value::from_millis(mid)
        } else {
            Value::Number(mid)
        });
        self.lo.push(lo.clone());
        self.hi.push(hi.clone());
    }

    fn populate(self, columns: &mut Columns, edge: &EdgeColumns) {
        columns.populate(&edge.lo, self.lo);
        columns.populate(&edge.hi, self.hi);
        columns.populate(&edge.mid, self.mid);
    }
}

/// A bin and the bounds it covers on each binned dimension.
type Cell = (Vec<usize>, Option<(Value, Value)>, Option<(Value, Value)>);

fn cells(bx: Option<&Bins>, by: Option<&Bins>, index: &[usize]) -> Vec<Cell> {
    let bounds = |bins: &Bins, k: usize| {
        let (lo, hi) = bins.edges[k];
        (bins.edge(lo), bins.edge(hi))
    };
    match (bx, by) {
        (Some(bx), Some(by)) => {
            let mut out = Vec::new();
            for (ix, xs) in bx.bin(index).into_iter().enumerate() {
                for (iy, b) in by.bin(&xs).into_iter().enumerate() {
                    out.push((b, Some(bounds(bx, ix)), Some(bounds(by, iy))));
                }
            }
            out
        }
        (Some(bx), None) => bx
            .bin(index)
            .into_iter()
            .enumerate()
            .map(|(ix, b)| (b, Some(bounds(bx, ix)), None))
            .collect(),
        (None, Some(by)) => by
            .bin(index)
            .into_iter()
            .enumerate()
            .map(|(iy, b)| (b, None, Some(bounds(by, iy))))
            .collect(),
        (None, None) => Vec::new(),
    }
}

/// Bin on `bx` and/or `by`, grouping first on the series channels and then
/// on `key` (the unbinned dimension, when given).
fn binn(
    bx: Option<Binner>,
    by: Option<Binner>,
    key: Option<(&'static str, ValueSpec)>,
    outputs: Outputs,
    mut options: MarkOptions,
) -> Result<MarkOptions> {
    // Never group on a channel an output reads.
    let key = key.filter(|(name, _)| match *name {
        "x" => !outputs.has(&["x", "x1", "x2"]),
        _ => !outputs.has(&["y", "y1", "y2"]),
    });

    let ex = bx.as_ref().map(|b| EdgeColumns::new(&mut options, &b.value));
    let ey = by.as_ref().map(|b| EdgeColumns::new(&mut options, &b.value));
    let gk = key.as_ref().map(|(_, spec)| options.column(spec.label()));
    let series = SeriesChannels::new(&mut options, &outputs);
    // Empty bins are dropped unless a filter says otherwise.
    let reducers = Reducers::new(&outputs, &mut options, Some(Reduce::Count));

    let mut channels: Vec<(String, Channel)> = series.channels().collect();
    if let Some(ex) = ex.as_ref().filter(|_| !outputs.has(&["x"])) {
        channels.push(("x1".into(), Channel::from(ex.lo.clone())));
        channels.push(("x2".into(), Channel::from(ex.hi.clone())));
        channels.push(("x".into(), Channel::from(ex.mid.clone())));
    }
    if let Some(ey) = ey.as_ref().filter(|_| !outputs.has(&["y"])) {
        channels.push(("y1".into(), Channel::from(ey.lo.clone())));
        channels.push(("y2".into(), Channel::from(ey.hi.clone())));
        channels.push(("y".into(), Channel::from(ey.mid.clone())));
    }
    if let (Some((name, _)), Some(gk)) = (&key, &gk) {
        channels.push((name.to_string(), Channel::from(gk.clone())));
    }
    channels.extend(reducers.channels());

    let transform = Transform::new(move |frame, columns| {
        let Frame { data, facets } = frame;
        let keys = key
            .as_ref()
            .map(|(_, spec)| valueof(&data, spec, columns))
            .transpose()?;
        let bins_x = bx.as_ref().map(|b| b.bins(&data, columns)).transpose()?;
        let bins_y = by.as_ref().map(|b| b.bins(&data, columns)).transpose()?;
        let mut series_values = series.materialize(&data, columns)?;
        let mut reducers = reducers.clone();
        reducers.initialize(&data, columns)?;

        let mut group_facets: Facets = Vec::with_capacity(facets.len());
        let mut group_data = Vec::new();
        let mut out_key = Vec::new();
        let mut out_x = EdgeValues::default();
        let mut out_y = EdgeValues::default();

        for facet in &facets {
            let mut group_facet = Vec::new();
            reducers.scope(facet);
            for (f, index) in group_index(facet, series_values.subgroup()) {
                for (k, g) in group_index(&index, keys.as_deref()) {
                    for (b, x, y) in cells(bins_x.as_ref(), bins_y.as_ref(), &g) {
                        let extent = Extent {
                            x1: x.as_ref().map(|(lo, _)| lo.clone()),
                            x2: x.as_ref().map(|(_, hi)| hi.clone()),
                            y1: y.as_ref().map(|(lo, _)| lo.clone()),
                            y2: y.as_ref().map(|(_, hi)| hi.clone()),
                            z: series_values.subgroup().map(|_| f.clone()),
                            ..Default::default()
                        };
                        if !reducers.accepts(&b, &extent) {
                            continue;
                        }
                        group_facet.push(group_data.len());
                        group_data.push(reducers.datum(&data, &b, &extent));
                        if keys.is_some() {
                            out_key.push(k.clone());
                        }
                        series_values.push(&f, &b);
                        if let Some((lo, hi)) = &x {
                            out_x.push(lo, hi);
                        }
                        if let Some((lo, hi)) = &y {
                            out_y.push(lo, hi);
                        }
                        reducers.reduce(&b, &extent);
                    }
                }
            }
            group_facets.push(group_facet);
        }

        debug!(bins = group_data.len(), facets = group_facets.len(), "binned");

        if let Some(gk) = &gk {
            columns.populate(gk, out_key);
        }
        if let Some(ex) = &ex {
            out_x.populate(columns, ex);
        }
        if let Some(ey) = &ey {
            out_y.populate(columns, ey);
        }
        series.populate(series_values, columns);
        reducers.finish(&mut group_facets, columns);
        Ok(Frame::new(Data::new(group_data), group_facets))
    });

    let mut options = basic(options, Some(transform))?;
    for (name, channel) in channels {
        options.set(name, channel);
    }
    Ok(options)
}

fn first_of_pair(key: &'static str) -> ValueSpec {
    ValueSpec::accessor(move |row, _| row.get(key).cloned().unwrap_or_default())
}

/// Bin on `x`, grouping on `y` unless an output is named `y`.
pub fn bin_x(outputs: Outputs, bin: BinOptions, options: MarkOptions) -> Result<MarkOptions> {
    let x = options.get("x").cloned().unwrap_or(ValueSpec::Identity);
    let key = options.get("y").cloned().map(|y| ("y", y));
    binn(Some(Binner { value: x, options: bin }), None, key, outputs, options)
}

/// Bin on `y`, grouping on `x` unless an output is named `x`.
pub fn bin_y(outputs: Outputs, bin: BinOptions, options: MarkOptions) -> Result<MarkOptions> {
    let y = options.get("y").cloned().unwrap_or(ValueSpec::Identity);
    let key = options.get("x").cloned().map(|x| ("x", x));
    binn(None, Some(Binner { value: y, options: bin }), key, outputs, options)
}

/// Bin on both `x` and `y`; without either channel, rows are read as
/// `[x, y]` pairs.
pub fn bin(outputs: Outputs, bin_x: BinOptions, bin_y: BinOptions, options: MarkOptions) -> Result<MarkOptions> {
    let (x, y) = match (options.get("x").cloned(), options.get("y").cloned()) {
        (None, None) => (first_of_pair("0"), first_of_pair("1")),
        (Some(x), Some(y)) => (x, y),
        (None, Some(_)) => bail!(PipelineError::MissingChannel("x".into())),
        (Some(_), None) => bail!(PipelineError::MissingChannel("y".into())),
    };
    binn(
        Some(Binner { value: x, options: bin_x }),
        Some(Binner { value: y, options: bin_y }),
        None,
        outputs,
        options,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn run(options: &MarkOptions, data: Data) -> (Frame, Columns) {
        let mut columns = Columns::new();
        let frame = options
            .transform
            .as_ref()
            .unwrap()
            .apply(Frame::single(data), &mut columns)
            .unwrap();
        (frame, columns)
    }

    fn channel(options: &MarkOptions, name: &str, frame: &Frame, columns: &Columns) -> Vec<Value> {
        valueof(&frame.data, options.get(name).unwrap(), columns).unwrap()
    }

    fn numbers(v: &[f64]) -> Data {
        v.iter().copied().map(Value::from).collect()
    }

    fn count() -> Outputs {
        Outputs::new().with("y", Reduce::Count)
    }

    #[test]
    fn test_nice_thresholds_cover_extent() {
        assert_eq!(nice_thresholds(0.0, 10.0, 5.0), vec![0.0, 2.0, 4.0, 6.0, 8.0, 10.0, 12.0]);
        assert_eq!(nice_thresholds(0.5, 0.9, 4.0), vec![0.5, 0.6, 0.7, 0.8, 0.9, 1.0]);
        assert_eq!(nice_thresholds(3.0, 3.0, 10.0), vec![3.0]);
    }

    #[test]
    fn test_bin_x_counts_and_drops_empty_bins() {
        let data = numbers(&[0.0, 1.0, 1.5, 9.0]);
        let bin = BinOptions::default().with_thresholds(Thresholds::Count(5));
        let options = bin_x(count(), bin, MarkOptions::new()).unwrap();
        let (frame, columns) = run(&options, data);

        assert_eq!(channel(&options, "x1", &frame, &columns), numbers(&[0.0, 8.0]).to_vec());
        assert_eq!(channel(&options, "x2", &frame, &columns), numbers(&[2.0, 10.0]).to_vec());
        assert_eq!(channel(&options, "x", &frame, &columns), numbers(&[1.0, 9.0]).to_vec());
        assert_eq!(channel(&options, "y", &frame, &columns), numbers(&[3.0, 1.0]).to_vec());
    }

    #[test]
    fn test_without_filter_keeps_empty_bins() {
        let data = numbers(&[0.0, 9.0]);
        let bin = BinOptions::default().with_thresholds(Thresholds::Count(5));
        let options = bin_x(count().without_filter(), bin, MarkOptions::new()).unwrap();
        let (frame, columns) = run(&options, data);
        let y = channel(&options, "y", &frame, &columns);
        assert_eq!(y, numbers(&[1.0, 0.0, 0.0, 0.0, 1.0]).to_vec());
    }

    #[test]
    fn test_cumulative_matches_total() {
        let values = [0.5, 1.5, 1.7, 3.2, 3.3, 3.9, 7.0];
        let bin = BinOptions::default().with_thresholds(Thresholds::Count(4));
        let plain = bin_x(count().without_filter(), bin.clone(), MarkOptions::new()).unwrap();
        let (frame, columns) = run(&plain, numbers(&values));
        let counts = channel(&plain, "y", &frame, &columns);
        let total: f64 = counts.iter().map(Value::to_number).sum();

        let cumulative = bin_x(count().without_filter(), bin.with_cumulative(1), MarkOptions::new()).unwrap();
        let (frame, columns) = run(&cumulative, numbers(&values));
        let running = channel(&cumulative, "y", &frame, &columns);
        assert_eq!(running.last().unwrap().to_number(), total);
        assert_eq!(total, values.len() as f64);

        let reversed = bin_x(
            count().without_filter(),
            BinOptions::default().with_thresholds(Thresholds::Count(4)).with_cumulative(-1),
            MarkOptions::new(),
        )
        .unwrap();
        let (frame, columns) = run(&reversed, numbers(&values));
        let running = channel(&reversed, "y", &frame, &columns);
        assert_eq!(running.first().unwrap().to_number(), total);
    }

    #[test]
    fn test_explicit_domain_uses_ticks() {
        let data = numbers(&[1.0, 2.0, 3.0, 20.0]);
        let bin = BinOptions::default()
            .with_thresholds(Thresholds::Count(2))
            .with_domain(0, 10);
        let options = bin_x(count(), bin, MarkOptions::new()).unwrap();
        let (frame, columns) = run(&options, data);
        assert_eq!(channel(&options, "x1", &frame, &columns), numbers(&[0.0]).to_vec());
        assert_eq!(channel(&options, "y", &frame, &columns), numbers(&[3.0]).to_vec());
    }

    #[test]
    fn test_number_interval_bins() {
        let data = numbers(&[1.0, 12.0, 14.0]);
        let bin = BinOptions::default().with_interval("5".parse().unwrap());
        let options = bin_x(count(), bin, MarkOptions::new()).unwrap();
        let (frame, columns) = run(&options, data);
        assert_eq!(channel(&options, "x1", &frame, &columns), numbers(&[0.0, 10.0]).to_vec());
        assert_eq!(channel(&options, "y", &frame, &columns), numbers(&[1.0, 2.0]).to_vec());
    }

    #[test]
    fn test_temporal_bins_are_dates() {
        let day = |d| Value::from(Utc.with_ymd_and_hms(2024, 1, d, 6, 0, 0).unwrap());
        let data: Data = vec![day(1), day(1), day(3)].into();
        let bin = BinOptions::default().with_interval("day".parse().unwrap());
        let options = bin_x(count(), bin, MarkOptions::new()).unwrap();
        let (frame, columns) = run(&options, data);
        let x1 = channel(&options, "x1", &frame, &columns);
        assert_eq!(x1[0], Value::from(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()));
        assert_eq!(x1[1], Value::from(Utc.with_ymd_and_hms(2024, 1, 3, 0, 0, 0).unwrap()));
        assert_eq!(channel(&options, "y", &frame, &columns), numbers(&[2.0, 1.0]).to_vec());
    }

    #[test]
    fn test_bin_x_groups_by_y() {
        let data: Data = vec![
            Value::object([("v", Value::from(1)), ("k", Value::from("a"))]),
            Value::object([("v", Value::from(1)), ("k", Value::from("b"))]),
            Value::object([("v", Value::from(1)), ("k", Value::from("a"))]),
        ]
        .into();
        let options = MarkOptions::new().channel("x", "v").channel("y", "k");
        let outputs = Outputs::new().with("fill", Reduce::Count);
        let bin = BinOptions::default().with_thresholds(Thresholds::Count(1));
        let options = bin_x(outputs, bin, options).unwrap();
        let (frame, columns) = run(&options, data);
        assert_eq!(channel(&options, "y", &frame, &columns), vec![Value::from("a"), Value::from("b")]);
        assert_eq!(channel(&options, "fill", &frame, &columns), numbers(&[2.0, 1.0]).to_vec());
    }

    #[test]
    fn test_two_dimensional_bins() {
        let data: Data = vec![
            Value::Array(vec![0.5.into(), 0.5.into()]),
            Value::Array(vec![0.5.into(), 1.5.into()]),
            Value::Array(vec![1.5.into(), 1.5.into()]),
        ]
        .into();
        let bin = BinOptions::default().with_interval("1".parse().unwrap());
        let options = super::bin(
            Outputs::new().with("fill", Reduce::Count),
            bin.clone(),
            bin,
            MarkOptions::new(),
        )
        .unwrap();
        let (frame, columns) = run(&options, data);
        assert_eq!(channel(&options, "x1", &frame, &columns), numbers(&[0.0, 0.0, 1.0]).to_vec());
        assert_eq!(channel(&options, "y1", &frame, &columns), numbers(&[0.0, 1.0, 1.0]).to_vec());
        assert_eq!(channel(&options, "fill", &frame, &columns), numbers(&[1.0, 1.0, 1.0]).to_vec());
    }

    #[test]
    fn test_threshold_names() {
        assert!(matches!("sturges".parse::<Thresholds>().unwrap(), Thresholds::Sturges));
        assert!(matches!("20".parse::<Thresholds>().unwrap(), Thresholds::Count(20)));
        assert!(matches!("month".parse::<Thresholds>().unwrap(), Thresholds::Interval(_)));
        assert!("nonsense".parse::<Thresholds>().is_err());
    }
}
