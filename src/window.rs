use anyhow::{bail, Result};
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::error::PipelineError;
use crate::map::{map_x, map_y, Map, MapIndex};
use crate::options::MarkOptions;
use crate::parser;
use crate::stats;
use crate::value::Value;

/// Which element of the window each output aligns to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub enum Anchor {
    Start,
    #[default]
    Middle,
    End,
}

impl Anchor {
    /// Position of the anchored element within a window of `k`.
    pub fn offset(self, k: usize) -> usize {
        match self {
            Anchor::Start => 0,
            Anchor::Middle => k.saturating_sub(1) >> 1,
            Anchor::End => k.saturating_sub(1),
        }
    }
}

impl FromStr for Anchor {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "start" => Ok(Anchor::Start),
            "middle" => Ok(Anchor::Middle),
            "end" => Ok(Anchor::End),
            _ => bail!(PipelineError::invalid("anchor", s)),
        }
    }
}

impl TryFrom<String> for Anchor {
    type Error = anyhow::Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

pub type WindowFn = dyn Fn(&[Value]) -> Value + Send + Sync;

/// How each window is reduced.
#[derive(Clone, Default, Deserialize)]
#[serde(try_from = "String")]
pub enum WindowReduce {
    #[default]
    Mean,
    Sum,
    Min,
    Max,
    Median,
    Mode,
    Deviation,
    Variance,
    Quantile(f64),
    /// Last value minus first.
    Difference,
    /// Last value over first.
    Ratio,
    First,
    Last,
    Function(Arc<WindowFn>),
}

impl WindowReduce {
    pub fn function<F>(f: F) -> Self
    where
        F: Fn(&[Value]) -> Value + Send + Sync + 'static,
    {
        WindowReduce::Function(Arc::new(f))
    }

    /// Reduce the defined values of one window.
    fn reduce(&self, window: &[Value]) -> Value {
        let numbers = || -> Vec<f64> { window.iter().map(Value::to_number).collect() };
        let number = |v: Option<f64>| v.map_or(Value::Null, Value::Number);
        match self {
            WindowReduce::Mean => number(stats::mean(&numbers())),
            WindowReduce::Sum => Value::Number(stats::sum(&numbers())),
            WindowReduce::Min => number(stats::min(&numbers())),
            WindowReduce::Max => number(stats::max(&numbers())),
            WindowReduce::Median => number(stats::median(&numbers())),
            WindowReduce::Mode => stats::mode(window).unwrap_or_default(),
            WindowReduce::Deviation => number(stats::deviation(&numbers())),
            WindowReduce::Variance => number(stats::variance(&numbers())),
            WindowReduce::Quantile(p) => number(stats::quantile(&numbers(), *p)),
            WindowReduce::Difference => match ends(window) {
                Some((a, b)) => Value::Number(b - a),
                None => Value::Number(f64::NAN),
            },
            WindowReduce::Ratio => match ends(window) {
                Some((a, b)) if a != 0.0 => Value::Number(b / a),
                _ => Value::Number(f64::NAN),
            },
            WindowReduce::First => window.first().cloned().unwrap_or_default(),
            WindowReduce::Last => window.last().cloned().unwrap_or_default(),
            WindowReduce::Function(f) => f(window),
        }
    }
}

/// First and last finite numbers of a window.
fn ends(window: &[Value]) -> Option<(f64, f64)> {
    let finite = |v: &Value| v.as_f64().filter(|x| x.is_finite());
    let first = window.iter().find_map(finite)?;
    let last = window.iter().rev().find_map(finite)?;
    Some((first, last))
}

impl FromStr for WindowReduce {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        if let Some(p) = parser::percentile(s) {
            return Ok(WindowReduce::Quantile(p));
        }
        Ok(match s.to_ascii_lowercase().as_str() {
            "mean" => WindowReduce::Mean,
            "sum" => WindowReduce::Sum,
            "min" => WindowReduce::Min,
            "max" => WindowReduce::Max,
            "median" => WindowReduce::Median,
            "mode" => WindowReduce::Mode,
            "deviation" => WindowReduce::Deviation,
            "variance" => WindowReduce::Variance,
            "difference" => WindowReduce::Difference,
            "ratio" => WindowReduce::Ratio,
            "first" => WindowReduce::First,
            "last" => WindowReduce::Last,
            _ => bail!(PipelineError::invalid("reduce", s)),
        })
    }
}

impl TryFrom<String> for WindowReduce {
    type Error = anyhow::Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl fmt::Debug for WindowReduce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WindowReduce::Mean => f.write_str("Mean"),
            WindowReduce::Sum => f.write_str("Sum"),
            WindowReduce::Min => f.write_str("Min"),
            WindowReduce::Max => f.write_str("Max"),
            WindowReduce::Median => f.write_str("Median"),
            WindowReduce::Mode => f.write_str("Mode"),
            WindowReduce::Deviation => f.write_str("Deviation"),
            WindowReduce::Variance => f.write_str("Variance"),
            WindowReduce::Quantile(p) => f.debug_tuple("Quantile").field(p).finish(),
            WindowReduce::Difference => f.write_str("Difference"),
            WindowReduce::Ratio => f.write_str("Ratio"),
            WindowReduce::First => f.write_str("First"),
            WindowReduce::Last => f.write_str("Last"),
            WindowReduce::Function(_) => f.write_str("Function(..)"),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct WindowOptions {
    /// Window size; must be positive.
    pub k: usize,
    pub anchor: Anchor,
    pub reduce: WindowReduce,
    /// Leave truncated windows and windows with undefined values undefined.
    pub strict: bool,
}

impl WindowOptions {
    pub fn new(k: usize) -> Self {
        Self {
            k,
            ..Default::default()
        }
    }

    pub fn with_anchor(mut self, anchor: Anchor) -> Self {
        self.anchor = anchor;
        self
    }

    pub fn with_reduce(mut self, reduce: WindowReduce) -> Self {
        self.reduce = reduce;
        self
    }

    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }
}

/// A sliding window over each series.
#[derive(Debug, Clone)]
pub struct Window {
    k: usize,
    shift: usize,
    reduce: WindowReduce,
    strict: bool,
}

/// Running sums of the defined values of a series.
struct Prefix {
    sums: Vec<f64>,
    counts: Vec<usize>,
}

impl Prefix {
    fn new(values: &[Value]) -> Self {
        let mut sums = Vec::with_capacity(values.len() + 1);
        let mut counts = Vec::with_capacity(values.len() + 1);
        let (mut sum, mut count) = (0.0, 0);
        sums.push(sum);
        counts.push(count);
        for v in values {
            if let Some(x) = v.as_f64().filter(|x| !x.is_nan()) {
                sum += x;
                count += 1;
            }
            sums.push(sum);
            counts.push(count);
        }
        Self { sums, counts }
    }

    fn sum(&self, lo: usize, hi: usize) -> f64 {
        self.sums[hi] - self.sums[lo]
    }

    fn count(&self, lo: usize, hi: usize) -> usize {
        self.counts[hi] - self.counts[lo]
    }
}

impl Window {
    fn reduce_range(&self, values: &[Value], prefix: Option<&Prefix>, lo: usize, hi: usize) -> Value {
        match (&self.reduce, prefix) {
            (WindowReduce::Sum, Some(p)) => Value::Number(p.sum(lo, hi)),
            (WindowReduce::Mean, Some(p)) => Value::Number(p.sum(lo, hi) / p.count(lo, hi) as f64),
            (reduce, _) if self.strict => reduce.reduce(&values[lo..hi]),
            (reduce, _) => {
                let defined: Vec<Value> = values[lo..hi].iter().filter(|v| v.is_defined()).cloned().collect();
                reduce.reduce(&defined)
            }
        }
    }
}

impl MapIndex for Window {
    fn map_index(&self, index: &[usize], source: &[Value], target: &mut [Value]) -> Result<()> {
        let values: Vec<Value> = index.iter().map(|&i| source[i].clone()).collect();
        let n = values.len();
        let prefix = matches!(self.reduce, WindowReduce::Sum | WindowReduce::Mean).then(|| Prefix::new(&values));
        let undefined: Vec<usize> = {
            let mut acc = Vec::with_capacity(n + 1);
            let mut count = 0;
            acc.push(count);
            for v in &values {
                count += usize::from(!v.is_defined());
                acc.push(count);
            }
            acc
        };

        for (p, &row) in index.iter().enumerate() {
            // window [p - shift, p - shift + k) in series positions
            let start = p as isize - self.shift as isize;
            let end = start + self.k as isize;
            target[row] = if self.strict {
                if start < 0 || end > n as isize {
                    Value::Null
                } else {
                    let (lo, hi) = (start as usize, end as usize);
                    if undefined[hi] - undefined[lo] > 0 {
                        Value::Null
                    } else {
                        self.reduce_range(&values, prefix.as_ref(), lo, hi)
                    }
                }
            } else {
                let lo = start.max(0) as usize;
                let hi = (end.min(n as isize)) as usize;
                self.reduce_range(&values, prefix.as_ref(), lo, hi)
            };
        }
        Ok(())
    }
}

/// A window map for use with [`map`](crate::map::map).
pub fn window(options: WindowOptions) -> Result<Map> {
    if options.k == 0 {
        bail!(PipelineError::invalid("k", options.k));
    }
    Ok(Map::custom(Window {
        k: options.k,
        shift: options.anchor.offset(options.k),
        reduce: options.reduce,
        strict: options.strict,
    }))
}

/// Window the `x` channels.
pub fn window_x(window_options: WindowOptions, options: MarkOptions) -> Result<MarkOptions> {
    map_x(window(window_options)?, options)
}

/// Window the `y` channels.
pub fn window_y(window_options: WindowOptions, options: MarkOptions) -> Result<MarkOptions> {
    map_y(window(window_options)?, options)
}
