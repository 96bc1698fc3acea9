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

pub type BasisFn = dyn Fn(&[Value]) -> f64 + Send + Sync;

/// What each series is divided by.
#[derive(Clone, Default, Deserialize)]
#[serde(try_from = "String")]
pub enum Basis {
    /// The first defined value.
    #[default]
    First,
    /// The last defined value.
    Last,
    Min,
    Max,
    Mean,
    Median,
    Sum,
    Percentile(f64),
    /// Rescale to [0, 1] over the series extent.
    Extent,
    /// Standard score; zero when the deviation is zero.
    Deviation,
    Function(Arc<BasisFn>),
}

impl Basis {
    pub fn function<F>(f: F) -> Self
    where
        F: Fn(&[Value]) -> f64 + Send + Sync + 'static,
    {
        Basis::Function(Arc::new(f))
    }
}

impl FromStr for Basis {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        if let Some(p) = parser::percentile(s) {
            return Ok(Basis::Percentile(p));
        }
        Ok(match s.to_ascii_lowercase().as_str() {
            "first" => Basis::First,
            "last" => Basis::Last,
            "min" => Basis::Min,
            "max" => Basis::Max,
            "mean" => Basis::Mean,
            "median" => Basis::Median,
            "sum" => Basis::Sum,
            "extent" => Basis::Extent,
            "deviation" => Basis::Deviation,
            _ => bail!(PipelineError::invalid("basis", s)),
        })
    }
}

impl TryFrom<String> for Basis {
    type Error = anyhow::Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl fmt::Debug for Basis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Basis::First => f.write_str("First"),
            Basis::Last => f.write_str("Last"),
            Basis::Min => f.write_str("Min"),
            Basis::Max => f.write_str("Max"),
            Basis::Mean => f.write_str("Mean"),
            Basis::Median => f.write_str("Median"),
            Basis::Sum => f.write_str("Sum"),
            Basis::Percentile(p) => f.debug_tuple("Percentile").field(p).finish(),
            Basis::Extent => f.write_str("Extent"),
            Basis::Deviation => f.write_str("Deviation"),
            Basis::Function(_) => f.write_str("Function(..)"),
        }
    }
}

/// Normalizes each series against its basis.
#[derive(Debug, Clone)]
struct Normalize(Basis);

impl Normalize {
    /// The divisor for one series.
    fn basis(&self, series: &[Value], numbers: &[f64]) -> f64 {
        let nan = f64::NAN;
        match &self.0 {
            Basis::First => series.iter().find(|v| v.is_defined()).map_or(nan, Value::to_number),
            Basis::Last => series.iter().rev().find(|v| v.is_defined()).map_or(nan, Value::to_number),
            Basis::Min => stats::min(numbers).unwrap_or(nan),
            Basis::Max => stats::max(numbers).unwrap_or(nan),
            Basis::Mean => stats::mean(numbers).unwrap_or(nan),
            Basis::Median => stats::median(numbers).unwrap_or(nan),
            Basis::Sum => stats::sum(numbers),
            Basis::Percentile(p) => stats::quantile(numbers, *p).unwrap_or(nan),
            Basis::Function(f) => f(series),
            Basis::Extent | Basis::Deviation => 1.0,
        }
    }
}

impl MapIndex for Normalize {
    fn map_index(&self, index: &[usize], source: &[Value], target: &mut [Value]) -> Result<()> {
        let series: Vec<Value> = index.iter().map(|&i| source[i].clone()).collect();
        let numbers: Vec<f64> = series.iter().map(Value::to_number).collect();
        let scale: Box<dyn Fn(f64) -> f64> = match &self.0 {
            Basis::Extent => match stats::extent(&numbers) {
                Some((lo, hi)) => Box::new(move |v| (v - lo) / (hi - lo)),
                None => Box::new(|_| f64::NAN),
            },
            Basis::Deviation => {
                let mean = stats::mean(&numbers).unwrap_or(f64::NAN);
                match stats::deviation(&numbers) {
                    Some(d) if d != 0.0 => Box::new(move |v| (v - mean) / d),
                    _ => Box::new(|_| 0.0),
                }
            }
            _ => {
                let b = self.basis(&series, &numbers);
                Box::new(move |v| v / b)
            }
        };
        for (k, &i) in index.iter().enumerate() {
            target[i] = Value::Number(if series[k].is_null() {
                f64::NAN
            } else {
                scale(numbers[k])
            });
        }
        Ok(())
    }
}

/// A normalizing map for use with [`map`](crate::map::map).
pub fn normalize(basis: Basis) -> Map {
    Map::custom(Normalize(basis))
}

/// Normalize the `x` channels per series.
pub fn normalize_x(basis: Basis, options: MarkOptions) -> Result<MarkOptions> {
    map_x(normalize(basis), options)
}

/// Normalize the `y` channels per series.
pub fn normalize_y(basis: Basis, options: MarkOptions) -> Result<MarkOptions> {
    map_y(normalize(basis), options)
}
