use anyhow::{bail, Result};
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::trace;

use crate::basic::{basic, Transform};
use crate::column::{valueof, Column, ValueSpec};
use crate::error::PipelineError;
use crate::facet::{exclusive, Frame};
use crate::group::group_index;
use crate::options::MarkOptions;
use crate::stats;
use crate::value::Value;

/// A per-series channel mapping.
///
/// `index` holds the rows of one series in facet order; implementations read
/// `source` and write `target` at those same rows, leaving every other row
/// alone, so several channels can be mapped in one pass.
pub trait MapIndex: Send + Sync {
    fn map_index(&self, index: &[usize], source: &[Value], target: &mut [Value]) -> Result<()>;
}

pub type MapFn = dyn Fn(&[Value]) -> Vec<Value> + Send + Sync;

#[derive(Clone, Deserialize)]
#[serde(try_from = "String")]
pub enum Map {
    /// Running total; non-numeric values add nothing.
    Cumsum,
    /// Zero-based rank, ties sharing the lowest rank.
    Rank,
    /// Rank scaled to [0, 1].
    Quantile,
    /// Maps the series values to as many new values.
    Function(Arc<MapFn>),
    Custom(Arc<dyn MapIndex>),
}

impl Map {
    pub fn function<F>(f: F) -> Self
    where
        F: Fn(&[Value]) -> Vec<Value> + Send + Sync + 'static,
    {
        Map::Function(Arc::new(f))
    }

    pub fn custom(map: impl MapIndex + 'static) -> Self {
        Map::Custom(Arc::new(map))
    }
}

impl FromStr for Map {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "cumsum" => Ok(Map::Cumsum),
            "rank" => Ok(Map::Rank),
            "quantile" => Ok(Map::Quantile),
            _ => bail!(PipelineError::invalid("map", s)),
        }
    }
}

impl TryFrom<String> for Map {
    type Error = anyhow::Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl fmt::Debug for Map {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Map::Cumsum => f.write_str("Cumsum"),
            Map::Rank => f.write_str("Rank"),
            Map::Quantile => f.write_str("Quantile"),
            Map::Function(_) => f.write_str("Function(..)"),
            Map::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

fn take(index: &[usize], source: &[Value]) -> Vec<Value> {
    index.iter().map(|&i| source[i].clone()).collect()
}

/// Scatter `mapped` back onto the rows of `index`.
fn scatter(index: &[usize], mapped: Vec<Value>, target: &mut [Value]) -> Result<()> {
    if mapped.len() != index.len() {
        bail!(PipelineError::MismatchedLength("map"));
    }
    for (&i, value) in index.iter().zip(mapped) {
        target[i] = value;
    }
    Ok(())
}

impl MapIndex for Map {
    fn map_index(&self, index: &[usize], source: &[Value], target: &mut [Value]) -> Result<()> {
        match self {
            Map::Cumsum => {
                let mut sum = 0.0;
                for &i in index {
                    sum += source[i].as_f64().unwrap_or(0.0);
                    target[i] = Value::Number(sum);
                }
                Ok(())
            }
            Map::Rank => {
                let ranks = stats::rank(&take(index, source));
                scatter(index, ranks.into_iter().map(Value::Number).collect(), target)
            }
            Map::Quantile => {
                let values = take(index, source);
                let n = values.iter().filter(|v| v.is_defined()).count() as f64 - 1.0;
                let ranks = stats::rank(&values);
                scatter(index, ranks.into_iter().map(|r| Value::Number(r / n)).collect(), target)
            }
            Map::Function(f) => scatter(index, f(&take(index, source)), target),
            Map::Custom(map) => map.map_index(index, source, target),
        }
    }
}

struct MappedChannel {
    name: String,
    input: ValueSpec,
    column: Column,
    map: Map,
}

/// Map each named channel per series, replacing it with the mapped column.
pub fn map<K: Into<String>>(
    outputs: impl IntoIterator<Item = (K, Map)>,
    mut options: MarkOptions,
) -> Result<MarkOptions> {
    let z = options.z();
    let mut channels = Vec::new();
    for (name, map) in outputs {
        let name = name.into();
        let Some(input) = options.input(&name) else {
            bail!(PipelineError::MissingChannel(name));
        };
        let column = options.column(input.label());
        channels.push(MappedChannel {
            name,
            input,
            column,
            map,
        });
    }
    let replaced: Vec<(String, Column)> = channels
        .iter()
        .map(|c| (c.name.clone(), c.column.clone()))
        .collect();

    let transform = Transform::new(move |frame, columns| {
        let Frame { data, facets } = exclusive(frame);
        let zs = z.as_ref().map(|z| valueof(&data, z, columns)).transpose()?;
        let sources = channels
            .iter()
            .map(|c| valueof(&data, &c.input, columns))
            .collect::<Result<Vec<_>>>()?;
        let mut targets = vec![vec![Value::Null; data.len()]; channels.len()];

        let mut series = 0;
        for facet in &facets {
            for (_, index) in group_index(facet, zs.as_deref()) {
                series += 1;
                for (k, channel) in channels.iter().enumerate() {
                    channel.map.map_index(&index, &sources[k], &mut targets[k])?;
                }
            }
        }
        trace!(series, channels = channels.len(), "mapped");

        for (channel, target) in channels.iter().zip(targets) {
            columns.populate(&channel.column, target);
        }
        Ok(Frame::new(data, facets))
    });

    let mut options = basic(options, Some(transform))?;
    for (name, column) in replaced {
        options.set(name, column);
    }
    Ok(options)
}

fn map_present(keys: [&str; 3], mapper: Map, options: MarkOptions) -> Result<MarkOptions> {
    let present: Vec<(&str, Map)> = keys
        .iter()
        .filter(|key| options.has(key))
        .map(|&key| (key, mapper.clone()))
        .collect();
    if present.is_empty() {
        bail!(PipelineError::MissingChannel(keys[0].into()));
    }
    map(present, options)
}

/// Map whichever of `x`, `x1` and `x2` are present.
pub fn map_x(mapper: Map, options: MarkOptions) -> Result<MarkOptions> {
    map_present(["x", "x1", "x2"], mapper, options)
}

/// Map whichever of `y`, `y1` and `y2` are present.
pub fn map_y(mapper: Map, options: MarkOptions) -> Result<MarkOptions> {
    map_present(["y", "y1", "y2"], mapper, options)
}
