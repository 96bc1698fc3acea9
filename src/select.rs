use anyhow::{bail, Result};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::trace;

use crate::basic::{basic, Transform};
use crate::column::valueof;
use crate::error::PipelineError;
use crate::facet::{Facets, Frame};
use crate::group::group_index;
use crate::options::MarkOptions;
use crate::value::{ascending_defined, Value};

pub type SelectFn = dyn Fn(&[usize], Option<&[Value]>) -> Vec<usize> + Send + Sync;

/// Picks rows out of each series.
#[derive(Clone)]
pub enum Selector {
    First,
    Last,
    /// The row with the least value of the channel.
    Min(String),
    /// The row with the greatest value of the channel.
    Max(String),
    /// Custom selection, given the series rows and the channel values.
    Function(Option<String>, Arc<SelectFn>),
}

impl Selector {
    pub fn function<F>(channel: Option<&str>, f: F) -> Self
    where
        F: Fn(&[usize], Option<&[Value]>) -> Vec<usize> + Send + Sync + 'static,
    {
        Selector::Function(channel.map(str::to_string), Arc::new(f))
    }

    fn channel(&self) -> Option<&str> {
        match self {
            Selector::First | Selector::Last => None,
            Selector::Min(name) | Selector::Max(name) => Some(name),
            Selector::Function(name, _) => name.as_deref(),
        }
    }

    fn select(&self, index: &[usize], values: Option<&[Value]>) -> Vec<usize> {
        let extreme = |greatest: bool| -> Vec<usize> {
            let Some(values) = values else {
                return Vec::new();
            };
            index
                .iter()
                .copied()
                .filter(|&i| values[i].is_defined())
                .reduce(|best, i| {
                    let order = ascending_defined(&values[i], &values[best]);
                    let better = if greatest { order.is_gt() } else { order.is_lt() };
                    if better {
                        i
                    } else {
                        best
                    }
                })
                .into_iter()
                .collect()
        };
        match self {
            Selector::First => index.first().copied().into_iter().collect(),
            Selector::Last => index.last().copied().into_iter().collect(),
            Selector::Min(_) => extreme(false),
            Selector::Max(_) => extreme(true),
            Selector::Function(_, f) => f(index, values),
        }
    }
}

impl FromStr for Selector {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "first" => Ok(Selector::First),
            "last" => Ok(Selector::Last),
            _ => bail!(PipelineError::invalid("selector", s)),
        }
    }
}

impl fmt::Debug for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Selector::First => f.write_str("First"),
            Selector::Last => f.write_str("Last"),
            Selector::Min(name) => f.debug_tuple("Min").field(name).finish(),
            Selector::Max(name) => f.debug_tuple("Max").field(name).finish(),
            Selector::Function(name, _) => f.debug_tuple("Function").field(name).finish(),
        }
    }
}

/// Keep only the selected rows of each series in each facet.
pub fn select(selector: Selector, options: MarkOptions) -> Result<MarkOptions> {
    let input = match selector.channel() {
        Some(name) => match options.get(name) {
            Some(value) => Some(value.clone()),
            None => bail!(PipelineError::MissingChannel(name.to_string())),
        },
        None => None,
    };
    let z = options.z();

    let transform = Transform::new(move |frame, columns| {
        let Frame { data, facets } = frame;
        let zs = z.as_ref().map(|z| valueof(&data, z, columns)).transpose()?;
        let values = input.as_ref().map(|v| valueof(&data, v, columns)).transpose()?;
        let selected: Facets = facets
            .iter()
            .map(|facet| {
                group_index(facet, zs.as_deref())
                    .into_iter()
                    .flat_map(|(_, index)| selector.select(&index, values.as_deref()))
                    .collect()
            })
            .collect();
        trace!(
            rows = selected.iter().map(Vec::len).sum::<usize>(),
            "selected"
        );
        Ok(Frame::new(data, selected))
    });
    basic(options, Some(transform))
}

pub fn select_first(options: MarkOptions) -> Result<MarkOptions> {
    select(Selector::First, options)
}

pub fn select_last(options: MarkOptions) -> Result<MarkOptions> {
    select(Selector::Last, options)
}

pub fn select_min_x(options: MarkOptions) -> Result<MarkOptions> {
    select(Selector::Min("x".into()), options)
}

pub fn select_min_y(options: MarkOptions) -> Result<MarkOptions> {
    select(Selector::Min("y".into()), options)
}

pub fn select_max_x(options: MarkOptions) -> Result<MarkOptions> {
    select(Selector::Max("x".into()), options)
}

pub fn select_max_y(options: MarkOptions) -> Result<MarkOptions> {
    select(Selector::Max("y".into()), options)
}
