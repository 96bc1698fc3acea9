use anyhow::{bail, Result};
use serde::Deserialize;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;

use crate::basic::{basic, ComparatorFn, SortOrder, Transform};
use crate::channel::Channel;
use crate::column::{numbers, valueof, Column, Columns, ValueSpec};
use crate::data::Data;
use crate::error::PipelineError;
use crate::facet::{exclusive, Frame};
use crate::group::group_index;
use crate::options::MarkOptions;
use crate::parser;
use crate::stats;
use crate::value::{ascending_defined, Value};

/// Stacks of one facet, each a list of row indices in stacking order.
pub type FacetStacks = Vec<Vec<usize>>;

pub type OffsetFn = dyn Fn(&[FacetStacks], &mut [f64], &mut [f64], Option<&[Value]>) + Send + Sync;

/// Repositions stacked extents after accumulation.
#[derive(Clone, Deserialize)]
#[serde(try_from = "String")]
pub enum StackOffset {
    /// Rescale every stack to [0, 1].
    Expand,
    /// Center every stack on zero.
    Center,
    /// Minimize weighted change between adjacent stacks (streamgraph).
    Wiggle,
    Function(Arc<OffsetFn>),
}

impl StackOffset {
    pub fn function<F>(f: F) -> Self
    where
        F: Fn(&[FacetStacks], &mut [f64], &mut [f64], Option<&[Value]>) + Send + Sync + 'static,
    {
        StackOffset::Function(Arc::new(f))
    }

    fn apply(&self, stacks: &[FacetStacks], y1: &mut [f64], y2: &mut [f64], z: Option<&[Value]>) {
        match self {
            StackOffset::Expand => offset_expand(stacks, y1, y2),
            StackOffset::Center => offset_center(stacks, y1, y2),
            StackOffset::Wiggle => offset_wiggle(stacks, y1, y2, z),
            StackOffset::Function(f) => f(stacks, y1, y2, z),
        }
    }
}

impl FromStr for StackOffset {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "expand" | "normalize" => Ok(StackOffset::Expand),
            "center" | "silhouette" => Ok(StackOffset::Center),
            "wiggle" => Ok(StackOffset::Wiggle),
            _ => bail!(PipelineError::invalid("offset", s)),
        }
    }
}

impl TryFrom<String> for StackOffset {
    type Error = anyhow::Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl fmt::Debug for StackOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StackOffset::Expand => f.write_str("Expand"),
            StackOffset::Center => f.write_str("Center"),
            StackOffset::Wiggle => f.write_str("Wiggle"),
            StackOffset::Function(_) => f.write_str("Function(..)"),
        }
    }
}

/// The order of rows within each stack, applied before accumulation.
#[derive(Debug, Clone, Deserialize)]
#[serde(try_from = "OrderRepr")]
pub enum StackOrder {
    /// By the stacked value.
    Value(SortOrder),
    /// By series.
    Z(SortOrder),
    /// Series by their total.
    Sum(SortOrder),
    /// Series by where their maximum occurs.
    Appearance(SortOrder),
    /// Series by appearance, alternating outward from the middle.
    InsideOut(SortOrder),
    /// By a field or accessor, ascending with undefined last.
    By(ValueSpec, SortOrder),
    /// By comparing data rows directly.
    Comparator(ComparatorFn),
    /// Series in the given order.
    Domain(Vec<Value>),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OrderRepr {
    Name(String),
    Domain(Vec<Value>),
}

impl TryFrom<OrderRepr> for StackOrder {
    type Error = anyhow::Error;

    fn try_from(repr: OrderRepr) -> Result<Self> {
        match repr {
            OrderRepr::Name(name) => name.parse(),
            OrderRepr::Domain(domain) => Ok(StackOrder::Domain(domain)),
        }
    }
}

impl FromStr for StackOrder {
    type Err = anyhow::Error;

    /// Named orders accept a `-` prefix for descending; any other name is a
    /// field.
    fn from_str(s: &str) -> Result<Self> {
        let (descending, name) = parser::negated(s);
        if name.is_empty() {
            bail!(PipelineError::invalid("order", s));
        }
        let order = if descending {
            SortOrder::Descending
        } else {
            SortOrder::Ascending
        };
        Ok(match name.to_ascii_lowercase().as_str() {
            "value" => StackOrder::Value(order),
            "z" => StackOrder::Z(order),
            "sum" => StackOrder::Sum(order),
            "appearance" => StackOrder::Appearance(order),
            "inside-out" => StackOrder::InsideOut(order),
            _ => StackOrder::By(ValueSpec::field(name), order),
        })
    }
}

type RowOrder = Box<dyn Fn(usize, usize) -> Ordering>;

impl StackOrder {
    pub fn comparator<F>(f: F) -> Self
    where
        F: Fn(&Value, &Value) -> Ordering + Send + Sync + 'static,
    {
        StackOrder::Comparator(ComparatorFn(Arc::new(f)))
    }

    /// Resolve into a row comparator. `ky` names the stacked channel, which
    /// as a field name means the stacked value.
    fn resolve(
        &self,
        ky: &str,
        data: &Data,
        x: Option<&[Value]>,
        y: &[f64],
        z: Option<&[Value]>,
        columns: &Columns,
    ) -> Result<RowOrder> {
        let values = || -> Vec<Value> { y.iter().map(|&v| Value::Number(v)).collect() };
        let series = || z.ok_or_else(|| PipelineError::MissingChannel("z".into()));
        Ok(match self {
            StackOrder::Value(order) => by_values(values(), order.clone()),
            StackOrder::By(ValueSpec::Field(name), order) if name == ky => {
                by_values(values(), order.clone())
            }
            StackOrder::Z(order) => by_values(series()?.to_vec(), order.clone()),
            StackOrder::Sum(order) => {
                let z = series()?;
                let domain = group_sort(data.len(), z, |index| {
                    Value::Number(stats::sum(&index.iter().map(|&i| y[i]).collect::<Vec<_>>()))
                });
                by_domain(z, &domain, order.clone())
            }
            StackOrder::Appearance(order) => {
                let z = series()?;
                by_domain(z, &appearance(data.len(), x, y, z), order.clone())
            }
            StackOrder::InsideOut(order) => {
                let z = series()?;
                by_domain(z, &inside_out(data.len(), x, y, z), order.clone())
            }
            StackOrder::Domain(domain) => by_domain(series()?, domain, SortOrder::Ascending),
            StackOrder::By(spec, order) => by_values(valueof(data, spec, columns)?, order.clone()),
            StackOrder::Comparator(ComparatorFn(compare)) => {
                let compare = compare.clone();
                let data = data.clone();
                let rows: RowOrder = Box::new(move |i, j| compare(&data[i], &data[j]));
                rows
            }
        })
    }
}

fn by_values(values: Vec<Value>, order: SortOrder) -> RowOrder {
    Box::new(move |i, j| order.compare(&values[i], &values[j]))
}

/// Order rows by the position of their series in `domain`; unknown series
/// sort last.
fn by_domain(z: &[Value], domain: &[Value], order: SortOrder) -> RowOrder {
    let mut rank: HashMap<&Value, usize> = HashMap::new();
    for (i, key) in domain.iter().enumerate() {
        rank.entry(key).or_insert(i);
    }
    let ranks: Vec<Value> = z
        .iter()
        .map(|key| rank.get(key).map_or(Value::Null, |&r| Value::from(r)))
        .collect();
    by_values(ranks, order)
}

/// Series keys sorted by `reduce` over each series' rows, ties by key.
fn group_sort(n: usize, z: &[Value], reduce: impl Fn(&[usize]) -> Value) -> Vec<Value> {
    let index: Vec<usize> = (0..n).collect();
    let mut keyed: Vec<(Value, Value)> = group_index(&index, Some(z))
        .into_iter()
        .map(|(key, rows)| {
            let value = reduce(&rows);
            (key, value)
        })
        .collect();
    keyed.sort_by(|(ka, va), (kb, vb)| ascending_defined(va, vb).then_with(|| ascending_defined(ka, kb)));
    keyed.into_iter().map(|(key, _)| key).collect()
}

/// The first row holding the greatest value.
fn greatest(index: &[usize], y: &[f64]) -> Option<usize> {
    let mut best: Option<usize> = None;
    for &i in index {
        if y[i].is_nan() {
            continue;
        }
        if best.map_or(true, |b| y[i] > y[b]) {
            best = Some(i);
        }
    }
    best
}

fn appearance(n: usize, x: Option<&[Value]>, y: &[f64], z: &[Value]) -> Vec<Value> {
    group_sort(n, z, |index| match greatest(index, y) {
        Some(i) => x.map_or(Value::from(i), |x| x[i].clone()),
        None => Value::Null,
    })
}

fn inside_out(n: usize, x: Option<&[Value]>, y: &[f64], z: &[Value]) -> Vec<Value> {
    let keys = appearance(n, x, y, z);
    let index: Vec<usize> = (0..n).collect();
    let sums: HashMap<Value, f64> = group_index(&index, Some(z))
        .into_iter()
        .map(|(key, rows)| {
            let total = stats::sum(&rows.iter().map(|&i| y[i]).collect::<Vec<_>>());
            (key, total)
        })
        .collect();
    let (mut kp, mut kn) = (Vec::new(), Vec::new());
    let mut s = 0.0;
    for key in keys {
        let total = sums.get(&key).copied().unwrap_or(0.0);
        if s < 0.0 {
            s += total;
            kp.push(key);
        } else {
            s -= total;
            kn.push(key);
        }
    }
    kn.reverse();
    kn.extend(kp);
    kn
}

/// `(min, max)` of the stack tops, including zero.
fn extent(stack: &[usize], y2: &[f64]) -> (f64, f64) {
    let (mut min, mut max) = (0.0f64, 0.0f64);
    for &i in stack {
        let y = y2[i];
        if y < min {
            min = y;
        }
        if y > max {
            max = y;
        }
    }
    (min, max)
}

fn offset_expand(facets: &[FacetStacks], y1: &mut [f64], y2: &mut [f64]) {
    for stacks in facets {
        for stack in stacks {
            let (yn, yp) = extent(stack, y2);
            let span = yp - yn;
            let m = if span == 0.0 || span.is_nan() { 1.0 } else { 1.0 / span };
            for &i in stack {
                y1[i] = m * (y1[i] - yn);
                y2[i] = m * (y2[i] - yn);
            }
        }
    }
}

fn offset_center(facets: &[FacetStacks], y1: &mut [f64], y2: &mut [f64]) {
    for stacks in facets {
        for stack in stacks {
            let (yn, yp) = extent(stack, y2);
            let m = (yp + yn) / 2.0;
            for &i in stack {
                y1[i] -= m;
                y2[i] -= m;
            }
        }
        offset_zero(stacks, y1, y2);
    }
    offset_center_facets(facets, y1, y2);
}

fn offset_wiggle(facets: &[FacetStacks], y1: &mut [f64], y2: &mut [f64], z: Option<&[Value]>) {
    for stacks in facets {
        let mut prev: HashMap<Value, f64> = HashMap::new();
        let mut y = 0.0;
        for stack in stacks {
            let weights: Vec<f64> = stack.iter().map(|&i| (y2[i] - y1[i]).abs()).collect();
            let diffs: Vec<f64> = stack
                .iter()
                .enumerate()
                .map(|(j, &i)| {
                    let key = z.map_or(Value::from(j), |z| z[i].clone());
                    let value = y2[i] - y1[i];
                    let diff = prev.get(&key).map_or(0.0, |p| value - p);
                    prev.insert(key, value);
                    diff
                })
                .collect();
            let mut below = Vec::with_capacity(diffs.len());
            let mut acc = 0.0;
            for d in &diffs {
                below.push(acc);
                acc += d;
            }
            for &i in stack {
                y1[i] += y;
                y2[i] += y;
            }
            let s1 = stats::sum(&weights);
            if s1 != 0.0 {
                let moments: Vec<f64> = weights
                    .iter()
                    .enumerate()
                    .map(|(k, w)| (diffs[k] / 2.0 + below[k]) * w)
                    .collect();
                y -= stats::sum(&moments) / s1;
            }
        }
        offset_zero(stacks, y1, y2);
    }
    offset_center_facets(facets, y1, y2);
}

/// Shift a facet so its lowest extent sits at zero.
fn offset_zero(stacks: &FacetStacks, y1: &mut [f64], y2: &mut [f64]) {
    let lows: Vec<f64> = stacks.iter().flatten().map(|&i| y1[i]).collect();
    let Some(m) = stats::min(&lows) else {
        return;
    };
    for &i in stacks.iter().flatten() {
        y1[i] -= m;
        y2[i] -= m;
    }
}

/// Align facets on the lowest facet midpoint.
fn offset_center_facets(facets: &[FacetStacks], y1: &mut [f64], y2: &mut [f64]) {
    if facets.len() <= 1 {
        return;
    }
    let mids: Vec<f64> = facets
        .iter()
        .map(|stacks| {
            let lows: Vec<f64> = stacks.iter().flatten().map(|&i| y1[i]).collect();
            let highs: Vec<f64> = stacks.iter().flatten().map(|&i| y2[i]).collect();
            match (stats::min(&lows), stats::max(&highs)) {
                (Some(lo), Some(hi)) => (lo + hi) / 2.0,
                _ => f64::NAN,
            }
        })
        .collect();
    let Some(m0) = stats::min(&mids) else {
        return;
    };
    for (stacks, m) in facets.iter().zip(mids) {
        let p = m0 - m;
        for &i in stacks.iter().flatten() {
            y1[i] += p;
            y2[i] += p;
        }
    }
}

/// Options shared by every stack transform.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StackOptions {
    pub offset: Option<StackOffset>,
    pub order: Option<StackOrder>,
    /// Stack in reverse order, after ordering.
    pub reverse: bool,
}

impl StackOptions {
    pub fn with_offset(mut self, offset: StackOffset) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn with_order(mut self, order: StackOrder) -> Self {
        self.order = Some(order);
        self
    }

    pub fn with_reverse(mut self, reverse: bool) -> Self {
        self.reverse = reverse;
        self
    }
}

/// Which stacked channel replaces the value channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Output {
    Mid,
    Low,
    High,
}

/// Columns declared by a stack transform.
struct Stacked {
    key: Option<Column>,
    lo: Column,
    hi: Column,
    mid: Column,
}

fn stack(
    kx: &'static str,
    ky: &'static str,
    output: Output,
    stack_options: StackOptions,
    mut options: MarkOptions,
) -> Result<MarkOptions> {
    let (kx1, ky1, ky2) = match ky {
        "y" => ("x1", "y1", "y2"),
        _ => ("y1", "x1", "x2"),
    };
    let x = options.get(kx).or_else(|| options.get(kx1)).cloned();
    let y = match options.get(ky) {
        Some(ValueSpec::Constant(Value::Null)) => {
            bail!(PipelineError::MissingChannel(ky.into()))
        }
        Some(y) => y.clone(),
        None => ValueSpec::constant(1),
    };
    let z = options.z();
    let offset = stack_options.offset;
    let order = match (stack_options.order, &offset) {
        (None, Some(StackOffset::Wiggle)) => Some(StackOrder::InsideOut(SortOrder::Ascending)),
        (order, _) => order,
    };
    let reverse = stack_options.reverse;

    let columns = Stacked {
        key: x.as_ref().map(|x| options.column(x.label())),
        lo: options.column(y.label()),
        hi: options.column(y.label()),
        mid: options.column(y.label()),
    };
    let mut channels: Vec<(String, Channel)> = Vec::new();
    if let Some(key) = &columns.key {
        channels.push((kx.to_string(), Channel::from(key.clone())));
    }
    match output {
        Output::Mid => {
            channels.push((ky1.to_string(), Channel::from(columns.lo.clone())));
            channels.push((ky2.to_string(), Channel::from(columns.hi.clone())));
            channels.push((ky.to_string(), Channel::from(columns.mid.clone())));
        }
        Output::Low => channels.push((ky.to_string(), Channel::from(columns.lo.clone()))),
        Output::High => channels.push((ky.to_string(), Channel::from(columns.hi.clone()))),
    }

    let transform = Transform::new(move |frame, cols| {
        let Frame { data, facets } = exclusive(frame);
        let xs = x.as_ref().map(|x| valueof(&data, x, cols)).transpose()?;
        let ys = numbers(&valueof(&data, &y, cols)?);
        let zs = z.as_ref().map(|z| valueof(&data, z, cols)).transpose()?;
        let compare = order
            .as_ref()
            .map(|o| o.resolve(ky, &data, xs.as_deref(), &ys, zs.as_deref(), cols))
            .transpose()?;

        let n = data.len();
        let mut y1 = vec![0.0; n];
        let mut y2 = vec![0.0; n];
        let mut facet_stacks: Vec<FacetStacks> = Vec::with_capacity(facets.len());
        for facet in &facets {
            let mut stacks: FacetStacks = match &xs {
                Some(xs) => group_index(facet, Some(xs)).into_iter().map(|(_, s)| s).collect(),
                None => vec![facet.clone()],
            };
            for stack in &mut stacks {
                if let Some(compare) = &compare {
                    stack.sort_by(|&i, &j| compare(i, j));
                }
                if reverse {
                    stack.reverse();
                }
                let (mut yn, mut yp) = (0.0, 0.0);
                for &i in stack.iter() {
                    let v = ys[i];
                    if v < 0.0 {
                        y1[i] = yn;
                        yn += v;
                        y2[i] = yn;
                    } else if v > 0.0 {
                        y1[i] = yp;
                        yp += v;
                        y2[i] = yp;
                    } else {
                        y1[i] = yp;
                        y2[i] = yp;
                    }
                }
            }
            facet_stacks.push(stacks);
        }
        debug!(
            stacks = facet_stacks.iter().map(Vec::len).sum::<usize>(),
            offset = ?offset,
            "stacked"
        );

        if let Some(offset) = &offset {
            offset.apply(&facet_stacks, &mut y1, &mut y2, zs.as_deref());
        }

        if let (Some(key), Some(xs)) = (&columns.key, xs) {
            cols.populate(key, xs);
        }
        let mid = y1.iter().zip(&y2).map(|(a, b)| Value::Number((a + b) / 2.0)).collect();
        cols.populate(&columns.lo, y1.into_iter().map(Value::Number).collect());
        cols.populate(&columns.hi, y2.into_iter().map(Value::Number).collect());
        cols.populate(&columns.mid, mid);
        Ok(Frame::new(data, facets))
    });

    let mut options = basic(options, Some(transform))?;
    for (name, channel) in channels {
        options.set(name, channel);
    }
    Ok(options)
}

/// Stack `y` within each `x`, producing `y1`, `y2` and their midpoint `y`.
pub fn stack_y(stack_options: StackOptions, options: MarkOptions) -> Result<MarkOptions> {
    stack("x", "y", Output::Mid, stack_options, options)
}

/// Like [`stack_y`], with `y` the bottom of each extent.
pub fn stack_y1(stack_options: StackOptions, options: MarkOptions) -> Result<MarkOptions> {
    stack("x", "y", Output::Low, stack_options, options)
}

/// Like [`stack_y`], with `y` the top of each extent.
pub fn stack_y2(stack_options: StackOptions, options: MarkOptions) -> Result<MarkOptions> {
    stack("x", "y", Output::High, stack_options, options)
}

/// Stack `x` within each `y`, producing `x1`, `x2` and their midpoint `x`.
pub fn stack_x(stack_options: StackOptions, options: MarkOptions) -> Result<MarkOptions> {
    stack("y", "x", Output::Mid, stack_options, options)
}

pub fn stack_x1(stack_options: StackOptions, options: MarkOptions) -> Result<MarkOptions> {
    stack("y", "x", Output::Low, stack_options, options)
}

pub fn stack_x2(stack_options: StackOptions, options: MarkOptions) -> Result<MarkOptions> {
    stack("y", "x", Output::High, stack_options, options)
}
