use anyhow::{bail, Result};
use indexmap::IndexMap;
use tracing::debug;

use crate::basic::{basic, Transform};
use crate::channel::{Channel, ScaleHint};
use crate::column::{valueof, Column, Columns, ValueSpec};
use crate::data::Data;
use crate::error::PipelineError;
use crate::facet::{Facets, Frame};
use crate::options::MarkOptions;
use crate::reduce::{Evaluator, Extent, Reduce, Reducer, Scope};
use crate::value::{ascending_defined, Value};

/// One aggregated output channel.
#[derive(Debug, Clone)]
pub struct OutputSpec {
    pub reduce: Reduce,
    pub scale: Option<ScaleHint>,
}

/// The outputs of a group or bin transform plus the options that shape the
/// grouped rows themselves.
#[derive(Debug, Clone, Default)]
pub struct Outputs {
    pub outputs: IndexMap<String, OutputSpec>,
    data: Option<Reduce>,
    filter: Option<Option<Evaluator>>,
    sort: Option<Evaluator>,
    reverse: bool,
}

impl Outputs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Output channel `name` reduced with `reduce`, reading the mark's
    /// channel of the same name as input.
    pub fn with(mut self, name: impl Into<String>, reduce: Reduce) -> Self {
        self.outputs.insert(name.into(), OutputSpec { reduce, scale: None });
        self
    }

    pub fn with_scale(mut self, name: impl Into<String>, reduce: Reduce, scale: ScaleHint) -> Self {
        self.outputs.insert(
            name.into(),
            OutputSpec {
                reduce,
                scale: Some(scale),
            },
        );
        self
    }

    /// How each group's rows become the output datum; defaults to the array
    /// of member rows.
    pub fn with_data(mut self, reduce: Reduce) -> Self {
        self.data = Some(reduce);
        self
    }

    /// Keep only groups whose `reduce` result is truthy.
    pub fn with_filter(mut self, input: Option<ValueSpec>, reduce: Reduce) -> Self {
        self.filter = Some(Some(Evaluator::new(input, reduce)));
        self
    }

    /// Keep every group, including the empty bins a bin transform would
    /// otherwise drop.
    pub fn without_filter(mut self) -> Self {
        self.filter = Some(None);
        self
    }

    /// Order the groups of each facet by a reduced value.
    pub fn with_sort(mut self, input: Option<ValueSpec>, reduce: Reduce) -> Self {
        self.sort = Some(Evaluator::new(input, reduce));
        self
    }

    pub fn with_reverse(mut self, reverse: bool) -> Self {
        self.reverse = reverse;
        self
    }

    pub(crate) fn has(&self, names: &[&str]) -> bool {
        names.iter().any(|name| self.outputs.contains_key(*name))
    }
}

#[derive(Debug, Clone)]
struct OutputEvaluator {
    name: String,
    evaluator: Evaluator,
    column: Column,
    scale: Option<ScaleHint>,
    values: Vec<Value>,
}

/// Runtime state of every reducer attached to one group or bin transform.
#[derive(Debug, Clone)]
pub(crate) struct Reducers {
    outputs: Vec<OutputEvaluator>,
    data: Reduce,
    filter: Option<Evaluator>,
    sort: Option<Evaluator>,
    sorted: Vec<Value>,
    reverse: bool,
}

impl Reducers {
    pub(crate) fn new(outputs: &Outputs, options: &mut MarkOptions, default_filter: Option<Reduce>) -> Self {
        let mut evaluators = Vec::with_capacity(outputs.outputs.len());
        for (name, spec) in &outputs.outputs {
            let evaluator = Evaluator::new(options.input(name), spec.reduce.clone());
            let column = options.column(evaluator.label());
            evaluators.push(OutputEvaluator {
                name: name.clone(),
                evaluator,
                column,
                scale: spec.scale.clone(),
                values: Vec::new(),
            });
        }
        let filter = match &outputs.filter {
            Some(filter) => filter.clone(),
            None => default_filter.map(|reduce| Evaluator::new(None, reduce)),
        };
        Self {
            outputs: evaluators,
            data: outputs.data.clone().unwrap_or(Reduce::Identity),
            filter,
            sort: outputs.sort.clone(),
            sorted: Vec::new(),
            reverse: outputs.reverse,
        }
    }

    /// The channels this transform declares for its outputs.
    pub(crate) fn channels(&self) -> impl Iterator<Item = (String, Channel)> + '_ {
        self.outputs.iter().map(|o| {
            let mut channel = Channel::from(o.column.clone());
            channel.scale = o.scale.clone();
            (o.name.clone(), channel)
        })
    }

    pub(crate) fn initialize(&mut self, data: &Data, columns: &Columns) -> Result<()> {
        for o in &mut self.outputs {
            o.evaluator.initialize(data, columns)?;
            o.values.clear();
        }
        if let Some(sort) = &mut self.sort {
            sort.initialize(data, columns)?;
        }
        if let Some(filter) = &mut self.filter {
            filter.initialize(data, columns)?;
        }
        self.sorted.clear();
        Ok(())
    }

    pub(crate) fn scope(&mut self, facet: &[usize]) {
        for o in &mut self.outputs {
            o.evaluator.scope(Scope::Facet, facet);
        }
        if let Some(sort) = &mut self.sort {
            sort.scope(Scope::Facet, facet);
        }
        if let Some(filter) = &mut self.filter {
            filter.scope(Scope::Facet, facet);
        }
    }

    pub(crate) fn accepts(&self, index: &[usize], extent: &Extent) -> bool {
        self.filter
            .as_ref()
            .map_or(true, |filter| filter.reduce(index, extent).truthy())
    }

    /// The output datum of a group.
    pub(crate) fn datum(&self, data: &Data, index: &[usize], extent: &Extent) -> Value {
        self.data.reduce_index(index, data, None, extent)
    }

    pub(crate) fn reduce(&mut self, index: &[usize], extent: &Extent) {
        for o in &mut self.outputs {
            let value = o.evaluator.reduce(index, extent);
            o.values.push(value);
        }
        if let Some(sort) = &self.sort {
            self.sorted.push(sort.reduce(index, extent));
        }
    }

    /// Sort and reverse the grouped facets, then populate the output columns.
    pub(crate) fn finish(self, facets: &mut Facets, columns: &mut Columns) {
        if self.sort.is_some() {
            let sorted = &self.sorted;
            for facet in facets.iter_mut() {
                facet.sort_by(|&i, &j| ascending_defined(&sorted[i], &sorted[j]));
            }
        }
        if self.reverse {
            for facet in facets.iter_mut() {
                facet.reverse();
            }
        }
        for o in self.outputs {
            columns.populate(&o.column, o.values);
        }
    }
}

/// Group `index` by `keys`, keeping keys in order of first appearance; with
/// no keys everything is one group.
pub(crate) fn group_index(index: &[usize], keys: Option<&[Value]>) -> Vec<(Value, Vec<usize>)> {
    let Some(keys) = keys else {
        return vec![(Value::Null, index.to_vec())];
    };
    let mut groups: IndexMap<Value, Vec<usize>> = IndexMap::new();
    for &i in index {
        groups.entry(keys[i].clone()).or_default().push(i);
    }
    groups.into_iter().collect()
}

const SERIES: [&str; 3] = ["z", "fill", "stroke"];

/// The `z`, `fill` and `stroke` channels of a grouping transform and the
/// columns replacing them in its output.
#[derive(Debug, Clone)]
pub(crate) struct SeriesChannels {
    inputs: [Option<ValueSpec>; 3],
    columns: [Option<Column>; 3],
    /// Which of the three subgroups the rows; outputs are never grouped on.
    subgroup: Option<usize>,
}

impl SeriesChannels {
    pub(crate) fn new(options: &mut MarkOptions, outputs: &Outputs) -> Self {
        let inputs = SERIES.map(|name| options.get(name).filter(|v| !v.is_constant()).cloned());
        let columns = [0usize, 1, 2].map(|k| {
            inputs[k]
                .as_ref()
                .map(|spec| options.column(spec.label()))
        });
        let subgroup = (0..3usize).find(|&k| inputs[k].is_some() && !outputs.has(&[SERIES[k]]));
        Self {
            inputs,
            columns,
            subgroup,
        }
    }

    pub(crate) fn channels(&self) -> impl Iterator<Item = (String, Channel)> + '_ {
        (0..3).filter_map(|k| {
            self.columns[k]
                .clone()
                .map(|column| (SERIES[k].to_string(), Channel::from(column)))
        })
    }

    pub(crate) fn materialize(&self, data: &Data, columns: &Columns) -> Result<SeriesValues> {
        let mut values: [Option<Vec<Value>>; 3] = [None, None, None];
        for (k, input) in self.inputs.iter().enumerate() {
            if let Some(spec) = input {
                values[k] = Some(valueof(data, spec, columns)?);
            }
        }
        Ok(SeriesValues {
            values,
            subgroup: self.subgroup,
            out: [Vec::new(), Vec::new(), Vec::new()],
        })
    }

    pub(crate) fn populate(&self, series: SeriesValues, columns: &mut Columns) {
        for (column, out) in self.columns.iter().zip(series.out) {
            if let Some(column) = column {
                columns.populate(column, out);
            }
        }
    }
}

/// Materialized series channels for one run.
pub(crate) struct SeriesValues {
    values: [Option<Vec<Value>>; 3],
    subgroup: Option<usize>,
    out: [Vec<Value>; 3],
}

impl SeriesValues {
    pub(crate) fn subgroup(&self) -> Option<&[Value]> {
        self.subgroup.and_then(|k| self.values[k].as_deref())
    }

    /// Record the series values of a group keyed `key` in its subgroup.
    pub(crate) fn push(&mut self, key: &Value, index: &[usize]) {
        for k in 0..3 {
            let Some(values) = &self.values[k] else {
                continue;
            };
            let value = if self.subgroup == Some(k) {
                key.clone()
            } else {
                index.first().map(|&i| values[i].clone()).unwrap_or_default()
            };
            self.out[k].push(value);
        }
    }
}

/// Group on `x` and/or `y` within each facet and series, reducing each group
/// to one output row.
fn groupn(
    x: Option<ValueSpec>,
    y: Option<ValueSpec>,
    outputs: Outputs,
    mut options: MarkOptions,
) -> Result<MarkOptions> {
    // Never group on a channel an output reads.
    let x = x.filter(|_| !outputs.has(&["x", "x1", "x2"]));
    let y = y.filter(|_| !outputs.has(&["y", "y1", "y2"]));

    let gx = x.as_ref().map(|spec| options.column(spec.label()));
    let gy = y.as_ref().map(|spec| options.column(spec.label()));
    let series = SeriesChannels::new(&mut options, &outputs);
    let reducers = Reducers::new(&outputs, &mut options, None);

    let mut channels: Vec<(String, Channel)> = series.channels().collect();
    if !outputs.has(&["x"]) {
        if let Some(gx) = &gx {
            channels.push(("x".into(), Channel::from(gx.clone())));
        }
    }
    if !outputs.has(&["y"]) {
        if let Some(gy) = &gy {
            channels.push(("y".into(), Channel::from(gy.clone())));
        }
    }
    channels.extend(reducers.channels());

    let transform = Transform::new(move |frame, columns| {
        let Frame { data, facets } = frame;
        let xs = x.as_ref().map(|spec| valueof(&data, spec, columns)).transpose()?;
        let ys = y.as_ref().map(|spec| valueof(&data, spec, columns)).transpose()?;
        let mut series_values = series.materialize(&data, columns)?;
        let mut reducers = reducers.clone();
        reducers.initialize(&data, columns)?;

        let mut group_facets: Facets = Vec::with_capacity(facets.len());
        let mut group_data = Vec::new();
        let mut out_x = Vec::new();
        let mut out_y = Vec::new();

        for facet in &facets {
            let mut group_facet = Vec::new();
            reducers.scope(facet);
            for (f, index) in group_index(facet, series_values.subgroup()) {
                for (ky, gg) in group_index(&index, ys.as_deref()) {
                    for (kx, g) in group_index(&gg, xs.as_deref()) {
                        let extent = Extent {
                            x: xs.as_ref().map(|_| kx.clone()),
                            y: ys.as_ref().map(|_| ky.clone()),
                            z: series_values.subgroup().map(|_| f.clone()),
                            ..Default::default()
                        };
                        if !reducers.accepts(&g, &extent) {
                            continue;
                        }
                        group_facet.push(group_data.len());
                        group_data.push(reducers.datum(&data, &g, &extent));
                        if xs.is_some() {
                            out_x.push(kx.clone());
                        }
                        if ys.is_some() {
                            out_y.push(ky.clone());
                        }
                        series_values.push(&f, &g);
                        reducers.reduce(&g, &extent);
                    }
                }
            }
            group_facets.push(group_facet);
        }

        debug!(groups = group_data.len(), facets = group_facets.len(), "grouped");

        if let Some(gx) = &gx {
            columns.populate(gx, out_x);
        }
        if let Some(gy) = &gy {
            columns.populate(gy, out_y);
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

/// Group on both `x` and `y`.
pub fn group(outputs: Outputs, options: MarkOptions) -> Result<MarkOptions> {
    let Some(x) = options.get("x").cloned() else {
        bail!(PipelineError::MissingChannel("x".into()));
    };
    let Some(y) = options.get("y").cloned() else {
        bail!(PipelineError::MissingChannel("y".into()));
    };
    groupn(Some(x), Some(y), outputs, options)
}

/// Group on `x`, which defaults to the rows themselves.
pub fn group_x(outputs: Outputs, options: MarkOptions) -> Result<MarkOptions> {
    let x = options.get("x").cloned().unwrap_or(ValueSpec::Identity);
    groupn(Some(x), None, outputs, options)
}

/// Group on `y`, which defaults to the rows themselves.
pub fn group_y(outputs: Outputs, options: MarkOptions) -> Result<MarkOptions> {
    let y = options.get("y").cloned().unwrap_or(ValueSpec::Identity);
    groupn(None, Some(y), outputs, options)
}

/// Group on the series channels only.
pub fn group_z(outputs: Outputs, options: MarkOptions) -> Result<MarkOptions> {
    groupn(None, None, outputs, options)
}
