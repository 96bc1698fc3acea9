use anyhow::{bail, Result};
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::column::{is_temporal, numbers, valueof, Columns, ValueSpec};
use crate::data::Data;
use crate::error::PipelineError;
use crate::parser;
use crate::stats;
use crate::value::{ascending_defined, Value};

/// Where a scoped reducer computes its context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// Once, over the whole dataset.
    Data,
    /// Again for every facet.
    Facet,
}

/// The keys of the group or bin being reduced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Extent {
    pub x: Option<Value>,
    pub y: Option<Value>,
    pub x1: Option<Value>,
    pub x2: Option<Value>,
    pub y1: Option<Value>,
    pub y2: Option<Value>,
    pub z: Option<Value>,
}

/// A user reducer working on row indices rather than gathered values.
pub trait ReduceIndex: Send + Sync {
    /// Reduce the rows `index` of `values`. `context` is the result of this
    /// reducer over its scope, when it has one.
    fn reduce_index(
        &self,
        index: &[usize],
        values: &[Value],
        context: Option<&Value>,
        extent: &Extent,
    ) -> Value;

    fn scope(&self) -> Option<Scope> {
        None
    }

    fn label(&self) -> Option<String> {
        None
    }
}

pub type ReduceFn = dyn Fn(&[Value], &Extent) -> Value + Send + Sync;

/// Every supported aggregation, resolved once from its name or function.
#[derive(Clone, Deserialize)]
#[serde(try_from = "String")]
pub enum Reduce {
    First,
    Last,
    /// All values of the group, as an array.
    Identity,
    Count,
    Distinct,
    Sum,
    Proportion(Scope),
    Deviation,
    Min,
    MinIndex,
    Max,
    MaxIndex,
    Mean,
    Median,
    Variance,
    Mode,
    Quantile(f64),
    X,
    X1,
    X2,
    Y,
    Y1,
    Y2,
    Z,
    Function(Arc<ReduceFn>),
    Custom(Arc<dyn ReduceIndex>),
}

impl FromStr for Reduce {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let reduce = match s.to_ascii_lowercase().as_str() {
            "first" => Reduce::First,
            "last" => Reduce::Last,
            "identity" => Reduce::Identity,
            "count" => Reduce::Count,
            "distinct" => Reduce::Distinct,
            "sum" => Reduce::Sum,
            "proportion" => Reduce::Proportion(Scope::Data),
            "proportion-facet" => Reduce::Proportion(Scope::Facet),
            "deviation" => Reduce::Deviation,
            "min" => Reduce::Min,
            "min-index" => Reduce::MinIndex,
            "max" => Reduce::Max,
            "max-index" => Reduce::MaxIndex,
            "mean" => Reduce::Mean,
            "median" => Reduce::Median,
            "variance" => Reduce::Variance,
            "mode" => Reduce::Mode,
            "x" => Reduce::X,
            "x1" => Reduce::X1,
            "x2" => Reduce::X2,
            "y" => Reduce::Y,
            "y1" => Reduce::Y1,
            "y2" => Reduce::Y2,
            "z" => Reduce::Z,
            name => match parser::percentile(name) {
                Some(p) => Reduce::Quantile(p),
                None => bail!(PipelineError::invalid("reduce", s)),
            },
        };
        Ok(reduce)
    }
}

impl TryFrom<String> for Reduce {
    type Error = anyhow::Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl fmt::Debug for Reduce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reduce::Proportion(scope) => f.debug_tuple("Proportion").field(scope).finish(),
            Reduce::Quantile(p) => f.debug_tuple("Quantile").field(p).finish(),
            Reduce::Function(_) => f.write_str("Function(..)"),
            Reduce::Custom(_) => f.write_str("Custom(..)"),
            other => f.write_str(other.name()),
        }
    }
}

fn gather(index: &[usize], values: &[Value]) -> Vec<Value> {
    index.iter().map(|&i| values[i].clone()).collect()
}

fn gather_numbers(index: &[usize], values: &[Value]) -> Vec<f64> {
    index.iter().map(|&i| values[i].to_number()).collect()
}

fn number(v: Option<f64>) -> Value {
    v.map(Value::Number).unwrap_or(Value::Null)
}

/// A numeric summary that stays temporal for temporal inputs.
fn summary(index: &[usize], values: &[Value], f: impl Fn(&[f64]) -> Option<f64>) -> Value {
    let gathered = gather(index, values);
    let result = f(&numbers(&gathered));
    match result {
        Some(ms) if is_temporal(&gathered) => Value::from_millis(ms),
        other => number(other),
    }
}

fn basis(context: Option<&Value>) -> f64 {
    context.map(Value::to_number).unwrap_or(1.0)
}

fn midpoint(a: &Option<Value>, b: &Option<Value>) -> Option<Value> {
    let (a, b) = (a.as_ref()?, b.as_ref()?);
    let mid = (a.to_number() + b.to_number()) / 2.0;
    Some(if a.is_date() {
        Value::from_millis(mid)
    } else {
        Value::Number(mid)
    })
}

impl Reduce {
    pub fn name(&self) -> &'static str {
        match self {
            Reduce::First => "first",
            Reduce::Last => "last",
            Reduce::Identity => "identity",
            Reduce::Count => "count",
            Reduce::Distinct => "distinct",
            Reduce::Sum => "sum",
            Reduce::Proportion(Scope::Data) => "proportion",
            Reduce::Proportion(Scope::Facet) => "proportion-facet",
            Reduce::Deviation => "deviation",
            Reduce::Min => "min",
            Reduce::MinIndex => "min-index",
            Reduce::Max => "max",
            Reduce::MaxIndex => "max-index",
            Reduce::Mean => "mean",
            Reduce::Median => "median",
            Reduce::Variance => "variance",
            Reduce::Mode => "mode",
            Reduce::Quantile(_) => "quantile",
            Reduce::X => "x",
            Reduce::X1 => "x1",
            Reduce::X2 => "x2",
            Reduce::Y => "y",
            Reduce::Y1 => "y1",
            Reduce::Y2 => "y2",
            Reduce::Z => "z",
            Reduce::Function(_) => "function",
            Reduce::Custom(_) => "custom",
        }
    }

    pub fn function<F>(f: F) -> Self
    where
        F: Fn(&[Value], &Extent) -> Value + Send + Sync + 'static,
    {
        Reduce::Function(Arc::new(f))
    }

    pub fn custom(reducer: impl ReduceIndex + 'static) -> Self {
        Reduce::Custom(Arc::new(reducer))
    }

    pub fn scope(&self) -> Option<Scope> {
        match self {
            Reduce::Proportion(scope) => Some(*scope),
            Reduce::Custom(r) => r.scope(),
            _ => None,
        }
    }

    pub fn label(&self) -> Option<String> {
        match self {
            Reduce::Count => Some("Frequency".to_string()),
            Reduce::Custom(r) => r.label(),
            _ => None,
        }
    }

    pub fn reduce_index(
        &self,
        index: &[usize],
        values: &[Value],
        context: Option<&Value>,
        extent: &Extent,
    ) -> Value {
        match self {
            Reduce::First => index.first().map(|&i| values[i].clone()).unwrap_or_default(),
            Reduce::Last => index.last().map(|&i| values[i].clone()).unwrap_or_default(),
            Reduce::Identity => Value::Array(gather(index, values)),
            Reduce::Count => Value::from(index.len()),
            Reduce::Distinct => Value::from(stats::distinct(&gather(index, values))),
            Reduce::Sum => Value::Number(stats::sum(&gather_numbers(index, values))),
            Reduce::Proportion(_) => {
                Value::Number(stats::sum(&gather_numbers(index, values)) / basis(context))
            }
            Reduce::Deviation => number(stats::deviation(&gather_numbers(index, values))),
            Reduce::Variance => number(stats::variance(&gather_numbers(index, values))),
            Reduce::Min => extreme(index, values, std::cmp::Ordering::Less),
            Reduce::Max => extreme(index, values, std::cmp::Ordering::Greater),
            Reduce::MinIndex => stats::min_index(&gather_numbers(index, values))
                .map(|p| Value::from(index[p]))
                .unwrap_or_default(),
            Reduce::MaxIndex => stats::max_index(&gather_numbers(index, values))
                .map(|p| Value::from(index[p]))
                .unwrap_or_default(),
            Reduce::Mean => summary(index, values, stats::mean),
            Reduce::Median => summary(index, values, stats::median),
            Reduce::Quantile(p) => summary(index, values, |v| stats::quantile(v, *p)),
            Reduce::Mode => stats::mode(&gather(index, values)).unwrap_or_default(),
            Reduce::X => extent
                .x
                .clone()
                .or_else(|| midpoint(&extent.x1, &extent.x2))
                .unwrap_or_default(),
            Reduce::X1 => extent.x1.clone().unwrap_or_default(),
            Reduce::X2 => extent.x2.clone().unwrap_or_default(),
            Reduce::Y => extent
                .y
                .clone()
                .or_else(|| midpoint(&extent.y1, &extent.y2))
                .unwrap_or_default(),
            Reduce::Y1 => extent.y1.clone().unwrap_or_default(),
            Reduce::Y2 => extent.y2.clone().unwrap_or_default(),
            Reduce::Z => extent.z.clone().unwrap_or_default(),
            Reduce::Function(f) => f(&gather(index, values), extent),
            Reduce::Custom(r) => r.reduce_index(index, values, context, extent),
        }
    }
}

/// Least (or greatest) defined value in natural order; the first one wins.
fn extreme(index: &[usize], values: &[Value], keep: std::cmp::Ordering) -> Value {
    let mut best: Option<&Value> = None;
    for v in index.iter().map(|&i| &values[i]).filter(|v| v.is_defined()) {
        if best.map_or(true, |b| ascending_defined(v, b) == keep) {
            best = Some(v);
        }
    }
    best.cloned().unwrap_or_default()
}

/// The three phases every aggregation goes through.
pub trait Reducer {
    /// Capture whole-dataset state.
    fn initialize(&mut self, data: &Data, columns: &Columns) -> Result<()>;
    /// Capture a scope-level aggregate, when the reducer is scoped to `scope`.
    fn scope(&mut self, scope: Scope, index: &[usize]);
    /// The aggregate of one group.
    fn reduce(&self, index: &[usize], extent: &Extent) -> Value;
}

/// A [`Reduce`] bound to its input channel.
#[derive(Debug, Clone)]
pub struct Evaluator {
    input: Option<ValueSpec>,
    reduce: Reduce,
    values: Vec<Value>,
    context: Option<Value>,
}

impl Evaluator {
    pub fn new(input: Option<ValueSpec>, reduce: Reduce) -> Self {
        // Summing nothing counts.
        let reduce = match (&input, reduce) {
            (None, Reduce::Sum) => Reduce::Count,
            (_, reduce) => reduce,
        };
        Self {
            input,
            reduce,
            values: Vec::new(),
            context: None,
        }
    }

    pub fn reducer(&self) -> &Reduce {
        &self.reduce
    }

    fn counts(&self) -> bool {
        self.input.is_none() && matches!(self.reduce, Reduce::Proportion(_))
    }

    /// The reducer's own label, else the input's.
    pub fn label(&self) -> Option<String> {
        if self.counts() {
            return Some("Frequency".to_string());
        }
        self.reduce
            .label()
            .or_else(|| self.input.as_ref().and_then(ValueSpec::label))
    }

    fn reduce_with(&self, index: &[usize], context: Option<&Value>, extent: &Extent) -> Value {
        if self.counts() {
            return Value::Number(index.len() as f64 / basis(context));
        }
        self.reduce.reduce_index(index, &self.values, context, extent)
    }
}

impl Reducer for Evaluator {
    fn initialize(&mut self, data: &Data, columns: &Columns) -> Result<()> {
        self.values = match &self.input {
            Some(input) => valueof(data, input, columns)?,
            None => data.to_vec(),
        };
        self.context = None;
        if self.reduce.scope() == Some(Scope::Data) {
            self.context = Some(self.reduce_with(&data.range(), None, &Extent::default()));
        }
        Ok(())
    }

    fn scope(&mut self, scope: Scope, index: &[usize]) {
        if self.reduce.scope() == Some(scope) {
            self.context = Some(self.reduce_with(index, None, &Extent::default()));
        }
    }

    fn reduce(&self, index: &[usize], extent: &Extent) -> Value {
        self.reduce_with(index, self.context.as_ref(), extent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use rstest::rstest;

    fn values(v: &[f64]) -> Vec<Value> {
        v.iter().copied().map(Value::from).collect()
    }

    fn run(reduce: &str, v: &[f64]) -> Value {
        let reduce: Reduce = reduce.parse().unwrap();
        let index: Vec<usize> = (0..v.len()).collect();
        reduce.reduce_index(&index, &values(v), None, &Extent::default())
    }

    #[rstest]
    #[case("count", 4.0)]
    #[case("sum", 10.0)]
    #[case("mean", 2.5)]
    #[case("median", 2.5)]
    #[case("min", 1.0)]
    #[case("max", 4.0)]
    #[case("first", 4.0)]
    #[case("last", 3.0)]
    #[case("p25", 1.75)]
    #[case("distinct", 4.0)]
    #[case("max-index", 0.0)]
    #[case("min-index", 1.0)]
    fn test_named_reducers(#[case] name: &str, #[case] expected: f64) {
        assert_eq!(run(name, &[4.0, 1.0, 2.0, 3.0]), Value::from(expected));
    }

    #[test]
    fn test_unknown_reducer() {
        let err = "average".parse::<Reduce>().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::Invalid { kind: "reduce", .. })
        ));
    }

    #[test]
    fn test_undefined_values_are_skipped() {
        assert_eq!(run("mean", &[1.0, f64::NAN, 3.0]), Value::from(2.0));
        assert_eq!(run("min", &[f64::NAN, 3.0, 2.0]), Value::from(2.0));
        assert_eq!(run("mean", &[f64::NAN]), Value::Null);
        assert_eq!(run("deviation", &[1.0]), Value::Null);
    }

    #[test]
    fn test_temporal_mean_stays_temporal() {
        let a = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let b = Utc.with_ymd_and_hms(2024, 1, 3, 0, 0, 0).unwrap();
        let v = vec![Value::from(a), Value::from(b)];
        let mean = Reduce::Mean.reduce_index(&[0, 1], &v, None, &Extent::default());
        assert_eq!(mean, Value::from(Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap()));
    }

    #[test]
    fn test_sum_without_input_counts() {
        let data: Data = values(&[5.0, 6.0, 7.0]).into();
        let mut e = Evaluator::new(None, Reduce::Sum);
        e.initialize(&data, &Columns::new()).unwrap();
        assert_eq!(e.reduce(&[0, 2], &Extent::default()), Value::from(2));
        assert_eq!(e.label().as_deref(), Some("Frequency"));
    }

    #[test]
    fn test_proportion_scopes() {
        let data: Data = values(&[1.0, 1.0, 2.0, 4.0]).into();
        let columns = Columns::new();

        let mut whole = Evaluator::new(None, "proportion".parse().unwrap());
        whole.initialize(&data, &columns).unwrap();
        whole.scope(Scope::Facet, &[0, 1]);
        assert_eq!(whole.reduce(&[0], &Extent::default()), Value::from(0.25));

        let mut facet = Evaluator::new(Some(ValueSpec::Identity), "proportion-facet".parse().unwrap());
        facet.initialize(&data, &columns).unwrap();
        facet.scope(Scope::Facet, &[2, 3]);
        assert_eq!(facet.reduce(&[2], &Extent::default()), Value::from(2.0 / 6.0));
    }

    #[test]
    fn test_extent_reducers() {
        let extent = Extent {
            x1: Some(Value::from(0)),
            x2: Some(Value::from(10)),
            z: Some(Value::from("a")),
            ..Default::default()
        };
        let r = |name: &str| name.parse::<Reduce>().unwrap().reduce_index(&[], &[], None, &extent);
        assert_eq!(r("x"), Value::from(5.0));
        assert_eq!(r("x2"), Value::from(10));
        assert_eq!(r("z"), Value::from("a"));
        assert_eq!(r("y"), Value::Null);
    }

    struct Spread;

    impl ReduceIndex for Spread {
        fn reduce_index(&self, index: &[usize], values: &[Value], _: Option<&Value>, _: &Extent) -> Value {
            let v: Vec<f64> = index.iter().map(|&i| values[i].to_number()).collect();
            stats::extent(&v).map(|(a, b)| Value::from(b - a)).unwrap_or_default()
        }

        fn label(&self) -> Option<String> {
            Some("Spread".into())
        }
    }

    #[test]
    fn test_custom_and_function_reducers() {
        let v = values(&[3.0, 9.0, 4.0]);
        let spread = Reduce::custom(Spread);
        assert_eq!(spread.reduce_index(&[0, 1, 2], &v, None, &Extent::default()), Value::from(6.0));
        assert_eq!(spread.label().as_deref(), Some("Spread"));

        let len = Reduce::function(|values, _| Value::from(values.len()));
        assert_eq!(len.reduce_index(&[0, 2], &v, None, &Extent::default()), Value::from(2));
    }
}
