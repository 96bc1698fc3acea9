use anyhow::{bail, Result};
use serde::Deserialize;
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::trace;

use crate::channel::{ChannelMap, Scales};
use crate::column::{valueof, Columns, ValueSpec};
use crate::data::Data;
use crate::error::PipelineError;
use crate::facet::{Facets, Frame};
use crate::options::MarkOptions;
use crate::parser;
use crate::value::{ascending_defined, descending_defined, Value};

pub type TransformFn = dyn Fn(Frame, &mut Columns) -> Result<Frame> + Send + Sync;

/// A pre-scale step over `{data, facets}`; it may change the cardinality of
/// both and populates the lazy columns its output channels refer to.
#[derive(Clone)]
pub struct Transform(Arc<TransformFn>);

impl Transform {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(Frame, &mut Columns) -> Result<Frame> + Send + Sync + 'static,
    {
        Transform(Arc::new(f))
    }

    pub fn apply(&self, frame: Frame, columns: &mut Columns) -> Result<Frame> {
        (self.0)(frame, columns)
    }

    /// Run `self`, then `next` on its output.
    pub fn then(self, next: Transform) -> Transform {
        Transform::new(move |frame, columns| {
            let frame = self.apply(frame, columns)?;
            next.apply(frame, columns)
        })
    }
}

impl fmt::Debug for Transform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Transform(..)")
    }
}

/// What an initializer sees besides the frame: the scales built for the mark
/// and the lazy columns populated by its transforms.
#[derive(Debug, Clone, Copy)]
pub struct Context<'a> {
    pub scales: &'a Scales,
    pub columns: &'a Columns,
}

/// Result of an initializer. Absent `data` or `facets` mean "unchanged";
/// `channels` are added to (or replace) the mark's materialized channels.
#[derive(Debug, Clone, Default)]
pub struct InitializerOutput {
    pub data: Option<Data>,
    pub facets: Option<Facets>,
    pub channels: ChannelMap,
}

pub type InitializerFn =
    dyn Fn(&Frame, &ChannelMap, Context<'_>) -> Result<InitializerOutput> + Send + Sync;

/// A post-scale step reading materialized channels.
#[derive(Clone)]
pub struct Initializer(Arc<InitializerFn>);

impl Initializer {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&Frame, &ChannelMap, Context<'_>) -> Result<InitializerOutput> + Send + Sync + 'static,
    {
        Initializer(Arc::new(f))
    }

    pub fn apply(
        &self,
        frame: &Frame,
        channels: &ChannelMap,
        context: Context<'_>,
    ) -> Result<InitializerOutput> {
        (self.0)(frame, channels, context)
    }

    /// Run `self`, then `next`. The second initializer sees the first one's
    /// data, facets and channels; on a channel name collision its channels
    /// win.
    pub fn then(self, next: Initializer) -> Initializer {
        Initializer::new(move |frame, channels, context| {
            let first = self.apply(frame, channels, context)?;
            let middle = Frame::new(
                first.data.clone().unwrap_or_else(|| frame.data.clone()),
                first.facets.clone().unwrap_or_else(|| frame.facets.clone()),
            );

            let mut visible = channels.clone();
            visible.extend(first.channels.clone());
            let second = next.apply(&middle, &visible, context)?;

            let mut merged = first.channels;
            merged.extend(second.channels);
            Ok(InitializerOutput {
                data: Some(second.data.unwrap_or(middle.data)),
                facets: Some(second.facets.unwrap_or(middle.facets)),
                channels: merged,
            })
        })
    }
}

impl fmt::Debug for Initializer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Initializer(..)")
    }
}

pub type CompareFn = dyn Fn(&Value, &Value) -> Ordering + Send + Sync;

#[derive(Clone)]
pub enum SortOrder {
    Ascending,
    Descending,
    Custom(Arc<CompareFn>),
}

impl SortOrder {
    pub fn compare(&self, a: &Value, b: &Value) -> Ordering {
        match self {
            SortOrder::Ascending => ascending_defined(a, b),
            SortOrder::Descending => descending_defined(a, b),
            SortOrder::Custom(f) => f(a, b),
        }
    }
}

impl FromStr for SortOrder {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "ascending" => Ok(SortOrder::Ascending),
            "descending" => Ok(SortOrder::Descending),
            _ => bail!(PipelineError::invalid("order", s)),
        }
    }
}

impl fmt::Debug for SortOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SortOrder::Ascending => f.write_str("Ascending"),
            SortOrder::Descending => f.write_str("Descending"),
            SortOrder::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// How to sort each facet.
#[derive(Clone, Debug)]
pub enum SortSpec {
    /// By values materialized from the data.
    Value { value: ValueSpec, order: SortOrder },
    /// By an already materialized channel; only valid for initializers.
    Channel { name: String, order: SortOrder },
    /// By comparing data rows directly.
    Comparator(ComparatorFn),
}

#[derive(Clone)]
pub struct ComparatorFn(pub Arc<CompareFn>);

impl fmt::Debug for ComparatorFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Comparator(..)")
    }
}

impl SortSpec {
    pub fn value(value: impl Into<ValueSpec>) -> Self {
        SortSpec::Value {
            value: value.into(),
            order: SortOrder::Ascending,
        }
    }

    /// Sort by a named channel; a leading `-` sorts descending.
    pub fn channel(name: &str) -> Self {
        let (descending, name) = parser::negated(name);
        SortSpec::Channel {
            name: name.to_string(),
            order: if descending {
                SortOrder::Descending
            } else {
                SortOrder::Ascending
            },
        }
    }

    pub fn comparator<F>(f: F) -> Self
    where
        F: Fn(&Value, &Value) -> Ordering + Send + Sync + 'static,
    {
        SortSpec::Comparator(ComparatorFn(Arc::new(f)))
    }

    pub fn with_order(self, order: SortOrder) -> Self {
        match self {
            SortSpec::Value { value, .. } => SortSpec::Value { value, order },
            SortSpec::Channel { name, .. } => SortSpec::Channel { name, order },
            comparator => comparator,
        }
    }

    fn is_channel(&self) -> bool {
        matches!(self, SortSpec::Channel { .. })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ShuffleOptions {
    pub seed: Option<f64>,
}

/// The linear congruential generator behind seeded shuffles; the same seed
/// always yields the same sequence in `[0, 1)`.
#[derive(Debug, Clone)]
pub struct Lcg {
    state: i32,
}

impl Lcg {
    const MUL: i32 = 0x19660D;
    const INC: i32 = 0x3C6EF35F;
    const EPS: f64 = 1.0 / 4294967296.0;

    pub fn new(seed: f64) -> Self {
        let state = if (0.0..1.0).contains(&seed) {
            seed / Self::EPS
        } else {
            seed.abs()
        };
        Self {
            state: to_int32(state),
        }
    }

    pub fn next_f64(&mut self) -> f64 {
        self.state = self.state.wrapping_mul(Self::MUL).wrapping_add(Self::INC);
        Self::EPS * f64::from(self.state as u32)
    }
}

fn to_int32(x: f64) -> i32 {
    if !x.is_finite() {
        return 0;
    }
    x.trunc().rem_euclid(4294967296.0) as u32 as i32
}

/// The facet operations expressible by the `filter`/`sort`/`reverse`
/// shorthands and by `shuffle`, runnable either as transforms or as
/// initializers.
#[derive(Debug, Clone)]
enum FacetOp {
    Filter(ValueSpec),
    Sort(SortSpec),
    Reverse,
    Shuffle(Option<f64>),
}

impl FacetOp {
    /// New facets, or `None` to leave them unchanged.
    fn run(
        &self,
        frame: &Frame,
        channels: Option<&ChannelMap>,
        columns: &Columns,
    ) -> Result<Option<Facets>> {
        let Frame { data, facets } = frame;
        let facets: Facets = match self {
            FacetOp::Filter(spec) => {
                let keep = valueof(data, spec, columns)?;
                facets
                    .iter()
                    .map(|facet| facet.iter().copied().filter(|&i| keep[i].truthy()).collect())
                    .collect()
            }
            FacetOp::Reverse => facets
                .iter()
                .map(|facet| facet.iter().rev().copied().collect())
                .collect(),
            FacetOp::Shuffle(seed) => {
                let keys: Vec<f64> = match seed {
                    Some(seed) => {
                        let mut lcg = Lcg::new(*seed);
                        (0..data.len()).map(|_| lcg.next_f64()).collect()
                    }
                    None => (0..data.len()).map(|_| rand::random::<f64>()).collect(),
                };
                sort_facets(facets, |a, b| keys[a].total_cmp(&keys[b]))
            }
            FacetOp::Sort(SortSpec::Value { value, order }) => {
                let values = valueof(data, value, columns)?;
                sort_facets(facets, |a, b| order.compare(&values[a], &values[b]))
            }
            FacetOp::Sort(SortSpec::Comparator(ComparatorFn(compare))) => {
                sort_facets(facets, |a, b| compare(&data[a], &data[b]))
            }
            FacetOp::Sort(SortSpec::Channel { name, order }) => {
                let Some(channels) = channels else {
                    bail!(PipelineError::ChannelSortRequiresInitializer);
                };
                let Some(channel) = channels.get(name) else {
                    trace!(channel = %name, "sort channel absent; facets unchanged");
                    return Ok(None);
                };
                let values = &channel.value;
                sort_facets(facets, |a, b| order.compare(&values[a], &values[b]))
            }
        };
        Ok(Some(facets))
    }

    fn into_transform(self) -> Transform {
        Transform::new(move |frame, columns| match self.run(&frame, None, columns)? {
            Some(facets) => Ok(Frame::new(frame.data, facets)),
            None => Ok(frame),
        })
    }

    fn into_initializer(self) -> Initializer {
        Initializer::new(move |frame, channels, context| {
            Ok(InitializerOutput {
                data: None,
                facets: self.run(frame, Some(channels), context.columns)?,
                channels: ChannelMap::new(),
            })
        })
    }
}

fn sort_facets(facets: &Facets, compare: impl Fn(usize, usize) -> Ordering) -> Facets {
    facets
        .iter()
        .map(|facet| {
            let mut facet = facet.clone();
            facet.sort_by(|&a, &b| compare(a, b));
            facet
        })
        .collect()
}

fn compose(first: Option<Transform>, second: Option<Transform>) -> Option<Transform> {
    match (first, second) {
        (Some(a), Some(b)) => Some(a.then(b)),
        (a, None) => a,
        (None, b) => b,
    }
}

fn compose_initializer(
    first: Option<Initializer>,
    second: Option<Initializer>,
) -> Option<Initializer> {
    match (first, second) {
        (Some(a), Some(b)) => Some(a.then(b)),
        (a, None) => a,
        (None, b) => b,
    }
}

/// Compose `next` after the options' transform.
///
/// An explicit `transform` on the options replaces the `filter`, `sort` and
/// `reverse` shorthands outright; otherwise they run in that order before
/// `next`. The shorthands are consumed either way.
pub fn basic(mut options: MarkOptions, next: Option<Transform>) -> Result<MarkOptions> {
    if next.is_some() && options.initializer.is_some() {
        bail!(PipelineError::TransformAfterInitializer);
    }

    let filter = options.filter.take();
    let sort = options.sort.take();
    let reverse = std::mem::take(&mut options.reverse);

    let mut t1 = options.transform.take();
    if t1.is_none() {
        if let Some(value) = filter {
            t1 = compose(t1, Some(FacetOp::Filter(value).into_transform()));
        }
        if let Some(sort) = sort {
            if sort.is_channel() {
                bail!(PipelineError::ChannelSortRequiresInitializer);
            }
            t1 = compose(t1, Some(FacetOp::Sort(sort).into_transform()));
        }
        if reverse {
            t1 = compose(t1, Some(FacetOp::Reverse.into_transform()));
        }
    }

    options.transform = compose(t1, next);
    Ok(options)
}

/// The initializer twin of [`basic`]: the shorthands become initializers
/// (so `sort` may name a channel) unless an initializer is already present.
pub fn initializer(mut options: MarkOptions, next: Option<Initializer>) -> Result<MarkOptions> {
    let filter = options.filter.take();
    let sort = options.sort.take();
    let reverse = std::mem::take(&mut options.reverse);

    let mut i1 = options.initializer.take();
    if i1.is_none() {
        if let Some(value) = filter {
            i1 = compose_initializer(i1, Some(FacetOp::Filter(value).into_initializer()));
        }
        if let Some(sort) = sort {
            i1 = compose_initializer(i1, Some(FacetOp::Sort(sort).into_initializer()));
        }
        if reverse {
            i1 = compose_initializer(i1, Some(FacetOp::Reverse.into_initializer()));
        }
    }

    options.initializer = compose_initializer(i1, next);
    Ok(options)
}

fn apply(options: MarkOptions, op: FacetOp) -> Result<MarkOptions> {
    if options.initializer.is_some() {
        initializer(options, Some(op.into_initializer()))
    } else {
        basic(options, Some(op.into_transform()))
    }
}

/// Keep only the rows whose `value` is truthy.
pub fn filter(value: impl Into<ValueSpec>, options: MarkOptions) -> Result<MarkOptions> {
    apply(options, FacetOp::Filter(value.into()))
}

/// Reverse every facet. A pending `sort` shorthand is discarded.
pub fn reverse(mut options: MarkOptions) -> Result<MarkOptions> {
    options.sort = None;
    apply(options, FacetOp::Reverse)
}

/// Shuffle every facet; seeded shuffles are reproducible.
pub fn shuffle(shuffle: ShuffleOptions, mut options: MarkOptions) -> Result<MarkOptions> {
    if let Some(seed) = shuffle.seed {
        if !seed.is_finite() {
            bail!(PipelineError::invalid("seed", seed));
        }
    }
    options.sort = None;
    apply(options, FacetOp::Shuffle(shuffle.seed))
}

/// Sort every facet. Sorting by a channel runs as an initializer, once the
/// channel has been materialized.
pub fn sort(order: SortSpec, mut options: MarkOptions) -> Result<MarkOptions> {
    options.sort = None;
    if order.is_channel() {
        initializer(options, Some(FacetOp::Sort(order).into_initializer()))
    } else {
        apply(options, FacetOp::Sort(order))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::ChannelValues;

    fn frame() -> Frame {
        let data: Data = [5, 3, 8, 1].into_iter().map(Value::from).collect();
        Frame::new(data, vec![vec![0, 1], vec![2, 3]])
    }

    fn run(options: &MarkOptions) -> Frame {
        let transform = options.transform.as_ref().unwrap();
        transform.apply(frame(), &mut Columns::new()).unwrap()
    }

    #[test]
    fn test_shorthands_compose_in_order() {
        let options = MarkOptions::new()
            .with_filter(ValueSpec::accessor(|v, _| Value::from(v.to_number() > 2.0)))
            .with_sort(SortSpec::value(ValueSpec::Identity))
            .with_reverse(true);
        let options = basic(options, None).unwrap();
        assert!(options.filter.is_none() && options.sort.is_none() && !options.reverse);
        assert_eq!(run(&options).facets, vec![vec![0, 1], vec![2]]);
    }

    #[test]
    fn test_explicit_transform_overrides_shorthands() {
        let identity = Transform::new(|frame, _| Ok(frame));
        let with_filter = MarkOptions::new()
            .with_filter(ValueSpec::constant(false))
            .with_transform(identity.clone());
        let without = MarkOptions::new().with_transform(identity);
        let a = run(&basic(with_filter, None).unwrap());
        let b = run(&basic(without, None).unwrap());
        assert_eq!(a.facets, b.facets);
        assert_eq!(a.facets, frame().facets);
    }

    #[test]
    fn test_transform_after_initializer_is_an_error() {
        let init = Initializer::new(|_, _, _| Ok(InitializerOutput::default()));
        let options = MarkOptions::new().with_initializer(init);
        let err = basic(options, Some(Transform::new(|f, _| Ok(f)))).unwrap_err();
        assert_eq!(
            err.downcast_ref::<PipelineError>(),
            Some(&PipelineError::TransformAfterInitializer)
        );
    }

    #[test]
    fn test_channel_sort_shorthand_needs_initializer() {
        let options = MarkOptions::new().with_sort(SortSpec::channel("-x"));
        let err = basic(options, None).unwrap_err();
        assert_eq!(
            err.downcast_ref::<PipelineError>(),
            Some(&PipelineError::ChannelSortRequiresInitializer)
        );
    }

    #[test]
    fn test_sort_by_channel_runs_as_initializer() {
        let options = sort(SortSpec::channel("-x"), MarkOptions::new()).unwrap();
        assert!(options.transform.is_none());
        let init = options.initializer.unwrap();

        let mut channels = ChannelMap::new();
        channels.insert(
            "x".into(),
            ChannelValues::new(vec![1.into(), 3.into(), 2.into(), 4.into()]),
        );
        let scales = Scales::new();
        let columns = Columns::new();
        let context = Context {
            scales: &scales,
            columns: &columns,
        };
        let out = init.apply(&frame(), &channels, context).unwrap();
        assert_eq!(out.facets.unwrap(), vec![vec![1, 0], vec![3, 2]]);

        let out = init.apply(&frame(), &ChannelMap::new(), context).unwrap();
        assert!(out.facets.is_none());
    }

    #[test]
    fn test_initializers_merge_channels() {
        let first = Initializer::new(|_, _, _| {
            let mut channels = ChannelMap::new();
            channels.insert("a".into(), ChannelValues::new(vec![1.into()]));
            channels.insert("b".into(), ChannelValues::new(vec![1.into()]));
            Ok(InitializerOutput {
                channels,
                ..Default::default()
            })
        });
        let second = Initializer::new(|frame, channels, _| {
            assert!(channels.contains_key("a"));
            let mut out = ChannelMap::new();
            out.insert("b".into(), ChannelValues::new(vec![2.into()]));
            Ok(InitializerOutput {
                facets: Some(vec![frame.facets[0].clone()]),
                channels: out,
                ..Default::default()
            })
        });
        let scales = Scales::new();
        let columns = Columns::new();
        let context = Context {
            scales: &scales,
            columns: &columns,
        };
        let out = first
            .then(second)
            .apply(&frame(), &ChannelMap::new(), context)
            .unwrap();
        assert_eq!(out.channels["a"].value, vec![Value::from(1)]);
        assert_eq!(out.channels["b"].value, vec![Value::from(2)]);
        assert_eq!(out.facets.unwrap(), vec![vec![0, 1]]);
        assert_eq!(out.data.unwrap().len(), 4);
    }

    #[test]
    fn test_seeded_shuffle_is_deterministic() {
        let a = shuffle(ShuffleOptions { seed: Some(42.0) }, MarkOptions::new()).unwrap();
        let b = shuffle(ShuffleOptions { seed: Some(42.0) }, MarkOptions::new()).unwrap();
        let (a, b) = (run(&a), run(&b));
        assert_eq!(a.facets, b.facets);
        for (facet, original) in a.facets.iter().zip(frame().facets) {
            let mut sorted = facet.clone();
            sorted.sort();
            assert_eq!(sorted, original);
        }
    }

    #[test]
    fn test_invalid_seed() {
        let err = shuffle(ShuffleOptions { seed: Some(f64::NAN) }, MarkOptions::new()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::Invalid { kind: "seed", .. })
        ));
    }

    #[test]
    fn test_lcg_sequence() {
        let mut lcg = Lcg::new(0.5);
        assert_eq!(lcg.state, i32::MIN);
        let first = lcg.next_f64();
        assert!((0.0..1.0).contains(&first));
        let mut again = Lcg::new(0.5);
        assert_eq!(again.next_f64(), first);
    }
}
