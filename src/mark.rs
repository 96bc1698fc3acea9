use anyhow::{Context as _, Result};
use tracing::debug;

use crate::basic::{initializer, Context};
use crate::channel::{ChannelMap, ChannelValues, Scales};
use crate::column::{valueof, Columns};
use crate::data::Data;
use crate::facet::{exclusive, Facets, Frame};
use crate::options::MarkOptions;

/// A dataset bound to its channel options, ready to run.
#[derive(Debug, Clone)]
pub struct Mark {
    data: Data,
    options: MarkOptions,
}

/// The output of a mark's pipeline: `{data, facets, channels}` plus the
/// columns populated along the way.
#[derive(Debug, Clone)]
pub struct MarkState {
    pub data: Data,
    pub facets: Facets,
    pub channels: ChannelMap,
    pub columns: Columns,
}

impl Mark {
    /// Bind `options` to `data`. Pending `filter`/`sort`/`reverse` shorthands
    /// become an initializer, run after the mark's own initializer if it has
    /// one; the transform is kept as given.
    pub fn new(data: Data, mut options: MarkOptions) -> Result<Self> {
        let first = options.initializer.take();
        let mut options = initializer(options, None)?;
        options.initializer = match (first, options.initializer.take()) {
            (Some(first), Some(shorthands)) => Some(first.then(shorthands)),
            (first, shorthands) => first.or(shorthands),
        };
        Ok(Self { data, options })
    }

    pub fn data(&self) -> &Data {
        &self.data
    }

    pub fn options(&self) -> &MarkOptions {
        &self.options
    }

    /// Run the transform over `facets` (one facet of every row when absent),
    /// make the facets exclusive and materialize every channel.
    pub fn initialize(&self, facets: Option<Facets>) -> Result<MarkState> {
        let facets = facets.unwrap_or_else(|| vec![self.data.range()]);
        let mut columns = Columns::new();
        let mut frame = Frame::new(self.data.clone(), facets);
        if let Some(transform) = &self.options.transform {
            frame = transform.apply(frame, &mut columns)?;
        }
        let Frame { data, facets } = exclusive(frame);

        let mut channels = ChannelMap::with_capacity(self.options.channels.len());
        for (name, channel) in &self.options.channels {
            let value = valueof(&data, &channel.value, &columns)
                .with_context(|| format!("Failed to materialize channel '{}'", name))?;
            channels.insert(
                name.clone(),
                ChannelValues {
                    value,
                    scale: channel.scale.clone(),
                    label: channel.label(),
                },
            );
        }
        debug!(
            rows = data.len(),
            facets = facets.len(),
            channels = channels.len(),
            "initialized mark"
        );

        Ok(MarkState {
            data,
            facets,
            channels,
            columns,
        })
    }

    /// Run the initializer, if any, against the materialized channels.
    /// Channels it returns are added to (or replace) the existing ones.
    pub fn apply_initializer(&self, state: MarkState, scales: &Scales) -> Result<MarkState> {
        let Some(init) = &self.options.initializer else {
            return Ok(state);
        };
        let frame = Frame::new(state.data, state.facets);
        let context = Context {
            scales,
            columns: &state.columns,
        };
        let output = init.apply(&frame, &state.channels, context)?;

        let mut channels = state.channels;
        channels.extend(output.channels);
        Ok(MarkState {
            data: output.data.unwrap_or(frame.data),
            facets: output.facets.unwrap_or(frame.facets),
            channels,
            columns: state.columns,
        })
    }

    /// The rows of `facet` that every filtered channel accepts.
    pub fn render_index(&self, state: &MarkState, facet: &[usize]) -> Vec<usize> {
        let filters: Vec<_> = self
            .options
            .channels
            .iter()
            .filter_map(|(name, channel)| {
                let filter = channel.filter.as_ref()?;
                let values = state.channels.get(name)?;
                Some((filter, &values.value))
            })
            .collect();
        facet
            .iter()
            .copied()
            .filter(|&i| filters.iter().all(|(filter, values)| filter.accepts(&values[i])))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::basic::{sort, Initializer, InitializerOutput, SortSpec};
    use crate::channel::{Channel, ChannelFilter};
    use crate::column::ValueSpec;
    use crate::value::Value;

    fn nums(v: &[f64]) -> Vec<Value> {
        v.iter().map(|&x| Value::from(x)).collect()
    }

    #[test]
    fn test_shorthands_run_as_initializer() {
        let data: Data = nums(&[3.0, 1.0, 2.0, 0.0]).into();
        let options = MarkOptions::new()
            .channel("x", ValueSpec::Identity)
            .with_filter(ValueSpec::Identity)
            .with_sort(SortSpec::value(ValueSpec::Identity))
            .with_reverse(true);
        let mark = Mark::new(data, options).unwrap();
        assert!(mark.options().filter.is_none());
        assert!(mark.options().initializer.is_some());
        let state = mark.initialize(None).unwrap();
        assert_eq!(state.facets, vec![vec![0, 1, 2, 3]]);
        let state = mark.apply_initializer(state, &Scales::new()).unwrap();
        assert_eq!(state.facets, vec![vec![0, 2, 1]]);
        assert_eq!(state.channels["x"].value, nums(&[3.0, 1.0, 2.0, 0.0]));
    }

    #[test]
    fn test_shorthands_follow_an_explicit_transform() {
        let data: Data = nums(&[1.0, 0.0, 2.0]).into();
        let options = MarkOptions::new()
            .with_reverse(true)
            .with_transform(crate::basic::Transform::new(|frame, _| {
                Ok(Frame::new(frame.data, vec![vec![0, 1]]))
            }));
        let mark = Mark::new(data, options).unwrap();
        let state = mark.initialize(None).unwrap();
        assert_eq!(state.facets, vec![vec![0, 1]]);
        let state = mark.apply_initializer(state, &Scales::new()).unwrap();
        assert_eq!(state.facets, vec![vec![1, 0]]);
    }

    #[test]
    fn test_shorthands_join_the_initializer() {
        let data: Data = nums(&[3.0, 1.0, 2.0]).into();
        let noop = Initializer::new(|_, _, _| Ok(InitializerOutput::default()));
        let options = MarkOptions::new()
            .channel("x", ValueSpec::Identity)
            .with_initializer(noop)
            .with_sort(SortSpec::channel("-x"));
        let mark = Mark::new(data, options).unwrap();
        let state = mark.initialize(None).unwrap();
        assert_eq!(state.facets, vec![vec![0, 1, 2]]);
        let state = mark.apply_initializer(state, &Scales::new()).unwrap();
        assert_eq!(state.facets, vec![vec![0, 2, 1]]);
    }

    #[test]
    fn test_channel_sort_as_transform_or_shorthand() {
        let data: Data = nums(&[2.0, 3.0, 1.0]).into();
        let options = MarkOptions::new().channel("y", ValueSpec::Identity);
        let options = sort(SortSpec::channel("y"), options).unwrap();
        let mark = Mark::new(data, options).unwrap();
        let state = mark.initialize(None).unwrap();
        let state = mark.apply_initializer(state, &Scales::new()).unwrap();
        assert_eq!(state.facets, vec![vec![2, 0, 1]]);

        let shorthand = MarkOptions::new()
            .channel("y", ValueSpec::Identity)
            .with_sort(SortSpec::channel("-y"));
        let mark = Mark::new(nums(&[2.0, 3.0, 1.0]).into(), shorthand).unwrap();
        let state = mark.initialize(None).unwrap();
        let state = mark.apply_initializer(state, &Scales::new()).unwrap();
        assert_eq!(state.facets, vec![vec![1, 0, 2]]);
    }

    #[test]
    fn test_overlapping_facets_are_made_exclusive() {
        let data: Data = nums(&[10.0, 20.0, 30.0]).into();
        let options = MarkOptions::new().channel("x", ValueSpec::array(nums(&[1.0, 2.0, 3.0])));
        let mark = Mark::new(data.clone(), options).unwrap();

        let state = mark.initialize(Some(vec![vec![0, 1], vec![1, 2]])).unwrap();
        assert_eq!(state.facets, vec![vec![0, 1], vec![3, 2]]);
        assert_eq!(state.channels["x"].value, nums(&[1.0, 2.0, 3.0, 2.0]));

        let state = mark.initialize(Some(vec![vec![0], vec![1, 2]])).unwrap();
        assert!(Data::ptr_eq(&state.data, &data));
    }

    #[test]
    fn test_render_index_applies_channel_filters() {
        let data: Data = vec![Value::from(1.0), Value::Null, Value::from(-2.0), Value::from(4.0)].into();
        let options = MarkOptions::new()
            .channel("x", Channel::new(ValueSpec::Identity).with_filter(ChannelFilter::Defined))
            .channel("r", Channel::new(ValueSpec::Identity).with_filter(ChannelFilter::Positive));
        let mark = Mark::new(data, options).unwrap();
        let state = mark.initialize(None).unwrap();
        assert_eq!(mark.render_index(&state, &state.facets[0]), vec![0, 3]);
    }

    #[test]
    fn test_initializer_reads_scales() {
        let data: Data = nums(&[1.0, 2.0]).into();
        let double = Initializer::new(|_, channels, context| {
            let x = &channels["x"];
            let scaled = context.scales.apply(x).unwrap_or_else(|| x.value.clone());
            let mut out = InitializerOutput::default();
            out.channels.insert("x".into(), ChannelValues::new(scaled));
            Ok(out)
        });
        let options = MarkOptions::new()
            .channel("x", Channel::new(ValueSpec::Identity).with_scale("x".into()))
            .with_initializer(double);
        let mark = Mark::new(data, options).unwrap();
        let scales = Scales::new().with("x", |v: &Value| Value::from(v.to_number() * 2.0));
        let state = mark.initialize(None).unwrap();
        let state = mark.apply_initializer(state, &scales).unwrap();
        assert_eq!(state.channels["x"].value, nums(&[2.0, 4.0]));
    }
}
