use indexmap::IndexMap;
use std::fmt;
use std::sync::Arc;

use crate::column::{Column, ValueSpec};
use crate::value::Value;

/// Which scale, if any, a channel is bound to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScaleHint {
    /// Let the scale layer infer the binding.
    Auto,
    /// Explicitly unscaled; values are used literally.
    Unscaled,
    /// Bound to the named scale kind (`"x"`, `"color"`, ...).
    Named(String),
}

impl From<&str> for ScaleHint {
    fn from(name: &str) -> Self {
        match name {
            "auto" => ScaleHint::Auto,
            _ => ScaleHint::Named(name.to_string()),
        }
    }
}

/// Element-wise predicate deciding which rows are rendered.
#[derive(Clone)]
pub enum ChannelFilter {
    Defined,
    Positive,
    Predicate(Arc<dyn Fn(&Value) -> bool + Send + Sync>),
}

impl ChannelFilter {
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            ChannelFilter::Defined => value.is_defined(),
            ChannelFilter::Positive => value.as_f64().map(|v| v > 0.0).unwrap_or(false),
            ChannelFilter::Predicate(f) => f(value),
        }
    }
}

impl fmt::Debug for ChannelFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelFilter::Defined => f.write_str("Defined"),
            ChannelFilter::Positive => f.write_str("Positive"),
            ChannelFilter::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}

/// A declared channel: how to compute its values plus rendering metadata.
#[derive(Debug, Clone)]
pub struct Channel {
    pub value: ValueSpec,
    pub scale: Option<ScaleHint>,
    pub label: Option<String>,
    pub filter: Option<ChannelFilter>,
}

impl Channel {
    pub fn new(value: impl Into<ValueSpec>) -> Self {
        Self {
            value: value.into(),
            scale: None,
            label: None,
            filter: None,
        }
    }

    pub fn with_scale(mut self, scale: ScaleHint) -> Self {
        self.scale = Some(scale);
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_filter(mut self, filter: ChannelFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Explicit label, else the one propagated from the value spec.
    pub fn label(&self) -> Option<String> {
        self.label.clone().or_else(|| self.value.label())
    }
}

impl From<ValueSpec> for Channel {
    fn from(value: ValueSpec) -> Self {
        Channel::new(value)
    }
}

impl From<&str> for Channel {
    fn from(field: &str) -> Self {
        Channel::new(ValueSpec::field(field))
    }
}

impl From<Column> for Channel {
    fn from(column: Column) -> Self {
        Channel::new(ValueSpec::Column(column))
    }
}

/// A materialized channel handed to the rendering layer.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelValues {
    pub value: Vec<Value>,
    pub scale: Option<ScaleHint>,
    pub label: Option<String>,
}

impl ChannelValues {
    pub fn new(value: Vec<Value>) -> Self {
        Self {
            value,
            scale: None,
            label: None,
        }
    }
}

pub type ChannelMap = IndexMap<String, ChannelValues>;

pub type ScaleFn = dyn Fn(&Value) -> Value + Send + Sync;

/// Scale functions made available to initializers, keyed by scale name.
///
/// Scale construction belongs to the rendering layer; the pipeline only
/// applies whatever functions it is given.
#[derive(Clone, Default)]
pub struct Scales {
    scales: IndexMap<String, Arc<ScaleFn>>,
}

impl Scales {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<F>(mut self, name: impl Into<String>, scale: F) -> Self
    where
        F: Fn(&Value) -> Value + Send + Sync + 'static,
    {
        self.scales.insert(name.into(), Arc::new(scale));
        self
    }

    pub fn get(&self, name: &str) -> Option<&Arc<ScaleFn>> {
        self.scales.get(name)
    }

    /// Apply the scale a channel is bound to, if it is bound and known.
    pub fn apply(&self, channel: &ChannelValues) -> Option<Vec<Value>> {
        let ScaleHint::Named(name) = channel.scale.as_ref()? else {
            return None;
        };
        let scale = self.scales.get(name)?;
        Some(channel.value.iter().map(|v| scale(v)).collect())
    }
}

impl fmt::Debug for Scales {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.scales.keys()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_label_propagation() {
        let channel = Channel::from("weight");
        assert_eq!(channel.label().as_deref(), Some("weight"));
        let channel = Channel::from("weight").with_label("Weight (kg)");
        assert_eq!(channel.label().as_deref(), Some("Weight (kg)"));
    }

    #[test]
    fn test_filters() {
        assert!(!ChannelFilter::Defined.accepts(&Value::Null));
        assert!(ChannelFilter::Defined.accepts(&Value::from(0)));
        assert!(!ChannelFilter::Positive.accepts(&Value::from(0)));
        let odd = ChannelFilter::Predicate(Arc::new(|v: &Value| v.to_number() % 2.0 == 1.0));
        assert!(odd.accepts(&Value::from(3)));
    }

    #[test]
    fn test_scales_apply_named_binding() {
        let scales = Scales::new().with("x", |v| Value::from(v.to_number() * 2.0));
        let mut channel = ChannelValues::new(vec![Value::from(1), Value::from(2)]);
        assert!(scales.apply(&channel).is_none());
        channel.scale = Some(ScaleHint::from("x"));
        assert_eq!(
            scales.apply(&channel).unwrap(),
            vec![Value::from(2.0), Value::from(4.0)]
        );
    }
}
