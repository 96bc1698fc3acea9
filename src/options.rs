use indexmap::IndexMap;

use crate::basic::{Initializer, SortSpec, Transform};
use crate::channel::Channel;
use crate::column::{Column, ValueSpec};

/// Declarative options of one mark: its channels plus the shorthand
/// `filter`/`sort`/`reverse` and the composed transform and initializer.
///
/// Every transform constructor consumes a `MarkOptions` and returns a new one
/// whose channels point at the transform's output columns, so transforms nest
/// by plain function composition (`stack_y(.., bin_x(.., options)?)`).
#[derive(Debug, Clone, Default)]
pub struct MarkOptions {
    pub channels: IndexMap<String, Channel>,
    pub filter: Option<ValueSpec>,
    pub sort: Option<SortSpec>,
    pub reverse: bool,
    pub transform: Option<Transform>,
    pub initializer: Option<Initializer>,
    next_column: u64,
}

impl MarkOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn channel(mut self, name: impl Into<String>, channel: impl Into<Channel>) -> Self {
        self.channels.insert(name.into(), channel.into());
        self
    }

    pub fn with_filter(mut self, value: impl Into<ValueSpec>) -> Self {
        self.filter = Some(value.into());
        self
    }

    pub fn with_sort(mut self, sort: SortSpec) -> Self {
        self.sort = Some(sort);
        self
    }

    pub fn with_reverse(mut self, reverse: bool) -> Self {
        self.reverse = reverse;
        self
    }

    pub fn with_transform(mut self, transform: Transform) -> Self {
        self.transform = Some(transform);
        self
    }

    pub fn with_initializer(mut self, initializer: Initializer) -> Self {
        self.initializer = Some(initializer);
        self
    }

    pub fn get(&self, name: &str) -> Option<&ValueSpec> {
        self.channels.get(name).map(|c| &c.value)
    }

    pub fn has(&self, name: &str) -> bool {
        self.channels.contains_key(name)
    }

    pub fn set(&mut self, name: impl Into<String>, channel: impl Into<Channel>) {
        self.channels.insert(name.into(), channel.into());
    }

    pub fn remove(&mut self, name: &str) -> Option<Channel> {
        self.channels.shift_remove(name)
    }

    /// Allocate a lazy column descriptor owned by this mark's pipeline.
    pub fn column(&mut self, label: Option<String>) -> Column {
        let column = Column::new(self.next_column, label);
        self.next_column += 1;
        column
    }

    /// The input for an output named `name`; `x1`/`x2` fall back to `x` and
    /// `y1`/`y2` to `y`.
    pub(crate) fn input(&self, name: &str) -> Option<ValueSpec> {
        if let Some(value) = self.get(name) {
            return Some(value.clone());
        }
        let fallback = match name {
            "x1" | "x2" => "x",
            "y1" | "y2" => "y",
            _ => return None,
        };
        self.get(fallback).cloned()
    }

    /// The series channel: the first of `z`, `fill` and `stroke` that is an
    /// actual channel rather than a constant.
    pub fn z(&self) -> Option<ValueSpec> {
        ["z", "fill", "stroke"]
            .iter()
            .filter_map(|name| self.get(name))
            .find(|value| !value.is_constant())
            .cloned()
    }
}
