// Library exports for gramflow

pub mod data;
pub mod error;
pub mod parser;
pub mod value;

// Channel model
pub mod channel;
pub mod column;
pub mod facet;
pub mod options;

// Transform composition and reduction
pub mod basic;
pub mod interval;
pub mod reduce;
pub mod stats;

// Transforms
pub mod bin;
pub mod group;
pub mod map;
pub mod normalize;
pub mod select;
pub mod stack;
pub mod window;

pub mod mark;

pub use anyhow::Result;

pub use basic::{
    basic, filter, initializer, reverse, shuffle, sort, Context, Initializer, InitializerOutput,
    ShuffleOptions, SortOrder, SortSpec, Transform,
};
pub use bin::{bin, bin_x, bin_y, BinOptions, Thresholds};
pub use channel::{Channel, ChannelFilter, ChannelMap, ChannelValues, ScaleHint, Scales};
pub use column::{valueof, Column, Columns, ValueSpec};
pub use data::Data;
pub use error::PipelineError;
pub use facet::{exclusive, exclusive_facets, Facet, Facets, Frame};
pub use group::{group, group_x, group_y, group_z, Outputs};
pub use interval::Interval;
pub use map::{map, map_x, map_y, Map, MapIndex};
pub use mark::{Mark, MarkState};
pub use normalize::{normalize, normalize_x, normalize_y, Basis};
pub use options::MarkOptions;
pub use reduce::{Reduce, ReduceIndex, Scope};
pub use select::{
    select, select_first, select_last, select_max_x, select_max_y, select_min_x, select_min_y,
    Selector,
};
pub use stack::{
    stack_x, stack_x1, stack_x2, stack_y, stack_y1, stack_y2, StackOffset, StackOptions,
    StackOrder,
};
pub use value::Value;
pub use window::{window, window_x, window_y, Anchor, WindowOptions, WindowReduce};
