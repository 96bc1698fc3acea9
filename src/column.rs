use anyhow::Result;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::data::Data;
use crate::error::PipelineError;
use crate::value::Value;

pub type AccessorFn = dyn Fn(&Value, usize) -> Value + Send + Sync;
pub type DeriveFn = dyn Fn(&[Value]) -> Vec<Value> + Send + Sync;

/// How a channel's values are obtained from a dataset.
#[derive(Clone)]
pub enum ValueSpec {
    /// Property lookup on every row.
    Field(String),
    /// A function of the row and its index.
    Accessor(Arc<AccessorFn>),
    /// The same value for every row.
    Constant(Value),
    /// Values given up front, aligned with the original dataset.
    Array(Arc<Vec<Value>>),
    /// A column whose values are populated by a transform at run time.
    Column(Column),
    /// The row itself.
    Identity,
    /// Values computed from the whole dataset at once.
    Derived(Arc<DeriveFn>),
}

impl ValueSpec {
    pub fn field(name: impl Into<String>) -> Self {
        ValueSpec::Field(name.into())
    }

    pub fn accessor<F>(f: F) -> Self
    where
        F: Fn(&Value, usize) -> Value + Send + Sync + 'static,
    {
        ValueSpec::Accessor(Arc::new(f))
    }

    pub fn constant(value: impl Into<Value>) -> Self {
        ValueSpec::Constant(value.into())
    }

    pub fn array(values: Vec<Value>) -> Self {
        ValueSpec::Array(Arc::new(values))
    }

    pub fn derived<F>(f: F) -> Self
    where
        F: Fn(&[Value]) -> Vec<Value> + Send + Sync + 'static,
    {
        ValueSpec::Derived(Arc::new(f))
    }

    pub fn is_constant(&self) -> bool {
        matches!(self, ValueSpec::Constant(_))
    }

    /// The human-readable label propagated from a field name or column.
    pub fn label(&self) -> Option<String> {
        match self {
            ValueSpec::Field(name) => Some(name.clone()),
            ValueSpec::Column(column) => column.label.clone(),
            _ => None,
        }
    }
}

impl fmt::Debug for ValueSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueSpec::Field(name) => f.debug_tuple("Field").field(name).finish(),
            ValueSpec::Accessor(_) => f.write_str("Accessor(..)"),
            ValueSpec::Constant(v) => f.debug_tuple("Constant").field(v).finish(),
            ValueSpec::Array(values) => write!(f, "Array(len={})", values.len()),
            ValueSpec::Column(column) => f.debug_tuple("Column").field(column).finish(),
            ValueSpec::Identity => f.write_str("Identity"),
            ValueSpec::Derived(_) => f.write_str("Derived(..)"),
        }
    }
}

impl From<&str> for ValueSpec {
    fn from(name: &str) -> Self {
        ValueSpec::Field(name.to_string())
    }
}

impl From<String> for ValueSpec {
    fn from(name: String) -> Self {
        ValueSpec::Field(name)
    }
}

impl From<Column> for ValueSpec {
    fn from(column: Column) -> Self {
        ValueSpec::Column(column)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ColumnId(u64);

/// Descriptor of a channel whose values are not known when the pipeline is
/// declared. The shape of the output channel set is fixed up front; the
/// values are written into a [`Columns`] arena when the transform runs.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Column {
    id: ColumnId,
    label: Option<String>,
}

impl Column {
    pub(crate) fn new(id: u64, label: Option<String>) -> Self {
        Self {
            id: ColumnId(id),
            label,
        }
    }

    pub fn id(&self) -> ColumnId {
        self.id
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    fn describe(&self) -> String {
        match &self.label {
            Some(label) => format!("{} ({})", self.id.0, label),
            None => self.id.0.to_string(),
        }
    }
}

/// Arena holding the populated values of lazy columns for one pipeline run.
#[derive(Debug, Clone, Default)]
pub struct Columns {
    values: HashMap<ColumnId, Arc<Vec<Value>>>,
}

impl Columns {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn populate(&mut self, column: &Column, values: Vec<Value>) {
        self.values.insert(column.id, Arc::new(values));
    }

    pub fn is_populated(&self, column: &Column) -> bool {
        self.values.contains_key(&column.id)
    }

    pub fn get(&self, column: &Column) -> Result<Arc<Vec<Value>>> {
        self.values
            .get(&column.id)
            .cloned()
            .ok_or_else(|| PipelineError::UnpopulatedColumn(column.describe()).into())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Coerce {
    /// Numbers; anything else becomes NaN.
    Number,
    /// UTC dates; anything else becomes null.
    Date,
}

/// Resolve `spec` against `data` into one value per row.
pub fn valueof(data: &Data, spec: &ValueSpec, columns: &Columns) -> Result<Vec<Value>> {
    let values = match spec {
        ValueSpec::Field(name) => data
            .iter()
            .map(|row| row.get(name).cloned().unwrap_or_default())
            .collect(),
        ValueSpec::Accessor(f) => data.iter().enumerate().map(|(i, row)| f(row, i)).collect(),
        ValueSpec::Constant(v) => vec![v.clone(); data.len()],
        ValueSpec::Identity => data.to_vec(),
        ValueSpec::Derived(f) => f(data.rows()),
        ValueSpec::Array(values) => match data.reindex() {
            Some(plan) => take(values, plan),
            None => values.to_vec(),
        },
        ValueSpec::Column(column) => {
            let values = columns.get(column)?;
            if values.len() == data.len() {
                values.to_vec()
            } else {
                // populated before the rows were duplicated
                match data.reindex_from(values.len()) {
                    Some(plan) => take(&values, &plan),
                    None => values.to_vec(),
                }
            }
        }
    };
    Ok(values)
}

/// Like [`valueof`], but an absent dataset yields `None` for every spec that
/// needs rows to be evaluated, signalling that the channel is simply absent.
pub fn maybe_valueof(
    data: Option<&Data>,
    spec: &ValueSpec,
    columns: &Columns,
) -> Result<Option<Vec<Value>>> {
    match (data, spec) {
        (Some(data), _) => valueof(data, spec, columns).map(Some),
        (None, ValueSpec::Derived(f)) => Ok(Some(f(&[]))),
        (None, ValueSpec::Array(values)) => Ok(Some(values.to_vec())),
        (None, ValueSpec::Column(column)) => Ok(Some(columns.get(column)?.to_vec())),
        (None, _) => Ok(None),
    }
}

pub fn valueof_as(
    data: &Data,
    spec: &ValueSpec,
    columns: &Columns,
    coerce: Coerce,
) -> Result<Vec<Value>> {
    Ok(coerce_values(valueof(data, spec, columns)?, coerce))
}

pub fn coerce_values(values: Vec<Value>, coerce: Coerce) -> Vec<Value> {
    values
        .into_iter()
        .map(|v| match coerce {
            Coerce::Number => Value::Number(v.to_number()),
            Coerce::Date => v.as_date().map(Value::Date).unwrap_or(Value::Null),
        })
        .collect()
}

/// Numeric view of a value sequence, NaN where not coercible.
pub fn numbers(values: &[Value]) -> Vec<f64> {
    values.iter().map(Value::to_number).collect()
}

/// Whether the first defined value is a date.
pub fn is_temporal(values: &[Value]) -> bool {
    values
        .iter()
        .find(|v| v.is_defined())
        .map(Value::is_date)
        .unwrap_or(false)
}

fn take(values: &[Value], plan: &[usize]) -> Vec<Value> {
    plan.iter()
        .map(|&i| values.get(i).cloned().unwrap_or_default())
        .collect()
}
