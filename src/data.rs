use anyhow::{anyhow, Context, Result};
use std::io::Read;
use std::ops::Deref;
use std::sync::Arc;

use crate::value::Value;

/// An immutable, shared sequence of rows.
///
/// Transforms never mutate a `Data`; when they need new rows they build a new
/// one. `reindex`, when present, maps each row of this dataset back to the row
/// of the source dataset it was duplicated from, so that channel values
/// supplied as raw arrays can be reread through the duplication. `passes`
/// keeps each duplication step separately for values computed part way along.
#[derive(Debug, Clone, Default)]
pub struct Data {
    rows: Arc<Vec<Value>>,
    reindex: Option<Arc<Vec<usize>>>,
    passes: Vec<Arc<Duplication>>,
}

/// One duplication step: rows of the new dataset mapped onto the rows of a
/// dataset of `source_len` rows.
#[derive(Debug)]
struct Duplication {
    source_len: usize,
    plan: Vec<usize>,
}

impl Data {
    pub fn new(rows: Vec<Value>) -> Self {
        Self {
            rows: Arc::new(rows),
            reindex: None,
            passes: Vec::new(),
        }
    }

    /// A dataset built from `source` by duplicating rows; `plan[i]` is the
    /// row of `source` that row `i` copies.
    pub(crate) fn duplicated(source: &Data, rows: Vec<Value>, plan: Vec<usize>) -> Self {
        let reindex = match source.reindex() {
            Some(previous) => plan.iter().map(|&i| previous[i]).collect(),
            None => plan.clone(),
        };
        let mut passes = source.passes.clone();
        passes.push(Arc::new(Duplication {
            source_len: source.len(),
            plan,
        }));
        Self {
            rows: Arc::new(rows),
            reindex: Some(Arc::new(reindex)),
            passes,
        }
    }

    pub fn rows(&self) -> &[Value] {
        &self.rows
    }

    pub fn reindex(&self) -> Option<&[usize]> {
        self.reindex.as_deref().map(|r| r.as_slice())
    }

    /// Maps each row back to the row it copies in the earlier dataset of
    /// `len` rows along this one's duplication history.
    pub(crate) fn reindex_from(&self, len: usize) -> Option<Vec<usize>> {
        let start = self.passes.iter().rposition(|p| p.source_len == len)?;
        let mut index = self.range();
        for pass in self.passes[start..].iter().rev() {
            for i in index.iter_mut() {
                *i = pass.plan[*i];
            }
        }
        Some(index)
    }

    /// Whether both handles share the same row storage.
    pub fn ptr_eq(a: &Data, b: &Data) -> bool {
        Arc::ptr_eq(&a.rows, &b.rows)
    }

    /// The identity facet `[0, n)`.
    pub fn range(&self) -> Vec<usize> {
        (0..self.rows.len()).collect()
    }

    /// Create a dataset from a JSON array of arbitrary values.
    pub fn from_json(value: &serde_json::Value) -> Result<Self> {
        let array = value
            .as_array()
            .ok_or_else(|| anyhow!("Input data must be a JSON array"))?;
        Ok(Self::new(array.iter().cloned().map(Value::from).collect()))
    }

    /// Create a dataset of object rows from CSV with a header row.
    ///
    /// Cells that parse as numbers become numbers, `true`/`false` become
    /// booleans, empty cells become null and everything else stays text.
    pub fn from_csv<R: Read>(reader: R) -> Result<Self> {
        let mut reader = csv::Reader::from_reader(reader);
        let headers: Vec<String> = reader
            .headers()
            .context("Failed to read CSV headers")?
            .iter()
            .map(|h| h.trim().to_string())
            .collect();

        let mut rows = Vec::new();
        for (line, record) in reader.records().enumerate() {
            let record = record.with_context(|| format!("Failed to read CSV row {}", line + 1))?;
            let row = headers
                .iter()
                .zip(record.iter())
                .map(|(h, cell)| (h.clone(), infer_cell(cell)));
            rows.push(Value::object(row));
        }

        Ok(Self::new(rows))
    }
}

fn infer_cell(cell: &str) -> Value {
    let trimmed = cell.trim();
    if trimmed.is_empty() {
        return Value::Null;
    }
    if let Ok(n) = trimmed.parse::<f64>() {
        return Value::Number(n);
    }
    match trimmed {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => Value::Text(cell.to_string()),
    }
}

impl Deref for Data {
    type Target = [Value];

    fn deref(&self) -> &[Value] {
        &self.rows
    }
}

impl From<Vec<Value>> for Data {
    fn from(rows: Vec<Value>) -> Self {
        Data::new(rows)
    }
}

impl FromIterator<Value> for Data {
    fn from_iter<I: IntoIterator<Item = Value>>(iter: I) -> Self {
        Data::new(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_json() {
        let json = serde_json::json!([{"a": 1}, {"a": 2}, 3]);
        let data = Data::from_json(&json).unwrap();
        assert_eq!(data.len(), 3);
        assert_eq!(data[0].get("a"), Some(&Value::from(1)));
        assert_eq!(data[2], Value::from(3));
    }

    #[test]
    fn test_from_json_requires_array() {
        let json = serde_json::json!({"a": 1});
        assert!(Data::from_json(&json).is_err());
    }

    #[test]
    fn test_from_csv_infers_cells() {
        let csv = "name,value,flag\nA,1.5,true\nB,,false\n";
        let data = Data::from_csv(csv.as_bytes()).unwrap();
        assert_eq!(data.len(), 2);
        assert_eq!(data[0].get("name"), Some(&Value::from("A")));
        assert_eq!(data[0].get("value"), Some(&Value::from(1.5)));
        assert_eq!(data[0].get("flag"), Some(&Value::Bool(true)));
        assert_eq!(data[1].get("value"), Some(&Value::Null));
    }

    #[test]
    fn test_clone_shares_rows() {
        let data = Data::new(vec![Value::from(1)]);
        let copy = data.clone();
        assert!(Data::ptr_eq(&data, &copy));
        assert!(!Data::ptr_eq(&data, &Data::new(vec![Value::from(1)])));
    }
}
