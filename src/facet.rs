use anyhow::Result;
use tracing::debug;

use crate::basic::{basic, Transform};
use crate::data::Data;
use crate::options::MarkOptions;

/// Ordered row indices into a shared dataset.
pub type Facet = Vec<usize>;

/// Ordered facets; the order follows the facet domain and is preserved by
/// every transform that does not explicitly reorder.
pub type Facets = Vec<Facet>;

/// The `{data, facets}` pair threaded through every transform.
#[derive(Debug, Clone)]
pub struct Frame {
    pub data: Data,
    pub facets: Facets,
}

impl Frame {
    pub fn new(data: Data, facets: Facets) -> Self {
        Self { data, facets }
    }

    /// A single facet covering every row.
    pub fn single(data: Data) -> Self {
        let facets = vec![data.range()];
        Self { data, facets }
    }
}

/// Make facets disjoint by duplicating rows shared between facets.
///
/// Every occurrence of a row index beyond its first is pointed at a fresh
/// copy appended to a new dataset, and the new dataset carries a reindex plan
/// mapping each row back to its source. With a single facet, or when no row
/// is shared, the frame is returned untouched (same data handle).
pub fn exclusive(frame: Frame) -> Frame {
    if frame.facets.len() <= 1 {
        return frame;
    }

    let n = frame.data.len();
    let mut seen = vec![false; n];
    let mut overlaps = 0;
    for facet in &frame.facets {
        for &i in facet {
            if seen[i] {
                overlaps += 1;
            }
            seen[i] = true;
        }
    }
    if overlaps == 0 {
        return frame;
    }

    debug!(overlaps, rows = n, "duplicating rows shared by several facets");

    let mut rows = Vec::with_capacity(n + overlaps);
    rows.extend_from_slice(frame.data.rows());
    let mut plan: Vec<usize> = Vec::with_capacity(n + overlaps);
    plan.extend(0..n);

    seen.fill(false);
    let mut facets = frame.facets;
    for facet in facets.iter_mut() {
        for slot in facet.iter_mut() {
            let i = *slot;
            if seen[i] {
                *slot = rows.len();
                rows.push(rows[i].clone());
                plan.push(i);
            } else {
                seen[i] = true;
            }
        }
    }

    Frame {
        data: Data::duplicated(&frame.data, rows, plan),
        facets,
    }
}

/// Transform form of [`exclusive`].
pub fn exclusive_facets(options: MarkOptions) -> Result<MarkOptions> {
    basic(
        options,
        Some(Transform::new(|frame, _columns| Ok(exclusive(frame)))),
    )
}
