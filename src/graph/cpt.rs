use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt;

use crate::common::errors::{ProbError, Result, check_distribution};
use crate::common::spec::{CptSpec, RowSpec, ValueSpec, canonical_value};

/// Canonical form of a parent assignment: `(parent, value)` pairs sorted by
/// parent name. Both accepted key encodings parse into this one form.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ParentAssignment(Vec<(String, String)>);

impl ParentAssignment {
    pub fn new<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: AsRef<str>,
    {
        let mut pairs: Vec<(String, String)> = pairs
            .into_iter()
            .map(|(k, v)| (k.into(), canonical_value(v.as_ref())))
            .collect();
        pairs.sort();
        ParentAssignment(pairs)
    }

    /// Parse either `"A=True,B=False"` (also `|`-delimited) or a JSON object
    /// string such as `{"A": true, "B": "False"}`.
    pub fn parse(node: &str, key: &str) -> Result<Self> {
        let malformed = |reason: &str| ProbError::MalformedCptKey {
            node: node.to_string(),
            key: key.to_string(),
            reason: reason.to_string(),
        };

        let trimmed = key.trim();
        let mut pairs: Vec<(String, String)> = Vec::new();
        if trimmed.starts_with('{') {
            let object: BTreeMap<String, ValueSpec> =
                serde_json::from_str(trimmed).map_err(|e| malformed(&e.to_string()))?;
            pairs.extend(object.into_iter().map(|(k, v)| (k, v.as_value())));
        } else if !trimmed.is_empty() {
            for part in trimmed.split([',', '|']) {
                let (name, value) = part
                    .split_once('=')
                    .ok_or_else(|| malformed("expected Parent=Value pairs"))?;
                let (name, value) = (name.trim(), value.trim());
                if name.is_empty() || value.is_empty() {
                    return Err(malformed("empty parent name or value"));
                }
                pairs.push((name.to_string(), canonical_value(value)));
            }
        }

        pairs.sort();
        if pairs.windows(2).any(|w| w[0].0 == w[1].0) {
            return Err(malformed("parent listed more than once"));
        }
        Ok(ParentAssignment(pairs))
    }

    pub fn pairs(&self) -> &[(String, String)] {
        &self.0
    }

    pub fn get(&self, parent: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(name, _)| name == parent)
            .map(|(_, value)| value.as_str())
    }
}

impl fmt::Display for ParentAssignment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return write!(f, "{{}}");
        }
        let parts: Vec<String> = self.0.iter().map(|(k, v)| format!("{k}={v}")).collect();
        write!(f, "{}", parts.join(","))
    }
}

/// What a table needs to know about one parent.
pub(crate) struct ParentInfo<'a> {
    pub index: usize,
    pub id: &'a str,
    pub values: &'a [String],
}

/// A complete, dense CPT for one node.
///
/// Rows are laid out in mixed radix over the parents (sorted by name, last
/// parent varying fastest); each row holds one probability per value of the
/// node, in domain order.
#[derive(Debug, Clone, PartialEq)]
pub struct ConditionalTable {
    node: String,
    values: Vec<String>,
    parents: Vec<String>,
    parent_indices: Vec<usize>,
    parent_values: Vec<Vec<String>>,
    strides: Vec<usize>,
    probabilities: Vec<f64>,
}

impl ConditionalTable {
    /// Build the dense table, collecting every defect rather than stopping at
    /// the first one. `parents` must already be sorted by id.
    pub(crate) fn build(
        node: &str,
        values: &[String],
        parents: &[ParentInfo<'_>],
        spec: &CptSpec,
        tolerance: f64,
    ) -> std::result::Result<Self, Vec<ProbError>> {
        let mut strides = vec![1; parents.len()];
        for i in (0..parents.len().saturating_sub(1)).rev() {
            strides[i] = strides[i + 1] * parents[i + 1].values.len();
        }
        let row_count: usize = parents.iter().map(|p| p.values.len()).product();

        let mut table = ConditionalTable {
            node: node.to_string(),
            values: values.to_vec(),
            parents: parents.iter().map(|p| p.id.to_string()).collect(),
            parent_indices: parents.iter().map(|p| p.index).collect(),
            parent_values: parents.iter().map(|p| p.values.to_vec()).collect(),
            strides,
            probabilities: vec![0.0; row_count * values.len()],
        };

        let mut errors = Vec::new();
        let mut filled = vec![false; row_count];

        for (assignment, row) in table.collect_rows(spec, &mut errors) {
            let Some(row_index) = table.row_index_of(&assignment, &mut errors) else {
                continue;
            };
            if filled[row_index] {
                errors.push(ProbError::DuplicateCptRow {
                    node: node.to_string(),
                    assignment: assignment.to_string(),
                });
                continue;
            }
            match table.expand_row(&assignment, &row, tolerance) {
                Ok(probs) => {
                    let start = row_index * values.len();
                    table.probabilities[start..start + values.len()].copy_from_slice(&probs);
                    filled[row_index] = true;
                }
                Err(e) => errors.push(e),
            }
        }

        for (row_index, done) in filled.iter().enumerate() {
            if !done {
                errors.push(ProbError::MissingCptRow {
                    node: node.to_string(),
                    assignment: table.assignment_of_row(row_index).to_string(),
                });
            }
        }

        if errors.is_empty() {
            Ok(table)
        } else {
            Err(errors)
        }
    }

    /// Turn the CPT document into `(assignment, row)` pairs. Root tables keyed by the
    /// node's own values become a single row under the empty assignment.
    fn collect_rows(
        &self,
        spec: &CptSpec,
        errors: &mut Vec<ProbError>,
    ) -> Vec<(ParentAssignment, RowSpec)> {
        match spec {
            CptSpec::Prior(p) => {
                if self.parents.is_empty() {
                    vec![(ParentAssignment::default(), RowSpec::Probability(*p))]
                } else {
                    errors.push(ProbError::MalformedCptKey {
                        node: self.node.clone(),
                        key: String::new(),
                        reason: "a bare prior is only valid for nodes without parents".into(),
                    });
                    Vec::new()
                }
            }
            CptSpec::Table(rows) => {
                let marginal = self.parents.is_empty()
                    && rows.values().all(|row| matches!(row, RowSpec::Probability(_)))
                    && !rows.keys().any(|k| k.trim().is_empty() || k.trim().starts_with('{'));
                if marginal {
                    let distribution: BTreeMap<String, f64> = rows
                        .iter()
                        .filter_map(|(value, row)| match row {
                            RowSpec::Probability(p) => Some((canonical_value(value), *p)),
                            RowSpec::Distribution(_) => None,
                        })
                        .collect();
                    return vec![(
                        ParentAssignment::default(),
                        RowSpec::Distribution(distribution),
                    )];
                }
                let mut out = Vec::with_capacity(rows.len());
                for (key, row) in rows {
                    match ParentAssignment::parse(&self.node, key) {
                        Ok(assignment) => out.push((assignment, row.clone())),
                        Err(e) => errors.push(e),
                    }
                }
                out
            }
        }
    }

    fn row_index_of(
        &self,
        assignment: &ParentAssignment,
        errors: &mut Vec<ProbError>,
    ) -> Option<usize> {
        let malformed = |reason: String| ProbError::MalformedCptKey {
            node: self.node.clone(),
            key: assignment.to_string(),
            reason,
        };
        if assignment.pairs().len() != self.parents.len() {
            errors.push(malformed(format!(
                "expected values for parents [{}]",
                self.parents.join(", ")
            )));
            return None;
        }
        let mut index = 0;
        // Both sides are sorted by parent name.
        for (i, (name, value)) in assignment.pairs().iter().enumerate() {
            if name != &self.parents[i] {
                errors.push(malformed(format!("'{name}' is not a parent")));
                return None;
            }
            let Some(v) = self.parent_values[i].iter().position(|d| d == value) else {
                errors.push(ProbError::ValueOutOfDomain {
                    variable: name.clone(),
                    value: value.clone(),
                });
                return None;
            };
            index += v * self.strides[i];
        }
        Some(index)
    }

    fn expand_row(
        &self,
        assignment: &ParentAssignment,
        row: &RowSpec,
        tolerance: f64,
    ) -> Result<Vec<f64>> {
        let what = format!("CPT row of '{}' given {}", self.node, assignment);
        let probs = match row {
            RowSpec::Probability(p) => {
                let t = self.values.iter().position(|v| v == crate::common::spec::TRUE_VALUE);
                let f = self.values.iter().position(|v| v == crate::common::spec::FALSE_VALUE);
                match (t, f, self.values.len()) {
                    (Some(t), Some(f), 2) => {
                        let mut probs = vec![0.0; 2];
                        probs[t] = *p;
                        probs[f] = 1.0 - *p;
                        probs
                    }
                    _ => {
                        return Err(ProbError::InvalidParameter(format!(
                            "node '{}' uses the binary shorthand without a {{True, False}} domain",
                            self.node
                        )));
                    }
                }
            }
            RowSpec::Distribution(map) => {
                let mut probs = vec![0.0; self.values.len()];
                for (value, &p) in map {
                    let value = canonical_value(value);
                    let i = self.values.iter().position(|v| *v == value).ok_or_else(|| {
                        ProbError::ValueOutOfDomain {
                            variable: self.node.clone(),
                            value: value.clone(),
                        }
                    })?;
                    probs[i] = p;
                }
                probs
            }
        };
        check_distribution(&what, &probs, tolerance)?;
        Ok(probs)
    }

    fn assignment_of_row(&self, mut row: usize) -> ParentAssignment {
        let mut pairs = Vec::with_capacity(self.parents.len());
        for (i, parent) in self.parents.iter().enumerate() {
            let v = row / self.strides[i];
            row %= self.strides[i];
            pairs.push((parent.clone(), self.parent_values[i][v].clone()));
        }
        ParentAssignment(pairs)
    }

    pub fn node(&self) -> &str {
        &self.node
    }

    pub fn values(&self) -> &[String] {
        &self.values
    }

    /// Parent ids, sorted by name.
    pub fn parents(&self) -> &[String] {
        &self.parents
    }

    pub fn row_count(&self) -> usize {
        self.probabilities.len() / self.values.len().max(1)
    }

    /// The distribution over this node's values for one parent assignment.
    pub fn row(&self, assignment: &ParentAssignment) -> Result<&[f64]> {
        let mut errors = Vec::new();
        match self.row_index_of(assignment, &mut errors) {
            Some(row) => Ok(self.row_at(row)),
            None => Err(errors.remove(0)),
        }
    }

    /// All rows with their parent assignments, in table order.
    pub fn rows(&self) -> impl Iterator<Item = (ParentAssignment, &[f64])> + '_ {
        (0..self.row_count()).map(move |r| (self.assignment_of_row(r), self.row_at(r)))
    }

    /// `P(node = value | parents)` with string-level arguments.
    pub fn probability_of(&self, value: &str, parents: &HashMap<String, String>) -> Result<f64> {
        let value = canonical_value(value);
        let v = self.values.iter().position(|d| *d == value).ok_or_else(|| {
            ProbError::ValueOutOfDomain {
                variable: self.node.clone(),
                value: value.clone(),
            }
        })?;
        let mut pairs = Vec::with_capacity(self.parents.len());
        for parent in &self.parents {
            let pv = parents.get(parent).ok_or_else(|| {
                ProbError::InvalidParameter(format!(
                    "no value given for parent '{parent}' of '{}'",
                    self.node
                ))
            })?;
            pairs.push((parent.clone(), pv.clone()));
        }
        Ok(self.row(&ParentAssignment::new(pairs))?[v])
    }

    fn row_at(&self, row: usize) -> &[f64] {
        let k = self.values.len();
        &self.probabilities[row * k..(row + 1) * k]
    }

    pub(crate) fn parent_indices(&self) -> &[usize] {
        &self.parent_indices
    }

    /// Index-level lookup used by the inference engines. `parent_value` maps a
    /// parent's node index to its assigned value index.
    #[inline]
    pub(crate) fn probability(&self, value: usize, parent_value: impl Fn(usize) -> usize) -> f64 {
        let row: usize = self
            .parent_indices
            .iter()
            .zip(&self.strides)
            .map(|(&p, &stride)| parent_value(p) * stride)
            .sum();
        self.probabilities[row * self.values.len() + value]
    }
}
