//! Plain-data descriptions of models and queries, as handed over by the
//! request layer. Nothing here is validated; the model constructors do that.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::errors::{ProbError, Result};

pub const TRUE_VALUE: &str = "True";
pub const FALSE_VALUE: &str = "False";

/// A variable value. JSON booleans are accepted and normalised to
/// `"True"` / `"False"` so that boolean and string encodings compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ValueSpec {
    Boolean(bool),
    Text(String),
}

impl ValueSpec {
    pub fn as_value(&self) -> String {
        match self {
            ValueSpec::Boolean(true) => TRUE_VALUE.to_string(),
            ValueSpec::Boolean(false) => FALSE_VALUE.to_string(),
            ValueSpec::Text(s) => canonical_value(s),
        }
    }
}

/// Trim a value and spell booleans the way the default domain does.
pub fn canonical_value(value: &str) -> String {
    let value = value.trim();
    if value.eq_ignore_ascii_case("true") {
        TRUE_VALUE.to_string()
    } else if value.eq_ignore_ascii_case("false") {
        FALSE_VALUE.to_string()
    } else {
        value.to_string()
    }
}

impl From<bool> for ValueSpec {
    fn from(value: bool) -> Self {
        ValueSpec::Boolean(value)
    }
}

impl From<&str> for ValueSpec {
    fn from(value: &str) -> Self {
        ValueSpec::Text(value.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSpec {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Explicit domain; `{True, False}` when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<Vec<ValueSpec>>,
}

impl NodeSpec {
    pub fn binary(id: &str) -> Self {
        NodeSpec {
            id: id.to_string(),
            label: None,
            values: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeSpec {
    pub from: String,
    pub to: String,
}

impl EdgeSpec {
    pub fn new(from: &str, to: &str) -> Self {
        EdgeSpec {
            from: from.to_string(),
            to: to.to_string(),
        }
    }
}

/// One row of a CPT: either the probability of `True` (binary shorthand) or a
/// full `value -> probability` map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RowSpec {
    Probability(f64),
    Distribution(BTreeMap<String, f64>),
}

/// The CPT of one node.
///
/// For a root node, `Table` is keyed by the node's own values. For a node with
/// parents it is keyed by a serialized parent assignment, either
/// `"A=True,B=False"` or `{"A": true, "B": false}`. `Prior` is the binary
/// shorthand for a root's `P(True)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CptSpec {
    Prior(f64),
    Table(BTreeMap<String, RowSpec>),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkSpec {
    pub nodes: Vec<NodeSpec>,
    #[serde(default)]
    pub edges: Vec<EdgeSpec>,
    #[serde(default)]
    pub cpt: BTreeMap<String, CptSpec>,
}

/// A square or rectangular probability matrix, given either densely in
/// declaration order or keyed by row and column identifiers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MatrixSpec {
    Dense(Vec<Vec<f64>>),
    Keyed(BTreeMap<String, BTreeMap<String, f64>>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VectorSpec {
    Dense(Vec<f64>),
    Keyed(BTreeMap<String, f64>),
}

impl MatrixSpec {
    /// Lay the matrix out densely in `rows` x `cols` order. Keyed entries that
    /// are absent count as zero; unknown keys are reported through the
    /// supplied constructors.
    pub fn to_dense(
        &self,
        what: &str,
        rows: &[String],
        cols: &[String],
        unknown_row: fn(String) -> ProbError,
        unknown_col: fn(String) -> ProbError,
    ) -> Result<Vec<Vec<f64>>> {
        match self {
            MatrixSpec::Dense(data) => {
                if data.len() != rows.len() {
                    return Err(ProbError::DimensionMismatch {
                        what: format!("{what} rows"),
                        expected: rows.len(),
                        found: data.len(),
                    });
                }
                for row in data {
                    if row.len() != cols.len() {
                        return Err(ProbError::DimensionMismatch {
                            what: format!("{what} columns"),
                            expected: cols.len(),
                            found: row.len(),
                        });
                    }
                }
                Ok(data.clone())
            }
            MatrixSpec::Keyed(map) => {
                let mut dense = vec![vec![0.0; cols.len()]; rows.len()];
                for (row_key, entries) in map {
                    let i = position(rows, row_key).ok_or_else(|| unknown_row(row_key.clone()))?;
                    for (col_key, &p) in entries {
                        let j = position(cols, col_key)
                            .ok_or_else(|| unknown_col(col_key.clone()))?;
                        dense[i][j] = p;
                    }
                }
                Ok(dense)
            }
        }
    }
}

impl VectorSpec {
    pub fn to_dense(&self, what: &str, keys: &[String]) -> Result<Vec<f64>> {
        match self {
            VectorSpec::Dense(data) => {
                if data.len() != keys.len() {
                    return Err(ProbError::DimensionMismatch {
                        what: what.to_string(),
                        expected: keys.len(),
                        found: data.len(),
                    });
                }
                Ok(data.clone())
            }
            VectorSpec::Keyed(map) => {
                let mut dense = vec![0.0; keys.len()];
                for (key, &p) in map {
                    let i = position(keys, key)
                        .ok_or_else(|| ProbError::UnknownState(key.clone()))?;
                    dense[i] = p;
                }
                Ok(dense)
            }
        }
    }
}

fn position(keys: &[String], key: &str) -> Option<usize> {
    keys.iter().position(|k| k == key)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainSpec {
    pub states: Vec<String>,
    pub transition_matrix: MatrixSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_distribution: Option<VectorSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HmmSpec {
    pub hidden_states: Vec<String>,
    pub observations: Vec<String>,
    pub transition_matrix: MatrixSpec,
    pub emission_matrix: MatrixSpec,
    pub initial_probabilities: VectorSpec,
}

/// `P(query | evidence)` request for a Bayesian network.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InferenceQuery {
    pub query: String,
    #[serde(default)]
    pub evidence: BTreeMap<String, ValueSpec>,
}

impl InferenceQuery {
    pub fn new(query: &str) -> Self {
        InferenceQuery {
            query: query.to_string(),
            evidence: BTreeMap::new(),
        }
    }

    pub fn with_evidence(mut self, variable: &str, value: impl Into<ValueSpec>) -> Self {
        self.evidence.insert(variable.to_string(), value.into());
        self
    }

    /// Evidence with every value normalised to its string form.
    pub fn evidence_values(&self) -> BTreeMap<String, String> {
        self.evidence
            .iter()
            .map(|(k, v)| (k.clone(), v.as_value()))
            .collect()
    }
}

/// An observation sequence for the HMM algorithms.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SequenceQuery {
    pub sequence: Vec<String>,
}

/// Any model the engine understands, tagged by `"type"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ModelDocument {
    BayesianNetwork(NetworkSpec),
    MarkovChain(ChainSpec),
    Hmm(HmmSpec),
}
