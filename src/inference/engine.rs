use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::elimination::eliminate_query;
use super::enumeration::enumerate_query;
use crate::common::errors::{ProbError, Result};
use crate::common::spec::InferenceQuery;
use crate::graph::network::BayesianNetwork;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InferenceMethod {
    #[default]
    Enumeration,
    VariableElimination,
}

/// Posterior distribution of one variable, plus diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InferenceResult {
    pub query: String,
    /// `value -> P(query = value | evidence)`
    pub distribution: BTreeMap<String, f64>,
    pub method: InferenceMethod,
    /// Memo-table hits during enumeration; always 0 for elimination.
    pub cache_hits: usize,
    /// `P(evidence)`, the sum of the unnormalised joint over the query's values.
    pub normalization_constant: f64,
}

impl InferenceResult {
    pub fn probability(&self, value: &str) -> Option<f64> {
        self.distribution.get(value).copied()
    }

    /// The value with the highest posterior probability.
    pub fn most_likely(&self) -> Option<(&str, f64)> {
        self.distribution
            .iter()
            .fold(None, |best: Option<(&str, f64)>, (value, &p)| match best {
                Some((_, q)) if q >= p => best,
                _ => Some((value.as_str(), p)),
            })
    }
}

/// `P(query | evidence)` by memoized enumeration.
pub fn infer(
    network: &BayesianNetwork,
    query: &str,
    evidence: &BTreeMap<String, String>,
) -> Result<InferenceResult> {
    infer_with(network, query, evidence, InferenceMethod::Enumeration)
}

/// `P(query | evidence)` with an explicit algorithm choice.
pub fn infer_with(
    network: &BayesianNetwork,
    query: &str,
    evidence: &BTreeMap<String, String>,
    method: InferenceMethod,
) -> Result<InferenceResult> {
    network.ensure_valid()?;
    let query_index = network.node_index(query)?;
    if evidence.contains_key(query) {
        return Err(ProbError::QueryInEvidence(query.to_string()));
    }
    let fixed = resolve_evidence(network, evidence)?;

    let (joint, cache_hits) = match method {
        InferenceMethod::Enumeration => enumerate_query(network, query_index, &fixed)?,
        InferenceMethod::VariableElimination => (eliminate_query(network, query_index, &fixed)?, 0),
    };

    let total: f64 = joint.iter().sum();
    if total <= 0.0 {
        return Err(ProbError::InconsistentEvidence);
    }
    let values = &network.variable_at(query_index).values;
    let distribution = values
        .iter()
        .zip(&joint)
        .map(|(value, p)| (value.clone(), p / total))
        .collect();

    debug!(
        "P({query} | {} evidence) via {:?}: normalization {total}, {cache_hits} cache hits",
        evidence.len(),
        method
    );
    Ok(InferenceResult {
        query: query.to_string(),
        distribution,
        method,
        cache_hits,
        normalization_constant: total,
    })
}

/// Run a request-layer query document.
pub fn run_query(
    network: &BayesianNetwork,
    query: &InferenceQuery,
    method: InferenceMethod,
) -> Result<InferenceResult> {
    infer_with(network, &query.query, &query.evidence_values(), method)
}

/// Posterior of every unobserved node under the same evidence.
pub fn all_marginals(
    network: &BayesianNetwork,
    evidence: &BTreeMap<String, String>,
    method: InferenceMethod,
) -> Result<BTreeMap<String, InferenceResult>> {
    network.ensure_valid()?;
    let mut marginals = BTreeMap::new();
    for id in network.node_ids() {
        if evidence.contains_key(id) {
            continue;
        }
        marginals.insert(id.to_string(), infer_with(network, id, evidence, method)?);
    }
    Ok(marginals)
}

fn resolve_evidence(
    network: &BayesianNetwork,
    evidence: &BTreeMap<String, String>,
) -> Result<Vec<Option<usize>>> {
    let mut fixed = vec![None; network.len()];
    for (variable, value) in evidence {
        let index = network.node_index(variable)?;
        fixed[index] = Some(network.value_index(index, value)?);
    }
    Ok(fixed)
}
