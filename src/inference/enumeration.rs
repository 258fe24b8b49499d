use log::{debug, trace};
use std::collections::HashMap;

use crate::common::errors::Result;
use crate::graph::cpt::ConditionalTable;
use crate::graph::network::BayesianNetwork;

/// Memo key: a depth into the topological order plus the values of the
/// already-assigned nodes that still have children at or below that depth.
/// Nothing else can influence the sum over the remaining variables.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct MemoKey {
    depth: usize,
    frontier_values: Vec<usize>,
}

/// One pending summation over the variable at `depth`.
struct Frame {
    depth: usize,
    key: MemoKey,
    candidates: Vec<usize>,
    next: usize,
    /// CPT factor of the value currently being expanded below this frame.
    pending: f64,
    acc: f64,
}

/// Enumeration over a fixed topological order with a memo table, run as an
/// explicit stack machine so deep networks never touch the call stack.
pub(crate) struct Enumerator<'a> {
    order: &'a [usize],
    tables: Vec<&'a ConditionalTable>,
    cardinalities: Vec<usize>,
    frontier: Vec<Vec<usize>>,
    memo: HashMap<MemoKey, f64>,
    pub cache_hits: usize,
    pub memo_entries: usize,
}

impl<'a> Enumerator<'a> {
    pub fn new(network: &'a BayesianNetwork) -> Result<Self> {
        let order = network.topological_indices()?;
        let n = order.len();
        let mut tables = Vec::with_capacity(n);
        let mut cardinalities = Vec::with_capacity(n);
        for i in 0..n {
            tables.push(network.table_at(i)?);
            cardinalities.push(network.cardinality(i));
        }

        let mut position = vec![0; n];
        for (p, &node) in order.iter().enumerate() {
            position[node] = p;
        }
        // Latest position at which each node is still needed as a parent.
        let mut last_use = vec![None; n];
        for child in 0..n {
            for &parent in network.parent_indices(child) {
                let p = position[child];
                last_use[parent] = Some(last_use[parent].map_or(p, |q: usize| q.max(p)));
            }
        }
        let frontier = (0..=n)
            .map(|depth| {
                order[..depth]
                    .iter()
                    .copied()
                    .filter(|&node| last_use[node].is_some_and(|p| p >= depth))
                    .collect()
            })
            .collect();

        Ok(Enumerator {
            order,
            tables,
            cardinalities,
            frontier,
            memo: HashMap::new(),
            cache_hits: 0,
            memo_entries: 0,
        })
    }

    fn key(&self, depth: usize, assignment: &[usize]) -> MemoKey {
        MemoKey {
            depth,
            frontier_values: self.frontier[depth].iter().map(|&n| assignment[n]).collect(),
        }
    }

    fn candidates(&self, depth: usize, fixed: &[Option<usize>]) -> Vec<usize> {
        let node = self.order[depth];
        match fixed[node] {
            Some(value) => vec![value],
            None => (0..self.cardinalities[node]).collect(),
        }
    }

    /// Joint probability of the `fixed` values, summing out every free
    /// variable. `fixed` is indexed by node.
    pub fn joint(&mut self, fixed: &[Option<usize>]) -> f64 {
        // Fixed values further down the order are not part of the key, so
        // entries are only valid for one set of fixed values.
        self.memo.clear();
        let n = self.order.len();
        if n == 0 {
            return 1.0;
        }
        let mut assignment: Vec<usize> = fixed.iter().map(|v| v.unwrap_or(0)).collect();

        let mut stack = vec![Frame {
            depth: 0,
            key: self.key(0, &assignment),
            candidates: self.candidates(0, fixed),
            next: 0,
            pending: 0.0,
            acc: 0.0,
        }];

        while let Some(frame) = stack.last_mut() {
            if frame.next < frame.candidates.len() {
                let value = frame.candidates[frame.next];
                frame.next += 1;
                let node = self.order[frame.depth];
                assignment[node] = value;
                let p = self.tables[node].probability(value, |q| assignment[q]);
                if p == 0.0 {
                    continue;
                }
                let depth = frame.depth + 1;
                if depth == n {
                    frame.acc += p;
                    continue;
                }
                let key = self.key(depth, &assignment);
                if let Some(&cached) = self.memo.get(&key) {
                    self.cache_hits += 1;
                    frame.acc += p * cached;
                    continue;
                }
                frame.pending = p;
                let child = Frame {
                    depth,
                    key,
                    candidates: self.candidates(depth, fixed),
                    next: 0,
                    pending: 0.0,
                    acc: 0.0,
                };
                stack.push(child);
            } else if let Some(done) = stack.pop() {
                trace!("memo depth {} -> {}", done.depth, done.acc);
                self.memo.insert(done.key, done.acc);
                self.memo_entries += 1;
                match stack.last_mut() {
                    Some(parent) => parent.acc += parent.pending * done.acc,
                    None => return done.acc,
                }
            }
        }
        0.0
    }
}

/// Unnormalised `P(query = v, evidence)` for every value `v` of the query.
pub(crate) fn enumerate_query(
    network: &BayesianNetwork,
    query: usize,
    evidence: &[Option<usize>],
) -> Result<(Vec<f64>, usize)> {
    let mut enumerator = Enumerator::new(network)?;
    let mut fixed = evidence.to_vec();
    let mut joint = Vec::with_capacity(network.cardinality(query));
    for value in 0..network.cardinality(query) {
        fixed[query] = Some(value);
        joint.push(enumerator.joint(&fixed));
    }
    debug!(
        "enumeration: {} memo entries, {} cache hits",
        enumerator.memo_entries, enumerator.cache_hits
    );
    Ok((joint, enumerator.cache_hits))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::spec::NetworkSpec;

    fn chain(len: usize) -> BayesianNetwork {
        let mut nodes = Vec::new();
        let mut edges = Vec::new();
        let mut cpt = serde_json::Map::new();
        for i in 0..len {
            nodes.push(serde_json::json!({"id": format!("X{i}")}));
            if i == 0 {
                cpt.insert("X0".into(), serde_json::json!(0.3));
            } else {
                edges.push(serde_json::json!({
                    "from": format!("X{}", i - 1),
                    "to": format!("X{i}")
                }));
                let parent = format!("X{}", i - 1);
                let mut rows = serde_json::Map::new();
                rows.insert(format!("{parent}=True"), serde_json::json!(0.7));
                rows.insert(format!("{parent}=False"), serde_json::json!(0.2));
                cpt.insert(format!("X{i}"), serde_json::Value::Object(rows));
            }
        }
        let spec: NetworkSpec =
            serde_json::from_value(serde_json::json!({"nodes": nodes, "edges": edges, "cpt": cpt}))
                .unwrap();
        BayesianNetwork::from_spec(&spec).unwrap()
    }

    #[test]
    fn test_no_evidence_sums_to_one() {
        let net = chain(5);
        let mut enumerator = Enumerator::new(&net).unwrap();
        let total = enumerator.joint(&vec![None; 5]);
        assert!((total - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_memo_hits_on_chain() {
        let net = chain(12);
        let mut evidence = vec![None; 12];
        evidence[11] = Some(0);
        let (joint, hits) = enumerate_query(&net, 0, &evidence).unwrap();
        assert_eq!(joint.len(), 2);
        assert!(hits > 0);
        let total: f64 = joint.iter().sum();
        assert!(total > 0.0 && total < 1.0);
    }

    #[test]
    fn test_root_marginal() {
        let net = chain(3);
        let (joint, _) = enumerate_query(&net, 0, &vec![None; 3]).unwrap();
        assert!((joint[0] - 0.3).abs() < 1e-12);
        assert!((joint[1] - 0.7).abs() < 1e-12);
    }
}
