use log::debug;
use std::collections::{BTreeMap, HashMap};

use super::cpt::{ConditionalTable, ParentInfo};
use crate::common::config::DEFAULT_ROW_TOLERANCE;
use crate::common::errors::{ProbError, Result};
use crate::common::spec::{FALSE_VALUE, NetworkSpec, TRUE_VALUE, canonical_value};

/// A random variable of the network.
#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    pub id: String,
    pub label: Option<String>,
    /// Finite domain, in declaration order.
    pub values: Vec<String>,
}

/// An immutable Bayesian network.
///
/// Adjacency, the topological order and the dense CPTs are derived once when
/// the network is assembled. Structural defects found along the way are kept
/// and reported by [`BayesianNetwork::validate`]; inference refuses to run
/// while any are present.
#[derive(Debug, Clone)]
pub struct BayesianNetwork {
    variables: Vec<Variable>,
    index: HashMap<String, usize>,
    edges: Vec<(String, String)>,
    /// Parent indices, sorted by parent id.
    parents: Vec<Vec<usize>>,
    /// Child indices, in edge declaration order.
    children: Vec<Vec<usize>>,
    tables: Vec<Option<ConditionalTable>>,
    topological_order: Option<Vec<usize>>,
    defects: Vec<ProbError>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    OnStack,
    Done,
}

impl BayesianNetwork {
    /// Build and validate a network, failing on the first defect found.
    pub fn from_spec(spec: &NetworkSpec) -> Result<Self> {
        Self::from_spec_with_tolerance(spec, DEFAULT_ROW_TOLERANCE)
    }

    pub fn from_spec_with_tolerance(spec: &NetworkSpec, tolerance: f64) -> Result<Self> {
        let network = Self::assemble(spec, tolerance);
        network.ensure_valid()?;
        Ok(network)
    }

    /// Build a network without rejecting it. Every defect is recorded and
    /// available through [`validate`](Self::validate).
    pub fn assemble(spec: &NetworkSpec, tolerance: f64) -> Self {
        let mut defects = Vec::new();
        let mut variables: Vec<Variable> = Vec::with_capacity(spec.nodes.len());
        let mut index = HashMap::new();

        for node in &spec.nodes {
            if index.contains_key(&node.id) {
                defects.push(ProbError::DuplicateNode(node.id.clone()));
                continue;
            }
            let values = match &node.values {
                Some(values) => {
                    let values: Vec<String> = values.iter().map(|v| v.as_value()).collect();
                    if values.is_empty() {
                        defects.push(ProbError::Empty(format!("domain of '{}'", node.id)));
                    }
                    for (i, v) in values.iter().enumerate() {
                        if values[..i].contains(v) {
                            defects.push(ProbError::InvalidParameter(format!(
                                "value '{v}' appears twice in the domain of '{}'",
                                node.id
                            )));
                        }
                    }
                    values
                }
                None => vec![TRUE_VALUE.to_string(), FALSE_VALUE.to_string()],
            };
            index.insert(node.id.clone(), variables.len());
            variables.push(Variable {
                id: node.id.clone(),
                label: node.label.clone(),
                values,
            });
        }

        let n = variables.len();
        let mut parents = vec![Vec::new(); n];
        let mut children = vec![Vec::new(); n];
        let mut edges = Vec::with_capacity(spec.edges.len());
        for edge in &spec.edges {
            let (from, to) = match (index.get(&edge.from), index.get(&edge.to)) {
                (Some(&from), Some(&to)) => (from, to),
                (from, _) => {
                    let missing = if from.is_none() { &edge.from } else { &edge.to };
                    defects.push(ProbError::DanglingEdge {
                        from: edge.from.clone(),
                        to: edge.to.clone(),
                        missing: missing.clone(),
                    });
                    continue;
                }
            };
            if parents[to].contains(&from) {
                continue;
            }
            parents[to].push(from);
            children[from].push(to);
            edges.push((edge.from.clone(), edge.to.clone()));
        }
        for list in parents.iter_mut() {
            list.sort_by(|&a, &b| variables[a].id.cmp(&variables[b].id));
        }

        for id in spec.cpt.keys() {
            if !index.contains_key(id) {
                defects.push(ProbError::UnknownNode(id.clone()));
            }
        }

        let mut tables = Vec::with_capacity(n);
        for (i, variable) in variables.iter().enumerate() {
            let Some(cpt) = spec.cpt.get(&variable.id) else {
                defects.push(ProbError::MissingCpt(variable.id.clone()));
                tables.push(None);
                continue;
            };
            let infos: Vec<ParentInfo<'_>> = parents[i]
                .iter()
                .map(|&p| ParentInfo {
                    index: p,
                    id: &variables[p].id,
                    values: &variables[p].values,
                })
                .collect();
            match ConditionalTable::build(&variable.id, &variable.values, &infos, cpt, tolerance) {
                Ok(table) => tables.push(Some(table)),
                Err(errors) => {
                    defects.extend(errors);
                    tables.push(None);
                }
            }
        }

        let mut network = BayesianNetwork {
            variables,
            index,
            edges,
            parents,
            children,
            tables,
            topological_order: None,
            defects,
        };

        match network.find_cycle() {
            Some(path) => network.defects.push(ProbError::CycleDetected { path }),
            None => network.topological_order = Some(network.compute_topological_order()),
        }

        debug!(
            "assembled network: {} nodes, {} edges, {} defects",
            network.variables.len(),
            network.edges.len(),
            network.defects.len()
        );
        network
    }

    /// Depth-first search with an on-stack marker. Returns the offending cycle
    /// as a closed path of node ids.
    fn find_cycle(&self) -> Option<Vec<String>> {
        let n = self.variables.len();
        let mut marks = vec![Mark::Unvisited; n];
        for root in 0..n {
            if marks[root] != Mark::Unvisited {
                continue;
            }
            // (node, next child position)
            let mut stack: Vec<(usize, usize)> = vec![(root, 0)];
            marks[root] = Mark::OnStack;
            while let Some(top) = stack.last_mut() {
                let (node, next) = *top;
                top.1 += 1;
                if let Some(&child) = self.children[node].get(next) {
                    match marks[child] {
                        Mark::Unvisited => {
                            marks[child] = Mark::OnStack;
                            stack.push((child, 0));
                        }
                        Mark::OnStack => {
                            let start = stack.iter().position(|&(v, _)| v == child).unwrap_or(0);
                            let mut path: Vec<String> = stack[start..]
                                .iter()
                                .map(|&(v, _)| self.variables[v].id.clone())
                                .collect();
                            path.push(self.variables[child].id.clone());
                            return Some(path);
                        }
                        Mark::Done => {}
                    }
                } else {
                    marks[node] = Mark::Done;
                    stack.pop();
                }
            }
        }
        None
    }

    /// Reverse post-order of a DFS along child edges. Only meaningful on an
    /// acyclic graph.
    fn compute_topological_order(&self) -> Vec<usize> {
        let n = self.variables.len();
        let mut visited = vec![false; n];
        let mut post_order = Vec::with_capacity(n);
        for root in 0..n {
            if visited[root] {
                continue;
            }
            visited[root] = true;
            let mut stack: Vec<(usize, usize)> = vec![(root, 0)];
            while let Some(top) = stack.last_mut() {
                let (node, next) = *top;
                top.1 += 1;
                if let Some(&child) = self.children[node].get(next) {
                    if !visited[child] {
                        visited[child] = true;
                        stack.push((child, 0));
                    }
                } else {
                    post_order.push(node);
                    stack.pop();
                }
            }
        }
        post_order.reverse();
        post_order
    }

    /// Every structural or normalization defect, empty for a usable network.
    pub fn validate(&self) -> Vec<ProbError> {
        self.defects.clone()
    }

    pub fn is_valid(&self) -> bool {
        self.defects.is_empty()
    }

    /// Fails with the first defect, if any.
    pub fn ensure_valid(&self) -> Result<()> {
        match self.defects.first() {
            Some(defect) => Err(defect.clone()),
            None => Ok(()),
        }
    }

    pub fn len(&self) -> usize {
        self.variables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn node_ids(&self) -> Vec<&str> {
        self.variables.iter().map(|v| v.id.as_str()).collect()
    }

    pub fn edges(&self) -> &[(String, String)] {
        &self.edges
    }

    pub fn variable(&self, id: &str) -> Result<&Variable> {
        Ok(&self.variables[self.node_index(id)?])
    }

    pub fn label(&self, id: &str) -> Result<Option<&str>> {
        Ok(self.variable(id)?.label.as_deref())
    }

    pub fn parents(&self, id: &str) -> Result<Vec<&str>> {
        let i = self.node_index(id)?;
        Ok(self.parents[i].iter().map(|&p| self.variables[p].id.as_str()).collect())
    }

    pub fn children(&self, id: &str) -> Result<Vec<&str>> {
        let i = self.node_index(id)?;
        Ok(self.children[i].iter().map(|&c| self.variables[c].id.as_str()).collect())
    }

    pub fn is_root(&self, id: &str) -> Result<bool> {
        Ok(self.parents[self.node_index(id)?].is_empty())
    }

    /// The domain of a node; `{True, False}` unless declared otherwise.
    pub fn values(&self, id: &str) -> Result<&[String]> {
        Ok(&self.variable(id)?.values)
    }

    pub fn cpt(&self, id: &str) -> Result<&ConditionalTable> {
        let i = self.node_index(id)?;
        self.tables[i]
            .as_ref()
            .ok_or_else(|| ProbError::MissingCpt(id.to_string()))
    }

    /// All node ids, each after its parents.
    pub fn topological_order(&self) -> Result<Vec<&str>> {
        Ok(self
            .topological_indices()?
            .iter()
            .map(|&i| self.variables[i].id.as_str())
            .collect())
    }

    /// `P(node = value | parents)` for an assignment covering at least the
    /// node's parents.
    pub fn probability(
        &self,
        id: &str,
        value: &str,
        assignment: &HashMap<String, String>,
    ) -> Result<f64> {
        self.cpt(id)?.probability_of(value, assignment)
    }

    /// Probability of a complete assignment: the product of every node's CPT
    /// entry.
    pub fn joint_probability(&self, assignment: &BTreeMap<String, String>) -> Result<f64> {
        self.ensure_valid()?;
        let mut indices = vec![0; self.variables.len()];
        for (i, variable) in self.variables.iter().enumerate() {
            let value = assignment
                .get(&variable.id)
                .ok_or_else(|| ProbError::InvalidParameter(format!(
                    "joint assignment has no value for '{}'",
                    variable.id
                )))?;
            indices[i] = self.value_index(i, value)?;
        }
        for id in assignment.keys() {
            self.node_index(id)?;
        }
        let mut product = 1.0;
        for (i, table) in self.tables.iter().enumerate() {
            if let Some(table) = table {
                product *= table.probability(indices[i], |p| indices[p]);
            }
        }
        Ok(product)
    }

    pub(crate) fn node_index(&self, id: &str) -> Result<usize> {
        self.index
            .get(id)
            .copied()
            .ok_or_else(|| ProbError::UnknownNode(id.to_string()))
    }

    pub(crate) fn value_index(&self, node: usize, value: &str) -> Result<usize> {
        let variable = &self.variables[node];
        let value = canonical_value(value);
        variable
            .values
            .iter()
            .position(|v| *v == value)
            .ok_or_else(|| ProbError::ValueOutOfDomain {
                variable: variable.id.clone(),
                value,
            })
    }

    pub(crate) fn topological_indices(&self) -> Result<&[usize]> {
        match &self.topological_order {
            Some(order) => Ok(order),
            None => Err(self
                .defects
                .iter()
                .find(|d| matches!(d, ProbError::CycleDetected { .. }))
                .cloned()
                .unwrap_or_else(|| ProbError::CycleDetected { path: Vec::new() })),
        }
    }

    pub(crate) fn variable_at(&self, i: usize) -> &Variable {
        &self.variables[i]
    }

    pub(crate) fn cardinality(&self, i: usize) -> usize {
        self.variables[i].values.len()
    }

    pub(crate) fn parent_indices(&self, i: usize) -> &[usize] {
        &self.parents[i]
    }

    /// Only called after `ensure_valid`, when every table is present.
    pub(crate) fn table_at(&self, i: usize) -> Result<&ConditionalTable> {
        self.tables[i]
            .as_ref()
            .ok_or_else(|| ProbError::MissingCpt(self.variables[i].id.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::spec::{CptSpec, EdgeSpec, NodeSpec};

    fn sprinkler_spec() -> NetworkSpec {
        serde_json::from_str(
            r#"{
                "nodes": [
                    {"id": "Cloudy"}, {"id": "Sprinkler"}, {"id": "Rain"}, {"id": "WetGrass"}
                ],
                "edges": [
                    {"from": "Cloudy", "to": "Sprinkler"},
                    {"from": "Cloudy", "to": "Rain"},
                    {"from": "Sprinkler", "to": "WetGrass"},
                    {"from": "Rain", "to": "WetGrass"}
                ],
                "cpt": {
                    "Cloudy": {"True": 0.5, "False": 0.5},
                    "Sprinkler": {"Cloudy=True": 0.1, "Cloudy=False": 0.5},
                    "Rain": {"Cloudy=True": 0.8, "Cloudy=False": 0.2},
                    "WetGrass": {
                        "Rain=True,Sprinkler=True": 0.99,
                        "Rain=False,Sprinkler=True": 0.9,
                        "{\"Rain\": true, \"Sprinkler\": false}": 0.9,
                        "Sprinkler=False|Rain=False": 0.0
                    }
                }
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn test_structure_queries() {
        let net = BayesianNetwork::from_spec(&sprinkler_spec()).unwrap();
        assert_eq!(net.len(), 4);
        assert_eq!(net.parents("WetGrass").unwrap(), vec!["Rain", "Sprinkler"]);
        assert_eq!(net.children("Cloudy").unwrap(), vec!["Sprinkler", "Rain"]);
        assert!(net.is_root("Cloudy").unwrap());
        assert_eq!(net.values("Rain").unwrap(), &["True".to_string(), "False".to_string()]);
        assert_eq!(net.cpt("WetGrass").unwrap().row_count(), 4);
        assert!(matches!(net.parents("Nope"), Err(ProbError::UnknownNode(_))));
    }

    #[test]
    fn test_topological_order_respects_edges() {
        let net = BayesianNetwork::from_spec(&sprinkler_spec()).unwrap();
        let order = net.topological_order().unwrap();
        assert_eq!(order.len(), 4);
        let pos = |id: &str| order.iter().position(|n| *n == id).unwrap();
        for (from, to) in net.edges() {
            assert!(pos(from) < pos(to), "{from} must precede {to}");
        }
        assert_eq!(order[0], "Cloudy");
    }

    #[test]
    fn test_cycle_detected() {
        let mut spec = sprinkler_spec();
        spec.edges.push(EdgeSpec::new("WetGrass", "Cloudy"));
        let net = BayesianNetwork::assemble(&spec, 1e-3);
        let defects = net.validate();
        assert!(defects.iter().any(|d| matches!(d, ProbError::CycleDetected { .. })));
        assert!(matches!(
            net.topological_order(),
            Err(ProbError::CycleDetected { .. })
        ));
        assert!(BayesianNetwork::from_spec(&spec).is_err());
    }

    #[test]
    fn test_missing_cpt_is_fatal() {
        let mut spec = sprinkler_spec();
        spec.cpt.remove("Rain");
        let net = BayesianNetwork::assemble(&spec, 1e-3);
        assert!(net.validate().contains(&ProbError::MissingCpt("Rain".into())));
        assert!(matches!(net.cpt("Rain"), Err(ProbError::MissingCpt(_))));
    }

    #[test]
    fn test_dangling_edge_reported() {
        let mut spec = sprinkler_spec();
        spec.edges.push(EdgeSpec::new("Ghost", "Rain"));
        let defects = BayesianNetwork::assemble(&spec, 1e-3).validate();
        assert!(defects.iter().any(|d| matches!(
            d,
            ProbError::DanglingEdge { missing, .. } if missing == "Ghost"
        )));
    }

    #[test]
    fn test_joint_probability() {
        let net = BayesianNetwork::from_spec(&sprinkler_spec()).unwrap();
        let assignment: BTreeMap<String, String> = [
            ("Cloudy", "True"),
            ("Sprinkler", "False"),
            ("Rain", "True"),
            ("WetGrass", "True"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        let expected = 0.5 * 0.9 * 0.8 * 0.9;
        assert!((net.joint_probability(&assignment).unwrap() - expected).abs() < 1e-12);
    }

    #[test]
    fn test_multi_valued_domain() {
        let spec = NetworkSpec {
            nodes: vec![NodeSpec {
                id: "Weather".into(),
                label: Some("Weather today".into()),
                values: Some(vec!["sun".into(), "rain".into(), "snow".into()]),
            }],
            edges: vec![],
            cpt: [(
                "Weather".to_string(),
                serde_json::from_str::<CptSpec>(r#"{"sun": 0.6, "rain": 0.3, "snow": 0.1}"#)
                    .unwrap(),
            )]
            .into_iter()
            .collect(),
        };
        let net = BayesianNetwork::from_spec(&spec).unwrap();
        assert_eq!(net.label("Weather").unwrap(), Some("Weather today"));
        let probability = net.probability("Weather", "rain", &HashMap::new()).unwrap();
        assert!((probability - 0.3).abs() < 1e-12);
    }
}
