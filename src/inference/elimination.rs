use log::{debug, trace};

use crate::common::errors::Result;
use crate::graph::network::BayesianNetwork;

/// A partial joint table over a set of variables.
///
/// `variables` are node indices in ascending order; `values` is laid out
/// row-major with the last variable varying fastest.
#[derive(Debug, Clone, PartialEq)]
pub struct Factor {
    variables: Vec<usize>,
    cardinalities: Vec<usize>,
    values: Vec<f64>,
}

fn strides(cardinalities: &[usize]) -> Vec<usize> {
    let mut strides = vec![1; cardinalities.len()];
    for i in (0..cardinalities.len().saturating_sub(1)).rev() {
        strides[i] = strides[i + 1] * cardinalities[i + 1];
    }
    strides
}

/// Advance a mixed-radix counter; returns false once it wraps around.
fn advance(counter: &mut [usize], cardinalities: &[usize]) -> bool {
    for i in (0..counter.len()).rev() {
        counter[i] += 1;
        if counter[i] < cardinalities[i] {
            return true;
        }
        counter[i] = 0;
    }
    false
}

impl Factor {
    /// A factor with no variables holding a single value.
    pub fn constant(value: f64) -> Self {
        Factor {
            variables: Vec::new(),
            cardinalities: Vec::new(),
            values: vec![value],
        }
    }

    /// The CPT of `node` restricted to the evidence. Observed variables are
    /// dropped from the scope.
    pub fn from_cpt(
        network: &BayesianNetwork,
        node: usize,
        evidence: &[Option<usize>],
    ) -> Result<Self> {
        let table = network.table_at(node)?;
        let mut scope: Vec<usize> = std::iter::once(node)
            .chain(table.parent_indices().iter().copied())
            .filter(|&v| evidence[v].is_none())
            .collect();
        scope.sort_unstable();
        let cardinalities: Vec<usize> = scope.iter().map(|&v| network.cardinality(v)).collect();
        let size: usize = cardinalities.iter().product();

        let mut assignment: Vec<usize> = evidence.iter().map(|v| v.unwrap_or(0)).collect();
        let mut counter = vec![0; scope.len()];
        let mut values = Vec::with_capacity(size);
        loop {
            for (slot, &var) in counter.iter().zip(&scope) {
                assignment[var] = *slot;
            }
            values.push(table.probability(assignment[node], |p| assignment[p]));
            if !advance(&mut counter, &cardinalities) {
                break;
            }
        }

        Ok(Factor {
            variables: scope,
            cardinalities,
            values,
        })
    }

    pub fn variables(&self) -> &[usize] {
        &self.variables
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn contains(&self, variable: usize) -> bool {
        self.variables.binary_search(&variable).is_ok()
    }

    /// Pointwise product over the union of both scopes.
    pub fn multiply(&self, other: &Factor) -> Factor {
        let mut variables: Vec<usize> = self.variables.clone();
        let mut cardinalities: Vec<usize> = self.cardinalities.clone();
        for (&v, &c) in other.variables.iter().zip(&other.cardinalities) {
            if let Err(pos) = variables.binary_search(&v) {
                variables.insert(pos, v);
                cardinalities.insert(pos, c);
            }
        }

        // Stride of each union variable inside each operand (0 when absent).
        let project = |factor: &Factor| -> Vec<usize> {
            let own = strides(&factor.cardinalities);
            variables
                .iter()
                .map(|v| match factor.variables.binary_search(v) {
                    Ok(i) => own[i],
                    Err(_) => 0,
                })
                .collect()
        };
        let left = project(self);
        let right = project(other);

        let size: usize = cardinalities.iter().product();
        let mut values = Vec::with_capacity(size);
        let mut counter = vec![0; variables.len()];
        loop {
            let (mut i, mut j) = (0, 0);
            for (k, &slot) in counter.iter().enumerate() {
                i += slot * left[k];
                j += slot * right[k];
            }
            values.push(self.values[i] * other.values[j]);
            if !advance(&mut counter, &cardinalities) {
                break;
            }
        }

        Factor {
            variables,
            cardinalities,
            values,
        }
    }

    /// Marginalise `variable` out of the factor. A factor that does not
    /// mention it is returned unchanged.
    pub fn sum_out(&self, variable: usize) -> Factor {
        let Ok(pos) = self.variables.binary_search(&variable) else {
            return self.clone();
        };
        let mut variables = self.variables.clone();
        let mut cardinalities = self.cardinalities.clone();
        variables.remove(pos);
        cardinalities.remove(pos);

        let reduced = strides(&cardinalities);
        let mut values = vec![0.0; cardinalities.iter().product()];
        let mut counter = vec![0; self.variables.len()];
        for &value in &self.values {
            let mut target = 0;
            let mut r = 0;
            for (k, &slot) in counter.iter().enumerate() {
                if k == pos {
                    continue;
                }
                target += slot * reduced[r];
                r += 1;
            }
            values[target] += value;
            advance(&mut counter, &self.cardinalities);
        }

        Factor {
            variables,
            cardinalities,
            values,
        }
    }
}

/// Unnormalised `P(query = v, evidence)` for every value `v`, computed by
/// eliminating hidden variables leaves-first along the reversed topological
/// order.
pub(crate) fn eliminate_query(
    network: &BayesianNetwork,
    query: usize,
    evidence: &[Option<usize>],
) -> Result<Vec<f64>> {
    let order = network.topological_indices()?;
    let mut factors = Vec::with_capacity(order.len());
    for node in 0..network.len() {
        factors.push(Factor::from_cpt(network, node, evidence)?);
    }

    let mut largest = factors.iter().map(Factor::len).max().unwrap_or(0);
    for &variable in order.iter().rev() {
        if variable == query || evidence[variable].is_some() {
            continue;
        }
        let (involved, rest): (Vec<Factor>, Vec<Factor>) =
            factors.into_iter().partition(|f| f.contains(variable));
        factors = rest;
        if involved.is_empty() {
            continue;
        }
        let product = involved
            .iter()
            .skip(1)
            .fold(involved[0].clone(), |acc, f| acc.multiply(f));
        largest = largest.max(product.len());
        let summed = product.sum_out(variable);
        trace!(
            "eliminated '{}' -> factor over {:?}",
            network.variable_at(variable).id,
            summed.variables()
        );
        factors.push(summed);
    }

    let result = factors
        .iter()
        .fold(Factor::constant(1.0), |acc, f| acc.multiply(f));
    debug!("variable elimination: largest intermediate factor {largest}");

    // Every other free variable has been summed out and evidence was never in
    // scope, so only the query remains.
    debug_assert_eq!(result.variables(), &[query]);
    Ok(result.values().to_vec())
}
