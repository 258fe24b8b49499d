use log::trace;
use ndarray::{Array1, Array2};
use rand::Rng;
use serde::Serialize;
use std::collections::HashMap;

use crate::common::config::DEFAULT_ROW_TOLERANCE;
use crate::common::errors::{ProbError, Result, check_distribution};
use crate::common::spec::{HmmSpec, MatrixSpec, VectorSpec};
use crate::markov::chain::sample_index;

/// A discrete hidden Markov model `(A, B, pi)`.
#[derive(Debug, Clone, PartialEq)]
pub struct HiddenMarkovModel {
    states: Vec<String>,
    symbols: Vec<String>,
    state_index: HashMap<String, usize>,
    symbol_index: HashMap<String, usize>,
    /// `A[[i, j]] = P(q_{t+1} = j | q_t = i)`
    pub(crate) transitions: Array2<f64>,
    /// `B[[i, k]] = P(o_t = k | q_t = i)`
    pub(crate) emissions: Array2<f64>,
    pub(crate) initial: Array1<f64>,
}

/// A hidden path together with the symbols it emitted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SampledSequence {
    pub states: Vec<String>,
    pub observations: Vec<String>,
}

fn index_of(names: &[String], what: &str) -> Result<HashMap<String, usize>> {
    let mut index = HashMap::with_capacity(names.len());
    for (i, name) in names.iter().enumerate() {
        if index.insert(name.clone(), i).is_some() {
            return Err(ProbError::InvalidParameter(format!("duplicate {what} '{name}'")));
        }
    }
    Ok(index)
}

fn dense_matrix(
    what: &str,
    data: &[Vec<f64>],
    rows: &[String],
    cols: usize,
    tolerance: f64,
) -> Result<Array2<f64>> {
    if data.len() != rows.len() {
        return Err(ProbError::DimensionMismatch {
            what: format!("{what} rows"),
            expected: rows.len(),
            found: data.len(),
        });
    }
    for (row, name) in data.iter().zip(rows) {
        if row.len() != cols {
            return Err(ProbError::DimensionMismatch {
                what: format!("{what} row of '{name}'"),
                expected: cols,
                found: row.len(),
            });
        }
        check_distribution(&format!("{what} row of '{name}'"), row, tolerance)?;
    }
    Ok(Array2::from_shape_fn((rows.len(), cols), |(i, j)| data[i][j]))
}

impl HiddenMarkovModel {
    pub fn new(
        states: Vec<String>,
        symbols: Vec<String>,
        transitions: Vec<Vec<f64>>,
        emissions: Vec<Vec<f64>>,
        initial: Vec<f64>,
        tolerance: f64,
    ) -> Result<Self> {
        if states.is_empty() {
            return Err(ProbError::Empty("hidden state list".into()));
        }
        if symbols.is_empty() {
            return Err(ProbError::Empty("observation symbol list".into()));
        }
        let state_index = index_of(&states, "hidden state")?;
        let symbol_index = index_of(&symbols, "observation symbol")?;

        let transitions =
            dense_matrix("transition matrix", &transitions, &states, states.len(), tolerance)?;
        let emissions =
            dense_matrix("emission matrix", &emissions, &states, symbols.len(), tolerance)?;
        if initial.len() != states.len() {
            return Err(ProbError::DimensionMismatch {
                what: "initial probabilities".into(),
                expected: states.len(),
                found: initial.len(),
            });
        }
        check_distribution("initial probabilities", &initial, tolerance)?;

        Ok(HiddenMarkovModel {
            states,
            symbols,
            state_index,
            symbol_index,
            transitions,
            emissions,
            initial: Array1::from(initial),
        })
    }

    pub fn from_spec(spec: &HmmSpec) -> Result<Self> {
        Self::from_spec_with_tolerance(spec, DEFAULT_ROW_TOLERANCE)
    }

    pub fn from_spec_with_tolerance(spec: &HmmSpec, tolerance: f64) -> Result<Self> {
        let transitions = spec.transition_matrix.to_dense(
            "transition matrix",
            &spec.hidden_states,
            &spec.hidden_states,
            ProbError::UnknownState,
            ProbError::UnknownState,
        )?;
        let emissions = spec.emission_matrix.to_dense(
            "emission matrix",
            &spec.hidden_states,
            &spec.observations,
            ProbError::UnknownState,
            ProbError::UnknownSymbol,
        )?;
        let initial = spec
            .initial_probabilities
            .to_dense("initial probabilities", &spec.hidden_states)?;
        Self::new(
            spec.hidden_states.clone(),
            spec.observations.clone(),
            transitions,
            emissions,
            initial,
            tolerance,
        )
    }

    /// The dense document form of this model, e.g. for printing re-estimated
    /// parameters.
    pub fn to_spec(&self) -> HmmSpec {
        let rows = |m: &Array2<f64>| m.outer_iter().map(|r| r.to_vec()).collect();
        HmmSpec {
            hidden_states: self.states.clone(),
            observations: self.symbols.clone(),
            transition_matrix: MatrixSpec::Dense(rows(&self.transitions)),
            emission_matrix: MatrixSpec::Dense(rows(&self.emissions)),
            initial_probabilities: VectorSpec::Dense(self.initial.to_vec()),
        }
    }

    pub fn states(&self) -> &[String] {
        &self.states
    }

    pub fn symbols(&self) -> &[String] {
        &self.symbols
    }

    pub fn state_count(&self) -> usize {
        self.states.len()
    }

    pub fn symbol_count(&self) -> usize {
        self.symbols.len()
    }

    pub fn transition_matrix(&self) -> &Array2<f64> {
        &self.transitions
    }

    pub fn emission_matrix(&self) -> &Array2<f64> {
        &self.emissions
    }

    pub fn initial_probabilities(&self) -> &Array1<f64> {
        &self.initial
    }

    pub fn state_index(&self, state: &str) -> Result<usize> {
        self.state_index
            .get(state)
            .copied()
            .ok_or_else(|| ProbError::UnknownState(state.to_string()))
    }

    pub fn symbol_index(&self, symbol: &str) -> Result<usize> {
        self.symbol_index
            .get(symbol)
            .copied()
            .ok_or_else(|| ProbError::UnknownSymbol(symbol.to_string()))
    }

    /// Map an observation sequence onto symbol indices. Fails on an empty
    /// sequence or the first unknown symbol.
    pub fn encode_observations<S: AsRef<str>>(&self, observations: &[S]) -> Result<Vec<usize>> {
        if observations.is_empty() {
            return Err(ProbError::Empty("observation sequence".into()));
        }
        observations
            .iter()
            .map(|o| self.symbol_index(o.as_ref()))
            .collect()
    }

    /// Generate `length` steps: a hidden path drawn from `pi` and `A`, and one
    /// emission per step drawn from `B`.
    pub fn sample<R: Rng>(&self, length: usize, rng: &mut R) -> Result<SampledSequence> {
        if length == 0 {
            return Err(ProbError::InvalidParameter("sample length must be at least 1".into()));
        }
        let mut states = Vec::with_capacity(length);
        let mut observations = Vec::with_capacity(length);
        let mut current = sample_index(self.initial.view(), rng);
        for t in 0..length {
            if t > 0 {
                current = sample_index(self.transitions.row(current), rng);
            }
            let symbol = sample_index(self.emissions.row(current), rng);
            states.push(self.states[current].clone());
            observations.push(self.symbols[symbol].clone());
        }
        trace!("sampled {length} HMM steps");
        Ok(SampledSequence { states, observations })
    }
}
