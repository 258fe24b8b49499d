use log::{debug, trace, warn};
use ndarray::{Array1, Array2, ArrayView1};
use rand::Rng;
use serde::Serialize;
use std::collections::HashMap;

use crate::common::config::DEFAULT_ROW_TOLERANCE;
use crate::common::errors::{ProbError, Result, check_distribution};
use crate::common::spec::ChainSpec;

/// A finite, first-order Markov chain.
#[derive(Debug, Clone, PartialEq)]
pub struct MarkovChain {
    states: Vec<String>,
    index: HashMap<String, usize>,
    /// `transitions[[i, j]] = P(next = j | current = i)`
    transitions: Array2<f64>,
    initial: Array1<f64>,
    /// Row-sum tolerance used at construction and for later input checks.
    tolerance: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StationaryResult {
    pub distribution: Vec<f64>,
    pub converged: bool,
    pub iterations: usize,
    /// Without ergodicity the result need not be unique.
    pub ergodic: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FirstPassageResult {
    /// `sum_t t * P(first arrival at step t)` over the horizon.
    pub expected_steps: f64,
    /// Probability of arriving at all within the horizon.
    pub reach_probability: f64,
    pub horizon: usize,
}

impl FirstPassageResult {
    /// Expected arrival time given that the target is reached in the horizon.
    pub fn conditional_expected_steps(&self) -> Option<f64> {
        (self.reach_probability > 0.0).then(|| self.expected_steps / self.reach_probability)
    }
}

/// Inverse-CDF draw of an index from a probability row.
pub(crate) fn sample_index<R: Rng>(row: ArrayView1<'_, f64>, rng: &mut R) -> usize {
    let u: f64 = rng.r#gen();
    let mut cumulative = 0.0;
    let mut last_positive = 0;
    for (j, &p) in row.iter().enumerate() {
        if p > 0.0 {
            last_positive = j;
        }
        cumulative += p;
        if u < cumulative {
            return j;
        }
    }
    // Row sums a hair below one; fall back to the last reachable index.
    last_positive
}

impl MarkovChain {
    /// Build a chain from dense rows. A missing initial distribution is uniform.
    pub fn new(
        states: Vec<String>,
        transitions: Vec<Vec<f64>>,
        initial: Option<Vec<f64>>,
        tolerance: f64,
    ) -> Result<Self> {
        let n = states.len();
        if n == 0 {
            return Err(ProbError::Empty("state list".into()));
        }
        let mut index = HashMap::with_capacity(n);
        for (i, state) in states.iter().enumerate() {
            if index.insert(state.clone(), i).is_some() {
                return Err(ProbError::InvalidParameter(format!("duplicate state '{state}'")));
            }
        }
        if transitions.len() != n {
            return Err(ProbError::DimensionMismatch {
                what: "transition matrix rows".into(),
                expected: n,
                found: transitions.len(),
            });
        }
        for (i, row) in transitions.iter().enumerate() {
            if row.len() != n {
                return Err(ProbError::DimensionMismatch {
                    what: format!("transition row of '{}'", states[i]),
                    expected: n,
                    found: row.len(),
                });
            }
            check_distribution(&format!("transition row of '{}'", states[i]), row, tolerance)?;
        }
        let initial = match initial {
            Some(initial) => {
                if initial.len() != n {
                    return Err(ProbError::DimensionMismatch {
                        what: "initial distribution".into(),
                        expected: n,
                        found: initial.len(),
                    });
                }
                check_distribution("initial distribution", &initial, tolerance)?;
                Array1::from(initial)
            }
            None => Array1::from_elem(n, 1.0 / n as f64),
        };

        Ok(MarkovChain {
            states,
            index,
            transitions: Array2::from_shape_fn((n, n), |(i, j)| transitions[i][j]),
            initial,
            tolerance,
        })
    }

    pub fn from_spec(spec: &ChainSpec) -> Result<Self> {
        Self::from_spec_with_tolerance(spec, DEFAULT_ROW_TOLERANCE)
    }

    pub fn from_spec_with_tolerance(spec: &ChainSpec, tolerance: f64) -> Result<Self> {
        let transitions = spec.transition_matrix.to_dense(
            "transition matrix",
            &spec.states,
            &spec.states,
            ProbError::UnknownState,
            ProbError::UnknownState,
        )?;
        let initial = spec
            .initial_distribution
            .as_ref()
            .map(|v| v.to_dense("initial distribution", &spec.states))
            .transpose()?;
        Self::new(spec.states.clone(), transitions, initial, tolerance)
    }

    pub fn states(&self) -> &[String] {
        &self.states
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn state_index(&self, state: &str) -> Result<usize> {
        self.index
            .get(state)
            .copied()
            .ok_or_else(|| ProbError::UnknownState(state.to_string()))
    }

    pub fn transition_matrix(&self) -> &Array2<f64> {
        &self.transitions
    }

    pub fn initial_distribution(&self) -> &Array1<f64> {
        &self.initial
    }

    pub fn tolerance(&self) -> f64 {
        self.tolerance
    }

    pub fn row(&self, state: &str) -> Result<ArrayView1<'_, f64>> {
        Ok(self.transitions.row(self.state_index(state)?))
    }

    pub fn transition_probability(&self, from: &str, to: &str) -> Result<f64> {
        Ok(self.transitions[[self.state_index(from)?, self.state_index(to)?]])
    }

    /// Draw the next state by inverse-CDF sampling on the current row.
    pub fn step<R: Rng>(&self, state: &str, rng: &mut R) -> Result<&str> {
        let i = self.state_index(state)?;
        Ok(&self.states[self.sample_row(i, rng)])
    }

    fn sample_row<R: Rng>(&self, i: usize, rng: &mut R) -> usize {
        sample_index(self.transitions.row(i), rng)
    }

    /// The visited states, starting with `initial` and followed by `steps`
    /// transitions.
    pub fn simulate<R: Rng>(&self, initial: &str, steps: usize, rng: &mut R) -> Result<Vec<&str>> {
        let mut current = self.state_index(initial)?;
        let mut path = Vec::with_capacity(steps + 1);
        path.push(self.states[current].as_str());
        for _ in 0..steps {
            current = self.sample_row(current, rng);
            path.push(self.states[current].as_str());
        }
        trace!("simulated {} steps from '{}'", steps, initial);
        Ok(path)
    }

    /// Apply `pi <- pi P` `steps` times.
    pub fn distribution_after(&self, initial: &[f64], steps: usize) -> Result<Vec<f64>> {
        if initial.len() != self.len() {
            return Err(ProbError::DimensionMismatch {
                what: "initial distribution".into(),
                expected: self.len(),
                found: initial.len(),
            });
        }
        check_distribution("initial distribution", initial, self.tolerance)?;
        let mut pi = Array1::from(initial.to_vec());
        for _ in 0..steps {
            pi = pi.dot(&self.transitions);
        }
        Ok(pi.to_vec())
    }

    /// The chain's own initial distribution after `steps` transitions.
    pub fn evolve(&self, steps: usize) -> Vec<f64> {
        let mut pi = self.initial.clone();
        for _ in 0..steps {
            pi = pi.dot(&self.transitions);
        }
        pi.to_vec()
    }

    /// `P^n` by repeated squaring.
    pub fn n_step_matrix(&self, mut n: usize) -> Array2<f64> {
        let mut result = Array2::<f64>::eye(self.len());
        let mut base = self.transitions.clone();
        while n > 0 {
            if n & 1 == 1 {
                result = result.dot(&base);
            }
            base = base.dot(&base);
            n >>= 1;
        }
        result
    }

    /// Power iteration from the uniform distribution until the largest
    /// per-entry change is below `tolerance`. On non-convergence the last
    /// iterate is returned with `converged: false`.
    pub fn stationary_distribution(
        &self,
        tolerance: f64,
        max_iterations: usize,
    ) -> StationaryResult {
        let ergodic = self.is_ergodic();
        if !ergodic {
            warn!(
                "stationary distribution requested for a non-ergodic chain; \
                 result may not be unique"
            );
        }

        let n = self.len();
        let mut pi = Array1::from_elem(n, 1.0 / n as f64);
        let mut iterations = 0;
        let mut converged = false;
        while iterations < max_iterations {
            let next = pi.dot(&self.transitions);
            let delta = (&next - &pi).iter().fold(0.0_f64, |m, d| m.max(d.abs()));
            pi = next;
            iterations += 1;
            if delta < tolerance {
                converged = true;
                break;
            }
        }

        if converged {
            debug!("stationary distribution converged after {iterations} iterations");
        } else {
            warn!("stationary distribution did not converge within {max_iterations} iterations");
        }
        StationaryResult {
            distribution: pi.to_vec(),
            converged,
            iterations,
            ergodic,
        }
    }

    /// Expected first-arrival time at `to` starting from `from`, summed over
    /// a horizon of `max_steps`. Only close to the true value when arrival is
    /// nearly certain within the horizon.
    pub fn first_passage_time(
        &self,
        from: &str,
        to: &str,
        max_steps: usize,
    ) -> Result<FirstPassageResult> {
        let start = self.state_index(from)?;
        let target = self.state_index(to)?;

        // Mass that has not yet visited the target.
        let mut taboo = Array1::<f64>::zeros(self.len());
        taboo[start] = 1.0;
        let mut expected_steps = 0.0;
        let mut reach_probability = 0.0;
        for t in 1..=max_steps {
            let mut next = taboo.dot(&self.transitions);
            let arrived = next[target];
            expected_steps += t as f64 * arrived;
            reach_probability += arrived;
            next[target] = 0.0;
            taboo = next;
            if taboo.sum() < 1e-15 {
                break;
            }
        }

        if reach_probability < 1.0 - 1e-6 {
            debug!(
                "first passage {from} -> {to}: only {reach_probability:.6} of the mass \
                 arrives within {max_steps} steps"
            );
        }
        Ok(FirstPassageResult {
            expected_steps,
            reach_probability,
            horizon: max_steps,
        })
    }
}
