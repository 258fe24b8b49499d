use log::{debug, trace};
use ndarray::{Array1, Array2, Axis};
use serde::Serialize;

use super::model::HiddenMarkovModel;
use crate::common::errors::{ProbError, Result};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForwardResult {
    /// `P(O | model)`
    pub likelihood: f64,
    /// `alpha[[t, i]] = P(o_0..o_t, q_t = i)`
    #[serde(skip)]
    pub alpha: Array2<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ViterbiResult {
    pub path: Vec<String>,
    pub probability: f64,
    pub log_probability: f64,
}

/// Forward and backward variables rescaled so each `alpha` row sums to one.
/// `scales[t]` is the factor divided out at step `t`, so the
/// log-likelihood is `sum_t ln scales[t]`.
pub(crate) struct ScaledPasses {
    pub alpha: Array2<f64>,
    pub beta: Array2<f64>,
    pub scales: Array1<f64>,
}

impl ScaledPasses {
    pub fn log_likelihood(&self) -> f64 {
        self.scales.iter().map(|c| c.ln()).sum()
    }

    /// `gamma[[t, i]] = P(q_t = i | O)`, normalised per time step.
    pub fn gamma(&self) -> Array2<f64> {
        let mut gamma = &self.alpha * &self.beta;
        for mut row in gamma.axis_iter_mut(Axis(0)) {
            let total = row.sum();
            if total > 0.0 {
                row /= total;
            }
        }
        gamma
    }
}

impl HiddenMarkovModel {
    /// Forward algorithm on an observation sequence.
    pub fn forward<S: AsRef<str>>(&self, observations: &[S]) -> Result<ForwardResult> {
        let encoded = self.encode_observations(observations)?;
        let alpha = self.forward_table(&encoded);
        let likelihood = alpha.row(encoded.len() - 1).sum();
        debug!("forward: T = {}, likelihood {likelihood:e}", encoded.len());
        Ok(ForwardResult { likelihood, alpha })
    }

    /// `beta[[t, i]] = P(o_{t+1}..o_{T-1} | q_t = i)`, with `beta[T-1] = 1`.
    pub fn backward<S: AsRef<str>>(&self, observations: &[S]) -> Result<Array2<f64>> {
        let encoded = self.encode_observations(observations)?;
        Ok(self.backward_table(&encoded))
    }

    /// `ln P(O | model)` from the scaled forward pass, safe for long
    /// sequences. Negative infinity when the sequence is impossible.
    pub fn log_likelihood<S: AsRef<str>>(&self, observations: &[S]) -> Result<f64> {
        let encoded = self.encode_observations(observations)?;
        match self.scaled_passes(&encoded) {
            Ok(passes) => Ok(passes.log_likelihood()),
            Err(ProbError::InconsistentEvidence) => Ok(f64::NEG_INFINITY),
            Err(e) => Err(e),
        }
    }

    /// Posterior state marginals `P(q_t = i | O)`, one row per time step.
    pub fn posterior_marginals<S: AsRef<str>>(&self, observations: &[S]) -> Result<Array2<f64>> {
        let encoded = self.encode_observations(observations)?;
        Ok(self.scaled_passes(&encoded)?.gamma())
    }

    /// Most likely hidden path. Runs in log space; ties go to the lowest
    /// state index.
    pub fn viterbi<S: AsRef<str>>(&self, observations: &[S]) -> Result<ViterbiResult> {
        let obs = self.encode_observations(observations)?;
        let n = self.state_count();
        let steps = obs.len();
        let log_a = self.transitions.mapv(f64::ln);
        let log_b = self.emissions.mapv(f64::ln);

        let mut delta = Array2::<f64>::from_elem((steps, n), f64::NEG_INFINITY);
        let mut psi = Array2::<usize>::zeros((steps, n));
        for i in 0..n {
            delta[[0, i]] = self.initial[i].ln() + log_b[[i, obs[0]]];
        }
        for t in 1..steps {
            for j in 0..n {
                let mut best = 0;
                let mut best_score = delta[[t - 1, 0]] + log_a[[0, j]];
                for i in 1..n {
                    let score = delta[[t - 1, i]] + log_a[[i, j]];
                    if score > best_score {
                        best = i;
                        best_score = score;
                    }
                }
                delta[[t, j]] = best_score + log_b[[j, obs[t]]];
                psi[[t, j]] = best;
            }
        }

        let last = delta.row(steps - 1);
        let mut state = 0;
        for i in 1..n {
            if last[i] > last[state] {
                state = i;
            }
        }
        let log_probability = last[state];

        let mut path = vec![0; steps];
        path[steps - 1] = state;
        for t in (1..steps).rev() {
            state = psi[[t, state]];
            path[t - 1] = state;
        }
        debug!("viterbi: T = {steps}, log probability {log_probability}");
        Ok(ViterbiResult {
            path: path.into_iter().map(|i| self.states()[i].clone()).collect(),
            probability: log_probability.exp(),
            log_probability,
        })
    }

    pub(crate) fn forward_table(&self, obs: &[usize]) -> Array2<f64> {
        let mut alpha = Array2::<f64>::zeros((obs.len(), self.state_count()));
        let first = &self.initial * &self.emissions.column(obs[0]);
        alpha.row_mut(0).assign(&first);
        for t in 1..obs.len() {
            let next = alpha.row(t - 1).dot(&self.transitions) * self.emissions.column(obs[t]);
            alpha.row_mut(t).assign(&next);
        }
        alpha
    }

    pub(crate) fn backward_table(&self, obs: &[usize]) -> Array2<f64> {
        let steps = obs.len();
        let mut beta = Array2::<f64>::ones((steps, self.state_count()));
        for t in (0..steps.saturating_sub(1)).rev() {
            let weighted = &self.emissions.column(obs[t + 1]) * &beta.row(t + 1);
            let prev = self.transitions.dot(&weighted);
            beta.row_mut(t).assign(&prev);
        }
        beta
    }

    /// Scaled forward-backward. Fails with `InconsistentEvidence` when the
    /// sequence has zero probability under the model.
    pub(crate) fn scaled_passes(&self, obs: &[usize]) -> Result<ScaledPasses> {
        let steps = obs.len();
        let n = self.state_count();
        let mut alpha = Array2::<f64>::zeros((steps, n));
        let mut scales = Array1::<f64>::zeros(steps);

        for t in 0..steps {
            let mut row = if t == 0 {
                &self.initial * &self.emissions.column(obs[0])
            } else {
                alpha.row(t - 1).dot(&self.transitions) * self.emissions.column(obs[t])
            };
            let c = row.sum();
            if c <= 0.0 {
                trace!("scaled forward pass hit zero mass at t = {t}");
                return Err(ProbError::InconsistentEvidence);
            }
            row /= c;
            scales[t] = c;
            alpha.row_mut(t).assign(&row);
        }

        let mut beta = Array2::<f64>::ones((steps, n));
        for t in (0..steps.saturating_sub(1)).rev() {
            let weighted = &self.emissions.column(obs[t + 1]) * &beta.row(t + 1);
            let prev = self.transitions.dot(&weighted) / scales[t + 1];
            beta.row_mut(t).assign(&prev);
        }

        Ok(ScaledPasses { alpha, beta, scales })
    }
}
