use log::{debug, trace, warn};
use ndarray::{Array1, Array2, Axis, s};
use serde::Serialize;

use super::algorithms::ScaledPasses;
use super::model::HiddenMarkovModel;
use crate::common::config::EngineConfig;
use crate::common::errors::{Result, check_distribution};
use crate::common::spec::HmmSpec;

/// Outcome of Baum-Welch training. `model` holds the re-estimated
/// `(A', B', pi')`; the input model is left untouched.
#[derive(Debug, Clone, PartialEq)]
pub struct BaumWelchResult {
    pub model: HiddenMarkovModel,
    pub iterations: usize,
    pub converged: bool,
    /// `ln P(O | model)` before the first and after every accepted iteration.
    pub log_likelihood_history: Vec<f64>,
}

/// JSON layout: the re-estimated parameters sit beside the run summary.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BaumWelchOutput<'a> {
    #[serde(flatten)]
    parameters: HmmSpec,
    iterations: usize,
    converged: bool,
    log_likelihood_history: &'a [f64],
}

impl Serialize for BaumWelchResult {
    fn serialize<S: serde::Serializer>(
        &self,
        serializer: S,
    ) -> std::result::Result<S::Ok, S::Error> {
        BaumWelchOutput {
            parameters: self.model.to_spec(),
            iterations: self.iterations,
            converged: self.converged,
            log_likelihood_history: &self.log_likelihood_history,
        }
        .serialize(serializer)
    }
}

impl BaumWelchResult {
    pub fn transition_matrix(&self) -> &Array2<f64> {
        self.model.transition_matrix()
    }

    pub fn emission_matrix(&self) -> &Array2<f64> {
        self.model.emission_matrix()
    }

    pub fn initial_probabilities(&self) -> &Array1<f64> {
        self.model.initial_probabilities()
    }

    pub fn final_log_likelihood(&self) -> Option<f64> {
        self.log_likelihood_history.last().copied()
    }

    pub fn to_spec(&self) -> HmmSpec {
        self.model.to_spec()
    }
}

impl HiddenMarkovModel {
    /// Re-estimate `(A, B, pi)` from one observation sequence by EM. Stops
    /// once the log-likelihood improves by less than
    /// `config.baum_welch.tolerance`, after `config.baum_welch.max_iterations`
    /// accepted iterations, or when a re-estimated row fails the
    /// `config.tolerance` check.
    pub fn baum_welch<S: AsRef<str>>(
        &self,
        observations: &[S],
        config: &EngineConfig,
    ) -> Result<BaumWelchResult> {
        let obs = self.encode_observations(observations)?;
        let settings = &config.baum_welch;

        let mut model = self.clone();
        let mut passes = model.scaled_passes(&obs)?;
        let mut log_likelihood = passes.log_likelihood();
        let mut history = vec![log_likelihood];
        let mut iterations = 0;
        let mut converged = false;

        while iterations < settings.max_iterations {
            let candidate = match model.reestimate(&obs, &passes, config.tolerance) {
                Ok(candidate) => candidate,
                Err(e) => {
                    warn!("Baum-Welch iteration {} rejected: {e}", iterations + 1);
                    break;
                }
            };
            let next = candidate.scaled_passes(&obs)?;
            let next_log_likelihood = next.log_likelihood();
            let improvement = next_log_likelihood - log_likelihood;
            trace!(
                "Baum-Welch iteration {}: log-likelihood {next_log_likelihood} ({improvement:+e})",
                iterations + 1
            );

            model = candidate;
            passes = next;
            log_likelihood = next_log_likelihood;
            history.push(log_likelihood);
            iterations += 1;
            if improvement.abs() < settings.tolerance {
                converged = true;
                break;
            }
        }

        if converged {
            debug!(
                "Baum-Welch converged after {iterations} iterations, \
                 log-likelihood {log_likelihood}"
            );
        } else {
            warn!("Baum-Welch stopped after {iterations} iterations without converging");
        }
        Ok(BaumWelchResult {
            model,
            iterations,
            converged,
            log_likelihood_history: history,
        })
    }

    /// One M-step. States never occupied keep their previous rows, so every
    /// denominator used is positive.
    fn reestimate(&self, obs: &[usize], passes: &ScaledPasses, tolerance: f64) -> Result<Self> {
        let n = self.state_count();
        let m = self.symbol_count();
        let steps = obs.len();
        let gamma = passes.gamma();

        let mut transition_counts = Array2::<f64>::zeros((n, n));
        for t in 0..steps.saturating_sub(1) {
            let next = obs[t + 1];
            let mut xi = Array2::from_shape_fn((n, n), |(i, j)| {
                passes.alpha[[t, i]]
                    * self.transitions[[i, j]]
                    * self.emissions[[j, next]]
                    * passes.beta[[t + 1, j]]
            });
            let total = xi.sum();
            if total > 0.0 {
                xi /= total;
                transition_counts += &xi;
            }
        }

        let mut emission_counts = Array2::<f64>::zeros((n, m));
        for (t, &symbol) in obs.iter().enumerate() {
            for i in 0..n {
                emission_counts[[i, symbol]] += gamma[[t, i]];
            }
        }
        let occupancy = gamma.sum_axis(Axis(0));
        let departures = if steps > 1 {
            gamma.slice(s![..steps - 1, ..]).sum_axis(Axis(0))
        } else {
            Array1::zeros(n)
        };

        let mut transitions = self.transitions.clone();
        let mut emissions = self.emissions.clone();
        for i in 0..n {
            if departures[i] > 0.0 {
                let row = transition_counts.row(i).mapv(|c| c / departures[i]);
                transitions.row_mut(i).assign(&row);
            }
            if occupancy[i] > 0.0 {
                let row = emission_counts.row(i).mapv(|c| c / occupancy[i]);
                emissions.row_mut(i).assign(&row);
            }
        }
        let initial = gamma.row(0).to_owned();

        for (i, state) in self.states().iter().enumerate() {
            check_distribution(
                &format!("re-estimated transition row of '{state}'"),
                &transitions.row(i).to_vec(),
                tolerance,
            )?;
            check_distribution(
                &format!("re-estimated emission row of '{state}'"),
                &emissions.row(i).to_vec(),
                tolerance,
            )?;
        }
        check_distribution("re-estimated initial probabilities", &initial.to_vec(), tolerance)?;

        let mut model = self.clone();
        model.transitions = transitions;
        model.emissions = emissions;
        model.initial = initial;
        Ok(model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::errors::ProbError;

    fn model() -> HiddenMarkovModel {
        HiddenMarkovModel::new(
            vec!["s0".into(), "s1".into()],
            vec!["x".into(), "y".into()],
            vec![vec![0.6, 0.4], vec![0.3, 0.7]],
            vec![vec![0.7, 0.3], vec![0.4, 0.6]],
            vec![0.5, 0.5],
            1e-3,
        )
        .unwrap()
    }

    #[test]
    fn test_likelihood_never_decreases() {
        let obs = ["x", "x", "y", "x", "y", "y", "y", "x", "x", "y"];
        let result = model().baum_welch(&obs, &EngineConfig::default()).unwrap();
        assert!(result.iterations >= 1);
        for pair in result.log_likelihood_history.windows(2) {
            assert!(pair[1] >= pair[0] - 1e-9, "{:?}", result.log_likelihood_history);
        }
        for row in result.transition_matrix().outer_iter() {
            assert!((row.sum() - 1.0).abs() < 1e-9);
        }
        for row in result.emission_matrix().outer_iter() {
            assert!((row.sum() - 1.0).abs() < 1e-9);
        }
        assert!((result.initial_probabilities().sum() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_input_model_untouched() {
        let original = model();
        let result = original.baum_welch(&["x", "y", "y"], &EngineConfig::default()).unwrap();
        assert_eq!(original, model());
        assert_ne!(result.model, original);
    }

    #[test]
    fn test_iteration_cap_reports_non_convergence() {
        let mut config = EngineConfig::default();
        config.baum_welch.max_iterations = 1;
        config.baum_welch.tolerance = 0.0;
        let result = model().baum_welch(&["x", "y", "x", "y"], &config).unwrap();
        assert_eq!(result.iterations, 1);
        assert!(!result.converged);
        assert_eq!(result.log_likelihood_history.len(), 2);
    }

    #[test]
    fn test_single_observation_keeps_transitions() {
        let original = model();
        let result = original.baum_welch(&["y"], &EngineConfig::default()).unwrap();
        assert_eq!(result.transition_matrix(), original.transition_matrix());
    }

    #[test]
    fn test_bad_sequences_fail_fast() {
        let empty: [&str; 0] = [];
        assert!(matches!(
            model().baum_welch(&empty, &EngineConfig::default()),
            Err(ProbError::Empty(_))
        ));
        assert!(matches!(
            model().baum_welch(&["z"], &EngineConfig::default()),
            Err(ProbError::UnknownSymbol(_))
        ));
    }
}
