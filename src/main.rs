use anyhow::{Context, Result, bail};
use log::info;
use probnet::common::setup::{CommandLineOptions, Task, parse_configuration_options};
use probnet::common::spec::{
    ChainSpec, HmmSpec, InferenceQuery, ModelDocument, NetworkSpec, SequenceQuery,
};
use probnet::inference::{InferenceMethod, run_query};
use probnet::{
    BayesianNetwork, EngineConfig, HiddenMarkovModel, MarkovChain, print_green, print_red,
};
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::path::Path;

fn read_json<T: DeserializeOwned>(path: &str) -> Result<T> {
    let contents = std::fs::read_to_string(Path::new(path))
        .with_context(|| format!("Failed to read {path}"))?;
    serde_json::from_str(&contents).with_context(|| format!("Failed to parse {path}"))
}

fn query_file(options: &CommandLineOptions) -> Result<&str> {
    options
        .query
        .as_deref()
        .with_context(|| format!("--query is required for {:?}", options.task))
}

fn rng(config: &EngineConfig) -> StdRng {
    match config.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}

fn run_network(
    spec: &NetworkSpec,
    options: &CommandLineOptions,
    config: &EngineConfig,
) -> Result<Value> {
    let method = match options.task {
        Task::Validate => {
            let network = BayesianNetwork::assemble(spec, config.tolerance);
            let defects: Vec<String> = network.validate().iter().map(|e| e.to_string()).collect();
            if defects.is_empty() {
                print_green!("network with {} nodes is valid", network.len());
            } else {
                for defect in &defects {
                    print_red!("{defect}");
                }
            }
            return Ok(json!({ "valid": defects.is_empty(), "defects": defects }));
        }
        Task::Infer => InferenceMethod::Enumeration,
        Task::InferVe => InferenceMethod::VariableElimination,
        task => bail!("task {task:?} does not apply to a Bayesian network"),
    };
    let network = BayesianNetwork::from_spec_with_tolerance(spec, config.tolerance)?;
    let query: InferenceQuery = read_json(query_file(options)?)?;
    info!("inferring P({} | {} evidence) via {method:?}", query.query, query.evidence.len());
    Ok(serde_json::to_value(run_query(&network, &query, method)?)?)
}

fn run_chain(
    spec: &ChainSpec,
    options: &CommandLineOptions,
    config: &EngineConfig,
) -> Result<Value> {
    let chain = MarkovChain::from_spec_with_tolerance(spec, config.tolerance)?;
    let start = || options.start.as_deref().context("--start is required");
    let value = match options.task {
        Task::Validate => {
            print_green!("chain with {} states is valid", chain.len());
            json!({ "valid": true, "defects": [] })
        }
        Task::Simulate => {
            let steps = options.steps.unwrap_or(10);
            let path = chain.simulate(start()?, steps, &mut rng(config))?;
            json!({ "path": path })
        }
        Task::Distribution => {
            let steps = options.steps.unwrap_or(1);
            let distribution = chain.evolve(steps);
            json!({ "steps": steps, "states": chain.states(), "distribution": distribution })
        }
        Task::Stationary => {
            let result = chain.stationary_distribution(
                config.stationary.tolerance,
                config.stationary.max_iterations,
            );
            serde_json::to_value(result)?
        }
        Task::Classify => serde_json::to_value(chain.classify())?,
        Task::FirstPassage => {
            let target = options.target.as_deref().context("--target is required")?;
            let result =
                chain.first_passage_time(start()?, target, config.first_passage.max_steps)?;
            json!({
                "expected_steps": result.expected_steps,
                "reach_probability": result.reach_probability,
                "conditional_expected_steps": result.conditional_expected_steps(),
                "horizon": result.horizon,
            })
        }
        task => bail!("task {task:?} does not apply to a Markov chain"),
    };
    Ok(value)
}

fn run_hmm(spec: &HmmSpec, options: &CommandLineOptions, config: &EngineConfig) -> Result<Value> {
    let model = HiddenMarkovModel::from_spec_with_tolerance(spec, config.tolerance)?;
    let sequence = || -> Result<Vec<String>> {
        let query: SequenceQuery = read_json(query_file(options)?)?;
        Ok(query.sequence)
    };
    let value = match options.task {
        Task::Validate => {
            print_green!(
                "HMM with {} hidden states and {} symbols is valid",
                model.state_count(),
                model.symbol_count()
            );
            json!({ "valid": true, "defects": [] })
        }
        Task::Simulate => {
            let sampled = model.sample(options.steps.unwrap_or(10), &mut rng(config))?;
            serde_json::to_value(sampled)?
        }
        Task::Forward => {
            let result = model.forward(&sequence()?)?;
            serde_json::to_value(result)?
        }
        Task::Viterbi => serde_json::to_value(model.viterbi(&sequence()?)?)?,
        Task::BaumWelch => {
            let result = model.baum_welch(&sequence()?, config)?;
            info!(
                "Baum-Welch finished after {} iterations (converged: {})",
                result.iterations, result.converged
            );
            serde_json::to_value(result)?
        }
        task => bail!("task {task:?} does not apply to an HMM"),
    };
    Ok(value)
}

fn main() -> Result<()> {
    let options = parse_configuration_options()?;
    let mut config = match &options.config {
        Some(path) => EngineConfig::from_file(path)?,
        None => EngineConfig::default(),
    };
    if options.seed.is_some() {
        config.seed = options.seed;
    }

    let document: ModelDocument = read_json(&options.model)?;
    let output = match &document {
        ModelDocument::BayesianNetwork(spec) => run_network(spec, &options, &config),
        ModelDocument::MarkovChain(spec) => run_chain(spec, &options, &config),
        ModelDocument::Hmm(spec) => run_hmm(spec, &options, &config),
    };
    let output = match output {
        Ok(output) => output,
        Err(e) => {
            print_red!("{:?} failed: {e:#}", options.task);
            return Err(e);
        }
    };
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
