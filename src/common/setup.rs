use anyhow::{Context, Result};
use clap::{Arg, ArgMatches, Command, ValueEnum, builder::EnumValueParser};
use serde::Deserialize;
use std::ffi::OsString;

use super::logging::init_logging;

/// Which algorithm the binary runs against the loaded model.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum Task {
    /// Check the model and report every defect
    Validate,
    /// Posterior by memoized enumeration
    Infer,
    /// Posterior by variable elimination
    InferVe,
    /// Random walk through a Markov chain
    Simulate,
    /// Markov chain distribution after a number of steps
    Distribution,
    Stationary,
    /// Irreducibility, periodicity and communicating classes
    Classify,
    FirstPassage,
    Forward,
    Viterbi,
    BaumWelch,
}

/// These options define the inputs from the user.
#[derive(Deserialize, Clone, Debug)]
pub struct CommandLineOptions {
    pub model: String,
    pub task: Task,
    pub query: Option<String>,
    pub config: Option<String>,
    pub steps: Option<usize>,
    pub start: Option<String>,
    pub target: Option<String>,
    pub seed: Option<u64>,
}

fn command() -> Command {
    Command::new("PROBNET")
        .version("0.1")
        .about("Exact inference for Bayesian networks, Markov chain analysis and HMM algorithms.")
        .arg(
            Arg::new("model")
                .long("model")
                .value_name("FILE")
                .help("JSON model document tagged with \"type\"")
                .required(true),
        )
        .arg(
            Arg::new("task")
                .long("task")
                .value_parser(EnumValueParser::<Task>::new())
                .help("Algorithm to run")
                .required(true),
        )
        .arg(
            Arg::new("query")
                .long("query")
                .value_name("FILE")
                .help("JSON query: {query, evidence} or {sequence}"),
        )
        .arg(
            Arg::new("config")
                .long("config")
                .value_name("FILE")
                .help("JSON engine configuration (optional)"),
        )
        .arg(
            Arg::new("steps")
                .long("steps")
                .value_name("NUMBER")
                .help("Number of steps for simulate, distribution and HMM sampling"),
        )
        .arg(
            Arg::new("start")
                .long("start")
                .value_name("STATE")
                .help("Initial state for simulate and first-passage"),
        )
        .arg(
            Arg::new("target")
                .long("target")
                .value_name("STATE")
                .help("Target state for first-passage"),
        )
        .arg(
            Arg::new("seed")
                .long("seed")
                .value_name("NUMBER")
                .help("Random seed; overrides the configuration file"),
        )
}

fn parse_number<T: std::str::FromStr>(matches: &ArgMatches, name: &str) -> Result<Option<T>>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    matches
        .get_one::<String>(name)
        .map(|v| {
            v.parse::<T>()
                .with_context(|| format!("--{name} needs to be a non-negative integer"))
        })
        .transpose()
}

/// Parse options from an explicit argument list (the first item is the
/// program name).
pub fn parse_options_from<I, T>(args: I) -> Result<CommandLineOptions>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let matches = command().try_get_matches_from(args)?;
    let model = matches
        .get_one::<String>("model")
        .context("--model is required")?
        .to_string();
    let task = matches
        .get_one::<Task>("task")
        .copied()
        .context("--task is required")?;

    Ok(CommandLineOptions {
        model,
        task,
        query: matches.get_one::<String>("query").cloned(),
        config: matches.get_one::<String>("config").cloned(),
        steps: parse_number(&matches, "steps")?,
        start: matches.get_one::<String>("start").cloned(),
        target: matches.get_one::<String>("target").cloned(),
        seed: parse_number(&matches, "seed")?,
    })
}

/// Install the logger and parse the process arguments.
pub fn parse_configuration_options() -> Result<CommandLineOptions> {
    init_logging("info");
    parse_options_from(std::env::args_os())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_command_line() {
        let options = parse_options_from([
            "probnet",
            "--model",
            "weather.json",
            "--task",
            "first-passage",
            "--start",
            "sunny",
            "--target",
            "rainy",
            "--seed",
            "7",
        ])
        .unwrap();
        assert_eq!(options.task, Task::FirstPassage);
        assert_eq!(options.model, "weather.json");
        assert_eq!(options.start.as_deref(), Some("sunny"));
        assert_eq!(options.seed, Some(7));
        assert_eq!(options.steps, None);
    }

    #[test]
    fn test_rejects_bad_input() {
        assert!(parse_options_from(["probnet", "--task", "infer"]).is_err());
        assert!(parse_options_from(["probnet", "--model", "m.json", "--task", "guess"]).is_err());
        assert!(
            parse_options_from([
                "probnet", "--model", "m.json", "--task", "simulate", "--steps", "-3"
            ])
            .is_err()
        );
    }
}
