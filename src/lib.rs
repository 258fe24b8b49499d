#[macro_use]
pub mod common;
pub mod graph;
pub mod hmm;
pub mod inference;
pub mod markov;

pub use common::config::EngineConfig;
pub use common::errors::{ErrorKind, ProbError};
pub use common::spec::{ChainSpec, HmmSpec, InferenceQuery, ModelDocument, NetworkSpec};
pub use graph::BayesianNetwork;
pub use hmm::HiddenMarkovModel;
pub use inference::{InferenceMethod, InferenceResult, infer, infer_with};
pub use markov::MarkovChain;
