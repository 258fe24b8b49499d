pub mod cpt;
pub mod network;

pub use cpt::{ConditionalTable, ParentAssignment};
pub use network::{BayesianNetwork, Variable};
