pub mod elimination;
pub mod engine;
pub mod enumeration;

pub use engine::{InferenceMethod, InferenceResult, all_marginals, infer, infer_with, run_query};
