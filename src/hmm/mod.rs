pub mod algorithms;
pub mod baum_welch;
pub mod model;

pub use algorithms::{ForwardResult, ViterbiResult};
pub use baum_welch::BaumWelchResult;
pub use model::{HiddenMarkovModel, SampledSequence};
