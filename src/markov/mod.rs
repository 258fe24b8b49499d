pub mod analysis;
pub mod chain;

pub use analysis::{ChainClassification, CommunicatingClass};
pub use chain::{FirstPassageResult, MarkovChain, StationaryResult};
