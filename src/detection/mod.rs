// External gap detection: candidate tracking and classification
pub mod classifier;
pub mod group;
pub mod tracker;

pub use classifier::{classify, GapClassifier, GapHistory};
pub use group::CandleGroup;
pub use tracker::{CandidateTracker, Detection};
