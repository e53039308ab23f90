// Pipeline processing: join, first-recording selection, payload unpacking,
// derived metrics and the quality gate

pub mod derive;
pub mod merge;
pub mod normalize;
pub mod quality_gate;
pub mod unpack;

pub use derive::derive;
pub use merge::merge;
pub use normalize::normalize;
pub use quality_gate::{QualityGate, QualityGateConfig, RuleSet};
pub use unpack::unpack;
