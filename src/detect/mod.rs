mod backend;
pub mod backends;
pub mod labels;
pub mod postprocess;
mod result;

pub use backend::{validate_output, InferenceEngine};
pub use backends::{ScriptStep, ScriptedEngine};
#[cfg(feature = "backend-tract")]
pub use backends::{SsdOutputLayout, TractEngine};
pub use postprocess::{ClassThresholds, PostProcessor, PERSON_CLASS};
pub use result::{BoundingBox, Detection, DetectionBatch};
