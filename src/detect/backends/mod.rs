pub mod stub;

#[cfg(feature = "backend-tract")]
pub mod tract;

pub use stub::{ScriptStep, ScriptedEngine};

#[cfg(feature = "backend-tract")]
pub use tract::{SsdOutputLayout, TractEngine};
