//! Model loading and inference.

pub mod backends;
pub mod formats;
pub mod loader;
pub mod runner;

pub use backends::{Capabilities, ModelRuntime, Prediction, ProbabilityMatrix};
pub use formats::{ArtifactSignature, detect_signature};
pub use loader::{LoadWarning, LoadedModel, ModelLoader};
pub use runner::{InferenceRunner, PredictionSet};
