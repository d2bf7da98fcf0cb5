//! Photos in, transparent chibi portraits out.
//!
//! [`pipeline::ChibiPipeline`] drives the whole run; the pieces it is built
//! from are usable on their own.

pub mod config;
pub mod gemini;
pub mod invoker;
pub mod media;
pub mod model;
pub mod pipeline;
pub mod policy;
pub mod scanner;
pub mod segmenter;
pub mod synthesizer;

#[cfg(test)]
mod testing;

pub use config::EngineConfig;
pub use gemini::GeminiModelService;
pub use invoker::{FallbackInvoker, InvokeError};
pub use model::{ModelError, ModelErrorKind, ModelRequest, ModelResponse, ModelService};
pub use pipeline::{ChibiPipeline, PipelineRun};
pub use policy::{BackoffPolicy, PacingPolicy};
pub use scanner::{DescriptionSimilarity, PersonScanner, TokenOverlap};
pub use segmenter::{remove_background, Segmentation};
pub use synthesizer::ChibiSynthesizer;
