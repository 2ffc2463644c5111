//! # sheetclean
//!
//! Enhancement pipeline for photographed and scanned attendance sheets. Pages are
//! resized, corrected for shadows and skew, binarized and cleaned so that downstream
//! text extraction sees crisp, level strokes.
//!
//! The [`preprocessing`] stages are pure functions over in-memory images; the
//! [`pipeline`] chains them, and the [`runner`] drives batches of files from disk.

pub mod config;
pub mod errors;
pub mod observability;
pub mod pipeline;
pub mod preprocessing;
pub mod runner;

// Re-export types for easier access
pub use config::{AppConfig, PipelineConfig};
pub use errors::{AppError, AppResult};
pub use pipeline::{preprocess_page, PageReport, Pipeline, ProcessedPage};
