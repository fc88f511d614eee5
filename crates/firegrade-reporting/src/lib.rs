//! Report formatting and export for benchmark results.

pub mod export;
pub mod types;

pub use export::{export_results, render};
pub use types::{BenchReport, ExportFormat};
