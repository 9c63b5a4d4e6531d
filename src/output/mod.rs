//! Output formatting module
//!
//! Renders a run's results as a table, JSON, CSV or a one-line summary.

mod formatter;

pub use formatter::{write_summary_to_file, OutputFormat, ResultFormatter, ResultRow, RunSummary};
