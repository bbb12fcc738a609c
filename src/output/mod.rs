//! Output formatting module
//!
//! Renders run summaries for the terminal.

mod formatter;

pub use formatter::{OutputFormat, ResultFormatter};
