//! Output formatters for run results
//!
//! Provides table, JSON and one-line summary output.

use clap::ValueEnum;

use crate::models::{RunRecord, RunStatus, RunSummary};

/// Output format options
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
    JsonPretty,
    Summary,
}

/// Result formatter
pub struct ResultFormatter {
    format: OutputFormat,
    colorize: bool,
    show_passed: bool,
}

impl ResultFormatter {
    pub fn new(format: OutputFormat) -> Self {
        Self {
            format,
            colorize: false,
            show_passed: false,
        }
    }

    /// ANSI colours, for output going to a terminal
    pub fn with_color(mut self, colorize: bool) -> Self {
        self.colorize = colorize;
        self
    }

    /// List passing tests in the table too
    pub fn show_passed(mut self, show: bool) -> Self {
        self.show_passed = show;
        self
    }

    fn status_label(&self, status: RunStatus) -> String {
        let label = format!("{} {}", status.symbol(), status.as_str());
        if !self.colorize {
            return label;
        }
        let color = match status {
            RunStatus::Pass => "32",
            RunStatus::Fail | RunStatus::Error => "31",
            RunStatus::Abort => "33",
        };
        format!("\x1b[{color}m{label}\x1b[0m")
    }

    fn format_result_table(&self, result: &RunRecord) -> String {
        let exit = result
            .exit_code
            .map(|c| c.to_string())
            .unwrap_or_else(|| "-".to_string());

        format!(
            "{:9} {:>4} [{:>7}ms] {}",
            self.status_label(result.status),
            exit,
            result.duration_ms,
            result.test_case
        )
    }

    /// Format a run summary
    pub fn format_summary(&self, summary: &RunSummary) -> String {
        match self.format {
            OutputFormat::Table => self.format_summary_table(summary),
            OutputFormat::Json => serde_json::to_string(summary).unwrap_or_default(),
            OutputFormat::JsonPretty => serde_json::to_string_pretty(summary).unwrap_or_default(),
            OutputFormat::Summary => self.format_summary_brief(summary),
        }
    }

    fn format_summary_table(&self, summary: &RunSummary) -> String {
        let mut output = String::new();

        output.push_str("\n══════════════════════════════════════════════════════════════\n");
        output.push_str(&format!(" {}\n", summary.label));
        output.push_str("══════════════════════════════════════════════════════════════\n");

        for result in summary
            .results
            .iter()
            .filter(|r| self.show_passed || !r.status.is_success())
        {
            output.push_str(&format!(" {}\n", self.format_result_table(result)));
        }

        output.push_str("──────────────────────────────────────────────────────────────\n");

        let pass_str = if self.colorize {
            format!("\x1b[32m{}\x1b[0m", summary.passed)
        } else {
            summary.passed.to_string()
        };
        let fail_str = if self.colorize && summary.failed > 0 {
            format!("\x1b[31m{}\x1b[0m", summary.failed)
        } else {
            summary.failed.to_string()
        };

        output.push_str(&format!(
            " Total: {} | Pass: {} | Fail: {} | Abort: {} | Error: {}\n",
            summary.total, pass_str, fail_str, summary.aborted, summary.errors
        ));
        output.push_str(&format!(
            " Pass Rate: {:.1}% | Duration: {}ms\n",
            summary.pass_rate(),
            summary.total_duration_ms
        ));

        output
    }

    fn format_summary_brief(&self, summary: &RunSummary) -> String {
        format!(
            "{}: {}/{} passed ({:.1}%) in {}ms",
            summary.label,
            summary.passed,
            summary.total,
            summary.pass_rate(),
            summary.total_duration_ms
        )
    }
}

impl Default for ResultFormatter {
    fn default() -> Self {
        Self::new(OutputFormat::Table)
    }
}
