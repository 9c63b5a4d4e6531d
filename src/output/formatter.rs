//! Output formatters for run results

use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::io::Write;

use crate::models::{
    ResultKind, RunStatus, RunnableId, RunnableTree, SuiteOption, TestResult, TestRun,
};

/// Output format options
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    Table,
    Json,
    JsonPretty,
    Csv,
    Summary,
}

impl OutputFormat {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "table" => Some(OutputFormat::Table),
            "json" => Some(OutputFormat::Json),
            "json-pretty" | "jsonpretty" => Some(OutputFormat::JsonPretty),
            "csv" => Some(OutputFormat::Csv),
            "summary" => Some(OutputFormat::Summary),
            _ => None,
        }
    }
}

/// One result placed in tree order
#[derive(Clone, Debug, Serialize)]
pub struct ResultRow {
    pub depth: usize,
    pub title: String,
    pub result: TestResult,
}

/// Results of one run with per-kind counts over its tests
#[derive(Clone, Debug, Serialize)]
pub struct RunSummary {
    pub run_id: String,
    pub status: RunStatus,
    pub target: RunnableId,
    pub rows: Vec<ResultRow>,
    /// Test (leaf) results per kind, keyed by lowercase kind name
    pub counts: BTreeMap<String, usize>,
    pub total: usize,
}

impl RunSummary {
    /// Order `results` by a walk of the run's target
    pub fn new(
        tree: &RunnableTree,
        suite_options: &[SuiteOption],
        run: &TestRun,
        results: Vec<TestResult>,
    ) -> Self {
        let mut by_runnable: HashMap<RunnableId, TestResult> = results
            .into_iter()
            .map(|result| (result.runnable_id.clone(), result))
            .collect();

        let mut rows = Vec::new();
        for (depth, runnable) in tree.walk(&run.runnable_id, suite_options) {
            if let Some(result) = by_runnable.remove(&runnable.id) {
                rows.push(ResultRow {
                    depth,
                    title: runnable.title.clone(),
                    result,
                });
            }
        }

        // Results outside the walk, e.g. ancestors updated by propagation
        let mut rest: Vec<TestResult> = by_runnable.into_values().collect();
        rest.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        rows.extend(rest.into_iter().map(|result| ResultRow {
            depth: 0,
            title: tree
                .get(&result.runnable_id)
                .map(|r| r.title.clone())
                .unwrap_or_else(|| result.runnable_id.to_string()),
            result,
        }));

        let mut counts = BTreeMap::new();
        let mut total = 0;
        for row in rows.iter().filter(|row| row.result.runnable_kind.is_leaf()) {
            *counts.entry(kind_name(row.result.result)).or_insert(0) += 1;
            total += 1;
        }

        Self {
            run_id: run.id.clone(),
            status: run.status,
            target: run.runnable_id.clone(),
            rows,
            counts,
            total,
        }
    }

    pub fn count(&self, kind: ResultKind) -> usize {
        self.counts.get(&kind_name(kind)).copied().unwrap_or(0)
    }

    /// Pass rate over tests that were not omitted
    pub fn pass_rate(&self) -> f64 {
        let counted = self.total - self.count(ResultKind::Omit);
        if counted == 0 {
            0.0
        } else {
            (self.count(ResultKind::Pass) as f64 / counted as f64) * 100.0
        }
    }

    /// Result of the run's target, if it has one
    pub fn target_result(&self) -> Option<&TestResult> {
        self.rows
            .iter()
            .map(|row| &row.result)
            .find(|result| result.runnable_id == self.target)
    }
}

fn kind_name(kind: ResultKind) -> String {
    kind.to_string().to_lowercase()
}

#[derive(Serialize)]
struct CsvRow<'a> {
    runnable_id: &'a str,
    kind: String,
    optional: bool,
    result: String,
    message: &'a str,
}

/// Result formatter
pub struct ResultFormatter {
    format: OutputFormat,
    colorize: bool,
}

impl ResultFormatter {
    pub fn new(format: OutputFormat) -> Self {
        Self {
            format,
            colorize: true,
        }
    }

    pub fn no_color(mut self) -> Self {
        self.colorize = false;
        self
    }

    /// Format a single result
    pub fn format_result(&self, result: &TestResult) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string(result).unwrap_or_default(),
            OutputFormat::JsonPretty => serde_json::to_string_pretty(result).unwrap_or_default(),
            _ => format!(
                "{} {}{}",
                self.status_label(result.result),
                result.runnable_id,
                message_suffix(result)
            ),
        }
    }

    fn status_label(&self, kind: ResultKind) -> String {
        let label = format!("{} {}", kind.symbol(), kind);
        if !self.colorize {
            return label;
        }
        let color = match kind {
            ResultKind::Pass => "32",
            ResultKind::Fail | ResultKind::Error => "31",
            ResultKind::Skip | ResultKind::Wait => "33",
            ResultKind::Cancel | ResultKind::Running => "35",
            ResultKind::Omit => "90",
        };
        format!("\x1b[{color}m{label}\x1b[0m")
    }

    /// Format a run summary
    pub fn format_summary(&self, summary: &RunSummary) -> String {
        match self.format {
            OutputFormat::Table => self.format_summary_table(summary),
            OutputFormat::Json => serde_json::to_string(summary).unwrap_or_default(),
            OutputFormat::JsonPretty => serde_json::to_string_pretty(summary).unwrap_or_default(),
            OutputFormat::Csv => {
                format_summary_csv(summary).unwrap_or_else(|e| format!("Failed to write CSV: {e}\n"))
            }
            OutputFormat::Summary => self.format_summary_brief(summary),
        }
    }

    fn format_summary_table(&self, summary: &RunSummary) -> String {
        let mut output = String::new();

        output.push_str("\n═══════════════════════════════════════════════════════════════\n");
        output.push_str(&format!(
            " Run {} [{}] -> {}\n",
            summary.run_id, summary.status, summary.target
        ));
        output.push_str("═══════════════════════════════════════════════════════════════\n");

        for row in &summary.rows {
            let indent = "  ".repeat(row.depth);
            output.push_str(&format!(
                " {}{} {}{}\n",
                indent,
                self.status_label(row.result.result),
                row.title,
                if row.result.optional { " (optional)" } else { "" }
            ));
            if let Some(message) = row.result.result_message.as_deref() {
                if !message.is_empty() {
                    output.push_str(&format!(" {}    {}\n", indent, first_line(message)));
                }
            }
        }

        output.push_str(" ───────────────────────────────────────────────────────────\n");
        output.push_str(&format!(
            " Tests: {} | Pass: {} | Fail: {} | Error: {} | Skip: {} | Omit: {} | Wait: {} | Cancel: {}\n",
            summary.total,
            summary.count(ResultKind::Pass),
            summary.count(ResultKind::Fail),
            summary.count(ResultKind::Error),
            summary.count(ResultKind::Skip),
            summary.count(ResultKind::Omit),
            summary.count(ResultKind::Wait),
            summary.count(ResultKind::Cancel),
        ));
        output.push_str(&format!(" Pass Rate: {:5.1}%\n", summary.pass_rate()));

        output
    }

    fn format_summary_brief(&self, summary: &RunSummary) -> String {
        let result = summary
            .target_result()
            .map(|r| r.result.to_string())
            .unwrap_or_else(|| "NO RESULT".to_string());
        format!(
            "{} {}: {} ({}/{} tests passed, {:.1}%)",
            summary.run_id,
            summary.target,
            result,
            summary.count(ResultKind::Pass),
            summary.total,
            summary.pass_rate()
        )
    }
}

impl Default for ResultFormatter {
    fn default() -> Self {
        Self::new(OutputFormat::Table)
    }
}

fn format_summary_csv(summary: &RunSummary) -> Result<String, csv::Error> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    for row in &summary.rows {
        writer.serialize(CsvRow {
            runnable_id: row.result.runnable_id.as_str(),
            kind: row.result.runnable_kind.to_string(),
            optional: row.result.optional,
            result: kind_name(row.result.result),
            message: row.result.result_message.as_deref().unwrap_or(""),
        })?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| csv::Error::from(e.into_error()))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

fn message_suffix(result: &TestResult) -> String {
    match result.result_message.as_deref() {
        Some(message) if !message.is_empty() => format!(" - {}", first_line(message)),
        _ => String::new(),
    }
}

fn first_line(message: &str) -> &str {
    message.lines().next().unwrap_or("")
}

/// Write a run summary to a file
pub fn write_summary_to_file(
    path: &str,
    summary: &RunSummary,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let formatter = ResultFormatter::new(format).no_color();
    let content = formatter.format_summary(summary);

    let mut file = std::fs::File::create(path)?;
    file.write_all(content.as_bytes())?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{GroupDefinition, RunnableKind, SuiteDefinition, TestDefinition};
    use chrono::Utc;

    fn tree() -> RunnableTree {
        RunnableTree::from_suites(vec![SuiteDefinition::new("suite", "Suite").group(
            GroupDefinition::new("g1", "Group One")
                .test(TestDefinition::new("t1", "First"))
                .test(TestDefinition::new("t2", "Second"))
                .test(TestDefinition::new("t3", "Third")),
        )])
        .unwrap()
    }

    fn result(id: &str, kind: RunnableKind, result: ResultKind, message: Option<&str>) -> TestResult {
        TestResult {
            id: format!("r-{id}"),
            test_session_id: "session".to_string(),
            test_run_id: "run".to_string(),
            runnable_id: RunnableId::new(id),
            runnable_kind: kind,
            optional: false,
            result,
            result_message: message.map(str::to_string),
            messages: Vec::new(),
            requests: Vec::new(),
            input_json: None,
            output_json: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn summary() -> RunSummary {
        let mut run = TestRun::new("run", "session", RunnableId::new("g1"));
        run.status = RunStatus::Done;
        let results = vec![
            result("t3", RunnableKind::Test, ResultKind::Omit, Some("n/a")),
            result("g1", RunnableKind::Group, ResultKind::Fail, None),
            result("t1", RunnableKind::Test, ResultKind::Pass, None),
            result("t2", RunnableKind::Test, ResultKind::Fail, Some("bad status\nsecond line")),
            result("suite", RunnableKind::Suite, ResultKind::Fail, None),
        ];
        RunSummary::new(&tree(), &[], &run, results)
    }

    #[test]
    fn test_output_format_from_str() {
        assert_eq!(OutputFormat::from_str("json"), Some(OutputFormat::Json));
        assert_eq!(OutputFormat::from_str("TABLE"), Some(OutputFormat::Table));
        assert_eq!(OutputFormat::from_str("unknown"), None);
    }

    #[test]
    fn test_summary_orders_rows_and_counts_tests() {
        let summary = summary();
        let ids: Vec<&str> = summary.rows.iter().map(|r| r.result.runnable_id.as_str()).collect();
        assert_eq!(ids, vec!["g1", "t1", "t2", "t3", "suite"]);
        assert_eq!(summary.rows[1].depth, 1);
        assert_eq!(summary.total, 3);
        assert_eq!(summary.count(ResultKind::Pass), 1);
        assert_eq!(summary.count(ResultKind::Fail), 1);
        assert_eq!(summary.pass_rate(), 50.0);
        assert_eq!(summary.target_result().map(|r| r.result), Some(ResultKind::Fail));
    }

    #[test]
    fn test_table_shows_first_message_line() {
        let output = ResultFormatter::new(OutputFormat::Table)
            .no_color()
            .format_summary(&summary());
        assert!(output.contains("✗ FAIL Second"));
        assert!(output.contains("bad status"));
        assert!(!output.contains("second line"));
        assert!(output.contains("Tests: 3 | Pass: 1 | Fail: 1"));
    }

    #[test]
    fn test_csv_output() {
        let output = ResultFormatter::new(OutputFormat::Csv).format_summary(&summary());
        let mut lines = output.lines();
        assert_eq!(
            lines.next(),
            Some("runnable_id,kind,optional,result,message")
        );
        assert_eq!(lines.next(), Some("g1,group,false,fail,"));
        assert!(output.contains("\"bad status\nsecond line\""));
    }

    #[test]
    fn test_brief_and_single_result() {
        let formatter = ResultFormatter::new(OutputFormat::Summary).no_color();
        assert_eq!(
            formatter.format_summary(&summary()),
            "run g1: FAIL (1/3 tests passed, 50.0%)"
        );
        let line = formatter.format_result(&result("t2", RunnableKind::Test, ResultKind::Skip, Some("later")));
        assert_eq!(line, "○ SKIP t2 - later");
    }
}
