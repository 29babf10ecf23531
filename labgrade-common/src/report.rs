//! Score reports.
//!
//! A [`Report`] is built once by the scheduler and never changes. It renders
//! as plain text (one line per test plus a score line) or as a JSON tree that
//! mirrors the parent/child structure of the suite.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::time::Duration;

use schemars::{JsonSchema, schema::RootSchema, schema_for};
use serde::{Deserialize, Serialize};

use crate::errors::GradeResult;

/// Final state of one test.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case", tag = "status", content = "reason")]
pub enum RunOutcome {
    Passed,
    Failed(String),
    Skipped(String),
    TimedOut(String),
}

/// Outcome kind without its reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Passed,
    Failed,
    Skipped,
    TimedOut,
}

impl RunOutcome {
    pub fn status(&self) -> Status {
        match self {
            Self::Passed => Status::Passed,
            Self::Failed(_) => Status::Failed,
            Self::Skipped(_) => Status::Skipped,
            Self::TimedOut(_) => Status::TimedOut,
        }
    }

    pub fn is_passed(&self) -> bool {
        matches!(self, Self::Passed)
    }

    /// Whether children of a test with this outcome must be skipped.
    pub fn blocks_children(&self) -> bool {
        !self.is_passed()
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Passed => None,
            Self::Failed(r) | Self::Skipped(r) | Self::TimedOut(r) => Some(r),
        }
    }

    /// Fixed-width label used in the text report.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Passed => "OK",
            Self::Failed(_) => "FAIL",
            Self::Skipped(_) => "SKIP",
            Self::TimedOut(_) => "TIMEOUT",
        }
    }
}

/// One test's entry in a report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestRecord {
    pub id: String,
    pub name: String,
    pub parent: Option<String>,
    pub points: u32,
    pub outcome: RunOutcome,
    pub duration: Duration,
}

impl TestRecord {
    pub fn earned(&self) -> u32 {
        if self.outcome.is_passed() {
            self.points
        } else {
            0
        }
    }
}

/// Output format for [`Report::render`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportMode {
    Human,
    Json,
}

/// Aggregated results of a run, in execution order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    records: Vec<TestRecord>,
}

impl Report {
    pub fn new(records: Vec<TestRecord>) -> Self {
        Self { records }
    }

    pub fn records(&self) -> &[TestRecord] {
        &self.records
    }

    pub fn get(&self, id: &str) -> Option<&TestRecord> {
        self.records.iter().find(|r| r.id == id)
    }

    /// Points from passed tests. Summed as `u64` so no suite can overflow.
    pub fn earned(&self) -> u64 {
        self.records.iter().map(|r| u64::from(r.earned())).sum()
    }

    /// Points from every reported test.
    pub fn possible(&self) -> u64 {
        self.records.iter().map(|r| u64::from(r.points)).sum()
    }

    pub fn count(&self, status: Status) -> usize {
        self.records
            .iter()
            .filter(|r| r.outcome.status() == status)
            .count()
    }

    pub fn render(&self, mode: ReportMode) -> GradeResult<String> {
        match mode {
            ReportMode::Human => Ok(self.to_human()),
            ReportMode::Json => self.to_json_string(),
        }
    }

    /// `<status> <points>/<max> <name>` per test, then the score line.
    pub fn to_human(&self) -> String {
        let mut out = String::new();
        for record in &self.records {
            let _ = writeln!(
                out,
                "{:<7} {}/{} {}",
                record.outcome.label(),
                record.earned(),
                record.points,
                record.name
            );
        }
        let _ = writeln!(out, "Score: {}/{}", self.earned(), self.possible());
        out
    }

    /// Build the structured tree.
    pub fn to_json(&self) -> JsonReport {
        let mut children: HashMap<&str, Vec<usize>> = HashMap::new();
        let mut roots = Vec::new();
        for (i, record) in self.records.iter().enumerate() {
            match record.parent.as_deref() {
                Some(parent) if self.get(parent).is_some() => {
                    children.entry(parent).or_default().push(i)
                }
                _ => roots.push(i),
            }
        }
        JsonReport {
            earned: self.earned(),
            possible: self.possible(),
            tests: roots
                .into_iter()
                .map(|i| self.node(i, &children))
                .collect(),
        }
    }

    pub fn to_json_string(&self) -> GradeResult<String> {
        serde_json::to_string_pretty(&self.to_json()).map_err(|e| std::io::Error::from(e).into())
    }

    fn node(&self, i: usize, children: &HashMap<&str, Vec<usize>>) -> JsonTestNode {
        let record = &self.records[i];
        JsonTestNode {
            id: record.id.clone(),
            name: record.name.clone(),
            points: record.points,
            earned: record.earned(),
            status: record.outcome.status(),
            reason: record.outcome.reason().map(str::to_string),
            duration_ms: record.duration.as_millis() as u64,
            children: children
                .get(record.id.as_str())
                .map(|kids| kids.iter().map(|&k| self.node(k, children)).collect())
                .unwrap_or_default(),
        }
    }
}

/// Structured report: totals plus the test tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct JsonReport {
    pub earned: u64,
    pub possible: u64,
    pub tests: Vec<JsonTestNode>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct JsonTestNode {
    pub id: String,
    pub name: String,
    pub points: u32,
    pub earned: u32,
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<JsonTestNode>,
}

/// JSON Schema of [`JsonReport`].
pub fn report_schema() -> RootSchema {
    schema_for!(JsonReport)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, parent: Option<&str>, points: u32, outcome: RunOutcome) -> TestRecord {
        TestRecord {
            id: id.to_string(),
            name: format!("lazy: {id}"),
            parent: parent.map(str::to_string),
            points,
            outcome,
            duration: Duration::from_millis(12),
        }
    }

    fn sample() -> Report {
        Report::new(vec![
            record("lazytests", None, 0, RunOutcome::Passed),
            record("pte", Some("lazytests"), 10, RunOutcome::Passed),
            record(
                "map",
                Some("lazytests"),
                20,
                RunOutcome::Failed("missing '^test lazy unmap: OK$'".into()),
            ),
            record("pgbug", None, 4, RunOutcome::TimedOut("timed out after 30s".into())),
            record("all", None, 20, RunOutcome::Skipped("parent failed".into())),
        ])
    }

    #[test]
    fn test_totals() {
        let report = sample();
        assert_eq!(report.earned(), 10);
        assert_eq!(report.possible(), 54);
        assert_eq!(report.count(Status::Passed), 2);
        assert_eq!(report.count(Status::TimedOut), 1);
    }

    #[test]
    fn test_human_lines() {
        let text = sample().to_human();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 6);
        assert_eq!(lines[1], "OK      10/10 lazy: pte");
        assert_eq!(lines[2], "FAIL    0/20 lazy: map");
        assert_eq!(lines[3], "TIMEOUT 0/4 lazy: pgbug");
        assert_eq!(lines[5], "Score: 10/54");
    }

    #[test]
    fn test_json_tree_mirrors_parents() {
        let tree = sample().to_json();
        assert_eq!(tree.earned, 10);
        assert_eq!(tree.tests.len(), 3);
        let root = &tree.tests[0];
        assert_eq!(root.id, "lazytests");
        assert_eq!(
            root.children.iter().map(|c| c.id.as_str()).collect::<Vec<_>>(),
            vec!["pte", "map"]
        );
        assert_eq!(root.children[1].status, Status::Failed);
        assert!(root.children[1].reason.as_deref().unwrap().contains("unmap"));
        assert_eq!(root.children[0].duration_ms, 12);
    }

    #[test]
    fn test_json_string_parses_back() {
        let text = sample().render(ReportMode::Json).unwrap();
        let parsed: JsonReport = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed, sample().to_json());
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["tests"][1]["status"], "timed_out");
        assert!(value["tests"][0]["children"][0].get("reason").is_none());
    }

    #[test]
    fn test_schema_names_core_fields() {
        let schema = serde_json::to_value(report_schema()).unwrap();
        let text = schema.to_string();
        for field in ["earned", "possible", "tests", "duration_ms", "children"] {
            assert!(text.contains(field), "schema missing {field}");
        }
    }

    #[test]
    fn test_totals_do_not_overflow_u32() {
        let report = Report::new(vec![
            record("a", None, u32::MAX, RunOutcome::Passed),
            record("b", None, 1, RunOutcome::Passed),
            record("c", None, u32::MAX, RunOutcome::Failed("no".into())),
        ]);
        assert_eq!(report.earned(), u64::from(u32::MAX) + 1);
        assert_eq!(report.possible(), 2 * u64::from(u32::MAX) + 1);
        assert!(report.to_human().ends_with("Score: 4294967296/8589934591\n"));
        assert_eq!(report.to_json().earned, 4_294_967_296);
    }

    #[test]
    fn test_only_passed_lets_children_run() {
        assert!(!RunOutcome::Passed.blocks_children());
        assert!(RunOutcome::Failed("x".into()).blocks_children());
        assert!(RunOutcome::Skipped("x".into()).blocks_children());
        assert!(RunOutcome::TimedOut("x".into()).blocks_children());
    }

    #[test]
    fn test_empty_report() {
        let report = Report::new(Vec::new());
        assert_eq!(report.to_human(), "Score: 0/0\n");
        assert!(report.to_json().tests.is_empty());
    }
}
