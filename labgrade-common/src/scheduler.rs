//! Sequential test scheduler.
//!
//! Walks the registry in insertion order. A test whose parent did not pass
//! is skipped without running its body; every other selected test runs.
//! Per-test errors become outcomes; fatal errors end the run.

use std::collections::{HashMap, HashSet};
use std::panic::{self, AssertUnwindSafe};
use std::time::{Duration, Instant};

use tracing::{error, info, warn};

use crate::errors::{GradeError, GradeResult};
use crate::registry::{TestCase, TestRegistry};
use crate::report::{Report, RunOutcome, Status, TestRecord};

/// State handed to every test body.
///
/// The hooks let the context prepare per-test settings (such as the session
/// timeout) and react to outcomes.
pub trait TestContext {
    /// Called before a test body runs.
    fn begin_test(&mut self, _id: &str, _timeout: Option<Duration>) {}

    /// Called after a test body has produced an outcome.
    fn end_test(&mut self, _id: &str, _outcome: &RunOutcome) {}
}

impl TestContext for () {}

/// Runs a registry against a context.
pub struct Scheduler<C> {
    registry: TestRegistry<C>,
    filters: Vec<String>,
}

impl<C: TestContext> Scheduler<C> {
    pub fn new(registry: TestRegistry<C>) -> Self {
        Self {
            registry,
            filters: Vec::new(),
        }
    }

    /// Restrict the run to tests whose id equals, or whose id or name starts
    /// with, one of `filters`. Ancestors of selected tests are run too.
    #[must_use]
    pub fn with_filters<I, S>(mut self, filters: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.filters = filters.into_iter().map(Into::into).collect();
        self
    }

    pub fn registry(&self) -> &TestRegistry<C> {
        &self.registry
    }

    /// Ids that will run, in order.
    pub fn selection(&self) -> GradeResult<Vec<String>> {
        let selected = self.selected()?;
        Ok(self
            .registry
            .iter()
            .filter(|c| selected.contains(c.id()))
            .map(|c| c.id().to_string())
            .collect())
    }

    /// Run every selected test and build the report.
    ///
    /// Registration problems are reported before any body runs. A fatal
    /// error from a body aborts the run.
    pub fn run(mut self, ctx: &mut C) -> GradeResult<Report> {
        self.registry.validate()?;
        let selected = self.selected()?;
        info!(
            tests = selected.len(),
            total = self.registry.len(),
            "Starting grading run"
        );

        let mut outcomes: HashMap<String, RunOutcome> = HashMap::new();
        let mut records = Vec::with_capacity(selected.len());

        for case in self.registry.cases_mut() {
            if !selected.contains(case.id()) {
                continue;
            }

            let start = Instant::now();
            let outcome = match blocked_by(case, &outcomes) {
                Some(reason) => {
                    info!(test_id = case.id(), reason = %reason, "Skipping");
                    RunOutcome::Skipped(reason)
                }
                None => run_one(case, ctx)?,
            };
            let duration = start.elapsed();

            ctx.end_test(case.id(), &outcome);
            outcomes.insert(case.id().to_string(), outcome.clone());
            records.push(TestRecord {
                id: case.id().to_string(),
                name: case.name().to_string(),
                parent: case.parent().map(str::to_string),
                points: case.points(),
                outcome,
                duration,
            });
        }

        let report = Report::new(records);
        info!(
            earned = report.earned(),
            possible = report.possible(),
            "Grading run finished"
        );
        Ok(report)
    }

    fn selected(&self) -> GradeResult<HashSet<String>> {
        if self.filters.is_empty() {
            return Ok(self.registry.iter().map(|c| c.id().to_string()).collect());
        }

        let mut selected = HashSet::new();
        for case in self.registry.iter() {
            let hit = self.filters.iter().any(|f| {
                case.id() == f.as_str()
                    || case.id().starts_with(f.as_str())
                    || case.name().starts_with(f.as_str())
            });
            if hit {
                selected.insert(case.id().to_string());
                selected.extend(
                    self.registry
                        .ancestors(case.id())
                        .into_iter()
                        .map(str::to_string),
                );
            }
        }
        if selected.is_empty() {
            return Err(GradeError::Config(format!(
                "no test matches {}",
                self.filters.join(", ")
            )));
        }
        Ok(selected)
    }
}

/// Reason to skip `case`, if its parent did not pass.
///
/// Skips propagate, so looking at the direct parent covers every ancestor.
fn blocked_by<C>(case: &TestCase<C>, outcomes: &HashMap<String, RunOutcome>) -> Option<String> {
    let parent = case.parent()?;
    let Some(outcome) = outcomes.get(parent) else {
        return Some(format!("parent '{parent}' did not run"));
    };
    if !outcome.blocks_children() {
        return None;
    }
    let what = match outcome.status() {
        Status::Passed => "passed",
        Status::Failed => "failed",
        Status::TimedOut => "timed out",
        Status::Skipped => "was skipped",
    };
    Some(format!("parent '{parent}' {what}"))
}

fn run_one<C: TestContext>(case: &mut TestCase<C>, ctx: &mut C) -> GradeResult<RunOutcome> {
    info!(test_id = case.id(), name = case.name(), points = case.points(), "Running test");
    ctx.begin_test(case.id(), case.timeout());

    let result = panic::catch_unwind(AssertUnwindSafe(|| case.run_body(ctx)));
    let outcome = match result {
        Ok(Ok(())) => RunOutcome::Passed,
        Ok(Err(e)) if e.is_fatal() => {
            error!(test_id = case.id(), error = %e, "Fatal error, aborting run");
            return Err(e);
        }
        Ok(Err(e)) if e.is_timeout() => RunOutcome::TimedOut(e.to_string()),
        Ok(Err(e)) => RunOutcome::Failed(e.to_string()),
        Err(payload) => RunOutcome::Failed(format!("panicked: {}", panic_message(&*payload))),
    };

    match &outcome {
        RunOutcome::Passed => info!(test_id = case.id(), "Passed"),
        other => warn!(
            test_id = case.id(),
            status = other.label(),
            reason = other.reason().unwrap_or_default(),
            "Did not pass"
        ),
    }
    Ok(outcome)
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
