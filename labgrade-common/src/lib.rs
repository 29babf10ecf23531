//! Grading engine for OS course labs.
//!
//! Boots a kernel in an emulator, scripts its shell, captures the console
//! stream and scores it against expected output:
//!
//! - [`pattern`]: line-anchored regexes and expected-output templates
//! - [`session`]: one emulator process with a captured buffer and a timeout
//! - [`registry`] and [`scheduler`]: ordered, parent-gated test execution
//! - [`report`]: score totals as text or a JSON tree
//! - [`runner`]: the context test bodies use to drive and check the emulator

#![deny(unsafe_code)]

pub mod config;
pub mod errors;
pub mod image;
pub mod logging;
pub mod pattern;
pub mod registry;
pub mod report;
pub mod runner;
pub mod scheduler;
pub mod session;
pub mod testing;

pub use config::GradeConfig;
pub use errors::{GradeError, GradeResult, assert_equal};
pub use image::{ImageBuilder, MakeImageBuilder};
pub use logging::{LogConfig, init_logging};
pub use pattern::derive::{ShiftRelation, check_pte_pa, parse_hex};
pub use pattern::{LineMatch, MatchResult, Pattern, Template};
pub use registry::{TestCase, TestRegistry};
pub use report::{JsonReport, Report, ReportMode, RunOutcome, Status, report_schema};
pub use runner::Runner;
pub use scheduler::{Scheduler, TestContext};
pub use session::{
    CommandDriver, OutputMonitor, ProcessDriver, ProcessSession, SessionOptions, SessionOutcome,
    ShellScript, StopOnLine,
};
