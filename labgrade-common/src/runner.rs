//! The test context: drives the emulator and checks its output.
//!
//! A [`Runner`] owns at most one finished [`ProcessSession`]. Starting a new
//! session replaces the previous buffer, and every match queries the buffer
//! of the most recent session from its first line.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{info, warn};

use crate::config::GradeConfig;
use crate::errors::{GradeError, GradeResult};
use crate::image::{ImageBuilder, MakeImageBuilder};
use crate::pattern::{EXCERPT_LINES, LineMatch, MatchResult, Pattern, Template, excerpt};
use crate::report::RunOutcome;
use crate::scheduler::TestContext;
use crate::session::{
    CommandDriver, OutputMonitor, ProcessDriver, ProcessSession, SessionOptions, ShellScript,
};

pub struct Runner {
    driver: Box<dyn ProcessDriver>,
    images: Box<dyn ImageBuilder>,
    options: SessionOptions,
    default_timeout: Duration,
    timeout: Duration,
    save_path: PathBuf,
    prompt: String,
    session: Option<ProcessSession>,
}

impl Runner {
    /// Boot with `make <qemu target>` and rebuild images with `make <image>`,
    /// both inside `dir`.
    pub fn new(config: &GradeConfig, dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        let driver = CommandDriver::make_target(
            &config.make.value,
            &config.qemu_target.value,
            &config.make_args.value,
        )
        .current_dir(dir);
        let images = MakeImageBuilder::new(
            config.make.value.clone(),
            config.make_args.value.clone(),
            dir,
        );
        Self::with_parts(config, Box::new(driver), Box::new(images))
    }

    /// Assemble a runner from explicit collaborators.
    pub fn with_parts(
        config: &GradeConfig,
        driver: Box<dyn ProcessDriver>,
        images: Box<dyn ImageBuilder>,
    ) -> Self {
        let options = SessionOptions {
            kill_grace: config.kill_grace(),
            ..SessionOptions::default()
        };
        Self {
            driver,
            images,
            options,
            default_timeout: config.default_timeout(),
            timeout: config.default_timeout(),
            save_path: config.save_path.value.clone(),
            prompt: config.prompt.value.clone(),
            session: None,
        }
    }

    /// Timeout applied to the next session.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    pub fn save_path(&self) -> &Path {
        &self.save_path
    }

    pub fn session(&self) -> Option<&ProcessSession> {
        self.session.as_ref()
    }

    /// Captured output of the most recent session; empty before the first.
    pub fn output(&self) -> &str {
        self.session.as_ref().map_or("", ProcessSession::output)
    }

    /// Boot the emulator and run it under `monitor` until it exits, the
    /// monitor completes, or the timeout fires.
    ///
    /// The output is saved either way. A timeout is returned as
    /// `SessionTimeout`; the partial buffer stays available for matching.
    pub fn run_qemu(&mut self, monitor: &mut dyn OutputMonitor) -> GradeResult<&ProcessSession> {
        self.session = None;
        let session =
            ProcessSession::run(self.driver.as_ref(), monitor, self.timeout, &self.options)?;
        std::fs::write(&self.save_path, session.output())?;

        let timed_out = session.timed_out();
        let session = self.session.insert(session);
        if timed_out {
            return Err(GradeError::SessionTimeout {
                timeout: session.timeout(),
                waiting_for: session.waiting_for().to_string(),
                excerpt: excerpt(session.output(), EXCERPT_LINES),
            });
        }
        Ok(session)
    }

    /// Type `commands` into the shell one prompt at a time, then stop.
    ///
    /// If the emulator exits before the shell asked for every command, the
    /// first unsent command is reported as a `PatternMismatch` on the prompt.
    pub fn run_script<I, S>(&mut self, commands: I) -> GradeResult<&ProcessSession>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let prompt = self.prompt.clone();
        let mut script = ShellScript::new(commands).with_prompt(prompt.clone());
        let session = self.run_qemu(&mut script)?;
        if let Some(unsent) = script.commands().get(script.sent()) {
            warn!(command = %unsent, "Emulator exited before the shell took every command");
            return Err(GradeError::PatternMismatch {
                pattern: format!("{prompt}(prompt for '{unsent}')"),
                excerpt: excerpt(session.output(), EXCERPT_LINES),
            });
        }
        Ok(session)
    }

    pub fn rebuild_image(&mut self, name: &str) -> GradeResult<()> {
        self.images.rebuild_image(name)
    }

    /// First line matching `pattern`.
    pub fn match_pattern(&self, pattern: &Pattern) -> GradeResult<LineMatch> {
        match pattern.find_first(self.output()) {
            MatchResult::Found(hit) => Ok(hit),
            MatchResult::NotFound => Err(self.mismatch(pattern.source())),
        }
    }

    /// First line matching a line-anchored regex.
    pub fn match_regex(&self, regex: &str) -> GradeResult<LineMatch> {
        self.match_pattern(&Pattern::regex(regex)?)
    }

    /// Every template line, in order.
    pub fn match_template(&self, template: &Template) -> GradeResult<Vec<LineMatch>> {
        template
            .match_in_order(self.output())
            .map_err(|missing| self.mismatch(missing.source()))
    }

    /// Every regex must match some line; all missing ones are reported.
    pub fn match_all(&self, regexes: &[&str]) -> GradeResult<Vec<LineMatch>> {
        let mut found = Vec::with_capacity(regexes.len());
        let mut missing = Vec::new();
        for source in regexes {
            match Pattern::regex(source)?.find_first(self.output()) {
                MatchResult::Found(hit) => found.push(hit),
                MatchResult::NotFound => missing.push(*source),
            }
        }
        if missing.is_empty() {
            Ok(found)
        } else {
            Err(self.mismatch(&missing.join("', '")))
        }
    }

    /// No line may match any of `regexes`.
    pub fn assert_absent(&self, regexes: &[&str]) -> GradeResult<()> {
        for source in regexes {
            if let MatchResult::Found(hit) = Pattern::regex(source)?.find_first(self.output()) {
                return Err(GradeError::assertion(format!(
                    "unexpected line {}: '{}' matches '{source}'",
                    hit.line_no + 1,
                    hit.line
                )));
            }
        }
        Ok(())
    }

    /// All lines matching a line-anchored regex, with their captures.
    pub fn find_all(&self, regex: &str) -> GradeResult<Vec<LineMatch>> {
        Ok(Pattern::regex(regex)?.find_all(self.output()))
    }

    /// A failed match against a timed-out session is a timeout, not a
    /// mismatch.
    fn mismatch(&self, pattern: &str) -> GradeError {
        let excerpt = excerpt(self.output(), EXCERPT_LINES);
        match &self.session {
            Some(session) if session.timed_out() => GradeError::SessionTimeout {
                timeout: session.timeout(),
                waiting_for: pattern.to_string(),
                excerpt,
            },
            _ => GradeError::PatternMismatch {
                pattern: pattern.to_string(),
                excerpt,
            },
        }
    }
}

impl TestContext for Runner {
    fn begin_test(&mut self, _id: &str, timeout: Option<Duration>) {
        self.timeout = timeout.unwrap_or(self.default_timeout);
    }

    fn end_test(&mut self, id: &str, outcome: &RunOutcome) {
        if outcome.is_passed() || matches!(outcome, RunOutcome::Skipped(_)) {
            return;
        }
        if self.session.is_some() {
            info!(
                test_id = id,
                path = %self.save_path.display(),
                "Full emulator output saved"
            );
        } else {
            warn!(test_id = id, "No emulator output captured");
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::config::Sourced;

    struct NoImages;

    impl ImageBuilder for NoImages {
        fn rebuild_image(&mut self, _name: &str) -> GradeResult<()> {
            Ok(())
        }
    }

    fn runner(script: &str, save: &Path) -> Runner {
        let config = GradeConfig {
            save_path: Sourced::default_value(save.to_path_buf()),
            ..GradeConfig::default()
        };
        Runner::with_parts(
            &config,
            Box::new(CommandDriver::shell(script)),
            Box::new(NoImages),
        )
    }

    #[test]
    fn test_output_saved_and_matched() {
        let tmp = tempfile::tempdir().unwrap();
        let save = tmp.path().join("xv6.out");
        let mut r = runner("echo 'test lazy alloc: OK'; echo 'x 1'; echo 'x 2'", &save);
        r.run_qemu(&mut crate::session::WaitForExit).unwrap();

        assert!(std::fs::read_to_string(&save).unwrap().contains("lazy alloc"));
        r.match_regex("^test lazy alloc: OK$").unwrap();
        assert_eq!(r.find_all(r"^x (\d)$").unwrap().len(), 2);
        r.match_all(&["x 1", "x 2"]).unwrap();
        r.assert_absent(&["^panic.*"]).unwrap();
    }

    #[test]
    fn test_mismatch_names_pattern() {
        let tmp = tempfile::tempdir().unwrap();
        let mut r = runner("echo hello", &tmp.path().join("out"));
        r.run_qemu(&mut crate::session::WaitForExit).unwrap();

        let err = r.match_all(&["hello", "^ALL TESTS PASSED$"]).unwrap_err();
        match err {
            GradeError::PatternMismatch { pattern, excerpt } => {
                assert_eq!(pattern, "^ALL TESTS PASSED$");
                assert!(excerpt.contains("hello"));
            }
            other => panic!("expected mismatch, got {other:?}"),
        }
    }

    #[test]
    fn test_assert_absent_reports_line() {
        let tmp = tempfile::tempdir().unwrap();
        let mut r = runner("echo ok; echo 'panic: kerneltrap'", &tmp.path().join("out"));
        r.run_qemu(&mut crate::session::WaitForExit).unwrap();
        let err = r.assert_absent(&["^panic: .*"]).unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }

    #[test]
    fn test_timeout_turns_mismatch_into_timeout() {
        let tmp = tempfile::tempdir().unwrap();
        let mut r = runner("echo booting; exec sleep 30", &tmp.path().join("out"));
        r.set_timeout(Duration::from_millis(300));

        let err = r.run_qemu(&mut crate::session::WaitForExit).unwrap_err();
        assert!(err.is_timeout());
        assert!(r.output().contains("booting"));
        assert!(r.match_regex("^booting$").is_ok());
        assert!(r.match_regex("^ALL TESTS PASSED$").unwrap_err().is_timeout());
    }

    #[test]
    fn test_script_on_dead_shell_names_unsent_command() {
        let tmp = tempfile::tempdir().unwrap();
        let save = tmp.path().join("out");
        let mut r = runner("echo 'panic: kerneltrap'", &save);

        let err = r.run_script(["lazytests", "usertests"]).unwrap_err();
        assert!(!err.is_timeout());
        match err {
            GradeError::PatternMismatch { pattern, excerpt } => {
                assert!(pattern.contains("'lazytests'"), "{pattern}");
                assert!(excerpt.contains("panic: kerneltrap"));
            }
            other => panic!("expected mismatch, got {other:?}"),
        }
        assert!(std::fs::read_to_string(&save).unwrap().contains("kerneltrap"));
    }

    #[test]
    fn test_begin_test_applies_timeout() {
        let tmp = tempfile::tempdir().unwrap();
        let mut r = runner("true", &tmp.path().join("out"));
        r.begin_test("slow", Some(Duration::from_secs(300)));
        assert_eq!(r.timeout(), Duration::from_secs(300));
        r.begin_test("fast", None);
        assert_eq!(r.timeout(), Duration::from_secs(30));
    }
}
