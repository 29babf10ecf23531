//! Harness configuration.
//!
//! Every knob is an environment variable with the `GRADE_` prefix. Parsing
//! collects all problems before failing, and each value remembers whether it
//! came from the environment or a default.

pub mod env;
pub mod source;

use std::path::PathBuf;
use std::time::Duration;

use tracing::debug;

pub use env::{EnvError, EnvParser};
pub use source::{ConfigSource, Sourced};

use crate::errors::{GradeError, GradeResult};

pub const DEFAULT_MAKE: &str = "make";
pub const DEFAULT_QEMU_TARGET: &str = "qemu";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
pub const MAX_TIMEOUT_SECS: u64 = 3600;
pub const DEFAULT_SAVE_PATH: &str = "xv6.out";
pub const DEFAULT_KILL_GRACE_MS: u64 = 500;

/// Resolved harness configuration.
#[derive(Debug, Clone)]
pub struct GradeConfig {
    /// Build tool program.
    pub make: Sourced<String>,
    /// Make target that boots the kernel in the emulator.
    pub qemu_target: Sourced<String>,
    /// Extra arguments passed to every make invocation.
    pub make_args: Sourced<Vec<String>>,
    /// Session timeout for tests that do not set their own, in seconds.
    pub timeout_secs: Sourced<u64>,
    /// Where the last session's output is written.
    pub save_path: Sourced<PathBuf>,
    /// Shell prompt that paces scripted commands.
    pub prompt: Sourced<String>,
    pub kill_grace_ms: Sourced<u64>,
}

impl Default for GradeConfig {
    fn default() -> Self {
        Self {
            make: Sourced::default_value(DEFAULT_MAKE.to_string()),
            qemu_target: Sourced::default_value(DEFAULT_QEMU_TARGET.to_string()),
            make_args: Sourced::default_value(Vec::new()),
            timeout_secs: Sourced::default_value(DEFAULT_TIMEOUT_SECS),
            save_path: Sourced::default_value(PathBuf::from(DEFAULT_SAVE_PATH)),
            prompt: Sourced::default_value(crate::session::DEFAULT_PROMPT.to_string()),
            kill_grace_ms: Sourced::default_value(DEFAULT_KILL_GRACE_MS),
        }
    }
}

impl GradeConfig {
    /// Read the configuration from `GRADE_*` variables.
    ///
    /// Every invalid variable is reported in one `GradeError::Config`.
    pub fn from_env() -> GradeResult<Self> {
        let mut parser = EnvParser::new();
        let config = Self {
            make: parser.get_nonempty_string("MAKE", DEFAULT_MAKE),
            qemu_target: parser.get_nonempty_string("QEMU_TARGET", DEFAULT_QEMU_TARGET),
            make_args: parser.get_word_list("MAKE_ARGS"),
            timeout_secs: parser.get_u64_range(
                "TIMEOUT_SECS",
                DEFAULT_TIMEOUT_SECS,
                1,
                MAX_TIMEOUT_SECS,
            ),
            save_path: parser.get_path("SAVE_PATH", DEFAULT_SAVE_PATH),
            prompt: parser.get_nonempty_string("PROMPT", crate::session::DEFAULT_PROMPT),
            kill_grace_ms: parser.get_u64_range("KILL_GRACE_MS", DEFAULT_KILL_GRACE_MS, 0, 60_000),
        };

        let errors = parser.take_errors();
        if !errors.is_empty() {
            let listed: Vec<String> = errors.iter().map(ToString::to_string).collect();
            return Err(GradeError::Config(listed.join("; ")));
        }

        config.log_sources();
        Ok(config)
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.value)
    }

    pub fn kill_grace(&self) -> Duration {
        Duration::from_millis(self.kill_grace_ms.value)
    }

    fn log_sources(&self) {
        debug!(value = %self.make.value, source = %self.make.source, "GRADE_MAKE");
        debug!(value = %self.qemu_target.value, source = %self.qemu_target.source, "GRADE_QEMU_TARGET");
        debug!(value = ?self.make_args.value, source = %self.make_args.source, "GRADE_MAKE_ARGS");
        debug!(value = self.timeout_secs.value, source = %self.timeout_secs.source, "GRADE_TIMEOUT_SECS");
        debug!(value = %self.save_path.value.display(), source = %self.save_path.source, "GRADE_SAVE_PATH");
        debug!(value = ?self.prompt.value, source = %self.prompt.source, "GRADE_PROMPT");
        debug!(value = self.kill_grace_ms.value, source = %self.kill_grace_ms.source, "GRADE_KILL_GRACE_MS");
    }
}

#[cfg(test)]
pub(crate) fn env_test_lock() -> std::sync::MutexGuard<'static, ()> {
    use std::sync::{Mutex, OnceLock};

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    ENV_LOCK
        .get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|e| e.into_inner())
}
