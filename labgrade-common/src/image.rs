//! Disk image rebuilding.

use std::path::PathBuf;
use std::time::Duration;

use tracing::{debug, info};

use crate::errors::{GradeError, GradeResult};
use crate::pattern::{EXCERPT_LINES, excerpt};
use crate::session::{CommandDriver, ProcessSession, SessionOptions, SessionOutcome, WaitForExit};

/// Longest a single image build may take.
pub const BUILD_TIMEOUT: Duration = Duration::from_secs(300);

/// Regenerates on-disk images before a test boots the kernel.
pub trait ImageBuilder {
    /// Delete `name` and build it again. Any failure is fatal.
    fn rebuild_image(&mut self, name: &str) -> GradeResult<()>;
}

/// Rebuilds images with `make <name>` in a working directory.
#[derive(Debug, Clone)]
pub struct MakeImageBuilder {
    make: String,
    extra_args: Vec<String>,
    dir: PathBuf,
    timeout: Duration,
}

impl MakeImageBuilder {
    pub fn new(make: impl Into<String>, extra_args: Vec<String>, dir: impl Into<PathBuf>) -> Self {
        Self {
            make: make.into(),
            extra_args,
            dir: dir.into(),
            timeout: BUILD_TIMEOUT,
        }
    }
}

impl ImageBuilder for MakeImageBuilder {
    fn rebuild_image(&mut self, name: &str) -> GradeResult<()> {
        let target = self.dir.join(name);
        match std::fs::remove_file(&target) {
            Ok(()) => debug!(path = %target.display(), "Removed stale image"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let driver =
            CommandDriver::make_target(&self.make, name, &self.extra_args).current_dir(&self.dir);
        info!(image = name, "Rebuilding image");
        let session = ProcessSession::run(
            &driver,
            &mut WaitForExit,
            self.timeout,
            &SessionOptions::default(),
        )?;

        match session.outcome() {
            SessionOutcome::Exited { code: Some(0) } => Ok(()),
            SessionOutcome::TimedOut => Err(GradeError::external(
                session.command(),
                format!("no result after {:?}", self.timeout),
            )),
            SessionOutcome::Exited { code } => Err(GradeError::external(
                session.command(),
                format!(
                    "exit status {}\n{}",
                    code.map_or_else(|| "signal".to_string(), |c| c.to_string()),
                    excerpt(session.output(), EXCERPT_LINES)
                ),
            )),
            SessionOutcome::Completed => Ok(()),
        }
    }
}
