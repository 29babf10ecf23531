//! Process driver: how the emulator process is started and torn down.

use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::errors::{GradeError, GradeResult};

/// Starts the process under test with piped stdio.
pub trait ProcessDriver {
    /// Spawn the process. stdin, stdout and stderr must all be piped.
    fn spawn(&self) -> GradeResult<Child>;

    /// Command line, for logs and error messages.
    fn describe(&self) -> String;
}

/// Drives an external command.
///
/// On Unix the child is placed in its own process group so that teardown
/// reaches whatever it spawned (`make qemu` forks the emulator).
#[derive(Debug, Clone)]
pub struct CommandDriver {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
}

impl CommandDriver {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            working_dir: None,
        }
    }

    /// Run a script through `/bin/sh -c`.
    pub fn shell(script: &str) -> Self {
        Self::new("/bin/sh", ["-c", script])
    }

    /// `make <extra args...> <target>`: boot the kernel through its Makefile.
    pub fn make_target(make: &str, target: &str, extra_args: &[String]) -> Self {
        let mut args = extra_args.to_vec();
        args.push(target.to_string());
        Self::new(make, args)
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }
}

impl ProcessDriver for CommandDriver {
    fn spawn(&self) -> GradeResult<Child> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }

        debug!(command = %self.describe(), "Spawning process");
        cmd.spawn()
            .map_err(|e| GradeError::external(self.describe(), format!("spawn failed: {e}")))
    }

    fn describe(&self) -> String {
        if self.args.is_empty() {
            self.program.clone()
        } else {
            format!("{} {}", self.program, self.args.join(" "))
        }
    }
}

/// Stop a child and everything in its process group, then reap it.
///
/// Sends SIGTERM to the group, waits up to `grace` for the child to exit,
/// then SIGKILLs the group and the child. Always returns after the child
/// has been reaped.
pub fn terminate(child: &mut Child, grace: Duration) -> std::io::Result<ExitStatus> {
    let pid = child.id();
    signal_group(pid, GroupSignal::Term);

    let deadline = Instant::now() + grace;
    while Instant::now() < deadline {
        if child.try_wait()?.is_some() {
            break;
        }
        thread::sleep(Duration::from_millis(10));
    }

    // Also reaches descendants that outlived the leader.
    signal_group(pid, GroupSignal::Kill);
    if let Err(e) = child.kill() {
        debug!(pid, error = %e, "kill after group signal");
    }
    child.wait()
}

/// Kill whatever is left in the process group of a leader that has already
/// exited and been reaped.
pub(crate) fn kill_orphans(pgid: u32) {
    signal_group(pgid, GroupSignal::Kill);
}

#[derive(Debug, Clone, Copy)]
enum GroupSignal {
    Term,
    Kill,
}

#[cfg(unix)]
fn signal_group(pgid: u32, which: GroupSignal) {
    use nix::errno::Errno;
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pgid) else {
        return;
    };
    let signal = match which {
        GroupSignal::Term => Signal::SIGTERM,
        GroupSignal::Kill => Signal::SIGKILL,
    };
    match killpg(Pid::from_raw(raw), signal) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(e) => warn!(pgid, ?signal, error = %e, "Could not signal process group"),
    }
}

#[cfg(not(unix))]
fn signal_group(_pgid: u32, _which: GroupSignal) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe() {
        let d = CommandDriver::make_target("make", "qemu", &["-s".to_string()]);
        assert_eq!(d.describe(), "make -s qemu");
        assert_eq!(CommandDriver::new("true", Vec::<String>::new()).describe(), "true");
    }

    #[test]
    fn test_spawn_missing_program_is_external_failure() {
        let d = CommandDriver::new("/nonexistent/labgrade-emulator", Vec::<String>::new());
        let err = d.spawn().unwrap_err();
        assert!(err.is_fatal());
        assert!(matches!(err, GradeError::ExternalToolFailure { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn test_terminate_reaps_long_running_child() {
        let mut child = CommandDriver::shell("exec sleep 30").spawn().unwrap();
        let start = Instant::now();
        let status = terminate(&mut child, Duration::from_millis(200)).unwrap();
        assert!(!status.success());
        assert!(start.elapsed() < Duration::from_secs(5));
        assert!(child.try_wait().unwrap().is_some());
    }
}
