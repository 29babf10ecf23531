//! Process sessions: one lifetime of the emulator under test.
//!
//! [`ProcessSession::run`] launches the process through a
//! [`ProcessDriver`], streams its stdout and stderr into one append-only
//! buffer, lets an [`OutputMonitor`] feed input and detect completion, and
//! enforces a wall-clock timeout. It blocks until the process is gone; the
//! returned session holds the frozen buffer.

pub mod driver;
pub mod script;

use std::io::{Read, Write};
use std::process::ChildStdin;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::errors::GradeResult;

pub use driver::{CommandDriver, ProcessDriver, terminate};
pub use script::{
    DEFAULT_PROMPT, MonitorAction, OutputMonitor, ShellScript, StopOnLine, WaitForExit,
};

/// Tunables for a session.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// How often the child and the buffer are polled.
    pub poll_interval: Duration,
    /// Time between SIGTERM and SIGKILL at teardown.
    pub kill_grace: Duration,
    /// How long to wait for output readers to drain after teardown.
    pub drain_timeout: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(10),
            kill_grace: Duration::from_millis(500),
            drain_timeout: Duration::from_secs(1),
        }
    }
}

/// How a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum SessionOutcome {
    /// The process exited on its own.
    Exited { code: Option<i32> },
    /// The monitor saw its completion condition; the process was stopped.
    Completed,
    /// The timeout fired; the process was stopped.
    TimedOut,
}

/// A finished session and its captured output.
#[derive(Debug, Clone)]
pub struct ProcessSession {
    command: String,
    output: String,
    outcome: SessionOutcome,
    timeout: Duration,
    elapsed: Duration,
    waiting_for: String,
}

impl ProcessSession {
    /// Run the process to completion, exit, or timeout.
    ///
    /// Returns `Err` only when the process cannot be started or reaped; a
    /// timeout is reported through [`SessionOutcome::TimedOut`].
    pub fn run(
        driver: &dyn ProcessDriver,
        monitor: &mut dyn OutputMonitor,
        timeout: Duration,
        options: &SessionOptions,
    ) -> GradeResult<Self> {
        let command = driver.describe();
        info!(command = %command, timeout_ms = timeout.as_millis() as u64, "Starting session");

        let start = Instant::now();
        let mut child = driver.spawn()?;
        let captured: Arc<Mutex<Vec<u8>>> = Arc::new(Mutex::new(Vec::new()));

        let mut readers = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            readers.push(spawn_reader(stdout, Arc::clone(&captured)));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(spawn_reader(stderr, Arc::clone(&captured)));
        }

        let mut stdin = child.stdin.take();
        if let Some(input) = monitor.initial_input() {
            send(&mut stdin, &input);
        }

        let mut consumed = 0usize;
        let outcome = loop {
            if let Some(text) = take_new_text(&captured, &mut consumed) {
                match monitor.on_output(&text) {
                    MonitorAction::Continue => {}
                    MonitorAction::Send(input) => {
                        debug!(input = %input.trim_end(), "Sending input");
                        send(&mut stdin, &input);
                    }
                    MonitorAction::Complete => {
                        debug!("Completion condition observed");
                        drop(stdin.take());
                        terminate(&mut child, options.kill_grace)?;
                        break SessionOutcome::Completed;
                    }
                }
            }

            if let Some(status) = child.try_wait()? {
                // Background children may still hold the output pipes.
                driver::kill_orphans(child.id());
                break SessionOutcome::Exited {
                    code: status.code(),
                };
            }

            if start.elapsed() >= timeout {
                warn!(command = %command, timeout_ms = timeout.as_millis() as u64, "Session timed out");
                drop(stdin.take());
                terminate(&mut child, options.kill_grace)?;
                break SessionOutcome::TimedOut;
            }

            thread::sleep(options.poll_interval);
        };
        drop(stdin);

        join_readers(readers, options.drain_timeout);
        let output = {
            let bytes = captured.lock().unwrap_or_else(|e| e.into_inner());
            String::from_utf8_lossy(&bytes).into_owned()
        };
        let elapsed = start.elapsed();
        info!(
            command = %command,
            outcome = ?outcome,
            bytes = output.len(),
            elapsed_ms = elapsed.as_millis() as u64,
            "Session finished"
        );

        Ok(Self {
            command,
            output,
            outcome,
            timeout,
            elapsed,
            waiting_for: monitor.describe(),
        })
    }

    /// Everything the process wrote, stdout and stderr interleaved.
    pub fn output(&self) -> &str {
        &self.output
    }

    pub fn outcome(&self) -> SessionOutcome {
        self.outcome
    }

    pub fn timed_out(&self) -> bool {
        self.outcome == SessionOutcome::TimedOut
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// What the monitor was still waiting for when the session ended.
    pub fn waiting_for(&self) -> &str {
        &self.waiting_for
    }
}

fn spawn_reader<R>(mut source: R, sink: Arc<Mutex<Vec<u8>>>) -> JoinHandle<()>
where
    R: Read + Send + 'static,
{
    thread::spawn(move || {
        let mut buf = [0u8; 4096];
        loop {
            match source.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => sink
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .extend_from_slice(&buf[..n]),
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(_) => break,
            }
        }
    })
}

/// Decode the bytes captured since `consumed`, stopping before a UTF-8
/// sequence that has not fully arrived yet.
fn take_new_text(captured: &Mutex<Vec<u8>>, consumed: &mut usize) -> Option<String> {
    let bytes = captured.lock().unwrap_or_else(|e| e.into_inner());
    let fresh = &bytes[*consumed..];
    if fresh.is_empty() {
        return None;
    }
    let usable = match std::str::from_utf8(fresh) {
        Ok(_) => fresh.len(),
        // Invalid bytes: decode lossily rather than stall.
        Err(e) if e.error_len().is_some() => fresh.len(),
        Err(e) => e.valid_up_to(),
    };
    if usable == 0 {
        return None;
    }
    *consumed += usable;
    Some(String::from_utf8_lossy(&fresh[..usable]).into_owned())
}

fn send(stdin: &mut Option<ChildStdin>, input: &str) {
    let Some(pipe) = stdin.as_mut() else {
        return;
    };
    if let Err(e) = pipe.write_all(input.as_bytes()).and_then(|()| pipe.flush()) {
        warn!(error = %e, "Could not write to process stdin");
        *stdin = None;
    }
}

fn join_readers(readers: Vec<JoinHandle<()>>, limit: Duration) {
    let deadline = Instant::now() + limit;
    for reader in readers {
        while !reader.is_finished() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        if reader.is_finished() {
            let _ = reader.join();
        } else {
            warn!("Output pipe still open after teardown; detaching reader");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_take_new_text_waits_for_complete_utf8() {
        // "é" is 0xC3 0xA9.
        let captured = Mutex::new(b"ab\xC3".to_vec());
        let mut consumed = 0;
        assert_eq!(take_new_text(&captured, &mut consumed).as_deref(), Some("ab"));
        assert_eq!(consumed, 2);
        assert_eq!(take_new_text(&captured, &mut consumed), None);

        captured.lock().unwrap().push(0xA9);
        assert_eq!(take_new_text(&captured, &mut consumed).as_deref(), Some("é"));
        assert_eq!(consumed, 4);
    }

    #[test]
    fn test_take_new_text_invalid_bytes_are_lossy() {
        let captured = Mutex::new(b"a\xFFb".to_vec());
        let mut consumed = 0;
        assert_eq!(
            take_new_text(&captured, &mut consumed).as_deref(),
            Some("a\u{FFFD}b")
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_run_until_exit() {
        let driver = CommandDriver::shell("echo hello; echo oops >&2; exit 3");
        let session = ProcessSession::run(
            &driver,
            &mut WaitForExit,
            Duration::from_secs(10),
            &SessionOptions::default(),
        )
        .unwrap();
        assert_eq!(session.outcome(), SessionOutcome::Exited { code: Some(3) });
        assert!(session.output().contains("hello"));
        assert!(session.output().contains("oops"));
        assert!(!session.timed_out());
    }
}
