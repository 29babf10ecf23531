//! Output monitors: decide what to feed the process and when to stop it.
//!
//! A [`ProcessSession`](super::ProcessSession) hands every new piece of
//! captured output to its monitor. The monitor answers with a
//! [`MonitorAction`]: keep reading, write some input, or declare the session
//! complete so the process is torn down.

use memchr::memmem;

use crate::pattern::Pattern;

/// Prompt printed by the xv6 shell.
pub const DEFAULT_PROMPT: &str = "$ ";

/// What the session should do after a monitor has seen new output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorAction {
    Continue,
    /// Write these bytes to the process's stdin.
    Send(String),
    /// The expected output has been produced; terminate the process.
    Complete,
}

/// Observes captured output as it arrives.
pub trait OutputMonitor {
    /// Called with each chunk of newly captured text.
    fn on_output(&mut self, chunk: &str) -> MonitorAction;

    /// Input written as soon as the process has started.
    fn initial_input(&mut self) -> Option<String> {
        None
    }

    /// Human description of the completion condition (for timeout reports).
    fn describe(&self) -> String;
}

/// Reads until the process exits on its own.
#[derive(Debug, Default, Clone, Copy)]
pub struct WaitForExit;

impl OutputMonitor for WaitForExit {
    fn on_output(&mut self, _chunk: &str) -> MonitorAction {
        MonitorAction::Continue
    }

    fn describe(&self) -> String {
        "process exit".to_string()
    }
}

/// Feeds shell commands one prompt at a time.
///
/// Each time the prompt appears, the next command is sent. Once every
/// command has been sent and the prompt shows up again, the script is
/// complete.
#[derive(Debug, Clone)]
pub struct ShellScript {
    commands: Vec<String>,
    next: usize,
    prompt: String,
    pending: String,
}

impl ShellScript {
    pub fn new<I, S>(commands: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            commands: commands.into_iter().map(Into::into).collect(),
            next: 0,
            prompt: DEFAULT_PROMPT.to_string(),
            pending: String::new(),
        }
    }

    /// Override the prompt marker that triggers the next command.
    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = prompt.into();
        self
    }

    pub fn commands(&self) -> &[String] {
        &self.commands
    }

    /// Number of commands written so far.
    pub fn sent(&self) -> usize {
        self.next
    }

    /// Exact bytes written to the shell for one command.
    pub fn render_command(command: &str) -> String {
        format!("{command}\n")
    }

    /// Exact bytes of the whole script, as if typed in one go.
    pub fn render(&self) -> String {
        self.commands
            .iter()
            .map(|cmd| Self::render_command(cmd))
            .collect()
    }
}

impl OutputMonitor for ShellScript {
    fn on_output(&mut self, chunk: &str) -> MonitorAction {
        self.pending.push_str(chunk);
        if self.prompt.is_empty()
            || memmem::find(self.pending.as_bytes(), self.prompt.as_bytes()).is_none()
        {
            return MonitorAction::Continue;
        }
        // Anything after the prompt belongs to the command we are about to
        // send (its echo), so the whole pending text is dropped.
        self.pending.clear();
        match self.commands.get(self.next) {
            Some(command) => {
                self.next += 1;
                MonitorAction::Send(Self::render_command(command))
            }
            None => MonitorAction::Complete,
        }
    }

    fn describe(&self) -> String {
        match self.commands.get(self.next.saturating_sub(1)) {
            Some(cmd) if self.next > 0 => format!("'{cmd}' to finish at prompt '{}'", self.prompt),
            _ => format!("shell prompt '{}'", self.prompt),
        }
    }
}

/// Completes the session once a full output line matches a pattern.
#[derive(Debug, Clone)]
pub struct StopOnLine {
    pattern: Pattern,
    partial: String,
}

impl StopOnLine {
    pub fn new(pattern: Pattern) -> Self {
        Self {
            pattern,
            partial: String::new(),
        }
    }
}

impl OutputMonitor for StopOnLine {
    fn on_output(&mut self, chunk: &str) -> MonitorAction {
        self.partial.push_str(chunk);
        let mut hit = false;
        while let Some(pos) = memchr::memchr(b'\n', self.partial.as_bytes()) {
            let line: String = self.partial.drain(..=pos).collect();
            let line = line.trim_end_matches(['\n', '\r']);
            if self.pattern.matches_line(line) {
                hit = true;
                break;
            }
        }
        if hit {
            MonitorAction::Complete
        } else {
            MonitorAction::Continue
        }
    }

    fn describe(&self) -> String {
        format!("line matching '{}'", self.pattern)
    }
}
