//! Structured remote commands.
//!
//! Commands are kept as program + argument vectors and only turned into a
//! shell string at the transport boundary, with every word quoted.

use std::{fmt::Write as _, iter};

use thiserror::Error;

/// Exit status of a guarded command whose file does not exist.
pub const EXIT_NOT_FOUND: i32 = 66;

/// Exit status of a guarded command whose file is not readable.
pub const EXIT_PERMISSION_DENIED: i32 = 77;

/// Command build error.
#[derive(Debug, Error)]
pub enum CommandBuildError {
    #[error("Command program is empty")]
    EmptyCommand,
    #[error("Failed to quote command: {0}")]
    QuoteError(#[from] shlex::QuoteError),
}

/// A command to run on a host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCommand {
    program: String,
    args: Vec<String>,
    guard: Option<String>,
    discard_stderr: bool,
    limit_lines: Option<usize>,
}

impl RemoteCommand {
    /// Create a command for `program`.
    #[must_use]
    pub fn new<S: Into<String>>(program: S) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            guard: None,
            discard_stderr: false,
            limit_lines: None,
        }
    }

    /// Append one argument.
    #[must_use]
    pub fn arg<S: Into<String>>(mut self, arg: S) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append arguments.
    #[must_use]
    pub fn args<I>(mut self, args: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Fail with [`EXIT_NOT_FOUND`] / [`EXIT_PERMISSION_DENIED`] before running
    /// when `path` is missing or unreadable.
    #[must_use]
    pub fn require_readable<S: Into<String>>(mut self, path: S) -> Self {
        self.guard = Some(path.into());
        self
    }

    /// Send stderr to `/dev/null`.
    #[must_use]
    pub const fn discard_stderr(mut self) -> Self {
        self.discard_stderr = true;
        self
    }

    /// Keep only the first `n` lines of stdout.
    #[must_use]
    pub const fn limit_lines(mut self, n: usize) -> Self {
        self.limit_lines = Some(n);
        self
    }

    /// Program name.
    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Arguments, unquoted.
    #[must_use]
    pub fn get_args(&self) -> &[String] {
        &self.args
    }

    /// Path checked before the command runs, if any.
    #[must_use]
    pub fn guard(&self) -> Option<&str> {
        self.guard.as_deref()
    }

    /// Render as a POSIX `sh` script.
    ///
    /// # Errors
    /// Returns error if the program is empty or a word cannot be quoted.
    pub fn to_shell_string(&self) -> Result<String, CommandBuildError> {
        if self.program.trim().is_empty() {
            return Err(CommandBuildError::EmptyCommand);
        }

        let mut script = String::new();
        if let Some(ref path) = self.guard {
            let path = shlex::try_quote(path)?;
            let _ = write!(
                script,
                "if [ ! -e {path} ]; then exit {EXIT_NOT_FOUND}; \
                 elif [ ! -r {path} ]; then exit {EXIT_PERMISSION_DENIED}; fi; "
            );
        }

        let words = iter::once(&self.program)
            .chain(&self.args)
            .map(|w| shlex::try_quote(w).map(|q| q.into_owned()))
            .collect::<Result<Vec<_>, _>>()?;

        // exec is only valid when the command is not part of a pipeline
        if self.limit_lines.is_none() {
            script.push_str("exec ");
        }
        script.push_str(&words.join(" "));
        if self.discard_stderr {
            script.push_str(" 2>/dev/null");
        }
        if let Some(n) = self.limit_lines {
            let _ = write!(script, " | head -n {n}");
        }
        Ok(script)
    }
}
