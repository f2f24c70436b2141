//! Command type for building remote commands
//!
//! Every remote operation is expressed as a [`Command`] and rendered into a
//! single escaped shell string at the transport boundary. Higher layers never
//! concatenate shell text themselves, which keeps each orchestrator verb
//! independently testable and removes interpolation injection risk.

/// A command to be executed on a remote host
///
/// The builder is `Clone` so a constructed command can be issued against
/// several nodes without rebuilding it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// The program to execute
    program: String,
    /// The arguments to pass to the program
    args: Vec<String>,
    /// Whether this command needs root on the remote host
    privileged: bool,
}

impl Command {
    /// Create a new command for the given program
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            privileged: false,
        }
    }

    /// Add an argument to the command
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Add multiple arguments to the command
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for arg in args {
            self.args.push(arg.into());
        }
        self
    }

    /// Mark this command as requiring root on the remote host
    ///
    /// The transport decides how to escalate (sudo with or without a carried
    /// password); callers only state the requirement.
    pub fn privileged(mut self) -> Self {
        self.privileged = true;
        self
    }

    /// Get the program name
    pub fn get_program(&self) -> &str {
        &self.program
    }

    /// Get the arguments
    pub fn get_args(&self) -> &[String] {
        &self.args
    }

    /// Whether this command requires root on the remote host
    pub fn is_privileged(&self) -> bool {
        self.privileged
    }

    /// Render this command as one escaped string for the remote shell
    pub fn to_shell_string(&self) -> String {
        let mut parts = Vec::with_capacity(self.args.len() + 1);
        parts.push(self.program.clone());
        parts.extend(self.args.iter().map(|arg| shell_escape(arg)));
        parts.join(" ")
    }
}

/// Escape a string for safe inclusion in a shell command
pub(crate) fn shell_escape(s: &str) -> String {
    if s.is_empty() {
        return "''".to_string();
    }
    if s.contains(|c: char| c.is_whitespace() || "\"'\\$`!*?<>|&;()[]{}".contains(c)) {
        // Use single quotes and escape any single quotes in the string
        format!("'{}'", s.replace('\'', "'\"'\"'"))
    } else {
        s.to_string()
    }
}
