//! Subprocess seam for resource-manager CLIs.

use std::process::Command;

use crate::error::{NhcError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandOutput {
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == 0
    }
}

pub trait CommandRunner {
    /// Runs `program` to completion. Only a failure to launch is an error;
    /// a non-zero exit is reported through [`CommandOutput::status`].
    fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput>;
}

#[derive(Debug, Clone, Default)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput> {
        tracing::debug!(program, args = ?args, "Running resource manager command");
        let output = Command::new(program)
            .args(args)
            .output()
            .map_err(|err| NhcError::CommandFailed {
                command: render_command(program, args),
                details: err.to_string(),
            })?;

        Ok(CommandOutput {
            status: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}

pub fn render_command(program: &str, args: &[String]) -> String {
    let mut rendered = program.to_string();
    for arg in args {
        rendered.push(' ');
        if arg.is_empty() || arg.contains(char::is_whitespace) {
            rendered.push_str(&format!("'{}'", arg));
        } else {
            rendered.push_str(arg);
        }
    }
    rendered
}
