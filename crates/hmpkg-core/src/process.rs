use std::path::PathBuf;
use std::process::{Command, Stdio};

/// Captured result of one shell command.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandOutput {
    pub success: bool,
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,
}

pub trait CommandRunner {
    fn execute(&self, command: &str) -> CommandOutput;
}

/// Runs commands through `<shell> -c`, sourcing the user profile first when asked to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellRunner {
    shell: String,
    profile: Option<PathBuf>,
}

impl ShellRunner {
    pub fn new(shell: impl Into<String>) -> Self {
        ShellRunner {
            shell: shell.into(),
            profile: None,
        }
    }

    pub fn with_profile(mut self, profile: Option<PathBuf>) -> Self {
        self.profile = profile;
        self
    }

    fn script(&self, command: &str) -> String {
        match &self.profile {
            Some(profile) if profile.is_file() => {
                format!(". \"{}\" && {}", profile.display(), command)
            }
            _ => command.to_string(),
        }
    }
}

impl CommandRunner for ShellRunner {
    fn execute(&self, command: &str) -> CommandOutput {
        tracing::debug!(shell = %self.shell, command, "running command");
        let output = match Command::new(&self.shell)
            .arg("-c")
            .arg(self.script(command))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
        {
            Ok(output) => output,
            Err(err) => {
                return CommandOutput {
                    success: false,
                    stdout: Vec::new(),
                    stderr: vec![format!("failed to start process: {}", err)],
                }
            }
        };

        let stdout = output_lines(&output.stdout);
        let mut stderr = output_lines(&output.stderr);
        let success = output.status.success();
        if !success {
            let code = output
                .status
                .code()
                .map(|code| code.to_string())
                .unwrap_or_else(|| "signal".to_string());
            stderr.push(format!("'{}' exited with error code: {}", command, code));
        }
        CommandOutput {
            success,
            stdout,
            stderr,
        }
    }
}

fn output_lines(bytes: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(bytes)
        .lines()
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}
