use crate::config::ApplySection;
use crate::process::{CommandOutput, CommandRunner};

/// Output captured from a failed activation.
#[derive(Debug, Clone, PartialEq, Eq, Default, thiserror::Error)]
#[error("failed to apply configuration ({} error lines)", .full_error.len())]
pub struct ApplyFailure {
    pub output: Vec<String>,
    pub simple_error: Vec<String>,
    pub full_error: Vec<String>,
}

/// Makes the edited configuration take effect.
pub trait Activate {
    fn activate(&self, allow_insecure: bool) -> Result<CommandOutput, ApplyFailure>;
}

impl<F> Activate for F
where
    F: Fn(bool) -> Result<CommandOutput, ApplyFailure>,
{
    fn activate(&self, allow_insecure: bool) -> Result<CommandOutput, ApplyFailure> {
        self(allow_insecure)
    }
}

/// `home-manager switch` run through a [`CommandRunner`].
#[derive(Debug, Clone)]
pub struct HomeManagerSwitch<R> {
    runner: R,
    command: String,
    insecure_env: String,
    error_prefix: String,
}

impl<R: CommandRunner> HomeManagerSwitch<R> {
    pub fn new(runner: R, apply: &ApplySection) -> Self {
        HomeManagerSwitch {
            runner,
            command: apply.command.clone(),
            insecure_env: apply.insecure_env.clone(),
            error_prefix: apply.error_prefix.clone(),
        }
    }

    pub fn command_line(&self, allow_insecure: bool) -> String {
        if allow_insecure {
            format!("export {}=1 && {}", self.insecure_env, self.command)
        } else {
            self.command.clone()
        }
    }
}

impl<R: CommandRunner> Activate for HomeManagerSwitch<R> {
    fn activate(&self, allow_insecure: bool) -> Result<CommandOutput, ApplyFailure> {
        let command = self.command_line(allow_insecure);
        tracing::info!(command = %command, "applying configuration");
        let output = self.runner.execute(&command);
        if output.success {
            return Ok(output);
        }
        Err(ApplyFailure {
            simple_error: simple_errors(&output.stderr, &self.error_prefix),
            output: output.stdout,
            full_error: output.stderr,
        })
    }
}

/// Pulls the text after `prefix` out of every line that carries it.
pub fn simple_errors(lines: &[String], prefix: &str) -> Vec<String> {
    lines
        .iter()
        .filter_map(|line| {
            line.find(prefix)
                .map(|pos| line[pos + prefix.len()..].trim().to_string())
        })
        .collect()
}
