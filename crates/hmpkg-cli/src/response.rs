use hmpkg_core::activate::ApplyFailure;
use hmpkg_core::transaction::Outcome;
use serde::Serialize;

pub const ROLLED_BACK_MESSAGE: &str = "Failed to apply changes, backup restored.";
pub const CRITICAL_MESSAGE: &str =
    "CRITICAL ERROR: Failed to apply changes AND could not restore backup.";
pub const ABORTED_MESSAGE: &str = "Could not create config backup, too risky to proceed.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Success,
    Failure,
    Critical,
}

impl Status {
    pub fn code(self) -> i32 {
        match self {
            Status::Success => 0,
            Status::Failure => 1,
            Status::Critical => 2,
        }
    }
}

/// Envelope printed for every command under `--json`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct Response {
    pub success: bool,
    pub message: String,
    pub output: Vec<String>,
    pub simple_error: Vec<String>,
    pub full_error: Vec<String>,
}

impl Response {
    pub fn ok(message: impl Into<String>, output: Vec<String>) -> Response {
        Response {
            success: true,
            message: message.into(),
            output,
            ..Response::default()
        }
    }

    pub fn failure(message: impl Into<String>, full_error: Vec<String>) -> Response {
        Response {
            success: false,
            message: message.into(),
            full_error,
            ..Response::default()
        }
    }

    pub fn apply_failure(message: impl Into<String>, failure: ApplyFailure) -> Response {
        Response {
            success: false,
            message: message.into(),
            output: failure.output,
            simple_error: failure.simple_error,
            full_error: failure.full_error,
        }
    }

    /// `applied` is used when the transaction went through with a non-empty result,
    /// `unchanged` when it went through but nothing was added or removed.
    pub fn from_outcome(outcome: Outcome, applied: &str, unchanged: &str) -> (Status, Response) {
        match outcome {
            Outcome::Applied(packages) if packages.is_empty() => {
                (Status::Success, Response::ok(unchanged, packages))
            }
            Outcome::Applied(packages) => (Status::Success, Response::ok(applied, packages)),
            Outcome::RolledBack(failure) => (
                Status::Failure,
                Response::apply_failure(ROLLED_BACK_MESSAGE, failure),
            ),
            Outcome::Critical { apply, restore } => {
                let mut response = Response::apply_failure(CRITICAL_MESSAGE, apply);
                response.full_error.push(restore.to_string());
                (Status::Critical, response)
            }
            Outcome::Aborted(err) => (
                Status::Failure,
                Response::failure(ABORTED_MESSAGE, vec![err.to_string()]),
            ),
        }
    }
}
