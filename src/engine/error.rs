use thiserror::Error;

use crate::engine::models::{
    ExecutionResult, ExecutionStatus, Language, REJECTED_EXIT_CODE, TIMEOUT_EXIT_CODE,
};

/// Pipeline stages that run under the caller's time budget before the program
/// itself starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Probe,
    Compile,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Probe => "toolchain check",
            Self::Compile => "compilation",
        })
    }
}

/// Failures that end a run before the user's program reaches a terminal state.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid request: {0}")]
    Validation(String),
    #[error("blocked by lexical screen: {rule} (line {line})")]
    SecurityViolation { rule: &'static str, line: usize },
    #[error(
        "{language} toolchain is not available: `{binary}` {reason}; install it or set {env_var}"
    )]
    ToolchainMissing {
        language: Language,
        binary: String,
        env_var: &'static str,
        reason: String,
    },
    #[error("{diagnostics}")]
    Compile { exit_code: i32, diagnostics: String },
    #[error("{phase} exceeded its time budget of {budget_ms}ms")]
    PhaseTimeout { phase: Phase, budget_ms: u64 },
    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    pub fn status(&self) -> ExecutionStatus {
        match self {
            Self::Validation(_) => ExecutionStatus::ValidationError,
            Self::SecurityViolation { .. } => ExecutionStatus::SecurityViolation,
            Self::ToolchainMissing { .. } => ExecutionStatus::ToolchainMissing,
            Self::Compile { .. } => ExecutionStatus::CompileError,
            Self::PhaseTimeout { .. } => ExecutionStatus::Timeout,
            Self::Internal(_) => ExecutionStatus::InternalError,
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Compile { exit_code, .. } => *exit_code,
            Self::PhaseTimeout { .. } => TIMEOUT_EXIT_CODE,
            _ => REJECTED_EXIT_CODE,
        }
    }
}

impl From<std::io::Error> for EngineError {
    fn from(value: std::io::Error) -> Self {
        Self::Internal(value.to_string())
    }
}

impl From<EngineError> for ExecutionResult {
    fn from(err: EngineError) -> Self {
        let message = err.to_string();
        let message = message.trim_end();
        Self {
            status: err.status(),
            stdout: String::new(),
            stderr: (!message.is_empty()).then(|| message.to_string()),
            exit_code: err.exit_code(),
            elapsed_ms: 0,
            truncated: false,
        }
    }
}

/// Errors raised by a sandbox backend while starting or supervising a process.
#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("program not found: {0}")]
    ProgramNotFound(String),
    #[error("program is not executable: {0}")]
    NotExecutable(String),
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to wait for {program}: {source}")]
    Wait {
        program: String,
        #[source]
        source: std::io::Error,
    },
}
