use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

/// Exit code reported when a run exceeded its time budget.
pub const TIMEOUT_EXIT_CODE: i32 = -1;
/// Exit code reported when the engine refused or could not start the run.
pub const REJECTED_EXIT_CODE: i32 = -2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Language {
    Python,
    Cpp,
    JavaScript,
    Go,
}

impl Language {
    pub const ALL: [Language; 4] = [
        Language::Python,
        Language::Cpp,
        Language::JavaScript,
        Language::Go,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Python => "python",
            Language::Cpp => "cpp",
            Language::JavaScript => "javascript",
            Language::Go => "go",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Language {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "python" | "python3" | "py" => Ok(Self::Python),
            "cpp" | "c++" | "cxx" => Ok(Self::Cpp),
            "javascript" | "js" | "node" => Ok(Self::JavaScript),
            "go" | "golang" => Ok(Self::Go),
            _ => Err(format!("unsupported language: {s}")),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionOptions {
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub stdin: String,
}

impl ExecutionOptions {
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn with_stdin(mut self, stdin: impl Into<String>) -> Self {
        self.stdin = stdin.into();
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRequest {
    pub code: String,
    pub language: String,
    #[serde(flatten)]
    pub options: ExecutionOptions,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Success,
    ValidationError,
    SecurityViolation,
    ToolchainMissing,
    CompileError,
    Timeout,
    RuntimeError,
    InternalError,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::ValidationError => "validation_error",
            Self::SecurityViolation => "security_violation",
            Self::ToolchainMissing => "toolchain_missing",
            Self::CompileError => "compile_error",
            Self::Timeout => "timeout",
            Self::RuntimeError => "runtime_error",
            Self::InternalError => "internal_error",
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub status: ExecutionStatus,
    pub stdout: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
    pub exit_code: i32,
    pub elapsed_ms: u64,
    #[serde(default)]
    pub truncated: bool,
}

impl ExecutionResult {
    pub fn is_success(&self) -> bool {
        self.status == ExecutionStatus::Success
    }

    /// Classifies a program that ran to a terminal state.
    pub(crate) fn from_program(
        stdout: String,
        stderr: String,
        exit_code: i32,
        timed_out: bool,
        truncated: bool,
    ) -> Self {
        let stdout = stdout.trim_end().to_string();
        let stderr = stderr.trim_end().to_string();
        let (status, exit_code) = if timed_out {
            (ExecutionStatus::Timeout, TIMEOUT_EXIT_CODE)
        } else if exit_code != 0 || !stderr.is_empty() {
            (ExecutionStatus::RuntimeError, exit_code)
        } else {
            (ExecutionStatus::Success, 0)
        };
        Self {
            status,
            stdout,
            stderr: (!stderr.is_empty()).then_some(stderr),
            exit_code,
            elapsed_ms: 0,
            truncated,
        }
    }
}
