mod language;
mod process;

use std::{path::PathBuf, time::Duration};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::engine::error::SandboxError;

pub use language::LanguageSpec;
pub use process::ProcessSandbox;

pub const TRUNCATION_MARKER: &str = "\n...[output truncated]";

/// One process to start: program, arguments, working directory and the full
/// environment it sees.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub env: Vec<(String, String)>,
    pub stdin: Vec<u8>,
    pub output_limit: usize,
}

impl Invocation {
    pub fn new(program: impl Into<String>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: cwd.into(),
            env: Vec::new(),
            stdin: Vec::new(),
            output_limit: 64 * 1024,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn stdin(mut self, stdin: impl Into<Vec<u8>>) -> Self {
        self.stdin = stdin.into();
        self
    }

    pub fn output_limit(mut self, limit: usize) -> Self {
        self.output_limit = limit;
        self
    }
}

/// Bytes read from one output stream, capped at the invocation's limit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapturedStream {
    pub bytes: Vec<u8>,
    pub overflowed: bool,
}

impl CapturedStream {
    /// Decodes the capture, cutting at a char boundary within `limit` bytes and
    /// appending the truncation marker when output was dropped.
    pub fn into_text(self, limit: usize) -> (String, bool) {
        let mut text = String::from_utf8_lossy(&self.bytes).into_owned();
        let mut truncated = self.overflowed;
        if text.len() > limit {
            let mut cut = limit;
            while !text.is_char_boundary(cut) {
                cut -= 1;
            }
            text.truncate(cut);
            truncated = true;
        }
        if truncated {
            text.push_str(TRUNCATION_MARKER);
        }
        (text, truncated)
    }
}

#[derive(Debug, Clone)]
pub struct ProcessOutput {
    pub stdout: CapturedStream,
    pub stderr: CapturedStream,
    pub exit_code: i32,
    pub cancelled: bool,
    pub duration: Duration,
}

/// Starts and supervises one process per call. The process backend is the
/// only implementation here; container or VM isolation would slot in behind
/// the same trait.
#[async_trait]
pub trait SandboxBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Runs the invocation to a terminal state. When `cancel` fires the whole
    /// process tree is killed and the output is returned with `cancelled` set.
    async fn run(
        &self,
        invocation: Invocation,
        cancel: CancellationToken,
    ) -> Result<ProcessOutput, SandboxError>;
}
