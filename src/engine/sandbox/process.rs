use std::{
    process::{ExitStatus, Stdio},
    sync::{Arc, Mutex, PoisonError},
    time::{Duration, Instant},
};

use async_trait::async_trait;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    process::{Child, Command},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;

use crate::engine::{
    error::SandboxError,
    models::TIMEOUT_EXIT_CODE,
    sandbox::{CapturedStream, Invocation, ProcessOutput, SandboxBackend},
};

/// How long stream readers may keep draining after the process reached a
/// terminal state.
const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Runs invocations as plain host processes, each leading its own process
/// group so the whole tree can be killed at once.
#[derive(Debug, Default)]
pub struct ProcessSandbox;

impl ProcessSandbox {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl SandboxBackend for ProcessSandbox {
    fn name(&self) -> &'static str {
        "process"
    }

    async fn run(
        &self,
        invocation: Invocation,
        cancel: CancellationToken,
    ) -> Result<ProcessOutput, SandboxError> {
        let started = Instant::now();
        let program = invocation.program.clone();

        let mut cmd = Command::new(&invocation.program);
        cmd.args(&invocation.args)
            .current_dir(&invocation.cwd)
            .env_clear()
            .envs(invocation.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd.spawn().map_err(|source| match source.kind() {
            std::io::ErrorKind::NotFound => SandboxError::ProgramNotFound(program.clone()),
            std::io::ErrorKind::PermissionDenied => SandboxError::NotExecutable(program.clone()),
            _ => SandboxError::Spawn {
                program: program.clone(),
                source,
            },
        })?;
        let pid = child.id();
        tracing::debug!(program = %program, pid = ?pid, "process spawned");

        if let Some(mut stdin) = child.stdin.take() {
            let stdin_bytes = invocation.stdin;
            tokio::spawn(async move {
                let _ = stdin.write_all(&stdin_bytes).await;
            });
        }

        let limit = invocation.output_limit;
        let stdout_reader = child.stdout.take().map(|stdout| StreamReader::spawn(stdout, limit));
        let stderr_reader = child.stderr.take().map(|stderr| StreamReader::spawn(stderr, limit));

        let outcome = tokio::select! {
            status = wait_and_sweep(&mut child, pid) => Some(status),
            _ = cancel.cancelled() => None,
        };

        let (exit_code, cancelled) = match outcome {
            Some(Ok(status)) => (exit_code_of(status), false),
            Some(Err(source)) => {
                kill_process_tree(pid);
                let _ = child.kill().await;
                return Err(SandboxError::Wait { program, source });
            }
            None => {
                kill_process_tree(pid);
                if let Err(err) = child.kill().await {
                    tracing::error!(program = %program, pid = ?pid, error = %err, "failed to kill cancelled process");
                }
                (TIMEOUT_EXIT_CODE, true)
            }
        };

        let stdout = drain(stdout_reader, "stdout", DRAIN_GRACE).await;
        let stderr = drain(stderr_reader, "stderr", DRAIN_GRACE).await;

        Ok(ProcessOutput {
            stdout,
            stderr,
            exit_code,
            cancelled,
            duration: started.elapsed(),
        })
    }
}

#[cfg(unix)]
fn exit_code_of(status: ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt as _;
    status
        .code()
        .unwrap_or_else(|| 128 + status.signal().unwrap_or(0))
}

#[cfg(not(unix))]
fn exit_code_of(status: ExitStatus) -> i32 {
    status.code().unwrap_or(-1)
}

/// Waits for the group leader to exit and kills whatever it left behind in its
/// group before reaping it. An unreaped leader keeps its pid, so the group id
/// cannot have been handed to another process when the sweep runs.
#[cfg(unix)]
async fn wait_and_sweep(child: &mut Child, pid: Option<u32>) -> std::io::Result<ExitStatus> {
    if let Some(pid) = pid {
        exited_unreaped(pid).await?;
        kill_process_tree(Some(pid));
    }
    child.wait().await
}

#[cfg(not(unix))]
async fn wait_and_sweep(child: &mut Child, _pid: Option<u32>) -> std::io::Result<ExitStatus> {
    child.wait().await
}

#[cfg(unix)]
async fn exited_unreaped(pid: u32) -> std::io::Result<()> {
    let waited = tokio::task::spawn_blocking(move || loop {
        // SAFETY: `info` is a plain C struct that waitid fills in.
        let mut info: libc::siginfo_t = unsafe { std::mem::zeroed() };
        let rc = unsafe {
            libc::waitid(
                libc::P_PID,
                pid as libc::id_t,
                &mut info,
                libc::WEXITED | libc::WNOWAIT,
            )
        };
        if rc == 0 {
            return Ok(());
        }
        let err = std::io::Error::last_os_error();
        if err.kind() != std::io::ErrorKind::Interrupted {
            return Err(err);
        }
    })
    .await;
    waited.map_err(std::io::Error::other)?
}

#[cfg(unix)]
fn kill_process_tree(pid: Option<u32>) {
    let Some(pid) = pid.and_then(|pid| i32::try_from(pid).ok()) else {
        return;
    };
    let rc = unsafe { libc::kill(-pid, libc::SIGKILL) };
    if rc == -1 {
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::ESRCH) {
            tracing::error!(pgid = pid, error = %err, "failed to kill process group");
        }
    }
}

#[cfg(not(unix))]
fn kill_process_tree(_pid: Option<u32>) {}

/// A background task reading one output pipe into a buffer the supervisor can
/// still take if the task has to be abandoned.
struct StreamReader {
    task: JoinHandle<()>,
    captured: Arc<Mutex<CapturedStream>>,
}

impl StreamReader {
    fn spawn<R>(reader: R, limit: usize) -> Self
    where
        R: tokio::io::AsyncRead + Unpin + Send + 'static,
    {
        let captured = Arc::new(Mutex::new(CapturedStream::default()));
        let sink = captured.clone();
        let task = tokio::spawn(async move { read_limited(reader, limit, &sink).await });
        Self { task, captured }
    }

    fn take(&self) -> CapturedStream {
        std::mem::take(&mut *self.captured.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

async fn drain(reader: Option<StreamReader>, stream: &'static str, grace: Duration) -> CapturedStream {
    let Some(mut reader) = reader else {
        return CapturedStream::default();
    };
    match tokio::time::timeout(grace, &mut reader.task).await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => tracing::warn!(stream, error = %err, "output reader failed"),
        Err(_) => {
            reader.task.abort();
            tracing::warn!(stream, "output reader still open after grace period, keeping what it read");
        }
    }
    reader.take()
}

/// Reads the stream to EOF, keeping at most `limit` bytes and discarding the
/// rest so the writer never blocks on a full pipe.
async fn read_limited<R>(mut reader: R, limit: usize, sink: &Mutex<CapturedStream>)
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut chunk = [0u8; 4096];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                let mut captured = sink.lock().unwrap_or_else(PoisonError::into_inner);
                let remaining = limit.saturating_sub(captured.bytes.len());
                if n > remaining {
                    captured.overflowed = true;
                }
                captured.bytes.extend_from_slice(&chunk[..remaining.min(n)]);
            }
        }
    }
}
