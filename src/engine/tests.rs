use std::{
    path::Path,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::*;
use crate::engine::{
    config::ExecutionLimits,
    error::SandboxError,
    models::{ExecutionStatus, REJECTED_EXIT_CODE, TIMEOUT_EXIT_CODE},
    sandbox::{CapturedStream, Invocation, ProcessOutput, TRUNCATION_MARKER},
};

enum Reply {
    Exit { stdout: &'static str, stderr: &'static str, code: i32 },
    Overflow { byte: u8 },
    NotFound,
    Denied,
    Hang,
}

#[derive(Debug, Clone)]
struct Call {
    invocation: Invocation,
    cwd_existed: bool,
    source_present: bool,
}

/// Backend that answers from a script and records what it was asked to run.
struct ScriptedBackend {
    calls: Mutex<Vec<Call>>,
    script: Box<dyn Fn(&Invocation) -> Reply + Send + Sync>,
}

impl ScriptedBackend {
    fn new(script: impl Fn(&Invocation) -> Reply + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            script: Box::new(script),
        })
    }

    fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn programs(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .map(|call| call.invocation.program)
            .collect()
    }
}

fn is_probe(invocation: &Invocation) -> bool {
    matches!(
        invocation.args.first().map(String::as_str),
        Some("--version") | Some("version")
    )
}

fn is_compile(invocation: &Invocation) -> bool {
    invocation.program == "g++" || invocation.args.first().map(String::as_str) == Some("build")
}

#[async_trait]
impl SandboxBackend for ScriptedBackend {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn run(
        &self,
        invocation: Invocation,
        cancel: CancellationToken,
    ) -> Result<ProcessOutput, SandboxError> {
        let started = Instant::now();
        self.calls.lock().unwrap().push(Call {
            cwd_existed: invocation.cwd.is_dir(),
            source_present: std::fs::read_dir(&invocation.cwd)
                .map(|entries| {
                    entries
                        .flatten()
                        .any(|e| e.file_name().to_string_lossy().starts_with("main."))
                })
                .unwrap_or(false),
            invocation: invocation.clone(),
        });
        let output = |stdout: CapturedStream,
                      stderr: CapturedStream,
                      exit_code: i32,
                      cancelled: bool|
         -> Result<ProcessOutput, SandboxError> {
            Ok(ProcessOutput {
                stdout,
                stderr,
                exit_code,
                cancelled,
                duration: started.elapsed(),
            })
        };
        match (self.script)(&invocation) {
            Reply::Exit { stdout, stderr, code } => output(
                CapturedStream {
                    bytes: stdout.as_bytes().to_vec(),
                    overflowed: false,
                },
                CapturedStream {
                    bytes: stderr.as_bytes().to_vec(),
                    overflowed: false,
                },
                code,
                false,
            ),
            Reply::Overflow { byte } => output(
                CapturedStream {
                    bytes: vec![byte; invocation.output_limit],
                    overflowed: true,
                },
                CapturedStream::default(),
                0,
                false,
            ),
            Reply::NotFound => Err(SandboxError::ProgramNotFound(invocation.program.clone())),
            Reply::Denied => Err(SandboxError::NotExecutable(invocation.program.clone())),
            Reply::Hang => {
                cancel.cancelled().await;
                output(
                    CapturedStream::default(),
                    CapturedStream::default(),
                    TIMEOUT_EXIT_CODE,
                    true,
                )
            }
        }
    }
}

fn ok(stdout: &'static str) -> Reply {
    Reply::Exit {
        stdout,
        stderr: "",
        code: 0,
    }
}

fn engine_with(root: &Path, backend: Arc<ScriptedBackend>) -> Engine {
    Engine::with_backend(EngineConfig::default().with_scratch_root(root), backend).unwrap()
}

fn scratch_is_empty(root: &Path) -> bool {
    std::fs::read_dir(root).unwrap().next().is_none()
}

#[tokio::test]
async fn rejects_malformed_requests_without_spawning() {
    let root = tempfile::tempdir().unwrap();
    let backend = ScriptedBackend::new(|_| ok(""));
    let engine = engine_with(root.path(), backend.clone());
    let max_code = engine.config().limits.max_code_bytes;
    let max_stdin = engine.config().limits.max_stdin_bytes;

    let cases = [
        ("", "python", ExecutionOptions::default()),
        ("   \n\t", "python", ExecutionOptions::default()),
        ("print(1)", "ruby", ExecutionOptions::default()),
        ("print(1)", "python", ExecutionOptions::default().with_timeout_ms(0)),
        (
            "print(1)",
            "python",
            ExecutionOptions::default().with_stdin("x".repeat(max_stdin + 1)),
        ),
    ];
    for (code, language, options) in cases {
        let result = engine.execute(code, language, options).await;
        assert_eq!(result.status, ExecutionStatus::ValidationError, "{language}: {code:?}");
        assert_eq!(result.exit_code, REJECTED_EXIT_CODE);
        assert!(result.stderr.is_some());
    }

    let oversized = "#".repeat(max_code + 1);
    let result = engine.execute(&oversized, "python", ExecutionOptions::default()).await;
    assert_eq!(result.status, ExecutionStatus::ValidationError);

    assert!(backend.calls().is_empty());
    assert!(scratch_is_empty(root.path()));
}

#[tokio::test]
async fn denied_patterns_are_rejected_before_any_process_starts() {
    let root = tempfile::tempdir().unwrap();
    let backend = ScriptedBackend::new(|_| ok(""));
    let engine = engine_with(root.path(), backend.clone());

    let samples = [
        ("python", "import subprocess\nsubprocess.run(['id'])\n"),
        ("javascript", "require('child_process').execSync('id')\n"),
        ("cpp", "#include <cstdlib>\nint main() { return system(\"id\"); }\n"),
        ("go", "package main\nimport \"os/exec\"\nfunc main() { exec.Command(\"id\").Run() }\n"),
    ];
    for (language, code) in samples {
        let result = engine.execute(code, language, ExecutionOptions::default()).await;
        assert_eq!(result.status, ExecutionStatus::SecurityViolation, "{language}");
        assert_ne!(result.exit_code, 0);
        assert!(result.stderr.unwrap().contains("blocked by lexical screen"));
    }
    assert!(backend.calls().is_empty());
    assert!(scratch_is_empty(root.path()));
}

#[tokio::test]
async fn missing_toolchain_is_reported_distinctly() {
    let root = tempfile::tempdir().unwrap();
    let backend = ScriptedBackend::new(|_| Reply::NotFound);
    let engine = engine_with(root.path(), backend.clone());

    let result = engine
        .execute("package main\nfunc main() {}\n", "go", ExecutionOptions::default())
        .await;
    assert_eq!(result.status, ExecutionStatus::ToolchainMissing);
    let message = result.stderr.unwrap();
    assert!(message.contains("`go`"), "{message}");
    assert!(message.contains("GO_BIN"), "{message}");
    assert_eq!(backend.calls().len(), 1);
    assert!(scratch_is_empty(root.path()));
}

#[tokio::test]
async fn successful_run_uses_a_fresh_workspace_and_removes_it() {
    let root = tempfile::tempdir().unwrap();
    let backend = ScriptedBackend::new(|inv| if is_probe(inv) { ok("Python 3.12.1") } else { ok("hi\n") });
    let engine = engine_with(root.path(), backend.clone());

    let result = engine
        .execute("print('hi')", "python", ExecutionOptions::default().with_stdin("input"))
        .await;
    assert_eq!(result.status, ExecutionStatus::Success);
    assert_eq!(result.stdout, "hi");
    assert_eq!(result.exit_code, 0);
    assert!(result.stderr.is_none());

    let calls = backend.calls();
    assert_eq!(calls.len(), 2);
    let run = &calls[1];
    assert!(run.cwd_existed);
    assert!(run.source_present);
    assert!(run.invocation.cwd.starts_with(root.path()));
    assert_eq!(run.invocation.stdin, b"input");
    assert!(!run.invocation.cwd.exists());
    assert!(scratch_is_empty(root.path()));
}

#[tokio::test]
async fn compile_failure_surfaces_diagnostics_and_skips_execution() {
    let root = tempfile::tempdir().unwrap();
    let backend = ScriptedBackend::new(|inv| {
        if is_probe(inv) {
            ok("g++ 13.2.0")
        } else if is_compile(inv) {
            Reply::Exit {
                stdout: "",
                stderr: "main.cpp:1:14: error: expected ';' before '}' token\n",
                code: 1,
            }
        } else {
            ok("should not run")
        }
    });
    let engine = engine_with(root.path(), backend.clone());

    let result = engine
        .execute("int main() { return 0 }", "cpp", ExecutionOptions::default())
        .await;
    assert_eq!(result.status, ExecutionStatus::CompileError);
    assert_eq!(result.exit_code, 1);
    assert_eq!(
        result.stderr.as_deref(),
        Some("main.cpp:1:14: error: expected ';' before '}' token")
    );
    assert_eq!(backend.programs(), vec!["g++", "g++"]);
    assert!(scratch_is_empty(root.path()));
}

#[tokio::test]
async fn compiler_warnings_alone_abort_the_run() {
    let root = tempfile::tempdir().unwrap();
    let backend = ScriptedBackend::new(|inv| {
        if is_compile(inv) && !is_probe(inv) {
            Reply::Exit {
                stdout: "",
                stderr: "main.cpp:3:5: warning: unused variable 'x'",
                code: 0,
            }
        } else {
            ok("")
        }
    });
    let engine = engine_with(root.path(), backend);

    let result = engine
        .execute("int main() { int x; }", "cpp", ExecutionOptions::default())
        .await;
    assert_eq!(result.status, ExecutionStatus::CompileError);
    assert_eq!(result.exit_code, 1);
}

#[tokio::test]
async fn compile_phase_is_bounded_by_its_share_of_the_budget() {
    let root = tempfile::tempdir().unwrap();
    let backend = ScriptedBackend::new(|inv| {
        if is_probe(inv) {
            ok("go version go1.22.0 linux/amd64")
        } else {
            Reply::Hang
        }
    });
    let engine = engine_with(root.path(), backend.clone());

    let result = engine
        .execute(
            "package main\nfunc main() {}\n",
            "go",
            ExecutionOptions::default().with_timeout_ms(600),
        )
        .await;
    assert_eq!(result.status, ExecutionStatus::Timeout);
    assert_eq!(result.exit_code, TIMEOUT_EXIT_CODE);
    // 50% of 600ms goes to compilation; the run phase never starts.
    assert!(result.elapsed_ms >= 290, "elapsed {}", result.elapsed_ms);
    assert!(result.elapsed_ms < 550, "elapsed {}", result.elapsed_ms);
    assert_eq!(backend.calls().len(), 2);
    assert!(scratch_is_empty(root.path()));
}

#[tokio::test]
async fn run_phase_ends_at_the_overall_deadline() {
    let root = tempfile::tempdir().unwrap();
    let backend = ScriptedBackend::new(|inv| {
        if is_probe(inv) || is_compile(inv) {
            ok("")
        } else {
            Reply::Hang
        }
    });
    let engine = engine_with(root.path(), backend.clone());

    let started = Instant::now();
    let result = engine
        .execute(
            "int main() { for (;;) {} }",
            "cpp",
            ExecutionOptions::default().with_timeout_ms(400),
        )
        .await;
    assert_eq!(result.status, ExecutionStatus::Timeout);
    assert_eq!(result.exit_code, TIMEOUT_EXIT_CODE);
    assert!(result.elapsed_ms >= 390, "elapsed {}", result.elapsed_ms);
    assert!(started.elapsed() < Duration::from_millis(1_500));
    assert_eq!(backend.calls().len(), 3);
    assert_eq!(engine.metrics().timed_out(), 1);
    assert!(scratch_is_empty(root.path()));
}

#[tokio::test]
async fn oversized_output_is_truncated_with_marker() {
    let root = tempfile::tempdir().unwrap();
    let backend = ScriptedBackend::new(|inv| if is_probe(inv) { ok("v22") } else { Reply::Overflow { byte: b'x' } });
    let limits = ExecutionLimits {
        max_output_bytes: 2048,
        ..ExecutionLimits::default()
    };
    let engine = Engine::with_backend(
        EngineConfig::default()
            .with_scratch_root(root.path())
            .with_limits(limits),
        backend,
    )
    .unwrap();

    let result = engine
        .execute("for(;;) console.log('x')", "javascript", ExecutionOptions::default())
        .await;
    assert!(result.truncated);
    assert!(result.stdout.ends_with(TRUNCATION_MARKER.trim_end()));
    assert!(result.stdout.len() <= 2048 + TRUNCATION_MARKER.len());
}

#[tokio::test]
async fn successful_probes_are_cached() {
    let root = tempfile::tempdir().unwrap();
    let backend = ScriptedBackend::new(|_| ok("ok"));
    let engine = engine_with(root.path(), backend.clone());

    for _ in 0..3 {
        let result = engine
            .execute("console.log('ok')", "js", ExecutionOptions::default())
            .await;
        assert_eq!(result.status, ExecutionStatus::Success);
    }
    let probes = backend
        .calls()
        .iter()
        .filter(|call| is_probe(&call.invocation))
        .count();
    assert_eq!(probes, 1);
    assert!(engine.toolchains.is_verified(Language::JavaScript));
}

#[tokio::test]
async fn failed_probes_are_not_cached() {
    let root = tempfile::tempdir().unwrap();
    let backend = ScriptedBackend::new(|_| Reply::NotFound);
    let engine = engine_with(root.path(), backend.clone());

    for _ in 0..2 {
        let result = engine.execute("print(1)", "python", ExecutionOptions::default()).await;
        assert_eq!(result.status, ExecutionStatus::ToolchainMissing);
    }
    assert_eq!(backend.calls().len(), 2);
    assert!(!engine.toolchains.is_verified(Language::Python));
}

#[tokio::test]
async fn broken_toolchain_binary_is_reported_as_missing() {
    let root = tempfile::tempdir().unwrap();
    let backend = ScriptedBackend::new(|_| Reply::Exit {
        stdout: "",
        stderr: "pyenv: python3: command not found\n",
        code: 127,
    });
    let engine = engine_with(root.path(), backend.clone());

    for _ in 0..2 {
        let result = engine.execute("print('hi')", "python", ExecutionOptions::default()).await;
        assert_eq!(result.status, ExecutionStatus::ToolchainMissing);
        assert_eq!(result.exit_code, REJECTED_EXIT_CODE);
        let message = result.stderr.unwrap();
        assert!(message.contains("exit 127"), "{message}");
        assert!(message.contains("pyenv: python3: command not found"), "{message}");
        assert!(message.contains("PYTHON_BIN"), "{message}");
    }
    // Only the version check ran, and it was retried rather than cached.
    assert_eq!(backend.calls().len(), 2);
    assert!(backend.calls().iter().all(|call| is_probe(&call.invocation)));
    assert!(!engine.toolchains.is_verified(Language::Python));
    assert!(scratch_is_empty(root.path()));
}

#[tokio::test]
async fn unexecutable_toolchain_is_reported_as_missing() {
    let root = tempfile::tempdir().unwrap();
    let backend = ScriptedBackend::new(|_| Reply::Denied);
    let engine = engine_with(root.path(), backend.clone());

    let result = engine.execute("console.log(1)", "javascript", ExecutionOptions::default()).await;
    assert_eq!(result.status, ExecutionStatus::ToolchainMissing);
    let message = result.stderr.unwrap();
    assert!(message.contains("is not executable"), "{message}");
    assert!(message.contains("NODE_BIN"), "{message}");
}

#[tokio::test]
async fn hung_toolchain_check_is_bounded_by_the_request_timeout() {
    let root = tempfile::tempdir().unwrap();
    let backend = ScriptedBackend::new(|_| Reply::Hang);
    let engine = engine_with(root.path(), backend.clone());

    let result = engine
        .execute("print(1)", "python", ExecutionOptions::default().with_timeout_ms(300))
        .await;
    assert_eq!(result.status, ExecutionStatus::Timeout);
    assert_eq!(result.exit_code, TIMEOUT_EXIT_CODE);
    assert!(result.elapsed_ms >= 290, "elapsed {}", result.elapsed_ms);
    assert!(result.elapsed_ms < 600, "elapsed {}", result.elapsed_ms);
    assert!(result.stderr.unwrap().contains("toolchain check"));
    assert_eq!(backend.calls().len(), 1);
    assert!(!engine.toolchains.is_verified(Language::Python));
    assert!(scratch_is_empty(root.path()));
}

#[tokio::test]
async fn runtime_errors_are_reported_as_program_output() {
    let root = tempfile::tempdir().unwrap();
    let backend = ScriptedBackend::new(|inv| {
        if is_probe(inv) {
            ok("Python 3.12.1")
        } else {
            Reply::Exit {
                stdout: "before\n",
                stderr: "ZeroDivisionError: division by zero\n",
                code: 1,
            }
        }
    });
    let engine = engine_with(root.path(), backend);

    let result = engine
        .execute("print('before')\n1/0\n", "python", ExecutionOptions::default())
        .await;
    assert_eq!(result.status, ExecutionStatus::RuntimeError);
    assert_eq!(result.exit_code, 1);
    assert_eq!(result.stdout, "before");
    assert_eq!(
        result.stderr.as_deref(),
        Some("ZeroDivisionError: division by zero")
    );
    assert!(engine.metrics().render_prometheus().contains("execution_runtime_failed_total 1"));
}

#[tokio::test]
async fn timeout_above_maximum_is_clamped() {
    let root = tempfile::tempdir().unwrap();
    let backend = ScriptedBackend::new(|_| ok(""));
    let engine = engine_with(root.path(), backend);
    let validated = engine
        .validate(
            "print(1)",
            "python",
            &ExecutionOptions::default().with_timeout_ms(u64::MAX),
        )
        .unwrap_or_else(|err| panic!("{err}"));
    assert_eq!(
        validated.timeout,
        Duration::from_millis(engine.config().limits.max_timeout_ms)
    );
}

#[tokio::test]
async fn execute_request_accepts_the_wire_shape() {
    let root = tempfile::tempdir().unwrap();
    let backend = ScriptedBackend::new(|_| ok("hi"));
    let engine = engine_with(root.path(), backend);
    let request: ExecutionRequest =
        serde_json::from_str(r#"{"code":"print('hi')","language":"python"}"#).unwrap();
    let result = engine.execute_request(request).await;
    assert_eq!(result.status, ExecutionStatus::Success);
    assert_eq!(result.stdout, "hi");
}

/// Tests below run real toolchains and skip themselves when one is missing.
mod host {
    use super::*;

    fn available(binary: &str, probe: &str) -> bool {
        let found = std::process::Command::new(binary)
            .arg(probe)
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .status()
            .is_ok();
        if !found {
            eprintln!("skipping: `{binary}` is not installed");
        }
        found
    }

    fn host_engine(root: &Path) -> Engine {
        Engine::new(EngineConfig::default().with_scratch_root(root)).unwrap()
    }

    #[tokio::test]
    async fn hello_world_in_every_available_language() {
        let root = tempfile::tempdir().unwrap();
        let engine = host_engine(root.path());
        let programs = [
            ("python3", "--version", "python", "print('hello')\n"),
            ("node", "--version", "javascript", "console.log('hello');\n"),
            (
                "g++",
                "--version",
                "cpp",
                "#include <iostream>\nint main() { std::cout << \"hello\" << std::endl; return 0; }\n",
            ),
            (
                "go",
                "version",
                "go",
                "package main\n\nimport \"fmt\"\n\nfunc main() { fmt.Println(\"hello\") }\n",
            ),
        ];
        for (binary, probe, language, code) in programs {
            if !available(binary, probe) {
                continue;
            }
            let result = engine
                .execute(code, language, ExecutionOptions::default().with_timeout_ms(60_000))
                .await;
            assert_eq!(result.status, ExecutionStatus::Success, "{language}: {result:?}");
            assert_eq!(result.stdout, "hello", "{language}");
            assert_eq!(result.exit_code, 0);
        }
        assert!(no_run_dirs_left(root.path()));
    }

    fn no_run_dirs_left(root: &Path) -> bool {
        std::fs::read_dir(root)
            .unwrap()
            .flatten()
            .all(|entry| !entry.file_name().to_string_lossy().starts_with("run-"))
    }

    #[tokio::test]
    async fn go_builds_reuse_the_shared_cache() {
        if !available("go", "version") {
            return;
        }
        let root = tempfile::tempdir().unwrap();
        let engine = host_engine(root.path());
        let code = "package main\n\nimport \"fmt\"\n\nfunc main() { fmt.Println(\"warm\") }\n";

        // The first build fills the cache with the standard library.
        let cold = engine
            .execute(code, "go", ExecutionOptions::default().with_timeout_ms(60_000))
            .await;
        assert_eq!(cold.status, ExecutionStatus::Success, "{cold:?}");
        assert!(root.path().join(".gocache").is_dir());

        let warm = engine.execute(code, "go", ExecutionOptions::default()).await;
        assert_eq!(warm.status, ExecutionStatus::Success, "{warm:?}");
        assert_eq!(warm.stdout, "warm");
        assert!(no_run_dirs_left(root.path()));
    }

    #[tokio::test]
    async fn python_reads_stdin() {
        if !available("python3", "--version") {
            return;
        }
        let root = tempfile::tempdir().unwrap();
        let engine = host_engine(root.path());
        let result = engine
            .execute(
                "a, b = map(int, input().split())\nprint(a + b)\n",
                "python",
                ExecutionOptions::default().with_stdin("20 22\n"),
            )
            .await;
        assert_eq!(result.stdout, "42");
        assert!(result.is_success());
    }

    #[tokio::test]
    async fn javascript_busy_loop_times_out() {
        if !available("node", "--version") {
            return;
        }
        let root = tempfile::tempdir().unwrap();
        let engine = host_engine(root.path());
        let started = Instant::now();
        let result = engine
            .execute(
                "while(1){}",
                "javascript",
                ExecutionOptions::default().with_timeout_ms(500),
            )
            .await;
        assert_eq!(result.status, ExecutionStatus::Timeout);
        assert_eq!(result.exit_code, TIMEOUT_EXIT_CODE);
        assert!(result.elapsed_ms >= 450, "elapsed {}", result.elapsed_ms);
        assert!(started.elapsed() < Duration::from_millis(3_500));
        assert!(scratch_is_empty(root.path()));
    }

    #[tokio::test]
    async fn cpp_syntax_error_reports_compiler_diagnostics() {
        if !available("g++", "--version") {
            return;
        }
        let root = tempfile::tempdir().unwrap();
        let engine = host_engine(root.path());
        let result = engine
            .execute(
                "int main() { return 0 }\n",
                "cpp",
                ExecutionOptions::default().with_timeout_ms(30_000),
            )
            .await;
        assert_eq!(result.status, ExecutionStatus::CompileError);
        assert_ne!(result.exit_code, 0);
        assert!(result.stderr.unwrap().contains("error"));
        assert!(scratch_is_empty(root.path()));
    }

    #[tokio::test]
    async fn endless_printer_is_killed_and_capped() {
        if !available("python3", "--version") {
            return;
        }
        let root = tempfile::tempdir().unwrap();
        let limits = ExecutionLimits {
            max_output_bytes: 4096,
            ..ExecutionLimits::default()
        };
        let engine = Engine::new(
            EngineConfig::default()
                .with_scratch_root(root.path())
                .with_limits(limits),
        )
        .unwrap();
        let result = engine
            .execute(
                "while True:\n    print('x' * 80)\n",
                "python",
                ExecutionOptions::default().with_timeout_ms(1_000),
            )
            .await;
        assert_eq!(result.status, ExecutionStatus::Timeout);
        assert!(result.truncated);
        assert!(result.stdout.len() <= 4096 + TRUNCATION_MARKER.len());
        assert!(scratch_is_empty(root.path()));
    }

    #[tokio::test]
    async fn concurrent_runs_match_sequential_results() {
        if !available("python3", "--version") {
            return;
        }
        let root = tempfile::tempdir().unwrap();
        let engine = host_engine(root.path());

        let runs = (0..8).map(|i| {
            let engine = engine.clone();
            tokio::spawn(async move {
                let code = format!(
                    "import pathlib\nnames = sorted(p.name for p in pathlib.Path('.').iterdir())\nprint({i}, names)\n"
                );
                engine
                    .execute(&code, "python", ExecutionOptions::default().with_timeout_ms(20_000))
                    .await
            })
        });
        let mut results = Vec::new();
        for run in runs.collect::<Vec<_>>() {
            results.push(run.await.unwrap());
        }

        for (i, result) in results.iter().enumerate() {
            assert_eq!(result.status, ExecutionStatus::Success, "{result:?}");
            // Each run sees only its own source file.
            assert_eq!(result.stdout, format!("{i} ['main.py']"));
        }
        assert!(scratch_is_empty(root.path()));
        assert_eq!(engine.metrics().in_flight(), 0);
    }
}
