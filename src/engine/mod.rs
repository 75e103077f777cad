pub mod config;
pub mod deadline;
pub mod error;
pub mod metrics;
pub mod models;
pub mod sandbox;
pub mod screen;
pub mod toolchain;
pub mod workspace;

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use anyhow::Context;
use tokio_util::sync::CancellationToken;

use crate::engine::{
    config::{EngineConfig, LogFormat},
    deadline::{DeadlineTimer, TimeBudget},
    error::{EngineError, Phase},
    metrics::MetricsRegistry,
    models::{ExecutionOptions, ExecutionRequest, ExecutionResult, Language},
    sandbox::{LanguageSpec, ProcessSandbox, SandboxBackend},
    screen::DenyList,
    toolchain::ToolchainProbe,
    workspace::Workspace,
};

/// Compiles and runs untrusted submissions, one isolated workspace per call.
///
/// Cloning is cheap; clones share the deny-list, toolchain cache and metrics.
#[derive(Clone)]
pub struct Engine {
    config: Arc<EngineConfig>,
    backend: Arc<dyn SandboxBackend>,
    deny_list: Arc<DenyList>,
    toolchains: ToolchainProbe,
    metrics: Arc<MetricsRegistry>,
}

struct Validated {
    language: Language,
    timeout: Duration,
}

impl Engine {
    pub fn new(config: EngineConfig) -> anyhow::Result<Self> {
        Self::with_backend(config, Arc::new(ProcessSandbox::new()))
    }

    pub fn with_backend(
        config: EngineConfig,
        backend: Arc<dyn SandboxBackend>,
    ) -> anyhow::Result<Self> {
        std::fs::create_dir_all(&config.scratch_root).with_context(|| {
            format!(
                "failed to create scratch root {}",
                config.scratch_root.display()
            )
        })?;
        let deny_list = DenyList::builtin().context("deny-list compilation failed")?;
        tracing::info!(
            scratch_root = %config.scratch_root.display(),
            backend = backend.name(),
            "execution engine ready"
        );
        Ok(Self {
            toolchains: ToolchainProbe::new(config.scratch_root.clone()),
            config: Arc::new(config),
            backend,
            deny_list: Arc::new(deny_list),
            metrics: Arc::new(MetricsRegistry::new()),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn metrics(&self) -> &MetricsRegistry {
        &self.metrics
    }

    pub async fn execute_request(&self, request: ExecutionRequest) -> ExecutionResult {
        self.execute(&request.code, &request.language, request.options)
            .await
    }

    /// Runs one submission to a terminal state. Every failure is folded into
    /// the returned result and the workspace is gone before this returns.
    pub async fn execute(
        &self,
        code: &str,
        language: &str,
        options: ExecutionOptions,
    ) -> ExecutionResult {
        let accepted = Instant::now();
        self.metrics.started();

        let mut result = match self.run_pipeline(code, language, &options, accepted).await {
            Ok(result) => result,
            Err(err) => {
                tracing::debug!(language, error = %err, "run rejected");
                ExecutionResult::from(err)
            }
        };
        result.elapsed_ms = accepted.elapsed().as_millis() as u64;

        self.metrics.finished(result.status);
        tracing::info!(
            language,
            status = %result.status,
            exit_code = result.exit_code,
            elapsed_ms = result.elapsed_ms,
            truncated = result.truncated,
            "execution finished"
        );
        result
    }

    async fn run_pipeline(
        &self,
        code: &str,
        language: &str,
        options: &ExecutionOptions,
        accepted: Instant,
    ) -> Result<ExecutionResult, EngineError> {
        let Validated { language, timeout } = self.validate(code, language, options)?;

        self.deny_list
            .screen(language, code)
            .map_err(|violation| EngineError::SecurityViolation {
                rule: violation.rule,
                line: violation.line,
            })?;

        let budget = TimeBudget::new(
            accepted,
            timeout,
            self.config.limits.compile_budget_percent,
        );
        let spec = LanguageSpec::for_language(
            language,
            &self.config.toolchains,
            &self.config.scratch_root,
        );
        self.toolchains
            .ensure(&spec, self.backend.as_ref(), budget.run_deadline())
            .await?;

        let workspace = Workspace::create(&self.config.scratch_root).await?;
        let outcome = self
            .run_in_workspace(&workspace, &spec, code, options, budget)
            .await;
        workspace.remove().await;
        outcome
    }

    fn validate(
        &self,
        code: &str,
        language: &str,
        options: &ExecutionOptions,
    ) -> Result<Validated, EngineError> {
        let limits = &self.config.limits;
        if code.trim().is_empty() {
            return Err(EngineError::Validation("code is empty".to_string()));
        }
        if code.len() > limits.max_code_bytes {
            return Err(EngineError::Validation(format!(
                "code is {} bytes; the limit is {}",
                code.len(),
                limits.max_code_bytes
            )));
        }
        if options.stdin.len() > limits.max_stdin_bytes {
            return Err(EngineError::Validation(format!(
                "stdin is {} bytes; the limit is {}",
                options.stdin.len(),
                limits.max_stdin_bytes
            )));
        }
        let language = language.parse::<Language>().map_err(EngineError::Validation)?;
        let timeout_ms = match options.timeout_ms {
            Some(0) => {
                return Err(EngineError::Validation(
                    "timeoutMs must be greater than zero".to_string(),
                ));
            }
            Some(ms) => ms.min(limits.max_timeout_ms),
            None => limits.default_timeout_ms,
        };
        Ok(Validated {
            language,
            timeout: Duration::from_millis(timeout_ms),
        })
    }

    async fn run_in_workspace(
        &self,
        workspace: &Workspace,
        spec: &LanguageSpec,
        code: &str,
        options: &ExecutionOptions,
        budget: TimeBudget,
    ) -> Result<ExecutionResult, EngineError> {
        let run_id = workspace.id();
        workspace
            .write_file(spec.source_name, code.as_bytes())
            .await?;

        if let Some(compile) = spec.compile_command(workspace.path()) {
            tracing::debug!(%run_id, language = %spec.language, "compiling");
            let cancel = CancellationToken::new();
            let _timer = DeadlineTimer::arm(cancel.clone(), budget.compile_deadline());
            let output = self
                .backend
                .run(compile.output_limit(self.config.limits.max_output_bytes), cancel)
                .await
                .map_err(|err| toolchain::unavailable(spec, err))?;
            if output.cancelled {
                return Err(EngineError::PhaseTimeout {
                    phase: Phase::Compile,
                    budget_ms: budget.compile_allowance().as_millis() as u64,
                });
            }
            let (diagnostics, _) = output
                .stderr
                .into_text(self.config.limits.max_output_bytes);
            if output.exit_code != 0 || !diagnostics.trim().is_empty() {
                return Err(EngineError::Compile {
                    exit_code: if output.exit_code == 0 { 1 } else { output.exit_code },
                    diagnostics,
                });
            }
        }

        tracing::debug!(%run_id, language = %spec.language, "running");
        let limit = self.config.limits.max_output_bytes;
        let run = spec
            .run_command(workspace.path())
            .stdin(options.stdin.as_bytes())
            .output_limit(limit);
        let cancel = CancellationToken::new();
        let _timer = DeadlineTimer::arm(cancel.clone(), budget.run_deadline());
        let output = self
            .backend
            .run(run, cancel)
            .await
            .map_err(|err| toolchain::unavailable(spec, err))?;

        if output.cancelled {
            tracing::warn!(
                %run_id,
                language = %spec.language,
                budget_ms = budget.total().as_millis() as u64,
                "run exceeded its time budget and was killed"
            );
        }
        let (stdout, stdout_truncated) = output.stdout.into_text(limit);
        let (stderr, stderr_truncated) = output.stderr.into_text(limit);
        Ok(ExecutionResult::from_program(
            stdout,
            stderr,
            output.exit_code,
            output.cancelled,
            stdout_truncated || stderr_truncated,
        ))
    }
}

/// Installs the global subscriber. `RUST_LOG` wins over the configured level.
pub fn init_tracing(config: &EngineConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(config.log_level.clone()));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match config.log_format {
        LogFormat::Json => builder
            .json()
            .with_current_span(false)
            .with_span_list(false)
            .init(),
        LogFormat::Compact => builder.with_target(false).compact().init(),
    }
}

#[cfg(test)]
mod tests;
