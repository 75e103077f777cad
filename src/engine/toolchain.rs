use std::{
    path::PathBuf,
    sync::Arc,
    time::{Duration, Instant},
};

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;

use crate::engine::{
    deadline::DeadlineTimer,
    error::{EngineError, Phase, SandboxError},
    models::Language,
    sandbox::{LanguageSpec, SandboxBackend},
};

const PROBE_TIMEOUT: Duration = Duration::from_secs(10);
const PROBE_OUTPUT_LIMIT: usize = 4096;

/// Checks that a language's compiler or interpreter can be started before any
/// workspace is staged. Only successful probes are cached, so installing a
/// toolchain later takes effect without a restart.
#[derive(Clone)]
pub struct ToolchainProbe {
    verified: Arc<DashMap<Language, String>>,
    cwd: PathBuf,
}

impl ToolchainProbe {
    pub fn new(cwd: PathBuf) -> Self {
        Self {
            verified: Arc::new(DashMap::new()),
            cwd,
        }
    }

    /// Runs `<toolchain> --version` unless a previous call already saw it
    /// succeed. The probe never outlives `deadline`, the caller's overall budget.
    pub async fn ensure(
        &self,
        spec: &LanguageSpec,
        backend: &dyn SandboxBackend,
        deadline: Instant,
    ) -> Result<(), EngineError> {
        if let Some(cached) = self.verified.get(&spec.language) {
            if cached.value() == &spec.toolchain {
                return Ok(());
            }
        }

        let probe_started = Instant::now();
        let own_deadline = probe_started + PROBE_TIMEOUT;
        let budget_bound = deadline < own_deadline;
        let cancel = CancellationToken::new();
        let _timer = DeadlineTimer::arm(cancel.clone(), deadline.min(own_deadline));
        let invocation = spec
            .probe_command(&self.cwd)
            .output_limit(PROBE_OUTPUT_LIMIT);

        let output = match backend.run(invocation, cancel).await {
            Ok(output) => output,
            Err(err) => return Err(unavailable(spec, err)),
        };
        if output.cancelled {
            if budget_bound {
                return Err(EngineError::PhaseTimeout {
                    phase: Phase::Probe,
                    budget_ms: deadline.saturating_duration_since(probe_started).as_millis()
                        as u64,
                });
            }
            return Err(EngineError::Internal(format!(
                "toolchain probe for `{}` did not finish within {}s",
                spec.toolchain,
                PROBE_TIMEOUT.as_secs()
            )));
        }
        if output.exit_code != 0 {
            let (stderr, _) = output.stderr.into_text(PROBE_OUTPUT_LIMIT);
            let detail = stderr.trim();
            tracing::warn!(
                language = %spec.language,
                toolchain = %spec.toolchain,
                exit_code = output.exit_code,
                stderr = %detail,
                "toolchain probe failed"
            );
            let reason = if detail.is_empty() {
                format!("failed its version check (exit {})", output.exit_code)
            } else {
                format!(
                    "failed its version check (exit {}): {detail}",
                    output.exit_code
                )
            };
            return Err(missing(spec, reason));
        }

        let version = String::from_utf8_lossy(&output.stdout.bytes)
            .lines()
            .next()
            .unwrap_or_default()
            .to_string();
        tracing::debug!(
            language = %spec.language,
            toolchain = %spec.toolchain,
            version = %version,
            "toolchain available"
        );
        self.verified
            .insert(spec.language, spec.toolchain.clone());
        Ok(())
    }

    pub fn is_verified(&self, language: Language) -> bool {
        self.verified.contains_key(&language)
    }
}

/// Maps a failure to start the toolchain binary to `ToolchainMissing`; any
/// other backend failure is internal.
pub(crate) fn unavailable(spec: &LanguageSpec, err: SandboxError) -> EngineError {
    match err {
        SandboxError::ProgramNotFound(binary) if binary == spec.toolchain => {
            missing(spec, "was not found on this host")
        }
        SandboxError::NotExecutable(binary) if binary == spec.toolchain => {
            missing(spec, "is not executable")
        }
        other => EngineError::Internal(other.to_string()),
    }
}

fn missing(spec: &LanguageSpec, reason: impl Into<String>) -> EngineError {
    EngineError::ToolchainMissing {
        language: spec.language,
        binary: spec.toolchain.clone(),
        env_var: spec.toolchain_env_var,
        reason: reason.into(),
    }
}
