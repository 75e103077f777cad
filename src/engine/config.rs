use std::{env, path::PathBuf, str::FromStr};

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub scratch_root: PathBuf,
    pub limits: ExecutionLimits,
    pub toolchains: ToolchainConfig,
    pub log_level: String,
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionLimits {
    pub default_timeout_ms: u64,
    pub max_timeout_ms: u64,
    pub max_code_bytes: usize,
    pub max_stdin_bytes: usize,
    pub max_output_bytes: usize,
    pub compile_budget_percent: u64,
}

impl Default for ExecutionLimits {
    fn default() -> Self {
        Self {
            default_timeout_ms: 10_000,
            max_timeout_ms: 60_000,
            max_code_bytes: 64 * 1024,
            max_stdin_bytes: 256 * 1024,
            max_output_bytes: 64 * 1024,
            compile_budget_percent: 50,
        }
    }
}

impl ExecutionLimits {
    pub fn normalized(mut self) -> Self {
        self.max_timeout_ms = self.max_timeout_ms.clamp(50, 600_000);
        self.default_timeout_ms = self.default_timeout_ms.clamp(50, self.max_timeout_ms);
        self.max_code_bytes = self.max_code_bytes.clamp(64, 16 * 1024 * 1024);
        self.max_stdin_bytes = self.max_stdin_bytes.min(64 * 1024 * 1024);
        self.max_output_bytes = self.max_output_bytes.clamp(1024, 16 * 1024 * 1024);
        self.compile_budget_percent = self.compile_budget_percent.clamp(10, 90);
        self
    }
}

/// Binaries used to build and run submissions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolchainConfig {
    pub python: String,
    pub node: String,
    pub cxx: String,
    pub go: String,
}

impl Default for ToolchainConfig {
    fn default() -> Self {
        Self {
            python: "python3".to_string(),
            node: "node".to_string(),
            cxx: "g++".to_string(),
            go: "go".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "compact" | "text" => Ok(Self::Compact),
            "json" => Ok(Self::Json),
            _ => Err(format!("unsupported log format: {s}")),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            scratch_root: env::temp_dir().join("code-exec"),
            limits: ExecutionLimits::default(),
            toolchains: ToolchainConfig::default(),
            log_level: "info".to_string(),
            log_format: LogFormat::default(),
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let limits = ExecutionLimits {
            default_timeout_ms: env_parse("DEFAULT_TIMEOUT_MS", defaults.limits.default_timeout_ms),
            max_timeout_ms: env_parse("MAX_TIMEOUT_MS", defaults.limits.max_timeout_ms),
            max_code_bytes: env_parse("MAX_CODE_BYTES", defaults.limits.max_code_bytes),
            max_stdin_bytes: env_parse("MAX_STDIN_BYTES", defaults.limits.max_stdin_bytes),
            max_output_bytes: env_parse("MAX_OUTPUT_BYTES", defaults.limits.max_output_bytes),
            compile_budget_percent: env_parse(
                "COMPILE_BUDGET_PERCENT",
                defaults.limits.compile_budget_percent,
            ),
        }
        .normalized();

        Self {
            scratch_root: env::var("SCRATCH_ROOT")
                .ok()
                .filter(|raw| !raw.trim().is_empty())
                .map(PathBuf::from)
                .unwrap_or(defaults.scratch_root),
            limits,
            toolchains: ToolchainConfig {
                python: env_string("PYTHON_BIN", defaults.toolchains.python),
                node: env_string("NODE_BIN", defaults.toolchains.node),
                cxx: env_string("CXX_BIN", defaults.toolchains.cxx),
                go: env_string("GO_BIN", defaults.toolchains.go),
            },
            log_level: env_string("LOG_LEVEL", defaults.log_level),
            log_format: env_parse("LOG_FORMAT", defaults.log_format),
        }
    }

    pub fn with_scratch_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.scratch_root = root.into();
        self
    }

    pub fn with_limits(mut self, limits: ExecutionLimits) -> Self {
        self.limits = limits.normalized();
        self
    }
}

fn env_string(key: &str, default: String) -> String {
    env::var(key)
        .ok()
        .map(|raw| raw.trim().to_string())
        .filter(|raw| !raw.is_empty())
        .unwrap_or(default)
}

fn env_parse<T>(key: &str, default: T) -> T
where
    T: FromStr,
{
    env::var(key)
        .ok()
        .and_then(|raw| raw.trim().parse().ok())
        .unwrap_or(default)
}
