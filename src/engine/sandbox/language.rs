use std::path::{Path, PathBuf};

use crate::engine::{
    config::ToolchainConfig,
    models::Language,
    sandbox::Invocation,
};

const ARTIFACT_NAME: &str = "main";
/// Shared Go build cache under the scratch root. Go locks cache entries itself,
/// so concurrent builds may share it; it holds compiled packages only.
const GO_CACHE_DIR: &str = ".gocache";
const FALLBACK_PATH: &str = "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";

#[derive(Debug, Clone)]
pub struct LanguageSpec {
    pub language: Language,
    pub source_name: &'static str,
    pub toolchain: String,
    pub toolchain_env_var: &'static str,
    pub probe_args: &'static [&'static str],
    pub build_cache: PathBuf,
}

impl LanguageSpec {
    pub fn for_language(
        language: Language,
        toolchains: &ToolchainConfig,
        scratch_root: &Path,
    ) -> Self {
        let build_cache = scratch_root.join(GO_CACHE_DIR);
        match language {
            Language::Python => Self {
                language,
                source_name: "main.py",
                toolchain: toolchains.python.clone(),
                toolchain_env_var: "PYTHON_BIN",
                probe_args: &["--version"],
                build_cache: build_cache.clone(),
            },
            Language::JavaScript => Self {
                language,
                source_name: "main.js",
                toolchain: toolchains.node.clone(),
                toolchain_env_var: "NODE_BIN",
                probe_args: &["--version"],
                build_cache: build_cache.clone(),
            },
            Language::Cpp => Self {
                language,
                source_name: "main.cpp",
                toolchain: toolchains.cxx.clone(),
                toolchain_env_var: "CXX_BIN",
                probe_args: &["--version"],
                build_cache: build_cache.clone(),
            },
            Language::Go => Self {
                language,
                source_name: "main.go",
                toolchain: toolchains.go.clone(),
                toolchain_env_var: "GO_BIN",
                probe_args: &["version"],
                build_cache,
            },
        }
    }

    pub fn needs_compile(&self) -> bool {
        matches!(self.language, Language::Cpp | Language::Go)
    }

    pub fn source_path(&self, work_dir: &Path) -> PathBuf {
        work_dir.join(self.source_name)
    }

    pub fn artifact_path(&self, work_dir: &Path) -> PathBuf {
        work_dir.join(ARTIFACT_NAME)
    }

    pub fn probe_command(&self, cwd: &Path) -> Invocation {
        base_invocation(&self.toolchain, cwd).args(self.probe_args.iter().copied())
    }

    pub fn compile_command(&self, work_dir: &Path) -> Option<Invocation> {
        let source = self.source_path(work_dir).display().to_string();
        let artifact = self.artifact_path(work_dir).display().to_string();
        match self.language {
            Language::Cpp => Some(
                base_invocation(&self.toolchain, work_dir)
                    .args(["-O2", "-std=c++17", "-o"])
                    .arg(artifact)
                    .arg(source),
            ),
            Language::Go => Some(
                base_invocation(&self.toolchain, work_dir)
                    .args(["build", "-o"])
                    .arg(artifact)
                    .arg(source)
                    .env("GOCACHE", self.build_cache.display().to_string())
                    .env("GOPATH", work_dir.join(".gopath").display().to_string())
                    .env("GO111MODULE", "off")
                    .env("CGO_ENABLED", "0"),
            ),
            Language::Python | Language::JavaScript => None,
        }
    }

    pub fn run_command(&self, work_dir: &Path) -> Invocation {
        let source = self.source_path(work_dir).display().to_string();
        match self.language {
            Language::Python => base_invocation(&self.toolchain, work_dir)
                .args(["-I", "-u"])
                .arg(source)
                .env("PYTHONDONTWRITEBYTECODE", "1")
                .env("PYTHONUNBUFFERED", "1"),
            Language::JavaScript => base_invocation(&self.toolchain, work_dir).arg(source),
            Language::Cpp | Language::Go => base_invocation(
                self.artifact_path(work_dir).display().to_string(),
                work_dir,
            ),
        }
    }
}

/// Child processes see only the host `PATH` plus a home and temp dir pointed
/// at the workspace.
fn base_invocation(program: impl Into<String>, work_dir: &Path) -> Invocation {
    let path = std::env::var("PATH").unwrap_or_else(|_| FALLBACK_PATH.to_string());
    let work_dir_str = work_dir.display().to_string();
    Invocation::new(program, work_dir)
        .env("PATH", path)
        .env("HOME", work_dir_str.clone())
        .env("TMPDIR", work_dir_str)
        .env("LANG", "C.UTF-8")
}
