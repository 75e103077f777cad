//! Lexical deny-list applied to submitted source before anything is spawned.
//!
//! This is a speed bump, not an isolation boundary. It matches text, so any
//! construction the patterns do not anticipate (string concatenation,
//! `getattr` tricks, reflection, encoded payloads) walks straight past it.
//! Hostile input still needs OS-level isolation (container, VM, seccomp) around
//! the process backend.

use std::collections::HashMap;

use anyhow::Context;
use regex::Regex;

use crate::engine::models::Language;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    pub rule: &'static str,
    pub line: usize,
}

#[derive(Debug)]
struct DenyRule {
    name: &'static str,
    pattern: Regex,
}

#[derive(Debug)]
pub struct DenyList {
    rules: HashMap<Language, Vec<DenyRule>>,
}

const PYTHON_RULES: &[(&str, &str)] = &[
    (
        "python: restricted module import",
        r"(?m)^[ \t]*(?:import|from)\s+(?:[\w.]+\s*,\s*)*(?:os|subprocess|socket|ctypes|shutil|multiprocessing|pty|importlib|signal)\b",
    ),
    ("python: dynamic import", r"\b__import__\s*\("),
    (
        "python: dynamic evaluation",
        r"(?:^|[^.\w])((?:eval|exec|compile)\s*\()",
    ),
    (
        "python: system path access",
        r#"\bopen\s*\(\s*[rbfu]*['"]/(?:etc|proc|sys|dev|root|boot|var)\b"#,
    ),
];

const JAVASCRIPT_RULES: &[(&str, &str)] = &[
    (
        "javascript: restricted module",
        r#"(?:\brequire\s*\(|\bimport\b[^;'"]*|\bimport\s*\()\s*['"](?:node:)?(?:child_process|fs|fs/promises|net|http|https|dgram|cluster|worker_threads|vm|os)['"]"#,
    ),
    ("javascript: dynamic evaluation", r"\beval\s*\("),
    ("javascript: function constructor", r"\bnew\s+Function\s*\("),
    (
        "javascript: process internals",
        r"\bprocess\s*\.\s*(?:binding|dlopen|kill|_linkedBinding)\b",
    ),
];

const CPP_RULES: &[(&str, &str)] = &[
    (
        "cpp: process control call",
        r"\b(?:system|popen|fork|vfork|execl|execlp|execle|execv|execvp|execvpe|execve|kill|ptrace|dlopen|syscall)\s*\(",
    ),
    (
        "cpp: restricted header",
        r#"(?m)^[ \t]*#[ \t]*include\s*[<"](?:unistd\.h|sys/[\w/]+\.h|dlfcn\.h|spawn\.h|windows\.h|signal\.h|csignal)[>"]"#,
    ),
    ("cpp: inline assembly", r"\b(?:asm|__asm__|__asm)\b"),
    ("cpp: system path access", r#""/(?:etc|proc|sys|dev|root|boot)/"#),
];

// Package paths only count inside import declarations: `import "x"`,
// `import alias "x"`, or anywhere in a parenthesized import block.
const GO_RULES: &[(&str, &str)] = &[
    (
        "go: restricted package",
        r#"(?m)^[ \t]*import[ \t]+(?:[\w.]+[ \t]+)?("(?:os/exec|syscall|unsafe|plugin|net|net/http|os/signal|golang\.org/x/sys/unix)")"#,
    ),
    (
        "go: restricted package",
        r#"(?m)^[ \t]*import[ \t]*\([^)]*?("(?:os/exec|syscall|unsafe|plugin|net|net/http|os/signal|golang\.org/x/sys/unix)")"#,
    ),
    ("go: cgo", r#"\bimport\s+"C""#),
    ("go: system path access", r#""/(?:etc|proc|sys|dev|root|boot)/"#),
];

impl DenyList {
    pub fn builtin() -> anyhow::Result<Self> {
        let mut rules = HashMap::new();
        for language in Language::ALL {
            let table = match language {
                Language::Python => PYTHON_RULES,
                Language::JavaScript => JAVASCRIPT_RULES,
                Language::Cpp => CPP_RULES,
                Language::Go => GO_RULES,
            };
            let compiled = table
                .iter()
                .map(|&(name, pattern)| {
                    Regex::new(pattern)
                        .with_context(|| format!("invalid deny rule {name}"))
                        .map(|pattern| DenyRule { name, pattern })
                })
                .collect::<anyhow::Result<Vec<_>>>()?;
            rules.insert(language, compiled);
        }
        Ok(Self { rules })
    }

    /// Returns the first rule the source matches, with its 1-based line.
    pub fn screen(&self, language: Language, code: &str) -> Result<(), Violation> {
        let Some(rules) = self.rules.get(&language) else {
            return Ok(());
        };
        // Rules that need leading context capture the offending token in group 1.
        let hit = rules
            .iter()
            .filter_map(|rule| {
                let caps = rule.pattern.captures(code)?;
                let token = caps.get(1).or_else(|| caps.get(0))?;
                Some((token.start(), rule.name))
            })
            .min_by_key(|(offset, _)| *offset);
        match hit {
            Some((offset, rule)) => Err(Violation {
                rule,
                line: line_of(code, offset),
            }),
            None => Ok(()),
        }
    }

    pub fn rule_count(&self, language: Language) -> usize {
        self.rules.get(&language).map(Vec::len).unwrap_or(0)
    }
}

fn line_of(code: &str, offset: usize) -> usize {
    code.as_bytes()[..offset]
        .iter()
        .filter(|&&b| b == b'\n')
        .count()
        + 1
}
