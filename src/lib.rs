//! Runs untrusted Python, C++, JavaScript and Go submissions against supplied
//! stdin under a hard wall-clock budget, one throwaway workspace per run.

pub mod engine;

pub use engine::{
    Engine,
    config::EngineConfig,
    models::{
        ExecutionOptions, ExecutionRequest, ExecutionResult, ExecutionStatus, Language,
        REJECTED_EXIT_CODE, TIMEOUT_EXIT_CODE,
    },
};
