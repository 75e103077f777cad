use std::path::PathBuf;

use anyhow::Context;
use code_exec::{Engine, EngineConfig, ExecutionRequest, engine::init_tracing};
use tokio::io::AsyncReadExt;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = EngineConfig::from_env();
    init_tracing(&config);

    let raw = match std::env::args_os().nth(1).map(PathBuf::from) {
        Some(path) => tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("failed to read request from {}", path.display()))?,
        None => {
            let mut raw = String::new();
            tokio::io::stdin()
                .read_to_string(&mut raw)
                .await
                .context("failed to read request from stdin")?;
            raw
        }
    };
    let request: ExecutionRequest =
        serde_json::from_str(&raw).context("request is not a valid execution request")?;

    let engine = Engine::new(config).context("execution engine init failed")?;
    let result = engine.execute_request(request).await;
    tracing::debug!(metrics = %engine.metrics().render_prometheus(), "engine metrics");

    println!(
        "{}",
        serde_json::to_string_pretty(&result).context("failed to encode result")?
    );
    Ok(())
}
