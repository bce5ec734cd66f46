use std::sync::Arc;

use edge_llm_runtime::{InferenceRuntime, ModelDescriptor, RuntimeConfig};
use tokio::signal;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_target(false)
        .init();

    info!("🚀 Starting edge LLM runtime");

    let mut config = RuntimeConfig::load()?;

    // Single-model setup from the environment for quick trials; real
    // embeddings construct the full descriptor map programmatically.
    if let Ok(path) = std::env::var("RUNTIME_MODEL_PATH") {
        let key = std::env::var("RUNTIME_MODEL_KEY").unwrap_or_else(|_| "default".to_string());
        config = config.with_model(
            ModelDescriptor::new(key, path).with_age_groups(["adult", "teen", "child"]),
        );
    }

    let runtime = Arc::new(InferenceRuntime::new(config)?);
    runtime.start().await;
    info!("✅ Runtime ready (resource monitor running)");

    if runtime.registry().descriptors().is_empty() {
        warn!("No models configured; set RUNTIME_MODEL_PATH to register one");
    } else {
        match runtime.generate("Briefly introduce yourself.", None).await {
            Ok(text) => info!("Sample generation: {}", text),
            Err(e) => warn!("Sample generation failed: {}", e),
        }
        let metrics = runtime.get_performance_metrics().await;
        info!("📊 Metrics: {}", serde_json::to_string_pretty(&metrics)?);
    }

    info!("Press Ctrl+C to shut down");
    signal::ctrl_c().await?;
    info!("🛑 Shutdown signal received");

    runtime.shutdown().await;
    info!("👋 Runtime shutdown complete");
    Ok(())
}
