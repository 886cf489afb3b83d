use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;

use docqa_cli::{init_tracing, router, AppState};
use docqa_core::config::Config;
use docqa_pipeline::PipelineContext;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing("info");

    let settings = Config::load()?.settings()?;
    let addr = format!("{}:{}", settings.host, settings.port);
    let max_upload_bytes = settings.max_upload_bytes;
    let pipeline = Arc::new(PipelineContext::from_settings(settings)?);
    let app = router(AppState { pipeline }, max_upload_bytes);

    let listener = TcpListener::bind(&addr).await.with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!("docqa server listening on http://{addr}");
    tracing::info!("  POST /api/rag/upload - upload a .docx/.txt/.md document (field 'file')");
    tracing::info!("  POST /api/rag/chat   - ask a question: {{\"question\": \"...\"}}");
    tracing::info!("  GET  /api/rag/status - document and model status");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}
