use anyhow::Result;
use log::{error, info};
use std::sync::Arc;

use novel2audiobook_worker::core::config::Config;
use novel2audiobook_worker::services::aws::AwsClients;
use novel2audiobook_worker::services::extraction::LlmExtractor;
use novel2audiobook_worker::services::listener::JobQueueListener;
use novel2audiobook_worker::services::llm::create_llm;
use novel2audiobook_worker::services::tts::create_synthesizer;
use novel2audiobook_worker::services::workflow::{JobOrchestrator, JobServices};
use novel2audiobook_worker::utils::pdf::PdfReader;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // 1. Load config; missing required options are fatal
    let config = match Config::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("Error loading config: {:#}", e);
            std::process::exit(1);
        }
    };

    // 2. Build clients once, share them across jobs
    let aws = AwsClients::connect(&config.aws).await;
    let llm = create_llm(&config.llm)?;
    let synthesizer = create_synthesizer(&config.audio).await?;

    let services = JobServices {
        ledger: Arc::new(aws.ledger(&config.aws)),
        blobs: Arc::new(aws.blob_store(&config.aws)),
        extractor: Arc::new(LlmExtractor::new(llm)),
        synthesizer,
        documents: Arc::new(PdfReader),
    };
    let orchestrator = JobOrchestrator::from_config(&config, services);

    // 3. Poll until interrupted
    let listener = JobQueueListener::new(
        Arc::new(aws.queue(&config.aws, &config.worker)),
        Arc::new(orchestrator),
        config.worker.error_backoff(),
    );

    tokio::select! {
        _ = listener.run() => {}
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, shutting down.");
        }
    }

    Ok(())
}
