use anyhow::{anyhow, Result};
use log::{error, info, warn};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::core::config::Config;
use crate::core::io::{BlobStore, JobLedger};
use crate::core::state::{ChapterRange, JobStatus};
use crate::core::workspace::{Workspace, WorkspaceManager};
use crate::services::dialogue::DialogueAudioProcessor;
use crate::services::extraction::DocumentExtractor;
use crate::services::publisher::ResultPublisher;
use crate::services::retry::{RetryError, RetryPolicy};
use crate::services::splitter::ChapterSplitter;
use crate::services::tts::SpeechSynthesizer;
use crate::utils::pdf::DocumentReader;

const SOURCE_FILE_NAME: &str = "novel.pdf";
const CHAPTERS_DIR: &str = "chapters";
const OUTPUT_DIR: &str = "generated_output";

/// External collaborators of the pipeline, built once at startup.
#[derive(Clone)]
pub struct JobServices {
    pub ledger: Arc<dyn JobLedger>,
    pub blobs: Arc<dyn BlobStore>,
    pub extractor: Arc<dyn DocumentExtractor>,
    pub synthesizer: Arc<dyn SpeechSynthesizer>,
    pub documents: Arc<dyn DocumentReader>,
}

/// Where a job's source lives and where its output goes in the blob store.
#[derive(Debug, Clone, Copy, Default)]
pub struct StorageLayout;

impl StorageLayout {
    pub fn source_key(&self, job_id: &str) -> String {
        format!("sources/{}/{}", job_id, SOURCE_FILE_NAME)
    }

    pub fn output_prefix(&self, job_id: &str) -> String {
        format!("generated/{}", job_id)
    }
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub extraction_retry: RetryPolicy,
    pub synthesis_retry: RetryPolicy,
    pub synthesis_concurrency: usize,
    pub audio_extension: String,
}

impl PipelineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            extraction_retry: config.llm.retry_policy(),
            synthesis_retry: RetryPolicy::new(
                config.audio.retry_count,
                Duration::from_secs(config.audio.retry_delay_seconds),
            ),
            synthesis_concurrency: config.audio.concurrency,
            audio_extension: config.audio.extension.clone(),
        }
    }
}

/// Job-fatal failure, one variant per stage. The `Display` text is what
/// lands in the ledger's `ErrorMessage`.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Failed to download source document: {0:#}")]
    Download(anyhow::Error),
    #[error("{0}")]
    ChapterExtraction(RetryError),
    #[error("Failed to split source document: {0:#}")]
    Split(anyhow::Error),
    #[error("Chapter '{chapter}': {cause}")]
    DialogueExtraction { chapter: String, cause: RetryError },
    #[error("Chapter '{chapter}': {cause:#}")]
    ChapterAudio { chapter: String, cause: anyhow::Error },
    #[error("Failed to publish results: {0:#}")]
    Publish(anyhow::Error),
    #[error("Failed to update job ledger: {0:#}")]
    Ledger(anyhow::Error),
}

/// Runs one job end to end: ledger, download, extraction, split, audio,
/// publish, cleanup.
pub struct JobOrchestrator {
    services: JobServices,
    workspaces: WorkspaceManager,
    layout: StorageLayout,
    extraction_retry: RetryPolicy,
    splitter: ChapterSplitter,
    processor: DialogueAudioProcessor,
    publisher: ResultPublisher,
}

impl JobOrchestrator {
    pub fn new(
        services: JobServices,
        workspaces: WorkspaceManager,
        settings: PipelineSettings,
    ) -> Self {
        let splitter = ChapterSplitter::new(services.documents.clone());
        let processor = DialogueAudioProcessor::new(
            services.synthesizer.clone(),
            settings.synthesis_retry,
            settings.audio_extension,
        )
        .with_concurrency(settings.synthesis_concurrency);
        let publisher = ResultPublisher::new(services.blobs.clone());

        Self {
            services,
            workspaces,
            layout: StorageLayout,
            extraction_retry: settings.extraction_retry,
            splitter,
            processor,
            publisher,
        }
    }

    pub fn from_config(config: &Config, services: JobServices) -> Self {
        Self::new(
            services,
            WorkspaceManager::new(config.worker.workspace_root()),
            PipelineSettings::from_config(config),
        )
    }

    /// Returns the terminal status written to the ledger. `Err` means the
    /// ledger could not be brought to a terminal state (or no workspace
    /// could be created), so the job must be redelivered.
    pub async fn process_job(&self, job_id: &str) -> Result<JobStatus> {
        info!("[{}] - Starting processing.", job_id);
        let workspace = self.workspaces.acquire(job_id).await?;

        let outcome = self.run_pipeline(job_id, &workspace).await;
        let terminal = match outcome {
            Ok(()) => self
                .services
                .ledger
                .set_status(job_id, JobStatus::Complete)
                .await
                .map(|()| {
                    info!("[{}] - Job completed successfully.", job_id);
                    JobStatus::Complete
                }),
            Err(e) => {
                error!("[{}] - An error occurred during processing: {}", job_id, e);
                self.services
                    .ledger
                    .set_failed(job_id, &e.to_string())
                    .await
                    .map(|()| JobStatus::Failed)
            }
        };

        if let Err(e) = workspace.release().await {
            warn!("[{}] - {:#}", job_id, e);
        }
        terminal
    }

    async fn run_pipeline(&self, job_id: &str, workspace: &Workspace) -> Result<(), PipelineError> {
        self.services
            .ledger
            .set_status(job_id, JobStatus::Processing)
            .await
            .map_err(PipelineError::Ledger)?;

        let source = workspace.join(SOURCE_FILE_NAME);
        let source_key = self.layout.source_key(job_id);
        info!("[{}] - Downloading {} to {}", job_id, source_key, source.display());
        self.services
            .blobs
            .download(&source_key, &source)
            .await
            .map_err(PipelineError::Download)?;

        info!("[{}] - Extracting chapters...", job_id);
        let extractor = &self.services.extractor;
        let source_ref = &source;
        let chapters = self
            .extraction_retry
            .run("chapter extraction", move || extractor.extract_chapters(source_ref))
            .await
            .map_err(PipelineError::ChapterExtraction)?;
        info!("[{}] - Found {} chapter(s).", job_id, chapters.len());

        let chapter_files = self.split(&source, chapters, workspace.join(CHAPTERS_DIR)).await?;

        let output_root = workspace.join(OUTPUT_DIR);
        tokio::fs::create_dir_all(&output_root)
            .await
            .map_err(|e| {
                PipelineError::Publish(anyhow!("Failed to create {}: {}", output_root.display(), e))
            })?;
        for (index, chapter_file) in chapter_files.iter().enumerate() {
            self.process_chapter(job_id, index, chapter_file, &output_root).await?;
        }

        let prefix = self.layout.output_prefix(job_id);
        let uploaded = self
            .publisher
            .publish(&output_root, &prefix)
            .await
            .map_err(PipelineError::Publish)?;
        info!("[{}] - Uploaded {} file(s) to {}", job_id, uploaded, prefix);
        Ok(())
    }

    /// PDF rewriting is CPU-bound, so it runs off the async workers.
    async fn split(
        &self,
        source: &Path,
        chapters: Vec<ChapterRange>,
        chapters_dir: PathBuf,
    ) -> Result<Vec<PathBuf>, PipelineError> {
        let splitter = self.splitter.clone();
        let source = source.to_path_buf();
        tokio::task::spawn_blocking(move || splitter.split(&source, &chapters, &chapters_dir))
            .await
            .map_err(|e| PipelineError::Split(anyhow!("Splitter task failed: {}", e)))?
            .map_err(PipelineError::Split)
    }

    async fn process_chapter(
        &self,
        job_id: &str,
        index: usize,
        chapter_file: &Path,
        output_root: &Path,
    ) -> Result<(), PipelineError> {
        let title = chapter_file
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        info!("[{}] - Processing chapter {}: {}", job_id, index, title);

        let chapter_dir = output_root.join(format!("{}_{}", index, title));
        tokio::fs::create_dir_all(&chapter_dir)
            .await
            .map_err(|e| PipelineError::ChapterAudio {
                chapter: title.clone(),
                cause: anyhow!("Failed to create {}: {}", chapter_dir.display(), e),
            })?;

        let extractor = &self.services.extractor;
        let lines = self
            .extraction_retry
            .run("dialogue extraction", move || extractor.extract_dialogue(chapter_file))
            .await
            .map_err(|cause| PipelineError::DialogueExtraction {
                chapter: title.clone(),
                cause,
            })?;

        self.processor
            .process(&lines, &chapter_dir, job_id, &title)
            .await
            .map_err(|cause| PipelineError::ChapterAudio {
                chapter: title.clone(),
                cause,
            })?;
        Ok(())
    }
}
