use anyhow::{Context, Result};
use chrono::Utc;
use futures_util::StreamExt;
use log::{error, info};
use std::path::Path;
use std::sync::Arc;

use crate::core::state::{AudioFile, ChapterAudioBundle, DialogueLine, DialogueRecord};
use crate::services::retry::RetryPolicy;
use crate::services::tts::SpeechSynthesizer;

pub const MANIFEST_FILE_NAME: &str = "metadata.json";
const PREVIEW_CHARS: usize = 50;

/// True when the text is worth sending to the synthesizer: non-empty and
/// carrying at least one ASCII letter or digit.
pub fn is_valid_dialogue(text: &str) -> bool {
    text.chars().any(|c| c.is_ascii_alphanumeric())
}

fn preview(text: &str) -> String {
    text.chars().take(PREVIEW_CHARS).collect()
}

pub fn audio_file_name(index: usize, extension: &str) -> String {
    format!("dialogue_{}.{}", index, extension)
}

/// Synthesizes a chapter's lines and writes its manifest.
pub struct DialogueAudioProcessor {
    synthesizer: Arc<dyn SpeechSynthesizer>,
    retry: RetryPolicy,
    concurrency: usize,
    extension: String,
}

impl DialogueAudioProcessor {
    pub fn new(
        synthesizer: Arc<dyn SpeechSynthesizer>,
        retry: RetryPolicy,
        extension: impl Into<String>,
    ) -> Self {
        Self {
            synthesizer,
            retry,
            concurrency: 1,
            extension: extension.into(),
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Invalid lines are dropped. A line whose synthesis fails stays in the
    /// manifest with the `"ERROR"` sentinel. Only a manifest write failure
    /// is returned as an error.
    pub async fn process(
        &self,
        lines: &[DialogueLine],
        output_dir: &Path,
        job_id: &str,
        chapter_title: &str,
    ) -> Result<ChapterAudioBundle> {
        let date_added = Utc::now();

        let valid: Vec<(usize, &DialogueLine)> = lines
            .iter()
            .enumerate()
            .filter(|(_, line)| is_valid_dialogue(&line.text))
            .collect();
        info!(
            "[{}] - '{}': synthesizing {} of {} lines",
            job_id,
            chapter_title,
            valid.len(),
            lines.len()
        );

        // Owned work items keep the stream's future `Send` behind async_trait.
        let work: Vec<(usize, usize, String)> = valid
            .iter()
            .enumerate()
            .map(|(slot, (index, line))| (slot, *index, line.text.clone()))
            .collect();
        let synthesizer = &self.synthesizer;
        let retry = &self.retry;
        let extension = self.extension.as_str();

        let results: Vec<(usize, AudioFile)> = futures_util::stream::iter(work)
            .map(move |(slot, index, text)| async move {
                let file_name = audio_file_name(index, extension);
                let dest = output_dir.join(&file_name);
                let target = dest.as_path();
                let line_text = text.as_str();
                let outcome = retry
                    .run("voice generation", move || async move {
                        let audio = synthesizer.synthesize(line_text).await?;
                        tokio::fs::write(target, &audio)
                            .await
                            .with_context(|| format!("Failed to write {}", target.display()))?;
                        Ok::<(), anyhow::Error>(())
                    })
                    .await;

                let audio_file = match outcome {
                    Ok(()) => AudioFile::Generated(file_name),
                    Err(e) => {
                        error!(
                            "[{}] Voice gen FAILED for dialogue: '{}...'. Error: {}",
                            job_id,
                            preview(&text),
                            e
                        );
                        AudioFile::Failed
                    }
                };
                (slot, audio_file)
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let mut outcomes = vec![AudioFile::Failed; valid.len()];
        for (slot, audio_file) in results {
            outcomes[slot] = audio_file;
        }

        let dialogues = valid
            .iter()
            .zip(outcomes)
            .map(|((_, line), audio_file)| DialogueRecord {
                speaker: line.speaker.clone(),
                text: line.text.clone(),
                audio_file,
            })
            .collect();

        let bundle = ChapterAudioBundle {
            job_id: job_id.to_string(),
            title: chapter_title.to_string(),
            date_added,
            dialogues,
        };

        let manifest_path = output_dir.join(MANIFEST_FILE_NAME);
        let content = serde_json::to_string_pretty(&bundle)?;
        tokio::fs::write(&manifest_path, content)
            .await
            .with_context(|| format!("Failed to write {}", manifest_path.display()))?;

        if bundle.failed_count() > 0 {
            info!(
                "[{}] - '{}': {} line(s) recorded as ERROR",
                job_id,
                chapter_title,
                bundle.failed_count()
            );
        }
        Ok(bundle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;

    #[test]
    fn test_is_valid_dialogue() {
        assert!(is_valid_dialogue("Hello world"));
        assert!(is_valid_dialogue("This is test 1."));
        assert!(is_valid_dialogue("...7"));

        assert!(!is_valid_dialogue(""));
        assert!(!is_valid_dialogue("..."));
        assert!(!is_valid_dialogue(" "));
        assert!(!is_valid_dialogue("   "));
        assert!(!is_valid_dialogue("「……」"));
    }

    #[test]
    fn test_preview_counts_chars() {
        let long = "é".repeat(80);
        assert_eq!(preview(&long).chars().count(), 50);
    }

    struct MockSynth {
        failing: Vec<String>,
        calls: Arc<Mutex<HashMap<String, usize>>>,
        delays: HashMap<String, u64>,
    }

    impl MockSynth {
        fn new(failing: &[&str]) -> Self {
            Self {
                failing: failing.iter().map(|s| s.to_string()).collect(),
                calls: Arc::new(Mutex::new(HashMap::new())),
                delays: HashMap::new(),
            }
        }
    }

    #[async_trait]
    impl SpeechSynthesizer for MockSynth {
        async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
            *self.calls.lock().unwrap().entry(text.to_string()).or_insert(0) += 1;
            if let Some(ms) = self.delays.get(text) {
                tokio::time::sleep(Duration::from_millis(*ms)).await;
            }
            if self.failing.iter().any(|f| f == text) {
                Err(anyhow!("Mock TTS error"))
            } else {
                Ok(text.as_bytes().to_vec())
            }
        }
    }

    fn read_manifest(dir: &Path) -> ChapterAudioBundle {
        let content = std::fs::read_to_string(dir.join(MANIFEST_FILE_NAME)).unwrap();
        serde_json::from_str(&content).unwrap()
    }

    #[tokio::test]
    async fn test_invalid_lines_dropped_and_indices_kept() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let synth = MockSynth::new(&[]);
        let calls = synth.calls.clone();
        let processor = DialogueAudioProcessor::new(Arc::new(synth), RetryPolicy::none(), "mp3");

        let lines = vec![
            DialogueLine::new("Narrator", "..."),
            DialogueLine::new("Subaru", "Hey!"),
            DialogueLine::new("Unknown", "   "),
            DialogueLine::new("Emilia", "Subaru?"),
        ];
        processor.process(&lines, temp_dir.path(), "job-1", "Chapter_1").await?;

        let manifest = read_manifest(temp_dir.path());
        assert_eq!(manifest.job_id, "job-1");
        assert_eq!(manifest.title, "Chapter_1");
        assert_eq!(manifest.dialogues.len(), 2);
        assert_eq!(manifest.dialogues[0].audio_file.file_name(), Some("dialogue_1.mp3"));
        assert_eq!(manifest.dialogues[1].audio_file.file_name(), Some("dialogue_3.mp3"));
        assert_eq!(std::fs::read(temp_dir.path().join("dialogue_3.mp3"))?, b"Subaru?");
        assert!(!temp_dir.path().join("dialogue_0.mp3").exists());
        assert_eq!(calls.lock().unwrap().len(), 2, "invalid lines are never synthesized");
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_line_recorded_as_error_and_processing_continues() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let synth = MockSynth::new(&["First line."]);
        let calls = synth.calls.clone();
        let processor = DialogueAudioProcessor::new(
            Arc::new(synth),
            RetryPolicy::new(3, Duration::ZERO),
            "mp3",
        );

        let lines = vec![
            DialogueLine::new("Narrator", "First line."),
            DialogueLine::new("Subaru", "Second line."),
        ];
        let bundle = processor.process(&lines, temp_dir.path(), "job-2", "Ch").await?;

        assert_eq!(bundle.failed_count(), 1);
        let manifest = read_manifest(temp_dir.path());
        assert_eq!(manifest.dialogues[0].text, "First line.");
        assert!(manifest.dialogues[0].audio_file.is_failed());
        assert_eq!(manifest.dialogues[1].audio_file.file_name(), Some("dialogue_1.mp3"));
        assert_eq!(calls.lock().unwrap()["First line."], 3, "retried before giving up");

        let raw = std::fs::read_to_string(temp_dir.path().join(MANIFEST_FILE_NAME))?;
        assert!(raw.contains("\"audio_file\": \"ERROR\""));
        Ok(())
    }

    #[tokio::test]
    async fn test_concurrent_synthesis_keeps_manifest_order() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let mut synth = MockSynth::new(&[]);
        synth.delays.insert("one".to_string(), 30);
        synth.delays.insert("two".to_string(), 10);
        let processor = DialogueAudioProcessor::new(Arc::new(synth), RetryPolicy::none(), "wav")
            .with_concurrency(3);

        let lines = vec![
            DialogueLine::new("A", "one"),
            DialogueLine::new("B", "two"),
            DialogueLine::new("C", "three"),
        ];
        processor.process(&lines, temp_dir.path(), "job-3", "Ch").await?;

        let manifest = read_manifest(temp_dir.path());
        let texts: Vec<&str> = manifest.dialogues.iter().map(|d| d.text.as_str()).collect();
        assert_eq!(texts, vec!["one", "two", "three"]);
        let files: Vec<Option<&str>> =
            manifest.dialogues.iter().map(|d| d.audio_file.file_name()).collect();
        assert_eq!(
            files,
            vec![Some("dialogue_0.wav"), Some("dialogue_1.wav"), Some("dialogue_2.wav")]
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_empty_chapter_still_writes_manifest() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let processor =
            DialogueAudioProcessor::new(Arc::new(MockSynth::new(&[])), RetryPolicy::none(), "mp3");

        processor.process(&[], temp_dir.path(), "job-4", "Empty").await?;
        assert!(read_manifest(temp_dir.path()).dialogues.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_manifest_write_failure_is_an_error() {
        let temp_dir = tempfile::tempdir().unwrap();
        let missing = temp_dir.path().join("does/not/exist");
        let processor =
            DialogueAudioProcessor::new(Arc::new(MockSynth::new(&[])), RetryPolicy::none(), "mp3");

        let err = processor
            .process(&[DialogueLine::new("A", "Hi")], &missing, "job-5", "Ch")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("metadata.json"));
    }
}
