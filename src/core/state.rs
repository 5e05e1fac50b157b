use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Ledger status of a job. Moves PENDING -> PROCESSING -> COMPLETE | FAILED
/// within one execution.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum JobStatus {
    Pending,
    Processing,
    Complete,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Processing => "PROCESSING",
            JobStatus::Complete => "COMPLETE",
            JobStatus::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Complete | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Job {
    pub id: String,
    pub status: JobStatus,
    pub error_message: Option<String>,
}

/// 1-indexed, inclusive page bounds of one chapter in the source document.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ChapterRange {
    pub title: String,
    pub start_page: u32,
    pub end_page: u32,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct DialogueLine {
    pub speaker: String,
    pub text: String,
}

impl DialogueLine {
    pub fn new(speaker: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            speaker: speaker.into(),
            text: text.into(),
        }
    }
}

/// Manifest marker for a line whose synthesis was attempted and failed.
pub const AUDIO_ERROR_SENTINEL: &str = "ERROR";

/// Outcome of synthesizing one line. Serialized as the bare file name, or
/// as the `"ERROR"` sentinel.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(from = "String", into = "String")]
pub enum AudioFile {
    Generated(String),
    Failed,
}

impl AudioFile {
    pub fn is_failed(&self) -> bool {
        matches!(self, AudioFile::Failed)
    }

    pub fn file_name(&self) -> Option<&str> {
        match self {
            AudioFile::Generated(name) => Some(name),
            AudioFile::Failed => None,
        }
    }
}

impl From<String> for AudioFile {
    fn from(value: String) -> Self {
        if value == AUDIO_ERROR_SENTINEL {
            AudioFile::Failed
        } else {
            AudioFile::Generated(value)
        }
    }
}

impl From<AudioFile> for String {
    fn from(value: AudioFile) -> Self {
        match value {
            AudioFile::Generated(name) => name,
            AudioFile::Failed => AUDIO_ERROR_SENTINEL.to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct DialogueRecord {
    pub speaker: String,
    pub text: String,
    pub audio_file: AudioFile,
}

/// Per-chapter manifest, written as `metadata.json` next to the audio.
///
/// `dialogues` keeps extraction order; it is the only link between an entry
/// and its `dialogue_<index>` file.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ChapterAudioBundle {
    pub job_id: String,
    pub title: String,
    pub date_added: DateTime<Utc>,
    pub dialogues: Vec<DialogueRecord>,
}

impl ChapterAudioBundle {
    pub fn failed_count(&self) -> usize {
        self.dialogues
            .iter()
            .filter(|d| d.audio_file.is_failed())
            .count()
    }
}
