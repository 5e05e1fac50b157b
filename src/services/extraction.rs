use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use log::info;
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::Path;

use crate::core::state::{ChapterRange, DialogueLine};
use crate::services::llm::{DocumentPart, LlmClient};

/// Document understanding: chapter page ranges and speaker-tagged lines.
#[async_trait]
pub trait DocumentExtractor: Send + Sync {
    async fn extract_chapters(&self, document: &Path) -> Result<Vec<ChapterRange>>;
    async fn extract_dialogue(&self, document: &Path) -> Result<Vec<DialogueLine>>;
}

const CHAPTER_PROMPT: &str = "From the provided novel PDF, list every chapter with the page it \
starts on and the page it ends on (1-indexed, inclusive) as JSON. Skip sections that carry no \
story, such as character pages, lists of other volumes or appendices.";

const DIALOGUE_PROMPT: &str = "From the provided novel PDF, extract every line of text in reading \
order as JSON.\n\
Rules:\n\
1. Read all of the text and work out who owns each line.\n\
2. The speaker is either 'Narrator', 'Unknown', or the character's name.\n\
3. Answer with a JSON array of objects with the keys \"speaker\" and \"dialogue\", for example:\n\
[\n\
  {\"speaker\": \"Narrator\", \"dialogue\": \"Walking around in the middle of a seemingly \
never-ending darkness, at the end of his path.\"},\n\
  {\"speaker\": \"Subaru\", \"dialogue\": \"So that's how, falling down after all sorts of \
things happened, I stumbled into you... Satisfied?\"}\n\
]";

const UNKNOWN_SPEAKER: &str = "Unknown";

fn chapter_schema() -> Value {
    json!({
        "type": "ARRAY",
        "items": {
            "type": "OBJECT",
            "properties": {
                "title": { "type": "STRING" },
                "start_page": { "type": "INTEGER" },
                "end_page": { "type": "INTEGER" }
            },
            "required": ["title", "start_page", "end_page"]
        }
    })
}

fn dialogue_schema() -> Value {
    json!({
        "type": "ARRAY",
        "items": {
            "type": "OBJECT",
            "properties": {
                "speaker": { "type": "STRING" },
                "dialogue": { "type": "STRING" }
            },
            "required": ["speaker", "dialogue"]
        }
    })
}

/// Extractor backed by a multimodal LLM that reads the PDF directly.
pub struct LlmExtractor {
    llm: Box<dyn LlmClient>,
}

impl LlmExtractor {
    pub fn new(llm: Box<dyn LlmClient>) -> Self {
        Self { llm }
    }

    async fn ask(&self, document: &Path, prompt: &str, schema: &Value) -> Result<String> {
        let bytes = tokio::fs::read(document)
            .await
            .with_context(|| format!("Failed to read {}", document.display()))?;
        self.llm
            .generate_json(&DocumentPart::pdf(bytes), prompt, schema)
            .await
    }
}

#[async_trait]
impl DocumentExtractor for LlmExtractor {
    async fn extract_chapters(&self, document: &Path) -> Result<Vec<ChapterRange>> {
        info!("Extracting chapters from {}...", document.display());
        let raw = self.ask(document, CHAPTER_PROMPT, &chapter_schema()).await?;
        parse_chapters(&raw)
    }

    async fn extract_dialogue(&self, document: &Path) -> Result<Vec<DialogueLine>> {
        info!("Extracting dialogue from {}...", document.display());
        let raw = self.ask(document, DIALOGUE_PROMPT, &dialogue_schema()).await?;
        parse_dialogue(&raw)
    }
}

pub fn strip_code_blocks(s: &str) -> String {
    let s = s.trim();
    if s.starts_with("```json") {
        s.trim_start_matches("```json").trim_end_matches("```").trim().to_string()
    } else if s.starts_with("```") {
        s.trim_start_matches("```").trim_end_matches("```").trim().to_string()
    } else {
        s.to_string()
    }
}

#[derive(Deserialize)]
struct RawChapter {
    title: String,
    start_page: i64,
    end_page: i64,
}

#[derive(Deserialize)]
struct RawDialogue {
    #[serde(default)]
    speaker: Option<String>,
    #[serde(default, alias = "text")]
    dialogue: Option<String>,
}

/// Converts the model's answer into chapter ranges. Any malformed entry
/// rejects the whole answer.
pub fn parse_chapters(raw: &str) -> Result<Vec<ChapterRange>> {
    let clean_json = strip_code_blocks(raw);
    let entries: Vec<RawChapter> = serde_json::from_str(&clean_json)
        .context(format!("Failed to parse chapter JSON: {}", clean_json))?;

    entries
        .into_iter()
        .enumerate()
        .map(|(i, entry)| {
            if entry.start_page < 1 {
                return Err(anyhow!(
                    "Chapter #{} '{}' has invalid start_page {}",
                    i, entry.title, entry.start_page
                ));
            }
            if entry.end_page < entry.start_page {
                return Err(anyhow!(
                    "Chapter #{} '{}' ends (page {}) before it starts (page {})",
                    i, entry.title, entry.end_page, entry.start_page
                ));
            }
            let start_page = u32::try_from(entry.start_page)
                .map_err(|_| anyhow!("Chapter #{} start_page out of range", i))?;
            let end_page = u32::try_from(entry.end_page)
                .map_err(|_| anyhow!("Chapter #{} end_page out of range", i))?;
            Ok(ChapterRange {
                title: entry.title,
                start_page,
                end_page,
            })
        })
        .collect()
}

/// Converts the model's answer into dialogue lines, keeping every entry so
/// enumeration indices stay stable. Missing text becomes empty; a missing
/// speaker becomes "Unknown".
pub fn parse_dialogue(raw: &str) -> Result<Vec<DialogueLine>> {
    let clean_json = strip_code_blocks(raw);
    let entries: Vec<RawDialogue> = serde_json::from_str(&clean_json)
        .context(format!("Failed to parse dialogue JSON: {}", clean_json))?;

    Ok(entries
        .into_iter()
        .map(|entry| DialogueLine {
            speaker: entry
                .speaker
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| UNKNOWN_SPEAKER.to_string()),
            text: entry.dialogue.unwrap_or_default(),
        })
        .collect())
}
