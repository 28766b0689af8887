//! Canonical lyrics document parsing
//!
//! Runs on bytes that already passed hash verification. Accepts a JSON
//! document or plain UTF-8 text with one lyric line per line.

use serde::Deserialize;
use studyforge_common::errors::{AppError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LyricsDocument {
    pub title: Option<String>,
    pub artist: Option<String>,
    /// Language of the original lyrics, when the document states it
    pub language: Option<String>,
    pub lines: Vec<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawLine {
    Text(String),
    Object { text: String },
}

#[derive(Deserialize)]
struct RawDocument {
    title: Option<String>,
    artist: Option<String>,
    language: Option<String>,
    lines: Option<Vec<RawLine>>,
    lyrics: Option<String>,
}

fn clean(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn split_lines(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

impl LyricsDocument {
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(bytes).map_err(|e| AppError::InputUnreadable {
            message: format!("lyrics are not valid UTF-8: {}", e),
        })?;
        let text = text.trim_start_matches('\u{feff}');

        let doc = if text.trim_start().starts_with('{') {
            match serde_json::from_str::<RawDocument>(text) {
                Ok(raw) => Self::from_raw(raw),
                Err(_) => Self::plain(text),
            }
        } else {
            Self::plain(text)
        };

        if doc.lines.is_empty() {
            return Err(AppError::InputUnreadable {
                message: "document contains no lyric lines".into(),
            });
        }
        Ok(doc)
    }

    fn plain(text: &str) -> Self {
        Self {
            title: None,
            artist: None,
            language: None,
            lines: split_lines(text),
        }
    }

    fn from_raw(raw: RawDocument) -> Self {
        let lines = match (raw.lines, raw.lyrics) {
            (Some(lines), _) => lines
                .into_iter()
                .map(|l| match l {
                    RawLine::Text(t) => t,
                    RawLine::Object { text } => text,
                })
                .flat_map(|l| split_lines(&l))
                .collect(),
            (None, Some(lyrics)) => split_lines(&lyrics),
            (None, None) => Vec::new(),
        };

        Self {
            title: clean(raw.title),
            artist: clean(raw.artist),
            language: clean(raw.language),
            lines,
        }
    }

    /// Lyrics joined back into a single block
    pub fn text(&self) -> String {
        self.lines.join("\n")
    }
}
