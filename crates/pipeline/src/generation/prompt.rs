//! Prompt assembly and fingerprinting

use super::enrichment::Annotation;
use super::lyrics::LyricsDocument;
use serde::Serialize;
use std::fmt::Write as _;
use studyforge_common::config::QuestionBounds;
use studyforge_common::types::Hash256;

const SYSTEM_PROMPT: &str = "You write language-learning study sets from song lyrics. \
Reply with a single JSON object and nothing else.";

/// Exact provider inputs for one generation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

#[derive(Serialize)]
struct Fingerprint<'a> {
    model: &'a str,
    temperature: f32,
    system: &'a str,
    user: &'a str,
}

impl Prompt {
    pub fn build(
        lyrics: &LyricsDocument,
        target_language: &str,
        annotations: &[Annotation],
        bounds: &QuestionBounds,
    ) -> Self {
        let trivia_min = if annotations.is_empty() { 0 } else { bounds.trivia_min };
        let trivia_max = if annotations.is_empty() { 0 } else { bounds.trivia_max };

        let mut user = String::new();
        let _ = writeln!(user, "Target language: {}", target_language);
        if let Some(title) = &lyrics.title {
            let _ = writeln!(user, "Title: {}", title);
        }
        if let Some(artist) = &lyrics.artist {
            let _ = writeln!(user, "Artist: {}", artist);
        }
        if let Some(language) = &lyrics.language {
            let _ = writeln!(user, "Lyrics language: {}", language);
        }

        let _ = writeln!(user, "\nLyrics:");
        for (i, line) in lyrics.lines.iter().enumerate() {
            let _ = writeln!(user, "{}. {}", i + 1, line);
        }

        if !annotations.is_empty() {
            let _ = writeln!(user, "\nAnnotations:");
            for (i, a) in annotations.iter().enumerate() {
                let _ = writeln!(user, "[{}] \"{}\": {}", i + 1, a.fragment, a.body);
            }
        }

        let _ = write!(
            user,
            "\nWrite between {}-{} recall questions, {}-{} translation questions into {} \
and {}-{} trivia questions drawn only from the annotations, at most {} in total. \
Every question has {}-{} distinct options and exactly one correct answer.\n\
Respond as {{\"questions\":[{{\"type\":\"recall|translation|trivia\",\"prompt\":\"...\",\
\"options\":[\"...\"],\"correctIndex\":0,\"explanation\":\"...\"}}]}}",
            bounds.recall_min,
            bounds.recall_max,
            bounds.translation_min,
            bounds.translation_max,
            target_language,
            trivia_min,
            trivia_max,
            bounds.max_total,
            bounds.min_options,
            bounds.max_options,
        );

        Self {
            system: SYSTEM_PROMPT.to_string(),
            user,
        }
    }

    /// Deterministic digest of everything sent to the provider
    pub fn fingerprint(&self, model: &str, temperature: f32) -> Hash256 {
        let canonical = Fingerprint {
            model,
            temperature,
            system: &self.system,
            user: &self.user,
        };
        // Serializing plain strings and an f32 cannot fail
        let bytes = serde_json::to_vec(&canonical).unwrap_or_default();
        Hash256::digest(&bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lyrics() -> LyricsDocument {
        LyricsDocument::parse(br#"{"title":"Cancion","artist":"Ana","lines":["uno","dos"]}"#).unwrap()
    }

    #[test]
    fn test_fingerprint_is_deterministic() {
        let bounds = QuestionBounds::default();
        let a = Prompt::build(&lyrics(), "en", &[], &bounds);
        let b = Prompt::build(&lyrics(), "en", &[], &bounds);
        assert_eq!(a.fingerprint("m", 0.4), b.fingerprint("m", 0.4));
    }

    #[test]
    fn test_fingerprint_tracks_every_input() {
        let bounds = QuestionBounds::default();
        let base = Prompt::build(&lyrics(), "en", &[], &bounds);
        let other_lang = Prompt::build(&lyrics(), "fr", &[], &bounds);
        let annotated = Prompt::build(
            &lyrics(),
            "en",
            &[Annotation {
                fragment: "uno".into(),
                body: "counting".into(),
            }],
            &bounds,
        );

        let h = base.fingerprint("m", 0.4);
        assert_ne!(h, other_lang.fingerprint("m", 0.4));
        assert_ne!(h, annotated.fingerprint("m", 0.4));
        assert_ne!(h, base.fingerprint("other", 0.4));
        assert_ne!(h, base.fingerprint("m", 0.5));
    }

    #[test]
    fn test_trivia_disabled_without_annotations() {
        let prompt = Prompt::build(&lyrics(), "en", &[], &QuestionBounds::default());
        assert!(prompt.user.contains("0-0 trivia"));
        assert!(!prompt.user.contains("Annotations:"));
        assert!(prompt.user.contains("1. uno"));
    }
}
