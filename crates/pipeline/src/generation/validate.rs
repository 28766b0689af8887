//! Structural validation of provider output
//!
//! Output that does not fit the schema is rejected with every issue listed.
//! Nothing is truncated or repaired.

use super::pack::{Question, QuestionKind, StudySetPack};
use regex_lite::Regex;
use serde::Deserialize;
use serde_json::Value;
use std::sync::LazyLock;
use studyforge_common::config::QuestionBounds;
use studyforge_common::errors::{AppError, Result};
use studyforge_common::types::UnitKey;
use validator::{ValidateArgs, ValidationErrors};

static CODE_FENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)^\s*```[A-Za-z0-9_-]*[ \t]*\r?\n(.*?)\r?\n?```\s*$").expect("code fence regex is valid")
});

/// Top-level shape; items are decoded one by one so each gets its own issues
#[derive(Debug, Deserialize)]
struct RawOutput {
    questions: Vec<Value>,
}

/// Remove a surrounding Markdown code fence, if present
pub fn strip_code_fence(raw: &str) -> &str {
    match CODE_FENCE.captures(raw).and_then(|c| c.get(1)) {
        Some(body) => body.as_str(),
        None => raw.trim(),
    }
}

fn push_field_issues(at: &str, errors: &ValidationErrors, issues: &mut Vec<String>) {
    let mut found: Vec<String> = errors
        .field_errors()
        .into_iter()
        .flat_map(|(field, errs)| errs.iter().map(move |e| format!("{}.{}: {}", at, field, e)))
        .collect();
    found.sort();
    issues.extend(found);
}

fn check_question(index: usize, value: Value, bounds: &QuestionBounds, issues: &mut Vec<String>) -> Option<Question> {
    let at = format!("questions[{}]", index);
    let question: Question = match serde_json::from_value(value) {
        Ok(question) => question,
        Err(e) => {
            issues.push(format!("{}: {}", at, e));
            return None;
        }
    };
    let before = issues.len();

    if let Err(errors) = question.validate_with_args(bounds) {
        push_field_issues(&at, &errors, issues);
    }
    if question.correct_index >= question.options.len() {
        issues.push(format!("{}.correctIndex: {} out of range", at, question.correct_index));
    }

    (issues.len() == before).then_some(question)
}

fn check_count(kind: QuestionKind, count: usize, min: usize, max: usize, issues: &mut Vec<String>) {
    if count < min || count > max {
        issues.push(format!(
            "{} questions: got {}, expected {}-{}",
            kind.as_str(),
            count,
            min,
            max
        ));
    }
}

/// Parse and validate raw provider output into a pack for `key`
pub fn validate_output(
    raw: &str,
    key: &UnitKey,
    title: Option<String>,
    artist: Option<String>,
    annotations_available: bool,
    bounds: &QuestionBounds,
) -> Result<StudySetPack> {
    let reject = |issues: Vec<String>| AppError::OutputValidation {
        issues,
        raw_output: raw.to_string(),
    };

    let output: RawOutput = match serde_json::from_str(strip_code_fence(raw)) {
        Ok(output) => output,
        Err(e) if e.is_data() => return Err(reject(vec![format!("questions: {}", e)])),
        Err(e) => return Err(reject(vec![format!("output is not valid JSON: {}", e)])),
    };

    let mut issues = Vec::new();
    let questions: Vec<Question> = output
        .questions
        .into_iter()
        .enumerate()
        .filter_map(|(i, item)| check_question(i, item, bounds, &mut issues))
        .collect();

    if issues.is_empty() {
        let count = |kind| questions.iter().filter(|q| q.kind == kind).count();
        let trivia_min = if annotations_available { bounds.trivia_min } else { 0 };

        check_count(QuestionKind::Recall, count(QuestionKind::Recall), bounds.recall_min, bounds.recall_max, &mut issues);
        check_count(
            QuestionKind::Translation,
            count(QuestionKind::Translation),
            bounds.translation_min,
            bounds.translation_max,
            &mut issues,
        );
        check_count(QuestionKind::Trivia, count(QuestionKind::Trivia), trivia_min, bounds.trivia_max, &mut issues);

        if questions.len() > bounds.max_total {
            issues.push(format!(
                "questions: got {} in total, at most {} allowed",
                questions.len(),
                bounds.max_total
            ));
        }
    }

    if !issues.is_empty() {
        return Err(reject(issues));
    }
    Ok(StudySetPack::new(key, title, artist, questions))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::provider::canned_questions;
    use serde_json::json;
    use studyforge_common::types::Hash256;

    fn key() -> UnitKey {
        UnitKey::new(Hash256::digest(b"song"), "en", 1).unwrap()
    }

    fn validate(raw: &str, annotated: bool) -> Result<StudySetPack> {
        validate_output(raw, &key(), None, None, annotated, &QuestionBounds::default())
    }

    fn issues_of(err: AppError) -> Vec<String> {
        match err {
            AppError::OutputValidation { issues, .. } => issues,
            other => panic!("unexpected error: {other:?}"),
        }
    }

    fn question(kind: &str, n: usize) -> Vec<Value> {
        (0..n)
            .map(|i| json!({ "type": kind, "prompt": format!("q{}", i), "options": ["a", "b"], "correctIndex": 1 }))
            .collect()
    }

    #[test]
    fn test_canned_output_is_valid() {
        let pack = validate(&canned_questions(), true).unwrap();
        assert_eq!(pack.count(QuestionKind::Recall), 4);
        assert_eq!(pack.count(QuestionKind::Trivia), 2);
        assert_eq!(pack.unit_id, *key().unit_id());
    }

    #[test]
    fn test_strips_code_fence() {
        let fenced = format!("```json\n{}\n```", canned_questions());
        assert!(validate(&fenced, false).is_ok());
        assert_eq!(strip_code_fence("  {\"a\":1} "), "{\"a\":1}");
    }

    #[test]
    fn test_not_json_keeps_raw_output() {
        let err = validate("Sure! Here are your questions", false).unwrap_err();
        match err {
            AppError::OutputValidation { issues, raw_output } => {
                assert_eq!(issues.len(), 1);
                assert_eq!(raw_output, "Sure! Here are your questions");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_category_bounds() {
        let mut questions = question("recall", 3);
        questions.extend(question("translation", 4));
        let raw = json!({ "questions": questions }).to_string();

        let issues = issues_of(validate(&raw, false).unwrap_err());
        assert_eq!(issues, vec!["recall questions: got 3, expected 4-12".to_string()]);
    }

    #[test]
    fn test_trivia_required_only_with_annotations() {
        let mut questions = question("recall", 4);
        questions.extend(question("translation", 4));
        let raw = json!({ "questions": questions }).to_string();

        assert!(validate(&raw, false).is_ok());
        let issues = issues_of(validate(&raw, true).unwrap_err());
        assert!(issues[0].starts_with("trivia questions: got 0"));
    }

    #[test]
    fn test_question_level_issues_are_all_reported() {
        let raw = json!({ "questions": [
            { "type": "essay", "prompt": "x", "options": ["a", "b"], "correctIndex": 0 },
            { "type": "recall", "prompt": " ", "options": ["a", "A "], "correctIndex": 5 },
        ]})
        .to_string();

        let issues = issues_of(validate(&raw, false).unwrap_err());
        assert!(issues.iter().any(|i| i.starts_with("questions[0]: unknown variant `essay`")));
        assert!(issues.iter().any(|i| i == "questions[1].prompt: missing or empty"));
        assert!(issues.iter().any(|i| i == "questions[1].options: duplicate options"));
        assert!(issues.iter().any(|i| i == "questions[1].correctIndex: 5 out of range"));
        assert_eq!(issues.len(), 4);
    }

    #[test]
    fn test_option_count_follows_bounds() {
        let raw = json!({ "questions": [
            { "type": "recall", "prompt": "x", "options": ["only"], "correctIndex": 0 },
        ]})
        .to_string();

        let issues = issues_of(validate(&raw, false).unwrap_err());
        assert_eq!(issues, vec!["questions[0].options: 1 options, expected 2-6".to_string()]);
    }

    #[test]
    fn test_missing_questions_array() {
        let issues = issues_of(validate("{\"items\":[]}", false).unwrap_err());
        assert_eq!(issues.len(), 1);
        assert!(issues[0].starts_with("questions: missing field `questions`"));
    }

    #[test]
    fn test_total_cap_is_not_truncated() {
        let mut questions = question("recall", 12);
        questions.extend(question("translation", 12));
        questions.extend(question("trivia", 8));
        let raw = json!({ "questions": questions }).to_string();

        let issues = issues_of(validate(&raw, true).unwrap_err());
        assert_eq!(issues, vec!["questions: got 32 in total, at most 30 allowed".to_string()]);
    }
}
