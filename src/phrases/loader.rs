use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use tracing::info;

use super::{PhraseBank, PhraseRule};

#[derive(Debug, Deserialize)]
struct PhraseFile {
    #[serde(default)]
    rules: Vec<PhraseRule>,
    #[serde(default)]
    general: Vec<String>,
}

/// Load a phrase bank from a TOML file.
///
/// ```toml
/// general = ["Fallback reply", "Another one, {name}"]
///
/// [[rules]]
/// keywords = ["hello", "hi"]
/// replies = ["Hi {name}!"]
/// ```
pub async fn load_phrase_file(path: &Path) -> Result<PhraseBank> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read phrase file: {}", path.display()))?;
    let bank = parse_phrase_file(&content)
        .with_context(|| format!("Failed to parse phrase file: {}", path.display()))?;
    info!("Loaded phrases from {}", path.display());
    Ok(bank)
}

fn parse_phrase_file(content: &str) -> Result<PhraseBank> {
    let file: PhraseFile = toml::from_str(content)?;
    if file.general.is_empty() && file.rules.iter().all(|r| r.replies.is_empty()) {
        anyhow::bail!("phrase file contains no replies");
    }
    Ok(PhraseBank::new(file.rules, file.general))
}

/// Use the configured phrase file if there is one, otherwise the built-in bank.
pub async fn load_or_builtin(path: Option<&Path>) -> Result<PhraseBank> {
    match path {
        Some(path) => load_phrase_file(path).await,
        None => Ok(PhraseBank::builtin()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phrases::ResponseSource;

    #[test]
    fn test_parse_rules_and_general() {
        let bank = parse_phrase_file(
            r#"
            general = ["meh"]

            [[rules]]
            keywords = ["ping"]
            replies = ["pong, {name}"]
            "#,
        )
        .unwrap();
        assert_eq!(bank.get_response("ping", "Bob").unwrap(), "pong, Bob");
        assert_eq!(bank.get_response("other", "Bob").unwrap(), "meh");
    }

    #[test]
    fn test_rejects_file_without_replies() {
        assert!(parse_phrase_file("general = []").is_err());
    }

    #[tokio::test]
    async fn test_load_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("phrases.toml");
        tokio::fs::write(&path, "general = [\"ok\"]").await.unwrap();

        let bank = load_or_builtin(Some(&path)).await.unwrap();
        assert_eq!(bank.get_response("anything", "Ann").unwrap(), "ok");
    }

    #[tokio::test]
    async fn test_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_phrase_file(&dir.path().join("nope.toml")).await.is_err());
    }
}
