pub mod loader;

use std::sync::Mutex;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::Deserialize;
use tracing::{debug, info};

use crate::error::{BotError, Result};

/// Produces a reply for an incoming message.
///
/// Implementations must return promptly; the caller treats any error as
/// "no reply available" and substitutes its own fallback.
pub trait ResponseSource: Send + Sync {
    fn get_response(&self, user_message: &str, user_name: &str) -> Result<String>;
}

/// A keyword rule: if any keyword occurs in the message, pick from `replies`.
#[derive(Debug, Clone, Deserialize)]
pub struct PhraseRule {
    pub keywords: Vec<String>,
    pub replies: Vec<String>,
}

/// Canned phrase bank with keyword matching and random selection.
pub struct PhraseBank {
    rules: Vec<PhraseRule>,
    general: Vec<String>,
    rng: Mutex<StdRng>,
}

impl PhraseBank {
    pub fn new(rules: Vec<PhraseRule>, general: Vec<String>) -> Self {
        Self::with_rng(rules, general, StdRng::from_entropy())
    }

    pub fn with_rng(rules: Vec<PhraseRule>, general: Vec<String>, rng: StdRng) -> Self {
        // Keywords are matched against the lowercased message.
        let rules = rules
            .into_iter()
            .map(|rule| PhraseRule {
                keywords: rule.keywords.iter().map(|k| k.to_lowercase()).collect(),
                replies: rule.replies,
            })
            .collect::<Vec<_>>();
        info!(
            "Phrase bank ready: {} rules, {} general phrases",
            rules.len(),
            general.len()
        );
        Self {
            rules,
            general,
            rng: Mutex::new(rng),
        }
    }

    /// The phrase bank shipped with the binary.
    pub fn builtin() -> Self {
        let rule = |keywords: &[&str], replies: &[&str]| PhraseRule {
            keywords: keywords.iter().map(|s| s.to_string()).collect(),
            replies: replies.iter().map(|s| s.to_string()).collect(),
        };
        let rules = vec![
            rule(
                &["привет", "здравств", "добрый"],
                &[
                    "Привет, {name}! Только с тренировки.",
                    "Здорово, {name}. Коротко, у меня совещание через пять минут.",
                ],
            ),
            rule(
                &["хоккей", "матч", "игра", "клуб"],
                &[
                    "Хоккей — это характер. Без характера не будет результата.",
                    "Смотрел вчерашнюю игру? Ребята выложились полностью.",
                ],
            ),
            rule(
                &["как дела", "как ты"],
                &[
                    "Работаем, {name}. Всё по плану.",
                    "Нормально. Главное, что команда в порядке.",
                ],
            ),
            rule(
                &["спасибо", "благодар"],
                &["Всегда пожалуйста, {name}.", "Обращайся."],
            ),
        ];
        let general = [
            "Интересный вопрос. Давай обсудим при встрече.",
            "Сейчас на льду, отвечу позже.",
            "{name}, главное в любом деле — дисциплина.",
            "Согласен. Двигаемся дальше.",
            "Надо подумать. Напиши подробнее.",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        Self::new(rules, general)
    }

    fn candidates(&self, user_message: &str) -> &[String] {
        let lowered = user_message.to_lowercase();
        self.rules
            .iter()
            .find(|rule| {
                !rule.replies.is_empty() && rule.keywords.iter().any(|k| lowered.contains(k))
            })
            .map(|rule| rule.replies.as_slice())
            .unwrap_or(&self.general)
    }
}

impl ResponseSource for PhraseBank {
    fn get_response(&self, user_message: &str, user_name: &str) -> Result<String> {
        let pool = self.candidates(user_message);
        let phrase = {
            let mut rng = self
                .rng
                .lock()
                .map_err(|_| BotError::ResponseGeneration("phrase rng poisoned".into()))?;
            pool.choose(&mut *rng).cloned()
        }
        .ok_or_else(|| BotError::ResponseGeneration("phrase bank is empty".into()))?;

        debug!("Selected phrase from a pool of {}", pool.len());
        Ok(phrase.replace("{name}", user_name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bank(rules: Vec<PhraseRule>, general: &[&str]) -> PhraseBank {
        PhraseBank::with_rng(
            rules,
            general.iter().map(|s| s.to_string()).collect(),
            StdRng::seed_from_u64(7),
        )
    }

    #[test]
    fn test_keyword_match_is_case_insensitive() {
        let bank = bank(
            vec![PhraseRule {
                keywords: vec!["Hockey".into()],
                replies: vec!["puck!".into()],
            }],
            &["general"],
        );
        assert_eq!(bank.get_response("I love HOCKEY", "Ann").unwrap(), "puck!");
    }

    #[test]
    fn test_falls_back_to_general_pool() {
        let bank = bank(
            vec![PhraseRule {
                keywords: vec!["hockey".into()],
                replies: vec!["puck!".into()],
            }],
            &["general"],
        );
        assert_eq!(bank.get_response("weather?", "Ann").unwrap(), "general");
    }

    #[test]
    fn test_name_is_substituted() {
        let bank = bank(Vec::new(), &["hi {name}"]);
        assert_eq!(bank.get_response("x", "Ann").unwrap(), "hi Ann");
    }

    #[test]
    fn test_empty_bank_is_an_error() {
        let bank = bank(Vec::new(), &[]);
        assert!(matches!(
            bank.get_response("x", "Ann"),
            Err(BotError::ResponseGeneration(_))
        ));
    }

    #[test]
    fn test_builtin_bank_always_answers() {
        let bank = PhraseBank::builtin();
        for text in ["Привет!", "что думаешь про матч?", "random words", ""] {
            let reply = bank.get_response(text, "Иван").unwrap();
            assert!(!reply.is_empty());
            assert!(!reply.contains("{name}"));
        }
    }
}
