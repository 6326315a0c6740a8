use crate::ai::AiError;
use crate::tokens::{RequestToken, TokenSlot};
use serde::{Deserialize, Serialize};

pub const POPULAR_TOPICS: &[&str] = &[
    "Past Tense",
    "Definite Articles",
    "Personal Pronouns",
    "Verb Conjugation",
    "Subjunctive Mood",
    "Prepositions",
    "Sentence Structure",
];

pub const EMPTY_EXPLANATION: &str = "Sorry, I couldn't generate an explanation at this time.";
pub const FAILED_EXPLANATION: &str = "An error occurred while fetching the grammar explanation.";

#[derive(Clone, Debug, Default)]
pub struct GrammarGuide {
    query: String,
    markdown: String,
    loading: bool,
    lookups: TokenSlot,
}

impl GrammarGuide {
    pub fn markdown(&self) -> &str {
        &self.markdown
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn begin_lookup(&mut self, topic: &str) -> Option<(RequestToken, String)> {
        let topic = topic.trim();
        if topic.is_empty() {
            return None;
        }
        self.query = topic.to_string();
        self.markdown.clear();
        self.loading = true;
        Some((self.lookups.issue(), self.query.clone()))
    }

    pub fn complete_lookup(&mut self, token: RequestToken, result: Result<String, AiError>) -> bool {
        if !self.lookups.is_latest(token) {
            return false;
        }
        self.lookups.invalidate();
        self.loading = false;
        self.markdown = match result {
            Ok(text) if text.trim().is_empty() => EMPTY_EXPLANATION.to_string(),
            Ok(text) => text,
            Err(e) => {
                log::error!("Grammar explanation failed: {e}");
                FAILED_EXPLANATION.to_string()
            }
        };
        true
    }

    pub fn reset(&mut self) {
        let mut lookups = std::mem::take(&mut self.lookups);
        lookups.invalidate();
        *self = Self {
            lookups,
            ..Self::default()
        };
    }

    pub fn view(&self) -> GrammarView {
        GrammarView {
            query: self.query.clone(),
            markdown: self.markdown.clone(),
            loading: self.loading,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, tsify::Tsify)]
#[tsify(into_wasm_abi, from_wasm_abi)]
pub struct GrammarView {
    pub query: String,
    pub markdown: String,
    pub loading: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explanation_replaces_previous_content() {
        let mut guide = GrammarGuide::default();
        let (token, topic) = guide.begin_lookup(" Past Tense ").unwrap();
        assert_eq!(topic, "Past Tense");
        assert!(guide.is_loading());
        assert!(guide.complete_lookup(token, Ok("## Past tense".to_string())));
        assert_eq!(guide.markdown(), "## Past tense");
        assert!(!guide.is_loading());
    }

    #[test]
    fn empty_text_and_failures_use_fixed_fallbacks() {
        let mut guide = GrammarGuide::default();
        let (token, _) = guide.begin_lookup("Prepositions").unwrap();
        guide.complete_lookup(token, Ok("  ".to_string()));
        assert_eq!(guide.markdown(), EMPTY_EXPLANATION);

        let (token, _) = guide.begin_lookup("Prepositions").unwrap();
        guide.complete_lookup(token, Err(AiError::Status("502".to_string())));
        assert_eq!(guide.markdown(), FAILED_EXPLANATION);
    }

    #[test]
    fn blank_topics_are_ignored() {
        let mut guide = GrammarGuide::default();
        assert!(guide.begin_lookup("").is_none());
        assert!(!guide.is_loading());
    }

    #[test]
    fn only_the_latest_lookup_lands() {
        let mut guide = GrammarGuide::default();
        let (old, _) = guide.begin_lookup("Past Tense").unwrap();
        let (new, _) = guide.begin_lookup("Subjunctive Mood").unwrap();
        assert!(!guide.complete_lookup(old, Ok("old".to_string())));
        assert!(guide.is_loading());
        assert!(guide.complete_lookup(new, Ok("new".to_string())));
        assert_eq!(guide.view().query, "Subjunctive Mood");
        assert_eq!(guide.markdown(), "new");
    }
}
