use crate::ai::AiError;
use crate::tokens::{RequestToken, TokenSlot};
use language_utils::{Flashcard, VOCAB_BATCH_SIZE};
use serde::{Deserialize, Serialize};

pub const QUICK_TOPICS: &[&str] = &["Travel", "Restaurant", "Business", "Hobbies", "Weather"];

#[derive(Clone, Debug, Default)]
pub struct FlashcardDeck {
    topic: String,
    cards: Vec<Flashcard>,
    cursor: usize,
    flipped: bool,
    loading: bool,
    loads: TokenSlot,
    speaking: Option<RequestToken>,
    speech: TokenSlot,
}

impl FlashcardDeck {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cards(&self) -> &[Flashcard] {
        &self.cards
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn is_flipped(&self) -> bool {
        self.flipped
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn is_speaking(&self) -> bool {
        self.speaking.is_some()
    }

    pub fn current(&self) -> Option<&Flashcard> {
        self.cards.get(self.cursor)
    }

    /// Starts generating a deck for `topic`. Blank topics are ignored.
    pub fn begin_load(&mut self, topic: &str) -> Option<(RequestToken, String)> {
        let topic = topic.trim();
        if topic.is_empty() {
            return None;
        }
        self.topic = topic.to_string();
        self.loading = true;
        self.cursor = 0;
        self.flipped = false;
        Some((self.loads.issue(), self.topic.clone()))
    }

    /// Replaces the deck. Returns how many words were learned, if any.
    pub fn complete_load(
        &mut self,
        token: RequestToken,
        cards: Result<Vec<Flashcard>, AiError>,
    ) -> Option<usize> {
        if !self.loads.is_latest(token) {
            log::debug!("Discarding stale deck for an older topic");
            return None;
        }
        self.loads.invalidate();
        self.loading = false;
        self.cursor = 0;
        self.flipped = false;

        let mut cards = cards.unwrap_or_else(|e| {
            log::error!("Vocabulary generation failed: {e}");
            Vec::new()
        });
        cards.truncate(VOCAB_BATCH_SIZE);
        self.cards = cards;

        (!self.cards.is_empty()).then_some(self.cards.len())
    }

    pub fn next(&mut self) -> bool {
        if self.cursor + 1 >= self.cards.len() {
            return false;
        }
        self.cursor += 1;
        self.flipped = false;
        true
    }

    pub fn previous(&mut self) -> bool {
        if self.cursor == 0 {
            return false;
        }
        self.cursor -= 1;
        self.flipped = false;
        true
    }

    pub fn flip(&mut self) {
        if self.current().is_some() {
            self.flipped = !self.flipped;
        }
    }

    /// Claims the speech slot for the current word. Rejected while another
    /// clip is still being fetched.
    pub fn begin_speak(&mut self) -> Option<(RequestToken, String)> {
        if self.speaking.is_some() {
            return None;
        }
        let word = self.current()?.word.clone();
        let token = self.speech.issue();
        self.speaking = Some(token);
        Some((token, word))
    }

    pub fn finish_speak(&mut self, token: RequestToken) {
        if self.speaking == Some(token) {
            self.speaking = None;
        }
    }

    pub fn reset(&mut self) {
        let mut loads = std::mem::take(&mut self.loads);
        let mut speech = std::mem::take(&mut self.speech);
        loads.invalidate();
        speech.invalidate();
        *self = Self {
            loads,
            speech,
            ..Self::default()
        };
    }

    pub fn view(&self) -> DeckView {
        DeckView {
            topic: self.topic.clone(),
            card: self.current().cloned(),
            position: self.cursor,
            len: self.cards.len(),
            flipped: self.flipped,
            loading: self.loading,
            speaking: self.is_speaking(),
            has_previous: self.cursor > 0,
            has_next: self.cursor + 1 < self.cards.len(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, tsify::Tsify)]
#[tsify(into_wasm_abi, from_wasm_abi)]
pub struct DeckView {
    pub topic: String,
    pub card: Option<Flashcard>,
    pub position: usize,
    pub len: usize,
    pub flipped: bool,
    pub loading: bool,
    pub speaking: bool,
    pub has_previous: bool,
    pub has_next: bool,
}
