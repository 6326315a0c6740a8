pub mod profile;

use std::fmt;

/// Number of flashcards requested per vocabulary generation.
pub const VOCAB_BATCH_SIZE: usize = 10;
/// Number of questions requested per quiz game.
pub const QUIZ_BATCH_SIZE: usize = 5;
pub const OPTIONS_PER_QUESTION: usize = 4;
/// Marker that stands in for the missing word of a quiz sentence.
pub const BLANK: &str = "___";

/// Synthesized speech is packed 16-bit little-endian PCM, one channel, at this rate.
pub const TTS_SAMPLE_RATE: u32 = 24_000;
pub const TTS_CHANNELS: u16 = 1;

#[derive(
    Copy,
    Clone,
    Debug,
    serde::Serialize,
    serde::Deserialize,
    PartialEq,
    Eq,
    Ord,
    PartialOrd,
    Hash,
    tsify::Tsify,
    schemars::JsonSchema,
)]
#[tsify(into_wasm_abi, from_wasm_abi)]
pub enum Language {
    Spanish,
    French,
    German,
    Italian,
    Japanese,
    #[serde(rename = "Mandarin Chinese")]
    Mandarin,
    English,
    Khmer,
}

pub const LANGUAGES: &[Language] = &[
    Language::Spanish,
    Language::French,
    Language::German,
    Language::Italian,
    Language::Japanese,
    Language::Mandarin,
    Language::English,
    Language::Khmer,
];

impl Language {
    pub fn name(&self) -> &'static str {
        match self {
            Language::Spanish => "Spanish",
            Language::French => "French",
            Language::German => "German",
            Language::Italian => "Italian",
            Language::Japanese => "Japanese",
            Language::Mandarin => "Mandarin Chinese",
            Language::English => "English",
            Language::Khmer => "Khmer",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[derive(
    Copy,
    Clone,
    Debug,
    Default,
    serde::Serialize,
    serde::Deserialize,
    PartialEq,
    Eq,
    Ord,
    PartialOrd,
    Hash,
    tsify::Tsify,
    schemars::JsonSchema,
)]
#[tsify(into_wasm_abi, from_wasm_abi)]
pub enum Proficiency {
    #[default]
    Beginner,
    Intermediate,
    Advanced,
}

impl fmt::Display for Proficiency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Proficiency::Beginner => write!(f, "Beginner"),
            Proficiency::Intermediate => write!(f, "Intermediate"),
            Proficiency::Advanced => write!(f, "Advanced"),
        }
    }
}

/// What the learner studies, from what, and at which level.
#[derive(
    Copy,
    Clone,
    Debug,
    serde::Serialize,
    serde::Deserialize,
    PartialEq,
    Eq,
    tsify::Tsify,
    schemars::JsonSchema,
)]
#[tsify(into_wasm_abi, from_wasm_abi)]
pub struct LearnerSettings {
    pub target_language: Language,
    pub native_language: Language,
    pub proficiency: Proficiency,
}

impl Default for LearnerSettings {
    fn default() -> Self {
        Self {
            target_language: Language::English,
            native_language: Language::Khmer,
            proficiency: Proficiency::Beginner,
        }
    }
}

#[derive(
    Clone,
    Debug,
    serde::Serialize,
    serde::Deserialize,
    PartialEq,
    Eq,
    tsify::Tsify,
    schemars::JsonSchema,
)]
#[tsify(into_wasm_abi, from_wasm_abi)]
pub struct Flashcard {
    /// The word in the target language
    pub word: String,
    /// The translation in the native language
    pub translation: String,
    /// A simple example sentence in the target language using the word
    pub example: String,
}

#[derive(
    Clone,
    Debug,
    serde::Serialize,
    serde::Deserialize,
    PartialEq,
    Eq,
    tsify::Tsify,
    schemars::JsonSchema,
)]
#[tsify(into_wasm_abi, from_wasm_abi)]
pub struct GameQuestion {
    /// A sentence in the target language with one word replaced by "___"
    pub sentence: String,
    /// The word that fills the blank
    pub correct_word: String,
    /// Four options, exactly one of which is the correct word
    pub options: Vec<String>,
    /// A full translation of the sentence into the native language
    pub translation: String,
    /// A short explanation, in the native language, of why the word is correct
    pub explanation: String,
}

impl GameQuestion {
    /// A question is playable when it offers the expected number of options
    /// and exactly one of them is the correct word.
    pub fn is_well_formed(&self) -> bool {
        self.options.len() == OPTIONS_PER_QUESTION
            && self
                .options
                .iter()
                .filter(|option| **option == self.correct_word)
                .count()
                == 1
    }

    pub fn is_correct(&self, option: &str) -> bool {
        self.correct_word == option
    }
}

#[derive(
    Copy,
    Clone,
    Debug,
    serde::Serialize,
    serde::Deserialize,
    PartialEq,
    Eq,
    tsify::Tsify,
    schemars::JsonSchema,
)]
#[tsify(into_wasm_abi, from_wasm_abi)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Model,
}

#[derive(
    Clone,
    Debug,
    serde::Serialize,
    serde::Deserialize,
    PartialEq,
    Eq,
    tsify::Tsify,
    schemars::JsonSchema,
)]
#[tsify(into_wasm_abi, from_wasm_abi)]
pub struct ChatTurn {
    pub role: ChatRole,
    pub text: String,
}

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize, tsify::Tsify)]
#[tsify(into_wasm_abi, from_wasm_abi)]
pub struct ChatRequest {
    pub settings: LearnerSettings,
    /// Everything said so far, oldest first. Does not include `message`.
    pub history: Vec<ChatTurn>,
    pub message: String,
}

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize, PartialEq, Eq, tsify::Tsify)]
#[tsify(into_wasm_abi, from_wasm_abi)]
pub struct VocabRequest {
    pub target_language: Language,
    pub native_language: Language,
    pub topic: String,
}

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize, schemars::JsonSchema)]
pub struct VocabResponse {
    pub cards: Vec<Flashcard>,
}

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize, PartialEq, Eq, tsify::Tsify)]
#[tsify(into_wasm_abi, from_wasm_abi)]
pub struct QuizRequest {
    pub target_language: Language,
    pub native_language: Language,
    pub proficiency: Proficiency,
}

impl From<LearnerSettings> for QuizRequest {
    fn from(settings: LearnerSettings) -> Self {
        Self {
            target_language: settings.target_language,
            native_language: settings.native_language,
            proficiency: settings.proficiency,
        }
    }
}

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize, schemars::JsonSchema)]
pub struct QuizResponse {
    pub questions: Vec<GameQuestion>,
}

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize, PartialEq, Eq, tsify::Tsify)]
#[tsify(into_wasm_abi, from_wasm_abi)]
pub struct GrammarRequest {
    pub target_language: Language,
    pub native_language: Language,
    pub topic: String,
}

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize, tsify::Tsify)]
#[tsify(into_wasm_abi, from_wasm_abi)]
pub struct GrammarResponse {
    pub markdown: String,
}

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize, PartialEq, Eq, Hash, tsify::Tsify)]
#[tsify(into_wasm_abi, from_wasm_abi)]
pub struct TtsRequest {
    pub text: String,
    pub language: Language,
}
