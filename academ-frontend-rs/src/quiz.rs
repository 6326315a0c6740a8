use crate::ai::AiError;
use crate::tokens::{RequestToken, TokenSlot};
use language_utils::{GameQuestion, QUIZ_BATCH_SIZE};
use serde::{Deserialize, Serialize};

/// XP granted per correct answer.
pub const REWARD_FACTOR: u64 = 10;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, tsify::Tsify)]
#[tsify(into_wasm_abi, from_wasm_abi)]
#[serde(rename_all = "snake_case")]
pub enum QuizPhase {
    #[default]
    Idle,
    Loading,
    Playing,
    Finished,
    /// The batch came back with nothing playable.
    Empty,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, tsify::Tsify)]
#[tsify(into_wasm_abi, from_wasm_abi)]
pub struct Selection {
    pub option: String,
    pub correct: bool,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize, tsify::Tsify)]
#[tsify(into_wasm_abi, from_wasm_abi)]
pub struct QuizReward {
    pub score: u32,
    pub question_count: u32,
    pub xp: u64,
}

#[derive(Clone, Debug, Default)]
pub struct QuizEngine {
    phase: QuizPhase,
    questions: Vec<GameQuestion>,
    cursor: usize,
    score: u32,
    selection: Option<Selection>,
    reward: Option<QuizReward>,
    requests: TokenSlot,
}

impl QuizEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> QuizPhase {
        self.phase
    }

    pub fn score(&self) -> u32 {
        self.score
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn question_count(&self) -> usize {
        self.questions.len()
    }

    pub fn selection(&self) -> Option<&Selection> {
        self.selection.as_ref()
    }

    pub fn reward(&self) -> Option<QuizReward> {
        self.reward
    }

    pub fn current_question(&self) -> Option<&GameQuestion> {
        match self.phase {
            QuizPhase::Playing => self.questions.get(self.cursor),
            _ => None,
        }
    }

    pub fn is_last_question(&self) -> bool {
        self.cursor + 1 >= self.questions.len()
    }

    /// Moves to `Loading` and hands out the token the batch must come back with.
    /// A game in progress cannot be restarted.
    pub fn begin_start(&mut self) -> Option<RequestToken> {
        if self.phase == QuizPhase::Playing {
            return None;
        }
        self.phase = QuizPhase::Loading;
        self.questions.clear();
        self.selection = None;
        self.reward = None;
        Some(self.requests.issue())
    }

    /// Applies a generated batch. Returns false when the batch was stale.
    pub fn complete_start(
        &mut self,
        token: RequestToken,
        batch: Result<Vec<GameQuestion>, AiError>,
    ) -> bool {
        if self.phase != QuizPhase::Loading || !self.requests.is_latest(token) {
            log::debug!("Discarding stale quiz batch");
            return false;
        }

        let batch = batch.unwrap_or_else(|e| {
            log::error!("Quiz generation failed: {e}");
            Vec::new()
        });
        let generated = batch.len();
        let mut questions: Vec<_> = batch.into_iter().filter(|q| q.is_well_formed()).collect();
        if questions.len() < generated {
            log::warn!(
                "Dropped {} malformed quiz questions",
                generated - questions.len()
            );
        }
        questions.truncate(QUIZ_BATCH_SIZE);

        self.cursor = 0;
        self.score = 0;
        self.selection = None;
        self.reward = None;
        self.phase = if questions.is_empty() {
            QuizPhase::Empty
        } else {
            QuizPhase::Playing
        };
        self.questions = questions;
        true
    }

    /// Locks in an answer for the current question. Only the first pick counts.
    pub fn select_option(&mut self, option: &str) -> bool {
        if self.selection.is_some() {
            return false;
        }
        let Some(question) = self.current_question() else {
            return false;
        };
        if !question.options.iter().any(|o| o == option) {
            return false;
        }

        let correct = question.is_correct(option);
        if correct {
            self.score += 1;
        }
        self.selection = Some(Selection {
            option: option.to_string(),
            correct,
        });
        true
    }

    /// Moves past an answered question. Returns the reward when this finishes
    /// the game; that happens once per game.
    pub fn advance(&mut self) -> Option<QuizReward> {
        if self.phase != QuizPhase::Playing || self.selection.is_none() {
            return None;
        }
        self.selection = None;

        if !self.is_last_question() {
            self.cursor += 1;
            return None;
        }

        // answers are folded into the score as they are selected
        let score = self.score.min(self.questions.len() as u32);
        let reward = QuizReward {
            score,
            question_count: self.questions.len() as u32,
            xp: u64::from(score) * REWARD_FACTOR,
        };
        self.phase = QuizPhase::Finished;
        self.reward = Some(reward);
        Some(reward)
    }

    pub fn quit(&mut self) -> bool {
        match self.phase {
            QuizPhase::Finished | QuizPhase::Empty => {
                *self = Self {
                    requests: std::mem::take(&mut self.requests),
                    ..Self::default()
                };
                true
            }
            _ => false,
        }
    }

    /// Drops the game and anything still in flight for it.
    pub fn reset(&mut self) {
        let mut requests = std::mem::take(&mut self.requests);
        requests.invalidate();
        *self = Self {
            requests,
            ..Self::default()
        };
    }

    pub fn view(&self) -> QuizView {
        let question = self.current_question().cloned();
        let on_question = question.is_some();
        QuizView {
            phase: self.phase,
            question,
            question_number: if on_question { self.cursor + 1 } else { 0 },
            question_count: self.questions.len(),
            score: self.score,
            selection: self.selection.clone(),
            is_last_question: on_question && self.is_last_question(),
            reward: self.reward,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, tsify::Tsify)]
#[tsify(into_wasm_abi, from_wasm_abi)]
pub struct QuizView {
    pub phase: QuizPhase,
    pub question: Option<GameQuestion>,
    pub question_number: usize,
    pub question_count: usize,
    pub score: u32,
    pub selection: Option<Selection>,
    pub is_last_question: bool,
    pub reward: Option<QuizReward>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn question(correct: &str, others: [&str; 3]) -> GameQuestion {
        let mut options: Vec<String> = others.iter().map(|o| o.to_string()).collect();
        options.insert(1, correct.to_string());
        GameQuestion {
            sentence: "Je ___ du pain.".to_string(),
            correct_word: correct.to_string(),
            options,
            translation: "I eat bread.".to_string(),
            explanation: "First person of manger.".to_string(),
        }
    }

    fn batch(len: usize) -> Vec<GameQuestion> {
        (0..len)
            .map(|i| question(&format!("right{i}"), ["a", "b", "c"]))
            .collect()
    }

    fn playing(len: usize) -> QuizEngine {
        let mut quiz = QuizEngine::new();
        let token = quiz.begin_start().unwrap();
        assert!(quiz.complete_start(token, Ok(batch(len))));
        quiz
    }

    #[test]
    fn start_loads_then_plays() {
        let mut quiz = QuizEngine::new();
        let token = quiz.begin_start().unwrap();
        assert_eq!(quiz.phase(), QuizPhase::Loading);
        assert!(quiz.complete_start(token, Ok(batch(5))));
        assert_eq!(quiz.phase(), QuizPhase::Playing);
        assert_eq!(quiz.cursor(), 0);
        assert_eq!(quiz.score(), 0);
        assert!(quiz.selection().is_none());
    }

    #[test]
    fn only_the_first_selection_counts() {
        let mut quiz = playing(5);
        assert!(quiz.select_option("right0"));
        assert!(!quiz.select_option("a"));
        assert_eq!(quiz.score(), 1);
        assert_eq!(quiz.selection().unwrap().option, "right0");
    }

    #[test]
    fn wrong_answers_do_not_score() {
        let mut quiz = playing(5);
        assert!(quiz.select_option("b"));
        assert_eq!(quiz.score(), 0);
        assert!(!quiz.selection().unwrap().correct);
    }

    #[test]
    fn unknown_options_are_ignored() {
        let mut quiz = playing(5);
        assert!(!quiz.select_option("not an option"));
        assert!(quiz.selection().is_none());
        assert!(quiz.select_option("right0"));
    }

    #[test]
    fn advance_requires_a_selection() {
        let mut quiz = playing(5);
        assert_eq!(quiz.advance(), None);
        assert_eq!(quiz.cursor(), 0);
        quiz.select_option("a");
        assert_eq!(quiz.advance(), None);
        assert_eq!(quiz.cursor(), 1);
        assert!(quiz.selection().is_none());
    }

    #[test]
    fn three_of_five_correct_rewards_thirty_xp_once() {
        let mut quiz = playing(5);
        let picks = ["right0", "a", "right2", "b", "right4"];
        let mut rewards = vec![];
        for pick in picks {
            assert!(quiz.select_option(pick));
            rewards.extend(quiz.advance());
        }
        assert_eq!(quiz.phase(), QuizPhase::Finished);
        assert_eq!(
            rewards,
            vec![QuizReward {
                score: 3,
                question_count: 5,
                xp: 30
            }]
        );
        // finished games cannot be advanced again
        assert_eq!(quiz.advance(), None);
        assert!(!quiz.select_option("right4"));
    }

    #[test]
    fn all_correct_final_score_is_never_double_counted() {
        let mut quiz = playing(3);
        let mut last = None;
        for i in 0..3 {
            quiz.select_option(&format!("right{i}"));
            last = quiz.advance();
        }
        assert_eq!(last.unwrap().score, 3);
        assert_eq!(last.unwrap().xp, 30);
    }

    #[test]
    fn restart_from_finished_discards_the_old_game() {
        let mut quiz = playing(1);
        quiz.select_option("right0");
        quiz.advance();
        let token = quiz.begin_start().unwrap();
        assert_eq!(quiz.reward(), None);
        assert!(quiz.complete_start(token, Ok(batch(2))));
        assert_eq!(quiz.score(), 0);
        assert_eq!(quiz.question_count(), 2);
    }

    #[test]
    fn cannot_restart_while_playing() {
        let mut quiz = playing(5);
        assert_eq!(quiz.begin_start(), None);
        assert_eq!(quiz.phase(), QuizPhase::Playing);
    }

    #[test]
    fn empty_or_failed_batches_land_in_empty() {
        let mut quiz = QuizEngine::new();
        let token = quiz.begin_start().unwrap();
        quiz.complete_start(token, Ok(vec![]));
        assert_eq!(quiz.phase(), QuizPhase::Empty);
        assert!(quiz.current_question().is_none());

        let token = quiz.begin_start().unwrap();
        quiz.complete_start(token, Err(AiError::Status("500".to_string())));
        assert_eq!(quiz.phase(), QuizPhase::Empty);

        assert!(quiz.quit());
        assert_eq!(quiz.phase(), QuizPhase::Idle);
    }

    #[test]
    fn malformed_questions_are_dropped() {
        let mut bad = question("right", ["a", "b", "c"]);
        bad.options[0] = "right".to_string();
        let mut quiz = QuizEngine::new();
        let token = quiz.begin_start().unwrap();
        quiz.complete_start(token, Ok(vec![bad, question("ok", ["x", "y", "z"])]));
        assert_eq!(quiz.question_count(), 1);
        assert_eq!(quiz.current_question().unwrap().correct_word, "ok");
    }

    #[test]
    fn superseded_batches_are_discarded() {
        let mut quiz = QuizEngine::new();
        let first = quiz.begin_start().unwrap();
        let second = quiz.begin_start().unwrap();
        assert!(!quiz.complete_start(first, Ok(batch(5))));
        assert_eq!(quiz.phase(), QuizPhase::Loading);
        assert!(quiz.complete_start(second, Ok(batch(2))));
        assert_eq!(quiz.question_count(), 2);
    }

    #[test]
    fn reset_discards_in_flight_batches() {
        let mut quiz = QuizEngine::new();
        let token = quiz.begin_start().unwrap();
        quiz.reset();
        assert!(!quiz.complete_start(token, Ok(batch(5))));
        assert_eq!(quiz.phase(), QuizPhase::Idle);
    }

    #[test]
    fn quit_only_from_a_finished_screen() {
        let mut quiz = playing(2);
        assert!(!quiz.quit());
        assert_eq!(quiz.phase(), QuizPhase::Playing);
    }

    #[test]
    fn view_reports_one_based_progress() {
        let mut quiz = playing(5);
        quiz.select_option("right0");
        quiz.advance();
        let view = quiz.view();
        assert_eq!(view.question_number, 2);
        assert_eq!(view.question_count, 5);
        assert_eq!(view.question.unwrap().correct_word, "right1");
    }

    #[test]
    fn view_has_no_progress_without_a_question() {
        let mut quiz = QuizEngine::new();
        let view = quiz.view();
        assert_eq!(view.question_number, 0);
        assert!(!view.is_last_question);

        quiz.begin_start().unwrap();
        let view = quiz.view();
        assert_eq!(view.phase, QuizPhase::Loading);
        assert_eq!(view.question_number, 0);
        assert!(!view.is_last_question);
    }

    #[test]
    fn oversized_batches_are_cut_to_five() {
        let mut quiz = QuizEngine::new();
        let token = quiz.begin_start().unwrap();
        assert!(quiz.complete_start(token, Ok(batch(7))));
        assert_eq!(quiz.question_count(), QUIZ_BATCH_SIZE);
        assert_eq!(quiz.view().question_count, 5);
    }
}
