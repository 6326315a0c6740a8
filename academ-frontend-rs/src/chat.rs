use crate::ai::AiError;
use crate::tokens::{RequestToken, TokenSlot};
use chrono::{DateTime, Utc};
use language_utils::{ChatRequest, ChatRole, ChatTurn, LearnerSettings};
use serde::{Deserialize, Serialize};

/// XP for each completed tutor reply.
pub const REPLY_XP: u64 = 5;
pub const APOLOGY: &str = "Sorry, I encountered an error. Please try again.";

pub fn greeting(settings: &LearnerSettings) -> String {
    format!(
        "Hello! I am ready to help you learn {}. How are you doing today?",
        settings.target_language
    )
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, tsify::Tsify)]
#[tsify(into_wasm_abi, from_wasm_abi)]
pub struct ChatMessage {
    pub id: String,
    pub role: ChatRole,
    pub text: String,
    #[tsify(type = "string")]
    pub timestamp: DateTime<Utc>,
}

#[derive(Clone, Debug)]
struct PendingReply {
    token: RequestToken,
    message_index: usize,
    user_text: String,
}

#[derive(Clone, Debug)]
pub struct ChatSession {
    settings: LearnerSettings,
    messages: Vec<ChatMessage>,
    // completed exchanges only; what the model is shown as context
    history: Vec<ChatTurn>,
    next_id: u64,
    pending: Option<PendingReply>,
    turns: TokenSlot,
}

impl ChatSession {
    pub fn new(settings: LearnerSettings, now: DateTime<Utc>) -> Self {
        let mut session = Self {
            settings,
            messages: Vec::new(),
            history: Vec::new(),
            next_id: 0,
            pending: None,
            turns: TokenSlot::default(),
        };
        session.reset(settings, now);
        session
    }

    pub fn settings(&self) -> LearnerSettings {
        self.settings
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn is_waiting(&self) -> bool {
        self.pending.is_some()
    }

    /// Starts over with only the greeting. Any reply still streaming is dropped.
    pub fn reset(&mut self, settings: LearnerSettings, now: DateTime<Utc>) {
        self.turns.invalidate();
        self.settings = settings;
        self.messages.clear();
        self.history.clear();
        self.pending = None;
        self.push(ChatRole::Model, greeting(&settings), now);
    }

    fn push(&mut self, role: ChatRole, text: String, timestamp: DateTime<Utc>) -> usize {
        self.next_id += 1;
        self.messages.push(ChatMessage {
            id: self.next_id.to_string(),
            role,
            text,
            timestamp,
        });
        self.messages.len() - 1
    }

    /// Appends the user's message and an empty reply to stream into.
    /// Blank input, or input while a reply is pending, is ignored.
    pub fn begin_send(
        &mut self,
        text: &str,
        now: DateTime<Utc>,
    ) -> Option<(RequestToken, ChatRequest)> {
        let text = text.trim();
        if text.is_empty() || self.pending.is_some() {
            return None;
        }

        let request = ChatRequest {
            settings: self.settings,
            history: self.history.clone(),
            message: text.to_string(),
        };
        self.push(ChatRole::User, text.to_string(), now);
        let message_index = self.push(ChatRole::Model, String::new(), now);
        let token = self.turns.issue();
        self.pending = Some(PendingReply {
            token,
            message_index,
            user_text: text.to_string(),
        });
        Some((token, request))
    }

    fn pending_for(&self, token: RequestToken) -> Option<&PendingReply> {
        self.pending
            .as_ref()
            .filter(|pending| pending.token == token && self.turns.is_latest(token))
    }

    pub fn push_chunk(&mut self, token: RequestToken, chunk: &str) -> bool {
        let Some(index) = self.pending_for(token).map(|p| p.message_index) else {
            return false;
        };
        match self.messages.get_mut(index) {
            Some(message) => {
                message.text.push_str(chunk);
                true
            }
            None => false,
        }
    }

    /// Closes the pending reply. Returns the XP it earned.
    pub fn finish(
        &mut self,
        token: RequestToken,
        outcome: Result<(), AiError>,
        now: DateTime<Utc>,
    ) -> Option<u64> {
        self.pending_for(token)?;
        let pending = self.pending.take()?;

        match outcome {
            Ok(()) => {
                let reply = self
                    .messages
                    .get(pending.message_index)
                    .map(|m| m.text.clone())
                    .unwrap_or_default();
                self.history.push(ChatTurn {
                    role: ChatRole::User,
                    text: pending.user_text,
                });
                self.history.push(ChatTurn {
                    role: ChatRole::Model,
                    text: reply,
                });
                Some(REPLY_XP)
            }
            Err(e) => {
                log::error!("Tutor reply failed: {e}");
                match self.messages.get_mut(pending.message_index) {
                    Some(placeholder) if placeholder.text.is_empty() => {
                        placeholder.text = APOLOGY.to_string();
                    }
                    _ => {
                        self.push(ChatRole::Model, APOLOGY.to_string(), now);
                    }
                }
                None
            }
        }
    }

    pub fn view(&self) -> ChatView {
        ChatView {
            messages: self.messages.clone(),
            waiting: self.is_waiting(),
            target_language: self.settings.target_language,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, tsify::Tsify)]
#[tsify(into_wasm_abi, from_wasm_abi)]
pub struct ChatView {
    pub messages: Vec<ChatMessage>,
    pub waiting: bool,
    pub target_language: language_utils::Language,
}

#[cfg(test)]
mod tests {
    use super::*;
    use language_utils::Language;

    fn session() -> ChatSession {
        ChatSession::new(LearnerSettings::default(), Utc::now())
    }

    #[test]
    fn opens_with_a_greeting_for_the_target_language() {
        let settings = LearnerSettings {
            target_language: Language::French,
            ..Default::default()
        };
        let chat = ChatSession::new(settings, Utc::now());
        assert_eq!(chat.messages().len(), 1);
        assert_eq!(chat.messages()[0].role, ChatRole::Model);
        assert_eq!(
            chat.messages()[0].text,
            "Hello! I am ready to help you learn French. How are you doing today?"
        );
    }

    #[test]
    fn streamed_chunks_fill_the_reply() {
        let mut chat = session();
        let (token, request) = chat.begin_send(" Hi there ", Utc::now()).unwrap();
        assert_eq!(request.message, "Hi there");
        assert!(request.history.is_empty());
        assert!(chat.push_chunk(token, "Hel"));
        assert!(chat.push_chunk(token, "lo!"));
        assert_eq!(chat.finish(token, Ok(()), Utc::now()), Some(REPLY_XP));

        let texts: Vec<_> = chat.messages().iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts[1..], ["Hi there", "Hello!"]);
        assert!(!chat.is_waiting());
    }

    #[test]
    fn later_requests_carry_the_conversation_so_far() {
        let mut chat = session();
        let (token, _) = chat.begin_send("one", Utc::now()).unwrap();
        chat.push_chunk(token, "reply one");
        chat.finish(token, Ok(()), Utc::now());

        let (_, request) = chat.begin_send("two", Utc::now()).unwrap();
        assert_eq!(
            request.history,
            vec![
                ChatTurn {
                    role: ChatRole::User,
                    text: "one".to_string()
                },
                ChatTurn {
                    role: ChatRole::Model,
                    text: "reply one".to_string()
                },
            ]
        );
    }

    #[test]
    fn blank_and_overlapping_sends_are_ignored() {
        let mut chat = session();
        assert!(chat.begin_send("   ", Utc::now()).is_none());
        chat.begin_send("first", Utc::now()).unwrap();
        assert!(chat.begin_send("second", Utc::now()).is_none());
        assert_eq!(chat.messages().len(), 3);
    }

    #[test]
    fn failure_replaces_the_empty_placeholder_with_an_apology() {
        let mut chat = session();
        let (token, _) = chat.begin_send("hola", Utc::now()).unwrap();
        let xp = chat.finish(token, Err(AiError::Status("503".to_string())), Utc::now());
        assert_eq!(xp, None);
        assert_eq!(chat.messages().len(), 3);
        assert_eq!(chat.messages()[2].text, APOLOGY);
    }

    #[test]
    fn failure_mid_stream_appends_the_apology() {
        let mut chat = session();
        let (token, _) = chat.begin_send("hola", Utc::now()).unwrap();
        chat.push_chunk(token, "Bue");
        chat.finish(token, Err(AiError::Malformed("cut".to_string())), Utc::now());
        assert_eq!(chat.messages().len(), 4);
        assert_eq!(chat.messages()[2].text, "Bue");
        assert_eq!(chat.messages()[3].text, APOLOGY);
    }

    #[test]
    fn reset_drops_the_pending_reply() {
        let mut chat = session();
        let (token, _) = chat.begin_send("hola", Utc::now()).unwrap();
        chat.reset(LearnerSettings::default(), Utc::now());
        assert!(!chat.push_chunk(token, "late"));
        assert_eq!(chat.finish(token, Ok(()), Utc::now()), None);
        assert_eq!(chat.messages().len(), 1);
    }

    #[test]
    fn message_ids_are_unique() {
        let mut chat = session();
        let (token, _) = chat.begin_send("a", Utc::now()).unwrap();
        chat.finish(token, Ok(()), Utc::now());
        let mut ids: Vec<_> = chat.messages().iter().map(|m| m.id.clone()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), chat.messages().len());
    }
}
