use crate::audio::AudioCache;
use crate::utils::hit_ai_server;
use base64::Engine;
use futures::stream::LocalBoxStream;
use futures::{Stream, StreamExt as _};
use language_utils::{
    ChatRequest, Flashcard, GameQuestion, GrammarRequest, GrammarResponse, QuizRequest,
    QuizResponse, TtsRequest, VocabRequest, VocabResponse,
};
use std::cell::RefCell;

#[derive(Debug, thiserror::Error)]
pub enum AiError {
    #[error("AI server request failed")]
    Request(#[source] fetch_happen::Error),
    #[error("AI server returned {0}")]
    Status(String),
    #[error("malformed AI response: {0}")]
    Malformed(String),
}

/// Chunks of a tutor reply, in order.
pub type ChatStream = LocalBoxStream<'static, Result<String, AiError>>;

/// Decodes UTF-8 text that arrives in arbitrary byte chunks.
/// A character split across two chunks is held back until it is complete.
#[derive(Debug, Default)]
struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    fn feed(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let complete = match std::str::from_utf8(&self.pending) {
            Ok(_) => self.pending.len(),
            // only an unfinished sequence at the very end is worth waiting for
            Err(e) if e.error_len().is_none() => e.valid_up_to(),
            Err(_) => self.pending.len(),
        };
        let tail = self.pending.split_off(complete);
        let text = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending = tail;
        text
    }

    fn finish(&mut self) -> String {
        let text = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        text
    }
}

/// Turns a body arriving as byte chunks into text chunks.
pub fn decode_text(
    bytes: impl Stream<Item = Result<Vec<u8>, AiError>> + 'static,
) -> ChatStream {
    let state = Some((bytes.boxed_local(), Utf8Decoder::default()));
    futures::stream::unfold(state, |state| async move {
        let Some((mut bytes, mut decoder)) = state else {
            return None;
        };
        loop {
            match bytes.next().await {
                Some(Ok(chunk)) => {
                    let text = decoder.feed(&chunk);
                    if !text.is_empty() {
                        return Some((Ok(text), Some((bytes, decoder))));
                    }
                }
                Some(Err(e)) => return Some((Err(e), None)),
                None => {
                    let rest = decoder.finish();
                    return (!rest.is_empty()).then_some((Ok(rest), None));
                }
            }
        }
    })
    .boxed_local()
}

fn read_chunks(
    reader: fetch_happen::StreamReader,
) -> impl Stream<Item = Result<Vec<u8>, AiError>> + 'static {
    futures::stream::unfold(Some(reader), |reader| async move {
        let Some(reader) = reader else {
            return None;
        };
        match reader.read_chunk().await {
            Ok(Some(bytes)) => Some((Ok(bytes), Some(reader))),
            Ok(None) => None,
            Err(e) => Some((Err(AiError::Request(e)), None)),
        }
    })
}

#[allow(async_fn_in_trait)]
pub trait AiService {
    /// Attaches the signed-in user's token to later requests.
    fn set_access_token(&self, _token: Option<String>) {}

    async fn chat(&self, request: &ChatRequest) -> Result<ChatStream, AiError>;

    async fn generate_vocab(&self, request: &VocabRequest) -> Result<Vec<Flashcard>, AiError>;

    async fn generate_quiz(&self, request: &QuizRequest) -> Result<Vec<GameQuestion>, AiError>;

    async fn explain_grammar(&self, request: &GrammarRequest) -> Result<String, AiError>;

    /// Raw 16-bit little-endian PCM for `request.text`.
    async fn synthesize_speech(&self, request: &TtsRequest) -> Result<Vec<u8>, AiError>;
}

/// Talks to `academ-ai-backend`.
#[derive(Default)]
pub struct AiServer {
    access_token: RefCell<Option<String>>,
    audio_cache: RefCell<Option<AudioCache>>,
}

impl AiServer {
    pub fn new() -> Self {
        Self::default()
    }

    async fn send(
        &self,
        path: &str,
        request: impl serde::Serialize,
    ) -> Result<fetch_happen::Response, AiError> {
        let token = self.access_token.borrow().clone();
        let response = hit_ai_server(path, request, token.as_ref())
            .await
            .map_err(AiError::Request)?;
        if !response.ok() {
            return Err(AiError::Status(response.status().to_string()));
        }
        Ok(response)
    }

    async fn post(&self, path: &str, request: impl serde::Serialize) -> Result<String, AiError> {
        let response = self.send(path, request).await?;
        response.text().await.map_err(AiError::Request)
    }

    async fn post_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        request: impl serde::Serialize,
    ) -> Result<T, AiError> {
        let body = self.post(path, request).await?;
        serde_json::from_str(&body).map_err(|e| AiError::Malformed(e.to_string()))
    }

    async fn audio_cache(&self) -> Option<AudioCache> {
        if let Some(cache) = self.audio_cache.borrow().as_ref() {
            return Some(cache.clone());
        }
        match AudioCache::new().await {
            Ok(cache) => {
                *self.audio_cache.borrow_mut() = Some(cache.clone());
                Some(cache)
            }
            Err(e) => {
                log::warn!("Audio cache unavailable: {e}");
                None
            }
        }
    }
}

impl AiService for AiServer {
    fn set_access_token(&self, token: Option<String>) {
        *self.access_token.borrow_mut() = token;
    }

    async fn chat(&self, request: &ChatRequest) -> Result<ChatStream, AiError> {
        let response = self.send("/chat", request).await?;
        let reader = response.stream_reader().map_err(AiError::Request)?;
        Ok(decode_text(read_chunks(reader)))
    }

    async fn generate_vocab(&self, request: &VocabRequest) -> Result<Vec<Flashcard>, AiError> {
        let response: VocabResponse = self.post_json("/vocab", request).await?;
        Ok(response.cards)
    }

    async fn generate_quiz(&self, request: &QuizRequest) -> Result<Vec<GameQuestion>, AiError> {
        let response: QuizResponse = self.post_json("/quiz", request).await?;
        Ok(response.questions)
    }

    async fn explain_grammar(&self, request: &GrammarRequest) -> Result<String, AiError> {
        let response: GrammarResponse = self.post_json("/grammar", request).await?;
        Ok(response.markdown)
    }

    async fn synthesize_speech(&self, request: &TtsRequest) -> Result<Vec<u8>, AiError> {
        let cache = self.audio_cache().await;
        if let Some(cache) = &cache
            && let Some(bytes) = cache.get_cached(request).await
        {
            return Ok(bytes);
        }

        let encoded = self.post("/tts", request).await?;
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(encoded.trim())
            .map_err(|e| AiError::Malformed(format!("audio is not base64: {e}")))?;

        if let Some(cache) = &cache {
            cache.cache_audio(request, bytes.clone()).await;
        }
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::block_on;

    fn decoded(chunks: Vec<Result<Vec<u8>, AiError>>) -> Vec<Result<String, AiError>> {
        block_on(decode_text(futures::stream::iter(chunks)).collect())
    }

    #[test]
    fn characters_split_across_chunks_are_reassembled() {
        let bytes = "សួស្តី!".as_bytes();
        // cut in the middle of the first three-byte character
        let chunks = vec![Ok(bytes[..1].to_vec()), Ok(bytes[1..4].to_vec()), Ok(bytes[4..].to_vec())];
        let text: Vec<String> = decoded(chunks).into_iter().map(Result::unwrap).collect();
        assert_eq!(text.len(), 2);
        assert_eq!(text.concat(), "សួស្តី!");
    }

    #[test]
    fn each_chunk_is_emitted_as_it_arrives() {
        let chunks = vec![Ok(b"Hola, ".to_vec()), Ok(b"amigo.".to_vec())];
        let text: Vec<String> = decoded(chunks).into_iter().map(Result::unwrap).collect();
        assert_eq!(text, vec!["Hola, ", "amigo."]);
    }

    #[test]
    fn an_error_ends_the_reply() {
        let chunks = vec![
            Ok(b"Hola".to_vec()),
            Err(AiError::Status("connection reset".to_string())),
            Ok(b" never seen".to_vec()),
        ];
        let events = decoded(chunks);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].as_deref().unwrap(), "Hola");
        assert!(matches!(events[1], Err(AiError::Status(_))));
    }

    #[test]
    fn a_truncated_character_at_the_end_is_not_dropped_silently() {
        let bytes = "é".as_bytes();
        let events = decoded(vec![Ok(b"caf".to_vec()), Ok(bytes[..1].to_vec())]);
        let text: Vec<String> = events.into_iter().map(Result::unwrap).collect();
        assert_eq!(text, vec!["caf".to_string(), "\u{FFFD}".to_string()]);
    }
}
