use axum::http::StatusCode;
use futures::{Stream, StreamExt as _};
use language_utils::{ChatRole, ChatTurn};
use schemars::JsonSchema;
use schemars::generate::SchemaSettings;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const TTS_VOICE: &str = "Kore";

pub const CHAT_MODEL: &str = "gemini-3-pro-preview";
pub const FLASH_MODEL: &str = "gemini-3-flash-preview";
pub const GRAMMAR_MODEL: &str = "gemini-3-pro-preview";
pub const TTS_MODEL: &str = "gemini-2.5-flash-preview-tts";

#[derive(Debug, thiserror::Error)]
pub enum GeminiError {
    #[error("GEMINI_API_KEY is not set")]
    MissingKey,
    #[error("request to Gemini failed")]
    Request(#[from] reqwest::Error),
    #[error("Gemini returned {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("malformed Gemini response: {0}")]
    Malformed(String),
    #[error("Gemini returned no audio")]
    NoAudio,
}

impl GeminiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            GeminiError::MissingKey => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_GATEWAY,
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub parts: Vec<Part>,
}

impl Content {
    pub fn text(role: Option<ChatRole>, text: impl Into<String>) -> Self {
        Self {
            role: role.map(|role| {
                match role {
                    ChatRole::User => "user",
                    ChatRole::Model => "model",
                }
                .to_string()
            }),
            parts: vec![Part {
                text: Some(text.into()),
                inline_data: None,
            }],
        }
    }
}

impl From<&ChatTurn> for Content {
    fn from(turn: &ChatTurn) -> Self {
        Content::text(Some(turn.role), turn.text.clone())
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<InlineData>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InlineData {
    #[serde(default)]
    pub mime_type: String,
    pub data: String,
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,
    pub contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation_config: Option<GenerationConfig>,
}

impl GenerateContentRequest {
    pub fn prompt(prompt: impl Into<String>) -> Self {
        Self {
            contents: vec![Content::text(Some(ChatRole::User), prompt)],
            ..Default::default()
        }
    }
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_mime_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_json_schema: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_modalities: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speech_config: Option<SpeechConfig>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct GenerateContentResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
}

#[derive(Debug, Default, Deserialize)]
pub struct Candidate {
    #[serde(default)]
    pub content: Content,
}

impl GenerateContentResponse {
    /// All text parts of the first candidate, concatenated.
    pub fn text(&self) -> String {
        self.parts().filter_map(|part| part.text.as_deref()).collect()
    }

    pub fn inline_data(&self) -> Option<&InlineData> {
        self.parts().find_map(|part| part.inline_data.as_ref())
    }

    fn parts(&self) -> impl Iterator<Item = &Part> {
        self.candidates
            .first()
            .into_iter()
            .flat_map(|candidate| candidate.content.parts.iter())
    }
}

/// A self-contained JSON schema for `T`, in the form `responseJsonSchema` accepts.
pub fn response_schema<T: JsonSchema>() -> serde_json::Value {
    SchemaSettings::draft2020_12()
        .with(|settings| {
            settings.inline_subschemas = true;
            settings.meta_schema = None;
        })
        .into_generator()
        .into_root_schema_for::<T>()
        .to_value()
}

/// Splits a `text/event-stream` body into the text of each event.
/// Lines may arrive split across chunks at any byte.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<Result<String, GeminiError>> {
        self.buffer.extend_from_slice(bytes);
        let mut events = Vec::new();
        while let Some(end) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=end).collect();
            let line = String::from_utf8_lossy(&line);
            let Some(data) = line.trim_end().strip_prefix("data:") else {
                continue;
            };
            match serde_json::from_str::<GenerateContentResponse>(data.trim()) {
                Ok(response) => {
                    let text = response.text();
                    if !text.is_empty() {
                        events.push(Ok(text));
                    }
                }
                Err(e) => events.push(Err(GeminiError::Malformed(e.to_string()))),
            }
        }
        events
    }
}

pub struct Gemini {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl Gemini {
    pub fn from_env() -> Result<Self, GeminiError> {
        let api_key = std::env::var("GEMINI_API_KEY").map_err(|_| GeminiError::MissingKey)?;
        let base_url =
            std::env::var("GEMINI_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        Ok(Self {
            http: reqwest::Client::new(),
            api_key,
            base_url,
        })
    }

    async fn send(
        &self,
        model: &str,
        method: &str,
        request: &GenerateContentRequest,
    ) -> Result<reqwest::Response, GeminiError> {
        let url = format!("{}/models/{model}:{method}", self.base_url);
        let response = self
            .http
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GeminiError::Status { status, body });
        }
        Ok(response)
    }

    pub async fn generate(
        &self,
        model: &str,
        request: &GenerateContentRequest,
    ) -> Result<GenerateContentResponse, GeminiError> {
        let response = self.send(model, "generateContent", request).await?;
        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|e| GeminiError::Malformed(e.to_string()))
    }

    pub async fn generate_text(&self, model: &str, prompt: String) -> Result<String, GeminiError> {
        let response = self
            .generate(model, &GenerateContentRequest::prompt(prompt))
            .await?;
        Ok(response.text())
    }

    /// Asks for JSON matching `T`'s schema and parses the reply.
    pub async fn generate_json<T: DeserializeOwned + JsonSchema>(
        &self,
        model: &str,
        prompt: String,
    ) -> Result<T, GeminiError> {
        let request = GenerateContentRequest {
            generation_config: Some(GenerationConfig {
                response_mime_type: Some("application/json".to_string()),
                response_json_schema: Some(response_schema::<T>()),
                ..Default::default()
            }),
            ..GenerateContentRequest::prompt(prompt)
        };
        let text = self.generate(model, &request).await?.text();
        serde_json::from_str(&text).map_err(|e| GeminiError::Malformed(e.to_string()))
    }

    pub async fn stream_text(
        &self,
        model: &str,
        request: &GenerateContentRequest,
    ) -> Result<impl Stream<Item = Result<String, GeminiError>> + Send + 'static, GeminiError> {
        let response = self
            .send(model, "streamGenerateContent?alt=sse", request)
            .await?;
        let events = response
            .bytes_stream()
            .scan(SseDecoder::default(), |decoder, chunk| {
                let events = match chunk {
                    Ok(bytes) => decoder.feed(&bytes),
                    Err(e) => vec![Err(GeminiError::Request(e))],
                };
                futures::future::ready(Some(futures::stream::iter(events)))
            })
            .flatten();
        Ok(events)
    }

    /// Base64 16-bit PCM at 24kHz, as Gemini returns it.
    pub async fn speak(&self, prompt: String) -> Result<String, GeminiError> {
        let request = GenerateContentRequest {
            generation_config: Some(GenerationConfig {
                response_modalities: Some(vec!["AUDIO".to_string()]),
                speech_config: Some(SpeechConfig {
                    voice_config: VoiceConfig {
                        prebuilt_voice_config: PrebuiltVoiceConfig {
                            voice_name: TTS_VOICE.to_string(),
                        },
                    },
                }),
                ..Default::default()
            }),
            ..GenerateContentRequest::prompt(prompt)
        };
        let response = self.generate(TTS_MODEL, &request).await?;
        match response.inline_data() {
            Some(audio) if !audio.data.is_empty() => Ok(audio.data.clone()),
            _ => Err(GeminiError::NoAudio),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use language_utils::{QuizResponse, VocabResponse};

    #[test]
    fn requests_use_gemini_field_names() {
        let request = GenerateContentRequest {
            system_instruction: Some(Content::text(None, "be kind")),
            generation_config: Some(GenerationConfig {
                response_mime_type: Some("application/json".to_string()),
                ..Default::default()
            }),
            ..GenerateContentRequest::prompt("hi")
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["systemInstruction"]["parts"][0]["text"], "be kind");
        assert!(json["systemInstruction"].get("role").is_none());
        assert_eq!(json["contents"][0]["role"], "user");
        assert_eq!(
            json["generationConfig"]["responseMimeType"],
            "application/json"
        );
        assert!(json["generationConfig"].get("speechConfig").is_none());
    }

    #[test]
    fn history_keeps_the_model_role() {
        let turn = ChatTurn {
            role: ChatRole::Model,
            text: "Hola".to_string(),
        };
        let content = Content::from(&turn);
        assert_eq!(content.role.as_deref(), Some("model"));
    }

    #[test]
    fn reads_text_and_audio_from_the_first_candidate() {
        let response: GenerateContentResponse = serde_json::from_str(
            r#"{"candidates":[{"content":{"role":"model","parts":[
                {"text":"Hello "},{"text":"there"},
                {"inlineData":{"mimeType":"audio/L16;codec=pcm;rate=24000","data":"AAA="}}
            ]}}]}"#,
        )
        .unwrap();
        assert_eq!(response.text(), "Hello there");
        assert_eq!(response.inline_data().unwrap().data, "AAA=");

        let empty: GenerateContentResponse = serde_json::from_str("{}").unwrap();
        assert_eq!(empty.text(), "");
        assert!(empty.inline_data().is_none());
    }

    #[test]
    fn schemas_are_self_contained() {
        let schema = response_schema::<QuizResponse>();
        let text = schema.to_string();
        assert!(!text.contains("$ref"));
        assert!(schema.get("$schema").is_none());
        let question = &schema["properties"]["questions"]["items"];
        assert!(question["properties"].get("correct_word").is_some());

        let vocab = response_schema::<VocabResponse>();
        assert!(vocab["properties"]["cards"]["items"]["properties"]
            .get("example")
            .is_some());
    }

    #[test]
    fn decodes_events_split_across_chunks() {
        let mut decoder = SseDecoder::default();
        let first = r#"data: {"candidates":[{"content":{"parts":[{"text":"¡Ho"#;
        let second = "la!\"}]}}]}\r\n\r\ndata: {\"candidates\":[]}\n\n";
        let bytes = [first.as_bytes(), second.as_bytes()].concat();
        // split inside the two-byte '¡'
        let (a, b) = bytes.split_at(first.find('¡').unwrap() + 1);

        assert!(decoder.feed(a).is_empty());
        let events: Vec<String> = decoder
            .feed(b)
            .into_iter()
            .map(|event| event.unwrap())
            .collect();
        assert_eq!(events, vec!["¡Hola!".to_string()]);
    }

    #[test]
    fn unreadable_events_are_reported() {
        let mut decoder = SseDecoder::default();
        let events = decoder.feed(b"data: {not json\n");
        assert!(matches!(events.as_slice(), [Err(GeminiError::Malformed(_))]));
    }

    #[test]
    fn a_missing_key_is_a_server_error() {
        assert_eq!(
            GeminiError::MissingKey.status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(GeminiError::NoAudio.status_code(), StatusCode::BAD_GATEWAY);
    }
}
