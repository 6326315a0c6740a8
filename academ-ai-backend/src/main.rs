mod gemini;
mod prompts;

use axum::{
    Router,
    body::Body,
    extract::Json,
    http::{StatusCode, header},
    response::Response,
    routing::{get, post},
};
use axum_extra::{
    TypedHeader,
    headers::{Authorization, authorization::Bearer},
};
use gemini::{
    CHAT_MODEL, Content, FLASH_MODEL, GRAMMAR_MODEL, Gemini, GeminiError, GenerateContentRequest,
};
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use language_utils::{
    ChatRequest, ChatRole, GrammarRequest, GrammarResponse, QuizRequest, QuizResponse, TtsRequest,
    VocabRequest, VocabResponse,
};
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{Any, CorsLayer};

static GEMINI: LazyLock<Option<Gemini>> = LazyLock::new(|| {
    Gemini::from_env()
        .inspect_err(|e| log::error!("AI routes are disabled: {e}"))
        .ok()
});

fn gemini() -> Result<&'static Gemini, StatusCode> {
    GEMINI
        .as_ref()
        .ok_or(GeminiError::MissingKey.status_code())
}

fn upstream_failure(route: &str) -> impl FnOnce(GeminiError) -> StatusCode + '_ {
    move |e| {
        log::error!("{route} failed: {e}");
        e.status_code()
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: uuid::Uuid, // subject (user id)
    exp: usize,      // expiry
}

fn verify_jwt(token: &str) -> Result<Claims, StatusCode> {
    let jwt_secret =
        std::env::var("SUPABASE_JWT_SECRET").map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let mut validation = Validation::new(Algorithm::HS256);
    validation.set_audience(&["authenticated"]);

    let decoding_key = DecodingKey::from_secret(jwt_secret.as_ref());

    match decode::<Claims>(token, &decoding_key, &validation) {
        Ok(token_data) => Ok(token_data.claims),
        Err(_) => Err(StatusCode::UNAUTHORIZED),
    }
}

/// Signed-in callers are logged by id. Anonymous use is allowed.
fn identify(route: &str, auth: &Authorization<Bearer>) {
    match auth.token() {
        "anonymous" => log::debug!("{route}: anonymous caller"),
        token => match verify_jwt(token) {
            Ok(claims) => log::info!("{route}: user {}", claims.sub),
            Err(status) => log::warn!("{route}: unverified token ({status})"),
        },
    }
}

fn conversation(request: &ChatRequest) -> GenerateContentRequest {
    let mut contents: Vec<Content> = request.history.iter().map(Content::from).collect();
    contents.push(Content::text(Some(ChatRole::User), request.message.clone()));
    GenerateContentRequest {
        system_instruction: Some(Content::text(
            None,
            prompts::tutor_instruction(&request.settings),
        )),
        contents,
        generation_config: None,
    }
}

async fn chat(
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Json(request): Json<ChatRequest>,
) -> Result<Response, StatusCode> {
    identify("chat", &auth);

    let replies = gemini()?
        .stream_text(CHAT_MODEL, &conversation(&request))
        .await
        .map_err(upstream_failure("chat"))?;

    Response::builder()
        .header(header::CONTENT_TYPE, "text/plain; charset=utf-8")
        .body(Body::from_stream(replies))
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

async fn vocab(
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Json(request): Json<VocabRequest>,
) -> Result<Json<VocabResponse>, StatusCode> {
    identify("vocab", &auth);

    let response = gemini()?
        .generate_json::<VocabResponse>(FLASH_MODEL, prompts::vocab(&request))
        .await
        .map_err(upstream_failure("vocab"))?;
    Ok(Json(response))
}

async fn quiz(
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Json(request): Json<QuizRequest>,
) -> Result<Json<QuizResponse>, StatusCode> {
    identify("quiz", &auth);

    let response = gemini()?
        .generate_json::<QuizResponse>(FLASH_MODEL, prompts::quiz(&request))
        .await
        .map_err(upstream_failure("quiz"))?;
    Ok(Json(response))
}

async fn grammar(
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Json(request): Json<GrammarRequest>,
) -> Result<Json<GrammarResponse>, StatusCode> {
    identify("grammar", &auth);

    let markdown = gemini()?
        .generate_text(GRAMMAR_MODEL, prompts::grammar(&request))
        .await
        .map_err(upstream_failure("grammar"))?;
    Ok(Json(GrammarResponse { markdown }))
}

async fn text_to_speech(
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Json(request): Json<TtsRequest>,
) -> Result<String, StatusCode> {
    identify("tts", &auth);

    gemini()?
        .speak(prompts::speech(&request))
        .await
        .map_err(upstream_failure("tts"))
}

fn app() -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
        .expose_headers(Any);

    Router::new()
        .route("/", get(|| async { "Hello from fly.io!" }))
        .route("/chat", post(chat))
        .route("/vocab", post(vocab))
        .route("/quiz", post(quiz))
        .route("/grammar", post(grammar))
        .route("/tts", post(text_to_speech))
        .layer(CompressionLayer::new())
        .layer(cors)
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    dotenvy::dotenv().ok();
    env_logger::init();

    let port = std::env::var("PORT")
        .ok()
        .and_then(|port| port.parse::<u16>().ok())
        .unwrap_or(8080);

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    log::info!("Listening on port {port}");
    axum::serve(listener, app()).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use language_utils::{ChatTurn, LearnerSettings};

    #[test]
    fn conversation_replays_history_before_the_new_message() {
        let request = ChatRequest {
            settings: LearnerSettings::default(),
            history: vec![
                ChatTurn {
                    role: ChatRole::User,
                    text: "Hello".to_string(),
                },
                ChatTurn {
                    role: ChatRole::Model,
                    text: "Hi! (Khmer translation: សួស្តី)".to_string(),
                },
            ],
            message: "How are you?".to_string(),
        };
        let conversation = conversation(&request);
        let roles: Vec<_> = conversation
            .contents
            .iter()
            .map(|content| content.role.as_deref().unwrap())
            .collect();
        assert_eq!(roles, vec!["user", "model", "user"]);
        assert_eq!(
            conversation.contents[2].parts[0].text.as_deref(),
            Some("How are you?")
        );

        let instruction = conversation.system_instruction.unwrap();
        assert!(instruction.role.is_none());
        assert!(
            instruction.parts[0]
                .text
                .as_deref()
                .unwrap()
                .contains("teaching English")
        );
    }

    #[test]
    fn garbage_tokens_are_not_trusted() {
        // with or without a configured secret, a malformed token never verifies
        assert!(verify_jwt("not-a-jwt").is_err());
    }
}
