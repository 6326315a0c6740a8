#![deny(clippy::string_slice)]

pub mod ai;
pub mod app;
pub mod audio;
pub mod auth;
pub mod backend;
pub mod chat;
pub mod flashcards;
pub mod grammar;
pub mod i18n;
pub mod profile;
pub mod quiz;
pub mod router;
pub mod supabase;
pub mod tokens;
mod utils;

use ai::AiServer;
use app::{App, ListenerKey, Snapshot};
use backend::Session;
use i18n::AppLanguage;
use language_utils::{LANGUAGES, Language, LearnerSettings};
use profile::{ProfileCommand, ProfileUpdate};
use router::View;
use serde::{Deserialize, Serialize};
use slotmap::{Key as _, KeyData};
use std::collections::BTreeMap;
use std::sync::LazyLock;
use supabase::Supabase;
use wasm_bindgen::prelude::*;

/// Fixed lists the interface renders pickers and menus from.
#[derive(Clone, Debug, Serialize, Deserialize, tsify::Tsify)]
#[tsify(into_wasm_abi, from_wasm_abi)]
pub struct Catalog {
    pub languages: Vec<Language>,
    pub quick_topics: Vec<String>,
    pub grammar_topics: Vec<String>,
    pub sidebar: Vec<NavItem>,
    pub mobile_nav: Vec<NavItem>,
}

#[derive(Clone, Debug, Serialize, Deserialize, tsify::Tsify)]
#[tsify(into_wasm_abi, from_wasm_abi)]
pub struct NavItem {
    pub view: View,
    pub label_key: String,
}

fn nav_items(views: &[View]) -> Vec<NavItem> {
    views
        .iter()
        .map(|view| NavItem {
            view: *view,
            label_key: view.label_key().to_string(),
        })
        .collect()
}

#[cfg_attr(target_arch = "wasm32", wasm_bindgen)]
pub fn get_catalog() -> Catalog {
    Catalog {
        languages: LANGUAGES.to_vec(),
        quick_topics: flashcards::QUICK_TOPICS
            .iter()
            .map(|t| t.to_string())
            .collect(),
        grammar_topics: grammar::POPULAR_TOPICS
            .iter()
            .map(|t| t.to_string())
            .collect(),
        sidebar: nav_items(router::SIDEBAR_VIEWS),
        mobile_nav: nav_items(router::MOBILE_VIEWS),
    }
}

#[wasm_bindgen]
pub struct Academ {
    app: App<AiServer, Supabase>,
}

// putting this inside LOGGER prevents us from accidentally initializing the logger more than once
#[allow(clippy::declare_interior_mutable_const)]
const LOGGER: LazyLock<()> = LazyLock::new(|| {
    utils::set_panic_hook();

    wasm_logger::init(wasm_logger::Config::default());
    log::info!("Logging initialized");
});

const SESSION_KEY: &str = "academ.session";

#[cfg_attr(target_arch = "wasm32", wasm_bindgen)]
impl Academ {
    #[cfg_attr(target_arch = "wasm32", wasm_bindgen(constructor))]
    pub async fn new() -> Academ {
        // used to only initialize the logger once
        #[allow(clippy::borrow_interior_mutable_const)]
        *LOGGER;

        let app = App::new(AiServer::new(), Supabase::new(supabase::supabase_config()));
        app.on_session_change(store_session);
        let academ = Academ { app };
        let session = restore_session();
        academ.app.set_session(session).await;
        academ
    }

    pub fn snapshot(&self) -> Snapshot {
        self.app.snapshot()
    }

    /// Calls `callback` with no arguments after every state change.
    pub fn subscribe(&self, callback: js_sys::Function) -> u64 {
        let key = self.app.subscribe(move || {
            let this = JsValue::null();
            if let Err(e) = callback.call0(&this) {
                log::error!("Listener threw: {e:?}");
            }
        });
        key.data().as_ffi()
    }

    pub fn unsubscribe(&self, key: u64) {
        self.app.unsubscribe(ListenerKey::from(KeyData::from_ffi(key)));
    }

    pub fn translate(&self, key: String) -> String {
        self.app.translate(&key)
    }

    /// `params` is a plain object such as `{ score: "3", total: "5" }`.
    pub fn translate_with(&self, key: String, params: JsValue) -> Result<String, JsValue> {
        let params: BTreeMap<String, String> = serde_wasm_bindgen::from_value(params)
            .map_err(|e| JsValue::from_str(&format!("Invalid phrase parameters: {e}")))?;
        let params: Vec<(&str, &str)> = params
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
            .collect();
        let language = self.app.with_state(|state| state.language);
        Ok(i18n::format(language, &key, &params))
    }

    pub fn set_app_language(&self, language: AppLanguage) {
        self.app.set_app_language(language);
    }

    pub fn toggle_app_language(&self) {
        self.app.toggle_app_language();
    }

    pub fn navigate(&self, view: View) {
        self.app.navigate(view);
    }

    pub fn show_login(&self) {
        self.app.show_login();
    }

    pub fn show_sign_up(&self) {
        self.app.show_sign_up();
    }

    pub async fn sign_in(&self, email: String, password: String) -> Result<(), JsValue> {
        self.app
            .sign_in(&email, &password)
            .await
            .map_err(|e| JsValue::from_str(&e.localized(self.language())))
    }

    /// Resolves to whether the new account is already signed in.
    pub async fn sign_up(
        &self,
        full_name: String,
        email: String,
        password: String,
    ) -> Result<bool, JsValue> {
        self.app
            .sign_up(&full_name, &email, &password)
            .await
            .map(|outcome| outcome.session.is_some())
            .map_err(|e| JsValue::from_str(&e.localized(self.language())))
    }

    pub async fn sign_out(&self) {
        self.app.sign_out().await;
    }

    pub fn oauth_url(&self, redirect_to: String) -> String {
        self.app.oauth_url(&redirect_to)
    }

    pub async fn update_profile(&self, update: ProfileUpdate) -> Result<(), JsValue> {
        self.app
            .update_profile(update)
            .await
            .map(|_| ())
            .map_err(|e| self.backend_error(&e))
    }

    pub async fn retry_unsynced(&self) -> Result<(), JsValue> {
        self.app
            .retry_unsynced()
            .await
            .map(|_| ())
            .map_err(|e| self.backend_error(&e))
    }

    pub async fn set_streak(&self, streak: u32) -> Result<(), JsValue> {
        self.app
            .apply(ProfileCommand::SetStreak(streak))
            .await
            .map(|_| ())
            .map_err(|e| self.backend_error(&e))
    }

    pub fn edit_settings(&self, settings: LearnerSettings) {
        self.app.edit_settings(settings);
    }

    pub async fn save_settings(&self) -> Result<(), JsValue> {
        self.app
            .save_settings()
            .await
            .map(|_| ())
            .map_err(|e| self.backend_error(&e))
    }

    pub async fn start_quiz(&self) {
        self.app.start_quiz().await;
    }

    pub fn select_option(&self, option: String) -> bool {
        self.app.select_option(&option)
    }

    pub async fn advance_quiz(&self) {
        self.app.advance_quiz().await;
    }

    pub fn quit_quiz(&self) {
        self.app.quit_quiz();
    }

    pub async fn load_deck(&self, topic: String) {
        self.app.load_deck(&topic).await;
    }

    pub fn next_card(&self) -> bool {
        self.app.next_card()
    }

    pub fn previous_card(&self) -> bool {
        self.app.previous_card()
    }

    pub fn flip_card(&self) {
        self.app.flip_card();
    }

    /// Plays the current word once. Resolves to false when the request was
    /// rejected because a clip is already loading.
    pub async fn speak(&self) -> Result<bool, JsValue> {
        let audio = self
            .app
            .speak()
            .await
            .map_err(|e| JsValue::from_str(&e.to_string()))?;
        let Some(audio) = audio else {
            return Ok(false);
        };
        #[cfg(target_arch = "wasm32")]
        audio
            .play()
            .map_err(|e| JsValue::from_str(&e.to_string()))?;
        #[cfg(not(target_arch = "wasm32"))]
        let _ = audio;
        Ok(true)
    }

    pub async fn send_chat(&self, text: String) {
        self.app.send_chat(&text).await;
    }

    pub async fn explain_grammar(&self, topic: String) {
        self.app.explain_grammar(&topic).await;
    }
}

impl Academ {
    fn language(&self) -> AppLanguage {
        self.app.with_state(|state| state.language)
    }

    fn backend_error(&self, error: &profile::ProfileError) -> JsValue {
        log::error!("{error}");
        JsValue::from_str(&i18n::lookup(self.language(), "common.error"))
    }
}

#[cfg(target_arch = "wasm32")]
fn local_storage() -> Option<web_sys::Storage> {
    web_sys::window()?.local_storage().ok()?
}

/// An OAuth redirect in the URL wins over a session stored by an earlier visit.
#[cfg(target_arch = "wasm32")]
fn restore_session() -> Option<Session> {
    let now = chrono::Utc::now().timestamp();
    let location = web_sys::window()?.location();
    if let Ok(hash) = location.hash()
        && let Some(session) = Session::from_redirect_fragment(&hash)
    {
        if let Err(e) = location.set_hash("") {
            log::warn!("Failed to clear the OAuth fragment: {e:?}");
        }
        return Some(session);
    }

    let stored = local_storage()?.get_item(SESSION_KEY).ok()??;
    let session: Session = serde_json::from_str(&stored)
        .inspect_err(|e| log::warn!("Ignoring unreadable stored session: {e}"))
        .ok()?;
    // an expired access token is renewed on first use if it can be
    (!session.is_expired(now) || session.refresh_token.is_some()).then_some(session)
}

#[cfg(not(target_arch = "wasm32"))]
fn restore_session() -> Option<Session> {
    None
}

#[cfg(target_arch = "wasm32")]
fn store_session(session: Option<&Session>) {
    let Some(storage) = local_storage() else {
        return;
    };
    let result = match session.map(serde_json::to_string) {
        Some(Ok(json)) => storage.set_item(SESSION_KEY, &json),
        Some(Err(e)) => {
            log::error!("Failed to serialize session: {e}");
            return;
        }
        None => storage.remove_item(SESSION_KEY),
    };
    if let Err(e) = result {
        log::warn!("Failed to store session: {e:?}");
    }
}

#[cfg(not(target_arch = "wasm32"))]
fn store_session(_session: Option<&Session>) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_lists_every_language_and_topic() {
        let catalog = get_catalog();
        assert_eq!(catalog.languages.len(), LANGUAGES.len());
        assert_eq!(catalog.quick_topics[0], "Travel");
        assert_eq!(catalog.grammar_topics.len(), 7);
        assert_eq!(catalog.sidebar.len(), 6);
        assert_eq!(catalog.mobile_nav.len(), 4);
        assert_eq!(catalog.mobile_nav[3].view, View::Game);
        assert_eq!(catalog.sidebar[5].label_key, "sidebar.settings");
    }
}
