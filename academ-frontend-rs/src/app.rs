use crate::ai::AiService;
use crate::audio::{AudioError, PcmAudio};
use crate::auth::{self, AuthError, AuthState, AuthView, OAUTH_PROVIDER};
use crate::backend::{AuthBackend, BackendError, ProfileBackend, Session, SignUpOutcome};
use crate::chat::{ChatSession, ChatView};
use crate::flashcards::{DeckView, FlashcardDeck};
use crate::grammar::{GrammarGuide, GrammarView};
use crate::i18n::{self, AppLanguage};
use crate::profile::{
    ProfileCommand, ProfileError, ProfileField, ProfileStore, ProfileUpdate, SyncOutcome,
    UserProfile,
};
use crate::quiz::{QuizEngine, QuizReward, QuizView};
use crate::router::{AuthScreen, Router, View};
use chrono::{DateTime, Utc};
use futures::StreamExt as _;
use language_utils::profile::ProfileRowUpdate;
use language_utils::{GrammarRequest, LearnerSettings, QuizRequest, TtsRequest, VocabRequest};
use serde::{Deserialize, Serialize};
use slotmap::{SlotMap, new_key_type};
use std::cell::RefCell;
use std::rc::Rc;

new_key_type! {
    pub struct ListenerKey;
}

/// Everything the interface shows. Only [`App`] mutates it.
#[derive(Clone, Debug)]
pub struct AppState {
    pub router: Router,
    pub language: AppLanguage,
    pub auth: AuthState,
    pub profile: ProfileStore,
    pub settings_draft: LearnerSettings,
    pub settings_saved: bool,
    pub quiz: QuizEngine,
    pub deck: FlashcardDeck,
    pub chat: ChatSession,
    pub grammar: GrammarGuide,
}

impl AppState {
    pub fn new(now: DateTime<Utc>) -> Self {
        let profile = ProfileStore::new();
        let settings = profile.profile().settings();
        Self {
            router: Router::default(),
            language: AppLanguage::default(),
            auth: AuthState::default(),
            profile,
            settings_draft: settings,
            settings_saved: false,
            quiz: QuizEngine::new(),
            deck: FlashcardDeck::new(),
            chat: ChatSession::new(settings, now),
            grammar: GrammarGuide::default(),
        }
    }

    /// Tools that depend on the learner settings start over when they change.
    fn follow_settings(&mut self, now: DateTime<Utc>) {
        let settings = self.profile.profile().settings();
        if self.chat.settings() != settings {
            self.chat.reset(settings, now);
        }
    }

    fn leave(&mut self, view: View, now: DateTime<Utc>) {
        match view {
            View::Game => self.quiz.reset(),
            View::Vocab => self.deck.reset(),
            View::Chat => {
                let settings = self.chat.settings();
                self.chat.reset(settings, now);
            }
            View::Grammar => self.grammar.reset(),
            View::Settings => {
                self.settings_draft = self.profile.profile().settings();
                self.settings_saved = false;
            }
            View::Dashboard => {}
        }
    }

    fn sign_out(&mut self, now: DateTime<Utc>) {
        let settings = LearnerSettings::default();
        self.router.reset();
        self.profile.reset();
        self.settings_draft = settings;
        self.settings_saved = false;
        self.quiz.reset();
        self.deck.reset();
        self.grammar.reset();
        self.chat.reset(settings, now);
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            view: self.router.current(),
            auth_screen: self.router.auth_screen(),
            app_language: self.language,
            auth: self.auth.view(self.language),
            profile: self.profile.profile().clone(),
            unsynced: self.profile.unsynced_fields(),
            settings_draft: self.settings_draft,
            settings_saved: self.settings_saved,
            quiz: self.quiz.view(),
            deck: self.deck.view(),
            chat: self.chat.view(),
            grammar: self.grammar.view(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, tsify::Tsify)]
#[tsify(into_wasm_abi, from_wasm_abi)]
pub struct Snapshot {
    pub view: View,
    pub auth_screen: AuthScreen,
    pub app_language: AppLanguage,
    pub auth: AuthView,
    pub profile: UserProfile,
    pub unsynced: Vec<ProfileField>,
    pub settings_draft: LearnerSettings,
    pub settings_saved: bool,
    pub quiz: QuizView,
    pub deck: DeckView,
    pub chat: ChatView,
    pub grammar: GrammarView,
}

pub struct App<A, B> {
    // we never hold a borrow across an .await, so "already borrowed" panics cannot happen
    state: RefCell<AppState>,
    listeners: RefCell<SlotMap<ListenerKey, Rc<dyn Fn()>>>,
    session_hook: RefCell<Option<Rc<dyn Fn(Option<&Session>)>>>,
    ai: A,
    backend: B,
}

/// Notifies listeners when dropped, whichever way the function returns.
struct NotifyLater<'a, A, B> {
    app: &'a App<A, B>,
}

impl<'a, A, B> NotifyLater<'a, A, B> {
    fn new(app: &'a App<A, B>) -> Self {
        Self { app }
    }
}

impl<A, B> Drop for NotifyLater<'_, A, B> {
    fn drop(&mut self) {
        self.app.notify();
    }
}

impl<A, B> App<A, B> {
    fn notify(&self) {
        // clone them out first: callbacks usually call straight back into the app
        let callbacks: Vec<_> = self.listeners.borrow().values().cloned().collect();
        for callback in callbacks {
            callback();
        }
    }

    pub fn subscribe(&self, callback: impl Fn() + 'static) -> ListenerKey {
        self.listeners.borrow_mut().insert(Rc::new(callback))
    }

    pub fn unsubscribe(&self, key: ListenerKey) {
        self.listeners.borrow_mut().remove(key);
    }

    /// Called with the new session on every sign-in, refresh and sign-out.
    pub fn on_session_change(&self, hook: impl Fn(Option<&Session>) + 'static) {
        *self.session_hook.borrow_mut() = Some(Rc::new(hook));
    }
}

impl<A: AiService, B: AuthBackend + ProfileBackend> App<A, B> {
    pub fn new(ai: A, backend: B) -> Self {
        Self {
            state: RefCell::new(AppState::new(Utc::now())),
            listeners: RefCell::new(SlotMap::with_key()),
            session_hook: RefCell::new(None),
            ai,
            backend,
        }
    }

    pub fn ai(&self) -> &A {
        &self.ai
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn snapshot(&self) -> Snapshot {
        self.state.borrow().snapshot()
    }

    pub fn with_state<R>(&self, f: impl FnOnce(&AppState) -> R) -> R {
        f(&self.state.borrow())
    }

    pub fn translate(&self, key: &str) -> String {
        i18n::lookup(self.state.borrow().language, key)
    }

    pub fn set_app_language(&self, language: AppLanguage) {
        let _notify = NotifyLater::new(self);
        self.state.borrow_mut().language = language;
    }

    pub fn toggle_app_language(&self) {
        let _notify = NotifyLater::new(self);
        let mut state = self.state.borrow_mut();
        state.language = state.language.toggled();
    }

    pub fn navigate(&self, view: View) {
        let _notify = NotifyLater::new(self);
        let mut state = self.state.borrow_mut();
        let previous = state.router.navigate(view);
        if previous != view {
            state.leave(previous, Utc::now());
        }
    }

    pub fn show_login(&self) {
        let _notify = NotifyLater::new(self);
        let mut state = self.state.borrow_mut();
        state.auth.clear_error();
        state.router.show_login();
    }

    pub fn show_sign_up(&self) {
        let _notify = NotifyLater::new(self);
        let mut state = self.state.borrow_mut();
        state.auth.clear_error();
        state.router.show_sign_up();
    }

    // ---- session ----

    /// Every session transition goes through here. A session for a new user
    /// loads its profile; a renewed token for the same user keeps what is in memory.
    pub async fn set_session(&self, session: Option<Session>) {
        let _notify = NotifyLater::new(self);
        let same_user = self.switch_session(session.clone());
        if let Some(session) = session
            && !same_user
            && let Err(e) = self.load_profile(&session).await
        {
            log::error!("Failed to fetch profile: {e}");
        }
    }

    /// Installs `session` and reports whether it belongs to the user already signed in.
    fn switch_session(&self, session: Option<Session>) -> bool {
        self.ai
            .set_access_token(session.as_ref().map(|s| s.access_token.clone()));
        let same_user = {
            let mut state = self.state.borrow_mut();
            let same_user = match (state.auth.session(), &session) {
                (Some(current), Some(new)) => current.user_id == new.user_id,
                _ => false,
            };
            let signed_out = session.is_none();
            state.auth.set_session(session.clone());
            if signed_out {
                state.sign_out(Utc::now());
            }
            same_user
        };
        let hook = self.session_hook.borrow().clone();
        if let Some(hook) = hook {
            hook(session.as_ref());
        }
        self.notify();
        same_user
    }

    async fn load_profile(&self, session: &Session) -> Result<(), BackendError> {
        let session = self.unexpired(session).await;
        let row = match self.backend.fetch_profile(&session).await {
            Err(e) if e.is_unauthorized() => match self.refresh_session(&session).await {
                Some(session) => self.backend.fetch_profile(&session).await,
                None => Err(e),
            },
            result => result,
        }?;

        let mut state = self.state.borrow_mut();
        let current_user = state.auth.session().map(|s| s.user_id.as_str());
        if current_user != Some(session.user_id.as_str()) {
            log::debug!("Discarding profile for a session that has since changed");
            return Ok(());
        }
        state.profile.replace(row);
        let settings = state.profile.profile().settings();
        state.settings_draft = settings;
        state.follow_settings(Utc::now());
        Ok(())
    }

    /// Retries the profile fetch if the one at sign-in failed. Returns whether
    /// this call loaded it.
    async fn ensure_loaded(&self) -> Result<bool, ProfileError> {
        let session = {
            let state = self.state.borrow();
            match state.auth.session() {
                Some(session) if !state.profile.is_loaded() => session.clone(),
                _ => return Ok(false),
            }
        };
        self.load_profile(&session)
            .await
            .map_err(ProfileError::Load)?;
        Ok(self.state.borrow().profile.is_loaded())
    }

    /// `session`, or a refreshed one if its access token has expired.
    async fn unexpired(&self, session: &Session) -> Session {
        if !session.is_expired(Utc::now().timestamp()) {
            return session.clone();
        }
        self.refresh_session(session)
            .await
            .unwrap_or_else(|| session.clone())
    }

    async fn refresh_session(&self, stale: &Session) -> Option<Session> {
        match self.backend.refresh(stale).await {
            Ok(session) => {
                log::info!("Refreshed session");
                self.switch_session(Some(session.clone()));
                Some(session)
            }
            Err(e @ BackendError::Status { .. }) => {
                // the refresh token itself was refused, nothing can renew this session
                log::warn!("Session refresh refused, signing out: {e}");
                self.switch_session(None);
                None
            }
            Err(e) => {
                log::warn!("Failed to refresh session: {e}");
                None
            }
        }
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<(), AuthError> {
        let _notify = NotifyLater::new(self);
        if !self.state.borrow_mut().auth.begin() {
            return Ok(());
        }
        self.notify();

        match self.backend.sign_in(email.trim(), password).await {
            Ok(session) => {
                self.state.borrow_mut().auth.finish();
                self.set_session(Some(session)).await;
                Ok(())
            }
            Err(e) => {
                let error = AuthError::from(e);
                self.state.borrow_mut().auth.fail(&error);
                Err(error)
            }
        }
    }

    pub async fn sign_up(
        &self,
        full_name: &str,
        email: &str,
        password: &str,
    ) -> Result<SignUpOutcome, AuthError> {
        let _notify = NotifyLater::new(self);
        if let Err(error) = auth::validate_full_name(full_name) {
            self.state.borrow_mut().auth.fail(&error);
            return Err(error);
        }
        if !self.state.borrow_mut().auth.begin() {
            return Ok(SignUpOutcome { session: None });
        }
        self.notify();

        match self
            .backend
            .sign_up(email.trim(), password, full_name.trim())
            .await
        {
            Ok(outcome) => {
                {
                    let mut state = self.state.borrow_mut();
                    state.auth.finish();
                    if outcome.session.is_none() {
                        state.auth.await_confirmation();
                        state.router.show_login();
                    }
                }
                if let Some(session) = outcome.session.clone() {
                    self.set_session(Some(session)).await;
                }
                Ok(outcome)
            }
            Err(e) => {
                let error = AuthError::from(e);
                self.state.borrow_mut().auth.fail(&error);
                Err(error)
            }
        }
    }

    /// The local session is dropped even if the backend call fails.
    pub async fn sign_out(&self) {
        let session = self.state.borrow().auth.session().cloned();
        if let Some(session) = &session
            && let Err(e) = self.backend.sign_out(session).await
        {
            log::warn!("Sign-out request failed: {e}");
        }
        self.set_session(None).await;
    }

    pub fn oauth_url(&self, redirect_to: &str) -> String {
        self.backend.oauth_url(OAUTH_PROVIDER, redirect_to)
    }

    // ---- profile ----

    /// Merges `update` right away, then writes the persistable part if there is a session.
    pub async fn update_profile(&self, update: ProfileUpdate) -> Result<SyncOutcome, ProfileError> {
        let _notify = NotifyLater::new(self);
        let (session, fields, row) = {
            let mut state = self.state.borrow_mut();
            let fields = state.profile.merge(&update);
            state.follow_settings(Utc::now());
            let Some(session) = state.auth.session().cloned() else {
                return Ok(SyncOutcome::LocalOnly);
            };
            if fields.is_empty() {
                return Ok(SyncOutcome::Unchanged);
            }
            let row = state.profile.row_update(&fields, Utc::now().to_rfc3339());
            (session, fields, row)
        };
        self.notify();
        self.write_profile(&session, &fields, row).await
    }

    /// Increments are only written on top of the stored profile. Until it
    /// has been loaded they are kept in memory and flagged as unsynced.
    pub async fn apply(&self, command: ProfileCommand) -> Result<SyncOutcome, ProfileError> {
        if command.is_increment() {
            match self.ensure_loaded().await {
                Ok(true) => {
                    if let Err(e) = self.retry_unsynced().await {
                        log::warn!("Replayed progress kept locally: {e}");
                    }
                }
                Ok(false) => {}
                Err(e) => {
                    let _notify = NotifyLater::new(self);
                    self.state.borrow_mut().profile.defer(&command);
                    return Err(e);
                }
            }
        }
        let update = self.state.borrow().profile.update_for(&command);
        self.update_profile(update).await
    }

    /// Sends the current values of every field a previous write failed to save.
    pub async fn retry_unsynced(&self) -> Result<SyncOutcome, ProfileError> {
        let _notify = NotifyLater::new(self);
        self.ensure_loaded().await?;
        let (session, fields, row) = {
            let state = self.state.borrow();
            let Some(session) = state.auth.session().cloned() else {
                return Ok(SyncOutcome::LocalOnly);
            };
            let fields = state.profile.unsynced_fields();
            if fields.is_empty() {
                return Ok(SyncOutcome::Unchanged);
            }
            let row = state.profile.row_update(&fields, Utc::now().to_rfc3339());
            (session, fields, row)
        };
        self.write_profile(&session, &fields, row).await
    }

    async fn write_profile(
        &self,
        session: &Session,
        fields: &[ProfileField],
        row: ProfileRowUpdate,
    ) -> Result<SyncOutcome, ProfileError> {
        let session = self.unexpired(session).await;
        let result = match self.backend.update_profile(&session, &row).await {
            Err(e) if e.is_unauthorized() => match self.refresh_session(&session).await {
                Some(session) => self.backend.update_profile(&session, &row).await,
                None => Err(e),
            },
            result => result,
        };
        match result {
            Ok(()) => {
                self.state.borrow_mut().profile.mark_synced(fields, &row);
                Ok(SyncOutcome::Persisted)
            }
            Err(e) => {
                log::error!("Failed to save profile fields {fields:?}: {e}");
                let mut state = self.state.borrow_mut();
                // a refused refresh may have signed out in the meantime
                if state.auth.session().is_some() {
                    state.profile.mark_unsynced(fields);
                }
                Err(ProfileError::Persist(e))
            }
        }
    }

    async fn report(&self, command: ProfileCommand) {
        if let Err(e) = self.apply(command).await {
            log::warn!("Progress kept locally: {e}");
        }
    }

    pub fn edit_settings(&self, settings: LearnerSettings) {
        let _notify = NotifyLater::new(self);
        let mut state = self.state.borrow_mut();
        state.settings_draft = settings;
        state.settings_saved = false;
    }

    pub async fn save_settings(&self) -> Result<SyncOutcome, ProfileError> {
        let _notify = NotifyLater::new(self);
        let draft = self.state.borrow().settings_draft;
        let result = self.apply(ProfileCommand::SetSettings(draft)).await;
        self.state.borrow_mut().settings_saved = result.is_ok();
        result
    }

    // ---- quiz ----

    pub async fn start_quiz(&self) {
        let _notify = NotifyLater::new(self);
        let (token, request) = {
            let mut state = self.state.borrow_mut();
            let Some(token) = state.quiz.begin_start() else {
                return;
            };
            (token, QuizRequest::from(state.profile.profile().settings()))
        };
        self.notify();

        let batch = self.ai.generate_quiz(&request).await;
        self.state.borrow_mut().quiz.complete_start(token, batch);
    }

    pub fn select_option(&self, option: &str) -> bool {
        let _notify = NotifyLater::new(self);
        self.state.borrow_mut().quiz.select_option(option)
    }

    /// Finishing a game credits its XP exactly once.
    pub async fn advance_quiz(&self) -> Option<QuizReward> {
        let _notify = NotifyLater::new(self);
        let reward = self.state.borrow_mut().quiz.advance()?;
        if reward.xp > 0 {
            self.report(ProfileCommand::AddXp(reward.xp)).await;
        }
        Some(reward)
    }

    pub fn quit_quiz(&self) {
        let _notify = NotifyLater::new(self);
        self.state.borrow_mut().quiz.quit();
    }

    // ---- flashcards ----

    pub async fn load_deck(&self, topic: &str) {
        let _notify = NotifyLater::new(self);
        let (token, request) = {
            let mut state = self.state.borrow_mut();
            let Some((token, topic)) = state.deck.begin_load(topic) else {
                return;
            };
            let settings = state.profile.profile().settings();
            let request = VocabRequest {
                target_language: settings.target_language,
                native_language: settings.native_language,
                topic,
            };
            (token, request)
        };
        self.notify();

        let cards = self.ai.generate_vocab(&request).await;
        let learned = self.state.borrow_mut().deck.complete_load(token, cards);
        if let Some(count) = learned {
            self.report(ProfileCommand::AddWordsLearned(count as u64))
                .await;
        }
    }

    pub fn next_card(&self) -> bool {
        let _notify = NotifyLater::new(self);
        self.state.borrow_mut().deck.next()
    }

    pub fn previous_card(&self) -> bool {
        let _notify = NotifyLater::new(self);
        self.state.borrow_mut().deck.previous()
    }

    pub fn flip_card(&self) {
        let _notify = NotifyLater::new(self);
        self.state.borrow_mut().deck.flip();
    }

    /// Fetches and decodes the current word. `Ok(None)` means the request was
    /// rejected because another clip is still loading, or there is no card.
    pub async fn speak(&self) -> Result<Option<PcmAudio>, AudioError> {
        let _notify = NotifyLater::new(self);
        let (token, request) = {
            let mut state = self.state.borrow_mut();
            let Some((token, word)) = state.deck.begin_speak() else {
                return Ok(None);
            };
            let language = state.profile.profile().target_language;
            (
                token,
                TtsRequest {
                    text: word,
                    language,
                },
            )
        };
        self.notify();

        let result = self.ai.synthesize_speech(&request).await;
        self.state.borrow_mut().deck.finish_speak(token);
        let bytes = result.map_err(|e| {
            log::error!("Speech synthesis failed: {e}");
            AudioError::Synthesis(e)
        })?;
        PcmAudio::from_speech(&bytes).map(Some)
    }

    // ---- chat ----

    pub async fn send_chat(&self, text: &str) {
        let _notify = NotifyLater::new(self);
        let Some((token, request)) = self.state.borrow_mut().chat.begin_send(text, Utc::now())
        else {
            return;
        };
        self.notify();

        let outcome = match self.ai.chat(&request).await {
            Ok(mut stream) => {
                let mut outcome = Ok(());
                while let Some(chunk) = stream.next().await {
                    match chunk {
                        Ok(chunk) => {
                            let applied = self.state.borrow_mut().chat.push_chunk(token, &chunk);
                            if !applied {
                                // the session was reset while streaming
                                return;
                            }
                            self.notify();
                        }
                        Err(e) => {
                            outcome = Err(e);
                            break;
                        }
                    }
                }
                outcome
            }
            Err(e) => Err(e),
        };

        let xp = self
            .state
            .borrow_mut()
            .chat
            .finish(token, outcome, Utc::now());
        if let Some(xp) = xp {
            self.report(ProfileCommand::AddXp(xp)).await;
        }
    }

    // ---- grammar ----

    pub async fn explain_grammar(&self, topic: &str) {
        let _notify = NotifyLater::new(self);
        let (token, request) = {
            let mut state = self.state.borrow_mut();
            let Some((token, topic)) = state.grammar.begin_lookup(topic) else {
                return;
            };
            let settings = state.profile.profile().settings();
            let request = GrammarRequest {
                target_language: settings.target_language,
                native_language: settings.native_language,
                topic,
            };
            (token, request)
        };
        self.notify();

        let result = self.ai.explain_grammar(&request).await;
        self.state
            .borrow_mut()
            .grammar
            .complete_lookup(token, result);
    }
}
