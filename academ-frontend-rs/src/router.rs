use serde::{Deserialize, Serialize};

#[derive(
    Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize, tsify::Tsify,
)]
#[tsify(into_wasm_abi, from_wasm_abi)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum View {
    #[default]
    Dashboard,
    Chat,
    Vocab,
    Grammar,
    Game,
    Settings,
}

impl View {
    pub fn label_key(&self) -> &'static str {
        match self {
            View::Dashboard => "sidebar.dashboard",
            View::Chat => "sidebar.chat",
            View::Vocab => "sidebar.vocab",
            View::Grammar => "sidebar.grammar",
            View::Game => "sidebar.game",
            View::Settings => "sidebar.settings",
        }
    }
}

pub const SIDEBAR_VIEWS: &[View] = &[
    View::Dashboard,
    View::Chat,
    View::Vocab,
    View::Grammar,
    View::Game,
    View::Settings,
];

pub const MOBILE_VIEWS: &[View] = &[View::Dashboard, View::Chat, View::Vocab, View::Game];

/// Which form a signed-out visitor sees.
#[derive(
    Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize, tsify::Tsify,
)]
#[tsify(into_wasm_abi, from_wasm_abi)]
pub enum AuthScreen {
    #[default]
    Login,
    SignUp,
}

#[derive(Clone, Debug, Default)]
pub struct Router {
    current: View,
    auth_screen: AuthScreen,
}

impl Router {
    pub fn current(&self) -> View {
        self.current
    }

    pub fn auth_screen(&self) -> AuthScreen {
        self.auth_screen
    }

    /// Replaces the current view and returns the one that was showing.
    pub fn navigate(&mut self, view: View) -> View {
        std::mem::replace(&mut self.current, view)
    }

    pub fn show_login(&mut self) {
        self.auth_screen = AuthScreen::Login;
    }

    pub fn show_sign_up(&mut self) {
        self.auth_screen = AuthScreen::SignUp;
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
