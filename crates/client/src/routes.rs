//! Screens and the authentication guard between them.

/// The screens of the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Login,
    Register,
    Chat,
}

impl Route {
    /// Map a path to a screen. The root path leads to the chat.
    pub fn from_path(path: &str) -> Option<Route> {
        match path.trim_end_matches('/') {
            "" => Some(Route::Chat),
            "/login" => Some(Route::Login),
            "/register" => Some(Route::Register),
            "/chat" => Some(Route::Chat),
            _ => None,
        }
    }

    pub fn path(&self) -> &'static str {
        match self {
            Route::Login => "/login",
            Route::Register => "/register",
            Route::Chat => "/chat",
        }
    }

    /// Where a visit to `self` actually lands.
    ///
    /// Signed-in users skip the auth screens; everyone else is sent to login
    /// before they can reach the chat.
    pub fn resolve(self, authenticated: bool) -> Route {
        match (self, authenticated) {
            (Route::Login | Route::Register, true) => Route::Chat,
            (Route::Chat, false) => Route::Login,
            (route, _) => route,
        }
    }
}
