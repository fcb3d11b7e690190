use chirp_backend::ChatDocument;

use super::composer::Composer;
use super::feed::FeedSubscriber;
use super::session::Session;

/// Login form state: the two fields, the in-flight flag and the last error.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoginForm {
    pub email: String,
    pub password: String,
    loading: bool,
    error: Option<String>,
}

impl LoginForm {
    pub fn new(prefill_email: Option<&str>) -> Self {
        Self {
            email: prefill_email.unwrap_or_default().to_string(),
            ..Self::default()
        }
    }

    /// Starts a submission and hands back the credentials, unless one is
    /// already in flight.
    pub fn begin_submit(&mut self) -> Option<(String, String)> {
        if self.loading {
            return None;
        }

        self.loading = true;
        self.error = None;
        Some((self.email.trim().to_string(), self.password.clone()))
    }

    /// Ends the submission with a message shown verbatim under the form.
    pub fn fail(&mut self, message: impl Into<String>) {
        self.loading = false;
        self.error = Some(message.into());
    }

    pub fn finish(&mut self) {
        self.loading = false;
        self.error = None;
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }
}

/// Everything the signed-in screen renders.
#[derive(Debug)]
pub struct ChatSurface {
    session: Session,
    feed: FeedSubscriber,
    composer: Composer,
    pending_scroll_to_bottom: bool,
}

impl ChatSurface {
    pub fn new(session: Session) -> Self {
        Self {
            session,
            feed: FeedSubscriber::new(),
            composer: Composer::new(),
            pending_scroll_to_bottom: false,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut Session {
        &mut self.session
    }

    pub fn feed(&self) -> &FeedSubscriber {
        &self.feed
    }

    pub fn feed_mut(&mut self) -> &mut FeedSubscriber {
        &mut self.feed
    }

    pub fn composer(&self) -> &Composer {
        &self.composer
    }

    pub fn composer_mut(&mut self) -> &mut Composer {
        &mut self.composer
    }

    /// Applies a feed snapshot and, if it landed, asks the list to scroll to
    /// the newest message.
    pub fn apply_snapshot(&mut self, snapshot: Vec<ChatDocument>) -> bool {
        let applied = self.feed.apply_snapshot(snapshot);
        if applied {
            self.pending_scroll_to_bottom = true;
        }
        applied
    }

    pub fn clear_local_feed(&mut self) {
        self.feed.clear_window();
        self.pending_scroll_to_bottom = true;
    }

    pub fn pending_scroll_to_bottom(&self) -> bool {
        self.pending_scroll_to_bottom
    }

    /// Consumes the scroll request raised by the last feed update.
    pub fn take_scroll_request(&mut self) -> bool {
        std::mem::take(&mut self.pending_scroll_to_bottom)
    }

    /// Unmounts the feed and releases the session.
    pub fn into_session(mut self) -> Session {
        self.feed.unmount();
        self.session
    }
}

/// Top-level screen: login form without a session, chat surface with one.
#[derive(Debug)]
pub enum ViewState {
    LoggedOut(LoginForm),
    LoggedIn(Box<ChatSurface>),
}

impl ViewState {
    pub fn logged_out(prefill_email: Option<&str>) -> Self {
        Self::LoggedOut(LoginForm::new(prefill_email))
    }

    pub fn is_logged_in(&self) -> bool {
        matches!(self, Self::LoggedIn(_))
    }

    pub fn session(&self) -> Option<&Session> {
        match self {
            Self::LoggedIn(surface) => Some(surface.session()),
            Self::LoggedOut(_) => None,
        }
    }

    pub fn sign_in(&mut self, session: Session) {
        *self = Self::LoggedIn(Box::new(ChatSurface::new(session)));
    }

    /// Returns to the login form, handing back the session for teardown.
    pub fn sign_out(&mut self, prefill_email: Option<&str>) -> Option<Session> {
        match std::mem::replace(self, Self::logged_out(prefill_email)) {
            Self::LoggedIn(surface) => Some(surface.into_session()),
            Self::LoggedOut(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use chirp_backend::{AuthUser, UserId};

    use super::*;

    fn session() -> Session {
        Session::new(
            AuthUser {
                uid: UserId::new_v7(),
                email: "lin@example.com".to_string(),
            },
            None,
        )
    }

    #[test]
    fn login_form_rejects_double_submit() {
        let mut form = LoginForm::new(Some("lin@example.com"));
        form.password = "secret".to_string();

        let credentials = form.begin_submit().expect("first submit");
        assert_eq!(credentials, ("lin@example.com".to_string(), "secret".to_string()));
        assert!(form.is_loading());
        assert_eq!(form.begin_submit(), None);

        form.fail("Invalid email or password.");
        assert!(!form.is_loading());
        assert_eq!(form.error(), Some("Invalid email or password."));

        assert!(form.begin_submit().is_some());
        assert_eq!(form.error(), None);
    }

    #[test]
    fn view_follows_session_presence() {
        let mut view = ViewState::logged_out(None);
        assert!(!view.is_logged_in());
        assert!(view.session().is_none());

        view.sign_in(session());
        assert!(view.is_logged_in());
        assert_eq!(
            view.session().map(|session| session.sender_label()),
            Some("lin@example.com")
        );

        let released = view.sign_out(Some("lin@example.com"));
        assert!(released.is_some());
        match &view {
            ViewState::LoggedOut(form) => assert_eq!(form.email, "lin@example.com"),
            ViewState::LoggedIn(_) => panic!("expected the login form"),
        }
        assert!(view.sign_out(None).is_none());
    }

    #[test]
    fn clearing_the_feed_requests_a_scroll() {
        let mut surface = ChatSurface::new(session());
        assert!(!surface.apply_snapshot(Vec::new()));
        assert!(!surface.take_scroll_request());

        surface.clear_local_feed();
        assert!(surface.take_scroll_request());
        assert!(!surface.pending_scroll_to_bottom());
    }
}
