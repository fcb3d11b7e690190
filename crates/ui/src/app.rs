use chirp_client::{ChatClient, SettingsStore};
use gpui::*;
use gpui_component::notification::{Notification, NotificationList};
use gpui_component::{
    ActiveTheme, IconName, Sizable,
    button::{Button, ButtonVariants},
    label::Label,
    v_flex,
};
use gpui_tokio_bridge::Tokio;

use crate::chat::{ChatView, LoginRequested, SignOutRequested, ThemeToggleRequested};
use crate::error::{UiResult, settle};
use crate::login::LoginView;
use crate::theme::{apply_theme, toggled};

gpui::actions!(shell, [Quit]);

/// What the window currently shows. A chat screen exists only while a
/// session does; `SigningOut` covers the offline write and identity sign-out.
enum Screen {
    Connecting,
    Unavailable(String),
    Login(Entity<LoginView>),
    Chat(Entity<ChatView>),
    SigningOut,
}

impl Screen {
    /// A new login starts only from the login form with no auth call in flight.
    fn accepts_sign_in(&self, auth_pending: bool) -> bool {
        matches!(self, Self::Login(_)) && !auth_pending
    }
}

/// Root view: opens the backend, then switches between the login form and
/// the chat surface as sessions come and go.
pub struct ChirpAppShell {
    notification_list: Entity<NotificationList>,
    settings: SettingsStore,
    client: Option<ChatClient>,
    screen: Screen,
    connect_task: Option<Task<()>>,
    auth_task: Option<Task<()>>,
}

impl ChirpAppShell {
    pub fn new(
        settings: SettingsStore,
        notification_list: Entity<NotificationList>,
        window: &mut Window,
        cx: &mut Context<Self>,
    ) -> Self {
        let mut shell = Self {
            notification_list,
            settings,
            client: None,
            screen: Screen::Connecting,
            connect_task: None,
            auth_task: None,
        };
        shell.connect(window, cx);
        shell
    }

    fn connect(&mut self, window: &mut Window, cx: &mut Context<Self>) {
        self.screen = Screen::Connecting;
        let settings = self.settings.settings();
        let task = Tokio::spawn(cx, async move { ChatClient::connect(&settings).await });
        self.connect_task = Some(cx.spawn_in(window, async move |this, cx| {
            let result = settle(task.await, "shell-connect");
            let _ = this.update_in(cx, |this, window, cx| {
                this.finish_connect(result, window, cx);
            });
        }));
        cx.notify();
    }

    fn finish_connect(
        &mut self,
        result: UiResult<ChatClient>,
        window: &mut Window,
        cx: &mut Context<Self>,
    ) {
        self.connect_task = None;
        match result {
            Ok(client) => {
                self.client = Some(client);
                self.show_login(window, cx);
            }
            Err(error) => {
                tracing::error!(error = %error, "backend unavailable");
                self.screen = Screen::Unavailable(error.to_string());
                cx.notify();
            }
        }
    }

    fn show_login(&mut self, window: &mut Window, cx: &mut Context<Self>) {
        let settings = self.settings.settings();
        let login = cx.new(|cx| LoginView::new(settings.prefill_email(), window, cx));
        cx.subscribe_in(
            &login,
            window,
            |this, _, event: &LoginRequested, window, cx| {
                this.sign_in(event.clone(), window, cx);
            },
        )
        .detach();

        self.screen = Screen::Login(login);
        cx.notify();
    }

    fn sign_in(&mut self, request: LoginRequested, window: &mut Window, cx: &mut Context<Self>) {
        if !self.screen.accepts_sign_in(self.auth_task.is_some()) {
            return;
        }
        let Some(client) = self.client.clone() else {
            return;
        };

        let LoginRequested { email, password } = request;
        let task = Tokio::spawn(cx, async move { client.sign_in(&email, &password).await });
        self.auth_task = Some(cx.spawn_in(window, async move |this, cx| {
            let result = settle(task.await, "shell-sign-in");
            let _ = this.update_in(cx, |this, window, cx| {
                this.finish_sign_in(result, window, cx);
            });
        }));
    }

    fn finish_sign_in(
        &mut self,
        result: UiResult<chirp_client::SignInOutcome>,
        window: &mut Window,
        cx: &mut Context<Self>,
    ) {
        self.auth_task = None;
        let Screen::Login(login) = &self.screen else {
            return;
        };

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(error) => {
                login.update(cx, |login, cx| login.fail(error.to_string(), cx));
                return;
            }
        };
        login.update(cx, |login, cx| login.finish(cx));

        if let Err(error) = self.settings.remember_email(outcome.session.sender_label()) {
            tracing::warn!(error = %error, "failed to remember email");
        }
        if let Some(error) = outcome.presence_error {
            self.push_warning(
                format!("Signed in, but presence is unavailable: {error}"),
                window,
                cx,
            );
        }

        self.show_chat(outcome.session, window, cx);
    }

    fn show_chat(
        &mut self,
        session: chirp_client::Session,
        window: &mut Window,
        cx: &mut Context<Self>,
    ) {
        let Some(client) = self.client.clone() else {
            return;
        };

        let chat = cx.new(|cx| ChatView::new(client, session, window, cx));
        cx.subscribe_in(
            &chat,
            window,
            |this, chat, _: &SignOutRequested, window, cx| {
                this.sign_out(chat.clone(), window, cx);
            },
        )
        .detach();
        cx.subscribe_in(
            &chat,
            window,
            |this, _, _: &ThemeToggleRequested, window, cx| {
                this.toggle_theme(window, cx);
            },
        )
        .detach();

        self.screen = Screen::Chat(chat);
        cx.notify();
    }

    /// The login form only comes back once the offline write and identity
    /// sign-out have settled.
    fn sign_out(&mut self, chat: Entity<ChatView>, window: &mut Window, cx: &mut Context<Self>) {
        if self.auth_task.is_some() {
            return;
        }
        let Some(client) = self.client.clone() else {
            return;
        };
        let Some(session) = chat.update(cx, |chat, cx| chat.release_session(cx)) else {
            return;
        };

        self.screen = Screen::SigningOut;
        cx.notify();

        let task = Tokio::spawn(cx, async move { client.sign_out(session).await });
        self.auth_task = Some(cx.spawn_in(window, async move |this, cx| {
            let result = settle(task.await, "shell-sign-out");
            let _ = this.update_in(cx, |this, window, cx| {
                this.finish_sign_out(result, window, cx);
            });
        }));
    }

    fn finish_sign_out(
        &mut self,
        result: UiResult<()>,
        window: &mut Window,
        cx: &mut Context<Self>,
    ) {
        self.auth_task = None;
        if let Err(error) = result {
            tracing::warn!(error = %error, "sign-out did not complete");
            self.push_warning(format!("Sign-out did not complete: {error}"), window, cx);
        }
        self.show_login(window, cx);
    }

    fn toggle_theme(&mut self, window: &mut Window, cx: &mut Context<Self>) {
        let mut next = (*self.settings.settings()).clone();
        next.theme_mode = toggled(next.theme_mode);
        apply_theme(next.theme_mode, Some(window), cx);

        if let Err(error) = self.settings.update(next) {
            tracing::warn!(error = %error, "failed to save theme preference");
        }
    }

    fn push_warning(&mut self, message: String, window: &mut Window, cx: &mut Context<Self>) {
        self.notification_list.update(cx, |list, cx| {
            list.push(Notification::warning(message), window, cx);
        });
    }
}

impl Render for ChirpAppShell {
    fn render(&mut self, _window: &mut Window, cx: &mut Context<Self>) -> impl IntoElement {
        let theme = cx.theme();

        let content = match &self.screen {
            Screen::Connecting => v_flex()
                .id("shell-connecting")
                .size_full()
                .items_center()
                .justify_center()
                .child(
                    Label::new("Connecting…")
                        .text_sm()
                        .text_color(theme.muted_foreground),
                )
                .into_any_element(),
            Screen::Unavailable(message) => v_flex()
                .id("shell-unavailable")
                .size_full()
                .items_center()
                .justify_center()
                .gap_3()
                .child(Label::new(message.clone()).text_sm().text_color(theme.danger))
                .child(
                    Button::new("shell-retry")
                        .small()
                        .primary()
                        .icon(IconName::Redo)
                        .child("Retry")
                        .on_click(cx.listener(|this, _, window, cx| {
                            this.connect(window, cx);
                        })),
                )
                .into_any_element(),
            Screen::SigningOut => v_flex()
                .id("shell-signing-out")
                .size_full()
                .items_center()
                .justify_center()
                .child(
                    Label::new("Signing out…")
                        .text_sm()
                        .text_color(theme.muted_foreground),
                )
                .into_any_element(),
            Screen::Login(login) => login.clone().into_any_element(),
            Screen::Chat(chat) => chat.clone().into_any_element(),
        };

        div()
            .size_full()
            .relative()
            .bg(theme.background)
            .child(content)
            .child(self.notification_list.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[::core::prelude::v1::test]
    fn no_login_while_signing_out() {
        assert!(!Screen::SigningOut.accepts_sign_in(false));
        assert!(!Screen::SigningOut.accepts_sign_in(true));
        assert!(!Screen::Connecting.accepts_sign_in(false));
        assert!(!Screen::Unavailable("offline".to_string()).accepts_sign_in(false));
    }
}
