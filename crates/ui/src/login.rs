use chirp_client::LoginForm;
use gpui::prelude::FluentBuilder as _;
use gpui::*;
use gpui_component::{
    ActiveTheme, IconName, Sizable,
    button::{Button, ButtonVariants},
    input::{Input, InputEvent, InputState},
    v_flex,
};

use crate::chat::LoginRequested;

const LOGIN_CARD_WIDTH: Pixels = px(360.);

/// Email/password form shown whenever there is no session.
pub struct LoginView {
    email_input: Entity<InputState>,
    password_input: Entity<InputState>,
    form: LoginForm,
}

impl EventEmitter<LoginRequested> for LoginView {}

impl LoginView {
    pub fn new(prefill_email: Option<&str>, window: &mut Window, cx: &mut Context<Self>) -> Self {
        let form = LoginForm::new(prefill_email);
        let prefill = form.email.clone();

        let email_input = cx.new(|cx| {
            let mut state = InputState::new(window, cx).placeholder("Email");
            state.set_value(prefill, window, cx);
            state
        });
        let password_input = cx.new(|cx| {
            InputState::new(window, cx)
                .placeholder("Password")
                .masked(true)
        });

        for input in [&email_input, &password_input] {
            cx.subscribe_in(input, window, |this, _, event: &InputEvent, _window, cx| {
                if let InputEvent::PressEnter { .. } = event {
                    this.submit(cx);
                }
            })
            .detach();
        }

        Self {
            email_input,
            password_input,
            form,
        }
    }

    pub fn is_loading(&self) -> bool {
        self.form.is_loading()
    }

    /// Ends the pending attempt and shows `message` under the form.
    pub fn fail(&mut self, message: impl Into<String>, cx: &mut Context<Self>) {
        self.form.fail(message);
        cx.notify();
    }

    pub fn finish(&mut self, cx: &mut Context<Self>) {
        self.form.finish();
        cx.notify();
    }

    fn submit(&mut self, cx: &mut Context<Self>) {
        self.form.email = self.email_input.read(cx).value().to_string();
        self.form.password = self.password_input.read(cx).value().to_string();

        let Some((email, password)) = self.form.begin_submit() else {
            return;
        };

        tracing::debug!(email = %email, "login submitted");
        cx.emit(LoginRequested { email, password });
        cx.notify();
    }
}

impl Render for LoginView {
    fn render(&mut self, _window: &mut Window, cx: &mut Context<Self>) -> impl IntoElement {
        let theme = cx.theme();
        let loading = self.form.is_loading();
        let error = self.form.error().map(str::to_string);

        v_flex()
            .id("login-view")
            .size_full()
            .items_center()
            .justify_center()
            .bg(theme.background)
            .child(
                v_flex()
                    .id("login-card")
                    .w(LOGIN_CARD_WIDTH)
                    .gap_3()
                    .p_6()
                    .rounded_lg()
                    .border_1()
                    .border_color(theme.border)
                    .bg(theme.background)
                    .child(div().text_xl().child("Sign in to Chirp"))
                    .child(Input::new(&self.email_input).w_full().disabled(loading))
                    .child(Input::new(&self.password_input).w_full().disabled(loading))
                    .when_some(error, |card, error| {
                        card.child(
                            div()
                                .id("login-error")
                                .text_sm()
                                .text_color(theme.danger)
                                .child(error),
                        )
                    })
                    .child(
                        Button::new("login-submit")
                            .small()
                            .primary()
                            .icon(IconName::ArrowRight)
                            .child(if loading { "Signing in…" } else { "Sign in" })
                            .on_click(cx.listener(|this, _, _window, cx| {
                                this.submit(cx);
                            })),
                    ),
            )
    }
}
