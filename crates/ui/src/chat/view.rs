use chirp_backend::{ChatDocument, PresenceRecord, SnapshotStream, SnapshotSubscription};
use chirp_client::{
    ChatClient, ChatMessage, ChatSurface, ClearReport, ClientResult, EMOJI_PALETTE, Session,
    TYPING_INDICATOR_LABEL,
};
use gpui::prelude::FluentBuilder as _;
use gpui::*;
use gpui_component::{
    ActiveTheme, IconName, Sizable,
    button::{Button, ButtonVariants},
    h_flex,
    label::Label,
    v_flex,
};
use gpui_tokio_bridge::{JoinError, Tokio};

use crate::chat::events::{
    ComposeSubmitted, ComposerEdited, EmojiPickerToggled, SignOutRequested, ThemeToggleRequested,
};
use crate::chat::{ComposerInput, MessageList};
use crate::error::{UiResult, settle};

/// Signed-in screen: header, live message list, typing indicator, emoji
/// palette and composer.
pub struct ChatView {
    client: ChatClient,
    surface: Option<ChatSurface>,
    message_list: Entity<MessageList>,
    composer_input: Entity<ComposerInput>,
    presence: Option<PresenceRecord>,
    notice: Option<String>,
    sending: bool,
    clearing: bool,
    feed_worker_task: Option<Task<Result<(), JoinError>>>,
    feed_reader_task: Option<Task<()>>,
    presence_task: Option<Task<()>>,
    send_task: Option<Task<()>>,
    clear_task: Option<Task<()>>,
}

impl EventEmitter<SignOutRequested> for ChatView {}
impl EventEmitter<ThemeToggleRequested> for ChatView {}

impl ChatView {
    pub fn new(
        client: ChatClient,
        session: Session,
        window: &mut Window,
        cx: &mut Context<Self>,
    ) -> Self {
        let sender = session.sender_label().to_string();
        let message_list = cx.new(|cx| MessageList::new(sender, cx));
        let composer_input = cx.new(|cx| ComposerInput::new(window, cx));

        cx.subscribe(&composer_input, |this, _, event: &ComposerEdited, cx| {
            this.handle_composer_edited(event, cx);
        })
        .detach();
        cx.subscribe(&composer_input, |this, _, _: &EmojiPickerToggled, cx| {
            this.toggle_emoji_picker(cx);
        })
        .detach();
        cx.subscribe_in(
            &composer_input,
            window,
            |this, _, _: &ComposeSubmitted, window, cx| {
                this.send_message(window, cx);
            },
        )
        .detach();

        let mut view = Self {
            client,
            surface: Some(ChatSurface::new(session)),
            message_list,
            composer_input,
            presence: None,
            notice: None,
            sending: false,
            clearing: false,
            feed_worker_task: None,
            feed_reader_task: None,
            presence_task: None,
            send_task: None,
            clear_task: None,
        };
        view.mount_feed(cx);
        view.refresh_presence(cx);
        view
    }

    /// Tears down the feed and hands the session back for sign-out.
    pub fn release_session(&mut self, cx: &mut Context<Self>) -> Option<Session> {
        self.feed_reader_task = None;
        self.feed_worker_task = None;
        self.presence_task = None;
        self.send_task = None;
        self.clear_task = None;
        cx.notify();
        self.surface.take().map(ChatSurface::into_session)
    }

    fn mount_feed(&mut self, cx: &mut Context<Self>) {
        let Some(surface) = self.surface.as_mut() else {
            return;
        };

        match self.client.subscribe_feed(surface.feed_mut()) {
            Ok(SnapshotSubscription { stream, worker }) => {
                self.feed_worker_task = Some(Tokio::spawn(cx, worker));
                self.spawn_feed_reader(stream, cx);
            }
            Err(error) => {
                tracing::warn!(error = %error, "feed subscription failed");
                self.notice = Some(error.to_string());
            }
        }
    }

    fn spawn_feed_reader(&mut self, mut stream: SnapshotStream, cx: &mut Context<Self>) {
        self.feed_reader_task = Some(cx.spawn(async move |this, cx| {
            while let Some(snapshot) = stream.recv().await {
                let _ = this.update(cx, |this, cx| {
                    this.apply_snapshot(snapshot, cx);
                });
            }

            let _ = this.update(cx, |this, _cx| {
                this.feed_worker_task = None;
                tracing::debug!("feed stream closed");
            });
        }));
    }

    fn apply_snapshot(&mut self, snapshot: Vec<ChatDocument>, cx: &mut Context<Self>) {
        let Some(surface) = self.surface.as_mut() else {
            return;
        };

        if surface.apply_snapshot(snapshot) {
            self.sync_message_list(cx);
        }
    }

    fn sync_message_list(&mut self, cx: &mut Context<Self>) {
        let Some(surface) = self.surface.as_mut() else {
            return;
        };

        if surface.take_scroll_request() {
            let window = surface.feed().window();
            self.message_list
                .update(cx, |list, cx| list.sync_window(window, cx));
        }
        cx.notify();
    }

    fn refresh_presence(&mut self, cx: &mut Context<Self>) {
        let Some(surface) = self.surface.as_ref() else {
            return;
        };

        let uid = surface.session().uid();
        let presence = self.client.presence().clone();
        let task = Tokio::spawn(cx, async move { presence.presence_of(uid).await });
        self.presence_task = Some(cx.spawn(async move |this, cx| {
            let result = settle(task.await, "chat-view-refresh-presence");
            let _ = this.update(cx, |this, cx| {
                match result {
                    Ok(record) => this.presence = record,
                    Err(error) => tracing::warn!(error = %error, "presence lookup failed"),
                }
                this.presence_task = None;
                cx.notify();
            });
        }));
    }

    fn handle_composer_edited(&mut self, event: &ComposerEdited, cx: &mut Context<Self>) {
        let Some(surface) = self.surface.as_mut() else {
            return;
        };

        let composer = surface.composer_mut();
        // Echo of our own `set_text`.
        if composer.text() == event.text {
            return;
        }
        composer.set_text(event.text.clone());
        cx.notify();
    }

    fn toggle_emoji_picker(&mut self, cx: &mut Context<Self>) {
        if let Some(surface) = self.surface.as_mut() {
            surface.composer_mut().toggle_emoji_picker();
            cx.notify();
        }
    }

    fn pick_emoji(&mut self, emoji: &str, window: &mut Window, cx: &mut Context<Self>) {
        let Some(surface) = self.surface.as_mut() else {
            return;
        };

        let composer = surface.composer_mut();
        composer.insert_emoji(emoji);
        let text = composer.text().to_string();
        self.composer_input
            .update(cx, |input, cx| input.set_text(text, window, cx));
        cx.notify();
    }

    fn send_message(&mut self, window: &mut Window, cx: &mut Context<Self>) {
        if self.sending {
            return;
        }
        let Some(surface) = self.surface.as_ref() else {
            return;
        };

        let message = match self.client.prepare_send(surface) {
            Ok(Some(message)) => message,
            Ok(None) => return,
            Err(error) => {
                self.notice = Some(send_failure_notice(&error, false));
                cx.notify();
                return;
            }
        };

        self.sending = true;
        self.composer_input
            .update(cx, |input, cx| input.set_sending(true, cx));

        let client = self.client.clone();
        let task = Tokio::spawn(cx, async move { client.post_message(message).await });
        self.send_task = Some(cx.spawn_in(window, async move |this, cx| {
            let result = task.await;
            let _ = this.update_in(cx, |this, window, cx| {
                this.finish_send(result, window, cx);
            });
        }));
        cx.notify();
    }

    fn finish_send(
        &mut self,
        result: Result<ClientResult<ChatMessage>, JoinError>,
        window: &mut Window,
        cx: &mut Context<Self>,
    ) {
        self.sending = false;
        self.send_task = None;
        self.composer_input
            .update(cx, |input, cx| input.set_sending(false, cx));
        let Some(surface) = self.surface.as_mut() else {
            return;
        };

        let client = self.client.clone();
        let outcome = settle(
            result.map(|sent| client.commit_send(surface, sent)),
            "chat-view-send-message",
        );
        match outcome {
            Ok(_) => {
                self.notice = None;
                self.composer_input
                    .update(cx, |input, cx| input.set_text("", window, cx));
            }
            // The draft stays in the composer for a manual resend.
            Err(error) => {
                let session_valid = surface.session().is_valid();
                self.notice = Some(send_failure_notice(&error, session_valid));
            }
        }
        cx.notify();
    }

    fn clear_chat(&mut self, cx: &mut Context<Self>) {
        if self.clearing || self.surface.is_none() {
            return;
        }

        self.clearing = true;
        let client = self.client.clone();
        let task = Tokio::spawn(cx, async move { client.clear_chat().await });
        self.clear_task = Some(cx.spawn(async move |this, cx| {
            let result = settle(task.await, "chat-view-clear-chat");
            let _ = this.update(cx, |this, cx| {
                this.finish_clear(result, cx);
            });
        }));
        cx.notify();
    }

    fn finish_clear(&mut self, result: UiResult<ClearReport>, cx: &mut Context<Self>) {
        self.clearing = false;
        self.clear_task = None;

        match result {
            Ok(report) => {
                if let Some(surface) = self.surface.as_mut() {
                    surface.clear_local_feed();
                }
                self.notice = clear_notice(report);
                self.sync_message_list(cx);
            }
            Err(error) => {
                self.notice = Some(format!("Could not clear the chat: {error}"));
                cx.notify();
            }
        }
    }

    fn dismiss_notice(&mut self, cx: &mut Context<Self>) {
        self.notice = None;
        cx.notify();
    }
}

fn clear_notice(report: ClearReport) -> Option<String> {
    if report.failed == 0 {
        return None;
    }

    Some(format!(
        "Cleared {} of {} messages; {} could not be deleted.",
        report.deleted, report.requested, report.failed
    ))
}

fn send_failure_notice(error: &dyn std::fmt::Display, session_valid: bool) -> String {
    if session_valid {
        format!("Message not sent: {error}")
    } else {
        "Your session has ended. Sign in again to send messages.".to_string()
    }
}

fn presence_label(record: Option<PresenceRecord>) -> &'static str {
    match record {
        Some(PresenceRecord { online: true, .. }) => "Online",
        Some(PresenceRecord { online: false, .. }) => "Offline",
        None => "Unknown",
    }
}

impl ChatView {
    fn render_header(&self, cx: &mut Context<Self>) -> AnyElement {
        let theme = cx.theme();
        let email = self
            .surface
            .as_ref()
            .map(|surface| surface.session().sender_label().to_string())
            .unwrap_or_default();
        let theme_icon = if theme.mode.is_dark() {
            IconName::Sun
        } else {
            IconName::Moon
        };
        let online = self.presence.is_some_and(|record| record.online);
        let badge_color = if online {
            theme.success
        } else {
            theme.muted_foreground
        };

        h_flex()
            .id("chat-view-header")
            .w_full()
            .flex_shrink_0()
            .items_center()
            .justify_between()
            .gap_2()
            .px_4()
            .py_2()
            .border_b_1()
            .border_color(theme.border)
            .child(
                h_flex()
                    .gap_2()
                    .items_center()
                    .min_w_0()
                    .child(Label::new(format!("Welcome, {email}")).text_sm())
                    .child(
                        h_flex()
                            .id("chat-view-presence")
                            .gap_1()
                            .items_center()
                            .px_2()
                            .py_1()
                            .rounded_full()
                            .bg(theme.muted)
                            .border_1()
                            .border_color(theme.border)
                            .child(div().size(px(8.)).rounded_full().bg(badge_color))
                            .child(
                                Label::new(presence_label(self.presence))
                                    .text_xs()
                                    .text_color(theme.muted_foreground),
                            ),
                    ),
            )
            .child(
                h_flex()
                    .gap_2()
                    .items_center()
                    .child(
                        Button::new("toggle-theme")
                            .ghost()
                            .small()
                            .icon(theme_icon)
                            .on_click(cx.listener(|_, _, _window, cx| {
                                cx.emit(ThemeToggleRequested);
                            })),
                    )
                    .child(
                        Button::new("clear-chat")
                            .small()
                            .danger()
                            .icon(IconName::Delete)
                            .child(if self.clearing {
                                "Clearing…"
                            } else {
                                "Clear Chat"
                            })
                            .on_click(cx.listener(|this, _, _window, cx| {
                                this.clear_chat(cx);
                            })),
                    )
                    .child(
                        Button::new("sign-out")
                            .small()
                            .ghost()
                            .child("Sign out")
                            .on_click(cx.listener(|_, _, _window, cx| {
                                cx.emit(SignOutRequested);
                            })),
                    ),
            )
            .into_any_element()
    }

    fn render_emoji_palette(&self, cx: &mut Context<Self>) -> AnyElement {
        let theme = cx.theme();

        h_flex()
            .id("emoji-palette")
            .w_full()
            .flex_wrap()
            .gap_1()
            .px_3()
            .py_2()
            .border_t_1()
            .border_color(theme.border)
            .children(EMOJI_PALETTE.iter().enumerate().map(|(index, emoji)| {
                let emoji: &'static str = *emoji;
                Button::new(("emoji", index))
                    .ghost()
                    .small()
                    .child(emoji)
                    .on_click(cx.listener(move |this, _, window, cx| {
                        this.pick_emoji(emoji, window, cx);
                    }))
            }))
            .into_any_element()
    }
}

impl Render for ChatView {
    fn render(&mut self, _window: &mut Window, cx: &mut Context<Self>) -> impl IntoElement {
        let (typing, picker_open) = self
            .surface
            .as_ref()
            .map(|surface| {
                (
                    surface.composer().is_typing(),
                    surface.composer().is_emoji_picker_open(),
                )
            })
            .unwrap_or_default();
        let notice = self.notice.clone();
        let header = self.render_header(cx);
        let palette = picker_open.then(|| self.render_emoji_palette(cx));
        let theme = cx.theme();

        v_flex()
            .id("chat-view")
            .relative()
            .size_full()
            .min_h_0()
            .overflow_hidden()
            .bg(theme.background)
            .child(header)
            .when_some(notice, |view, notice| {
                view.child(
                    h_flex()
                        .id("chat-view-notice")
                        .w_full()
                        .gap_2()
                        .px_4()
                        .py_1()
                        .items_center()
                        .justify_between()
                        .child(Label::new(notice).text_xs().text_color(theme.danger))
                        .child(
                            Button::new("dismiss-notice")
                                .ghost()
                                .xsmall()
                                .icon(IconName::Close)
                                .on_click(cx.listener(|this, _, _window, cx| {
                                    this.dismiss_notice(cx);
                                })),
                        ),
                )
            })
            .child(
                div()
                    .id("chat-view-message-list")
                    .flex_1()
                    .min_h_0()
                    .child(self.message_list.clone()),
            )
            .when(typing, |view| {
                view.child(
                    div()
                        .id("chat-view-typing")
                        .px_4()
                        .text_xs()
                        .text_color(theme.muted_foreground)
                        .child(TYPING_INDICATOR_LABEL),
                )
            })
            .children(palette)
            .child(
                div()
                    .id("chat-view-composer")
                    .flex_shrink_0()
                    .w_full()
                    .border_t_1()
                    .border_color(theme.border)
                    .child(self.composer_input.clone()),
            )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[::core::prelude::v1::test]
    fn clean_clear_has_no_notice() {
        let report = ClearReport {
            requested: 5,
            deleted: 5,
            failed: 0,
        };
        assert_eq!(clear_notice(report), None);
    }

    #[::core::prelude::v1::test]
    fn partial_clear_reports_the_leftovers() {
        let report = ClearReport {
            requested: 5,
            deleted: 3,
            failed: 2,
        };
        assert_eq!(
            clear_notice(report).as_deref(),
            Some("Cleared 3 of 5 messages; 2 could not be deleted.")
        );
    }

    #[::core::prelude::v1::test]
    fn presence_badge_labels() {
        assert_eq!(presence_label(None), "Unknown");
        assert_eq!(
            presence_label(Some(PresenceRecord {
                online: true,
                last_seen_ms: 1,
            })),
            "Online"
        );
        assert_eq!(
            presence_label(Some(PresenceRecord {
                online: false,
                last_seen_ms: 2,
            })),
            "Offline"
        );
    }

    #[::core::prelude::v1::test]
    fn send_failures_explain_an_ended_session() {
        assert_eq!(
            send_failure_notice(&"store unavailable", true),
            "Message not sent: store unavailable"
        );
        assert_eq!(
            send_failure_notice(&"store unavailable", false),
            "Your session has ended. Sign in again to send messages."
        );
    }
}
