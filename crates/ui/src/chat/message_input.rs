use gpui::*;
use gpui_component::{
    ActiveTheme, IconName, Sizable,
    button::{Button, ButtonVariants},
    h_flex,
    input::{Input, InputEvent, InputState},
    v_flex,
};

use crate::chat::events::{ComposeSubmitted, ComposerEdited, EmojiPickerToggled};

/// Text field plus the emoji and send buttons. Owns no draft state of its
/// own; every edit is forwarded to the chat view's composer.
pub struct ComposerInput {
    input_state: Entity<InputState>,
    sending: bool,
}

impl EventEmitter<ComposeSubmitted> for ComposerInput {}
impl EventEmitter<ComposerEdited> for ComposerInput {}
impl EventEmitter<EmojiPickerToggled> for ComposerInput {}

impl ComposerInput {
    pub fn new(window: &mut Window, cx: &mut Context<Self>) -> Self {
        let input_state =
            cx.new(|cx| InputState::new(window, cx).placeholder("Type a message..."));

        cx.subscribe_in(
            &input_state,
            window,
            |this, state, event: &InputEvent, _window, cx| match event {
                InputEvent::Change => {
                    let text = state.read(cx).value().to_string();
                    cx.emit(ComposerEdited { text });
                }
                InputEvent::PressEnter { secondary: false } => this.submit(cx),
                _ => {}
            },
        )
        .detach();

        Self {
            input_state,
            sending: false,
        }
    }

    pub fn set_sending(&mut self, sending: bool, cx: &mut Context<Self>) {
        self.sending = sending;
        cx.notify();
    }

    /// Replaces the field contents, e.g. after an emoji pick or a send.
    pub fn set_text(
        &mut self,
        text: impl Into<SharedString>,
        window: &mut Window,
        cx: &mut Context<Self>,
    ) {
        let text = text.into();
        self.input_state.update(cx, |state, cx| {
            state.set_value(text, window, cx);
        });
    }

    fn submit(&mut self, cx: &mut Context<Self>) {
        if self.sending {
            return;
        }
        cx.emit(ComposeSubmitted);
    }
}

impl Render for ComposerInput {
    fn render(&mut self, _window: &mut Window, cx: &mut Context<Self>) -> impl IntoElement {
        let theme = cx.theme();

        v_flex().bg(theme.background).gap_2().p_3().child(
            h_flex()
                .w_full()
                .gap_2()
                .items_center()
                .child(
                    Button::new("emoji-toggle")
                        .small()
                        .ghost()
                        .icon(IconName::Heart)
                        .on_click(cx.listener(|_, _, _window, cx| {
                            cx.emit(EmojiPickerToggled);
                        })),
                )
                .child(
                    div()
                        .flex_1()
                        .min_w_0()
                        .px_3()
                        .py_2()
                        .rounded_lg()
                        .border_1()
                        .border_color(theme.border)
                        .bg(theme.background)
                        .child(Input::new(&self.input_state).w_full()),
                )
                .child(
                    Button::new("send")
                        .small()
                        .primary()
                        .icon(IconName::ArrowUp)
                        .child(if self.sending { "Sending…" } else { "Send" })
                        .on_click(cx.listener(|this, _, _window, cx| {
                            this.submit(cx);
                        })),
                ),
        )
    }
}
