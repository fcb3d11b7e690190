use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, HashSet};
use std::hash::Hasher;
use std::ops::Range;
use std::rc::Rc;

use chirp_client::{ChatMessage, FeedWindow};
use gpui::*;
use gpui_component::{ActiveTheme, label::Label, v_flex, v_virtual_list};

use crate::chat::scroll_manager::ScrollManager;

const DEFAULT_CONTENT_WIDTH: Pixels = px(680.);
const LIST_HORIZONTAL_PADDING: Pixels = px(16.);
const BUBBLE_MAX_WIDTH: Pixels = px(540.);
const BUBBLE_PADDING_X: Pixels = px(12.);
const BUBBLE_PADDING_Y: Pixels = px(8.);
const SENDER_LABEL_HEIGHT: Pixels = px(16.);
const SENDER_LABEL_GAP: Pixels = px(4.);
const ESTIMATED_TEXT_LINE_HEIGHT: Pixels = px(18.);
const ESTIMATED_CHAR_WIDTH: f32 = 7.0;

/// The feed window rendered oldest first, each row labelled with its sender.
pub struct MessageList {
    messages: Vec<ChatMessage>,
    own_sender: String,
    revision: Option<u64>,
    item_sizes: Rc<Vec<Size<Pixels>>>,
    measured_heights: HashMap<u64, Pixels>,
    scroll_manager: ScrollManager,
    content_width: Option<Pixels>,
}

impl MessageList {
    pub fn new(own_sender: impl Into<String>, _cx: &mut Context<Self>) -> Self {
        Self {
            messages: Vec::new(),
            own_sender: own_sender.into(),
            revision: None,
            item_sizes: Rc::new(Vec::new()),
            measured_heights: HashMap::new(),
            scroll_manager: ScrollManager::new(),
            content_width: None,
        }
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// Mirrors `window` and pins the list to the newest row. Unchanged
    /// revisions are ignored.
    pub fn sync_window(&mut self, window: &FeedWindow, cx: &mut Context<Self>) {
        if self.revision == Some(window.revision()) {
            return;
        }

        self.revision = Some(window.revision());
        self.messages = window.messages().to_vec();
        self.rebuild_item_sizes();
        self.scroll_manager.request_scroll_to_bottom();
        cx.notify();
    }

    fn update_content_width(&mut self) -> bool {
        let list_width = self.scroll_manager.bounds().size.width;
        if list_width <= Pixels::ZERO {
            return false;
        }

        let next = max_pixels(list_width - LIST_HORIZONTAL_PADDING * 2, px(1.));
        if self.content_width == Some(next) {
            return false;
        }

        self.content_width = Some(next);
        self.rebuild_item_sizes();
        true
    }

    fn rebuild_item_sizes(&mut self) {
        let content_width = self.content_width.unwrap_or(DEFAULT_CONTENT_WIDTH);
        let mut live_keys = HashSet::with_capacity(self.messages.len());
        let sizes = self
            .messages
            .iter()
            .map(|message| {
                let key = layout_key(message, content_width);
                live_keys.insert(key);
                let height = self
                    .measured_heights
                    .get(&key)
                    .copied()
                    .unwrap_or_else(|| estimate_message_height(message, content_width));
                size(px(0.), height)
            })
            .collect();

        self.measured_heights.retain(|key, _| live_keys.contains(key));
        self.item_sizes = Rc::new(sizes);
    }

    fn measure_visible_items(
        &mut self,
        visible_range: Range<usize>,
        window: &mut Window,
        cx: &mut Context<Self>,
    ) {
        let content_width = self.content_width.unwrap_or(DEFAULT_CONTENT_WIDTH);
        let available_space = size(
            AvailableSpace::Definite(content_width),
            AvailableSpace::MinContent,
        );
        let mut updated = false;

        for index in visible_range {
            let Some(message) = self.messages.get(index).cloned() else {
                continue;
            };
            let key = layout_key(&message, content_width);
            if self.measured_heights.contains_key(&key) {
                continue;
            }

            let mut row = self.render_message_row(&message, cx);
            let height = row.layout_as_root(available_space, window, cx).height;
            self.measured_heights.insert(key, height);
            updated = true;
        }

        if updated {
            self.rebuild_item_sizes();
            cx.notify();
        }
    }

    fn render_message_row(&self, message: &ChatMessage, cx: &mut Context<Self>) -> AnyElement {
        let theme = cx.theme();
        let own = message.sender == self.own_sender;
        let (bubble_bg, bubble_fg) = if own {
            (theme.accent, theme.accent_foreground)
        } else {
            (theme.muted, theme.foreground)
        };

        let column = v_flex().w_full().gap(SENDER_LABEL_GAP);
        let column = if own {
            column.items_end()
        } else {
            column.items_start()
        };

        column
            .child(
                Label::new(message.sender.clone())
                    .text_xs()
                    .text_color(theme.muted_foreground),
            )
            .child(
                div()
                    .max_w(BUBBLE_MAX_WIDTH)
                    .px(BUBBLE_PADDING_X)
                    .py(BUBBLE_PADDING_Y)
                    .rounded_lg()
                    .bg(bubble_bg)
                    .text_color(bubble_fg)
                    .child(Label::new(message.text.clone()).text_sm()),
            )
            .into_any_element()
    }
}

impl Render for MessageList {
    fn render(&mut self, window: &mut Window, cx: &mut Context<Self>) -> impl IntoElement {
        if self.update_content_width() {
            cx.notify();
        }
        if self.scroll_manager.apply_pending_scroll() {
            window.request_animation_frame();
        }

        let theme = cx.theme();
        if self.messages.is_empty() {
            return v_flex()
                .id("message-list-empty")
                .size_full()
                .items_center()
                .justify_center()
                .child(
                    Label::new("No messages yet. Say hello!")
                        .text_sm()
                        .text_color(theme.muted_foreground),
                )
                .into_any_element();
        }

        v_flex()
            .size_full()
            .min_h_0()
            .child(
                v_virtual_list(
                    cx.entity().clone(),
                    "message-list",
                    self.item_sizes.clone(),
                    |this, visible_range, window, cx| {
                        this.measure_visible_items(visible_range.clone(), window, cx);
                        visible_range
                            .filter_map(|index| {
                                this.messages
                                    .get(index)
                                    .cloned()
                                    .map(|message| this.render_message_row(&message, cx))
                            })
                            .collect::<Vec<_>>()
                    },
                )
                .size_full()
                .px(LIST_HORIZONTAL_PADDING)
                .py_3()
                .gap_3()
                .track_scroll(self.scroll_manager.handle()),
            )
            .into_any_element()
    }
}

fn layout_key(message: &ChatMessage, content_width: Pixels) -> u64 {
    let mut hasher = DefaultHasher::new();
    hasher.write(message.sender.as_bytes());
    hasher.write_u8(0);
    hasher.write(message.text.as_bytes());
    hasher.write_u64(message.sent_at_ms);
    hasher.write_u32(f32::from(content_width).to_bits());
    hasher.finish()
}

fn estimate_message_height(message: &ChatMessage, content_width: Pixels) -> Pixels {
    let bubble_width = min_pixels(content_width, BUBBLE_MAX_WIDTH);
    let text_width = max_pixels(bubble_width - BUBBLE_PADDING_X * 2, px(1.));
    SENDER_LABEL_HEIGHT
        + SENDER_LABEL_GAP
        + estimate_text_height(&message.text, text_width)
        + BUBBLE_PADDING_Y * 2
}

fn estimate_text_height(text: &str, text_width: Pixels) -> Pixels {
    let chars_per_line = (f32::from(text_width) / ESTIMATED_CHAR_WIDTH).floor().max(1.0) as usize;
    let lines = text
        .lines()
        .map(|line| line.chars().count().div_ceil(chars_per_line).max(1))
        .sum::<usize>()
        .max(1);
    ESTIMATED_TEXT_LINE_HEIGHT * lines
}

fn max_pixels(a: Pixels, b: Pixels) -> Pixels {
    if f32::from(a) >= f32::from(b) { a } else { b }
}

fn min_pixels(a: Pixels, b: Pixels) -> Pixels {
    if f32::from(a) <= f32::from(b) { a } else { b }
}
