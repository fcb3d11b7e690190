use chirp_backend::now_millis;

use super::message::NewChatMessage;
use super::session::Session;

/// Symbols offered by the emoji picker, in display order.
pub const EMOJI_PALETTE: &[&str] = &[
    "😀", "😂", "😊", "😍", "😎", "🤔", "😢", "😡", "👍", "👎", "👏", "🙏", "🎉", "🔥", "❤️",
    "💯", "✅", "👋", "🚀", "☕",
];

pub const TYPING_INDICATOR_LABEL: &str = "You are typing…";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComposerState {
    Empty,
    Composing,
    /// The last submission was accepted and the buffer cleared.
    Sent,
}

/// Local draft buffer. Nothing here talks to the backend.
#[derive(Debug, Clone)]
pub struct Composer {
    text: String,
    state: ComposerState,
    emoji_picker_open: bool,
}

impl Composer {
    pub fn new() -> Self {
        Self {
            text: String::new(),
            state: ComposerState::Empty,
            emoji_picker_open: false,
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn state(&self) -> ComposerState {
        self.state
    }

    pub fn set_text(&mut self, text: impl Into<String>) {
        self.text = text.into();
        self.state = if self.text.is_empty() {
            ComposerState::Empty
        } else {
            ComposerState::Composing
        };
    }

    /// Derived from the buffer on every call; there is no debounce.
    pub fn is_typing(&self) -> bool {
        !self.text.trim().is_empty()
    }

    /// Appends at the end of the buffer, regardless of any cursor position.
    pub fn insert_emoji(&mut self, emoji: &str) {
        let mut text = std::mem::take(&mut self.text);
        text.push_str(emoji);
        self.set_text(text);
    }

    pub fn toggle_emoji_picker(&mut self) -> bool {
        self.emoji_picker_open = !self.emoji_picker_open;
        self.emoji_picker_open
    }

    pub fn is_emoji_picker_open(&self) -> bool {
        self.emoji_picker_open
    }

    /// Builds the message to send, or `None` when the trimmed buffer is empty.
    /// The buffer is left as-is either way.
    pub fn prepare_submission(&self, session: &Session) -> Option<NewChatMessage> {
        let text = self.text.trim();
        if text.is_empty() {
            return None;
        }

        Some(NewChatMessage {
            text: text.to_string(),
            sender: session.sender_label().to_string(),
            sent_at_ms: now_millis(),
        })
    }

    pub fn mark_sent(&mut self) {
        self.text.clear();
        self.state = ComposerState::Sent;
    }
}

impl Default for Composer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typing_flag_follows_buffer() {
        let mut composer = Composer::new();
        assert!(!composer.is_typing());
        assert_eq!(composer.state(), ComposerState::Empty);

        composer.set_text("h");
        assert!(composer.is_typing());
        assert_eq!(composer.state(), ComposerState::Composing);

        composer.set_text("   ");
        assert!(!composer.is_typing());

        composer.set_text("");
        assert_eq!(composer.state(), ComposerState::Empty);
    }

    #[test]
    fn two_emoji_selections_append_in_order() {
        let mut composer = Composer::new();
        composer.set_text("hi ");
        composer.insert_emoji("👋");
        composer.insert_emoji("🎉");
        assert_eq!(composer.text(), "hi 👋🎉");
        assert_eq!(composer.state(), ComposerState::Composing);
    }

    #[test]
    fn emoji_picker_toggles() {
        let mut composer = Composer::new();
        assert!(composer.toggle_emoji_picker());
        assert!(composer.is_emoji_picker_open());
        assert!(!composer.toggle_emoji_picker());
    }

    #[test]
    fn mark_sent_clears_buffer() {
        let mut composer = Composer::new();
        composer.set_text("hello");
        composer.mark_sent();
        assert_eq!(composer.text(), "");
        assert_eq!(composer.state(), ComposerState::Sent);
        assert!(!composer.is_typing());
    }

    fn session() -> Session {
        Session::new(
            chirp_backend::AuthUser {
                uid: chirp_backend::UserId::new_v7(),
                email: "lin@example.com".to_string(),
            },
            None,
        )
    }

    #[test]
    fn submission_is_trimmed_and_labelled_with_sender() {
        let mut composer = Composer::new();
        composer.set_text("  hello there \n");

        let message = composer
            .prepare_submission(&session())
            .expect("non-blank input");
        assert_eq!(message.text, "hello there");
        assert_eq!(message.sender, "lin@example.com");
        assert!(message.sent_at_ms > 0);
    }

    #[test]
    fn whitespace_only_submission_is_a_no_op() {
        let mut composer = Composer::new();
        composer.set_text(" \t ");
        assert_eq!(composer.prepare_submission(&session()), None);
        assert_eq!(composer.text(), " \t ");
        assert_eq!(composer.state(), ComposerState::Composing);
    }

    #[test]
    fn palette_has_no_blank_entries() {
        assert!(EMOJI_PALETTE.iter().all(|emoji| !emoji.trim().is_empty()));
    }
}
