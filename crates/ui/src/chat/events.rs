/// Emitted by the login form with the credentials to exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginRequested {
    pub email: String,
    pub password: String,
}

/// Emitted when the user asks to leave the chat surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SignOutRequested;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ThemeToggleRequested;

/// Emitted on Enter or the send button. The input keeps its text; the chat
/// view clears it only after the write lands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ComposeSubmitted;

/// Emitted on every edit with the full buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposerEdited {
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EmojiPickerToggled;
