/// Event contracts between the shell, the login form and the chat surface.
pub mod events;
pub mod message_input;
pub mod message_list;
pub mod scroll_manager;
pub mod view;

pub use events::{
    ComposeSubmitted, ComposerEdited, EmojiPickerToggled, LoginRequested, SignOutRequested,
    ThemeToggleRequested,
};
pub use message_input::ComposerInput;
pub use message_list::MessageList;
pub use scroll_manager::ScrollManager;
pub use view::ChatView;
