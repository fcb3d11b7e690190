//! Headless chat client: session and presence handling, the live feed window,
//! the composer and the view state the desktop front end renders.

pub mod client;
pub mod composer;
pub mod config;
pub mod error;
pub mod feed;
pub mod message;
pub mod presence;
pub mod session;
pub mod view;

pub use client::{ChatClient, ClearReport, SignInOutcome};
pub use composer::{Composer, ComposerState, EMOJI_PALETTE, TYPING_INDICATOR_LABEL};
pub use config::{
    BackendKind, ClientSettings, SeedAccount, SettingsError, SettingsStore, ThemePreference,
};
pub use error::{ClientError, ClientResult};
pub use feed::{FeedSubscriber, FeedWindow};
pub use message::{ChatMessage, NewChatMessage};
pub use presence::PresenceManager;
pub use session::Session;
pub use view::{ChatSurface, LoginForm, ViewState};
