#![deny(unsafe_code)]

/// Window shell: connects the client and switches between login and chat.
pub mod app;
/// Signed-in chat screen and its parts.
pub mod chat;
pub mod error;
/// Email/password form.
pub mod login;
pub mod theme;
