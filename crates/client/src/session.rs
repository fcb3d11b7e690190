use chirp_backend::{AuthUser, ConnectionHandle, ConnectionId, UserId};

/// A signed-in identity plus the realtime connection its presence rule hangs on.
///
/// Not `Clone`: exactly one owner holds the connection, and dropping the
/// session drops the connection, which lets the backend mark the user offline.
/// The connection is absent only when opening it failed during sign-in.
#[derive(Debug)]
pub struct Session {
    user: AuthUser,
    connection: Option<ConnectionHandle>,
    valid: bool,
}

impl Session {
    pub(crate) fn new(user: AuthUser, connection: Option<ConnectionHandle>) -> Self {
        Self {
            user,
            connection,
            valid: true,
        }
    }

    pub fn user(&self) -> &AuthUser {
        &self.user
    }

    pub fn uid(&self) -> UserId {
        self.user.uid
    }

    /// Messages are labelled with the email, not the uid.
    pub fn sender_label(&self) -> &str {
        &self.user.email
    }

    pub fn connection_id(&self) -> Option<ConnectionId> {
        self.connection.as_ref().map(ConnectionHandle::id)
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Marks the identity as expired without tearing the connection down.
    /// Called when a write comes back with an error that ends the session.
    pub(crate) fn invalidate(&mut self) {
        if self.valid {
            tracing::info!(uid = %self.user.uid, "session invalidated");
        }
        self.valid = false;
    }

    pub(crate) fn into_parts(self) -> (AuthUser, Option<ConnectionHandle>) {
        (self.user, self.connection)
    }
}
