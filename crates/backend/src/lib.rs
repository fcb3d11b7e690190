//! Hosted backend contracts for the chat client.
//!
//! The client only ever talks to the three traits below. `MemoryBackend` and
//! `SqliteBackend` both honour the same contracts: ordered chat queries with
//! full-snapshot change notification, and a presence store whose disconnect
//! rules fire on the backend side.

use std::future::Future;
use std::pin::Pin;

pub mod auth;
pub mod connection;
pub mod error;
pub mod ids;
pub mod memory;
pub mod sqlite;
pub mod subscription;
pub mod types;

pub use connection::ConnectionHandle;
pub use error::{BackendError, BackendResult};
pub use ids::{ConnectionId, DocumentId, UserId};
pub use memory::MemoryBackend;
pub use sqlite::SqliteBackend;
pub use subscription::{
    SnapshotStream, SnapshotSubscription, SubscriptionWorker, UnsubscribeHandle,
};
pub use types::{
    AuthUser, CHATS_COLLECTION, ChatDocument, FEED_WINDOW_LIMIT, FeedQuery, NewChatDocument,
    PresenceRecord, PresenceWrite, STATUS_PATH_PREFIX, TIMESTAMP_FIELD, now_millis,
    recent_window, status_path,
};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Email/password credential exchange.
pub trait IdentityProvider: Send + Sync {
    fn sign_in_with_email_and_password<'a>(
        &'a self,
        email: &'a str,
        password: &'a str,
    ) -> BoxFuture<'a, BackendResult<AuthUser>>;
    fn sign_out<'a>(&'a self, user: &'a AuthUser) -> BoxFuture<'a, BackendResult<()>>;
}

/// The `chats` collection.
pub trait DocumentStore: Send + Sync {
    fn add_chat(&self, input: NewChatDocument) -> BoxFuture<'_, BackendResult<ChatDocument>>;
    /// Every document in the collection, unpaginated.
    fn list_chats(&self) -> BoxFuture<'_, BackendResult<Vec<ChatDocument>>>;
    fn delete_chat(&self, document_id: DocumentId) -> BoxFuture<'_, BackendResult<()>>;
    /// Opens a standing query that delivers the whole window on every relevant change.
    fn subscribe_recent(&self, query: FeedQuery) -> BackendResult<SnapshotSubscription>;
}

/// The `status/{uid}` key space.
pub trait PresenceStore: Send + Sync {
    fn connect(&self) -> BoxFuture<'_, BackendResult<ConnectionHandle>>;
    fn set_presence(
        &self,
        uid: UserId,
        write: PresenceWrite,
    ) -> BoxFuture<'_, BackendResult<PresenceRecord>>;
    /// Registers a write the backend performs when `connection_id` drops.
    /// A later registration for the same uid on the same connection replaces it.
    fn on_disconnect_set(
        &self,
        connection_id: ConnectionId,
        uid: UserId,
        write: PresenceWrite,
    ) -> BoxFuture<'_, BackendResult<()>>;
    /// Retires every rule registered on `connection_id`, so that closing the
    /// connection afterwards writes nothing.
    fn cancel_on_disconnect(
        &self,
        connection_id: ConnectionId,
    ) -> BoxFuture<'_, BackendResult<usize>>;
    fn get_presence(&self, uid: UserId) -> BoxFuture<'_, BackendResult<Option<PresenceRecord>>>;
}

pub trait HostedBackend: IdentityProvider + DocumentStore + PresenceStore {}

impl<T> HostedBackend for T where T: IdentityProvider + DocumentStore + PresenceStore {}

pub(crate) fn validate_feed_query(query: &FeedQuery) -> BackendResult<()> {
    snafu::ensure!(
        query.collection == CHATS_COLLECTION,
        error::UnsupportedQuerySnafu {
            stage: "validate-feed-query-collection",
            details: format!("unknown collection '{}'", query.collection),
        }
    );
    snafu::ensure!(
        query.order_by == TIMESTAMP_FIELD,
        error::UnsupportedQuerySnafu {
            stage: "validate-feed-query-order",
            details: format!("collection cannot be ordered by '{}'", query.order_by),
        }
    );
    snafu::ensure!(
        query.limit > 0,
        error::UnsupportedQuerySnafu {
            stage: "validate-feed-query-limit",
            details: "limit must be positive".to_string(),
        }
    );
    Ok(())
}
