use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use snafu::{OptionExt, ensure};

use super::auth::{PasswordDigest, check_registration_input, check_sign_in_input, rejected_credentials};
use super::connection::{ConnectionHandle, ConnectionWatch, open_connection, runtime_handle};
use super::error::{
    AccountExistsSnafu, BackendResult, ConnectionClosedSnafu, InvariantViolationSnafu,
    NotFoundSnafu,
};
use super::ids::{ConnectionId, DocumentId, UserId};
use super::subscription::{ChangeFeed, SnapshotSubscription, WindowSource, subscribe_window};
use super::types::{
    AuthUser, ChatDocument, FeedQuery, NewChatDocument, PresenceRecord, PresenceWrite, now_millis,
    recent_window,
};
use super::{BoxFuture, DocumentStore, IdentityProvider, PresenceStore, validate_feed_query};

/// In-process hosted backend. Clones share one store.
#[derive(Debug, Clone)]
pub struct MemoryBackend {
    inner: Arc<MemoryInner>,
}

#[derive(Debug)]
struct MemoryInner {
    state: Mutex<MemoryState>,
    changes: ChangeFeed,
}

#[derive(Debug, Default)]
struct MemoryState {
    accounts: HashMap<String, MemoryAccount>,
    chats: Vec<ChatDocument>,
    presence: HashMap<UserId, PresenceRecord>,
    disconnect_rules: HashMap<ConnectionId, HashMap<UserId, PresenceWrite>>,
    live_connections: HashSet<ConnectionId>,
}

#[derive(Debug)]
struct MemoryAccount {
    user: AuthUser,
    password: PasswordDigest,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MemoryInner {
                state: Mutex::new(MemoryState::default()),
                changes: ChangeFeed::new(),
            }),
        }
    }

    pub fn register_account(&self, email: &str, password: &str) -> BackendResult<AuthUser> {
        let normalized = check_registration_input(email, password)?;
        let mut state = self.lock_state("memory-register-account")?;
        ensure!(
            !state.accounts.contains_key(&normalized),
            AccountExistsSnafu {
                stage: "memory-register-account-unique",
                email: normalized.clone(),
            }
        );

        let user = AuthUser {
            uid: UserId::new_v7(),
            email: normalized.clone(),
        };
        state.accounts.insert(
            normalized,
            MemoryAccount {
                user: user.clone(),
                password: PasswordDigest::derive(password),
            },
        );

        tracing::info!(uid = %user.uid, email = %user.email, "registered account");
        Ok(user)
    }

    pub fn chat_count(&self) -> BackendResult<usize> {
        Ok(self.lock_state("memory-chat-count")?.chats.len())
    }

    pub fn live_connection_count(&self) -> BackendResult<usize> {
        Ok(self
            .lock_state("memory-live-connection-count")?
            .live_connections
            .len())
    }

    fn lock_state(&self, stage: &'static str) -> BackendResult<MutexGuard<'_, MemoryState>> {
        self.inner.state.lock().map_err(|_| {
            InvariantViolationSnafu {
                stage,
                details: "memory backend state lock was poisoned".to_string(),
            }
            .build()
        })
    }

    fn fire_disconnect_rules(&self, connection_id: ConnectionId) {
        let mut state = match self.lock_state("memory-fire-disconnect-rules") {
            Ok(state) => state,
            Err(error) => {
                tracing::error!(%connection_id, error = %error, "cannot fire disconnect rules");
                return;
            }
        };

        state.live_connections.remove(&connection_id);
        let rules = state
            .disconnect_rules
            .remove(&connection_id)
            .unwrap_or_default();
        let server_time = now_millis();
        for (uid, write) in &rules {
            state.presence.insert(*uid, write.stamp(server_time));
        }

        tracing::debug!(
            %connection_id,
            fired_rules = rules.len(),
            "connection dropped; applied disconnect rules"
        );
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl WindowSource for MemoryBackend {
    fn fetch_window(&self, limit: usize) -> BoxFuture<'_, BackendResult<Vec<ChatDocument>>> {
        Box::pin(async move {
            let chats = self.lock_state("memory-fetch-window")?.chats.clone();
            Ok(recent_window(chats, limit))
        })
    }
}

impl IdentityProvider for MemoryBackend {
    fn sign_in_with_email_and_password<'a>(
        &'a self,
        email: &'a str,
        password: &'a str,
    ) -> BoxFuture<'a, BackendResult<AuthUser>> {
        Box::pin(async move {
            let normalized = check_sign_in_input(email, password)?;
            let state = self.lock_state("memory-sign-in")?;
            let account = state
                .accounts
                .get(&normalized)
                .ok_or_else(|| rejected_credentials("memory-sign-in-lookup"))?;

            if !account.password.verify(password) {
                return Err(rejected_credentials("memory-sign-in-verify"));
            }

            Ok(account.user.clone())
        })
    }

    fn sign_out<'a>(&'a self, user: &'a AuthUser) -> BoxFuture<'a, BackendResult<()>> {
        Box::pin(async move {
            tracing::debug!(uid = %user.uid, "signed out");
            Ok(())
        })
    }
}

impl DocumentStore for MemoryBackend {
    fn add_chat(&self, input: NewChatDocument) -> BoxFuture<'_, BackendResult<ChatDocument>> {
        Box::pin(async move {
            let document = ChatDocument {
                id: DocumentId::new_v7(),
                text: input.text,
                sender: input.sender,
                timestamp_ms: input.timestamp_ms,
            };
            self.lock_state("memory-add-chat")?
                .chats
                .push(document.clone());
            self.inner.changes.bump();
            Ok(document)
        })
    }

    fn list_chats(&self) -> BoxFuture<'_, BackendResult<Vec<ChatDocument>>> {
        Box::pin(async move { Ok(self.lock_state("memory-list-chats")?.chats.clone()) })
    }

    fn delete_chat(&self, document_id: DocumentId) -> BoxFuture<'_, BackendResult<()>> {
        Box::pin(async move {
            {
                let mut state = self.lock_state("memory-delete-chat")?;
                let position = state
                    .chats
                    .iter()
                    .position(|document| document.id == document_id)
                    .context(NotFoundSnafu {
                        stage: "memory-delete-chat-missing",
                        entity: "chat",
                        id: document_id.to_string(),
                    })?;
                state.chats.remove(position);
            }
            self.inner.changes.bump();
            Ok(())
        })
    }

    fn subscribe_recent(&self, query: FeedQuery) -> BackendResult<SnapshotSubscription> {
        validate_feed_query(&query)?;
        Ok(subscribe_window(
            self.clone(),
            &self.inner.changes,
            query,
            None,
        ))
    }
}

impl PresenceStore for MemoryBackend {
    fn connect(&self) -> BoxFuture<'_, BackendResult<ConnectionHandle>> {
        Box::pin(async move {
            let runtime = runtime_handle("memory-connect-runtime")?;
            let (handle, watch) = open_connection();
            self.lock_state("memory-connect-register")?
                .live_connections
                .insert(watch.id);

            let backend = self.clone();
            runtime.spawn(async move {
                let ConnectionWatch { id, liveness } = watch;
                // Resolves with an error once the client handle is dropped.
                let _ = liveness.await;
                backend.fire_disconnect_rules(id);
            });

            tracing::debug!(connection_id = %handle.id(), "opened realtime connection");
            Ok(handle)
        })
    }

    fn set_presence(
        &self,
        uid: UserId,
        write: PresenceWrite,
    ) -> BoxFuture<'_, BackendResult<PresenceRecord>> {
        Box::pin(async move {
            let record = write.stamp(now_millis());
            self.lock_state("memory-set-presence")?
                .presence
                .insert(uid, record);
            Ok(record)
        })
    }

    fn on_disconnect_set(
        &self,
        connection_id: ConnectionId,
        uid: UserId,
        write: PresenceWrite,
    ) -> BoxFuture<'_, BackendResult<()>> {
        Box::pin(async move {
            let mut state = self.lock_state("memory-on-disconnect-set")?;
            ensure!(
                state.live_connections.contains(&connection_id),
                ConnectionClosedSnafu {
                    stage: "memory-on-disconnect-set-live",
                    connection_id,
                }
            );
            state
                .disconnect_rules
                .entry(connection_id)
                .or_default()
                .insert(uid, write);
            Ok(())
        })
    }

    fn cancel_on_disconnect(
        &self,
        connection_id: ConnectionId,
    ) -> BoxFuture<'_, BackendResult<usize>> {
        Box::pin(async move {
            let cancelled = self
                .lock_state("memory-cancel-on-disconnect")?
                .disconnect_rules
                .remove(&connection_id)
                .map_or(0, |rules| rules.len());
            tracing::debug!(%connection_id, cancelled, "cancelled disconnect rules");
            Ok(cancelled)
        })
    }

    fn get_presence(&self, uid: UserId) -> BoxFuture<'_, BackendResult<Option<PresenceRecord>>> {
        Box::pin(async move {
            Ok(self
                .lock_state("memory-get-presence")?
                .presence
                .get(&uid)
                .copied())
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::error::BackendError;
    use crate::types::FEED_WINDOW_LIMIT;

    fn new_chat(text: &str, timestamp_ms: u64) -> NewChatDocument {
        NewChatDocument {
            text: text.to_string(),
            sender: "ada@example.com".to_string(),
            timestamp_ms,
        }
    }

    async fn wait_for_presence(
        backend: &MemoryBackend,
        uid: UserId,
        online: bool,
    ) -> Option<PresenceRecord> {
        for _ in 0..100 {
            let record = backend.get_presence(uid).await.expect("presence read");
            if record.is_some_and(|record| record.online == online) {
                return record;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        None
    }

    #[tokio::test]
    async fn sign_in_accepts_registered_credentials_only() {
        let backend = MemoryBackend::new();
        let registered = backend
            .register_account("ada@example.com", "analytical")
            .expect("register");

        let user = backend
            .sign_in_with_email_and_password("Ada@Example.com", "analytical")
            .await
            .expect("valid credentials");
        assert_eq!(user, registered);

        let error = backend
            .sign_in_with_email_and_password("ada@example.com", "wrong-password")
            .await
            .expect_err("wrong password");
        assert!(matches!(error, BackendError::InvalidCredentials { .. }));
        assert_eq!(error.to_string(), "Invalid email or password.");
    }

    #[tokio::test]
    async fn duplicate_registration_is_rejected() {
        let backend = MemoryBackend::new();
        backend
            .register_account("ada@example.com", "analytical")
            .expect("register");
        let error = backend
            .register_account("ADA@example.com", "analytical")
            .expect_err("duplicate");
        assert!(matches!(error, BackendError::AccountExists { .. }));
    }

    #[tokio::test]
    async fn subscription_delivers_full_window_on_each_change() {
        let backend = MemoryBackend::new();
        let SnapshotSubscription { mut stream, worker } = backend
            .subscribe_recent(FeedQuery::recent_chats())
            .expect("subscribe");
        let worker = tokio::spawn(worker);

        assert_eq!(stream.recv().await, Some(Vec::new()));

        backend.add_chat(new_chat("hello", 1)).await.expect("add");
        let snapshot = stream.recv().await.expect("snapshot after first add");
        assert_eq!(snapshot.len(), 1);

        backend.add_chat(new_chat("world", 2)).await.expect("add");
        let snapshot = stream.recv().await.expect("snapshot after second add");
        let texts = snapshot.iter().map(|doc| doc.text.as_str()).collect::<Vec<_>>();
        assert_eq!(texts, vec!["hello", "world"]);

        assert!(stream.unsubscribe());
        worker.await.expect("worker exits after unsubscribe");
    }

    #[tokio::test]
    async fn subscription_window_is_bounded_and_ordered() {
        let backend = MemoryBackend::new();
        for index in (0..25_u64).rev() {
            backend
                .add_chat(new_chat(&format!("m{index}"), index))
                .await
                .expect("add");
        }

        let SnapshotSubscription { mut stream, worker } = backend
            .subscribe_recent(FeedQuery::recent_chats())
            .expect("subscribe");
        let _worker = tokio::spawn(worker);

        let snapshot = stream.recv().await.expect("initial snapshot");
        assert_eq!(snapshot.len(), FEED_WINDOW_LIMIT);
        assert_eq!(snapshot.first().map(|doc| doc.timestamp_ms), Some(5));
        assert!(
            snapshot
                .windows(2)
                .all(|pair| pair[0].timestamp_ms <= pair[1].timestamp_ms)
        );
    }

    #[tokio::test]
    async fn unsubscribed_stream_yields_nothing_further() {
        let backend = MemoryBackend::new();
        let SnapshotSubscription { mut stream, worker } = backend
            .subscribe_recent(FeedQuery::recent_chats())
            .expect("subscribe");
        let worker = tokio::spawn(worker);
        let _ = stream.recv().await;

        let handle = stream.unsubscribe_handle();
        assert!(handle.unsubscribe());
        assert!(!handle.unsubscribe());

        backend.add_chat(new_chat("late", 9)).await.expect("add");
        assert_eq!(stream.recv().await, None);
        assert_eq!(stream.try_recv(), None);
        worker.await.expect("worker exits");
    }

    #[tokio::test]
    async fn unknown_collection_is_rejected() {
        let backend = MemoryBackend::new();
        let query = FeedQuery {
            collection: "rooms".to_string(),
            ..FeedQuery::recent_chats()
        };
        let result = backend.subscribe_recent(query);
        assert!(matches!(result, Err(BackendError::UnsupportedQuery { .. })));
    }

    #[tokio::test]
    async fn deleting_missing_document_reports_not_found() {
        let backend = MemoryBackend::new();
        let error = backend
            .delete_chat(DocumentId::new_v7())
            .await
            .expect_err("missing document");
        assert!(matches!(error, BackendError::NotFound { .. }));
    }

    #[tokio::test]
    async fn dropped_connection_fires_disconnect_rule() {
        let backend = MemoryBackend::new();
        let user = backend
            .register_account("ada@example.com", "analytical")
            .expect("register");

        let connection = backend.connect().await.expect("connect");
        backend
            .set_presence(user.uid, PresenceWrite::ONLINE)
            .await
            .expect("online");
        backend
            .on_disconnect_set(connection.id(), user.uid, PresenceWrite::OFFLINE)
            .await
            .expect("register rule");

        let online = backend.get_presence(user.uid).await.expect("read");
        assert!(online.is_some_and(|record| record.online));

        drop(connection);

        let offline = wait_for_presence(&backend, user.uid, false).await;
        assert!(offline.is_some(), "disconnect rule should mark user offline");
        assert_eq!(backend.live_connection_count().expect("count"), 0);
    }

    #[tokio::test]
    async fn disconnect_rule_requires_live_connection() {
        let backend = MemoryBackend::new();
        let user = backend
            .register_account("ada@example.com", "analytical")
            .expect("register");
        let connection = backend.connect().await.expect("connect");
        let connection_id = connection.id();
        connection.close();

        // Give the watcher a chance to observe the drop.
        for _ in 0..100 {
            if backend.live_connection_count().expect("count") == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let error = backend
            .on_disconnect_set(connection_id, user.uid, PresenceWrite::OFFLINE)
            .await
            .expect_err("closed connection");
        assert!(matches!(error, BackendError::ConnectionClosed { .. }));
    }

    #[tokio::test]
    async fn cancelled_rule_does_not_fire_on_close() {
        let backend = MemoryBackend::new();
        let user = backend
            .register_account("ada@example.com", "analytical")
            .expect("register");

        let connection = backend.connect().await.expect("connect");
        backend
            .on_disconnect_set(connection.id(), user.uid, PresenceWrite::OFFLINE)
            .await
            .expect("register rule");
        let cancelled = backend
            .cancel_on_disconnect(connection.id())
            .await
            .expect("cancel");
        assert_eq!(cancelled, 1);

        connection.close();
        for _ in 0..100 {
            if backend.live_connection_count().expect("count") == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        // A newer session on another connection marked the user online.
        backend
            .set_presence(user.uid, PresenceWrite::ONLINE)
            .await
            .expect("online");
        tokio::time::sleep(Duration::from_millis(50)).await;
        let record = backend.get_presence(user.uid).await.expect("read");
        assert!(record.is_some_and(|record| record.online));
    }
}
