use std::sync::Arc;

use chirp_backend::{
    AuthUser, ConnectionHandle, HostedBackend, PresenceRecord, PresenceStore, PresenceWrite,
    UserId, status_path,
};
use snafu::ResultExt;

use super::error::{ClientResult, PresenceWriteSnafu, RemoteReadSnafu};

/// Writes `status/{uid}` on sign-in and sign-out. The abrupt-disconnect
/// transition is never written from here; the backend rule does it.
#[derive(Clone)]
pub struct PresenceManager {
    backend: Arc<dyn HostedBackend>,
}

impl PresenceManager {
    pub fn new(backend: Arc<dyn HostedBackend>) -> Self {
        Self { backend }
    }

    pub async fn connect(&self) -> ClientResult<ConnectionHandle> {
        self.backend.connect().await.context(PresenceWriteSnafu {
            stage: "presence-open-connection",
        })
    }

    /// Marks the user online, then arms the server-side offline rule on `connection`.
    pub async fn go_online(&self, user: &AuthUser, connection: &ConnectionHandle) -> ClientResult<()> {
        self.backend
            .set_presence(user.uid, PresenceWrite::ONLINE)
            .await
            .context(PresenceWriteSnafu {
                stage: "presence-go-online-write",
            })?;

        self.backend
            .on_disconnect_set(connection.id(), user.uid, PresenceWrite::OFFLINE)
            .await
            .context(PresenceWriteSnafu {
                stage: "presence-register-disconnect-rule",
            })?;

        tracing::info!(
            path = %status_path(user.uid),
            connection_id = %connection.id(),
            "presence online"
        );
        Ok(())
    }

    /// Retires the offline rule armed on `connection`. A graceful sign-out
    /// calls this first, so closing the connection later writes nothing.
    pub async fn disarm(&self, connection: &ConnectionHandle) -> ClientResult<()> {
        let cancelled = self
            .backend
            .cancel_on_disconnect(connection.id())
            .await
            .context(PresenceWriteSnafu {
                stage: "presence-cancel-disconnect-rule",
            })?;
        tracing::debug!(connection_id = %connection.id(), cancelled, "disarmed disconnect rule");
        Ok(())
    }

    pub async fn go_offline(&self, user: &AuthUser) -> ClientResult<()> {
        self.backend
            .set_presence(user.uid, PresenceWrite::OFFLINE)
            .await
            .context(PresenceWriteSnafu {
                stage: "presence-go-offline-write",
            })?;

        tracing::info!(path = %status_path(user.uid), "presence offline");
        Ok(())
    }

    pub async fn presence_of(&self, uid: UserId) -> ClientResult<Option<PresenceRecord>> {
        self.backend
            .get_presence(uid)
            .await
            .context(RemoteReadSnafu {
                stage: "presence-read",
                operation: "get_presence",
            })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chirp_backend::MemoryBackend;

    use super::*;

    fn manager_with_user() -> (PresenceManager, AuthUser) {
        let backend = MemoryBackend::new();
        let user = backend
            .register_account("lin@example.com", "password1")
            .expect("register");
        let manager = PresenceManager::new(Arc::new(backend.clone()));
        (manager, user)
    }

    #[tokio::test]
    async fn go_online_then_offline_round_trip() {
        let (manager, user) = manager_with_user();
        let connection = manager.connect().await.expect("connect");

        manager.go_online(&user, &connection).await.expect("online");
        let record = manager.presence_of(user.uid).await.expect("read");
        assert!(record.is_some_and(|record| record.online));

        manager.go_offline(&user).await.expect("offline");
        let record = manager.presence_of(user.uid).await.expect("read");
        assert!(record.is_some_and(|record| !record.online));
    }

    #[tokio::test]
    async fn abrupt_disconnect_marks_user_offline_without_client_write() {
        let (manager, user) = manager_with_user();
        let connection = manager.connect().await.expect("connect");
        manager.go_online(&user, &connection).await.expect("online");

        drop(connection);

        let mut offline = false;
        for _ in 0..100 {
            let record = manager.presence_of(user.uid).await.expect("read");
            if record.is_some_and(|record| !record.online) {
                offline = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(offline);
    }

    #[tokio::test]
    async fn disarmed_connection_closes_without_writing() {
        let (manager, user) = manager_with_user();
        let connection = manager.connect().await.expect("connect");
        manager.go_online(&user, &connection).await.expect("online");

        manager.disarm(&connection).await.expect("disarm");
        connection.close();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let record = manager.presence_of(user.uid).await.expect("read");
        assert!(record.is_some_and(|record| record.online));
    }
}
