use std::sync::Arc;

use chirp_backend::{
    AuthUser, BackendError, DocumentStore, HostedBackend, IdentityProvider, MemoryBackend,
    SnapshotSubscription, SqliteBackend,
};
use snafu::{ResultExt, ensure};

use super::config::{BackendKind, ClientSettings};
use super::error::{
    BackendOpenSnafu, ClientError, ClientResult, NotSignedInSnafu, RemoteReadSnafu,
    RemoteWriteSnafu,
};
use super::feed::FeedSubscriber;
use super::message::{ChatMessage, NewChatMessage};
use super::presence::PresenceManager;
use super::session::Session;
use super::view::ChatSurface;

/// Result of a credential exchange. Presence trouble never fails sign-in; it
/// rides along in `presence_error` so the UI can show a notice.
#[derive(Debug)]
pub struct SignInOutcome {
    pub session: Session,
    pub presence_error: Option<ClientError>,
}

/// Outcome of a bulk clear. The clear is not atomic: `failed` documents stay.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClearReport {
    pub requested: usize,
    pub deleted: usize,
    pub failed: usize,
}

/// Entry point for every remote operation the chat client performs.
#[derive(Clone)]
pub struct ChatClient {
    backend: Arc<dyn HostedBackend>,
    presence: PresenceManager,
}

impl ChatClient {
    pub fn new(backend: Arc<dyn HostedBackend>) -> Self {
        let presence = PresenceManager::new(backend.clone());
        Self { backend, presence }
    }

    /// Opens the configured backend and registers any missing seed accounts.
    pub async fn connect(settings: &ClientSettings) -> ClientResult<Self> {
        let backend: Arc<dyn HostedBackend> = match settings.backend {
            BackendKind::Memory => {
                let backend = MemoryBackend::new();
                for account in &settings.seed_accounts {
                    log_seed_result(
                        &account.email,
                        backend.register_account(&account.email, &account.password),
                    );
                }
                Arc::new(backend)
            }
            BackendKind::Sqlite => {
                let path = settings.resolved_database_path();
                let backend = SqliteBackend::open(&path.to_string_lossy())
                    .await
                    .context(BackendOpenSnafu {
                        stage: "client-connect-open-sqlite",
                        backend: BackendKind::Sqlite.name(),
                    })?;
                for account in &settings.seed_accounts {
                    log_seed_result(
                        &account.email,
                        backend
                            .register_account(&account.email, &account.password)
                            .await,
                    );
                }
                Arc::new(backend)
            }
        };

        tracing::info!(backend = settings.backend.name(), "chat client connected");
        Ok(Self::new(backend))
    }

    pub fn backend(&self) -> &Arc<dyn HostedBackend> {
        &self.backend
    }

    pub fn presence(&self) -> &PresenceManager {
        &self.presence
    }

    /// Exchanges credentials, then marks the user online and arms the
    /// offline-on-disconnect rule.
    pub async fn sign_in(&self, email: &str, password: &str) -> ClientResult<SignInOutcome> {
        let user = self
            .backend
            .sign_in_with_email_and_password(email, password)
            .await
            .map_err(|source| auth_failure(source, "client-sign-in-credentials"))?;

        let mut presence_error = None;
        let connection = match self.presence.connect().await {
            Ok(connection) => {
                if let Err(error) = self.presence.go_online(&user, &connection).await {
                    presence_error = Some(error);
                }
                Some(connection)
            }
            Err(error) => {
                presence_error = Some(error);
                None
            }
        };

        if let Some(error) = &presence_error {
            tracing::warn!(uid = %user.uid, error = %error, "signed in without presence");
        }
        tracing::info!(uid = %user.uid, email = %user.email, "signed in");

        Ok(SignInOutcome {
            session: Session::new(user, connection),
            presence_error,
        })
    }

    /// Disarms the disconnect rule, writes the offline marker, ends the
    /// identity session, then drops the connection. Presence failures are
    /// logged and do not stop sign-out.
    pub async fn sign_out(&self, session: Session) -> ClientResult<()> {
        let (user, connection) = session.into_parts();

        // The offline rule must be gone before the connection drops.
        if let Some(connection) = &connection
            && let Err(error) = self.presence.disarm(connection).await
        {
            tracing::warn!(uid = %user.uid, error = %error, "failed to disarm disconnect rule");
        }
        if let Err(error) = self.presence.go_offline(&user).await {
            tracing::warn!(uid = %user.uid, error = %error, "offline write failed during sign-out");
        }

        let signed_out = self
            .backend
            .sign_out(&user)
            .await
            .context(RemoteWriteSnafu {
                stage: "client-sign-out",
                operation: "sign_out",
            });
        drop(connection);
        signed_out?;

        tracing::info!(uid = %user.uid, "signed out");
        Ok(())
    }

    pub async fn post_message(&self, message: NewChatMessage) -> ClientResult<ChatMessage> {
        let document = self
            .backend
            .add_chat(message.into())
            .await
            .context(RemoteWriteSnafu {
                stage: "client-post-message",
                operation: "add_chat",
            })?;
        Ok(document.into())
    }

    /// Submits the composer buffer. Blank input is a no-op returning `None`;
    /// on failure the buffer is kept so the user can resend.
    pub async fn send_message(
        &self,
        surface: &mut ChatSurface,
    ) -> ClientResult<Option<ChatMessage>> {
        let Some(message) = self.prepare_send(surface)? else {
            return Ok(None);
        };
        let result = self.post_message(message).await;
        self.commit_send(surface, result).map(Some)
    }

    /// First half of a send: checks the session and builds the message.
    /// `Ok(None)` means the trimmed buffer is empty.
    pub fn prepare_send(&self, surface: &ChatSurface) -> ClientResult<Option<NewChatMessage>> {
        ensure!(
            surface.session().is_valid(),
            NotSignedInSnafu {
                stage: "client-send-message-session",
            }
        );
        Ok(surface.composer().prepare_submission(surface.session()))
    }

    /// Second half of a send: clears the buffer once the write landed. An
    /// error that ends the session invalidates it; the draft stays either way.
    pub fn commit_send(
        &self,
        surface: &mut ChatSurface,
        result: ClientResult<ChatMessage>,
    ) -> ClientResult<ChatMessage> {
        match result {
            Ok(sent) => {
                surface.composer_mut().mark_sent();
                Ok(sent)
            }
            Err(error) => {
                tracing::warn!(
                    sender = surface.session().sender_label(),
                    error = %error,
                    "message send failed"
                );
                if error.ends_session() {
                    surface.session_mut().invalidate();
                }
                Err(error)
            }
        }
    }

    /// Deletes every stored chat document, one unconditional delete each.
    /// Keeps going past individual failures.
    pub async fn clear_chat(&self) -> ClientResult<ClearReport> {
        let documents = self.backend.list_chats().await.context(RemoteReadSnafu {
            stage: "client-clear-chat-list",
            operation: "list_chats",
        })?;

        let deletions = documents
            .iter()
            .map(|document| self.backend.delete_chat(document.id));
        let results = futures::future::join_all(deletions).await;

        let mut report = ClearReport {
            requested: documents.len(),
            ..ClearReport::default()
        };
        for (document, result) in documents.iter().zip(results) {
            match result {
                Ok(()) => report.deleted += 1,
                Err(error) => {
                    report.failed += 1;
                    tracing::warn!(document_id = %document.id, error = %error, "chat delete failed");
                }
            }
        }

        tracing::info!(
            requested = report.requested,
            deleted = report.deleted,
            failed = report.failed,
            "cleared chat"
        );
        Ok(report)
    }

    pub fn subscribe_feed(&self, feed: &mut FeedSubscriber) -> ClientResult<SnapshotSubscription> {
        feed.mount(self.backend.as_ref())
    }
}

fn auth_failure(source: BackendError, stage: &'static str) -> ClientError {
    let message = match source {
        BackendError::InvalidCredentials { message, .. } => message,
        other => other.to_string(),
    };
    ClientError::AuthFailure { stage, message }
}

fn log_seed_result(email: &str, result: Result<AuthUser, BackendError>) {
    match result {
        Ok(user) => tracing::info!(uid = %user.uid, email = %user.email, "seeded account"),
        Err(BackendError::AccountExists { .. }) => {}
        Err(error) => tracing::warn!(email, error = %error, "failed to seed account"),
    }
}
