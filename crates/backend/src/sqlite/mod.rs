use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use snafu::{ResultExt, ensure};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{FromRow, SqlitePool};
use tokio::time::MissedTickBehavior;

use super::auth::{PasswordDigest, check_registration_input, check_sign_in_input, rejected_credentials};
use super::connection::{ConnectionHandle, ConnectionWatch, open_connection, runtime_handle};
use super::error::{
    AccountExistsSnafu, BackendError, BackendResult, ConnectionClosedSnafu,
    CreateSqliteDirectorySnafu, NotFoundSnafu, SqliteConnectOptionsSnafu, SqliteConnectSnafu,
    SqliteMigrateSnafu, SqlitePragmaSnafu, SqliteQuerySnafu,
};
use super::ids::{ConnectionId, DocumentId, UserId};
use super::subscription::{ChangeFeed, SnapshotSubscription, WindowSource, subscribe_window};
use super::types::{
    AuthUser, ChatDocument, FeedQuery, NewChatDocument, PresenceRecord, PresenceWrite, now_millis,
};
use super::{BoxFuture, DocumentStore, IdentityProvider, PresenceStore, validate_feed_query};

/// How often a live connection refreshes its `connections.heartbeat_at`.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);
/// Connections silent for longer than this are treated as dropped.
pub const STALE_CONNECTION_AFTER: Duration = Duration::from_secs(15);
/// Writes from other processes are only visible by re-reading.
pub const EXTERNAL_CHANGE_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Hosted backend persisted in a single SQLite file, shareable between processes.
#[derive(Debug, Clone)]
pub struct SqliteBackend {
    pool: SqlitePool,
    database_url: String,
    changes: ChangeFeed,
}

impl SqliteBackend {
    pub async fn open(database_location: &str) -> BackendResult<Self> {
        ensure_database_directory(database_location)?;

        let database_url = normalize_database_url(database_location);
        let connect_options = SqliteConnectOptions::from_str(&database_url)
            .context(SqliteConnectOptionsSnafu {
                stage: "sqlite-open-parse-url",
                database_url: database_url.clone(),
            })?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_millis(5_000));

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(connect_options)
            .await
            .context(SqliteConnectSnafu {
                stage: "sqlite-open-connect",
                database_url: database_url.clone(),
            })?;

        let _: String = sqlx::query_scalar("PRAGMA journal_mode = WAL;")
            .fetch_one(&pool)
            .await
            .context(SqlitePragmaSnafu {
                stage: "sqlite-open-pragma-journal-mode",
                pragma: "journal_mode",
            })?;
        sqlx::query("PRAGMA busy_timeout = 5000;")
            .execute(&pool)
            .await
            .context(SqlitePragmaSnafu {
                stage: "sqlite-open-pragma-busy-timeout",
                pragma: "busy_timeout",
            })?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context(SqliteMigrateSnafu {
                stage: "sqlite-open-migrate",
            })?;

        let backend = Self {
            pool,
            database_url,
            changes: ChangeFeed::new(),
        };

        // Rules left behind by a process that died without cleaning up.
        let fired = backend.sweep_stale().await?;
        tracing::info!(
            database_url = %backend.database_url,
            orphaned_rules_fired = fired,
            "opened sqlite backend"
        );

        Ok(backend)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn database_url(&self) -> &str {
        &self.database_url
    }

    pub async fn register_account(&self, email: &str, password: &str) -> BackendResult<AuthUser> {
        let normalized = check_registration_input(email, password)?;
        let existing = sqlx::query_scalar::<_, i64>("SELECT 1 FROM accounts WHERE email = ? LIMIT 1")
            .bind(normalized.as_str())
            .fetch_optional(&self.pool)
            .await
            .context(SqliteQuerySnafu {
                stage: "account-register-lookup",
            })?;
        ensure!(
            existing.is_none(),
            AccountExistsSnafu {
                stage: "account-register-unique",
                email: normalized.clone(),
            }
        );

        let user = AuthUser {
            uid: UserId::new_v7(),
            email: normalized,
        };
        let password = PasswordDigest::derive(password);
        sqlx::query(
            "INSERT INTO accounts (uid, email, password_salt, password_digest, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(user.uid.to_string())
        .bind(user.email.as_str())
        .bind(password.salt)
        .bind(password.digest)
        .bind(u64_to_i64(now_millis(), "account-register-created-at")?)
        .execute(&self.pool)
        .await
        .context(SqliteQuerySnafu {
            stage: "account-register-insert",
        })?;

        tracing::info!(uid = %user.uid, email = %user.email, "registered account");
        Ok(user)
    }

    pub async fn chat_count(&self) -> BackendResult<usize> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM chats")
            .fetch_one(&self.pool)
            .await
            .context(SqliteQuerySnafu {
                stage: "chat-count-query",
            })?;
        Ok(i64_to_u64(count, "chat-count-value")? as usize)
    }

    /// Fires the rules of every connection that has stopped heartbeating, plus
    /// rules whose connection row is already gone. Returns how many rules fired.
    pub async fn sweep_stale(&self) -> BackendResult<usize> {
        let cutoff = now_millis().saturating_sub(STALE_CONNECTION_AFTER.as_millis() as u64);
        let cutoff = u64_to_i64(cutoff, "sweep-stale-cutoff")?;

        let stale = sqlx::query_scalar::<_, String>(
            "SELECT DISTINCT connection_id FROM disconnect_rules WHERE connection_id NOT IN (SELECT id FROM connections WHERE heartbeat_at >= ?) \
             UNION SELECT id FROM connections WHERE heartbeat_at < ?",
        )
        .bind(cutoff)
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await
        .context(SqliteQuerySnafu {
            stage: "sweep-stale-query",
        })?;

        let mut fired = 0;
        for raw in stale {
            let connection_id = ConnectionId::parse(&raw)?;
            fired += self.fire_disconnect_rules(connection_id).await?;
        }

        if fired > 0 {
            tracing::info!(fired, "fired disconnect rules of stale connections");
        }
        Ok(fired)
    }

    async fn touch_connection(&self, connection_id: ConnectionId) -> BackendResult<()> {
        sqlx::query("UPDATE connections SET heartbeat_at = ? WHERE id = ?")
            .bind(u64_to_i64(now_millis(), "connection-heartbeat-now")?)
            .bind(connection_id.to_string())
            .execute(&self.pool)
            .await
            .context(SqliteQuerySnafu {
                stage: "connection-heartbeat-update",
            })?;
        Ok(())
    }

    async fn fire_disconnect_rules(&self, connection_id: ConnectionId) -> BackendResult<usize> {
        let server_time = u64_to_i64(now_millis(), "disconnect-fire-now")?;
        let mut tx = self.pool.begin().await.context(SqliteQuerySnafu {
            stage: "disconnect-fire-begin",
        })?;

        let rules = sqlx::query_as::<_, DisconnectRuleRow>(
            "SELECT uid, online FROM disconnect_rules WHERE connection_id = ?",
        )
        .bind(connection_id.to_string())
        .fetch_all(&mut *tx)
        .await
        .context(SqliteQuerySnafu {
            stage: "disconnect-fire-load-rules",
        })?;

        for rule in &rules {
            sqlx::query(
                "INSERT INTO status (uid, online, last_seen) VALUES (?, ?, ?) \
                 ON CONFLICT(uid) DO UPDATE SET online = excluded.online, last_seen = excluded.last_seen",
            )
            .bind(rule.uid.as_str())
            .bind(rule.online)
            .bind(server_time)
            .execute(&mut *tx)
            .await
            .context(SqliteQuerySnafu {
                stage: "disconnect-fire-write-status",
            })?;
        }

        sqlx::query("DELETE FROM disconnect_rules WHERE connection_id = ?")
            .bind(connection_id.to_string())
            .execute(&mut *tx)
            .await
            .context(SqliteQuerySnafu {
                stage: "disconnect-fire-delete-rules",
            })?;
        sqlx::query("DELETE FROM connections WHERE id = ?")
            .bind(connection_id.to_string())
            .execute(&mut *tx)
            .await
            .context(SqliteQuerySnafu {
                stage: "disconnect-fire-delete-connection",
            })?;

        tx.commit().await.context(SqliteQuerySnafu {
            stage: "disconnect-fire-commit",
        })?;

        Ok(rules.len())
    }

    async fn watch_connection(self, watch: ConnectionWatch) {
        let ConnectionWatch { id, mut liveness } = watch;
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        heartbeat.tick().await;

        loop {
            tokio::select! {
                _ = &mut liveness => break,
                _ = heartbeat.tick() => {
                    if let Err(error) = self.touch_connection(id).await {
                        tracing::warn!(connection_id = %id, error = %error, "connection heartbeat failed");
                    }
                    if let Err(error) = self.sweep_stale().await {
                        tracing::warn!(error = %error, "stale connection sweep failed");
                    }
                }
            }
        }

        match self.fire_disconnect_rules(id).await {
            Ok(fired) => tracing::debug!(
                connection_id = %id,
                fired_rules = fired,
                "connection dropped; applied disconnect rules"
            ),
            // The next sweep picks the rules up once the heartbeat goes stale.
            Err(error) => tracing::warn!(
                connection_id = %id,
                error = %error,
                "failed to apply disconnect rules"
            ),
        }
    }
}

impl WindowSource for SqliteBackend {
    fn fetch_window(&self, limit: usize) -> BoxFuture<'_, BackendResult<Vec<ChatDocument>>> {
        Box::pin(async move {
            let limit = u64_to_i64(limit as u64, "chat-window-limit")?;
            let rows = sqlx::query_as::<_, ChatRow>(
                "SELECT id, text, sender, timestamp FROM chats ORDER BY timestamp DESC, id DESC LIMIT ?",
            )
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .context(SqliteQuerySnafu {
                stage: "chat-window-query",
            })?;

            let mut window = rows
                .into_iter()
                .map(chat_row_to_document)
                .collect::<BackendResult<Vec<_>>>()?;
            window.reverse();
            Ok(window)
        })
    }
}

impl IdentityProvider for SqliteBackend {
    fn sign_in_with_email_and_password<'a>(
        &'a self,
        email: &'a str,
        password: &'a str,
    ) -> BoxFuture<'a, BackendResult<AuthUser>> {
        Box::pin(async move {
            let normalized = check_sign_in_input(email, password)?;
            let row = sqlx::query_as::<_, AccountRow>(
                "SELECT uid, email, password_salt, password_digest FROM accounts WHERE email = ?",
            )
            .bind(normalized.as_str())
            .fetch_optional(&self.pool)
            .await
            .context(SqliteQuerySnafu {
                stage: "sign-in-lookup",
            })?
            .ok_or_else(|| rejected_credentials("sign-in-unknown-account"))?;

            let digest = PasswordDigest {
                salt: row.password_salt,
                digest: row.password_digest,
            };
            if !digest.verify(password) {
                return Err(rejected_credentials("sign-in-verify"));
            }

            Ok(AuthUser {
                uid: UserId::parse(&row.uid)?,
                email: row.email,
            })
        })
    }

    fn sign_out<'a>(&'a self, user: &'a AuthUser) -> BoxFuture<'a, BackendResult<()>> {
        Box::pin(async move {
            tracing::debug!(uid = %user.uid, "signed out");
            Ok(())
        })
    }
}

impl DocumentStore for SqliteBackend {
    fn add_chat(&self, input: NewChatDocument) -> BoxFuture<'_, BackendResult<ChatDocument>> {
        Box::pin(async move {
            let document = ChatDocument {
                id: DocumentId::new_v7(),
                text: input.text,
                sender: input.sender,
                timestamp_ms: input.timestamp_ms,
            };
            sqlx::query("INSERT INTO chats (id, text, sender, timestamp) VALUES (?, ?, ?, ?)")
                .bind(document.id.to_string())
                .bind(document.text.as_str())
                .bind(document.sender.as_str())
                .bind(u64_to_i64(document.timestamp_ms, "chat-add-timestamp")?)
                .execute(&self.pool)
                .await
                .context(SqliteQuerySnafu {
                    stage: "chat-add-insert",
                })?;

            self.changes.bump();
            Ok(document)
        })
    }

    fn list_chats(&self) -> BoxFuture<'_, BackendResult<Vec<ChatDocument>>> {
        Box::pin(async move {
            let rows = sqlx::query_as::<_, ChatRow>(
                "SELECT id, text, sender, timestamp FROM chats ORDER BY timestamp ASC, id ASC",
            )
            .fetch_all(&self.pool)
            .await
            .context(SqliteQuerySnafu {
                stage: "chat-list-query",
            })?;

            rows.into_iter().map(chat_row_to_document).collect()
        })
    }

    fn delete_chat(&self, document_id: DocumentId) -> BoxFuture<'_, BackendResult<()>> {
        Box::pin(async move {
            let result = sqlx::query("DELETE FROM chats WHERE id = ?")
                .bind(document_id.to_string())
                .execute(&self.pool)
                .await
                .context(SqliteQuerySnafu {
                    stage: "chat-delete-apply",
                })?;

            if result.rows_affected() == 0 {
                return NotFoundSnafu {
                    stage: "chat-delete-missing",
                    entity: "chat",
                    id: document_id.to_string(),
                }
                .fail();
            }

            self.changes.bump();
            Ok(())
        })
    }

    fn subscribe_recent(&self, query: FeedQuery) -> BackendResult<SnapshotSubscription> {
        validate_feed_query(&query)?;
        Ok(subscribe_window(
            self.clone(),
            &self.changes,
            query,
            Some(EXTERNAL_CHANGE_POLL_INTERVAL),
        ))
    }
}

impl PresenceStore for SqliteBackend {
    fn connect(&self) -> BoxFuture<'_, BackendResult<ConnectionHandle>> {
        Box::pin(async move {
            let runtime = runtime_handle("sqlite-connect-runtime")?;
            let (handle, watch) = open_connection();
            let now = u64_to_i64(now_millis(), "sqlite-connect-now")?;
            sqlx::query("INSERT INTO connections (id, opened_at, heartbeat_at) VALUES (?, ?, ?)")
                .bind(watch.id.to_string())
                .bind(now)
                .bind(now)
                .execute(&self.pool)
                .await
                .context(SqliteQuerySnafu {
                    stage: "sqlite-connect-insert",
                })?;

            runtime.spawn(self.clone().watch_connection(watch));

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
            sqlx::query(
                "INSERT INTO status (uid, online, last_seen) VALUES (?, ?, ?) \
                 ON CONFLICT(uid) DO UPDATE SET online = excluded.online, last_seen = excluded.last_seen",
            )
            .bind(uid.to_string())
            .bind(record.online)
            .bind(u64_to_i64(record.last_seen_ms, "presence-set-last-seen")?)
            .execute(&self.pool)
            .await
            .context(SqliteQuerySnafu {
                stage: "presence-set-upsert",
            })?;
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
            let live = sqlx::query_scalar::<_, i64>("SELECT 1 FROM connections WHERE id = ? LIMIT 1")
                .bind(connection_id.to_string())
                .fetch_optional(&self.pool)
                .await
                .context(SqliteQuerySnafu {
                    stage: "on-disconnect-lookup-connection",
                })?;
            ensure!(
                live.is_some(),
                ConnectionClosedSnafu {
                    stage: "on-disconnect-connection-live",
                    connection_id,
                }
            );

            sqlx::query(
                "INSERT INTO disconnect_rules (connection_id, uid, online) VALUES (?, ?, ?) \
                 ON CONFLICT(connection_id, uid) DO UPDATE SET online = excluded.online",
            )
            .bind(connection_id.to_string())
            .bind(uid.to_string())
            .bind(write.online)
            .execute(&self.pool)
            .await
            .context(SqliteQuerySnafu {
                stage: "on-disconnect-upsert-rule",
            })?;
            Ok(())
        })
    }

    fn cancel_on_disconnect(
        &self,
        connection_id: ConnectionId,
    ) -> BoxFuture<'_, BackendResult<usize>> {
        Box::pin(async move {
            let result = sqlx::query("DELETE FROM disconnect_rules WHERE connection_id = ?")
                .bind(connection_id.to_string())
                .execute(&self.pool)
                .await
                .context(SqliteQuerySnafu {
                    stage: "on-disconnect-cancel-rules",
                })?;
            let cancelled = result.rows_affected() as usize;
            tracing::debug!(%connection_id, cancelled, "cancelled disconnect rules");
            Ok(cancelled)
        })
    }

    fn get_presence(&self, uid: UserId) -> BoxFuture<'_, BackendResult<Option<PresenceRecord>>> {
        Box::pin(async move {
            let row = sqlx::query_as::<_, StatusRow>(
                "SELECT online, last_seen FROM status WHERE uid = ?",
            )
            .bind(uid.to_string())
            .fetch_optional(&self.pool)
            .await
            .context(SqliteQuerySnafu {
                stage: "presence-get-query",
            })?;

            row.map(status_row_to_record).transpose()
        })
    }
}

#[derive(Debug, FromRow)]
struct AccountRow {
    uid: String,
    email: String,
    password_salt: String,
    password_digest: String,
}

#[derive(Debug, FromRow)]
struct ChatRow {
    id: String,
    text: String,
    sender: String,
    timestamp: i64,
}

#[derive(Debug, FromRow)]
struct StatusRow {
    online: bool,
    last_seen: i64,
}

#[derive(Debug, FromRow)]
struct DisconnectRuleRow {
    uid: String,
    online: bool,
}

fn chat_row_to_document(row: ChatRow) -> BackendResult<ChatDocument> {
    Ok(ChatDocument {
        id: DocumentId::parse(&row.id)?,
        text: row.text,
        sender: row.sender,
        timestamp_ms: i64_to_u64(row.timestamp, "chat-row-timestamp")?,
    })
}

fn status_row_to_record(row: StatusRow) -> BackendResult<PresenceRecord> {
    Ok(PresenceRecord {
        online: row.online,
        last_seen_ms: i64_to_u64(row.last_seen, "status-row-last-seen")?,
    })
}

fn i64_to_u64(value: i64, stage: &'static str) -> BackendResult<u64> {
    value
        .try_into()
        .map_err(|_| BackendError::InvariantViolation {
            stage,
            details: format!("negative sqlite integer '{value}' cannot map to u64"),
        })
}

fn u64_to_i64(value: u64, stage: &'static str) -> BackendResult<i64> {
    value
        .try_into()
        .map_err(|_| BackendError::InvariantViolation {
            stage,
            details: format!("u64 '{value}' cannot map to sqlite i64"),
        })
}

fn ensure_database_directory(database_location: &str) -> BackendResult<()> {
    if database_location.starts_with("sqlite:") || database_location == ":memory:" {
        return Ok(());
    }

    let path = Path::new(database_location);
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).context(CreateSqliteDirectorySnafu {
            stage: "sqlite-open-create-directory",
            path: parent.display().to_string(),
        })?;
    }

    Ok(())
}

fn normalize_database_url(database_location: &str) -> String {
    if database_location.starts_with("sqlite:") {
        return database_location.to_string();
    }

    if database_location == ":memory:" {
        return "sqlite::memory:".to_string();
    }

    format!("sqlite://{database_location}")
}

#[cfg(test)]
mod tests;
